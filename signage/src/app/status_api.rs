//! Local status and control endpoints, bound to the loopback interface only.
//!
//! | Route | Effect |
//! |---|---|
//! | `GET /status` | the current `DisplayStatus` as JSON |
//! | `GET /health` | liveness plus the display phase |
//! | `POST /retry` | operator retry |
//! | `POST /refresh` | fetch the configuration now |

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use lib_signage::core::ControlHandle;

/// A replaced display can hold the port for its whole graceful shutdown.
pub const BIND_ATTEMPTS: u32 = 30;
pub const BIND_RETRY_DELAY: Duration = Duration::from_millis(500);

pub fn router(handle: ControlHandle) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/retry", post(retry_handler))
        .route("/refresh", post(refresh_handler))
        .with_state(handle)
}

pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding status API to {addr}"))
}

/// Binds the port, retrying every `delay` while it is still taken. Gives up
/// after `attempts` tries or when `cancel` fires.
pub async fn bind_with_retry(
    port: u16,
    attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<TcpListener> {
    let mut attempt = 1;
    loop {
        match bind(port).await {
            Ok(listener) => return Ok(listener),
            Err(e) if attempt < attempts => {
                tracing::debug!(port, attempt, error = %e, "Status API port busy, retrying");
            }
            Err(e) => return Err(e),
        }
        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled while waiting for port {port}"),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// The status API task of the display host.
pub async fn bind_and_serve(port: u16, handle: ControlHandle, cancel: CancellationToken) -> Result<()> {
    let listener = bind_with_retry(port, BIND_ATTEMPTS, BIND_RETRY_DELAY, &cancel).await?;
    serve(listener, handle, cancel).await
}

/// Serves until `cancel` fires.
pub async fn serve(listener: TcpListener, handle: ControlHandle, cancel: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Status API listening");
    axum::serve(listener, router(handle))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            tracing::info!("Status API shutting down");
        })
        .await?;
    Ok(())
}

async fn status_handler(State(handle): State<ControlHandle>) -> impl IntoResponse {
    Json(handle.status())
}

async fn health_handler(State(handle): State<ControlHandle>) -> impl IntoResponse {
    let status = handle.status();
    (StatusCode::OK, Json(json!({ "status": "ok", "phase": status.phase })))
}

fn accepted(sent: bool) -> StatusCode {
    if sent {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn retry_handler(State(handle): State<ControlHandle>) -> impl IntoResponse {
    tracing::info!("Operator retry requested");
    accepted(handle.retry())
}

async fn refresh_handler(State(handle): State<ControlHandle>) -> impl IntoResponse {
    tracing::info!("Operator refresh requested");
    accepted(handle.refresh())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_signage::configs::DeviceId;
    use lib_signage::core::control_channel;
    use serde_json::Value;

    async fn start(handle: ControlHandle) -> (String, CancellationToken, tokio::task::JoinHandle<Result<()>>) {
        let listener = bind(0).await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve(listener, handle, cancel.clone()));
        (base, cancel, task)
    }

    #[tokio::test]
    async fn reports_status_and_accepts_commands() {
        let (handle, _inbox) = control_channel(DeviceId::new("lobby-1").unwrap());
        let (base, cancel, task) = start(handle).await;
        let client = reqwest::Client::new();

        let status: Value = client
            .get(format!("{base}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["deviceId"], "lobby-1");
        assert_eq!(status["phase"], "normal");
        assert_eq!(status["pageCount"], 0);

        let health: Value = client
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let retry = client.post(format!("{base}/retry")).send().await.unwrap();
        assert_eq!(retry.status().as_u16(), 202);
        let refresh = client.post(format!("{base}/refresh")).send().await.unwrap();
        assert_eq!(refresh.status().as_u16(), 202);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_waits_for_the_previous_holder_to_let_go() {
        let holder = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = holder.local_addr().unwrap().port();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(holder);
        });

        let listener = bind_with_retry(port, 40, Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn bind_gives_up_while_the_port_stays_taken() {
        let holder = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = holder.local_addr().unwrap().port();

        let result = bind_with_retry(port, 3, Duration::from_millis(10), &CancellationToken::new()).await;
        assert!(result.is_err());

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(bind_with_retry(port, 1000, Duration::from_secs(60), &cancel).await.is_err());
        drop(holder);
    }

    #[tokio::test]
    async fn commands_fail_once_the_controller_is_gone() {
        let (handle, inbox) = control_channel(DeviceId::new("lobby-1").unwrap());
        drop(inbox);
        let (base, cancel, task) = start(handle).await;

        let retry = reqwest::Client::new()
            .post(format!("{base}/retry"))
            .send()
            .await
            .unwrap();
        assert_eq!(retry.status().as_u16(), 503);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
