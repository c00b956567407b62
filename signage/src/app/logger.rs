use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Rolled files kept per binary, newest first.
pub const KEEP_LOG_FILES: usize = 7;

/// Console plus daily-rolling JSON file logging.
///
/// `RUST_LOG` wins over `log_level`. The returned guard flushes the file writer
/// when dropped, so keep it alive for the whole of `main`.
pub fn setup_logging(log_dir: &Path, log_level: &str, file_prefix: &str) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    match cleanup_old_logs(log_dir, file_prefix, KEEP_LOG_FILES) {
        Ok(0) => {}
        Ok(removed) => eprintln!("Removed {removed} old log files from {}", log_dir.display()),
        Err(e) => eprintln!("Failed to clean up old logs in {}: {e}", log_dir.display()),
    }

    let file_appender = rolling::daily(log_dir, file_prefix);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .context("invalid log level")?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("installing the tracing subscriber")?;

    tracing::info!(log_level, log_dir = %log_dir.display(), "Logging initialized");
    Ok(guard)
}

/// Deletes all but the `keep` most recently modified files starting with
/// `prefix`. Returns how many were removed.
pub fn cleanup_old_logs(log_dir: &Path, prefix: &str, keep: usize) -> Result<usize> {
    let mut entries: Vec<(SystemTime, std::path::PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e.path()))
        })
        .collect();

    // Sort by modification time, newest first
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn keeps_newest_files_of_one_prefix() {
        let dir = TempDir::new().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        for day in 1..=4u64 {
            let path = dir.path().join(format!("signage_display.2026-01-0{day}"));
            fs::write(&path, "{}").unwrap();
            let file = fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(base + Duration::from_secs(day * 60)).unwrap();
        }
        fs::write(dir.path().join("signage_launcher.2026-01-01"), "{}").unwrap();

        let removed = cleanup_old_logs(dir.path(), "signage_display", 2).unwrap();
        assert_eq!(removed, 2);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "signage_display.2026-01-03",
                "signage_display.2026-01-04",
                "signage_launcher.2026-01-01",
            ]
        );
    }
}
