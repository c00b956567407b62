//! # Scheduled-Job Trigger
//!
//! The fallback trigger: a one-shot job that fires after a minimum latency and
//! must run before an override deadline. Persisted jobs are written to a small
//! JSON table so that a restarted launcher can re-arm them with `restore()`;
//! a job whose time has passed while nothing was running fires immediately.
//!
//! Jobs are armed on a `tokio-cron-scheduler` instance. Re-scheduling a job id
//! supersedes the earlier arming: each arming carries a generation number and
//! only the latest generation fires.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler as CronScheduler, JobSchedulerError};

use super::orchestrator::{Trigger, TriggerSender};

pub const DEFAULT_JOB_ID: &str = "signage-watchdog";
pub const DEFAULT_MIN_LATENCY: Duration = Duration::from_secs(60);
pub const DEFAULT_OVERRIDE_DEADLINE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub job_id: String,
    pub min_latency: Duration,
    pub override_deadline: Duration,
    pub persisted: bool,
}

impl JobRequest {
    pub fn persisted(job_id: impl Into<String>, min_latency: Duration, override_deadline: Duration) -> Self {
        Self {
            job_id: job_id.into(),
            min_latency,
            override_deadline,
            persisted: true,
        }
    }
}

impl Default for JobRequest {
    fn default() -> Self {
        Self::persisted(DEFAULT_JOB_ID, DEFAULT_MIN_LATENCY, DEFAULT_OVERRIDE_DEADLINE)
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Deadline {deadline:?} is earlier than minimum latency {min_latency:?}")]
    InvalidWindow {
        min_latency: Duration,
        deadline: Duration,
    },

    #[error("Job scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),

    #[error("Job table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed job table {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The OS scheduling primitive.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn schedule(&self, request: JobRequest) -> Result<(), ScheduleError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedJob {
    pub job_id: String,
    pub due_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
}

/// JSON file listing the persisted jobs that have not fired yet.
#[derive(Debug, Clone)]
pub struct PersistedJobTable {
    path: PathBuf,
}

impl PersistedJobTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<PersistedJob>, ScheduleError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_err(source)),
        };
        serde_json::from_str(&raw).map_err(|source| ScheduleError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    pub fn upsert(&self, job: PersistedJob) -> Result<(), ScheduleError> {
        let mut jobs = self.load().unwrap_or_default();
        jobs.retain(|j| j.job_id != job.job_id);
        jobs.push(job);
        self.store(&jobs)
    }

    pub fn remove(&self, job_id: &str) -> Result<(), ScheduleError> {
        let mut jobs = self.load()?;
        let before = jobs.len();
        jobs.retain(|j| j.job_id != job_id);
        if jobs.len() == before {
            return Ok(());
        }
        self.store(&jobs)
    }

    fn store(&self, jobs: &[PersistedJob]) -> Result<(), ScheduleError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let body = serde_json::to_string_pretty(jobs).map_err(|source| ScheduleError::Malformed {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, body).map_err(|e| self.io_err(e))
    }

    fn io_err(&self, source: std::io::Error) -> ScheduleError {
        ScheduleError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::weeks(52))
}

/// One-shot jobs armed on an in-process cron scheduler.
pub struct CronJobScheduler {
    inner: CronScheduler,
    table: Option<PersistedJobTable>,
    triggers: TriggerSender,
    generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl CronJobScheduler {
    /// Creates and starts the scheduler. Firings are delivered as
    /// `Trigger::ScheduledJob` on `triggers`.
    pub async fn start(
        table: Option<PersistedJobTable>,
        triggers: TriggerSender,
    ) -> Result<Self, ScheduleError> {
        let inner = CronScheduler::new().await?;
        inner.start().await?;
        Ok(Self {
            inner,
            table,
            triggers,
            generations: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Re-arms every job in the persisted table. Returns how many were armed.
    pub async fn restore(&self) -> Result<usize, ScheduleError> {
        let Some(table) = &self.table else {
            return Ok(0);
        };
        let jobs = table.load()?;
        let now = Utc::now();
        for job in &jobs {
            let delay = (job.due_at - now).to_std().unwrap_or(Duration::ZERO);
            if now > job.deadline_at {
                tracing::warn!(job_id = %job.job_id, deadline_at = %job.deadline_at, "Persisted job overdue, firing now");
            } else {
                tracing::info!(job_id = %job.job_id, delay_secs = delay.as_secs(), "Restoring persisted job");
            }
            self.arm(&job.job_id, delay).await?;
        }
        Ok(jobs.len())
    }

    pub async fn shutdown(mut self) -> Result<(), ScheduleError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    fn next_generation(&self, job_id: &str) -> u64 {
        let mut generations = match self.generations.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let generation = generations.entry(job_id.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    async fn arm(&self, job_id: &str, delay: Duration) -> Result<(), ScheduleError> {
        let generation = self.next_generation(job_id);
        let job_id = job_id.to_string();
        let triggers = self.triggers.clone();
        let table = self.table.clone();
        let generations = self.generations.clone();

        let job = Job::new_one_shot_async(delay, move |_uuid, _scheduler| {
            let job_id = job_id.clone();
            let triggers = triggers.clone();
            let table = table.clone();
            let generations = generations.clone();
            Box::pin(async move {
                let current = generations
                    .lock()
                    .map(|g| g.get(&job_id).copied())
                    .unwrap_or(None);
                if current != Some(generation) {
                    tracing::debug!(job_id = %job_id, generation, "Superseded job firing ignored");
                    return;
                }
                if let Some(table) = &table {
                    if let Err(e) = table.remove(&job_id) {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to update job table");
                    }
                }
                tracing::info!(job_id = %job_id, "Scheduled job fired");
                triggers.fire(Trigger::ScheduledJob(job_id));
            })
        })?;
        self.inner.add(job).await?;
        Ok(())
    }
}

#[async_trait]
impl JobScheduler for CronJobScheduler {
    async fn schedule(&self, request: JobRequest) -> Result<(), ScheduleError> {
        if request.override_deadline < request.min_latency {
            return Err(ScheduleError::InvalidWindow {
                min_latency: request.min_latency,
                deadline: request.override_deadline,
            });
        }

        if request.persisted {
            if let Some(table) = &self.table {
                let now = Utc::now();
                table.upsert(PersistedJob {
                    job_id: request.job_id.clone(),
                    due_at: now + to_chrono(request.min_latency),
                    deadline_at: now + to_chrono(request.override_deadline),
                })?;
            }
        }
        self.arm(&request.job_id, request.min_latency).await
    }
}
