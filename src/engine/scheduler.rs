//! Cron job registry for schedule-triggered rules.
//!
//! One background task per scheduled rule, keyed by rule id. Replacing or
//! removing a rule cancels its task before anything else happens, so a rule
//! never fires under a stale definition.

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::EngineError;

/// Parse a cron expression, accepting the common 5-field form by
/// normalizing it to the 6-field form with a zero seconds field.
pub fn parse_schedule(expression: &str) -> Result<Schedule, EngineError> {
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| EngineError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

struct ScheduledJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Running cron tasks, keyed by rule id.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a task that runs `run` at every upcoming fire time of
    /// `schedule`. An existing job under the same id is cancelled first.
    pub fn register<F, Fut>(&self, id: &str, schedule: Schedule, run: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel(id);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let job_id = id.to_string();
        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    debug!("Schedule for job '{}' has no upcoming fire times", job_id);
                    break;
                };
                let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => run().await,
                }
            }
        });

        self.jobs.lock().unwrap().insert(
            id.to_string(),
            ScheduledJob { cancel, handle },
        );
    }

    /// Cancel the job for `id`, if any. Returns whether one existed.
    pub fn cancel(&self, id: &str) -> bool {
        match self.jobs.lock().unwrap().remove(id) {
            Some(job) => {
                job.cancel.cancel();
                job.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut jobs = self.jobs.lock().unwrap();
        if !jobs.is_empty() {
            warn!("Cancelling {} scheduled jobs", jobs.len());
        }
        for (_, job) in jobs.drain() {
            job.cancel.cancel();
            job.handle.abort();
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.lock().unwrap().contains_key(id)
    }
}
