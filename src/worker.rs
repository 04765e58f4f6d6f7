//! Job handler
//!
//! Bounds the number of in-flight submissions with a counting semaphore and
//! stamps each accepted submission with its processing deadline before
//! handing it to the runner.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::RunnerConfig;
use crate::models::Submission;
use crate::nats::SubmissionHandler;
use crate::runner::Runner;

/// Gate between the ingress adapter and the runner.
pub struct JobHandler {
    runner: Runner,
    semaphore: Option<Arc<Semaphore>>,
    submission_timeout: Duration,
}

impl JobHandler {
    pub fn new(runner: Runner, config: &RunnerConfig) -> Self {
        let semaphore = if config.max_concurrent_jobs > 0 {
            info!(
                max_concurrent_jobs = config.max_concurrent_jobs,
                "job handler initialized with bounded concurrency"
            );
            Some(Arc::new(Semaphore::new(config.max_concurrent_jobs as usize)))
        } else {
            info!("job handler initialized with unlimited concurrent jobs");
            None
        };

        Self {
            runner,
            semaphore,
            submission_timeout: Duration::from_secs(config.submission_timeout_sec),
        }
    }
}

#[async_trait]
impl SubmissionHandler for JobHandler {
    async fn handle_submission(&self, submission: Submission) {
        let _permit = match &self.semaphore {
            Some(semaphore) => {
                let waiting_since = Instant::now();
                match semaphore.acquire().await {
                    Ok(permit) => {
                        debug!(
                            submission_id = %submission.id,
                            waited_ms = waiting_since.elapsed().as_millis() as u64,
                            "acquired job slot"
                        );
                        Some(permit)
                    }
                    Err(e) => {
                        error!(submission_id = %submission.id, error = %e, "job semaphore closed");
                        return;
                    }
                }
            }
            None => None,
        };

        // The deadline starts once a slot is held, so queueing time does
        // not eat into the submission's budget.
        let deadline = Instant::now() + self.submission_timeout;
        self.runner.process_submission(&submission, deadline).await;
        debug!(submission_id = %submission.id, "released job slot");
    }
}
