//! NATS ingress and egress adapters
//!
//! Ingress: a queue-group subscription on the submission subject, so each
//! submission is delivered to exactly one runner instance in the group.
//! Malformed payloads are logged and dropped. Egress: fire-and-forget
//! publishing of per-test-case results; failures are logged, not retried.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_nats::Client;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::models::{Submission, SubmissionResult};
use crate::runner::ResultPublisher;

/// Seam between the ingress adapter and the concurrency gate.
#[async_trait]
pub trait SubmissionHandler: Send + Sync + 'static {
    async fn handle_submission(&self, submission: Submission);
}

/// Publishes results on the result subject.
pub struct NatsPublisher {
    client: Client,
    subject: String,
}

impl NatsPublisher {
    pub fn new(client: Client, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl ResultPublisher for NatsPublisher {
    async fn publish(&self, result: &SubmissionResult) -> Result<()> {
        let payload = serde_json::to_vec(result).context("failed to encode submission result")?;
        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .context("failed to publish submission result")?;
        debug!(
            submission_id = %result.submission_id,
            test_case_id = %result.test_case_id,
            subject = %self.subject,
            "published result"
        );
        Ok(())
    }
}

/// Queue-group consumer of submission payloads.
pub struct Subscriber {
    client: Client,
    subject: String,
    queue_group: String,
}

impl Subscriber {
    pub fn new(client: Client, subject: impl Into<String>, queue_group: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
            queue_group: queue_group.into(),
        }
    }

    /// Consume submissions until `shutdown` resolves, spawning one task per
    /// accepted submission. On shutdown the subscription is dropped first,
    /// then in-flight submissions are drained to completion.
    pub async fn run<H: SubmissionHandler>(
        &self,
        handler: Arc<H>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let mut subscription = self
            .client
            .queue_subscribe(self.subject.clone(), self.queue_group.clone())
            .await
            .with_context(|| format!("failed to subscribe to {}", self.subject))?;
        info!(
            subject = %self.subject,
            queue_group = %self.queue_group,
            "listening for submissions"
        );

        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                message = subscription.next() => match message {
                    Some(message) => match serde_json::from_slice::<Submission>(&message.payload) {
                        Ok(submission) => {
                            info!(submission_id = %submission.id, "received submission");
                            let handler = Arc::clone(&handler);
                            in_flight.spawn(async move {
                                handler.handle_submission(submission).await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to decode submission payload; dropping message");
                        }
                    },
                    None => {
                        warn!("submission subscription closed by server");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("shutdown requested; draining subscription");
                    break;
                }
            }
        }

        if let Err(e) = subscription.unsubscribe().await {
            warn!(error = %e, "failed to unsubscribe");
        }
        while in_flight.join_next().await.is_some() {}
        Ok(())
    }
}
