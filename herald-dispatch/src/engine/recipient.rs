//! One recipient's attempts within a run

use std::{sync::Arc, time::Duration};

use herald_common::{
    Address, AttemptOutcome, CampaignId, Contact, DeliveryAttempt, Template, audit,
    tracing::{debug, error, warn},
};
use herald_store::AuditLog;
use tokio::time::Instant;

use super::handle::ActiveRun;
use crate::{
    DeliveryError, RateLimiter, RenderWarning, RetryPolicy, TemporaryError, render,
    transport::Session,
};

/// A recipient queued for a run
#[derive(Debug, Clone)]
pub(super) struct Job {
    pub contact: Contact,
    /// Number of the first attempt this run makes
    pub first_attempt: u32,
}

impl Job {
    pub(super) const fn new(contact: Contact, first_attempt: u32) -> Self {
        Self {
            contact,
            first_attempt,
        }
    }

    pub(super) const fn address(&self) -> &Address {
        &self.contact.address
    }
}

/// Writes attempt records and feeds the run's counts
#[derive(Debug)]
pub(super) struct Recorder {
    pub campaign: CampaignId,
    pub audit: Arc<dyn AuditLog>,
    pub run: Arc<ActiveRun>,
}

/// Everything the workers of one run share
#[derive(Debug)]
pub(super) struct RunContext {
    pub recorder: Recorder,
    pub template: Template,
    pub session: Arc<dyn Session>,
    pub transport: &'static str,
    pub limiter: Arc<RateLimiter>,
    pub policy: RetryPolicy,
    pub attempt_timeout: Duration,
}

impl RunContext {
    /// Render and deliver to one recipient, retrying temporary failures
    ///
    /// Every attempt is appended to the audit log before the run's counts see it.
    pub(super) async fn deliver(&self, job: Job) {
        let campaign = self.recorder.campaign;
        let progress = &self.recorder.run.progress;
        let recipient = job.contact.address.clone();

        let rendered = match render(&self.template, &job.contact) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(
                    campaign_id = %campaign,
                    recipient = %recipient,
                    error = %e,
                    "Template could not be rendered"
                );
                let detail = format!("Rendering failed: {e}");
                self.recorder.give_up(&recipient, job.first_attempt, &detail).await;
                return;
            }
        };

        if !rendered.is_complete() {
            let missing: Vec<String> = rendered.missing.into_iter().collect();
            debug!(
                campaign_id = %campaign,
                recipient = %recipient,
                missing = ?missing,
                "Rendered with missing fields"
            );
            progress.warning(RenderWarning {
                recipient: recipient.clone(),
                missing,
            });
        }

        let message = rendered.message;
        let mut attempt = job.first_attempt;
        let mut attempts_made = 0;

        loop {
            attempts_made += 1;
            self.limiter.acquire().await;
            audit::log_delivery_attempt(campaign, &recipient, attempt, self.transport);

            let started = Instant::now();
            let result = tokio::time::timeout(self.attempt_timeout, self.session.deliver(&message))
                .await
                .unwrap_or_else(|_| {
                    Err(DeliveryError::from(TemporaryError::Timeout(format!(
                        "No response within {}s",
                        self.attempt_timeout.as_secs_f64()
                    ))))
                });

            match result {
                Ok(delivered) => {
                    let outcome = AttemptOutcome::from(delivered);
                    let record = DeliveryAttempt::succeeded(
                        campaign,
                        recipient.clone(),
                        attempt,
                        outcome,
                    );
                    if self.recorder.append(&record).await {
                        audit::log_delivery_success(
                            campaign,
                            &recipient,
                            attempt,
                            outcome,
                            started.elapsed().as_millis(),
                        );
                        progress.success(delivered);
                    }
                    return;
                }
                Err(e) if e.is_temporary() && self.policy.should_retry(attempts_made) => {
                    let detail = e.to_string();
                    let record =
                        DeliveryAttempt::retrying(campaign, recipient.clone(), attempt, &detail);
                    if !self.recorder.append(&record).await {
                        return;
                    }
                    audit::log_delivery_failure(
                        campaign,
                        &recipient,
                        &detail,
                        attempt,
                        AttemptOutcome::Retrying,
                    );

                    let delay = self.policy.backoff(attempts_made);
                    debug!(
                        campaign_id = %campaign,
                        recipient = %recipient,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Backing off before next attempt"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.recorder.give_up(&recipient, attempt, &e.to_string()).await;
                    return;
                }
            }
        }
    }
}

impl Recorder {
    /// Record the terminal failure of `recipient`
    pub(super) async fn give_up(&self, recipient: &Address, attempt: u32, detail: &str) {
        let record = DeliveryAttempt::failed(self.campaign, recipient.clone(), attempt, detail);
        if self.append(&record).await {
            audit::log_delivery_failure(
                self.campaign,
                recipient,
                detail,
                attempt,
                AttemptOutcome::Failed,
            );
            self.run.progress.failure(recipient.clone());
        }
    }

    /// Append `record`; if that fails the recipient is counted as failed
    pub(super) async fn append(&self, record: &DeliveryAttempt) -> bool {
        match self.audit.append(record).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    campaign_id = %self.campaign,
                    recipient = %record.recipient(),
                    attempt = record.attempt(),
                    error = %e,
                    "Audit log append failed, abandoning recipient"
                );
                self.run.progress.failure(record.recipient().clone());
                false
            }
        }
    }
}
