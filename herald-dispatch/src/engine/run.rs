//! The worker pool driving one run

use std::{sync::Arc, time::Duration};

use ahash::AHashMap;
use herald_common::{
    Address, CampaignId, StatusTimestamps, Template,
    tracing::{error, info, warn},
};
use herald_store::{AuditLog, CampaignStore};
use tokio::{sync::watch, task::JoinSet};

use super::{
    DispatchConfig,
    handle::ActiveRun,
    recipient::{Job, Recorder, RunContext},
};
use crate::{DispatchResult, RateLimiter, transport::Transport};

pub(super) struct Run {
    pub campaign: CampaignId,
    pub template: Template,
    pub jobs: Vec<Job>,
    pub transport: Arc<dyn Transport>,
    pub audit: Arc<dyn AuditLog>,
    pub limiter: Arc<RateLimiter>,
    pub config: DispatchConfig,
    pub run: Arc<ActiveRun>,
    pub cancelled: watch::Receiver<bool>,
}

impl Run {
    /// Attempt every job, at most `workers` recipients at a time
    ///
    /// Once cancellation is observed no further recipients are started, the
    /// remaining ones are reported as pending.
    pub(super) async fn execute(self) -> DispatchResult {
        let workers = self.config.workers.max(1);

        let session = match self.transport.open(workers).await {
            Ok(session) => session,
            Err(e) => {
                error!(
                    campaign_id = %self.campaign,
                    transport = self.transport.name(),
                    error = %e,
                    "Transport unavailable, failing every recipient"
                );
                return self.fail_all(&format!("Transport unavailable: {e}")).await;
            }
        };

        let ctx = Arc::new(RunContext {
            recorder: Recorder {
                campaign: self.campaign,
                audit: self.audit,
                run: Arc::clone(&self.run),
            },
            template: self.template,
            session: Arc::clone(&session),
            transport: self.transport.name(),
            limiter: self.limiter,
            policy: self.config.retry.clone(),
            attempt_timeout: Duration::from_secs(self.config.attempt_timeout_secs),
        });

        let mut queue = self.jobs.into_iter();
        let mut join_set: JoinSet<()> = JoinSet::new();
        let mut in_flight: AHashMap<tokio::task::Id, Address> = AHashMap::new();
        let mut cancelled = false;

        loop {
            while join_set.len() < workers && !cancelled {
                if *self.cancelled.borrow() {
                    cancelled = true;
                    break;
                }
                let Some(job) = queue.next() else {
                    break;
                };

                let address = job.address().clone();
                let ctx = Arc::clone(&ctx);
                let task = join_set.spawn(async move { ctx.deliver(job).await });
                in_flight.insert(task.id(), address);
            }

            match join_set.join_next_with_id().await {
                Some(Ok((id, ()))) => {
                    in_flight.remove(&id);
                }
                Some(Err(e)) => {
                    let recipient = in_flight.remove(&e.id());
                    error!(
                        campaign_id = %self.campaign,
                        recipient = ?recipient,
                        error = %e,
                        "Delivery task failed"
                    );
                    if let Some(recipient) = recipient {
                        self.run.progress.failure(recipient);
                    }
                }
                None => break,
            }
        }

        session.close().await;

        let pending: Vec<Address> = queue.map(|job| job.contact.address).collect();
        if cancelled {
            warn!(
                campaign_id = %self.campaign,
                pending = pending.len(),
                "Run cancelled, remaining recipients were not started"
            );
        }

        self.run.progress.finish(pending, cancelled)
    }

    /// Record one failed attempt for every job
    async fn fail_all(self, detail: &str) -> DispatchResult {
        let recorder = Recorder {
            campaign: self.campaign,
            audit: self.audit,
            run: Arc::clone(&self.run),
        };

        for job in &self.jobs {
            recorder.give_up(job.address(), job.first_attempt, detail).await;
        }

        self.run.progress.finish(Vec::new(), false)
    }
}

/// Write the terminal status for a finished run
pub(super) async fn settle(campaigns: &dyn CampaignStore, campaign: CampaignId, result: &DispatchResult) {
    let status = result.settled_status();
    let timestamps = StatusTimestamps {
        started_at: None,
        completed_at: Some(chrono::Utc::now()),
    };

    match campaigns.set_campaign_status(campaign, status, timestamps).await {
        Ok(()) => info!(
            campaign_id = %campaign,
            status = %status,
            sent = result.sent,
            simulated = result.simulated,
            failed = result.failed,
            pending = result.pending.len(),
            cancelled = result.cancelled,
            "Campaign run finished"
        ),
        Err(e) => error!(
            campaign_id = %campaign,
            status = %status,
            error = %e,
            "Failed to record campaign status"
        ),
    }
}
