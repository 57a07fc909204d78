//! The dispatcher: admission, runs, retries and reporting

mod handle;
mod recipient;
mod run;

use std::{borrow::Cow, sync::Arc, time::Duration};

use ahash::AHashSet;
use chrono::Utc;
use dashmap::DashMap;
use herald_common::{
    Address, AttemptOutcome, Campaign, CampaignId, CampaignStatus, DeliveryAttempt,
    StatusTimestamps, audit, dispatch, tracing::warn,
};
use herald_store::{AuditLog, CampaignStore, ContactStore};
use serde::{Deserialize, Serialize};

pub use handle::DispatchHandle;
use handle::{ActiveRun, RunClaim};
use recipient::Job;
use run::Run;

use crate::{
    Delivered, DispatchError, DispatchResult, DispatchStatus, InvalidStateError, RateLimitConfig,
    RateLimiter, RetryPolicy, TemporaryError, render::render_with, resolver, transport::Transport,
    types::latest_outcomes,
};

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Recipients processed concurrently per run
    ///
    /// Default: number of CPUs, at most 16
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Upper bound for a single delivery attempt (in seconds)
    ///
    /// Default: 30 seconds
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

fn default_workers() -> usize {
    num_cpus::get().clamp(1, 16)
}

const fn default_attempt_timeout_secs() -> u64 {
    30
}

/// Runs campaigns against a transport, one active run per campaign
#[derive(Debug, Clone)]
pub struct Dispatcher {
    campaigns: Arc<dyn CampaignStore>,
    contacts: Arc<dyn ContactStore>,
    audit: Arc<dyn AuditLog>,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    config: DispatchConfig,
    runs: Arc<DashMap<CampaignId, Arc<ActiveRun>>>,
    /// Results of runs finished by this dispatcher
    results: Arc<DashMap<CampaignId, DispatchResult>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        contacts: Arc<dyn ContactStore>,
        audit: Arc<dyn AuditLog>,
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            campaigns,
            contacts,
            audit,
            transport,
            limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            config,
            runs: Arc::new(DashMap::new()),
            results: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Name of the active transport
    #[must_use]
    pub fn transport(&self) -> &'static str {
        self.transport.name()
    }

    /// Start the first run of a draft campaign
    ///
    /// Returns once the recipients are resolved and the campaign is `running`,
    /// the deliveries continue on a spawned task.
    ///
    /// # Errors
    ///
    /// - [`InvalidStateError::AlreadyRunning`] if the campaign has an active run
    /// - [`InvalidStateError::NotDraft`] if the campaign has been dispatched before
    /// - [`InvalidStateError::AlreadyDispatched`] if the audit log already holds
    ///   attempts for it, whatever the stored status says
    /// - [`DispatchError::Resolution`] if the selector cannot be resolved, the
    ///   campaign stays a draft
    /// - [`DispatchError::Store`] if the campaign cannot be read or updated
    pub async fn start_dispatch(&self, id: CampaignId) -> Result<DispatchHandle, DispatchError> {
        let claim = self.claim(id)?;

        let campaign = self.campaigns.get_campaign(id).await?;
        if campaign.status != CampaignStatus::Draft {
            return Err(InvalidStateError::NotDraft {
                campaign: id,
                status: campaign.status,
            }
            .into());
        }
        if !self.audit.attempts(id).await?.is_empty() {
            return Err(InvalidStateError::AlreadyDispatched(id).into());
        }

        let recipients = resolver::resolve(self.contacts.as_ref(), &campaign.selector).await?;
        let jobs: Vec<Job> = recipients
            .iter()
            .map(|contact| Job::new(contact.clone(), 1))
            .collect();

        self.campaigns
            .set_campaign_status(
                id,
                CampaignStatus::Running,
                StatusTimestamps {
                    started_at: Some(Utc::now()),
                    completed_at: None,
                },
            )
            .await?;

        dispatch!(
            level = INFO,
            "Campaign {id}: starting run for {} recipients via {} transport",
            jobs.len(),
            self.transport.name()
        );

        Ok(self.launch(campaign, jobs, claim, DispatchResult::default()))
    }

    /// Run the recipients of a finished campaign that did not succeed
    ///
    /// Candidates are recipients whose last attempt failed, plus the ones a run
    /// of this dispatcher left without a record: never started by a cancelled
    /// run, or written off when their record could not be appended. Each gets a
    /// fresh attempt budget, with attempt numbers continuing from its last
    /// record. Recipients that no longer match the selector or have unsubscribed
    /// are left as they are.
    ///
    /// # Errors
    ///
    /// - [`InvalidStateError::AlreadyRunning`] if the campaign has an active run
    /// - [`InvalidStateError::NotRetryable`] unless the campaign is failed or
    ///   partially failed
    /// - [`InvalidStateError::NothingToRetry`] if there are no candidates
    /// - [`DispatchError::Resolution`], [`DispatchError::Store`] or
    ///   [`DispatchError::Audit`] if a collaborator fails
    pub async fn retry_failed(&self, id: CampaignId) -> Result<DispatchHandle, DispatchError> {
        let claim = self.claim(id)?;

        let campaign = self.campaigns.get_campaign(id).await?;
        if !campaign.status.is_retryable() {
            return Err(InvalidStateError::NotRetryable {
                campaign: id,
                status: campaign.status,
            }
            .into());
        }

        let history = self.audit.attempts(id).await?;
        let latest = latest_outcomes(&history);
        let mut prior = DispatchResult::from_attempts(&history);
        if let Some(last) = self.results.get(&id).map(|last| last.value().clone()) {
            prior.pending = last.pending;
            for recipient in last.failing {
                if !latest.contains_key(&recipient) {
                    prior.record_failure(recipient);
                }
            }
        }

        let candidates: AHashSet<Address> = prior
            .failing
            .iter()
            .chain(prior.pending.iter())
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(InvalidStateError::NothingToRetry(id).into());
        }

        let recipients = resolver::resolve(self.contacts.as_ref(), &campaign.selector)
            .await?
            .only(&candidates);
        if recipients.len() < candidates.len() {
            warn!(
                campaign_id = %id,
                skipped = candidates.len() - recipients.len(),
                "Some failed recipients no longer match the campaign and are not retried"
            );
        }
        if recipients.is_empty() {
            return Err(InvalidStateError::NothingToRetry(id).into());
        }

        let jobs: Vec<Job> = recipients
            .iter()
            .map(|contact| {
                let next = latest
                    .get(&contact.address)
                    .map_or(1, |(last, _)| last + 1);
                Job::new(contact.clone(), next)
            })
            .collect();

        for recipient in recipients.addresses() {
            prior.forget(recipient);
        }
        prior.cancelled = false;

        // Keeps the original `started_at`, the store clears `completed_at`
        self.campaigns
            .set_campaign_status(id, CampaignStatus::Running, StatusTimestamps::default())
            .await?;

        dispatch!(
            level = INFO,
            "Campaign {id}: retrying {} recipients via {} transport",
            jobs.len(),
            self.transport.name()
        );

        Ok(self.launch(campaign, jobs, claim, prior))
    }

    /// Current status and counts for a campaign
    ///
    /// Live counts while a run is active, otherwise the last run's result or,
    /// failing that, counts rebuilt from the audit log.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Store`] or [`DispatchError::Audit`] if a collaborator fails.
    pub async fn status(&self, id: CampaignId) -> Result<DispatchStatus, DispatchError> {
        let campaign = self.campaigns.get_campaign(id).await?;

        if let Some(run) = self.runs.get(&id).map(|run| Arc::clone(run.value())) {
            return Ok(DispatchStatus {
                campaign,
                result: run.progress.snapshot(),
                running: true,
            });
        }

        let cached = self.results.get(&id).map(|result| result.value().clone());
        let result = match cached {
            Some(result) => result,
            None => DispatchResult::from_attempts(&self.audit.attempts(id).await?),
        };

        Ok(DispatchStatus {
            campaign,
            result,
            running: false,
        })
    }

    /// Ask the active run of a campaign to stop
    ///
    /// # Errors
    ///
    /// [`InvalidStateError::NotRunning`] if the campaign has no active run.
    pub fn cancel(&self, id: CampaignId) -> Result<(), DispatchError> {
        let run = self
            .runs
            .get(&id)
            .map(|run| Arc::clone(run.value()))
            .ok_or(InvalidStateError::NotRunning(id))?;

        dispatch!(level = INFO, "Campaign {id}: cancelling run");
        run.cancel();
        Ok(())
    }

    /// Ask every active run to stop
    pub fn cancel_all(&self) {
        for run in self.runs.iter() {
            dispatch!(level = INFO, "Campaign {}: cancelling run", run.key());
            run.value().cancel();
        }
    }

    /// Every attempt recorded for a campaign, ordered by recipient then attempt
    ///
    /// # Errors
    ///
    /// [`DispatchError::Store`] if the campaign does not exist,
    /// [`DispatchError::Audit`] if the log cannot be read.
    pub async fn list_attempts(&self, id: CampaignId) -> Result<Vec<DeliveryAttempt>, DispatchError> {
        self.campaigns.get_campaign(id).await?;
        Ok(self.audit.attempts(id).await?)
    }

    /// Deliver one preview of a campaign to `to`
    ///
    /// Every placeholder is filled with `preview`. The campaign status is not
    /// touched and no attempt record is written.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Render`] for a malformed template, [`DispatchError::Delivery`]
    /// if the transport refuses the message, [`DispatchError::Store`] if the
    /// campaign cannot be read.
    pub async fn send_test(
        &self,
        id: CampaignId,
        to: Address,
        preview: &str,
    ) -> Result<Delivered, DispatchError> {
        let campaign = self.campaigns.get_campaign(id).await?;
        let rendered = render_with(&campaign.template, to.clone(), |_| Some(Cow::Borrowed(preview)))?;

        let session = self.transport.open(1).await?;
        self.limiter.acquire().await;

        let timeout = Duration::from_secs(self.config.attempt_timeout_secs);
        let result = tokio::time::timeout(timeout, session.deliver(&rendered.message))
            .await
            .unwrap_or_else(|_| {
                Err(TemporaryError::Timeout(format!("No response within {}s", timeout.as_secs())).into())
            });
        session.close().await;

        match &result {
            Ok(delivered) => audit::log_test_send(id, &to, Ok(AttemptOutcome::from(*delivered))),
            Err(e) => audit::log_test_send(id, &to, Err(&e.to_string())),
        }

        Ok(result?)
    }

    fn claim(&self, id: CampaignId) -> Result<RunClaim, DispatchError> {
        RunClaim::acquire(&self.runs, id).ok_or_else(|| InvalidStateError::AlreadyRunning(id).into())
    }

    fn launch(
        &self,
        campaign: Campaign,
        jobs: Vec<Job>,
        claim: RunClaim,
        initial: DispatchResult,
    ) -> DispatchHandle {
        let id = campaign.id;
        claim.run.progress.reset(initial);

        let run = Run {
            campaign: id,
            template: campaign.template,
            jobs,
            transport: Arc::clone(&self.transport),
            audit: Arc::clone(&self.audit),
            limiter: Arc::clone(&self.limiter),
            config: self.config.clone(),
            run: Arc::clone(&claim.run),
            cancelled: claim.cancelled.clone(),
        };

        let campaigns = Arc::clone(&self.campaigns);
        let results = Arc::clone(&self.results);
        let active = Arc::clone(&claim.run);

        let join = tokio::spawn(async move {
            let result = run.execute().await;
            run::settle(campaigns.as_ref(), id, &result).await;
            results.insert(id, result.clone());
            drop(claim);
            result
        });

        DispatchHandle::new(id, active, join)
    }
}
