use std::sync::LazyLock;

use herald_common::{
    Address, CampaignId, CampaignStatus, DeliveryAttempt, Signal, audit, internal, logging,
    tracing,
};
use herald_dispatch::{
    Delivered, DispatchError, DispatchHandle, DispatchResult, Dispatcher, InvalidStateError,
};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};

use crate::Herald;

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// How one campaign ended up after `send`
#[derive(Debug)]
pub struct Report {
    pub campaign: CampaignId,
    pub result: Result<DispatchResult, DispatchError>,
    /// A retry run followed the first one
    pub retried: bool,
}

impl Report {
    /// Status the campaign settled in, `None` if it never ran
    pub fn status(&self) -> Option<CampaignStatus> {
        self.result.as_ref().ok().map(DispatchResult::settled_status)
    }

    /// Failures from this run, or from an earlier invocation's
    fn wants_retry(&self) -> bool {
        match &self.result {
            Ok(result) => result.failed > 0 && !result.cancelled,
            Err(DispatchError::InvalidState(InvalidStateError::NotDraft { status, .. })) => {
                status.is_retryable()
            }
            Err(_) => false,
        }
    }
}

/// Wait for SIGINT or SIGTERM, then broadcast [`Signal::Shutdown`]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, cancelling active runs");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, cancelling active runs");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

/// Cancel every active run once a shutdown is broadcast
fn cancel_on_shutdown(dispatcher: Dispatcher) -> JoinHandle<()> {
    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(Signal::Shutdown) => {
                    dispatcher.cancel_all();
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Shutdown watcher skipped {skipped} signals");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn settle(handles: Vec<DispatchHandle>) -> Vec<(CampaignId, Result<DispatchResult, DispatchError>)> {
    let mut settled = Vec::with_capacity(handles.len());
    for handle in handles {
        let campaign = handle.campaign_id();
        settled.push((campaign, handle.wait().await));
    }
    settled
}

/// One retry run for every report that ended with failures
async fn retry(dispatcher: &Dispatcher, reports: &mut [Report]) {
    let mut handles = Vec::new();
    for report in reports.iter().filter(|report| report.wants_retry()) {
        match dispatcher.retry_failed(report.campaign).await {
            Ok(handle) => handles.push(handle),
            Err(e) => tracing::warn!(
                campaign_id = %report.campaign,
                error = %e,
                "Failed recipients could not be retried"
            ),
        }
    }

    for (campaign, result) in settle(handles).await {
        if let Some(report) = reports.iter_mut().find(|report| report.campaign == campaign) {
            report.result = result;
            report.retried = true;
        }
    }
}

impl Herald {
    /// Install logging and the audit event settings
    pub fn init(&self) {
        logging::init();
        audit::init(self.audit.clone());
    }

    /// The campaigns `send` works on
    ///
    /// The ones asked for, or else every draft. When retrying, campaigns an
    /// earlier invocation left with failures are included too.
    async fn selection(
        &self,
        dispatcher: &Dispatcher,
        requested: &[CampaignId],
        retry_failed: bool,
    ) -> anyhow::Result<Vec<CampaignId>> {
        if !requested.is_empty() {
            return Ok(requested.to_vec());
        }

        let mut selected = Vec::new();
        for campaign in &self.campaigns {
            let status = dispatcher.status(campaign.id).await?.status();
            if status == CampaignStatus::Draft || (retry_failed && status.is_retryable()) {
                selected.push(campaign.id);
            }
        }
        Ok(selected)
    }

    /// Dispatch campaigns and wait for them to finish
    ///
    /// All selected campaigns run side by side. Ctrl-C or SIGTERM cancels the
    /// active runs; the recipients they never started are reported as pending.
    /// With `retry_failed`, campaigns that finished with failures get one retry
    /// run, unless a shutdown was requested. Campaigns already dispatched by an
    /// earlier invocation are not sent again.
    ///
    /// # Errors
    ///
    /// Fails if the dispatcher cannot be built or the audit log cannot be read.
    /// Per-campaign failures are part of the returned reports.
    pub async fn send(
        &self,
        requested: &[CampaignId],
        retry_failed: bool,
    ) -> anyhow::Result<Vec<Report>> {
        let dispatcher = self.dispatcher().await?;
        let campaigns = self.selection(&dispatcher, requested, retry_failed).await?;

        let mut shutdown_requested = SHUTDOWN_BROADCAST.subscribe();
        let canceller = cancel_on_shutdown(dispatcher.clone());
        let signals = tokio::spawn(shutdown());

        internal!(
            level = INFO,
            "Dispatching {} campaign(s) via {} transport",
            campaigns.len(),
            dispatcher.transport()
        );

        let mut reports = Vec::with_capacity(campaigns.len());
        let mut handles = Vec::with_capacity(campaigns.len());
        for campaign in campaigns {
            match dispatcher.start_dispatch(campaign).await {
                Ok(handle) => handles.push(handle),
                Err(e) => reports.push(Report {
                    campaign,
                    result: Err(e),
                    retried: false,
                }),
            }
        }

        reports.extend(settle(handles).await.into_iter().map(|(campaign, result)| Report {
            campaign,
            result,
            retried: false,
        }));

        let stopping = matches!(shutdown_requested.try_recv(), Ok(Signal::Shutdown));
        if retry_failed && !stopping {
            retry(&dispatcher, &mut reports).await;
        }

        signals.abort();
        canceller.abort();

        reports.sort_by_key(|report| report.campaign);
        Ok(reports)
    }

    /// Recorded attempts for one campaign, or every configured campaign
    ///
    /// # Errors
    ///
    /// Fails if the campaign is unknown or the audit log cannot be read.
    pub async fn attempts(
        &self,
        campaign: Option<CampaignId>,
    ) -> anyhow::Result<Vec<DeliveryAttempt>> {
        let dispatcher = self.dispatcher().await?;
        let campaigns = campaign.map_or_else(
            || self.campaigns.iter().map(|campaign| campaign.id).collect(),
            |campaign| vec![campaign],
        );

        let mut attempts = Vec::new();
        for campaign in campaigns {
            attempts.extend(dispatcher.list_attempts(campaign).await?);
        }

        Ok(attempts)
    }

    /// Send one test message for a campaign, every placeholder set to `value`
    ///
    /// # Errors
    ///
    /// Fails if `to` is not an address, the campaign is unknown, or the
    /// transport refuses the message.
    pub async fn preview(
        &self,
        campaign: CampaignId,
        to: &str,
        value: &str,
    ) -> anyhow::Result<Delivered> {
        let to = Address::parse(to)?;
        let dispatcher = self.dispatcher().await?;
        Ok(dispatcher.send_test(campaign, to, value).await?)
    }
}
