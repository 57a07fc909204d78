use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use herald_common::{Address, CampaignId};
use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};

use crate::{Delivered, DispatchError, DispatchResult, RenderWarning};

/// Live counts for a run, updated by its workers
#[derive(Debug, Default)]
pub(super) struct Progress {
    result: Mutex<DispatchResult>,
}

impl Progress {
    pub(super) fn snapshot(&self) -> DispatchResult {
        self.result.lock().clone()
    }

    pub(super) fn reset(&self, result: DispatchResult) {
        *self.result.lock() = result;
    }

    pub(super) fn success(&self, delivered: Delivered) {
        self.result.lock().record_success(delivered);
    }

    pub(super) fn failure(&self, recipient: Address) {
        self.result.lock().record_failure(recipient);
    }

    pub(super) fn warning(&self, warning: RenderWarning) {
        self.result.lock().render_warnings.push(warning);
    }

    pub(super) fn finish(&self, pending: Vec<Address>, cancelled: bool) -> DispatchResult {
        let mut result = self.result.lock();
        result.pending.extend(pending);
        result.pending.sort();
        result.cancelled = cancelled;
        result.render_warnings.sort_by(|a, b| a.recipient.cmp(&b.recipient));
        result.clone()
    }
}

/// Registry entry for a campaign with an active run
#[derive(Debug)]
pub(super) struct ActiveRun {
    cancel: watch::Sender<bool>,
    pub(super) progress: Progress,
}

impl ActiveRun {
    pub(super) fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

/// Exclusive right to run a campaign
///
/// Dropping the claim releases the campaign, whichever way the admission or
/// the run ends.
#[derive(Debug)]
pub(super) struct RunClaim {
    campaign: CampaignId,
    runs: Arc<DashMap<CampaignId, Arc<ActiveRun>>>,
    pub(super) run: Arc<ActiveRun>,
    pub(super) cancelled: watch::Receiver<bool>,
}

impl RunClaim {
    /// Claim `campaign`, or `None` if it already has an active run
    pub(super) fn acquire(
        runs: &Arc<DashMap<CampaignId, Arc<ActiveRun>>>,
        campaign: CampaignId,
    ) -> Option<Self> {
        let Entry::Vacant(entry) = runs.entry(campaign) else {
            return None;
        };

        let (cancel, cancelled) = watch::channel(false);
        let run = Arc::new(ActiveRun {
            cancel,
            progress: Progress::default(),
        });
        entry.insert(Arc::clone(&run));

        Some(Self {
            campaign,
            runs: Arc::clone(runs),
            run,
            cancelled,
        })
    }
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.runs
            .remove_if(&self.campaign, |_, run| Arc::ptr_eq(run, &self.run));
    }
}

/// Handle to a run started by [`Dispatcher::start_dispatch`] or
/// [`Dispatcher::retry_failed`]
///
/// Dropping the handle does not stop the run.
///
/// [`Dispatcher::start_dispatch`]: crate::Dispatcher::start_dispatch
/// [`Dispatcher::retry_failed`]: crate::Dispatcher::retry_failed
#[derive(Debug)]
pub struct DispatchHandle {
    campaign: CampaignId,
    run: Arc<ActiveRun>,
    join: JoinHandle<DispatchResult>,
}

impl DispatchHandle {
    pub(super) const fn new(
        campaign: CampaignId,
        run: Arc<ActiveRun>,
        join: JoinHandle<DispatchResult>,
    ) -> Self {
        Self {
            campaign,
            run,
            join,
        }
    }

    #[must_use]
    pub const fn campaign_id(&self) -> CampaignId {
        self.campaign
    }

    /// Stop starting new recipients, the ones already started finish
    pub fn cancel(&self) {
        self.run.cancel();
    }

    /// Counts so far
    #[must_use]
    pub fn progress(&self) -> DispatchResult {
        self.run.progress.snapshot()
    }

    /// Wait for the run to finish
    ///
    /// # Errors
    ///
    /// [`DispatchError::Task`] if the run task panicked.
    pub async fn wait(self) -> Result<DispatchResult, DispatchError> {
        Ok(self.join.await?)
    }
}
