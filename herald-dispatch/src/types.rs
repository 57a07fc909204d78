use std::collections::BTreeMap;

use herald_common::{Address, AttemptOutcome, Campaign, CampaignStatus, DeliveryAttempt};
use serde::Serialize;

use crate::Delivered;

/// Placeholders a recipient had no value for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderWarning {
    pub recipient: Address,
    pub missing: Vec<String>,
}

/// Outcome counts for a campaign
///
/// Counts cover the whole campaign, so after a retry run they include the
/// recipients that succeeded in earlier runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub sent: usize,
    pub simulated: usize,
    pub failed: usize,
    /// Recipients whose last outcome is `failed`, ordered by address
    pub failing: Vec<Address>,
    /// Recipients a cancelled run never started
    pub pending: Vec<Address>,
    pub cancelled: bool,
    pub render_warnings: Vec<RenderWarning>,
}

impl DispatchResult {
    #[must_use]
    pub const fn succeeded(&self) -> usize {
        self.sent + self.simulated
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded() + self.failed + self.pending.len()
    }

    /// Terminal status for a campaign with these outcomes
    ///
    /// Completed when nothing failed or was left pending, partially failed when
    /// at least one recipient succeeded, failed otherwise.
    #[must_use]
    pub fn settled_status(&self) -> CampaignStatus {
        if self.failed == 0 && self.pending.is_empty() {
            CampaignStatus::Completed
        } else if self.succeeded() > 0 {
            CampaignStatus::PartiallyFailed
        } else {
            CampaignStatus::Failed
        }
    }

    /// Rebuild the counts from audit records
    ///
    /// A recipient whose last record is `retrying` belongs to a run that never
    /// finished and counts as failed.
    #[must_use]
    pub fn from_attempts(attempts: &[DeliveryAttempt]) -> Self {
        let mut result = Self::default();

        for (recipient, (_, outcome)) in latest_outcomes(attempts) {
            match outcome {
                AttemptOutcome::Sent => result.sent += 1,
                AttemptOutcome::Simulated => result.simulated += 1,
                AttemptOutcome::Failed | AttemptOutcome::Retrying => {
                    result.failed += 1;
                    result.failing.push(recipient);
                }
            }
        }

        result
    }

    pub(crate) fn record_success(&mut self, delivered: Delivered) {
        match delivered {
            Delivered::Sent => self.sent += 1,
            Delivered::Simulated => self.simulated += 1,
        }
    }

    pub(crate) fn record_failure(&mut self, recipient: Address) {
        self.failed += 1;
        if let Err(index) = self.failing.binary_search(&recipient) {
            self.failing.insert(index, recipient);
        }
    }

    /// Drop `recipient` from the failed and pending lists ahead of a retry
    pub(crate) fn forget(&mut self, recipient: &Address) {
        if let Ok(index) = self.failing.binary_search(recipient) {
            self.failing.remove(index);
            self.failed -= 1;
        }
        self.pending.retain(|pending| pending != recipient);
    }
}

/// The last attempt number and outcome recorded for each recipient
pub(crate) fn latest_outcomes(
    attempts: &[DeliveryAttempt],
) -> BTreeMap<Address, (u32, AttemptOutcome)> {
    let mut latest: BTreeMap<Address, (u32, AttemptOutcome)> = BTreeMap::new();

    for attempt in attempts {
        let entry = latest
            .entry(attempt.recipient().clone())
            .or_insert((attempt.attempt(), attempt.outcome()));
        if attempt.attempt() >= entry.0 {
            *entry = (attempt.attempt(), attempt.outcome());
        }
    }

    latest
}

/// A campaign together with its outcome counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchStatus {
    pub campaign: Campaign,
    pub result: DispatchResult,
    /// `true` while a run for the campaign is active
    pub running: bool,
}

impl DispatchStatus {
    #[must_use]
    pub const fn status(&self) -> CampaignStatus {
        self.campaign.status
    }
}
