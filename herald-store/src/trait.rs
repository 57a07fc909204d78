use async_trait::async_trait;
use herald_common::{
    Campaign, CampaignId, CampaignStatus, Contact, DeliveryAttempt, Selector, StatusTimestamps,
};

use crate::{AuditError, StoreError};

/// Source of contacts
#[async_trait]
pub trait ContactStore: Send + Sync + std::fmt::Debug {
    /// Contacts matching `selector`
    ///
    /// Implementations may return a superset (for example when only part of the
    /// selector can be pushed down to a query); callers filter again. Ordering,
    /// subscription status and duplicates are not the store's concern.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend cannot be read.
    async fn resolve(&self, selector: &Selector) -> Result<Vec<Contact>, StoreError>;
}

/// Source of campaigns, and sink for their status transitions
#[async_trait]
pub trait CampaignStore: Send + Sync + std::fmt::Debug {
    /// # Errors
    ///
    /// [`StoreError::CampaignNotFound`] if there is no such campaign.
    async fn get_campaign(&self, id: CampaignId) -> Result<Campaign, StoreError>;

    /// Record a status transition
    ///
    /// Timestamps that are `None` leave the stored value untouched.
    ///
    /// # Errors
    ///
    /// [`StoreError::CampaignNotFound`] if there is no such campaign.
    async fn set_campaign_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
        timestamps: StatusTimestamps,
    ) -> Result<(), StoreError>;
}

/// Append-only record of delivery attempts
///
/// `append` must not return until the record is durable, and must never
/// reorder or merge records.
#[async_trait]
pub trait AuditLog: Send + Sync + std::fmt::Debug {
    /// # Errors
    ///
    /// Returns an [`AuditError`] if the record could not be made durable. The
    /// record must then be treated as not written.
    async fn append(&self, attempt: &DeliveryAttempt) -> Result<(), AuditError>;

    /// Every record for a campaign, ordered by (recipient, attempt number)
    ///
    /// # Errors
    ///
    /// Returns an [`AuditError`] if the log cannot be read.
    async fn attempts(&self, campaign: CampaignId) -> Result<Vec<DeliveryAttempt>, AuditError>;
}

/// Sort into reporting order, keeping append order for equal keys
pub(crate) fn sort_for_report(attempts: &mut [DeliveryAttempt]) {
    attempts.sort_by(|a, b| {
        a.recipient()
            .cmp(b.recipient())
            .then(a.attempt().cmp(&b.attempt()))
    });
}
