use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use herald_common::{
    Address, Campaign, CampaignId, CampaignStatus, Contact, DeliveryAttempt, Selector,
    StatusTimestamps,
};

use crate::{
    AuditError, StoreError,
    r#trait::{AuditLog, CampaignStore, ContactStore, sort_for_report},
};

/// In-memory contact list keyed by address
///
/// Inserting an address that already exists is ignored, the same way the
/// contact importer treats duplicates.
#[derive(Debug, Clone, Default)]
pub struct MemoryContactStore {
    contacts: Arc<DashMap<Address, Contact>>,
}

impl MemoryContactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if a contact with this address already existed
    pub fn insert(&self, contact: Contact) -> bool {
        match self.contacts.entry(contact.address.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(contact);
                true
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

impl FromIterator<Contact> for MemoryContactStore {
    fn from_iter<T: IntoIterator<Item = Contact>>(iter: T) -> Self {
        let store = Self::new();
        for contact in iter {
            store.insert(contact);
        }
        store
    }
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn resolve(&self, selector: &Selector) -> Result<Vec<Contact>, StoreError> {
        let rules = selector.compile()?;

        Ok(self
            .contacts
            .iter()
            .filter(|entry| Selector::matches(&rules, entry.value()))
            .map(|entry| entry.value().clone())
            .collect())
    }
}

/// In-memory campaign table
#[derive(Debug, Clone, Default)]
pub struct MemoryCampaignStore {
    campaigns: Arc<DashMap<CampaignId, Campaign>>,
}

impl MemoryCampaignStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a campaign
    pub fn insert(&self, campaign: Campaign) {
        self.campaigns.insert(campaign.id, campaign);
    }

    /// Ids of every campaign, ascending
    #[must_use]
    pub fn ids(&self) -> Vec<CampaignId> {
        let mut ids: Vec<_> = self.campaigns.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }
}

impl FromIterator<Campaign> for MemoryCampaignStore {
    fn from_iter<T: IntoIterator<Item = Campaign>>(iter: T) -> Self {
        let store = Self::new();
        for campaign in iter {
            store.insert(campaign);
        }
        store
    }
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn get_campaign(&self, id: CampaignId) -> Result<Campaign, StoreError> {
        self.campaigns
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::CampaignNotFound(id))
    }

    async fn set_campaign_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
        timestamps: StatusTimestamps,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or(StoreError::CampaignNotFound(id))?;
        entry.value_mut().apply_status(status, timestamps);
        Ok(())
    }
}

/// In-memory audit log
///
/// "Durable" here means visible to every later reader, which is all tests and
/// simulated runs need.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLog {
    records: Arc<RwLock<Vec<DeliveryAttempt>>>,
}

impl MemoryAuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in append order
    #[must_use]
    pub fn records(&self) -> Vec<DeliveryAttempt> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, attempt: &DeliveryAttempt) -> Result<(), AuditError> {
        self.records.write()?.push(attempt.clone());
        Ok(())
    }

    async fn attempts(&self, campaign: CampaignId) -> Result<Vec<DeliveryAttempt>, AuditError> {
        let mut attempts: Vec<_> = self
            .records
            .read()?
            .iter()
            .filter(|attempt| attempt.campaign_id() == campaign)
            .cloned()
            .collect();
        sort_for_report(&mut attempts);
        Ok(attempts)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use herald_common::{AttemptOutcome, Template};

    use super::*;

    fn address(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[tokio::test]
    async fn duplicate_contacts_are_ignored() {
        let store = MemoryContactStore::new();
        assert!(store.insert(Contact::new(address("a@x")).with_field("name", "first")));
        assert!(!store.insert(Contact::new(address("A@X")).with_field("name", "second")));
        assert_eq!(store.len(), 1);

        let resolved = store.resolve(&Selector::all()).await.unwrap();
        assert_eq!(resolved[0].field("name"), Some("first"));
    }

    #[tokio::test]
    async fn resolve_applies_selector() {
        let store: MemoryContactStore = [
            Contact::new(address("a@x")).with_tags("vip"),
            Contact::new(address("b@x")),
        ]
        .into_iter()
        .collect();

        let resolved = store
            .resolve(&Selector::all().with("tag", "vip"))
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].address, address("a@x"));

        let err = store
            .resolve(&Selector::all().with("nope", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Selector(_)));
    }

    #[tokio::test]
    async fn campaign_status_updates() {
        let store = MemoryCampaignStore::new();
        store.insert(Campaign::draft(CampaignId(1), Template::new("s", "b"), Selector::all()));

        store
            .set_campaign_status(CampaignId(1), CampaignStatus::Running, StatusTimestamps::default())
            .await
            .unwrap();
        let campaign = store.get_campaign(CampaignId(1)).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Running);

        assert!(matches!(
            store.get_campaign(CampaignId(2)).await,
            Err(StoreError::CampaignNotFound(CampaignId(2)))
        ));
    }

    #[tokio::test]
    async fn audit_log_orders_by_recipient_then_attempt() {
        let log = MemoryAuditLog::new();
        let campaign = CampaignId(1);
        log.append(&DeliveryAttempt::retrying(campaign, address("b@x"), 1, "busy"))
            .await
            .unwrap();
        log.append(&DeliveryAttempt::succeeded(campaign, address("a@x"), 1, AttemptOutcome::Sent))
            .await
            .unwrap();
        log.append(&DeliveryAttempt::failed(campaign, address("b@x"), 2, "busy"))
            .await
            .unwrap();
        log.append(&DeliveryAttempt::succeeded(CampaignId(2), address("a@x"), 1, AttemptOutcome::Sent))
            .await
            .unwrap();

        let attempts = log.attempts(campaign).await.unwrap();
        let keys: Vec<_> = attempts
            .iter()
            .map(|a| (a.recipient().as_str().to_string(), a.attempt()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("a@x".to_string(), 1),
                ("b@x".to_string(), 1),
                ("b@x".to_string(), 2)
            ]
        );
        assert_eq!(log.len(), 4);
    }
}
