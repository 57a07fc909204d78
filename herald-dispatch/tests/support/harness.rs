//! A dispatcher wired to in-memory stores

use std::sync::Arc;

use herald_common::{Address, Campaign, CampaignId, CampaignStatus, Contact, Selector, Template};
use herald_dispatch::{DispatchConfig, Dispatcher, RateLimitConfig, RetryPolicy, Transport};
use herald_store::{AuditLog, CampaignStore, MemoryAuditLog, MemoryCampaignStore, MemoryContactStore};

pub fn address(s: &str) -> Address {
    Address::parse(s).expect("test address should be valid")
}

pub fn contact(s: &str) -> Contact {
    Contact::new(address(s))
}

/// Four workers, no rate limit, default retry policy
pub fn config() -> DispatchConfig {
    DispatchConfig {
        workers: 4,
        retry: RetryPolicy::default(),
        rate_limit: RateLimitConfig::unlimited(),
        attempt_timeout_secs: 30,
    }
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub campaigns: MemoryCampaignStore,
    pub contacts: MemoryContactStore,
    pub audit: MemoryAuditLog,
}

impl Harness {
    pub fn new(contacts: impl IntoIterator<Item = Contact>, transport: Arc<dyn Transport>) -> Self {
        Self::with_config(contacts, transport, config())
    }

    pub fn with_config(
        contacts: impl IntoIterator<Item = Contact>,
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
    ) -> Self {
        let audit = MemoryAuditLog::new();
        Self::with_audit_log(contacts, transport, config, audit.clone(), Arc::new(audit))
    }

    /// Like [`Harness::with_config`], with `log` as the dispatcher's audit log
    pub fn with_audit_log(
        contacts: impl IntoIterator<Item = Contact>,
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
        audit: MemoryAuditLog,
        log: Arc<dyn AuditLog>,
    ) -> Self {
        let campaigns = MemoryCampaignStore::new();
        let contacts: MemoryContactStore = contacts.into_iter().collect();

        let dispatcher = Dispatcher::new(
            Arc::new(campaigns.clone()),
            Arc::new(contacts.clone()),
            log,
            transport,
            config,
        );

        Self {
            dispatcher,
            campaigns,
            contacts,
            audit,
        }
    }

    /// Add a draft campaign greeting everyone the selector matches
    pub fn draft(&self, id: u64, selector: Selector) -> CampaignId {
        self.draft_with(id, Template::new("Hello {{name}}", "<p>Hi {{name}}</p>"), selector)
    }

    pub fn draft_with(&self, id: u64, template: Template, selector: Selector) -> CampaignId {
        let campaign = Campaign::draft(id, template, selector);
        let id = campaign.id;
        self.campaigns.insert(campaign);
        id
    }

    pub async fn campaign(&self, id: CampaignId) -> Campaign {
        self.campaigns
            .get_campaign(id)
            .await
            .expect("campaign should exist")
    }

    pub async fn status(&self, id: CampaignId) -> CampaignStatus {
        self.campaign(id).await.status
    }
}
