//! Shared types for the herald campaign dispatcher
//!
//! Everything the store, dispatch and binary crates agree on lives here:
//! addresses, contacts, campaigns, delivery attempt records, logging setup and
//! the structured audit events.

pub mod address;
pub mod attempt;
pub mod audit;
pub mod campaign;
pub mod contact;
pub mod logging;
pub mod selector;

pub use address::{Address, AddressError};
pub use attempt::{AttemptOutcome, DeliveryAttempt};
pub use campaign::{Campaign, CampaignId, CampaignStatus, StatusTimestamps, Template};
pub use contact::{Contact, Subscription};
pub use selector::{Criterion, Rule, Selector, SelectorError};
pub use tracing;

/// Process-wide control signals, fanned out to long running tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
