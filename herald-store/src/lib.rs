//! Storage ports used by the dispatcher
//!
//! The contact list, the campaign table and the audit log are owned by
//! collaborators outside the dispatcher; it only sees the traits in
//! [`r#trait`]. In-memory implementations back tests and the demo binary, and
//! the file-backed audit log gives durable, append-only attempt records.

pub mod backends;
pub mod config;
pub mod error;
pub mod r#trait;

pub use backends::{FileAuditLog, MemoryAuditLog, MemoryCampaignStore, MemoryContactStore};
pub use config::AuditLogConfig;
pub use error::{AuditError, StoreError};
pub use r#trait::{AuditLog, CampaignStore, ContactStore};
