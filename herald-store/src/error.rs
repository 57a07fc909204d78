//! Error types for the herald-store crate.

use std::io;

use herald_common::CampaignId;
use thiserror::Error;

/// Errors raised by contact and campaign stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The campaign does not exist.
    #[error("Campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    /// The store does not understand the selector it was given.
    #[error("Unsupported selector: {0}")]
    Selector(#[from] herald_common::SelectorError),

    /// The backing store is unavailable or returned garbage.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Errors raised by audit logs.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Writing or syncing the log failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded, or a stored line could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl<T> From<std::sync::PoisonError<T>> for AuditError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {err}"))
    }
}
