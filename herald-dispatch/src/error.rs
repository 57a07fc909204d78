//! Typed errors for campaign dispatch.
//!
//! Delivery failures are split the way the retry loop needs them:
//! - Permanent failures (5xx replies, malformed addresses) are never retried
//! - Temporary failures (4xx replies, timeouts, connection loss) are retried with backoff
//!
//! Everything the public [`Dispatcher`](crate::Dispatcher) API can refuse with is
//! collected under [`DispatchError`].

use herald_common::{CampaignId, CampaignStatus, SelectorError};
use herald_store::{AuditError, StoreError};
use thiserror::Error;

/// Top-level error returned by the dispatcher operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Recipient resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Invalid campaign state: {0}")]
    InvalidState(#[from] InvalidStateError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit log error: {0}")]
    Audit(#[from] AuditError),

    /// Only produced by test sends, campaign runs record failures instead.
    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("Dispatch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl DispatchError {
    /// Returns `true` if the operation was refused because of the campaign's state.
    #[must_use]
    pub const fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }

    /// Returns `true` if the selector could not be turned into recipients.
    #[must_use]
    pub const fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolution(_))
    }
}

/// Failure to turn a selector into a recipient list.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("Contact store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl ResolutionError {
    /// Returns `true` if the selector named a criterion nobody understands.
    #[must_use]
    pub const fn is_unknown_criterion(&self) -> bool {
        matches!(self, Self::Selector(SelectorError::UnknownCriterion(_)))
    }
}

/// An operation was requested for a campaign in a state that does not allow it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidStateError {
    #[error("Campaign {campaign} is {status}, only draft campaigns can be dispatched")]
    NotDraft {
        campaign: CampaignId,
        status: CampaignStatus,
    },

    #[error("Campaign {0} already has a run in progress")]
    AlreadyRunning(CampaignId),

    /// The campaign is a draft, but the audit log holds attempts for it
    #[error("Campaign {0} already has recorded delivery attempts")]
    AlreadyDispatched(CampaignId),

    #[error("Campaign {campaign} is {status}, only failed or partially failed campaigns can be retried")]
    NotRetryable {
        campaign: CampaignId,
        status: CampaignStatus,
    },

    #[error("Campaign {0} has no failed recipients to retry")]
    NothingToRetry(CampaignId),

    #[error("Campaign {0} has no run in progress")]
    NotRunning(CampaignId),
}

/// A template that cannot be rendered at all.
///
/// Missing fields are not errors, they render empty and surface as warnings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Unterminated placeholder in {part} at byte {offset}")]
    Unterminated { part: &'static str, offset: usize },

    #[error("Empty placeholder in {part} at byte {offset}")]
    EmptyPlaceholder { part: &'static str, offset: usize },
}

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Permanent failure that should not be retried (e.g., 5xx SMTP codes).
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure that can be retried with backoff (e.g., 4xx SMTP codes).
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),
}

/// Permanent errors that should not be retried.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// Recipient or sender address was rejected before or by the server.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Message was rejected by the server (e.g., policy violation, unknown user).
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    /// The message could not be assembled.
    #[error("Message could not be built: {0}")]
    MessageBuild(String),

    /// The transport is misconfigured (bad relay host, unusable credentials).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Temporary errors that should be retried with exponential backoff.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// Failed to establish or keep a connection to the relay.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The attempt did not finish within the per-attempt timeout.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Server returned a temporary failure code.
    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),

    /// TLS negotiation failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    /// The session was already closed when the attempt was made.
    #[error("Session closed")]
    SessionClosed,
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

/// Categorise relay errors by their reply class.
///
/// - **5xx replies** → Permanent
/// - **4xx replies** → Temporary
/// - **Timeouts, TLS and connection errors** → Temporary
/// - **Client-side errors** (no usable auth mechanism, bad parameters) → Permanent
impl From<lettre::transport::smtp::Error> for DeliveryError {
    fn from(error: lettre::transport::smtp::Error) -> Self {
        let detail = error.to_string();

        if error.is_permanent() {
            Self::Permanent(PermanentError::MessageRejected(detail))
        } else if error.is_transient() {
            Self::Temporary(TemporaryError::SmtpTemporary(detail))
        } else if error.is_timeout() {
            Self::Temporary(TemporaryError::Timeout(detail))
        } else if error.is_tls() {
            Self::Temporary(TemporaryError::TlsHandshakeFailed(detail))
        } else if error.is_client() {
            Self::Permanent(PermanentError::Configuration(detail))
        } else {
            Self::Temporary(TemporaryError::ConnectionFailed(detail))
        }
    }
}

impl From<lettre::address::AddressError> for DeliveryError {
    fn from(error: lettre::address::AddressError) -> Self {
        Self::Permanent(PermanentError::InvalidAddress(error.to_string()))
    }
}

impl From<lettre::error::Error> for DeliveryError {
    fn from(error: lettre::error::Error) -> Self {
        Self::Permanent(PermanentError::MessageBuild(error.to_string()))
    }
}
