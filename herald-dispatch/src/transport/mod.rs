//! Message transports
//!
//! A [`Transport`] lives as long as the process. Each dispatch run opens one
//! [`Session`] from it, shares that session between its workers and closes it
//! when the run ends.

mod simulated;
mod smtp;

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use herald_common::AttemptOutcome;

pub use simulated::SimulatedTransport;
pub use smtp::{SmtpConfig, SmtpTransport, TlsMode};

use crate::{DeliveryError, RenderedMessage};

/// How a message left the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivered {
    /// Accepted by the relay
    Sent,
    /// Recorded without leaving the process
    Simulated,
}

impl From<Delivered> for AttemptOutcome {
    fn from(delivered: Delivered) -> Self {
        match delivered {
            Delivered::Sent => Self::Sent,
            Delivered::Simulated => Self::Simulated,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Short name used in logs and audit events
    fn name(&self) -> &'static str;

    /// Acquire the session for one run
    ///
    /// `concurrency` is the number of workers that will share it.
    async fn open(&self, concurrency: usize) -> Result<Arc<dyn Session>, DeliveryError>;
}

#[async_trait]
pub trait Session: Send + Sync + Debug {
    /// Hand one message to the transport
    async fn deliver(&self, message: &RenderedMessage) -> Result<Delivered, DeliveryError>;

    /// Release the session, later deliveries fail with a temporary error
    async fn close(&self);
}

/// The relay transport if one is configured, the simulated transport otherwise
#[must_use]
pub fn select(smtp: Option<SmtpConfig>) -> Arc<dyn Transport> {
    match smtp {
        Some(config) => Arc::new(SmtpTransport::new(config)),
        None => Arc::new(SimulatedTransport::new()),
    }
}
