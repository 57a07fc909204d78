use std::sync::Arc;

use async_trait::async_trait;
use herald_common::internal;
use parking_lot::Mutex;

use super::{Delivered, Session, Transport};
use crate::{DeliveryError, RenderedMessage, TemporaryError};

/// Records every message instead of sending it
///
/// Used when no relay is configured. Every session opened from the same
/// transport appends to the same outbox.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    outbox: Arc<Mutex<Vec<RenderedMessage>>>,
}

impl SimulatedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages recorded so far, in delivery order
    #[must_use]
    pub fn messages(&self) -> Vec<RenderedMessage> {
        self.outbox.lock().clone()
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn open(&self, _concurrency: usize) -> Result<Arc<dyn Session>, DeliveryError> {
        Ok(Arc::new(SimulatedSession {
            outbox: Arc::clone(&self.outbox),
            closed: Mutex::new(false),
        }))
    }
}

#[derive(Debug)]
struct SimulatedSession {
    outbox: Arc<Mutex<Vec<RenderedMessage>>>,
    closed: Mutex<bool>,
}

#[async_trait]
impl Session for SimulatedSession {
    async fn deliver(&self, message: &RenderedMessage) -> Result<Delivered, DeliveryError> {
        if *self.closed.lock() {
            return Err(TemporaryError::SessionClosed.into());
        }

        internal!("Simulated delivery to {}: {:?}", message.to, message.subject);
        self.outbox.lock().push(message.clone());

        Ok(Delivered::Simulated)
    }

    async fn close(&self) {
        *self.closed.lock() = true;
    }
}
