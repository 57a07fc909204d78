//! Scripted collaborators

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use herald_common::{Address, CampaignId, DeliveryAttempt};
use herald_dispatch::{
    Delivered, DeliveryError, PermanentError, RenderedMessage, Session, TemporaryError, Transport,
};
use herald_store::{AuditError, AuditLog, MemoryAuditLog};
use parking_lot::Mutex;
use tokio::time::Instant;

/// How the transport answers for a recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Accept,
    /// Permanent rejection, like a 550
    Reject,
    /// Temporary failure on every attempt, like a 451
    Defer,
    /// Temporary failure for the first `n` attempts, then accept
    DeferTimes(u32),
    /// Accept after a delay
    Slow(Duration),
    /// Never answer
    Hang,
}

#[derive(Debug, Default)]
struct Inner {
    script: Mutex<HashMap<Address, Behaviour>>,
    calls: Mutex<HashMap<Address, u32>>,
    attempts: Mutex<Vec<(Address, Instant)>>,
    accepted: Mutex<Vec<RenderedMessage>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_open: AtomicBool,
}

/// Transport whose answers are scripted per recipient, accepting by default
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Inner>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(self, recipient: &str, behaviour: Behaviour) -> Self {
        self.script(recipient, behaviour);
        self
    }

    /// Change the answer for `recipient` from now on
    pub fn script(&self, recipient: &str, behaviour: Behaviour) {
        self.inner
            .script
            .lock()
            .insert(super::address(recipient), behaviour);
    }

    /// Make `open` fail with a temporary error
    #[must_use]
    pub fn failing_open(self) -> Self {
        self.inner.fail_open.store(true, Ordering::SeqCst);
        self
    }

    /// Attempts made for `recipient` so far
    pub fn calls(&self, recipient: &str) -> u32 {
        self.inner
            .calls
            .lock()
            .get(&super::address(recipient))
            .copied()
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> u32 {
        self.inner.calls.lock().values().sum()
    }

    /// When each attempt started, in order
    pub fn attempt_times(&self) -> Vec<(Address, Instant)> {
        self.inner.attempts.lock().clone()
    }

    pub fn accepted(&self) -> Vec<RenderedMessage> {
        self.inner.accepted.lock().clone()
    }

    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Highest number of deliveries seen in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn open(&self, _concurrency: usize) -> Result<Arc<dyn Session>, DeliveryError> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(TemporaryError::ConnectionFailed("relay unreachable".to_string()).into());
        }

        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession {
            inner: Arc::clone(&self.inner),
        }))
    }
}

#[derive(Debug)]
struct ScriptedSession {
    inner: Arc<Inner>,
}

impl ScriptedSession {
    async fn answer(&self, message: &RenderedMessage, call: u32) -> Result<Delivered, DeliveryError> {
        let behaviour = self
            .inner
            .script
            .lock()
            .get(&message.to)
            .copied()
            .unwrap_or(Behaviour::Accept);

        match behaviour {
            Behaviour::Accept => {}
            Behaviour::Reject => {
                return Err(PermanentError::MessageRejected(format!(
                    "550 5.1.1 <{}>: Recipient address rejected",
                    message.to
                ))
                .into());
            }
            Behaviour::Defer => {
                return Err(TemporaryError::SmtpTemporary("451 4.3.0 Try again later".to_string()).into());
            }
            Behaviour::DeferTimes(n) if call <= n => {
                return Err(TemporaryError::SmtpTemporary("451 4.3.0 Try again later".to_string()).into());
            }
            Behaviour::DeferTimes(_) => {}
            Behaviour::Slow(delay) => tokio::time::sleep(delay).await,
            Behaviour::Hang => std::future::pending::<()>().await,
        }

        self.inner.accepted.lock().push(message.clone());
        Ok(Delivered::Sent)
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn deliver(&self, message: &RenderedMessage) -> Result<Delivered, DeliveryError> {
        let call = {
            let mut calls = self.inner.calls.lock();
            let count = calls.entry(message.to.clone()).or_default();
            *count += 1;
            *count
        };
        self.inner
            .attempts
            .lock()
            .push((message.to.clone(), Instant::now()));

        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.answer(message, call).await;

        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(&self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Audit log that refuses every append
#[derive(Debug, Default)]
pub struct BrokenAuditLog;

#[async_trait]
impl AuditLog for BrokenAuditLog {
    async fn append(&self, _attempt: &DeliveryAttempt) -> Result<(), AuditError> {
        Err(AuditError::Io(std::io::Error::other("disk full")))
    }

    async fn attempts(&self, _campaign: CampaignId) -> Result<Vec<DeliveryAttempt>, AuditError> {
        Ok(Vec::new())
    }
}

/// Audit log that refuses the first append for one recipient
#[derive(Debug)]
pub struct FlakyAuditLog {
    inner: MemoryAuditLog,
    recipient: Address,
    tripped: AtomicBool,
}

impl FlakyAuditLog {
    /// Records into `inner`, except the first record for `recipient`
    pub fn new(inner: MemoryAuditLog, recipient: &str) -> Self {
        Self {
            inner,
            recipient: super::address(recipient),
            tripped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AuditLog for FlakyAuditLog {
    async fn append(&self, attempt: &DeliveryAttempt) -> Result<(), AuditError> {
        if attempt.recipient() == &self.recipient && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(AuditError::Io(std::io::Error::other("disk full")));
        }
        self.inner.append(attempt).await
    }

    async fn attempts(&self, campaign: CampaignId) -> Result<Vec<DeliveryAttempt>, AuditError> {
        self.inner.attempts(campaign).await
    }
}
