//! Structured audit events for campaign delivery
//!
//! These are `tracing` events emitted next to the durable attempt records the
//! dispatcher appends to its audit log. They exist for operators tailing logs
//! and for log shipping; reporting reads the durable records instead.
//!
//! ## Audit Events
//!
//! - `DeliveryAttempt`: a delivery attempt is about to be handed to the transport
//! - `DeliverySuccess`: the recipient was sent (or simulated)
//! - `DeliveryFailure`: the attempt failed, either terminally or with a retry pending
//! - `TestSend`: a one-off test message outside any run
//!
//! ## PII Redaction
//!
//! Recipient addresses can be redacted to `[REDACTED]@domain`.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::{Address, AttemptOutcome, CampaignId};

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Emit audit events at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact recipient local parts
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

static AUDIT_CONFIG: OnceLock<Arc<AuditConfig>> = OnceLock::new();

/// Set the process-wide audit configuration; only the first call wins
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if redact {
        if let Some((_, domain)) = email.split_once('@') {
            format!("[REDACTED]@{domain}")
        } else {
            "[REDACTED]".to_string()
        }
    } else {
        email.to_string()
    }
}

/// Logged before each attempt is handed to the transport
///
/// # Fields
/// - `campaign_id`
/// - `recipient`: redacted if configured
/// - `delivery_attempt`: attempt number (1-based, continues across retry runs)
/// - `transport`: name of the active transport
pub fn log_delivery_attempt(
    campaign_id: CampaignId,
    recipient: &Address,
    attempt: u32,
    transport: &str,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    let recipient = redact_email(recipient.as_str(), config.redact_recipients);
    tracing::event!(
        tracing::Level::INFO,
        event = "DeliveryAttempt",
        campaign_id = %campaign_id,
        recipient = %recipient,
        delivery_attempt = attempt,
        transport = %transport,
        "Audit: Delivery attempt"
    );
}

pub fn log_delivery_success(
    campaign_id: CampaignId,
    recipient: &Address,
    attempt: u32,
    outcome: AttemptOutcome,
    duration_ms: u128,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    let recipient = redact_email(recipient.as_str(), config.redact_recipients);
    tracing::event!(
        tracing::Level::INFO,
        event = "DeliverySuccess",
        campaign_id = %campaign_id,
        recipient = %recipient,
        delivery_attempt = attempt,
        outcome = %outcome,
        duration_ms = duration_ms,
        "Audit: Delivery successful"
    );
}

/// Logged for every failed attempt
///
/// `outcome` tells whether a retry follows (`retrying`) or the recipient is done (`failed`).
pub fn log_delivery_failure(
    campaign_id: CampaignId,
    recipient: &Address,
    error: &str,
    attempt: u32,
    outcome: AttemptOutcome,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    let recipient = redact_email(recipient.as_str(), config.redact_recipients);
    tracing::event!(
        tracing::Level::WARN,
        event = "DeliveryFailure",
        campaign_id = %campaign_id,
        recipient = %recipient,
        error = %error,
        delivery_attempt = attempt,
        outcome = %outcome,
        "Audit: Delivery failed"
    );
}

/// Logged for test sends, which never produce attempt records
pub fn log_test_send(campaign_id: CampaignId, recipient: &Address, result: Result<AttemptOutcome, &str>) {
    let config = config();
    if !config.enabled {
        return;
    }

    let recipient = redact_email(recipient.as_str(), config.redact_recipients);
    match result {
        Ok(outcome) => tracing::event!(
            tracing::Level::INFO,
            event = "TestSend",
            campaign_id = %campaign_id,
            recipient = %recipient,
            outcome = %outcome,
            "Audit: Test message delivered"
        ),
        Err(error) => tracing::event!(
            tracing::Level::WARN,
            event = "TestSend",
            campaign_id = %campaign_id,
            recipient = %recipient,
            error = %error,
            "Audit: Test message failed"
        ),
    }
}
