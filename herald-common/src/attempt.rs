//! Delivery attempt records
//!
//! One record is written per recipient per try. Records are never edited: a
//! retry produces a new record with the next attempt number. The constructors
//! only allow an error detail on `Failed` and `Retrying` outcomes, and
//! deserialisation enforces the same rule.

use core::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Address, CampaignId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Sent,
    Simulated,
    Failed,
    Retrying,
}

impl AttemptOutcome {
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Sent | Self::Simulated)
    }

    const fn carries_error(self) -> bool {
        matches!(self, Self::Failed | Self::Retrying)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Simulated => "simulated",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }
}

impl Display for AttemptOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAttempt")]
pub struct DeliveryAttempt {
    campaign_id: CampaignId,
    recipient: Address,
    attempt: u32,
    outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    at: DateTime<Utc>,
}

impl DeliveryAttempt {
    fn new(
        campaign_id: CampaignId,
        recipient: Address,
        attempt: u32,
        outcome: AttemptOutcome,
        error: Option<String>,
    ) -> Self {
        Self {
            campaign_id,
            recipient,
            attempt,
            outcome,
            error,
            at: Utc::now(),
        }
    }

    /// A successful delivery, `Sent` or `Simulated`
    #[must_use]
    pub fn succeeded(
        campaign_id: CampaignId,
        recipient: Address,
        attempt: u32,
        outcome: AttemptOutcome,
    ) -> Self {
        debug_assert!(outcome.is_success(), "{outcome} is not a successful outcome");
        Self::new(campaign_id, recipient, attempt, outcome, None)
    }

    #[must_use]
    pub fn failed(
        campaign_id: CampaignId,
        recipient: Address,
        attempt: u32,
        error: impl Into<String>,
    ) -> Self {
        Self::new(
            campaign_id,
            recipient,
            attempt,
            AttemptOutcome::Failed,
            Some(error.into()),
        )
    }

    #[must_use]
    pub fn retrying(
        campaign_id: CampaignId,
        recipient: Address,
        attempt: u32,
        error: impl Into<String>,
    ) -> Self {
        Self::new(
            campaign_id,
            recipient,
            attempt,
            AttemptOutcome::Retrying,
            Some(error.into()),
        )
    }

    #[must_use]
    pub const fn campaign_id(&self) -> CampaignId {
        self.campaign_id
    }

    #[must_use]
    pub const fn recipient(&self) -> &Address {
        &self.recipient
    }

    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub const fn outcome(&self) -> AttemptOutcome {
        self.outcome
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub const fn at(&self) -> DateTime<Utc> {
        self.at
    }
}

#[derive(Deserialize)]
struct RawAttempt {
    campaign_id: CampaignId,
    recipient: Address,
    attempt: u32,
    outcome: AttemptOutcome,
    #[serde(default)]
    error: Option<String>,
    at: DateTime<Utc>,
}

impl TryFrom<RawAttempt> for DeliveryAttempt {
    type Error = String;

    fn try_from(raw: RawAttempt) -> Result<Self, Self::Error> {
        if raw.attempt == 0 {
            return Err("attempt numbers start at 1".to_string());
        }
        if raw.outcome.carries_error() != raw.error.is_some() {
            return Err(format!(
                "error detail must be present exactly when the outcome is failed or retrying (outcome: {})",
                raw.outcome
            ));
        }

        Ok(Self {
            campaign_id: raw.campaign_id,
            recipient: raw.recipient,
            attempt: raw.attempt,
            outcome: raw.outcome,
            error: raw.error,
            at: raw.at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn recipient() -> Address {
        Address::parse("a@x").unwrap()
    }

    #[test]
    fn error_detail_follows_outcome() {
        let ok = DeliveryAttempt::succeeded(CampaignId(1), recipient(), 1, AttemptOutcome::Simulated);
        assert_eq!(ok.error(), None);
        assert!(ok.outcome().is_success());

        let failed = DeliveryAttempt::failed(CampaignId(1), recipient(), 2, "550 no such user");
        assert_eq!(failed.error(), Some("550 no such user"));
        assert!(!failed.outcome().is_success());

        let retrying = DeliveryAttempt::retrying(CampaignId(1), recipient(), 1, "timeout");
        assert_eq!(retrying.error(), Some("timeout"));
    }

    #[test]
    fn deserialisation_rejects_inconsistent_records() {
        let missing_error = r#"{"campaign_id":1,"recipient":"a@x","attempt":1,"outcome":"failed","at":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<DeliveryAttempt>(missing_error).is_err());

        let stray_error = r#"{"campaign_id":1,"recipient":"a@x","attempt":1,"outcome":"sent","error":"x","at":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<DeliveryAttempt>(stray_error).is_err());

        let zero = r#"{"campaign_id":1,"recipient":"a@x","attempt":0,"outcome":"sent","at":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<DeliveryAttempt>(zero).is_err());
    }

    #[test]
    fn json_round_trip_preserves_record() {
        let attempt = DeliveryAttempt::retrying(CampaignId(7), recipient(), 2, "421 busy");
        let line = serde_json::to_string(&attempt).unwrap();
        let back: DeliveryAttempt = serde_json::from_str(&line).unwrap();
        assert_eq!(back, attempt);
    }
}
