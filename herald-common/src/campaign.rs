//! Campaigns and their lifecycle states

use core::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Selector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub u64);

impl Display for CampaignId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CampaignId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Lifecycle of a campaign
///
/// `Draft` is the only state external collaborators may edit in. Everything
/// after it is written by the dispatcher alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Running,
    Completed,
    PartiallyFailed,
    Failed,
}

impl CampaignStatus {
    /// Failed recipients may be retried from this status
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::PartiallyFailed | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
        }
    }
}

impl Display for CampaignStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subject and body, both of which may contain `{{ field }}` placeholders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub subject: String,
    pub body: String,
}

impl Template {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Timestamps written alongside a status transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTimestamps {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,

    #[serde(default)]
    pub name: String,

    pub template: Template,

    #[serde(default)]
    pub selector: Selector,

    #[serde(default)]
    pub status: CampaignStatus,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// A new campaign in `Draft`
    #[must_use]
    pub fn draft(id: impl Into<CampaignId>, template: Template, selector: Selector) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            template,
            selector,
            status: CampaignStatus::Draft,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a status transition; timestamps that are `None` are left as they were
    ///
    /// Moving to `Running` always clears `completed_at`.
    pub fn apply_status(&mut self, status: CampaignStatus, timestamps: StatusTimestamps) {
        self.status = status;
        if status == CampaignStatus::Running {
            self.completed_at = None;
        }
        if let Some(started_at) = timestamps.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(completed_at) = timestamps.completed_at {
            self.completed_at = Some(completed_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(!CampaignStatus::Draft.is_retryable());
        assert!(!CampaignStatus::Running.is_retryable());
        assert!(CampaignStatus::PartiallyFailed.is_retryable());
        assert!(CampaignStatus::Failed.is_retryable());
        assert!(!CampaignStatus::Completed.is_retryable());
        assert_eq!(CampaignStatus::PartiallyFailed.to_string(), "partially_failed");
    }

    #[test]
    fn apply_status_keeps_earlier_timestamps() {
        let mut campaign = Campaign::draft(CampaignId(1), Template::new("s", "b"), Selector::all());
        let started = Utc::now();
        campaign.apply_status(
            CampaignStatus::Running,
            StatusTimestamps {
                started_at: Some(started),
                completed_at: None,
            },
        );
        campaign.apply_status(
            CampaignStatus::Completed,
            StatusTimestamps {
                started_at: None,
                completed_at: Some(Utc::now()),
            },
        );

        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.started_at, Some(started));
        assert!(campaign.completed_at.is_some());
    }

    #[test]
    fn running_again_clears_completion() {
        let mut campaign = Campaign::draft(CampaignId(1), Template::new("s", "b"), Selector::all());
        let started = Utc::now();
        campaign.apply_status(
            CampaignStatus::Running,
            StatusTimestamps {
                started_at: Some(started),
                completed_at: None,
            },
        );
        campaign.apply_status(
            CampaignStatus::PartiallyFailed,
            StatusTimestamps {
                started_at: None,
                completed_at: Some(Utc::now()),
            },
        );

        campaign.apply_status(CampaignStatus::Running, StatusTimestamps::default());

        assert_eq!(campaign.status, CampaignStatus::Running);
        assert_eq!(campaign.started_at, Some(started));
        assert_eq!(campaign.completed_at, None);
    }
}
