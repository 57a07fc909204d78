use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use ahash::AHashSet;
use herald_common::{
    Campaign, CampaignStatus, Contact, DeliveryAttempt, StatusTimestamps, audit::AuditConfig,
    internal,
};
use herald_dispatch::{DispatchConfig, DispatchResult, Dispatcher, SmtpConfig, transport};
use herald_store::{AuditLog, AuditLogConfig, MemoryCampaignStore, MemoryContactStore};
use serde::Deserialize;

/// Points at the configuration file, overriding the default locations
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

/// Relay password, takes precedence over the one in the file
pub const PASSWORD_ENV: &str = "HERALD_SMTP_PASSWORD";

/// Locations searched when [`CONFIG_ENV`] is not set, in order
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["./herald.config.ron", "/etc/herald/herald.config.ron"];

/// Everything the binary is configured with
///
/// Without an `smtp` section messages are simulated rather than sent.
///
/// ```ron
/// (
///     smtp: Some((
///         host: "smtp.example.com",
///         tls: StartTls,
///         username: Some("mailer"),
///         from_address: "news@example.com",
///     )),
///     dispatch: (
///         workers: 4,
///         retry: (max_attempts: 3),
///         rate_limit: (max_sends: 20, window_secs: 1),
///     ),
///     audit_log: File(path: "/var/lib/herald/attempts.jsonl"),
///     contacts: [
///         (address: "ada@example.com", fields: {"name": "Ada"}, tags: ["vip"]),
///     ],
///     campaigns: [
///         (
///             id: 1,
///             name: "Launch",
///             template: (subject: "Hello {{name}}", body: "<p>Hi {{name}}</p>"),
///             selector: [(name: "tag", value: "vip")],
///         ),
///     ],
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Herald {
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub audit_log: AuditLogConfig,

    #[serde(default)]
    pub contacts: Vec<Contact>,

    #[serde(default)]
    pub campaigns: Vec<Campaign>,
}

impl Herald {
    /// Read the configuration from `explicit`, or the first location that exists
    ///
    /// # Errors
    ///
    /// Fails if no configuration file can be found, read or parsed.
    pub fn load(explicit: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path,
            None => find_config_file(std::env::var_os(CONFIG_ENV).map(PathBuf::from))?,
        };
        let mut herald = Self::from_file(&path)?;
        herald.override_password(std::env::var(PASSWORD_ENV).ok());
        Ok(herald)
    }

    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a valid configuration.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))
    }

    /// # Errors
    ///
    /// Fails on malformed RON, or if two campaigns share an id.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let herald: Self = ron::from_str(content)?;
        herald.validate()?;
        Ok(herald)
    }

    /// Replace the relay password; blank values are ignored
    pub fn override_password(&mut self, password: Option<String>) {
        if let (Some(smtp), Some(password)) = (
            self.smtp.as_mut(),
            password.filter(|p| !p.trim().is_empty()),
        ) {
            smtp.password = Some(password);
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = AHashSet::with_capacity(self.campaigns.len());
        for campaign in &self.campaigns {
            if !seen.insert(campaign.id) {
                anyhow::bail!("Campaign {} is configured more than once", campaign.id);
            }
        }

        if self.dispatch.workers == 0 {
            anyhow::bail!("dispatch.workers must be at least 1");
        }

        Ok(())
    }

    /// Build a dispatcher over the configured contacts and campaigns
    ///
    /// Campaigns configured as drafts that already have attempts in the audit
    /// log start out in the status those attempts settle to.
    ///
    /// # Errors
    ///
    /// Fails if the audit log cannot be opened or read.
    pub async fn dispatcher(&self) -> anyhow::Result<Dispatcher> {
        let audit = self.audit_log.build().await?;
        let contacts: MemoryContactStore = self.contacts.iter().cloned().collect();
        let campaigns = MemoryCampaignStore::new();
        for campaign in &self.campaigns {
            campaigns.insert(recorded_state(campaign.clone(), audit.as_ref()).await?);
        }

        Ok(Dispatcher::new(
            Arc::new(campaigns),
            Arc::new(contacts),
            audit,
            transport::select(self.smtp.clone()),
            self.dispatch.clone(),
        ))
    }
}

/// `campaign` as earlier invocations left it, according to the audit log
async fn recorded_state(mut campaign: Campaign, audit: &dyn AuditLog) -> anyhow::Result<Campaign> {
    if campaign.status != CampaignStatus::Draft {
        return Ok(campaign);
    }

    let history = audit.attempts(campaign.id).await?;
    let first = history.iter().map(DeliveryAttempt::at).min();
    let last = history.iter().map(DeliveryAttempt::at).max();
    if first.is_none() {
        return Ok(campaign);
    }

    let status = DispatchResult::from_attempts(&history).settled_status();
    internal!(
        level = INFO,
        "Campaign {} has {} recorded attempts, resuming as {status}",
        campaign.id,
        history.len()
    );
    campaign.apply_status(
        status,
        StatusTimestamps {
            started_at: first,
            completed_at: last,
        },
    );
    Ok(campaign)
}

/// Find the configuration file using the following precedence:
/// 1. `HERALD_CONFIG` environment variable (passed in as `from_env`)
/// 2. ./herald.config.ron (current working directory)
/// 3. /etc/herald/herald.config.ron (system-wide config)
///
/// # Errors
///
/// Fails if `from_env` names a missing file, or none of the defaults exist.
pub fn find_config_file(from_env: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let defaults = DEFAULT_CONFIG_PATHS.map(PathBuf::from);
    locate(from_env, &defaults)
}

fn locate(from_env: Option<PathBuf>, defaults: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(path) = from_env {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
