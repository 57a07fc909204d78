use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use herald_common::internal;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::{
        PoolConfig, SMTP_PORT, SUBMISSION_PORT, SUBMISSIONS_PORT,
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{Delivered, Session, Transport};
use crate::{DeliveryError, PermanentError, RenderedMessage, TemporaryError};

/// How the connection to the relay is secured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsMode {
    /// Plain connection upgraded with STARTTLS, which must succeed
    #[default]
    StartTls,
    /// TLS from the first byte
    Implicit,
    /// No encryption, only for local relays
    None,
}

impl TlsMode {
    const fn default_port(self) -> u16 {
        match self {
            Self::StartTls => SUBMISSION_PORT,
            Self::Implicit => SUBMISSIONS_PORT,
            Self::None => SMTP_PORT,
        }
    }
}

/// Relay settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,

    /// Defaults to the well-known port for the TLS mode
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub tls: TlsMode,

    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    pub from_address: String,

    #[serde(default)]
    pub from_name: Option<String>,

    /// Connection and command timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    30
}

impl SmtpConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, from_address: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            tls: TlsMode::default(),
            accept_invalid_certs: false,
            username: None,
            password: None,
            from_address: from_address.into(),
            from_name: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.tls.default_port())
    }

    fn sender(&self) -> Result<Mailbox, DeliveryError> {
        let address = self.from_address.parse::<lettre::Address>()?;
        let name = self.from_name.clone().filter(|name| !name.trim().is_empty());
        Ok(Mailbox::new(name, address))
    }

    fn tls(&self) -> Result<Tls, DeliveryError> {
        let parameters = || {
            TlsParameters::builder(self.host.clone())
                .dangerous_accept_invalid_certs(self.accept_invalid_certs)
                .build()
                .map_err(|e| PermanentError::Configuration(format!("TLS parameters: {e}")))
        };

        Ok(match self.tls {
            TlsMode::StartTls => Tls::Required(parameters()?),
            TlsMode::Implicit => Tls::Wrapper(parameters()?),
            TlsMode::None => Tls::None,
        })
    }

    fn build(&self, pool_size: usize) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let pool = PoolConfig::new().max_size(u32::try_from(pool_size.max(1)).unwrap_or(u32::MAX));

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(self.host.as_str())
            .port(self.port())
            .tls(self.tls()?)
            .timeout(Some(Duration::from_secs(self.timeout_secs)))
            .pool_config(pool);

        if let Some(username) = &self.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                self.password.clone().unwrap_or_default(),
            ));
        }

        Ok(builder.build())
    }
}

/// Delivers through an SMTP relay
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    config: SmtpConfig,
}

impl SmtpTransport {
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &SmtpConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn open(&self, concurrency: usize) -> Result<Arc<dyn Session>, DeliveryError> {
        let sender = self.config.sender()?;
        let transport = self.config.build(concurrency)?;

        internal!(
            level = DEBUG,
            "Opened relay session to {}:{} with {} connections",
            self.config.host,
            self.config.port(),
            concurrency
        );

        Ok(Arc::new(SmtpSession {
            sender,
            transport: Mutex::new(Some(Arc::new(transport))),
        }))
    }
}

/// A connection pool sized to the run's worker count
struct SmtpSession {
    sender: Mailbox,
    transport: Mutex<Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>>,
}

impl std::fmt::Debug for SmtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSession")
            .field("sender", &self.sender)
            .field("open", &self.transport.lock().is_some())
            .finish()
    }
}

impl SmtpSession {
    fn message(&self, message: &RenderedMessage) -> Result<Message, DeliveryError> {
        let to = message.to.as_str().parse::<lettre::Address>()?;

        Ok(Message::builder()
            .from(self.sender.clone())
            .to(Mailbox::new(None, to))
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(message.body.clone())?)
    }
}

#[async_trait]
impl Session for SmtpSession {
    async fn deliver(&self, message: &RenderedMessage) -> Result<Delivered, DeliveryError> {
        let email = self.message(message)?;
        let transport = self
            .transport
            .lock()
            .clone()
            .ok_or(TemporaryError::SessionClosed)?;

        let response = transport.send(email).await?;
        internal!("Relay accepted message for {} ({})", message.to, response.code());

        Ok(Delivered::Sent)
    }

    async fn close(&self) {
        if self.transport.lock().take().is_some() {
            internal!(level = DEBUG, "Closed relay session");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use herald_common::Address;

    use super::*;

    fn plain_config() -> SmtpConfig {
        SmtpConfig {
            tls: TlsMode::None,
            from_name: Some("Herald".to_string()),
            ..SmtpConfig::new("127.0.0.1", "news@example.com")
        }
    }

    #[test]
    fn port_follows_tls_mode() {
        let mut config = SmtpConfig::new("relay.example.com", "news@example.com");
        assert_eq!(config.port(), 587);

        config.tls = TlsMode::Implicit;
        assert_eq!(config.port(), 465);

        config.tls = TlsMode::None;
        assert_eq!(config.port(), 25);

        config.port = Some(2525);
        assert_eq!(config.port(), 2525);
    }

    #[test]
    fn sender_includes_display_name() {
        let sender = plain_config().sender().expect("valid sender");
        assert_eq!(sender.to_string(), "Herald <news@example.com>");

        let blank = SmtpConfig {
            from_name: Some("  ".to_string()),
            ..plain_config()
        };
        assert_eq!(blank.sender().expect("valid sender").to_string(), "news@example.com");
    }

    #[tokio::test]
    async fn invalid_sender_fails_to_open() {
        let transport = SmtpTransport::new(SmtpConfig {
            from_address: "not an address".to_string(),
            ..plain_config()
        });

        let error = transport.open(2).await.expect_err("sender is invalid");
        assert!(error.is_permanent());
    }

    #[tokio::test]
    async fn closed_session_refuses_delivery() {
        let transport = SmtpTransport::new(plain_config());
        let session = transport.open(2).await.expect("opens without connecting");
        session.close().await;

        let message = RenderedMessage {
            to: Address::parse("ada@example.com").expect("valid address"),
            subject: "Hello".to_string(),
            body: "<p>Hi</p>".to_string(),
        };

        let error = session.deliver(&message).await.expect_err("session is closed");
        assert!(matches!(
            error,
            DeliveryError::Temporary(TemporaryError::SessionClosed)
        ));
    }
}
