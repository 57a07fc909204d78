//! Minimal SMTP relay for exercising the real transport
//!
//! Answers EHLO, MAIL, RCPT, DATA, RSET, NOOP and QUIT. The RCPT and
//! end-of-data replies are configurable, every recipient and message body the
//! relay accepts is recorded.
//!
//! ```rust,no_run
//! let relay = MockRelay::builder()
//!     .with_rcpt_response(550, "5.1.1 User unknown")
//!     .build()
//!     .await?;
//! // point an SmtpConfig at relay.addr()
//! ```

use std::{net::SocketAddr, sync::Arc};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct RelayConfig {
    rcpt: Reply,
    data_end: Reply,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            rcpt: Reply::new(250, "2.1.5 OK"),
            data_end: Reply::new(250, "2.0.0 OK: queued"),
        }
    }
}

#[derive(Debug, Default)]
struct Received {
    recipients: Vec<String>,
    messages: Vec<String>,
}

/// Relay listening on a random local port, stopped on drop
pub struct MockRelay {
    addr: SocketAddr,
    received: Arc<Mutex<Received>>,
    accept_loop: JoinHandle<()>,
}

impl MockRelay {
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder {
            config: RelayConfig::default(),
        }
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `RCPT TO` arguments, as sent
    pub fn recipients(&self) -> Vec<String> {
        self.received.lock().recipients.clone()
    }

    /// Message contents the relay accepted
    pub fn messages(&self) -> Vec<String> {
        self.received.lock().messages.clone()
    }

    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<RelayConfig>,
        received: Arc<Mutex<Received>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut rcpt_accepted = Vec::new();

        writer.write_all(b"220 mock.relay ESMTP\r\n").await?;

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }

            let command = line.trim_end();
            let verb = command
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_uppercase();

            let reply = match verb.as_str() {
                "EHLO" => b"250-mock.relay\r\n250 SIZE 10000000\r\n".to_vec(),
                "HELO" | "MAIL" | "RSET" | "NOOP" => {
                    if verb == "RSET" {
                        rcpt_accepted.clear();
                    }
                    Reply::new(250, "OK").to_bytes()
                }
                "RCPT" => {
                    if config.rcpt.code < 300 {
                        rcpt_accepted.push(command[4..].trim().to_string());
                    }
                    config.rcpt.to_bytes()
                }
                "DATA" => {
                    writer
                        .write_all(&Reply::new(354, "End data with <CR><LF>.<CR><LF>").to_bytes())
                        .await?;

                    let mut content = String::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).await? == 0 {
                            return Ok(());
                        }
                        if line.trim_end() == "." {
                            break;
                        }
                        content.push_str(&line);
                    }

                    if config.data_end.code < 300 {
                        let mut received = received.lock();
                        received.recipients.append(&mut rcpt_accepted);
                        received.messages.push(content);
                    }
                    rcpt_accepted.clear();
                    config.data_end.to_bytes()
                }
                "QUIT" => {
                    writer.write_all(&Reply::new(221, "Bye").to_bytes()).await?;
                    return Ok(());
                }
                _ => Reply::new(500, "Unknown command").to_bytes(),
            };

            writer.write_all(&reply).await?;
            writer.flush().await?;
        }
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

pub struct MockRelayBuilder {
    config: RelayConfig,
}

impl MockRelayBuilder {
    /// Reply to every `RCPT TO`
    #[must_use]
    pub fn with_rcpt_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt = Reply::new(code, message);
        self
    }

    /// Reply after the message content
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end = Reply::new(code, message);
        self
    }

    /// Bind to a random local port and start accepting
    pub async fn build(self) -> std::io::Result<MockRelay> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let received = Arc::new(Mutex::new(Received::default()));

        let accept_received = Arc::clone(&received);
        let accept_loop = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let config = Arc::clone(&config);
                let received = Arc::clone(&accept_received);
                tokio::spawn(async move {
                    let _ = MockRelay::handle_client(stream, config, received).await;
                });
            }
        });

        Ok(MockRelay {
            addr,
            received,
            accept_loop,
        })
    }
}
