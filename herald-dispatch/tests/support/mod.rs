//! Test support for dispatch runs
//!
//! - [`ScriptedTransport`]: a transport whose answer is scripted per recipient
//! - [`Harness`]: a dispatcher wired to in-memory stores
//! - [`MockRelay`]: a minimal SMTP relay for exercising the real transport

#![allow(dead_code)] // Not every test binary uses every helper

pub mod harness;
pub mod mock_relay;
pub mod transports;

pub use harness::{Harness, address, contact};
pub use mock_relay::MockRelay;
pub use transports::{Behaviour, BrokenAuditLog, FlakyAuditLog, ScriptedTransport};
