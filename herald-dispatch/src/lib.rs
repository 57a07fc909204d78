//! Campaign dispatch engine
//!
//! This crate turns a campaign and a contact list into delivered (or
//! simulated) messages:
//! - Resolve the campaign's selector into an ordered, deduplicated recipient list
//! - Render the template per recipient
//! - Deliver through a pluggable [`Transport`] with retry, rate limiting and a
//!   bounded worker pool
//! - Append an audit record for every attempt and settle the campaign status

mod engine;
mod error;
pub mod policy;
mod rate_limiter;
pub mod render;
pub mod resolver;
pub mod transport;
mod types;

pub use engine::{DispatchConfig, DispatchHandle, Dispatcher};
pub use error::{
    DeliveryError, DispatchError, InvalidStateError, PermanentError, RenderError,
    ResolutionError, TemporaryError,
};
pub use policy::RetryPolicy;
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use render::{RenderedMessage, render};
pub use resolver::{Recipients, resolve};
pub use transport::{Delivered, Session, SimulatedTransport, SmtpConfig, SmtpTransport, Transport};
pub use types::{DispatchResult, DispatchStatus, RenderWarning};
