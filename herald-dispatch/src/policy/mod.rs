//! Policy abstractions for dispatch runs.

mod retry;

pub use retry::{RetryPolicy, backoff_delay};
