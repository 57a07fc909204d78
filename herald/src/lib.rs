//! The herald binary's configuration and top-level control flow

pub mod config;
pub mod controller;

pub use config::Herald;
