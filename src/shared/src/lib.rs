//! Shared types for the dashboard service aggregation layer
//!
//! Everything the aggregation crate consumes from the web layer lives here:
//! the per-request context, the read-only settings gate, and the error
//! taxonomy every backend failure is translated into.

pub mod config;
pub mod types;

pub use config::{
    ConfigGate, ConfigOverrides, EndpointInterface, FilterTenant, HorizonConfig, LoggingConfig,
};

pub use types::*;
