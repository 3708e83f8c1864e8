//! WhatsApp Deal Relay Library
//!
//! This library provides tools to:
//! - Pair a WhatsApp session through a QR code and join the deals group
//! - Relay deals received over HTTP to that group as text or image messages
//! - Fall back to discovering a suitable group when the target is unknown
//! - Expose health and Prometheus metrics endpoints

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod deal;
pub mod error;
pub mod integrations;
pub mod metrics;
pub mod qr;
pub mod relay;
pub mod server;
pub mod session;

// Re-export common types
pub use config::Config;
pub use context::{AppContext, Readiness};
pub use deal::Deal;
pub use error::{Error, Result};
