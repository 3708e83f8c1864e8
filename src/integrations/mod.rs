//! External integrations module.
//!
//! Provides clients for:
//! - WPPConnect Server (WhatsApp Web automation)

pub mod wppconnect;

pub use wppconnect::WppConnectClient;
