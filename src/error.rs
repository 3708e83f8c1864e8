//! Error types for the deal relay

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("WhatsApp not ready")]
    NotReady,

    #[error("Missing deal data")]
    MissingDeal,

    #[error("WhatsApp provider error: {0}")]
    Provider(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Malformed QR payload: {0}")]
    QrDecode(String),

    #[error("Session is locked by another process")]
    SessionLocked,

    #[error("Failed to acquire session lock: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status the relay endpoint answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotReady => 503,
            Error::MissingDeal => 400,
            _ => 500,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else if err.is_connect() {
            Error::ConnectionError(err.to_string())
        } else {
            Error::Provider(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::QrDecode(err.to_string())
    }
}
