//! Pairing QR code delivery.
//!
//! The session provider hands every QR code it produces to a [`QrSink`].
//! Sinks never fail the caller: a bad payload or an unwritable file is logged
//! and skipped.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::error::{Error, Result};

static DATA_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^data:([A-Za-z+/-]+);base64,(.+)$").expect("valid data URI pattern")
});

/// A pairing QR code as produced by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrCode {
    /// `data:<mime>;base64,<payload>` image URI.
    pub base64_image: String,
    /// Terminal rendering for headless hosts.
    pub ascii: String,
}

/// Receiver of pairing QR codes.
pub trait QrSink: Send + Sync {
    fn on_qr(&self, qr: &QrCode);
}

/// Decoded `data:` URI.
#[derive(Debug, PartialEq, Eq)]
pub struct DataUri {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Decode a `data:<mime>;base64,<payload>` URI.
pub fn decode_data_uri(uri: &str) -> Result<DataUri> {
    let caps = DATA_URI
        .captures(uri.trim())
        .ok_or_else(|| Error::QrDecode("not a base64 data URI".to_string()))?;
    let bytes = STANDARD.decode(&caps[2])?;
    Ok(DataUri {
        mime: caps[1].to_string(),
        bytes,
    })
}

/// Render QR content as text blocks for the log.
pub fn render_ascii(content: &str) -> Result<String> {
    let code = qrcode::QrCode::new(content.as_bytes())
        .map_err(|e| Error::QrDecode(format!("cannot encode QR content: {}", e)))?;
    Ok(code
        .render::<char>()
        .quiet_zone(false)
        .module_dimensions(2, 1)
        .build())
}

/// Writes the ASCII rendering to the operational log.
#[derive(Debug, Default, Clone)]
pub struct LogQrSink;

impl QrSink for LogQrSink {
    fn on_qr(&self, qr: &QrCode) {
        info!("Scan this QR code with WhatsApp:\n{}", qr.ascii);
    }
}

/// Decodes the image and writes it to a fixed path for the dashboard.
#[derive(Debug, Clone)]
pub struct FileQrSink {
    path: PathBuf,
}

impl FileQrSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write the decoded image, returning its MIME type.
    fn write(&self, qr: &QrCode) -> Result<String> {
        let image = decode_data_uri(&qr.base64_image)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, image.bytes)?;
        Ok(image.mime)
    }
}

impl QrSink for FileQrSink {
    fn on_qr(&self, qr: &QrCode) {
        match self.write(qr) {
            Ok(mime) => info!(path = %self.path.display(), %mime, "QR code saved"),
            Err(Error::QrDecode(reason)) => {
                warn!(reason = %reason, "Skipping QR image, payload is not a data URI")
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to save QR code"),
        }
    }
}

/// Fans one QR code out to several sinks, in order.
#[derive(Default)]
pub struct CompositeQrSink {
    sinks: Vec<Box<dyn QrSink>>,
}

impl CompositeQrSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl QrSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl QrSink for CompositeQrSink {
    fn on_qr(&self, qr: &QrCode) {
        for sink in &self.sinks {
            sink.on_qr(qr);
        }
    }
}
