//! WhatsApp session abstractions
//!
//! Provides:
//! - `MessagingSession`: the operations the relay needs from a connected session
//! - `SessionProvider`: establishes a session, reporting pairing QR codes
//! - `SessionLock`: file-based lock so one process drives a session at a time

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::error;

use crate::error::{Error, Result};
use crate::qr::QrSink;

/// One entry of the provider's chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(deserialize_with = "deserialize_chat_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
}

impl Chat {
    pub fn group(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: Some(name.to_string()),
            is_group: true,
        }
    }

    pub fn direct(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: Some(name.to_string()),
            is_group: false,
        }
    }
}

/// Chat ids arrive either as a plain string or as `{"_serialized": "..."}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawChatId {
    Plain(String),
    Wid {
        #[serde(rename = "_serialized")]
        serialized: String,
    },
}

fn deserialize_chat_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawChatId::deserialize(deserializer)? {
        RawChatId::Plain(s) => s,
        RawChatId::Wid { serialized } => serialized,
    })
}

/// Operations available on an established session.
#[async_trait]
pub trait MessagingSession: Send + Sync {
    /// Join a group by invite code, returning the group id if the provider reports one.
    async fn join_group(&self, invite_code: &str) -> Result<Option<String>>;

    /// All chats, in provider order.
    async fn list_chats(&self) -> Result<Vec<Chat>>;

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;

    async fn send_image(
        &self,
        chat_id: &str,
        image: &str,
        filename: &str,
        caption: &str,
    ) -> Result<()>;
}

/// Establishes a session with the messaging provider.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Resolve once the session is authenticated. Every pairing QR code the
    /// provider produces on the way is handed to `sink`.
    async fn connect(&self, sink: &dyn QrSink) -> Result<Arc<dyn MessagingSession>>;
}

/// Session lock guard that ensures exclusive access to a provider session.
pub struct SessionLock {
    path: PathBuf,
    lock_file: Option<File>,
}

impl SessionLock {
    /// Lock file path for a session name.
    pub fn path_for(session: &str) -> PathBuf {
        PathBuf::from(format!("{}.lock", session))
    }

    /// Acquire an exclusive lock on the session.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::LockError(format!("Failed to open lock file: {}", e)))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path,
                lock_file: Some(lock_file),
            }),
            Err(_) => {
                error!(
                    lock = %path.display(),
                    "WhatsApp session is already driven by another relay process"
                );
                Err(Error::SessionLocked)
            }
        }
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(ref file) = self.lock_file {
            let _ = file.unlock();
        }
        if self.lock_file.take().is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        self.release();
    }
}
