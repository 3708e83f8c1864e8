//! Application context shared by the bootstrapper and the HTTP handler.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::relay::{Destination, GroupMatcher};
use crate::session::MessagingSession;

/// Lifecycle of the WhatsApp session as reported by `/health`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Starting,
    AwaitingScan,
    Ready,
    Failed(String),
}

impl Readiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Readiness::Starting => "starting",
            Readiness::AwaitingScan => "awaiting_scan",
            Readiness::Ready => "ready",
            Readiness::Failed(_) => "failed",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Readiness::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct SessionState {
    session: Option<Arc<dyn MessagingSession>>,
    target_group: Option<String>,
}

pub struct AppContext {
    state: RwLock<SessionState>,
    readiness: StdRwLock<Readiness>,
    /// Destinations found by the fallback scan. The mutex serializes scans.
    pub(crate) discovered: Mutex<Option<Vec<Destination>>>,
    matcher: GroupMatcher,
    backup_group_id: String,
    started_at: DateTime<Utc>,
}

impl AppContext {
    pub fn new(matcher: GroupMatcher, backup_group_id: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(SessionState::default()),
            readiness: StdRwLock::new(Readiness::Starting),
            discovered: Mutex::new(None),
            matcher,
            backup_group_id: backup_group_id.into(),
            started_at: Utc::now(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            GroupMatcher::new(config.group_keywords.clone()),
            config.backup_group_id.clone(),
        )
    }

    /// Context with a session already established.
    pub fn with_session(self, session: Arc<dyn MessagingSession>) -> Self {
        Self {
            state: RwLock::new(SessionState {
                session: Some(session),
                target_group: None,
            }),
            readiness: StdRwLock::new(Readiness::Ready),
            ..self
        }
    }

    pub async fn session(&self) -> Option<Arc<dyn MessagingSession>> {
        self.state.read().await.session.clone()
    }

    /// The established session, or `Error::NotReady`.
    pub async fn require_session(&self) -> Result<Arc<dyn MessagingSession>> {
        self.session().await.ok_or(Error::NotReady)
    }

    pub async fn set_session(&self, session: Arc<dyn MessagingSession>) {
        self.state.write().await.session = Some(session);
        self.set_readiness(Readiness::Ready);
    }

    pub async fn target_group(&self) -> Option<String> {
        self.state.read().await.target_group.clone()
    }

    pub async fn set_target_group(&self, id: impl Into<String>) {
        self.state.write().await.target_group = Some(id.into());
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_readiness(&self, readiness: Readiness) {
        *self
            .readiness
            .write()
            .unwrap_or_else(PoisonError::into_inner) = readiness;
    }

    pub fn matcher(&self) -> &GroupMatcher {
        &self.matcher
    }

    pub fn backup_group_id(&self) -> &str {
        &self.backup_group_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BACKUP_GROUP_ID;

    fn context() -> AppContext {
        AppContext::from_config(&Config::defaults())
    }

    #[tokio::test]
    async fn new_context_has_no_session() {
        let ctx = context();
        assert!(ctx.session().await.is_none());
        assert!(matches!(ctx.require_session().await, Err(Error::NotReady)));
        assert_eq!(ctx.readiness(), Readiness::Starting);
        assert_eq!(ctx.backup_group_id(), BACKUP_GROUP_ID);
    }

    #[tokio::test]
    async fn target_group_is_recorded() {
        let ctx = context();
        assert!(ctx.target_group().await.is_none());
        ctx.set_target_group("1@g.us").await;
        assert_eq!(ctx.target_group().await.as_deref(), Some("1@g.us"));
    }

    #[test]
    fn readiness_reports_failure_reason() {
        let ctx = context();
        ctx.set_readiness(Readiness::Failed("browser crashed".into()));

        let readiness = ctx.readiness();
        assert_eq!(readiness.as_str(), "failed");
        assert_eq!(readiness.error(), Some("browser crashed"));
    }

    #[test]
    fn readiness_labels() {
        assert_eq!(Readiness::Starting.to_string(), "starting");
        assert_eq!(Readiness::AwaitingScan.to_string(), "awaiting_scan");
        assert_eq!(Readiness::Ready.to_string(), "ready");
        assert!(Readiness::Ready.error().is_none());
    }
}
