//! Destination resolution and deal dispatch.
//!
//! Resolution order:
//! 1. the known target group
//! 2. every group whose name contains one of the keywords
//! 3. the first group in provider order
//! 4. the hardcoded backup group

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::deal::{format_message, Deal, IMAGE_FILENAME};
use crate::error::Result;
use crate::metrics;
use crate::session::{Chat, MessagingSession};

pub const TARGET_GROUP_NAME: &str = "Target Group";
pub const BACKUP_GROUP_NAME: &str = "Hardcoded Backup";

/// A group the deal is sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub id: String,
    pub name: String,
}

impl Destination {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    fn from_chat(chat: &Chat) -> Self {
        Self::new(chat.id.clone(), chat.name.clone().unwrap_or_default())
    }
}

/// Case-sensitive substring match of group names against keywords.
#[derive(Debug, Clone)]
pub struct GroupMatcher {
    keywords: Vec<String>,
}

impl GroupMatcher {
    pub fn new(keywords: Vec<String>) -> Self {
        Self { keywords }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.keywords.iter().any(|k| name.contains(k.as_str()))
    }

    /// Destinations found in a chat list, without the backup step.
    pub fn select(&self, chats: &[Chat]) -> Vec<Destination> {
        let groups: Vec<&Chat> = chats.iter().filter(|c| c.is_group).collect();

        let matching: Vec<Destination> = groups
            .iter()
            .filter(|g| g.name.as_deref().is_some_and(|n| self.matches(n)))
            .map(|g| Destination::from_chat(g))
            .collect();

        if !matching.is_empty() {
            return matching;
        }

        groups
            .first()
            .map(|g| vec![Destination::from_chat(g)])
            .unwrap_or_default()
    }
}

/// Resolve where a deal goes.
pub async fn resolve_destinations(
    ctx: &AppContext,
    session: &dyn MessagingSession,
) -> Result<Vec<Destination>> {
    if let Some(id) = ctx.target_group().await {
        return Ok(vec![Destination::new(id, TARGET_GROUP_NAME)]);
    }

    let mut discovered = ctx.discovered.lock().await;
    // The bootstrapper may have joined while this request waited for the lock.
    if let Some(id) = ctx.target_group().await {
        return Ok(vec![Destination::new(id, TARGET_GROUP_NAME)]);
    }
    if let Some(cached) = discovered.as_ref() {
        debug!(count = cached.len(), "Using previously discovered groups");
        return Ok(cached.clone());
    }

    let chats = session.list_chats().await?;
    let found = ctx.matcher().select(&chats);

    if found.is_empty() {
        warn!(chats = chats.len(), "No groups found to send deal, using backup group");
        return Ok(vec![Destination::new(
            ctx.backup_group_id(),
            BACKUP_GROUP_NAME,
        )]);
    }

    info!(
        groups = ?found.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
        "Discovered destination groups"
    );
    *discovered = Some(found.clone());
    Ok(found)
}

/// Send one message to every destination in order, stopping at the first failure.
pub async fn dispatch(
    session: &dyn MessagingSession,
    destinations: &[Destination],
    deal: &Deal,
    message: &str,
) -> Result<Vec<String>> {
    let mut sent_to = Vec::with_capacity(destinations.len());

    for dest in destinations {
        info!(group = %dest.name, id = %dest.id, "Sending deal to group");
        let (kind, result) = match deal.image() {
            Some(image) => (
                "image",
                session
                    .send_image(&dest.id, image, IMAGE_FILENAME, message)
                    .await,
            ),
            None => ("text", session.send_text(&dest.id, message).await),
        };
        metrics::record_send(kind, result.is_ok());
        result?;
        sent_to.push(dest.name.clone());
    }

    Ok(sent_to)
}

/// Resolve, format and dispatch a deal. Returns the names sent to.
pub async fn relay_deal(ctx: &AppContext, deal: &Deal) -> Result<Vec<String>> {
    let session = ctx.require_session().await?;
    let destinations = resolve_destinations(ctx, session.as_ref()).await?;
    let message = format_message(deal);
    dispatch(session.as_ref(), &destinations, deal, &message).await
}
