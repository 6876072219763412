//! Realtime connection management
//!
//! Represents an authenticated socket with room subscription tracking.

use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use frontdesk_shared::Principal;

use super::events::ServerEvent;

/// Represents an active, authenticated connection
#[derive(Debug)]
pub struct Connection {
    /// Unique id for this connection
    pub id: Uuid,

    /// Authenticated principal, fixed for the lifetime of the connection
    pub principal: Principal,

    pub connected_at: OffsetDateTime,

    /// Refreshed by every inbound event; drives staff activity checks
    last_seen_at: RwLock<OffsetDateTime>,

    /// Channel to send events to this connection
    sender: mpsc::UnboundedSender<ServerEvent>,

    /// Conversation ids this connection has joined
    subscriptions: Arc<RwLock<HashSet<Uuid>>>,
}

impl Connection {
    /// Create a new connection
    pub fn new(principal: Principal, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            principal,
            connected_at: now,
            last_seen_at: RwLock::new(now),
            sender,
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if sent successfully, Err if connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    pub async fn touch(&self) {
        self.mark_seen_at(OffsetDateTime::now_utc()).await;
    }

    pub async fn mark_seen_at(&self, at: OffsetDateTime) {
        let mut last_seen = self.last_seen_at.write().await;
        if at > *last_seen {
            *last_seen = at;
        }
    }

    pub async fn last_seen_at(&self) -> OffsetDateTime {
        *self.last_seen_at.read().await
    }

    /// Subscribe to a conversation room
    pub async fn subscribe(&self, conversation_id: Uuid) {
        let mut subs = self.subscriptions.write().await;
        subs.insert(conversation_id);
        tracing::debug!(
            connection_id = %self.id,
            conversation_id = %conversation_id,
            "Subscribed to conversation"
        );
    }

    /// Unsubscribe from a conversation room
    pub async fn unsubscribe(&self, conversation_id: Uuid) {
        let mut subs = self.subscriptions.write().await;
        subs.remove(&conversation_id);
        tracing::debug!(
            connection_id = %self.id,
            conversation_id = %conversation_id,
            "Unsubscribed from conversation"
        );
    }

    /// Check if subscribed to a conversation
    pub async fn is_subscribed(&self, conversation_id: &Uuid) -> bool {
        let subs = self.subscriptions.read().await;
        subs.contains(conversation_id)
    }

    /// Get all conversation subscriptions
    pub async fn get_subscriptions(&self) -> HashSet<Uuid> {
        let subs = self.subscriptions.read().await;
        subs.clone()
    }
}
