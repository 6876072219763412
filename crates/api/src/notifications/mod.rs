//! Notification dispatcher
//!
//! Persists notification records and pushes them to whichever connections
//! their target currently has open. Targets that are offline pick the backlog
//! up on their next authentication via [`NotificationDispatcher::deliver_unread`].

use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use frontdesk_shared::{Notification, NotificationContent, PrincipalKey};

use crate::realtime::{ChatError, ChatResult, Connection, PresenceRegistry, ServerEvent};
use crate::store::ChatStore;

/// Most unread notifications pushed right after authentication
pub const UNREAD_BACKLOG_LIMIT: i64 = 50;

/// Largest page the listing accepts
pub const MAX_LIST_LIMIT: i64 = 100;

pub const MAX_TITLE_CHARS: usize = 200;

pub struct NotificationDispatcher {
    store: Arc<dyn ChatStore>,
    presence: Arc<PresenceRegistry>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn ChatStore>, presence: Arc<PresenceRegistry>) -> Self {
        Self { store, presence }
    }

    /// Persist a notification for `target` and push it to every live
    /// connection the target has. Not idempotent.
    pub async fn create_and_send(
        &self,
        target: PrincipalKey,
        content: NotificationContent,
    ) -> ChatResult<Notification> {
        validate_content(&content)?;

        let notification = self.store.insert_notification(target, &content).await?;

        let connections = self.presence.connections_for(&target).await;
        let mut delivered = 0;
        for conn in &connections {
            if conn
                .send(ServerEvent::NewNotification {
                    notification: notification.clone(),
                })
                .is_ok()
            {
                delivered += 1;
            }
        }

        tracing::info!(
            notification_id = %notification.id,
            target_id = %target.id,
            target_kind = target.kind.as_str(),
            notification_type = %notification.notification_type,
            delivered,
            "Notification created"
        );

        Ok(notification)
    }

    /// Push an ad-hoc event to every connected staff member whose role is in
    /// `roles`. Nothing is persisted.
    pub async fn send_to_role(&self, roles: &HashSet<String>, event: &str, payload: serde_json::Value) -> usize {
        let connections = self.presence.staff_connections_with_role(roles).await;
        let message = ServerEvent::RoleBroadcast {
            event: event.to_string(),
            payload,
        };

        let delivered = connections
            .iter()
            .filter(|conn| conn.send(message.clone()).is_ok())
            .count();

        tracing::debug!(
            event = %event,
            recipients = delivered,
            "Role broadcast sent"
        );

        delivered
    }

    /// Push the unread backlog to a freshly authenticated connection
    pub async fn deliver_unread(&self, conn: &Connection) -> ChatResult<usize> {
        let notifications = self
            .store
            .list_notifications(conn.principal.key(), true, UNREAD_BACKLOG_LIMIT)
            .await?;
        let count = notifications.len();

        let _ = conn.send(ServerEvent::UnreadNotifications { notifications });

        tracing::debug!(
            connection_id = %conn.id,
            unread = count,
            "Delivered unread notifications"
        );

        Ok(count)
    }

    /// Notifications of one principal, newest first
    pub async fn list(&self, target: PrincipalKey, unread_only: bool, limit: Option<i64>) -> ChatResult<Vec<Notification>> {
        let limit = limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        Ok(self.store.list_notifications(target, unread_only, limit).await?)
    }

    pub async fn mark_read(&self, id: Uuid, target: PrincipalKey) -> ChatResult<Notification> {
        self.store
            .mark_notification_read(id, target)
            .await?
            .ok_or(ChatError::NotFound("Notification"))
    }

    pub async fn mark_all_read(&self, target: PrincipalKey) -> ChatResult<u64> {
        Ok(self.store.mark_all_notifications_read(target).await?)
    }

    pub async fn clear(&self, target: PrincipalKey) -> ChatResult<u64> {
        let removed = self.store.clear_notifications(target).await?;
        tracing::info!(
            target_id = %target.id,
            target_kind = target.kind.as_str(),
            removed,
            "Notifications cleared"
        );
        Ok(removed)
    }
}

fn validate_content(content: &NotificationContent) -> ChatResult<()> {
    if content.notification_type.trim().is_empty() {
        return Err(ChatError::Validation("Notification type is required".to_string()));
    }
    if content.title.trim().is_empty() {
        return Err(ChatError::Validation("Notification title is required".to_string()));
    }
    if content.title.chars().count() > MAX_TITLE_CHARS {
        return Err(ChatError::Validation(format!(
            "Notification title cannot exceed {} characters",
            MAX_TITLE_CHARS
        )));
    }
    Ok(())
}

/// First `max` characters of `text`, with `...` appended when something was cut
pub fn truncate_preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
