//! Message broadcast engine
//!
//! Validates and persists chat messages, fans them out through the room
//! manager, and notifies support staff who are not in the room.

use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use frontdesk_shared::{
    Conversation, Message, MessageKind, NewMessage, NotificationContent, Principal, PrincipalKey,
    SenderKind,
};

use crate::notifications::{truncate_preview, NotificationDispatcher};
use crate::store::ChatStore;

use super::connection::Connection;
use super::error::{ChatError, ChatResult};
use super::events::ServerEvent;
use super::room::RoomManager;

/// Longest accepted message body, in characters
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Length of the message preview in offline notifications
pub const NOTIFICATION_PREVIEW_CHARS: usize = 100;

pub const ASSISTANT_NAME: &str = "Assistant";

pub struct MessageBroadcaster {
    store: Arc<dyn ChatStore>,
    rooms: Arc<RoomManager>,
    notifications: Arc<NotificationDispatcher>,
}

impl MessageBroadcaster {
    pub fn new(
        store: Arc<dyn ChatStore>,
        rooms: Arc<RoomManager>,
        notifications: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            rooms,
            notifications,
        }
    }

    /// Post a message from a connection to a conversation
    pub async fn send(
        &self,
        conn: &Connection,
        conversation_id: Uuid,
        body: &str,
        kind: MessageKind,
    ) -> ChatResult<Message> {
        let body = validate_body(body)?;
        if kind == MessageKind::System && !conn.principal.is_staff() {
            return Err(ChatError::AccessDenied("only staff can post system messages"));
        }

        let conversation = self.rooms.authorize(&conn.principal, conversation_id).await?;

        let message = self
            .rooms
            .append_message(NewMessage {
                conversation_id,
                sender_kind: SenderKind::from(conn.principal.kind()),
                sender_id: Some(conn.principal.id()),
                sender_name: Some(conn.principal.display_name().to_string()),
                body,
                kind,
            })
            .await?;

        self.rooms
            .mark_active(&conversation_id, &conn.principal.key())
            .await;

        tracing::debug!(
            message_id = %message.id,
            conversation_id = %conversation_id,
            sender_id = %conn.principal.id(),
            "Message sent"
        );

        if !conn.principal.is_staff() {
            self.notify_offline_staff(&conversation, &message).await;
        }

        Ok(message)
    }

    /// Ephemeral typing indicator for the other connections in the room
    pub async fn broadcast_typing(&self, conn: &Connection, conversation_id: Uuid, is_typing: bool) -> ChatResult<()> {
        if !self.rooms.is_member(&conversation_id, &conn.id).await {
            return Err(ChatError::AccessDenied("join the conversation first"));
        }

        self.rooms
            .broadcast_except(
                &conversation_id,
                Some(conn.id),
                ServerEvent::UserTyping {
                    conversation_id,
                    principal_id: conn.principal.id(),
                    kind: conn.principal.kind(),
                    display_name: conn.principal.display_name().to_string(),
                    is_typing,
                },
            )
            .await;

        Ok(())
    }

    /// Record that the connection's principal has read the conversation
    pub async fn mark_messages_read(&self, conn: &Connection, conversation_id: Uuid) -> ChatResult<OffsetDateTime> {
        self.rooms.authorize(&conn.principal, conversation_id).await?;

        let reader = conn.principal.key();
        let read_at = self.store.mark_conversation_read(conversation_id, reader).await?;

        self.rooms
            .broadcast(
                &conversation_id,
                ServerEvent::MessagesRead {
                    conversation_id,
                    reader_id: reader.id,
                    reader_kind: reader.kind,
                    read_at,
                },
            )
            .await;

        Ok(read_at)
    }

    /// Persist an assistant answer through the ordered path
    pub async fn post_assistant_reply(&self, conversation_id: Uuid, body: &str) -> ChatResult<Message> {
        self.rooms
            .append_message(NewMessage {
                conversation_id,
                sender_kind: SenderKind::Assistant,
                sender_id: None,
                sender_name: Some(ASSISTANT_NAME.to_string()),
                body: body.trim().to_string(),
                kind: MessageKind::Text,
            })
            .await
    }

    /// Latest messages of a conversation the principal can see, oldest first
    pub async fn history(
        &self,
        principal: &Principal,
        conversation_id: Uuid,
        limit: i64,
    ) -> ChatResult<Vec<Message>> {
        self.rooms.authorize(principal, conversation_id).await?;
        Ok(self.store.recent_messages(conversation_id, limit).await?)
    }

    /// One notification per support staff member who is not in the room
    async fn notify_offline_staff(&self, conversation: &Conversation, message: &Message) {
        let roles: Vec<String> = self.rooms.policy().support_roles().iter().cloned().collect();
        let staff = match self.store.list_support_staff(&roles).await {
            Ok(staff) => staff,
            Err(e) => {
                tracing::error!(
                    error = ?e,
                    conversation_id = %conversation.id,
                    "Failed to load support staff for notifications"
                );
                return;
            }
        };

        let present = self.rooms.online_participants(&conversation.id).await;
        let sender = message.sender_name.as_deref().unwrap_or("a client");

        for member in staff {
            let target = PrincipalKey::staff(member.id);
            if present.contains(&target) {
                continue;
            }

            let content = NotificationContent {
                notification_type: "new_message".to_string(),
                title: format!("New message from {}", sender),
                body: truncate_preview(&message.body, NOTIFICATION_PREVIEW_CHARS),
                payload: serde_json::json!({
                    "conversation_id": conversation.id,
                    "message_id": message.id,
                    "client_id": conversation.client_id,
                    "subject": conversation.subject,
                }),
            };

            if let Err(e) = self.notifications.create_and_send(target, content).await {
                tracing::error!(
                    error = ?e,
                    staff_id = %member.id,
                    conversation_id = %conversation.id,
                    "Failed to notify offline staff"
                );
            }
        }
    }
}

/// Trimmed body, or a validation error when empty or too long
pub fn validate_body(body: &str) -> ChatResult<String> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ChatError::Validation("Message cannot be empty".to_string()));
    }
    if body.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ChatError::Validation(format!(
            "Message cannot exceed {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(body.to_string())
}
