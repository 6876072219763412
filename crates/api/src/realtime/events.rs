//! Realtime event types and serialization
//!
//! Defines all client-to-server and server-to-client event types
//! with type-safe serde serialization.

use frontdesk_shared::{Conversation, ConversationStatus, Message, MessageKind, Notification, PrincipalKind};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Authenticate the socket when no token was given at upgrade
    Authenticate { token: String },

    /// Enter a conversation room
    JoinConversation { conversation_id: Uuid },

    /// Leave a conversation room
    LeaveConversation { conversation_id: Uuid },

    /// Post a message to a conversation
    SendMessage {
        conversation_id: Uuid,
        body: String,
        #[serde(default)]
        kind: MessageKind,
    },

    /// Mark everything in the conversation as read by the sender
    MarkMessagesRead { conversation_id: Uuid },

    /// Start typing in a conversation
    TypingStart { conversation_id: Uuid },

    /// Stop typing in a conversation
    TypingStop { conversation_id: Uuid },

    /// Heartbeat ping to keep connection alive
    Ping,
}

impl ClientEvent {
    /// Event name as it appears on the wire, for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::JoinConversation { .. } => "join_conversation",
            Self::LeaveConversation { .. } => "leave_conversation",
            Self::SendMessage { .. } => "send_message",
            Self::MarkMessagesRead { .. } => "mark_messages_read",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::Ping => "ping",
        }
    }

    /// Whether the event counts as activity in a conversation. Heartbeats
    /// and leaving keep the socket alive but do not make staff present.
    pub fn is_room_activity(&self) -> bool {
        matches!(
            self,
            Self::JoinConversation { .. }
                | Self::SendMessage { .. }
                | Self::MarkMessagesRead { .. }
                | Self::TypingStart { .. }
                | Self::TypingStop { .. }
        )
    }
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Socket accepted the credentials
    Authenticated {
        connection_id: Uuid,
        principal_id: Uuid,
        kind: PrincipalKind,
        display_name: String,
    },

    /// Socket rejected the credentials; the connection is closed afterwards
    AuthError { message: String },

    /// Sent to the joiner with everyone currently known in the room
    ConversationJoined {
        conversation_id: Uuid,
        online_participants: Vec<ParticipantView>,
    },

    /// Someone entered the room
    UserJoined {
        conversation_id: Uuid,
        participant: ParticipantView,
    },

    /// Someone left the room
    UserLeft {
        conversation_id: Uuid,
        principal_id: Uuid,
        kind: PrincipalKind,
        /// False when the principal still has another tab in the room
        offline: bool,
    },

    /// New message added to a conversation
    NewMessage { message: Message },

    /// A participant read the conversation
    MessagesRead {
        conversation_id: Uuid,
        reader_id: Uuid,
        reader_kind: PrincipalKind,
        #[serde(with = "time::serde::rfc3339")]
        read_at: OffsetDateTime,
    },

    /// Typing indicator changed
    UserTyping {
        conversation_id: Uuid,
        principal_id: Uuid,
        kind: PrincipalKind,
        display_name: String,
        is_typing: bool,
    },

    /// Conversation was closed or reopened
    ConversationUpdated {
        conversation_id: Uuid,
        status: ConversationStatus,
        closed_by: Option<Uuid>,
    },

    /// Notification pushed to its target
    NewNotification { notification: Notification },

    /// Backlog of unread notifications, sent right after authentication
    UnreadNotifications { notifications: Vec<Notification> },

    /// Ad-hoc fan-out to every connected member of some roles
    RoleBroadcast {
        event: String,
        payload: serde_json::Value,
    },

    /// Heartbeat response
    Pong,

    /// Error message
    Error { message: String },
}

impl ServerEvent {
    pub fn conversation_updated(conversation: &Conversation) -> Self {
        Self::ConversationUpdated {
            conversation_id: conversation.id,
            status: conversation.status,
            closed_by: conversation.closed_by,
        }
    }
}

// =============================================================================
// Event Data Structures
// =============================================================================

/// Participant as shown in a room's presence list
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ParticipantView {
    pub principal_id: Uuid,
    pub kind: PrincipalKind,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub online: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
}
