//! Domain types shared by the realtime core and the HTTP surface

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Principals
// =============================================================================

/// Which side of the desk an authenticated actor sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    Staff,
    Client,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Client => "client",
        }
    }
}

impl std::str::FromStr for PrincipalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "staff" => Ok(Self::Staff),
            "client" => Ok(Self::Client),
            _ => Err(format!("Invalid principal kind: {}", s)),
        }
    }
}

/// Hashable identity of a principal (staff and client ids live in different tables)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalKey {
    pub kind: PrincipalKind,
    pub id: Uuid,
}

impl PrincipalKey {
    pub fn staff(id: Uuid) -> Self {
        Self {
            kind: PrincipalKind::Staff,
            id,
        }
    }

    pub fn client(id: Uuid) -> Self {
        Self {
            kind: PrincipalKind::Client,
            id,
        }
    }
}

/// Canonical form of a staff role: trimmed and lowercase
pub fn normalize_role(role: &str) -> String {
    role.trim().to_lowercase()
}

/// An authenticated actor. Fixed for the lifetime of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Principal {
    Staff {
        id: Uuid,
        role: String,
        display_name: String,
    },
    Client {
        id: Uuid,
        display_name: String,
    },
}

impl Principal {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Staff { id, .. } | Self::Client { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        match self {
            Self::Staff { .. } => PrincipalKind::Staff,
            Self::Client { .. } => PrincipalKind::Client,
        }
    }

    pub fn key(&self) -> PrincipalKey {
        PrincipalKey {
            kind: self.kind(),
            id: self.id(),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::Staff { display_name, .. } | Self::Client { display_name, .. } => display_name,
        }
    }

    /// Staff role, `None` for clients
    pub fn role(&self) -> Option<&str> {
        match self {
            Self::Staff { role, .. } => Some(role),
            Self::Client { .. } => None,
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Self::Staff { .. })
    }
}

/// Staff directory entry used for notification fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct StaffMember {
    pub id: Uuid,
    pub display_name: String,
    pub role: String,
}

// =============================================================================
// Conversations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

/// A support thread owned by exactly one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub client_id: Uuid,
    pub subject: String,
    pub status: ConversationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: OffsetDateTime,
    pub closed_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
}

impl Conversation {
    pub fn is_active(&self) -> bool {
        self.status == ConversationStatus::Active
    }
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    Staff,
    Client,
    Assistant,
}

impl From<PrincipalKind> for SenderKind {
    fn from(kind: PrincipalKind) -> Self {
        match kind {
            PrincipalKind::Staff => Self::Staff,
            PrincipalKind::Client => Self::Client,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    System,
}

/// Persisted chat message. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_kind: SenderKind,
    /// `None` for assistant messages
    pub sender_id: Option<Uuid>,
    pub sender_name: Option<String>,
    pub body: String,
    pub kind: MessageKind,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Insert payload for a message; the store assigns id and timestamp
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_kind: SenderKind,
    pub sender_id: Option<Uuid>,
    pub sender_name: Option<String>,
    pub body: String,
    pub kind: MessageKind,
}

// =============================================================================
// Notifications
// =============================================================================

/// Persisted notification addressed to one principal
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub target_kind: PrincipalKind,
    pub target_id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    #[sqlx(rename = "is_read")]
    pub read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
}

/// Content of a notification before it is addressed and persisted
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotificationContent {
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

// =============================================================================
// Assistant context
// =============================================================================

/// Short invoice line handed to the assistant
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct InvoiceSummary {
    pub number: String,
    pub total: f64,
    pub status: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub due_at: Option<OffsetDateTime>,
}

/// Everything the assistant is allowed to know about a client
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ClientContext {
    pub name: String,
    pub client_code: Option<String>,
    pub recent_invoices: Vec<InvoiceSummary>,
    /// Oldest first, already rendered as "Sender: body"
    pub last_conversation: Vec<String>,
}
