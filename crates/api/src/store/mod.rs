//! Data access for the chat core
//!
//! The realtime components only talk to storage through [`ChatStore`].
//! [`PgChatStore`] is the production implementation; [`MemoryChatStore`]
//! backs tests and local runs without a database.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use frontdesk_shared::{
    ClientContext, Conversation, Message, NewMessage, Notification, NotificationContent, Principal,
    PrincipalKey, PrincipalKind, SenderKind, StaffMember, StoreResult,
};

mod memory;
mod postgres;

pub use memory::MemoryChatStore;
pub use postgres::PgChatStore;

/// Invoices handed to the assistant
pub const CONTEXT_INVOICE_LIMIT: i64 = 5;

/// Messages of the last conversation handed to the assistant
pub const CONTEXT_SNIPPET_LIMIT: i64 = 6;

#[async_trait]
pub trait ChatStore: Send + Sync {
    // Principals

    /// Display record of an active staff member or client
    async fn load_principal(&self, kind: PrincipalKind, id: Uuid) -> StoreResult<Option<Principal>>;

    /// Active staff whose role is in `roles`
    async fn list_support_staff(&self, roles: &[String]) -> StoreResult<Vec<StaffMember>>;

    // Conversations

    async fn find_active_conversation(&self, client_id: Uuid) -> StoreResult<Option<Conversation>>;

    /// Insert an active conversation. Fails with `StoreError::Conflict` when the
    /// client already has one.
    async fn insert_conversation(&self, client_id: Uuid, subject: &str) -> StoreResult<Conversation>;

    async fn get_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>>;

    /// Active -> Closed. `None` when the conversation is missing or not active.
    async fn close_conversation(&self, id: Uuid, staff_id: Uuid) -> StoreResult<Option<Conversation>>;

    /// Closed -> Active. `None` when the conversation is missing or not closed.
    async fn reopen_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>>;

    /// Move `last_activity_at` forward to `at`; never moves it back
    async fn touch_conversation(&self, id: Uuid, at: OffsetDateTime) -> StoreResult<()>;

    /// Durable participant row; inserted on first sight, presence flag updated afterwards
    async fn upsert_participant(
        &self,
        conversation_id: Uuid,
        participant: PrincipalKey,
        online: bool,
    ) -> StoreResult<()>;

    // Messages

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message>;

    /// Latest `limit` messages, oldest first
    async fn recent_messages(&self, conversation_id: Uuid, limit: i64) -> StoreResult<Vec<Message>>;

    /// Record that `reader` has read everything up to now
    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader: PrincipalKey,
    ) -> StoreResult<OffsetDateTime>;

    // Assistant

    async fn client_context(&self, client_id: Uuid) -> StoreResult<Option<ClientContext>>;

    // Notifications

    async fn insert_notification(
        &self,
        target: PrincipalKey,
        content: &NotificationContent,
    ) -> StoreResult<Notification>;

    /// Newest first
    async fn list_notifications(
        &self,
        target: PrincipalKey,
        unread_only: bool,
        limit: i64,
    ) -> StoreResult<Vec<Notification>>;

    /// `None` when the id does not exist or belongs to someone else
    async fn mark_notification_read(
        &self,
        id: Uuid,
        target: PrincipalKey,
    ) -> StoreResult<Option<Notification>>;

    async fn mark_all_notifications_read(&self, target: PrincipalKey) -> StoreResult<u64>;

    async fn clear_notifications(&self, target: PrincipalKey) -> StoreResult<u64>;
}

/// Render one line of conversation history for the assistant prompt
pub(crate) fn snippet_line(sender_kind: SenderKind, sender_name: Option<&str>, body: &str) -> String {
    let who = match (sender_kind, sender_name) {
        (SenderKind::Assistant, _) => "Assistant",
        (_, Some(name)) if !name.is_empty() => name,
        (SenderKind::Staff, _) => "Staff",
        (SenderKind::Client, _) => "Client",
    };
    format!("{}: {}", who, body)
}
