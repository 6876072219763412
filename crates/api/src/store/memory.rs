//! In-process implementation of [`ChatStore`]
//!
//! Enforces the same constraints as the Postgres schema (one active
//! conversation per client, owner-scoped notifications) so the realtime core
//! behaves identically on top of it.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use frontdesk_shared::{
    normalize_role, ClientContext, Conversation, ConversationStatus, InvoiceSummary, Message, NewMessage,
    Notification, NotificationContent, Principal, PrincipalKey, PrincipalKind, StaffMember,
    StoreError, StoreResult,
};

use super::{snippet_line, ChatStore, CONTEXT_INVOICE_LIMIT, CONTEXT_SNIPPET_LIMIT};

#[derive(Debug, Clone)]
struct ClientRecord {
    name: String,
    client_code: Option<String>,
}

#[derive(Debug, Clone)]
struct ParticipantRecord {
    online: bool,
    last_seen_at: OffsetDateTime,
}

#[derive(Default)]
struct Tables {
    staff: HashMap<Uuid, StaffMember>,
    clients: HashMap<Uuid, ClientRecord>,
    /// Newest last
    invoices: HashMap<Uuid, Vec<InvoiceSummary>>,
    conversations: HashMap<Uuid, Conversation>,
    participants: HashMap<(Uuid, PrincipalKey), ParticipantRecord>,
    /// Insertion order is persistence order
    messages: Vec<Message>,
    reads: HashMap<(Uuid, PrincipalKey), OffsetDateTime>,
    /// Insertion order is creation order
    notifications: Vec<Notification>,
}

#[derive(Default)]
pub struct MemoryChatStore {
    tables: Mutex<Tables>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_staff(&self, id: Uuid, display_name: &str, role: &str) {
        self.tables.lock().await.staff.insert(
            id,
            StaffMember {
                id,
                display_name: display_name.to_string(),
                role: role.to_string(),
            },
        );
    }

    pub async fn add_client(&self, id: Uuid, name: &str, client_code: Option<&str>) {
        self.tables.lock().await.clients.insert(
            id,
            ClientRecord {
                name: name.to_string(),
                client_code: client_code.map(str::to_string),
            },
        );
    }

    pub async fn add_invoice(&self, client_id: Uuid, invoice: InvoiceSummary) {
        self.tables
            .lock()
            .await
            .invoices
            .entry(client_id)
            .or_default()
            .push(invoice);
    }

    /// Every message ever stored for a conversation, in persistence order
    pub async fn messages_in(&self, conversation_id: Uuid) -> Vec<Message> {
        let tables = self.tables.lock().await;
        tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// Every notification addressed to `target`, oldest first
    pub async fn notifications_for(&self, target: PrincipalKey) -> Vec<Notification> {
        let tables = self.tables.lock().await;
        tables
            .notifications
            .iter()
            .filter(|n| n.target_kind == target.kind && n.target_id == target.id)
            .cloned()
            .collect()
    }

    pub async fn participant_online(&self, conversation_id: Uuid, participant: PrincipalKey) -> Option<bool> {
        let tables = self.tables.lock().await;
        tables
            .participants
            .get(&(conversation_id, participant))
            .map(|p| p.online)
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn load_principal(&self, kind: PrincipalKind, id: Uuid) -> StoreResult<Option<Principal>> {
        let tables = self.tables.lock().await;
        Ok(match kind {
            PrincipalKind::Staff => tables.staff.get(&id).map(|staff| Principal::Staff {
                id,
                role: normalize_role(&staff.role),
                display_name: staff.display_name.clone(),
            }),
            PrincipalKind::Client => tables.clients.get(&id).map(|client| Principal::Client {
                id,
                display_name: client.name.clone(),
            }),
        })
    }

    async fn list_support_staff(&self, roles: &[String]) -> StoreResult<Vec<StaffMember>> {
        let tables = self.tables.lock().await;
        let mut staff: Vec<StaffMember> = tables
            .staff
            .values()
            .filter(|s| roles.contains(&normalize_role(&s.role)))
            .cloned()
            .collect();
        staff.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(staff)
    }

    async fn find_active_conversation(&self, client_id: Uuid) -> StoreResult<Option<Conversation>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .conversations
            .values()
            .find(|c| c.client_id == client_id && c.is_active())
            .cloned())
    }

    async fn insert_conversation(&self, client_id: Uuid, subject: &str) -> StoreResult<Conversation> {
        let mut tables = self.tables.lock().await;
        if tables
            .conversations
            .values()
            .any(|c| c.client_id == client_id && c.is_active())
        {
            return Err(StoreError::Conflict(
                "client already has an active conversation".to_string(),
            ));
        }

        let now = OffsetDateTime::now_utc();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            client_id,
            subject: subject.to_string(),
            status: ConversationStatus::Active,
            created_at: now,
            last_activity_at: now,
            closed_by: None,
            closed_at: None,
        };
        tables
            .conversations
            .insert(conversation.id, conversation.clone());
        tables.participants.insert(
            (conversation.id, PrincipalKey::client(client_id)),
            ParticipantRecord {
                online: false,
                last_seen_at: now,
            },
        );

        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        Ok(self.tables.lock().await.conversations.get(&id).cloned())
    }

    async fn close_conversation(&self, id: Uuid, staff_id: Uuid) -> StoreResult<Option<Conversation>> {
        let mut tables = self.tables.lock().await;
        let Some(conversation) = tables.conversations.get_mut(&id) else {
            return Ok(None);
        };
        if !conversation.is_active() {
            return Ok(None);
        }

        conversation.status = ConversationStatus::Closed;
        conversation.closed_by = Some(staff_id);
        conversation.closed_at = Some(OffsetDateTime::now_utc());
        Ok(Some(conversation.clone()))
    }

    async fn reopen_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        let mut tables = self.tables.lock().await;
        let Some(client_id) = tables
            .conversations
            .get(&id)
            .filter(|c| c.status == ConversationStatus::Closed)
            .map(|c| c.client_id)
        else {
            return Ok(None);
        };

        if tables
            .conversations
            .values()
            .any(|c| c.client_id == client_id && c.is_active())
        {
            return Err(StoreError::Conflict(
                "client already has an active conversation".to_string(),
            ));
        }

        let Some(conversation) = tables.conversations.get_mut(&id) else {
            return Ok(None);
        };
        conversation.status = ConversationStatus::Active;
        conversation.closed_by = None;
        conversation.closed_at = None;
        conversation.last_activity_at = conversation.last_activity_at.max(OffsetDateTime::now_utc());
        Ok(Some(conversation.clone()))
    }

    async fn touch_conversation(&self, id: Uuid, at: OffsetDateTime) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(conversation) = tables.conversations.get_mut(&id) {
            conversation.last_activity_at = conversation.last_activity_at.max(at);
        }
        Ok(())
    }

    async fn upsert_participant(
        &self,
        conversation_id: Uuid,
        participant: PrincipalKey,
        online: bool,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.participants.insert(
            (conversation_id, participant),
            ParticipantRecord {
                online,
                last_seen_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(())
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        let mut tables = self.tables.lock().await;
        if !tables.conversations.contains_key(&message.conversation_id) {
            return Err(StoreError::Corrupt(format!(
                "conversation {} does not exist",
                message.conversation_id
            )));
        }

        let stored = Message {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            sender_kind: message.sender_kind,
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            body: message.body,
            kind: message.kind,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.messages.push(stored.clone());
        Ok(stored)
    }

    async fn recent_messages(&self, conversation_id: Uuid, limit: i64) -> StoreResult<Vec<Message>> {
        let tables = self.tables.lock().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .rev()
            .filter(|m| m.conversation_id == conversation_id)
            .take(limit)
            .cloned()
            .collect();
        messages.reverse();
        Ok(messages)
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader: PrincipalKey,
    ) -> StoreResult<OffsetDateTime> {
        let now = OffsetDateTime::now_utc();
        self.tables
            .lock()
            .await
            .reads
            .insert((conversation_id, reader), now);
        Ok(now)
    }

    async fn client_context(&self, client_id: Uuid) -> StoreResult<Option<ClientContext>> {
        let tables = self.tables.lock().await;
        let Some(client) = tables.clients.get(&client_id) else {
            return Ok(None);
        };

        let recent_invoices = tables
            .invoices
            .get(&client_id)
            .map(|invoices| {
                invoices
                    .iter()
                    .rev()
                    .take(CONTEXT_INVOICE_LIMIT as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let last_conversation = tables
            .conversations
            .values()
            .filter(|c| c.client_id == client_id)
            .max_by_key(|c| c.last_activity_at)
            .map(|conversation| {
                let mut lines: Vec<String> = tables
                    .messages
                    .iter()
                    .rev()
                    .filter(|m| m.conversation_id == conversation.id)
                    .take(CONTEXT_SNIPPET_LIMIT as usize)
                    .map(|m| snippet_line(m.sender_kind, m.sender_name.as_deref(), &m.body))
                    .collect();
                lines.reverse();
                lines
            })
            .unwrap_or_default();

        Ok(Some(ClientContext {
            name: client.name.clone(),
            client_code: client.client_code.clone(),
            recent_invoices,
            last_conversation,
        }))
    }

    async fn insert_notification(
        &self,
        target: PrincipalKey,
        content: &NotificationContent,
    ) -> StoreResult<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            target_kind: target.kind,
            target_id: target.id,
            notification_type: content.notification_type.clone(),
            title: content.title.clone(),
            body: content.body.clone(),
            payload: content.payload.clone(),
            read: false,
            created_at: OffsetDateTime::now_utc(),
            read_at: None,
        };
        self.tables
            .lock()
            .await
            .notifications
            .push(notification.clone());
        Ok(notification)
    }

    async fn list_notifications(
        &self,
        target: PrincipalKey,
        unread_only: bool,
        limit: i64,
    ) -> StoreResult<Vec<Notification>> {
        let tables = self.tables.lock().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(tables
            .notifications
            .iter()
            .rev()
            .filter(|n| n.target_kind == target.kind && n.target_id == target.id)
            .filter(|n| !unread_only || !n.read)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        target: PrincipalKey,
    ) -> StoreResult<Option<Notification>> {
        let mut tables = self.tables.lock().await;
        let Some(notification) = tables
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.target_kind == target.kind && n.target_id == target.id)
        else {
            return Ok(None);
        };

        notification.read = true;
        notification.read_at.get_or_insert_with(OffsetDateTime::now_utc);
        Ok(Some(notification.clone()))
    }

    async fn mark_all_notifications_read(&self, target: PrincipalKey) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let now = OffsetDateTime::now_utc();
        let mut updated = 0;
        for notification in tables
            .notifications
            .iter_mut()
            .filter(|n| n.target_kind == target.kind && n.target_id == target.id && !n.read)
        {
            notification.read = true;
            notification.read_at = Some(now);
            updated += 1;
        }
        Ok(updated)
    }

    async fn clear_notifications(&self, target: PrincipalKey) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.notifications.len();
        tables
            .notifications
            .retain(|n| !(n.target_kind == target.kind && n.target_id == target.id));
        Ok((before - tables.notifications.len()) as u64)
    }
}
