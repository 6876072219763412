//! Postgres implementation of [`ChatStore`]

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use frontdesk_shared::{
    normalize_role, ClientContext, Conversation, InvoiceSummary, Message, NewMessage, Notification,
    NotificationContent, Principal, PrincipalKey, PrincipalKind, SenderKind, StaffMember,
    StoreResult,
};

use super::{snippet_line, ChatStore, CONTEXT_INVOICE_LIMIT, CONTEXT_SNIPPET_LIMIT};

const CONVERSATION_COLUMNS: &str =
    "id, client_id, subject, status, created_at, last_activity_at, closed_by, closed_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_kind, sender_id, sender_name, body, kind, created_at";

const NOTIFICATION_COLUMNS: &str =
    "id, target_kind, target_id, notification_type, title, body, payload, is_read, created_at, read_at";

#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn load_principal(&self, kind: PrincipalKind, id: Uuid) -> StoreResult<Option<Principal>> {
        match kind {
            PrincipalKind::Staff => {
                let row: Option<StaffMember> = sqlx::query_as(
                    "SELECT id, display_name, role FROM staff WHERE id = $1 AND is_active",
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

                Ok(row.map(|staff| Principal::Staff {
                    id: staff.id,
                    role: normalize_role(&staff.role),
                    display_name: staff.display_name,
                }))
            }
            PrincipalKind::Client => {
                let name: Option<String> =
                    sqlx::query_scalar("SELECT name FROM clients WHERE id = $1 AND is_active")
                        .bind(id)
                        .fetch_optional(&self.pool)
                        .await?;

                Ok(name.map(|display_name| Principal::Client { id, display_name }))
            }
        }
    }

    async fn list_support_staff(&self, roles: &[String]) -> StoreResult<Vec<StaffMember>> {
        let staff = sqlx::query_as(
            r#"
            SELECT id, display_name, role
            FROM staff
            WHERE is_active AND lower(btrim(role)) = ANY($1)
            ORDER BY display_name
            "#,
        )
        .bind(roles)
        .fetch_all(&self.pool)
        .await?;

        Ok(staff)
    }

    async fn find_active_conversation(&self, client_id: Uuid) -> StoreResult<Option<Conversation>> {
        let conversation = sqlx::query_as(&format!(
            "SELECT {} FROM conversations WHERE client_id = $1 AND status = 'active'",
            CONVERSATION_COLUMNS
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn insert_conversation(&self, client_id: Uuid, subject: &str) -> StoreResult<Conversation> {
        let mut tx = self.pool.begin().await?;

        // The partial unique index on (client_id) WHERE status = 'active'
        // turns a concurrent duplicate into a 23505 -> StoreError::Conflict.
        let conversation: Conversation = sqlx::query_as(&format!(
            r#"
            INSERT INTO conversations (client_id, subject, status)
            VALUES ($1, $2, 'active')
            RETURNING {}
            "#,
            CONVERSATION_COLUMNS
        ))
        .bind(client_id)
        .bind(subject)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, participant_kind, participant_id)
            VALUES ($1, 'client', $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(conversation.id)
        .bind(client_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        let conversation = sqlx::query_as(&format!(
            "SELECT {} FROM conversations WHERE id = $1",
            CONVERSATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn close_conversation(&self, id: Uuid, staff_id: Uuid) -> StoreResult<Option<Conversation>> {
        let conversation = sqlx::query_as(&format!(
            r#"
            UPDATE conversations
            SET status = 'closed', closed_by = $2, closed_at = NOW()
            WHERE id = $1 AND status = 'active'
            RETURNING {}
            "#,
            CONVERSATION_COLUMNS
        ))
        .bind(id)
        .bind(staff_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn reopen_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        let conversation = sqlx::query_as(&format!(
            r#"
            UPDATE conversations
            SET status = 'active', closed_by = NULL, closed_at = NULL, last_activity_at = NOW()
            WHERE id = $1 AND status = 'closed'
            RETURNING {}
            "#,
            CONVERSATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn touch_conversation(&self, id: Uuid, at: OffsetDateTime) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET last_activity_at = GREATEST(last_activity_at, $2)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_participant(
        &self,
        conversation_id: Uuid,
        participant: PrincipalKey,
        online: bool,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO conversation_participants
                (conversation_id, participant_kind, participant_id, is_online, last_seen_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (conversation_id, participant_kind, participant_id) DO UPDATE SET
              is_online = EXCLUDED.is_online,
              last_seen_at = NOW()
            "#,
        )
        .bind(conversation_id)
        .bind(participant.kind)
        .bind(participant.id)
        .bind(online)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        let row = sqlx::query_as(&format!(
            r#"
            INSERT INTO messages (conversation_id, sender_kind, sender_id, sender_name, body, kind)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(message.conversation_id)
        .bind(message.sender_kind)
        .bind(message.sender_id)
        .bind(&message.sender_name)
        .bind(&message.body)
        .bind(message.kind)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn recent_messages(&self, conversation_id: Uuid, limit: i64) -> StoreResult<Vec<Message>> {
        let mut messages: Vec<Message> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        messages.reverse();
        Ok(messages)
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader: PrincipalKey,
    ) -> StoreResult<OffsetDateTime> {
        let read_at = sqlx::query_scalar(
            r#"
            INSERT INTO conversation_reads (conversation_id, reader_kind, reader_id, last_read_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (conversation_id, reader_kind, reader_id) DO UPDATE SET
              last_read_at = NOW()
            RETURNING last_read_at
            "#,
        )
        .bind(conversation_id)
        .bind(reader.kind)
        .bind(reader.id)
        .fetch_one(&self.pool)
        .await?;

        Ok(read_at)
    }

    async fn client_context(&self, client_id: Uuid) -> StoreResult<Option<ClientContext>> {
        #[derive(FromRow)]
        struct ClientRow {
            name: String,
            client_code: Option<String>,
        }

        #[derive(FromRow)]
        struct SnippetRow {
            sender_kind: SenderKind,
            sender_name: Option<String>,
            body: String,
        }

        let Some(client) = sqlx::query_as::<_, ClientRow>(
            "SELECT name, client_code FROM clients WHERE id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let recent_invoices: Vec<InvoiceSummary> = sqlx::query_as(
            r#"
            SELECT invoice_number AS number, total::float8 AS total, status, due_at
            FROM invoices
            WHERE client_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(client_id)
        .bind(CONTEXT_INVOICE_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let mut snippet: Vec<SnippetRow> = sqlx::query_as(
            r#"
            SELECT m.sender_kind, m.sender_name, m.body
            FROM messages m
            WHERE m.conversation_id = (
              SELECT c.id FROM conversations c
              WHERE c.client_id = $1
              ORDER BY c.last_activity_at DESC
              LIMIT 1
            )
            ORDER BY m.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(client_id)
        .bind(CONTEXT_SNIPPET_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        snippet.reverse();

        Ok(Some(ClientContext {
            name: client.name,
            client_code: client.client_code,
            recent_invoices,
            last_conversation: snippet
                .iter()
                .map(|row| snippet_line(row.sender_kind, row.sender_name.as_deref(), &row.body))
                .collect(),
        }))
    }

    async fn insert_notification(
        &self,
        target: PrincipalKey,
        content: &NotificationContent,
    ) -> StoreResult<Notification> {
        let notification = sqlx::query_as(&format!(
            r#"
            INSERT INTO notifications (target_kind, target_id, notification_type, title, body, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        ))
        .bind(target.kind)
        .bind(target.id)
        .bind(&content.notification_type)
        .bind(&content.title)
        .bind(&content.body)
        .bind(&content.payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(notification)
    }

    async fn list_notifications(
        &self,
        target: PrincipalKey,
        unread_only: bool,
        limit: i64,
    ) -> StoreResult<Vec<Notification>> {
        let notifications = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM notifications
            WHERE target_kind = $1 AND target_id = $2 AND (NOT $3 OR NOT is_read)
            ORDER BY created_at DESC
            LIMIT $4
            "#,
            NOTIFICATION_COLUMNS
        ))
        .bind(target.kind)
        .bind(target.id)
        .bind(unread_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        target: PrincipalKey,
    ) -> StoreResult<Option<Notification>> {
        let notification = sqlx::query_as(&format!(
            r#"
            UPDATE notifications
            SET is_read = TRUE, read_at = COALESCE(read_at, NOW())
            WHERE id = $1 AND target_kind = $2 AND target_id = $3
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .bind(target.kind)
        .bind(target.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(notification)
    }

    async fn mark_all_notifications_read(&self, target: PrincipalKey) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = TRUE, read_at = NOW()
            WHERE target_kind = $1 AND target_id = $2 AND NOT is_read
            "#,
        )
        .bind(target.kind)
        .bind(target.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn clear_notifications(&self, target: PrincipalKey) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE target_kind = $1 AND target_id = $2")
            .bind(target.kind)
            .bind(target.id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
