//! Conversation room management
//!
//! Owns the in-memory membership of every conversation room, the lifecycle of
//! conversations (create, close, reopen), and the ordered path through which
//! every message is persisted and fanned out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use frontdesk_shared::{
    Conversation, Message, MessageKind, NewMessage, Principal, PrincipalKey, SenderKind, StoreError,
};

use crate::store::ChatStore;

use super::access::AccessPolicy;
use super::connection::Connection;
use super::error::{ChatError, ChatResult};
use super::events::{ParticipantView, ServerEvent};
use super::locks::KeyedLocks;

/// Upper bound for a conversation subject
pub const MAX_SUBJECT_CHARS: usize = 200;

const DEFAULT_SUBJECT: &str = "Support request";

/// Principal-level state inside one room
#[derive(Debug, Clone)]
struct ParticipantState {
    principal: Principal,
    online: bool,
    last_seen_at: OffsetDateTime,
}

impl ParticipantState {
    fn view(&self) -> ParticipantView {
        ParticipantView {
            principal_id: self.principal.id(),
            kind: self.principal.kind(),
            display_name: self.principal.display_name().to_string(),
            role: self.principal.role().map(str::to_string),
            online: self.online,
            last_seen_at: self.last_seen_at,
        }
    }
}

#[derive(Default)]
struct Room {
    /// Joined connections by connection id
    members: HashMap<Uuid, Arc<Connection>>,
    participants: HashMap<PrincipalKey, ParticipantState>,
}

impl Room {
    fn has_connection_of(&self, key: &PrincipalKey) -> bool {
        self.members.values().any(|c| c.principal.key() == *key)
    }

    fn snapshot(&self) -> Vec<ParticipantView> {
        let mut views: Vec<ParticipantView> =
            self.participants.values().map(ParticipantState::view).collect();
        views.sort_by(|a, b| {
            b.online
                .cmp(&a.online)
                .then_with(|| b.last_seen_at.cmp(&a.last_seen_at))
        });
        views
    }
}

/// Manages conversation rooms
pub struct RoomManager {
    store: Arc<dyn ChatStore>,
    policy: Arc<AccessPolicy>,
    /// Map of conversation_id -> room
    rooms: Arc<RwLock<HashMap<Uuid, Room>>>,
    /// Serializes persist + fan-out per conversation
    ordering: KeyedLocks,
    /// Serializes create-or-reuse per client
    creation: KeyedLocks,
}

impl RoomManager {
    pub fn new(store: Arc<dyn ChatStore>, policy: Arc<AccessPolicy>) -> Self {
        Self {
            store,
            policy,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            ordering: KeyedLocks::new(),
            creation: KeyedLocks::new(),
        }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    // =========================================================================
    // Conversation lifecycle
    // =========================================================================

    /// Return the client's active conversation, creating it if there is none
    pub async fn create_or_reuse_conversation(
        &self,
        client: &Principal,
        subject: &str,
    ) -> ChatResult<Conversation> {
        if !self.policy.can_open_conversation(client) {
            return Err(ChatError::AccessDenied("only clients can open conversations"));
        }
        let subject = normalize_subject(subject)?;
        let client_id = client.id();

        let _guard = self.creation.acquire(client_id).await;

        if let Some(existing) = self.store.find_active_conversation(client_id).await? {
            tracing::debug!(
                conversation_id = %existing.id,
                client_id = %client_id,
                "Reusing active conversation"
            );
            return Ok(existing);
        }

        match self.store.insert_conversation(client_id, &subject).await {
            Ok(conversation) => {
                tracing::info!(
                    conversation_id = %conversation.id,
                    client_id = %client_id,
                    subject = %conversation.subject,
                    "Conversation created"
                );
                Ok(conversation)
            }
            // Another process won the race; the unique index kept it single
            Err(StoreError::Conflict(_)) => self
                .store
                .find_active_conversation(client_id)
                .await?
                .ok_or(ChatError::NotFound("Conversation")),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_conversation(&self, conversation_id: Uuid) -> ChatResult<Conversation> {
        self.store
            .get_conversation(conversation_id)
            .await?
            .ok_or(ChatError::NotFound("Conversation"))
    }

    pub fn check_access(&self, principal: &Principal, conversation: &Conversation) -> bool {
        self.policy.can_access(principal, conversation)
    }

    /// Load a conversation the principal is allowed to see
    pub async fn authorize(&self, principal: &Principal, conversation_id: Uuid) -> ChatResult<Conversation> {
        let conversation = self.get_conversation(conversation_id).await?;
        if !self.check_access(principal, &conversation) {
            tracing::warn!(
                conversation_id = %conversation_id,
                principal_id = %principal.id(),
                kind = principal.kind().as_str(),
                "Conversation access denied"
            );
            return Err(ChatError::AccessDenied("conversation"));
        }
        Ok(conversation)
    }

    /// Active -> Closed, with a system message marking the transition
    pub async fn close(&self, conversation_id: Uuid, staff: &Principal) -> ChatResult<Conversation> {
        if !self.policy.can_moderate(staff) {
            return Err(ChatError::AccessDenied("only support staff can close conversations"));
        }

        let Some(conversation) = self.store.close_conversation(conversation_id, staff.id()).await? else {
            self.get_conversation(conversation_id).await?;
            return Err(ChatError::InvalidTransition("Conversation is already closed"));
        };

        tracing::info!(
            conversation_id = %conversation_id,
            staff_id = %staff.id(),
            "Conversation closed"
        );

        self.append_message(system_message(
            conversation_id,
            staff,
            format!("Conversation closed by {}", staff.display_name()),
        ))
        .await?;
        self.broadcast(&conversation_id, ServerEvent::conversation_updated(&conversation))
            .await;

        Ok(conversation)
    }

    /// Closed -> Active, with a system message marking the transition
    pub async fn reopen(&self, conversation_id: Uuid, staff: &Principal) -> ChatResult<Conversation> {
        if !self.policy.can_moderate(staff) {
            return Err(ChatError::AccessDenied("only support staff can reopen conversations"));
        }

        let conversation = match self.store.reopen_conversation(conversation_id).await {
            Ok(Some(conversation)) => conversation,
            Ok(None) => {
                self.get_conversation(conversation_id).await?;
                return Err(ChatError::InvalidTransition("Conversation is already active"));
            }
            Err(StoreError::Conflict(_)) => {
                return Err(ChatError::InvalidTransition(
                    "Client already has another active conversation",
                ));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            conversation_id = %conversation_id,
            staff_id = %staff.id(),
            "Conversation reopened"
        );

        self.append_message(system_message(
            conversation_id,
            staff,
            format!("Conversation reopened by {}", staff.display_name()),
        ))
        .await?;
        self.broadcast(&conversation_id, ServerEvent::conversation_updated(&conversation))
            .await;

        Ok(conversation)
    }

    /// Persist a message and fan it out to the room.
    ///
    /// Holds the conversation's ordering lock across insert and broadcast, so
    /// room members observe messages in persistence order.
    pub async fn append_message(&self, message: NewMessage) -> ChatResult<Message> {
        let conversation_id = message.conversation_id;
        let _guard = self.ordering.acquire(conversation_id).await;

        let message = self.store.insert_message(message).await?;

        if let Err(e) = self
            .store
            .touch_conversation(conversation_id, message.created_at)
            .await
        {
            tracing::error!(
                error = ?e,
                conversation_id = %conversation_id,
                "Failed to bump conversation activity"
            );
        }

        self.broadcast(
            &conversation_id,
            ServerEvent::NewMessage {
                message: message.clone(),
            },
        )
        .await;

        Ok(message)
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Add a connection to a conversation room and return the participant snapshot
    pub async fn join(&self, conn: &Arc<Connection>, conversation_id: Uuid) -> ChatResult<Vec<ParticipantView>> {
        self.authorize(&conn.principal, conversation_id).await?;

        conn.touch().await;
        conn.subscribe(conversation_id).await;

        let key = conn.principal.key();
        let now = OffsetDateTime::now_utc();
        let (snapshot, joiner_view, peers, came_online) = {
            let mut rooms = self.rooms.write().await;
            let room = rooms.entry(conversation_id).or_default();
            // Another tab of the same principal already made it present
            let was_present = room.has_connection_of(&key);
            room.members.insert(conn.id, Arc::clone(conn));
            let came_online = !was_present;

            let participant = room
                .participants
                .entry(key)
                .or_insert_with(|| ParticipantState {
                    principal: conn.principal.clone(),
                    online: true,
                    last_seen_at: now,
                });
            participant.online = true;
            participant.last_seen_at = now;
            let joiner_view = participant.view();

            let peers: Vec<Arc<Connection>> = room
                .members
                .values()
                .filter(|c| c.id != conn.id)
                .cloned()
                .collect();

            tracing::debug!(
                conversation_id = %conversation_id,
                connection_id = %conn.id,
                room_size = room.members.len(),
                "Connection joined conversation room"
            );

            (room.snapshot(), joiner_view, peers, came_online)
        };

        if came_online {
            self.persist_participant(conversation_id, key, true).await;
            let event = ServerEvent::UserJoined {
                conversation_id,
                participant: joiner_view,
            };
            send_all(&peers, &event);
        }

        let _ = conn.send(ServerEvent::ConversationJoined {
            conversation_id,
            online_participants: snapshot.clone(),
        });

        Ok(snapshot)
    }

    /// Remove a connection from a conversation room. Leaving a room the
    /// connection never joined is a no-op.
    pub async fn leave(&self, conn: &Connection, conversation_id: Uuid) {
        conn.unsubscribe(conversation_id).await;

        let key = conn.principal.key();
        let (remaining, offline) = {
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get_mut(&conversation_id) else {
                return;
            };
            if room.members.remove(&conn.id).is_none() {
                return;
            }

            let offline = !room.has_connection_of(&key);
            if offline {
                if let Some(participant) = room.participants.get_mut(&key) {
                    participant.online = false;
                    participant.last_seen_at = OffsetDateTime::now_utc();
                }
            }

            let remaining: Vec<Arc<Connection>> = room.members.values().cloned().collect();

            // Clean up empty rooms
            if room.members.is_empty() {
                rooms.remove(&conversation_id);
                tracing::debug!(
                    conversation_id = %conversation_id,
                    "Removed empty conversation room"
                );
            } else {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    connection_id = %conn.id,
                    room_size = remaining.len(),
                    "Connection left conversation room"
                );
            }

            (remaining, offline)
        };

        if offline {
            self.persist_participant(conversation_id, key, false).await;
        }

        let event = ServerEvent::UserLeft {
            conversation_id,
            principal_id: key.id,
            kind: key.kind,
            offline,
        };
        send_all(&remaining, &event);
    }

    /// Remove a connection from all rooms (disconnect cleanup)
    pub async fn remove_connection(&self, conn: &Connection) {
        let conversations = conn.get_subscriptions().await;
        for conversation_id in &conversations {
            self.leave(conn, *conversation_id).await;
        }

        if !conversations.is_empty() {
            tracing::debug!(
                connection_id = %conn.id,
                conversation_count = conversations.len(),
                "Removed connection from rooms"
            );
        }
    }

    /// Participants of a room, online first, then most recently seen
    pub async fn list_online_participants(&self, conversation_id: &Uuid) -> Vec<ParticipantView> {
        let rooms = self.rooms.read().await;
        rooms
            .get(conversation_id)
            .map(Room::snapshot)
            .unwrap_or_default()
    }

    /// Connections currently joined to a room
    pub async fn room_members(&self, conversation_id: &Uuid) -> Vec<Arc<Connection>> {
        let rooms = self.rooms.read().await;
        rooms
            .get(conversation_id)
            .map(|room| room.members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_member(&self, conversation_id: &Uuid, connection_id: &Uuid) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(conversation_id)
            .is_some_and(|room| room.members.contains_key(connection_id))
    }

    /// Principals with at least one connection joined to the room
    pub async fn online_participants(&self, conversation_id: &Uuid) -> HashSet<PrincipalKey> {
        let rooms = self.rooms.read().await;
        rooms
            .get(conversation_id)
            .map(|room| room.members.values().map(|c| c.principal.key()).collect())
            .unwrap_or_default()
    }

    /// Refresh the participant's last-seen stamp after activity in the room
    pub async fn mark_active(&self, conversation_id: &Uuid, key: &PrincipalKey) {
        let mut rooms = self.rooms.write().await;
        if let Some(participant) = rooms
            .get_mut(conversation_id)
            .and_then(|room| room.participants.get_mut(key))
        {
            participant.last_seen_at = OffsetDateTime::now_utc();
        }
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    /// Broadcast an event to all connections in a conversation room
    ///
    /// Silently ignores send errors (closed connections will be cleaned up)
    pub async fn broadcast(&self, conversation_id: &Uuid, event: ServerEvent) -> usize {
        self.broadcast_except(conversation_id, None, event).await
    }

    /// Broadcast to a room, skipping one connection
    pub async fn broadcast_except(
        &self,
        conversation_id: &Uuid,
        except: Option<Uuid>,
        event: ServerEvent,
    ) -> usize {
        let members: Vec<Arc<Connection>> = {
            let rooms = self.rooms.read().await;
            match rooms.get(conversation_id) {
                Some(room) => room
                    .members
                    .values()
                    .filter(|c| Some(c.id) != except)
                    .cloned()
                    .collect(),
                None => return 0,
            }
        };

        let delivered = send_all(&members, &event);
        tracing::debug!(
            conversation_id = %conversation_id,
            recipients = delivered,
            failed = members.len() - delivered,
            "Broadcast event to conversation room"
        );
        delivered
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    async fn persist_participant(&self, conversation_id: Uuid, key: PrincipalKey, online: bool) {
        if let Err(e) = self.store.upsert_participant(conversation_id, key, online).await {
            tracing::error!(
                error = ?e,
                conversation_id = %conversation_id,
                principal_id = %key.id,
                online,
                "Failed to persist participant presence"
            );
        }
    }
}

fn normalize_subject(subject: &str) -> ChatResult<String> {
    let subject = subject.trim();
    if subject.is_empty() {
        return Ok(DEFAULT_SUBJECT.to_string());
    }
    if subject.chars().count() > MAX_SUBJECT_CHARS {
        return Err(ChatError::Validation(format!(
            "Subject cannot exceed {} characters",
            MAX_SUBJECT_CHARS
        )));
    }
    Ok(subject.to_string())
}

fn system_message(conversation_id: Uuid, actor: &Principal, body: String) -> NewMessage {
    NewMessage {
        conversation_id,
        sender_kind: SenderKind::from(actor.kind()),
        sender_id: Some(actor.id()),
        sender_name: Some(actor.display_name().to_string()),
        body,
        kind: MessageKind::System,
    }
}

/// Push an event to every connection, returning how many accepted it
fn send_all(conns: &[Arc<Connection>], event: &ServerEvent) -> usize {
    let mut delivered = 0;
    for conn in conns {
        match conn.send(event.clone()) {
            Ok(()) => delivered += 1,
            Err(_) => {
                tracing::warn!(
                    connection_id = %conn.id,
                    "Failed to send event to connection (likely closed)"
                );
            }
        }
    }
    delivered
}
