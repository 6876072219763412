//! End-to-end chat scenarios against the in-memory store
//!
//! Connections are plain mpsc channels; every event a socket would have seen
//! lands on the receiver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use frontdesk_api::assistant::{
    AssistantError, AssistantGate, AssistantSettings, CompletionBackend, PromptMessage, SuggestedAction,
};
use frontdesk_api::auth::{TokenVerifier, VerifiedIdentity};
use frontdesk_api::realtime::{AccessPolicy, ChatError, ChatHub, ClientEvent, Connection, ServerEvent};
use frontdesk_api::store::MemoryChatStore;
use frontdesk_shared::{
    ClientContext, ConversationStatus, MessageKind, Principal, PrincipalKey, PrincipalKind, SenderKind,
};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Default)]
struct TokenTable(HashMap<String, VerifiedIdentity>);

impl TokenVerifier for TokenTable {
    fn verify(&self, token: &str) -> Option<VerifiedIdentity> {
        self.0.get(token).cloned()
    }
}

/// Backend that counts calls and either answers or fails
struct CountingBackend {
    calls: AtomicUsize,
    answer: Option<String>,
}

impl CountingBackend {
    fn answering(text: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            answer: Some(text.to_string()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            answer: None,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for CountingBackend {
    async fn complete(
        &self,
        _system_prompt: &str,
        _messages: &[PromptMessage],
        _max_tokens: u32,
    ) -> Result<String, AssistantError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
            .clone()
            .ok_or_else(|| AssistantError::Malformed("backend unavailable".to_string()))
    }
}

struct Desk {
    hub: ChatHub,
    store: Arc<MemoryChatStore>,
}

impl Desk {
    fn new() -> Self {
        let store = Arc::new(MemoryChatStore::new());
        let hub = ChatHub::new(
            store.clone(),
            Arc::new(TokenTable::default()),
            AccessPolicy::new(["admin", "reception"]),
        );
        Self { hub, store }
    }

    fn with_assistant(backend: Arc<CountingBackend>) -> Self {
        let desk = Self::new();
        let hub = desk.hub.with_assistant(backend, AssistantSettings::default());
        Self {
            hub,
            store: desk.store,
        }
    }

    async fn staff(&self, name: &str, role: &str) -> Principal {
        let id = Uuid::new_v4();
        self.store.add_staff(id, name, role).await;
        Principal::Staff {
            id,
            role: role.to_string(),
            display_name: name.to_string(),
        }
    }

    async fn client(&self, name: &str) -> Principal {
        let id = Uuid::new_v4();
        self.store.add_client(id, name, Some("C-1001")).await;
        Principal::Client {
            id,
            display_name: name.to_string(),
        }
    }

    /// Connect a principal and discard the authentication handshake
    async fn connect(&self, principal: Principal) -> (Arc<Connection>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = self.hub.connect(principal, tx).await;
        drain(&mut rx);
        (conn, rx)
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn new_message_bodies(events: &[ServerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::NewMessage { message } => Some(message.body.clone()),
            _ => None,
        })
        .collect()
}

fn send(conversation_id: Uuid, body: &str) -> ClientEvent {
    ClientEvent::SendMessage {
        conversation_id,
        body: body.to_string(),
        kind: MessageKind::Text,
    }
}

// =============================================================================
// Invariants
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_create_yields_one_active_conversation() {
    let desk = Desk::new();
    let client = desk.client("Mr. Smith").await;
    let rooms = Arc::clone(desk.hub.rooms());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let rooms = Arc::clone(&rooms);
            let client = client.clone();
            tokio::spawn(async move { rooms.create_or_reuse_conversation(&client, "Billing").await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn closing_twice_reports_error_without_duplicate_system_message() {
    let desk = Desk::new();
    let staff = desk.staff("Ana", "reception").await;
    let client = desk.client("Mr. Smith").await;
    let conversation = desk
        .hub
        .rooms()
        .create_or_reuse_conversation(&client, "Billing")
        .await
        .unwrap();

    desk.hub.rooms().close(conversation.id, &staff).await.unwrap();
    let err = desk.hub.rooms().close(conversation.id, &staff).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidTransition(_)));

    let system_messages = desk
        .store
        .messages_in(conversation.id)
        .await
        .into_iter()
        .filter(|m| m.kind == MessageKind::System)
        .count();
    assert_eq!(system_messages, 1);
}

#[tokio::test]
async fn last_activity_follows_every_message() {
    let desk = Desk::new();
    let client = desk.client("Mr. Smith").await;
    let (conn, _rx) = desk.connect(client.clone()).await;
    let conversation = desk
        .hub
        .rooms()
        .create_or_reuse_conversation(&client, "Towels")
        .await
        .unwrap();

    for body in ["first", "second", "third"] {
        let message = desk
            .hub
            .broadcaster()
            .send(&conn, conversation.id, body, MessageKind::Text)
            .await
            .unwrap();
        let current = desk.hub.rooms().get_conversation(conversation.id).await.unwrap();
        assert!(current.last_activity_at >= message.created_at);
    }
}

#[tokio::test]
async fn broadcast_reaches_exactly_the_room_members() {
    let desk = Desk::new();
    let staff = desk.staff("Ana", "reception").await;
    let client = desk.client("Mr. Smith").await;
    let other_client = desk.client("Ms. Jones").await;

    let conversation = desk
        .hub
        .rooms()
        .create_or_reuse_conversation(&client, "Billing")
        .await
        .unwrap();

    let (client_conn, mut client_rx) = desk.connect(client).await;
    let (staff_conn, mut staff_rx) = desk.connect(staff).await;
    let (_idle_staff_conn, mut idle_staff_rx) = desk.connect(desk.staff("Bo", "admin").await).await;
    let (_other_conn, mut other_rx) = desk.connect(other_client).await;

    desk.hub
        .dispatch(&client_conn, ClientEvent::JoinConversation { conversation_id: conversation.id })
        .await;
    desk.hub
        .dispatch(&staff_conn, ClientEvent::JoinConversation { conversation_id: conversation.id })
        .await;
    drain(&mut client_rx);
    drain(&mut staff_rx);

    desk.hub.dispatch(&client_conn, send(conversation.id, "Hello?")).await;

    assert_eq!(new_message_bodies(&drain(&mut client_rx)), vec!["Hello?"]);
    assert_eq!(new_message_bodies(&drain(&mut staff_rx)), vec!["Hello?"]);
    assert!(new_message_bodies(&drain(&mut idle_staff_rx)).is_empty());
    assert!(drain(&mut other_rx).is_empty());

    let members: Vec<Uuid> = desk
        .hub
        .rooms()
        .room_members(&conversation.id)
        .await
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(members.len(), 2);
    assert!(members.contains(&client_conn.id));
    assert!(members.contains(&staff_conn.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_sends_arrive_in_persistence_order() {
    let desk = Arc::new(Desk::new());
    let staff = desk.staff("Ana", "reception").await;
    let client = desk.client("Mr. Smith").await;
    let conversation = desk
        .hub
        .rooms()
        .create_or_reuse_conversation(&client, "Billing")
        .await
        .unwrap();

    let (client_conn, mut client_rx) = desk.connect(client).await;
    let (staff_conn, mut staff_rx) = desk.connect(staff).await;
    for conn in [&client_conn, &staff_conn] {
        desk.hub
            .dispatch(conn, ClientEvent::JoinConversation { conversation_id: conversation.id })
            .await;
    }
    drain(&mut client_rx);
    drain(&mut staff_rx);
    let already_stored = desk.store.messages_in(conversation.id).await.len();

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let desk = Arc::clone(&desk);
            let conn = if i % 2 == 0 {
                Arc::clone(&client_conn)
            } else {
                Arc::clone(&staff_conn)
            };
            let conversation_id = conversation.id;
            tokio::spawn(async move {
                desk.hub
                    .dispatch(&conn, send(conversation_id, &format!("message {}", i)))
                    .await;
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let persisted: Vec<Uuid> = desk
        .store
        .messages_in(conversation.id)
        .await
        .iter()
        .skip(already_stored)
        .map(|m| m.id)
        .collect();
    assert_eq!(persisted.len(), 20);

    for rx in [&mut client_rx, &mut staff_rx] {
        let received: Vec<Uuid> = drain(rx)
            .iter()
            .filter_map(|event| match event {
                ServerEvent::NewMessage { message } => Some(message.id),
                _ => None,
            })
            .collect();
        assert_eq!(received, persisted);
    }
}

#[tokio::test]
async fn message_length_boundaries() {
    let desk = Desk::new();
    let client = desk.client("Mr. Smith").await;
    let (conn, mut rx) = desk.connect(client.clone()).await;
    let conversation = desk
        .hub
        .rooms()
        .create_or_reuse_conversation(&client, "Billing")
        .await
        .unwrap();
    let broadcaster = desk.hub.broadcaster();

    let exact = "é".repeat(2000);
    assert!(broadcaster
        .send(&conn, conversation.id, &exact, MessageKind::Text)
        .await
        .is_ok());

    let too_long = "a".repeat(2001);
    assert!(matches!(
        broadcaster
            .send(&conn, conversation.id, &too_long, MessageKind::Text)
            .await,
        Err(ChatError::Validation(_))
    ));

    desk.hub.dispatch(&conn, send(conversation.id, " \n\t ")).await;
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [ServerEvent::Error { .. }]
    ));

    assert_eq!(desk.store.messages_in(conversation.id).await.len(), 1);
}

// =============================================================================
// Assistant gate
// =============================================================================

#[tokio::test]
async fn gate_stays_quiet_while_staff_are_active() {
    let desk = Desk::new();
    let backend = CountingBackend::answering("Happy to help");
    let gate = AssistantGate::new(
        Arc::clone(desk.hub.presence()),
        backend.clone(),
        AssistantSettings::default(),
    );

    let (_staff_conn, _rx) = desk.connect(desk.staff("Ana", "reception").await).await;

    for _ in 0..3 {
        assert!(gate
            .get_response("Is breakfast included?", &ClientContext::default())
            .await
            .is_none());
    }
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn gate_falls_back_when_backend_fails() {
    let desk = Desk::new();
    let backend = CountingBackend::failing();
    let gate = AssistantGate::new(
        Arc::clone(desk.hub.presence()),
        backend.clone(),
        AssistantSettings::default(),
    );

    let reply = gate
        .get_response("Is breakfast included?", &ClientContext::default())
        .await
        .unwrap();

    assert_eq!(backend.calls(), 1);
    assert!(reply.should_escalate);
    assert_eq!(reply.escalation_reason.as_deref(), Some("technical error"));
    assert_eq!(reply.suggested_actions, vec![SuggestedAction::EscalateToHuman]);
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn offline_staff_get_one_notification_each() {
    let desk = Desk::new();
    let reception = desk.staff("Ana", "reception").await;
    let admin = desk.staff("Bo", "admin").await;
    let housekeeping = desk.staff("Cy", "housekeeping").await;
    let client = desk.client("Mr. Smith").await;

    let conversation = desk
        .hub
        .rooms()
        .create_or_reuse_conversation(&client, "Billing")
        .await
        .unwrap();
    let (conn, _rx) = desk.connect(client).await;
    desk.hub
        .dispatch(&conn, ClientEvent::JoinConversation { conversation_id: conversation.id })
        .await;
    desk.hub
        .dispatch(&conn, send(conversation.id, "What is my invoice status?"))
        .await;

    for staff in [&reception, &admin] {
        let notifications = desk.store.notifications_for(staff.key()).await;
        assert_eq!(notifications.len(), 1);
        let notification = &notifications[0];
        assert_eq!(notification.notification_type, "new_message");
        assert_eq!(notification.body, "What is my invoice status?");
        assert_eq!(notification.title, "New message from Mr. Smith");
        assert!(!notification.read);
    }
    assert!(desk.store.notifications_for(housekeeping.key()).await.is_empty());

    // The backlog arrives once Ana connects
    let (tx, mut rx) = mpsc::unbounded_channel();
    desk.hub.connect(reception, tx).await;
    match drain(&mut rx).as_slice() {
        [ServerEvent::Authenticated { .. }, ServerEvent::UnreadNotifications { notifications }] => {
            assert_eq!(notifications.len(), 1);
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

#[tokio::test]
async fn stored_role_case_does_not_change_access() {
    let desk = Desk::new();
    let reception = desk.staff("Ana", "Reception").await;
    let admin = desk.staff("Bo", " ADMIN").await;
    let client = desk.client("Mr. Smith").await;

    let conversation = desk
        .hub
        .rooms()
        .create_or_reuse_conversation(&client, "Billing")
        .await
        .unwrap();
    let (staff_conn, mut staff_rx) = desk.connect(reception).await;
    desk.hub
        .dispatch(&staff_conn, ClientEvent::JoinConversation { conversation_id: conversation.id })
        .await;
    assert!(matches!(
        drain(&mut staff_rx).as_slice(),
        [ServerEvent::ConversationJoined { .. }]
    ));

    let (client_conn, _client_rx) = desk.connect(client).await;
    desk.hub
        .dispatch(&client_conn, send(conversation.id, "Is breakfast included?"))
        .await;
    assert_eq!(desk.store.notifications_for(admin.key()).await.len(), 1);
}

#[tokio::test]
async fn staff_in_the_room_are_not_notified() {
    let desk = Desk::new();
    let staff = desk.staff("Ana", "reception").await;
    let client = desk.client("Mr. Smith").await;
    let conversation = desk
        .hub
        .rooms()
        .create_or_reuse_conversation(&client, "Billing")
        .await
        .unwrap();

    let (staff_conn, _staff_rx) = desk.connect(staff.clone()).await;
    let (client_conn, _client_rx) = desk.connect(client).await;
    for conn in [&staff_conn, &client_conn] {
        desk.hub
            .dispatch(conn, ClientEvent::JoinConversation { conversation_id: conversation.id })
            .await;
    }

    desk.hub.dispatch(&client_conn, send(conversation.id, "Hi")).await;
    assert!(desk.store.notifications_for(staff.key()).await.is_empty());
}

#[tokio::test]
async fn close_then_reopen_restores_active_state() {
    let desk = Desk::new();
    let staff = desk.staff("Ana", "reception").await;
    let client = desk.client("Mr. Smith").await;
    let conversation = desk
        .hub
        .rooms()
        .create_or_reuse_conversation(&client, "Late checkout")
        .await
        .unwrap();

    let (client_conn, mut client_rx) = desk.connect(client).await;
    desk.hub
        .dispatch(&client_conn, ClientEvent::JoinConversation { conversation_id: conversation.id })
        .await;
    drain(&mut client_rx);

    let closed = desk.hub.rooms().close(conversation.id, &staff).await.unwrap();
    assert_eq!(closed.status, ConversationStatus::Closed);
    assert_eq!(closed.closed_by, Some(staff.id()));
    assert!(closed.closed_at.is_some());

    let reopened = desk.hub.rooms().reopen(conversation.id, &staff).await.unwrap();
    assert_eq!(reopened.status, ConversationStatus::Active);
    assert_eq!(reopened.closed_by, None);
    assert_eq!(reopened.closed_at, None);

    let system: Vec<_> = desk
        .store
        .messages_in(conversation.id)
        .await
        .into_iter()
        .filter(|m| m.kind == MessageKind::System)
        .collect();
    assert_eq!(system.len(), 2);
    assert!(system
        .iter()
        .all(|m| m.sender_kind == SenderKind::Staff && m.sender_id == Some(staff.id())));

    let events = drain(&mut client_rx);
    let statuses: Vec<ConversationStatus> = events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::ConversationUpdated { status, .. } => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![ConversationStatus::Closed, ConversationStatus::Active]);
    assert_eq!(new_message_bodies(&events).len(), 2);
}

#[tokio::test]
async fn multi_tab_client_sees_its_own_messages_everywhere() {
    let desk = Desk::new();
    let staff = desk.staff("Ana", "reception").await;
    let client = desk.client("Mr. Smith").await;
    let conversation = desk
        .hub
        .rooms()
        .create_or_reuse_conversation(&client, "Billing")
        .await
        .unwrap();

    let (tab_one, mut tab_one_rx) = desk.connect(client.clone()).await;
    let (tab_two, mut tab_two_rx) = desk.connect(client.clone()).await;
    let (staff_conn, mut staff_rx) = desk.connect(staff).await;
    for conn in [&tab_one, &tab_two, &staff_conn] {
        desk.hub
            .dispatch(conn, ClientEvent::JoinConversation { conversation_id: conversation.id })
            .await;
    }
    drain(&mut tab_one_rx);
    drain(&mut tab_two_rx);
    drain(&mut staff_rx);

    desk.hub
        .dispatch(&tab_one, send(conversation.id, "Can I get a late checkout?"))
        .await;

    for rx in [&mut tab_one_rx, &mut tab_two_rx, &mut staff_rx] {
        assert_eq!(
            new_message_bodies(&drain(rx)),
            vec!["Can I get a late checkout?"]
        );
    }

    // Closing one tab leaves the client online in the room
    desk.hub.disconnect(&tab_one).await;
    match drain(&mut staff_rx).as_slice() {
        [ServerEvent::UserLeft { offline, kind, .. }] => {
            assert!(!offline);
            assert_eq!(*kind, PrincipalKind::Client);
        }
        other => panic!("unexpected events: {:?}", other),
    }
    assert_eq!(
        desk.store
            .participant_online(conversation.id, PrincipalKey::client(client.id()))
            .await,
        Some(true)
    );

    desk.hub.disconnect(&tab_two).await;
    assert!(matches!(
        drain(&mut staff_rx).as_slice(),
        [ServerEvent::UserLeft { offline: true, .. }]
    ));
    assert!(!desk.hub.presence().is_online(&client.key()).await);
}

#[tokio::test]
async fn assistant_answers_and_escalates_when_nobody_is_around() {
    let backend = CountingBackend::answering("I have passed your refund request to the manager.");
    let desk = Desk::with_assistant(backend.clone());
    let manager = desk.staff("Ana", "admin").await;
    let client = desk.client("Mr. Smith").await;
    let conversation = desk
        .hub
        .rooms()
        .create_or_reuse_conversation(&client, "Billing")
        .await
        .unwrap();

    let (conn, mut rx) = desk.connect(client.clone()).await;
    desk.hub
        .dispatch(&conn, ClientEvent::JoinConversation { conversation_id: conversation.id })
        .await;
    drain(&mut rx);

    let body = "I want a refund for the minibar";
    desk.hub
        .broadcaster()
        .send(&conn, conversation.id, body, MessageKind::Text)
        .await
        .unwrap();

    let responder = desk.hub.assistant().unwrap();
    let reply = responder
        .respond(conversation.id, client.id(), body)
        .await
        .unwrap();
    assert_eq!(reply.sender_kind, SenderKind::Assistant);
    assert_eq!(reply.sender_id, None);
    assert_eq!(backend.calls(), 1);

    assert_eq!(
        new_message_bodies(&drain(&mut rx)),
        vec![body, "I have passed your refund request to the manager."]
    );

    let types: Vec<String> = desk
        .store
        .notifications_for(manager.key())
        .await
        .into_iter()
        .map(|n| n.notification_type)
        .collect();
    assert_eq!(types, vec!["new_message", "assistant_escalation"]);
}
