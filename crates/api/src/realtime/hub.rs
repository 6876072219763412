//! Realtime event dispatch
//!
//! [`ChatHub`] wires presence, rooms, broadcast, notifications and the
//! assistant together and maps each inbound [`ClientEvent`] to its effect.
//! It knows nothing about sockets; the websocket handler only moves frames.

use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use frontdesk_shared::{
    normalize_role, ClientContext, Message, MessageKind, NotificationContent, Principal, PrincipalKey,
};

use crate::assistant::{AssistantGate, AssistantReply, AssistantSettings, CompletionBackend};
use crate::auth::TokenVerifier;
use crate::notifications::{truncate_preview, NotificationDispatcher};
use crate::store::ChatStore;

use super::access::AccessPolicy;
use super::broadcast::{MessageBroadcaster, NOTIFICATION_PREVIEW_CHARS};
use super::connection::Connection;
use super::error::{ChatError, ChatResult};
use super::events::{ClientEvent, ServerEvent};
use super::presence::PresenceRegistry;
use super::room::RoomManager;

pub struct ChatHub {
    store: Arc<dyn ChatStore>,
    verifier: Arc<dyn TokenVerifier>,
    policy: Arc<AccessPolicy>,
    presence: Arc<PresenceRegistry>,
    rooms: Arc<RoomManager>,
    broadcaster: Arc<MessageBroadcaster>,
    notifications: Arc<NotificationDispatcher>,
    assistant: Option<AssistantResponder>,
}

impl ChatHub {
    pub fn new(store: Arc<dyn ChatStore>, verifier: Arc<dyn TokenVerifier>, policy: AccessPolicy) -> Self {
        let policy = Arc::new(policy);
        let presence = Arc::new(PresenceRegistry::new());
        let rooms = Arc::new(RoomManager::new(Arc::clone(&store), Arc::clone(&policy)));
        let notifications = Arc::new(NotificationDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&presence),
        ));
        let broadcaster = Arc::new(MessageBroadcaster::new(
            Arc::clone(&store),
            Arc::clone(&rooms),
            Arc::clone(&notifications),
        ));

        Self {
            store,
            verifier,
            policy,
            presence,
            rooms,
            broadcaster,
            notifications,
            assistant: None,
        }
    }

    /// Enable assistant follow-ups on client messages
    pub fn with_assistant(mut self, backend: Arc<dyn CompletionBackend>, settings: AssistantSettings) -> Self {
        let gate = AssistantGate::new(Arc::clone(&self.presence), backend, settings);
        self.assistant = Some(AssistantResponder {
            gate: Arc::new(gate),
            store: Arc::clone(&self.store),
            policy: Arc::clone(&self.policy),
            broadcaster: Arc::clone(&self.broadcaster),
            notifications: Arc::clone(&self.notifications),
        });
        self
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    pub fn broadcaster(&self) -> &Arc<MessageBroadcaster> {
        &self.broadcaster
    }

    pub fn notifications(&self) -> &Arc<NotificationDispatcher> {
        &self.notifications
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn assistant(&self) -> Option<&AssistantResponder> {
        self.assistant.as_ref()
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Turn a bearer token into a principal with its display record
    pub async fn resolve_principal(&self, token: &str) -> ChatResult<Principal> {
        let identity = self
            .verifier
            .verify(token)
            .ok_or(ChatError::Authentication)?;

        let principal = self
            .store
            .load_principal(identity.kind, identity.principal_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(
                    principal_id = %identity.principal_id,
                    kind = identity.kind.as_str(),
                    "Token subject not found"
                );
                ChatError::Authentication
            })?;

        // The token's role wins over the directory when both are present
        Ok(match (principal, identity.role) {
            (Principal::Staff { id, display_name, .. }, Some(role)) => Principal::Staff {
                id,
                role: normalize_role(&role),
                display_name,
            },
            (principal, _) => principal,
        })
    }

    /// Register an authenticated principal's socket and push its backlog
    pub async fn connect(&self, principal: Principal, sender: mpsc::UnboundedSender<ServerEvent>) -> Arc<Connection> {
        let conn = self
            .presence
            .register(Arc::new(Connection::new(principal, sender)))
            .await;

        let _ = conn.send(ServerEvent::Authenticated {
            connection_id: conn.id,
            principal_id: conn.principal.id(),
            kind: conn.principal.kind(),
            display_name: conn.principal.display_name().to_string(),
        });

        if let Err(e) = self.notifications.deliver_unread(&conn).await {
            tracing::error!(
                error = ?e,
                connection_id = %conn.id,
                "Failed to deliver unread notifications"
            );
        }

        conn
    }

    /// `authenticate` event: verify the token, then connect
    pub async fn authenticate(
        &self,
        token: &str,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> ChatResult<Arc<Connection>> {
        let principal = self.resolve_principal(token).await?;
        Ok(self.connect(principal, sender).await)
    }

    /// Drop every trace of a connection
    pub async fn disconnect(&self, conn: &Connection) {
        self.rooms.remove_connection(conn).await;
        self.presence.unregister(&conn.id).await;
    }

    // =========================================================================
    // Event dispatch
    // =========================================================================

    /// Apply one inbound event from an authenticated connection.
    ///
    /// Failures are reported to the connection as an `error` event; the
    /// connection stays open.
    pub async fn dispatch(&self, conn: &Arc<Connection>, event: ClientEvent) {
        if event.is_room_activity() {
            conn.touch().await;
        }
        let event_name = event.name();

        if let Err(err) = self.apply(conn, event).await {
            match &err {
                ChatError::Dependency(e) => tracing::error!(
                    error = ?e,
                    connection_id = %conn.id,
                    event = event_name,
                    "Realtime event failed"
                ),
                _ => tracing::warn!(
                    error = %err,
                    connection_id = %conn.id,
                    event = event_name,
                    "Realtime event rejected"
                ),
            }
            let _ = conn.send(ServerEvent::Error {
                message: err.client_message(),
            });
        }
    }

    async fn apply(&self, conn: &Arc<Connection>, event: ClientEvent) -> ChatResult<()> {
        use ClientEvent::*;

        match event {
            Authenticate { .. } => {
                return Err(ChatError::Validation("Already authenticated".to_string()));
            }

            JoinConversation { conversation_id } => {
                self.rooms.join(conn, conversation_id).await?;
            }

            LeaveConversation { conversation_id } => {
                self.rooms.leave(conn, conversation_id).await;
            }

            SendMessage {
                conversation_id,
                body,
                kind,
            } => {
                let message = self
                    .broadcaster
                    .send(conn, conversation_id, &body, kind)
                    .await?;

                if let (Principal::Client { id, .. }, MessageKind::Text) = (&conn.principal, kind) {
                    if let Some(assistant) = &self.assistant {
                        assistant.spawn(conversation_id, *id, message.body);
                    }
                }
            }

            MarkMessagesRead { conversation_id } => {
                self.broadcaster
                    .mark_messages_read(conn, conversation_id)
                    .await?;
            }

            TypingStart { conversation_id } => {
                self.broadcaster
                    .broadcast_typing(conn, conversation_id, true)
                    .await?;
            }

            TypingStop { conversation_id } => {
                self.broadcaster
                    .broadcast_typing(conn, conversation_id, false)
                    .await?;
            }

            Ping => {
                let _ = conn.send(ServerEvent::Pong);
            }
        }

        Ok(())
    }
}

/// Runs the assistant after a client message and posts what it says
#[derive(Clone)]
pub struct AssistantResponder {
    gate: Arc<AssistantGate>,
    store: Arc<dyn ChatStore>,
    policy: Arc<AccessPolicy>,
    broadcaster: Arc<MessageBroadcaster>,
    notifications: Arc<NotificationDispatcher>,
}

impl AssistantResponder {
    /// Respond in the background so the sender's event loop is not blocked
    pub fn spawn(&self, conversation_id: Uuid, client_id: Uuid, client_message: String) {
        let responder = self.clone();
        tokio::spawn(async move {
            responder
                .respond(conversation_id, client_id, &client_message)
                .await;
        });
    }

    /// Ask the gate and post its reply. `None` when staff are around or the
    /// reply could not be stored.
    pub async fn respond(&self, conversation_id: Uuid, client_id: Uuid, client_message: &str) -> Option<Message> {
        let context = match self.store.client_context(client_id).await {
            Ok(context) => context.unwrap_or_default(),
            Err(e) => {
                tracing::error!(error = ?e, client_id = %client_id, "Failed to load client context");
                ClientContext::default()
            }
        };

        let reply = self.gate.get_response(client_message, &context).await?;

        let message = match self
            .broadcaster
            .post_assistant_reply(conversation_id, &reply.message)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    error = ?e,
                    conversation_id = %conversation_id,
                    "Failed to post assistant reply"
                );
                return None;
            }
        };

        if reply.should_escalate {
            self.escalate(conversation_id, client_id, client_message, &reply)
                .await;
        }

        Some(message)
    }

    async fn escalate(&self, conversation_id: Uuid, client_id: Uuid, client_message: &str, reply: &AssistantReply) {
        let roles: Vec<String> = self.policy.support_roles().iter().cloned().collect();
        let staff = match self.store.list_support_staff(&roles).await {
            Ok(staff) => staff,
            Err(e) => {
                tracing::error!(error = ?e, "Failed to load support staff for escalation");
                return;
            }
        };

        tracing::info!(
            conversation_id = %conversation_id,
            reason = reply.escalation_reason.as_deref().unwrap_or_default(),
            staff_count = staff.len(),
            "Escalating assistant conversation"
        );

        for member in staff {
            let content = NotificationContent {
                notification_type: "assistant_escalation".to_string(),
                title: "A client needs a human".to_string(),
                body: truncate_preview(client_message, NOTIFICATION_PREVIEW_CHARS),
                payload: serde_json::json!({
                    "conversation_id": conversation_id,
                    "client_id": client_id,
                    "reason": reply.escalation_reason,
                    "suggested_actions": reply.suggested_actions,
                }),
            };
            if let Err(e) = self
                .notifications
                .create_and_send(PrincipalKey::staff(member.id), content)
                .await
            {
                tracing::error!(error = ?e, staff_id = %member.id, "Failed to send escalation notification");
            }
        }
    }
}
