//! Presence registry
//!
//! Tracks every live connection and answers "who is online" questions.
//! Nothing here is persisted; a restart starts from an empty registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use frontdesk_shared::{normalize_role, PrincipalKey, PrincipalKind};

use super::connection::Connection;

/// Registry of live connections, shared by every component that needs presence
pub struct PresenceRegistry {
    /// All active connections indexed by connection id
    connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection. Registering the same connection id twice is a no-op.
    pub async fn register(&self, conn: Arc<Connection>) -> Arc<Connection> {
        let mut connections = self.connections.write().await;
        if let Some(existing) = connections.get(&conn.id) {
            return Arc::clone(existing);
        }
        connections.insert(conn.id, Arc::clone(&conn));

        tracing::info!(
            connection_id = %conn.id,
            principal_id = %conn.principal.id(),
            kind = conn.principal.kind().as_str(),
            total_connections = connections.len(),
            "Connection registered"
        );

        conn
    }

    /// Remove a connection, returning it if it was registered
    pub async fn unregister(&self, connection_id: &Uuid) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        let conn = connections.remove(connection_id)?;

        let key = conn.principal.key();
        let fully_offline = !connections.values().any(|c| c.principal.key() == key);

        tracing::info!(
            connection_id = %connection_id,
            principal_id = %key.id,
            fully_offline,
            remaining_connections = connections.len(),
            "Connection unregistered"
        );

        Some(conn)
    }

    pub async fn get(&self, connection_id: &Uuid) -> Option<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.get(connection_id).cloned()
    }

    /// Whether the principal has at least one live connection
    pub async fn is_online(&self, principal: &PrincipalKey) -> bool {
        let connections = self.connections.read().await;
        connections.values().any(|c| c.principal.key() == *principal)
    }

    /// All live connections of one principal (multi-tab)
    pub async fn connections_for(&self, principal: &PrincipalKey) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|c| c.principal.key() == *principal)
            .cloned()
            .collect()
    }

    /// Live staff connections whose role is in `roles`
    pub async fn staff_connections_with_role(&self, roles: &HashSet<String>) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|c| {
                c.principal
                    .role()
                    .is_some_and(|role| roles.contains(&normalize_role(role)))
            })
            .cloned()
            .collect()
    }

    /// Refresh the activity stamp of a connection
    pub async fn touch(&self, connection_id: &Uuid) {
        if let Some(conn) = self.get(connection_id).await {
            conn.touch().await;
        }
    }

    /// Distinct staff principals with a live connection seen within `window`.
    ///
    /// Staff who are connected but idle for longer than the window do not count.
    pub async fn count_staff_active_since(&self, window: Duration) -> usize {
        let cutoff = OffsetDateTime::now_utc() - window;
        let staff: Vec<Arc<Connection>> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|c| c.principal.kind() == PrincipalKind::Staff)
                .cloned()
                .collect()
        };

        let mut active = HashSet::new();
        for conn in staff {
            if conn.last_seen_at().await >= cutoff {
                active.insert(conn.principal.id());
            }
        }
        active.len()
    }

    /// Get total number of active connections
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    pub async fn stats(&self) -> PresenceStats {
        let snapshot: Vec<Arc<Connection>> = {
            let connections = self.connections.read().await;
            connections.values().cloned().collect()
        };

        let mut staff = HashSet::new();
        let mut clients = HashSet::new();
        let mut conversations = HashSet::new();
        for conn in &snapshot {
            match conn.principal.kind() {
                PrincipalKind::Staff => staff.insert(conn.principal.id()),
                PrincipalKind::Client => clients.insert(conn.principal.id()),
            };
            conversations.extend(conn.get_subscriptions().await);
        }

        PresenceStats {
            total_connections: snapshot.len(),
            staff_count: staff.len(),
            client_count: clients.len(),
            active_conversations: conversations.len(),
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of who is connected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceStats {
    pub total_connections: usize,
    /// Distinct staff principals online
    pub staff_count: usize,
    /// Distinct client principals online
    pub client_count: usize,
    /// Conversations with at least one joined connection
    pub active_conversations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connection::test_support::*;

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let presence = PresenceRegistry::new();
        let (conn, _rx) = connection(client());

        presence.register(Arc::clone(&conn)).await;
        presence.register(Arc::clone(&conn)).await;
        assert_eq!(presence.connection_count().await, 1);

        presence.unregister(&conn.id).await;
        assert_eq!(presence.connection_count().await, 0);
        assert!(presence.unregister(&conn.id).await.is_none());
    }

    #[tokio::test]
    async fn test_online_until_last_tab_closes() {
        let presence = PresenceRegistry::new();
        let principal = client();
        let key = principal.key();

        let (tab1, _rx1) = connection(principal.clone());
        let (tab2, _rx2) = connection(principal);
        presence.register(Arc::clone(&tab1)).await;
        presence.register(Arc::clone(&tab2)).await;
        assert_eq!(presence.connections_for(&key).await.len(), 2);

        presence.unregister(&tab1.id).await;
        assert!(presence.is_online(&key).await);

        presence.unregister(&tab2.id).await;
        assert!(!presence.is_online(&key).await);
    }

    #[tokio::test]
    async fn test_idle_staff_are_not_active() {
        let presence = PresenceRegistry::new();
        let window = Duration::from_secs(300);

        let (idle, _rx1) = connection(staff("reception"));
        backdate(&idle, OffsetDateTime::now_utc() - time::Duration::minutes(20)).await;
        presence.register(idle).await;
        assert_eq!(presence.count_staff_active_since(window).await, 0);

        let (busy, _rx2) = connection(staff("manager"));
        presence.register(busy).await;
        assert_eq!(presence.count_staff_active_since(window).await, 1);
    }

    #[tokio::test]
    async fn test_staff_counted_once_across_tabs() {
        let presence = PresenceRegistry::new();
        let principal = staff("admin");
        let (tab1, _rx1) = connection(principal.clone());
        let (tab2, _rx2) = connection(principal);
        presence.register(tab1).await;
        presence.register(tab2).await;

        assert_eq!(presence.count_staff_active_since(Duration::from_secs(60)).await, 1);
    }

    #[tokio::test]
    async fn test_clients_never_count_as_staff() {
        let presence = PresenceRegistry::new();
        let (conn, _rx) = connection(client());
        presence.register(conn).await;

        assert_eq!(presence.count_staff_active_since(Duration::from_secs(300)).await, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let presence = PresenceRegistry::new();
        let (staff_conn, _rx1) = connection(staff("reception"));
        let (client_conn, _rx2) = connection(client());
        let conversation_id = Uuid::new_v4();
        client_conn.subscribe(conversation_id).await;
        staff_conn.subscribe(conversation_id).await;

        presence.register(staff_conn).await;
        presence.register(client_conn).await;

        let stats = presence.stats().await;
        assert_eq!(
            stats,
            PresenceStats {
                total_connections: 2,
                staff_count: 1,
                client_count: 1,
                active_conversations: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_staff_connections_with_role() {
        let presence = PresenceRegistry::new();
        let (reception, _rx1) = connection(staff("reception"));
        let (housekeeping, _rx2) = connection(staff("housekeeping"));
        let (guest, _rx3) = connection(client());
        presence.register(Arc::clone(&reception)).await;
        presence.register(housekeeping).await;
        presence.register(guest).await;

        let roles: HashSet<String> = ["reception".to_string()].into_iter().collect();
        let found = presence.staff_connections_with_role(&roles).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, reception.id);
    }
}
