//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::realtime::ChatHub;

/// State handed to every route and the websocket handler
#[derive(Clone)]
pub struct AppState {
    /// Database pool for health probes; `None` when running on the in-memory store
    pub pool: Option<PgPool>,
    pub hub: Arc<ChatHub>,
}

impl AppState {
    pub fn new(hub: Arc<ChatHub>, pool: Option<PgPool>) -> Self {
        Self { pool, hub }
    }
}
