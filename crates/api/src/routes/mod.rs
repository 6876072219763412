//! API routes

pub mod conversations;
pub mod health;
pub mod notifications;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{auth::require_auth, realtime::ws_handler, state::AppState};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Protected API routes (auth required) - under /api/v1
    let protected_api_routes = Router::new()
        // Conversations
        .route("/conversations", post(conversations::create_conversation))
        .route("/conversations/:conversation_id/messages", get(conversations::list_messages))
        .route("/conversations/:conversation_id/close", post(conversations::close_conversation))
        .route("/conversations/:conversation_id/reopen", post(conversations::reopen_conversation))
        .route(
            "/conversations/:conversation_id/participants",
            get(conversations::list_participants),
        )
        .route("/chat/stats", get(conversations::chat_stats))
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications", post(notifications::send_notification))
        .route("/notifications", delete(notifications::clear_notifications))
        .route("/notifications/broadcast", post(notifications::broadcast_to_roles))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/:notification_id/read", post(notifications::mark_read))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // WebSocket routes (auth handled in handler via query parameter or first frame)
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    let api_v1_routes = Router::new()
        .merge(protected_api_routes)
        .merge(websocket_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
