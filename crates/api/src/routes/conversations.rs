//! Conversation routes
//!
//! HTTP counterparts of the realtime conversation operations. Everything goes
//! through the chat hub, so rooms see HTTP-driven changes as they happen.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use frontdesk_shared::{Conversation, Message, Principal};

use crate::{
    error::{ApiError, ApiResult},
    realtime::{ParticipantView, PresenceStats},
    state::AppState,
};

/// Default page of message history
const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 200;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub subject: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ParticipantsResponse {
    pub conversation_id: Uuid,
    pub participants: Vec<ParticipantView>,
}

#[derive(Debug, Serialize)]
pub struct ChatStatsResponse {
    #[serde(flatten)]
    pub presence: PresenceStats,
    pub rooms: usize,
}

// =============================================================================
// Handlers
// =============================================================================

/// Return the caller's active conversation, creating one if needed
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .hub
        .rooms()
        .create_or_reuse_conversation(&principal, &req.subject)
        .await?;
    Ok(Json(conversation))
}

/// Recent messages, oldest first
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let messages = state
        .hub
        .broadcaster()
        .history(&principal, conversation_id, limit)
        .await?;
    Ok(Json(messages))
}

pub async fn close_conversation(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state.hub.rooms().close(conversation_id, &principal).await?;
    Ok(Json(conversation))
}

pub async fn reopen_conversation(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state.hub.rooms().reopen(conversation_id, &principal).await?;
    Ok(Json(conversation))
}

/// Principals currently joined to the conversation's room
pub async fn list_participants(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<ParticipantsResponse>> {
    let rooms = state.hub.rooms();
    rooms.authorize(&principal, conversation_id).await?;

    Ok(Json(ParticipantsResponse {
        conversation_id,
        participants: rooms.list_online_participants(&conversation_id).await,
    }))
}

/// Connection and room counts (support staff only)
pub async fn chat_stats(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<ChatStatsResponse>> {
    if !state.hub.policy().can_administer(&principal) {
        return Err(ApiError::Forbidden("Support staff only".to_string()));
    }

    Ok(Json(ChatStatsResponse {
        presence: state.hub.presence().stats().await,
        rooms: state.hub.rooms().room_count().await,
    }))
}
