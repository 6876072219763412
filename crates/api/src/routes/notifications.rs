//! Notification routes
//!
//! Listing and read-state endpoints act on the caller's own notifications.
//! Sending and role broadcasts are limited to support staff.

use std::collections::HashSet;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use frontdesk_shared::{normalize_role, Notification, NotificationContent, Principal, PrincipalKey, PrincipalKind};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    /// `staff` or `client`
    pub target_kind: String,
    pub target_id: Uuid,
    #[serde(flatten)]
    pub content: NotificationContent,
}

#[derive(Debug, Deserialize)]
pub struct RoleBroadcastRequest {
    pub roles: Vec<String>,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UpdatedResponse {
    pub updated: u64,
}

#[derive(Debug, Serialize)]
pub struct RemovedResponse {
    pub removed: u64,
}

#[derive(Debug, Serialize)]
pub struct DeliveredResponse {
    pub delivered: usize,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn require_admin(state: &AppState, principal: &Principal) -> ApiResult<()> {
    if state.hub.policy().can_administer(principal) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Support staff only".to_string()))
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Persist a notification for any principal and push it if they are online
pub async fn send_notification(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<SendNotificationRequest>,
) -> ApiResult<Json<Notification>> {
    require_admin(&state, &principal)?;

    let kind: PrincipalKind = req.target_kind.parse().map_err(ApiError::Validation)?;
    let target = PrincipalKey {
        kind,
        id: req.target_id,
    };

    let notification = state
        .hub
        .notifications()
        .create_and_send(target, req.content)
        .await?;
    Ok(Json(notification))
}

/// Push an ad-hoc event to connected staff with the given roles
pub async fn broadcast_to_roles(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<RoleBroadcastRequest>,
) -> ApiResult<Json<DeliveredResponse>> {
    require_admin(&state, &principal)?;

    if req.event.trim().is_empty() {
        return Err(ApiError::Validation("Event name is required".to_string()));
    }
    let roles: HashSet<String> = req
        .roles
        .iter()
        .map(|role| normalize_role(role))
        .filter(|role| !role.is_empty())
        .collect();
    if roles.is_empty() {
        return Err(ApiError::Validation("At least one role is required".to_string()));
    }

    let delivered = state
        .hub
        .notifications()
        .send_to_role(&roles, &req.event, req.payload)
        .await;
    Ok(Json(DeliveredResponse { delivered }))
}

/// The caller's notifications, newest first
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ListNotificationsQuery>,
) -> ApiResult<Json<Vec<Notification>>> {
    let notifications = state
        .hub
        .notifications()
        .list(principal.key(), query.unread_only, query.limit)
        .await?;
    Ok(Json(notifications))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<Json<Notification>> {
    let notification = state
        .hub
        .notifications()
        .mark_read(notification_id, principal.key())
        .await?;
    Ok(Json(notification))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<UpdatedResponse>> {
    let updated = state
        .hub
        .notifications()
        .mark_all_read(principal.key())
        .await?;
    Ok(Json(UpdatedResponse { updated }))
}

pub async fn clear_notifications(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<RemovedResponse>> {
    let removed = state.hub.notifications().clear(principal.key()).await?;
    Ok(Json(RemovedResponse { removed }))
}
