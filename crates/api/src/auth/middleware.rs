//! Bearer-token middleware
//!
//! Resolves the `Authorization: Bearer` header to a [`Principal`] through the
//! chat hub and stores it as a request extension for the handlers.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};

use frontdesk_shared::Principal;

use crate::error::ApiError;
use crate::state::AppState;

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Reject the request unless it carries a valid token for a known principal
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())
        .ok_or(ApiError::Unauthorized)?
        .to_string();
    let principal: Principal = state.hub.resolve_principal(&token).await?;

    tracing::debug!(
        principal_id = %principal.id(),
        kind = principal.kind().as_str(),
        "Request authenticated"
    );

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}
