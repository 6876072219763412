//! HTTP surface tests: router, bearer middleware and error rendering

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use frontdesk_api::auth::JwtVerifier;
use frontdesk_api::realtime::{AccessPolicy, ChatHub};
use frontdesk_api::routes::create_router;
use frontdesk_api::store::MemoryChatStore;
use frontdesk_api::AppState;
use frontdesk_shared::{PrincipalKey, PrincipalKind};

const SECRET: &str = "integration-test-secret-at-least-32-chars";

struct TestApp {
    router: Router,
    store: Arc<MemoryChatStore>,
    jwt: JwtVerifier,
}

impl TestApp {
    fn new() -> Self {
        let store = Arc::new(MemoryChatStore::new());
        let jwt = JwtVerifier::new(SECRET);
        let hub = ChatHub::new(
            store.clone(),
            Arc::new(jwt.clone()),
            AccessPolicy::new(["admin", "reception"]),
        );
        let router = create_router(AppState::new(Arc::new(hub), None));
        Self { router, store, jwt }
    }

    async fn staff_token(&self, role: &str) -> (Uuid, String) {
        let id = Uuid::new_v4();
        self.store.add_staff(id, "Ana", role).await;
        let token = self
            .jwt
            .generate_token(id, PrincipalKind::Staff, Some(role), Duration::hours(1))
            .unwrap();
        (id, token)
    }

    async fn client_token(&self) -> (Uuid, String) {
        let id = Uuid::new_v4();
        self.store.add_client(id, "Mr. Smith", None).await;
        let token = self
            .jwt
            .generate_token(id, PrincipalKind::Client, None, Duration::hours(1))
            .unwrap();
        (id, token)
    }

    async fn call(&self, method: Method, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token));
        self.send(builder, body).await
    }

    async fn call_anonymous(&self, method: Method, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().method(method).uri(uri), None).await
    }

    async fn send(&self, builder: axum::http::request::Builder, body: Option<Value>) -> (StatusCode, Value) {
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

#[tokio::test]
async fn health_without_database_reports_not_configured() {
    let app = TestApp::new();
    let (status, body) = app.call_anonymous(Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "not_configured");
    assert_eq!(body["connections"], 0);

    let (status, _) = app.call_anonymous(Method::GET, "/health/ready").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let app = TestApp::new();

    let (status, body) = app.call_anonymous(Method::GET, "/api/v1/notifications").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, body) = app
        .call(Method::GET, "/api/v1/notifications", "garbage", None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");

    // Valid signature, unknown principal
    let token = app
        .jwt
        .generate_token(Uuid::new_v4(), PrincipalKind::Client, None, Duration::hours(1))
        .unwrap();
    let (status, _) = app
        .call(Method::GET, "/api/v1/notifications", &token, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn conversation_lifecycle_over_http() {
    let app = TestApp::new();
    let (_client_id, client) = app.client_token().await;
    let (staff_id, staff) = app.staff_token("reception").await;

    let (status, created) = app
        .call(Method::POST, "/api/v1/conversations", &client, Some(json!({"subject": "  "})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["subject"], "Support request");
    assert_eq!(created["status"], "active");
    let id = created["id"].as_str().unwrap().to_string();

    let (_, reused) = app
        .call(Method::POST, "/api/v1/conversations", &client, Some(json!({"subject": "Other"})))
        .await;
    assert_eq!(reused["id"], created["id"]);

    let (status, _) = app
        .call(Method::POST, "/api/v1/conversations", &staff, Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let close_uri = format!("/api/v1/conversations/{}/close", id);
    let (status, _) = app.call(Method::POST, &close_uri, &client, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, closed) = app.call(Method::POST, &close_uri, &staff, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["status"], "closed");
    assert_eq!(closed["closed_by"], staff_id.to_string());

    let (status, body) = app.call(Method::POST, &close_uri, &staff, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, reopened) = app
        .call(Method::POST, &format!("/api/v1/conversations/{}/reopen", id), &staff, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reopened["closed_by"], Value::Null);

    let (status, messages) = app
        .call(Method::GET, &format!("/api/v1/conversations/{}/messages?limit=10", id), &client, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(messages.as_array().unwrap().len(), 2);
    assert_eq!(messages[0]["kind"], "system");

    let (status, participants) = app
        .call(Method::GET, &format!("/api/v1/conversations/{}/participants", id), &staff, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(participants["participants"], json!([]));
}

#[tokio::test]
async fn other_clients_cannot_read_a_conversation() {
    let app = TestApp::new();
    let (_, owner) = app.client_token().await;
    let (_, stranger) = app.client_token().await;

    let (_, created) = app
        .call(Method::POST, "/api/v1/conversations", &owner, Some(json!({"subject": "Billing"})))
        .await;
    let uri = format!("/api/v1/conversations/{}/messages", created["id"].as_str().unwrap());

    let (status, _) = app.call(Method::GET, &uri, &stranger, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(
            Method::GET,
            &format!("/api/v1/conversations/{}/messages", Uuid::new_v4()),
            &owner,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "Conversation not found");
}

#[tokio::test]
async fn notifications_round_trip() {
    let app = TestApp::new();
    let (_, admin) = app.staff_token("admin").await;
    let (client_id, client) = app.client_token().await;

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/notifications",
            &client,
            Some(json!({
                "target_kind": "client",
                "target_id": client_id,
                "type": "invoice_ready",
                "title": "Your invoice is ready",
                "body": "Invoice INV-7 is available"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/notifications",
            &admin,
            Some(json!({
                "target_kind": "robot",
                "target_id": client_id,
                "type": "invoice_ready",
                "title": "Your invoice is ready",
                "body": ""
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, sent) = app
        .call(
            Method::POST,
            "/api/v1/notifications",
            &admin,
            Some(json!({
                "target_kind": "client",
                "target_id": client_id,
                "type": "invoice_ready",
                "title": "Your invoice is ready",
                "body": "Invoice INV-7 is available",
                "payload": {"invoice": "INV-7"}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["type"], "invoice_ready");
    assert_eq!(sent["read"], false);
    let notification_id = sent["id"].as_str().unwrap().to_string();

    let (_, unread) = app
        .call(Method::GET, "/api/v1/notifications?unread_only=true", &client, None)
        .await;
    assert_eq!(unread.as_array().unwrap().len(), 1);

    // Someone else's id looks like a missing one
    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/v1/notifications/{}/read", notification_id),
            &admin,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, read) = app
        .call(
            Method::POST,
            &format!("/api/v1/notifications/{}/read", notification_id),
            &client,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["read"], true);

    let (_, updated) = app
        .call(Method::POST, "/api/v1/notifications/read-all", &client, None)
        .await;
    assert_eq!(updated["updated"], 0);

    let (_, removed) = app
        .call(Method::DELETE, "/api/v1/notifications", &client, None)
        .await;
    assert_eq!(removed["removed"], 1);
    assert!(app
        .store
        .notifications_for(PrincipalKey::client(client_id))
        .await
        .is_empty());
}

#[tokio::test]
async fn stats_and_role_broadcast_are_staff_only() {
    let app = TestApp::new();
    let (_, admin) = app.staff_token("admin").await;
    let (_, client) = app.client_token().await;

    let (status, _) = app.call(Method::GET, "/api/v1/chat/stats", &client, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, stats) = app.call(Method::GET, "/api/v1/chat/stats", &admin, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_connections"], 0);
    assert_eq!(stats["rooms"], 0);

    let (status, delivered) = app
        .call(
            Method::POST,
            "/api/v1/notifications/broadcast",
            &admin,
            Some(json!({"roles": ["Reception"], "event": "shift_change"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(delivered["delivered"], 0);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/notifications/broadcast",
            &admin,
            Some(json!({"roles": [" "], "event": "shift_change"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
