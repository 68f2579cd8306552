//! Shared test helpers: in-memory app construction, seeding, requests

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;
use yiba_common::api::auth::{generate_token, token_digest};
use yiba_common::db::models::User;
use yiba_common::events::EventBus;
use yiba_common::Role;
use yiba_server::services::storage::LocalDocumentStore;
use yiba_server::{build_router, AppState};

pub struct TestApp {
    pub state: AppState,
    // Kept alive for the document store
    _tmp: tempfile::TempDir,
}

impl TestApp {
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }
}

/// Fresh app over an in-memory database and a temp document store
pub async fn setup_app() -> TestApp {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let pool = yiba_common::db::init_test_database()
        .await
        .expect("init test database");
    let events = EventBus::new(64);
    let store = Arc::new(LocalDocumentStore::new(tmp.path().to_path_buf()));

    // Generous login quota so only the dedicated test exercises 429s
    let state = AppState::new(pool, events, store, 1000);
    TestApp { state, _tmp: tmp }
}

/// Low-cost hash for test fixtures (DEFAULT_COST is too slow for suites)
pub fn test_password_hash(password: &str) -> String {
    bcrypt::hash(password, 4).expect("hash password")
}

/// Insert an institution row directly, returning its id
pub async fn seed_institution(state: &AppState, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO institutions (id, name, contact_email, status) VALUES (?, ?, ?, 'active')",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(format!("admin@{}.example", name.to_lowercase().replace(' ', "-")))
    .execute(&state.db)
    .await
    .expect("seed institution");
    id
}

/// Insert a user and an active session, returning (user_id, bearer token)
pub async fn seed_user(
    state: &AppState,
    email: &str,
    role: Role,
    institution_id: Option<Uuid>,
) -> (Uuid, String) {
    let user = User {
        id: Uuid::new_v4(),
        institution_id,
        email: email.to_string(),
        display_name: email.to_string(),
        password_hash: test_password_hash("correct-horse-battery"),
        role,
        active: true,
    };
    yiba_server::db::users::insert(&state.db, &user)
        .await
        .expect("seed user");

    let token = generate_token();
    let expires_at = chrono::Utc::now() + chrono::Duration::hours(1);
    yiba_server::db::sessions::create_session(&state.db, &token_digest(&token), user.id, expires_at)
        .await
        .expect("seed session");

    (user.id, token)
}

/// Insert a qualification directly, returning its id
pub async fn seed_qualification(state: &AppState, code: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO qualifications (id, code, title, nqf_level) VALUES (?, ?, ?, 4)",
    )
    .bind(id.to_string())
    .bind(code)
    .bind(format!("Occupational Certificate {}", code))
    .execute(&state.db)
    .await
    .expect("seed qualification");
    id
}

/// Build a JSON request with optional bearer token
pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

/// Build a bodyless request with optional bearer token
pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    bare_request("GET", uri, token)
}

pub fn bare_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

/// Send a request through a fresh router instance
pub async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router().oneshot(request).await.expect("send request");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).to_string(),
        ))
    };
    (status, body)
}

/// Send and return raw bytes (downloads, CSV)
pub async fn send_raw(app: &TestApp, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.router().oneshot(request).await.expect("send request");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    (status, bytes.to_vec())
}
