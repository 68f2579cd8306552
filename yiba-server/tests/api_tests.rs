//! Integration tests for authentication, institutions, users and learners
//!
//! Drives the full router via tower::oneshot against an in-memory
//! database, covering session handling, tenancy scoping and input
//! validation.

mod helpers;

use axum::http::StatusCode;
use helpers::*;
use serde_json::json;
use yiba_common::Role;

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_no_auth_required() {
    let app = setup_app().await;

    let (status, body) = send(&app, get_request("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "yiba-server");
    assert!(body["version"].is_string());
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_protected_route_requires_token() {
    let app = setup_app().await;

    let (status, _) = send(&app, get_request("/api/auth/me", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, get_request("/api/auth/me", Some("not-a-real-token-at-all-padding-x"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_round_trip() {
    let app = setup_app().await;

    // Seed an active QCTO admin with a known password
    let hash = test_password_hash("a-long-enough-password");
    sqlx::query(
        "INSERT INTO users (id, email, display_name, password_hash, role) VALUES (?, ?, ?, ?, 'qcto_admin')",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind("admin@qcto.example")
    .bind("QCTO Admin")
    .bind(&hash)
    .execute(&app.state.db)
    .await
    .unwrap();

    // Wrong password is a 401
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": "admin@qcto.example", "password": "wrong" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Correct credentials issue a token that works on /me
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": "admin@qcto.example", "password": "a-long-enough-password" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();
    assert_eq!(body["user"]["role"], "qcto_admin");
    assert!(body["user"].get("password_hash").is_none());

    let (status, body) = send(&app, get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "admin@qcto.example");
    assert!(body["capabilities"].is_array());

    // Logout invalidates the session
    let (status, _) = send(
        &app,
        json_request("POST", "/api/auth/logout", Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deactivated_user_cannot_use_session() {
    let app = setup_app().await;
    let (user_id, token) = seed_user(&app.state, "rev@qcto.example", Role::QctoReviewer, None).await;

    let (status, _) = send(&app, get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);

    yiba_server::db::users::set_active(&app.state.db, user_id, false)
        .await
        .unwrap();

    let (status, _) = send(&app, get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Invites
// =============================================================================

#[tokio::test]
async fn test_invite_and_accept_flow() {
    let app = setup_app().await;
    let (_admin, admin_token) =
        seed_user(&app.state, "platform@yiba.example", Role::PlatformAdmin, None).await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;

    // Invite an institution admin
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/users",
            Some(&admin_token),
            json!({
                "email": "Principal@Ikhaya.example",
                "role": "institution_admin",
                "institution_id": institution_id,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "principal@ikhaya.example");
    let invite_token = body["invite_token"].as_str().unwrap().to_string();

    // Invite email landed in the outbox
    let queued: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM email_outbox WHERE status = 'queued'")
            .fetch_one(&app.state.db)
            .await
            .unwrap();
    assert_eq!(queued, 1);

    // Short password rejected
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/auth/accept-invite",
            None,
            json!({ "token": invite_token, "display_name": "P", "password": "short" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Acceptance creates the account and a session
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/auth/accept-invite",
            None,
            json!({
                "token": invite_token,
                "display_name": "Principal Dlamini",
                "password": "a-long-enough-password",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["role"], "institution_admin");
    assert_eq!(
        body["user"]["institution_id"].as_str().unwrap(),
        institution_id.to_string()
    );

    // Second acceptance of the same token is a conflict
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/auth/accept-invite",
            None,
            json!({
                "token": body["token"],
                "display_name": "x",
                "password": "another-long-password",
            }),
        ),
    )
    .await;
    // The session token is not an invite token
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_institution_admin_invites_stay_in_tenancy() {
    let app = setup_app().await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;
    let (_id, token) = seed_user(
        &app.state,
        "admin@ikhaya.example",
        Role::InstitutionAdmin,
        Some(institution_id),
    )
    .await;

    // Institution admins cannot invite regulator roles
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/users",
            Some(&token),
            json!({ "email": "rev@qcto.example", "role": "qcto_reviewer" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Staff invite lands in their own institution implicitly
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/users",
            Some(&token),
            json!({ "email": "staff@ikhaya.example", "role": "institution_staff" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["institution_id"].as_str().unwrap(),
        institution_id.to_string()
    );
}

// =============================================================================
// Institutions
// =============================================================================

#[tokio::test]
async fn test_institution_create_and_status() {
    let app = setup_app().await;
    let (_id, token) = seed_user(&app.state, "admin@qcto.example", Role::QctoAdmin, None).await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/institutions",
            Some(&token),
            json!({
                "name": "Vista Skills Academy",
                "contact_email": "info@vista.example",
                "province": "Gauteng",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    let institution_id = body["id"].as_str().unwrap().to_string();

    // Activate it
    let (status, body) = send(
        &app,
        json_request(
            "PUT",
            &format!("/api/institutions/{}/status", institution_id),
            Some(&token),
            json!({ "status": "active" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");

    // Creation and transition are both in the audit log
    let (status, body) = send(
        &app,
        get_request(
            &format!("/api/audit?entity_type=institution&entity_id={}", institution_id),
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn test_institution_user_cannot_touch_other_institution() {
    let app = setup_app().await;
    let own = seed_institution(&app.state, "Ikhaya College").await;
    let other = seed_institution(&app.state, "Vista Academy").await;
    let (_id, token) = seed_user(
        &app.state,
        "staff@ikhaya.example",
        Role::InstitutionStaff,
        Some(own),
    )
    .await;

    // Reading the other institution is forbidden
    let (status, _) = send(
        &app,
        get_request(&format!("/api/institutions/{}", other), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Listing returns only their own
    let (status, body) = send(&app, get_request("/api/institutions", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(
        body["institutions"][0]["id"].as_str().unwrap(),
        own.to_string()
    );

    // Creating an institution requires a capability staff do not hold
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/institutions",
            Some(&token),
            json!({ "name": "X", "contact_email": "x@y.example" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// =============================================================================
// Learners
// =============================================================================

#[tokio::test]
async fn test_learner_national_id_validation() {
    let app = setup_app().await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;
    let (_id, token) = seed_user(
        &app.state,
        "staff@ikhaya.example",
        Role::InstitutionStaff,
        Some(institution_id),
    )
    .await;

    // Luhn-invalid ID rejected
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/learners",
            Some(&token),
            json!({
                "national_id": "8001015009086",
                "first_name": "Thandi",
                "last_name": "Mokoena",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("national ID"));

    // Valid ID accepted
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/learners",
            Some(&token),
            json!({
                "national_id": "8001015009087",
                "first_name": "Thandi",
                "last_name": "Mokoena",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let learner_id = body["id"].as_str().unwrap().to_string();

    // Duplicate within the institution is a conflict
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/learners",
            Some(&token),
            json!({
                "national_id": "8001015009087",
                "first_name": "T",
                "last_name": "M",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Update with an audit diff
    let (status, _) = send(
        &app,
        json_request(
            "PUT",
            &format!("/api/learners/{}", learner_id),
            Some(&token),
            json!({
                "national_id": "8001015009087",
                "first_name": "Thandiwe",
                "last_name": "Mokoena",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let after_json: Option<String> = sqlx::query_scalar(
        "SELECT after_json FROM audit_log WHERE entity_type = 'learner' AND action = 'update'",
    )
    .fetch_one(&app.state.db)
    .await
    .unwrap();
    let after: serde_json::Value = serde_json::from_str(&after_json.unwrap()).unwrap();
    // Only the changed field appears in the diff
    assert_eq!(after, json!({ "first_name": "Thandiwe" }));
}

#[tokio::test]
async fn test_login_rate_limit() {
    let app = {
        // Dedicated app with a 2/minute cap
        let tmp = tempfile::tempdir().unwrap();
        let pool = yiba_common::db::init_test_database().await.unwrap();
        let events = yiba_common::events::EventBus::new(16);
        let store = std::sync::Arc::new(
            yiba_server::services::storage::LocalDocumentStore::new(tmp.path().to_path_buf()),
        );
        let state = yiba_server::AppState::new(pool, events, store, 2);
        // Leak the tempdir for the test's lifetime
        std::mem::forget(tmp);
        state
    };
    let router = yiba_server::build_router(app.clone());

    use tower::util::ServiceExt;
    let mut last_status = StatusCode::OK;
    for _ in 0..4 {
        let request = json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": "nobody@yiba.example", "password": "x" }),
        );
        let response = router.clone().oneshot(request).await.unwrap();
        last_status = response.status();
    }
    assert_eq!(last_status, StatusCode::TOO_MANY_REQUESTS);
}
