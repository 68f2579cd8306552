//! Integration tests for readiness and submission workflows
//!
//! Covers the status transition tables end-to-end, reviewer scoping,
//! notifier fan-out and dashboard aggregates.

mod helpers;

use axum::http::StatusCode;
use helpers::*;
use serde_json::json;
use yiba_common::status::READINESS_SECTION_KEYS;
use yiba_common::Role;

async fn complete_all_sections(app: &TestApp, token: &str, form_id: &str) {
    for key in READINESS_SECTION_KEYS {
        let (status, _) = send(
            app,
            json_request(
                "PUT",
                &format!("/api/readiness/{}/sections/{}", form_id, key),
                Some(token),
                json!({ "payload": { "summary": format!("{} in place", key) }, "complete": true }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "section {} upsert failed", key);
    }
}

// =============================================================================
// Readiness workflow
// =============================================================================

#[tokio::test]
async fn test_readiness_full_workflow() {
    let app = setup_app().await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;
    let qualification_id = seed_qualification(&app.state, "OC-PLUMB-4").await;
    let (_id, staff) = seed_user(
        &app.state,
        "staff@ikhaya.example",
        Role::InstitutionStaff,
        Some(institution_id),
    )
    .await;
    let (_id, qcto) = seed_user(&app.state, "admin@qcto.example", Role::QctoAdmin, None).await;

    // Create the form
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/readiness",
            Some(&staff),
            json!({ "qualification_id": qualification_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "draft");
    let form_id = body["id"].as_str().unwrap().to_string();

    // One form per qualification
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/readiness",
            Some(&staff),
            json!({ "qualification_id": qualification_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // All sections exist from creation
    let (status, body) = send(
        &app,
        get_request(&format!("/api/readiness/{}", form_id), Some(&staff)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["sections"].as_array().unwrap().len(),
        READINESS_SECTION_KEYS.len()
    );

    // Submission blocked while sections are incomplete
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/readiness/{}/submit", form_id),
            Some(&staff),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"]["message"].as_str().unwrap().contains("incomplete"));

    // Writing a section moves draft -> in_progress
    complete_all_sections(&app, &staff, &form_id).await;
    let (_, body) = send(
        &app,
        get_request(&format!("/api/readiness/{}", form_id), Some(&staff)),
    )
    .await;
    assert_eq!(body["status"], "in_progress");

    // Unknown section key rejected
    let (status, _) = send(
        &app,
        json_request(
            "PUT",
            &format!("/api/readiness/{}/sections/marketing", form_id),
            Some(&staff),
            json!({ "payload": {} }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Submit
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/readiness/{}/submit", form_id),
            Some(&staff),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "submitted");
    assert!(body["submitted_at"].is_string());

    // Institution cannot decide its own form
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/readiness/{}/decision", form_id),
            Some(&staff),
            json!({ "status": "approved" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Sections frozen while submitted
    let (status, _) = send(
        &app,
        json_request(
            "PUT",
            &format!("/api/readiness/{}/sections/finance", form_id),
            Some(&staff),
            json!({ "payload": {}, "complete": true }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // QCTO cannot skip straight to approved
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/readiness/{}/decision", form_id),
            Some(&qcto),
            json!({ "status": "approved" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // submitted -> under_review -> returned -> (edit) -> submitted -> approved
    for (to, expected) in [("under_review", "under_review"), ("returned", "returned")] {
        let (status, body) = send(
            &app,
            json_request(
                "POST",
                &format!("/api/readiness/{}/decision", form_id),
                Some(&qcto),
                json!({ "status": to, "comment": "needs work" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], expected);
    }

    // Returned form becomes editable again and resubmittable
    complete_all_sections(&app, &staff, &form_id).await;
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/readiness/{}/submit", form_id),
            Some(&staff),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for to in ["under_review", "approved"] {
        let (status, _) = send(
            &app,
            json_request(
                "POST",
                &format!("/api/readiness/{}/decision", form_id),
                Some(&qcto),
                json!({ "status": to }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    // Terminal: no further decisions
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/readiness/{}/decision", form_id),
            Some(&qcto),
            json!({ "status": "returned" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // The whole history is audited as transitions
    let (_, body) = send(
        &app,
        get_request(
            &format!(
                "/api/audit?entity_type=readiness_form&entity_id={}&action=transition",
                form_id
            ),
            Some(&qcto),
        ),
    )
    .await;
    // in_progress, submitted, under_review, returned, in_progress,
    // submitted, under_review, approved
    assert_eq!(body["total"], 8);
}

// =============================================================================
// Submissions and reviews
// =============================================================================

struct SubmissionFixture {
    app: TestApp,
    institution_id: uuid::Uuid,
    staff: String,
    qcto: String,
    reviewer_id: uuid::Uuid,
    reviewer: String,
    submission_id: String,
}

async fn submission_fixture() -> SubmissionFixture {
    let app = setup_app().await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;
    let (_id, staff) = seed_user(
        &app.state,
        "staff@ikhaya.example",
        Role::InstitutionStaff,
        Some(institution_id),
    )
    .await;
    let (_id, qcto) = seed_user(&app.state, "admin@qcto.example", Role::QctoAdmin, None).await;
    let (reviewer_id, reviewer) =
        seed_user(&app.state, "rev@qcto.example", Role::QctoReviewer, None).await;

    // Create a draft submission with one document
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/submissions",
            Some(&staff),
            json!({ "title": "Accreditation evidence pack" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let submission_id = body["id"].as_str().unwrap().to_string();

    let document_id = seed_document(&app, institution_id).await;
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/items", submission_id),
            Some(&staff),
            json!({ "document_id": document_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    SubmissionFixture {
        app,
        institution_id,
        staff,
        qcto,
        reviewer_id,
        reviewer,
        submission_id,
    }
}

/// Insert a document row directly (blob not needed for workflow tests)
async fn seed_document(app: &TestApp, institution_id: uuid::Uuid) -> uuid::Uuid {
    let (owner, _) = seed_user(
        &app.state,
        &format!("owner-{}@ikhaya.example", uuid::Uuid::new_v4()),
        Role::InstitutionStaff,
        Some(institution_id),
    )
    .await;
    let id = uuid::Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO documents (id, institution_id, owner_user_id, file_name, content_type, size_bytes, sha256, storage_key)
        VALUES (?, ?, ?, 'evidence.pdf', 'application/pdf', 4, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(institution_id.to_string())
    .bind(owner.to_string())
    .bind(format!("{}{}", id.simple(), id.simple()))
    .bind(format!("{}/{}", institution_id, id))
    .execute(&app.state.db)
    .await
    .unwrap();
    id
}

#[tokio::test]
async fn test_submission_pipeline_and_reviewer_scoping() {
    let fx = submission_fixture().await;
    let app = &fx.app;

    // Reviewer sees nothing before submission + assignment
    let (_, body) = send(app, get_request("/api/submissions", Some(&fx.reviewer))).await;
    assert_eq!(body["total"], 0);

    // Drafts are invisible to QCTO admins too
    let (_, body) = send(app, get_request("/api/submissions", Some(&fx.qcto))).await;
    assert_eq!(body["total"], 0);

    // Cannot assign a draft
    let (status, _) = send(
        app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/assignments", fx.submission_id),
            Some(&fx.qcto),
            json!({ "reviewer_id": fx.reviewer_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Submit
    let (status, body) = send(
        app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/submit", fx.submission_id),
            Some(&fx.staff),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "submitted");

    // Items frozen after submission
    let doc = seed_document(app, fx.institution_id).await;
    let (status, _) = send(
        app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/items", fx.submission_id),
            Some(&fx.staff),
            json!({ "document_id": doc }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Reviewer still cannot read it (not assigned)
    let (status, _) = send(
        app,
        get_request(&format!("/api/submissions/{}", fx.submission_id), Some(&fx.reviewer)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Reviewer cannot record a review either
    let (status, _) = send(
        app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/reviews", fx.submission_id),
            Some(&fx.reviewer),
            json!({ "outcome": "accept" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Assign; first assignment moves submitted -> under_review
    let (status, _) = send(
        app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/assignments", fx.submission_id),
            Some(&fx.qcto),
            json!({ "reviewer_id": fx.reviewer_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Double-assign is a conflict
    let (status, _) = send(
        app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/assignments", fx.submission_id),
            Some(&fx.qcto),
            json!({ "reviewer_id": fx.reviewer_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Now the reviewer sees it and can read the detail
    let (_, body) = send(app, get_request("/api/submissions", Some(&fx.reviewer))).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["submissions"][0]["status"], "under_review");

    let (status, body) = send(
        app,
        get_request(&format!("/api/submissions/{}", fx.submission_id), Some(&fx.reviewer)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["documents"].as_array().unwrap().len(), 1);

    // Record a return decision
    let (status, body) = send(
        app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/reviews", fx.submission_id),
            Some(&fx.reviewer),
            json!({ "outcome": "return", "comment": "missing facilities evidence" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "return");

    let (_, body) = send(
        app,
        get_request(&format!("/api/submissions/{}", fx.submission_id), Some(&fx.staff)),
    )
    .await;
    assert_eq!(body["status"], "returned");

    // Institution edits and resubmits, admin decides directly
    let (status, _) = send(
        app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/items", fx.submission_id),
            Some(&fx.staff),
            json!({ "document_id": doc }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/submit", fx.submission_id),
            Some(&fx.staff),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/assignments", fx.submission_id),
            Some(&fx.qcto),
            json!({ "reviewer_id": fx.reviewer_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/reviews", fx.submission_id),
            Some(&fx.qcto),
            json!({ "outcome": "accept" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        app,
        get_request(&format!("/api/submissions/{}", fx.submission_id), Some(&fx.staff)),
    )
    .await;
    assert_eq!(body["status"], "accepted");
    assert!(body["decided_at"].is_string());
}

#[tokio::test]
async fn test_empty_submission_cannot_be_submitted() {
    let app = setup_app().await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;
    let (_id, staff) = seed_user(
        &app.state,
        "staff@ikhaya.example",
        Role::InstitutionStaff,
        Some(institution_id),
    )
    .await;

    let (_, body) = send(
        &app,
        json_request(
            "POST",
            "/api/submissions",
            Some(&staff),
            json!({ "title": "Empty pack" }),
        ),
    )
    .await;
    let submission_id = body["id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/submit", submission_id),
            Some(&staff),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// =============================================================================
// Notifier fan-out
// =============================================================================

#[tokio::test]
async fn test_notifier_writes_notifications_on_submission() {
    let fx = submission_fixture().await;
    let app = &fx.app;

    // The notifier normally runs from main; spawn it against the test bus
    yiba_server::services::notifier::spawn_notifier(
        app.state.db.clone(),
        app.state.events.clone(),
    );

    let (status, _) = send(
        app,
        json_request(
            "POST",
            &format!("/api/submissions/{}/submit", fx.submission_id),
            Some(&fx.staff),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Give the notifier task a moment to drain the event
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let (_, body) = send(app, get_request("/api/notifications", Some(&fx.qcto))).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["notifications"][0]["kind"], "submission_submitted");
    assert_eq!(body["notifications"][0]["read"], false);

    // Unread count and mark-read
    let (_, body2) = send(app, get_request("/api/notifications/unread-count", Some(&fx.qcto))).await;
    assert_eq!(body2["unread"], 1);

    let notification_id = body["notifications"][0]["id"].as_str().unwrap().to_string();
    let (status, _) = send(
        app,
        json_request(
            "POST",
            &format!("/api/notifications/{}/read", notification_id),
            Some(&fx.qcto),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(app, get_request("/api/notifications/unread-count", Some(&fx.qcto))).await;
    assert_eq!(body["unread"], 0);

    // The reviewer has no notifications (not assigned, different user)
    let (_, body) = send(app, get_request("/api/notifications", Some(&fx.reviewer))).await;
    assert_eq!(body["total"], 0);
}

// =============================================================================
// Dashboard
// =============================================================================

#[tokio::test]
async fn test_dashboard_panels_by_role() {
    let app = setup_app().await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;
    let qualification_id = seed_qualification(&app.state, "OC-WELD-3").await;
    let (_id, staff) = seed_user(
        &app.state,
        "staff@ikhaya.example",
        Role::InstitutionStaff,
        Some(institution_id),
    )
    .await;
    let (_id, qcto) = seed_user(&app.state, "admin@qcto.example", Role::QctoAdmin, None).await;

    // One learner + one enrolment
    let (_, body) = send(
        &app,
        json_request(
            "POST",
            "/api/learners",
            Some(&staff),
            json!({
                "national_id": "8001015009087",
                "first_name": "Thandi",
                "last_name": "Mokoena",
            }),
        ),
    )
    .await;
    let learner_id = body["id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/enrolments",
            Some(&staff),
            json!({ "learner_id": learner_id, "qualification_id": qualification_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get_request("/api/dashboard", Some(&staff))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["institution"]["learners"], 1);
    assert_eq!(body["institution"]["enrolments_by_status"]["registered"], 1);
    assert!(body["regulator"].is_null());

    let (status, body) = send(&app, get_request("/api/dashboard", Some(&qcto))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["institution"].is_null());
    assert_eq!(body["regulator"]["institutions_by_status"]["active"], 1);
}
