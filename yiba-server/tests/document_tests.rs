//! Integration tests for document upload, dedup, download and exports

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use helpers::*;
use serde_json::json;
use yiba_common::Role;

const BOUNDARY: &str = "yiba-test-boundary";

/// Hand-built multipart body with a single file part plus text fields
fn multipart_request(
    uri: &str,
    token: &str,
    file_name: &str,
    file_bytes: &[u8],
    fields: &[(&str, &str)],
) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/pdf\r\n\r\n",
            BOUNDARY, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(file_bytes);
    body.extend_from_slice(b"\r\n");
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_upload_download_dedup_delete() {
    let app = setup_app().await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;
    let (_id, staff) = seed_user(
        &app.state,
        "staff@ikhaya.example",
        Role::InstitutionStaff,
        Some(institution_id),
    )
    .await;

    // Upload
    let (status, body) = send(
        &app,
        multipart_request(
            "/api/documents",
            &staff,
            "fire-certificate.pdf",
            b"%PDF-1.4 fire safety certificate",
            &[("kind", "evidence")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deduplicated"], false);
    assert_eq!(body["file_name"], "fire-certificate.pdf");
    assert_eq!(body["kind"], "evidence");
    let document_id = body["id"].as_str().unwrap().to_string();
    // storage_key never leaves the server
    assert!(body.get("storage_key").is_none());

    // Identical bytes dedup to the same row
    let (status, body) = send(
        &app,
        multipart_request(
            "/api/documents",
            &staff,
            "copy-of-certificate.pdf",
            b"%PDF-1.4 fire safety certificate",
            &[("kind", "evidence")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deduplicated"], true);
    assert_eq!(body["id"].as_str().unwrap(), document_id);

    // Download returns the original bytes and filename
    let (status, bytes) = send_raw(
        &app,
        get_request(
            &format!("/api/documents/{}/download", document_id),
            Some(&staff),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"%PDF-1.4 fire safety certificate");

    // Delete removes row and blob
    let (status, _) = send(
        &app,
        bare_request(
            "DELETE",
            &format!("/api/documents/{}", document_id),
            Some(&staff),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        get_request(&format!("/api/documents/{}", document_id), Some(&staff)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_validation() {
    let app = setup_app().await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;
    let (_id, staff) = seed_user(
        &app.state,
        "staff@ikhaya.example",
        Role::InstitutionStaff,
        Some(institution_id),
    )
    .await;

    // Unknown kind
    let (status, _) = send(
        &app,
        multipart_request("/api/documents", &staff, "x.pdf", b"data", &[("kind", "selfie")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Empty file
    let (status, _) = send(
        &app,
        multipart_request("/api/documents", &staff, "x.pdf", b"", &[]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Reviewer cannot upload (no DocumentWrite capability)
    let (_rid, reviewer) = seed_user(&app.state, "rev@qcto.example", Role::QctoReviewer, None).await;
    let (status, _) = send(
        &app,
        multipart_request("/api/documents", &reviewer, "x.pdf", b"data", &[]),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_document_in_open_submission_cannot_be_deleted() {
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
        multipart_request("/api/documents", &staff, "evidence.pdf", b"evidence", &[]),
    )
    .await;
    let document_id = body["id"].as_str().unwrap().to_string();

    let (_, body) = send(
        &app,
        json_request(
            "POST",
            "/api/submissions",
            Some(&staff),
            json!({ "title": "Pack" }),
        ),
    )
    .await;
    let submission_id = body["id"].as_str().unwrap().to_string();

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

    let (status, _) = send(
        &app,
        bare_request("DELETE", &format!("/api/documents/{}", document_id), Some(&staff)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// =============================================================================
// Exports
// =============================================================================

#[tokio::test]
async fn test_learners_csv_export() {
    let app = setup_app().await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;
    let (_id, admin) = seed_user(
        &app.state,
        "admin@ikhaya.example",
        Role::InstitutionAdmin,
        Some(institution_id),
    )
    .await;

    // A learner whose name needs CSV quoting
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/learners",
            Some(&admin),
            json!({
                "national_id": "8001015009087",
                "first_name": "Thandi",
                "last_name": "Mokoena, van der Merwe",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, bytes) = send_raw(&app, get_request("/api/exports/learners.csv", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(bytes).unwrap();
    let mut lines = text.lines();
    assert!(lines.next().unwrap().starts_with("id,national_id,first_name,last_name"));
    let row = lines.next().unwrap();
    assert!(row.contains("8001015009087"));
    // Embedded comma forced quoting
    assert!(row.contains("\"Mokoena, van der Merwe\""));
}

#[tokio::test]
async fn test_audit_csv_export_scoped_to_institution() {
    let app = setup_app().await;
    let own = seed_institution(&app.state, "Ikhaya College").await;
    let other = seed_institution(&app.state, "Vista Academy").await;
    let (_id, admin) = seed_user(
        &app.state,
        "admin@ikhaya.example",
        Role::InstitutionAdmin,
        Some(own),
    )
    .await;
    let (_id, other_admin) = seed_user(
        &app.state,
        "admin@vista.example",
        Role::InstitutionAdmin,
        Some(other),
    )
    .await;

    // One learner in each institution
    for (token, national_id) in [(&admin, "8001015009087"), (&other_admin, "8001015009186")] {
        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/api/learners",
                Some(token),
                json!({
                    "national_id": national_id,
                    "first_name": "T",
                    "last_name": "M",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, bytes) = send_raw(&app, get_request("/api/exports/audit.csv", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(bytes).unwrap();
    // Header + exactly one learner-create row (own institution only)
    assert_eq!(text.lines().count(), 2);
    assert!(text.contains(&own.to_string()));
    assert!(!text.contains(&other.to_string()));

    // Requesting the other institution explicitly is forbidden
    let (status, _) = send_raw(
        &app,
        get_request(
            &format!("/api/exports/audit.csv?institution_id={}", other),
            Some(&admin),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_readiness_json_export() {
    let app = setup_app().await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;
    let qualification_id = seed_qualification(&app.state, "OC-ELEC-4").await;
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
            "/api/readiness",
            Some(&staff),
            json!({ "qualification_id": qualification_id }),
        ),
    )
    .await;
    let form_id = body["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        get_request(&format!("/api/exports/readiness/{}", form_id), Some(&staff)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["form"]["status"], "draft");
    assert_eq!(body["sections"].as_array().unwrap().len(), 7);
    assert!(body["documents"].as_array().unwrap().is_empty());
}

// =============================================================================
// Settings
// =============================================================================

#[tokio::test]
async fn test_settings_endpoints() {
    let app = setup_app().await;
    let (_id, platform) =
        seed_user(&app.state, "root@yiba.example", Role::PlatformAdmin, None).await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;
    let (_sid, staff) = seed_user(
        &app.state,
        "staff@ikhaya.example",
        Role::InstitutionStaff,
        Some(institution_id),
    )
    .await;

    // Staff cannot read settings
    let (status, _) = send(&app, get_request("/api/settings", Some(&staff))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Platform admin reads defaults
    let (status, body) = send(&app, get_request("/api/settings", Some(&platform))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["campaign_batch_size"], "25");

    // Known key updates
    let (status, _) = send(
        &app,
        json_request(
            "PUT",
            "/api/settings/campaign_batch_size",
            Some(&platform),
            json!({ "value": "10" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, get_request("/api/settings", Some(&platform))).await;
    assert_eq!(body["campaign_batch_size"], "10");

    // Unknown key rejected
    let (status, _) = send(
        &app,
        json_request(
            "PUT",
            "/api/settings/no_such_setting",
            Some(&platform),
            json!({ "value": "1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
