//! Integration tests for campaigns and the outbox dispatch worker

mod helpers;

use axum::http::StatusCode;
use helpers::*;
use serde_json::json;
use yiba_common::db::settings::put_setting;
use yiba_common::Role;
use yiba_server::db::outbox;

#[tokio::test]
async fn test_campaign_validation() {
    let app = setup_app().await;
    let (_id, admin) = seed_user(&app.state, "admin@qcto.example", Role::QctoAdmin, None).await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;

    // Empty recipient list
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/campaigns",
            Some(&admin),
            json!({
                "kind": "user_invite",
                "role": "institution_staff",
                "institution_id": institution_id,
                "recipients": [],
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Institution role without institution_id
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/campaigns",
            Some(&admin),
            json!({
                "kind": "user_invite",
                "role": "institution_staff",
                "recipients": ["a@b.example"],
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Existing user among recipients
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/campaigns",
            Some(&admin),
            json!({
                "kind": "user_invite",
                "role": "institution_staff",
                "institution_id": institution_id,
                "recipients": ["admin@qcto.example"],
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_campaign_queues_one_invite_per_recipient() {
    let app = setup_app().await;
    let (_id, admin) = seed_user(&app.state, "admin@qcto.example", Role::QctoAdmin, None).await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/campaigns",
            Some(&admin),
            json!({
                "kind": "institution_invite",
                "role": "institution_admin",
                "institution_id": institution_id,
                // Duplicate collapses
                "recipients": ["one@ikhaya.example", "two@ikhaya.example", "ONE@ikhaya.example"],
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["status"], "running");
    let campaign_id = body["id"].as_str().unwrap().to_string();

    let queued: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM email_outbox WHERE campaign_id = ? AND status = 'queued'",
    )
    .bind(&campaign_id)
    .fetch_one(&app.state.db)
    .await
    .unwrap();
    assert_eq!(queued, 2);

    let invites: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invites WHERE campaign_id = ?")
        .bind(&campaign_id)
        .fetch_one(&app.state.db)
        .await
        .unwrap();
    assert_eq!(invites, 2);
}

#[tokio::test]
async fn test_dispatch_worker_drains_outbox_in_dev_mode() {
    let app = setup_app().await;
    let (_id, admin) = seed_user(&app.state, "admin@qcto.example", Role::QctoAdmin, None).await;
    let institution_id = seed_institution(&app.state, "Ikhaya College").await;

    // Tight pacing so the test completes quickly; gateway stays empty
    // (dev mode marks rows sent without a network call)
    put_setting(&app.state.db, "outbox_poll_interval_ms", "50")
        .await
        .unwrap();
    put_setting(&app.state.db, "campaign_batch_delay_ms", "10")
        .await
        .unwrap();
    put_setting(&app.state.db, "campaign_batch_jitter_ms", "0")
        .await
        .unwrap();

    yiba_server::services::campaign::spawn_dispatch_worker(
        app.state.db.clone(),
        app.state.events.clone(),
    );

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/campaigns",
            Some(&admin),
            json!({
                "kind": "institution_invite",
                "role": "institution_admin",
                "institution_id": institution_id,
                "recipients": ["one@ikhaya.example", "two@ikhaya.example", "three@ikhaya.example"],
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let campaign_id = body["id"].as_str().unwrap().to_string();

    // Poll until the worker has sent everything (bounded wait)
    let mut complete = false;
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let (_, body) = send(
            &app,
            get_request(&format!("/api/campaigns/{}", campaign_id), Some(&admin)),
        )
        .await;
        if body["status"] == "complete" {
            assert_eq!(body["sent"], 3);
            complete = true;
            break;
        }
    }
    assert!(complete, "dispatch worker did not drain the outbox in time");

    let queued: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM email_outbox WHERE status = 'queued'")
            .fetch_one(&app.state.db)
            .await
            .unwrap();
    assert_eq!(queued, 0);
}

#[tokio::test]
async fn test_failed_attempts_move_row_to_failed() {
    let app = setup_app().await;

    let id = outbox::queue_email(
        &app.state.db,
        None,
        "target@ikhaya.example",
        "Subject",
        "Body",
    )
    .await
    .unwrap();

    // Two failures under a cap of 3 keep the row queued
    outbox::mark_attempt_failed(&app.state.db, id, "gateway 502", 3)
        .await
        .unwrap();
    outbox::mark_attempt_failed(&app.state.db, id, "gateway 502", 3)
        .await
        .unwrap();

    let (status, attempts): (String, i64) =
        sqlx::query_as("SELECT status, attempts FROM email_outbox WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&app.state.db)
            .await
            .unwrap();
    assert_eq!(status, "queued");
    assert_eq!(attempts, 2);

    // Third failure crosses the cap
    outbox::mark_attempt_failed(&app.state.db, id, "gateway 502", 3)
        .await
        .unwrap();

    let (status, attempts): (String, i64) =
        sqlx::query_as("SELECT status, attempts FROM email_outbox WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&app.state.db)
            .await
            .unwrap();
    assert_eq!(status, "failed");
    assert_eq!(attempts, 3);

    // Failed rows are no longer picked up
    let batch = outbox::next_batch(&app.state.db, 10).await.unwrap();
    assert!(batch.is_empty());
}
