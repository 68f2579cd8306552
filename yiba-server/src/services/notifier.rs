//! Event-driven notifier
//!
//! Subscribes to the EventBus and turns domain events into in-app
//! notification rows and queued decision emails. Runs as a background
//! task for the life of the process; a failed handler logs and moves on
//! so one bad event never stops the stream.

use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;
use yiba_common::events::{EventBus, YibaEvent};
use yiba_common::{Result, Role};

use crate::db::{institutions, notifications, outbox, users};
use crate::services::templates;

/// Spawn the notifier task
pub fn spawn_notifier(pool: SqlitePool, events: EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        info!("Notifier task started");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = handle_event(&pool, &event).await {
                        error!("Notifier failed to handle {:?}: {}", event, e);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Notifier lagged, {} events dropped", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    info!("Event bus closed, notifier stopping");
                    break;
                }
            }
        }
    })
}

async fn handle_event(pool: &SqlitePool, event: &YibaEvent) -> Result<()> {
    match event {
        YibaEvent::SubmissionSubmitted { submission_id, institution_id, .. } => {
            let institution_name = institution_name(pool, *institution_id).await?;
            for admin in users::list_by_role(pool, Role::QctoAdmin).await? {
                notifications::insert(
                    pool,
                    admin.id,
                    "submission_submitted",
                    "New submission awaiting review",
                    &format!("{} submitted evidence package {}", institution_name, submission_id),
                )
                .await?;
            }
            Ok(())
        }

        YibaEvent::SubmissionDecided { submission_id, institution_id, outcome, .. } => {
            notify_institution_decision(
                pool,
                *institution_id,
                "submission_decided",
                &format!("Submission {}", submission_id),
                outcome,
            )
            .await
        }

        YibaEvent::ReadinessSubmitted { form_id, institution_id, .. } => {
            let institution_name = institution_name(pool, *institution_id).await?;
            for admin in users::list_by_role(pool, Role::QctoAdmin).await? {
                notifications::insert(
                    pool,
                    admin.id,
                    "readiness_submitted",
                    "Readiness application submitted",
                    &format!("{} submitted readiness application {}", institution_name, form_id),
                )
                .await?;
            }
            Ok(())
        }

        YibaEvent::ReadinessDecided { form_id, institution_id, status, .. } => {
            notify_institution_decision(
                pool,
                *institution_id,
                "readiness_decided",
                &format!("Readiness application {}", form_id),
                status,
            )
            .await
        }

        YibaEvent::ReviewAssigned { submission_id, reviewer_id, institution_id, .. } => {
            let institution_name = institution_name(pool, *institution_id).await?;
            notifications::insert(
                pool,
                *reviewer_id,
                "review_assigned",
                "Submission assigned for review",
                &format!("You were assigned submission {} from {}", submission_id, institution_name),
            )
            .await?;
            Ok(())
        }

        YibaEvent::InviteAccepted { user_id, institution_id, .. } => {
            if let Some(institution_id) = institution_id {
                for admin in users::list_institution_admins(pool, *institution_id).await? {
                    if admin.id == *user_id {
                        continue;
                    }
                    notifications::insert(
                        pool,
                        admin.id,
                        "invite_accepted",
                        "Invitation accepted",
                        &format!("User {} activated their account", user_id),
                    )
                    .await?;
                }
            }
            Ok(())
        }

        // Uploads and campaign ticks stay SSE-only
        YibaEvent::DocumentUploaded { .. } | YibaEvent::CampaignProgress { .. } => Ok(()),
    }
}

/// Notify institution admins of a decision, in-app and by email
async fn notify_institution_decision(
    pool: &SqlitePool,
    institution_id: Uuid,
    kind: &str,
    what: &str,
    outcome: &str,
) -> Result<()> {
    let institution_name = institution_name(pool, institution_id).await?;

    for admin in users::list_institution_admins(pool, institution_id).await? {
        notifications::insert(
            pool,
            admin.id,
            kind,
            &format!("{} {}", what, outcome),
            &format!("{} for {} was {}", what, institution_name, outcome),
        )
        .await?;

        let body = templates::render(
            templates::DECISION_TEMPLATE,
            &[
                ("name", &admin.display_name),
                ("what", what),
                ("institution", &institution_name),
                ("outcome", outcome),
                ("comment_line", ""),
            ],
        );
        let subject = templates::render(
            templates::DECISION_SUBJECT,
            &[("what", what), ("outcome", outcome)],
        );
        outbox::queue_email(pool, None, &admin.email, &subject, &body).await?;
    }
    Ok(())
}

async fn institution_name(pool: &SqlitePool, institution_id: Uuid) -> Result<String> {
    Ok(institutions::find_by_id(pool, institution_id)
        .await?
        .map(|i| i.name)
        .unwrap_or_else(|| institution_id.to_string()))
}
