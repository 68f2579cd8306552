//! Event types and EventBus
//!
//! Domain events are broadcast via the EventBus and consumed by the
//! notifier (in-app notifications + email outbox) and by the SSE stream.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Yiba domain events
///
/// Events carry enough context for consumers to act without a database
/// round trip for routing: institution scoping is on the event itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum YibaEvent {
    /// Institution submitted a readiness (Form 5) application
    ReadinessSubmitted {
        form_id: Uuid,
        institution_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Regulator decided a readiness application
    ReadinessDecided {
        form_id: Uuid,
        institution_id: Uuid,
        /// New status: approved, rejected or returned
        status: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Institution submitted an evidence package
    SubmissionSubmitted {
        submission_id: Uuid,
        institution_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Reviewer recorded a decision on a submission
    SubmissionDecided {
        submission_id: Uuid,
        institution_id: Uuid,
        /// Review outcome: accepted, declined or returned
        outcome: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// QCTO admin assigned a reviewer to a submission
    ReviewAssigned {
        submission_id: Uuid,
        institution_id: Uuid,
        reviewer_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Evidence document stored
    DocumentUploaded {
        document_id: Uuid,
        institution_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Invited user accepted and set a password
    InviteAccepted {
        user_id: Uuid,
        institution_id: Option<Uuid>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Outbox dispatch progress for a campaign
    CampaignProgress {
        campaign_id: Uuid,
        sent: i64,
        total: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl YibaEvent {
    /// Institution the event belongs to, for SSE scoping
    ///
    /// None means platform-wide (visible to QCTO and platform roles only).
    pub fn institution_id(&self) -> Option<Uuid> {
        match self {
            YibaEvent::ReadinessSubmitted { institution_id, .. }
            | YibaEvent::ReadinessDecided { institution_id, .. }
            | YibaEvent::SubmissionSubmitted { institution_id, .. }
            | YibaEvent::SubmissionDecided { institution_id, .. }
            | YibaEvent::ReviewAssigned { institution_id, .. }
            | YibaEvent::DocumentUploaded { institution_id, .. } => Some(*institution_id),
            YibaEvent::InviteAccepted { institution_id, .. } => *institution_id,
            YibaEvent::CampaignProgress { .. } => None,
        }
    }
}

/// Central event distribution bus
///
/// Wraps tokio::broadcast: non-blocking publish, multiple concurrent
/// subscribers, lagged-message detection for slow consumers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<YibaEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity
    ///
    /// 1000 is appropriate for production; tests use 10-100.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<YibaEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns the subscriber count; an event with no subscribers is
    /// silently dropped (Err from the channel is swallowed).
    pub fn emit(&self, event: YibaEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
