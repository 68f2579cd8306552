//! Database models
//!
//! Row structs shared between repositories and API responses. Timestamps
//! written by SQLite (`CURRENT_TIMESTAMP` defaults) stay as strings;
//! application-written instants are RFC3339.

use crate::status::{
    EnrolmentStatus, InstitutionStatus, ReadinessStatus, SectionStatus, SubmissionStatus,
};
use crate::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Institution {
    pub id: Uuid,
    pub name: String,
    pub trading_name: Option<String>,
    pub sdl_number: Option<String>,
    pub contact_email: String,
    pub phone: Option<String>,
    pub province: Option<String>,
    pub status: InstitutionStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub institution_id: Option<Uuid>,
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learner {
    pub id: Uuid,
    pub institution_id: Uuid,
    pub national_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Qualification {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub nqf_level: i64,
    pub curriculum_code: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrolment {
    pub id: Uuid,
    pub institution_id: Uuid,
    pub learner_id: Uuid,
    pub qualification_id: Uuid,
    pub status: EnrolmentStatus,
    pub enrolled_on: String,
    pub completed_on: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessForm {
    pub id: Uuid,
    pub institution_id: Uuid,
    pub qualification_id: Uuid,
    pub status: ReadinessStatus,
    pub submitted_at: Option<String>,
    pub decided_at: Option<String>,
    pub decision_comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessSection {
    pub form_id: Uuid,
    pub section_key: String,
    pub payload: serde_json::Value,
    pub status: SectionStatus,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub institution_id: Uuid,
    pub owner_user_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    #[serde(skip_serializing)]
    pub storage_key: String,
    pub kind: String,
    pub readiness_form_id: Option<Uuid>,
    pub readiness_section_key: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub institution_id: Uuid,
    pub readiness_form_id: Option<Uuid>,
    pub title: String,
    pub status: SubmissionStatus,
    pub submitted_at: Option<String>,
    pub decided_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewAssignment {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub reviewer_id: Uuid,
    pub assigned_by: Uuid,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub reviewer_id: Uuid,
    pub outcome: String,
    pub comment: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub institution_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub kind: String,
    pub institution_id: Option<Uuid>,
    pub created_by: Uuid,
    pub status: String,
    pub total: i64,
    pub sent: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEmail {
    pub id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
}
