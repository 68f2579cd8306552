//! Domain status enums and transition rules
//!
//! Every workflow status move is validated against an explicit transition
//! table. Illegal moves surface as Conflict errors naming the from/to pair,
//! so handlers never encode workflow rules inline.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Readiness (Form 5) application status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    Draft,
    InProgress,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
    Returned,
}

impl ReadinessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessStatus::Draft => "draft",
            ReadinessStatus::InProgress => "in_progress",
            ReadinessStatus::Submitted => "submitted",
            ReadinessStatus::UnderReview => "under_review",
            ReadinessStatus::Approved => "approved",
            ReadinessStatus::Rejected => "rejected",
            ReadinessStatus::Returned => "returned",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(ReadinessStatus::Draft),
            "in_progress" => Ok(ReadinessStatus::InProgress),
            "submitted" => Ok(ReadinessStatus::Submitted),
            "under_review" => Ok(ReadinessStatus::UnderReview),
            "approved" => Ok(ReadinessStatus::Approved),
            "rejected" => Ok(ReadinessStatus::Rejected),
            "returned" => Ok(ReadinessStatus::Returned),
            other => Err(Error::Internal(format!("Unknown readiness status: {}", other))),
        }
    }

    /// Legal moves out of each status
    ///
    /// `returned → in_progress` is the rework loop: the institution edits
    /// and resubmits. Terminal states (approved, rejected) have no exits.
    pub fn transitions(&self) -> &'static [ReadinessStatus] {
        use ReadinessStatus::*;
        match self {
            Draft => &[InProgress],
            InProgress => &[Submitted],
            Submitted => &[UnderReview],
            UnderReview => &[Approved, Rejected, Returned],
            Returned => &[InProgress],
            Approved | Rejected => &[],
        }
    }

    pub fn can_transition(&self, to: ReadinessStatus) -> bool {
        self.transitions().contains(&to)
    }

    /// Moves only regulator-side roles may perform
    pub fn is_review_transition(&self, to: ReadinessStatus) -> bool {
        use ReadinessStatus::*;
        matches!(
            (self, to),
            (Submitted, UnderReview)
                | (UnderReview, Approved)
                | (UnderReview, Rejected)
                | (UnderReview, Returned)
        )
    }

    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReadinessStatus::Approved | ReadinessStatus::Rejected)
    }
}

/// Evidence submission status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Draft,
    Submitted,
    UnderReview,
    Returned,
    Accepted,
    Declined,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Draft => "draft",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::UnderReview => "under_review",
            SubmissionStatus::Returned => "returned",
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(SubmissionStatus::Draft),
            "submitted" => Ok(SubmissionStatus::Submitted),
            "under_review" => Ok(SubmissionStatus::UnderReview),
            "returned" => Ok(SubmissionStatus::Returned),
            "accepted" => Ok(SubmissionStatus::Accepted),
            "declined" => Ok(SubmissionStatus::Declined),
            other => Err(Error::Internal(format!("Unknown submission status: {}", other))),
        }
    }

    pub fn transitions(&self) -> &'static [SubmissionStatus] {
        use SubmissionStatus::*;
        match self {
            Draft => &[Submitted],
            Submitted => &[UnderReview],
            UnderReview => &[Accepted, Declined, Returned],
            Returned => &[Submitted],
            Accepted | Declined => &[],
        }
    }

    pub fn can_transition(&self, to: SubmissionStatus) -> bool {
        self.transitions().contains(&to)
    }

    /// Draft and returned submissions may have their item list edited
    pub fn is_editable(&self) -> bool {
        matches!(self, SubmissionStatus::Draft | SubmissionStatus::Returned)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Accepted | SubmissionStatus::Declined)
    }
}

/// Learner enrolment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrolmentStatus {
    Registered,
    Active,
    Completed,
    Withdrawn,
}

impl EnrolmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrolmentStatus::Registered => "registered",
            EnrolmentStatus::Active => "active",
            EnrolmentStatus::Completed => "completed",
            EnrolmentStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "registered" => Ok(EnrolmentStatus::Registered),
            "active" => Ok(EnrolmentStatus::Active),
            "completed" => Ok(EnrolmentStatus::Completed),
            "withdrawn" => Ok(EnrolmentStatus::Withdrawn),
            other => Err(Error::Internal(format!("Unknown enrolment status: {}", other))),
        }
    }

    pub fn transitions(&self) -> &'static [EnrolmentStatus] {
        use EnrolmentStatus::*;
        match self {
            Registered => &[Active, Withdrawn],
            Active => &[Completed, Withdrawn],
            Completed | Withdrawn => &[],
        }
    }

    pub fn can_transition(&self, to: EnrolmentStatus) -> bool {
        self.transitions().contains(&to)
    }
}

/// Institution lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstitutionStatus {
    Pending,
    Active,
    Suspended,
}

impl InstitutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstitutionStatus::Pending => "pending",
            InstitutionStatus::Active => "active",
            InstitutionStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(InstitutionStatus::Pending),
            "active" => Ok(InstitutionStatus::Active),
            "suspended" => Ok(InstitutionStatus::Suspended),
            other => Err(Error::Internal(format!("Unknown institution status: {}", other))),
        }
    }
}

/// Readiness form section completion state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Incomplete,
    Complete,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionStatus::Incomplete => "incomplete",
            SectionStatus::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "incomplete" => Ok(SectionStatus::Incomplete),
            "complete" => Ok(SectionStatus::Complete),
            other => Err(Error::Internal(format!("Unknown section status: {}", other))),
        }
    }
}

/// Fixed section keys of the readiness (Form 5) application
pub const READINESS_SECTION_KEYS: &[&str] = &[
    "governance",
    "finance",
    "facilities",
    "staffing",
    "learning_material",
    "assessment",
    "workplace_component",
];

/// Validate a readiness status move, producing a Conflict error on failure
pub fn check_readiness_transition(from: ReadinessStatus, to: ReadinessStatus) -> Result<()> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(Error::Conflict(format!(
            "Illegal readiness transition: {} -> {}",
            from.as_str(),
            to.as_str()
        )))
    }
}

/// Validate a submission status move, producing a Conflict error on failure
pub fn check_submission_transition(from: SubmissionStatus, to: SubmissionStatus) -> Result<()> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(Error::Conflict(format!(
            "Illegal submission transition: {} -> {}",
            from.as_str(),
            to.as_str()
        )))
    }
}
