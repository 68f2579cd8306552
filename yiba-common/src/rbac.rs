//! Role-based access control
//!
//! Static per-role capability sets. Capability checks are pure lookups with
//! no database access; tenancy scoping (institution isolation, QCTO read
//! scoping) is layered on top in yiba-server.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Platform roles
///
/// A user holds exactly one role. Institution roles carry an
/// `institution_id`; regulator and platform roles do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Operates the platform itself; full access
    PlatformAdmin,
    /// Regulator administrator: all institutions, assigns reviewers
    QctoAdmin,
    /// Regulator reviewer: scoped to assigned submissions
    QctoReviewer,
    /// Institution administrator: manages own institution's records and users
    InstitutionAdmin,
    /// Institution staff: day-to-day record keeping, no user management
    InstitutionStaff,
}

impl Role {
    /// Database string form (matches CHECK constraint in the users table)
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::PlatformAdmin => "platform_admin",
            Role::QctoAdmin => "qcto_admin",
            Role::QctoReviewer => "qcto_reviewer",
            Role::InstitutionAdmin => "institution_admin",
            Role::InstitutionStaff => "institution_staff",
        }
    }

    /// Parse from database string form
    pub fn parse(s: &str) -> Result<Role> {
        match s {
            "platform_admin" => Ok(Role::PlatformAdmin),
            "qcto_admin" => Ok(Role::QctoAdmin),
            "qcto_reviewer" => Ok(Role::QctoReviewer),
            "institution_admin" => Ok(Role::InstitutionAdmin),
            "institution_staff" => Ok(Role::InstitutionStaff),
            other => Err(Error::Internal(format!("Unknown role: {}", other))),
        }
    }

    /// True for roles bound to a single institution
    pub fn is_institution_role(&self) -> bool {
        matches!(self, Role::InstitutionAdmin | Role::InstitutionStaff)
    }

    /// True for regulator-side roles
    pub fn is_qcto_role(&self) -> bool {
        matches!(self, Role::QctoAdmin | Role::QctoReviewer)
    }
}

/// Fine-grained capabilities checked per operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    InstitutionCreate,
    InstitutionRead,
    InstitutionUpdate,
    InstitutionStatus,
    UserManage,
    LearnerRead,
    LearnerWrite,
    EnrolmentWrite,
    QualificationWrite,
    ReadinessRead,
    ReadinessWrite,
    ReadinessReview,
    DocumentRead,
    DocumentWrite,
    SubmissionRead,
    SubmissionWrite,
    SubmissionReview,
    ReviewAssign,
    AuditRead,
    NotificationRead,
    ExportData,
    DashboardView,
    CampaignManage,
    SettingsManage,
}

/// Capability set for a role
///
/// Slices are static so checks never allocate. The sets mirror the
/// per-role conditionals of the original route handlers, collapsed into
/// one table.
pub fn role_capabilities(role: Role) -> &'static [Capability] {
    use Capability::*;

    match role {
        Role::PlatformAdmin => &[
            InstitutionCreate,
            InstitutionRead,
            InstitutionUpdate,
            InstitutionStatus,
            UserManage,
            LearnerRead,
            LearnerWrite,
            EnrolmentWrite,
            QualificationWrite,
            ReadinessRead,
            ReadinessWrite,
            ReadinessReview,
            DocumentRead,
            DocumentWrite,
            SubmissionRead,
            SubmissionWrite,
            SubmissionReview,
            ReviewAssign,
            AuditRead,
            NotificationRead,
            ExportData,
            DashboardView,
            CampaignManage,
            SettingsManage,
        ],
        Role::QctoAdmin => &[
            InstitutionCreate,
            InstitutionRead,
            InstitutionStatus,
            UserManage,
            LearnerRead,
            QualificationWrite,
            ReadinessRead,
            ReadinessReview,
            DocumentRead,
            SubmissionRead,
            SubmissionReview,
            ReviewAssign,
            AuditRead,
            NotificationRead,
            ExportData,
            DashboardView,
            CampaignManage,
        ],
        Role::QctoReviewer => &[
            InstitutionRead,
            LearnerRead,
            ReadinessRead,
            ReadinessReview,
            DocumentRead,
            SubmissionRead,
            SubmissionReview,
            NotificationRead,
            DashboardView,
        ],
        Role::InstitutionAdmin => &[
            InstitutionRead,
            InstitutionUpdate,
            UserManage,
            LearnerRead,
            LearnerWrite,
            EnrolmentWrite,
            ReadinessRead,
            ReadinessWrite,
            DocumentRead,
            DocumentWrite,
            SubmissionRead,
            SubmissionWrite,
            AuditRead,
            NotificationRead,
            ExportData,
            DashboardView,
        ],
        Role::InstitutionStaff => &[
            InstitutionRead,
            LearnerRead,
            LearnerWrite,
            EnrolmentWrite,
            ReadinessRead,
            ReadinessWrite,
            DocumentRead,
            DocumentWrite,
            SubmissionRead,
            SubmissionWrite,
            NotificationRead,
            DashboardView,
        ],
    }
}

/// Check whether a role holds a capability
pub fn has_cap(role: Role, cap: Capability) -> bool {
    role_capabilities(role).contains(&cap)
}

/// Require a capability, returning Forbidden when absent
pub fn require_cap(role: Role, cap: Capability) -> Result<()> {
    if has_cap(role, cap) {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "Role {} lacks capability {:?}",
            role.as_str(),
            cap
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [
            Role::PlatformAdmin,
            Role::QctoAdmin,
            Role::QctoReviewer,
            Role::InstitutionAdmin,
            Role::InstitutionStaff,
        ] {
            assert_eq!(Role::parse(role.as_str()).unwrap(), role);
        }
        assert!(Role::parse("superuser").is_err());
    }

    #[test]
    fn test_platform_admin_has_everything() {
        use Capability::*;
        for cap in [
            InstitutionCreate,
            UserManage,
            SettingsManage,
            AuditRead,
            SubmissionReview,
        ] {
            assert!(has_cap(Role::PlatformAdmin, cap));
        }
    }

    #[test]
    fn test_institution_staff_cannot_manage_users() {
        assert!(!has_cap(Role::InstitutionStaff, Capability::UserManage));
        assert!(has_cap(Role::InstitutionAdmin, Capability::UserManage));
    }

    #[test]
    fn test_reviewer_cannot_write_institution_records() {
        assert!(!has_cap(Role::QctoReviewer, Capability::LearnerWrite));
        assert!(!has_cap(Role::QctoReviewer, Capability::SubmissionWrite));
        assert!(has_cap(Role::QctoReviewer, Capability::SubmissionReview));
    }

    #[test]
    fn test_only_institution_roles_carry_tenancy() {
        assert!(Role::InstitutionAdmin.is_institution_role());
        assert!(Role::InstitutionStaff.is_institution_role());
        assert!(!Role::QctoReviewer.is_institution_role());
        assert!(Role::QctoReviewer.is_qcto_role());
        assert!(!Role::PlatformAdmin.is_qcto_role());
    }

    #[test]
    fn test_require_cap_errors_forbidden() {
        let err = require_cap(Role::QctoReviewer, Capability::SettingsManage).unwrap_err();
        assert!(matches!(err, crate::Error::Forbidden(_)));
    }
}
