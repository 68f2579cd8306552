//! HTTP API handlers
//!
//! One module per domain. Tenancy and QCTO read-scoping helpers live
//! here so every handler applies the same rules.

use uuid::Uuid;
use yiba_common::api::types::AuthUser;
use yiba_common::{Capability, Role};

use crate::error::ApiError;
use crate::AppState;

pub mod audit;
pub mod auth;
pub mod campaigns;
pub mod dashboard;
pub mod documents;
pub mod enrolments;
pub mod exports;
pub mod health;
pub mod institutions;
pub mod learners;
pub mod notifications;
pub mod qualifications;
pub mod readiness;
pub mod reviews;
pub mod settings;
pub mod sse;
pub mod submissions;
pub mod users;

/// Require a capability on the caller's role
pub(crate) fn require_cap(user: &AuthUser, cap: Capability) -> Result<(), ApiError> {
    yiba_common::rbac::require_cap(user.role, cap).map_err(ApiError::from)
}

/// Resolve the institution an operation targets
///
/// Institution users always operate on their own institution; a mismatched
/// explicit id is a 403, not a filter. Regulator and platform users must
/// name the institution.
pub(crate) fn scoped_institution(
    user: &AuthUser,
    requested: Option<Uuid>,
) -> Result<Uuid, ApiError> {
    match user.institution_id {
        Some(own) => match requested {
            Some(requested) if requested != own => Err(ApiError::Forbidden(
                "Cannot operate on another institution".to_string(),
            )),
            _ => Ok(own),
        },
        None => requested.ok_or_else(|| {
            ApiError::BadRequest("institution_id is required for this role".to_string())
        }),
    }
}

/// QCTO read scoping for institution-owned records
///
/// Institution users may read their own institution. QCTO admins and
/// platform admins read everything. QCTO reviewers read an institution
/// only once it has a non-draft submission or the reviewer is assigned
/// there.
pub(crate) async fn assert_can_read_institution(
    state: &AppState,
    user: &AuthUser,
    institution_id: Uuid,
) -> Result<(), ApiError> {
    match user.role {
        Role::PlatformAdmin | Role::QctoAdmin => Ok(()),
        Role::QctoReviewer => {
            let visible = crate::db::submissions::reviewer_can_read_institution(
                &state.db,
                user.user_id,
                institution_id,
            )
            .await?;
            if visible {
                Ok(())
            } else {
                Err(ApiError::Forbidden(
                    "Institution is not visible to this reviewer".to_string(),
                ))
            }
        }
        Role::InstitutionAdmin | Role::InstitutionStaff => {
            if user.institution_id == Some(institution_id) {
                Ok(())
            } else {
                Err(ApiError::Forbidden(
                    "Cannot read another institution".to_string(),
                ))
            }
        }
    }
}
