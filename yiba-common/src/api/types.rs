//! Shared API request/response types

use crate::rbac::{role_capabilities, Capability, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticated caller, injected into request extensions by the session
/// middleware and read by every protected handler
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub institution_id: Option<Uuid>,
    pub role: Role,
}

impl AuthUser {
    pub fn has_cap(&self, cap: Capability) -> bool {
        crate::rbac::has_cap(self.role, cap)
    }
}

/// User profile as returned by the API (never includes credentials)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub institution_id: Option<Uuid>,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub active: bool,
    pub capabilities: Vec<Capability>,
}

impl UserProfile {
    /// Attach the role's capability list to a profile
    pub fn with_capabilities(mut self) -> Self {
        self.capabilities = role_capabilities(self.role).to_vec();
        self
    }
}

