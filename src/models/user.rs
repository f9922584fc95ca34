/*!
 * User & Membership Models
 *
 * Staff accounts are global; clinic membership, roles, and the
 * clinic-specific display name live on the association row. Every clinic
 * must keep at least one active admin association at all times.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Clinic-scoped role carried on a user-clinic association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Practitioner,
    ReadOnly,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Practitioner => "practitioner",
            Role::ReadOnly => "read_only",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Role::Admin),
            "practitioner" => Some(Role::Practitioner),
            "read_only" => Some(Role::ReadOnly),
            _ => None,
        }
    }
}

/// Staff user database row
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    /// LINE user id for practitioner-facing push notifications
    pub line_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User-clinic association row; roles and display name are clinic-specific
#[derive(Debug, Clone, FromRow)]
pub struct UserClinicAssociation {
    pub id: i64,
    pub user_id: i64,
    pub clinic_id: i64,
    pub roles: Vec<String>,
    pub full_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserClinicAssociation {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.iter().any(|r| r == role.as_str())
    }
}

/// Signup token row for inviting new members
#[derive(Debug, Clone, FromRow)]
pub struct SignupToken {
    pub id: i64,
    pub clinic_id: i64,
    pub token: String,
    pub default_roles: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Member entry in the clinic member listing
#[derive(Debug, Clone, Serialize)]
pub struct MemberResponse {
    pub user_id: i64,
    pub email: String,
    pub full_name: String,
    pub roles: Vec<String>,
    pub is_active: bool,
}

/// Practitioner entry for pickers
#[derive(Debug, Clone, Serialize)]
pub struct PractitionerResponse {
    pub user_id: i64,
    pub full_name: String,
}

/// Request to invite a new team member
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MemberInviteRequest {
    /// Roles granted when the invitee signs up
    #[validate(length(min = 1, message = "至少需要一個角色"))]
    pub roles: Vec<Role>,
    /// Token validity in hours
    #[validate(range(min = 1, max = 336))]
    pub expires_in_hours: Option<i64>,
}

/// Response carrying the invite token
#[derive(Debug, Clone, Serialize)]
pub struct MemberInviteResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Request to replace a member's clinic roles
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateMemberRolesRequest {
    #[validate(length(min = 1, message = "至少需要一個角色"))]
    pub roles: Vec<Role>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Admin, Role::Practitioner, Role::ReadOnly] {
            assert_eq!(Role::from_str(role.as_str()), Some(role));
        }
        assert_eq!(Role::from_str("superuser"), None);
    }

    #[test]
    fn test_association_has_role() {
        let assoc = UserClinicAssociation {
            id: 1,
            user_id: 2,
            clinic_id: 3,
            roles: vec!["admin".to_string(), "practitioner".to_string()],
            full_name: "王小明".to_string(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(assoc.has_role(Role::Admin));
        assert!(assoc.has_role(Role::Practitioner));
        assert!(!assoc.has_role(Role::ReadOnly));
    }
}
