/*!
 * HTTP Handlers Module
 *
 * Request handlers for the clinic API, plus the shared application
 * state and the role guards handlers use.
 */

pub mod appointments;
pub mod availability;
pub mod calendar;
pub mod members;
pub mod service_items;
pub mod settings;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::models::{AuthContext, Role};
use crate::services::OutboundSender;
use crate::utils::{AppError, Result};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub outbound: OutboundSender,
}

/// Any authenticated clinic member (staff token of any role)
pub fn require_member(ctx: &AuthContext) -> Result<()> {
    if ctx.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden("此操作僅限診所成員".to_string()))
    }
}

/// Admin or practitioner (read-only members are excluded)
pub fn require_staff(ctx: &AuthContext) -> Result<i64> {
    require_member(ctx)?;
    if ctx.is_admin() || ctx.is_practitioner() {
        ctx.user_id
            .ok_or_else(|| AppError::Unauthorized("Missing user id".to_string()))
    } else {
        Err(AppError::Forbidden("權限不足".to_string()))
    }
}

/// Admin only
pub fn require_admin(ctx: &AuthContext) -> Result<i64> {
    require_member(ctx)?;
    if ctx.is_admin() {
        ctx.user_id
            .ok_or_else(|| AppError::Unauthorized("Missing user id".to_string()))
    } else {
        Err(AppError::Forbidden("此操作僅限管理員".to_string()))
    }
}

/// The target user themselves, or an admin
pub fn require_self_or_admin(ctx: &AuthContext, target_user_id: i64) -> Result<i64> {
    require_member(ctx)?;
    match ctx.user_id {
        Some(user_id) if user_id == target_user_id || ctx.roles.contains(&Role::Admin) => {
            Ok(user_id)
        }
        _ => Err(AppError::Forbidden("只能管理自己的行事曆".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActorKind;

    fn staff_ctx(roles: Vec<Role>) -> AuthContext {
        AuthContext {
            user_id: Some(10),
            patient_id: None,
            clinic_id: 1,
            roles,
            actor: ActorKind::ClinicStaff,
        }
    }

    #[test]
    fn test_patient_token_is_not_a_member() {
        let ctx = AuthContext {
            user_id: None,
            patient_id: Some(5),
            clinic_id: 1,
            roles: Vec::new(),
            actor: ActorKind::Patient,
        };
        assert!(require_member(&ctx).is_err());
    }

    #[test]
    fn test_read_only_member_is_not_staff() {
        let ctx = staff_ctx(vec![Role::ReadOnly]);
        assert!(require_member(&ctx).is_ok());
        assert!(require_staff(&ctx).is_err());
        assert!(require_admin(&ctx).is_err());
    }

    #[test]
    fn test_practitioner_is_staff_not_admin() {
        let ctx = staff_ctx(vec![Role::Practitioner]);
        assert_eq!(require_staff(&ctx).unwrap(), 10);
        assert!(require_admin(&ctx).is_err());
    }

    #[test]
    fn test_self_or_admin() {
        let ctx = staff_ctx(vec![Role::Practitioner]);
        assert!(require_self_or_admin(&ctx, 10).is_ok());
        assert!(require_self_or_admin(&ctx, 11).is_err());

        let admin = staff_ctx(vec![Role::Admin]);
        assert!(require_self_or_admin(&admin, 11).is_ok());
    }
}
