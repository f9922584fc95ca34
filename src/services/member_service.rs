/*!
 * Member Service
 *
 * Clinic membership management: listing, invitations, role updates, and
 * (de)activation. Every clinic must keep at least one active admin
 * association; role updates and deactivations that would remove the
 * last one are rejected.
 */

use std::collections::HashMap;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::info;

use crate::models::{
    MemberInviteResponse, MemberResponse, PractitionerResponse, Role, SignupToken, User,
    UserClinicAssociation,
};
use crate::utils::liff::generate_access_token;
use crate::utils::{AppError, Result};

const DEFAULT_INVITE_HOURS: i64 = 72;

/// Member service
pub struct MemberService {
    pool: PgPool,
}

impl MemberService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All members of a clinic, active and inactive
    pub async fn list_members(&self, clinic_id: i64) -> Result<Vec<MemberResponse>> {
        let associations = sqlx::query_as::<_, UserClinicAssociation>(
            r#"
            SELECT * FROM user_clinic_associations
            WHERE clinic_id = $1
            ORDER BY full_name, user_id
            "#,
        )
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await?;

        let user_ids: Vec<i64> = associations.iter().map(|assoc| assoc.user_id).collect();
        let users: HashMap<i64, User> =
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ANY($1)")
                .bind(&user_ids)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|user| (user.id, user))
                .collect();

        Ok(associations
            .into_iter()
            .map(|assoc| MemberResponse {
                user_id: assoc.user_id,
                email: users
                    .get(&assoc.user_id)
                    .map(|user| user.email.clone())
                    .unwrap_or_default(),
                full_name: assoc.full_name,
                roles: assoc.roles,
                is_active: assoc.is_active,
            })
            .collect())
    }

    /// Active practitioners for pickers
    pub async fn list_practitioners(&self, clinic_id: i64) -> Result<Vec<PractitionerResponse>> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            r#"
            SELECT user_id, full_name
            FROM user_clinic_associations
            WHERE clinic_id = $1 AND is_active = TRUE AND 'practitioner' = ANY(roles)
            ORDER BY full_name, user_id
            "#,
        )
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, full_name)| PractitionerResponse { user_id, full_name })
            .collect())
    }

    /// Create a signup token for inviting a member with the given roles
    pub async fn invite_member(
        &self,
        clinic_id: i64,
        roles: &[Role],
        expires_in_hours: Option<i64>,
    ) -> Result<MemberInviteResponse> {
        let expires_at =
            Utc::now() + Duration::hours(expires_in_hours.unwrap_or(DEFAULT_INVITE_HOURS));
        let role_strings: Vec<String> = roles.iter().map(|r| r.as_str().to_string()).collect();

        let token = sqlx::query_as::<_, SignupToken>(
            r#"
            INSERT INTO signup_tokens (clinic_id, token, default_roles, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(clinic_id)
        .bind(generate_access_token())
        .bind(&role_strings)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        info!("Created signup token for clinic {}", clinic_id);
        Ok(MemberInviteResponse {
            token: token.token,
            expires_at: token.expires_at,
        })
    }

    /// Replace a member's clinic roles, preserving the last active admin
    pub async fn update_member_roles(
        &self,
        clinic_id: i64,
        user_id: i64,
        roles: &[Role],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(Vec<String>, bool)> = sqlx::query_as(
            r#"
            SELECT roles, is_active FROM user_clinic_associations
            WHERE clinic_id = $1 AND user_id = $2
            FOR UPDATE
            "#,
        )
        .bind(clinic_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (current_roles, is_active) =
            current.ok_or_else(|| AppError::NotFound("成員不存在".to_string()))?;

        let dropping_admin = current_roles.iter().any(|r| r == Role::Admin.as_str())
            && !roles.contains(&Role::Admin);
        if dropping_admin && is_active {
            self.ensure_other_active_admin(&mut tx, clinic_id, user_id)
                .await?;
        }

        let role_strings: Vec<String> = roles.iter().map(|r| r.as_str().to_string()).collect();
        sqlx::query(
            r#"
            UPDATE user_clinic_associations
            SET roles = $1, updated_at = NOW()
            WHERE clinic_id = $2 AND user_id = $3
            "#,
        )
        .bind(&role_strings)
        .bind(clinic_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Deactivate a member, preserving the last active admin
    pub async fn deactivate_member(&self, clinic_id: i64, user_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(Vec<String>, bool)> = sqlx::query_as(
            r#"
            SELECT roles, is_active FROM user_clinic_associations
            WHERE clinic_id = $1 AND user_id = $2
            FOR UPDATE
            "#,
        )
        .bind(clinic_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (current_roles, is_active) =
            current.ok_or_else(|| AppError::NotFound("成員不存在".to_string()))?;
        if !is_active {
            return Ok(());
        }

        if current_roles.iter().any(|r| r == Role::Admin.as_str()) {
            self.ensure_other_active_admin(&mut tx, clinic_id, user_id)
                .await?;
        }

        sqlx::query(
            r#"
            UPDATE user_clinic_associations
            SET is_active = FALSE, updated_at = NOW()
            WHERE clinic_id = $1 AND user_id = $2
            "#,
        )
        .bind(clinic_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!("Deactivated member {} in clinic {}", user_id, clinic_id);
        Ok(())
    }

    /// Reactivate a previously deactivated member
    pub async fn reactivate_member(&self, clinic_id: i64, user_id: i64) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE user_clinic_associations
            SET is_active = TRUE, updated_at = NOW()
            WHERE clinic_id = $1 AND user_id = $2
            "#,
        )
        .bind(clinic_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(AppError::NotFound("成員不存在".to_string()));
        }
        Ok(())
    }

    async fn ensure_other_active_admin(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        clinic_id: i64,
        excluding_user_id: i64,
    ) -> Result<()> {
        let other_admins: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM user_clinic_associations
            WHERE clinic_id = $1 AND user_id <> $2
              AND is_active = TRUE AND 'admin' = ANY(roles)
            "#,
        )
        .bind(clinic_id)
        .bind(excluding_user_id)
        .fetch_one(&mut **tx)
        .await?;
        if other_admins == 0 {
            return Err(AppError::Validation(
                "診所必須至少保留一位管理員".to_string(),
            ));
        }
        Ok(())
    }
}
