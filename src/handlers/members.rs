/*!
 * Clinic Membership HTTP Handlers
 *
 * Member listing, invitations, role updates, and (de)activation. Role
 * updates and deactivations preserve the last active admin.
 */

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use validator::Validate;

use crate::handlers::{require_admin, require_member, AppState};
use crate::models::{AuthContext, MemberInviteRequest, UpdateMemberRolesRequest};
use crate::services::MemberService;
use crate::utils::{AppError, Result};

/// GET /api/clinic/members
pub async fn list_members(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse> {
    require_member(&ctx)?;

    let service = MemberService::new(state.pool.clone());
    let members = service.list_members(ctx.clinic_id).await?;
    Ok((StatusCode::OK, Json(json!({ "members": members }))))
}

/// GET /api/clinic/practitioners
pub async fn list_practitioners(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse> {
    require_member(&ctx)?;

    let service = MemberService::new(state.pool.clone());
    let practitioners = service.list_practitioners(ctx.clinic_id).await?;
    Ok((StatusCode::OK, Json(json!({ "practitioners": practitioners }))))
}

/// POST /api/clinic/members/invite
pub async fn invite_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<MemberInviteRequest>,
) -> Result<impl IntoResponse> {
    require_admin(&ctx)?;
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Validation error: {}", e)))?;

    let service = MemberService::new(state.pool.clone());
    let invite = service
        .invite_member(ctx.clinic_id, &request.roles, request.expires_in_hours)
        .await?;
    Ok((StatusCode::CREATED, Json(invite)))
}

/// PUT /api/clinic/members/{user_id}/roles
pub async fn update_member_roles(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(user_id): Path<i64>,
    Json(request): Json<UpdateMemberRolesRequest>,
) -> Result<impl IntoResponse> {
    require_admin(&ctx)?;
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Validation error: {}", e)))?;

    let service = MemberService::new(state.pool.clone());
    service
        .update_member_roles(ctx.clinic_id, user_id, &request.roles)
        .await?;
    Ok((StatusCode::OK, Json(json!({"message": "角色已更新"}))))
}

/// DELETE /api/clinic/members/{user_id}
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse> {
    require_admin(&ctx)?;

    let service = MemberService::new(state.pool.clone());
    service.deactivate_member(ctx.clinic_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/clinic/members/{user_id}/reactivate
pub async fn reactivate_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse> {
    require_admin(&ctx)?;

    let service = MemberService::new(state.pool.clone());
    service.reactivate_member(ctx.clinic_id, user_id).await?;
    Ok((StatusCode::OK, Json(json!({"message": "成員已重新啟用"}))))
}
