/*!
 * Service Item Bundle HTTP Handlers
 *
 * Read/create/update of a service item together with its practitioner
 * assignments, billing scenarios, resource requirements, and follow-up
 * messages.
 */

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use validator::Validate;

use crate::handlers::{require_admin, require_member, AppState};
use crate::models::{AuthContext, ServiceItemBundleRequest};
use crate::services::ServiceItemService;
use crate::utils::{AppError, Result};

/// GET /api/clinic/service-items/{id}/bundle
pub async fn get_service_item_bundle(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    require_member(&ctx)?;

    let service = ServiceItemService::new(state.pool.clone());
    let bundle = service.get_bundle(ctx.clinic_id, id).await?;
    Ok((StatusCode::OK, Json(bundle)))
}

/// POST /api/clinic/service-items/bundle
pub async fn create_service_item_bundle(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<ServiceItemBundleRequest>,
) -> Result<impl IntoResponse> {
    require_admin(&ctx)?;
    validate_request(&request)?;

    let service = ServiceItemService::new(state.pool.clone());
    let bundle = service.create_bundle(ctx.clinic_id, request).await?;
    Ok((StatusCode::CREATED, Json(bundle)))
}

/// PUT /api/clinic/service-items/{id}/bundle
pub async fn update_service_item_bundle(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(request): Json<ServiceItemBundleRequest>,
) -> Result<impl IntoResponse> {
    require_admin(&ctx)?;
    validate_request(&request)?;

    let service = ServiceItemService::new(state.pool.clone());
    let bundle = service.update_bundle(ctx.clinic_id, id, request).await?;
    Ok((StatusCode::OK, Json(bundle)))
}

fn validate_request(request: &ServiceItemBundleRequest) -> Result<()> {
    request
        .item
        .validate()
        .map_err(|e| AppError::Validation(format!("Validation error: {}", e)))?;
    for scenario in &request.associations.billing_scenarios {
        scenario
            .validate()
            .map_err(|e| AppError::Validation(format!("Validation error: {}", e)))?;
    }
    for requirement in &request.associations.resource_requirements {
        requirement
            .validate()
            .map_err(|e| AppError::Validation(format!("Validation error: {}", e)))?;
    }
    for message in &request.associations.follow_up_messages {
        message
            .validate()
            .map_err(|e| AppError::Validation(format!("Validation error: {}", e)))?;
    }
    Ok(())
}
