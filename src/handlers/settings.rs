/*!
 * Clinic Settings HTTP Handlers
 *
 * Settings read/partial-update, appointment-type deletion (with its
 * pre-flight validation), LIFF token rotation, and message previews.
 */

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::handlers::{require_admin, require_member, AppState};
use crate::models::{
    AppointmentTypeResponse, AuthContext, BookingRestrictionSettings, ChatSettings, Clinic,
    ClinicInfoSettings, LiffUrls, NotificationSettings, ReceiptSettings,
};
use crate::services::message_template::TemplateValues;
use crate::services::SettingsService;
use crate::utils::liff::build_liff_url;
use crate::utils::time::{clinic_today, format_appointment_datetime};
use crate::utils::{AppError, Result};

/// Full settings payload returned by `GET /settings`
#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub clinic_id: i64,
    pub clinic_name: String,
    pub appointment_types: Vec<AppointmentTypeResponse>,
    pub notification_settings: NotificationSettings,
    pub booking_restriction_settings: BookingRestrictionSettings,
    pub clinic_info_settings: ClinicInfoSettings,
    pub chat_settings: ChatSettings,
    pub receipt_settings: ReceiptSettings,
    pub liff_urls: Option<LiffUrls>,
}

/// GET /api/clinic/settings
///
/// Full settings plus the active service list and LIFF URLs. Available
/// to every clinic member, including read-only users.
pub async fn get_settings(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse> {
    require_member(&ctx)?;

    let clinic = load_clinic(&state, ctx.clinic_id).await?;
    let settings = clinic.validated_settings()?;
    let service = SettingsService::new(state.pool.clone());
    let appointment_types = service
        .list_appointment_types(ctx.clinic_id)
        .await?
        .into_iter()
        .map(AppointmentTypeResponse::from)
        .collect();

    let liff_urls = clinic.liff_access_token.as_deref().map(|token| {
        let base = &state.config.frontend_url;
        LiffUrls {
            home: build_liff_url(base, "home", token),
            book: build_liff_url(base, "book", token),
            query: build_liff_url(base, "query", token),
            settings: build_liff_url(base, "settings", token),
            notifications: build_liff_url(base, "notifications", token),
        }
    });

    let response = SettingsResponse {
        clinic_id: clinic.id,
        clinic_name: clinic.name.clone(),
        appointment_types,
        notification_settings: settings.notification_settings.clone(),
        booking_restriction_settings: settings.booking_restriction_settings.clone(),
        clinic_info_settings: settings.clinic_info_settings.clone(),
        chat_settings: settings.chat_settings.clone(),
        receipt_settings: settings.receipt_settings.clone(),
        liff_urls,
    };
    Ok((StatusCode::OK, Json(response)))
}

/// PUT /api/clinic/settings
///
/// Partial deep-merge update; may also carry an `appointment_types`
/// array for the settings-page reconciliation.
pub async fn update_settings(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse> {
    require_admin(&ctx)?;

    let service = SettingsService::new(state.pool.clone());
    service.update_settings(ctx.clinic_id, payload).await?;
    Ok((StatusCode::OK, Json(json!({"message": "設定更新成功"}))))
}

/// Request body for deletion validation
#[derive(Debug, Deserialize)]
pub struct ValidateDeletionRequest {
    pub appointment_type_ids: Vec<i64>,
}

/// POST /api/clinic/appointment-types/validate-deletion
pub async fn validate_appointment_type_deletion(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<ValidateDeletionRequest>,
) -> Result<impl IntoResponse> {
    require_admin(&ctx)?;

    let service = SettingsService::new(state.pool.clone());
    let validation = service
        .validate_deletion(ctx.clinic_id, &request.appointment_type_ids)
        .await?;
    Ok((StatusCode::OK, Json(validation)))
}

/// DELETE /api/clinic/appointment-types/{id}
pub async fn delete_appointment_type(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    require_admin(&ctx)?;

    let service = SettingsService::new(state.pool.clone());
    service.delete_appointment_type(ctx.clinic_id, id).await?;
    Ok((StatusCode::OK, Json(json!({"message": "預約類型已刪除"}))))
}

/// POST /api/clinic/regenerate-liff-token
///
/// The new token is not echoed back; clients re-read settings for the
/// refreshed URLs.
pub async fn regenerate_liff_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse> {
    require_admin(&ctx)?;

    let service = SettingsService::new(state.pool.clone());
    service.regenerate_liff_token(ctx.clinic_id).await?;
    Ok((
        StatusCode::OK,
        Json(json!({"success": true, "message": "Token regenerated successfully"})),
    ))
}

/// Request body for message previews
#[derive(Debug, Deserialize)]
pub struct MessagePreviewRequest {
    pub appointment_type_id: i64,
    pub patient_name: Option<String>,
    pub practitioner_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessagePreviewResponse {
    pub preview: String,
}

/// POST /api/clinic/reminder-preview
///
/// Render the service's reminder template with sample values so admins
/// can see the outgoing text.
pub async fn reminder_preview(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<MessagePreviewRequest>,
) -> Result<impl IntoResponse> {
    require_member(&ctx)?;

    let (values, reminder_template) = preview_context(&state, &ctx, &request).await?;
    Ok((
        StatusCode::OK,
        Json(MessagePreviewResponse {
            preview: values.render(&reminder_template),
        }),
    ))
}

/// POST /api/clinic/cancellation-preview
pub async fn cancellation_preview(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<MessagePreviewRequest>,
) -> Result<impl IntoResponse> {
    require_member(&ctx)?;

    let (values, _) = preview_context(&state, &ctx, &request).await?;
    let preview = format!(
        "{} 您好，您的預約已取消：\n{}\n時間：{}\n如有疑問請與診所聯繫。\n{}",
        values.patient_name,
        values.appointment_type_name,
        values.appointment_datetime,
        values.clinic_name
    );
    Ok((StatusCode::OK, Json(MessagePreviewResponse { preview })))
}

/// Sample-value render context for a service; returns the values and
/// the service's reminder template
async fn preview_context(
    state: &AppState,
    ctx: &AuthContext,
    request: &MessagePreviewRequest,
) -> Result<(TemplateValues, String)> {
    let clinic = load_clinic(state, ctx.clinic_id).await?;
    let settings = clinic.validated_settings()?;

    let service = SettingsService::new(state.pool.clone());
    let appointment_type = service
        .list_appointment_types(ctx.clinic_id)
        .await?
        .into_iter()
        .find(|at| at.id == request.appointment_type_id)
        .ok_or_else(|| AppError::NotFound("預約類型不存在".to_string()))?;

    let sample_time = chrono::NaiveTime::from_hms_opt(10, 0, 0).expect("sample time");
    let values = TemplateValues {
        patient_name: request
            .patient_name
            .clone()
            .unwrap_or_else(|| "王小明".to_string()),
        practitioner_name: request
            .practitioner_name
            .clone()
            .unwrap_or_else(|| "李治療師".to_string()),
        appointment_type_name: appointment_type.name.clone(),
        appointment_datetime: format_appointment_datetime(clinic_today(), sample_time),
        clinic_name: clinic.effective_display_name(&settings),
        clinic_phone: settings.clinic_info_settings.phone_number.clone(),
        clinic_address: settings.clinic_info_settings.address.clone(),
        notes: None,
    };
    Ok((values, appointment_type.reminder_message.clone()))
}

async fn load_clinic(state: &AppState, clinic_id: i64) -> Result<Clinic> {
    sqlx::query_as::<_, Clinic>("SELECT * FROM clinics WHERE id = $1")
        .bind(clinic_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("診所不存在".to_string()))
}
