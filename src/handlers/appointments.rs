/*!
 * Appointment HTTP Handlers
 *
 * Staff-side appointment creation, editing, cancellation, edit preview,
 * time-slot confirmation, and the admin pending-review listing.
 * Practitioners operate only on their own appointments; admins on any.
 */

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Serialize;
use serde_json::json;
use validator::Validate;

use crate::handlers::{require_admin, require_staff, AppState};
use crate::models::{
    ActorKind, AppointmentResponse, AuthContext, ConfirmTimeSlotRequest,
    CreateAppointmentRequest, UpdateAppointmentRequest,
};
use crate::services::notification_service::{NotificationIntent, NotificationKind, Recipient};
use crate::services::{AppointmentService, CalendarService, CancelOutcome};
use crate::utils::{AppError, Result};

/// POST /api/clinic/appointments
///
/// Create an appointment on behalf of a patient. Staff bypass booking
/// restrictions; practitioners may only book onto themselves.
pub async fn create_appointment(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<impl IntoResponse> {
    let staff_user_id = require_staff(&ctx)?;
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Validation error: {}", e)))?;
    if !ctx.is_admin() && request.practitioner_id != staff_user_id {
        return Err(AppError::Forbidden("治療師只能建立自己的預約".to_string()));
    }

    let service = AppointmentService::new(state.pool.clone(), state.outbound.clone());
    let created = service
        .create_appointment(ctx.clinic_id, request, ActorKind::ClinicStaff)
        .await?;
    Ok((StatusCode::CREATED, Json(AppointmentResponse::from(created))))
}

/// PUT /api/clinic/appointments/{id}
pub async fn update_appointment(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<impl IntoResponse> {
    let staff_user_id = require_staff(&ctx)?;
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Validation error: {}", e)))?;

    let service = AppointmentService::new(state.pool.clone(), state.outbound.clone());
    ensure_ownership(&service, &ctx, id, staff_user_id).await?;

    let updated = service
        .update_appointment(
            ctx.clinic_id,
            id,
            request,
            ActorKind::ClinicStaff,
            Some(staff_user_id),
            false,
            false,
        )
        .await?;
    Ok((StatusCode::OK, Json(AppointmentResponse::from(updated))))
}

/// DELETE /api/clinic/appointments/{id}
///
/// Cancel. Re-cancelling is a no-op that still returns 200.
pub async fn cancel_appointment(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let staff_user_id = require_staff(&ctx)?;

    let service = AppointmentService::new(state.pool.clone(), state.outbound.clone());
    ensure_ownership(&service, &ctx, id, staff_user_id).await?;

    let outcome = service
        .cancel_appointment(ctx.clinic_id, id, ActorKind::ClinicStaff, None)
        .await?;
    let message = match outcome {
        CancelOutcome::Cancelled => "預約已取消",
        CancelOutcome::AlreadyCancelled => "預約先前已取消",
    };
    Ok((StatusCode::OK, Json(json!({ "message": message }))))
}

/// A planned notification in the edit preview
#[derive(Debug, Serialize)]
pub struct PlannedNotification {
    pub recipient: String,
    pub recipient_id: i64,
    pub kind: String,
}

/// POST /api/clinic/appointments/{id}/edit-preview
///
/// Dry-run an edit: the conflict (if any) and who would be notified.
pub async fn edit_preview(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<impl IntoResponse> {
    require_staff(&ctx)?;

    let service = AppointmentService::new(state.pool.clone(), state.outbound.clone());
    let (conflict, intents) = service.preview_edit(ctx.clinic_id, id, &request).await?;

    let notifications: Vec<PlannedNotification> =
        intents.iter().map(describe_intent).collect();
    Ok((
        StatusCode::OK,
        Json(json!({ "conflict": conflict, "notifications": notifications })),
    ))
}

/// POST /api/clinic/appointments/{id}/confirm-time-slot
///
/// Confirm one of a pending multi-slot booking's candidate slots.
pub async fn confirm_time_slot(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(request): Json<ConfirmTimeSlotRequest>,
) -> Result<impl IntoResponse> {
    let staff_user_id = require_staff(&ctx)?;

    let service = AppointmentService::new(state.pool.clone(), state.outbound.clone());
    ensure_ownership(&service, &ctx, id, staff_user_id).await?;

    let confirmed = service
        .confirm_time_slot(ctx.clinic_id, id, request, staff_user_id)
        .await?;
    Ok((StatusCode::OK, Json(AppointmentResponse::from(confirmed))))
}

/// GET /api/clinic/pending-review-appointments
///
/// Future auto-assigned appointments awaiting admin review.
pub async fn pending_review_appointments(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse> {
    require_admin(&ctx)?;

    let service = CalendarService::new(state.pool.clone());
    let pending = service.pending_review(ctx.clinic_id).await?;
    Ok((StatusCode::OK, Json(json!({ "appointments": pending }))))
}

/// Practitioners may only touch their own appointments
async fn ensure_ownership(
    service: &AppointmentService,
    ctx: &AuthContext,
    appointment_id: i64,
    staff_user_id: i64,
) -> Result<()> {
    if ctx.is_admin() {
        return Ok(());
    }
    let appointment = service.load_appointment(ctx.clinic_id, appointment_id).await?;
    if appointment.practitioner_id != staff_user_id {
        return Err(AppError::Forbidden("只能管理自己的預約".to_string()));
    }
    Ok(())
}

fn describe_intent(intent: &NotificationIntent) -> PlannedNotification {
    let (recipient, recipient_id) = match intent.recipient {
        Recipient::Practitioner(id) => ("practitioner", id),
        Recipient::Patient(id) => ("patient", id),
    };
    let kind = match intent.kind {
        NotificationKind::PractitionerNewAppointment => "new_appointment",
        NotificationKind::PractitionerEdited => "appointment_edited",
        NotificationKind::PractitionerCancelled => "appointment_cancelled",
        NotificationKind::PatientConfirmation => "patient_confirmation",
        NotificationKind::PatientEdited => "patient_edited",
        NotificationKind::PatientCancelled => "patient_cancelled",
    };
    PlannedNotification {
        recipient: recipient.to_string(),
        recipient_id,
        kind: kind.to_string(),
    }
}
