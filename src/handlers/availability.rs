/*!
 * Practitioner Availability HTTP Handlers
 *
 * Weekly template read/replace, free-slot queries (single date and
 * batch), the batch conflict check, and availability exceptions.
 */

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::handlers::{require_member, require_self_or_admin, require_staff, AppState};
use crate::models::settings::BookingRestrictionSettings;
use crate::models::appointment_type::AppointmentType;
use crate::models::{
    ActorKind, AuthContext, AvailabilityPeriod, CreateExceptionRequest, WeeklyAvailabilityRequest,
    WeeklyAvailabilityResponse,
};
use crate::services::availability_service::{
    filter_slots_by_resources, free_slots, overlaps, schedule_conflict, ConflictDetail,
};
use crate::services::booking_policy::{check_booking_window, check_lead_time};
use crate::services::{AvailabilityService, CalendarService};
use crate::utils::time::{clinic_now, format_hhmm, parse_hhmm};
use crate::utils::{AppError, ConflictKind, Result};

const MAX_BATCH_PRACTITIONERS: usize = 10;
const MAX_BATCH_DATES: usize = 62;

/// GET /api/clinic/practitioners/{id}/availability/default
pub async fn get_weekly_availability(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(practitioner_id): Path<i64>,
) -> Result<impl IntoResponse> {
    require_member(&ctx)?;

    let service = AvailabilityService::new(state.pool.clone());
    let template = service
        .weekly_template(practitioner_id, ctx.clinic_id)
        .await?;

    let mut days: Vec<Vec<AvailabilityPeriod>> = vec![Vec::new(); 7];
    for row in template {
        let index = row.day_of_week as usize;
        if index < 7 {
            days[index].push(AvailabilityPeriod {
                start_time: format_hhmm(row.start_time),
                end_time: format_hhmm(row.end_time),
            });
        }
    }

    Ok((
        StatusCode::OK,
        Json(WeeklyAvailabilityResponse {
            user_id: practitioner_id,
            days,
        }),
    ))
}

/// PUT /api/clinic/practitioners/{id}/availability/default
///
/// Replace the full weekly template. Practitioners manage their own;
/// admins manage anyone's.
pub async fn put_weekly_availability(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(practitioner_id): Path<i64>,
    Json(request): Json<WeeklyAvailabilityRequest>,
) -> Result<impl IntoResponse> {
    require_self_or_admin(&ctx, practitioner_id)?;
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Validation error: {}", e)))?;
    let days = request.parsed().map_err(AppError::Validation)?;

    let service = AvailabilityService::new(state.pool.clone());
    service
        .replace_weekly_template(practitioner_id, ctx.clinic_id, &days)
        .await?;
    Ok((StatusCode::OK, Json(json!({"message": "預設時段已更新"}))))
}

/// One free slot in responses
#[derive(Debug, Serialize)]
pub struct SlotResponse {
    pub start_time: String,
    pub end_time: String,
}

/// Query parameters for the single-date slot query
#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
    pub appointment_type_id: i64,
    pub exclude_calendar_event_id: Option<i64>,
}

/// GET /api/clinic/practitioners/{id}/availability/slots
///
/// Clinic members see the raw free slots; a patient (LIFF) caller gets
/// the additional booking-restriction filtering applied.
pub async fn get_available_slots(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(practitioner_id): Path<i64>,
    Query(query): Query<SlotsQuery>,
) -> Result<impl IntoResponse> {
    let slots = compute_slots(
        &state,
        &ctx,
        practitioner_id,
        &[query.date],
        query.appointment_type_id,
        query.exclude_calendar_event_id,
    )
    .await?;
    let day_slots = slots.into_iter().next().map(|(_, s)| s).unwrap_or_default();
    Ok((StatusCode::OK, Json(json!({ "date": query.date, "slots": day_slots }))))
}

/// Request body for the multi-date slot query
#[derive(Debug, Deserialize)]
pub struct BatchSlotsRequest {
    pub dates: Vec<NaiveDate>,
    pub appointment_type_id: i64,
    pub exclude_calendar_event_id: Option<i64>,
}

/// POST /api/clinic/practitioners/{id}/availability/slots/batch
pub async fn get_available_slots_batch(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(practitioner_id): Path<i64>,
    Json(request): Json<BatchSlotsRequest>,
) -> Result<impl IntoResponse> {
    if request.dates.is_empty() || request.dates.len() > MAX_BATCH_DATES {
        return Err(AppError::Validation(format!(
            "日期數量必須介於 1 到 {}",
            MAX_BATCH_DATES
        )));
    }

    let slots = compute_slots(
        &state,
        &ctx,
        practitioner_id,
        &request.dates,
        request.appointment_type_id,
        request.exclude_calendar_event_id,
    )
    .await?;

    let results: Vec<_> = slots
        .into_iter()
        .map(|(date, day_slots)| json!({ "date": date, "slots": day_slots }))
        .collect();
    Ok((StatusCode::OK, Json(json!({ "results": results }))))
}

/// Shared slot computation: batched loads, then per-date slot math.
/// Patient callers additionally have the booking restrictions applied
/// to each candidate start.
async fn compute_slots(
    state: &AppState,
    ctx: &AuthContext,
    practitioner_id: i64,
    dates: &[NaiveDate],
    appointment_type_id: i64,
    exclude_calendar_event_id: Option<i64>,
) -> Result<Vec<(NaiveDate, Vec<SlotResponse>)>> {
    let clinic_id = ctx.clinic_id;
    let patient_facing = ctx.actor == ActorKind::Patient;
    let appointment_type = load_service(state, clinic_id, appointment_type_id).await?;
    let restrictions = load_booking_restrictions(state, clinic_id).await?;

    let availability = AvailabilityService::new(state.pool.clone());
    let schedules = availability
        .day_schedules(&[practitioner_id], clinic_id, dates)
        .await?;
    let requirements = availability.resource_requirements(appointment_type_id).await?;

    let now = clinic_now();
    let mut results = Vec::with_capacity(dates.len());
    for &date in dates {
        let schedule = schedules
            .get(&(practitioner_id, date))
            .cloned()
            .unwrap_or_default();
        let mut slots = free_slots(
            &schedule,
            appointment_type.duration_minutes as i64,
            appointment_type.scheduling_buffer_minutes as i64,
            restrictions.step_size_minutes,
            exclude_calendar_event_id,
        );
        if !requirements.is_empty() {
            let pool = availability.resource_pool(clinic_id, date).await?;
            slots = filter_slots_by_resources(slots, &pool, &requirements);
        }
        if patient_facing {
            slots.retain(|&(start, _)| {
                check_lead_time(&restrictions, now, date, start).is_ok()
                    && check_booking_window(&restrictions, now.date(), date).is_ok()
            });
        }
        results.push((
            date,
            slots
                .into_iter()
                .map(|(start, end)| SlotResponse {
                    start_time: format_hhmm(start),
                    end_time: format_hhmm(end),
                })
                .collect(),
        ));
    }
    Ok(results)
}

/// Request body for the batch conflict check
#[derive(Debug, Deserialize)]
pub struct BatchConflictRequest {
    pub practitioner_ids: Vec<i64>,
    pub date: NaiveDate,
    /// `HH:MM`
    pub start_time: String,
    pub appointment_type_id: i64,
    pub exclude_calendar_event_id: Option<i64>,
    /// When set, these concrete instances are checked instead of the
    /// service's requirements
    pub selected_resource_ids: Option<Vec<i64>>,
}

/// One practitioner's verdict in the batch conflict response
#[derive(Debug, Serialize)]
pub struct PractitionerConflict {
    pub practitioner_id: i64,
    pub conflict: Option<ConflictDetail>,
}

/// POST /api/clinic/practitioners/availability/conflicts/batch
///
/// Classify the highest-priority conflict per practitioner for a
/// proposed slot. Staff only; exceptions surface as warnings here but do
/// not stop a staff booking.
pub async fn batch_conflict_check(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<BatchConflictRequest>,
) -> Result<impl IntoResponse> {
    require_staff(&ctx)?;
    if request.practitioner_ids.is_empty()
        || request.practitioner_ids.len() > MAX_BATCH_PRACTITIONERS
    {
        return Err(AppError::Validation(format!(
            "治療師數量必須介於 1 到 {}",
            MAX_BATCH_PRACTITIONERS
        )));
    }
    let start_time =
        parse_hhmm(&request.start_time).ok_or_else(|| AppError::Validation("時間格式錯誤".to_string()))?;

    let appointment_type = load_service(&state, ctx.clinic_id, request.appointment_type_id).await?;
    let duration = appointment_type.duration_minutes as i64;
    let end_time = start_time + Duration::minutes(duration);

    let availability = AvailabilityService::new(state.pool.clone());
    let schedules = availability
        .day_schedules(&request.practitioner_ids, ctx.clinic_id, &[request.date])
        .await?;
    let requirements = availability
        .resource_requirements(request.appointment_type_id)
        .await?;
    let pool = availability.resource_pool(ctx.clinic_id, request.date).await?;

    let resource_blocked = match &request.selected_resource_ids {
        Some(selected) => selected.iter().any(|resource_id| {
            pool.allocations
                .get(resource_id)
                .map(|spans| spans.iter().any(|&(s, e)| overlaps(start_time, end_time, s, e)))
                .unwrap_or(false)
        }),
        None => !requirements.is_empty() && !pool.can_satisfy(&requirements, start_time, end_time),
    };

    let results: Vec<PractitionerConflict> = request
        .practitioner_ids
        .iter()
        .map(|&practitioner_id| {
            let schedule = schedules
                .get(&(practitioner_id, request.date))
                .cloned()
                .unwrap_or_default();
            let mut conflict = schedule_conflict(
                &schedule,
                start_time,
                duration,
                request.exclude_calendar_event_id,
            );
            if conflict.is_none() && resource_blocked {
                conflict = Some(ConflictDetail {
                    kind: ConflictKind::ResourceConflict,
                    message: ConflictKind::ResourceConflict.message().to_string(),
                    calendar_event_id: None,
                });
            }
            PractitionerConflict {
                practitioner_id,
                conflict,
            }
        })
        .collect();

    Ok((StatusCode::OK, Json(json!({ "results": results }))))
}

/// POST /api/clinic/practitioners/{id}/availability/exceptions
pub async fn create_exception(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(practitioner_id): Path<i64>,
    Json(request): Json<CreateExceptionRequest>,
) -> Result<impl IntoResponse> {
    require_self_or_admin(&ctx, practitioner_id)?;
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Validation error: {}", e)))?;

    let service = CalendarService::new(state.pool.clone());
    let (exception, overlapped) = service
        .create_exception(ctx.clinic_id, practitioner_id, &request)
        .await?;

    let body = if overlapped.is_empty() {
        json!({ "exception": exception })
    } else {
        json!({
            "exception": exception,
            "warning": "此休診時段與現有預約重疊，相關預約仍然有效",
            "overlapping_appointment_ids": overlapped,
        })
    };
    Ok((StatusCode::OK, Json(body)))
}

/// DELETE /api/clinic/practitioners/{id}/availability/exceptions/{eid}
pub async fn delete_exception(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((practitioner_id, calendar_event_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse> {
    require_self_or_admin(&ctx, practitioner_id)?;

    let service = CalendarService::new(state.pool.clone());
    service
        .delete_exception(ctx.clinic_id, practitioner_id, calendar_event_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn load_service(
    state: &AppState,
    clinic_id: i64,
    appointment_type_id: i64,
) -> Result<AppointmentType> {
    sqlx::query_as::<_, AppointmentType>(
        r#"
        SELECT * FROM appointment_types
        WHERE id = $1 AND clinic_id = $2 AND is_deleted = FALSE
        "#,
    )
    .bind(appointment_type_id)
    .bind(clinic_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("預約類型不存在".to_string()))
}

async fn load_booking_restrictions(
    state: &AppState,
    clinic_id: i64,
) -> Result<BookingRestrictionSettings> {
    let settings: serde_json::Value =
        sqlx::query_scalar("SELECT settings FROM clinics WHERE id = $1")
            .bind(clinic_id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("診所不存在".to_string()))?;
    let parsed = crate::models::ClinicSettings::from_value(settings)
        .map_err(AppError::Internal)?;
    Ok(parsed.booking_restriction_settings)
}
