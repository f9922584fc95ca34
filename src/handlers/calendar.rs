/*!
 * Calendar HTTP Handlers
 *
 * Daily and monthly calendar views for one practitioner, and the batch
 * multi-practitioner range view. Hidden auto-assignments are filtered
 * from non-admin views.
 */

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::handlers::{require_member, AppState};
use crate::models::{AuthContext, BatchCalendarRequest};
use crate::services::CalendarService;
use crate::utils::{AppError, Result};

/// Query parameters for the calendar endpoint: either `month=YYYY-MM`
/// (monthly counts) or `date=YYYY-MM-DD` (daily events)
#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub month: Option<String>,
    pub date: Option<NaiveDate>,
}

/// GET /api/clinic/practitioners/{id}/availability/calendar
pub async fn get_practitioner_calendar(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(practitioner_id): Path<i64>,
    Query(query): Query<CalendarQuery>,
) -> Result<impl IntoResponse> {
    require_member(&ctx)?;
    let include_hidden = ctx.is_admin();

    let service = CalendarService::new(state.pool.clone());
    match (query.date, query.month) {
        (Some(date), _) => {
            let daily = service
                .daily_calendar(ctx.clinic_id, practitioner_id, date, include_hidden)
                .await?;
            Ok((StatusCode::OK, Json(serde_json::to_value(daily).unwrap_or_default())))
        }
        (None, Some(month)) => {
            let monthly = service
                .monthly_calendar(ctx.clinic_id, practitioner_id, &month, include_hidden)
                .await?;
            Ok((StatusCode::OK, Json(serde_json::to_value(monthly).unwrap_or_default())))
        }
        (None, None) => Err(AppError::Validation(
            "必須提供 month 或 date 參數".to_string(),
        )),
    }
}

/// POST /api/clinic/practitioners/calendar/batch
pub async fn batch_calendar(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<BatchCalendarRequest>,
) -> Result<impl IntoResponse> {
    require_member(&ctx)?;
    if request.practitioner_ids.is_empty() {
        return Err(AppError::Validation("必須提供治療師".to_string()));
    }
    let include_hidden = ctx.is_admin();

    let service = CalendarService::new(state.pool.clone());
    let calendars = service
        .batch_calendar(ctx.clinic_id, &request, include_hidden)
        .await?;
    Ok((StatusCode::OK, Json(serde_json::to_value(calendars).unwrap_or_default())))
}
