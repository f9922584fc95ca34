/*!
 * Calendar Assembly
 *
 * Builds daily, monthly, and batch calendar views over the core model,
 * and manages availability exceptions (which live on the same calendar).
 *
 * Views are assembled from bulk loads: one joined scan for events with
 * their patient / LINE user / service enrichment, then one lookup per
 * id-set for resource names and receipt status. Practitioner-facing
 * views hide appointments that are still auto-assigned; the admin
 * pending-review listing shows exactly those.
 */

use std::collections::HashMap;

use axum::http::StatusCode;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use serde_json::json;
use sqlx::PgPool;

use crate::models::availability::CalendarEventType;
use crate::models::{
    AppointmentStatus, AvailabilityException, BatchCalendarRequest, BatchCalendarResponse,
    CalendarAppointmentView, CalendarEvent, CalendarEventView, CreateExceptionRequest,
    DailyCalendarResponse, ExceptionResponse, MonthlyCalendarDay, MonthlyCalendarResponse,
    PendingReviewAppointment, PractitionerCalendar,
};
use crate::services::availability_service::AvailabilityService;
use crate::utils::time::{format_hhmm, parse_hhmm};
use crate::utils::{AppError, Result};

/// Calendar service
pub struct CalendarService {
    pool: PgPool,
}

/// Joined row for the event scan
#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    calendar_event_id: i64,
    event_type: CalendarEventType,
    date: NaiveDate,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
    event_name: Option<String>,
    practitioner_id: i64,
    appointment_id: Option<i64>,
    status: Option<AppointmentStatus>,
    notes: Option<String>,
    clinic_notes: Option<String>,
    is_auto_assigned: Option<bool>,
    pending_time_confirmation: Option<bool>,
    patient_id: Option<i64>,
    patient_name: Option<String>,
    patient_phone: Option<String>,
    patient_birthday: Option<NaiveDate>,
    line_display_name: Option<String>,
    line_clinic_display_name: Option<String>,
    appointment_type_id: Option<i64>,
    appointment_type_name: Option<String>,
}

impl CalendarService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Daily events for one practitioner, plus that weekday's default
    /// windows. `include_hidden` is false for practitioner-facing views.
    pub async fn daily_calendar(
        &self,
        clinic_id: i64,
        practitioner_id: i64,
        date: NaiveDate,
        include_hidden: bool,
    ) -> Result<DailyCalendarResponse> {
        let events = self
            .load_events(clinic_id, &[practitioner_id], date, date, include_hidden)
            .await?;

        let availability = AvailabilityService::new(self.pool.clone());
        let template = availability.weekly_template(practitioner_id, clinic_id).await?;
        let weekday = crate::utils::time::day_of_week(date);
        let default_hours = template
            .iter()
            .filter(|row| row.day_of_week == weekday)
            .map(|row| (format_hhmm(row.start_time), format_hhmm(row.end_time)))
            .collect();

        Ok(DailyCalendarResponse {
            date,
            events,
            default_hours,
        })
    }

    /// Per-day confirmed appointment counts for one month (`YYYY-MM`)
    pub async fn monthly_calendar(
        &self,
        clinic_id: i64,
        practitioner_id: i64,
        month: &str,
        include_hidden: bool,
    ) -> Result<MonthlyCalendarResponse> {
        let first_day = NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d")
            .map_err(|_| AppError::Validation("月份格式必須為 YYYY-MM".to_string()))?;
        let next_month = if first_day.month() == 12 {
            NaiveDate::from_ymd_opt(first_day.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(first_day.year(), first_day.month() + 1, 1)
        }
        .expect("valid month arithmetic");
        let last_day = next_month - Duration::days(1);

        let counts = sqlx::query_as::<_, (NaiveDate, i64)>(
            r#"
            SELECT ce.date, COUNT(*)
            FROM calendar_events ce
            JOIN appointments a ON a.calendar_event_id = ce.id
            WHERE ce.clinic_id = $1 AND ce.user_id = $2
              AND ce.date BETWEEN $3 AND $4
              AND a.status = 'confirmed'
              AND ($5 OR a.is_auto_assigned = FALSE)
            GROUP BY ce.date
            "#,
        )
        .bind(clinic_id)
        .bind(practitioner_id)
        .bind(first_day)
        .bind(last_day)
        .bind(include_hidden)
        .fetch_all(&self.pool)
        .await?;

        let exception_dates = sqlx::query_scalar::<_, NaiveDate>(
            r#"
            SELECT DISTINCT ce.date
            FROM calendar_events ce
            WHERE ce.clinic_id = $1 AND ce.user_id = $2
              AND ce.date BETWEEN $3 AND $4
              AND ce.event_type = 'availability_exception'
            "#,
        )
        .bind(clinic_id)
        .bind(practitioner_id)
        .bind(first_day)
        .bind(last_day)
        .fetch_all(&self.pool)
        .await?;

        let counts_by_date: HashMap<NaiveDate, i64> = counts.into_iter().collect();
        let mut days = Vec::new();
        let mut cursor = first_day;
        while cursor <= last_day {
            days.push(MonthlyCalendarDay {
                date: cursor,
                appointment_count: counts_by_date.get(&cursor).copied().unwrap_or(0),
                has_exception: exception_dates.contains(&cursor),
            });
            cursor += Duration::days(1);
        }

        Ok(MonthlyCalendarResponse {
            month: month.to_string(),
            days,
        })
    }

    /// Events for several practitioners over a date range
    pub async fn batch_calendar(
        &self,
        clinic_id: i64,
        request: &BatchCalendarRequest,
        include_hidden: bool,
    ) -> Result<BatchCalendarResponse> {
        if request.end_date < request.start_date {
            return Err(AppError::Validation("日期範圍不正確".to_string()));
        }
        let events = self
            .load_events(
                clinic_id,
                &request.practitioner_ids,
                request.start_date,
                request.end_date,
                include_hidden,
            )
            .await?;

        let mut by_practitioner: HashMap<i64, Vec<CalendarEventView>> = request
            .practitioner_ids
            .iter()
            .map(|&id| (id, Vec::new()))
            .collect();
        for event in events {
            by_practitioner
                .entry(event.practitioner_id)
                .or_default()
                .push(event);
        }

        let calendars = request
            .practitioner_ids
            .iter()
            .map(|&practitioner_id| PractitionerCalendar {
                practitioner_id,
                events: by_practitioner.remove(&practitioner_id).unwrap_or_default(),
            })
            .collect();

        Ok(BatchCalendarResponse { calendars })
    }

    /// Future confirmed appointments still hidden from their
    /// practitioner, ordered by (date, start time)
    pub async fn pending_review(&self, clinic_id: i64) -> Result<Vec<PendingReviewAppointment>> {
        let today = crate::utils::time::clinic_today();
        let rows = sqlx::query_as::<_, PendingReviewRow>(
            r#"
            SELECT a.id AS appointment_id, ce.date, ce.start_time, ce.end_time,
                   ce.user_id AS practitioner_id, uca.full_name AS practitioner_name,
                   p.name AS patient_name, att.name AS appointment_type_name
            FROM appointments a
            JOIN calendar_events ce ON ce.id = a.calendar_event_id
            JOIN patients p ON p.id = a.patient_id
            JOIN appointment_types att ON att.id = a.appointment_type_id
            LEFT JOIN user_clinic_associations uca
              ON uca.user_id = ce.user_id AND uca.clinic_id = ce.clinic_id
            WHERE ce.clinic_id = $1
              AND a.is_auto_assigned = TRUE
              AND a.status = 'confirmed'
              AND ce.date >= $2
            ORDER BY ce.date, ce.start_time
            "#,
        )
        .bind(clinic_id)
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PendingReviewAppointment {
                appointment_id: row.appointment_id,
                date: row.date,
                start_time: row.start_time,
                end_time: row.end_time,
                practitioner_id: row.practitioner_id,
                practitioner_name: row.practitioner_name,
                patient_name: row.patient_name,
                appointment_type_name: row.appointment_type_name,
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Availability exceptions
    // ------------------------------------------------------------------

    /// Create an availability exception. Overlapping confirmed
    /// appointments stay valid but block creation unless `force` is set;
    /// the 409 body lists them so the UI can offer the force retry.
    pub async fn create_exception(
        &self,
        clinic_id: i64,
        practitioner_id: i64,
        request: &CreateExceptionRequest,
    ) -> Result<(ExceptionResponse, Vec<i64>)> {
        let span = match (&request.start_time, &request.end_time) {
            (Some(start_raw), Some(end_raw)) => {
                let start = parse_hhmm(start_raw)
                    .ok_or_else(|| AppError::Validation("時間格式錯誤".to_string()))?;
                let end = parse_hhmm(end_raw)
                    .ok_or_else(|| AppError::Validation("時間格式錯誤".to_string()))?;
                if start >= end {
                    return Err(AppError::Validation(
                        "結束時間必須晚於開始時間".to_string(),
                    ));
                }
                Some((start, end))
            }
            (None, None) => None,
            _ => {
                return Err(AppError::Validation(
                    "開始與結束時間必須同時提供".to_string(),
                ))
            }
        };

        // Overlapping confirmed appointments on the date; all-day blocks
        // everything.
        let overlapping = sqlx::query_as::<_, (i64, NaiveTime, NaiveTime)>(
            r#"
            SELECT a.id, ce.start_time, ce.end_time
            FROM appointments a
            JOIN calendar_events ce ON ce.id = a.calendar_event_id
            WHERE ce.clinic_id = $1 AND ce.user_id = $2 AND ce.date = $3
              AND a.status = 'confirmed'
              AND ce.start_time IS NOT NULL
            ORDER BY ce.start_time
            "#,
        )
        .bind(clinic_id)
        .bind(practitioner_id)
        .bind(request.date)
        .fetch_all(&self.pool)
        .await?;

        let conflicting: Vec<i64> = overlapping
            .into_iter()
            .filter(|&(_, appt_start, appt_end)| match span {
                Some((start, end)) => appt_start < end && start < appt_end,
                None => true,
            })
            .map(|(id, _, _)| id)
            .collect();

        if !conflicting.is_empty() && !request.force {
            return Err(AppError::Detail {
                status: StatusCode::CONFLICT,
                detail: json!({
                    "error": "exception_overlaps_appointments",
                    "message": "此休診時段與現有預約重疊",
                    "appointment_ids": conflicting,
                }),
            });
        }

        let mut tx = self.pool.begin().await?;
        let event = sqlx::query_as::<_, CalendarEvent>(
            r#"
            INSERT INTO calendar_events
                (user_id, clinic_id, event_type, date, start_time, end_time, event_name)
            VALUES ($1, $2, 'availability_exception', $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(practitioner_id)
        .bind(clinic_id)
        .bind(request.date)
        .bind(span.map(|(start, _)| start))
        .bind(span.map(|(_, end)| end))
        .bind(request.event_name.as_deref())
        .fetch_one(&mut *tx)
        .await?;
        let exception = sqlx::query_as::<_, AvailabilityException>(
            r#"
            INSERT INTO availability_exceptions (calendar_event_id)
            VALUES ($1)
            RETURNING id, calendar_event_id, reason
            "#,
        )
        .bind(event.id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok((
            ExceptionResponse {
                calendar_event_id: exception.calendar_event_id,
                date: event.date,
                start_time: event.start_time.map(format_hhmm),
                end_time: event.end_time.map(format_hhmm),
                event_name: event.event_name,
            },
            conflicting,
        ))
    }

    /// Delete an availability exception; the calendar event cascades to
    /// the owned exception row
    pub async fn delete_exception(
        &self,
        clinic_id: i64,
        practitioner_id: i64,
        calendar_event_id: i64,
    ) -> Result<()> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM calendar_events
            WHERE id = $1 AND clinic_id = $2 AND user_id = $3
              AND event_type = 'availability_exception'
            "#,
        )
        .bind(calendar_event_id)
        .bind(clinic_id)
        .bind(practitioner_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if deleted == 0 {
            return Err(AppError::NotFound("休診時段不存在".to_string()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bulk loading
    // ------------------------------------------------------------------

    async fn load_events(
        &self,
        clinic_id: i64,
        practitioner_ids: &[i64],
        start_date: NaiveDate,
        end_date: NaiveDate,
        include_hidden: bool,
    ) -> Result<Vec<CalendarEventView>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT ce.id AS calendar_event_id, ce.event_type, ce.date,
                   ce.start_time, ce.end_time, ce.event_name,
                   ce.user_id AS practitioner_id,
                   a.id AS appointment_id, a.status, a.notes, a.clinic_notes,
                   a.is_auto_assigned, a.pending_time_confirmation,
                   p.id AS patient_id, p.name AS patient_name,
                   p.phone_number AS patient_phone, p.birthday AS patient_birthday,
                   lu.display_name AS line_display_name,
                   lu.clinic_display_name AS line_clinic_display_name,
                   att.id AS appointment_type_id, att.name AS appointment_type_name
            FROM calendar_events ce
            LEFT JOIN appointments a ON a.calendar_event_id = ce.id
            LEFT JOIN patients p ON p.id = a.patient_id
            LEFT JOIN line_users lu ON lu.id = p.line_user_id
            LEFT JOIN appointment_types att ON att.id = a.appointment_type_id
            WHERE ce.clinic_id = $1
              AND ce.user_id = ANY($2)
              AND ce.date BETWEEN $3 AND $4
              AND (a.id IS NULL OR a.status = 'confirmed')
              AND ($5 OR a.id IS NULL OR a.is_auto_assigned = FALSE)
            ORDER BY ce.date, ce.start_time NULLS FIRST
            "#,
        )
        .bind(clinic_id)
        .bind(practitioner_ids)
        .bind(start_date)
        .bind(end_date)
        .bind(include_hidden)
        .fetch_all(&self.pool)
        .await?;

        let appointment_ids: Vec<i64> =
            rows.iter().filter_map(|row| row.appointment_id).collect();

        let mut resource_names: HashMap<i64, Vec<String>> = HashMap::new();
        let mut receipt_status: HashMap<i64, String> = HashMap::new();
        if !appointment_ids.is_empty() {
            let resources = sqlx::query_as::<_, (i64, String)>(
                r#"
                SELECT ara.appointment_id, r.name
                FROM appointment_resource_allocations ara
                JOIN resources r ON r.id = ara.resource_id
                WHERE ara.appointment_id = ANY($1)
                ORDER BY r.name
                "#,
            )
            .bind(&appointment_ids)
            .fetch_all(&self.pool)
            .await?;
            for (appointment_id, name) in resources {
                resource_names.entry(appointment_id).or_default().push(name);
            }

            let receipts = sqlx::query_as::<_, (i64, String)>(
                "SELECT appointment_id, status FROM receipts WHERE appointment_id = ANY($1)",
            )
            .bind(&appointment_ids)
            .fetch_all(&self.pool)
            .await?;
            receipt_status.extend(receipts);
        }

        let practitioner_names: HashMap<i64, String> = sqlx::query_as::<_, (i64, String)>(
            r#"
            SELECT user_id, full_name FROM user_clinic_associations
            WHERE clinic_id = $1 AND user_id = ANY($2)
            "#,
        )
        .bind(clinic_id)
        .bind(practitioner_ids)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .collect();

        Ok(rows
            .into_iter()
            .map(|row| {
                let appointment = match (row.appointment_id, row.status) {
                    (Some(appointment_id), Some(status)) => Some(CalendarAppointmentView {
                        appointment_id,
                        status,
                        patient_id: row.patient_id.unwrap_or_default(),
                        patient_name: row.patient_name.clone().unwrap_or_default(),
                        patient_phone: row.patient_phone.clone(),
                        patient_birthday: row.patient_birthday,
                        line_display_name: row
                            .line_clinic_display_name
                            .clone()
                            .or_else(|| row.line_display_name.clone()),
                        appointment_type_id: row.appointment_type_id.unwrap_or_default(),
                        appointment_type_name: row
                            .appointment_type_name
                            .clone()
                            .unwrap_or_default(),
                        notes: row.notes.clone(),
                        clinic_notes: row.clinic_notes.clone(),
                        is_auto_assigned: row.is_auto_assigned.unwrap_or(false),
                        pending_time_confirmation: row
                            .pending_time_confirmation
                            .unwrap_or(false),
                        resource_names: resource_names
                            .get(&appointment_id)
                            .cloned()
                            .unwrap_or_default(),
                        receipt_status: receipt_status.get(&appointment_id).cloned(),
                    }),
                    _ => None,
                };
                CalendarEventView {
                    calendar_event_id: row.calendar_event_id,
                    event_type: row.event_type,
                    date: row.date,
                    start_time: row.start_time,
                    end_time: row.end_time,
                    event_name: row.event_name,
                    practitioner_id: row.practitioner_id,
                    practitioner_name: practitioner_names.get(&row.practitioner_id).cloned(),
                    appointment,
                }
            })
            .collect())
    }
}

/// Row shape for the pending-review scan
#[derive(Debug, sqlx::FromRow)]
struct PendingReviewRow {
    appointment_id: i64,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    practitioner_id: i64,
    practitioner_name: Option<String>,
    patient_name: String,
    appointment_type_name: String,
}
