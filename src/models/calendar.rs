/*!
 * Calendar View Models
 *
 * Response DTOs for the daily / monthly / batch calendar endpoints.
 * Views are assembled from bulk loads; see `services::calendar_service`.
 */

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::models::appointment::AppointmentStatus;
use crate::models::availability::CalendarEventType;

/// One enriched event on a daily calendar
#[derive(Debug, Clone, Serialize)]
pub struct CalendarEventView {
    pub calendar_event_id: i64,
    pub event_type: CalendarEventType,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub event_name: Option<String>,
    pub practitioner_id: i64,
    pub practitioner_name: Option<String>,
    /// Present for appointment events only
    pub appointment: Option<CalendarAppointmentView>,
}

/// Appointment enrichment on a calendar event
#[derive(Debug, Clone, Serialize)]
pub struct CalendarAppointmentView {
    pub appointment_id: i64,
    pub status: AppointmentStatus,
    pub patient_id: i64,
    pub patient_name: String,
    pub patient_phone: Option<String>,
    pub patient_birthday: Option<NaiveDate>,
    pub line_display_name: Option<String>,
    pub appointment_type_id: i64,
    pub appointment_type_name: String,
    pub notes: Option<String>,
    pub clinic_notes: Option<String>,
    pub is_auto_assigned: bool,
    pub pending_time_confirmation: bool,
    pub resource_names: Vec<String>,
    pub receipt_status: Option<String>,
}

/// Daily calendar response: events plus the day's working windows
#[derive(Debug, Clone, Serialize)]
pub struct DailyCalendarResponse {
    pub date: NaiveDate,
    pub events: Vec<CalendarEventView>,
    /// The practitioner's default windows for this weekday, `HH:MM` pairs
    pub default_hours: Vec<(String, String)>,
}

/// Per-day appointment count in the monthly view
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyCalendarDay {
    pub date: NaiveDate,
    pub appointment_count: i64,
    pub has_exception: bool,
}

/// Monthly calendar response
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyCalendarResponse {
    pub month: String,
    pub days: Vec<MonthlyCalendarDay>,
}

/// Batch calendar request: several practitioners over a date range
#[derive(Debug, Clone, Deserialize)]
pub struct BatchCalendarRequest {
    pub practitioner_ids: Vec<i64>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Batch calendar response entry
#[derive(Debug, Clone, Serialize)]
pub struct PractitionerCalendar {
    pub practitioner_id: i64,
    pub events: Vec<CalendarEventView>,
}

/// Batch calendar response
#[derive(Debug, Clone, Serialize)]
pub struct BatchCalendarResponse {
    pub calendars: Vec<PractitionerCalendar>,
}

/// Pending-review entry: future confirmed appointments still hidden from
/// their practitioner
#[derive(Debug, Clone, Serialize)]
pub struct PendingReviewAppointment {
    pub appointment_id: i64,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub practitioner_id: i64,
    pub practitioner_name: Option<String>,
    pub patient_name: String,
    pub appointment_type_name: String,
}
