/*!
 * Appointment Model
 *
 * The scheduling record. Each appointment owns exactly one calendar
 * event. Within `confirmed`, three orthogonal flags track the
 * auto-assignment lifecycle:
 *
 * - `is_auto_assigned`: the appointment is still hidden from its
 *   practitioner.
 * - `originally_auto_assigned`: snapshot of whether the patient picked
 *   "no preference" at creation; never changes afterwards.
 * - `pending_time_confirmation`: the patient submitted two or more
 *   candidate slots and the clinic has not confirmed one yet.
 */

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Appointment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Confirmed,
    CanceledByPatient,
    CanceledByClinic,
}

impl AppointmentStatus {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::CanceledByPatient | AppointmentStatus::CanceledByClinic
        )
    }
}

/// Who initiated an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Patient,
    ClinicStaff,
    /// Background reveal scheduler
    Scheduler,
}

/// Practitioner selection at the API boundary. The wire format uses the
/// sentinel id `-1` for auto-assignment and null for "keep current".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PractitionerChoice {
    /// Keep the current practitioner (edit flows)
    Keep,
    /// Run the auto-assignment tie-break
    Auto,
    /// A specific practitioner
    Specific(i64),
}

/// Sentinel id meaning "no preference"
pub const AUTO_ASSIGN_SENTINEL: i64 = -1;

impl PractitionerChoice {
    pub fn from_optional_id(id: Option<i64>) -> Self {
        match id {
            None => PractitionerChoice::Keep,
            Some(AUTO_ASSIGN_SENTINEL) => PractitionerChoice::Auto,
            Some(id) => PractitionerChoice::Specific(id),
        }
    }
}

/// One candidate slot in a multi-slot booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternativeSlot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
}

/// Appointment database row
#[derive(Debug, Clone, FromRow)]
pub struct Appointment {
    pub id: i64,
    pub calendar_event_id: i64,
    pub patient_id: i64,
    pub appointment_type_id: i64,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub clinic_notes: Option<String>,
    pub is_auto_assigned: bool,
    pub originally_auto_assigned: bool,
    pub reassigned_by_user_id: Option<i64>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub pending_time_confirmation: bool,
    pub alternative_time_slots: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Decode the stored alternative slots, empty when absent
    pub fn alternative_slots(&self) -> Vec<AlternativeSlot> {
        self.alternative_time_slots
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// Appointment row joined with its calendar event, as most operations
/// need both
#[derive(Debug, Clone, FromRow)]
pub struct AppointmentWithEvent {
    pub id: i64,
    pub calendar_event_id: i64,
    pub patient_id: i64,
    pub appointment_type_id: i64,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub clinic_notes: Option<String>,
    pub is_auto_assigned: bool,
    pub originally_auto_assigned: bool,
    pub reassigned_by_user_id: Option<i64>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub pending_time_confirmation: bool,
    pub alternative_time_slots: Option<serde_json::Value>,
    pub practitioner_id: i64,
    pub clinic_id: i64,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Request to create an appointment on behalf of a patient
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAppointmentRequest {
    pub patient_id: i64,
    pub appointment_type_id: i64,
    /// Specific practitioner id, or -1 for auto-assignment
    pub practitioner_id: i64,
    pub date: NaiveDate,
    /// `HH:MM`
    pub start_time: String,
    #[validate(length(max = 2000, message = "備註過長"))]
    pub notes: Option<String>,
    #[validate(length(max = 2000, message = "備註過長"))]
    pub clinic_notes: Option<String>,
    /// Candidate slots for multi-slot services; two or more put the
    /// appointment into pending time confirmation
    #[serde(default)]
    pub alternative_time_slots: Vec<AlternativeSlot>,
}

/// Request to edit an appointment
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateAppointmentRequest {
    /// Null keeps the current practitioner; -1 requests auto-assignment
    pub practitioner_id: Option<i64>,
    pub date: Option<NaiveDate>,
    /// `HH:MM`
    pub start_time: Option<String>,
    #[validate(length(max = 2000, message = "備註過長"))]
    pub notes: Option<String>,
    #[validate(length(max = 2000, message = "備註過長"))]
    pub clinic_notes: Option<String>,
}

/// Request to confirm one of a pending appointment's candidate slots
#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmTimeSlotRequest {
    pub date: NaiveDate,
    /// `HH:MM`
    pub start_time: String,
}

/// Appointment response DTO
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentResponse {
    pub id: i64,
    pub calendar_event_id: i64,
    pub patient_id: i64,
    pub practitioner_id: i64,
    pub appointment_type_id: i64,
    pub status: AppointmentStatus,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub notes: Option<String>,
    pub clinic_notes: Option<String>,
    pub is_auto_assigned: bool,
    pub originally_auto_assigned: bool,
    pub pending_time_confirmation: bool,
    pub alternative_time_slots: Vec<AlternativeSlot>,
}

impl From<AppointmentWithEvent> for AppointmentResponse {
    fn from(row: AppointmentWithEvent) -> Self {
        let alternative_time_slots = row
            .alternative_time_slots
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        Self {
            id: row.id,
            calendar_event_id: row.calendar_event_id,
            patient_id: row.patient_id,
            practitioner_id: row.practitioner_id,
            appointment_type_id: row.appointment_type_id,
            status: row.status,
            date: row.date,
            start_time: row.start_time,
            end_time: row.end_time,
            notes: row.notes,
            clinic_notes: row.clinic_notes,
            is_auto_assigned: row.is_auto_assigned,
            originally_auto_assigned: row.originally_auto_assigned,
            pending_time_confirmation: row.pending_time_confirmation,
            alternative_time_slots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_practitioner_choice_from_wire_values() {
        assert_eq!(PractitionerChoice::from_optional_id(None), PractitionerChoice::Keep);
        assert_eq!(
            PractitionerChoice::from_optional_id(Some(-1)),
            PractitionerChoice::Auto
        );
        assert_eq!(
            PractitionerChoice::from_optional_id(Some(7)),
            PractitionerChoice::Specific(7)
        );
    }

    #[test]
    fn test_status_is_cancelled() {
        assert!(!AppointmentStatus::Confirmed.is_cancelled());
        assert!(AppointmentStatus::CanceledByPatient.is_cancelled());
        assert!(AppointmentStatus::CanceledByClinic.is_cancelled());
    }

    #[test]
    fn test_alternative_slots_default_empty() {
        let appointment = Appointment {
            id: 1,
            calendar_event_id: 1,
            patient_id: 1,
            appointment_type_id: 1,
            status: AppointmentStatus::Confirmed,
            notes: None,
            clinic_notes: None,
            is_auto_assigned: false,
            originally_auto_assigned: false,
            reassigned_by_user_id: None,
            canceled_at: None,
            pending_time_confirmation: false,
            alternative_time_slots: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(appointment.alternative_slots().is_empty());
    }
}
