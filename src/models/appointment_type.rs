/*!
 * Appointment Type (Service Item) Models
 *
 * A service item is the bookable offering: duration, booking-visibility
 * flags, per-service message templates, and its bundle associations
 * (practitioners, billing scenarios, resource requirements, follow-up
 * messages). Name uniqueness holds among non-soft-deleted rows only.
 */

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Appointment type database row (soft-deletable)
#[derive(Debug, Clone, FromRow)]
pub struct AppointmentType {
    pub id: i64,
    pub clinic_id: i64,
    pub name: String,
    pub duration_minutes: i32,
    pub receipt_name: Option<String>,
    pub allow_new_patient_booking: bool,
    pub allow_existing_patient_booking: bool,
    pub allow_patient_practitioner_selection: bool,
    pub allow_multiple_time_slot_selection: bool,
    pub description: Option<String>,
    pub scheduling_buffer_minutes: i32,
    pub service_type_group_id: Option<i64>,
    pub display_order: i32,
    pub require_notes: bool,
    pub notes_instructions: Option<String>,
    pub send_patient_confirmation: bool,
    pub send_clinic_confirmation: bool,
    pub send_reminder: bool,
    pub send_recurrent_clinic_confirmation: bool,
    pub patient_confirmation_message: String,
    pub clinic_confirmation_message: String,
    pub reminder_message: String,
    pub recurrent_clinic_confirmation_message: String,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Appointment type response DTO
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentTypeResponse {
    pub id: i64,
    pub clinic_id: i64,
    pub name: String,
    pub duration_minutes: i32,
    pub receipt_name: Option<String>,
    pub allow_new_patient_booking: bool,
    pub allow_existing_patient_booking: bool,
    pub allow_patient_practitioner_selection: bool,
    pub allow_multiple_time_slot_selection: bool,
    pub description: Option<String>,
    pub scheduling_buffer_minutes: i32,
    pub service_type_group_id: Option<i64>,
    pub display_order: i32,
    pub require_notes: bool,
    pub notes_instructions: Option<String>,
    pub send_patient_confirmation: bool,
    pub send_clinic_confirmation: bool,
    pub send_reminder: bool,
    pub send_recurrent_clinic_confirmation: bool,
    pub patient_confirmation_message: String,
    pub clinic_confirmation_message: String,
    pub reminder_message: String,
    pub recurrent_clinic_confirmation_message: String,
}

impl From<AppointmentType> for AppointmentTypeResponse {
    fn from(at: AppointmentType) -> Self {
        Self {
            id: at.id,
            clinic_id: at.clinic_id,
            name: at.name,
            duration_minutes: at.duration_minutes,
            receipt_name: at.receipt_name,
            allow_new_patient_booking: at.allow_new_patient_booking,
            allow_existing_patient_booking: at.allow_existing_patient_booking,
            allow_patient_practitioner_selection: at.allow_patient_practitioner_selection,
            allow_multiple_time_slot_selection: at.allow_multiple_time_slot_selection,
            description: at.description,
            scheduling_buffer_minutes: at.scheduling_buffer_minutes,
            service_type_group_id: at.service_type_group_id,
            display_order: at.display_order,
            require_notes: at.require_notes,
            notes_instructions: at.notes_instructions,
            send_patient_confirmation: at.send_patient_confirmation,
            send_clinic_confirmation: at.send_clinic_confirmation,
            send_reminder: at.send_reminder,
            send_recurrent_clinic_confirmation: at.send_recurrent_clinic_confirmation,
            patient_confirmation_message: at.patient_confirmation_message,
            clinic_confirmation_message: at.clinic_confirmation_message,
            reminder_message: at.reminder_message,
            recurrent_clinic_confirmation_message: at.recurrent_clinic_confirmation_message,
        }
    }
}

/// Which practitioners offer which services (soft-deletable)
#[derive(Debug, Clone, FromRow)]
pub struct PractitionerAppointmentType {
    pub id: i64,
    pub user_id: i64,
    pub appointment_type_id: i64,
    pub clinic_id: i64,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Billing scenario row (soft-deletable)
#[derive(Debug, Clone, FromRow)]
pub struct BillingScenario {
    pub id: i64,
    pub clinic_id: i64,
    pub appointment_type_id: i64,
    pub practitioner_id: i64,
    pub name: String,
    /// Amount in TWD
    pub amount: i64,
    /// Practitioner revenue share in TWD, never more than `amount`
    pub revenue_share: i64,
    pub is_default: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// When a follow-up message fires relative to the appointment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpTimingMode {
    HoursAfter,
    SpecificTime,
}

impl FollowUpTimingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowUpTimingMode::HoursAfter => "hours_after",
            FollowUpTimingMode::SpecificTime => "specific_time",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "hours_after" => Some(FollowUpTimingMode::HoursAfter),
            "specific_time" => Some(FollowUpTimingMode::SpecificTime),
            _ => None,
        }
    }
}

/// Follow-up message row
#[derive(Debug, Clone, FromRow)]
pub struct FollowUpMessage {
    pub id: i64,
    pub clinic_id: i64,
    pub appointment_type_id: i64,
    pub timing_mode: String,
    pub hours_after: Option<i32>,
    pub days_after: Option<i32>,
    pub time_of_day: Option<NaiveTime>,
    pub message_template: String,
    pub is_enabled: bool,
    pub display_order: i32,
}

/// Per-service resource requirement row
#[derive(Debug, Clone, FromRow)]
pub struct AppointmentResourceRequirement {
    pub id: i64,
    pub appointment_type_id: i64,
    pub resource_type_id: i64,
    pub quantity: i32,
}

// ---------------------------------------------------------------------------
// Bundle DTOs
// ---------------------------------------------------------------------------

/// Billing scenario inside a bundle payload. Rows with an id update in
/// place; ids missing from the payload are soft-deleted; rows without an
/// id are inserted.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BillingScenarioBundleData {
    pub id: Option<i64>,
    pub practitioner_id: i64,
    #[validate(length(min = 1, message = "名稱不可為空"))]
    pub name: String,
    #[validate(range(min = 0))]
    pub amount: i64,
    #[validate(range(min = 0))]
    pub revenue_share: i64,
    #[serde(default)]
    pub is_default: bool,
}

impl BillingScenarioBundleData {
    pub fn validate_revenue_share(&self) -> Result<(), String> {
        if self.revenue_share > self.amount {
            return Err("revenue_share 不可大於 amount".to_string());
        }
        Ok(())
    }
}

/// Resource requirement inside a bundle payload (replace-all semantics)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResourceRequirementBundleData {
    pub resource_type_id: i64,
    pub resource_type_name: Option<String>,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Follow-up message inside a bundle payload (diff-sync by id)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FollowUpMessageBundleData {
    pub id: Option<i64>,
    pub timing_mode: FollowUpTimingMode,
    pub hours_after: Option<i32>,
    pub days_after: Option<i32>,
    /// `HH:MM`, required for `specific_time`
    pub time_of_day: Option<String>,
    #[validate(length(min = 1, message = "訊息內容不可為空"))]
    pub message_template: String,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub display_order: i32,
}

fn default_true() -> bool {
    true
}

/// The four association sets saved with a service item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceItemBundleAssociations {
    #[serde(default)]
    pub practitioner_ids: Vec<i64>,
    #[serde(default)]
    pub billing_scenarios: Vec<BillingScenarioBundleData>,
    #[serde(default)]
    pub resource_requirements: Vec<ResourceRequirementBundleData>,
    #[serde(default)]
    pub follow_up_messages: Vec<FollowUpMessageBundleData>,
}

/// The service item fields of a bundle payload
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServiceItemData {
    #[validate(length(min = 1, max = 255, message = "名稱長度不正確"))]
    pub name: String,
    #[validate(range(min = 1, message = "服務時長必須大於 0"))]
    pub duration_minutes: i32,
    pub receipt_name: Option<String>,
    #[serde(default = "default_true")]
    pub allow_new_patient_booking: bool,
    #[serde(default = "default_true")]
    pub allow_existing_patient_booking: bool,
    #[serde(default = "default_true")]
    pub allow_patient_practitioner_selection: bool,
    #[serde(default)]
    pub allow_multiple_time_slot_selection: bool,
    pub description: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0, max = 240))]
    pub scheduling_buffer_minutes: i32,
    pub service_type_group_id: Option<i64>,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub require_notes: bool,
    pub notes_instructions: Option<String>,
    #[serde(default = "default_true")]
    pub send_patient_confirmation: bool,
    #[serde(default = "default_true")]
    pub send_clinic_confirmation: bool,
    #[serde(default = "default_true")]
    pub send_reminder: bool,
    #[serde(default = "default_true")]
    pub send_recurrent_clinic_confirmation: bool,
    pub patient_confirmation_message: Option<String>,
    pub clinic_confirmation_message: Option<String>,
    pub reminder_message: Option<String>,
    pub recurrent_clinic_confirmation_message: Option<String>,
}

/// Bundle save payload
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceItemBundleRequest {
    pub item: ServiceItemData,
    #[serde(default)]
    pub associations: ServiceItemBundleAssociations,
}

/// Bundle read/save response
#[derive(Debug, Clone, Serialize)]
pub struct ServiceItemBundleResponse {
    pub item: AppointmentTypeResponse,
    pub associations: ServiceItemBundleAssociations,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revenue_share_cannot_exceed_amount() {
        let scenario = BillingScenarioBundleData {
            id: None,
            practitioner_id: 1,
            name: "自費".to_string(),
            amount: 1200,
            revenue_share: 1500,
            is_default: false,
        };
        assert!(scenario.validate_revenue_share().is_err());

        let scenario = BillingScenarioBundleData {
            revenue_share: 1200,
            ..scenario
        };
        assert!(scenario.validate_revenue_share().is_ok());
    }

    #[test]
    fn test_follow_up_timing_mode_round_trip() {
        for mode in [FollowUpTimingMode::HoursAfter, FollowUpTimingMode::SpecificTime] {
            assert_eq!(FollowUpTimingMode::from_str(mode.as_str()), Some(mode));
        }
        assert_eq!(FollowUpTimingMode::from_str("weekly"), None);
    }

    #[test]
    fn test_bundle_request_defaults() {
        let payload = serde_json::json!({
            "item": {"name": "徒手治療", "duration_minutes": 60}
        });
        let request: ServiceItemBundleRequest = serde_json::from_value(payload).unwrap();
        assert!(request.item.allow_new_patient_booking);
        assert!(!request.item.allow_multiple_time_slot_selection);
        assert!(request.associations.practitioner_ids.is_empty());
    }
}
