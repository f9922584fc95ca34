/*!
 * Clinic Settings Models
 *
 * The clinic settings JSON document: five validated sections stored in the
 * `clinics.settings` JSONB column. Partial updates deep-merge into the
 * stored document; unknown keys are rejected by `deny_unknown_fields`.
 *
 * The deprecated `same_day_disallowed` booking restriction is migrated to
 * `minimum_hours_required` on both read and write, so old documents keep
 * working and never persist again in the legacy shape.
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::time::parse_hhmm;

/// How the appointment reminder timing is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderTimingMode {
    HoursBefore,
    PreviousDayTime,
}

/// Which booking restriction mode gates patient lead time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingRestrictionType {
    MinimumHoursRequired,
    DeadlineTimeDayBefore,
}

/// Notification settings section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationSettings {
    #[serde(default = "default_reminder_hours")]
    pub reminder_hours_before: i64,
    #[serde(default = "default_reminder_timing_mode")]
    pub reminder_timing_mode: ReminderTimingMode,
    #[serde(default = "default_reminder_previous_day_time")]
    pub reminder_previous_day_time: Option<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            reminder_hours_before: default_reminder_hours(),
            reminder_timing_mode: default_reminder_timing_mode(),
            reminder_previous_day_time: default_reminder_previous_day_time(),
        }
    }
}

fn default_reminder_hours() -> i64 {
    24
}

fn default_reminder_timing_mode() -> ReminderTimingMode {
    ReminderTimingMode::HoursBefore
}

fn default_reminder_previous_day_time() -> Option<String> {
    Some("21:00".to_string())
}

/// Booking restriction settings section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BookingRestrictionSettings {
    #[serde(default = "default_booking_restriction_type")]
    pub booking_restriction_type: BookingRestrictionType,
    #[serde(default = "default_minimum_booking_hours")]
    pub minimum_booking_hours_ahead: i64,
    #[serde(default = "default_deadline_time")]
    pub deadline_time_day_before: Option<String>,
    #[serde(default)]
    pub deadline_on_same_day: bool,
    #[serde(default = "default_step_size")]
    pub step_size_minutes: u32,
    #[serde(default = "default_max_future_appointments")]
    pub max_future_appointments: i64,
    #[serde(default = "default_max_booking_window_days")]
    pub max_booking_window_days: i64,
    #[serde(default = "default_minimum_cancellation_hours")]
    pub minimum_cancellation_hours_before: i64,
    #[serde(default = "default_true")]
    pub allow_patient_deletion: bool,
}

impl Default for BookingRestrictionSettings {
    fn default() -> Self {
        Self {
            booking_restriction_type: default_booking_restriction_type(),
            minimum_booking_hours_ahead: default_minimum_booking_hours(),
            deadline_time_day_before: default_deadline_time(),
            deadline_on_same_day: false,
            step_size_minutes: default_step_size(),
            max_future_appointments: default_max_future_appointments(),
            max_booking_window_days: default_max_booking_window_days(),
            minimum_cancellation_hours_before: default_minimum_cancellation_hours(),
            allow_patient_deletion: true,
        }
    }
}

fn default_booking_restriction_type() -> BookingRestrictionType {
    BookingRestrictionType::MinimumHoursRequired
}

fn default_minimum_booking_hours() -> i64 {
    24
}

fn default_deadline_time() -> Option<String> {
    Some("08:00".to_string())
}

fn default_step_size() -> u32 {
    30
}

fn default_max_future_appointments() -> i64 {
    3
}

fn default_max_booking_window_days() -> i64 {
    90
}

fn default_minimum_cancellation_hours() -> i64 {
    24
}

fn default_true() -> bool {
    true
}

/// Clinic information section, shown on calendar events and LINE messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClinicInfoSettings {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub appointment_type_instructions: Option<String>,
    #[serde(default)]
    pub appointment_notes_instructions: Option<String>,
    #[serde(default)]
    pub require_birthday: bool,
    #[serde(default)]
    pub require_gender: bool,
    #[serde(default)]
    pub restrict_to_assigned_practitioners: bool,
    #[serde(default)]
    pub query_page_instructions: Option<String>,
    #[serde(default)]
    pub settings_page_instructions: Option<String>,
    #[serde(default)]
    pub notifications_page_instructions: Option<String>,
}

/// Chat / AI assistant section. Stored and validated here; the chat agent
/// itself lives outside the scheduling core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatSettings {
    #[serde(default)]
    pub chat_enabled: bool,
    #[serde(default = "default_true")]
    pub label_ai_replies: bool,
    #[serde(default)]
    pub clinic_description: Option<String>,
    #[serde(default)]
    pub therapist_info: Option<String>,
    #[serde(default)]
    pub treatment_details: Option<String>,
    #[serde(default)]
    pub service_item_selection_guide: Option<String>,
    #[serde(default)]
    pub operating_hours: Option<String>,
    #[serde(default)]
    pub location_details: Option<String>,
    #[serde(default)]
    pub booking_policy: Option<String>,
    #[serde(default)]
    pub payment_methods: Option<String>,
    #[serde(default)]
    pub equipment_facilities: Option<String>,
    #[serde(default)]
    pub common_questions: Option<String>,
    #[serde(default)]
    pub other_info: Option<String>,
    #[serde(default)]
    pub ai_guidance: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            chat_enabled: false,
            label_ai_replies: true,
            clinic_description: None,
            therapist_info: None,
            treatment_details: None,
            service_item_selection_guide: None,
            operating_hours: None,
            location_details: None,
            booking_policy: None,
            payment_methods: None,
            equipment_facilities: None,
            common_questions: None,
            other_info: None,
            ai_guidance: None,
        }
    }
}

/// Receipt section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiptSettings {
    #[serde(default)]
    pub custom_notes: Option<String>,
    #[serde(default)]
    pub show_stamp: bool,
}

/// The full validated clinic settings document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClinicSettings {
    #[serde(default)]
    pub notification_settings: NotificationSettings,
    #[serde(default)]
    pub booking_restriction_settings: BookingRestrictionSettings,
    #[serde(default)]
    pub clinic_info_settings: ClinicInfoSettings,
    #[serde(default)]
    pub chat_settings: ChatSettings,
    #[serde(default)]
    pub receipt_settings: ReceiptSettings,
}

/// The five recognized top-level settings sections
pub const SETTINGS_SECTIONS: [&str; 5] = [
    "notification_settings",
    "booking_restriction_settings",
    "clinic_info_settings",
    "chat_settings",
    "receipt_settings",
];

impl ClinicSettings {
    /// Parse and validate a raw settings document, applying the legacy
    /// booking-restriction migration first
    pub fn from_value(mut raw: Value) -> Result<Self, String> {
        migrate_legacy_booking_restriction(&mut raw);
        let settings: ClinicSettings =
            serde_json::from_value(raw).map_err(|e| format!("設定格式錯誤: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize back to the stored JSONB shape
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("settings serialization cannot fail")
    }

    /// Range and format checks that serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        let n = &self.notification_settings;
        if !(1..=168).contains(&n.reminder_hours_before) {
            return Err("reminder_hours_before 必須介於 1 到 168".to_string());
        }
        if let Some(ref t) = n.reminder_previous_day_time {
            if parse_hhmm(t).is_none() {
                return Err("reminder_previous_day_time 必須為 24 小時制 HH:MM".to_string());
            }
        }

        let b = &self.booking_restriction_settings;
        if !(1..=168).contains(&b.minimum_booking_hours_ahead) {
            return Err("minimum_booking_hours_ahead 必須介於 1 到 168".to_string());
        }
        if let Some(ref t) = b.deadline_time_day_before {
            if parse_hhmm(t).is_none() {
                return Err("deadline_time_day_before 必須為 24 小時制 HH:MM".to_string());
            }
        }
        if !(5..=60).contains(&b.step_size_minutes) {
            return Err("step_size_minutes 必須介於 5 到 60".to_string());
        }
        if !(1..=100).contains(&b.max_future_appointments) {
            return Err("max_future_appointments 必須介於 1 到 100".to_string());
        }
        if !(1..=365).contains(&b.max_booking_window_days) {
            return Err("max_booking_window_days 必須介於 1 到 365".to_string());
        }
        if !(1..=168).contains(&b.minimum_cancellation_hours_before) {
            return Err("minimum_cancellation_hours_before 必須介於 1 到 168".to_string());
        }
        Ok(())
    }
}

/// One-way migration of the deprecated `same_day_disallowed` restriction
/// type. Runs before deserialization so the typed enum never needs the
/// legacy variant. When the legacy document had no usable minimum hours,
/// 24 is assumed.
fn migrate_legacy_booking_restriction(raw: &mut Value) {
    let Some(section) = raw
        .get_mut("booking_restriction_settings")
        .and_then(Value::as_object_mut)
    else {
        return;
    };

    if section.get("booking_restriction_type").and_then(Value::as_str) == Some("same_day_disallowed")
    {
        let min_hours = section
            .get("minimum_booking_hours_ahead")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if min_hours == 0 {
            section.insert("minimum_booking_hours_ahead".to_string(), Value::from(24));
        }
        section.insert(
            "booking_restriction_type".to_string(),
            Value::from("minimum_hours_required"),
        );
    }

    // Deadline minutes are normalized to :00 the way the UI presents them.
    if let Some(deadline) = section.get("deadline_time_day_before").and_then(Value::as_str) {
        if let Some(time) = parse_hhmm(deadline) {
            use chrono::Timelike;
            section.insert(
                "deadline_time_day_before".to_string(),
                Value::from(format!("{:02}:00", time.hour())),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_document_gets_all_defaults() {
        let settings = ClinicSettings::from_value(json!({})).unwrap();
        assert_eq!(settings.notification_settings.reminder_hours_before, 24);
        assert_eq!(
            settings.booking_restriction_settings.booking_restriction_type,
            BookingRestrictionType::MinimumHoursRequired
        );
        assert_eq!(settings.booking_restriction_settings.step_size_minutes, 30);
        assert_eq!(settings.booking_restriction_settings.max_future_appointments, 3);
        assert!(settings.booking_restriction_settings.allow_patient_deletion);
        assert!(!settings.chat_settings.chat_enabled);
        assert!(settings.chat_settings.label_ai_replies);
    }

    #[test]
    fn test_legacy_same_day_disallowed_is_migrated() {
        let raw = json!({
            "booking_restriction_settings": {
                "booking_restriction_type": "same_day_disallowed"
            }
        });
        let settings = ClinicSettings::from_value(raw).unwrap();
        assert_eq!(
            settings.booking_restriction_settings.booking_restriction_type,
            BookingRestrictionType::MinimumHoursRequired
        );
        assert_eq!(
            settings.booking_restriction_settings.minimum_booking_hours_ahead,
            24
        );
    }

    #[test]
    fn test_legacy_migration_keeps_explicit_hours() {
        let raw = json!({
            "booking_restriction_settings": {
                "booking_restriction_type": "same_day_disallowed",
                "minimum_booking_hours_ahead": 48
            }
        });
        let settings = ClinicSettings::from_value(raw).unwrap();
        assert_eq!(
            settings.booking_restriction_settings.minimum_booking_hours_ahead,
            48
        );
    }

    #[test]
    fn test_deadline_minutes_normalized_to_zero() {
        let raw = json!({
            "booking_restriction_settings": {
                "deadline_time_day_before": "08:30"
            }
        });
        let settings = ClinicSettings::from_value(raw).unwrap();
        assert_eq!(
            settings.booking_restriction_settings.deadline_time_day_before.as_deref(),
            Some("08:00")
        );
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let raw = json!({
            "notification_settings": {"reminder_hours_before": 24, "bogus": 1}
        });
        assert!(ClinicSettings::from_value(raw).is_err());

        let raw = json!({"mystery_section": {}});
        assert!(ClinicSettings::from_value(raw).is_err());
    }

    #[test]
    fn test_range_validation() {
        let raw = json!({
            "notification_settings": {"reminder_hours_before": 200}
        });
        assert!(ClinicSettings::from_value(raw).is_err());

        let raw = json!({
            "booking_restriction_settings": {"step_size_minutes": 3}
        });
        assert!(ClinicSettings::from_value(raw).is_err());
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let raw = json!({
            "booking_restriction_settings": {
                "booking_restriction_type": "deadline_time_day_before",
                "deadline_time_day_before": "20:00",
                "deadline_on_same_day": true,
                "step_size_minutes": 15
            },
            "receipt_settings": {"custom_notes": "憑收據退換", "show_stamp": true}
        });
        let settings = ClinicSettings::from_value(raw).unwrap();
        let round_tripped = ClinicSettings::from_value(settings.to_value()).unwrap();
        assert_eq!(settings, round_tripped);
        assert_eq!(
            round_tripped.booking_restriction_settings.booking_restriction_type,
            BookingRestrictionType::DeadlineTimeDayBefore
        );
        assert!(round_tripped.booking_restriction_settings.deadline_on_same_day);
        assert_eq!(
            round_tripped.receipt_settings.custom_notes.as_deref(),
            Some("憑收據退換")
        );
    }
}
