/*!
 * Message Template Service
 *
 * Per-service LINE message templates with a documented placeholder set.
 * Empty or whitespace-only templates are replaced by the system default
 * before persisting (the columns are NOT NULL); unknown placeholders are
 * rejected on write.
 */

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Placeholders available in the standard templates
pub const STANDARD_PLACEHOLDERS: [&str; 8] = [
    "patient_name",
    "practitioner_name",
    "appointment_type_name",
    "appointment_datetime",
    "clinic_name",
    "clinic_phone",
    "clinic_address",
    "notes",
];

/// Placeholders available in the recurrent clinic confirmation, which
/// summarizes several dates at once
pub const RECURRENT_PLACEHOLDERS: [&str; 5] = [
    "patient_name",
    "practitioner_name",
    "appointment_type_name",
    "appointment_dates",
    "clinic_name",
];

pub const DEFAULT_PATIENT_CONFIRMATION_MESSAGE: &str =
    "{patient_name} 您好，已為您完成預約：\n{appointment_type_name}\n時間：{appointment_datetime}\n如需變更請透過預約頁面操作。\n{clinic_name}";

pub const DEFAULT_CLINIC_CONFIRMATION_MESSAGE: &str =
    "新預約通知\n患者：{patient_name}\n項目：{appointment_type_name}\n時間：{appointment_datetime}\n治療師：{practitioner_name}";

pub const DEFAULT_REMINDER_MESSAGE: &str =
    "{patient_name} 您好，提醒您明天的預約：\n{appointment_type_name}\n時間：{appointment_datetime}\n地點：{clinic_address}\n{clinic_name}";

pub const DEFAULT_RECURRENT_CLINIC_CONFIRMATION_MESSAGE: &str =
    "定期預約通知\n患者：{patient_name}\n項目：{appointment_type_name}\n日期：{appointment_dates}\n治療師：{practitioner_name}";

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-zA-Z_]+)\}").expect("placeholder regex"));

/// Return the template, or the default when empty/whitespace-only
pub fn message_or_default(raw: Option<&str>, default: &str) -> String {
    match raw {
        Some(text) if !text.trim().is_empty() => text.to_string(),
        _ => default.to_string(),
    }
}

/// Collect unknown placeholders in a template. An empty result means the
/// template is valid.
pub fn validate_template(template: &str, allowed: &[&str]) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .filter_map(|capture| {
            let name = capture.get(1)?.as_str();
            if allowed.contains(&name) {
                None
            } else {
                Some(format!("未知的變數 {{{}}}", name))
            }
        })
        .collect()
}

/// Substitute placeholder values into a template. Placeholders without a
/// value render as an empty string.
pub fn render_template(template: &str, values: &HashMap<&str, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |capture: &regex::Captures<'_>| {
            values
                .get(capture.get(1).map(|m| m.as_str()).unwrap_or_default())
                .cloned()
                .unwrap_or_default()
        })
        .into_owned()
}

/// Values carried into rendering for one appointment
#[derive(Debug, Clone, Default)]
pub struct TemplateValues {
    pub patient_name: String,
    pub practitioner_name: String,
    pub appointment_type_name: String,
    pub appointment_datetime: String,
    pub clinic_name: String,
    pub clinic_phone: Option<String>,
    pub clinic_address: Option<String>,
    pub notes: Option<String>,
}

impl TemplateValues {
    pub fn as_map(&self) -> HashMap<&'static str, String> {
        let mut map = HashMap::new();
        map.insert("patient_name", self.patient_name.clone());
        map.insert("practitioner_name", self.practitioner_name.clone());
        map.insert("appointment_type_name", self.appointment_type_name.clone());
        map.insert("appointment_datetime", self.appointment_datetime.clone());
        map.insert("clinic_name", self.clinic_name.clone());
        map.insert("clinic_phone", self.clinic_phone.clone().unwrap_or_default());
        map.insert(
            "clinic_address",
            self.clinic_address.clone().unwrap_or_default(),
        );
        map.insert("notes", self.notes.clone().unwrap_or_default());
        map
    }

    pub fn render(&self, template: &str) -> String {
        render_template(template, &self.as_map())
    }
}
