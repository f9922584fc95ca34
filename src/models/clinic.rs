/*!
 * Clinic Model
 *
 * The clinic is the tenant: every other record is scoped to one clinic.
 * Its `settings` JSONB column holds the validated settings document
 * (see `models::settings`).
 */

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::models::settings::ClinicSettings;
use crate::utils::{AppError, Result};

/// Clinic database row
#[derive(Debug, Clone, FromRow)]
pub struct Clinic {
    pub id: i64,
    pub name: String,
    /// LINE channel access token used for outbound push messages
    pub line_channel_access_token: String,
    /// Opaque token identifying the clinic in LIFF URLs; unique across
    /// all clinics
    pub liff_access_token: Option<String>,
    pub settings: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Clinic {
    /// Parse the stored settings blob into the validated document,
    /// applying defaults and the legacy migration
    pub fn validated_settings(&self) -> Result<ClinicSettings> {
        ClinicSettings::from_value(self.settings.clone())
            .map_err(|e| AppError::Internal(format!("clinic {} settings invalid: {}", self.id, e)))
    }

    /// Display name shown to patients, falling back to the clinic name
    pub fn effective_display_name(&self, settings: &ClinicSettings) -> String {
        settings
            .clinic_info_settings
            .display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Response for LIFF URL listings in settings
#[derive(Debug, Clone, Serialize)]
pub struct LiffUrls {
    pub home: String,
    pub book: String,
    pub query: String,
    pub settings: String,
    pub notifications: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn clinic_with_settings(settings: serde_json::Value) -> Clinic {
        Clinic {
            id: 1,
            name: "康復物理治療所".to_string(),
            line_channel_access_token: "token".to_string(),
            liff_access_token: None,
            settings,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_effective_display_name_falls_back_to_name() {
        let clinic = clinic_with_settings(json!({}));
        let settings = clinic.validated_settings().unwrap();
        assert_eq!(clinic.effective_display_name(&settings), "康復物理治療所");
    }

    #[test]
    fn test_effective_display_name_prefers_setting() {
        let clinic = clinic_with_settings(json!({
            "clinic_info_settings": {"display_name": "康復診所"}
        }));
        let settings = clinic.validated_settings().unwrap();
        assert_eq!(clinic.effective_display_name(&settings), "康復診所");
    }
}
