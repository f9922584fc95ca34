/*!
 * Patient & LINE User Models
 *
 * Patients are clinic-scoped person records, optionally linked to the
 * LINE identity that booked them. LINE identities are stored once per
 * (external user id, clinic) pair.
 */

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

/// Patient database row (soft-deletable)
#[derive(Debug, Clone, FromRow)]
pub struct Patient {
    pub id: i64,
    pub clinic_id: i64,
    pub line_user_id: Option<i64>,
    pub name: String,
    pub phone_number: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub gender: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// LINE messaging-platform identity, scoped per clinic
#[derive(Debug, Clone, FromRow)]
pub struct LineUser {
    pub id: i64,
    pub clinic_id: i64,
    /// External LINE user id (the platform's opaque identifier)
    pub line_user_id: String,
    pub display_name: Option<String>,
    /// Clinic-overridden display name
    pub clinic_display_name: Option<String>,
    pub ai_disabled: bool,
    pub ai_disabled_at: Option<DateTime<Utc>>,
    pub ai_disabled_by_user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LineUser {
    /// Name shown to clinic staff, preferring the clinic override
    pub fn effective_display_name(&self) -> Option<&str> {
        self.clinic_display_name
            .as_deref()
            .or(self.display_name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_display_name_prefers_clinic_override() {
        let line_user = LineUser {
            id: 1,
            clinic_id: 1,
            line_user_id: "U123".to_string(),
            display_name: Some("LINE暱稱".to_string()),
            clinic_display_name: Some("陳大文".to_string()),
            ai_disabled: false,
            ai_disabled_at: None,
            ai_disabled_by_user_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(line_user.effective_display_name(), Some("陳大文"));
    }
}
