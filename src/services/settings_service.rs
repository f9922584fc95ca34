/*!
 * Settings Service
 *
 * Clinic settings reads and the partial (deep-merge) settings update,
 * including the embedded appointment-type reconciliation the settings
 * page submits: incoming rows are matched to existing ones by id first,
 * then by (name, duration); matched rows update in place, unmatched
 * existing rows soft-delete (blocked while practitioners still offer
 * them), and leftover incoming rows insert.
 *
 * Also owns appointment-type deletion (with its pre-flight validation)
 * and LIFF access-token regeneration.
 */

use axum::http::StatusCode;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::models::appointment_type::AppointmentType;
use crate::models::{ClinicSettings, SETTINGS_SECTIONS};
use crate::services::message_template::{
    message_or_default, validate_template, DEFAULT_CLINIC_CONFIRMATION_MESSAGE,
    DEFAULT_PATIENT_CONFIRMATION_MESSAGE, DEFAULT_RECURRENT_CLINIC_CONFIRMATION_MESSAGE,
    DEFAULT_REMINDER_MESSAGE, RECURRENT_PLACEHOLDERS, STANDARD_PLACEHOLDERS,
};
use crate::utils::liff::generate_access_token;
use crate::utils::{deep_merge, AppError, Result};

/// A blocked or warned appointment type in deletion validation
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentTypeReference {
    pub id: i64,
    pub name: String,
    pub practitioners: Vec<String>,
    pub is_blocked: bool,
    pub has_warnings: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub future_appointment_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub past_appointment_count: Option<i64>,
}

/// Deletion validation result
#[derive(Debug, Clone, Serialize)]
pub struct DeletionValidation {
    pub can_delete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    pub warnings: Vec<AppointmentTypeReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Settings service
pub struct SettingsService {
    pool: PgPool,
}

impl SettingsService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Active appointment types of a clinic, in display order
    pub async fn list_appointment_types(&self, clinic_id: i64) -> Result<Vec<AppointmentType>> {
        let rows = sqlx::query_as::<_, AppointmentType>(
            r#"
            SELECT * FROM appointment_types
            WHERE clinic_id = $1 AND is_deleted = FALSE
            ORDER BY display_order, id
            "#,
        )
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Partial settings update. Only the sections present in the payload
    /// are touched; each one deep-merges over the stored document and the
    /// merged result is re-validated as a whole. An `appointment_types`
    /// array triggers the reconciliation described in the module docs.
    pub async fn update_settings(&self, clinic_id: i64, payload: Value) -> Result<()> {
        let payload_map = payload
            .as_object()
            .ok_or_else(|| AppError::Validation("設定格式錯誤".to_string()))?;

        for key in payload_map.keys() {
            if key != "appointment_types" && !SETTINGS_SECTIONS.contains(&key.as_str()) {
                return Err(AppError::Validation(format!("未知的設定區塊: {}", key)));
            }
        }

        let mut tx = self.pool.begin().await?;

        // Settings writes hold the clinic row for the whole update.
        let stored: Value = sqlx::query_scalar(
            "SELECT settings FROM clinics WHERE id = $1 FOR UPDATE",
        )
        .bind(clinic_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("診所不存在".to_string()))?;

        let mut sections_changed = false;
        let mut merged = stored;
        for &section in SETTINGS_SECTIONS.iter() {
            if let Some(incoming) = payload_map.get(section) {
                merged = deep_merge(
                    merged.clone(),
                    json!({ section: incoming.clone() }),
                );
                sections_changed = true;
            }
        }

        if sections_changed {
            // Re-validating the merged document also runs the legacy
            // migration, so the stored shape is always current.
            let validated = ClinicSettings::from_value(merged).map_err(AppError::Validation)?;
            sqlx::query("UPDATE clinics SET settings = $1, updated_at = NOW() WHERE id = $2")
                .bind(validated.to_value())
                .bind(clinic_id)
                .execute(&mut *tx)
                .await?;
            info!("Updated settings sections for clinic {}", clinic_id);
        }

        if let Some(incoming_types) = payload_map.get("appointment_types") {
            let incoming_types = incoming_types
                .as_array()
                .ok_or_else(|| AppError::Validation("appointment_types 必須為陣列".to_string()))?;
            self.reconcile_appointment_types(&mut tx, clinic_id, incoming_types)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn reconcile_appointment_types(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        clinic_id: i64,
        incoming: &[Value],
    ) -> Result<()> {
        let existing = sqlx::query_as::<_, AppointmentType>(
            r#"
            SELECT * FROM appointment_types
            WHERE clinic_id = $1 AND is_deleted = FALSE
            ORDER BY display_order, id
            FOR UPDATE
            "#,
        )
        .bind(clinic_id)
        .fetch_all(&mut **tx)
        .await?;

        let incoming_maps: Vec<&serde_json::Map<String, Value>> =
            incoming.iter().filter_map(Value::as_object).collect();

        let id_of = |m: &serde_json::Map<String, Value>| m.get("id").and_then(Value::as_i64);
        let name_of = |m: &serde_json::Map<String, Value>| {
            m.get("name").and_then(Value::as_str).map(str::to_string)
        };
        let duration_of =
            |m: &serde_json::Map<String, Value>| m.get("duration_minutes").and_then(Value::as_i64);

        // Split existing rows into kept (matched by id first, then by
        // name+duration) and deleted.
        let mut kept: Vec<(AppointmentType, usize)> = Vec::new();
        let mut to_delete: Vec<AppointmentType> = Vec::new();
        let mut matched_incoming: Vec<bool> = vec![false; incoming_maps.len()];

        for row in existing {
            let mut found = incoming_maps
                .iter()
                .enumerate()
                .find(|(index, m)| !matched_incoming[*index] && id_of(m) == Some(row.id))
                .map(|(index, _)| index);
            if found.is_none() {
                found = incoming_maps
                    .iter()
                    .enumerate()
                    .find(|(index, m)| {
                        !matched_incoming[*index]
                            && name_of(m).as_deref() == Some(row.name.as_str())
                            && duration_of(m) == Some(row.duration_minutes as i64)
                    })
                    .map(|(index, _)| index);
            }
            match found {
                Some(index) => {
                    matched_incoming[index] = true;
                    kept.push((row, index));
                }
                None => to_delete.push(row),
            }
        }

        // Practitioner references block deletions outright.
        let mut blocked = Vec::new();
        for row in &to_delete {
            let practitioners = practitioner_names_for(&mut **tx, clinic_id, row.id).await?;
            if !practitioners.is_empty() {
                blocked.push(AppointmentTypeReference {
                    id: row.id,
                    name: row.name.clone(),
                    practitioners,
                    is_blocked: true,
                    has_warnings: false,
                    future_appointment_count: None,
                    past_appointment_count: None,
                });
            }
        }
        if !blocked.is_empty() {
            return Err(AppError::Detail {
                status: StatusCode::BAD_REQUEST,
                detail: json!({
                    "error": "cannot_delete_appointment_types",
                    "message": "無法刪除某些預約類型，因為有治療師正在提供此服務",
                    "appointment_types": blocked,
                }),
            });
        }

        for (mut row, index) in kept {
            apply_appointment_type_update(&mut row, incoming_maps[index])?;
            persist_appointment_type(tx, &row).await?;
        }

        for row in &to_delete {
            sqlx::query(
                r#"
                UPDATE appointment_types
                SET is_deleted = TRUE, deleted_at = NOW(), updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(row.id)
            .execute(&mut **tx)
            .await?;
            info!("Soft-deleted appointment type {} ({})", row.id, row.name);
        }

        // Anything not matched to an existing row is an insert.
        let max_order: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(display_order) FROM appointment_types WHERE clinic_id = $1",
        )
        .bind(clinic_id)
        .fetch_one(&mut **tx)
        .await?;
        let default_order = max_order.map(|o| o + 1).unwrap_or(0);

        for (index, data) in incoming_maps.iter().enumerate() {
            if matched_incoming[index] {
                continue;
            }
            let (Some(name), Some(duration)) = (name_of(data), duration_of(data)) else {
                continue;
            };
            evict_soft_deleted_name(tx, clinic_id, &name, duration as i32, None).await?;
            insert_appointment_type(tx, clinic_id, data, default_order).await?;
        }

        Ok(())
    }

    /// Pre-flight deletion check: practitioner references block, future
    /// appointments warn, past appointments inform.
    pub async fn validate_deletion(
        &self,
        clinic_id: i64,
        appointment_type_ids: &[i64],
    ) -> Result<DeletionValidation> {
        let mut references = Vec::new();

        for &id in appointment_type_ids {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM appointment_types WHERE id = $1 AND clinic_id = $2)",
            )
            .bind(id)
            .bind(clinic_id)
            .fetch_one(&self.pool)
            .await?;
            if !exists {
                continue;
            }

            let name: String = sqlx::query_scalar(
                "SELECT name FROM appointment_types WHERE id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

            let practitioners = practitioner_names_for(&self.pool, clinic_id, id).await?;

            let future_count = self.count_appointments_for_type(id, true).await?;
            let past_count = self.count_appointments_for_type(id, false).await?;

            let is_blocked = !practitioners.is_empty();
            let has_warnings = future_count > 0;
            if is_blocked || has_warnings {
                references.push(AppointmentTypeReference {
                    id,
                    name,
                    practitioners,
                    is_blocked,
                    has_warnings,
                    future_appointment_count: (future_count > 0).then_some(future_count),
                    past_appointment_count: (past_count > 0).then_some(past_count),
                });
            }
        }

        let blocked: Vec<_> = references.iter().filter(|r| r.is_blocked).cloned().collect();
        if !blocked.is_empty() {
            return Ok(DeletionValidation {
                can_delete: false,
                error: Some(json!({
                    "error": "cannot_delete_appointment_types",
                    "message": "無法刪除某些預約類型，因為有治療師正在提供此服務",
                    "appointment_types": blocked,
                })),
                warnings: Vec::new(),
                message: None,
            });
        }

        let warnings: Vec<_> = references
            .into_iter()
            .filter(|r| !r.is_blocked && r.has_warnings)
            .collect();
        let message = (!warnings.is_empty())
            .then(|| format!("有{}個預約類型有即將到來的預約，確認要刪除嗎？", warnings.len()));
        Ok(DeletionValidation {
            can_delete: true,
            error: None,
            warnings,
            message,
        })
    }

    /// Soft-delete one appointment type; practitioner references block
    pub async fn delete_appointment_type(&self, clinic_id: i64, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM appointment_types
                WHERE id = $1 AND clinic_id = $2 AND is_deleted = FALSE
            )
            "#,
        )
        .bind(id)
        .bind(clinic_id)
        .fetch_one(&mut *tx)
        .await?;
        if !exists {
            return Err(AppError::NotFound("預約類型不存在".to_string()));
        }

        let practitioners = practitioner_names_for(&mut *tx, clinic_id, id).await?;
        if !practitioners.is_empty() {
            return Err(AppError::Validation(
                "無法刪除此預約類型，因為有治療師正在提供此服務".to_string(),
            ));
        }

        sqlx::query(
            r#"
            UPDATE appointment_types
            SET is_deleted = TRUE, deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Rotate the clinic's LIFF access token under a row lock, retrying
    /// on the (astronomically unlikely) global uniqueness collision.
    /// The new token is not echoed back; it surfaces via the settings
    /// read instead.
    pub async fn regenerate_liff_token(&self, clinic_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<i64> =
            sqlx::query_scalar("SELECT id FROM clinics WHERE id = $1 FOR UPDATE")
                .bind(clinic_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(AppError::NotFound("診所不存在".to_string()));
        }

        const MAX_ATTEMPTS: usize = 10;
        let mut new_token = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let candidate = generate_access_token();
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM clinics WHERE liff_access_token = $1)",
            )
            .bind(&candidate)
            .fetch_one(&mut *tx)
            .await?;
            if !taken {
                new_token = Some(candidate);
                break;
            }
            warn!(
                "LIFF token collision on attempt {} for clinic {}",
                attempt, clinic_id
            );
        }

        let Some(token) = new_token else {
            return Err(AppError::Internal(
                "無法產生新的 token，請稍後再試".to_string(),
            ));
        };

        sqlx::query("UPDATE clinics SET liff_access_token = $1, updated_at = NOW() WHERE id = $2")
            .bind(&token)
            .bind(clinic_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("LIFF token regenerated for clinic {}", clinic_id);
        Ok(())
    }

    async fn count_appointments_for_type(
        &self,
        appointment_type_id: i64,
        future: bool,
    ) -> Result<i64> {
        let today = crate::utils::time::clinic_today();
        let count = sqlx::query_scalar::<_, i64>(if future {
            r#"
            SELECT COUNT(*) FROM appointments a
            JOIN calendar_events ce ON ce.id = a.calendar_event_id
            WHERE a.appointment_type_id = $1 AND a.status = 'confirmed' AND ce.date >= $2
            "#
        } else {
            r#"
            SELECT COUNT(*) FROM appointments a
            JOIN calendar_events ce ON ce.id = a.calendar_event_id
            WHERE a.appointment_type_id = $1 AND a.status = 'confirmed' AND ce.date < $2
            "#
        })
        .bind(appointment_type_id)
        .bind(today)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

/// Display names of active practitioners offering a service
async fn practitioner_names_for(
    executor: impl sqlx::PgExecutor<'_>,
    clinic_id: i64,
    appointment_type_id: i64,
) -> Result<Vec<String>> {
    let names = sqlx::query_scalar::<_, String>(
        r#"
        SELECT uca.full_name
        FROM practitioner_appointment_types pat
        JOIN user_clinic_associations uca
          ON uca.user_id = pat.user_id AND uca.clinic_id = pat.clinic_id
        WHERE pat.appointment_type_id = $1
          AND pat.clinic_id = $2
          AND pat.is_deleted = FALSE
          AND uca.is_active = TRUE
        ORDER BY uca.full_name
        "#,
    )
    .bind(appointment_type_id)
    .bind(clinic_id)
    .fetch_all(executor)
    .await?;
    Ok(names)
}

/// Apply the keys present in an incoming JSON object onto a loaded
/// appointment-type row. Message templates default when blank and are
/// validated for unknown placeholders; absent keys leave the row alone.
pub fn apply_appointment_type_update(
    row: &mut AppointmentType,
    data: &serde_json::Map<String, Value>,
) -> Result<()> {
    if let Some(name) = data.get("name").and_then(Value::as_str) {
        row.name = name.to_string();
    }
    if let Some(duration) = data.get("duration_minutes").and_then(Value::as_i64) {
        if duration <= 0 {
            return Err(AppError::Validation("服務時長必須大於 0".to_string()));
        }
        row.duration_minutes = duration as i32;
    }
    if let Some(value) = data.get("receipt_name") {
        row.receipt_name = value.as_str().map(str::to_string);
    }
    if let Some(value) = data.get("allow_new_patient_booking").and_then(Value::as_bool) {
        row.allow_new_patient_booking = value;
    }
    if let Some(value) = data
        .get("allow_existing_patient_booking")
        .and_then(Value::as_bool)
    {
        row.allow_existing_patient_booking = value;
    }
    if let Some(value) = data
        .get("allow_patient_practitioner_selection")
        .and_then(Value::as_bool)
    {
        row.allow_patient_practitioner_selection = value;
    }
    if let Some(value) = data
        .get("allow_multiple_time_slot_selection")
        .and_then(Value::as_bool)
    {
        row.allow_multiple_time_slot_selection = value;
    }
    if let Some(value) = data.get("description") {
        row.description = value.as_str().map(str::to_string);
    }
    if let Some(value) = data
        .get("scheduling_buffer_minutes")
        .and_then(Value::as_i64)
    {
        row.scheduling_buffer_minutes = value as i32;
    }
    if let Some(value) = data.get("service_type_group_id") {
        row.service_type_group_id = value.as_i64();
    }
    if let Some(value) = data.get("display_order").and_then(Value::as_i64) {
        row.display_order = value as i32;
    }
    if let Some(value) = data.get("require_notes").and_then(Value::as_bool) {
        row.require_notes = value;
    }
    if let Some(value) = data.get("notes_instructions") {
        row.notes_instructions = value
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
    }

    let message_fields: [(&str, &str, &mut String); 4] = [
        (
            "patient_confirmation_message",
            DEFAULT_PATIENT_CONFIRMATION_MESSAGE,
            &mut row.patient_confirmation_message,
        ),
        (
            "clinic_confirmation_message",
            DEFAULT_CLINIC_CONFIRMATION_MESSAGE,
            &mut row.clinic_confirmation_message,
        ),
        (
            "reminder_message",
            DEFAULT_REMINDER_MESSAGE,
            &mut row.reminder_message,
        ),
        (
            "recurrent_clinic_confirmation_message",
            DEFAULT_RECURRENT_CLINIC_CONFIRMATION_MESSAGE,
            &mut row.recurrent_clinic_confirmation_message,
        ),
    ];
    for (key, default, target) in message_fields {
        if let Some(value) = data.get(key) {
            let message = message_or_default(value.as_str(), default);
            let placeholders: &[&str] = if key == "recurrent_clinic_confirmation_message" {
                &RECURRENT_PLACEHOLDERS
            } else {
                &STANDARD_PLACEHOLDERS
            };
            let errors = validate_template(&message, placeholders);
            if !errors.is_empty() {
                return Err(AppError::Validation(format!(
                    "{}: {}",
                    key,
                    errors.join(", ")
                )));
            }
            *target = message;
        }
    }

    for (key, target) in [
        ("send_patient_confirmation", &mut row.send_patient_confirmation),
        ("send_clinic_confirmation", &mut row.send_clinic_confirmation),
        ("send_reminder", &mut row.send_reminder),
        (
            "send_recurrent_clinic_confirmation",
            &mut row.send_recurrent_clinic_confirmation,
        ),
    ] {
        if let Some(value) = data.get(key).and_then(Value::as_bool) {
            *target = value;
        }
    }

    // Writing through an update reactivates a soft-deleted row.
    if row.is_deleted {
        row.is_deleted = false;
        row.deleted_at = None;
    }
    Ok(())
}

/// Write every mutable column of an appointment-type row back
pub async fn persist_appointment_type(
    tx: &mut Transaction<'_, Postgres>,
    row: &AppointmentType,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE appointment_types SET
            name = $1, duration_minutes = $2, receipt_name = $3,
            allow_new_patient_booking = $4, allow_existing_patient_booking = $5,
            allow_patient_practitioner_selection = $6, allow_multiple_time_slot_selection = $7,
            description = $8, scheduling_buffer_minutes = $9, service_type_group_id = $10,
            display_order = $11, require_notes = $12, notes_instructions = $13,
            send_patient_confirmation = $14, send_clinic_confirmation = $15,
            send_reminder = $16, send_recurrent_clinic_confirmation = $17,
            patient_confirmation_message = $18, clinic_confirmation_message = $19,
            reminder_message = $20, recurrent_clinic_confirmation_message = $21,
            is_deleted = $22, deleted_at = $23, updated_at = NOW()
        WHERE id = $24
        "#,
    )
    .bind(&row.name)
    .bind(row.duration_minutes)
    .bind(row.receipt_name.as_deref())
    .bind(row.allow_new_patient_booking)
    .bind(row.allow_existing_patient_booking)
    .bind(row.allow_patient_practitioner_selection)
    .bind(row.allow_multiple_time_slot_selection)
    .bind(row.description.as_deref())
    .bind(row.scheduling_buffer_minutes)
    .bind(row.service_type_group_id)
    .bind(row.display_order)
    .bind(row.require_notes)
    .bind(row.notes_instructions.as_deref())
    .bind(row.send_patient_confirmation)
    .bind(row.send_clinic_confirmation)
    .bind(row.send_reminder)
    .bind(row.send_recurrent_clinic_confirmation)
    .bind(&row.patient_confirmation_message)
    .bind(&row.clinic_confirmation_message)
    .bind(&row.reminder_message)
    .bind(&row.recurrent_clinic_confirmation_message)
    .bind(row.is_deleted)
    .bind(row.deleted_at)
    .bind(row.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Insert a new appointment type from raw JSON data
pub async fn insert_appointment_type(
    tx: &mut Transaction<'_, Postgres>,
    clinic_id: i64,
    data: &serde_json::Map<String, Value>,
    default_display_order: i32,
) -> Result<i64> {
    let name = data
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation("名稱不可為空".to_string()))?;
    let duration = data
        .get("duration_minutes")
        .and_then(Value::as_i64)
        .filter(|&d| d > 0)
        .ok_or_else(|| AppError::Validation("服務時長必須大於 0".to_string()))?;

    let get_bool =
        |key: &str, default: bool| data.get(key).and_then(Value::as_bool).unwrap_or(default);
    let get_str = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO appointment_types (
            clinic_id, name, duration_minutes, receipt_name,
            allow_new_patient_booking, allow_existing_patient_booking,
            allow_patient_practitioner_selection, allow_multiple_time_slot_selection,
            description, scheduling_buffer_minutes, service_type_group_id, display_order,
            require_notes, notes_instructions,
            send_patient_confirmation, send_clinic_confirmation, send_reminder,
            send_recurrent_clinic_confirmation,
            patient_confirmation_message, clinic_confirmation_message,
            reminder_message, recurrent_clinic_confirmation_message
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22)
        RETURNING id
        "#,
    )
    .bind(clinic_id)
    .bind(name)
    .bind(duration as i32)
    .bind(get_str("receipt_name"))
    .bind(get_bool("allow_new_patient_booking", true))
    .bind(get_bool("allow_existing_patient_booking", true))
    .bind(get_bool("allow_patient_practitioner_selection", true))
    .bind(get_bool("allow_multiple_time_slot_selection", false))
    .bind(get_str("description"))
    .bind(
        data.get("scheduling_buffer_minutes")
            .and_then(Value::as_i64)
            .unwrap_or(0) as i32,
    )
    .bind(data.get("service_type_group_id").and_then(Value::as_i64))
    .bind(
        data.get("display_order")
            .and_then(Value::as_i64)
            .map(|o| o as i32)
            .unwrap_or(default_display_order),
    )
    .bind(get_bool("require_notes", false))
    .bind(
        get_str("notes_instructions")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    )
    .bind(get_bool("send_patient_confirmation", true))
    .bind(get_bool("send_clinic_confirmation", true))
    .bind(get_bool("send_reminder", true))
    .bind(get_bool("send_recurrent_clinic_confirmation", true))
    .bind(message_or_default(
        data.get("patient_confirmation_message").and_then(Value::as_str),
        DEFAULT_PATIENT_CONFIRMATION_MESSAGE,
    ))
    .bind(message_or_default(
        data.get("clinic_confirmation_message").and_then(Value::as_str),
        DEFAULT_CLINIC_CONFIRMATION_MESSAGE,
    ))
    .bind(message_or_default(
        data.get("reminder_message").and_then(Value::as_str),
        DEFAULT_REMINDER_MESSAGE,
    ))
    .bind(message_or_default(
        data.get("recurrent_clinic_confirmation_message")
            .and_then(Value::as_str),
        DEFAULT_RECURRENT_CLINIC_CONFIRMATION_MESSAGE,
    ))
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}

/// If a soft-deleted appointment type holds the (name, duration) an
/// active row wants, rename it with a timestamp suffix so the name is
/// free again.
pub async fn evict_soft_deleted_name(
    tx: &mut Transaction<'_, Postgres>,
    clinic_id: i64,
    name: &str,
    duration_minutes: i32,
    exclude_id: Option<i64>,
) -> Result<()> {
    let suffix = Utc::now().format("%Y%m%d%H%M%S%f").to_string();
    let renamed = sqlx::query(
        r#"
        UPDATE appointment_types
        SET name = name || ' (deleted-' || $1 || ')', updated_at = NOW()
        WHERE clinic_id = $2 AND name = $3 AND duration_minutes = $4
          AND is_deleted = TRUE
          AND ($5::BIGINT IS NULL OR id <> $5)
        "#,
    )
    .bind(&suffix)
    .bind(clinic_id)
    .bind(name)
    .bind(duration_minutes)
    .bind(exclude_id)
    .execute(&mut **tx)
    .await?
    .rows_affected();
    if renamed > 0 {
        info!(
            "Evicted {} soft-deleted appointment type name(s) '{}' in clinic {}",
            renamed, name, clinic_id
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn base_row() -> AppointmentType {
        AppointmentType {
            id: 1,
            clinic_id: 1,
            name: "徒手治療".to_string(),
            duration_minutes: 60,
            receipt_name: None,
            allow_new_patient_booking: true,
            allow_existing_patient_booking: true,
            allow_patient_practitioner_selection: true,
            allow_multiple_time_slot_selection: false,
            description: None,
            scheduling_buffer_minutes: 0,
            service_type_group_id: None,
            display_order: 0,
            require_notes: false,
            notes_instructions: None,
            send_patient_confirmation: true,
            send_clinic_confirmation: true,
            send_reminder: true,
            send_recurrent_clinic_confirmation: true,
            patient_confirmation_message: DEFAULT_PATIENT_CONFIRMATION_MESSAGE.to_string(),
            clinic_confirmation_message: DEFAULT_CLINIC_CONFIRMATION_MESSAGE.to_string(),
            reminder_message: DEFAULT_REMINDER_MESSAGE.to_string(),
            recurrent_clinic_confirmation_message: DEFAULT_RECURRENT_CLINIC_CONFIRMATION_MESSAGE
                .to_string(),
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_apply_update_only_touches_present_keys() {
        let mut row = base_row();
        let data = json!({"duration_minutes": 45});
        apply_appointment_type_update(&mut row, data.as_object().unwrap()).unwrap();
        assert_eq!(row.duration_minutes, 45);
        assert_eq!(row.name, "徒手治療");
        assert!(row.allow_new_patient_booking);
    }

    #[test]
    fn test_apply_update_blank_message_defaults() {
        let mut row = base_row();
        row.reminder_message = "自訂提醒".to_string();
        let data = json!({"reminder_message": "   "});
        apply_appointment_type_update(&mut row, data.as_object().unwrap()).unwrap();
        assert_eq!(row.reminder_message, DEFAULT_REMINDER_MESSAGE);
    }

    #[test]
    fn test_apply_update_rejects_unknown_placeholder() {
        let mut row = base_row();
        let data = json!({"patient_confirmation_message": "哈囉 {nonsense}"});
        let result = apply_appointment_type_update(&mut row, data.as_object().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_update_rejects_zero_duration() {
        let mut row = base_row();
        let data = json!({"duration_minutes": 0});
        assert!(apply_appointment_type_update(&mut row, data.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_apply_update_reactivates_soft_deleted() {
        let mut row = base_row();
        row.is_deleted = true;
        row.deleted_at = Some(Utc::now());
        let data = json!({"name": "徒手治療"});
        apply_appointment_type_update(&mut row, data.as_object().unwrap()).unwrap();
        assert!(!row.is_deleted);
        assert!(row.deleted_at.is_none());
    }
}
