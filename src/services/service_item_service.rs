/*!
 * Service Item Bundle Service
 *
 * Reads and saves a service item together with its four association
 * sets in one transaction:
 *
 * - practitioner assignments: hard sync (replace-all);
 * - billing scenarios: diff sync by id (missing ids soft-delete, new
 *   rows insert, scenarios of departed practitioners soft-delete);
 * - resource requirements: replace-all;
 * - follow-up messages: diff sync by id.
 *
 * Bundle writes run under serializable isolation so concurrent saves
 * cannot interleave phantom scenario inserts; renames serialize on a
 * `FOR UPDATE` lock of the service row.
 */

use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::models::appointment_type::{
    AppointmentResourceRequirement, AppointmentType, BillingScenario, BillingScenarioBundleData,
    FollowUpMessageBundleData, PractitionerAppointmentType, ResourceRequirementBundleData,
    ServiceItemBundleAssociations, ServiceItemBundleRequest, ServiceItemBundleResponse,
    ServiceItemData,
};
use crate::models::resource::ResourceType;
use crate::services::message_template::{
    message_or_default, validate_template, DEFAULT_CLINIC_CONFIRMATION_MESSAGE,
    DEFAULT_PATIENT_CONFIRMATION_MESSAGE, DEFAULT_RECURRENT_CLINIC_CONFIRMATION_MESSAGE,
    DEFAULT_REMINDER_MESSAGE, RECURRENT_PLACEHOLDERS, STANDARD_PLACEHOLDERS,
};
use crate::services::settings_service::evict_soft_deleted_name;
use crate::utils::time::parse_hhmm;
use crate::utils::{AppError, Result};

/// Service item bundle operations
pub struct ServiceItemService {
    pool: PgPool,
}

impl ServiceItemService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read a service item and every association
    pub async fn get_bundle(&self, clinic_id: i64, id: i64) -> Result<ServiceItemBundleResponse> {
        let item = sqlx::query_as::<_, AppointmentType>(
            "SELECT * FROM appointment_types WHERE id = $1 AND clinic_id = $2",
        )
        .bind(id)
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("服務項目不存在".to_string()))?;

        let practitioner_ids = sqlx::query_as::<_, PractitionerAppointmentType>(
            r#"
            SELECT * FROM practitioner_appointment_types
            WHERE appointment_type_id = $1 AND is_deleted = FALSE
            ORDER BY user_id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|assignment| assignment.user_id)
        .collect();

        let billing_scenarios = sqlx::query_as::<_, BillingScenario>(
            r#"
            SELECT * FROM billing_scenarios
            WHERE appointment_type_id = $1 AND is_deleted = FALSE
            ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|scenario| BillingScenarioBundleData {
            id: Some(scenario.id),
            practitioner_id: scenario.practitioner_id,
            name: scenario.name,
            amount: scenario.amount,
            revenue_share: scenario.revenue_share,
            is_default: scenario.is_default,
        })
        .collect();

        let requirement_rows = sqlx::query_as::<_, AppointmentResourceRequirement>(
            r#"
            SELECT id, appointment_type_id, resource_type_id, quantity
            FROM appointment_resource_requirements
            WHERE appointment_type_id = $1
            ORDER BY resource_type_id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let type_names: std::collections::HashMap<i64, String> =
            sqlx::query_as::<_, ResourceType>(
                "SELECT id, clinic_id, name FROM resource_types WHERE clinic_id = $1",
            )
            .bind(clinic_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|rt| (rt.id, rt.name))
            .collect();
        let resource_requirements = requirement_rows
            .into_iter()
            .map(|requirement| ResourceRequirementBundleData {
                resource_type_id: requirement.resource_type_id,
                resource_type_name: type_names.get(&requirement.resource_type_id).cloned(),
                quantity: requirement.quantity,
            })
            .collect();

        let follow_up_messages = sqlx::query_as::<_, crate::models::FollowUpMessage>(
            r#"
            SELECT * FROM follow_up_messages
            WHERE appointment_type_id = $1
            ORDER BY display_order, id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .filter_map(|fm| {
            let timing_mode =
                crate::models::FollowUpTimingMode::from_str(&fm.timing_mode)?;
            Some(FollowUpMessageBundleData {
                id: Some(fm.id),
                timing_mode,
                hours_after: fm.hours_after,
                days_after: fm.days_after,
                time_of_day: fm.time_of_day.map(crate::utils::time::format_hhmm),
                message_template: fm.message_template,
                is_enabled: fm.is_enabled,
                display_order: fm.display_order,
            })
        })
        .collect();

        Ok(ServiceItemBundleResponse {
            item: item.into(),
            associations: ServiceItemBundleAssociations {
                practitioner_ids,
                billing_scenarios,
                resource_requirements,
                follow_up_messages,
            },
        })
    }

    /// Create a service item and its associations in one transaction
    pub async fn create_bundle(
        &self,
        clinic_id: i64,
        request: ServiceItemBundleRequest,
    ) -> Result<ServiceItemBundleResponse> {
        validate_item(&request.item)?;
        validate_associations(&request.associations)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        // Name uniqueness among active rows, with the lock held through
        // the insert.
        let taken: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM appointment_types
            WHERE clinic_id = $1 AND name = $2 AND is_deleted = FALSE
            FOR UPDATE
            "#,
        )
        .bind(clinic_id)
        .bind(&request.item.name)
        .fetch_optional(&mut *tx)
        .await?;
        if taken.is_some() {
            return Err(AppError::NameConflict);
        }

        evict_soft_deleted_name(
            &mut tx,
            clinic_id,
            &request.item.name,
            request.item.duration_minutes,
            None,
        )
        .await?;

        let max_order: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(display_order) FROM appointment_types WHERE clinic_id = $1",
        )
        .bind(clinic_id)
        .fetch_one(&mut *tx)
        .await?;
        let display_order = if request.item.display_order != 0 {
            request.item.display_order
        } else {
            max_order.map(|o| o + 1).unwrap_or(0)
        };

        let item_id = insert_item(&mut tx, clinic_id, &request.item, display_order).await?;
        sync_associations(&mut tx, clinic_id, item_id, &request.associations).await?;
        tx.commit().await?;

        info!("Created service item bundle {} in clinic {}", item_id, clinic_id);
        self.get_bundle(clinic_id, item_id).await
    }

    /// Update a service item and its associations in one transaction
    pub async fn update_bundle(
        &self,
        clinic_id: i64,
        id: i64,
        request: ServiceItemBundleRequest,
    ) -> Result<ServiceItemBundleResponse> {
        validate_item(&request.item)?;
        validate_associations(&request.associations)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let current = sqlx::query_as::<_, AppointmentType>(
            r#"
            SELECT * FROM appointment_types
            WHERE id = $1 AND clinic_id = $2
            FOR UPDATE
            "#,
        )
        .bind(id)
        .bind(clinic_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("服務項目不存在".to_string()))?;

        if current.name != request.item.name {
            let taken: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT id FROM appointment_types
                WHERE clinic_id = $1 AND name = $2 AND is_deleted = FALSE AND id <> $3
                FOR UPDATE
                "#,
            )
            .bind(clinic_id)
            .bind(&request.item.name)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
            if taken.is_some() {
                return Err(AppError::NameConflict);
            }
            evict_soft_deleted_name(
                &mut tx,
                clinic_id,
                &request.item.name,
                request.item.duration_minutes,
                Some(id),
            )
            .await?;
        }

        update_item(&mut tx, id, &request.item).await?;
        sync_associations(&mut tx, clinic_id, id, &request.associations).await?;
        tx.commit().await?;

        self.get_bundle(clinic_id, id).await
    }
}

fn validate_item(item: &ServiceItemData) -> Result<()> {
    if item.name.trim().is_empty() {
        return Err(AppError::Validation("名稱不可為空".to_string()));
    }
    if item.duration_minutes <= 0 {
        return Err(AppError::Validation("服務時長必須大於 0".to_string()));
    }
    for (field, template, placeholders) in [
        (
            "patient_confirmation_message",
            &item.patient_confirmation_message,
            &STANDARD_PLACEHOLDERS[..],
        ),
        (
            "clinic_confirmation_message",
            &item.clinic_confirmation_message,
            &STANDARD_PLACEHOLDERS[..],
        ),
        ("reminder_message", &item.reminder_message, &STANDARD_PLACEHOLDERS[..]),
        (
            "recurrent_clinic_confirmation_message",
            &item.recurrent_clinic_confirmation_message,
            &RECURRENT_PLACEHOLDERS[..],
        ),
    ] {
        if let Some(template) = template {
            let errors = validate_template(template, placeholders);
            if !errors.is_empty() {
                return Err(AppError::Validation(format!(
                    "{}: {}",
                    field,
                    errors.join(", ")
                )));
            }
        }
    }
    Ok(())
}

fn validate_associations(associations: &ServiceItemBundleAssociations) -> Result<()> {
    for scenario in &associations.billing_scenarios {
        scenario
            .validate_revenue_share()
            .map_err(AppError::Validation)?;
    }
    for message in &associations.follow_up_messages {
        if message.message_template.trim().is_empty() {
            return Err(AppError::Validation("訊息內容不可為空".to_string()));
        }
        if let Some(raw) = &message.time_of_day {
            if parse_hhmm(raw).is_none() {
                return Err(AppError::Validation("時間格式錯誤".to_string()));
            }
        }
    }
    Ok(())
}

async fn insert_item(
    tx: &mut Transaction<'_, Postgres>,
    clinic_id: i64,
    item: &ServiceItemData,
    display_order: i32,
) -> Result<i64> {
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
    .bind(&item.name)
    .bind(item.duration_minutes)
    .bind(item.receipt_name.as_deref())
    .bind(item.allow_new_patient_booking)
    .bind(item.allow_existing_patient_booking)
    .bind(item.allow_patient_practitioner_selection)
    .bind(item.allow_multiple_time_slot_selection)
    .bind(item.description.as_deref())
    .bind(item.scheduling_buffer_minutes)
    .bind(item.service_type_group_id)
    .bind(display_order)
    .bind(item.require_notes)
    .bind(
        item.notes_instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty()),
    )
    .bind(item.send_patient_confirmation)
    .bind(item.send_clinic_confirmation)
    .bind(item.send_reminder)
    .bind(item.send_recurrent_clinic_confirmation)
    .bind(message_or_default(
        item.patient_confirmation_message.as_deref(),
        DEFAULT_PATIENT_CONFIRMATION_MESSAGE,
    ))
    .bind(message_or_default(
        item.clinic_confirmation_message.as_deref(),
        DEFAULT_CLINIC_CONFIRMATION_MESSAGE,
    ))
    .bind(message_or_default(
        item.reminder_message.as_deref(),
        DEFAULT_REMINDER_MESSAGE,
    ))
    .bind(message_or_default(
        item.recurrent_clinic_confirmation_message.as_deref(),
        DEFAULT_RECURRENT_CLINIC_CONFIRMATION_MESSAGE,
    ))
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}

async fn update_item(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    item: &ServiceItemData,
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
            is_deleted = FALSE, deleted_at = NULL, updated_at = NOW()
        WHERE id = $22
        "#,
    )
    .bind(&item.name)
    .bind(item.duration_minutes)
    .bind(item.receipt_name.as_deref())
    .bind(item.allow_new_patient_booking)
    .bind(item.allow_existing_patient_booking)
    .bind(item.allow_patient_practitioner_selection)
    .bind(item.allow_multiple_time_slot_selection)
    .bind(item.description.as_deref())
    .bind(item.scheduling_buffer_minutes)
    .bind(item.service_type_group_id)
    .bind(item.display_order)
    .bind(item.require_notes)
    .bind(
        item.notes_instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty()),
    )
    .bind(item.send_patient_confirmation)
    .bind(item.send_clinic_confirmation)
    .bind(item.send_reminder)
    .bind(item.send_recurrent_clinic_confirmation)
    .bind(message_or_default(
        item.patient_confirmation_message.as_deref(),
        DEFAULT_PATIENT_CONFIRMATION_MESSAGE,
    ))
    .bind(message_or_default(
        item.clinic_confirmation_message.as_deref(),
        DEFAULT_CLINIC_CONFIRMATION_MESSAGE,
    ))
    .bind(message_or_default(
        item.reminder_message.as_deref(),
        DEFAULT_REMINDER_MESSAGE,
    ))
    .bind(message_or_default(
        item.recurrent_clinic_confirmation_message.as_deref(),
        DEFAULT_RECURRENT_CLINIC_CONFIRMATION_MESSAGE,
    ))
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Sync all four association sets for a service item
async fn sync_associations(
    tx: &mut Transaction<'_, Postgres>,
    clinic_id: i64,
    appointment_type_id: i64,
    associations: &ServiceItemBundleAssociations,
) -> Result<()> {
    // Assigned practitioners must be active members of this clinic.
    if !associations.practitioner_ids.is_empty() {
        let valid_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM user_clinic_associations
            WHERE clinic_id = $1 AND user_id = ANY($2) AND is_active = TRUE
            "#,
        )
        .bind(clinic_id)
        .bind(&associations.practitioner_ids)
        .fetch_one(&mut **tx)
        .await?;
        if valid_count != associations.practitioner_ids.len() as i64 {
            return Err(AppError::Forbidden(
                "一個或多個指派的治療師不屬於此診所或已停用".to_string(),
            ));
        }
    }

    // 1. Practitioner assignments: hard sync. Deactivate everything,
    // then reactivate or insert the incoming set.
    sqlx::query(
        r#"
        UPDATE practitioner_appointment_types
        SET is_deleted = TRUE, deleted_at = NOW()
        WHERE appointment_type_id = $1 AND is_deleted = FALSE
        "#,
    )
    .bind(appointment_type_id)
    .execute(&mut **tx)
    .await?;

    for &practitioner_id in &associations.practitioner_ids {
        let reactivated = sqlx::query(
            r#"
            UPDATE practitioner_appointment_types
            SET is_deleted = FALSE, deleted_at = NULL
            WHERE appointment_type_id = $1 AND user_id = $2
            "#,
        )
        .bind(appointment_type_id)
        .bind(practitioner_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();
        if reactivated == 0 {
            sqlx::query(
                r#"
                INSERT INTO practitioner_appointment_types
                    (user_id, appointment_type_id, clinic_id, is_deleted)
                VALUES ($1, $2, $3, FALSE)
                "#,
            )
            .bind(practitioner_id)
            .bind(appointment_type_id)
            .bind(clinic_id)
            .execute(&mut **tx)
            .await?;
        }
    }

    // 2. Billing scenarios: diff sync by id. Scenarios missing from the
    // incoming list, or belonging to practitioners no longer active in
    // the clinic, soft-delete; surviving defaults are cleared with them.
    let incoming_ids: Vec<i64> = associations
        .billing_scenarios
        .iter()
        .filter_map(|scenario| scenario.id)
        .collect();

    let valid_practitioner_ids = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT user_id FROM user_clinic_associations
        WHERE clinic_id = $1 AND is_active = TRUE
        "#,
    )
    .bind(clinic_id)
    .fetch_all(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE billing_scenarios
        SET is_deleted = TRUE, deleted_at = NOW(), is_default = FALSE, updated_at = NOW()
        WHERE appointment_type_id = $1
          AND is_deleted = FALSE
          AND (NOT (id = ANY($2)) OR NOT (practitioner_id = ANY($3)))
        "#,
    )
    .bind(appointment_type_id)
    .bind(&incoming_ids)
    .bind(&valid_practitioner_ids)
    .execute(&mut **tx)
    .await?;

    for scenario in &associations.billing_scenarios {
        if !valid_practitioner_ids.contains(&scenario.practitioner_id) {
            continue;
        }
        let mut updated = false;
        if let Some(id) = scenario.id {
            updated = sqlx::query(
                r#"
                UPDATE billing_scenarios
                SET practitioner_id = $1, name = $2, amount = $3, revenue_share = $4,
                    is_default = $5, is_deleted = FALSE, deleted_at = NULL, updated_at = NOW()
                WHERE id = $6 AND appointment_type_id = $7 AND clinic_id = $8
                "#,
            )
            .bind(scenario.practitioner_id)
            .bind(&scenario.name)
            .bind(scenario.amount)
            .bind(scenario.revenue_share)
            .bind(scenario.is_default)
            .bind(id)
            .bind(appointment_type_id)
            .bind(clinic_id)
            .execute(&mut **tx)
            .await?
            .rows_affected()
                > 0;
            if !updated {
                warn!(
                    "Billing scenario id {} not found for service {}; inserting as new",
                    id, appointment_type_id
                );
            }
        }
        if !updated {
            sqlx::query(
                r#"
                INSERT INTO billing_scenarios
                    (clinic_id, appointment_type_id, practitioner_id, name,
                     amount, revenue_share, is_default)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(clinic_id)
            .bind(appointment_type_id)
            .bind(scenario.practitioner_id)
            .bind(&scenario.name)
            .bind(scenario.amount)
            .bind(scenario.revenue_share)
            .bind(scenario.is_default)
            .execute(&mut **tx)
            .await?;
        }
    }

    // 3. Resource requirements: replace-all.
    sqlx::query("DELETE FROM appointment_resource_requirements WHERE appointment_type_id = $1")
        .bind(appointment_type_id)
        .execute(&mut **tx)
        .await?;
    for requirement in &associations.resource_requirements {
        sqlx::query(
            r#"
            INSERT INTO appointment_resource_requirements
                (appointment_type_id, resource_type_id, quantity)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(appointment_type_id)
        .bind(requirement.resource_type_id)
        .bind(requirement.quantity)
        .execute(&mut **tx)
        .await?;
    }

    // 4. Follow-up messages: diff sync by id.
    let incoming_fm_ids: Vec<i64> = associations
        .follow_up_messages
        .iter()
        .filter_map(|message| message.id)
        .collect();
    sqlx::query(
        r#"
        DELETE FROM follow_up_messages
        WHERE appointment_type_id = $1 AND NOT (id = ANY($2))
        "#,
    )
    .bind(appointment_type_id)
    .bind(&incoming_fm_ids)
    .execute(&mut **tx)
    .await?;

    for message in &associations.follow_up_messages {
        let time_of_day = message.time_of_day.as_deref().and_then(parse_hhmm);
        let mut updated = false;
        if let Some(id) = message.id {
            updated = sqlx::query(
                r#"
                UPDATE follow_up_messages
                SET timing_mode = $1, hours_after = $2, days_after = $3, time_of_day = $4,
                    message_template = $5, is_enabled = $6, display_order = $7
                WHERE id = $8 AND appointment_type_id = $9 AND clinic_id = $10
                "#,
            )
            .bind(message.timing_mode.as_str())
            .bind(message.hours_after)
            .bind(message.days_after)
            .bind(time_of_day)
            .bind(&message.message_template)
            .bind(message.is_enabled)
            .bind(message.display_order)
            .bind(id)
            .bind(appointment_type_id)
            .bind(clinic_id)
            .execute(&mut **tx)
            .await?
            .rows_affected()
                > 0;
        }
        if !updated {
            sqlx::query(
                r#"
                INSERT INTO follow_up_messages
                    (clinic_id, appointment_type_id, timing_mode, hours_after, days_after,
                     time_of_day, message_template, is_enabled, display_order)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(clinic_id)
            .bind(appointment_type_id)
            .bind(message.timing_mode.as_str())
            .bind(message.hours_after)
            .bind(message.days_after)
            .bind(time_of_day)
            .bind(&message.message_template)
            .bind(message.is_enabled)
            .bind(message.display_order)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}
