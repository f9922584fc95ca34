/*!
 * Appointment Lifecycle Manager
 *
 * The central state machine: create, edit, cancel, admin reassignment,
 * and time-slot confirmation. Every mutation follows the same shape:
 *
 * 1. resolve the target practitioner (auto-assignment tie-break or an
 *    explicit choice) against prefetched schedules;
 * 2. gate patient-initiated calls through the booking policy;
 * 3. re-run the conflict check inside a transaction holding row locks on
 *    the practitioner's calendar events and the resource allocations, so
 *    two racing requests cannot double-book;
 * 4. persist, commit, then hand notification intents to the outbound
 *    worker.
 *
 * Auto-assigned appointments stay hidden from their practitioner
 * (`is_auto_assigned = true`) until the reveal boundary; when a booking
 * lands inside the boundary already, the reveal happens here right after
 * commit instead of waiting for the scheduler tick.
 */

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::models::appointment_type::AppointmentType;
use crate::models::settings::ClinicSettings;
use crate::models::{
    ActorKind, Appointment, AppointmentStatus, AppointmentWithEvent, Clinic,
    ConfirmTimeSlotRequest, CreateAppointmentRequest, LineUser, Patient, PractitionerChoice,
    UpdateAppointmentRequest,
};
use crate::services::availability_service::{
    conflict_blocks, lock_day_schedule, pick_auto_practitioner, resource_conflict,
    schedule_conflict, AvailabilityService, ConflictDetail, DaySchedule,
};
use crate::services::booking_policy::{self, BookingCheck};
use crate::services::message_template::TemplateValues;
use crate::services::notification_service::{
    decide_cancel, decide_create, decide_edit, decide_reveal, EditChange, NotificationIntent,
    NotificationRenderer,
};
use crate::services::outbound::OutboundSender;
use crate::utils::time::{clinic_now, format_appointment_datetime, parse_hhmm};
use crate::utils::{AppError, ConflictKind, Result};

/// Outcome of a cancel call; cancelling twice is a no-op
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyCancelled,
}

/// How the final practitioner was arrived at
#[derive(Debug, Clone, Copy)]
struct ResolvedPractitioner {
    user_id: i64,
    /// True when the auto-assignment tie-break produced the id
    auto_resolved: bool,
}

/// Appointment service
pub struct AppointmentService {
    pool: PgPool,
    outbound: OutboundSender,
}

impl AppointmentService {
    pub fn new(pool: PgPool, outbound: OutboundSender) -> Self {
        Self { pool, outbound }
    }

    fn availability(&self) -> AvailabilityService {
        AvailabilityService::new(self.pool.clone())
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    pub async fn create_appointment(
        &self,
        clinic_id: i64,
        request: CreateAppointmentRequest,
        actor: ActorKind,
    ) -> Result<AppointmentWithEvent> {
        let clinic = self.load_clinic(clinic_id).await?;
        if !clinic.is_active {
            return Err(AppError::Forbidden("診所目前無法接受預約".to_string()));
        }
        let settings = clinic.validated_settings()?;
        let service = self
            .load_appointment_type(clinic_id, request.appointment_type_id)
            .await?;
        if service.duration_minutes <= 0 {
            return Err(AppError::Validation("服務時長必須大於 0".to_string()));
        }

        // Multi-slot selection: two or more candidates put the booking
        // into pending confirmation at the first slot; exactly one
        // behaves like a plain booking.
        let slots = &request.alternative_time_slots;
        let multi_slot =
            slots.len() >= 2 && service.allow_multiple_time_slot_selection;
        let (date, start_time) = match slots.first() {
            Some(first) => (first.date, first.start_time),
            None => (
                request.date,
                parse_hhmm(&request.start_time)
                    .ok_or_else(|| AppError::Validation("時間格式錯誤".to_string()))?,
            ),
        };

        let requested = match request.practitioner_id {
            id if id == crate::models::AUTO_ASSIGN_SENTINEL => PractitionerChoice::Auto,
            id => PractitionerChoice::Specific(id),
        };
        // A patient booking a service that hides practitioner selection
        // always goes through auto-assignment, whatever id they sent.
        let choice = if actor == ActorKind::Patient
            && !service.allow_patient_practitioner_selection
        {
            PractitionerChoice::Auto
        } else {
            requested
        };

        let resolved = self
            .resolve_practitioner(&clinic, &service, date, start_time, choice, None, None, actor)
            .await?;

        if actor == ActorKind::Patient {
            let now = clinic_now();
            let future_count = self
                .count_future_appointments(clinic_id, request.patient_id, None)
                .await?;
            let has_prior_confirmed = self
                .has_confirmed_history(clinic_id, request.patient_id)
                .await?;
            let check = BookingCheck {
                settings: &settings.booking_restriction_settings,
                service: &service,
                now,
                date,
                start_time,
                future_count,
                has_prior_confirmed,
                practitioner_choice: choice,
            };
            booking_policy::evaluate_booking(&check).map_err(AppError::Policy)?;
        }

        let duration = service.duration_minutes as i64;
        let end_time = start_time + Duration::minutes(duration);
        let requirements = self.availability().resource_requirements(service.id).await?;

        // Conflict check under lock, then insert.
        let mut tx = self.pool.begin().await?;
        let windows = self
            .weekly_windows_for(&mut tx, resolved.user_id, clinic_id, date)
            .await?;
        let schedule =
            lock_day_schedule(&mut tx, resolved.user_id, clinic_id, date, windows).await?;
        if let Some(conflict) = schedule_conflict(&schedule, start_time, duration, None) {
            if conflict_blocks(actor, conflict.kind) {
                return Err(AppError::Scheduling(conflict.kind));
            }
        }
        let pool_state =
            AvailabilityService::resource_pool_for_update(&mut tx, clinic_id, date).await?;
        let picked = pool_state
            .pick_instances(&requirements, start_time, end_time)
            .ok_or(AppError::Scheduling(ConflictKind::ResourceConflict))?;

        let calendar_event_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO calendar_events (user_id, clinic_id, event_type, date, start_time, end_time)
            VALUES ($1, $2, 'appointment', $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(resolved.user_id)
        .bind(clinic_id)
        .bind(date)
        .bind(start_time)
        .bind(end_time)
        .fetch_one(&mut *tx)
        .await?;

        let hidden = resolved.auto_resolved;
        let pending = multi_slot;
        let stored_slots = if multi_slot {
            Some(serde_json::to_value(slots).expect("slots serialize"))
        } else {
            None
        };

        let appointment_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO appointments (
                calendar_event_id, patient_id, appointment_type_id, status,
                notes, clinic_notes, is_auto_assigned, originally_auto_assigned,
                pending_time_confirmation, alternative_time_slots
            )
            VALUES ($1, $2, $3, 'confirmed', $4, $5, $6, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(calendar_event_id)
        .bind(request.patient_id)
        .bind(service.id)
        .bind(request.notes.as_deref())
        .bind(request.clinic_notes.as_deref())
        .bind(hidden)
        .bind(pending)
        .bind(stored_slots)
        .fetch_one(&mut *tx)
        .await?;

        for resource_id in &picked {
            sqlx::query(
                r#"
                INSERT INTO appointment_resource_allocations (appointment_id, resource_id)
                VALUES ($1, $2)
                "#,
            )
            .bind(appointment_id)
            .bind(resource_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            "Created appointment {} for patient {} on {} (auto: {})",
            appointment_id, request.patient_id, date, hidden
        );

        let created = self.load_appointment(clinic_id, appointment_id).await?;

        let intents = decide_create(
            actor,
            !created.is_auto_assigned,
            resolved.user_id,
            request.patient_id,
            service.send_patient_confirmation,
        );
        self.send_notifications(&clinic, &settings, &service, &created, intents)
            .await;

        // A booking inside the reveal boundary must not wait for the next
        // scheduler tick.
        if created.is_auto_assigned
            && booking_policy::reveal_due(
                &settings.booking_restriction_settings,
                clinic_now(),
                created.date,
                created.start_time,
            )
        {
            self.reveal_appointment(&clinic, &settings, created.id).await?;
            return self.load_appointment(clinic_id, created.id).await;
        }

        Ok(created)
    }

    // ------------------------------------------------------------------
    // Edit
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn update_appointment(
        &self,
        clinic_id: i64,
        appointment_id: i64,
        request: UpdateAppointmentRequest,
        actor: ActorKind,
        staff_user_id: Option<i64>,
        apply_booking_constraints: bool,
        allow_auto_assignment: bool,
    ) -> Result<AppointmentWithEvent> {
        let clinic = self.load_clinic(clinic_id).await?;
        let settings = clinic.validated_settings()?;
        let current = self.load_appointment(clinic_id, appointment_id).await?;
        if current.status.is_cancelled() {
            return Err(AppError::AlreadyCancelled);
        }
        let service = self
            .load_appointment_type(clinic_id, current.appointment_type_id)
            .await?;

        let mut choice = PractitionerChoice::from_optional_id(request.practitioner_id);
        if matches!(choice, PractitionerChoice::Auto) && !allow_auto_assignment {
            // Staff must pick a specific practitioner; the sentinel is
            // ignored and the current assignment stands.
            choice = PractitionerChoice::Keep;
        }

        let new_date = request.date.unwrap_or(current.date);
        let new_start = match &request.start_time {
            Some(raw) => parse_hhmm(raw)
                .ok_or_else(|| AppError::Validation("時間格式錯誤".to_string()))?,
            None => current.start_time,
        };
        let time_changed = new_date != current.date || new_start != current.start_time;

        if apply_booking_constraints {
            let now = clinic_now();
            let future_count = self
                .count_future_appointments(clinic_id, current.patient_id, Some(appointment_id))
                .await?;
            let has_prior_confirmed = self
                .has_confirmed_history(clinic_id, current.patient_id)
                .await?;
            let check = BookingCheck {
                settings: &settings.booking_restriction_settings,
                service: &service,
                now,
                date: new_date,
                start_time: new_start,
                future_count,
                has_prior_confirmed,
                practitioner_choice: choice,
            };
            booking_policy::evaluate_booking(&check).map_err(AppError::Policy)?;

            // Under the deadline mode the original date's deadline also
            // gates moving that appointment at all.
            if time_changed {
                booking_policy::check_lead_time(
                    &settings.booking_restriction_settings,
                    now,
                    current.date,
                    current.start_time,
                )
                .map_err(AppError::Policy)?;
            }
        }

        let resolved = match choice {
            PractitionerChoice::Keep => {
                // Re-validate the kept practitioner only when the time
                // moved; a notes-only edit touches nothing temporal.
                if time_changed {
                    self.resolve_practitioner(
                        &clinic,
                        &service,
                        new_date,
                        new_start,
                        PractitionerChoice::Specific(current.practitioner_id),
                        Some(current.calendar_event_id),
                        None,
                        actor,
                    )
                    .await?;
                }
                ResolvedPractitioner {
                    user_id: current.practitioner_id,
                    auto_resolved: false,
                }
            }
            other => {
                self.resolve_practitioner(
                    &clinic,
                    &service,
                    new_date,
                    new_start,
                    other,
                    Some(current.calendar_event_id),
                    // Stability: an auto re-run prefers the current
                    // practitioner when they still fit.
                    Some(current.practitioner_id),
                    actor,
                )
                .await?
            }
        };

        let visible_before = !current.is_auto_assigned;
        let is_auto_assigned_after = match choice {
            PractitionerChoice::Keep => current.is_auto_assigned,
            PractitionerChoice::Auto => true,
            PractitionerChoice::Specific(_) => false,
        };
        debug_assert!(
            !matches!(choice, PractitionerChoice::Auto) || resolved.auto_resolved,
            "auto choice must be auto-resolved"
        );

        let duration = service.duration_minutes as i64;
        let new_end = new_start + Duration::minutes(duration);
        let temporal_change = time_changed || resolved.user_id != current.practitioner_id;

        // A staff edit of a still-hidden appointment is the human reveal;
        // record who did it. The cron reveal never sets this field.
        let reassigned_by = if actor == ActorKind::ClinicStaff
            && current.is_auto_assigned
            && !is_auto_assigned_after
        {
            staff_user_id
        } else {
            current.reassigned_by_user_id
        };

        let mut tx = self.pool.begin().await?;

        if temporal_change {
            let windows = self
                .weekly_windows_for(&mut tx, resolved.user_id, clinic_id, new_date)
                .await?;
            let schedule =
                lock_day_schedule(&mut tx, resolved.user_id, clinic_id, new_date, windows).await?;
            if let Some(conflict) = schedule_conflict(
                &schedule,
                new_start,
                duration,
                Some(current.calendar_event_id),
            ) {
                if conflict_blocks(actor, conflict.kind) {
                    return Err(AppError::Scheduling(conflict.kind));
                }
            }
            let requirements = self.availability().resource_requirements(service.id).await?;
            let pool_state =
                AvailabilityService::resource_pool_for_update(&mut tx, clinic_id, new_date).await?;
            let picked = pool_state
                .pick_instances(&requirements, new_start, new_end)
                .ok_or(AppError::Scheduling(ConflictKind::ResourceConflict))?;

            sqlx::query(
                r#"
                UPDATE calendar_events
                SET user_id = $1, date = $2, start_time = $3, end_time = $4, updated_at = NOW()
                WHERE id = $5
                "#,
            )
            .bind(resolved.user_id)
            .bind(new_date)
            .bind(new_start)
            .bind(new_end)
            .bind(current.calendar_event_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM appointment_resource_allocations WHERE appointment_id = $1")
                .bind(appointment_id)
                .execute(&mut *tx)
                .await?;
            for resource_id in &picked {
                sqlx::query(
                    r#"
                    INSERT INTO appointment_resource_allocations (appointment_id, resource_id)
                    VALUES ($1, $2)
                    "#,
                )
                .bind(appointment_id)
                .bind(resource_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            r#"
            UPDATE appointments
            SET notes = COALESCE($1, notes),
                clinic_notes = COALESCE($2, clinic_notes),
                is_auto_assigned = $3,
                reassigned_by_user_id = $4,
                updated_at = NOW()
            WHERE id = $5
            "#,
        )
        .bind(request.notes.as_deref())
        .bind(request.clinic_notes.as_deref())
        .bind(is_auto_assigned_after)
        .bind(reassigned_by)
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let updated = self.load_appointment(clinic_id, appointment_id).await?;
        let change = EditChange {
            actor,
            practitioner_before: current.practitioner_id,
            practitioner_after: resolved.user_id,
            visible_before,
            visible_after: !updated.is_auto_assigned,
            time_changed,
            patient_id: current.patient_id,
        };
        let intents = decide_edit(&change);
        self.send_notifications(&clinic, &settings, &service, &updated, intents)
            .await;

        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Cancel
    // ------------------------------------------------------------------

    pub async fn cancel_appointment(
        &self,
        clinic_id: i64,
        appointment_id: i64,
        actor: ActorKind,
        note: Option<String>,
    ) -> Result<CancelOutcome> {
        let clinic = self.load_clinic(clinic_id).await?;
        let settings = clinic.validated_settings()?;
        let current = self.load_appointment(clinic_id, appointment_id).await?;

        if current.status.is_cancelled() {
            return Ok(CancelOutcome::AlreadyCancelled);
        }

        if actor == ActorKind::Patient {
            booking_policy::check_cancellation(
                &settings.booking_restriction_settings,
                clinic_now(),
                current.date,
                current.start_time,
            )
            .map_err(AppError::Policy)?;
        }

        let new_status = match actor {
            ActorKind::Patient => AppointmentStatus::CanceledByPatient,
            _ => AppointmentStatus::CanceledByClinic,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE appointments
            SET status = $1, canceled_at = $2,
                clinic_notes = COALESCE($3, clinic_notes),
                updated_at = NOW()
            WHERE id = $4 AND status = 'confirmed'
            "#,
        )
        .bind(new_status)
        .bind(Utc::now())
        .bind(note.as_deref())
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM appointment_resource_allocations WHERE appointment_id = $1")
            .bind(appointment_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("Cancelled appointment {} ({:?})", appointment_id, actor);

        let service = self
            .load_appointment_type(clinic_id, current.appointment_type_id)
            .await?;
        let intents = decide_cancel(
            actor,
            !current.is_auto_assigned,
            current.practitioner_id,
            current.patient_id,
        );
        self.send_notifications(&clinic, &settings, &service, &current, intents)
            .await;

        Ok(CancelOutcome::Cancelled)
    }

    // ------------------------------------------------------------------
    // Time-slot confirmation
    // ------------------------------------------------------------------

    /// Clinic staff confirm one of the candidate slots of a pending
    /// multi-slot booking. The chosen slot is re-validated like an edit;
    /// the other candidates are discarded.
    pub async fn confirm_time_slot(
        &self,
        clinic_id: i64,
        appointment_id: i64,
        request: ConfirmTimeSlotRequest,
        staff_user_id: i64,
    ) -> Result<AppointmentWithEvent> {
        let current = sqlx::query_as::<_, Appointment>(
            r#"
            SELECT a.* FROM appointments a
            JOIN calendar_events ce ON ce.id = a.calendar_event_id
            WHERE a.id = $1 AND ce.clinic_id = $2
            "#,
        )
        .bind(appointment_id)
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("預約不存在".to_string()))?;
        if current.status.is_cancelled() {
            return Err(AppError::AlreadyCancelled);
        }
        if !current.pending_time_confirmation {
            return Err(AppError::Validation("此預約不需要確認時段".to_string()));
        }
        let start_time = parse_hhmm(&request.start_time)
            .ok_or_else(|| AppError::Validation("時間格式錯誤".to_string()))?;

        let is_candidate = current
            .alternative_slots()
            .iter()
            .any(|slot| slot.date == request.date && slot.start_time == start_time);
        if !is_candidate {
            return Err(AppError::Validation("所選時段不在候選清單內".to_string()));
        }

        let update = UpdateAppointmentRequest {
            practitioner_id: None,
            date: Some(request.date),
            start_time: Some(request.start_time),
            notes: None,
            clinic_notes: None,
        };
        self.update_appointment(
            clinic_id,
            appointment_id,
            update,
            ActorKind::ClinicStaff,
            Some(staff_user_id),
            false,
            false,
        )
        .await?;

        // Only a successfully re-validated slot clears the pending state.
        sqlx::query(
            r#"
            UPDATE appointments
            SET pending_time_confirmation = FALSE, alternative_time_slots = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(appointment_id)
        .execute(&self.pool)
        .await?;

        self.load_appointment(clinic_id, appointment_id).await
    }

    // ------------------------------------------------------------------
    // Reveal
    // ------------------------------------------------------------------

    /// Promote one hidden auto-assigned appointment to visible. The
    /// gated UPDATE makes the transition idempotent under concurrent
    /// runs; the notification fires only when this call actually flipped
    /// the row. `reassigned_by_user_id` stays null: this is the system,
    /// not a human admin.
    pub async fn reveal_appointment(
        &self,
        clinic: &Clinic,
        settings: &ClinicSettings,
        appointment_id: i64,
    ) -> Result<bool> {
        let transitioned = sqlx::query(
            r#"
            UPDATE appointments
            SET is_auto_assigned = FALSE, updated_at = NOW()
            WHERE id = $1 AND is_auto_assigned = TRUE AND status = 'confirmed'
            "#,
        )
        .bind(appointment_id)
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if !transitioned {
            return Ok(false);
        }

        let revealed = self.load_appointment(clinic.id, appointment_id).await?;
        let service = self
            .load_appointment_type(clinic.id, revealed.appointment_type_id)
            .await?;
        let intents = decide_reveal(revealed.practitioner_id);
        self.send_notifications(clinic, settings, &service, &revealed, intents)
            .await;
        info!("Revealed auto-assigned appointment {}", appointment_id);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Edit preview
    // ------------------------------------------------------------------

    /// Dry-run of an edit: reports the conflict (if any) and which
    /// parties would be notified, committing nothing.
    pub async fn preview_edit(
        &self,
        clinic_id: i64,
        appointment_id: i64,
        request: &UpdateAppointmentRequest,
    ) -> Result<(Option<ConflictDetail>, Vec<NotificationIntent>)> {
        let current = self.load_appointment(clinic_id, appointment_id).await?;
        if current.status.is_cancelled() {
            return Err(AppError::AlreadyCancelled);
        }
        let service = self
            .load_appointment_type(clinic_id, current.appointment_type_id)
            .await?;

        let choice = PractitionerChoice::from_optional_id(request.practitioner_id);
        let target_practitioner = match choice {
            PractitionerChoice::Specific(id) => id,
            _ => current.practitioner_id,
        };
        let new_date = request.date.unwrap_or(current.date);
        let new_start = match &request.start_time {
            Some(raw) => parse_hhmm(raw)
                .ok_or_else(|| AppError::Validation("時間格式錯誤".to_string()))?,
            None => current.start_time,
        };
        let time_changed = new_date != current.date || new_start != current.start_time;

        let schedules = self
            .availability()
            .day_schedules(&[target_practitioner], clinic_id, &[new_date])
            .await?;
        let schedule = schedules
            .get(&(target_practitioner, new_date))
            .cloned()
            .unwrap_or_default();
        let mut conflict = schedule_conflict(
            &schedule,
            new_start,
            service.duration_minutes as i64,
            Some(current.calendar_event_id),
        );
        if conflict.is_none() {
            let requirements = self.availability().resource_requirements(service.id).await?;
            if !requirements.is_empty() {
                let pool_state = self.availability().resource_pool(clinic_id, new_date).await?;
                conflict = resource_conflict(
                    &pool_state,
                    &requirements,
                    new_start,
                    service.duration_minutes as i64,
                );
            }
        }

        let visible_after = match choice {
            PractitionerChoice::Keep => !current.is_auto_assigned,
            PractitionerChoice::Auto => false,
            PractitionerChoice::Specific(_) => true,
        };
        let change = EditChange {
            actor: ActorKind::ClinicStaff,
            practitioner_before: current.practitioner_id,
            practitioner_after: target_practitioner,
            visible_before: !current.is_auto_assigned,
            visible_after,
            time_changed,
            patient_id: current.patient_id,
        };
        Ok((conflict, decide_edit(&change)))
    }

    // ------------------------------------------------------------------
    // Practitioner resolution
    // ------------------------------------------------------------------

    /// Resolve a practitioner choice into a concrete, conflict-free
    /// assignment for the given slot. `Specific` validates constraints
    /// (a)-(d); `Auto` runs the tie-break across every eligible
    /// practitioner, preferring `stability_preference` when it passes.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_practitioner(
        &self,
        clinic: &Clinic,
        service: &AppointmentType,
        date: NaiveDate,
        start_time: NaiveTime,
        choice: PractitionerChoice,
        exclude_calendar_event_id: Option<i64>,
        stability_preference: Option<i64>,
        actor: ActorKind,
    ) -> Result<ResolvedPractitioner> {
        let duration = service.duration_minutes as i64;
        let end_time = start_time + Duration::minutes(duration);
        let requirements = self.availability().resource_requirements(service.id).await?;
        let resource_pool = self.availability().resource_pool(clinic.id, date).await?;

        match choice {
            PractitionerChoice::Keep => Err(AppError::Internal(
                "practitioner resolution requires an explicit choice".to_string(),
            )),
            PractitionerChoice::Specific(user_id) => {
                let eligible = self.eligible_practitioners(clinic.id, service.id).await?;
                if !eligible.contains(&user_id) {
                    return Err(AppError::Validation(
                        "此治療師未提供該服務項目".to_string(),
                    ));
                }
                let schedules = self
                    .availability()
                    .day_schedules(&[user_id], clinic.id, &[date])
                    .await?;
                let schedule = schedules
                    .get(&(user_id, date))
                    .cloned()
                    .unwrap_or_default();
                if let Some(conflict) = schedule_conflict(
                    &schedule,
                    start_time,
                    duration,
                    exclude_calendar_event_id,
                ) {
                    if conflict_blocks(actor, conflict.kind) {
                        return Err(AppError::Scheduling(conflict.kind));
                    }
                }
                if !resource_pool.can_satisfy(&requirements, start_time, end_time) {
                    return Err(AppError::Scheduling(ConflictKind::ResourceConflict));
                }
                Ok(ResolvedPractitioner {
                    user_id,
                    auto_resolved: false,
                })
            }
            PractitionerChoice::Auto => {
                let eligible = self.eligible_practitioners(clinic.id, service.id).await?;
                if eligible.is_empty() {
                    return Err(AppError::Scheduling(ConflictKind::NoAvailability));
                }
                let schedules = self
                    .availability()
                    .day_schedules(&eligible, clinic.id, &[date])
                    .await?;

                let feasible = |schedule: &DaySchedule| {
                    schedule_conflict(schedule, start_time, duration, exclude_calendar_event_id)
                        .is_none()
                        && resource_pool.can_satisfy(&requirements, start_time, end_time)
                };

                // Stability: keep the current practitioner when they
                // still pass.
                if let Some(preferred) = stability_preference {
                    if let Some(schedule) = schedules.get(&(preferred, date)) {
                        if eligible.contains(&preferred) && feasible(schedule) {
                            return Ok(ResolvedPractitioner {
                                user_id: preferred,
                                auto_resolved: true,
                            });
                        }
                    }
                }

                let candidates: Vec<(i64, usize)> = eligible
                    .iter()
                    .filter_map(|&user_id| {
                        let schedule = schedules.get(&(user_id, date))?;
                        if feasible(schedule) {
                            let busy = schedule
                                .appointments
                                .iter()
                                .filter(|b| {
                                    Some(b.calendar_event_id) != exclude_calendar_event_id
                                })
                                .count();
                            Some((user_id, busy))
                        } else {
                            None
                        }
                    })
                    .collect();

                pick_auto_practitioner(&candidates)
                    .map(|user_id| ResolvedPractitioner {
                        user_id,
                        auto_resolved: true,
                    })
                    .ok_or(AppError::Scheduling(ConflictKind::NoAvailability))
            }
        }
    }

    /// Practitioners who offer the service and are active in the clinic
    async fn eligible_practitioners(
        &self,
        clinic_id: i64,
        appointment_type_id: i64,
    ) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT pat.user_id
            FROM practitioner_appointment_types pat
            JOIN user_clinic_associations uca
              ON uca.user_id = pat.user_id AND uca.clinic_id = pat.clinic_id
            WHERE pat.appointment_type_id = $1
              AND pat.clinic_id = $2
              AND pat.is_deleted = FALSE
              AND uca.is_active = TRUE
              AND 'practitioner' = ANY(uca.roles)
            ORDER BY pat.user_id
            "#,
        )
        .bind(appointment_type_id)
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Loaders & helpers
    // ------------------------------------------------------------------

    async fn load_clinic(&self, clinic_id: i64) -> Result<Clinic> {
        sqlx::query_as::<_, Clinic>("SELECT * FROM clinics WHERE id = $1")
            .bind(clinic_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("診所不存在".to_string()))
    }

    async fn load_appointment_type(
        &self,
        clinic_id: i64,
        appointment_type_id: i64,
    ) -> Result<AppointmentType> {
        sqlx::query_as::<_, AppointmentType>(
            r#"
            SELECT * FROM appointment_types
            WHERE id = $1 AND clinic_id = $2 AND is_deleted = FALSE
            "#,
        )
        .bind(appointment_type_id)
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("預約類型不存在".to_string()))
    }

    pub async fn load_appointment(
        &self,
        clinic_id: i64,
        appointment_id: i64,
    ) -> Result<AppointmentWithEvent> {
        sqlx::query_as::<_, AppointmentWithEvent>(
            r#"
            SELECT a.id, a.calendar_event_id, a.patient_id, a.appointment_type_id,
                   a.status, a.notes, a.clinic_notes, a.is_auto_assigned,
                   a.originally_auto_assigned, a.reassigned_by_user_id, a.canceled_at,
                   a.pending_time_confirmation, a.alternative_time_slots,
                   ce.user_id AS practitioner_id, ce.clinic_id, ce.date,
                   ce.start_time, ce.end_time
            FROM appointments a
            JOIN calendar_events ce ON ce.id = a.calendar_event_id
            WHERE a.id = $1 AND ce.clinic_id = $2
            "#,
        )
        .bind(appointment_id)
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("預約不存在".to_string()))
    }

    async fn weekly_windows_for(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        clinic_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<(NaiveTime, NaiveTime)>> {
        let rows = sqlx::query_as::<_, (NaiveTime, NaiveTime)>(
            r#"
            SELECT start_time, end_time
            FROM practitioner_availability
            WHERE user_id = $1 AND clinic_id = $2 AND day_of_week = $3
            ORDER BY start_time
            "#,
        )
        .bind(user_id)
        .bind(clinic_id)
        .bind(crate::utils::time::day_of_week(date))
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }

    /// Future non-cancelled appointments of a patient in this clinic,
    /// optionally excluding one appointment id (edit flows)
    async fn count_future_appointments(
        &self,
        clinic_id: i64,
        patient_id: i64,
        exclude_appointment_id: Option<i64>,
    ) -> Result<i64> {
        let now = clinic_now();
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM appointments a
            JOIN calendar_events ce ON ce.id = a.calendar_event_id
            WHERE a.patient_id = $1
              AND ce.clinic_id = $2
              AND a.status = 'confirmed'
              AND (ce.date > $3 OR (ce.date = $3 AND ce.start_time > $4))
              AND ($5::BIGINT IS NULL OR a.id <> $5)
            "#,
        )
        .bind(patient_id)
        .bind(clinic_id)
        .bind(now.date())
        .bind(now.time())
        .bind(exclude_appointment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Whether the patient ever had a confirmed appointment here
    async fn has_confirmed_history(&self, clinic_id: i64, patient_id: i64) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM appointments a
                JOIN calendar_events ce ON ce.id = a.calendar_event_id
                WHERE a.patient_id = $1 AND ce.clinic_id = $2 AND a.status = 'confirmed'
            )
            "#,
        )
        .bind(patient_id)
        .bind(clinic_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Render intents and hand them to the outbound worker. Failures end
    /// here: a lost notification never fails the appointment change.
    async fn send_notifications(
        &self,
        clinic: &Clinic,
        settings: &ClinicSettings,
        service: &AppointmentType,
        appointment: &AppointmentWithEvent,
        intents: Vec<NotificationIntent>,
    ) {
        if intents.is_empty() {
            return;
        }
        match self
            .render_notifications(clinic, settings, service, appointment, &intents)
            .await
        {
            Ok(messages) => self.outbound.enqueue(messages),
            Err(e) => warn!(
                "Could not render notifications for appointment {}: {}",
                appointment.id, e
            ),
        }
    }

    async fn render_notifications(
        &self,
        clinic: &Clinic,
        settings: &ClinicSettings,
        service: &AppointmentType,
        appointment: &AppointmentWithEvent,
        intents: &[NotificationIntent],
    ) -> Result<Vec<crate::services::outbound::OutboundMessage>> {
        let patient = sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE id = $1")
            .bind(appointment.patient_id)
            .fetch_one(&self.pool)
            .await?;
        let patient_line = match patient.line_user_id {
            Some(line_user_id) => {
                sqlx::query_as::<_, LineUser>("SELECT * FROM line_users WHERE id = $1")
                    .bind(line_user_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => None,
        };

        // Contacts and display names for every practitioner an intent
        // targets (old and new on reassignments).
        let practitioner_ids: Vec<i64> = intents
            .iter()
            .filter_map(|intent| match intent.recipient {
                crate::services::notification_service::Recipient::Practitioner(id) => Some(id),
                _ => None,
            })
            .chain(std::iter::once(appointment.practitioner_id))
            .collect();
        let practitioner_rows = sqlx::query_as::<_, (i64, String, Option<String>)>(
            r#"
            SELECT u.id, uca.full_name, u.line_user_id
            FROM users u
            JOIN user_clinic_associations uca
              ON uca.user_id = u.id AND uca.clinic_id = $1
            WHERE u.id = ANY($2)
            "#,
        )
        .bind(clinic.id)
        .bind(&practitioner_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut practitioner_line_ids = HashMap::new();
        let mut assigned_name = String::new();
        for (user_id, full_name, line_id) in practitioner_rows {
            if user_id == appointment.practitioner_id {
                assigned_name = full_name.clone();
            }
            if let Some(line_id) = line_id {
                practitioner_line_ids.insert(user_id, line_id);
            }
        }

        let mut patient_line_ids = HashMap::new();
        if let Some(line_user) = patient_line {
            patient_line_ids.insert(appointment.patient_id, line_user.line_user_id);
        }

        let values = TemplateValues {
            patient_name: patient.name,
            practitioner_name: assigned_name,
            appointment_type_name: service.name.clone(),
            appointment_datetime: format_appointment_datetime(
                appointment.date,
                appointment.start_time,
            ),
            clinic_name: clinic.effective_display_name(settings),
            clinic_phone: settings.clinic_info_settings.phone_number.clone(),
            clinic_address: settings.clinic_info_settings.address.clone(),
            notes: appointment.notes.clone(),
        };

        let renderer = NotificationRenderer {
            service,
            values,
            channel_access_token: clinic.line_channel_access_token.clone(),
            practitioner_line_ids,
            patient_line_ids,
        };
        Ok(renderer.render(intents))
    }
}
