/*!
 * Booking Policy Evaluator
 *
 * Gates patient-initiated mutations against the clinic's booking
 * restriction settings. Staff actions never pass through here. Every
 * failure maps to a distinct `PolicyRule` so the UI can show the exact
 * reason.
 *
 * The same settings also define the auto-assignment reveal boundary:
 * once a patient could no longer book (or move) an appointment at its
 * start time, hiding the practitioner serves no purpose and the
 * appointment must become visible.
 */

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::models::appointment_type::AppointmentType;
use crate::models::settings::{BookingRestrictionSettings, BookingRestrictionType};
use crate::models::PractitionerChoice;
use crate::utils::time::parse_hhmm;
use crate::utils::PolicyRule;

/// Booking deadline for an appointment on `date` under the
/// `deadline_time_day_before` mode. `None` when the configured time
/// string is unparsable (treated as no deadline).
pub fn deadline_for(
    settings: &BookingRestrictionSettings,
    appointment_date: NaiveDate,
) -> Option<NaiveDateTime> {
    let time = settings
        .deadline_time_day_before
        .as_deref()
        .and_then(parse_hhmm)?;
    let deadline_date = if settings.deadline_on_same_day {
        appointment_date
    } else {
        appointment_date - Duration::days(1)
    };
    Some(deadline_date.and_time(time))
}

/// Lead-time rule (§booking restriction, both modes)
pub fn check_lead_time(
    settings: &BookingRestrictionSettings,
    now: NaiveDateTime,
    date: NaiveDate,
    start_time: NaiveTime,
) -> Result<(), PolicyRule> {
    let start = date.and_time(start_time);
    match settings.booking_restriction_type {
        BookingRestrictionType::MinimumHoursRequired => {
            if start - now < Duration::hours(settings.minimum_booking_hours_ahead) {
                return Err(PolicyRule::LeadTime);
            }
        }
        BookingRestrictionType::DeadlineTimeDayBefore => {
            if let Some(deadline) = deadline_for(settings, date) {
                if now > deadline {
                    return Err(PolicyRule::LeadTime);
                }
            }
        }
    }
    Ok(())
}

/// Cancellation window and the patient-deletion toggle
pub fn check_cancellation(
    settings: &BookingRestrictionSettings,
    now: NaiveDateTime,
    date: NaiveDate,
    start_time: NaiveTime,
) -> Result<(), PolicyRule> {
    if !settings.allow_patient_deletion {
        return Err(PolicyRule::CancelWindow);
    }
    let start = date.and_time(start_time);
    if start - now < Duration::hours(settings.minimum_cancellation_hours_before) {
        return Err(PolicyRule::CancelWindow);
    }
    Ok(())
}

/// Booking window in days from today
pub fn check_booking_window(
    settings: &BookingRestrictionSettings,
    today: NaiveDate,
    date: NaiveDate,
) -> Result<(), PolicyRule> {
    if (date - today).num_days() > settings.max_booking_window_days {
        return Err(PolicyRule::BookingWindow);
    }
    Ok(())
}

/// Cap on active future appointments. `future_count` excludes the
/// appointment being edited, so edits never count themselves twice.
pub fn check_active_cap(
    settings: &BookingRestrictionSettings,
    future_count: i64,
) -> Result<(), PolicyRule> {
    if future_count >= settings.max_future_appointments {
        return Err(PolicyRule::ActiveCap);
    }
    Ok(())
}

/// Start time must sit on the step grid
pub fn check_step_granularity(
    settings: &BookingRestrictionSettings,
    start_time: NaiveTime,
) -> Result<(), PolicyRule> {
    let minutes = start_time.hour() * 60 + start_time.minute();
    if start_time.second() != 0 || minutes % settings.step_size_minutes != 0 {
        return Err(PolicyRule::StepGranularity);
    }
    Ok(())
}

/// A service is visible to a patient according to whether they already
/// have a confirmed appointment history in the clinic
pub fn check_service_visibility(
    service: &AppointmentType,
    has_prior_confirmed: bool,
) -> Result<(), PolicyRule> {
    let allowed = if has_prior_confirmed {
        service.allow_existing_patient_booking
    } else {
        service.allow_new_patient_booking
    };
    if !allowed {
        return Err(PolicyRule::ServiceUnavailable);
    }
    Ok(())
}

/// A patient request must use the auto sentinel when the service hides
/// practitioner selection
pub fn check_practitioner_selection(
    service: &AppointmentType,
    choice: PractitionerChoice,
) -> Result<(), PolicyRule> {
    if !service.allow_patient_practitioner_selection
        && matches!(choice, PractitionerChoice::Specific(_))
    {
        return Err(PolicyRule::PractitionerSelectionNotAllowed);
    }
    Ok(())
}

/// Inputs for the aggregate booking check
pub struct BookingCheck<'a> {
    pub settings: &'a BookingRestrictionSettings,
    pub service: &'a AppointmentType,
    pub now: NaiveDateTime,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    /// The patient's future non-cancelled appointments, minus the one
    /// being edited
    pub future_count: i64,
    pub has_prior_confirmed: bool,
    pub practitioner_choice: PractitionerChoice,
}

/// Run every booking rule in order, returning the first violation
pub fn evaluate_booking(check: &BookingCheck<'_>) -> Result<(), PolicyRule> {
    check_lead_time(check.settings, check.now, check.date, check.start_time)?;
    check_booking_window(check.settings, check.now.date(), check.date)?;
    check_active_cap(check.settings, check.future_count)?;
    check_step_granularity(check.settings, check.start_time)?;
    check_service_visibility(check.service, check.has_prior_confirmed)?;
    check_practitioner_selection(check.service, check.practitioner_choice)?;
    Ok(())
}

/// Whether a hidden auto-assigned appointment has crossed the reveal
/// boundary. Mirrors the lead-time rule in reverse: when a patient could
/// no longer act on the slot, the practitioner must see it.
pub fn reveal_due(
    settings: &BookingRestrictionSettings,
    now: NaiveDateTime,
    date: NaiveDate,
    start_time: NaiveTime,
) -> bool {
    let start = date.and_time(start_time);
    match settings.booking_restriction_type {
        BookingRestrictionType::MinimumHoursRequired => {
            start - now <= Duration::hours(settings.minimum_booking_hours_ahead)
        }
        BookingRestrictionType::DeadlineTimeDayBefore => match deadline_for(settings, date) {
            Some(deadline) => now >= deadline,
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn settings() -> BookingRestrictionSettings {
        BookingRestrictionSettings::default()
    }

    fn service() -> AppointmentType {
        AppointmentType {
            id: 1,
            clinic_id: 1,
            name: "徒手治療".to_string(),
            duration_minutes: 30,
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
            patient_confirmation_message: "msg".to_string(),
            clinic_confirmation_message: "msg".to_string(),
            reminder_message: "msg".to_string(),
            recurrent_clinic_confirmation_message: "msg".to_string(),
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_lead_time_minimum_hours() {
        let s = settings();
        let now = d(2025, 11, 2).and_time(t(9, 0));
        // 24 hours ahead exactly is fine
        assert!(check_lead_time(&s, now, d(2025, 11, 3), t(9, 0)).is_ok());
        // 23 hours ahead violates the 24h default
        assert_eq!(
            check_lead_time(&s, now, d(2025, 11, 3), t(8, 0)),
            Err(PolicyRule::LeadTime)
        );
    }

    #[test]
    fn test_lead_time_deadline_day_before() {
        let mut s = settings();
        s.booking_restriction_type = BookingRestrictionType::DeadlineTimeDayBefore;
        s.deadline_time_day_before = Some("08:00".to_string());
        s.deadline_on_same_day = false;

        // Before the day-before deadline: allowed
        let now = d(2025, 11, 2).and_time(t(7, 59));
        assert!(check_lead_time(&s, now, d(2025, 11, 3), t(14, 0)).is_ok());

        // After the deadline: rejected
        let now = d(2025, 11, 2).and_time(t(8, 1));
        assert_eq!(
            check_lead_time(&s, now, d(2025, 11, 3), t(14, 0)),
            Err(PolicyRule::LeadTime)
        );
    }

    #[test]
    fn test_lead_time_deadline_same_day() {
        let mut s = settings();
        s.booking_restriction_type = BookingRestrictionType::DeadlineTimeDayBefore;
        s.deadline_time_day_before = Some("08:00".to_string());
        s.deadline_on_same_day = true;

        let now = d(2025, 11, 3).and_time(t(7, 0));
        assert!(check_lead_time(&s, now, d(2025, 11, 3), t(14, 0)).is_ok());

        let now = d(2025, 11, 3).and_time(t(9, 0));
        assert_eq!(
            check_lead_time(&s, now, d(2025, 11, 3), t(14, 0)),
            Err(PolicyRule::LeadTime)
        );
    }

    #[test]
    fn test_cancellation_window() {
        let s = settings();
        // Now 08:00, appointment at 14:00 the same day: only 6 hours left
        let now = d(2025, 11, 3).and_time(t(8, 0));
        assert_eq!(
            check_cancellation(&s, now, d(2025, 11, 3), t(14, 0)),
            Err(PolicyRule::CancelWindow)
        );
        // A day earlier it is fine
        let now = d(2025, 11, 2).and_time(t(8, 0));
        assert!(check_cancellation(&s, now, d(2025, 11, 3), t(14, 0)).is_ok());
    }

    #[test]
    fn test_patient_deletion_toggle() {
        let mut s = settings();
        s.allow_patient_deletion = false;
        let now = d(2025, 11, 1).and_time(t(8, 0));
        assert_eq!(
            check_cancellation(&s, now, d(2025, 11, 10), t(14, 0)),
            Err(PolicyRule::CancelWindow)
        );
    }

    #[test]
    fn test_booking_window() {
        let s = settings();
        let today = d(2025, 11, 1);
        assert!(check_booking_window(&s, today, d(2026, 1, 30)).is_ok());
        assert_eq!(
            check_booking_window(&s, today, d(2026, 2, 1)),
            Err(PolicyRule::BookingWindow)
        );
    }

    #[test]
    fn test_active_cap() {
        let s = settings();
        assert!(check_active_cap(&s, 2).is_ok());
        assert_eq!(check_active_cap(&s, 3), Err(PolicyRule::ActiveCap));
    }

    #[test]
    fn test_step_granularity() {
        let s = settings();
        assert!(check_step_granularity(&s, t(9, 0)).is_ok());
        assert!(check_step_granularity(&s, t(9, 30)).is_ok());
        assert_eq!(
            check_step_granularity(&s, t(9, 15)),
            Err(PolicyRule::StepGranularity)
        );
    }

    #[test]
    fn test_service_visibility() {
        let mut svc = service();
        svc.allow_new_patient_booking = false;
        assert_eq!(
            check_service_visibility(&svc, false),
            Err(PolicyRule::ServiceUnavailable)
        );
        assert!(check_service_visibility(&svc, true).is_ok());
    }

    #[test]
    fn test_practitioner_selection_rule() {
        let mut svc = service();
        svc.allow_patient_practitioner_selection = false;
        assert_eq!(
            check_practitioner_selection(&svc, PractitionerChoice::Specific(5)),
            Err(PolicyRule::PractitionerSelectionNotAllowed)
        );
        assert!(check_practitioner_selection(&svc, PractitionerChoice::Auto).is_ok());
    }

    #[test]
    fn test_reveal_due_minimum_hours() {
        let s = settings();
        // Appointment 2025-11-03 09:00, lead time 24h: due from 11-02 09:00
        let now = d(2025, 11, 2).and_time(t(9, 0));
        assert!(reveal_due(&s, now, d(2025, 11, 3), t(9, 0)));
        let now = d(2025, 11, 2).and_time(t(8, 59));
        assert!(!reveal_due(&s, now, d(2025, 11, 3), t(9, 0)));
    }

    #[test]
    fn test_reveal_due_deadline_mode() {
        let mut s = settings();
        s.booking_restriction_type = BookingRestrictionType::DeadlineTimeDayBefore;
        s.deadline_time_day_before = Some("20:00".to_string());

        let now = d(2025, 11, 2).and_time(t(20, 0));
        assert!(reveal_due(&s, now, d(2025, 11, 3), t(9, 0)));
        let now = d(2025, 11, 2).and_time(t(19, 59));
        assert!(!reveal_due(&s, now, d(2025, 11, 3), t(9, 0)));
    }

    #[test]
    fn test_evaluate_booking_order() {
        let s = settings();
        let svc = service();
        let check = BookingCheck {
            settings: &s,
            service: &svc,
            now: d(2025, 11, 1).and_time(t(9, 0)),
            date: d(2025, 11, 10),
            start_time: t(10, 0),
            future_count: 0,
            has_prior_confirmed: false,
            practitioner_choice: PractitionerChoice::Auto,
        };
        assert!(evaluate_booking(&check).is_ok());
    }
}
