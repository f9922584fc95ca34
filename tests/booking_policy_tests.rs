/*!
 * Booking Policy Tests
 *
 * The patient-only restriction gates: lead time in both modes, the
 * cancellation window, the booking window, the active-appointment cap,
 * step granularity, service visibility, and the reveal boundary derived
 * from the same settings.
 */

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use clinic_bot_backend::models::settings::{
    BookingRestrictionSettings, BookingRestrictionType,
};
use clinic_bot_backend::services::booking_policy::{
    check_active_cap, check_booking_window, check_cancellation, check_lead_time,
    check_step_granularity, deadline_for, reveal_due,
};
use clinic_bot_backend::utils::PolicyRule;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn at(date: NaiveDate, time: NaiveTime) -> NaiveDateTime {
    date.and_time(time)
}

fn defaults() -> BookingRestrictionSettings {
    BookingRestrictionSettings::default()
}

#[test]
fn minimum_hours_mode_boundary_is_inclusive() {
    let settings = defaults();
    let now = at(d(2025, 11, 2), t(9, 0));

    // Exactly 24 hours ahead books; one minute less does not.
    assert!(check_lead_time(&settings, now, d(2025, 11, 3), t(9, 0)).is_ok());
    assert_eq!(
        check_lead_time(&settings, now, d(2025, 11, 3), t(8, 59)),
        Err(PolicyRule::LeadTime)
    );
}

#[test]
fn deadline_mode_day_before() {
    let mut settings = defaults();
    settings.booking_restriction_type = BookingRestrictionType::DeadlineTimeDayBefore;
    settings.deadline_time_day_before = Some("08:00".to_string());
    settings.deadline_on_same_day = false;

    assert_eq!(
        deadline_for(&settings, d(2025, 11, 3)),
        Some(at(d(2025, 11, 2), t(8, 0)))
    );

    let before = at(d(2025, 11, 2), t(7, 30));
    let after = at(d(2025, 11, 2), t(8, 30));
    assert!(check_lead_time(&settings, before, d(2025, 11, 3), t(16, 0)).is_ok());
    assert_eq!(
        check_lead_time(&settings, after, d(2025, 11, 3), t(16, 0)),
        Err(PolicyRule::LeadTime)
    );
}

#[test]
fn deadline_mode_same_day() {
    let mut settings = defaults();
    settings.booking_restriction_type = BookingRestrictionType::DeadlineTimeDayBefore;
    settings.deadline_time_day_before = Some("10:00".to_string());
    settings.deadline_on_same_day = true;

    assert_eq!(
        deadline_for(&settings, d(2025, 11, 3)),
        Some(at(d(2025, 11, 3), t(10, 0)))
    );
    assert!(check_lead_time(
        &settings,
        at(d(2025, 11, 3), t(9, 0)),
        d(2025, 11, 3),
        t(16, 0)
    )
    .is_ok());
}

#[test]
fn cancellation_window_scenario() {
    // Settings: 24h cancellation window. At 08:00 a 14:00 same-day
    // appointment can no longer be cancelled by the patient.
    let settings = defaults();
    let now = at(d(2025, 11, 3), t(8, 0));
    assert_eq!(
        check_cancellation(&settings, now, d(2025, 11, 3), t(14, 0)),
        Err(PolicyRule::CancelWindow)
    );

    // Two days ahead is comfortably outside the window.
    assert!(check_cancellation(&settings, now, d(2025, 11, 5), t(14, 0)).is_ok());
}

#[test]
fn disabled_patient_deletion_blocks_all_cancellations() {
    let mut settings = defaults();
    settings.allow_patient_deletion = false;
    let now = at(d(2025, 11, 1), t(8, 0));
    assert_eq!(
        check_cancellation(&settings, now, d(2025, 12, 1), t(14, 0)),
        Err(PolicyRule::CancelWindow)
    );
}

#[test]
fn booking_window_boundary() {
    let settings = defaults(); // 90 days
    let today = d(2025, 11, 1);
    assert!(check_booking_window(&settings, today, today).is_ok());
    assert!(check_booking_window(&settings, today, d(2026, 1, 30)).is_ok());
    assert_eq!(
        check_booking_window(&settings, today, d(2026, 1, 31)),
        Err(PolicyRule::BookingWindow)
    );
}

#[test]
fn active_cap_excludes_the_edited_appointment() {
    let settings = defaults(); // cap 3
    // Creating a fourth appointment fails...
    assert_eq!(check_active_cap(&settings, 3), Err(PolicyRule::ActiveCap));
    // ...but editing one of three (count excludes itself -> 2) passes.
    assert!(check_active_cap(&settings, 2).is_ok());
}

#[test]
fn step_granularity_follows_the_configured_grid() {
    let mut settings = defaults();
    assert!(check_step_granularity(&settings, t(9, 30)).is_ok());
    assert_eq!(
        check_step_granularity(&settings, t(9, 10)),
        Err(PolicyRule::StepGranularity)
    );

    settings.step_size_minutes = 10;
    assert!(check_step_granularity(&settings, t(9, 10)).is_ok());
    assert_eq!(
        check_step_granularity(&settings, t(9, 15)),
        Err(PolicyRule::StepGranularity)
    );
}

#[test]
fn reveal_boundary_matches_lead_time_in_reverse() {
    // Settings: minimum_booking_hours_ahead = 24. An appointment at
    // 2025-11-03 09:00 must reveal from 2025-11-02 09:00 onwards.
    let settings = defaults();
    assert!(!reveal_due(
        &settings,
        at(d(2025, 11, 2), t(8, 59)),
        d(2025, 11, 3),
        t(9, 0)
    ));
    assert!(reveal_due(
        &settings,
        at(d(2025, 11, 2), t(9, 0)),
        d(2025, 11, 3),
        t(9, 0)
    ));
    // Past the start time it is certainly due.
    assert!(reveal_due(
        &settings,
        at(d(2025, 11, 3), t(10, 0)),
        d(2025, 11, 3),
        t(9, 0)
    ));
}

#[test]
fn reveal_boundary_in_deadline_mode() {
    let mut settings = defaults();
    settings.booking_restriction_type = BookingRestrictionType::DeadlineTimeDayBefore;
    settings.deadline_time_day_before = Some("20:00".to_string());
    settings.deadline_on_same_day = false;

    assert!(!reveal_due(
        &settings,
        at(d(2025, 11, 2), t(19, 59)),
        d(2025, 11, 3),
        t(9, 0)
    ));
    assert!(reveal_due(
        &settings,
        at(d(2025, 11, 2), t(20, 0)),
        d(2025, 11, 3),
        t(9, 0)
    ));
}

#[test]
fn short_lead_time_booking_is_already_past_the_boundary() {
    // A clinic with a 1-hour lead time: a staff booking made 30 minutes
    // before the start is already due for reveal at creation. Create's
    // post-commit path handles this without waiting for the cron tick.
    let mut settings = defaults();
    settings.minimum_booking_hours_ahead = 1;
    let now = at(d(2025, 11, 3), t(8, 30));
    assert!(reveal_due(&settings, now, d(2025, 11, 3), t(9, 0)));
}
