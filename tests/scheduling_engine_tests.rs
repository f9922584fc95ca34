/*!
 * Scheduling Engine Tests
 *
 * Drive the availability & conflict engine over realistic schedules:
 * - free-slot computation with exceptions, buffers, and the step grid
 * - conflict classification priority
 * - resource feasibility
 * - the auto-assignment tie-break
 */

use chrono::NaiveTime;

use clinic_bot_backend::services::availability_service::{
    filter_slots_by_resources, free_slots, pick_auto_practitioner, schedule_conflict, BusySpan,
    DaySchedule, ExceptionSpan, ResourcePool,
};
use clinic_bot_backend::utils::ConflictKind;

fn t(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

fn morning_schedule() -> DaySchedule {
    DaySchedule {
        windows: vec![(t(9, 0), t(12, 0))],
        exceptions: Vec::new(),
        appointments: Vec::new(),
    }
}

#[test]
fn slots_cover_the_whole_window_on_the_grid() {
    let slots = free_slots(&morning_schedule(), 30, 0, 30, None);
    let starts: Vec<NaiveTime> = slots.iter().map(|s| s.0).collect();
    assert_eq!(
        starts,
        vec![t(9, 0), t(9, 30), t(10, 0), t(10, 30), t(11, 0), t(11, 30)]
    );
}

#[test]
fn finer_step_size_yields_more_slots() {
    let half_hour = free_slots(&morning_schedule(), 30, 0, 30, None);
    let quarter_hour = free_slots(&morning_schedule(), 30, 0, 15, None);
    assert!(quarter_hour.len() > half_hour.len());
    assert!(quarter_hour.iter().any(|s| s.0 == t(9, 15)));
}

#[test]
fn buffer_shrinks_the_tail_of_the_window() {
    let slots = free_slots(&morning_schedule(), 60, 30, 30, None);
    // 60 + 30 minutes must fit before 12:00, so the last start is 10:30.
    assert_eq!(slots.last().unwrap().0, t(10, 30));
}

#[test]
fn booked_interval_is_carved_out() {
    let mut schedule = morning_schedule();
    schedule.appointments.push(BusySpan {
        calendar_event_id: 1,
        start: t(10, 0),
        end: t(11, 0),
    });
    let starts: Vec<NaiveTime> = free_slots(&schedule, 30, 0, 30, None)
        .iter()
        .map(|s| s.0)
        .collect();
    assert_eq!(starts, vec![t(9, 0), t(9, 30), t(11, 0), t(11, 30)]);
}

#[test]
fn edit_target_is_excluded_from_its_own_conflicts() {
    let mut schedule = morning_schedule();
    schedule.appointments.push(BusySpan {
        calendar_event_id: 7,
        start: t(9, 0),
        end: t(12, 0),
    });
    assert!(free_slots(&schedule, 30, 0, 30, None).is_empty());
    assert_eq!(free_slots(&schedule, 30, 0, 30, Some(7)).len(), 6);
    assert!(schedule_conflict(&schedule, t(9, 0), 30, Some(7)).is_none());
}

#[test]
fn all_day_exception_blocks_the_full_day() {
    let mut schedule = morning_schedule();
    schedule.exceptions.push(ExceptionSpan {
        calendar_event_id: 2,
        span: None,
        name: Some("休診".to_string()),
    });
    assert!(free_slots(&schedule, 30, 0, 30, None).is_empty());
    let conflict = schedule_conflict(&schedule, t(10, 0), 30, None).unwrap();
    assert_eq!(conflict.kind, ConflictKind::ExceptionConflict);
}

#[test]
fn partial_exception_blocks_only_its_span() {
    let mut schedule = morning_schedule();
    schedule.exceptions.push(ExceptionSpan {
        calendar_event_id: 2,
        span: Some((t(9, 0), t(10, 30))),
        name: None,
    });
    let starts: Vec<NaiveTime> = free_slots(&schedule, 30, 0, 30, None)
        .iter()
        .map(|s| s.0)
        .collect();
    assert_eq!(starts, vec![t(10, 30), t(11, 0), t(11, 30)]);
}

#[test]
fn conflict_priority_appointment_beats_exception_beats_hours() {
    let mut schedule = morning_schedule();
    schedule.appointments.push(BusySpan {
        calendar_event_id: 1,
        start: t(9, 0),
        end: t(10, 0),
    });
    schedule.exceptions.push(ExceptionSpan {
        calendar_event_id: 2,
        span: Some((t(9, 0), t(11, 0))),
        name: None,
    });

    assert_eq!(
        schedule_conflict(&schedule, t(9, 30), 30, None).unwrap().kind,
        ConflictKind::AppointmentConflict
    );
    assert_eq!(
        schedule_conflict(&schedule, t(10, 0), 30, None).unwrap().kind,
        ConflictKind::ExceptionConflict
    );
    assert_eq!(
        schedule_conflict(&schedule, t(14, 0), 30, None).unwrap().kind,
        ConflictKind::OutsideDefaultHours
    );
}

#[test]
fn appointment_straddling_two_windows_is_rejected() {
    let schedule = DaySchedule {
        windows: vec![(t(9, 0), t(12, 0)), (t(14, 0), t(18, 0))],
        exceptions: Vec::new(),
        appointments: Vec::new(),
    };
    // 11:30 + 90 minutes ends at 13:00, crossing the lunch gap.
    let conflict = schedule_conflict(&schedule, t(11, 30), 90, None).unwrap();
    assert_eq!(conflict.kind, ConflictKind::OutsideDefaultHours);
    // The same duration fits inside the afternoon window.
    assert!(schedule_conflict(&schedule, t(14, 0), 90, None).is_none());
}

#[test]
fn resource_requirements_filter_slots() {
    let mut pool = ResourcePool::default();
    pool.instances.insert(1, vec![100]);
    pool.allocations.insert(100, vec![(t(9, 0), t(10, 0))]);

    let slots = free_slots(&morning_schedule(), 30, 0, 30, None);
    let filtered = filter_slots_by_resources(slots, &pool, &[(1, 1)]);
    let starts: Vec<NaiveTime> = filtered.iter().map(|s| s.0).collect();
    assert_eq!(starts, vec![t(10, 0), t(10, 30), t(11, 0), t(11, 30)]);
}

#[test]
fn resource_quantity_needs_enough_free_instances() {
    let mut pool = ResourcePool::default();
    pool.instances.insert(1, vec![100, 101]);
    pool.allocations.insert(100, vec![(t(9, 0), t(12, 0))]);

    // One bed free all morning: quantity 1 passes, quantity 2 fails.
    assert!(pool.can_satisfy(&[(1, 1)], t(9, 0), t(9, 30)));
    assert!(!pool.can_satisfy(&[(1, 2)], t(9, 0), t(9, 30)));
}

#[test]
fn auto_assignment_prefers_less_busy_then_lower_id() {
    // The auto-assign happy path: P1 already has one appointment that
    // morning, P2 has none, so P2 takes the booking.
    let p1_busy = 1;
    let p2_busy = 0;
    assert_eq!(pick_auto_practitioner(&[(1, p1_busy), (2, p2_busy)]), Some(2));

    // Equal load falls back to the lower practitioner id for stability.
    assert_eq!(pick_auto_practitioner(&[(2, 1), (1, 1)]), Some(1));
    assert_eq!(pick_auto_practitioner(&[]), None);
}

#[test]
fn overlapping_candidate_is_infeasible_for_both_practitioners() {
    // Both P1 and P2 work 09:00-12:00; P1 has 09:00-09:30 booked. A
    // 09:00 booking is only feasible on P2.
    let mut p1 = morning_schedule();
    p1.appointments.push(BusySpan {
        calendar_event_id: 1,
        start: t(9, 0),
        end: t(9, 30),
    });
    let p2 = morning_schedule();

    assert!(schedule_conflict(&p1, t(9, 0), 30, None).is_some());
    assert!(schedule_conflict(&p2, t(9, 0), 30, None).is_none());
}
