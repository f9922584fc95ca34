/*!
 * Availability & Conflict Engine
 *
 * Answers three questions:
 * - free slots for (practitioner, date, service), single and batch;
 * - conflict classification for a proposed interval, priority-ordered;
 * - the auto-assignment tie-break.
 *
 * The interval math is pure and operates on prefetched `DaySchedule` /
 * `ResourcePool` values; the loaders below fetch one scan per entity kind
 * across the whole requested range, so batch queries never degrade into
 * per-date round-trips.
 */

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::resource::Resource;
use crate::models::PractitionerAvailability;
use crate::utils::time::day_of_week;
use crate::utils::{ConflictKind, Result};

/// A busy interval owned by a confirmed appointment
#[derive(Debug, Clone)]
pub struct BusySpan {
    pub calendar_event_id: i64,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// An availability exception span; `None` means all-day
#[derive(Debug, Clone)]
pub struct ExceptionSpan {
    pub calendar_event_id: i64,
    pub span: Option<(NaiveTime, NaiveTime)>,
    pub name: Option<String>,
}

impl ExceptionSpan {
    /// Effective blocking interval; all-day blocks the full day
    pub fn effective(&self) -> (NaiveTime, NaiveTime) {
        self.span.unwrap_or((
            NaiveTime::from_hms_opt(0, 0, 0).expect("midnight"),
            NaiveTime::from_hms_opt(23, 59, 59).expect("end of day"),
        ))
    }
}

/// Everything the engine needs to know about one practitioner-day
#[derive(Debug, Clone, Default)]
pub struct DaySchedule {
    /// Weekly template windows for this weekday, sorted ascending
    pub windows: Vec<(NaiveTime, NaiveTime)>,
    pub exceptions: Vec<ExceptionSpan>,
    pub appointments: Vec<BusySpan>,
}

/// Resource instances and their existing allocations for one date
#[derive(Debug, Clone, Default)]
pub struct ResourcePool {
    /// resource_type_id -> instance ids
    pub instances: HashMap<i64, Vec<i64>>,
    /// resource id -> allocated intervals on the date
    pub allocations: HashMap<i64, Vec<(NaiveTime, NaiveTime)>>,
}

impl ResourcePool {
    /// Instances of a type with no allocation overlapping the interval
    pub fn free_instances(&self, resource_type_id: i64, start: NaiveTime, end: NaiveTime) -> Vec<i64> {
        self.instances
            .get(&resource_type_id)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|id| {
                        self.allocations
                            .get(id)
                            .map(|spans| !spans.iter().any(|&(s, e)| overlaps(start, end, s, e)))
                            .unwrap_or(true)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether every requirement can be satisfied for the interval
    pub fn can_satisfy(
        &self,
        requirements: &[(i64, i32)],
        start: NaiveTime,
        end: NaiveTime,
    ) -> bool {
        requirements.iter().all(|&(type_id, quantity)| {
            self.free_instances(type_id, start, end).len() >= quantity as usize
        })
    }

    /// Pick concrete instances for every requirement, lowest id first for
    /// stability. Returns `None` when any requirement cannot be met.
    pub fn pick_instances(
        &self,
        requirements: &[(i64, i32)],
        start: NaiveTime,
        end: NaiveTime,
    ) -> Option<Vec<i64>> {
        let mut picked = Vec::new();
        for &(type_id, quantity) in requirements {
            let mut free = self.free_instances(type_id, start, end);
            if free.len() < quantity as usize {
                return None;
            }
            free.sort_unstable();
            picked.extend(free.into_iter().take(quantity as usize));
        }
        Some(picked)
    }
}

/// Half-open interval overlap
pub fn overlaps(a_start: NaiveTime, a_end: NaiveTime, b_start: NaiveTime, b_end: NaiveTime) -> bool {
    a_start < b_end && b_start < a_end
}

/// Subtract blocking intervals from working windows, yielding the
/// remaining free windows in ascending order
fn subtract_intervals(
    windows: &[(NaiveTime, NaiveTime)],
    blocks: &[(NaiveTime, NaiveTime)],
) -> Vec<(NaiveTime, NaiveTime)> {
    let mut sorted_blocks: Vec<_> = blocks.to_vec();
    sorted_blocks.sort();

    let mut remaining = Vec::new();
    for &(win_start, win_end) in windows {
        let mut cursor = win_start;
        for &(block_start, block_end) in &sorted_blocks {
            if block_end <= cursor || block_start >= win_end {
                continue;
            }
            if block_start > cursor {
                remaining.push((cursor, block_start.min(win_end)));
            }
            cursor = cursor.max(block_end);
            if cursor >= win_end {
                break;
            }
        }
        if cursor < win_end {
            remaining.push((cursor, win_end));
        }
    }
    remaining
}

/// Compute free slot starts for one practitioner-day.
///
/// Candidates lie on the step grid (minutes from midnight divisible by
/// `step_minutes`), must fit `duration + buffer` before the end of the
/// remaining window they fall in, and exclude the given calendar event
/// (edit flows re-validate against everything but themselves).
pub fn free_slots(
    schedule: &DaySchedule,
    duration_minutes: i64,
    buffer_minutes: i64,
    step_minutes: u32,
    exclude_calendar_event_id: Option<i64>,
) -> Vec<(NaiveTime, NaiveTime)> {
    if duration_minutes <= 0 || step_minutes == 0 {
        return Vec::new();
    }

    let mut blocks: Vec<(NaiveTime, NaiveTime)> = schedule
        .exceptions
        .iter()
        .map(ExceptionSpan::effective)
        .collect();
    blocks.extend(
        schedule
            .appointments
            .iter()
            .filter(|busy| Some(busy.calendar_event_id) != exclude_calendar_event_id)
            .map(|busy| (busy.start, busy.end)),
    );

    let open_windows = subtract_intervals(&schedule.windows, &blocks);
    let duration = Duration::minutes(duration_minutes);
    let needed = Duration::minutes(duration_minutes + buffer_minutes);
    let step = Duration::minutes(step_minutes as i64);

    let midnight = NaiveTime::from_hms_opt(0, 0, 0).expect("midnight");
    let mut slots = Vec::new();
    for (win_start, win_end) in open_windows {
        // First grid point at or after the window start
        let offset_minutes = (win_start - midnight).num_minutes();
        let rem = offset_minutes % step_minutes as i64;
        let mut candidate = if rem == 0 {
            win_start
        } else {
            win_start + Duration::minutes(step_minutes as i64 - rem)
        };

        while candidate + needed <= win_end {
            slots.push((candidate, candidate + duration));
            candidate += step;
        }
    }
    slots
}

/// Keep only the slots whose resource requirements can be met
pub fn filter_slots_by_resources(
    slots: Vec<(NaiveTime, NaiveTime)>,
    pool: &ResourcePool,
    requirements: &[(i64, i32)],
) -> Vec<(NaiveTime, NaiveTime)> {
    if requirements.is_empty() {
        return slots;
    }
    slots
        .into_iter()
        .filter(|&(start, end)| pool.can_satisfy(requirements, start, end))
        .collect()
}

/// Detail attached to a detected conflict for UI messaging
#[derive(Debug, Clone, Serialize)]
pub struct ConflictDetail {
    pub kind: ConflictKind,
    pub message: String,
    /// The calendar event that caused the conflict, when one exists
    pub calendar_event_id: Option<i64>,
}

/// Classify the highest-priority conflict for a proposed interval, not
/// counting resources (those need the pool; see `resource_conflict`).
///
/// Priority: appointment > exception > outside default hours.
pub fn schedule_conflict(
    schedule: &DaySchedule,
    start: NaiveTime,
    duration_minutes: i64,
    exclude_calendar_event_id: Option<i64>,
) -> Option<ConflictDetail> {
    let end = start + Duration::minutes(duration_minutes);

    if let Some(busy) = schedule
        .appointments
        .iter()
        .filter(|b| Some(b.calendar_event_id) != exclude_calendar_event_id)
        .find(|b| overlaps(start, end, b.start, b.end))
    {
        return Some(ConflictDetail {
            kind: ConflictKind::AppointmentConflict,
            message: ConflictKind::AppointmentConflict.message().to_string(),
            calendar_event_id: Some(busy.calendar_event_id),
        });
    }

    if let Some(exception) = schedule.exceptions.iter().find(|ex| {
        let (ex_start, ex_end) = ex.effective();
        overlaps(start, end, ex_start, ex_end)
    }) {
        return Some(ConflictDetail {
            kind: ConflictKind::ExceptionConflict,
            message: exception
                .name
                .clone()
                .unwrap_or_else(|| ConflictKind::ExceptionConflict.message().to_string()),
            calendar_event_id: Some(exception.calendar_event_id),
        });
    }

    // The interval must sit fully inside one window; straddling two
    // windows is outside default hours.
    let inside = schedule
        .windows
        .iter()
        .any(|&(win_start, win_end)| start >= win_start && end <= win_end);
    if !inside {
        return Some(ConflictDetail {
            kind: ConflictKind::OutsideDefaultHours,
            message: ConflictKind::OutsideDefaultHours.message().to_string(),
            calendar_event_id: None,
        });
    }

    None
}

/// Resource feasibility as a conflict detail
pub fn resource_conflict(
    pool: &ResourcePool,
    requirements: &[(i64, i32)],
    start: NaiveTime,
    duration_minutes: i64,
) -> Option<ConflictDetail> {
    let end = start + Duration::minutes(duration_minutes);
    if pool.can_satisfy(requirements, start, end) {
        None
    } else {
        Some(ConflictDetail {
            kind: ConflictKind::ResourceConflict,
            message: ConflictKind::ResourceConflict.message().to_string(),
            calendar_event_id: None,
        })
    }
}

/// Whether a conflict class rejects a booking for this actor. Double
/// bookings and resource shortages always reject; exception overlaps and
/// outside-default-hours reject patients but only warn staff, who may
/// deliberately book over them.
pub fn conflict_blocks(actor: crate::models::ActorKind, kind: ConflictKind) -> bool {
    match kind {
        ConflictKind::AppointmentConflict
        | ConflictKind::ResourceConflict
        | ConflictKind::NoAvailability => true,
        ConflictKind::ExceptionConflict | ConflictKind::OutsideDefaultHours => {
            actor == crate::models::ActorKind::Patient
        }
    }
}

/// Auto-assignment tie-break: fewest confirmed appointments that day,
/// then lowest practitioner id for stability
pub fn pick_auto_practitioner(candidates: &[(i64, usize)]) -> Option<i64> {
    candidates
        .iter()
        .min_by_key(|&&(id, count)| (count, id))
        .map(|&(id, _)| id)
}

/// Database-backed loaders for the engine inputs
pub struct AvailabilityService {
    pool: PgPool,
}

/// Row shape for the appointment range scan
#[derive(Debug, sqlx::FromRow)]
struct AppointmentSpanRow {
    user_id: i64,
    date: NaiveDate,
    calendar_event_id: i64,
    start_time: NaiveTime,
    end_time: NaiveTime,
}

/// Row shape for the exception range scan
#[derive(Debug, sqlx::FromRow)]
struct ExceptionSpanRow {
    user_id: i64,
    date: NaiveDate,
    calendar_event_id: i64,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
    event_name: Option<String>,
}

/// Row shape for the allocation range scan
#[derive(Debug, sqlx::FromRow)]
struct AllocationRow {
    resource_id: i64,
    start_time: NaiveTime,
    end_time: NaiveTime,
}

impl AvailabilityService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Weekly template rows for one practitioner
    pub async fn weekly_template(
        &self,
        user_id: i64,
        clinic_id: i64,
    ) -> Result<Vec<PractitionerAvailability>> {
        let rows = sqlx::query_as::<_, PractitionerAvailability>(
            r#"
            SELECT id, user_id, clinic_id, day_of_week, start_time, end_time
            FROM practitioner_availability
            WHERE user_id = $1 AND clinic_id = $2
            ORDER BY day_of_week, start_time
            "#,
        )
        .bind(user_id)
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Build `DaySchedule`s for every (practitioner, date) pair in the
    /// cross product, with one scan per entity kind.
    pub async fn day_schedules(
        &self,
        user_ids: &[i64],
        clinic_id: i64,
        dates: &[NaiveDate],
    ) -> Result<HashMap<(i64, NaiveDate), DaySchedule>> {
        let mut schedules: HashMap<(i64, NaiveDate), DaySchedule> = HashMap::new();
        if user_ids.is_empty() || dates.is_empty() {
            return Ok(schedules);
        }
        let min_date = *dates.iter().min().expect("nonempty");
        let max_date = *dates.iter().max().expect("nonempty");

        // One scan: weekly templates for all practitioners
        let templates = sqlx::query_as::<_, PractitionerAvailability>(
            r#"
            SELECT id, user_id, clinic_id, day_of_week, start_time, end_time
            FROM practitioner_availability
            WHERE clinic_id = $1 AND user_id = ANY($2)
            ORDER BY day_of_week, start_time
            "#,
        )
        .bind(clinic_id)
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut windows_by_user_day: HashMap<(i64, i16), Vec<(NaiveTime, NaiveTime)>> =
            HashMap::new();
        for template in templates {
            windows_by_user_day
                .entry((template.user_id, template.day_of_week))
                .or_default()
                .push((template.start_time, template.end_time));
        }

        for &user_id in user_ids {
            for &date in dates {
                let windows = windows_by_user_day
                    .get(&(user_id, day_of_week(date)))
                    .cloned()
                    .unwrap_or_default();
                schedules.insert((user_id, date), DaySchedule {
                    windows,
                    ..Default::default()
                });
            }
        }

        // One scan: confirmed appointments across the range
        let appointment_rows = sqlx::query_as::<_, AppointmentSpanRow>(
            r#"
            SELECT ce.user_id, ce.date, ce.id AS calendar_event_id,
                   ce.start_time, ce.end_time
            FROM calendar_events ce
            JOIN appointments a ON a.calendar_event_id = ce.id
            WHERE ce.clinic_id = $1
              AND ce.user_id = ANY($2)
              AND ce.date BETWEEN $3 AND $4
              AND ce.event_type = 'appointment'
              AND a.status = 'confirmed'
              AND ce.start_time IS NOT NULL
              AND ce.end_time IS NOT NULL
            "#,
        )
        .bind(clinic_id)
        .bind(user_ids)
        .bind(min_date)
        .bind(max_date)
        .fetch_all(&self.pool)
        .await?;

        for row in appointment_rows {
            if let Some(schedule) = schedules.get_mut(&(row.user_id, row.date)) {
                schedule.appointments.push(BusySpan {
                    calendar_event_id: row.calendar_event_id,
                    start: row.start_time,
                    end: row.end_time,
                });
            }
        }

        // One scan: availability exceptions across the range
        let exception_rows = sqlx::query_as::<_, ExceptionSpanRow>(
            r#"
            SELECT ce.user_id, ce.date, ce.id AS calendar_event_id,
                   ce.start_time, ce.end_time, ce.event_name
            FROM calendar_events ce
            WHERE ce.clinic_id = $1
              AND ce.user_id = ANY($2)
              AND ce.date BETWEEN $3 AND $4
              AND ce.event_type = 'availability_exception'
            "#,
        )
        .bind(clinic_id)
        .bind(user_ids)
        .bind(min_date)
        .bind(max_date)
        .fetch_all(&self.pool)
        .await?;

        for row in exception_rows {
            if let Some(schedule) = schedules.get_mut(&(row.user_id, row.date)) {
                schedule.exceptions.push(ExceptionSpan {
                    calendar_event_id: row.calendar_event_id,
                    span: match (row.start_time, row.end_time) {
                        (Some(start), Some(end)) => Some((start, end)),
                        _ => None,
                    },
                    name: row.event_name,
                });
            }
        }

        Ok(schedules)
    }

    /// Replace a practitioner's full weekly template. `days[0]` is
    /// Monday; each entry lists that day's non-overlapping intervals.
    pub async fn replace_weekly_template(
        &self,
        user_id: i64,
        clinic_id: i64,
        days: &[Vec<(NaiveTime, NaiveTime)>],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM practitioner_availability WHERE user_id = $1 AND clinic_id = $2",
        )
        .bind(user_id)
        .bind(clinic_id)
        .execute(&mut *tx)
        .await?;

        for (day_of_week, intervals) in days.iter().enumerate() {
            for &(start, end) in intervals {
                sqlx::query(
                    r#"
                    INSERT INTO practitioner_availability
                        (user_id, clinic_id, day_of_week, start_time, end_time)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(user_id)
                .bind(clinic_id)
                .bind(day_of_week as i16)
                .bind(start)
                .bind(end)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Resource requirements of a service, as (resource_type_id, quantity)
    pub async fn resource_requirements(&self, appointment_type_id: i64) -> Result<Vec<(i64, i32)>> {
        let rows = sqlx::query_as::<_, (i64, i32)>(
            r#"
            SELECT resource_type_id, quantity
            FROM appointment_resource_requirements
            WHERE appointment_type_id = $1
            "#,
        )
        .bind(appointment_type_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Load the clinic's resource instances and their confirmed
    /// allocations on one date
    pub async fn resource_pool(&self, clinic_id: i64, date: NaiveDate) -> Result<ResourcePool> {
        load_resource_pool(&self.pool, clinic_id, date).await
    }

    /// Same, inside an open transaction with the allocation rows locked
    /// (the second, race-free check of create/edit flows)
    pub async fn resource_pool_for_update(
        tx: &mut Transaction<'_, Postgres>,
        clinic_id: i64,
        date: NaiveDate,
    ) -> Result<ResourcePool> {
        let instances = sqlx::query_as::<_, Resource>(
            r#"
            SELECT id, clinic_id, resource_type_id, name, is_active
            FROM resources
            WHERE clinic_id = $1 AND is_active = TRUE
            ORDER BY id
            "#,
        )
        .bind(clinic_id)
        .fetch_all(&mut **tx)
        .await?;

        let allocations = sqlx::query_as::<_, AllocationRow>(
            r#"
            SELECT ara.resource_id, ce.start_time, ce.end_time
            FROM appointment_resource_allocations ara
            JOIN appointments a ON a.id = ara.appointment_id
            JOIN calendar_events ce ON ce.id = a.calendar_event_id
            WHERE ce.clinic_id = $1
              AND ce.date = $2
              AND a.status = 'confirmed'
              AND ce.start_time IS NOT NULL
              AND ce.end_time IS NOT NULL
            FOR UPDATE OF ara
            "#,
        )
        .bind(clinic_id)
        .bind(date)
        .fetch_all(&mut **tx)
        .await?;

        Ok(build_pool(instances, allocations))
    }
}

async fn load_resource_pool(pool: &PgPool, clinic_id: i64, date: NaiveDate) -> Result<ResourcePool> {
    let instances = sqlx::query_as::<_, Resource>(
        r#"
        SELECT id, clinic_id, resource_type_id, name, is_active
        FROM resources
        WHERE clinic_id = $1 AND is_active = TRUE
        ORDER BY id
        "#,
    )
    .bind(clinic_id)
    .fetch_all(pool)
    .await?;

    let allocations = sqlx::query_as::<_, AllocationRow>(
        r#"
        SELECT ara.resource_id, ce.start_time, ce.end_time
        FROM appointment_resource_allocations ara
        JOIN appointments a ON a.id = ara.appointment_id
        JOIN calendar_events ce ON ce.id = a.calendar_event_id
        WHERE ce.clinic_id = $1
          AND ce.date = $2
          AND a.status = 'confirmed'
          AND ce.start_time IS NOT NULL
          AND ce.end_time IS NOT NULL
        "#,
    )
    .bind(clinic_id)
    .bind(date)
    .fetch_all(pool)
    .await?;

    Ok(build_pool(instances, allocations))
}

fn build_pool(instances: Vec<Resource>, allocations: Vec<AllocationRow>) -> ResourcePool {
    let mut pool = ResourcePool::default();
    for resource in instances {
        pool.instances
            .entry(resource.resource_type_id)
            .or_default()
            .push(resource.id);
    }
    for row in allocations {
        pool.allocations
            .entry(row.resource_id)
            .or_default()
            .push((row.start_time, row.end_time));
    }
    pool
}

/// Build a `DaySchedule` inside an open transaction, locking the
/// practitioner's calendar events on the date so the conflict re-check is
/// race-free.
pub async fn lock_day_schedule(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    clinic_id: i64,
    date: NaiveDate,
    windows: Vec<(NaiveTime, NaiveTime)>,
) -> Result<DaySchedule> {
    // Lock every event row for the practitioner-day first; the joins
    // below then read a stable snapshot.
    sqlx::query(
        r#"
        SELECT id FROM calendar_events
        WHERE user_id = $1 AND clinic_id = $2 AND date = $3
        FOR UPDATE
        "#,
    )
    .bind(user_id)
    .bind(clinic_id)
    .bind(date)
    .fetch_all(&mut **tx)
    .await?;

    let appointment_rows = sqlx::query_as::<_, AppointmentSpanRow>(
        r#"
        SELECT ce.user_id, ce.date, ce.id AS calendar_event_id,
               ce.start_time, ce.end_time
        FROM calendar_events ce
        JOIN appointments a ON a.calendar_event_id = ce.id
        WHERE ce.user_id = $1 AND ce.clinic_id = $2 AND ce.date = $3
          AND ce.event_type = 'appointment'
          AND a.status = 'confirmed'
          AND ce.start_time IS NOT NULL
          AND ce.end_time IS NOT NULL
        "#,
    )
    .bind(user_id)
    .bind(clinic_id)
    .bind(date)
    .fetch_all(&mut **tx)
    .await?;

    let exception_rows = sqlx::query_as::<_, ExceptionSpanRow>(
        r#"
        SELECT ce.user_id, ce.date, ce.id AS calendar_event_id,
               ce.start_time, ce.end_time, ce.event_name
        FROM calendar_events ce
        WHERE ce.user_id = $1 AND ce.clinic_id = $2 AND ce.date = $3
          AND ce.event_type = 'availability_exception'
        "#,
    )
    .bind(user_id)
    .bind(clinic_id)
    .bind(date)
    .fetch_all(&mut **tx)
    .await?;

    Ok(DaySchedule {
        windows,
        appointments: appointment_rows
            .into_iter()
            .map(|row| BusySpan {
                calendar_event_id: row.calendar_event_id,
                start: row.start_time,
                end: row.end_time,
            })
            .collect(),
        exceptions: exception_rows
            .into_iter()
            .map(|row| ExceptionSpan {
                calendar_event_id: row.calendar_event_id,
                span: match (row.start_time, row.end_time) {
                    (Some(start), Some(end)) => Some((start, end)),
                    _ => None,
                },
                name: row.event_name,
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn schedule_9_to_12() -> DaySchedule {
        DaySchedule {
            windows: vec![(t(9, 0), t(12, 0))],
            exceptions: Vec::new(),
            appointments: Vec::new(),
        }
    }

    #[test]
    fn test_free_slots_plain_window() {
        let slots = free_slots(&schedule_9_to_12(), 30, 0, 30, None);
        assert_eq!(slots.len(), 6);
        assert_eq!(slots[0], (t(9, 0), t(9, 30)));
        assert_eq!(slots[5], (t(11, 30), t(12, 0)));
    }

    #[test]
    fn test_free_slots_respect_buffer() {
        // 30 min service + 15 min buffer: the 11:30 start no longer fits
        let slots = free_slots(&schedule_9_to_12(), 30, 15, 30, None);
        assert_eq!(slots.last().unwrap().0, t(11, 0));
    }

    #[test]
    fn test_free_slots_subtract_appointment() {
        let mut schedule = schedule_9_to_12();
        schedule.appointments.push(BusySpan {
            calendar_event_id: 10,
            start: t(10, 0),
            end: t(10, 30),
        });
        let slots = free_slots(&schedule, 30, 0, 30, None);
        let starts: Vec<NaiveTime> = slots.iter().map(|s| s.0).collect();
        assert!(!starts.contains(&t(10, 0)));
        assert!(starts.contains(&t(9, 30)));
        assert!(starts.contains(&t(10, 30)));
    }

    #[test]
    fn test_free_slots_exclude_event_for_edit() {
        let mut schedule = schedule_9_to_12();
        schedule.appointments.push(BusySpan {
            calendar_event_id: 10,
            start: t(10, 0),
            end: t(10, 30),
        });
        let slots = free_slots(&schedule, 30, 0, 30, Some(10));
        let starts: Vec<NaiveTime> = slots.iter().map(|s| s.0).collect();
        assert!(starts.contains(&t(10, 0)));
    }

    #[test]
    fn test_free_slots_all_day_exception_blocks_everything() {
        let mut schedule = schedule_9_to_12();
        schedule.exceptions.push(ExceptionSpan {
            calendar_event_id: 20,
            span: None,
            name: None,
        });
        assert!(free_slots(&schedule, 30, 0, 30, None).is_empty());
    }

    #[test]
    fn test_free_slots_partial_exception() {
        let mut schedule = schedule_9_to_12();
        schedule.exceptions.push(ExceptionSpan {
            calendar_event_id: 20,
            span: Some((t(9, 0), t(10, 0))),
            name: None,
        });
        let slots = free_slots(&schedule, 30, 0, 30, None);
        assert_eq!(slots[0].0, t(10, 0));
    }

    #[test]
    fn test_free_slots_grid_alignment_after_block() {
        // A block ending off-grid pushes candidates to the next grid point
        let mut schedule = schedule_9_to_12();
        schedule.appointments.push(BusySpan {
            calendar_event_id: 10,
            start: t(9, 0),
            end: t(9, 40),
        });
        let slots = free_slots(&schedule, 30, 0, 30, None);
        assert_eq!(slots[0].0, t(10, 0));
    }

    #[test]
    fn test_free_slots_zero_duration_rejected() {
        assert!(free_slots(&schedule_9_to_12(), 0, 0, 30, None).is_empty());
    }

    #[test]
    fn test_schedule_conflict_priority() {
        let mut schedule = schedule_9_to_12();
        schedule.appointments.push(BusySpan {
            calendar_event_id: 10,
            start: t(9, 0),
            end: t(9, 30),
        });
        schedule.exceptions.push(ExceptionSpan {
            calendar_event_id: 20,
            span: Some((t(9, 0), t(12, 0))),
            name: None,
        });

        // Both an appointment and an exception overlap 09:00; the
        // appointment wins.
        let conflict = schedule_conflict(&schedule, t(9, 0), 30, None).unwrap();
        assert_eq!(conflict.kind, ConflictKind::AppointmentConflict);

        // At 10:00 only the exception overlaps.
        let conflict = schedule_conflict(&schedule, t(10, 0), 30, None).unwrap();
        assert_eq!(conflict.kind, ConflictKind::ExceptionConflict);
    }

    #[test]
    fn test_schedule_conflict_outside_hours() {
        let schedule = schedule_9_to_12();
        let conflict = schedule_conflict(&schedule, t(13, 0), 30, None).unwrap();
        assert_eq!(conflict.kind, ConflictKind::OutsideDefaultHours);

        // Straddling the window end is outside too
        let conflict = schedule_conflict(&schedule, t(11, 45), 30, None).unwrap();
        assert_eq!(conflict.kind, ConflictKind::OutsideDefaultHours);
    }

    #[test]
    fn test_schedule_conflict_straddling_two_windows() {
        let schedule = DaySchedule {
            windows: vec![(t(9, 0), t(12, 0)), (t(13, 0), t(18, 0))],
            ..Default::default()
        };
        // Fits neither window wholly even though both ends are in windows
        let conflict = schedule_conflict(&schedule, t(11, 30), 120, None).unwrap();
        assert_eq!(conflict.kind, ConflictKind::OutsideDefaultHours);
        assert!(schedule_conflict(&schedule, t(13, 0), 120, None).is_none());
    }

    #[test]
    fn test_conflict_blocking_depends_on_actor() {
        use crate::models::ActorKind;

        for kind in [ConflictKind::AppointmentConflict, ConflictKind::ResourceConflict] {
            assert!(conflict_blocks(ActorKind::Patient, kind));
            assert!(conflict_blocks(ActorKind::ClinicStaff, kind));
        }
        for kind in [ConflictKind::ExceptionConflict, ConflictKind::OutsideDefaultHours] {
            assert!(conflict_blocks(ActorKind::Patient, kind));
            assert!(!conflict_blocks(ActorKind::ClinicStaff, kind));
        }
    }

    #[test]
    fn test_resource_pool_counts_free_instances() {
        let mut pool = ResourcePool::default();
        pool.instances.insert(1, vec![101, 102]);
        pool.allocations.insert(101, vec![(t(9, 0), t(10, 0))]);

        assert_eq!(pool.free_instances(1, t(9, 0), t(9, 30)), vec![102]);
        assert_eq!(pool.free_instances(1, t(10, 0), t(10, 30)), vec![101, 102]);
        assert!(pool.can_satisfy(&[(1, 1)], t(9, 0), t(9, 30)));
        assert!(!pool.can_satisfy(&[(1, 2)], t(9, 0), t(9, 30)));
    }

    #[test]
    fn test_resource_pool_pick_is_stable() {
        let mut pool = ResourcePool::default();
        pool.instances.insert(1, vec![102, 101]);
        let picked = pool.pick_instances(&[(1, 1)], t(9, 0), t(9, 30)).unwrap();
        assert_eq!(picked, vec![101]);
    }

    #[test]
    fn test_pick_auto_practitioner_tie_break() {
        // Fewest appointments first, then lowest id
        assert_eq!(pick_auto_practitioner(&[(2, 1), (1, 0)]), Some(1));
        assert_eq!(pick_auto_practitioner(&[(2, 1), (1, 1)]), Some(1));
        assert_eq!(pick_auto_practitioner(&[]), None);
    }

    #[test]
    fn test_subtract_intervals_merges_overlapping_blocks() {
        let windows = vec![(t(9, 0), t(18, 0))];
        let blocks = vec![(t(10, 0), t(11, 0)), (t(10, 30), t(12, 0))];
        let remaining = subtract_intervals(&windows, &blocks);
        assert_eq!(remaining, vec![(t(9, 0), t(10, 0)), (t(12, 0), t(18, 0))]);
    }
}
