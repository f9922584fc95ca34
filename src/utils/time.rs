/*!
 * Clinic Time Helpers
 *
 * All wall-clock comparisons in the system happen in the clinic timezone
 * (Asia/Taipei, fixed +08:00 - no daylight saving). Stored dates and times
 * are naive-in-timezone; this module is the single place that converts.
 */

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Asia::Taipei;

/// Current moment as a naive datetime in the clinic timezone
pub fn clinic_now() -> NaiveDateTime {
    Utc::now().with_timezone(&Taipei).naive_local()
}

/// Today's date in the clinic timezone
pub fn clinic_today() -> NaiveDate {
    clinic_now().date()
}

/// Day of week with Monday = 0 .. Sunday = 6, matching the weekly
/// availability template convention
pub fn day_of_week(date: NaiveDate) -> i16 {
    date.weekday().num_days_from_monday() as i16
}

/// Parse a time-of-day string in 24-hour `HH:MM` format
pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// Format a time-of-day as `HH:MM`
pub fn format_hhmm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Chinese weekday label used in outgoing messages
pub fn weekday_zh(date: NaiveDate) -> &'static str {
    match day_of_week(date) {
        0 => "一",
        1 => "二",
        2 => "三",
        3 => "四",
        4 => "五",
        5 => "六",
        _ => "日",
    }
}

/// Format an appointment moment the way patients see it in LINE messages,
/// e.g. `2025/11/03 (一) 09:00`
pub fn format_appointment_datetime(date: NaiveDate, time: NaiveTime) -> String {
    format!(
        "{} ({}) {}",
        date.format("%Y/%m/%d"),
        weekday_zh(date),
        time.format("%H:%M")
    )
}

/// Whole hours between now and a future moment; negative when in the past
pub fn hours_until(target: NaiveDateTime, now: NaiveDateTime) -> i64 {
    (target - now).num_hours()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_of_week_monday_is_zero() {
        // 2025-11-03 is a Monday
        let date = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();
        assert_eq!(day_of_week(date), 0);
        // 2025-11-09 is a Sunday
        let date = NaiveDate::from_ymd_opt(2025, 11, 9).unwrap();
        assert_eq!(day_of_week(date), 6);
    }

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(
            parse_hhmm("09:30"),
            Some(NaiveTime::from_hms_opt(9, 30, 0).unwrap())
        );
        assert_eq!(
            parse_hhmm(" 08:00"),
            Some(NaiveTime::from_hms_opt(8, 0, 0).unwrap())
        );
        assert!(parse_hhmm("25:00").is_none());
        assert!(parse_hhmm("noon").is_none());
    }

    #[test]
    fn test_format_appointment_datetime() {
        let date = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert_eq!(format_appointment_datetime(date, time), "2025/11/03 (一) 09:00");
    }

    #[test]
    fn test_hours_until() {
        let now = NaiveDate::from_ymd_opt(2025, 11, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let target = NaiveDate::from_ymd_opt(2025, 11, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        assert_eq!(hours_until(target, now), 24);
        assert_eq!(hours_until(now, target), -24);
    }
}
