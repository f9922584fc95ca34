/*!
 * Availability & Calendar Event Models
 *
 * The weekly template (PractitionerAvailability) defines default working
 * windows per weekday. CalendarEvent is the unified temporal record that
 * exclusively owns either an Appointment or an AvailabilityException;
 * deleting the event cascades to its owned record.
 */

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::utils::time::parse_hhmm;

/// What a calendar event owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CalendarEventType {
    Appointment,
    AvailabilityException,
}

/// Weekly availability template row: one interval of one weekday
/// (Monday = 0 .. Sunday = 6). Intervals within a day never overlap.
#[derive(Debug, Clone, FromRow)]
pub struct PractitionerAvailability {
    pub id: i64,
    pub user_id: i64,
    pub clinic_id: i64,
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Unified temporal record
#[derive(Debug, Clone, FromRow)]
pub struct CalendarEvent {
    pub id: i64,
    pub user_id: i64,
    pub clinic_id: i64,
    pub event_type: CalendarEventType,
    pub date: NaiveDate,
    /// Null start/end means all-day (exceptions only)
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub event_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Availability exception row; blocks the schedule inside its calendar
/// event's window
#[derive(Debug, Clone, FromRow)]
pub struct AvailabilityException {
    pub id: i64,
    pub calendar_event_id: i64,
    pub reason: Option<String>,
}

/// One interval in a weekly template request/response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityPeriod {
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: String,
}

impl AvailabilityPeriod {
    pub fn parsed(&self) -> Result<(NaiveTime, NaiveTime), String> {
        let start = parse_hhmm(&self.start_time)
            .ok_or_else(|| format!("時間格式錯誤: {}", self.start_time))?;
        let end = parse_hhmm(&self.end_time)
            .ok_or_else(|| format!("時間格式錯誤: {}", self.end_time))?;
        if start >= end {
            return Err("結束時間必須晚於開始時間".to_string());
        }
        Ok((start, end))
    }
}

/// Full weekly template payload: `periods[day_of_week]` lists that day's
/// working intervals
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WeeklyAvailabilityRequest {
    /// Exactly 7 entries, Monday first
    #[validate(length(min = 7, max = 7, message = "必須提供 7 天的時段"))]
    pub days: Vec<Vec<AvailabilityPeriod>>,
}

impl WeeklyAvailabilityRequest {
    /// Parse every day's periods, rejecting malformed or overlapping
    /// intervals
    pub fn parsed(&self) -> Result<Vec<Vec<(NaiveTime, NaiveTime)>>, String> {
        let mut parsed_days = Vec::with_capacity(self.days.len());
        for (day_index, periods) in self.days.iter().enumerate() {
            let mut intervals: Vec<(NaiveTime, NaiveTime)> = periods
                .iter()
                .map(|p| p.parsed())
                .collect::<Result<_, _>>()?;
            intervals.sort();
            for pair in intervals.windows(2) {
                if pair[1].0 < pair[0].1 {
                    return Err(format!("第 {} 天的時段重疊", day_index + 1));
                }
            }
            parsed_days.push(intervals);
        }
        Ok(parsed_days)
    }
}

/// Weekly template response
#[derive(Debug, Clone, Serialize)]
pub struct WeeklyAvailabilityResponse {
    pub user_id: i64,
    pub days: Vec<Vec<AvailabilityPeriod>>,
}

/// Request to create an availability exception
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateExceptionRequest {
    pub date: NaiveDate,
    /// `HH:MM`; omit both times for an all-day block
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    #[validate(length(max = 255, message = "名稱過長"))]
    pub event_name: Option<String>,
    /// Override the overlapping-appointment warning
    #[serde(default)]
    pub force: bool,
}

/// Exception details in responses
#[derive(Debug, Clone, Serialize)]
pub struct ExceptionResponse {
    pub calendar_event_id: i64,
    pub date: NaiveDate,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub event_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(start: &str, end: &str) -> AvailabilityPeriod {
        AvailabilityPeriod {
            start_time: start.to_string(),
            end_time: end.to_string(),
        }
    }

    #[test]
    fn test_period_parsing_rejects_inverted_range() {
        assert!(period("09:00", "12:00").parsed().is_ok());
        assert!(period("12:00", "09:00").parsed().is_err());
        assert!(period("09:00", "09:00").parsed().is_err());
    }

    #[test]
    fn test_weekly_request_rejects_overlapping_intervals() {
        let mut days = vec![Vec::new(); 7];
        days[0] = vec![period("09:00", "12:00"), period("11:00", "14:00")];
        let request = WeeklyAvailabilityRequest { days };
        assert!(request.parsed().is_err());
    }

    #[test]
    fn test_weekly_request_allows_adjacent_intervals() {
        let mut days = vec![Vec::new(); 7];
        days[0] = vec![period("09:00", "12:00"), period("12:00", "18:00")];
        let request = WeeklyAvailabilityRequest { days };
        let parsed = request.parsed().unwrap();
        assert_eq!(parsed[0].len(), 2);
    }
}
