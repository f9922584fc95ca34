/*!
 * Error Handling
 *
 * Defines application-wide error types and conversion implementations
 * for proper error handling and HTTP response mapping.
 *
 * User-visible messages are rendered in Traditional Chinese; the `error`
 * keys in structured bodies are stable snake_case strings so the UI can
 * localize later.
 */

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::fmt;

/// Application result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Booking policy rules that can reject a patient-initiated mutation.
///
/// Staff actions bypass all of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyRule {
    /// Booking is too close to the appointment start
    LeadTime,
    /// Cancellation is inside the minimum cancellation window
    CancelWindow,
    /// Appointment date is beyond the booking window
    BookingWindow,
    /// Patient already has the maximum number of future appointments
    ActiveCap,
    /// Start time is not aligned to the clinic's step size
    StepGranularity,
    /// Service is not bookable by this patient
    ServiceUnavailable,
    /// Service does not allow the patient to pick a practitioner
    PractitionerSelectionNotAllowed,
}

impl PolicyRule {
    /// Stable key for structured error bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyRule::LeadTime => "lead_time",
            PolicyRule::CancelWindow => "cancel_window",
            PolicyRule::BookingWindow => "booking_window",
            PolicyRule::ActiveCap => "active_cap",
            PolicyRule::StepGranularity => "step_granularity",
            PolicyRule::ServiceUnavailable => "service_unavailable",
            PolicyRule::PractitionerSelectionNotAllowed => "practitioner_selection_not_allowed",
        }
    }

    /// User-visible message
    pub fn message(&self) -> &'static str {
        match self {
            PolicyRule::LeadTime => "已超過可預約的時間，請選擇其他時段",
            PolicyRule::CancelWindow => "已超過可取消預約的時間，請與診所聯繫",
            PolicyRule::BookingWindow => "預約日期超過可預約範圍",
            PolicyRule::ActiveCap => "您的有效預約數量已達上限",
            PolicyRule::StepGranularity => "預約時間格式不正確，請重新選擇時段",
            PolicyRule::ServiceUnavailable => "此服務項目目前無法預約",
            PolicyRule::PractitionerSelectionNotAllowed => "此服務項目不開放指定治療師",
        }
    }
}

/// Scheduling conflict classes. The derived ordering is the priority in
/// which the conflict engine reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Overlaps another confirmed appointment of the practitioner
    AppointmentConflict,
    /// Overlaps an availability exception
    ExceptionConflict,
    /// Not fully inside a weekly working window
    OutsideDefaultHours,
    /// Required resources are already allocated
    ResourceConflict,
    /// No practitioner can take the appointment at all
    NoAvailability,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::AppointmentConflict => "appointment_conflict",
            ConflictKind::ExceptionConflict => "exception_conflict",
            ConflictKind::OutsideDefaultHours => "outside_default_hours",
            ConflictKind::ResourceConflict => "resource_conflict",
            ConflictKind::NoAvailability => "no_availability",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ConflictKind::AppointmentConflict => "此時段已有其他預約",
            ConflictKind::ExceptionConflict => "此時段為休診時間",
            ConflictKind::OutsideDefaultHours => "此時段不在預設看診時間內",
            ConflictKind::ResourceConflict => "此時段的設備或空間已被使用",
            ConflictKind::NoAvailability => "此時段沒有可預約的治療師",
        }
    }
}

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Database error
    Database(sqlx::Error),
    /// Authentication error
    Unauthorized(String),
    /// Forbidden error
    Forbidden(String),
    /// Not found error
    NotFound(String),
    /// Validation error
    Validation(String),
    /// Booking restriction rejected a patient-initiated mutation
    Policy(PolicyRule),
    /// Scheduling conflict detected
    Scheduling(ConflictKind),
    /// Edit attempted on a cancelled appointment
    AlreadyCancelled,
    /// Service item name collision among active rows
    NameConflict,
    /// Structured failure body (e.g. deletion blocked by practitioners,
    /// exception overlapping existing appointments)
    Detail {
        status: StatusCode,
        detail: serde_json::Value,
    },
    /// Serializable-isolation retry hint
    SerializationFailure,
    /// Internal server error
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database(err) => write!(f, "Database error: {}", err),
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            Self::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::Validation(msg) => write!(f, "Validation error: {}", msg),
            Self::Policy(rule) => write!(f, "Policy violation: {}", rule.as_str()),
            Self::Scheduling(kind) => write!(f, "Scheduling conflict: {}", kind.as_str()),
            Self::AlreadyCancelled => write!(f, "Appointment already cancelled"),
            Self::NameConflict => write!(f, "Name conflict"),
            Self::Detail { status, .. } => write!(f, "Structured error ({})", status),
            Self::SerializationFailure => write!(f, "Serialization failure"),
            Self::Internal(msg) => write!(f, "Internal server error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Convert SQLx errors to AppError
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        // 40001 is the Postgres serialization_failure SQLSTATE
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.code().as_deref() == Some("40001") {
                return Self::SerializationFailure;
            }
        }
        tracing::error!("Database error: {:?}", err);
        Self::Database(err)
    }
}

/// Convert JWT errors to AppError
impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("Invalid token: {}", err))
    }
}

/// Convert AppError to HTTP response with the `{"detail": ...}` body
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::Database(ref err) => {
                // Don't expose internal database errors to clients
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!("系統發生錯誤，請稍後再試"),
                )
            }
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!(msg)),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, json!(msg)),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, json!(msg)),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, json!(msg)),
            Self::Policy(rule) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "policy_violation",
                    "kind": rule.as_str(),
                    "message": rule.message(),
                }),
            ),
            Self::Scheduling(kind) => (
                StatusCode::CONFLICT,
                json!({
                    "error": kind.as_str(),
                    "message": kind.message(),
                }),
            ),
            Self::AlreadyCancelled => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "already_cancelled",
                    "message": "此預約已取消",
                }),
            ),
            Self::NameConflict => (
                StatusCode::CONFLICT,
                json!({
                    "error": "name_conflict",
                    "message": "服務項目名稱已重疊",
                }),
            ),
            Self::Detail { status, detail } => (status, detail),
            Self::SerializationFailure => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "serialization_failure",
                    "message": "系統忙碌中，請重試",
                }),
            ),
            Self::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!("系統發生錯誤，請稍後再試"),
                )
            }
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Unauthorized("Invalid credentials".to_string());
        assert_eq!(err.to_string(), "Unauthorized: Invalid credentials");

        let err = AppError::Policy(PolicyRule::CancelWindow);
        assert_eq!(err.to_string(), "Policy violation: cancel_window");
    }

    #[test]
    fn test_app_error_from_sqlx() {
        let sqlx_err = sqlx::Error::RowNotFound;
        let app_err: AppError = sqlx_err.into();
        match app_err {
            AppError::Database(_) => (),
            _ => panic!("Expected Database error"),
        }
    }

    #[test]
    fn test_policy_rule_keys_are_stable() {
        assert_eq!(PolicyRule::LeadTime.as_str(), "lead_time");
        assert_eq!(PolicyRule::ActiveCap.as_str(), "active_cap");
        assert_eq!(
            PolicyRule::PractitionerSelectionNotAllowed.as_str(),
            "practitioner_selection_not_allowed"
        );
    }

    #[test]
    fn test_conflict_kind_priority_order() {
        assert!(ConflictKind::AppointmentConflict < ConflictKind::ExceptionConflict);
        assert!(ConflictKind::ExceptionConflict < ConflictKind::OutsideDefaultHours);
        assert!(ConflictKind::OutsideDefaultHours < ConflictKind::ResourceConflict);
    }
}
