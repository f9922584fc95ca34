/*!
 * Data Models Module
 *
 * Contains database models, request/response DTOs, and the validated
 * clinic settings document.
 */

pub mod appointment;
pub mod appointment_type;
pub mod availability;
pub mod calendar;
pub mod clinic;
pub mod patient;
pub mod resource;
pub mod settings;
pub mod user;

pub use appointment::{
    ActorKind, AlternativeSlot, Appointment, AppointmentResponse, AppointmentStatus,
    AppointmentWithEvent, ConfirmTimeSlotRequest, CreateAppointmentRequest, PractitionerChoice,
    UpdateAppointmentRequest, AUTO_ASSIGN_SENTINEL,
};
pub use appointment_type::{
    AppointmentResourceRequirement, AppointmentType, AppointmentTypeResponse, BillingScenario,
    BillingScenarioBundleData, FollowUpMessage, FollowUpMessageBundleData, FollowUpTimingMode,
    PractitionerAppointmentType, ResourceRequirementBundleData, ServiceItemBundleAssociations,
    ServiceItemBundleRequest, ServiceItemBundleResponse, ServiceItemData,
};
pub use availability::{
    AvailabilityException, AvailabilityPeriod, CalendarEvent, CalendarEventType,
    CreateExceptionRequest, ExceptionResponse, PractitionerAvailability,
    WeeklyAvailabilityRequest, WeeklyAvailabilityResponse,
};
pub use calendar::{
    BatchCalendarRequest, BatchCalendarResponse, CalendarAppointmentView, CalendarEventView,
    DailyCalendarResponse, MonthlyCalendarDay, MonthlyCalendarResponse, PendingReviewAppointment,
    PractitionerCalendar,
};
pub use clinic::{Clinic, LiffUrls};
pub use patient::{LineUser, Patient};
pub use settings::{
    BookingRestrictionSettings, BookingRestrictionType, ChatSettings, ClinicInfoSettings,
    ClinicSettings, NotificationSettings, ReceiptSettings, ReminderTimingMode,
    SETTINGS_SECTIONS,
};
pub use user::{
    MemberInviteRequest, MemberInviteResponse, MemberResponse, PractitionerResponse, Role,
    SignupToken, UpdateMemberRolesRequest, User, UserClinicAssociation,
};

/// Authenticated caller information extracted from the request token.
/// This is added as a request extension by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Staff user id; absent for patient (LIFF) callers
    pub user_id: Option<i64>,
    /// Patient id; present for patient (LIFF) callers
    pub patient_id: Option<i64>,
    pub clinic_id: i64,
    /// Clinic-scoped roles; empty for patient callers
    pub roles: Vec<Role>,
    pub actor: ActorKind,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    pub fn is_practitioner(&self) -> bool {
        self.roles.contains(&Role::Practitioner)
    }

    pub fn is_staff(&self) -> bool {
        self.actor == ActorKind::ClinicStaff
    }
}
