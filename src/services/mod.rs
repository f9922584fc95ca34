/*!
 * Services Module
 *
 * Contains business logic and service layer implementations.
 */

pub mod appointment_service;
pub mod availability_service;
pub mod booking_policy;
pub mod calendar_service;
pub mod member_service;
pub mod message_template;
pub mod notification_service;
pub mod outbound;
pub mod reveal_scheduler;
pub mod service_item_service;
pub mod settings_service;

pub use appointment_service::{AppointmentService, CancelOutcome};
pub use availability_service::AvailabilityService;
pub use calendar_service::CalendarService;
pub use member_service::MemberService;
pub use outbound::{spawn_outbound_worker, LinePushClient, OutboundSender};
pub use reveal_scheduler::spawn_reveal_scheduler;
pub use service_item_service::ServiceItemService;
pub use settings_service::SettingsService;
