/*!
 * Clinic API Routes
 *
 * Defines the `/api/clinic` surface and wires the auth middleware.
 * Role and ownership checks live in the handlers.
 */

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::handlers::{
    appointments::{
        cancel_appointment, confirm_time_slot, create_appointment, edit_preview,
        pending_review_appointments, update_appointment,
    },
    availability::{
        batch_conflict_check, create_exception, delete_exception, get_available_slots,
        get_available_slots_batch, get_weekly_availability, put_weekly_availability,
    },
    calendar::{batch_calendar, get_practitioner_calendar},
    members::{
        invite_member, list_members, list_practitioners, reactivate_member, remove_member,
        update_member_roles,
    },
    service_items::{
        create_service_item_bundle, get_service_item_bundle, update_service_item_bundle,
    },
    settings::{
        cancellation_preview, delete_appointment_type, get_settings, regenerate_liff_token,
        reminder_preview, update_settings, validate_appointment_type_deletion,
    },
    AppState,
};
use crate::middleware::auth::auth_middleware;

/// Create the clinic API routes
pub fn create_clinic_routes(state: AppState) -> Router {
    Router::new()
        // Settings & service catalog
        .route("/settings", get(get_settings).put(update_settings))
        .route(
            "/appointment-types/validate-deletion",
            post(validate_appointment_type_deletion),
        )
        .route("/appointment-types/{id}", delete(delete_appointment_type))
        .route("/service-items/bundle", post(create_service_item_bundle))
        .route(
            "/service-items/{id}/bundle",
            get(get_service_item_bundle).put(update_service_item_bundle),
        )
        .route("/regenerate-liff-token", post(regenerate_liff_token))
        .route("/reminder-preview", post(reminder_preview))
        .route("/cancellation-preview", post(cancellation_preview))
        // Membership
        .route("/members", get(list_members))
        .route("/members/invite", post(invite_member))
        .route("/members/{user_id}/roles", put(update_member_roles))
        .route("/members/{user_id}", delete(remove_member))
        .route("/members/{user_id}/reactivate", post(reactivate_member))
        .route("/practitioners", get(list_practitioners))
        // Availability & calendar
        .route(
            "/practitioners/{id}/availability/default",
            get(get_weekly_availability).put(put_weekly_availability),
        )
        .route(
            "/practitioners/{id}/availability/calendar",
            get(get_practitioner_calendar),
        )
        .route("/practitioners/calendar/batch", post(batch_calendar))
        .route(
            "/practitioners/{id}/availability/slots",
            get(get_available_slots),
        )
        .route(
            "/practitioners/{id}/availability/slots/batch",
            post(get_available_slots_batch),
        )
        .route(
            "/practitioners/availability/conflicts/batch",
            post(batch_conflict_check),
        )
        .route(
            "/practitioners/{id}/availability/exceptions",
            post(create_exception),
        )
        .route(
            "/practitioners/{id}/availability/exceptions/{eid}",
            delete(delete_exception),
        )
        // Appointments
        .route("/appointments", post(create_appointment))
        .route(
            "/appointments/{id}",
            put(update_appointment).delete(cancel_appointment),
        )
        .route("/appointments/{id}/edit-preview", post(edit_preview))
        .route(
            "/appointments/{id}/confirm-time-slot",
            post(confirm_time_slot),
        )
        .route(
            "/pending-review-appointments",
            get(pending_review_appointments),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
