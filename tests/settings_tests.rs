/*!
 * Settings Document Tests
 *
 * The deep-merge partial update laws, the legacy booking-restriction
 * migration, template defaulting, and bundle payload round-trips.
 */

use serde_json::json;

use clinic_bot_backend::models::settings::{BookingRestrictionType, ClinicSettings};
use clinic_bot_backend::models::{ServiceItemBundleAssociations, ServiceItemBundleRequest};
use clinic_bot_backend::services::message_template::{
    message_or_default, validate_template, DEFAULT_REMINDER_MESSAGE, STANDARD_PLACEHOLDERS,
};
use clinic_bot_backend::utils::deep_merge;

#[test]
fn deep_merge_preserves_untouched_sections_and_siblings() {
    let stored = json!({
        "notification_settings": {
            "reminder_hours_before": 24,
            "reminder_timing_mode": "hours_before",
            "reminder_previous_day_time": "21:00"
        },
        "booking_restriction_settings": {"step_size_minutes": 30},
        "receipt_settings": {"show_stamp": true}
    });
    let incoming = json!({
        "notification_settings": {"reminder_hours_before": 48}
    });

    let merged = deep_merge(stored, incoming);
    assert_eq!(merged["notification_settings"]["reminder_hours_before"], 48);
    // Sibling keys in the touched section survive.
    assert_eq!(
        merged["notification_settings"]["reminder_previous_day_time"],
        "21:00"
    );
    // Untouched top-level sections survive.
    assert_eq!(merged["booking_restriction_settings"]["step_size_minutes"], 30);
    assert_eq!(merged["receipt_settings"]["show_stamp"], true);
}

#[test]
fn merging_a_subset_of_current_settings_is_a_no_op() {
    let stored = ClinicSettings::default().to_value();
    let subset = json!({
        "booking_restriction_settings": {
            "step_size_minutes": 30,
            "max_future_appointments": 3
        }
    });
    let merged = deep_merge(stored.clone(), subset);
    assert_eq!(merged, stored);
}

#[test]
fn merged_document_still_validates() {
    let stored = ClinicSettings::default().to_value();
    let incoming = json!({
        "booking_restriction_settings": {"step_size_minutes": 15}
    });
    let merged = deep_merge(stored, incoming);
    let settings = ClinicSettings::from_value(merged).unwrap();
    assert_eq!(settings.booking_restriction_settings.step_size_minutes, 15);

    // An out-of-range merge result is rejected as a whole.
    let stored = ClinicSettings::default().to_value();
    let bad = deep_merge(stored, json!({
        "booking_restriction_settings": {"step_size_minutes": 2}
    }));
    assert!(ClinicSettings::from_value(bad).is_err());
}

#[test]
fn legacy_same_day_disallowed_migrates_on_read_and_write() {
    let legacy = json!({
        "booking_restriction_settings": {
            "booking_restriction_type": "same_day_disallowed"
        }
    });
    let settings = ClinicSettings::from_value(legacy).unwrap();
    assert_eq!(
        settings.booking_restriction_settings.booking_restriction_type,
        BookingRestrictionType::MinimumHoursRequired
    );
    assert_eq!(
        settings.booking_restriction_settings.minimum_booking_hours_ahead,
        24
    );

    // Serializing never resurrects the legacy value.
    let written = settings.to_value();
    assert_eq!(
        written["booking_restriction_settings"]["booking_restriction_type"],
        "minimum_hours_required"
    );
}

#[test]
fn unknown_keys_are_rejected_at_any_level() {
    assert!(ClinicSettings::from_value(json!({"surprise": {}})).is_err());
    assert!(ClinicSettings::from_value(json!({
        "receipt_settings": {"show_stamp": true, "stamp_color": "red"}
    }))
    .is_err());
}

#[test]
fn blank_templates_fall_back_to_the_default() {
    assert_eq!(message_or_default(None, DEFAULT_REMINDER_MESSAGE), DEFAULT_REMINDER_MESSAGE);
    assert_eq!(
        message_or_default(Some(""), DEFAULT_REMINDER_MESSAGE),
        DEFAULT_REMINDER_MESSAGE
    );
    assert_eq!(
        message_or_default(Some("  \n  "), DEFAULT_REMINDER_MESSAGE),
        DEFAULT_REMINDER_MESSAGE
    );
    assert_eq!(
        message_or_default(Some("自訂提醒"), DEFAULT_REMINDER_MESSAGE),
        "自訂提醒"
    );
}

#[test]
fn unknown_placeholders_are_reported() {
    let errors = validate_template(
        "{patient_name} 的預約在 {appointment_time}",
        &STANDARD_PLACEHOLDERS,
    );
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("appointment_time"));
}

#[test]
fn bundle_payload_round_trips_every_field() {
    let payload = json!({
        "item": {
            "name": "運動治療",
            "duration_minutes": 45,
            "receipt_name": "運動治療(自費)",
            "allow_new_patient_booking": false,
            "allow_multiple_time_slot_selection": true,
            "scheduling_buffer_minutes": 10,
            "display_order": 2,
            "require_notes": true,
            "notes_instructions": "請描述症狀"
        },
        "associations": {
            "practitioner_ids": [3, 5],
            "billing_scenarios": [
                {"practitioner_id": 3, "name": "自費", "amount": 0, "revenue_share": 0, "is_default": true}
            ],
            "resource_requirements": [
                {"resource_type_id": 1, "quantity": 2}
            ],
            "follow_up_messages": [
                {"timing_mode": "specific_time", "days_after": 1, "time_of_day": "09:00",
                 "message_template": "恢復得如何？", "display_order": 0}
            ]
        }
    });

    let request: ServiceItemBundleRequest = serde_json::from_value(payload).unwrap();
    assert_eq!(request.item.name, "運動治療");
    assert_eq!(request.item.duration_minutes, 45);
    assert!(!request.item.allow_new_patient_booking);
    assert!(request.item.allow_multiple_time_slot_selection);
    assert_eq!(request.item.scheduling_buffer_minutes, 10);
    assert!(request.item.require_notes);

    // Zero amounts survive intact (the scenario is free of charge).
    let scenario = &request.associations.billing_scenarios[0];
    assert_eq!(scenario.amount, 0);
    assert_eq!(scenario.revenue_share, 0);
    assert!(scenario.is_default);
    assert!(scenario.validate_revenue_share().is_ok());

    let requirement = &request.associations.resource_requirements[0];
    assert_eq!((requirement.resource_type_id, requirement.quantity), (1, 2));

    let follow_up = &request.associations.follow_up_messages[0];
    assert_eq!(follow_up.time_of_day.as_deref(), Some("09:00"));
    assert!(follow_up.is_enabled);

    // Serializing the association set and reading it back changes
    // nothing.
    let serialized = serde_json::to_value(&request.associations).unwrap();
    let reread: ServiceItemBundleAssociations = serde_json::from_value(serialized).unwrap();
    assert_eq!(reread.practitioner_ids, vec![3, 5]);
    assert_eq!(reread.billing_scenarios[0].amount, 0);
    assert_eq!(
        reread.follow_up_messages[0].message_template,
        "恢復得如何？"
    );
}

#[test]
fn empty_settings_document_yields_full_defaults() {
    let settings = ClinicSettings::from_value(json!({})).unwrap();
    let value = settings.to_value();
    for section in [
        "notification_settings",
        "booking_restriction_settings",
        "clinic_info_settings",
        "chat_settings",
        "receipt_settings",
    ] {
        assert!(value.get(section).is_some(), "missing section {}", section);
    }
}
