/*!
 * Notification Matrix Tests
 *
 * The decision matrix across the appointment lifecycle, exercised as
 * the concrete end-to-end scenarios: auto-assignment staying silent,
 * the scheduler reveal, admin reassignment before reveal, patient vs
 * staff edits, and cancellations from both sides.
 */

use std::collections::HashMap;

use chrono::Utc;

use clinic_bot_backend::models::appointment_type::AppointmentType;
use clinic_bot_backend::models::ActorKind;
use clinic_bot_backend::services::message_template::{
    TemplateValues, DEFAULT_CLINIC_CONFIRMATION_MESSAGE, DEFAULT_PATIENT_CONFIRMATION_MESSAGE,
    DEFAULT_RECURRENT_CLINIC_CONFIRMATION_MESSAGE, DEFAULT_REMINDER_MESSAGE,
};
use clinic_bot_backend::services::notification_service::{
    decide_cancel, decide_create, decide_edit, decide_reveal, EditChange, NotificationIntent,
    NotificationKind, NotificationRenderer, Recipient,
};

const P1: i64 = 1;
const P2: i64 = 2;
const PATIENT: i64 = 9;

fn kinds(intents: &[NotificationIntent], recipient: Recipient) -> Vec<NotificationKind> {
    intents
        .iter()
        .filter(|intent| intent.recipient == recipient)
        .map(|intent| intent.kind)
        .collect()
}

#[test]
fn auto_assign_happy_path_is_silent() {
    // Patient books with "no preference"; the tie-break picks P2 and the
    // appointment stays hidden. Nobody is messaged.
    let intents = decide_create(ActorKind::Patient, false, P2, PATIENT, true);
    assert!(intents.is_empty());
}

#[test]
fn scheduler_reveal_notifies_only_the_practitioner() {
    let intents = decide_reveal(P2);
    assert_eq!(
        kinds(&intents, Recipient::Practitioner(P2)),
        vec![NotificationKind::PractitionerNewAppointment]
    );
    assert!(kinds(&intents, Recipient::Patient(PATIENT)).is_empty());
}

#[test]
fn patient_notes_only_edit_is_silent() {
    let change = EditChange {
        actor: ActorKind::Patient,
        practitioner_before: P2,
        practitioner_after: P2,
        visible_before: true,
        visible_after: true,
        time_changed: false,
        patient_id: PATIENT,
    };
    assert!(decide_edit(&change).is_empty());
}

#[test]
fn admin_reassign_before_reveal() {
    // Admin moves the hidden assignment from P2 to P1 without touching
    // the time: P1 hears "new appointment", the patient learns the name,
    // P2 (who never knew) hears nothing.
    let change = EditChange {
        actor: ActorKind::ClinicStaff,
        practitioner_before: P2,
        practitioner_after: P1,
        visible_before: false,
        visible_after: true,
        time_changed: false,
        patient_id: PATIENT,
    };
    let intents = decide_edit(&change);
    assert_eq!(
        kinds(&intents, Recipient::Practitioner(P1)),
        vec![NotificationKind::PractitionerNewAppointment]
    );
    assert!(kinds(&intents, Recipient::Practitioner(P2)).is_empty());
    assert_eq!(
        kinds(&intents, Recipient::Patient(PATIENT)),
        vec![NotificationKind::PatientEdited]
    );
}

#[test]
fn admin_confirmation_without_changes_is_a_pure_reveal() {
    let change = EditChange {
        actor: ActorKind::ClinicStaff,
        practitioner_before: P2,
        practitioner_after: P2,
        visible_before: false,
        visible_after: true,
        time_changed: false,
        patient_id: PATIENT,
    };
    let intents = decide_edit(&change);
    assert_eq!(
        kinds(&intents, Recipient::Practitioner(P2)),
        vec![NotificationKind::PractitionerNewAppointment]
    );
    assert!(kinds(&intents, Recipient::Patient(PATIENT)).is_empty());
}

#[test]
fn staff_time_change_notifies_both_sides() {
    let change = EditChange {
        actor: ActorKind::ClinicStaff,
        practitioner_before: P1,
        practitioner_after: P1,
        visible_before: true,
        visible_after: true,
        time_changed: true,
        patient_id: PATIENT,
    };
    let intents = decide_edit(&change);
    assert_eq!(
        kinds(&intents, Recipient::Practitioner(P1)),
        vec![NotificationKind::PractitionerEdited]
    );
    assert_eq!(
        kinds(&intents, Recipient::Patient(PATIENT)),
        vec![NotificationKind::PatientEdited]
    );
}

#[test]
fn patient_time_change_never_messages_the_patient() {
    let change = EditChange {
        actor: ActorKind::Patient,
        practitioner_before: P1,
        practitioner_after: P1,
        visible_before: true,
        visible_after: true,
        time_changed: true,
        patient_id: PATIENT,
    };
    let intents = decide_edit(&change);
    assert!(kinds(&intents, Recipient::Patient(PATIENT)).is_empty());
    assert_eq!(
        kinds(&intents, Recipient::Practitioner(P1)),
        vec![NotificationKind::PractitionerEdited]
    );
}

#[test]
fn patient_switch_back_to_auto_cancels_the_revealed_practitioner() {
    // The previously revealed practitioner loses the appointment; the
    // new hidden assignee hears nothing until their own reveal.
    let change = EditChange {
        actor: ActorKind::Patient,
        practitioner_before: P1,
        practitioner_after: P2,
        visible_before: true,
        visible_after: false,
        time_changed: false,
        patient_id: PATIENT,
    };
    let intents = decide_edit(&change);
    assert_eq!(
        kinds(&intents, Recipient::Practitioner(P1)),
        vec![NotificationKind::PractitionerCancelled]
    );
    assert!(kinds(&intents, Recipient::Practitioner(P2)).is_empty());
}

#[test]
fn auto_to_auto_while_hidden_stays_silent() {
    let change = EditChange {
        actor: ActorKind::Patient,
        practitioner_before: P2,
        practitioner_after: P1,
        visible_before: false,
        visible_after: false,
        time_changed: true,
        patient_id: PATIENT,
    };
    assert!(decide_edit(&change).is_empty());
}

#[test]
fn clinic_cancellation_messages_patient_and_practitioner() {
    let intents = decide_cancel(ActorKind::ClinicStaff, true, P1, PATIENT);
    assert_eq!(
        kinds(&intents, Recipient::Practitioner(P1)),
        vec![NotificationKind::PractitionerCancelled]
    );
    assert_eq!(
        kinds(&intents, Recipient::Patient(PATIENT)),
        vec![NotificationKind::PatientCancelled]
    );
}

#[test]
fn patient_cancellation_messages_only_the_visible_practitioner() {
    let visible = decide_cancel(ActorKind::Patient, true, P1, PATIENT);
    assert_eq!(
        kinds(&visible, Recipient::Practitioner(P1)),
        vec![NotificationKind::PractitionerCancelled]
    );
    assert!(kinds(&visible, Recipient::Patient(PATIENT)).is_empty());

    let hidden = decide_cancel(ActorKind::Patient, false, P1, PATIENT);
    assert!(hidden.is_empty());
}

#[test]
fn staff_create_sends_patient_confirmation_from_the_template() {
    let service = sample_service();
    let intents = decide_create(ActorKind::ClinicStaff, true, P1, PATIENT, true);

    let renderer = NotificationRenderer {
        service: &service,
        values: TemplateValues {
            patient_name: "陳大文".to_string(),
            practitioner_name: "王治療師".to_string(),
            appointment_type_name: "徒手治療".to_string(),
            appointment_datetime: "2025/11/03 (一) 09:00".to_string(),
            clinic_name: "康復診所".to_string(),
            ..Default::default()
        },
        channel_access_token: "channel-token".to_string(),
        practitioner_line_ids: HashMap::from([(P1, "Upractitioner".to_string())]),
        patient_line_ids: HashMap::from([(PATIENT, "Upatient".to_string())]),
    };
    let messages = renderer.render(&intents);

    assert_eq!(messages.len(), 2);
    let patient_message = messages.iter().find(|m| m.to == "Upatient").unwrap();
    assert!(patient_message.text.contains("陳大文"));
    assert!(patient_message.text.contains("2025/11/03 (一) 09:00"));
    let practitioner_message = messages.iter().find(|m| m.to == "Upractitioner").unwrap();
    assert!(practitioner_message.text.contains("徒手治療"));
}

#[test]
fn recipients_without_line_identity_are_dropped() {
    let service = sample_service();
    let intents = decide_create(ActorKind::ClinicStaff, true, P1, PATIENT, true);
    let renderer = NotificationRenderer {
        service: &service,
        values: TemplateValues::default(),
        channel_access_token: "channel-token".to_string(),
        practitioner_line_ids: HashMap::new(),
        patient_line_ids: HashMap::new(),
    };
    assert!(renderer.render(&intents).is_empty());
}

fn sample_service() -> AppointmentType {
    AppointmentType {
        id: 1,
        clinic_id: 1,
        name: "徒手治療".to_string(),
        duration_minutes: 30,
        receipt_name: None,
        allow_new_patient_booking: true,
        allow_existing_patient_booking: true,
        allow_patient_practitioner_selection: true,
        allow_multiple_time_slot_selection: false,
        description: None,
        scheduling_buffer_minutes: 0,
        service_type_group_id: None,
        display_order: 0,
        require_notes: false,
        notes_instructions: None,
        send_patient_confirmation: true,
        send_clinic_confirmation: true,
        send_reminder: true,
        send_recurrent_clinic_confirmation: true,
        patient_confirmation_message: DEFAULT_PATIENT_CONFIRMATION_MESSAGE.to_string(),
        clinic_confirmation_message: DEFAULT_CLINIC_CONFIRMATION_MESSAGE.to_string(),
        reminder_message: DEFAULT_REMINDER_MESSAGE.to_string(),
        recurrent_clinic_confirmation_message: DEFAULT_RECURRENT_CLINIC_CONFIRMATION_MESSAGE
            .to_string(),
        is_deleted: false,
        deleted_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
