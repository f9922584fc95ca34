/*!
 * Notification Decision Engine
 *
 * Decides who hears about each appointment transition. The decision
 * functions are pure: they take the actor, the visibility flags before
 * and after, and what changed, and return notification intents. The
 * lifecycle manager renders intents into LINE messages after its
 * transaction commits and hands them to the outbound worker, so a failed
 * send can never roll back an appointment change.
 *
 * Visibility is `!is_auto_assigned`: a hidden auto-assigned appointment
 * is never announced to its practitioner until the reveal.
 */

use std::collections::HashMap;

use crate::models::appointment_type::AppointmentType;
use crate::models::ActorKind;
use crate::services::message_template::TemplateValues;
use crate::services::outbound::OutboundMessage;

/// What a notification tells its recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Practitioner: an appointment has been booked on them
    PractitionerNewAppointment,
    /// Practitioner: an appointment they knew about moved
    PractitionerEdited,
    /// Practitioner: an appointment they knew about is gone
    PractitionerCancelled,
    /// Patient: booking confirmation
    PatientConfirmation,
    /// Patient: the clinic changed their appointment
    PatientEdited,
    /// Patient: the clinic cancelled their appointment
    PatientCancelled,
}

/// Who receives a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Practitioner(i64),
    Patient(i64),
}

/// One decided notification, not yet rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationIntent {
    pub recipient: Recipient,
    pub kind: NotificationKind,
}

/// Decide notifications for a newly created appointment
pub fn decide_create(
    actor: ActorKind,
    visible_after: bool,
    practitioner_id: i64,
    patient_id: i64,
    send_patient_confirmation: bool,
) -> Vec<NotificationIntent> {
    let mut intents = Vec::new();

    if visible_after {
        intents.push(NotificationIntent {
            recipient: Recipient::Practitioner(practitioner_id),
            kind: NotificationKind::PractitionerNewAppointment,
        });
    }

    // Patient-initiated bookings confirm in the UI; no message is sent.
    let staff_initiated = matches!(actor, ActorKind::ClinicStaff | ActorKind::Scheduler);
    if staff_initiated && visible_after && send_patient_confirmation {
        intents.push(NotificationIntent {
            recipient: Recipient::Patient(patient_id),
            kind: NotificationKind::PatientConfirmation,
        });
    }

    intents
}

/// Everything the edit decision needs to know about what changed
#[derive(Debug, Clone, Copy)]
pub struct EditChange {
    pub actor: ActorKind,
    pub practitioner_before: i64,
    pub practitioner_after: i64,
    pub visible_before: bool,
    pub visible_after: bool,
    pub time_changed: bool,
    pub patient_id: i64,
}

/// Decide notifications for an edited appointment
pub fn decide_edit(change: &EditChange) -> Vec<NotificationIntent> {
    let mut intents = Vec::new();
    let practitioner_changed = change.practitioner_before != change.practitioner_after;

    if practitioner_changed {
        if change.visible_after {
            intents.push(NotificationIntent {
                recipient: Recipient::Practitioner(change.practitioner_after),
                kind: NotificationKind::PractitionerNewAppointment,
            });
        }
        if change.visible_before {
            intents.push(NotificationIntent {
                recipient: Recipient::Practitioner(change.practitioner_before),
                kind: NotificationKind::PractitionerCancelled,
            });
        }
    } else if change.time_changed && change.visible_before && change.visible_after {
        intents.push(NotificationIntent {
            recipient: Recipient::Practitioner(change.practitioner_after),
            kind: NotificationKind::PractitionerEdited,
        });
    } else if !change.visible_before && change.visible_after {
        // Same practitioner made visible by a staff confirmation: to them
        // this is a brand-new appointment.
        intents.push(NotificationIntent {
            recipient: Recipient::Practitioner(change.practitioner_after),
            kind: NotificationKind::PractitionerNewAppointment,
        });
    }

    // The patient hears about staff-triggered changes that alter what
    // they see: a new time, or a named practitioner where they saw
    // "不指定" before. An admin confirming the hidden assignment as-is is
    // a pure reveal and stays silent toward the patient.
    let revealed_to_patient =
        !change.visible_before && change.visible_after && practitioner_changed;
    if change.actor == ActorKind::ClinicStaff && (change.time_changed || revealed_to_patient) {
        intents.push(NotificationIntent {
            recipient: Recipient::Patient(change.patient_id),
            kind: NotificationKind::PatientEdited,
        });
    }

    intents
}

/// Decide notifications for a cancellation
pub fn decide_cancel(
    actor: ActorKind,
    visible_before: bool,
    practitioner_id: i64,
    patient_id: i64,
) -> Vec<NotificationIntent> {
    let mut intents = Vec::new();
    if visible_before {
        intents.push(NotificationIntent {
            recipient: Recipient::Practitioner(practitioner_id),
            kind: NotificationKind::PractitionerCancelled,
        });
    }
    if actor == ActorKind::ClinicStaff {
        intents.push(NotificationIntent {
            recipient: Recipient::Patient(patient_id),
            kind: NotificationKind::PatientCancelled,
        });
    }
    intents
}

/// Decide notifications for a reveal (cron, or admin confirmation with no
/// other change). The patient's view did not change, so only the
/// practitioner hears about it.
pub fn decide_reveal(practitioner_id: i64) -> Vec<NotificationIntent> {
    vec![NotificationIntent {
        recipient: Recipient::Practitioner(practitioner_id),
        kind: NotificationKind::PractitionerNewAppointment,
    }]
}

/// Renders decided intents into outbound LINE messages.
pub struct NotificationRenderer<'a> {
    pub service: &'a AppointmentType,
    pub values: TemplateValues,
    /// Clinic channel token used by the push client
    pub channel_access_token: String,
    /// practitioner user id -> LINE user id
    pub practitioner_line_ids: HashMap<i64, String>,
    /// patient id -> LINE user id
    pub patient_line_ids: HashMap<i64, String>,
}

impl<'a> NotificationRenderer<'a> {
    fn body_for(&self, kind: NotificationKind) -> Option<String> {
        match kind {
            NotificationKind::PractitionerNewAppointment => {
                if self.service.send_clinic_confirmation {
                    Some(self.values.render(&self.service.clinic_confirmation_message))
                } else {
                    None
                }
            }
            NotificationKind::PractitionerEdited => Some(format!(
                "預約異動通知\n患者：{}\n項目：{}\n新時間：{}",
                self.values.patient_name,
                self.values.appointment_type_name,
                self.values.appointment_datetime
            )),
            NotificationKind::PractitionerCancelled => Some(format!(
                "預約取消通知\n患者：{}\n項目：{}\n時間：{}",
                self.values.patient_name,
                self.values.appointment_type_name,
                self.values.appointment_datetime
            )),
            NotificationKind::PatientConfirmation => {
                Some(self.values.render(&self.service.patient_confirmation_message))
            }
            NotificationKind::PatientEdited => Some(format!(
                "{} 您好，您的預約已更新：\n{}\n時間：{}\n治療師：{}\n{}",
                self.values.patient_name,
                self.values.appointment_type_name,
                self.values.appointment_datetime,
                self.values.practitioner_name,
                self.values.clinic_name
            )),
            NotificationKind::PatientCancelled => Some(format!(
                "{} 您好，您的預約已取消：\n{}\n時間：{}\n如有疑問請與診所聯繫。\n{}",
                self.values.patient_name,
                self.values.appointment_type_name,
                self.values.appointment_datetime,
                self.values.clinic_name
            )),
        }
    }

    /// Render intents into concrete messages, dropping recipients with no
    /// LINE identity (they simply cannot be pushed to).
    pub fn render(&self, intents: &[NotificationIntent]) -> Vec<OutboundMessage> {
        intents
            .iter()
            .filter_map(|intent| {
                let to = match intent.recipient {
                    Recipient::Practitioner(user_id) => {
                        self.practitioner_line_ids.get(&user_id).cloned()
                    }
                    Recipient::Patient(patient_id) => {
                        self.patient_line_ids.get(&patient_id).cloned()
                    }
                }?;
                let text = self.body_for(intent.kind)?;
                Some(OutboundMessage {
                    channel_access_token: self.channel_access_token.clone(),
                    to,
                    text,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P1: i64 = 1;
    const P2: i64 = 2;
    const PATIENT: i64 = 9;

    fn kinds_for(intents: &[NotificationIntent], recipient: Recipient) -> Vec<NotificationKind> {
        intents
            .iter()
            .filter(|i| i.recipient == recipient)
            .map(|i| i.kind)
            .collect()
    }

    #[test]
    fn test_create_auto_assigned_notifies_nobody() {
        // Auto-assigned booking by a patient: hidden, silent.
        let intents = decide_create(ActorKind::Patient, false, P2, PATIENT, true);
        assert!(intents.is_empty());
    }

    #[test]
    fn test_create_patient_visible_notifies_practitioner_only() {
        let intents = decide_create(ActorKind::Patient, true, P1, PATIENT, true);
        assert_eq!(
            kinds_for(&intents, Recipient::Practitioner(P1)),
            vec![NotificationKind::PractitionerNewAppointment]
        );
        assert!(kinds_for(&intents, Recipient::Patient(PATIENT)).is_empty());
    }

    #[test]
    fn test_create_by_staff_notifies_patient_when_flag_on() {
        let intents = decide_create(ActorKind::ClinicStaff, true, P1, PATIENT, true);
        assert_eq!(
            kinds_for(&intents, Recipient::Patient(PATIENT)),
            vec![NotificationKind::PatientConfirmation]
        );

        let intents = decide_create(ActorKind::ClinicStaff, true, P1, PATIENT, false);
        assert!(kinds_for(&intents, Recipient::Patient(PATIENT)).is_empty());
    }

    #[test]
    fn test_edit_notes_only_is_silent() {
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
    fn test_admin_reassign_from_hidden_auto_to_specific() {
        // Before the reveal, admin picks P1: P1 hears "new appointment",
        // the patient sees 不指定 become a name, P2 (never informed) hears
        // nothing.
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
            kinds_for(&intents, Recipient::Practitioner(P1)),
            vec![NotificationKind::PractitionerNewAppointment]
        );
        assert!(kinds_for(&intents, Recipient::Practitioner(P2)).is_empty());
        assert_eq!(
            kinds_for(&intents, Recipient::Patient(PATIENT)),
            vec![NotificationKind::PatientEdited]
        );
    }

    #[test]
    fn test_edit_practitioner_change_between_visible() {
        let change = EditChange {
            actor: ActorKind::ClinicStaff,
            practitioner_before: P1,
            practitioner_after: P2,
            visible_before: true,
            visible_after: true,
            time_changed: false,
            patient_id: PATIENT,
        };
        let intents = decide_edit(&change);
        assert_eq!(
            kinds_for(&intents, Recipient::Practitioner(P2)),
            vec![NotificationKind::PractitionerNewAppointment]
        );
        assert_eq!(
            kinds_for(&intents, Recipient::Practitioner(P1)),
            vec![NotificationKind::PractitionerCancelled]
        );
        // Practitioner changed but the time stands and the patient saw a
        // name before and sees a name now: no patient message.
        assert!(kinds_for(&intents, Recipient::Patient(PATIENT)).is_empty());
    }

    #[test]
    fn test_edit_time_change_same_visible_practitioner() {
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
            kinds_for(&intents, Recipient::Practitioner(P1)),
            vec![NotificationKind::PractitionerEdited]
        );
        assert_eq!(
            kinds_for(&intents, Recipient::Patient(PATIENT)),
            vec![NotificationKind::PatientEdited]
        );
    }

    #[test]
    fn test_patient_edit_time_change_sends_no_patient_message() {
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
        assert_eq!(
            kinds_for(&intents, Recipient::Practitioner(P1)),
            vec![NotificationKind::PractitionerEdited]
        );
        assert!(kinds_for(&intents, Recipient::Patient(PATIENT)).is_empty());
    }

    #[test]
    fn test_patient_switch_to_auto_cancels_old_visible_practitioner() {
        // The previously revealed practitioner must hear the cancellation;
        // the newly hidden assignment announces nothing.
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
            kinds_for(&intents, Recipient::Practitioner(P1)),
            vec![NotificationKind::PractitionerCancelled]
        );
        assert!(kinds_for(&intents, Recipient::Practitioner(P2)).is_empty());
    }

    #[test]
    fn test_patient_auto_to_auto_hidden_throughout_is_silent() {
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
    fn test_admin_confirmation_without_changes_is_pure_reveal() {
        // Same practitioner, no time change, hidden -> visible: the
        // practitioner hears "new appointment", the patient hears nothing.
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
            kinds_for(&intents, Recipient::Practitioner(P2)),
            vec![NotificationKind::PractitionerNewAppointment]
        );
        assert!(kinds_for(&intents, Recipient::Patient(PATIENT)).is_empty());
    }

    #[test]
    fn test_cancel_by_staff() {
        let intents = decide_cancel(ActorKind::ClinicStaff, true, P1, PATIENT);
        assert_eq!(
            kinds_for(&intents, Recipient::Practitioner(P1)),
            vec![NotificationKind::PractitionerCancelled]
        );
        assert_eq!(
            kinds_for(&intents, Recipient::Patient(PATIENT)),
            vec![NotificationKind::PatientCancelled]
        );
    }

    #[test]
    fn test_cancel_by_patient_of_hidden_appointment() {
        let intents = decide_cancel(ActorKind::Patient, false, P1, PATIENT);
        assert!(intents.is_empty());
    }

    #[test]
    fn test_reveal_notifies_practitioner_only() {
        let intents = decide_reveal(P2);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].recipient, Recipient::Practitioner(P2));
        assert_eq!(intents[0].kind, NotificationKind::PractitionerNewAppointment);
    }
}
