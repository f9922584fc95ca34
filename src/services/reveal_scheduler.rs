/*!
 * Auto-Assignment Reveal Scheduler
 *
 * Background task that promotes hidden auto-assigned appointments to
 * visible once they cross their clinic's reveal boundary, notifying the
 * practitioner as if the appointment had just been booked.
 *
 * The transition itself is a row-level UPDATE gated on
 * `is_auto_assigned = TRUE`, so concurrent runs (or a racing admin
 * reassignment) reveal each appointment exactly once; notifications are
 * sent only for rows this run actually flipped.
 */

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use sqlx::PgPool;
use tokio::time::{interval, Duration as TokioDuration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::models::Clinic;
use crate::services::appointment_service::AppointmentService;
use crate::services::booking_policy::reveal_due;
use crate::services::outbound::OutboundSender;
use crate::utils::time::clinic_now;
use crate::utils::Result;

/// Tick period; the reveal boundary is minute-grained so once a minute
/// is enough
const TICK_SECONDS: u64 = 60;

/// Reveal scheduler
pub struct RevealScheduler {
    pool: PgPool,
    outbound: OutboundSender,
}

/// Row shape for the hidden-appointment scan
#[derive(Debug, sqlx::FromRow)]
struct HiddenAppointmentRow {
    appointment_id: i64,
    clinic_id: i64,
    date: NaiveDate,
    start_time: NaiveTime,
}

impl RevealScheduler {
    pub fn new(pool: PgPool, outbound: OutboundSender) -> Self {
        Self { pool, outbound }
    }

    /// Start the background loop
    pub async fn start(self: Arc<Self>) {
        info!("Starting reveal scheduler background task");
        let mut ticker = interval(TokioDuration::from_secs(TICK_SECONDS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(revealed) if revealed > 0 => {
                    info!("Reveal scheduler promoted {} appointment(s)", revealed)
                }
                Ok(_) => debug!("Reveal scheduler tick: nothing due"),
                Err(e) => error!("Reveal scheduler run failed: {}", e),
            }
        }
    }

    /// One pass over all clinics' hidden auto-assignments. Returns how
    /// many rows this run revealed.
    pub async fn run_once(&self) -> Result<usize> {
        let hidden = sqlx::query_as::<_, HiddenAppointmentRow>(
            r#"
            SELECT a.id AS appointment_id, ce.clinic_id, ce.date, ce.start_time
            FROM appointments a
            JOIN calendar_events ce ON ce.id = a.calendar_event_id
            WHERE a.is_auto_assigned = TRUE
              AND a.status = 'confirmed'
              AND ce.start_time IS NOT NULL
            ORDER BY ce.clinic_id, ce.date, ce.start_time
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        if hidden.is_empty() {
            return Ok(0);
        }

        // One settings load per clinic for the whole pass.
        let clinic_ids: Vec<i64> = {
            let mut ids: Vec<i64> = hidden.iter().map(|row| row.clinic_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let clinics = sqlx::query_as::<_, Clinic>("SELECT * FROM clinics WHERE id = ANY($1)")
            .bind(&clinic_ids)
            .fetch_all(&self.pool)
            .await?;
        let clinics_by_id: HashMap<i64, Clinic> =
            clinics.into_iter().map(|clinic| (clinic.id, clinic)).collect();

        let service = AppointmentService::new(self.pool.clone(), self.outbound.clone());
        let now = clinic_now();
        let mut revealed = 0;

        for row in hidden {
            let Some(clinic) = clinics_by_id.get(&row.clinic_id) else {
                continue;
            };
            let settings = match clinic.validated_settings() {
                Ok(settings) => settings,
                Err(e) => {
                    error!("Skipping clinic {}: {}", clinic.id, e);
                    continue;
                }
            };
            if !reveal_due(
                &settings.booking_restriction_settings,
                now,
                row.date,
                row.start_time,
            ) {
                continue;
            }
            match service
                .reveal_appointment(clinic, &settings, row.appointment_id)
                .await
            {
                Ok(true) => revealed += 1,
                Ok(false) => {
                    // Another run or an admin got there first.
                    debug!("Appointment {} already revealed", row.appointment_id)
                }
                Err(e) => error!(
                    "Failed to reveal appointment {}: {}",
                    row.appointment_id, e
                ),
            }
        }

        Ok(revealed)
    }
}

/// Spawn the reveal scheduler as a background task.
///
/// This should be called from main.rs after the outbound worker exists.
pub fn spawn_reveal_scheduler(pool: PgPool, outbound: OutboundSender) {
    let scheduler = Arc::new(RevealScheduler::new(pool, outbound));
    tokio::spawn(async move {
        scheduler.start().await;
    });
    info!("Reveal scheduler spawned as background task");
}
