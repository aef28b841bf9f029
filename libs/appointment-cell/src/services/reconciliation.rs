// libs/appointment-cell/src/services/reconciliation.rs
//
// Unpaid-appointment reconciliation: appointments whose payment never
// completed within the grace period are cancelled and their slot freed.
// Runs on a timer (see scheduler.rs) and on demand through the admin
// endpoint.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, error, info};
use uuid::Uuid;
use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    AppointmentError, AppointmentStatus, CancellationOutcome, SweepReport, UnpaidCandidate,
};
use crate::services::lifecycle::AppointmentLifecycleService;

pub struct ReconciliationService {
    supabase: Arc<SupabaseClient>,
    lifecycle_service: AppointmentLifecycleService,
    grace_period: ChronoDuration,
}

impl ReconciliationService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            lifecycle_service: AppointmentLifecycleService::new(),
            grace_period: ChronoDuration::minutes(config.payment_grace_minutes),
        }
    }

    /// Run one sweep cycle: select candidates, then cancel each one in its
    /// own conditional transaction. A failure on one candidate is logged and
    /// skipped; the candidate comes back next cycle.
    pub async fn run_once(&self) -> Result<SweepReport, AppointmentError> {
        let now = Utc::now();
        let candidates = self.find_candidates(now).await?;

        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };

        for candidate in candidates {
            let appointment_id = candidate.appointment.id;
            match self.cancel_if_unpaid(appointment_id).await {
                Ok(outcome) if outcome.cancelled => {
                    info!("Cancelled unpaid appointment {}", appointment_id);
                    report.cancelled += 1;
                }
                Ok(_) => {
                    // Payment settled (or the appointment went terminal)
                    // between selection and cancellation
                    debug!("Appointment {} no longer eligible, skipping", appointment_id);
                    report.skipped += 1;
                }
                Err(e) => {
                    error!("Failed to cancel appointment {} at {}: {}", appointment_id, now, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Sweep cycle complete: {} examined, {} cancelled, {} skipped, {} failed",
            report.examined, report.cancelled, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Select appointments whose payment is still unpaid past the grace
    /// period. Selection is advisory only; eligibility is re-checked inside
    /// the cancellation transaction.
    async fn find_candidates(&self, now: DateTime<Utc>) -> Result<Vec<UnpaidCandidate>, AppointmentError> {
        let cutoff = now - self.grace_period;
        let path = format!(
            "/rest/v1/payments?select=*,appointment:appointments(*)&status=eq.unpaid&created_at=lt.{}",
            urlencoding::encode(&cutoff.to_rfc3339()),
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            None,
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let mut candidates: Vec<UnpaidCandidate> = result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<UnpaidCandidate>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse candidates: {}", e)))?;

        candidates.retain(|c| {
            c.appointment.status == AppointmentStatus::Scheduled
                && self.lifecycle_service.is_payment_overdue(
                    &c.payment.status,
                    c.appointment.created_at,
                    self.grace_period,
                    now,
                )
        });

        debug!("Found {} unpaid candidates past grace period", candidates.len());
        Ok(candidates)
    }

    /// Atomic conditional cancellation. The server-side function re-checks
    /// `payments.status = 'unpaid'` inside the transaction before writing, so
    /// a payment that was confirmed after selection wins the race and the
    /// appointment is left untouched.
    pub async fn cancel_if_unpaid(&self, appointment_id: Uuid) -> Result<CancellationOutcome, AppointmentError> {
        self.supabase.rpc(
            "cancel_appointment_if_unpaid",
            None,
            json!({ "p_appointment_id": appointment_id }),
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))
    }
}
