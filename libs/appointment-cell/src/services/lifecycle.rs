// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus, PaymentStatus};

/// Owns appointment state transitions and the payment-status coupling.
/// Pure rules only; the store round-trips live in the booking and
/// reconciliation services.
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: &AppointmentStatus,
        new_status: &AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {:?} to {:?}", current_status, new_status);

        let valid_transitions = self.get_valid_transitions(current_status);

        if !valid_transitions.contains(new_status) {
            warn!("Invalid status transition attempted: {:?} -> {:?}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition(current_status.clone()));
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: &AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed => vec![],
            AppointmentStatus::Cancelled => vec![],
        }
    }

    /// Selection predicate for the reconciliation sweep: the payment is still
    /// unpaid and the grace period since booking has elapsed.
    pub fn is_payment_overdue(
        &self,
        payment_status: &PaymentStatus,
        appointment_created_at: DateTime<Utc>,
        grace_period: Duration,
        current_time: DateTime<Utc>,
    ) -> bool {
        *payment_status == PaymentStatus::Unpaid
            && current_time - appointment_created_at > grace_period
    }

    /// Validate appointment timing constraints at booking time.
    pub fn validate_appointment_timing(
        &self,
        scheduled_start_time: DateTime<Utc>,
        duration_minutes: i32,
        current_time: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        if scheduled_start_time <= current_time {
            return Err(AppointmentError::InvalidTime(
                "Appointment must be scheduled for a future time".to_string()
            ));
        }

        if duration_minutes <= 0 {
            return Err(AppointmentError::InvalidTime(
                "Appointment duration must be positive".to_string()
            ));
        }

        Ok(())
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
