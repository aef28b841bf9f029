// libs/appointment-cell/src/services/booking.rs
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;
use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentStatus, BookAppointmentRequest, CancelAppointmentRequest,
    AppointmentError, Payment,
};
use crate::services::lifecycle::AppointmentLifecycleService;

/// Upper bound on appointment length, used to window the overlap query.
const MAX_APPOINTMENT_MINUTES: i64 = 240;

pub struct AppointmentBookingService {
    supabase: Arc<SupabaseClient>,
    lifecycle_service: AppointmentLifecycleService,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            lifecycle_service: AppointmentLifecycleService::new(),
        }
    }

    /// Book an appointment. The appointment and its unpaid payment record are
    /// created together by a server-side function so both exist or neither
    /// does.
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        info!("Booking appointment for patient {} with doctor {}",
              request.patient_id, request.doctor_id);

        self.lifecycle_service.validate_appointment_timing(
            request.scheduled_start_time,
            request.duration_minutes,
            Utc::now(),
        )?;

        if self.slot_is_taken(&request, auth_token).await? {
            warn!("Booking rejected, slot already taken for doctor {} at {}",
                  request.doctor_id, request.scheduled_start_time);
            return Err(AppointmentError::SlotNotAvailable);
        }

        let appointment: Appointment = self.supabase.rpc(
            "book_appointment_with_payment",
            Some(auth_token),
            json!({
                "p_patient_id": request.patient_id,
                "p_doctor_id": request.doctor_id,
                "p_scheduled_start_time": request.scheduled_start_time.to_rfc3339(),
                "p_duration_minutes": request.duration_minutes,
                "p_amount_cents": request.amount_cents,
            }),
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        info!("Appointment {} booked, payment pending", appointment.id);
        Ok(appointment)
    }

    /// Overlap check against the doctor's existing appointments. Cancelled
    /// appointments do not occupy their slot, so the query filters on
    /// slot-blocking statuses and the overlap test runs on what remains.
    async fn slot_is_taken(
        &self,
        request: &BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<bool, AppointmentError> {
        let requested_end = request.scheduled_start_time
            + ChronoDuration::minutes(request.duration_minutes as i64);
        let window_start = request.scheduled_start_time
            - ChronoDuration::minutes(MAX_APPOINTMENT_MINUTES);

        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&status=neq.cancelled&scheduled_start_time=gte.{}&scheduled_start_time=lt.{}",
            request.doctor_id,
            urlencoding::encode(&window_start.to_rfc3339()),
            urlencoding::encode(&requested_end.to_rfc3339()),
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let nearby: Vec<Appointment> = result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointments: {}", e)))?;

        Ok(nearby.iter().any(|apt| {
            apt.status.blocks_slot()
                && apt.scheduled_start_time < requested_end
                && apt.scheduled_end_time() > request.scheduled_start_time
        }))
    }

    /// Get appointment by ID
    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::NotFound);
        }

        let appointment: Appointment = serde_json::from_value(result[0].clone())
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e)))?;

        Ok(appointment)
    }

    /// List a patient's appointments, newest first.
    pub async fn get_patient_appointments(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        debug!("Fetching appointments for patient: {}", patient_id);

        let path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&order=scheduled_start_time.desc",
            patient_id
        );
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointments: {}", e)))
    }

    /// Cancel an appointment on behalf of a patient, doctor, or admin. The
    /// status write is conditional on the appointment still being scheduled,
    /// so two concurrent cancellations cannot both report success.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Cancelling appointment: {}", appointment_id);

        let current = self.get_appointment(appointment_id, auth_token).await?;
        self.lifecycle_service.validate_status_transition(
            &current.status,
            &AppointmentStatus::Cancelled,
        )?;

        let cancellation_note = format!("Cancelled by {:?}: {}", request.cancelled_by, request.reason);

        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.{}",
            appointment_id,
            AppointmentStatus::Scheduled,
        );
        let updated: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(json!({
                "status": AppointmentStatus::Cancelled.to_string(),
                "cancellation_reason": cancellation_note,
                "updated_at": Utc::now().to_rfc3339(),
            })),
            representation_headers(),
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if updated.is_empty() {
            // Lost the race to another writer between read and update
            return Err(AppointmentError::InvalidStatusTransition(AppointmentStatus::Cancelled));
        }

        let cancelled: Appointment = serde_json::from_value(updated[0].clone())
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e)))?;

        // Void the payment if it never completed; a paid payment is left for
        // the refund process.
        self.void_unpaid_payment(appointment_id, auth_token).await?;

        info!("Appointment {} cancelled", appointment_id);
        Ok(cancelled)
    }

    async fn void_unpaid_payment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let path = format!(
            "/rest/v1/payments?appointment_id=eq.{}&status=eq.unpaid",
            appointment_id
        );
        let _: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(json!({
                "status": "failed",
                "updated_at": Utc::now().to_rfc3339(),
            })),
            representation_headers(),
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Payment-confirmation path, invoked by the payment webhook after the
    /// gateway has verified the event. Conditional update: only an unpaid
    /// payment can become paid, so a payment the sweep already voided stays
    /// failed and the caller learns nothing was confirmed.
    pub async fn confirm_payment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Payment>, AppointmentError> {
        debug!("Confirming payment for appointment: {}", appointment_id);

        let path = format!(
            "/rest/v1/payments?appointment_id=eq.{}&status=eq.unpaid",
            appointment_id
        );
        let updated: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(json!({
                "status": "paid",
                "updated_at": Utc::now().to_rfc3339(),
            })),
            representation_headers(),
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        match updated.into_iter().next() {
            Some(row) => {
                let payment: Payment = serde_json::from_value(row)
                    .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse payment: {}", e)))?;
                info!("Payment {} confirmed for appointment {}", payment.id, appointment_id);
                Ok(Some(payment))
            }
            None => {
                debug!("No unpaid payment to confirm for appointment {}", appointment_id);
                Ok(None)
            }
        }
    }
}

fn representation_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}
