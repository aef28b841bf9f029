// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use shared_config::AppConfig;

use crate::handlers;

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(handlers::book_appointment))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/payment/confirm", post(handlers::confirm_payment))
        .route("/patients/{patient_id}", get(handlers::get_patient_appointments))
        .route("/sweep/run", post(handlers::run_sweep)) // Admin only
        .with_state(state)
}
