use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub payment_grace_minutes: i64,
    pub sweep_interval_seconds: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            payment_grace_minutes: 30,
            sweep_interval_seconds: 60,
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            payment_grace_minutes: self.payment_grace_minutes,
            sweep_interval_seconds: self.sweep_interval_seconds,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Canned Supabase response bodies for wiremock-backed tests.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn appointment_response(
        appointment_id: Uuid,
        patient_id: Uuid,
        doctor_id: Uuid,
        status: &str,
        created_at: DateTime<Utc>,
    ) -> Value {
        json!({
            "id": appointment_id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "scheduled_start_time": (created_at + Duration::days(1)).to_rfc3339(),
            "duration_minutes": 30,
            "status": status,
            "cancellation_reason": null,
            "created_at": created_at.to_rfc3339(),
            "updated_at": created_at.to_rfc3339()
        })
    }

    pub fn payment_response(
        payment_id: Uuid,
        appointment_id: Uuid,
        status: &str,
        created_at: DateTime<Utc>,
    ) -> Value {
        json!({
            "id": payment_id,
            "appointment_id": appointment_id,
            "amount_cents": 5000,
            "status": status,
            "created_at": created_at.to_rfc3339(),
            "updated_at": created_at.to_rfc3339()
        })
    }

    /// A payment row with its appointment embedded, as returned by the
    /// candidate-selection query.
    pub fn unpaid_candidate_response(appointment_id: Uuid, created_at: DateTime<Utc>) -> Value {
        let mut payment = Self::payment_response(Uuid::new_v4(), appointment_id, "unpaid", created_at);
        payment["appointment"] = Self::appointment_response(
            appointment_id,
            Uuid::new_v4(),
            Uuid::new_v4(),
            "scheduled",
            created_at,
        );
        payment
    }
}
