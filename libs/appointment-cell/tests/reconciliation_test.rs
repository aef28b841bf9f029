use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::services::reconciliation::ReconciliationService;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn service_for(mock_server: &MockServer) -> ReconciliationService {
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    ReconciliationService::new(&config)
}

async fn mock_candidates(mock_server: &MockServer, candidates: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .and(query_param("status", "eq.unpaid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidates))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn sweep_cancels_overdue_unpaid_appointments() {
    let mock_server = MockServer::start().await;
    let stale = Utc::now() - Duration::minutes(45);
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    mock_candidates(&mock_server, json!([
        MockSupabaseResponses::unpaid_candidate_response(first, stale),
        MockSupabaseResponses::unpaid_candidate_response(second, stale),
    ])).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/cancel_appointment_if_unpaid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cancelled": true })))
        .expect(2)
        .mount(&mock_server)
        .await;

    let report = service_for(&mock_server).run_once().await.unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.cancelled, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn sweep_skips_appointments_inside_grace_window() {
    let mock_server = MockServer::start().await;
    let overdue = Uuid::new_v4();

    // One candidate 31 minutes old, one 29 minutes old; only the first is
    // past the 30-minute grace period
    mock_candidates(&mock_server, json!([
        MockSupabaseResponses::unpaid_candidate_response(overdue, Utc::now() - Duration::minutes(31)),
        MockSupabaseResponses::unpaid_candidate_response(Uuid::new_v4(), Utc::now() - Duration::minutes(29)),
    ])).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/cancel_appointment_if_unpaid"))
        .and(body_partial_json(json!({ "p_appointment_id": overdue })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cancelled": true })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let report = service_for(&mock_server).run_once().await.unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(report.cancelled, 1);
}

#[tokio::test]
async fn payment_confirmed_mid_sweep_wins_the_race() {
    let mock_server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();

    mock_candidates(&mock_server, json!([
        MockSupabaseResponses::unpaid_candidate_response(appointment_id, Utc::now() - Duration::hours(1)),
    ])).await;

    // The conditional transaction found the payment already paid and wrote
    // nothing
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/cancel_appointment_if_unpaid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cancelled": false })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let report = service_for(&mock_server).run_once().await.unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(report.cancelled, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn one_failed_candidate_does_not_stop_the_rest() {
    let mock_server = MockServer::start().await;
    let stale = Utc::now() - Duration::hours(2);
    let failing = Uuid::new_v4();
    let healthy = Uuid::new_v4();

    mock_candidates(&mock_server, json!([
        MockSupabaseResponses::unpaid_candidate_response(failing, stale),
        MockSupabaseResponses::unpaid_candidate_response(healthy, stale),
    ])).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/cancel_appointment_if_unpaid"))
        .and(body_partial_json(json!({ "p_appointment_id": failing })))
        .respond_with(ResponseTemplate::new(500).set_body_string("connection lost"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/cancel_appointment_if_unpaid"))
        .and(body_partial_json(json!({ "p_appointment_id": healthy })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cancelled": true })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let report = service_for(&mock_server).run_once().await.unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn sweep_is_idempotent_with_no_candidates() {
    let mock_server = MockServer::start().await;

    mock_candidates(&mock_server, json!([])).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/cancel_appointment_if_unpaid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cancelled": true })))
        .expect(0)
        .mount(&mock_server)
        .await;

    let service = service_for(&mock_server);

    // Two cycles over unchanged state: no writes either time
    for _ in 0..2 {
        let report = service.run_once().await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(report.cancelled, 0);
    }
}

#[tokio::test]
async fn already_terminal_appointments_are_not_candidates() {
    let mock_server = MockServer::start().await;
    let stale = Utc::now() - Duration::hours(1);

    let mut candidate = MockSupabaseResponses::unpaid_candidate_response(Uuid::new_v4(), stale);
    candidate["appointment"]["status"] = json!("cancelled");

    mock_candidates(&mock_server, json!([candidate])).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/cancel_appointment_if_unpaid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cancelled": true })))
        .expect(0)
        .mount(&mock_server)
        .await;

    let report = service_for(&mock_server).run_once().await.unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn selection_failure_surfaces_as_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(500).set_body_string("db timeout"))
        .mount(&mock_server)
        .await;

    let result = service_for(&mock_server).run_once().await;
    assert!(result.is_err());
}
