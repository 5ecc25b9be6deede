//! HTTP transports against mock assessee and judge servers.

use std::time::Duration;

use assess_core::client::ReportedStatus;
use assess_core::judge::{KeyPointsPayload, KeyPointsRequest, OutcomeRequest};
use assess_core::{
    AssesseeClient, AssesseeEndpoint, AssesseeRequest, ExecutionFailure, HttpAssesseeClient,
    HttpJudgeService, JudgeConfig, JudgeError, JudgeService, Task,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint(server: &MockServer) -> AssesseeEndpoint {
    AssesseeEndpoint::new("alpha", format!("{}/", server.uri()))
}

fn request() -> AssesseeRequest {
    AssesseeRequest::from(&Task::new("flight_search_1", "Find the cheapest flight"))
}

fn judge_for(server: &MockServer, api_key: Option<&str>) -> HttpJudgeService {
    HttpJudgeService::new(&JudgeConfig {
        base_url: server.uri(),
        model: "judge-test".into(),
        timeout_secs: 5,
        api_key: api_key.map(str::to_string),
    })
    .unwrap()
}

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_execute_parses_completed_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(body_partial_json(json!({"task_id": "flight_search_1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "action_log": [{
                "type": "click",
                "description": "opened search",
                "timestamp": "2026-01-01T00:00:00Z"
            }],
            "evidence_frames": [{"index": 0, "blob_ref": "blob://0"}],
            "final_response": "Cheapest is $199"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpAssesseeClient::new().unwrap();
    let response = client
        .execute(&endpoint(&server), &request(), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(response.status, ReportedStatus::Completed);
    assert_eq!(response.action_log[0].kind, "click");
    assert_eq!(response.evidence_frames.len(), 1);
    assert_eq!(response.final_response.as_deref(), Some("Cheapest is $199"));
}

#[tokio::test]
async fn test_execute_gateway_error_is_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = HttpAssesseeClient::new().unwrap();
    let err = client
        .execute(&endpoint(&server), &request(), TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionFailure::Unreachable(_)));
}

#[tokio::test]
async fn test_execute_server_error_is_execution_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(500).set_body_string("agent crashed"))
        .mount(&server)
        .await;

    let client = HttpAssesseeClient::new().unwrap();
    let err = client
        .execute(&endpoint(&server), &request(), TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionFailure::ExecutionError(_)));
    assert!(err.detail().contains("agent crashed"));
}

#[tokio::test]
async fn test_execute_malformed_body_is_execution_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"status\": \"compl"))
        .mount(&server)
        .await;

    let client = HttpAssesseeClient::new().unwrap();
    let err = client
        .execute(&endpoint(&server), &request(), TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionFailure::ExecutionError(_)));
}

#[tokio::test]
async fn test_execute_slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "completed"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = HttpAssesseeClient::new().unwrap();
    let err = client
        .execute(&endpoint(&server), &request(), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionFailure::TimedOut(_)));
}

#[tokio::test]
async fn test_execute_connection_refused_is_unreachable() {
    let client = HttpAssesseeClient::new().unwrap();
    let endpoint = AssesseeEndpoint::new("ghost", "http://127.0.0.1:1");
    let err = client.execute(&endpoint, &request(), TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ExecutionFailure::Unreachable(_)));
}

#[tokio::test]
async fn test_probe_reads_health_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"healthy": true})))
        .mount(&server)
        .await;

    let client = HttpAssesseeClient::new().unwrap();
    assert!(client.probe(&endpoint(&server)).await.unwrap());
}

#[tokio::test]
async fn test_probe_error_status_is_not_healthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = HttpAssesseeClient::new().unwrap();
    assert!(!client.probe(&endpoint(&server)).await.unwrap());
}

#[tokio::test]
async fn test_judge_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/key-points"))
        .and(header("authorization", "Bearer s3cret"))
        .and(body_partial_json(json!({"model": "judge-test"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"key_points": ["Search results are shown"]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let judge = judge_for(&server, Some("s3cret"));
    let response = judge
        .extract_key_points(&KeyPointsRequest {
            description: "Find the cheapest flight".into(),
            model: "judge-test".into(),
        })
        .await
        .unwrap();
    assert_eq!(
        response.key_points,
        KeyPointsPayload::List(vec!["Search results are shown".into()])
    );
}

#[tokio::test]
async fn test_judge_outcome_score() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/judge"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"score": 4.0, "rationale": "all key points met"})),
        )
        .mount(&server)
        .await;

    let judge = judge_for(&server, None);
    let response = judge
        .judge_outcome(&OutcomeRequest {
            description: "Find the cheapest flight".into(),
            key_points: vec!["Search results are shown".into()],
            selected_evidence: vec![],
            action_log: vec![],
            model: "judge-test".into(),
        })
        .await
        .unwrap();
    assert_eq!(response.score, Some(4.0));
    assert_eq!(response.label, None);
    assert_eq!(response.rationale, "all key points met");
}

#[tokio::test]
async fn test_judge_error_status_is_service_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/key-points"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let judge = judge_for(&server, None);
    let err = judge
        .extract_key_points(&KeyPointsRequest {
            description: "d".into(),
            model: "judge-test".into(),
        })
        .await
        .unwrap_err();
    match err {
        JudgeError::Service(detail) => assert!(detail.contains("429")),
        other => panic!("expected service error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_judge_unparseable_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/judge"))
        .respond_with(ResponseTemplate::new(200).set_body_string("I think it succeeded"))
        .mount(&server)
        .await;

    let judge = judge_for(&server, None);
    let err = judge
        .judge_outcome(&OutcomeRequest {
            description: "d".into(),
            key_points: vec![],
            selected_evidence: vec![],
            action_log: vec![],
            model: "judge-test".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, JudgeError::Malformed(_)));
}
