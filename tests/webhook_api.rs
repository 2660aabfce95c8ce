/// HTTP-level tests: the router driven with `oneshot`, backed by in-memory
/// storage and a fake CRM.
mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bigdecimal::BigDecimal;
use common::{claim, directory, fast_retry, groups, lenders, pipeline, FakeCrm};
use rust_flg_claims_api::dispatch::{ClaimProcessor, TaskRunner};
use rust_flg_claims_api::handlers::{router, AppState};
use rust_flg_claims_api::models::{LeadGroupKind, RuleAction, StatusRule, WebhookOutcome};
use rust_flg_claims_api::notifier::LeadNotifier;
use rust_flg_claims_api::reconciliation::ReconciliationEngine;
use rust_flg_claims_api::repository::MemoryStorage;
use rust_flg_claims_api::webhook_handler::WebhookAuth;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "admin-secret";
const WEBHOOK_TOKEN: &str = "hook-secret";

fn rule(
    id: i64,
    lead_group: LeadGroupKind,
    status: &str,
    introducer: Option<&str>,
    priority: i32,
    action: RuleAction,
) -> StatusRule {
    StatusRule {
        id,
        lead_group,
        status_received: status.to_string(),
        introducer_received: introducer.map(str::to_string),
        data35_received: None,
        priority,
        action,
    }
}

fn rules() -> Vec<StatusRule> {
    vec![
        rule(
            1,
            LeadGroupKind::Dca,
            "Withdrawn",
            Some("FA Eligible"),
            10,
            RuleAction::ChangeReference {
                new_introducer: "FA Non Eligible".to_string(),
                new_cost: Some(BigDecimal::from(0)),
            },
        ),
        rule(
            2,
            LeadGroupKind::Irl,
            "Accepted",
            None,
            5,
            RuleAction::UpdateStatus {
                new_status: "Signed".to_string(),
            },
        ),
        rule(
            3,
            LeadGroupKind::Dca,
            "Callback",
            None,
            1,
            RuleAction::UpdateCost {
                new_cost: BigDecimal::from(25),
            },
        ),
        rule(
            4,
            LeadGroupKind::Dca,
            "Callback",
            None,
            1,
            RuleAction::UpdateStatus {
                new_status: "Call Back".to_string(),
            },
        ),
    ]
}

struct TestApp {
    app: Router,
    storage: Arc<MemoryStorage>,
    crm: Arc<FakeCrm>,
}

fn test_app(crm: FakeCrm) -> TestApp {
    let storage = Arc::new(
        MemoryStorage::new()
            .with_lenders(lenders())
            .with_rules(rules()),
    );
    let crm = Arc::new(crm);

    let processor = Arc::new(ClaimProcessor::new(
        pipeline(&storage),
        crm.clone(),
        storage.clone(),
        LeadNotifier::disabled(),
        fast_retry(),
    ));
    let runner = TaskRunner::start(processor, 1, 8);
    let reconciler = Arc::new(ReconciliationEngine::new(
        storage.clone(),
        storage.clone(),
        crm.clone(),
        fast_retry(),
    ));

    let state = Arc::new(AppState {
        claims: storage.clone(),
        runner,
        directory: directory(&storage),
        reconciler,
        groups: groups(),
        webhook_auth: WebhookAuth {
            secret: Some(WEBHOOK_TOKEN.to_string()),
            hmac: None,
        },
        admin_token: Some(ADMIN_TOKEN.to_string()),
    });

    TestApp {
        app: router(state, false),
        storage,
        crm,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn webhook(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/webhooks/flg/status")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Webhook-Token", WEBHOOK_TOKEN)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let t = test_app(FakeCrm::new());
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&t.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_submit_claim_then_read_summary() {
    let t = test_app(FakeCrm::new());
    let submission = serde_json::to_value(claim(
        &[("Santander", "2015-03-01")],
        &[("Moneybarn", "")],
        true,
        true,
    ))
    .unwrap();

    let (status, body) = send(&t.app, post_json("/api/v1/claims", &submission)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
    assert_eq!(body["dispatch"], "async");
    let claim_id: uuid::Uuid = serde_json::from_value(body["claim_id"].clone()).unwrap();

    let mut dispatched = false;
    for _ in 0..200 {
        if t.storage.is_dispatched(claim_id) {
            dispatched = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(dispatched);

    let request = Request::builder()
        .uri(format!("/api/v1/claims/{}/summary", claim_id))
        .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
        .body(Body::empty())
        .unwrap();
    let (status, summary) = send(&t.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total_leads"], 3);
    assert_eq!(summary["dca_leads"], 2);
    assert_eq!(summary["irl_leads"], 1);
    assert_eq!(t.crm.created().len(), 3);
}

#[tokio::test]
async fn test_submit_claim_missing_fields() {
    let t = test_app(FakeCrm::new());
    let (status, body) = send(
        &t.app,
        post_json("/api/v1/claims", &json!({"firstName": "Jane"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap_or_default()
        .contains("lastName, email"));
}

#[tokio::test]
async fn test_submit_claim_unparseable_body_is_validation_error() {
    let t = test_app(FakeCrm::new());
    let (status, body) = send(
        &t.app,
        post_json(
            "/api/v1/claims",
            &json!({
                "firstName": "Jane",
                "lastName": "Doe",
                "email": "jane@example.com",
                "foundLenders": [{"lenderName": "Santander", "startDate": "sometime in 2015"}]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error = body["error"].as_str().unwrap_or_default();
    assert!(error.contains("Invalid claim body"));
    assert!(error.contains("sometime in 2015"));

    let (status, _) = send(
        &t.app,
        Request::builder()
            .method("POST")
            .uri("/api/v1/claims")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_summary_requires_admin_token() {
    let t = test_app(FakeCrm::new());
    let request = Request::builder()
        .uri(format!("/api/v1/claims/{}/summary", uuid::Uuid::new_v4()))
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_summary_not_found() {
    let t = test_app(FakeCrm::new());
    let request = Request::builder()
        .uri(format!("/api/v1/claims/{}/summary", uuid::Uuid::new_v4()))
        .header("X-Admin-Token", ADMIN_TOKEN)
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_refresh_lenders() {
    let t = test_app(FakeCrm::new());
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/admin/lenders/refresh")
        .header("X-Admin-Token", ADMIN_TOKEN)
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&t.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lenders"], 5);
    assert_eq!(body["fingerprint"].as_str().map(str::len), Some(64));
}

#[tokio::test]
async fn test_webhook_applies_change_reference() {
    let t = test_app(FakeCrm::new());
    let (status, body) = send(
        &t.app,
        webhook(&json!({
            "id": 774411,
            "leadgroup": "1001",
            "status": "Withdrawn",
            "introducer": "FA Eligible"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "applied");
    assert_eq!(body["rule_id"], 1);
    assert_eq!(body["action"], "ChangeReference");

    let updates = t.crm.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "774411");
    assert_eq!(updates[0].1.introducer.as_deref(), Some("FA Non Eligible"));
    assert_eq!(updates[0].1.cost, Some(BigDecimal::from(0)));

    let events = t.storage.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, WebhookOutcome::Applied);
    assert_eq!(events[0].rule_id, Some(1));
}

#[tokio::test]
async fn test_webhook_form_body_ignores_irl_data35() {
    let t = test_app(FakeCrm::new());
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/webhooks/flg/status?token={}", WEBHOOK_TOKEN))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("leadid=9001&leadgroup=1002&status=Accepted&data35=ignored"))
        .unwrap();

    let (status, body) = send(&t.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rule_id"], 2);
    assert_eq!(t.crm.updates()[0].1.status.as_deref(), Some("Signed"));
}

#[tokio::test]
async fn test_webhook_introducer_mismatch_is_no_mapping() {
    let t = test_app(FakeCrm::new());
    let (status, body) = send(
        &t.app,
        webhook(&json!({
            "id": "774411",
            "leadgroup": "1001",
            "status": "Withdrawn",
            "introducer": "FA Unknown"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "no_mapping");
    assert!(t.crm.updates().is_empty());
    assert_eq!(t.storage.events()[0].outcome, WebhookOutcome::NoMapping);
}

#[tokio::test]
async fn test_webhook_unknown_lead_group_is_audited() {
    let t = test_app(FakeCrm::new());
    let (status, _) = send(
        &t.app,
        webhook(&json!({"id": "1", "leadgroup": "9999", "status": "Withdrawn"})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let events = t.storage.events();
    assert_eq!(events[0].outcome, WebhookOutcome::NoMapping);
    assert_eq!(events[0].lead_group.as_deref(), Some("9999"));
}

#[tokio::test]
async fn test_webhook_equal_priority_is_flagged_ambiguous() {
    let t = test_app(FakeCrm::new());
    let (status, body) = send(
        &t.app,
        webhook(&json!({"id": "55", "leadgroup": "1001", "status": "Callback"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rule_id"], 3);
    assert_eq!(body["ambiguous"], true);
    assert_eq!(
        t.storage.events()[0].detail.as_deref(),
        Some("ambiguous rule configuration")
    );
}

#[tokio::test]
async fn test_webhook_action_failure_returns_bad_gateway() {
    let t = test_app(FakeCrm::flaky(10));
    let (status, _) = send(
        &t.app,
        webhook(&json!({"id": "55", "leadgroup": "1001", "status": "Callback"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(t.crm.calls(), 3);
    assert_eq!(t.storage.events()[0].outcome, WebhookOutcome::ActionFailed);
}

#[tokio::test]
async fn test_webhook_rejects_bad_token_and_bad_body() {
    let t = test_app(FakeCrm::new());

    let unauthorized = Request::builder()
        .method("POST")
        .uri("/api/v1/webhooks/flg/status")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Webhook-Token", "nope")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = send(&t.app, unauthorized).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(t.storage.events().is_empty());

    let malformed = Request::builder()
        .method("POST")
        .uri("/api/v1/webhooks/flg/status")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Webhook-Token", WEBHOOK_TOKEN)
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&t.app, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(t.storage.events()[0].outcome, WebhookOutcome::Rejected);
}
