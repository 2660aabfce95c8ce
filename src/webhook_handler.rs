use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::WebhookOutcome;
use crate::reconciliation::ReconcileOutcome;
use crate::security::{HmacValidator, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::webhook_models::{EventResolution, StatusEvent, StatusWebhookPayload, WebhookResponse};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Credentials accepted on the status webhook.
#[derive(Clone, Default)]
pub struct WebhookAuth {
    /// Shared secret in `X-Webhook-Token` or the `token` query parameter.
    pub secret: Option<String>,
    pub hmac: Option<HmacValidator>,
}

/// FLG Status Webhook Handler
///
/// Receives lead status changes from FLG, maps them through the status rule
/// table and applies the resulting mutation to the lead.
///
/// Accepts JSON or form-encoded bodies. Every event is written to the audit
/// log, whatever the outcome.
pub async fn flg_status_webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), AppError> {
    tracing::info!("Received FLG status webhook");

    validate_webhook_auth(&state.webhook_auth, &headers, &query, &body)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let (raw, payload) = match StatusWebhookPayload::parse(content_type, &body) {
        Ok(parsed) => parsed,
        Err(e) => {
            let raw = Value::String(String::from_utf8_lossy(&body).into_owned());
            state
                .reconciler
                .record(None, &raw, None, WebhookOutcome::Rejected, Some(e.to_string()))
                .await;
            return Err(e);
        }
    };

    let event = match StatusEvent::resolve(&payload, &state.groups) {
        Ok(EventResolution::Event(event)) => event,
        Ok(EventResolution::UnknownLeadGroup(group)) => {
            tracing::info!("Ignoring status webhook for unrouted lead group {}", group);
            state
                .reconciler
                .record(
                    None,
                    &raw,
                    None,
                    WebhookOutcome::NoMapping,
                    Some(format!("unknown lead group {}", group)),
                )
                .await;
            return Ok(no_mapping());
        }
        Err(e) => {
            state
                .reconciler
                .record(None, &raw, None, WebhookOutcome::Rejected, Some(e.to_string()))
                .await;
            return Err(e);
        }
    };

    match state.reconciler.reconcile(&event, &raw).await? {
        ReconcileOutcome::Applied {
            rule_id,
            action,
            ambiguous,
        } => Ok((
            StatusCode::OK,
            Json(WebhookResponse {
                status: "applied".to_string(),
                rule_id: Some(rule_id),
                action: Some(action.to_string()),
                ambiguous,
            }),
        )),
        ReconcileOutcome::NoMapping => Ok(no_mapping()),
    }
}

fn no_mapping() -> (StatusCode, Json<WebhookResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(WebhookResponse {
            status: "no_mapping".to_string(),
            rule_id: None,
            action: None,
            ambiguous: false,
        }),
    )
}

/// Checks the shared secret and, when configured, the HMAC signature.
fn validate_webhook_auth(
    auth: &WebhookAuth,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    body: &[u8],
) -> Result<(), AppError> {
    if let Some(ref expected_secret) = auth.secret {
        let token = headers
            .get("X-Webhook-Token")
            .and_then(|v| v.to_str().ok())
            .or_else(|| query.get("token").map(String::as_str))
            .ok_or_else(|| AppError::Unauthorized("Missing webhook token".to_string()))?;

        if !constant_time_compare(token, expected_secret) {
            tracing::warn!("Invalid webhook token received");
            return Err(AppError::Unauthorized("Invalid webhook token".to_string()));
        }
    }

    if let Some(ref validator) = auth.hmac {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing signature header".to_string()))?;
        let timestamp = headers
            .get(TIMESTAMP_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing timestamp header".to_string()))?;

        validator
            .verify(timestamp, body, signature, Utc::now())
            .map_err(AppError::Unauthorized)?;
    }

    Ok(())
}

/// Constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
