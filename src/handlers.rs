use crate::crm_client::LeadGroupIds;
use crate::dispatch::TaskRunner;
use crate::errors::{AppError, ResultExt};
use crate::lender_directory::LenderDirectory;
use crate::models::{ClaimAccepted, ClaimLeadSummary, ClaimSubmission};
use crate::reconciliation::ReconciliationEngine;
use crate::repository::ClaimRepository;
use crate::validation::validate_claim;
use crate::webhook_handler::{self, WebhookAuth};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Durable claim storage.
    pub claims: Arc<dyn ClaimRepository>,
    /// Background lead dispatch.
    pub runner: TaskRunner,
    pub directory: Arc<LenderDirectory>,
    pub reconciler: Arc<ReconciliationEngine>,
    /// CRM lead-group ids, used to resolve inbound webhook events.
    pub groups: LeadGroupIds,
    pub webhook_auth: WebhookAuth,
    /// Bearer token for admin endpoints. Admin endpoints are closed when unset.
    pub admin_token: Option<String>,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-flg-claims-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/claims
///
/// Validates and persists a claim, then hands it to the dispatcher. Returns
/// once the claim is stored; leads are created in the background.
pub async fn submit_claim(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<ClaimAccepted>), AppError> {
    let claim: ClaimSubmission = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid claim body: {}", e)))?;
    let claim = validate_claim(claim)?;
    tracing::info!(
        "POST /claims - {} found, {} manual accounts",
        claim.found_lenders.len(),
        claim.additional_lenders.len()
    );

    let claim_id = state
        .claims
        .insert_claim(&claim)
        .await
        .context("persisting claim")?;

    let dispatch = state.runner.submit(claim_id, claim);
    tracing::info!("Claim {} accepted ({:?} dispatch)", claim_id, dispatch);

    Ok((
        StatusCode::ACCEPTED,
        Json(ClaimAccepted {
            success: true,
            claim_id,
            dispatch,
        }),
    ))
}

/// GET /api/v1/claims/:id/summary
pub async fn get_claim_summary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(claim_id): Path<Uuid>,
) -> Result<Json<ClaimLeadSummary>, AppError> {
    require_admin(&state, &headers)?;

    let summary = state
        .claims
        .load_summary(claim_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No summary for claim {}", claim_id)))?;

    Ok(Json(summary))
}

/// POST /api/v1/admin/lenders/refresh
///
/// Drops the cached lender snapshot and reloads it.
pub async fn refresh_lenders(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    require_admin(&state, &headers)?;

    state.directory.invalidate().await;
    let snapshot = state.directory.snapshot().await;

    Ok(Json(json!({
        "success": true,
        "lenders": snapshot.lenders.len(),
        "fingerprint": snapshot.fingerprint,
        "loaded_at": snapshot.loaded_at,
    })))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(ref expected) = state.admin_token else {
        return Err(AppError::Unauthorized(
            "Admin endpoints are disabled".to_string(),
        ));
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("X-Admin-Token").and_then(|v| v.to_str().ok()))
        .ok_or_else(|| AppError::Unauthorized("Missing admin token".to_string()))?;

    if provided.trim() != expected {
        return Err(AppError::Unauthorized("Invalid admin token".to_string()));
    }
    Ok(())
}

/// Builds the HTTP router.
///
/// With `rate_limited`, everything except `/health` is limited per client IP.
/// The limiter needs the peer address, so the router must then be served with
/// connect info.
pub fn router(state: Arc<AppState>, rate_limited: bool) -> Router {
    let mut api = Router::new()
        .route("/api/v1/claims", post(submit_claim))
        .route("/api/v1/claims/:id/summary", get(get_claim_summary))
        .route("/api/v1/admin/lenders/refresh", post(refresh_lenders))
        .route(
            "/api/v1/webhooks/flg/status",
            post(webhook_handler::flg_status_webhook),
        )
        // Request size limit: 1MB max payload
        .layer(RequestBodyLimitLayer::new(1024 * 1024));

    if rate_limited {
        // 10 requests/second per IP, burst of 20
        match GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
        {
            Some(config) => {
                api = api.layer(ServiceBuilder::new().layer(GovernorLayer {
                    config: Arc::new(config),
                }));
            }
            None => tracing::warn!("Invalid rate limiter configuration, serving without it"),
        }
    }

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
