use rust_flg_claims_api::config::Config;
use rust_flg_claims_api::crm_client::{CrmApi, FlgClient, LeadGroupIds};
use rust_flg_claims_api::db::Database;
use rust_flg_claims_api::db_storage::PgStorage;
use rust_flg_claims_api::dispatch::{ClaimProcessor, RetryPolicy, TaskRunner};
use rust_flg_claims_api::eligibility::EligibilityClassifier;
use rust_flg_claims_api::fanout::FanoutPipeline;
use rust_flg_claims_api::handlers::{self, AppState};
use rust_flg_claims_api::lender_directory::LenderDirectory;
use rust_flg_claims_api::notifier::LeadNotifier;
use rust_flg_claims_api::reconciliation::ReconciliationEngine;
use rust_flg_claims_api::security::HmacValidator;
use rust_flg_claims_api::webhook_handler::WebhookAuth;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection and migrations.
/// - Lender directory, fan-out pipeline and dispatch workers.
/// - HTTP routes and middleware (CORS, Rate Limiting).
///
/// Claims left pending by a previous run are re-queued before serving.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_flg_claims_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    db.migrate().await?;
    tracing::info!("Database connection pool established");

    let storage = Arc::new(PgStorage::new(db.pool.clone()));

    let groups = LeadGroupIds {
        dca: config.flg_dca_lead_group.clone(),
        irl: config.flg_irl_lead_group.clone(),
    };
    let crm: Arc<dyn CrmApi> = Arc::new(
        FlgClient::new(
            config.flg_base_url.clone(),
            config.flg_api_key.clone(),
            groups.clone(),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize FLG client: {}", e))?,
    );
    tracing::info!("✓ FLG client initialized: {}", config.flg_base_url);

    let directory = Arc::new(LenderDirectory::new(
        storage.clone(),
        config.lender_cache_ttl,
        config.lender_match_threshold,
    ));
    let warm = directory.refresh().await;
    tracing::info!("Lender directory warmed with {} lenders", warm.lenders.len());

    let pipeline = Arc::new(FanoutPipeline::new(
        directory.clone(),
        EligibilityClassifier::new(config.primary_window, config.special_window),
        config.cost_tiers.clone(),
    ));

    let dispatch_retry = RetryPolicy {
        max_attempts: config.dispatch_max_attempts,
        base_delay: config.dispatch_base_delay,
        multiplier: 2,
        max_delay: config.dispatch_max_delay,
        max_open_wait: config.dispatch_max_open_wait,
    };
    let processor = Arc::new(ClaimProcessor::new(
        pipeline,
        crm.clone(),
        storage.clone(),
        LeadNotifier::new(config.lead_notify_url.clone()),
        dispatch_retry,
    ));
    let runner = TaskRunner::start(
        processor,
        config.dispatch_workers,
        config.dispatch_queue_capacity,
    );
    runner.recover_pending(storage.as_ref()).await?;

    let action_retry = RetryPolicy {
        base_delay: config.action_base_delay,
        // Webhooks fail fast on an open breaker; the CRM redelivers.
        max_open_wait: Duration::ZERO,
        ..dispatch_retry
    };
    let reconciler = Arc::new(ReconciliationEngine::new(
        storage.clone(),
        storage.clone(),
        crm,
        action_retry,
    ));

    // Build application state
    let app_state = Arc::new(AppState {
        claims: storage,
        runner,
        directory,
        reconciler,
        groups,
        webhook_auth: WebhookAuth {
            secret: config.webhook_secret.clone(),
            hmac: config
                .webhook_hmac_secret
                .clone()
                .map(|secret| HmacValidator::new(secret, config.webhook_hmac_tolerance)),
        },
        admin_token: config.admin_token.clone(),
    });

    let app = handlers::router(app_state, true);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
