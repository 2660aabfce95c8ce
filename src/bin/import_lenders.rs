//! Imports the lender directory from a CSV file.
//!
//! Usage: `import_lenders <file.csv>`

use dotenvy::dotenv;
use rust_flg_claims_api::db::Database;
use rust_flg_claims_api::db_storage::PgStorage;
use rust_flg_claims_api::lender_import::parse_lender_csv;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "import_lenders=info,rust_flg_claims_api=info".into()),
        )
        .init();

    let path = env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("Usage: import_lenders <file.csv>"))?;
    let database_url = env::var("DB_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("DB_URL or DATABASE_URL must be set"))?;

    let file = std::fs::File::open(&path)
        .map_err(|e| anyhow::anyhow!("Cannot open '{}': {}", path, e))?;
    let (lenders, parse_errors) = parse_lender_csv(file);
    tracing::info!("Parsed {} lenders from {}", lenders.len(), path);

    let db = Database::new(&database_url).await?;
    db.migrate().await?;
    let storage = PgStorage::new(db.pool.clone());

    let mut written = 0;
    let mut failed = 0;
    for lender in &lenders {
        match storage.upsert_lender(lender).await {
            Ok(id) => {
                written += 1;
                tracing::debug!("Upserted {} (id {})", lender.canonical_name, id);
            }
            Err(e) => {
                failed += 1;
                tracing::error!("✗ {}: {}", lender.canonical_name, e);
            }
        }
    }

    println!("✅ Import completed");
    println!("  - Upserted: {} lenders", written);
    if parse_errors + failed > 0 {
        println!("  - Errors: {} rows skipped", parse_errors + failed);
    }

    Ok(())
}
