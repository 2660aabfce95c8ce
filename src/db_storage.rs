use crate::errors::{AppError, ResultExt};
use crate::lender_directory::LenderSource;
use crate::models::{
    parse_yes_no, ClaimLeadSummary, ClaimSubmission, DcaEligibility, LeadGroupKind, LenderRecord,
    RuleAction, StatusRule, WebhookEventRecord,
};
use crate::repository::{ClaimRepository, StatusRuleSource, WebhookAuditLog};
use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct LenderRow {
    id: i64,
    canonical_name: String,
    aka_names: Vec<String>,
    display_name: String,
    export_name: String,
    dca_eligible: String,
    irl_eligible: String,
    cost_priority_rank: i32,
}

impl From<LenderRow> for LenderRecord {
    fn from(row: LenderRow) -> Self {
        LenderRecord {
            id: row.id,
            canonical_name: row.canonical_name,
            aka_names: row.aka_names,
            display_name: row.display_name,
            export_name: row.export_name,
            dca_eligible: DcaEligibility::parse(Some(&row.dca_eligible)),
            irl_eligible: parse_yes_no(Some(&row.irl_eligible)),
            cost_priority_rank: row.cost_priority_rank,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StatusRuleRow {
    id: i64,
    lead_group: String,
    status_received: String,
    introducer_received: Option<String>,
    data35_received: Option<String>,
    priority: i32,
    action: String,
    params: serde_json::Value,
}

impl TryFrom<StatusRuleRow> for StatusRule {
    type Error = String;

    fn try_from(row: StatusRuleRow) -> Result<Self, Self::Error> {
        let lead_group: LeadGroupKind = row.lead_group.parse()?;
        let action: RuleAction =
            serde_json::from_value(json!({ "action": row.action, "params": row.params }))
                .map_err(|e| format!("invalid action params: {}", e))?;

        Ok(StatusRule {
            id: row.id,
            lead_group,
            status_received: row.status_received,
            introducer_received: row.introducer_received,
            data35_received: row.data35_received,
            priority: row.priority,
            action,
        })
    }
}

/// Lender row as written by the import tool.
#[derive(Debug, Clone)]
pub struct LenderUpsert {
    pub canonical_name: String,
    pub aka_names: Vec<String>,
    pub display_name: String,
    pub export_name: String,
    pub dca_eligible: String,
    pub irl_eligible: String,
    pub cost_priority_rank: i32,
}

/// Postgres implementation of every storage seam.
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a lender or replaces the row with the same canonical name.
    pub async fn upsert_lender(&self, lender: &LenderUpsert) -> Result<i64, AppError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO lenders (canonical_name, aka_names, display_name, export_name,
                                 dca_eligible, irl_eligible, cost_priority_rank, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (canonical_name) DO UPDATE SET
                aka_names = EXCLUDED.aka_names,
                display_name = EXCLUDED.display_name,
                export_name = EXCLUDED.export_name,
                dca_eligible = EXCLUDED.dca_eligible,
                irl_eligible = EXCLUDED.irl_eligible,
                cost_priority_rank = EXCLUDED.cost_priority_rank,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(&lender.canonical_name)
        .bind(&lender.aka_names)
        .bind(&lender.display_name)
        .bind(&lender.export_name)
        .bind(&lender.dca_eligible)
        .bind(&lender.irl_eligible)
        .bind(lender.cost_priority_rank)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("upserting lender '{}'", lender.canonical_name))?;

        Ok(id)
    }
}

#[async_trait]
impl LenderSource for PgStorage {
    async fn load_lenders(&self) -> Result<Vec<LenderRecord>, AppError> {
        let rows = sqlx::query_as::<_, LenderRow>(
            "SELECT id, canonical_name, aka_names, display_name, export_name,
                    dca_eligible, irl_eligible, cost_priority_rank
             FROM lenders
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("loading lenders")?;

        Ok(rows.into_iter().map(LenderRecord::from).collect())
    }
}

#[async_trait]
impl StatusRuleSource for PgStorage {
    async fn rules_for(
        &self,
        lead_group: LeadGroupKind,
        status: &str,
    ) -> Result<Vec<StatusRule>, AppError> {
        let rows = sqlx::query_as::<_, StatusRuleRow>(
            "SELECT id, lead_group, status_received, introducer_received, data35_received,
                    priority, action, params
             FROM status_rules
             WHERE active AND lead_group = $1 AND status_received = $2
             ORDER BY priority DESC, id ASC",
        )
        .bind(lead_group.as_str())
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .context("loading status rules")?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match StatusRule::try_from(row) {
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::warn!("Skipping malformed status rule {}: {}", id, e),
            }
        }
        Ok(rules)
    }
}

#[async_trait]
impl WebhookAuditLog for PgStorage {
    async fn record(&self, event: &WebhookEventRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_events (received_at, external_lead_id, lead_group, status,
                                        payload, rule_id, outcome, detail)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.received_at)
        .bind(&event.external_lead_id)
        .bind(&event.lead_group)
        .bind(&event.status)
        .bind(&event.payload)
        .bind(event.rule_id)
        .bind(event.outcome.as_str())
        .bind(&event.detail)
        .execute(&self.pool)
        .await
        .context("recording webhook event")?;

        Ok(())
    }
}

#[async_trait]
impl ClaimRepository for PgStorage {
    async fn insert_claim(&self, claim: &ClaimSubmission) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_value(claim)?;

        sqlx::query("INSERT INTO claims (id, payload, dispatch_status) VALUES ($1, $2, 'pending')")
            .bind(id)
            .bind(payload)
            .execute(&self.pool)
            .await
            .context("inserting claim")?;

        Ok(id)
    }

    async fn load_claim(&self, claim_id: Uuid) -> Result<Option<ClaimSubmission>, AppError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT payload FROM claims WHERE id = $1")
                .bind(claim_id)
                .fetch_optional(&self.pool)
                .await
                .context("loading claim")?;

        row.map(|(payload,)| serde_json::from_value(payload).map_err(AppError::from))
            .transpose()
    }

    async fn pending_claims(&self) -> Result<Vec<(Uuid, ClaimSubmission)>, AppError> {
        let rows: Vec<(Uuid, serde_json::Value)> = sqlx::query_as(
            "SELECT id, payload FROM claims WHERE dispatch_status = 'pending' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .context("loading pending claims")?;

        let mut claims = Vec::with_capacity(rows.len());
        for (id, payload) in rows {
            match serde_json::from_value(payload) {
                Ok(claim) => claims.push((id, claim)),
                Err(e) => tracing::error!("Pending claim {} has an unreadable payload: {}", id, e),
            }
        }
        Ok(claims)
    }

    async fn save_summary(&self, summary: &ClaimLeadSummary) -> Result<(), AppError> {
        let body = serde_json::to_value(summary)?;

        sqlx::query(
            r#"
            INSERT INTO claim_lead_summaries (claim_id, total_leads, successful_leads, failed_leads,
                                              external_lead_ids, summary, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (claim_id) DO UPDATE SET
                total_leads = EXCLUDED.total_leads,
                successful_leads = EXCLUDED.successful_leads,
                failed_leads = EXCLUDED.failed_leads,
                external_lead_ids = EXCLUDED.external_lead_ids,
                summary = EXCLUDED.summary,
                processed_at = EXCLUDED.processed_at
            "#,
        )
        .bind(summary.claim_id)
        .bind(summary.total_leads as i32)
        .bind(summary.successful_leads as i32)
        .bind(summary.failed_leads as i32)
        .bind(&summary.external_lead_ids)
        .bind(body)
        .bind(summary.processed_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving summary for claim {}", summary.claim_id))?;

        Ok(())
    }

    async fn load_summary(&self, claim_id: Uuid) -> Result<Option<ClaimLeadSummary>, AppError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT summary FROM claim_lead_summaries WHERE claim_id = $1")
                .bind(claim_id)
                .fetch_optional(&self.pool)
                .await
                .context("loading claim summary")?;

        row.map(|(summary,)| serde_json::from_value(summary).map_err(AppError::from))
            .transpose()
    }

    async fn mark_dispatched(&self, claim_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE claims SET dispatch_status = 'dispatched', dispatched_at = NOW() WHERE id = $1",
        )
        .bind(claim_id)
        .execute(&self.pool)
        .await
        .context("marking claim dispatched")?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("claim {}", claim_id)));
        }
        Ok(())
    }
}
