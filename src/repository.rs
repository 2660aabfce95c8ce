//! Storage seams shared by the pipeline, the dispatcher and the webhook path.

use crate::errors::AppError;
use crate::lender_directory::LenderSource;
use crate::models::{
    ClaimLeadSummary, ClaimSubmission, LeadGroupKind, LenderRecord, StatusRule,
    WebhookEventRecord,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Reads the administered status rule table.
#[async_trait]
pub trait StatusRuleSource: Send + Sync {
    /// Every rule for the lead group with exactly this status text.
    async fn rules_for(
        &self,
        lead_group: LeadGroupKind,
        status: &str,
    ) -> Result<Vec<StatusRule>, AppError>;
}

/// Append-only audit of inbound webhook events.
#[async_trait]
pub trait WebhookAuditLog: Send + Sync {
    async fn record(&self, event: &WebhookEventRecord) -> Result<(), AppError>;
}

/// Durable claims and their fan-out summaries.
#[async_trait]
pub trait ClaimRepository: Send + Sync {
    /// Persists a new claim as pending dispatch.
    async fn insert_claim(&self, claim: &ClaimSubmission) -> Result<Uuid, AppError>;

    async fn load_claim(&self, claim_id: Uuid) -> Result<Option<ClaimSubmission>, AppError>;

    /// Claims persisted but never marked dispatched.
    async fn pending_claims(&self) -> Result<Vec<(Uuid, ClaimSubmission)>, AppError>;

    /// Inserts or replaces the claim's summary.
    async fn save_summary(&self, summary: &ClaimLeadSummary) -> Result<(), AppError>;

    async fn load_summary(&self, claim_id: Uuid) -> Result<Option<ClaimLeadSummary>, AppError>;

    async fn mark_dispatched(&self, claim_id: Uuid) -> Result<(), AppError>;
}

#[derive(Default)]
struct MemoryState {
    lenders: Vec<LenderRecord>,
    rules: Vec<StatusRule>,
    events: Vec<WebhookEventRecord>,
    claims: Vec<(Uuid, ClaimSubmission, bool)>,
    summaries: HashMap<Uuid, ClaimLeadSummary>,
}

/// Process-local storage. Backs tests and local runs without Postgres.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::InternalError("memory storage poisoned".to_string()))
    }

    pub fn with_lenders(self, lenders: Vec<LenderRecord>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.lenders = lenders;
        }
        self
    }

    pub fn with_rules(self, rules: Vec<StatusRule>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.rules = rules;
        }
        self
    }

    /// Snapshot of the recorded webhook events, oldest first.
    pub fn events(&self) -> Vec<WebhookEventRecord> {
        self.state
            .lock()
            .map(|s| s.events.clone())
            .unwrap_or_default()
    }

    pub fn is_dispatched(&self, claim_id: Uuid) -> bool {
        self.state
            .lock()
            .map(|s| {
                s.claims
                    .iter()
                    .any(|(id, _, dispatched)| *id == claim_id && *dispatched)
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl LenderSource for MemoryStorage {
    async fn load_lenders(&self) -> Result<Vec<LenderRecord>, AppError> {
        Ok(self.lock()?.lenders.clone())
    }
}

#[async_trait]
impl StatusRuleSource for MemoryStorage {
    async fn rules_for(
        &self,
        lead_group: LeadGroupKind,
        status: &str,
    ) -> Result<Vec<StatusRule>, AppError> {
        Ok(self
            .lock()?
            .rules
            .iter()
            .filter(|r| r.lead_group == lead_group && r.status_received == status)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WebhookAuditLog for MemoryStorage {
    async fn record(&self, event: &WebhookEventRecord) -> Result<(), AppError> {
        self.lock()?.events.push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl ClaimRepository for MemoryStorage {
    async fn insert_claim(&self, claim: &ClaimSubmission) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        self.lock()?.claims.push((id, claim.clone(), false));
        Ok(id)
    }

    async fn load_claim(&self, claim_id: Uuid) -> Result<Option<ClaimSubmission>, AppError> {
        Ok(self
            .lock()?
            .claims
            .iter()
            .find(|(id, _, _)| *id == claim_id)
            .map(|(_, claim, _)| claim.clone()))
    }

    async fn pending_claims(&self) -> Result<Vec<(Uuid, ClaimSubmission)>, AppError> {
        Ok(self
            .lock()?
            .claims
            .iter()
            .filter(|(_, _, dispatched)| !dispatched)
            .map(|(id, claim, _)| (*id, claim.clone()))
            .collect())
    }

    async fn save_summary(&self, summary: &ClaimLeadSummary) -> Result<(), AppError> {
        self.lock()?
            .summaries
            .insert(summary.claim_id, summary.clone());
        Ok(())
    }

    async fn load_summary(&self, claim_id: Uuid) -> Result<Option<ClaimLeadSummary>, AppError> {
        Ok(self.lock()?.summaries.get(&claim_id).cloned())
    }

    async fn mark_dispatched(&self, claim_id: Uuid) -> Result<(), AppError> {
        let mut state = self.lock()?;
        match state.claims.iter_mut().find(|(id, _, _)| *id == claim_id) {
            Some(entry) => {
                entry.2 = true;
                Ok(())
            }
            None => Err(AppError::NotFound(format!("claim {}", claim_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim() -> ClaimSubmission {
        serde_json::from_value(serde_json::json!({
            "firstName": "Jane",
            "lastName": "Doe",
            "email": "jane@example.com"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_pending_until_marked_dispatched() {
        let storage = MemoryStorage::new();
        let id = storage.insert_claim(&claim()).await.unwrap();

        assert_eq!(storage.pending_claims().await.unwrap().len(), 1);
        storage.mark_dispatched(id).await.unwrap();
        assert!(storage.pending_claims().await.unwrap().is_empty());
        assert!(storage.is_dispatched(id));
    }

    #[tokio::test]
    async fn test_mark_unknown_claim_is_not_found() {
        let storage = MemoryStorage::new();
        let err = storage.mark_dispatched(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
