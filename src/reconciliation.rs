use crate::crm_client::{CrmApi, LeadUpdate};
use crate::dispatch::{classify_crm, retry_with_backoff, RetryPolicy};
use crate::errors::AppError;
use crate::models::{
    LeadGroupKind, RuleAction, StatusRule, WebhookEventRecord, WebhookOutcome,
};
use crate::repository::{StatusRuleSource, WebhookAuditLog};
use crate::webhook_models::StatusEvent;
use chrono::Utc;
use serde_json::Value;
use std::cmp::Reverse;
use std::sync::Arc;

/// What a reconciled event led to.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Applied {
        rule_id: i64,
        action: &'static str,
        /// Another rule matched at the same priority.
        ambiguous: bool,
    },
    NoMapping,
}

/// The winning rule for an event.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSelection {
    pub rule: StatusRule,
    pub ambiguous: bool,
}

fn data35_matches(group: LeadGroupKind, rule: Option<&str>, event: Option<&str>) -> bool {
    match group {
        // IRL events never carry data35, so only rules without one apply.
        LeadGroupKind::Irl => rule.is_none(),
        LeadGroupKind::Dca => rule.unwrap_or("") == event.unwrap_or(""),
    }
}

pub fn rule_matches(rule: &StatusRule, event: &StatusEvent) -> bool {
    rule.lead_group == event.lead_group
        && rule.status_received == event.status
        && rule.introducer_received == event.introducer
        && data35_matches(
            event.lead_group,
            rule.data35_received.as_deref(),
            event.data35.as_deref(),
        )
}

/// Picks the highest-priority matching rule; equal priorities fall back to
/// the lowest id and are flagged as ambiguous.
pub fn select_rule(rules: &[StatusRule], event: &StatusEvent) -> Option<RuleSelection> {
    let matching: Vec<&StatusRule> = rules.iter().filter(|r| rule_matches(r, event)).collect();

    let best = matching
        .iter()
        .copied()
        .max_by_key(|r| (r.priority, Reverse(r.id)))?;

    let ambiguous = matching
        .iter()
        .any(|r| r.id != best.id && r.priority == best.priority);

    Some(RuleSelection {
        rule: best.clone(),
        ambiguous,
    })
}

pub fn lead_update_for(action: &RuleAction) -> LeadUpdate {
    match action {
        RuleAction::ChangeReference {
            new_introducer,
            new_cost,
        } => LeadUpdate {
            introducer: Some(new_introducer.clone()),
            cost: new_cost.clone(),
            status: None,
        },
        RuleAction::UpdateStatus { new_status } => LeadUpdate {
            status: Some(new_status.clone()),
            ..Default::default()
        },
        RuleAction::UpdateCost { new_cost } => LeadUpdate {
            cost: Some(new_cost.clone()),
            ..Default::default()
        },
    }
}

/// Maps CRM status webhooks onto lead mutations via the rule table.
pub struct ReconciliationEngine {
    rules: Arc<dyn StatusRuleSource>,
    audit: Arc<dyn WebhookAuditLog>,
    crm: Arc<dyn CrmApi>,
    retry: RetryPolicy,
}

impl ReconciliationEngine {
    pub fn new(
        rules: Arc<dyn StatusRuleSource>,
        audit: Arc<dyn WebhookAuditLog>,
        crm: Arc<dyn CrmApi>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            rules,
            audit,
            crm,
            retry,
        }
    }

    pub async fn reconcile(
        &self,
        event: &StatusEvent,
        raw: &Value,
    ) -> Result<ReconcileOutcome, AppError> {
        let rules = match self.rules.rules_for(event.lead_group, &event.status).await {
            Ok(rules) => rules,
            Err(e) => {
                self.record(Some(event), raw, None, WebhookOutcome::LookupFailed, Some(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let Some(selection) = select_rule(&rules, event) else {
            tracing::info!(
                "No status mapping for lead {} ({} / '{}')",
                event.external_lead_id,
                event.lead_group,
                event.status
            );
            self.record(Some(event), raw, None, WebhookOutcome::NoMapping, None)
                .await;
            return Ok(ReconcileOutcome::NoMapping);
        };

        let rule = &selection.rule;
        if selection.ambiguous {
            tracing::warn!(
                "Ambiguous status rules at priority {} for {} / '{}'; using rule {}",
                rule.priority,
                event.lead_group,
                event.status,
                rule.id
            );
        }

        let update = lead_update_for(&rule.action);
        let label = format!("{} on lead {}", rule.action.name(), event.external_lead_id);
        let (result, attempts) =
            retry_with_backoff(&self.retry, &label, classify_crm, || {
                self.crm.update_lead(&event.external_lead_id, &update)
            })
            .await;

        if let Err(e) = result {
            tracing::error!("✗ {} failed after {} attempts: {}", label, attempts, e);
            self.record(
                Some(event),
                raw,
                Some(rule.id),
                WebhookOutcome::ActionFailed,
                Some(e.to_string()),
            )
            .await;
            return Err(AppError::ExternalService(format!("{}: {}", label, e)));
        }

        tracing::info!("✓ Applied rule {} ({})", rule.id, label);
        let detail = selection
            .ambiguous
            .then(|| "ambiguous rule configuration".to_string());
        self.record(Some(event), raw, Some(rule.id), WebhookOutcome::Applied, detail)
            .await;

        Ok(ReconcileOutcome::Applied {
            rule_id: rule.id,
            action: rule.action.name(),
            ambiguous: selection.ambiguous,
        })
    }

    /// Writes the audit row. Failures are logged and never propagate.
    pub async fn record(
        &self,
        event: Option<&StatusEvent>,
        raw: &Value,
        rule_id: Option<i64>,
        outcome: WebhookOutcome,
        detail: Option<String>,
    ) {
        let record = WebhookEventRecord {
            received_at: Utc::now(),
            external_lead_id: event
                .map(|e| e.external_lead_id.clone())
                .or_else(|| raw_field(raw, &["id", "leadId", "leadid"])),
            lead_group: event
                .map(|e| e.lead_group.to_string())
                .or_else(|| raw_field(raw, &["leadgroup", "leadGroup", "leadgroupid", "leadGroupId"])),
            status: event
                .map(|e| e.status.clone())
                .or_else(|| raw_field(raw, &["status"])),
            payload: raw.clone(),
            rule_id,
            outcome,
            detail,
        };

        if let Err(e) = self.audit.record(&record).await {
            tracing::warn!("Failed to record webhook event ({}): {}", outcome.as_str(), e);
        }
    }
}

fn raw_field(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match raw.get(*k)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn rule(id: i64, group: LeadGroupKind, priority: i32, data35: Option<&str>) -> StatusRule {
        StatusRule {
            id,
            lead_group: group,
            status_received: "Signed".to_string(),
            introducer_received: Some("FA Eligible".to_string()),
            data35_received: data35.map(str::to_string),
            priority,
            action: RuleAction::UpdateStatus {
                new_status: format!("rule-{}", id),
            },
        }
    }

    fn event(group: LeadGroupKind, data35: Option<&str>) -> StatusEvent {
        StatusEvent {
            external_lead_id: "L1".to_string(),
            lead_group: group,
            status: "Signed".to_string(),
            introducer: Some("FA Eligible".to_string()),
            data35: data35.map(str::to_string),
        }
    }

    #[test]
    fn test_dca_blank_data35_equivalences() {
        let rules = vec![rule(1, LeadGroupKind::Dca, 0, Some(""))];
        assert!(select_rule(&rules, &event(LeadGroupKind::Dca, None)).is_some());
        assert!(select_rule(&rules, &event(LeadGroupKind::Dca, Some(""))).is_some());

        let rules = vec![rule(1, LeadGroupKind::Dca, 0, None)];
        assert!(select_rule(&rules, &event(LeadGroupKind::Dca, Some(""))).is_some());
        assert!(select_rule(&rules, &event(LeadGroupKind::Dca, Some("X"))).is_none());
    }

    #[test]
    fn test_irl_rules_with_data35_never_match() {
        let rules = vec![rule(1, LeadGroupKind::Irl, 0, Some("X"))];
        assert!(select_rule(&rules, &event(LeadGroupKind::Irl, None)).is_none());
    }

    #[test]
    fn test_introducer_must_match_exactly() {
        let mut e = event(LeadGroupKind::Dca, None);
        e.introducer = None;
        assert!(select_rule(&[rule(1, LeadGroupKind::Dca, 0, None)], &e).is_none());

        let mut r = rule(2, LeadGroupKind::Dca, 0, None);
        r.introducer_received = None;
        assert_eq!(select_rule(&[r], &e).unwrap().rule.id, 2);
    }

    #[test]
    fn test_highest_priority_wins_and_ties_use_lowest_id() {
        let rules = vec![
            rule(5, LeadGroupKind::Dca, 1, None),
            rule(9, LeadGroupKind::Dca, 3, None),
            rule(7, LeadGroupKind::Dca, 3, None),
        ];
        let selection = select_rule(&rules, &event(LeadGroupKind::Dca, None)).unwrap();
        assert_eq!(selection.rule.id, 7);
        assert!(selection.ambiguous);

        let selection = select_rule(&rules[..2], &event(LeadGroupKind::Dca, None)).unwrap();
        assert_eq!(selection.rule.id, 9);
        assert!(!selection.ambiguous);
    }

    #[test]
    fn test_lead_update_for_actions() {
        let update = lead_update_for(&RuleAction::ChangeReference {
            new_introducer: "FA Non Eligible".to_string(),
            new_cost: Some(BigDecimal::from(0)),
        });
        assert_eq!(update.introducer.as_deref(), Some("FA Non Eligible"));
        assert_eq!(update.cost, Some(BigDecimal::from(0)));
        assert_eq!(update.status, None);

        let update = lead_update_for(&RuleAction::UpdateCost {
            new_cost: BigDecimal::from(25),
        });
        assert_eq!(update.cost, Some(BigDecimal::from(25)));
        assert_eq!(update.introducer, None);
    }
}
