use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::similarity::MatchType;

// ============ Lead groups ============

/// The two claim types a lead can be filed under in the CRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadGroupKind {
    /// Motor-finance commission claim.
    #[serde(rename = "DCA")]
    Dca,
    /// Irresponsible-lending claim.
    #[serde(rename = "IRL")]
    Irl,
}

impl LeadGroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadGroupKind::Dca => "DCA",
            LeadGroupKind::Irl => "IRL",
        }
    }
}

impl fmt::Display for LeadGroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadGroupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DCA" => Ok(LeadGroupKind::Dca),
            "IRL" => Ok(LeadGroupKind::Irl),
            other => Err(format!("unknown lead group kind '{}'", other)),
        }
    }
}

// ============ Lenders ============

/// Whether a lender is known to have paid discretionary commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DcaEligibility {
    Yes,
    No,
    Unknown,
}

impl DcaEligibility {
    /// Lenient parse of the administered Yes/No column. Blank or anything
    /// unrecognised is `Unknown`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("yes") | Some("y") | Some("true") => DcaEligibility::Yes,
            Some("no") | Some("n") | Some("false") => DcaEligibility::No,
            _ => DcaEligibility::Unknown,
        }
    }
}

/// Parses the IRL Yes/No column. Anything but an explicit yes is `false`.
pub fn parse_yes_no(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("yes") | Some("y") | Some("true")
    )
}

/// A known lender, as administered out-of-band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LenderRecord {
    pub id: i64,
    /// Unique canonical name.
    pub canonical_name: String,
    /// Alternative spellings seen on credit files.
    pub aka_names: Vec<String>,
    /// Name shown to claimants.
    pub display_name: String,
    /// Name sent to the CRM.
    pub export_name: String,
    pub dca_eligible: DcaEligibility,
    pub irl_eligible: bool,
    /// Higher ranks are processed first during fan-out.
    pub cost_priority_rank: i32,
}

impl LenderRecord {
    /// The canonical name followed by every non-blank alias.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical_name.as_str()).chain(
            self.aka_names
                .iter()
                .map(|a| a.as_str())
                .filter(|a| !a.trim().is_empty()),
        )
    }
}

/// Outcome of resolving a raw lender name against the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// The name exactly as it appeared on the account.
    pub raw_name: String,
    pub lender_id: Option<i64>,
    pub canonical_name: Option<String>,
    pub display_name: Option<String>,
    pub export_name: Option<String>,
    pub matched_alias: Option<String>,
    pub score: f64,
    pub match_type: MatchType,
}

impl MatchResult {
    pub fn unmatched(raw_name: &str) -> Self {
        Self {
            raw_name: raw_name.to_string(),
            lender_id: None,
            canonical_name: None,
            display_name: None,
            export_name: None,
            matched_alias: None,
            score: 0.0,
            match_type: MatchType::None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.lender_id.is_some()
    }
}

// ============ Accounts ============

/// Where an account came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountSource {
    /// Returned by the credit-bureau lookup.
    Found,
    /// Added by the claimant by hand.
    Manual,
}

/// One finance agreement on the claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialAccount {
    pub source: AccountSource,
    pub lender_name: String,
    pub account_number: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub current_balance: Option<BigDecimal>,
    pub monthly_payment: Option<BigDecimal>,
}

/// Account entry as submitted by the claim form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInput {
    #[serde(default, alias = "name", alias = "displayName")]
    pub lender_name: String,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_lenient_decimal")]
    pub current_balance: Option<BigDecimal>,
    #[serde(default, deserialize_with = "deserialize_lenient_decimal")]
    pub monthly_payment: Option<BigDecimal>,
}

impl AccountInput {
    fn into_account(self, source: AccountSource) -> FinancialAccount {
        FinancialAccount {
            source,
            lender_name: self.lender_name.trim().to_string(),
            account_number: self
                .account_number
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
            start_date: self.start_date,
            current_balance: self.current_balance,
            monthly_payment: self.monthly_payment,
        }
    }
}

/// Parses the date formats the claim form and the bureau produce:
/// `YYYY-MM-DD`, `DD/MM/YYYY` and RFC 3339 timestamps. Blank is `None`.
pub fn parse_lenient_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

fn deserialize_lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            if s.trim().is_empty() {
                return Ok(None);
            }
            parse_lenient_date(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid date '{}'", s)))
        }
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a date string, got {}",
            other
        ))),
    }
}

fn deserialize_lenient_decimal<'de, D>(deserializer: D) -> Result<Option<BigDecimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let text = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().replace(['£', ','], ""),
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected a number, got {}",
                other
            )))
        }
    };
    if text.is_empty() {
        return Ok(None);
    }
    BigDecimal::from_str(&text)
        .map(Some)
        .map_err(|e| serde::de::Error::custom(format!("invalid amount '{}': {}", text, e)))
}

// ============ Claims ============

/// Consent and representation flags that steer fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimConsents {
    pub motor_finance: bool,
    pub irresponsible_lending: bool,
    pub existing_representation_confirmed: bool,
    pub cmc_detected_in_report: bool,
}

/// Claimant identity fields copied onto every lead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Applicant {
    pub title: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<String>,
    pub phone: Option<String>,
    pub email: String,
    pub address: Option<String>,
    pub town: Option<String>,
    pub postcode: Option<String>,
}

/// Inbound claim submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSubmission {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default, alias = "phone")]
    pub phone1: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, alias = "postTown")]
    pub towncity: Option<String>,
    #[serde(default, alias = "postCode")]
    pub postcode: Option<String>,
    #[serde(default)]
    pub campaign: Option<String>,
    #[serde(default)]
    pub motor_finance_consent: bool,
    #[serde(default)]
    pub irresponsible_lending_consent: bool,
    /// "Yes" when the claimant confirmed another firm already represents them.
    #[serde(default)]
    pub existing_representation_consent: Option<String>,
    #[serde(default)]
    pub cmc_detected_in_report: bool,
    #[serde(default)]
    pub found_lenders: Vec<AccountInput>,
    #[serde(default)]
    pub additional_lenders: Vec<AccountInput>,
}

impl ClaimSubmission {
    pub fn consents(&self) -> ClaimConsents {
        ClaimConsents {
            motor_finance: self.motor_finance_consent,
            irresponsible_lending: self.irresponsible_lending_consent,
            existing_representation_confirmed: self
                .existing_representation_consent
                .as_deref()
                .map(|v| v.trim().eq_ignore_ascii_case("yes"))
                .unwrap_or(false),
            cmc_detected_in_report: self.cmc_detected_in_report,
        }
    }

    /// Bureau accounts first, then manual ones, in submission order.
    pub fn accounts(&self) -> Vec<FinancialAccount> {
        self.found_lenders
            .iter()
            .cloned()
            .map(|a| a.into_account(AccountSource::Found))
            .chain(
                self.additional_lenders
                    .iter()
                    .cloned()
                    .map(|a| a.into_account(AccountSource::Manual)),
            )
            .collect()
    }

    pub fn applicant(&self) -> Applicant {
        Applicant {
            title: self.title.clone(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            date_of_birth: self.date_of_birth.clone(),
            phone: self.phone1.clone(),
            email: self.email.trim().to_lowercase(),
            address: self.address.clone(),
            town: self.towncity.clone(),
            postcode: self.postcode.clone(),
        }
    }
}

/// How the claim's lead dispatch was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Handed to the worker queue.
    Async,
    /// Queue was saturated; dispatched on a detached in-process task.
    Sync,
}

/// Response to a claim submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimAccepted {
    pub success: bool,
    pub claim_id: Uuid,
    pub dispatch: DispatchMode,
}

// ============ Leads ============

/// The closed CRM record body for one lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadPayload {
    pub applicant: Applicant,
    pub lender_name: String,
    pub lender_export_name: Option<String>,
    pub account_number: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub current_balance: Option<BigDecimal>,
    pub monthly_payment: Option<BigDecimal>,
    /// Free-text notes with no fixed CRM column.
    pub extra_notes: BTreeMap<String, String>,
}

/// One lead to be created in the CRM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadSpec {
    pub lead_type: LeadGroupKind,
    pub reference: String,
    /// Set for DCA leads only.
    pub cost: Option<BigDecimal>,
    pub payload: LeadPayload,
    pub source_account: FinancialAccount,
    pub match_result: MatchResult,
}

/// Per-account audit line in the claim summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountAudit {
    pub lender_name: String,
    pub account_number: Option<String>,
    pub source: AccountSource,
    pub detail: String,
}

/// Result of dispatching a single lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadOutcome {
    pub lead_type: LeadGroupKind,
    pub lender_name: String,
    pub reference: String,
    pub cost: Option<BigDecimal>,
    pub external_lead_id: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Replaceable per-claim record of a fan-out run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimLeadSummary {
    pub claim_id: Uuid,
    pub total_leads: usize,
    pub successful_leads: usize,
    pub failed_leads: usize,
    pub dca_leads: usize,
    pub irl_leads: usize,
    pub external_lead_ids: Vec<String>,
    pub leads: Vec<LeadOutcome>,
    pub proceeding: Vec<AccountAudit>,
    pub date_ineligible: Vec<AccountAudit>,
    pub unmatched_lenders: Vec<AccountAudit>,
    /// Fingerprint of the lender snapshot the run used.
    pub directory_fingerprint: String,
    pub processed_at: DateTime<Utc>,
}

// ============ Status rules ============

/// Mutation to apply to a lead when a rule matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "params")]
pub enum RuleAction {
    ChangeReference {
        new_introducer: String,
        #[serde(default)]
        new_cost: Option<BigDecimal>,
    },
    UpdateStatus {
        new_status: String,
    },
    UpdateCost {
        new_cost: BigDecimal,
    },
}

impl RuleAction {
    pub fn name(&self) -> &'static str {
        match self {
            RuleAction::ChangeReference { .. } => "ChangeReference",
            RuleAction::UpdateStatus { .. } => "UpdateStatus",
            RuleAction::UpdateCost { .. } => "UpdateCost",
        }
    }
}

/// One administered row of the status rule table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRule {
    pub id: i64,
    pub lead_group: LeadGroupKind,
    pub status_received: String,
    pub introducer_received: Option<String>,
    pub data35_received: Option<String>,
    pub priority: i32,
    pub action: RuleAction,
}

// ============ Webhook audit ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    NoMapping,
    ActionFailed,
    LookupFailed,
    Rejected,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::NoMapping => "no_mapping",
            WebhookOutcome::ActionFailed => "action_failed",
            WebhookOutcome::LookupFailed => "lookup_failed",
            WebhookOutcome::Rejected => "rejected",
        }
    }
}

/// Append-only audit row for every inbound status webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub received_at: DateTime<Utc>,
    pub external_lead_id: Option<String>,
    pub lead_group: Option<String>,
    pub status: Option<String>,
    pub payload: Value,
    pub rule_id: Option<i64>,
    pub outcome: WebhookOutcome,
    pub detail: Option<String>,
}
