use crate::circuit_breaker::{create_crm_circuit_breaker, record_outcome, CrmBreaker};
use crate::models::{LeadGroupKind, LeadSpec};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use failsafe::CircuitBreaker;
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;

/// Failure talking to the CRM, classified for the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub enum CrmError {
    /// Timeout, refused connection or other transport failure.
    Transport(String),
    /// CRM answered 5xx.
    Server(u16, String),
    /// CRM answered 4xx or a non-zero body status.
    Rejected(String),
    /// Response could not be understood.
    Malformed(String),
    /// Breaker is open; the call was not attempted.
    CircuitOpen,
}

impl CrmError {
    /// Only transport failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, CrmError::Transport(_))
    }

    /// Failures that say the CRM itself is unhealthy and feed the breaker.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(self, CrmError::Transport(_) | CrmError::Server(..))
    }
}

impl fmt::Display for CrmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrmError::Transport(msg) => write!(f, "CRM transport error: {}", msg),
            CrmError::Server(status, msg) => write!(f, "CRM returned {}: {}", status, msg),
            CrmError::Rejected(msg) => write!(f, "CRM rejected request: {}", msg),
            CrmError::Malformed(msg) => write!(f, "CRM response malformed: {}", msg),
            CrmError::CircuitOpen => write!(f, "CRM circuit breaker is open"),
        }
    }
}

impl std::error::Error for CrmError {}

impl From<reqwest::Error> for CrmError {
    fn from(err: reqwest::Error) -> Self {
        CrmError::Transport(err.to_string())
    }
}

/// Mutation applied to an existing lead by the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LeadUpdate {
    pub introducer: Option<String>,
    pub cost: Option<BigDecimal>,
    pub status: Option<String>,
}

/// Mapping between [`LeadGroupKind`] and the CRM's numeric lead-group ids.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadGroupIds {
    pub dca: String,
    pub irl: String,
}

impl LeadGroupIds {
    pub fn id_for(&self, kind: LeadGroupKind) -> &str {
        match kind {
            LeadGroupKind::Dca => &self.dca,
            LeadGroupKind::Irl => &self.irl,
        }
    }

    /// Resolves an external id (or a literal "DCA"/"IRL") to a kind.
    pub fn kind_for(&self, external: &str) -> Option<LeadGroupKind> {
        let external = external.trim();
        if external == self.dca {
            Some(LeadGroupKind::Dca)
        } else if external == self.irl {
            Some(LeadGroupKind::Irl)
        } else {
            external.parse().ok()
        }
    }
}

/// Operations the rest of the service needs from the CRM.
#[async_trait]
pub trait CrmApi: Send + Sync {
    /// Creates a lead and returns its external id.
    async fn create_lead(&self, lead: &LeadSpec) -> Result<String, CrmError>;

    /// Applies an update to an existing lead.
    async fn update_lead(&self, lead_id: &str, update: &LeadUpdate) -> Result<(), CrmError>;
}

/// HTTP client for the FLG lead API.
#[derive(Clone)]
pub struct FlgClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    groups: LeadGroupIds,
    breaker: CrmBreaker,
}

impl FlgClient {
    /// Creates a new `FlgClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the FLG API, without trailing slash.
    /// * `api_key` - The account API key.
    /// * `groups` - External lead-group ids for DCA and IRL leads.
    pub fn new(base_url: String, api_key: String, groups: LeadGroupIds) -> Result<Self, CrmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CrmError::Transport(format!("Failed to create FLG client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            groups,
            breaker: create_crm_circuit_breaker(),
        })
    }

    /// Replaces the default breaker.
    pub fn with_circuit_breaker(mut self, breaker: CrmBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    /// Flattens a lead into the key/value record FLG expects.
    pub fn lead_record(&self, lead: &LeadSpec) -> Map<String, Value> {
        let payload = &lead.payload;
        let applicant = &payload.applicant;

        let mut record = Map::new();
        record.insert(
            "leadgroup".to_string(),
            json!(self.groups.id_for(lead.lead_type)),
        );
        record.insert("introducer".to_string(), json!(lead.reference));
        if let Some(cost) = &lead.cost {
            record.insert("cost".to_string(), json!(cost.to_string()));
        }
        if let Some(title) = &applicant.title {
            record.insert("title".to_string(), json!(title));
        }
        record.insert("firstname".to_string(), json!(applicant.first_name));
        record.insert("lastname".to_string(), json!(applicant.last_name));
        record.insert("email".to_string(), json!(applicant.email));
        if let Some(dob) = &applicant.date_of_birth {
            record.insert("dob".to_string(), json!(dob));
        }
        if let Some(phone) = &applicant.phone {
            record.insert("phone1".to_string(), json!(phone));
        }
        if let Some(address) = &applicant.address {
            record.insert("address".to_string(), json!(address));
        }
        if let Some(town) = &applicant.town {
            record.insert("towncity".to_string(), json!(town));
        }
        if let Some(postcode) = &applicant.postcode {
            record.insert("postcode".to_string(), json!(postcode));
        }

        record.insert("lender".to_string(), json!(payload.lender_name));
        if let Some(export) = &payload.lender_export_name {
            record.insert("lenderexport".to_string(), json!(export));
        }
        if let Some(account) = &payload.account_number {
            record.insert("accountnumber".to_string(), json!(account));
        }
        if let Some(start) = &payload.start_date {
            record.insert(
                "startdate".to_string(),
                json!(start.format("%d/%m/%Y").to_string()),
            );
        }
        if let Some(balance) = &payload.current_balance {
            record.insert("balance".to_string(), json!(balance.to_string()));
        }
        if let Some(monthly) = &payload.monthly_payment {
            record.insert("monthlypayment".to_string(), json!(monthly.to_string()));
        }
        if !payload.extra_notes.is_empty() {
            let notes = payload
                .extra_notes
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join("\n");
            record.insert("notes".to_string(), json!(notes));
        }

        record
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, CrmError> {
        if !self.breaker.is_call_permitted() {
            tracing::warn!("FLG circuit open, skipping call to {}", path);
            return Err(CrmError::CircuitOpen);
        }

        let outcome = self.send(path, body).await;
        record_outcome(&self.breaker, outcome, CrmError::counts_against_breaker)
    }

    async fn send(&self, path: &str, body: Value) -> Result<Value, CrmError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            if status.is_server_error() {
                return Err(CrmError::Server(status.as_u16(), error_text));
            }
            return Err(CrmError::Rejected(format!("{}: {}", status, error_text)));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| CrmError::Malformed(e.to_string()))?;

        match body_status(&data) {
            Some(0) => Ok(data),
            Some(code) => {
                let message = data
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("no message");
                Err(CrmError::Rejected(format!("status {}: {}", code, message)))
            }
            None => Err(CrmError::Malformed(format!(
                "response missing 'status': {}",
                data
            ))),
        }
    }
}

/// Reads the numeric body status, which FLG sends as a number or a string.
fn body_status(data: &Value) -> Option<i64> {
    match data.get("status")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Extracts the created lead id from `item.id`, falling back to a top-level `id`.
fn extract_lead_id(data: &Value) -> Option<String> {
    let id = data
        .get("item")
        .and_then(|item| item.get("id"))
        .or_else(|| data.get("id"))?;
    match id {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl CrmApi for FlgClient {
    async fn create_lead(&self, lead: &LeadSpec) -> Result<String, CrmError> {
        tracing::info!(
            "Creating {} lead in FLG for {} ({})",
            lead.lead_type,
            lead.payload.lender_name,
            lead.reference
        );

        let body = json!({ "lead": self.lead_record(lead) });
        let data = self.post("/api/lead/create", body).await?;

        let lead_id = extract_lead_id(&data).ok_or_else(|| {
            tracing::warn!("Unexpected FLG response format: {:?}", data);
            CrmError::Malformed("lead creation response missing 'item.id'".to_string())
        })?;

        tracing::info!("✓ Lead created successfully: {}", lead_id);
        Ok(lead_id)
    }

    async fn update_lead(&self, lead_id: &str, update: &LeadUpdate) -> Result<(), CrmError> {
        tracing::info!("Updating FLG lead {}: {:?}", lead_id, update);

        let mut fields = Map::new();
        fields.insert("id".to_string(), json!(lead_id));
        if let Some(introducer) = &update.introducer {
            fields.insert("introducer".to_string(), json!(introducer));
        }
        if let Some(cost) = &update.cost {
            fields.insert("cost".to_string(), json!(cost.to_string()));
        }
        if let Some(status) = &update.status {
            fields.insert("status".to_string(), json!(status));
        }

        self.post("/api/lead/update", json!({ "lead": fields }))
            .await?;

        tracing::info!("✓ Lead {} updated", lead_id);
        Ok(())
    }
}
