use crate::crm_client::LeadGroupIds;
use crate::errors::AppError;
use crate::models::LeadGroupKind;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// FLG status webhook as posted, either JSON or form-encoded.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StatusWebhookPayload {
    #[serde(default, alias = "leadId", alias = "leadid", deserialize_with = "stringish")]
    pub id: Option<String>,

    #[serde(
        default,
        alias = "leadGroup",
        alias = "leadgroupid",
        alias = "leadGroupId",
        deserialize_with = "stringish"
    )]
    pub leadgroup: Option<String>,

    #[serde(default, deserialize_with = "stringish")]
    pub status: Option<String>,

    #[serde(default, deserialize_with = "stringish")]
    pub introducer: Option<String>,

    #[serde(default, deserialize_with = "stringish")]
    pub data35: Option<String>,
}

/// Accepts strings, numbers or null; FLG sends ids either way.
fn stringish<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

impl StatusWebhookPayload {
    /// Decodes the body by content type. Returns the raw document for the
    /// audit log alongside the typed payload.
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Result<(Value, Self), AppError> {
        let is_form = content_type
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);

        let raw = if is_form {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
                .map_err(|e| AppError::Validation(format!("Invalid form body: {}", e)))?;
            let mut map = Map::new();
            for (key, value) in pairs {
                map.insert(key, Value::String(value));
            }
            Value::Object(map)
        } else {
            serde_json::from_slice(body)
                .map_err(|e| AppError::Validation(format!("Invalid JSON body: {}", e)))?
        };

        let payload = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::Validation(format!("Invalid webhook payload: {}", e)))?;

        Ok((raw, payload))
    }
}

/// Result of normalising an inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventResolution {
    Event(StatusEvent),
    /// The lead group is not one this service routes.
    UnknownLeadGroup(String),
}

/// Normalised status event used for rule matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub external_lead_id: String,
    pub lead_group: LeadGroupKind,
    pub status: String,
    pub introducer: Option<String>,
    /// Always `None` for IRL events.
    pub data35: Option<String>,
}

impl StatusEvent {
    pub fn resolve(
        payload: &StatusWebhookPayload,
        groups: &LeadGroupIds,
    ) -> Result<EventResolution, AppError> {
        let external_lead_id = payload
            .id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Validation("Missing lead id".to_string()))?;
        let status = payload
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Validation("Missing status".to_string()))?;
        let raw_group = payload
            .leadgroup
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Validation("Missing lead group".to_string()))?;

        let Some(lead_group) = groups.kind_for(raw_group) else {
            return Ok(EventResolution::UnknownLeadGroup(raw_group.to_string()));
        };

        let data35 = match lead_group {
            LeadGroupKind::Irl => None,
            LeadGroupKind::Dca => payload.data35.clone(),
        };

        Ok(EventResolution::Event(StatusEvent {
            external_lead_id: external_lead_id.to_string(),
            lead_group,
            status: status.to_string(),
            introducer: payload.introducer.clone(),
            data35,
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ambiguous: bool,
}
