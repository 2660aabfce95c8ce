use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct NotifyBody<'a> {
    claim_id: Uuid,
    leads: &'a [String],
}

/// Best-effort announcement of created lead ids. Failures are logged and
/// otherwise ignored.
#[derive(Clone)]
pub struct LeadNotifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl LeadNotifier {
    pub fn new(url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Fires the notification on a detached task.
    pub fn notify(&self, claim_id: Uuid, lead_ids: Vec<String>) {
        if self.url.is_none() || lead_ids.is_empty() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.send(claim_id, &lead_ids).await;
        });
    }

    /// Posts `{claim_id, leads}` and swallows any failure.
    pub async fn send(&self, claim_id: Uuid, lead_ids: &[String]) {
        let Some(url) = &self.url else {
            return;
        };

        let result = self
            .client
            .post(url)
            .json(&NotifyBody {
                claim_id,
                leads: lead_ids,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => tracing::debug!(
                "Notified {} lead ids for claim {}",
                lead_ids.len(),
                claim_id
            ),
            Err(e) => tracing::warn!("Lead notification for claim {} failed: {}", claim_id, e),
        }
    }
}
