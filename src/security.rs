use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// Verifies `hex(HMAC-SHA256(secret, "{timestamp}.{body}"))` on inbound webhooks.
#[derive(Clone)]
pub struct HmacValidator {
    secret: String,
    tolerance: Duration,
}

impl HmacValidator {
    pub fn new(secret: String, tolerance: Duration) -> Self {
        tracing::info!("🔐 Webhook HMAC validation enabled (tol: {}s)", tolerance.as_secs());
        Self { secret, tolerance }
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> Result<HmacSha256, String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| "Invalid secret key length".to_string())?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }

    /// Hex signature for the given timestamp and body.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String, String> {
        Ok(hex::encode(self.mac(timestamp, body)?.finalize().into_bytes()))
    }

    /// `timestamp` is Unix seconds as sent in the timestamp header.
    pub fn verify(
        &self,
        timestamp: &str,
        body: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        let ts: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| format!("Invalid timestamp '{}'", timestamp))?;

        let drift = (now.timestamp() - ts).unsigned_abs();
        if drift > self.tolerance.as_secs() {
            return Err(format!(
                "Timestamp out of tolerance range (drift: {}s, tolerance: {}s)",
                drift,
                self.tolerance.as_secs()
            ));
        }

        let sig_bytes = hex::decode(signature.trim()).map_err(|_| "Invalid hex signature")?;

        // verify_slice compares in constant time
        self.mac(timestamp.trim(), body)?
            .verify_slice(&sig_bytes)
            .map_err(|_| "Signature mismatch".to_string())
    }
}
