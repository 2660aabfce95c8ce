use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::str::FromStr;
use std::time::Duration;

use crate::eligibility::DateWindow;

/// Per-tier DCA lead costs.
#[derive(Debug, Clone, PartialEq)]
pub struct CostTiers {
    pub first: BigDecimal,
    pub second: BigDecimal,
    pub rest: BigDecimal,
}

impl Default for CostTiers {
    fn default() -> Self {
        Self {
            first: BigDecimal::from(100),
            second: BigDecimal::from(50),
            rest: BigDecimal::from(0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub flg_base_url: String,
    pub flg_api_key: String,
    pub flg_dca_lead_group: String,
    pub flg_irl_lead_group: String,
    pub lead_notify_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_hmac_secret: Option<String>,
    pub webhook_hmac_tolerance: Duration,
    pub admin_token: Option<String>,
    pub lender_cache_ttl: Duration,
    pub lender_match_threshold: f64,
    pub primary_window: DateWindow,
    pub special_window: DateWindow,
    pub cost_tiers: CostTiers,
    pub dispatch_workers: usize,
    pub dispatch_queue_capacity: usize,
    pub dispatch_max_attempts: u32,
    pub dispatch_base_delay: Duration,
    pub dispatch_max_delay: Duration,
    /// How long a lead waits for an open CRM breaker before the claim is left pending.
    pub dispatch_max_open_wait: Duration,
    pub action_base_delay: Duration,
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))
        .and_then(|value| {
            if value.trim().is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
            Ok(value)
        })
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn http_url(name: &str, value: String) -> anyhow::Result<String> {
    let parsed = url::Url::parse(value.trim())
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(value.trim().trim_end_matches('/').to_string())
}

fn parsed_or<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value '{}'", name, raw)),
        None => Ok(default),
    }
}

fn date_or(name: &str, default: NaiveDate) -> anyhow::Result<NaiveDate> {
    match optional(name) {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| anyhow::anyhow!("{} must be a YYYY-MM-DD date, got '{}'", name, raw)),
        None => Ok(default),
    }
}

fn ymd(y: i32, m: u32, d: u32) -> anyhow::Result<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| anyhow::anyhow!("invalid built-in date"))
}

fn window(name: &str, start: NaiveDate, end: NaiveDate) -> anyhow::Result<DateWindow> {
    let start = date_or(&format!("{}_START", name), start)?;
    let end = date_or(&format!("{}_END", name), end)?;
    if start > end {
        anyhow::bail!("{}_START must not be after {}_END", name, name);
    }
    Ok(DateWindow::new(start, end))
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = CostTiers::default();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            flg_base_url: required("FLG_BASE_URL").and_then(|u| http_url("FLG_BASE_URL", u))?,
            flg_api_key: required("FLG_API_KEY")?,
            flg_dca_lead_group: required("FLG_DCA_LEAD_GROUP")?,
            flg_irl_lead_group: required("FLG_IRL_LEAD_GROUP")?,
            lead_notify_url: optional("LEAD_NOTIFY_URL")
                .map(|u| http_url("LEAD_NOTIFY_URL", u))
                .transpose()?,
            webhook_secret: optional("WEBHOOK_SECRET"),
            webhook_hmac_secret: optional("WEBHOOK_HMAC_SECRET"),
            webhook_hmac_tolerance: Duration::from_secs(parsed_or(
                "WEBHOOK_HMAC_TOLERANCE_SECS",
                300u64,
            )?),
            admin_token: optional("ADMIN_TOKEN"),
            lender_cache_ttl: Duration::from_secs(parsed_or("LENDER_CACHE_TTL_SECS", 300u64)?),
            lender_match_threshold: parsed_or("LENDER_MATCH_THRESHOLD", 0.80f64).and_then(|t| {
                if !(0.0..=1.0).contains(&t) {
                    anyhow::bail!("LENDER_MATCH_THRESHOLD must be between 0 and 1");
                }
                Ok(t)
            })?,
            primary_window: window("PRIMARY_WINDOW", ymd(2007, 4, 6)?, ymd(2024, 11, 1)?)?,
            special_window: window("SPECIAL_WINDOW", ymd(2021, 1, 28)?, ymd(2024, 11, 1)?)?,
            cost_tiers: CostTiers {
                first: parsed_or("COST_TIER_1", defaults.first)?,
                second: parsed_or("COST_TIER_2", defaults.second)?,
                rest: parsed_or("COST_TIER_3", defaults.rest)?,
            },
            dispatch_workers: parsed_or("DISPATCH_WORKERS", 2usize)?.max(1),
            dispatch_queue_capacity: parsed_or("DISPATCH_QUEUE_CAPACITY", 256usize)?.max(1),
            dispatch_max_attempts: parsed_or("DISPATCH_MAX_ATTEMPTS", 3u32)?.max(1),
            dispatch_base_delay: Duration::from_millis(parsed_or(
                "DISPATCH_BASE_DELAY_MS",
                2000u64,
            )?),
            dispatch_max_delay: Duration::from_millis(parsed_or(
                "DISPATCH_MAX_DELAY_MS",
                30000u64,
            )?),
            dispatch_max_open_wait: Duration::from_millis(parsed_or(
                "DISPATCH_MAX_OPEN_WAIT_MS",
                120000u64,
            )?),
            action_base_delay: Duration::from_millis(parsed_or("ACTION_BASE_DELAY_MS", 250u64)?),
        };

        if config.webhook_secret.is_none() && config.webhook_hmac_secret.is_none() {
            tracing::warn!("No webhook secret configured; status webhooks are unauthenticated");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("FLG Base URL: {}", config.flg_base_url);
        if let Some(ref notify) = config.lead_notify_url {
            tracing::info!("Lead notification URL configured: {}", notify);
        }
        tracing::debug!(
            "Dispatch: {} workers, queue {}, {} attempts",
            config.dispatch_workers,
            config.dispatch_queue_capacity,
            config.dispatch_max_attempts
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_url_trims_trailing_slash() {
        let url = http_url("X", "https://crm.example.com/".to_string()).unwrap();
        assert_eq!(url, "https://crm.example.com");
        assert!(http_url("X", "crm.example.com".to_string()).is_err());
        assert!(http_url("X", "ftp://crm.example.com".to_string()).is_err());
    }

    #[test]
    fn test_default_cost_tiers() {
        let tiers = CostTiers::default();
        assert_eq!(tiers.first, BigDecimal::from(100));
        assert_eq!(tiers.second, BigDecimal::from(50));
        assert_eq!(tiers.rest, BigDecimal::from(0));
    }
}
