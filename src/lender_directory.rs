use crate::errors::AppError;
use crate::models::{LenderRecord, MatchResult};
use crate::similarity::{self, MatchType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Where lender records are loaded from.
#[async_trait]
pub trait LenderSource: Send + Sync {
    async fn load_lenders(&self) -> Result<Vec<LenderRecord>, AppError>;
}

/// Best alias hit for a raw name.
#[derive(Debug, Clone, PartialEq)]
pub struct LenderMatch {
    pub lender: LenderRecord,
    pub alias: String,
    pub score: f64,
    pub match_type: MatchType,
}

impl LenderMatch {
    pub fn to_match_result(&self, raw_name: &str) -> MatchResult {
        MatchResult {
            raw_name: raw_name.to_string(),
            lender_id: Some(self.lender.id),
            canonical_name: Some(self.lender.canonical_name.clone()),
            display_name: Some(self.lender.display_name.clone()),
            export_name: Some(self.lender.export_name.clone()),
            matched_alias: Some(self.alias.clone()),
            score: self.score,
            match_type: self.match_type,
        }
    }
}

/// Immutable view of every lender at one point in time.
#[derive(Debug, Clone)]
pub struct LenderSnapshot {
    /// Sorted by id, which fixes the tie-break order for equal scores.
    pub lenders: Vec<LenderRecord>,
    pub loaded_at: DateTime<Utc>,
    /// SHA-256 over the serialized records.
    pub fingerprint: String,
}

impl LenderSnapshot {
    pub fn new(mut lenders: Vec<LenderRecord>) -> Self {
        lenders.sort_by_key(|l| l.id);
        let encoded = serde_json::to_vec(&lenders).unwrap_or_default();
        let fingerprint = hex::encode(Sha256::digest(&encoded));
        Self {
            lenders,
            loaded_at: Utc::now(),
            fingerprint,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Resolves a raw name to the best-scoring lender alias.
    ///
    /// An exact alias hit returns immediately. Otherwise the first alias with
    /// the strictly highest score wins, and it is returned only when the score
    /// reaches `threshold`.
    pub fn get_by_name(&self, name: &str, threshold: f64) -> Option<LenderMatch> {
        let mut best: Option<LenderMatch> = None;

        for lender in &self.lenders {
            for alias in lender.aliases() {
                let sim = similarity::score(name, alias);
                match sim.match_type {
                    MatchType::Exact => {
                        return Some(LenderMatch {
                            lender: lender.clone(),
                            alias: alias.to_string(),
                            score: 1.0,
                            match_type: MatchType::Exact,
                        });
                    }
                    MatchType::None => continue,
                    _ => {}
                }

                if best.as_ref().map_or(true, |b| sim.value > b.score) {
                    best = Some(LenderMatch {
                        lender: lender.clone(),
                        alias: alias.to_string(),
                        score: sim.value,
                        match_type: sim.match_type,
                    });
                }
            }
        }

        best.filter(|b| b.score >= threshold)
    }

    /// Like [`get_by_name`](Self::get_by_name) but always yields a `MatchResult`.
    pub fn resolve(&self, name: &str, threshold: f64) -> MatchResult {
        self.get_by_name(name, threshold)
            .map(|m| m.to_match_result(name))
            .unwrap_or_else(|| MatchResult::unmatched(name))
    }
}

/// Upper bound on how long a stale snapshot is served before reloading again.
const STALE_RETRY: Duration = Duration::from_secs(30);

fn single_entry_cache(ttl: Duration) -> Cache<(), Arc<LenderSnapshot>> {
    Cache::builder().max_capacity(1).time_to_live(ttl).build()
}

/// TTL-cached lender registry.
///
/// A failed reload keeps serving the last good snapshot and retries after a
/// short interval; with no snapshot ever loaded it serves an empty one.
pub struct LenderDirectory {
    source: Arc<dyn LenderSource>,
    fresh: Cache<(), Arc<LenderSnapshot>>,
    stale: Cache<(), Arc<LenderSnapshot>>,
    last_good: RwLock<Option<Arc<LenderSnapshot>>>,
    threshold: f64,
}

impl LenderDirectory {
    pub fn new(source: Arc<dyn LenderSource>, ttl: Duration, threshold: f64) -> Self {
        Self {
            source,
            fresh: single_entry_cache(ttl),
            stale: single_entry_cache(ttl.min(STALE_RETRY)),
            last_good: RwLock::new(None),
            threshold,
        }
    }

    /// Sets how long a stale snapshot is served after a failed reload.
    pub fn with_stale_retry(mut self, retry: Duration) -> Self {
        self.stale = single_entry_cache(retry);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Current snapshot, reloading transparently once the TTL has lapsed.
    pub async fn snapshot(&self) -> Arc<LenderSnapshot> {
        if let Some(snapshot) = self.fresh.get(&()).await {
            return snapshot;
        }
        if let Some(snapshot) = self.stale.get(&()).await {
            return snapshot;
        }
        self.refresh().await
    }

    /// Reloads every lender from the source. Never fails.
    pub async fn refresh(&self) -> Arc<LenderSnapshot> {
        match self.source.load_lenders().await {
            Ok(lenders) => {
                let snapshot = Arc::new(LenderSnapshot::new(lenders));
                tracing::info!(
                    "Lender directory refreshed: {} lenders, fingerprint {}",
                    snapshot.lenders.len(),
                    &snapshot.fingerprint[..12]
                );
                if let Ok(mut guard) = self.last_good.write() {
                    *guard = Some(snapshot.clone());
                }
                self.stale.invalidate(&()).await;
                self.fresh.insert((), snapshot.clone()).await;
                snapshot
            }
            Err(e) => {
                let previous = self.last_good.read().ok().and_then(|g| g.clone());
                match previous {
                    Some(snapshot) => {
                        tracing::warn!(
                            "Lender reload failed, serving snapshot from {}: {}",
                            snapshot.loaded_at,
                            e
                        );
                        self.stale.insert((), snapshot.clone()).await;
                        snapshot
                    }
                    None => {
                        tracing::warn!("Lender reload failed and no snapshot exists: {}", e);
                        Arc::new(LenderSnapshot::empty())
                    }
                }
            }
        }
    }

    /// Forces the next access to reload.
    pub async fn invalidate(&self) {
        self.fresh.invalidate(&()).await;
        self.stale.invalidate(&()).await;
        tracing::info!("Lender directory invalidated");
    }

    pub async fn get_by_name(&self, name: &str) -> Option<LenderMatch> {
        self.snapshot().await.get_by_name(name, self.threshold)
    }
}
