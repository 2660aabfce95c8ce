use crate::crm_client::{CrmApi, CrmError};
use crate::errors::AppError;
use crate::fanout::FanoutPipeline;
use crate::models::{ClaimLeadSummary, ClaimSubmission, DispatchMode, LeadGroupKind, LeadOutcome};
use crate::notifier::LeadNotifier;
use crate::repository::ClaimRepository;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    /// Longest total wait on calls that were refused without being attempted.
    pub max_open_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2,
            max_delay: Duration::from_secs(30),
            max_open_wait: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given 1-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// How the retry loop treats a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Retry after backoff; the call counts as an attempt.
    Transient,
    /// Give up.
    Fatal,
    /// The call never left the process. Wait and try again without
    /// spending an attempt.
    NotAttempted,
}

/// Retry classification for CRM calls.
pub fn classify_crm(err: &CrmError) -> Failure {
    match err {
        CrmError::CircuitOpen => Failure::NotAttempted,
        e if e.is_transient() => Failure::Transient,
        _ => Failure::Fatal,
    }
}

/// Runs `op` until it succeeds, fails fatally, or the policy's attempts run
/// out. Returns the last result and the number of calls actually attempted,
/// which is 0 when every call was refused.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    classify: impl Fn(&E) -> Failure,
    mut op: F,
) -> (Result<T, E>, u32)
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    let mut waited = Duration::ZERO;
    loop {
        let result = op().await;
        let Some(failure) = result.as_ref().err().map(&classify) else {
            return (result, attempts + 1);
        };

        if failure != Failure::NotAttempted {
            attempts += 1;
        }

        let delay = match failure {
            Failure::Transient if attempts < policy.max_attempts => {
                policy.delay_after(attempts)
            }
            Failure::NotAttempted if waited < policy.max_open_wait => policy
                .base_delay
                .max(Duration::from_millis(10))
                .min(policy.max_open_wait - waited),
            _ => return (result, attempts),
        };

        if let Err(e) = &result {
            if failure == Failure::NotAttempted {
                tracing::debug!("{} not attempted, waiting {:?}: {}", label, delay, e);
                waited += delay;
            } else {
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    label,
                    attempts,
                    policy.max_attempts,
                    delay,
                    e
                );
            }
        }
        tokio::time::sleep(delay).await;
    }
}

/// Plans a claim, dispatches each lead and records the outcome.
pub struct ClaimProcessor {
    pipeline: Arc<FanoutPipeline>,
    crm: Arc<dyn CrmApi>,
    claims: Arc<dyn ClaimRepository>,
    notifier: LeadNotifier,
    retry: RetryPolicy,
}

impl ClaimProcessor {
    pub fn new(
        pipeline: Arc<FanoutPipeline>,
        crm: Arc<dyn CrmApi>,
        claims: Arc<dyn ClaimRepository>,
        notifier: LeadNotifier,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pipeline,
            crm,
            claims,
            notifier,
            retry,
        }
    }

    /// Runs one claim end to end. Safe to re-run: the summary is overwritten.
    ///
    /// Lead failures are counted, never returned; only storage failures are.
    pub async fn process(
        &self,
        claim_id: Uuid,
        claim: &ClaimSubmission,
    ) -> Result<ClaimLeadSummary, AppError> {
        tracing::info!("▶ Processing claim {}", claim_id);
        let plan = self.pipeline.plan(claim).await;

        let mut outcomes = Vec::with_capacity(plan.leads.len());
        for lead in &plan.leads {
            let label = format!("{} lead for {}", lead.lead_type, lead.payload.lender_name);
            let (result, attempts) = retry_with_backoff(&self.retry, &label, classify_crm, || {
                self.crm.create_lead(lead)
            })
            .await;

            let (external_lead_id, error) = match result {
                Ok(id) => (Some(id), None),
                Err(e) => {
                    tracing::error!("✗ {} failed after {} attempts: {}", label, attempts, e);
                    (None, Some(e.to_string()))
                }
            };

            outcomes.push(LeadOutcome {
                lead_type: lead.lead_type,
                lender_name: lead.payload.lender_name.clone(),
                reference: lead.reference.clone(),
                cost: lead.cost.clone(),
                external_lead_id,
                error,
                attempts,
            });
        }

        let external_lead_ids: Vec<String> = outcomes
            .iter()
            .filter_map(|o| o.external_lead_id.clone())
            .collect();

        let summary = ClaimLeadSummary {
            claim_id,
            total_leads: outcomes.len(),
            successful_leads: external_lead_ids.len(),
            failed_leads: outcomes.len() - external_lead_ids.len(),
            dca_leads: plan.count(LeadGroupKind::Dca),
            irl_leads: plan.count(LeadGroupKind::Irl),
            external_lead_ids: external_lead_ids.clone(),
            leads: outcomes,
            proceeding: plan.proceeding,
            date_ineligible: plan.date_ineligible,
            unmatched_lenders: plan.unmatched_lenders,
            directory_fingerprint: plan.directory_fingerprint,
            processed_at: Utc::now(),
        };

        self.claims.save_summary(&summary).await?;

        let unattempted = summary
            .leads
            .iter()
            .filter(|o| o.external_lead_id.is_none() && o.attempts == 0)
            .count();
        if unattempted > 0 {
            // Recovery re-runs the claim once the CRM is reachable again.
            tracing::warn!(
                "Claim {} left pending: {} leads never reached the CRM",
                claim_id,
                unattempted
            );
        } else {
            self.claims.mark_dispatched(claim_id).await?;
        }

        tracing::info!(
            "✓ Claim {} processed: {} successful, {} failed",
            claim_id,
            summary.successful_leads,
            summary.failed_leads
        );

        self.notifier.notify(claim_id, external_lead_ids);
        Ok(summary)
    }
}

#[derive(Debug)]
struct DispatchJob {
    claim_id: Uuid,
    claim: ClaimSubmission,
}

/// Bounded queue drained by a fixed set of worker tasks.
#[derive(Clone)]
pub struct TaskRunner {
    sender: mpsc::Sender<DispatchJob>,
    processor: Arc<ClaimProcessor>,
}

impl TaskRunner {
    /// Spawns `workers` tasks sharing one queue of `capacity` jobs.
    pub fn start(processor: Arc<ClaimProcessor>, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<DispatchJob>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        for worker in 0..workers.max(1) {
            let receiver = receiver.clone();
            let processor = processor.clone();
            tokio::spawn(async move {
                loop {
                    let job = { receiver.lock().await.recv().await };
                    let Some(job) = job else {
                        tracing::debug!("Dispatch worker {} stopping", worker);
                        break;
                    };
                    run_job(&processor, job).await;
                }
            });
        }

        tracing::info!(
            "Dispatch runner started: {} workers, queue capacity {}",
            workers.max(1),
            capacity.max(1)
        );

        Self { sender, processor }
    }

    /// Queues a claim. When the queue is saturated the claim runs on a
    /// detached task instead and the mode is reported as `Sync`.
    pub fn submit(&self, claim_id: Uuid, claim: ClaimSubmission) -> DispatchMode {
        match self.sender.try_send(DispatchJob { claim_id, claim }) {
            Ok(()) => DispatchMode::Async,
            Err(mpsc::error::TrySendError::Full(job))
            | Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(
                    "Dispatch queue unavailable, running claim {} inline",
                    job.claim_id
                );
                let processor = self.processor.clone();
                tokio::spawn(async move {
                    run_job(&processor, job).await;
                });
                DispatchMode::Sync
            }
        }
    }

    /// Re-queues every claim that was persisted but never dispatched.
    pub async fn recover_pending(&self, claims: &dyn ClaimRepository) -> Result<usize, AppError> {
        let pending = claims.pending_claims().await?;
        let count = pending.len();
        for (claim_id, claim) in pending {
            self.submit(claim_id, claim);
        }
        if count > 0 {
            tracing::info!("Recovered {} pending claims", count);
        }
        Ok(count)
    }
}

async fn run_job(processor: &ClaimProcessor, job: DispatchJob) {
    if let Err(e) = processor.process(job.claim_id, &job.claim).await {
        // The claim stays pending and is picked up again on the next start.
        tracing::error!("✗ Claim {} dispatch failed: {}", job.claim_id, e);
    }
}
