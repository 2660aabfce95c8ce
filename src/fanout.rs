use crate::config::CostTiers;
use crate::eligibility::{EligibilityClassifier, EligibilityVerdict};
use crate::lender_directory::{LenderDirectory, LenderMatch, LenderSnapshot};
use crate::models::{
    AccountAudit, AccountSource, Applicant, ClaimConsents, ClaimSubmission, DcaEligibility,
    FinancialAccount, LeadGroupKind, LeadPayload, LeadSpec, MatchResult,
};
use bigdecimal::BigDecimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const REF_FA_ELIGIBLE: &str = "FA Eligible";
pub const REF_FA_NON_ELIGIBLE: &str = "FA Non Eligible";
pub const REF_FA_UNKNOWN: &str = "FA Unknown";
pub const PENDING_SUFFIX: &str = " - pending";
pub const REF_IRL_VERIFIED: &str = "Verified IRL Portfolio";
pub const REF_IRL_SUSPENSE: &str = "IRL Suspense";

/// Everything a single fan-out run decided, before any dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutPlan {
    /// In dispatch order.
    pub leads: Vec<LeadSpec>,
    pub proceeding: Vec<AccountAudit>,
    pub date_ineligible: Vec<AccountAudit>,
    pub unmatched_lenders: Vec<AccountAudit>,
    pub directory_fingerprint: String,
}

impl FanoutPlan {
    pub fn count(&self, kind: LeadGroupKind) -> usize {
        self.leads.iter().filter(|l| l.lead_type == kind).count()
    }
}

/// DCA reference for one account. The first matching rule wins; the pending
/// suffix is applied last.
pub fn dca_reference(
    verdict: &EligibilityVerdict,
    source: AccountSource,
    dca: DcaEligibility,
    consents: &ClaimConsents,
) -> String {
    let base = if verdict.in_special_window {
        REF_FA_NON_ELIGIBLE
    } else if source == AccountSource::Manual {
        REF_FA_UNKNOWN
    } else {
        match dca {
            DcaEligibility::Unknown => REF_FA_UNKNOWN,
            DcaEligibility::Yes => REF_FA_ELIGIBLE,
            DcaEligibility::No => REF_FA_NON_ELIGIBLE,
        }
    };

    if consents.existing_representation_confirmed || consents.cmc_detected_in_report {
        format!("{}{}", base, PENDING_SUFFIX)
    } else {
        base.to_string()
    }
}

pub fn irl_reference(verdict: &EligibilityVerdict, dca: DcaEligibility, irl: bool) -> &'static str {
    if verdict.in_special_window {
        REF_IRL_SUSPENSE
    } else if irl && dca == DcaEligibility::Yes {
        REF_IRL_VERIFIED
    } else {
        REF_IRL_SUSPENSE
    }
}

/// Running cost tiering over the DCA references of one claim.
struct CostLadder<'a> {
    tiers: &'a CostTiers,
    eligible_seen: usize,
}

impl<'a> CostLadder<'a> {
    fn new(tiers: &'a CostTiers) -> Self {
        Self {
            tiers,
            eligible_seen: 0,
        }
    }

    fn next(&mut self, reference: &str) -> BigDecimal {
        if reference != REF_FA_ELIGIBLE {
            return self.tiers.rest.clone();
        }
        self.eligible_seen += 1;
        match self.eligible_seen {
            1 => self.tiers.first.clone(),
            2 => self.tiers.second.clone(),
            _ => self.tiers.rest.clone(),
        }
    }
}

fn audit(account: &FinancialAccount, detail: impl Into<String>) -> AccountAudit {
    AccountAudit {
        lender_name: account.lender_name.clone(),
        account_number: account.account_number.clone(),
        source: account.source,
        detail: detail.into(),
    }
}

/// Turns a claim's accounts into an ordered list of CRM leads.
pub struct FanoutPipeline {
    directory: Arc<LenderDirectory>,
    classifier: EligibilityClassifier,
    tiers: CostTiers,
    threshold: f64,
}

impl FanoutPipeline {
    pub fn new(
        directory: Arc<LenderDirectory>,
        classifier: EligibilityClassifier,
        tiers: CostTiers,
    ) -> Self {
        let threshold = directory.threshold();
        Self {
            directory,
            classifier,
            tiers,
            threshold,
        }
    }

    /// Plans against the directory's current snapshot.
    pub async fn plan(&self, claim: &ClaimSubmission) -> FanoutPlan {
        let snapshot = self.directory.snapshot().await;
        self.plan_with_snapshot(&snapshot, claim)
    }

    /// Deterministic for a given claim and snapshot.
    pub fn plan_with_snapshot(
        &self,
        snapshot: &LenderSnapshot,
        claim: &ClaimSubmission,
    ) -> FanoutPlan {
        let consents = claim.consents();
        let applicant = claim.applicant();

        let mut resolved: Vec<(FinancialAccount, Option<LenderMatch>)> = claim
            .accounts()
            .into_iter()
            .map(|account| {
                let hit = snapshot.get_by_name(&account.lender_name, self.threshold);
                (account, hit)
            })
            .collect();
        resolved.sort_by_key(|(_, hit)| {
            Reverse(hit.as_ref().map(|m| m.lender.cost_priority_rank).unwrap_or(0))
        });

        let mut plan = FanoutPlan {
            leads: Vec::new(),
            proceeding: Vec::new(),
            date_ineligible: Vec::new(),
            unmatched_lenders: Vec::new(),
            directory_fingerprint: snapshot.fingerprint.clone(),
        };
        let mut ladder = CostLadder::new(&self.tiers);

        for (account, hit) in resolved {
            let match_result = hit
                .as_ref()
                .map(|m| m.to_match_result(&account.lender_name))
                .unwrap_or_else(|| MatchResult::unmatched(&account.lender_name));
            let verdict = self.classifier.classify(account.start_date);

            if !verdict.eligible && account.source == AccountSource::Found {
                tracing::debug!(
                    "Skipping {} ({:?}): {}",
                    account.lender_name,
                    account.start_date,
                    verdict.reason.describe()
                );
                plan.date_ineligible
                    .push(audit(&account, verdict.reason.describe()));
                continue;
            }

            let (dca, irl) = hit
                .as_ref()
                .map(|m| (m.lender.dca_eligible, m.lender.irl_eligible))
                .unwrap_or((DcaEligibility::Unknown, false));

            if hit.is_none() {
                tracing::debug!("No lender match for '{}'", account.lender_name);
                plan.unmatched_lenders
                    .push(audit(&account, "no lender above match threshold"));
            }

            let payload = self.payload(&applicant, &account, hit.as_ref(), &verdict, claim);

            if consents.motor_finance {
                let reference = dca_reference(&verdict, account.source, dca, &consents);
                let cost = ladder.next(&reference);
                tracing::debug!(
                    "DCA lead for {}: {} at {}",
                    account.lender_name,
                    reference,
                    cost
                );
                plan.leads.push(LeadSpec {
                    lead_type: LeadGroupKind::Dca,
                    reference,
                    cost: Some(cost),
                    payload: payload.clone(),
                    source_account: account.clone(),
                    match_result: match_result.clone(),
                });
            }

            if consents.irresponsible_lending && irl {
                let reference = irl_reference(&verdict, dca, irl);
                tracing::debug!("IRL lead for {}: {}", account.lender_name, reference);
                plan.leads.push(LeadSpec {
                    lead_type: LeadGroupKind::Irl,
                    reference: reference.to_string(),
                    cost: None,
                    payload,
                    source_account: account.clone(),
                    match_result,
                });
            }

            plan.proceeding
                .push(audit(&account, verdict.reason.describe()));
        }

        tracing::info!(
            "Fan-out planned {} leads ({} DCA, {} IRL), {} date-ineligible, {} unmatched",
            plan.leads.len(),
            plan.count(LeadGroupKind::Dca),
            plan.count(LeadGroupKind::Irl),
            plan.date_ineligible.len(),
            plan.unmatched_lenders.len()
        );

        plan
    }

    fn payload(
        &self,
        applicant: &Applicant,
        account: &FinancialAccount,
        hit: Option<&LenderMatch>,
        verdict: &EligibilityVerdict,
        claim: &ClaimSubmission,
    ) -> LeadPayload {
        let mut extra_notes = BTreeMap::new();
        extra_notes.insert(
            "Account source".to_string(),
            format!("{:?}", account.source),
        );
        extra_notes.insert(
            "Date check".to_string(),
            verdict.reason.describe().to_string(),
        );
        if verdict.in_special_window {
            extra_notes.insert("Special window".to_string(), "Yes".to_string());
        }
        match hit {
            Some(m) => {
                extra_notes.insert(
                    "Lender match".to_string(),
                    format!("{} ({:?}, {:.2})", m.alias, m.match_type, m.score),
                );
            }
            None => {
                extra_notes.insert(
                    "Lender match".to_string(),
                    format!("unmatched: {}", account.lender_name),
                );
            }
        }
        if let Some(campaign) = &claim.campaign {
            extra_notes.insert("Campaign".to_string(), campaign.clone());
        }

        LeadPayload {
            applicant: applicant.clone(),
            lender_name: hit
                .map(|m| m.lender.display_name.clone())
                .unwrap_or_else(|| account.lender_name.clone()),
            lender_export_name: hit.map(|m| m.lender.export_name.clone()),
            account_number: account.account_number.clone(),
            start_date: account.start_date,
            current_balance: account.current_balance.clone(),
            monthly_payment: account.monthly_payment.clone(),
            extra_notes,
        }
    }
}
