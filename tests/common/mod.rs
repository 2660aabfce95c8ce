//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_flg_claims_api::config::CostTiers;
use rust_flg_claims_api::crm_client::{CrmApi, CrmError, LeadGroupIds, LeadUpdate};
use rust_flg_claims_api::dispatch::RetryPolicy;
use rust_flg_claims_api::eligibility::{DateWindow, EligibilityClassifier};
use rust_flg_claims_api::fanout::FanoutPipeline;
use rust_flg_claims_api::lender_directory::LenderDirectory;
use rust_flg_claims_api::models::{ClaimSubmission, DcaEligibility, LeadSpec, LenderRecord};
use rust_flg_claims_api::repository::MemoryStorage;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn groups() -> LeadGroupIds {
    LeadGroupIds {
        dca: "1001".to_string(),
        irl: "1002".to_string(),
    }
}

pub fn classifier() -> EligibilityClassifier {
    EligibilityClassifier::new(
        DateWindow::new(d(2007, 4, 6), d(2024, 11, 1)),
        DateWindow::new(d(2021, 1, 28), d(2024, 11, 1)),
    )
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        multiplier: 2,
        max_delay: Duration::from_millis(5),
        max_open_wait: Duration::from_secs(1),
    }
}

fn lender(
    id: i64,
    name: &str,
    aka: &[&str],
    dca: DcaEligibility,
    irl: bool,
    rank: i32,
) -> LenderRecord {
    LenderRecord {
        id,
        canonical_name: name.to_string(),
        aka_names: aka.iter().map(|a| a.to_string()).collect(),
        display_name: name.to_string(),
        export_name: name.to_uppercase(),
        dca_eligible: dca,
        irl_eligible: irl,
        cost_priority_rank: rank,
    }
}

/// A small directory with distinct ranks so fan-out order is predictable.
pub fn lenders() -> Vec<LenderRecord> {
    vec![
        lender(
            1,
            "Santander Consumer Finance",
            &["Santander", "Santander UK"],
            DcaEligibility::Yes,
            true,
            10,
        ),
        lender(2, "Moneybarn", &[], DcaEligibility::Yes, false, 5),
        lender(3, "Blue Motor Finance", &["Blue Motor"], DcaEligibility::Yes, false, 3),
        lender(4, "Close Brothers", &[], DcaEligibility::No, true, 2),
        lender(5, "Startline Motor Finance", &[], DcaEligibility::Yes, false, 0),
    ]
}

pub fn storage() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new().with_lenders(lenders()))
}

pub fn directory(storage: &Arc<MemoryStorage>) -> Arc<LenderDirectory> {
    Arc::new(LenderDirectory::new(
        storage.clone(),
        Duration::from_secs(60),
        0.80,
    ))
}

pub fn pipeline(storage: &Arc<MemoryStorage>) -> Arc<FanoutPipeline> {
    Arc::new(FanoutPipeline::new(
        directory(storage),
        classifier(),
        CostTiers::default(),
    ))
}

/// Builds a claim from `(lender, start_date)` pairs for found and manual accounts.
pub fn claim(
    found: &[(&str, &str)],
    manual: &[(&str, &str)],
    motor_finance: bool,
    irresponsible_lending: bool,
) -> ClaimSubmission {
    let accounts = |list: &[(&str, &str)]| {
        list.iter()
            .map(|(name, date)| json!({"lenderName": name, "startDate": date}))
            .collect::<Vec<_>>()
    };

    serde_json::from_value(json!({
        "firstName": "Jane",
        "lastName": "Doe",
        "email": "jane.doe@example.co.uk",
        "phone1": "07400 123456",
        "postcode": "M1 1AA",
        "motorFinanceConsent": motor_finance,
        "irresponsibleLendingConsent": irresponsible_lending,
        "foundLenders": accounts(found),
        "additionalLenders": accounts(manual),
    }))
    .unwrap()
}

/// In-memory CRM that records every call.
///
/// Lead creation fails with `Rejected` for lenders in `reject`, and with a
/// transient `Transport` error for the first `flaky` calls.
#[derive(Default)]
pub struct FakeCrm {
    pub created: Mutex<Vec<LeadSpec>>,
    pub updates: Mutex<Vec<(String, LeadUpdate)>>,
    reject: HashSet<String>,
    flaky: Mutex<u32>,
    calls: Mutex<u32>,
}

impl FakeCrm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(lender_names: &[&str]) -> Self {
        Self {
            reject: lender_names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn flaky(failures: u32) -> Self {
        Self {
            flaky: Mutex::new(failures),
            ..Self::default()
        }
    }

    pub fn created(&self) -> Vec<LeadSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(String, LeadUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    fn take_flaky(&self) -> bool {
        let mut remaining = self.flaky.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl CrmApi for FakeCrm {
    async fn create_lead(&self, lead: &LeadSpec) -> Result<String, CrmError> {
        *self.calls.lock().unwrap() += 1;
        if self.take_flaky() {
            return Err(CrmError::Transport("connection refused".to_string()));
        }
        if self.reject.contains(&lead.payload.lender_name) {
            return Err(CrmError::Rejected("status 1: duplicate lead".to_string()));
        }

        let mut created = self.created.lock().unwrap();
        created.push(lead.clone());
        Ok(format!("L{}", created.len()))
    }

    async fn update_lead(&self, lead_id: &str, update: &LeadUpdate) -> Result<(), CrmError> {
        *self.calls.lock().unwrap() += 1;
        if self.take_flaky() {
            return Err(CrmError::Transport("connection refused".to_string()));
        }
        self.updates
            .lock()
            .unwrap()
            .push((lead_id.to_string(), update.clone()));
        Ok(())
    }
}
