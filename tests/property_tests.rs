/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
mod common;

use common::{classifier, lenders};
use proptest::prelude::*;
use rust_flg_claims_api::config::CostTiers;
use rust_flg_claims_api::fanout::FanoutPipeline;
use rust_flg_claims_api::lender_directory::{LenderDirectory, LenderSnapshot};
use rust_flg_claims_api::models::ClaimSubmission;
use rust_flg_claims_api::repository::MemoryStorage;
use rust_flg_claims_api::similarity::{score, MatchType};
use rust_flg_claims_api::validation::{is_valid_email, normalize_uk_phone};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// Property: similarity is bounded and symmetric
proptest! {
    #[test]
    fn score_is_within_unit_interval(a in "\\PC{0,30}", b in "\\PC{0,30}") {
        let sim = score(&a, &b);
        prop_assert!((0.0..=1.0).contains(&sim.value));
    }

    #[test]
    fn score_is_symmetric(a in "[a-zA-Z ]{0,20}", b in "[a-zA-Z ]{0,20}") {
        let ab = score(&a, &b);
        let ba = score(&b, &a);
        prop_assert_eq!(ab.match_type, ba.match_type);
        prop_assert!((ab.value - ba.value).abs() < 1e-12);
    }

    #[test]
    fn case_and_padding_do_not_matter(name in "[a-z]{1,15}( [a-z]{1,10})?") {
        let sim = score(&format!("  {}  ", name.to_uppercase()), &name);
        prop_assert_eq!(sim.match_type, MatchType::Exact);
        prop_assert_eq!(sim.value, 1.0);
    }
}

// Property: an exact alias always resolves to its own lender
proptest! {
    #[test]
    fn exact_alias_resolves_to_its_lender(index in 0usize..5, shout in proptest::bool::ANY) {
        let directory = lenders();
        let snapshot = LenderSnapshot::new(directory.clone());
        let expected = &directory[index];

        let name = if shout {
            expected.canonical_name.to_uppercase()
        } else {
            expected.canonical_name.clone()
        };
        let hit = snapshot.get_by_name(&name, 0.8);

        prop_assert!(hit.is_some());
        let hit = hit.unwrap();
        prop_assert_eq!(hit.lender.id, expected.id);
        prop_assert_eq!(hit.match_type, MatchType::Exact);
    }
}

// Property: validation never panics
proptest! {
    #[test]
    fn email_validation_never_panics(email in "\\PC*") {
        let _ = is_valid_email(&email);
    }

    #[test]
    fn phone_normalization_never_panics(phone in "[0-9 +()-]{0,20}") {
        let _ = normalize_uk_phone(&phone);
    }
}

fn account_strategy() -> impl Strategy<Value = (String, String)> {
    let names = prop::sample::select(vec![
        "Santander",
        "Moneybarn",
        "Blue Motor",
        "Close Brothers",
        "Startline Motor Finance",
        "Acme Car Loans",
    ]);
    let years = 2003i32..2026;
    (names, years, 1u32..=12).prop_map(|(name, year, month)| {
        (name.to_string(), format!("{}-{:02}-15", year, month))
    })
}

fn claim_from(found: &[(String, String)], manual: &[(String, String)], irl: bool) -> ClaimSubmission {
    let accounts = |list: &[(String, String)]| {
        list.iter()
            .map(|(name, date)| json!({"lenderName": name, "startDate": date}))
            .collect::<Vec<_>>()
    };
    serde_json::from_value(json!({
        "firstName": "Sam",
        "lastName": "Jones",
        "email": "sam@example.com",
        "motorFinanceConsent": true,
        "irresponsibleLendingConsent": irl,
        "foundLenders": accounts(found),
        "additionalLenders": accounts(manual),
    }))
    .unwrap()
}

// Property: planning is deterministic and every account is accounted for
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn plan_is_deterministic_and_complete(
        found in prop::collection::vec(account_strategy(), 0..6),
        manual in prop::collection::vec(account_strategy(), 0..3),
        irl in proptest::bool::ANY,
    ) {
        let storage = Arc::new(MemoryStorage::new());
        let directory = Arc::new(LenderDirectory::new(storage, Duration::from_secs(60), 0.8));
        let pipeline = FanoutPipeline::new(directory, classifier(), CostTiers::default());
        let snapshot = LenderSnapshot::new(lenders());
        let claim = claim_from(&found, &manual, irl);

        let first = pipeline.plan_with_snapshot(&snapshot, &claim);
        let second = pipeline.plan_with_snapshot(&snapshot, &claim);

        prop_assert_eq!(&first.leads, &second.leads);
        prop_assert_eq!(
            first.proceeding.len() + first.date_ineligible.len(),
            found.len() + manual.len()
        );
        // One DCA lead per proceeding account with motor-finance consent.
        prop_assert_eq!(
            first.count(rust_flg_claims_api::models::LeadGroupKind::Dca),
            first.proceeding.len()
        );

        let paid = first
            .leads
            .iter()
            .filter_map(|l| l.cost.as_ref())
            .filter(|c| **c > bigdecimal::BigDecimal::from(0))
            .count();
        prop_assert!(paid <= 2);
    }
}
