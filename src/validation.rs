use crate::errors::AppError;
use crate::models::ClaimSubmission;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::OnceLock;

fn email_regex() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| {
            // RFC 5322 simplified: local@domain.tld
            Regex::new(
                r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
            )
            .ok()
        })
        .as_ref()
}

/// Validate email address format.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    match email_regex() {
        Some(re) => re.is_match(email),
        None => true,
    }
}

/// Validate and normalize a UK phone number to its national digits
/// (`+44 7400 123456` → `07400123456`).
pub fn normalize_uk_phone(raw: &str) -> Option<String> {
    if raw.trim().len() < 10 {
        return None;
    }

    match phonenumber::parse(Some(CountryId::GB), raw) {
        Ok(number) if phonenumber::is_valid(&number) => {
            let national: String = number
                .format()
                .mode(Mode::National)
                .to_string()
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect();
            tracing::debug!("✓ Valid UK phone: {} → {}", raw, national);
            Some(national)
        }
        Ok(_) => {
            tracing::warn!("❌ Invalid UK phone number: {}", raw);
            None
        }
        Err(e) => {
            tracing::warn!("❌ Failed to parse UK phone '{}': {:?}", raw, e);
            None
        }
    }
}

/// Checks required claimant fields and normalizes contact details.
///
/// A bad phone number is dropped, not rejected.
pub fn validate_claim(mut claim: ClaimSubmission) -> Result<ClaimSubmission, AppError> {
    let mut missing = Vec::new();
    if claim.first_name.trim().is_empty() {
        missing.push("firstName");
    }
    if claim.last_name.trim().is_empty() {
        missing.push("lastName");
    }
    if claim.email.trim().is_empty() {
        missing.push("email");
    }
    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }

    claim.email = claim.email.trim().to_lowercase();
    if !is_valid_email(&claim.email) {
        return Err(AppError::Validation(format!(
            "Invalid email address: {}",
            claim.email
        )));
    }

    claim.phone1 = claim
        .phone1
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .and_then(normalize_uk_phone);

    if let Some(blank) = claim
        .found_lenders
        .iter()
        .chain(claim.additional_lenders.iter())
        .position(|a| a.lender_name.trim().is_empty())
    {
        return Err(AppError::Validation(format!(
            "Account {} has no lender name",
            blank + 1
        )));
    }

    Ok(claim)
}
