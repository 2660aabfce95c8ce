use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityReason {
    /// No start date, so nothing to check.
    NoDateManual,
    BeforeWindow,
    AfterWindow,
    WithinWindow,
}

impl EligibilityReason {
    pub fn describe(&self) -> &'static str {
        match self {
            EligibilityReason::NoDateManual => "manual - no date to check",
            EligibilityReason::BeforeWindow => "agreement started before the eligible window",
            EligibilityReason::AfterWindow => "agreement started after the eligible window",
            EligibilityReason::WithinWindow => "agreement started within the eligible window",
        }
    }
}

/// `eligible` and `in_special_window` are independent axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityVerdict {
    pub eligible: bool,
    pub reason: EligibilityReason,
    pub in_special_window: bool,
}

/// Checks an agreement start date against the primary and special windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityClassifier {
    primary: DateWindow,
    special: DateWindow,
}

impl EligibilityClassifier {
    pub fn new(primary: DateWindow, special: DateWindow) -> Self {
        Self { primary, special }
    }

    pub fn classify(&self, start_date: Option<NaiveDate>) -> EligibilityVerdict {
        let Some(date) = start_date else {
            return EligibilityVerdict {
                eligible: true,
                reason: EligibilityReason::NoDateManual,
                in_special_window: false,
            };
        };

        let (eligible, reason) = if date < self.primary.start {
            (false, EligibilityReason::BeforeWindow)
        } else if date > self.primary.end {
            (false, EligibilityReason::AfterWindow)
        } else {
            (true, EligibilityReason::WithinWindow)
        };

        EligibilityVerdict {
            eligible,
            reason,
            in_special_window: self.special.contains(date),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn classifier() -> EligibilityClassifier {
        EligibilityClassifier::new(
            DateWindow::new(d(2007, 4, 6), d(2024, 11, 1)),
            DateWindow::new(d(2021, 1, 28), d(2024, 11, 1)),
        )
    }

    #[test]
    fn test_missing_date_is_eligible_manual() {
        let v = classifier().classify(None);
        assert!(v.eligible);
        assert_eq!(v.reason, EligibilityReason::NoDateManual);
        assert!(!v.in_special_window);
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let c = classifier();
        assert!(c.classify(Some(d(2007, 4, 6))).eligible);
        assert!(c.classify(Some(d(2024, 11, 1))).eligible);
        assert_eq!(
            c.classify(Some(d(2007, 4, 5))).reason,
            EligibilityReason::BeforeWindow
        );
        assert_eq!(
            c.classify(Some(d(2024, 11, 2))).reason,
            EligibilityReason::AfterWindow
        );
    }

    #[test]
    fn test_special_window_does_not_change_eligibility() {
        let v = classifier().classify(Some(d(2022, 5, 1)));
        assert!(v.eligible);
        assert!(v.in_special_window);

        let v = classifier().classify(Some(d(2015, 5, 1)));
        assert!(v.eligible);
        assert!(!v.in_special_window);
    }
}
