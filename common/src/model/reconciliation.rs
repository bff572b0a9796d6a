use crate::{Money, ReconciliationExceptionId, ReconciliationReportId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunType {
    Hourly,
    Daily,
    OnDemand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Grading table from §4.R. `difference` is an absolute USD amount.
    pub fn grade(difference: Decimal) -> Self {
        let difference = difference.abs();
        if difference <= Decimal::ONE {
            Severity::Low
        } else if difference <= Decimal::from(100) {
            Severity::Medium
        } else if difference <= Decimal::from(1000) {
            Severity::High
        } else {
            Severity::Critical
        }
    }

    /// Only low-severity exceptions may be auto-corrected (§4.R).
    pub fn auto_correctable(self) -> bool {
        matches!(self, Severity::Low)
    }
}

#[derive(Debug, Clone)]
pub struct ReconciliationCheck {
    pub name: String,
    pub passed: bool,
    pub details: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReconciliationException {
    pub id: ReconciliationExceptionId,
    pub report_id: ReconciliationReportId,
    pub check_name: String,
    pub difference: Money,
    pub severity: Severity,
    pub description: String,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReconciliationReport {
    pub id: ReconciliationReportId,
    pub run_type: RunType,
    pub status: ReportStatus,
    pub checks_passed: u32,
    pub checks_failed: u32,
    pub exceptions_count: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_grading_matches_thresholds() {
        assert_eq!(Severity::grade(Decimal::new(100, 2)), Severity::Low); // 1.00
        assert_eq!(Severity::grade(Decimal::new(101, 2)), Severity::Medium); // 1.01
        assert_eq!(Severity::grade(Decimal::from(100)), Severity::Medium);
        assert_eq!(Severity::grade(Decimal::new(10001, 2)), Severity::High); // 100.01
        assert_eq!(Severity::grade(Decimal::from(1000)), Severity::High);
        assert_eq!(Severity::grade(Decimal::new(100001, 2)), Severity::Critical); // 1000.01
    }

    #[test]
    fn only_low_severity_auto_corrects() {
        assert!(Severity::Low.auto_correctable());
        assert!(!Severity::Medium.auto_correctable());
        assert!(!Severity::High.auto_correctable());
        assert!(!Severity::Critical.auto_correctable());
    }
}
