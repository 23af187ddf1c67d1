use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};
use crate::models::{TreatmentId, UserId};

/// A recoverable anomaly. The offending row was dropped and processing went on.
#[derive(Debug, Clone, PartialEq)]
pub enum DataWarning {
    MissingValue {
        table: &'static str,
        line: usize,
        column: &'static str,
    },
    InvalidValue {
        table: &'static str,
        line: usize,
        column: &'static str,
        value: String,
    },
    UnparseableDate {
        table: &'static str,
        line: usize,
        column: &'static str,
        value: String,
    },
    MalformedRow {
        table: &'static str,
        line: usize,
        reason: String,
    },
    NonPositiveWeight {
        line: usize,
        weight: f64,
    },
    SoftDeleted {
        line: usize,
    },
    DuplicateRecord {
        table: &'static str,
        key: String,
    },
    OrphanedTreatment {
        treatment_id: TreatmentId,
        user_id: UserId,
    },
    OrphanedWeighIn {
        user_id: UserId,
        date: NaiveDate,
    },
    PreTreatmentWeighIn {
        user_id: UserId,
        date: NaiveDate,
        start_date: NaiveDate,
    },
}

impl DataWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            DataWarning::MissingValue { .. } => "missing_value",
            DataWarning::InvalidValue { .. } => "invalid_value",
            DataWarning::UnparseableDate { .. } => "unparseable_date",
            DataWarning::MalformedRow { .. } => "malformed_row",
            DataWarning::NonPositiveWeight { .. } => "non_positive_weight",
            DataWarning::SoftDeleted { .. } => "soft_deleted",
            DataWarning::DuplicateRecord { .. } => "duplicate_record",
            DataWarning::OrphanedTreatment { .. } => "orphaned_treatment",
            DataWarning::OrphanedWeighIn { .. } => "orphaned_weigh_in",
            DataWarning::PreTreatmentWeighIn { .. } => "pre_treatment_weigh_in",
        }
    }
}

impl fmt::Display for DataWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataWarning::MissingValue { table, line, column } => {
                write!(f, "{} line {}: missing required value for '{}'", table, line, column)
            }
            DataWarning::InvalidValue { table, line, column, value } => {
                write!(f, "{} line {}: invalid value '{}' for '{}'", table, line, value, column)
            }
            DataWarning::UnparseableDate { table, line, column, value } => {
                write!(f, "{} line {}: unparseable date '{}' in '{}'", table, line, value, column)
            }
            DataWarning::MalformedRow { table, line, reason } => {
                write!(f, "{} line {}: malformed row ({})", table, line, reason)
            }
            DataWarning::NonPositiveWeight { line, weight } => {
                write!(f, "weigh_ins line {}: non-positive weight {}", line, weight)
            }
            DataWarning::SoftDeleted { line } => {
                write!(f, "weigh_ins line {}: record flagged as deleted", line)
            }
            DataWarning::DuplicateRecord { table, key } => {
                write!(f, "{}: duplicate record {}", table, key)
            }
            DataWarning::OrphanedTreatment { treatment_id, user_id } => {
                write!(f, "treatment {} references unknown user {}", treatment_id, user_id)
            }
            DataWarning::OrphanedWeighIn { user_id, date } => {
                write!(f, "weigh-in of user {} on {} has no matching user/treatment", user_id, date)
            }
            DataWarning::PreTreatmentWeighIn { user_id, date, start_date } => {
                write!(
                    f,
                    "weigh-in of user {} on {} precedes treatment start {}",
                    user_id, date, start_date
                )
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataQualityReport {
    warnings: Vec<DataWarning>,
}

impl DataQualityReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, warning: DataWarning) {
        debug!("Dropping row: {}", warning);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[DataWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.warnings.iter().filter(|w| w.kind() == kind).count()
    }

    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for warning in &self.warnings {
            *counts.entry(warning.kind()).or_insert(0) += 1;
        }
        counts
    }

    pub fn log_summary(&self) {
        if self.warnings.is_empty() {
            info!("No data-quality warnings recorded");
            return;
        }

        for (kind, count) in self.counts() {
            warn!("Data-quality: {} row(s) dropped as {}", count, kind);
        }
    }
}
