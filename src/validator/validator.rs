use anyhow::{Context, Result};
use arrow::record_batch::RecordBatchReader;
use object_store::{path::Path, ObjectStore};
use parquet::arrow::arrow_reader::ParquetRecordBatchReader;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};
use crate::{
    models::{Cohort, MetricRow, UserId},
    processor::Filters,
    writer::metric_rows_from_batch,
    METADATA_COHORT, METADATA_TREATMENT_POLICY,
};

const BATCH_SIZE: usize = 1024;

#[derive(Debug, Default)]
pub struct ValidationStats {
    pub rows: usize,
    pub users: usize,
    pub violations: Vec<String>,
}

impl ValidationStats {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    fn violation(&mut self, row: usize, message: String) {
        self.violations.push(format!("row {}: {}", row, message));
    }

    pub fn log(&self, source: &str) {
        if self.is_valid() {
            info!(
                "Validation of {} passed: {} rows across {} users",
                source, self.rows, self.users
            );
            return;
        }
        for violation in &self.violations {
            warn!("{}: {}", source, violation);
        }
        error!(
            "Validation of {} failed with {} violation(s) over {} rows",
            source,
            self.violations.len(),
            self.rows
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct UserConstants {
    patient_starting_weight: Option<f64>,
    patient_tbwl: Option<f64>,
}

/// Checks a metric table's structural properties.
///
/// Rows must be sorted by `user_id` and then `cohort_value` (per treatment when
/// a `treatment_id` is present), with no repeated key.
pub fn check_rows(rows: &[MetricRow], filters: &Filters) -> ValidationStats {
    let mut stats = ValidationStats { rows: rows.len(), ..Default::default() };
    let mut keys = HashSet::new();
    let mut per_user: BTreeMap<UserId, UserConstants> = BTreeMap::new();

    for (idx, row) in rows.iter().enumerate() {
        if let Some(prev) = idx.checked_sub(1).map(|p| &rows[p]) {
            let same_run = prev.user_id == row.user_id && prev.treatment_id == row.treatment_id;
            if row.user_id < prev.user_id {
                stats.violation(idx, format!("user_id {} after {}", row.user_id, prev.user_id));
            } else if same_run && row.cohort_value <= prev.cohort_value {
                stats.violation(
                    idx,
                    format!("cohort_value {} not after {}", row.cohort_value, prev.cohort_value),
                );
            }
        }

        if !keys.insert((row.user_id, row.treatment_id, row.cohort_value)) {
            stats.violation(idx, format!("duplicate key ({}, {})", row.user_id, row.cohort_value));
        }

        if !filters.matches_row(row) {
            stats.violation(
                idx,
                format!(
                    "user {} ({}, age {:?}, clinic {}) does not satisfy the filters",
                    row.user_id, row.gender, row.age, row.clinic_id
                ),
            );
        }

        let constants = UserConstants {
            patient_starting_weight: row.patient_starting_weight,
            patient_tbwl: row.patient_tbwl,
        };
        let first = *per_user.entry(row.user_id).or_insert(constants);
        if first != constants {
            stats.violation(idx, format!("patient metrics of user {} vary across rows", row.user_id));
        }

        if !(row.weigh_in_rate.is_finite() && row.weigh_in_rate >= 0.0) {
            stats.violation(idx, format!("weigh_in_rate {} is negative or not finite", row.weigh_in_rate));
        }

        if row.treatment_starting_weight.is_none() && row.treatment_tbwl.is_some() {
            stats.violation(idx, "treatment_TBWL present without treatment_starting_weight".to_string());
        }

        for (name, weight) in [
            ("patient_starting_weight", row.patient_starting_weight),
            ("treatment_starting_weight", row.treatment_starting_weight),
        ] {
            if let Some(weight) = weight.filter(|w| *w <= 0.0) {
                stats.violation(idx, format!("{} {} is not positive", name, weight));
            }
        }
    }

    stats.users = per_user.len();
    stats
}

pub struct Validator {
    object_store: Arc<dyn ObjectStore>,
}

impl Validator {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self { object_store }
    }

    /// Reads a parquet metric table. The cohort comes from the schema metadata.
    pub async fn load_metric_rows(&self, path: &Path) -> Result<(Cohort, Vec<MetricRow>)> {
        let bytes = self
            .object_store
            .get(path)
            .await
            .with_context(|| format!("Failed to read {}", path))?
            .bytes()
            .await?;
        let reader = ParquetRecordBatchReader::try_new(bytes, BATCH_SIZE)?;

        let schema = reader.schema();
        let cohort: Cohort = schema
            .metadata()
            .get(METADATA_COHORT)
            .context("Metric table carries no cohort metadata")?
            .parse()?;
        if let Some(policy) = schema.metadata().get(METADATA_TREATMENT_POLICY) {
            info!("Reading {} metric table by {} ({})", path, cohort, policy);
        }

        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch?;
            rows.extend(metric_rows_from_batch(&batch, cohort)?);
        }
        Ok((cohort, rows))
    }

    pub async fn validate_file(&self, path: &Path, filters: &Filters) -> Result<ValidationStats> {
        let (_, rows) = self.load_metric_rows(path).await?;
        let stats = check_rows(&rows, filters);
        stats.log(path.as_ref());
        Ok(stats)
    }
}
