use tracing::info;
use crate::{
    config::QueryConfig,
    loader::Dataset,
    models::MetricRow,
    processor::{merge, CohortAggregator, DataQualityReport, MetricCalculator, TemporalDeriver},
};

/// Runs one query over a loaded dataset: merge, filter, derive, calculate, aggregate.
pub struct MetricsProcessor {
    config: QueryConfig,
}

impl MetricsProcessor {
    pub fn new(config: QueryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn run(&self, dataset: &Dataset, report: &mut DataQualityReport) -> Vec<MetricRow> {
        let config = &self.config;
        info!(
            "Computing metrics by {} (gender={}, clinic={}, treatment_policy={}, pre_start={})",
            config.cohort,
            config.filters.gender,
            config.filters.clinic,
            config.treatment_policy,
            config.pre_start
        );

        let merged = merge(dataset, config.treatment_policy, report);
        let before = merged.len();
        let filtered: Vec<_> = merged
            .into_iter()
            .filter(|record| config.filters.matches_user(&record.user))
            .collect();
        info!("Filters kept {} of {} merged records", filtered.len(), before);

        let deriver = TemporalDeriver::new(config.settings.days_per_month, config.pre_start);
        let derived = deriver.derive(filtered, report);

        let calculator = MetricCalculator::new(&derived, config.settings.clone());
        let rows = CohortAggregator::new(
            config.cohort,
            config.treatment_policy,
            config.filters.reference_date,
            &calculator,
        )
        .aggregate(&derived);

        info!("Produced {} metric rows", rows.len());
        rows
    }
}
