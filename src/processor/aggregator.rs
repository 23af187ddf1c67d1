use itertools::Itertools;
use tracing::info;
use crate::{
    config::TreatmentPolicy,
    models::{Cohort, CohortValue, MetricRow, TreatmentKey, UserId},
    processor::{DerivedRecord, MetricCalculator},
};
use chrono::NaiveDate;

type GroupKey = (UserId, Option<TreatmentKey>, CohortValue);

/// Reduces derived records to one `MetricRow` per (user, cohort bucket), or per
/// (user, treatment, cohort bucket) under the per-treatment policy.
pub struct CohortAggregator<'a> {
    cohort: Cohort,
    policy: TreatmentPolicy,
    reference_date: NaiveDate,
    calculator: &'a MetricCalculator,
}

impl<'a> CohortAggregator<'a> {
    pub fn new(
        cohort: Cohort,
        policy: TreatmentPolicy,
        reference_date: NaiveDate,
        calculator: &'a MetricCalculator,
    ) -> Self {
        Self { cohort, policy, reference_date, calculator }
    }

    fn group_key(&self, record: &DerivedRecord) -> GroupKey {
        let treatment = match self.policy {
            TreatmentPolicy::Earliest => None,
            TreatmentPolicy::PerTreatment => Some(record.treatment.key()),
        };
        (record.user.user_id, treatment, record.cohort_value(self.cohort))
    }

    /// Only buckets holding at least one weigh-in produce a row.
    pub fn aggregate(&self, records: &[DerivedRecord]) -> Vec<MetricRow> {
        let mut rows = Vec::new();

        let sorted = records
            .iter()
            .sorted_by(|a, b| {
                self.group_key(a)
                    .cmp(&self.group_key(b))
                    .then_with(|| a.weigh_in.chrono_key().cmp(&b.weigh_in.chrono_key()))
            })
            .collect::<Vec<_>>();

        for (key, group) in &sorted.into_iter().chunk_by(|record| self.group_key(record)) {
            let group: Vec<&DerivedRecord> = group.collect();
            if let Some(row) = self.summarize(key, &group) {
                rows.push(row);
            }
        }

        info!(
            "Aggregated {} records into {} rows by {}",
            records.len(),
            rows.len(),
            self.cohort
        );
        rows
    }

    fn summarize(&self, key: GroupKey, group: &[&DerivedRecord]) -> Option<MetricRow> {
        let first = group.first()?;
        let (user_id, treatment_key, cohort_value) = key;
        let user = &first.user;

        let patient = self.calculator.patient(user_id);
        let treatment = self.calculator.treatment(&first.treatment.key());

        Some(MetricRow {
            user_id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            gender: user.gender,
            age: user.age_at(self.reference_date),
            clinic_id: user.clinic_id,
            treatment_id: treatment_key.map(|k| k.treatment_id),
            cohort_value,
            weigh_in_rate: self.calculator.bucket_rate(self.cohort, group),
            patient_starting_weight: patient.starting_weight,
            treatment_starting_weight: treatment.starting_weight,
            patient_tbwl: patient.tbwl(),
            treatment_tbwl: treatment.tbwl(),
        })
    }
}
