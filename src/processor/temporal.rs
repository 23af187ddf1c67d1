use std::sync::Arc;
use tracing::info;
use crate::{
    config::PreStartPolicy,
    models::{Cohort, CohortValue, Treatment, User, WeighIn},
    processor::{DataQualityReport, DataWarning, MergedRecord},
    DAYS_PER_WEEK,
};

/// A merged weigh-in with its treatment-relative time buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRecord {
    pub user: Arc<User>,
    pub treatment: Treatment,
    pub weigh_in: WeighIn,
    /// Signed elapsed days since the treatment anchor, before any clamping.
    pub days_since_start: i64,
    pub week_number: u32,
    pub month_number: u32,
}

impl DerivedRecord {
    pub fn cohort_value(&self, cohort: Cohort) -> CohortValue {
        match cohort {
            Cohort::Week => CohortValue::Week(self.week_number),
            Cohort::Month => CohortValue::Month(self.month_number),
            Cohort::Clinic => CohortValue::Clinic(self.user.clinic_id),
        }
    }

    pub fn is_pre_start(&self) -> bool {
        self.days_since_start < 0
    }
}

fn bucket(days: i64, width: i64) -> u32 {
    u32::try_from(days.div_euclid(width)).unwrap_or(u32::MAX)
}

pub struct TemporalDeriver {
    days_per_month: i64,
    pre_start: PreStartPolicy,
}

impl TemporalDeriver {
    pub fn new(days_per_month: u32, pre_start: PreStartPolicy) -> Self {
        Self {
            days_per_month: i64::from(days_per_month.max(1)),
            pre_start,
        }
    }

    /// Buckets one record, or `None` when the pre-start policy drops it.
    pub fn derive_one(&self, record: MergedRecord) -> Option<DerivedRecord> {
        let days = (record.weigh_in.date - record.treatment.start_date).num_days();
        let elapsed = match (days < 0, self.pre_start) {
            (false, _) => days,
            (true, PreStartPolicy::Clamp) => 0,
            (true, PreStartPolicy::Exclude) => return None,
        };

        Some(DerivedRecord {
            week_number: bucket(elapsed, DAYS_PER_WEEK),
            month_number: bucket(elapsed, self.days_per_month),
            days_since_start: days,
            user: record.user,
            treatment: record.treatment,
            weigh_in: record.weigh_in,
        })
    }

    pub fn derive(
        &self,
        records: Vec<MergedRecord>,
        report: &mut DataQualityReport,
    ) -> Vec<DerivedRecord> {
        let total = records.len();
        let mut derived = Vec::with_capacity(total);

        for record in records {
            let user_id = record.user.user_id;
            let date = record.weigh_in.date;
            let start_date = record.treatment.start_date;
            match self.derive_one(record) {
                Some(row) => derived.push(row),
                None => report.record(DataWarning::PreTreatmentWeighIn { user_id, date, start_date }),
            }
        }

        let clamped = derived.iter().filter(|r| r.is_pre_start()).count();
        info!(
            "Derived time buckets for {} of {} records ({} clamped to bucket 0)",
            derived.len(),
            total,
            clamped
        );
        derived
    }
}
