use itertools::Itertools;
use std::collections::BTreeMap;
use tracing::info;
use crate::{
    config::EngineSettings,
    models::{Cohort, TreatmentKey, UserId, WeighIn},
    processor::DerivedRecord,
    DAYS_PER_WEEK,
};

/// First and most recent weight of a set of weigh-ins.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Baseline {
    pub starting_weight: Option<f64>,
    pub latest_weight: Option<f64>,
}

impl Baseline {
    pub fn from_weigh_ins<'a, I>(weigh_ins: I) -> Self
    where
        I: IntoIterator<Item = &'a WeighIn>,
    {
        match weigh_ins.into_iter().minmax_by_key(|w| w.chrono_key()).into_option() {
            Some((first, last)) => Self {
                starting_weight: Some(first.weight),
                latest_weight: Some(last.weight),
            },
            None => Self::default(),
        }
    }

    /// Starting minus latest weight; a loss is positive.
    pub fn tbwl(&self) -> Option<f64> {
        Some(self.starting_weight? - self.latest_weight?)
    }
}

/// Count of recorded weigh-ins over the count the cadence expects. Not clamped:
/// values above 1 mean weigh-ins more often than the cadence.
pub fn weigh_in_rate(recorded: usize, expected: f64) -> f64 {
    if expected > 0.0 {
        recorded as f64 / expected
    } else {
        0.0
    }
}

/// Per-patient and per-treatment baselines over one derived record set.
#[derive(Debug, Clone)]
pub struct MetricCalculator {
    settings: EngineSettings,
    patients: BTreeMap<UserId, Baseline>,
    treatments: BTreeMap<TreatmentKey, Baseline>,
}

impl MetricCalculator {
    pub fn new(records: &[DerivedRecord], settings: EngineSettings) -> Self {
        let mut by_user: BTreeMap<UserId, Vec<&WeighIn>> = BTreeMap::new();
        let mut by_treatment: BTreeMap<TreatmentKey, Vec<&WeighIn>> = BTreeMap::new();

        for record in records {
            by_user.entry(record.user.user_id).or_default().push(&record.weigh_in);
            // keep the key even when no reading falls inside the window
            let on_treatment = by_treatment.entry(record.treatment.key()).or_default();
            if record.treatment.covers(record.weigh_in.date) {
                on_treatment.push(&record.weigh_in);
            }
        }

        let patients: BTreeMap<_, _> = by_user
            .into_iter()
            .map(|(user_id, weigh_ins)| (user_id, Baseline::from_weigh_ins(weigh_ins)))
            .collect();
        let treatments: BTreeMap<_, _> = by_treatment
            .into_iter()
            .map(|(key, weigh_ins)| (key, Baseline::from_weigh_ins(weigh_ins)))
            .collect();

        info!(
            "Computed baselines for {} patients and {} treatments",
            patients.len(),
            treatments.len()
        );

        Self { settings, patients, treatments }
    }

    pub fn patient(&self, user_id: UserId) -> Baseline {
        self.patients.get(&user_id).copied().unwrap_or_default()
    }

    pub fn treatment(&self, key: &TreatmentKey) -> Baseline {
        self.treatments.get(key).copied().unwrap_or_default()
    }

    /// Weigh-ins the cadence expects in one bucket of `cohort`. A clinic bucket
    /// spans every week the group was observed in.
    pub fn expected_weigh_ins(&self, cohort: Cohort, group: &[&DerivedRecord]) -> f64 {
        let per_week = self.settings.weigh_ins_per_week;
        match cohort {
            Cohort::Week => per_week,
            Cohort::Month => {
                per_week * f64::from(self.settings.days_per_month) / DAYS_PER_WEEK as f64
            }
            Cohort::Clinic => {
                let weeks = group.iter().map(|r| r.week_number).max().map_or(0, |w| w + 1);
                per_week * f64::from(weeks)
            }
        }
    }

    pub fn bucket_rate(&self, cohort: Cohort, group: &[&DerivedRecord]) -> f64 {
        weigh_in_rate(group.len(), self.expected_weigh_ins(cohort, group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreStartPolicy;
    use crate::models::{Gender, Treatment, User};
    use crate::processor::{MergedRecord, TemporalDeriver};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn settings() -> EngineSettings {
        EngineSettings::new(1.0, 28, date(2024, 6, 1)).unwrap()
    }

    fn derived(start: NaiveDate, readings: &[(NaiveDate, f64)], policy: PreStartPolicy) -> Vec<DerivedRecord> {
        let user = Arc::new(User {
            user_id: 1,
            first_name: "A".into(),
            last_name: "X".into(),
            gender: Gender::Male,
            birth_date: None,
            age: Some(30),
            clinic_id: 10,
        });
        let treatment = Treatment { user_id: 1, start_date: start, treatment_id: 100, end_date: None };
        let deriver = TemporalDeriver::new(28, policy);
        readings
            .iter()
            .filter_map(|&(day, weight)| {
                deriver.derive_one(MergedRecord {
                    user: Arc::clone(&user),
                    treatment: treatment.clone(),
                    weigh_in: WeighIn { weigh_in_id: None, user_id: 1, date: day, weight },
                })
            })
            .collect()
    }

    #[test]
    fn test_tbwl_sign_convention() {
        let loss = Baseline { starting_weight: Some(200.0), latest_weight: Some(190.0) };
        let gain = Baseline { starting_weight: Some(200.0), latest_weight: Some(204.5) };
        assert_eq!(loss.tbwl(), Some(10.0));
        assert_eq!(gain.tbwl(), Some(-4.5));
        assert_eq!(Baseline::default().tbwl(), None);
    }

    #[test]
    fn test_baselines_ignore_input_order() {
        let records = derived(
            date(2024, 1, 1),
            &[(date(2024, 1, 15), 190.0), (date(2024, 1, 1), 200.0), (date(2024, 1, 8), 195.0)],
            PreStartPolicy::Exclude,
        );
        let calculator = MetricCalculator::new(&records, settings());
        let patient = calculator.patient(1);

        assert_eq!(patient.starting_weight, Some(200.0));
        assert_eq!(patient.latest_weight, Some(190.0));
        assert_eq!(patient.tbwl(), Some(10.0));
        assert_eq!(calculator.treatment(&records[0].treatment.key()), patient);
    }

    #[test]
    fn test_clamped_rows_move_patient_baseline_only() {
        let records = derived(
            date(2024, 1, 1),
            &[(date(2023, 12, 20), 210.0), (date(2024, 1, 3), 200.0), (date(2024, 1, 10), 196.0)],
            PreStartPolicy::Clamp,
        );
        let calculator = MetricCalculator::new(&records, settings());

        assert_eq!(calculator.patient(1).starting_weight, Some(210.0));
        assert_eq!(calculator.patient(1).tbwl(), Some(14.0));
        let treatment = calculator.treatment(&records[0].treatment.key());
        assert_eq!(treatment.starting_weight, Some(200.0));
        assert_eq!(treatment.tbwl(), Some(4.0));
    }

    #[test]
    fn test_treatment_without_on_treatment_readings_has_null_baseline() {
        let records = derived(date(2024, 2, 1), &[(date(2024, 1, 3), 200.0)], PreStartPolicy::Clamp);
        let calculator = MetricCalculator::new(&records, settings());
        let treatment = calculator.treatment(&records[0].treatment.key());

        assert_eq!(treatment.starting_weight, None);
        assert_eq!(treatment.tbwl(), None);
        assert_eq!(calculator.patient(1).starting_weight, Some(200.0));
    }

    #[test]
    fn test_rate_is_not_clamped() {
        assert_eq!(weigh_in_rate(3, 1.0), 3.0);
        assert_eq!(weigh_in_rate(1, 2.0), 0.5);
        assert_eq!(weigh_in_rate(0, 1.0), 0.0);
    }

    #[test]
    fn test_expected_weigh_ins_per_cohort() {
        let records = derived(
            date(2024, 1, 1),
            &[(date(2024, 1, 1), 200.0), (date(2024, 1, 22), 190.0)],
            PreStartPolicy::Exclude,
        );
        let group: Vec<&DerivedRecord> = records.iter().collect();
        let calculator = MetricCalculator::new(&records, settings());

        assert_eq!(calculator.expected_weigh_ins(Cohort::Week, &group), 1.0);
        assert_eq!(calculator.expected_weigh_ins(Cohort::Month, &group), 4.0);
        // weeks 0 through 3
        assert_eq!(calculator.expected_weigh_ins(Cohort::Clinic, &group), 4.0);
        assert_eq!(calculator.bucket_rate(Cohort::Clinic, &group), 0.5);
    }
}
