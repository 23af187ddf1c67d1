use chrono::{NaiveDate, Utc};
use std::env;
use crate::{
    error::Error,
    DEFAULT_DAYS_PER_MONTH, DEFAULT_WEIGH_INS_PER_WEEK,
    ENV_DAYS_PER_MONTH, ENV_REFERENCE_DATE, ENV_WEIGH_INS_PER_WEEK,
};

/// Engine-wide knobs that are not part of a single query's options.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Expected weigh-in cadence used as the denominator of the weigh-in rate.
    pub weigh_ins_per_week: f64,
    /// Width of a month bucket in days.
    pub days_per_month: u32,
    /// Ages are computed at this date for the whole query.
    pub reference_date: NaiveDate,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            weigh_ins_per_week: DEFAULT_WEIGH_INS_PER_WEEK,
            days_per_month: DEFAULT_DAYS_PER_MONTH,
            reference_date: Utc::now().date_naive(),
        }
    }
}

impl EngineSettings {
    pub fn new(
        weigh_ins_per_week: f64,
        days_per_month: u32,
        reference_date: NaiveDate,
    ) -> Result<Self, Error> {
        if !weigh_ins_per_week.is_finite() || weigh_ins_per_week <= 0.0 {
            return Err(Error::Config(format!(
                "{} must be a positive number, got {}",
                ENV_WEIGH_INS_PER_WEEK, weigh_ins_per_week
            )));
        }
        if days_per_month == 0 {
            return Err(Error::Config(format!("{} must be positive", ENV_DAYS_PER_MONTH)));
        }
        Ok(Self {
            weigh_ins_per_week,
            days_per_month,
            reference_date,
        })
    }

    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Unset keys fall back to defaults; set-but-malformed keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let weigh_ins_per_week = match lookup(ENV_WEIGH_INS_PER_WEEK) {
            Some(raw) => raw.trim().parse::<f64>().map_err(|_| {
                Error::Config(format!("Invalid {} format: '{}'", ENV_WEIGH_INS_PER_WEEK, raw))
            })?,
            None => defaults.weigh_ins_per_week,
        };

        let days_per_month = match lookup(ENV_DAYS_PER_MONTH) {
            Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
                Error::Config(format!("Invalid {} format: '{}'", ENV_DAYS_PER_MONTH, raw))
            })?,
            None => defaults.days_per_month,
        };

        let reference_date = match lookup(ENV_REFERENCE_DATE) {
            Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
                Error::Config(format!(
                    "Invalid {} format: '{}', expected YYYY-MM-DD",
                    ENV_REFERENCE_DATE, raw
                ))
            })?,
            None => defaults.reference_date,
        };

        Self::new(weigh_ins_per_week, days_per_month, reference_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = EngineSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.weigh_ins_per_week, DEFAULT_WEIGH_INS_PER_WEEK);
        assert_eq!(settings.days_per_month, DEFAULT_DAYS_PER_MONTH);
    }

    #[test]
    fn test_reads_all_keys() {
        let settings = EngineSettings::from_lookup(lookup(&[
            ("WEIGH_INS_PER_WEEK", "2.5"),
            ("DAYS_PER_MONTH", "28"),
            ("REFERENCE_DATE", "2024-03-01"),
        ]))
        .unwrap();
        assert_eq!(settings.weigh_ins_per_week, 2.5);
        assert_eq!(settings.days_per_month, 28);
        assert_eq!(settings.reference_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn test_malformed_values_are_config_errors() {
        for pairs in [
            [("WEIGH_INS_PER_WEEK", "often")],
            [("WEIGH_INS_PER_WEEK", "0")],
            [("DAYS_PER_MONTH", "0")],
            [("REFERENCE_DATE", "03/01/2024")],
        ] {
            let result = EngineSettings::from_lookup(lookup(&pairs));
            assert!(matches!(result, Err(Error::Config(_))), "{:?} should fail", pairs);
        }
    }
}
