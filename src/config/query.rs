use std::fmt;
use std::str::FromStr;
use crate::{
    config::EngineSettings,
    error::Error,
    models::Cohort,
    processor::{AgeRange, ClinicFilter, Filters, GenderFilter},
};

/// How a user's treatments anchor their weigh-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreatmentPolicy {
    /// One anchor per user: the treatment with the earliest start date.
    Earliest,
    /// Each weigh-in belongs to the treatment active on its date.
    PerTreatment,
}

impl FromStr for TreatmentPolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(TreatmentPolicy::Earliest),
            "per-treatment" | "per_treatment" => Ok(TreatmentPolicy::PerTreatment),
            other => Err(Error::Config(format!(
                "unrecognized treatment policy '{}', expected one of: earliest, per-treatment",
                other
            ))),
        }
    }
}

impl fmt::Display for TreatmentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreatmentPolicy::Earliest => write!(f, "earliest"),
            TreatmentPolicy::PerTreatment => write!(f, "per-treatment"),
        }
    }
}

/// What happens to weigh-ins dated before their treatment anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreStartPolicy {
    Exclude,
    Clamp,
}

impl FromStr for PreStartPolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exclude" => Ok(PreStartPolicy::Exclude),
            "clamp" => Ok(PreStartPolicy::Clamp),
            other => Err(Error::Config(format!(
                "unrecognized pre-start policy '{}', expected one of: exclude, clamp",
                other
            ))),
        }
    }
}

impl fmt::Display for PreStartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreStartPolicy::Exclude => write!(f, "exclude"),
            PreStartPolicy::Clamp => write!(f, "clamp"),
        }
    }
}

/// Unvalidated query options as they arrive from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub cohort: String,
    pub gender: String,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub clinic_id: String,
    pub treatment_policy: String,
    pub pre_start: String,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            cohort: "week".to_string(),
            gender: "all".to_string(),
            min_age: None,
            max_age: None,
            clinic_id: "all".to_string(),
            treatment_policy: "earliest".to_string(),
            pre_start: "exclude".to_string(),
        }
    }
}

/// A validated, immutable configuration passed into one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfig {
    pub cohort: Cohort,
    pub filters: Filters,
    pub treatment_policy: TreatmentPolicy,
    pub pre_start: PreStartPolicy,
    pub settings: EngineSettings,
}

impl QueryConfig {
    pub fn from_options(options: &QueryOptions, settings: EngineSettings) -> Result<Self, Error> {
        let filters = Filters {
            age: AgeRange::new(options.min_age, options.max_age)?,
            gender: options.gender.parse::<GenderFilter>()?,
            clinic: options.clinic_id.parse::<ClinicFilter>()?,
            reference_date: settings.reference_date,
        };

        Ok(Self {
            cohort: options.cohort.parse()?,
            filters,
            treatment_policy: options.treatment_policy.parse()?,
            pre_start: options.pre_start.parse()?,
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn settings() -> EngineSettings {
        EngineSettings::new(1.0, 30, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).unwrap()
    }

    #[test]
    fn test_defaults_are_unrestricted_weekly() {
        let config = QueryConfig::from_options(&QueryOptions::default(), settings()).unwrap();
        assert_eq!(config.cohort, Cohort::Week);
        assert_eq!(config.filters.gender, GenderFilter::All);
        assert_eq!(config.filters.clinic, ClinicFilter::All);
        assert!(config.filters.age.is_unbounded());
        assert_eq!(config.treatment_policy, TreatmentPolicy::Earliest);
        assert_eq!(config.pre_start, PreStartPolicy::Exclude);
    }

    #[test]
    fn test_invalid_age_range_rejected() {
        let options = QueryOptions {
            min_age: Some(40),
            max_age: Some(30),
            ..QueryOptions::default()
        };
        let err = QueryConfig::from_options(&options, settings()).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("min_age")));
    }

    #[test]
    fn test_unrecognized_values_rejected() {
        let bad = [
            QueryOptions { cohort: "year".into(), ..QueryOptions::default() },
            QueryOptions { gender: "unknown".into(), ..QueryOptions::default() },
            QueryOptions { clinic_id: "x".into(), ..QueryOptions::default() },
            QueryOptions { treatment_policy: "latest".into(), ..QueryOptions::default() },
            QueryOptions { pre_start: "keep".into(), ..QueryOptions::default() },
        ];
        for options in bad {
            assert!(
                matches!(QueryConfig::from_options(&options, settings()), Err(Error::Config(_))),
                "{:?} should be rejected",
                options
            );
        }
    }

    #[test]
    fn test_policies_parse() {
        assert_eq!("per-treatment".parse::<TreatmentPolicy>().unwrap(), TreatmentPolicy::PerTreatment);
        assert_eq!("Clamp".parse::<PreStartPolicy>().unwrap(), PreStartPolicy::Clamp);
    }
}
