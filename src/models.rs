use chrono::{Datelike, NaiveDate};
use ordered_float::OrderedFloat;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use crate::Error;

pub type UserId = u64;
pub type ClinicId = u64;
pub type TreatmentId = u64;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    /// Lenient parse for source data. Anything unrecognised is `Other`.
    pub fn from_source(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Gender::Male,
            "female" | "f" => Gender::Female,
            _ => Gender::Other,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "Male"),
            Gender::Female => write!(f, "Female"),
            Gender::Other => write!(f, "Other"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct User {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub birth_date: Option<NaiveDate>,
    pub age: Option<u32>,
    pub clinic_id: ClinicId,
}

impl User {
    /// Whole years at `reference`, preferring the birth date over a stored age.
    pub fn age_at(&self, reference: NaiveDate) -> Option<u32> {
        match self.birth_date {
            Some(birth) => {
                let mut years = reference.year() - birth.year();
                if (reference.month(), reference.day()) < (birth.month(), birth.day()) {
                    years -= 1;
                }
                u32::try_from(years).ok()
            }
            None => self.age,
        }
    }
}

/// Field order matters: the derived `Ord` sorts a user's treatments by start date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Treatment {
    pub user_id: UserId,
    pub start_date: NaiveDate,
    pub treatment_id: TreatmentId,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreatmentKey {
    pub user_id: UserId,
    pub start_date: NaiveDate,
    pub treatment_id: TreatmentId,
}

impl Treatment {
    pub fn key(&self) -> TreatmentKey {
        TreatmentKey {
            user_id: self.user_id,
            start_date: self.start_date,
            treatment_id: self.treatment_id,
        }
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && self.end_date.map_or(true, |end| date <= end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeighIn {
    pub weigh_in_id: Option<u64>,
    pub user_id: UserId,
    pub date: NaiveDate,
    pub weight: f64,
}

pub type ChronoKey = (NaiveDate, Option<u64>, OrderedFloat<f64>);

impl WeighIn {
    /// Total chronological order used for every "earliest"/"latest" decision.
    /// Same-day readings fall back to the id (absent first) and then the weight.
    pub fn chrono_key(&self) -> ChronoKey {
        (self.date, self.weigh_in_id, OrderedFloat(self.weight))
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize)]
pub enum Cohort {
    Week,
    Month,
    Clinic,
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cohort::Week => write!(f, "week"),
            Cohort::Month => write!(f, "month"),
            Cohort::Clinic => write!(f, "clinic"),
        }
    }
}

impl FromStr for Cohort {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "week" => Ok(Cohort::Week),
            "month" => Ok(Cohort::Month),
            "clinic" | "clinicid" | "clinic_id" => Ok(Cohort::Clinic),
            other => Err(Error::Config(format!(
                "unrecognized cohort '{}', expected one of: week, month, clinic",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum CohortValue {
    Week(u32),
    Month(u32),
    Clinic(ClinicId),
}

impl CohortValue {
    pub fn cohort(&self) -> Cohort {
        match self {
            CohortValue::Week(_) => Cohort::Week,
            CohortValue::Month(_) => Cohort::Month,
            CohortValue::Clinic(_) => Cohort::Clinic,
        }
    }

    pub fn as_u64(&self) -> u64 {
        match self {
            CohortValue::Week(week) => u64::from(*week),
            CohortValue::Month(month) => u64::from(*month),
            CohortValue::Clinic(clinic_id) => *clinic_id,
        }
    }

    pub fn from_u64(cohort: Cohort, value: u64) -> Option<Self> {
        match cohort {
            Cohort::Week => u32::try_from(value).ok().map(CohortValue::Week),
            Cohort::Month => u32::try_from(value).ok().map(CohortValue::Month),
            Cohort::Clinic => Some(CohortValue::Clinic(value)),
        }
    }
}

impl fmt::Display for CohortValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u64())
    }
}

impl Serialize for CohortValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.as_u64())
    }
}

/// One output row: a patient within one cohort bucket.
///
/// Metrics without a reference point are `None`, never zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub age: Option<u32>,
    pub clinic_id: ClinicId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treatment_id: Option<TreatmentId>,
    pub cohort_value: CohortValue,
    pub weigh_in_rate: f64,
    pub patient_starting_weight: Option<f64>,
    pub treatment_starting_weight: Option<f64>,
    #[serde(rename = "patient_TBWL")]
    pub patient_tbwl: Option<f64>,
    #[serde(rename = "treatment_TBWL")]
    pub treatment_tbwl: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_age_prefers_birth_date_and_respects_birthday() {
        let mut user = User {
            user_id: 1,
            first_name: "A".into(),
            last_name: "X".into(),
            gender: Gender::Male,
            birth_date: Some(date(1990, 6, 15)),
            age: Some(99),
            clinic_id: 10,
        };
        assert_eq!(user.age_at(date(2024, 6, 14)), Some(33));
        assert_eq!(user.age_at(date(2024, 6, 15)), Some(34));

        user.birth_date = None;
        assert_eq!(user.age_at(date(2024, 6, 15)), Some(99));

        user.age = None;
        assert_eq!(user.age_at(date(2024, 6, 15)), None);
    }

    #[test]
    fn test_birth_date_after_reference_has_no_age() {
        let user = User {
            user_id: 1,
            first_name: String::new(),
            last_name: String::new(),
            gender: Gender::Other,
            birth_date: Some(date(2030, 1, 1)),
            age: None,
            clinic_id: 1,
        };
        assert_eq!(user.age_at(date(2024, 1, 1)), None);
    }

    #[test]
    fn test_gender_from_source() {
        assert_eq!(Gender::from_source("Male"), Gender::Male);
        assert_eq!(Gender::from_source(" f "), Gender::Female);
        assert_eq!(Gender::from_source("nonbinary"), Gender::Other);
        assert_eq!(Gender::from_source(""), Gender::Other);
    }

    #[test]
    fn test_cohort_parsing() {
        assert_eq!("week".parse::<Cohort>().unwrap(), Cohort::Week);
        assert_eq!("Month".parse::<Cohort>().unwrap(), Cohort::Month);
        assert_eq!("ClinicID".parse::<Cohort>().unwrap(), Cohort::Clinic);
        assert!(matches!("year".parse::<Cohort>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_treatment_covers_window() {
        let treatment = Treatment {
            user_id: 1,
            start_date: date(2024, 1, 1),
            treatment_id: 7,
            end_date: Some(date(2024, 1, 31)),
        };
        assert!(!treatment.covers(date(2023, 12, 31)));
        assert!(treatment.covers(date(2024, 1, 1)));
        assert!(treatment.covers(date(2024, 1, 31)));
        assert!(!treatment.covers(date(2024, 2, 1)));
    }

    #[test]
    fn test_chrono_key_orders_same_day_readings() {
        let a = WeighIn { weigh_in_id: None, user_id: 1, date: date(2024, 1, 1), weight: 200.0 };
        let b = WeighIn { weigh_in_id: Some(1), user_id: 1, date: date(2024, 1, 1), weight: 150.0 };
        let c = WeighIn { weigh_in_id: None, user_id: 1, date: date(2024, 1, 2), weight: 100.0 };
        assert!(a.chrono_key() < b.chrono_key());
        assert!(b.chrono_key() < c.chrono_key());
    }

    #[test]
    fn test_metric_row_serializes_null_metrics() {
        let row = MetricRow {
            user_id: 1,
            first_name: "A".into(),
            last_name: "X".into(),
            gender: Gender::Female,
            age: None,
            clinic_id: 10,
            treatment_id: None,
            cohort_value: CohortValue::Week(2),
            weigh_in_rate: 1.0,
            patient_starting_weight: Some(200.0),
            treatment_starting_weight: None,
            patient_tbwl: Some(10.0),
            treatment_tbwl: None,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["cohort_value"], 2);
        assert_eq!(json["gender"], "Female");
        assert!(json["treatment_starting_weight"].is_null());
        assert_eq!(json["patient_TBWL"], 10.0);
        assert!(json.get("treatment_id").is_none());
    }
}
