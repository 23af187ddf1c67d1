use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;
use crate::{
    error::Error,
    models::{ClinicId, Gender, MetricRow, User},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenderFilter {
    All,
    Only(Gender),
}

impl FromStr for GenderFilter {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(GenderFilter::All),
            "male" => Ok(GenderFilter::Only(Gender::Male)),
            "female" => Ok(GenderFilter::Only(Gender::Female)),
            _ => Err(Error::Config(format!(
                "unrecognized gender '{}', expected one of: Male, Female, all",
                value
            ))),
        }
    }
}

impl fmt::Display for GenderFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenderFilter::All => write!(f, "all"),
            GenderFilter::Only(gender) => write!(f, "{}", gender),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClinicFilter {
    All,
    Only(ClinicId),
}

impl FromStr for ClinicFilter {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("all") {
            return Ok(ClinicFilter::All);
        }
        value
            .parse::<ClinicId>()
            .map(ClinicFilter::Only)
            .map_err(|_| Error::Config(format!(
                "invalid clinic_id '{}', expected an integer or 'all'",
                value
            )))
    }
}

impl fmt::Display for ClinicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClinicFilter::All => write!(f, "all"),
            ClinicFilter::Only(clinic_id) => write!(f, "{}", clinic_id),
        }
    }
}

/// Inclusive age bounds. `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgeRange {
    min: Option<u32>,
    max: Option<u32>,
}

impl AgeRange {
    pub fn new(min: Option<u32>, max: Option<u32>) -> Result<Self, Error> {
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(Error::Config(format!(
                    "min_age ({}) is greater than max_age ({})",
                    min, max
                )));
            }
        }
        Ok(Self { min, max })
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// An unknown age only satisfies an unbounded range.
    pub fn contains(&self, age: Option<u32>) -> bool {
        match age {
            Some(age) => {
                self.min.map_or(true, |min| age >= min) && self.max.map_or(true, |max| age <= max)
            }
            None => self.is_unbounded(),
        }
    }
}

/// Conjunction of the demographic predicates for one query execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Filters {
    pub age: AgeRange,
    pub gender: GenderFilter,
    pub clinic: ClinicFilter,
    pub reference_date: NaiveDate,
}

impl Filters {
    pub fn unrestricted(reference_date: NaiveDate) -> Self {
        Self {
            age: AgeRange::unbounded(),
            gender: GenderFilter::All,
            clinic: ClinicFilter::All,
            reference_date,
        }
    }

    fn matches_gender(&self, gender: Gender) -> bool {
        match self.gender {
            GenderFilter::All => true,
            GenderFilter::Only(wanted) => gender == wanted,
        }
    }

    fn matches_clinic(&self, clinic_id: ClinicId) -> bool {
        match self.clinic {
            ClinicFilter::All => true,
            ClinicFilter::Only(wanted) => clinic_id == wanted,
        }
    }

    /// Row-level predicate applied at ingestion.
    pub fn matches_user(&self, user: &User) -> bool {
        self.matches_gender(user.gender)
            && self.matches_clinic(user.clinic_id)
            && self.age.contains(user.age_at(self.reference_date))
    }

    /// Post-aggregation predicate; ages on a row were fixed at query time.
    pub fn matches_row(&self, row: &MetricRow) -> bool {
        self.matches_gender(row.gender)
            && self.matches_clinic(row.clinic_id)
            && self.age.contains(row.age)
    }
}
