use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use std::collections::HashMap;
use tracing::debug;
use crate::{error::Error, DATETIME_FORMATS, DATE_FORMATS};

/// A canonical column and the source headers accepted for it.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
    pub required: bool,
}

impl ColumnSpec {
    pub const fn required(canonical: &'static str, aliases: &'static [&'static str]) -> Self {
        Self { canonical, aliases, required: true }
    }

    pub const fn optional(canonical: &'static str, aliases: &'static [&'static str]) -> Self {
        Self { canonical, aliases, required: false }
    }

    pub fn accepts(&self, header: &str) -> bool {
        self.canonical.eq_ignore_ascii_case(header)
            || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(header))
    }
}

/// Header positions resolved once per table, keyed by canonical name.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    table: &'static str,
    indices: HashMap<&'static str, usize>,
}

impl ColumnMap {
    pub fn resolve(
        table: &'static str,
        headers: &StringRecord,
        specs: &[ColumnSpec],
    ) -> Result<Self, Error> {
        let mut indices = HashMap::new();

        for (idx, header) in headers.iter().enumerate() {
            let header = header.trim();
            match specs.iter().find(|spec| spec.accepts(header)) {
                Some(spec) => {
                    if let Some(previous) = indices.insert(spec.canonical, idx) {
                        return Err(Error::Schema(format!(
                            "{}: columns {} and {} both map to '{}'",
                            table, previous, idx, spec.canonical
                        )));
                    }
                }
                None => debug!("{}: ignoring unmapped column '{}'", table, header),
            }
        }

        for spec in specs.iter().filter(|spec| spec.required) {
            if !indices.contains_key(spec.canonical) {
                return Err(Error::Schema(format!(
                    "{}: required column '{}' not found (accepted headers: {}, {})",
                    table,
                    spec.canonical,
                    spec.canonical,
                    spec.aliases.join(", ")
                )));
            }
        }

        Ok(Self { table, indices })
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn contains(&self, canonical: &str) -> bool {
        self.indices.contains_key(canonical)
    }

    /// Trimmed cell value; empty cells read as absent.
    pub fn get<'r>(&self, record: &'r StringRecord, canonical: &str) -> Option<&'r str> {
        self.indices
            .get(canonical)
            .and_then(|&idx| record.get(idx))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Normalizes any accepted date or timestamp spelling to a calendar date.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.date_naive());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|timestamp| timestamp.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        })
}

/// Integer ids, tolerating the `5066.0` spelling dataframe exports produce.
pub fn parse_id(value: &str) -> Option<u64> {
    let value = value.trim();
    value.parse::<u64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0 && *v <= u64::MAX as f64)
            .map(|v| v as u64)
    })
}
