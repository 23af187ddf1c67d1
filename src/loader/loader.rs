use anyhow::Result;
use bytes::Bytes;
use csv::{ReaderBuilder, StringRecord, Trim};
use object_store::{path::Path, ObjectStore};
use std::sync::Arc;
use tracing::{debug, info};
use crate::{
    error::Error,
    loader::{parse_date, parse_id, ColumnMap, ColumnSpec},
    models::{Gender, Treatment, User, WeighIn},
    processor::{DataQualityReport, DataWarning},
    TREATMENTS_FILE, TREATMENTS_TABLE, TREATMENT_COLUMNS, TRUTHY_VALUES,
    USERS_FILE, USERS_TABLE, USER_COLUMNS, WEIGH_INS_FILE, WEIGH_INS_TABLE, WEIGH_IN_COLUMNS,
};

/// The three source tables, typed and column-normalized.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub users: Vec<User>,
    pub treatments: Vec<Treatment>,
    pub weigh_ins: Vec<WeighIn>,
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() || self.treatments.is_empty() || self.weigh_ins.is_empty()
    }
}

pub struct DataLoader {
    object_store: Arc<dyn ObjectStore>,
}

impl DataLoader {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self { object_store }
    }

    pub async fn load(&self, report: &mut DataQualityReport) -> Result<Dataset> {
        let (users, treatments, weigh_ins) = futures::try_join!(
            self.fetch(USERS_FILE),
            self.fetch(TREATMENTS_FILE),
            self.fetch(WEIGH_INS_FILE),
        )?;

        let dataset = Dataset {
            users: parse_users(&users, report)?,
            treatments: parse_treatments(&treatments, report)?,
            weigh_ins: parse_weigh_ins(&weigh_ins, report)?,
        };

        info!(
            "Loaded {} users, {} treatments, {} weigh-ins",
            dataset.users.len(),
            dataset.treatments.len(),
            dataset.weigh_ins.len()
        );

        Ok(dataset)
    }

    async fn fetch(&self, name: &str) -> Result<Bytes> {
        let path = Path::from(name);
        let bytes = self
            .object_store
            .get(&path)
            .await
            .map_err(|e| Error::Load(format!("failed to open {}: {}", name, e)))?
            .bytes()
            .await
            .map_err(|e| Error::Load(format!("failed to read {}: {}", name, e)))?;
        debug!("Fetched {} ({} bytes)", name, bytes.len());
        Ok(bytes)
    }
}

// Shared CSV walk: resolves headers once, hands each record to `parse_row`.
fn read_table<T, F>(
    table: &'static str,
    data: &[u8],
    specs: &[ColumnSpec],
    report: &mut DataQualityReport,
    mut parse_row: F,
) -> Result<Vec<T>, Error>
where
    F: FnMut(&ColumnMap, &StringRecord, usize, &mut DataQualityReport) -> Option<T>,
{
    if data.iter().all(u8::is_ascii_whitespace) {
        debug!("{}: source is empty", table);
        return Ok(Vec::new());
    }

    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(data);
    let headers = reader.headers()?.clone();
    let columns = ColumnMap::resolve(table, &headers, specs)?;

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        // Header is line 1
        let line = idx + 2;
        match record {
            Ok(record) => {
                if let Some(row) = parse_row(&columns, &record, line, report) {
                    rows.push(row);
                }
            }
            Err(e) => report.record(DataWarning::MalformedRow {
                table,
                line,
                reason: e.to_string(),
            }),
        }
    }

    debug!("{}: parsed {} rows", table, rows.len());
    Ok(rows)
}

fn required<'r>(
    columns: &ColumnMap,
    record: &'r StringRecord,
    column: &'static str,
    line: usize,
    report: &mut DataQualityReport,
) -> Option<&'r str> {
    let value = columns.get(record, column);
    if value.is_none() {
        report.record(DataWarning::MissingValue {
            table: columns.table(),
            line,
            column,
        });
    }
    value
}

fn required_id(
    columns: &ColumnMap,
    record: &StringRecord,
    column: &'static str,
    line: usize,
    report: &mut DataQualityReport,
) -> Option<u64> {
    let raw = required(columns, record, column, line, report)?;
    let id = parse_id(raw);
    if id.is_none() {
        report.record(DataWarning::InvalidValue {
            table: columns.table(),
            line,
            column,
            value: raw.to_string(),
        });
    }
    id
}

/// `Ok(None)` when the cell is empty, `Err(())` after recording a bad date.
fn optional_date(
    columns: &ColumnMap,
    record: &StringRecord,
    column: &'static str,
    line: usize,
    report: &mut DataQualityReport,
) -> std::result::Result<Option<chrono::NaiveDate>, ()> {
    match columns.get(record, column) {
        None => Ok(None),
        Some(raw) => match parse_date(raw) {
            Some(date) => Ok(Some(date)),
            None => {
                report.record(DataWarning::UnparseableDate {
                    table: columns.table(),
                    line,
                    column,
                    value: raw.to_string(),
                });
                Err(())
            }
        },
    }
}

fn required_date(
    columns: &ColumnMap,
    record: &StringRecord,
    column: &'static str,
    line: usize,
    report: &mut DataQualityReport,
) -> Option<chrono::NaiveDate> {
    required(columns, record, column, line, report)?;
    optional_date(columns, record, column, line, report).ok().flatten()
}

pub fn parse_users(data: &[u8], report: &mut DataQualityReport) -> Result<Vec<User>, Error> {
    read_table(USERS_TABLE, data, &USER_COLUMNS, report, |columns, record, line, report| {
        let user_id = required_id(columns, record, "user_id", line, report)?;
        let gender = Gender::from_source(required(columns, record, "gender", line, report)?);
        let clinic_id = required_id(columns, record, "clinic_id", line, report)?;
        let birth_date = optional_date(columns, record, "birth_date", line, report).ok()?;

        let age = match columns.get(record, "age") {
            Some(raw) => match parse_id(raw).and_then(|age| u32::try_from(age).ok()) {
                Some(age) => Some(age),
                None => {
                    report.record(DataWarning::InvalidValue {
                        table: USERS_TABLE,
                        line,
                        column: "age",
                        value: raw.to_string(),
                    });
                    return None;
                }
            },
            None => None,
        };

        Some(User {
            user_id,
            first_name: columns.get(record, "first_name").unwrap_or_default().to_string(),
            last_name: columns.get(record, "last_name").unwrap_or_default().to_string(),
            gender,
            birth_date,
            age,
            clinic_id,
        })
    })
}

pub fn parse_treatments(
    data: &[u8],
    report: &mut DataQualityReport,
) -> Result<Vec<Treatment>, Error> {
    read_table(
        TREATMENTS_TABLE,
        data,
        &TREATMENT_COLUMNS,
        report,
        |columns, record, line, report| {
            let treatment_id = required_id(columns, record, "treatment_id", line, report)?;
            let user_id = required_id(columns, record, "user_id", line, report)?;
            let start_date = required_date(columns, record, "start_date", line, report)?;
            let end_date = optional_date(columns, record, "end_date", line, report).ok()?;

            Some(Treatment {
                user_id,
                start_date,
                treatment_id,
                end_date,
            })
        },
    )
}

pub fn parse_weigh_ins(data: &[u8], report: &mut DataQualityReport) -> Result<Vec<WeighIn>, Error> {
    read_table(
        WEIGH_INS_TABLE,
        data,
        &WEIGH_IN_COLUMNS,
        report,
        |columns, record, line, report| {
            if let Some(flag) = columns.get(record, "is_deleted") {
                if TRUTHY_VALUES.iter().any(|t| t.eq_ignore_ascii_case(flag)) {
                    report.record(DataWarning::SoftDeleted { line });
                    return None;
                }
            }

            let weigh_in_id = match columns.get(record, "weigh_in_id") {
                Some(raw) => match parse_id(raw) {
                    Some(id) => Some(id),
                    None => {
                        report.record(DataWarning::InvalidValue {
                            table: WEIGH_INS_TABLE,
                            line,
                            column: "weigh_in_id",
                            value: raw.to_string(),
                        });
                        return None;
                    }
                },
                None => None,
            };

            let user_id = required_id(columns, record, "user_id", line, report)?;
            let date = required_date(columns, record, "date", line, report)?;

            let raw_weight = required(columns, record, "weight", line, report)?;
            let weight = match raw_weight.parse::<f64>() {
                Ok(weight) if weight.is_finite() => weight,
                _ => {
                    report.record(DataWarning::InvalidValue {
                        table: WEIGH_INS_TABLE,
                        line,
                        column: "weight",
                        value: raw_weight.to_string(),
                    });
                    return None;
                }
            };
            if weight <= 0.0 {
                report.record(DataWarning::NonPositiveWeight { line, weight });
                return None;
            }

            Some(WeighIn {
                weigh_in_id,
                user_id,
                date,
                weight,
            })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use object_store::memory::InMemory;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_users_with_source_headers() {
        let csv = "\
UID,FirstName,LastName,Gender,Birthday,Age,ClinicID,IsActive
1,Ann,Lee,Female,1990-05-01,,10,1
2,Bob,Ray,Male,,45,5066.0,1
3,Cy,Fox,Male,1980-13-01,,10,1
4,Di,Ng,Female,,,,1
";
        let mut report = DataQualityReport::new();
        let users = parse_users(csv.as_bytes(), &mut report).unwrap();

        assert_eq!(users.len(), 2);
        assert_eq!(users[0].first_name, "Ann");
        assert_eq!(users[0].birth_date, Some(date(1990, 5, 1)));
        assert_eq!(users[1].age, Some(45));
        assert_eq!(users[1].clinic_id, 5066);
        assert_eq!(report.count("unparseable_date"), 1);
        assert_eq!(report.count("missing_value"), 1);
    }

    #[test]
    fn test_parse_treatments() {
        let csv = "\
MasterUserID,TreatmentTypeID,StartDate
1,3,2024-01-01 08:00:00
1,4,
2,3,someday
";
        let mut report = DataQualityReport::new();
        let treatments = parse_treatments(csv.as_bytes(), &mut report).unwrap();

        assert_eq!(treatments.len(), 1);
        assert_eq!(treatments[0].treatment_id, 3);
        assert_eq!(treatments[0].start_date, date(2024, 1, 1));
        assert_eq!(treatments[0].end_date, None);
        assert_eq!(report.count("missing_value"), 1);
        assert_eq!(report.count("unparseable_date"), 1);
    }

    #[test]
    fn test_parse_weigh_ins_drops_bad_rows() {
        let csv = "\
MasterUserID,Weight,CreatedDate,UpdatedDate,IsActive,IsDelete
1,200,2024-01-01,2024-01-01,1,0
1,-5,2024-01-02,2024-01-02,1,0
1,abc,2024-01-03,2024-01-03,1,0
1,190,2024-01-04,2024-01-04,1,1
1,185,garbage,2024-01-05,1,0
,180,2024-01-06,2024-01-06,1,0
";
        let mut report = DataQualityReport::new();
        let weigh_ins = parse_weigh_ins(csv.as_bytes(), &mut report).unwrap();

        assert_eq!(weigh_ins.len(), 1);
        assert_eq!(weigh_ins[0].weight, 200.0);
        assert_eq!(weigh_ins[0].weigh_in_id, None);
        assert_eq!(report.count("non_positive_weight"), 1);
        assert_eq!(report.count("invalid_value"), 1);
        assert_eq!(report.count("soft_deleted"), 1);
        assert_eq!(report.count("unparseable_date"), 1);
        assert_eq!(report.count("missing_value"), 1);
    }

    #[test]
    fn test_missing_required_column_fails_the_load() {
        let csv = "MasterUserID,CreatedDate\n1,2024-01-01\n";
        let mut report = DataQualityReport::new();
        let result = parse_weigh_ins(csv.as_bytes(), &mut report);
        assert!(matches!(result, Err(Error::Schema(_))));
    }

    #[test]
    fn test_empty_sources_are_empty_tables() {
        let mut report = DataQualityReport::new();
        assert!(parse_users(b"", &mut report).unwrap().is_empty());
        assert!(parse_weigh_ins(b"user_id,date,weight\n", &mut report).unwrap().is_empty());
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_load_from_object_store() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        store
            .put(&Path::from(USERS_FILE), Bytes::from("user_id,gender,age,clinic_id\n1,Male,30,10\n").into())
            .await
            .unwrap();
        store
            .put(&Path::from(TREATMENTS_FILE), Bytes::from("treatment_id,user_id,start_date\n100,1,2024-01-01\n").into())
            .await
            .unwrap();
        store
            .put(&Path::from(WEIGH_INS_FILE), Bytes::from("user_id,date,weight\n1,2024-01-01,200\n1,2024-01-08,195\n").into())
            .await
            .unwrap();

        let mut report = DataQualityReport::new();
        let dataset = DataLoader::new(store).load(&mut report).await.unwrap();

        assert_eq!(dataset.users.len(), 1);
        assert_eq!(dataset.treatments.len(), 1);
        assert_eq!(dataset.weigh_ins.len(), 2);
        assert!(!dataset.is_empty());
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_file_is_an_error() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let mut report = DataQualityReport::new();
        let err = DataLoader::new(store).load(&mut report).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Load(msg)) if msg.contains(".csv")));
    }
}
