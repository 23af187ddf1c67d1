use lazy_static::lazy_static;
use crate::loader::ColumnSpec;

// Source tables inside the data directory
pub const USERS_FILE: &str = "users.csv";
pub const TREATMENTS_FILE: &str = "treatments.csv";
pub const WEIGH_INS_FILE: &str = "weights.csv";

pub const USERS_TABLE: &str = "users";
pub const TREATMENTS_TABLE: &str = "treatments";
pub const WEIGH_INS_TABLE: &str = "weigh_ins";

pub const DAYS_PER_WEEK: i64 = 7;
pub const DEFAULT_DAYS_PER_MONTH: u32 = 30;
pub const DEFAULT_WEIGH_INS_PER_WEEK: f64 = 1.0;

// Environment keys read by EngineSettings::from_env
pub const ENV_WEIGH_INS_PER_WEEK: &str = "WEIGH_INS_PER_WEEK";
pub const ENV_DAYS_PER_MONTH: &str = "DAYS_PER_MONTH";
pub const ENV_REFERENCE_DATE: &str = "REFERENCE_DATE";

// Schema metadata keys written alongside parquet metric tables
pub const METADATA_COHORT: &str = "cohort";
pub const METADATA_TREATMENT_POLICY: &str = "treatment_policy";

lazy_static! {
    pub static ref USER_COLUMNS: Vec<ColumnSpec> = vec![
        ColumnSpec::required("user_id", &["UID", "UserID"]),
        ColumnSpec::optional("first_name", &["FirstName", "fname"]),
        ColumnSpec::optional("last_name", &["LastName", "lname"]),
        ColumnSpec::required("gender", &["Gender", "Sex"]),
        ColumnSpec::optional("birth_date", &["Birthday", "dob", "DateOfBirth"]),
        ColumnSpec::optional("age", &["Age"]),
        ColumnSpec::required("clinic_id", &["ClinicID"]),
    ];

    pub static ref TREATMENT_COLUMNS: Vec<ColumnSpec> = vec![
        ColumnSpec::required("treatment_id", &["TreatmentID", "TreatmentTypeID"]),
        ColumnSpec::required("user_id", &["MasterUserID", "UID"]),
        ColumnSpec::required("start_date", &["StartDate"]),
        ColumnSpec::optional("end_date", &["EndDate"]),
    ];

    pub static ref WEIGH_IN_COLUMNS: Vec<ColumnSpec> = vec![
        ColumnSpec::optional("weigh_in_id", &["WeighInID", "WeightID"]),
        ColumnSpec::required("user_id", &["MasterUserID", "UID"]),
        ColumnSpec::required("date", &["CreatedDate", "Date", "WeighInDate"]),
        ColumnSpec::required("weight", &["Weight", "wt"]),
        ColumnSpec::optional("is_deleted", &["IsDelete", "IsDeleted"]),
    ];

    // Tried in order; timestamps are truncated to their calendar date
    pub static ref DATETIME_FORMATS: Vec<&'static str> = vec![
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
    ];

    pub static ref DATE_FORMATS: Vec<&'static str> = vec![
        "%Y-%m-%d",
        "%m/%d/%Y",
        "%Y/%m/%d",
    ];

    pub static ref TRUTHY_VALUES: Vec<&'static str> = vec!["1", "true", "t", "yes", "y"];
}
