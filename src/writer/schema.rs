use arrow::{
    array::{Array, ArrayRef, Float64Array, StringArray, UInt32Array, UInt64Array},
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;
use crate::{
    config::TreatmentPolicy,
    error::Error,
    models::{Cohort, CohortValue, Gender, MetricRow},
    METADATA_COHORT, METADATA_TREATMENT_POLICY,
};

/// Output columns in order. `treatment_id` is only present per treatment.
pub fn metric_schema(cohort: Cohort, policy: TreatmentPolicy) -> SchemaRef {
    let mut fields = vec![
        Field::new("user_id", DataType::UInt64, false),
        Field::new("first_name", DataType::Utf8, false),
        Field::new("last_name", DataType::Utf8, false),
        Field::new("gender", DataType::Utf8, false),
        Field::new("age", DataType::UInt32, true),
        Field::new("clinic_id", DataType::UInt64, false),
    ];
    if policy == TreatmentPolicy::PerTreatment {
        fields.push(Field::new("treatment_id", DataType::UInt64, false));
    }
    fields.extend([
        Field::new("cohort_value", DataType::UInt64, false),
        Field::new("weigh_in_rate", DataType::Float64, false),
        Field::new("patient_starting_weight", DataType::Float64, true),
        Field::new("treatment_starting_weight", DataType::Float64, true),
        Field::new("patient_TBWL", DataType::Float64, true),
        Field::new("treatment_TBWL", DataType::Float64, true),
    ]);

    let metadata = HashMap::from([
        (METADATA_COHORT.to_string(), cohort.to_string()),
        (METADATA_TREATMENT_POLICY.to_string(), policy.to_string()),
    ]);
    Arc::new(Schema::new_with_metadata(fields, metadata))
}

pub fn create_record_batch_from_metric_rows(
    rows: &[MetricRow],
    cohort: Cohort,
    policy: TreatmentPolicy,
) -> Result<RecordBatch, Error> {
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from(rows.iter().map(|r| r.user_id).collect::<Vec<_>>())) as ArrayRef,
        Arc::new(StringArray::from(rows.iter().map(|r| r.first_name.as_str()).collect::<Vec<_>>())) as ArrayRef,
        Arc::new(StringArray::from(rows.iter().map(|r| r.last_name.as_str()).collect::<Vec<_>>())) as ArrayRef,
        Arc::new(StringArray::from(rows.iter().map(|r| r.gender.to_string()).collect::<Vec<_>>())) as ArrayRef,
        Arc::new(UInt32Array::from(rows.iter().map(|r| r.age).collect::<Vec<_>>())) as ArrayRef,
        Arc::new(UInt64Array::from(rows.iter().map(|r| r.clinic_id).collect::<Vec<_>>())) as ArrayRef,
    ];
    if policy == TreatmentPolicy::PerTreatment {
        let ids = rows
            .iter()
            .map(|r| {
                r.treatment_id.ok_or_else(|| {
                    Error::Arrow(format!("row for user {} has no treatment_id", r.user_id))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        columns.push(Arc::new(UInt64Array::from(ids)));
    }
    columns.extend([
        Arc::new(UInt64Array::from(rows.iter().map(|r| r.cohort_value.as_u64()).collect::<Vec<_>>())) as ArrayRef,
        Arc::new(Float64Array::from(rows.iter().map(|r| r.weigh_in_rate).collect::<Vec<_>>())) as ArrayRef,
        Arc::new(Float64Array::from(rows.iter().map(|r| r.patient_starting_weight).collect::<Vec<_>>())) as ArrayRef,
        Arc::new(Float64Array::from(rows.iter().map(|r| r.treatment_starting_weight).collect::<Vec<_>>())) as ArrayRef,
        Arc::new(Float64Array::from(rows.iter().map(|r| r.patient_tbwl).collect::<Vec<_>>())) as ArrayRef,
        Arc::new(Float64Array::from(rows.iter().map(|r| r.treatment_tbwl).collect::<Vec<_>>())) as ArrayRef,
    ]);

    Ok(RecordBatch::try_new(metric_schema(cohort, policy), columns)?)
}

fn column<'a, A: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a A, Error> {
    let idx = batch.schema().index_of(name).map_err(|e| {
        error!("Failed to get {} column index: {}", name, e);
        Error::Schema(format!("missing column '{}'", name))
    })?;
    batch.column(idx).as_any().downcast_ref::<A>().ok_or_else(|| {
        error!("Failed to cast {} column, found {:?}", name, batch.column(idx).data_type());
        Error::Schema(format!("column '{}' has unexpected type", name))
    })
}

pub fn get_string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, Error> {
    column::<StringArray>(batch, name)
}

pub fn get_uint32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array, Error> {
    column::<UInt32Array>(batch, name)
}

pub fn get_uint64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt64Array, Error> {
    column::<UInt64Array>(batch, name)
}

pub fn get_float64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array, Error> {
    column::<Float64Array>(batch, name)
}

fn nullable<A, T>(array: &A, idx: usize, value: impl Fn(&A, usize) -> T) -> Option<T>
where
    A: Array,
{
    if array.is_null(idx) {
        None
    } else {
        Some(value(array, idx))
    }
}

/// Reads a metric table back into rows. `cohort` decides how `cohort_value`
/// is interpreted.
pub fn metric_rows_from_batch(batch: &RecordBatch, cohort: Cohort) -> Result<Vec<MetricRow>, Error> {
    let user_ids = get_uint64_column(batch, "user_id")?;
    let first_names = get_string_column(batch, "first_name")?;
    let last_names = get_string_column(batch, "last_name")?;
    let genders = get_string_column(batch, "gender")?;
    let ages = get_uint32_column(batch, "age")?;
    let clinic_ids = get_uint64_column(batch, "clinic_id")?;
    let treatment_ids = match batch.schema().index_of("treatment_id") {
        Ok(_) => Some(get_uint64_column(batch, "treatment_id")?),
        Err(_) => None,
    };
    let cohort_values = get_uint64_column(batch, "cohort_value")?;
    let rates = get_float64_column(batch, "weigh_in_rate")?;
    let patient_starts = get_float64_column(batch, "patient_starting_weight")?;
    let treatment_starts = get_float64_column(batch, "treatment_starting_weight")?;
    let patient_tbwls = get_float64_column(batch, "patient_TBWL")?;
    let treatment_tbwls = get_float64_column(batch, "treatment_TBWL")?;

    (0..batch.num_rows())
        .map(|i| -> Result<MetricRow, Error> {
            let raw = cohort_values.value(i);
            let cohort_value = CohortValue::from_u64(cohort, raw).ok_or_else(|| {
                Error::Validation(format!("cohort_value {} out of range for {}", raw, cohort))
            })?;
            Ok(MetricRow {
                user_id: user_ids.value(i),
                first_name: first_names.value(i).to_string(),
                last_name: last_names.value(i).to_string(),
                gender: Gender::from_source(genders.value(i)),
                age: nullable(ages, i, UInt32Array::value),
                clinic_id: clinic_ids.value(i),
                treatment_id: treatment_ids.map(|ids| ids.value(i)),
                cohort_value,
                weigh_in_rate: rates.value(i),
                patient_starting_weight: nullable(patient_starts, i, Float64Array::value),
                treatment_starting_weight: nullable(treatment_starts, i, Float64Array::value),
                patient_tbwl: nullable(patient_tbwls, i, Float64Array::value),
                treatment_tbwl: nullable(treatment_tbwls, i, Float64Array::value),
            })
        })
        .collect()
}
