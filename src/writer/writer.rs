use arrow::{csv::WriterBuilder, record_batch::RecordBatch, util::pretty::pretty_format_batches};
use object_store::{path::Path, ObjectStore};
use parquet::{
    arrow::ArrowWriter,
    basic::Compression,
    file::properties::WriterProperties,
};
use std::sync::Arc;
use anyhow::{Context, Result};
use bytes::Bytes;
use tracing::{info, warn};
use crate::{
    config::TreatmentPolicy,
    error::Error,
    models::{Cohort, MetricRow},
    writer::create_record_batch_from_metric_rows,
};

const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Parquet,
    Csv,
    Json,
}

impl OutputFormat {
    /// Picks the format from the file extension.
    pub fn from_path(path: &str) -> Result<Self, Error> {
        let extension = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("parquet") => Ok(OutputFormat::Parquet),
            Some("csv") => Ok(OutputFormat::Csv),
            Some("json") => Ok(OutputFormat::Json),
            _ => Err(Error::Config(format!(
                "cannot infer output format of '{}', expected a .parquet, .csv or .json file",
                path
            ))),
        }
    }
}

pub struct MetricsWriter {
    object_store: Arc<dyn ObjectStore>,
    max_retries: u32,
}

impl MetricsWriter {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            object_store,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub async fn write_metrics(
        &self,
        rows: &[MetricRow],
        cohort: Cohort,
        policy: TreatmentPolicy,
        path: &Path,
    ) -> Result<OutputFormat> {
        let format = OutputFormat::from_path(path.as_ref())?;
        let buffer = match format {
            OutputFormat::Parquet => {
                encode_parquet(&create_record_batch_from_metric_rows(rows, cohort, policy)?)?
            }
            OutputFormat::Csv => {
                encode_csv(&create_record_batch_from_metric_rows(rows, cohort, policy)?)?
            }
            OutputFormat::Json => encode_json(rows)?,
        };

        write_bytes_to_store(Arc::clone(&self.object_store), path, buffer, self.max_retries)
            .await
            .with_context(|| format!("Failed to write metrics to {}", path))?;

        info!("Wrote {} metric rows to {} as {:?}", rows.len(), path, format);
        Ok(format)
    }
}

pub fn encode_parquet(batch: &RecordBatch) -> Result<Vec<u8>, Error> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buffer = Vec::new();
    {
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
        writer.write(batch)?;
        writer.close()?;
    }
    Ok(buffer)
}

pub fn encode_csv(batch: &RecordBatch) -> Result<Vec<u8>, Error> {
    let mut buffer = Vec::new();
    {
        let mut writer = WriterBuilder::new().with_header(true).build(&mut buffer);
        writer.write(batch)?;
    }
    Ok(buffer)
}

/// An array of row objects with absent metrics as `null`.
pub fn encode_json(rows: &[MetricRow]) -> Result<Vec<u8>, Error> {
    Ok(serde_json::to_vec_pretty(rows)?)
}

pub fn render_table(batch: &RecordBatch) -> Result<String, Error> {
    Ok(pretty_format_batches(&[batch.clone()])?.to_string())
}

async fn write_bytes_to_store(
    store: Arc<dyn ObjectStore>,
    path: &Path,
    buffer: Vec<u8>,
    max_retries: u32,
) -> Result<()> {
    let payload = Bytes::from(buffer);
    let mut retries = 0;
    while retries < max_retries {
        match store.put(path, payload.clone().into()).await {
            Ok(_) => return Ok(()),
            Err(e) if retries < max_retries - 1 => {
                retries += 1;
                let delay = std::time::Duration::from_millis(250 * 2u64.pow(retries));
                warn!(
                    "Write attempt {} failed for path {}: {}. Retrying in {} ms...",
                    retries, path, e, delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(anyhow::anyhow!("Failed to write after {} retries", max_retries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CohortValue, Gender};
    use object_store::memory::InMemory;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReader;

    fn rows() -> Vec<MetricRow> {
        vec![MetricRow {
            user_id: 1,
            first_name: "A".into(),
            last_name: "X".into(),
            gender: Gender::Male,
            age: Some(30),
            clinic_id: 10,
            treatment_id: None,
            cohort_value: CohortValue::Week(2),
            weigh_in_rate: 1.0,
            patient_starting_weight: Some(200.0),
            treatment_starting_weight: Some(200.0),
            patient_tbwl: Some(10.0),
            treatment_tbwl: None,
        }]
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(OutputFormat::from_path("out/metrics.parquet").unwrap(), OutputFormat::Parquet);
        assert_eq!(OutputFormat::from_path("metrics.CSV").unwrap(), OutputFormat::Csv);
        assert_eq!(OutputFormat::from_path("metrics.json").unwrap(), OutputFormat::Json);
        assert!(matches!(OutputFormat::from_path("metrics"), Err(Error::Config(_))));
        assert!(matches!(OutputFormat::from_path("metrics.xlsx"), Err(Error::Config(_))));
    }

    #[test]
    fn test_csv_header_and_nulls() {
        let batch = create_record_batch_from_metric_rows(&rows(), Cohort::Week, TreatmentPolicy::Earliest).unwrap();
        let csv = String::from_utf8(encode_csv(&batch).unwrap()).unwrap();
        let mut lines = csv.lines();

        assert_eq!(
            lines.next(),
            Some("user_id,first_name,last_name,gender,age,clinic_id,cohort_value,weigh_in_rate,patient_starting_weight,treatment_starting_weight,patient_TBWL,treatment_TBWL")
        );
        assert_eq!(lines.next(), Some("1,A,X,Male,30,10,2,1.0,200.0,200.0,10.0,"));
    }

    #[test]
    fn test_render_table_lists_columns() {
        let batch = create_record_batch_from_metric_rows(&rows(), Cohort::Week, TreatmentPolicy::Earliest).unwrap();
        let table = render_table(&batch).unwrap();
        assert!(table.contains("patient_TBWL"));
        assert!(table.contains("| 1 "));
    }

    #[tokio::test]
    async fn test_parquet_written_to_store_keeps_metadata() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let writer = MetricsWriter::new(Arc::clone(&store));
        let path = Path::from("metrics.parquet");

        let format = writer
            .write_metrics(&rows(), Cohort::Week, TreatmentPolicy::Earliest, &path)
            .await
            .unwrap();
        assert_eq!(format, OutputFormat::Parquet);

        let bytes = store.get(&path).await.unwrap().bytes().await.unwrap();
        let reader = ParquetRecordBatchReader::try_new(bytes, 1024).unwrap();
        let batches: Vec<RecordBatch> = reader.collect::<Result<_, _>>().unwrap();
        assert_eq!(batches[0].num_rows(), 1);
        assert_eq!(
            batches[0].schema().metadata().get(crate::METADATA_COHORT).map(String::as_str),
            Some("week")
        );
    }

    #[tokio::test]
    async fn test_json_written_to_store() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let path = Path::from("metrics.json");
        MetricsWriter::new(Arc::clone(&store))
            .write_metrics(&rows(), Cohort::Week, TreatmentPolicy::Earliest, &path)
            .await
            .unwrap();

        let bytes = store.get(&path).await.unwrap().bytes().await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json[0]["user_id"], 1);
        assert!(json[0]["treatment_TBWL"].is_null());
    }
}
