use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::ObjectStore;
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info};
use weight_metrics::{
    create_record_batch_from_metric_rows, init_logging, render_table, AgeRange, ClinicFilter,
    DataLoader, DataQualityReport, EngineSettings, Filters, GenderFilter, MetricsProcessor,
    MetricsWriter, OutputFormat, QueryConfig, QueryOptions, Validator,
};

#[derive(Debug, Parser)]
#[command(name = "weight-metrics")]
#[command(about = "Weight-loss metrics by treatment week, month or clinic")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct FilterArgs {
    /// Male, Female or all
    #[arg(short, long, default_value = "all")]
    gender: String,

    #[arg(long)]
    min_age: Option<u32>,

    #[arg(long)]
    max_age: Option<u32>,

    /// A clinic identifier or all
    #[arg(short = 'c', long, default_value = "all")]
    clinic_id: String,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compute the metric table from users.csv, treatments.csv and weights.csv
    Compute {
        /// Directory holding the source tables
        path_to_data: PathBuf,

        /// week, month or clinic
        #[arg(long, default_value = "week")]
        cohort: String,

        #[command(flatten)]
        filters: FilterArgs,

        /// earliest or per-treatment
        #[arg(long, default_value = "earliest")]
        treatment_policy: String,

        /// What to do with weigh-ins before the treatment start: exclude or clamp
        #[arg(long, default_value = "exclude")]
        pre_start: String,

        /// Also write the table; .parquet, .csv or .json
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Validate the written parquet output
        #[arg(long)]
        validate: bool,

        /// Do not print the table
        #[arg(short, long)]
        quiet: bool,
    },
    /// Validate a parquet metric table
    Validate {
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        filters: FilterArgs,
    },
}

/// Splits an output file into a store rooted at its directory and the object path.
fn output_location(file: &PathBuf) -> Result<(Arc<dyn ObjectStore>, Path)> {
    let dir = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        info!("Created directory: {:?}", dir);
    }

    let name = file
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Invalid output path {:?}", file))?;
    let store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(&dir)?);
    Ok((store, Path::from(name)))
}

async fn compute(
    path_to_data: PathBuf,
    options: QueryOptions,
    output: Option<PathBuf>,
    validate: bool,
    quiet: bool,
) -> Result<()> {
    let settings = EngineSettings::from_env()?;
    let config = QueryConfig::from_options(&options, settings)?;
    let (cohort, policy) = (config.cohort, config.treatment_policy);

    let source: Arc<dyn ObjectStore> = Arc::new(
        LocalFileSystem::new_with_prefix(&path_to_data)
            .with_context(|| format!("Data directory {:?} is not accessible", path_to_data))?,
    );
    let mut report = DataQualityReport::new();
    let dataset = DataLoader::new(source).load(&mut report).await?;

    let processor = MetricsProcessor::new(config);
    let rows = processor.run(&dataset, &mut report);
    report.log_summary();

    if !quiet {
        let batch = create_record_batch_from_metric_rows(&rows, cohort, policy)?;
        println!("{}", render_table(&batch)?);
    }

    if let Some(file) = output {
        let (store, path) = output_location(&file)?;
        let format = MetricsWriter::new(Arc::clone(&store))
            .write_metrics(&rows, cohort, policy, &path)
            .await?;

        if validate {
            if format != OutputFormat::Parquet {
                return Err(anyhow::anyhow!("--validate needs a .parquet output, got {:?}", format));
            }
            let stats = Validator::new(store)
                .validate_file(&path, &processor.config().filters)
                .await?;
            if !stats.is_valid() {
                return Err(anyhow::anyhow!(
                    "Validation failed with {} violation(s)",
                    stats.violations.len()
                ));
            }
        }
    } else if validate {
        return Err(anyhow::anyhow!("--validate requires --output"));
    }

    Ok(())
}

async fn run_validation(file: PathBuf, args: FilterArgs) -> Result<()> {
    let settings = EngineSettings::from_env()?;
    let filters = Filters {
        age: AgeRange::new(args.min_age, args.max_age)?,
        gender: args.gender.parse::<GenderFilter>()?,
        clinic: args.clinic_id.parse::<ClinicFilter>()?,
        reference_date: settings.reference_date,
    };

    let (store, path) = output_location(&file)?;
    let stats = Validator::new(store).validate_file(&path, &filters).await?;
    if !stats.is_valid() {
        return Err(anyhow::anyhow!(
            "Validation failed with {} violation(s)",
            stats.violations.len()
        ));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    let cli = Cli::parse();

    dotenv::dotenv().ok();

    let result = match cli.command {
        Commands::Compute {
            path_to_data,
            cohort,
            filters,
            treatment_policy,
            pre_start,
            output,
            validate,
            quiet,
        } => {
            let options = QueryOptions {
                cohort,
                gender: filters.gender,
                min_age: filters.min_age,
                max_age: filters.max_age,
                clinic_id: filters.clinic_id,
                treatment_policy,
                pre_start,
            };
            compute(path_to_data, options, output, validate, quiet).await
        }
        Commands::Validate { file, filters } => {
            info!("Starting validation of {:?}", file);
            run_validation(file, filters).await
        }
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
