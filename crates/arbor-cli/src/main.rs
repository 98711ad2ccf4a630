mod config;
mod registry;
mod report;
mod rest;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use arbor_core::{ImportResult, ReferenceMap, write_bytes_atomic, write_json_atomic};
use arbor_export::{ExportError, ExportOptions, Exporter};
use arbor_import::{
    BulkOptions, BulkSaver, GroupSaver, ImportError, ImportOptions, ImportReport, Importer,
    TreeSaver, summarize_response,
};
use arbor_plan::{PlanError, ValidationReport, load_plan, plan_json_schema};
use clap::{Args, Parser, Subcommand};
use config::{ArborConfig, ConfigError, load_config};
use registry::{RunContext, RunPaths, init_run_logging, start_run, write_result};
use report::{ReportError, ReportFormat, render};
use rest::RestClient;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),
    #[error("import error: {0}")]
    Import(#[from] ImportError),
    #[error("export error: {0}")]
    Export(#[from] ExportError),
    #[error("report error: {0}")]
    Report(#[from] ReportError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("{failures} record(s) failed to import")]
    ImportFailed { failures: usize },
}

#[derive(Parser, Debug)]
#[command(name = "arbor", version, about = "Import and export record trees")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import record files into the store.
    Import(ImportArgs),
    /// Export a record tree into importable files.
    Export(ExportArgs),
    /// Validate a plan file without touching the store.
    Validate(ValidateArgs),
    /// Print the plan JSON Schema.
    Schema(SchemaArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Config file (defaults to ./arbor.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Store instance URL, overriding the config.
    #[arg(long)]
    instance_url: Option<String>,
    /// Output directory for runs.
    #[arg(long, default_value = "runs")]
    run_dir: PathBuf,
    /// Result format on stdout.
    #[arg(long, value_enum, default_value_t = ReportFormat::Human)]
    format: ReportFormat,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Plan file listing object groups in save order.
    #[arg(long, conflicts_with_all = ["files", "resume"])]
    plan: Option<PathBuf>,
    /// Record file imported as its own group; repeatable.
    #[arg(long = "file", value_name = "FILE", conflicts_with = "resume")]
    files: Vec<PathBuf>,
    /// Collect the results of a bulk job left running by an earlier run.
    #[arg(long, value_name = "JOB_ID")]
    resume: Option<String>,
    /// JSON object of token to id pairs to resolve against.
    #[arg(long)]
    refs: Option<PathBuf>,
    /// Write the final reference map to this file.
    #[arg(long)]
    refs_out: Option<PathBuf>,
    /// Save groups through bulk jobs instead of tree calls.
    #[arg(long, default_value_t = false)]
    bulk: bool,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Root query, e.g. "SELECT Name, (SELECT LastName FROM Contacts) FROM Account".
    #[arg(long, short)]
    query: String,
    /// Directory receiving the exported files.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Always write a plan with one file per object type.
    #[arg(long, default_value_t = false)]
    plan: bool,
    /// Prefix inserted into every generated token.
    #[arg(long)]
    prefix: Option<String>,
    /// Largest record count still written as one tree file.
    #[arg(long)]
    max_records_per_file: Option<usize>,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Plan file to validate.
    plan: PathBuf,
    /// Result format on stdout.
    #[arg(long, value_enum, default_value_t = ReportFormat::Human)]
    format: ReportFormat,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Write the schema to a file instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

enum ImportSource {
    Plan(PathBuf),
    Files(Vec<PathBuf>),
    Resume(String),
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Import(args) => run_import(args).await,
        Command::Export(args) => run_export(args).await,
        Command::Validate(args) => run_validate(args),
        Command::Schema(args) => run_schema(args),
    }
}

async fn run_import(args: ImportArgs) -> Result<(), CliError> {
    let source = match (args.plan.clone(), args.files.is_empty(), args.resume.clone()) {
        (Some(plan), _, _) => ImportSource::Plan(plan),
        (None, false, _) => ImportSource::Files(args.files.clone()),
        (None, true, Some(job_id)) => ImportSource::Resume(job_id),
        (None, true, None) => {
            return Err(CliError::InvalidArgs(
                "one of --plan, --file or --resume is required".to_string(),
            ));
        }
    };

    let config = load_config(args.common.config.as_deref())?;
    let client = Arc::new(connect(&config, args.common.instance_url.as_deref())?);
    let bulk = args.bulk || config.import.bulk;

    let run_id = Uuid::new_v4().to_string();
    let run_paths = start_run(&RunContext {
        run_id: run_id.clone(),
        started_at: chrono::Utc::now(),
        command: "import".to_string(),
        run_dir: args.common.run_dir.clone(),
        options: json!({
            "plan": args.plan,
            "files": args.files,
            "resume": args.resume,
            "refs": args.refs,
            "bulk": bulk,
            "store": config.store,
            "import": config.import,
        }),
    })?;
    init_run_logging(&run_paths.logs_path)?;
    tracing::info!(event = "run_started", run_id = %run_id, command = "import");

    let timer = Instant::now();
    let abort = Arc::new(AtomicBool::new(false));
    spawn_abort_listener(Arc::clone(&abort));

    let seed = match &args.refs {
        Some(path) => Some(read_references(path)?),
        None => None,
    };
    let bulk_options = BulkOptions {
        poll_interval: Duration::from_millis(config.import.bulk_poll_interval_ms),
        wait: Duration::from_secs(config.import.bulk_wait_secs),
        cache_path: Some(config.import.job_cache.clone()),
    };

    let outcome = match source {
        ImportSource::Resume(job_id) => {
            resume_bulk_job(Arc::clone(&client), bulk_options, &job_id, seed).await
        }
        source => {
            let saver: Box<dyn GroupSaver> = if bulk {
                Box::new(BulkSaver::new(Arc::clone(&client), bulk_options)?)
            } else {
                Box::new(TreeSaver::new(Arc::clone(&client)))
            };
            import_source(saver, source, abort, seed).await
        }
    };

    let report = match outcome {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(event = "run_failed", error = %err);
            return Err(err);
        }
    };

    write_result(&run_paths, &report)?;
    if let Some(path) = &args.refs_out {
        write_json_atomic(path, &report.references)?;
        tracing::info!(event = "references_written", path = %path.display());
    }
    print!("{}", render(&report, args.common.format)?);

    let failures = report.result.failures.len();
    tracing::info!(
        event = "run_finished",
        status = if failures == 0 { "success" } else { "partial" },
        records = report.result.records.len(),
        failures,
        duration_ms = timer.elapsed().as_millis() as u64,
        run = %run_paths.root.display()
    );

    if report.result.is_success() {
        Ok(())
    } else {
        Err(CliError::ImportFailed { failures })
    }
}

async fn import_source(
    saver: Box<dyn GroupSaver>,
    source: ImportSource,
    abort: Arc<AtomicBool>,
    seed: Option<ReferenceMap>,
) -> Result<ImportReport, CliError> {
    match source {
        ImportSource::Plan(plan_path) => {
            let validated = load_plan(&plan_path)?;
            for warning in &validated.warnings {
                tracing::warn!(
                    event = "plan_warning",
                    code = %warning.code,
                    path = %warning.path,
                    message = %warning.message
                );
            }
            let base_dir = plan_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let importer = Importer::new(
                saver,
                ImportOptions::default()
                    .with_base_dir(base_dir)
                    .with_abort(abort),
            );
            Ok(importer.run_import(&validated.plan, seed).await?)
        }
        ImportSource::Files(files) => {
            let files: Vec<String> = files
                .iter()
                .map(|file| file.to_string_lossy().into_owned())
                .collect();
            let importer = Importer::new(saver, ImportOptions::default().with_abort(abort));
            Ok(importer.import_files(&files, seed).await?)
        }
        ImportSource::Resume(job_id) => Err(CliError::InvalidArgs(format!(
            "bulk job {job_id} must be resumed with --resume alone"
        ))),
    }
}

async fn resume_bulk_job(
    client: Arc<RestClient>,
    options: BulkOptions,
    job_id: &str,
    seed: Option<ReferenceMap>,
) -> Result<ImportReport, CliError> {
    let saver = BulkSaver::new(client, options)?;
    let (object_type, response) = saver.resume(job_id).await?;
    let outcome = summarize_response(&object_type, response);

    let mut references = seed.unwrap_or_default();
    for (token, id) in outcome.assigned_ids() {
        references.insert(token, id);
    }
    Ok(ImportReport {
        result: ImportResult::aggregate([&outcome]),
        references,
    })
}

async fn run_export(args: ExportArgs) -> Result<(), CliError> {
    let config = load_config(args.common.config.as_deref())?;
    let client = connect(&config, args.common.instance_url.as_deref())?;
    let options = ExportOptions {
        output_dir: args
            .output_dir
            .clone()
            .unwrap_or_else(|| config.export.output_dir.clone()),
        plan: args.plan,
        prefix: args.prefix.clone(),
        max_records_per_file: args
            .max_records_per_file
            .unwrap_or(config.export.max_records_per_file),
    };

    let run_id = Uuid::new_v4().to_string();
    let run_paths: RunPaths = start_run(&RunContext {
        run_id: run_id.clone(),
        started_at: chrono::Utc::now(),
        command: "export".to_string(),
        run_dir: args.common.run_dir.clone(),
        options: json!({
            "query": args.query,
            "export": options,
            "store": config.store,
        }),
    })?;
    init_run_logging(&run_paths.logs_path)?;
    tracing::info!(event = "run_started", run_id = %run_id, command = "export");

    let timer = Instant::now();
    let output = match Exporter::new(client).run_export(&args.query, &options).await {
        Ok(output) => output,
        Err(err) => {
            tracing::error!(event = "run_failed", error = %err);
            return Err(err.into());
        }
    };

    write_result(&run_paths, &output)?;
    print!("{}", render(&output, args.common.format)?);
    tracing::info!(
        event = "run_finished",
        status = "success",
        records = output.summary.total(),
        files = output.files.len(),
        duration_ms = timer.elapsed().as_millis() as u64
    );
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<(), CliError> {
    match load_plan(&args.plan) {
        Ok(validated) => {
            let report = ValidationReport {
                errors: Vec::new(),
                warnings: validated.warnings,
            };
            print!("{}", render(&report, args.format)?);
            Ok(())
        }
        Err(PlanError::Invalid(report)) => {
            print!("{}", render(&report, args.format)?);
            Err(PlanError::Invalid(report).into())
        }
        Err(err) => Err(err.into()),
    }
}

fn run_schema(args: SchemaArgs) -> Result<(), CliError> {
    let schema = serde_json::to_string_pretty(&plan_json_schema())?;
    match args.out {
        Some(path) => write_bytes_atomic(&path, schema.as_bytes())?,
        None => println!("{schema}"),
    }
    Ok(())
}

fn connect(config: &ArborConfig, instance_url: Option<&str>) -> Result<RestClient, CliError> {
    let instance_url = instance_url
        .map(str::to_string)
        .or_else(|| config.store.instance_url.clone())
        .ok_or_else(|| {
            ConfigError::Missing("store instance_url (use --instance-url or arbor.toml)".to_string())
        })?;
    let token = config.store.access_token()?;
    Ok(RestClient::new(
        instance_url,
        config.store.api_version.clone(),
        token,
    ))
}

fn read_references(path: &Path) -> Result<ReferenceMap, CliError> {
    let content = std::fs::read_to_string(path)?;
    let pairs: std::collections::BTreeMap<String, String> = serde_json::from_str(&content)?;
    Ok(pairs.into_iter().collect())
}

fn spawn_abort_listener(abort: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(event = "abort_requested");
            abort.store(true, Ordering::SeqCst);
        }
    });
}
