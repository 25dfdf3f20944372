//! CLI command definitions for image-forge.
//!
//! `run` executes a batch against the image service; `plan` expands the
//! same inputs into units and prints them without contacting anything.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::generation::{AdmissionGate, ArkImageClient, GenerationClient, ImageGenerator};
use crate::pipeline::{
    BatchOrchestrator, BatchPlan, BatchReport, ForgeConfig, TagMode, TaskRunner, TaskUnit,
};
use crate::reference::ReferenceEncoder;
use crate::storage::{ArtifactStore, Downloader, HttpDownloader, NamingScheme, RemoteFetcher};

/// Batch image generator driven by subjects and reference images.
#[derive(Parser)]
#[command(name = "image-forge")]
#[command(about = "Generate batches of images from subjects and reference images")]
#[command(version)]
#[command(
    long_about = "image-forge expands subjects and reference images into generation tasks, runs them concurrently against the image service and stores every result under a per-batch output directory.\n\nExample usage:\n  image-forge run --subject \"Alice\" --subject \"Bob\" --reference scarf.jpeg"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a batch against the image service.
    Run(RunArgs),

    /// Print the units a batch would run without calling the service.
    Plan(PlanArgs),
}

/// Inputs shared by `run` and `plan`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct BatchArgs {
    /// YAML plan file. Flags below override or extend it.
    #[arg(short = 'p', long)]
    pub plan: Option<PathBuf>,

    /// Subject to generate for (repeatable).
    #[arg(short = 's', long = "subject")]
    pub subjects: Vec<String>,

    /// Reference file name under the input directory (repeatable).
    #[arg(short = 'r', long = "reference")]
    pub references: Vec<String>,

    /// Use every image file directly under the input directory.
    #[arg(long)]
    pub discover_references: bool,

    /// Tera prompt template.
    #[arg(long)]
    pub prompt: Option<String>,

    /// One output directory per reference instead of one per run.
    #[arg(long)]
    pub per_reference_batches: bool,

    /// Reference image directory (overrides IMAGE_FORGE_INPUT_DIR).
    #[arg(short = 'i', long)]
    pub input_dir: Option<PathBuf>,

    /// Output root directory (overrides IMAGE_FORGE_OUTPUT_DIR).
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Seed for prompt variations.
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Arguments for `image-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// API key for the image service.
    #[arg(long, env = "ARK_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model identifier (overrides ARK_MODEL).
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Maximum generation calls in flight (overrides IMAGE_FORGE_MAX_CONCURRENT).
    #[arg(short = 'c', long)]
    pub max_concurrent: Option<usize>,

    /// Artifact naming scheme: sequenced or timestamp.
    #[arg(long)]
    pub naming: Option<NamingScheme>,

    /// Exit with an error if any unit failed.
    #[arg(long)]
    pub fail_on_error: bool,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `image-forge plan`.
#[derive(Parser, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Output JSON instead of a table.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to read `--log-level` before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => {
            run_batch_command(args).await?;
        }
        Commands::Plan(args) => {
            run_plan_command(args)?;
        }
    }
    Ok(())
}

// ============================================================================
// Plan assembly
// ============================================================================

/// Builds the batch plan from a plan file and/or flags.
fn build_plan(args: &BatchArgs) -> anyhow::Result<BatchPlan> {
    let mut plan = match &args.plan {
        Some(path) => BatchPlan::from_file(path)?,
        None => BatchPlan::default(),
    };

    if !args.subjects.is_empty() {
        plan.subjects = args.subjects.clone();
    }
    for reference in &args.references {
        if !plan.references.contains(reference) {
            plan.references.push(reference.clone());
        }
    }
    plan.discover_references |= args.discover_references;
    if let Some(prompt) = &args.prompt {
        plan.prompt_template = prompt.clone();
    }
    if args.seed.is_some() {
        plan.seed = args.seed;
    }
    if args.per_reference_batches {
        plan.tag_mode = TagMode::PerReference;
    }

    plan.validate()?;
    Ok(plan)
}

fn apply_batch_overrides(mut config: ForgeConfig, args: &BatchArgs) -> ForgeConfig {
    if let Some(dir) = &args.input_dir {
        config = config.with_input_dir(dir);
    }
    if let Some(dir) = &args.output_dir {
        config = config.with_output_dir(dir);
    }
    config
}

/// Expands the batch inputs into units, as `run` would.
fn plan_units(args: &BatchArgs, input_dir: &Path) -> anyhow::Result<Vec<TaskUnit>> {
    let plan = build_plan(args)?;
    let references = plan.resolve_references(input_dir)?;
    let spec = plan.into_spec(references)?;
    Ok(BatchOrchestrator::plan(&spec, chrono::Local::now())?)
}

/// Wires the pipeline components for a validated configuration.
fn build_orchestrator(config: &ForgeConfig) -> anyhow::Result<BatchOrchestrator> {
    let api_key = config.require_api_key()?;

    let ark = ArkImageClient::new(api_key, &config.base_url, config.request_timeout)?;
    info!(
        base_url = ark.base_url(),
        api_key = %ark.api_key_masked(),
        model = %config.model,
        max_concurrent = config.max_concurrent_generations,
        "Using image service"
    );

    let gate = Arc::new(AdmissionGate::new(config.max_concurrent_generations));
    let client = GenerationClient::new(Arc::new(ark) as Arc<dyn ImageGenerator>, gate, &config.model)
        .with_size(&config.image_size)
        .with_watermark(config.watermark);

    let store = Arc::new(ArtifactStore::new(&config.output_dir, config.naming));
    let downloader = HttpDownloader::new(config.download_timeout)?;
    let fetcher = RemoteFetcher::new(
        Arc::new(downloader) as Arc<dyn Downloader>,
        Arc::clone(&store),
    );

    let runner = TaskRunner::new(
        Arc::new(ReferenceEncoder::new(&config.input_dir)),
        Arc::new(client),
        Arc::new(fetcher),
    );

    Ok(BatchOrchestrator::new(Arc::new(runner), store))
}

// ============================================================================
// Run Command Implementation
// ============================================================================

async fn run_batch_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = apply_batch_overrides(ForgeConfig::from_env()?, &args.batch);
    if let Some(key) = &args.api_key {
        config = config.with_api_key(key);
    }
    if let Some(model) = &args.model {
        config = config.with_model(model);
    }
    if let Some(max) = args.max_concurrent {
        config = config.with_max_concurrent_generations(max);
    }
    if let Some(naming) = args.naming {
        config = config.with_naming(naming);
    }
    config.validate()?;

    if config.api_key.is_none() {
        anyhow::bail!(
            "ARK_API_KEY is required but not set.\n\
             Provide it via --api-key <KEY> or set the ARK_API_KEY environment variable."
        );
    }

    let plan = build_plan(&args.batch)?;
    let references = plan.resolve_references(&config.input_dir)?;
    if references.is_empty() {
        warn!("No reference images selected, generating from prompts only");
    }
    let spec = plan.into_spec(references)?;

    let orchestrator = build_orchestrator(&config)?;
    let report = orchestrator.run(&spec).await?;

    if args.json {
        let json_output = serde_json::to_string_pretty(&report.to_json())
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        print_report(&report, &config.output_dir);
    }

    if args.fail_on_error && !report.all_succeeded() {
        anyhow::bail!(
            "{} of {} tasks failed",
            report.failed(),
            report.total()
        );
    }

    Ok(())
}

fn print_report(report: &BatchReport, output_dir: &Path) {
    let status = if report.all_succeeded() { "✓" } else { "✗" };
    println!("{} Batch finished in {:.1}s", status, report.duration.as_secs_f64());
    println!("  Output dir: {}", output_dir.display());
    for tag in &report.batch_tags {
        println!("    {}", tag);
    }
    println!(
        "  Tasks: {} total, {} succeeded, {} failed",
        report.total(),
        report.succeeded(),
        report.failed()
    );
    if report.degraded() > 0 {
        println!(
            "  {} task(s) ran without their reference image",
            report.degraded()
        );
    }

    let counts = report.failure_counts();
    if !counts.is_empty() {
        println!("  Failures:");
        for (kind, count) in &counts {
            println!("    {}: {}", kind, count);
        }
        for outcome in report.failures() {
            println!(
                "    #{} {}: {}",
                outcome.unit.sequence(),
                outcome.unit.subject(),
                outcome.failure_message().unwrap_or_default()
            );
        }
    }
}

// ============================================================================
// Plan Command Implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct PlannedUnit {
    sequence: u64,
    batch: String,
    subject: String,
    reference: Option<String>,
    prompt: String,
}

fn run_plan_command(args: PlanArgs) -> anyhow::Result<()> {
    let config = apply_batch_overrides(ForgeConfig::from_env()?, &args.batch);
    let units = plan_units(&args.batch, &config.input_dir)?;

    if args.json {
        let planned: Vec<PlannedUnit> = units
            .iter()
            .map(|unit| PlannedUnit {
                sequence: unit.sequence(),
                batch: unit.batch_tag().to_string(),
                subject: unit.subject().to_string(),
                reference: unit.reference_file().map(str::to_string),
                prompt: unit.prompt().to_string(),
            })
            .collect();
        let json_output = serde_json::to_string_pretty(&planned)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
        return Ok(());
    }

    println!("{} task(s) planned", units.len());
    for unit in &units {
        println!(
            "  #{:<4} [{}] {} | {} | {}",
            unit.sequence(),
            unit.batch_tag(),
            unit.subject(),
            unit.reference_file().unwrap_or("-"),
            unit.prompt()
        );
    }
    Ok(())
}
