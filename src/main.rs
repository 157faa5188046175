use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use report_harvest::backend::{PortalModel, SimulatedPortalFactory};
use report_harvest::config::{
    DriverConfig, ExportFormat, HarvestConfig, MissingParameterPolicy, SessionConfig,
    DEFAULT_PORTAL_URL,
};
use report_harvest::driver::SessionFactory;
use report_harvest::harvester::{HarvestReport, Harvester};
use report_harvest::scheduler::manifest::load_manifest;
use report_harvest::scheduler::OutcomeResult;
use report_harvest::schema::SchemaRegistry;

#[derive(Parser, Debug)]
#[command(name = "report-harvest")]
#[command(version)]
#[command(about = "Concurrent report exporter for a web-based data portal")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a batch of jobs from a manifest
    Run(RunArgs),

    /// Inspect the report schema table
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Job manifest (TOML with [[job]] tables)
    #[arg(long)]
    jobs: PathBuf,

    /// Schema file replacing the built-in report table
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Number of concurrent sessions
    #[arg(long, default_value = "3")]
    concurrency: usize,

    /// Directory exported files are written to
    #[arg(long, default_value = "downloads")]
    out: PathBuf,

    #[arg(long, default_value = DEFAULT_PORTAL_URL)]
    portal_url: String,

    /// Seconds to wait for each control before failing the step
    #[arg(long, default_value = "10")]
    step_timeout_secs: u64,

    /// What to do when a job lacks a parameter its report requires
    #[arg(long, default_value = "warn")]
    missing_parameter: MissingParameterPolicy,

    /// Export file format
    #[arg(long, default_value = "csv")]
    format: ExportFormat,

    /// Delete export files left by earlier runs instead of failing those jobs
    #[arg(long)]
    replace_existing: bool,

    /// Drive an in-memory portal built from the job list instead of a browser
    #[arg(long)]
    simulate: bool,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(clap::Subcommand, Debug)]
enum SchemaCommands {
    /// List every program and report
    List {
        #[arg(long)]
        schema: Option<PathBuf>,

        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },

    /// Show the parameter steps of one report
    Show {
        #[arg(long)]
        schema: Option<PathBuf>,

        #[arg(long)]
        program: String,

        #[arg(long)]
        report: String,

        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Structures
// =============================================================================

#[derive(Serialize)]
struct SchemaEntryOutput {
    program: String,
    report: String,
    steps: Vec<String>,
}

#[derive(Serialize)]
struct SchemaListOutput {
    reports: Vec<SchemaEntryOutput>,
    total_count: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Run(run_args) => run_batch(run_args).await,
        Commands::Schema { command } => match command {
            SchemaCommands::List { schema, output } => {
                handle_schema_list(load_registry(schema.as_ref())?, &output)
            }
            SchemaCommands::Show {
                schema,
                program,
                report,
                output,
            } => handle_schema_show(load_registry(schema.as_ref())?, &program, &report, &output),
        },
    }
}

fn load_registry(path: Option<&PathBuf>) -> Result<SchemaRegistry, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let registry = SchemaRegistry::load(path)?;
            tracing::info!(path = %path.display(), reports = registry.len(), "Schema loaded");
            Ok(registry)
        }
        None => Ok(SchemaRegistry::builtin()),
    }
}

// =============================================================================
// Run
// =============================================================================

async fn run_batch(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_registry(args.schema.as_ref())?;
    let jobs = load_manifest(&args.jobs)?;
    tracing::info!(path = %args.jobs.display(), jobs = jobs.len(), "Manifest loaded");

    let config = HarvestConfig {
        session: SessionConfig {
            portal_url: args.portal_url,
            download_dir: args.out,
            headless: !args.headed,
        },
        driver: DriverConfig {
            step_timeout: Duration::from_secs(args.step_timeout_secs),
            export_format: args.format,
            ..DriverConfig::default()
        },
        ..HarvestConfig::default()
    }
    .with_concurrency(args.concurrency)
    .with_missing_parameter(args.missing_parameter)
    .with_replace_existing(args.replace_existing);

    let factory: Arc<dyn SessionFactory> = if args.simulate {
        tracing::info!("Using simulated portal");
        let model = PortalModel::from_jobs(&registry, &jobs, &config.default_breakdowns);
        Arc::new(SimulatedPortalFactory::new(model))
    } else {
        browser_factory()?
    };

    let harvester = Harvester::new(config, registry, factory);
    let report = harvester.run(jobs).await?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => print_report(&report),
    }

    if report.summary.failed > 0 {
        return Err(format!(
            "{} of {} jobs failed",
            report.summary.failed, report.summary.total
        )
        .into());
    }
    Ok(())
}

#[cfg(feature = "chromium")]
fn browser_factory() -> Result<Arc<dyn SessionFactory>, Box<dyn std::error::Error>> {
    Ok(Arc::new(report_harvest::backend::ChromiumFactory::new()))
}

#[cfg(not(feature = "chromium"))]
fn browser_factory() -> Result<Arc<dyn SessionFactory>, Box<dyn std::error::Error>> {
    Err("built without browser support; rebuild with --features chromium or pass --simulate".into())
}

fn print_report(report: &HarvestReport) {
    let outcomes = report.in_submission_order();
    if outcomes.is_empty() {
        println!("No jobs found.");
        return;
    }

    println!("{:<4} {:<8} {:<7} {:<45} RESULT", "SEQ", "STATUS", "WORKER", "JOB");
    println!("{}", "-".repeat(100));
    for outcome in outcomes {
        let (status, result) = match &outcome.result {
            OutcomeResult::Success { artifact } => ("ok", artifact.display().to_string()),
            OutcomeResult::Failed { kind, message } => ("failed", format!("{}: {}", kind, message)),
        };
        // Truncate label if too long
        let label = if outcome.label.chars().count() > 45 {
            format!("{}...", outcome.label.chars().take(42).collect::<String>())
        } else {
            outcome.label.clone()
        };
        println!(
            "{:<4} {:<8} {:<7} {:<45} {}",
            outcome.sequence, status, outcome.worker_id, label, result
        );
        for warning in &outcome.warnings {
            println!("{:<21}warning: {}", "", warning);
        }
    }

    let summary = &report.summary;
    println!();
    println!(
        "{} jobs: {} succeeded, {} failed, {} warnings",
        summary.total, summary.succeeded, summary.failed, summary.warnings
    );
    for (kind, count) in &summary.failures_by_kind {
        println!("  {:<26} {}", kind.to_string(), count);
    }
}

// =============================================================================
// Schema
// =============================================================================

fn handle_schema_list(
    registry: SchemaRegistry,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = registry.entries();
    match output_format {
        OutputFormat::Json => {
            let output = SchemaListOutput {
                total_count: entries.len(),
                reports: entries
                    .into_iter()
                    .map(|e| SchemaEntryOutput {
                        program: e.program,
                        report: e.report,
                        steps: e.steps.iter().map(|p| p.to_string()).collect(),
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("{:<28} {:<58} STEPS", "PROGRAM", "REPORT");
            println!("{}", "-".repeat(110));
            for entry in &entries {
                let steps: Vec<&str> = entry.steps.iter().map(|p| p.as_str()).collect();
                println!(
                    "{:<28} {:<58} {}",
                    entry.program,
                    entry.report,
                    steps.join(", ")
                );
            }
            println!();
            println!(
                "{} reports across {} programs",
                entries.len(),
                registry.programs().len()
            );
        }
    }
    Ok(())
}

fn handle_schema_show(
    registry: SchemaRegistry,
    program: &str,
    report: &str,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let steps = registry.lookup(program, report)?;
    match output_format {
        OutputFormat::Json => {
            let output = SchemaEntryOutput {
                program: program.to_string(),
                report: report.to_string(),
                steps: steps.iter().map(|p| p.to_string()).collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Program: {}", program);
            println!("Report:  {}", report);
            println!("Steps:");
            for (i, step) in steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
        }
    }
    Ok(())
}
