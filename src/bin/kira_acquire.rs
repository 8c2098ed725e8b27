use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_acquire::config::{ConfigLoader, FetchTool, ResolvedConfig};
use kira_acquire::error::AcquireError;
use kira_acquire::output::{JsonOutput, PathItem, PathsResult, RunItem, RunResult};
use kira_acquire::pipeline::Pipeline;
use kira_acquire::recipe::{NamedPipeline, RecipeBuilder};

#[derive(Parser)]
#[command(name = "kira-acquire")]
#[command(about = "Materialize files through declarative fetch/unpack/index pipelines, exactly once")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run pipelines from the config file")]
    Run(RunArgs),
    #[command(about = "Show where each pipeline's output lives without running it")]
    Paths(SelectArgs),
}

#[derive(Args, Clone)]
struct SelectArgs {
    #[arg(long, help = "Path to config file (default: ./kira-acquire.json)")]
    config: Option<String>,
    #[arg(long, help = "Working directory override")]
    dir: Option<String>,
    #[arg(help = "Pipeline names (default: all)")]
    names: Vec<String>,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    select: SelectArgs,
    #[arg(long, help = "Re-run every step even if outputs are complete")]
    redo: bool,
    #[arg(long, value_enum, help = "Download tool override")]
    fetch_tool: Option<FetchTool>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<AcquireError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AcquireError) -> u8 {
    match error {
        AcquireError::MissingConfig
        | AcquireError::ConfigRead(_)
        | AcquireError::ConfigParse(_)
        | AcquireError::InvalidConfiguration(_)
        | AcquireError::UnsupportedMethod(_)
        | AcquireError::UnknownPipeline(_) => 2,
        AcquireError::Http(_)
        | AcquireError::HttpStatus { .. }
        | AcquireError::MissingTool(_)
        | AcquireError::MissingInput { .. }
        | AcquireError::StepFailed { .. }
        | AcquireError::ActionFailed { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_pipelines(args),
        Commands::Paths(args) => show_paths(args),
    }
}

fn run_pipelines(args: RunArgs) -> miette::Result<()> {
    let mut resolved = load_config(&args.select)?;
    if args.redo {
        resolved.settings.redo = true;
    }
    if let Some(tool) = args.fetch_tool {
        resolved.settings.fetch.tool = tool;
    }

    let mut items = Vec::new();
    for named in select_pipelines(&resolved, &args.select.names)? {
        let cached = !named.pipeline.redo() && named.pipeline.exists()?;
        let start = Instant::now();
        let artifact = named.pipeline.run()?;
        items.push(RunItem {
            name: named.name,
            path: artifact.resolved_path()?.to_string(),
            action: if cached { "cached" } else { "acquired" }.to_string(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        });
    }
    JsonOutput::print_run(&RunResult { pipelines: items }).into_diagnostic()?;
    Ok(())
}

fn show_paths(args: SelectArgs) -> miette::Result<()> {
    let resolved = load_config(&args)?;
    let mut items = Vec::new();
    for named in select_pipelines(&resolved, &args.names)? {
        items.push(PathItem {
            path: named.pipeline.path()?.to_string(),
            complete: named.pipeline.exists()?,
            steps: named
                .pipeline
                .steps()
                .iter()
                .map(|step| step.name().to_string())
                .collect(),
            name: named.name,
        });
    }
    JsonOutput::print_paths(&PathsResult { pipelines: items }).into_diagnostic()?;
    Ok(())
}

fn load_config(args: &SelectArgs) -> Result<ResolvedConfig, AcquireError> {
    let mut resolved = ConfigLoader::resolve(args.config.as_deref())?;
    if let Some(dir) = &args.dir {
        resolved.settings.working_directory = dir.clone();
    }
    Ok(resolved)
}

fn select_pipelines(
    resolved: &ResolvedConfig,
    names: &[String],
) -> Result<Vec<NamedPipeline>, AcquireError> {
    let base = Pipeline::new(&resolved.settings)?;
    let built = RecipeBuilder::new(base).build(&resolved.pipelines)?;
    if names.is_empty() {
        return Ok(built);
    }
    names
        .iter()
        .map(|name| {
            built
                .iter()
                .find(|named| &named.name == name)
                .cloned()
                .ok_or_else(|| AcquireError::UnknownPipeline(name.clone()))
        })
        .collect()
}
