//! Supergraph sync CLI.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use supergraph_sync::introspect::{failed_services, schema_file_name};
use supergraph_sync::{
    keep_files_in, Pipeline, PipelineReport, PipelineState, ServiceSelection, SyncConfig,
    SyncError, DEFAULT_CONFIG_FILE,
};

mod ui;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "SUPERGRAPH_SYNC_LOG";

#[derive(Parser, Debug)]
#[command(name = "supergraph-sync", version)]
#[command(about = "Introspect subgraphs, compose the supergraph, publish it and roll the gateway")]
struct Cli {
    /// Config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Debug logging (overrides SUPERGRAPH_SYNC_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline
    Sync {
        #[command(flatten)]
        services: ServiceArgs,

        /// Stop after the deploy; skip the health check
        #[arg(long)]
        skip_verify: bool,

        /// Copy the run's workspace files here before it is deleted
        #[arg(long, value_name = "DIR")]
        keep_workspace: Option<PathBuf>,
    },

    /// Check that the required tools are installed
    Check,

    /// List the registered services
    Services,

    /// Fetch subgraph schemas only
    Introspect {
        #[command(flatten)]
        services: ServiceArgs,

        /// Where to write the fetched schemas
        #[arg(short, long, value_name = "DIR")]
        out: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ServiceArgs {
    /// Services to process, in composition order
    #[arg(value_name = "SERVICE", required_unless_present = "all", conflicts_with = "all")]
    names: Vec<String>,

    /// Every registered service
    #[arg(long)]
    all: bool,
}

impl ServiceArgs {
    fn selection(&self) -> ServiceSelection {
        ServiceSelection::from_args(self.names.clone(), self.all)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.exit_code();
            eprintln!("{:?}", miette::Report::new(e));
            ExitCode::from(code)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), SyncError> {
    debug!(config = %cli.config.display(), "loading configuration");
    let config = SyncConfig::load(&cli.config)?;

    match cli.command {
        Commands::Sync {
            services,
            skip_verify,
            keep_workspace,
        } => sync(&config, services.selection(), skip_verify, keep_workspace).await,
        Commands::Check => check(&config),
        Commands::Services => {
            list_services(&config);
            Ok(())
        }
        Commands::Introspect { services, out } => introspect(&config, services.selection(), &out).await,
    }
}

async fn sync(
    config: &SyncConfig,
    selection: ServiceSelection,
    skip_verify: bool,
    keep_workspace: Option<PathBuf>,
) -> Result<(), SyncError> {
    ui::box_header(&format!("{} Supergraph sync", ui::symbols::DIAMOND));
    ui::box_line(&format!("gateway   {} ({})", config.gateway.service, config.gateway.region));
    ui::box_line(&format!("artifacts {}", config.artifacts.bucket));
    ui::box_footer();
    println!();

    let mut pipeline = Pipeline::from_config(config)?
        .skip_verify(skip_verify)
        .with_observer(Arc::new(|state: PipelineState| {
            if let PipelineState::Running(stage) = state {
                ui::stage(stage.label());
            }
        }));
    if let Some(dir) = keep_workspace {
        pipeline = pipeline.with_release_hook(keep_files_in(dir));
    }

    let report = pipeline.run(&selection).await;
    print_report(&report);
    report.outcome
}

fn print_report(report: &PipelineReport) {
    if !report.introspection.is_empty() {
        println!();
        for result in &report.introspection {
            let detail = match &result.error {
                Some(err) => format!("{} {} {}", result.routing_url, ui::symbols::DOT, err),
                None if result.attempts > 1 => {
                    format!("{} {} {} attempts", result.routing_url, ui::symbols::DOT, result.attempts)
                }
                None => result.routing_url.clone(),
            };
            ui::service_line(result.succeeded, &result.service_name, &detail);
        }
    }

    if let Some(published) = &report.published {
        println!();
        ui::info(&format!("versioned  {}", published.versioned_path));
        ui::info(&format!("latest     {}", published.latest_path));
    }
    if let Some(deployment) = &report.deployment {
        ui::info(&format!(
            "revision   {}",
            deployment.revision.as_deref().unwrap_or("unknown")
        ));
    }
    println!();

    match &report.outcome {
        Ok(()) => {
            ui::success("Gateway is serving the new supergraph.");
            ui::timing("Synced", report.elapsed);
        }
        // The error itself is rendered once, by miette, on the way out of main.
        Err(e) => {
            ui::error_header(&failure_header(e));
            if e.needs_operator() {
                ui::warn("The gateway may not match the last known-good state. Manual follow-up needed.");
            } else {
                ui::dim("The gateway keeps serving its previous supergraph.");
            }
            ui::timing("Stopped", report.elapsed);
        }
    }
}

fn failure_header(err: &SyncError) -> String {
    match err.stage() {
        Some(stage) => format!("Failed while {}.", stage.label()),
        None => "Failed during setup.".to_string(),
    }
}

fn check(config: &SyncConfig) -> Result<(), SyncError> {
    let pipeline = Pipeline::from_config(config)?;
    let missing = pipeline.missing_dependencies();

    for tool in config.required_tools() {
        let ok = !missing.contains(&tool);
        ui::service_line(ok, &tool, if ok { "found on PATH" } else { "missing" });
    }
    println!();

    if missing.is_empty() {
        ui::success("All required tools are installed.");
        return Ok(());
    }
    Err(SyncError::MissingDependency {
        guidance: supergraph_sync::deps::install_guidance(&missing),
        tools: missing,
    })
}

fn list_services(config: &SyncConfig) {
    for entry in &config.services {
        ui::service_line(true, &entry.name, &entry.routing_url);
    }
}

async fn introspect(config: &SyncConfig, selection: ServiceSelection, out: &Path) -> Result<(), SyncError> {
    let pipeline = Pipeline::from_config(config)?;

    let spinner = ui::spinner("Introspecting subgraphs...");
    let results = pipeline.introspect_only(&selection, out).await;
    spinner.finish_and_clear();
    let results = results?;

    for result in &results {
        let detail = match &result.error {
            Some(err) => err.clone(),
            None => out.join(schema_file_name(&result.service_name)).display().to_string(),
        };
        ui::service_line(result.succeeded, &result.service_name, &detail);
    }

    let failed = failed_services(&results);
    if failed.is_empty() {
        println!();
        ui::success(&format!("{} schema(s) written to {}", results.len(), out.display()));
        Ok(())
    } else {
        Err(SyncError::IntrospectionFailed { services: failed })
    }
}
