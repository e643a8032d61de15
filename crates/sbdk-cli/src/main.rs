//! SBDK - local data pipeline dev orchestrator
//!
//! The `sbdk` command keeps a generate -> load -> transform -> test project
//! in sync with its inputs.
//!
//! ## Commands
//!
//! - `dev`: run one build now, optionally keep rebuilding on file changes
//! - `webhooks`: rebuild on authenticated GitHub deliveries
//! - `serve`: file watcher and webhook listener sharing one coordinator
//! - `validate`: report which configured project paths exist

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sbdk_core::config::CONFIG_FILE_NAME;
use sbdk_core::reporter::EXIT_BUILD_FAILED;
use sbdk_core::{
    exit_code, BuildCoordinator, BuildScope, ProjectConfig, Reporter, ResultSink, TriggerRequest,
};
use sbdk_ingress::{listen_addr, serve, AppState, WebhookIngress};
use sbdk_pipeline::StageRunner;
use sbdk_watch::ChangeDetector;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "sbdk")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local data pipeline dev orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Project config file
    #[arg(short, long, global = true, env = "SBDK_CONFIG", default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline once
    Dev {
        /// Keep running and rebuild whenever watched files change
        #[arg(short, long)]
        watch: bool,

        /// Only generate and load data; skip dbt
        #[arg(long, conflicts_with = "watch")]
        pipelines_only: bool,
    },

    /// Rebuild on GitHub webhook deliveries
    Webhooks {
        /// Listen address (default: webhook_host from the config)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (default: webhook_port from the config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the file watcher and the webhook listener together
    Serve {
        /// Listen address (default: webhook_host from the config)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (default: webhook_port from the config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check that the configured project paths exist
    Validate,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    sbdk_core::init_tracing(cli.json, level);

    let config = load_config(&cli.config)?;

    let code = match cli.command {
        Commands::Dev {
            watch,
            pipelines_only,
        } => {
            let scope = if pipelines_only {
                BuildScope::PipelinesOnly
            } else {
                BuildScope::Full
            };
            cmd_dev(&config, watch, scope).await?
        }
        Commands::Webhooks { host, port } => {
            cmd_webhooks(&config, host.as_deref(), port).await?
        }
        Commands::Serve { host, port } => cmd_serve(&config, host.as_deref(), port).await?,
        Commands::Validate => cmd_validate(&config),
    };

    Ok(ExitCode::from(code))
}

fn load_config(path: &Path) -> Result<ProjectConfig> {
    ProjectConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

/// One coordinator per process, reporting to stdout.
fn build_coordinator(config: &ProjectConfig) -> BuildCoordinator {
    let runner = Arc::new(StageRunner::from_config(config));
    let reporter: Arc<dyn ResultSink> = Arc::new(Reporter::stdout());
    BuildCoordinator::with_sinks(runner, vec![reporter])
}

fn as_exit(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(EXIT_BUILD_FAILED as u8)
}

/// Resolves on Ctrl+C. Never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// Run one manual build over `scope`. With `watch`, keep rebuilding on
/// changes until Ctrl+C; the exit code then reflects the watcher, not the
/// last build.
async fn cmd_dev(config: &ProjectConfig, watch: bool, scope: BuildScope) -> Result<u8> {
    info!(
        project = %config.project,
        target = %config.target,
        scope = scope.as_str(),
        "starting development build"
    );

    let coordinator = build_coordinator(config);
    let result = coordinator
        .run_to_completion(TriggerRequest::manual_scoped(scope))
        .await
        .context("Build did not complete")?;
    let code = as_exit(exit_code(&result));

    if !watch {
        return Ok(code);
    }

    let stream = ChangeDetector::from_config(config)
        .context("Invalid watch settings")?
        .watch()
        .context("Failed to start change detector")?;
    println!("Watching for changes (Ctrl+C to stop)");

    tokio::select! {
        res = stream.forward_to(&coordinator) => res.context("Change detector stopped")?,
        _ = shutdown_signal() => {}
    }

    // Let an in-flight build finish; builds are never cancelled midway.
    coordinator.wait_idle().await;
    Ok(0)
}

async fn cmd_webhooks(config: &ProjectConfig, host: Option<&str>, port: Option<u16>) -> Result<u8> {
    let ingress = WebhookIngress::from_config(config).context("Cannot start webhook listener")?;
    let addr = listen_addr(
        host.unwrap_or(&config.webhook_host),
        port.unwrap_or(config.webhook_port),
    )
    .await?;

    let coordinator = build_coordinator(config);
    let state = AppState::new(ingress, coordinator.clone());
    serve(addr, state, shutdown_signal())
        .await
        .context("Webhook listener failed")?;

    coordinator.wait_idle().await;
    Ok(0)
}

async fn cmd_serve(config: &ProjectConfig, host: Option<&str>, port: Option<u16>) -> Result<u8> {
    let ingress = WebhookIngress::from_config(config).context("Cannot start webhook listener")?;
    let addr = listen_addr(
        host.unwrap_or(&config.webhook_host),
        port.unwrap_or(config.webhook_port),
    )
    .await?;

    let coordinator = build_coordinator(config);
    let watcher = if config.auto_reload {
        let stream = ChangeDetector::from_config(config)
            .context("Invalid watch settings")?
            .watch()
            .context("Failed to start change detector")?;
        Some(stream)
    } else {
        info!("auto_reload is off; only webhooks will trigger builds");
        None
    };

    let state = AppState::new(ingress, coordinator.clone());
    let server = serve(addr, state, shutdown_signal());

    match watcher {
        Some(stream) => tokio::select! {
            res = server => res.context("Webhook listener failed")?,
            res = stream.forward_to(&coordinator) => res.context("Change detector stopped")?,
        },
        None => server.await.context("Webhook listener failed")?,
    }

    coordinator.wait_idle().await;
    Ok(0)
}

fn cmd_validate(config: &ProjectConfig) -> u8 {
    let checks = config.validate_paths();
    println!("Project: {}", config.project);
    for (name, exists) in &checks {
        let mark = if *exists { "✓" } else { "✗" };
        println!("  {} {}", mark, name);
    }

    if checks.values().all(|exists| *exists) {
        println!("All paths present");
        0
    } else {
        println!("Some paths are missing");
        EXIT_BUILD_FAILED as u8
    }
}
