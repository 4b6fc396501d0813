//! OCS Deployer
//!
//! Deploys (or tears down) OpenShift plus the OCS/ODF storage product on one
//! or more clusters, and Regional DR between managed clusters.
//!
//! # Flow
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │  --config    │──▶│  RunConfig   │──▶│ ClusterRegistry  │──▶│ Orchestrator │
//! │  CLI / env   │   │  (+ CLI)     │   │ (one client per  │   │ deploy or    │
//! └──────────────┘   └──────────────┘   │  kubeconfig)     │   │ destroy      │
//!                                       └──────────────────┘   └──────┬───────┘
//!                                                                      │
//!                                        <run_dir>/*.yaml, deploy_metrics.prom
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ocs_deployer::{
    connect_all, Adapters, Orchestrator, PlatformFactory, PlatformSettings, ProcessRunner,
    QuayTagResolver, RunConfig, SshShell, SystemClock, Platform,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// OCS Deployer - OpenShift storage deployment across one or more clusters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run configuration (YAML)
    #[arg(long, env = "OCS_DEPLOYER_CONFIG")]
    config: PathBuf,

    /// Directory for applied manifests and metrics
    #[arg(long, env = "RUN_DIR")]
    run_dir: Option<PathBuf>,

    /// Comma separated components to disable (rgw, cephfs, noobaa, blockpools)
    #[arg(long, env = "DISABLE_COMPONENTS", value_delimiter = ',')]
    disable_components: Vec<String>,

    /// Token for the quay.io tag API
    #[arg(long, env = "QUAY_TOKEN", hide_env_values = true)]
    quay_token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Deploy OCP, storage and, for multi-cluster runs, Regional DR
    Deploy,
    /// Uninstall storage and destroy every cluster
    Destroy,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting OCS Deployer");
    info!("  Version: {}", ocs_deployer::VERSION);
    info!("  Config: {}", args.config.display());
    info!("  Command: {:?}", args.command);

    let config = load_config(&args)?;

    let registry = connect_all(&config).context("registering clusters")?;
    let platform: Platform = config.env_data.platform.parse()?;
    let runner = Arc::new(ProcessRunner);
    let adapters = Adapters {
        platform: PlatformFactory::create(platform, PlatformSettings::from_config(&config)?, runner.clone())?,
        tags: Arc::new(QuayTagResolver::new(config.env_data.ocs_version.clone(), args.quay_token.clone())?),
        runner,
        shell: Arc::new(SshShell::new(
            config.external_mode.login.username.clone(),
            config.external_mode.ssh_key.clone(),
        )),
        clock: Arc::new(SystemClock),
    };

    let orchestrator = Orchestrator::new(&config, registry, adapters)?;
    let result = match args.command {
        Command::Deploy => orchestrator.deploy_cluster(&args.log_level).await,
        Command::Destroy => orchestrator.destroy_cluster(&args.log_level).await,
    };
    if let Err(e) = &result {
        error!("{:?} failed ({:?}): {}", args.command, e.class(), e);
    }
    result?;

    info!("OCS Deployer finished");
    Ok(())
}

/// File values first, command line on top
fn load_config(args: &Args) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.apply_disabled_components(&args.disable_components)?;
    if let Some(dir) = &args.run_dir {
        config.run.run_dir = Some(dir.clone());
    }
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("kube=info".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap())
        .add_directive("rustls=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
