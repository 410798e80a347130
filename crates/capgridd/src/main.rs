//! capgridd — the capgrid daemon.
//!
//! Single binary that assembles the control plane:
//! - Resource manager and cluster scaler
//! - Task scheduler (retry loops + cleanup sweep) and launcher
//! - Right sizer loop
//! - Scaler dispatcher (debounced and periodic environment scaler runs)
//! - Admin REST API
//!
//! # Usage
//!
//! ```text
//! capgridd simulate --port 8080 --environment dev=1:4:t2.medium
//! capgridd check-config --config /etc/capgrid/capgrid.toml
//! ```

mod simulation;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use capgrid_api::ApiState;
use capgrid_autoscale::{ClusterScaler, EnvironmentScaler, RightSizer, ScalerDispatcher};
use capgrid_core::{CapgridConfig, Settings, SystemClock, Waiter};
use capgrid_placement::ResourceManager;
use capgrid_provider::MemoryCloud;
use capgrid_scheduler::{ScheduledWorkloads, TaskLauncher, TaskScheduler};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use crate::simulation::{EnvironmentSeed, SimulatedFleet};

#[derive(Parser)]
#[command(name = "capgridd", about = "capgrid capacity control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane against an in-memory cloud.
    Simulate {
        /// Port for the admin API.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Path to capgrid.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Environment to simulate, as name=min:max:instance_type. Repeatable.
        #[arg(long = "environment", value_name = "SPEC")]
        environments: Vec<String>,

        /// How often the simulated fleet launches nodes for raised groups, in seconds.
        #[arg(long, default_value = "10")]
        fleet_interval: u64,
    },

    /// Parse a config file and print the resolved settings.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,capgrid=debug,capgridd=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            port,
            config,
            environments,
            fleet_interval,
        } => run_simulation(port, config.as_deref(), &environments, fleet_interval).await,
        Command::CheckConfig { config } => {
            let settings = load_settings(Some(&config))?;
            println!("{settings:#?}");
            Ok(())
        }
    }
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => {
            let settings = CapgridConfig::from_file(path)?.settings()?;
            info!(path = %path.display(), "configuration loaded");
            Ok(settings)
        }
        None => Ok(Settings::default()),
    }
}

async fn run_simulation(
    port: u16,
    config: Option<&Path>,
    environments: &[String],
    fleet_interval: u64,
) -> anyhow::Result<()> {
    info!("capgrid daemon starting in simulation mode");

    let settings = load_settings(config)?;
    let seeds = environments
        .iter()
        .map(|raw| EnvironmentSeed::parse(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;

    // ── Initialize subsystems ──────────────────────────────────

    let cloud = MemoryCloud::new();
    let fleet = SimulatedFleet::new(cloud.clone(), seeds, settings.agent_reserved_ports.clone());
    info!(environments = environments.len(), "in-memory cloud seeded");

    let resources = ResourceManager::new(Arc::new(cloud.clone()), Arc::new(cloud.clone()))
        .with_reserved_ports(settings.agent_reserved_ports.clone());

    // The scalers see both the cloud's tasks and the scheduler's waiting copies.
    let scheduler = TaskScheduler::spawn(Arc::new(cloud.clone()), &settings);
    let registry = Arc::new(ScheduledWorkloads::new(Arc::new(cloud.clone()), scheduler.clone()));

    let scaler = ClusterScaler::new(resources.clone(), registry.clone());
    let environment_scaler = EnvironmentScaler::new(resources, registry.clone()).with_node_waiter(
        Waiter::from_settings("environment nodes", &settings, Arc::new(SystemClock)),
    );
    let dispatcher = ScalerDispatcher::new(
        environment_scaler.clone(),
        registry.clone(),
        settings.scale_grace_period,
    );
    let launcher = TaskLauncher::new(scaler.clone(), scheduler.clone()).with_dispatcher(dispatcher.clone());
    let right_sizer = Arc::new(RightSizer::new(
        scaler,
        registry,
        Arc::new(SystemClock),
        settings.right_sizer_interval,
    ));
    info!(
        right_sizer_interval_secs = settings.right_sizer_interval.as_secs(),
        environment_scaler_interval_secs = settings.environment_scaler_interval.as_secs(),
        scale_grace_ms = settings.scale_grace_period.as_millis() as u64,
        retry_interval_secs = settings.retry_interval.as_secs(),
        "control plane initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let fleet_shutdown = shutdown_rx.clone();

    // ── Start background tasks ─────────────────────────────────

    let dispatcher_handle = dispatcher.start(settings.environment_scaler_interval, shutdown_rx.clone());
    let right_sizer_handle = right_sizer.clone().start(shutdown_rx);
    let fleet_handle = tokio::spawn(async move {
        fleet
            .run(Duration::from_secs(fleet_interval), fleet_shutdown)
            .await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = capgrid_api::build_router(ApiState {
        scheduler: scheduler.clone(),
        launcher,
        environment_scaler,
        right_sizer,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "admin API starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Wait for background tasks.
    scheduler.shutdown().await;
    let _ = dispatcher_handle.await;
    let _ = right_sizer_handle.await;
    let _ = fleet_handle.await;

    info!("capgrid daemon stopped");
    Ok(())
}
