use anyhow::{Context, Result};
use camrelay_core::{CommandRelay, FeatureCache};
use camrelay_hw::{AccessRegistry, SimulatedSystem};
use camrelayd::{
    start_remote_control, AcquisitionMode, AcquisitionSettings, Config, LogFeedback,
    PluginRegistry, ServerStatus, StatusWatch, WorkerContext, WorkerSupervisor,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "camrelayd", about = "Camera acquisition and remote-control daemon")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera device id, e.g. DEV_000F314C6B39
    #[arg(long)]
    device_id: Option<String>,

    /// Remote-control endpoint, e.g. tcp://*:5555
    #[arg(long)]
    endpoint: Option<String>,

    /// Directory of motion plugin tables
    #[arg(long)]
    plugin_dir: Option<PathBuf>,

    /// Acquisition mode: paced or streaming
    #[arg(long)]
    mode: Option<AcquisitionMode>,

    /// Start acquiring immediately instead of polling
    #[arg(long)]
    acquire: bool,

    /// Stop acquisition after this many frames
    #[arg(long)]
    frames: Option<u64>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(id) = self.device_id {
            config.device_id = Some(id);
        }
        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(dir) = self.plugin_dir {
            config.plugin_dir = Some(dir);
        }
        if let Some(mode) = self.mode {
            config.acquisition.mode = mode;
        }
        if self.frames.is_some() {
            config.acquisition.frame_limit = self.frames;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let acquire = args.acquire;
    let mut config = Config::load(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut config);
    let (device_id, endpoint) = config.validate().context("invalid configuration")?;

    tracing::info!(device = %device_id, %endpoint, mode = ?config.acquisition.mode, "camrelayd starting");

    let system = SimulatedSystem::new();
    system.add_camera(&device_id, config.simulation.camera_spec());

    let plugins = match &config.plugin_dir {
        Some(dir) => PluginRegistry::from_dir(dir)
            .with_context(|| format!("loading motion plugins from {}", dir.display()))?,
        None => PluginRegistry::new(),
    };
    for plugin in plugins.for_device(&device_id) {
        let desc = plugin.describe();
        tracing::info!(device = %device_id, plugin = %desc.name, version = %desc.version, "motion plugin available");
    }

    let cache = Arc::new(FeatureCache::new());
    let relay = Arc::new(CommandRelay::new());
    let ctx = WorkerContext {
        system: Arc::new(system),
        registry: AccessRegistry::new(),
        device_id,
        cache: cache.clone(),
        feedback: Arc::new(LogFeedback::new()),
        limits: config.limits,
    };
    let supervisor = Arc::new(WorkerSupervisor::new(
        ctx,
        relay.clone(),
        AcquisitionSettings::from(&config.acquisition),
        config.polling.interval(),
    ));
    if acquire {
        supervisor.start_acquisition(None)?;
    } else {
        supervisor.start_polling()?;
    }

    let status = ServerStatus::new();
    let server = start_remote_control(&endpoint, cache, relay.sender(), status.clone()).await;
    let mut watch = StatusWatch::new(status);

    tracing::info!("camrelayd ready");

    let mut ticks = tokio::time::interval(config.polling.interval());
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            _ = ticks.tick() => {
                match watch.changed() {
                    Some(false) => tracing::error!("remote control is offline"),
                    Some(true) => tracing::info!("remote control is online"),
                    None => {}
                }
                let sup = supervisor.clone();
                match tokio::task::spawn_blocking(move || sup.resume_polling_if_idle()).await? {
                    Ok(true) => tracing::info!("acquisition ended, polling resumed"),
                    Ok(false) => {}
                    Err(e) => tracing::error!(error = %e, "cannot resume polling"),
                }
            }
        }
    }

    tracing::info!("camrelayd shutting down");
    let sup = supervisor.clone();
    tokio::task::spawn_blocking(move || sup.stop_all()).await?;
    if let Some(server) = server {
        if let Err(e) = server.shutdown().await {
            tracing::warn!(error = %e, "remote control ended with an error");
        }
    }
    Ok(())
}
