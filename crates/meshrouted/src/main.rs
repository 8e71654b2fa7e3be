//! meshrouted: the MeshRoute daemon.
//!
//! Feeds routing resources from disk through the resolution controller and
//! serves the composed configs:
//! - `resolve` loads a directory once and prints the resolved view
//! - `watch` polls a directory and logs every push it triggers
//!
//! # Usage
//!
//! ```text
//! meshrouted resolve --resources ./vs --config meshroute.toml
//! meshrouted watch --resources ./vs --interval 5
//! ```

mod resources;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use meshroute_cache::{CacheEntry, RouteCache, XdsCache};
use meshroute_controller::{ConfigStore, Controller, ControllerOptions, ResourceEvent};
use meshroute_core::{
    Config, ConfigKey, Kind, MeshrouteConfig, NamespacedName, PushRequest, TriggerReason,
    XdsUpdater,
};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::resources::{load_resources, ResourceWatcher};

#[derive(Parser)]
#[command(name = "meshrouted", about = "MeshRoute virtual service resolver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a resource directory once and print the served configs as JSON.
    Resolve {
        /// Path to meshroute.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory of JSON resource files.
        #[arg(long)]
        resources: PathBuf,

        /// Only print configs in this namespace.
        #[arg(long, default_value = "")]
        namespace: String,

        /// Listener port the generated routes are cached under.
        #[arg(long, default_value = "80")]
        port: u16,
    },
    /// Watch a resource directory and apply changes as they appear.
    Watch {
        /// Path to meshroute.toml. Re-read on every poll.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory of JSON resource files.
        #[arg(long)]
        resources: PathBuf,

        /// Poll interval in seconds.
        #[arg(long, default_value = "5")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries resolved output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,meshrouted=debug,meshroute=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Resolve {
            config,
            resources,
            namespace,
            port,
        } => run_resolve(config.as_deref(), &resources, &namespace, port).await,
        Command::Watch {
            config,
            resources,
            interval,
        } => run_watch(config, resources, interval).await,
    }
}

/// Drops cached routes that depend on any changed config.
struct CacheInvalidator {
    cache: Arc<XdsCache<String>>,
}

impl XdsUpdater for CacheInvalidator {
    fn config_update(&self, request: PushRequest) {
        info!(
            configs = request.configs_updated.len(),
            full = request.full,
            "push requested"
        );
        self.cache.clear(&request.configs_updated);
    }
}

struct Pipeline {
    controller: Arc<Controller>,
    cache: Arc<XdsCache<String>>,
    events: mpsc::Sender<ResourceEvent>,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MeshrouteConfig> {
    match path {
        Some(path) => MeshrouteConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(MeshrouteConfig::default()),
    }
}

fn start_pipeline(config: &MeshrouteConfig) -> Pipeline {
    let cache = Arc::new(XdsCache::new(config.cache.max_entries));
    let updater = Arc::new(CacheInvalidator {
        cache: Arc::clone(&cache),
    });
    let controller = Arc::new(Controller::new(
        ControllerOptions::from_config(config).with_xds_updater(updater),
    ));

    let (events, events_rx) = mpsc::channel(1024);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.run(events_rx, shutdown_rx).await })
    };

    Pipeline {
        controller,
        cache,
        events,
        shutdown,
        handle,
    }
}

/// Upper bound on waiting for the controller to apply the initial state.
const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait until the controller has applied the initial state. Fails if the
/// controller task exits first or the wait exceeds [`SYNC_TIMEOUT`].
async fn wait_for_sync(pipeline: &Pipeline) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + SYNC_TIMEOUT;
    while !pipeline.controller.has_synced() {
        if pipeline.handle.is_finished() {
            anyhow::bail!("controller stopped before syncing");
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("controller did not sync within {}s", SYNC_TIMEOUT.as_secs());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Signal shutdown and wait for the controller task, surfacing a panic.
async fn stop_pipeline(pipeline: Pipeline) -> anyhow::Result<()> {
    // A closed channel means the task already exited; the join reports why.
    let _ = pipeline.shutdown.send(true);
    pipeline.handle.await.context("controller task failed")
}

async fn run_resolve(
    config_path: Option<&Path>,
    resources: &Path,
    namespace: &str,
    port: u16,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let pipeline = start_pipeline(&config);

    for vs in load_resources(resources)? {
        pipeline.events.send(ResourceEvent::Upsert(vs)).await?;
    }
    pipeline.events.send(ResourceEvent::Synced).await?;

    wait_for_sync(&pipeline).await?;

    let configs = pipeline.controller.list(Kind::VirtualService, namespace);
    let entry = route_cache_entry(&pipeline.controller, port, configs);
    let artifact = serde_json::to_string_pretty(&entry.virtual_services)?;
    let request = PushRequest::full(BTreeSet::new(), TriggerReason::ConfigUpdate);
    pipeline.cache.add(&entry, &request, artifact.clone());
    info!(
        key = %entry.key(),
        configs = entry.virtual_services.len(),
        dependencies = entry.dependent_configs().len(),
        "route configuration cached"
    );

    println!("{artifact}");

    stop_pipeline(pipeline).await
}

async fn run_watch(
    config_path: Option<PathBuf>,
    resources: PathBuf,
    interval: u64,
) -> anyhow::Result<()> {
    let config = load_config(config_path.as_deref())?;
    let pipeline = start_pipeline(&config);
    let mut watcher = ResourceWatcher::new(resources);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    let mut synced = false;

    info!(interval, "watching resources");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match watcher.poll() {
                    Ok(events) => {
                        for event in events {
                            pipeline.events.send(event).await?;
                        }
                        if !synced {
                            pipeline.events.send(ResourceEvent::Synced).await?;
                            synced = true;
                        }
                    }
                    Err(e) => warn!(error = %e, "resource reload failed"),
                }

                if let Some(path) = &config_path {
                    match MeshrouteConfig::from_file(path) {
                        Ok(reloaded) => {
                            pipeline.events.send(ResourceEvent::MeshConfig(reloaded.mesh)).await?;
                        }
                        Err(e) => warn!(error = %e, "config reload failed"),
                    }
                }

                let stats = pipeline.cache.stats();
                info!(
                    served = pipeline.controller.list(Kind::VirtualService, "").len(),
                    cached = pipeline.cache.len(),
                    cache_hits = stats.hits,
                    cache_misses = stats.misses,
                    "resource poll complete"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    stop_pipeline(pipeline).await?;
    info!("meshrouted stopped");
    Ok(())
}

/// Cache entry for the routes generated from `configs` on `port`, recording
/// the delegates each composed root was built from.
fn route_cache_entry(controller: &Controller, port: u16, configs: Vec<Config>) -> RouteCache {
    let mut delegates: Vec<_> = configs
        .iter()
        .flat_map(|c| controller.delegates_of(&NamespacedName::new(&c.meta.namespace, &c.meta.name)))
        .map(|d| ConfigKey::new(Kind::VirtualService, &d.name, &d.namespace).hash_code())
        .collect();
    delegates.sort_unstable();
    delegates.dedup();

    RouteCache {
        listener_port: port,
        virtual_services: configs,
        delegate_virtual_services: delegates,
    }
}
