//! rksnapd — volume snapshot controller daemon.
//!
//! Watches declared `VolumeSnapshot` objects in a file-backed store and
//! drives them to reality through the `libsnapshot` reconciliation engine,
//! snapshotting hostpath volumes into tar archives.

mod controller;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use libsnapshot::bootstrap;
use libsnapshot::cache::ActualStateOfWorld;
use libsnapshot::snapshotter::VolumeSnapshotter;
use libsnapshot::store::{CoreClient, SnapshotStore};
use libsnapshot::volume::{HOSTPATH_PLUGIN_NAME, HostPathPlugin, VolumePluginRegistry};

use crate::controller::SnapshotController;
use crate::store::FileStore;

#[derive(Debug, Parser)]
#[command(name = "rksnapd", about = "volume snapshot controller")]
struct Args {
    /// Root directory of the object store.
    #[arg(long, default_value = "/var/lib/rksnapd/store")]
    store_root: PathBuf,

    /// Directory receiving hostpath snapshot archives.
    #[arg(long, default_value = "/var/lib/rksnapd/snapshots")]
    snapshot_dir: PathBuf,

    /// Resync period of the controller loop.
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    sync_period: Duration,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Build the volume plugin registry. Hostpath is always available; cloud
/// plugins register here once their providers are wired up.
fn build_volume_plugins(snapshot_dir: &PathBuf) -> VolumePluginRegistry {
    let mut plugins = VolumePluginRegistry::new();
    plugins.insert(
        HOSTPATH_PLUGIN_NAME.to_owned(),
        Arc::new(HostPathPlugin::new(snapshot_dir.clone())) as _,
    );
    plugins
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let file_store = Arc::new(
        FileStore::open(&args.store_root)
            .await
            .context("opening object store")?,
    );
    let snapshot_store: Arc<dyn SnapshotStore> = file_store.clone();
    let core_client: Arc<dyn CoreClient> = file_store.clone();

    // The snapshot resource may be registered out-of-band; do not start the
    // loop until the store serves it.
    bootstrap::wait_for_snapshot_resource(
        snapshot_store.as_ref(),
        bootstrap::RESOURCE_POLL_INTERVAL,
        bootstrap::RESOURCE_POLL_TIMEOUT,
    )
    .await
    .context("waiting for snapshot resource")?;

    let plugins = Arc::new(build_volume_plugins(&args.snapshot_dir));
    let actual_state = Arc::new(ActualStateOfWorld::new());
    let snapshotter = VolumeSnapshotter::new(
        snapshot_store.clone(),
        core_client,
        plugins,
        actual_state.clone(),
    );

    let controller = SnapshotController::new(
        snapshotter.clone(),
        snapshot_store,
        actual_state,
        args.sync_period,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn(async move { controller.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("shutdown signal received");

    // Stop scheduling new work, then let in-flight operations finish; they
    // are never cancelled.
    shutdown_tx
        .send(true)
        .context("signalling controller loop")?;
    loop_handle.await.context("joining controller loop")?;
    snapshotter.wait().await;
    info!("all operations drained, exiting");

    Ok(())
}
