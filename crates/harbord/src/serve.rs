//! `harbord serve`: hosts the state store until interrupted.

use std::sync::Arc;

use harbor_core::HarborConfig;
use harbor_state::{Command, CommandResponse, Fsm, StateStore, TombstoneGc, persist};
use tokio::sync::watch;
use tracing::{info, warn};

pub async fn run(config: HarborConfig) -> anyhow::Result<()> {
    info!("Harbor daemon starting");

    std::fs::create_dir_all(&config.state.data_dir)?;
    let snapshot_path = config.state.snapshot_path();

    // ── State store ────────────────────────────────────────────

    let (gc, mut expired) = TombstoneGc::new(
        config.tombstone_gc.ttl()?,
        config.tombstone_gc.granularity()?,
    )?;
    let gc = Arc::new(gc);
    gc.set_enabled(true);
    let store = StateStore::with_tombstone_gc(gc.clone());
    info!(ttl = ?gc.ttl(), "tombstone GC enabled");

    if snapshot_path.exists() {
        let index = persist::load_snapshot(&snapshot_path, &store)?;
        info!(path = %snapshot_path.display(), index, "state restored");
    }
    let fsm = Fsm::new(store.clone());

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Tombstone reaper ───────────────────────────────────────

    let reaper_fsm = fsm.clone();
    let mut reaper_shutdown = shutdown_rx.clone();
    let reaper_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(index) = expired.recv() => {
                    let log_index = reaper_fsm.store().snapshot().last_index() + 1;
                    match reaper_fsm.apply(log_index, Command::TombstoneReap { index }) {
                        Ok(CommandResponse::Reaped(count)) if count > 0 => {
                            info!(index, count, "reaped tombstones");
                        }
                        Err(e) => warn!(error = %e, "tombstone reap failed"),
                        _ => {}
                    }
                }
                _ = reaper_shutdown.changed() => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = reaper_handle.await;

    gc.set_enabled(false);
    persist::save_snapshot(&snapshot_path, &store.snapshot())?;
    info!(path = %snapshot_path.display(), "state saved");

    info!("Harbor daemon stopped");
    Ok(())
}
