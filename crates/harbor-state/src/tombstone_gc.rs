//! Tombstone GC: schedules expiry of KV tombstones.
//!
//! Every delete hints the index it ran at. Hints are grouped into
//! `granularity`-wide buckets keyed by their expiry time, so a burst of
//! deletes shares a single timer. When a bucket's timer fires the bucket's
//! highest index is sent on the expire channel; the consumer (the leader's
//! reap loop) then issues a reap for every tombstone at or below it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{StateError, StateResult};

/// A pending expiry bucket.
struct Bucket {
    max_index: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct GcState {
    enabled: bool,
    buckets: HashMap<u64, Bucket>,
}

/// Quantized expiry timers for tombstones.
pub struct TombstoneGc {
    ttl: Duration,
    granularity: Duration,
    epoch: Instant,
    runtime: Handle,
    state: Arc<Mutex<GcState>>,
    expire_tx: mpsc::UnboundedSender<u64>,
}

impl TombstoneGc {
    /// Create a disabled GC along with the channel expired indexes arrive on.
    ///
    /// Must be called from within a tokio runtime; timers are spawned on it.
    pub fn new(
        ttl: Duration,
        granularity: Duration,
    ) -> StateResult<(Self, mpsc::UnboundedReceiver<u64>)> {
        if ttl.is_zero() || granularity.is_zero() {
            return Err(StateError::InvalidGcConfig);
        }
        let runtime = Handle::try_current().map_err(|e| StateError::Runtime(e.to_string()))?;
        let (expire_tx, expire_rx) = mpsc::unbounded_channel();
        let gc = Self {
            ttl,
            granularity,
            epoch: Instant::now(),
            runtime,
            state: Arc::new(Mutex::new(GcState::default())),
            expire_tx,
        };
        Ok((gc, expire_rx))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Enable or disable expiry. Disabling cancels every pending timer and
    /// forgets the accumulated indexes.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        if !enabled {
            for (_, bucket) in state.buckets.drain() {
                bucket.timer.abort();
            }
        }
        state.enabled = enabled;
        debug!(enabled, "tombstone GC toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Record that a tombstone was written at `index`.
    pub fn hint(&self, index: u64) {
        let slot = self.bucket_for(Instant::now() + self.ttl);
        let mut state = self.state.lock();
        if !state.enabled {
            return;
        }
        if let Some(bucket) = state.buckets.get_mut(&slot) {
            bucket.max_index = bucket.max_index.max(index);
            return;
        }

        let deadline = self.epoch + self.bucket_offset(slot);
        let shared = self.state.clone();
        let expire_tx = self.expire_tx.clone();
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let expired = shared.lock().buckets.remove(&slot);
            if let Some(bucket) = expired {
                debug!(index = bucket.max_index, "tombstones expired");
                let _ = expire_tx.send(bucket.max_index);
            }
        });
        state.buckets.insert(
            slot,
            Bucket {
                max_index: index,
                timer,
            },
        );
    }

    /// True while any bucket is waiting to expire.
    pub fn pending_expiration(&self) -> bool {
        !self.state.lock().buckets.is_empty()
    }

    /// Bucket number for an expiry at `at`, rounded up to the next multiple
    /// of the granularity.
    fn bucket_for(&self, at: Instant) -> u64 {
        let since = at.saturating_duration_since(self.epoch).as_nanos();
        let gran = self.granularity.as_nanos();
        since.div_ceil(gran) as u64
    }

    fn bucket_offset(&self, slot: u64) -> Duration {
        let nanos = self.granularity.as_nanos().saturating_mul(slot as u128);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl Drop for TombstoneGc {
    fn drop(&mut self) {
        for (_, bucket) in self.state.lock().buckets.drain() {
            bucket.timer.abort();
        }
    }
}
