//! Long-poll helper built on the watch primitives.

use std::time::Duration;

use tokio::time::Instant;

use crate::watch::{Watch, watch_channel};

/// Run `query` until its index moves past `min_index` or `timeout` elapses.
///
/// The watch is registered before each run, so a write landing between the
/// read and the wait still wakes us. Wake-ups are level-triggered: a spurious
/// one just re-runs the query. On timeout the query is run one last time and
/// its result returned whatever the index.
pub async fn blocking_query<T, F>(
    watch: &dyn Watch,
    min_index: u64,
    timeout: Duration,
    mut query: F,
) -> (u64, T)
where
    F: FnMut() -> (u64, T),
{
    let deadline = Instant::now() + timeout;
    loop {
        let (tx, mut rx) = watch_channel();
        watch.wait(tx.clone());
        let (index, result) = query();
        if min_index == 0 || index > min_index {
            watch.clear(&tx);
            return (index, result);
        }
        let woken = tokio::time::timeout_at(deadline, rx.recv()).await;
        // Only the watch that fired dropped `tx`; the others still hold it.
        watch.clear(&tx);
        if woken.is_err() {
            return query();
        }
    }
}
