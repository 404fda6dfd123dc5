//! Change notification for blocking queries.
//!
//! # Architecture
//!
//! Waiters hand in the sending half of a capacity-1 `tokio::sync::mpsc`
//! channel. A notification is a non-blocking `try_send`, so a waiter that
//! has not drained its channel yet simply sees one pending wake-up. Every
//! notification also deregisters the waiters it fired: watches are one-shot,
//! and a blocking query re-registers before re-running its read.
//!
//! - [`FullTableWatch`] wakes everyone waiting on one table.
//! - [`PrefixWatch`] is the KV flavour: waiters register under a key
//!   prefix and a change to `key` wakes every prefix on the path from the
//!   root to `key` (and, for subtree changes, everything below `key`).
//! - [`WatchManager`] batches the tables touched by one write and fires each
//!   of them exactly once after commit.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::schema::Table;

/// Sending half registered with a watch.
pub type WatchSender = mpsc::Sender<()>;

/// Creates a channel suitable for [`Watch::wait`].
pub fn watch_channel() -> (WatchSender, mpsc::Receiver<()>) {
    mpsc::channel(1)
}

/// Something a blocking query can wait on.
pub trait Watch: Send + Sync {
    /// Register `tx` to be signalled on the next change.
    fn wait(&self, tx: WatchSender);

    /// Deregister `tx` without signalling it.
    fn clear(&self, tx: &WatchSender);
}

fn fire(waiters: Vec<WatchSender>) {
    for tx in waiters {
        // A full channel already has a wake-up pending.
        let _ = tx.try_send(());
    }
}

// ── Full table ────────────────────────────────────────────────────

/// Wakes every waiter when its table changes.
#[derive(Default)]
pub struct FullTableWatch {
    waiters: Mutex<Vec<WatchSender>>,
}

impl FullTableWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal and drop every registered waiter.
    pub fn notify(&self) {
        let waiters = std::mem::take(&mut *self.waiters.lock());
        fire(waiters);
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Watch for FullTableWatch {
    fn wait(&self, tx: WatchSender) {
        self.waiters.lock().push(tx);
    }

    fn clear(&self, tx: &WatchSender) {
        self.waiters.lock().retain(|w| !w.same_channel(tx));
    }
}

/// A watch over several tables at once.
pub struct MultiWatch {
    watches: Vec<Arc<FullTableWatch>>,
}

impl Watch for MultiWatch {
    fn wait(&self, tx: WatchSender) {
        for w in &self.watches {
            w.wait(tx.clone());
        }
    }

    fn clear(&self, tx: &WatchSender) {
        for w in &self.watches {
            w.clear(tx);
        }
    }
}

// ── KV prefixes ───────────────────────────────────────────────────

/// Prefix-scoped watches for the KV table.
///
/// Entries only exist while someone waits on them; firing or clearing the
/// last waiter of a prefix removes the prefix.
#[derive(Default)]
pub struct PrefixWatch {
    prefixes: Mutex<BTreeMap<String, Vec<WatchSender>>>,
}

impl PrefixWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait(&self, prefix: &str, tx: WatchSender) {
        self.prefixes
            .lock()
            .entry(prefix.to_string())
            .or_default()
            .push(tx);
    }

    pub fn clear(&self, prefix: &str, tx: &WatchSender) {
        let mut prefixes = self.prefixes.lock();
        if let Some(waiters) = prefixes.get_mut(prefix) {
            waiters.retain(|w| !w.same_channel(tx));
            if waiters.is_empty() {
                prefixes.remove(prefix);
            }
        }
    }

    /// Fire every watch on the path to `key`, plus every watch below `key`
    /// when `subtree` is set.
    pub fn notify(&self, key: &str, subtree: bool) {
        let mut prefixes = self.prefixes.lock();
        let mut hit = BTreeSet::new();
        for end in (0..=key.len()).filter(|i| key.is_char_boundary(*i)) {
            if prefixes.contains_key(&key[..end]) {
                hit.insert(key[..end].to_string());
            }
        }
        if subtree {
            let below = prefixes
                .range::<str, _>((Bound::Included(key), Bound::Unbounded))
                .take_while(|(k, _)| k.starts_with(key))
                .map(|(k, _)| k.clone());
            hit.extend(below);
        }
        let mut waiters = Vec::new();
        for prefix in hit {
            if let Some(w) = prefixes.remove(&prefix) {
                waiters.extend(w);
            }
        }
        drop(prefixes);
        fire(waiters);
    }

    /// Number of prefixes currently holding waiters.
    pub fn len(&self) -> usize {
        self.prefixes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`Watch`] over one KV prefix.
pub struct KvsWatch {
    prefixes: Arc<PrefixWatch>,
    prefix: String,
}

impl Watch for KvsWatch {
    fn wait(&self, tx: WatchSender) {
        self.prefixes.wait(&self.prefix, tx);
    }

    fn clear(&self, tx: &WatchSender) {
        self.prefixes.clear(&self.prefix, tx);
    }
}

// ── Store-wide registry ───────────────────────────────────────────

/// Read methods whose result index, and therefore watch, spans a fixed
/// set of tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMethod {
    GetNode,
    Nodes,
    NodesByMeta,
    Services,
    ServicesByNodeMeta,
    ServiceNodes,
    NodeService,
    NodeServices,
    NodeChecks,
    ServiceChecks,
    ServiceChecksByNodeMeta,
    ChecksInState,
    ChecksInStateByNodeMeta,
    CheckServiceNodes,
    NodeInfo,
    NodeDump,
    SessionGet,
    SessionList,
    NodeSessions,
    AclGet,
    AclList,
    PreparedQueryGet,
    PreparedQueryList,
    PreparedQueryResolve,
    AutopilotConfig,
    Coordinates,
}

impl QueryMethod {
    /// Tables backing the method's index.
    pub fn tables(self) -> &'static [Table] {
        use QueryMethod::*;
        match self {
            GetNode | Nodes | NodesByMeta => &[Table::Nodes],
            Services => &[Table::Services],
            ServicesByNodeMeta | ServiceNodes | NodeService | NodeServices => {
                &[Table::Nodes, Table::Services]
            }
            NodeChecks | ServiceChecks | ChecksInState => &[Table::Checks],
            ServiceChecksByNodeMeta | ChecksInStateByNodeMeta => &[Table::Nodes, Table::Checks],
            CheckServiceNodes | NodeInfo | NodeDump => {
                &[Table::Nodes, Table::Services, Table::Checks]
            }
            SessionGet | SessionList | NodeSessions => &[Table::Sessions],
            AclGet | AclList => &[Table::Acls],
            PreparedQueryGet | PreparedQueryList | PreparedQueryResolve => {
                &[Table::PreparedQueries]
            }
            AutopilotConfig => &[Table::Autopilot],
            Coordinates => &[Table::Coordinates, Table::Nodes],
        }
    }
}

/// One watch per table plus the KV prefix watches.
pub(crate) struct StoreWatches {
    tables: [Arc<FullTableWatch>; Table::COUNT],
    kvs: Arc<PrefixWatch>,
}

impl StoreWatches {
    pub fn new() -> Self {
        Self {
            tables: std::array::from_fn(|_| Arc::new(FullTableWatch::new())),
            kvs: Arc::new(PrefixWatch::new()),
        }
    }

    pub fn table(&self, table: Table) -> &Arc<FullTableWatch> {
        &self.tables[table.slot()]
    }

    pub fn query(&self, method: QueryMethod) -> MultiWatch {
        MultiWatch {
            watches: method
                .tables()
                .iter()
                .map(|t| self.table(*t).clone())
                .collect(),
        }
    }

    pub fn kvs(&self, prefix: &str) -> KvsWatch {
        KvsWatch {
            prefixes: self.kvs.clone(),
            prefix: prefix.to_string(),
        }
    }

    pub fn kvs_prefixes(&self) -> &PrefixWatch {
        &self.kvs
    }

    /// Fire everything; used after a restore replaces the whole state.
    pub fn notify_all(&self) {
        for w in &self.tables {
            w.notify();
        }
        self.kvs.notify("", true);
    }
}

/// Collects the tables and KV keys touched by one write and fires each
/// watch once when [`WatchManager::notify`] runs.
pub struct WatchManager {
    watches: Arc<StoreWatches>,
    armed: BTreeSet<Table>,
    kvs: Vec<(String, bool)>,
}

impl WatchManager {
    pub(crate) fn new(watches: Arc<StoreWatches>) -> Self {
        Self {
            watches,
            armed: BTreeSet::new(),
            kvs: Vec::new(),
        }
    }

    pub fn arm(&mut self, table: Table) {
        self.armed.insert(table);
    }

    /// Arm a KV change at `key`; `subtree` wakes everything below it too.
    pub fn arm_kvs(&mut self, key: &str, subtree: bool) {
        self.armed.insert(Table::Kvs);
        self.kvs.push((key.to_string(), subtree));
    }

    pub fn is_armed(&self, table: Table) -> bool {
        self.armed.contains(&table)
    }

    pub fn notify(self) {
        for table in &self.armed {
            self.watches.table(*table).notify();
        }
        for (key, subtree) in &self.kvs {
            self.watches.kvs.notify(key, *subtree);
        }
    }
}
