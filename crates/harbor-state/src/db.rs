//! Copy-on-write transaction engine.
//!
//! The committed state is an `Arc<Tables>`. Readers clone the `Arc` and work
//! against that immutable snapshot for as long as they like. A writer takes
//! the single writer lock, clones the current tables (O(1) thanks to the
//! persistent maps underneath) and mutates its private copy; `commit` swaps
//! the copy in and then runs any deferred callbacks. Dropping a write
//! transaction without committing discards every change.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use imbl::OrdMap;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::schema::{RowSet, Table};
use crate::types::*;

/// Every table in the store.
#[derive(Clone, Default)]
pub(crate) struct Tables {
    pub nodes: RowSet<Node>,
    pub services: RowSet<ServiceNode>,
    pub checks: RowSet<HealthCheck>,
    pub kvs: RowSet<DirEntry>,
    pub tombstones: RowSet<Tombstone>,
    pub sessions: RowSet<Session>,
    pub session_checks: RowSet<SessionCheck>,
    pub acls: RowSet<Acl>,
    pub prepared_queries: RowSet<PreparedQuery>,
    pub coordinates: RowSet<Coordinate>,
    pub autopilot: Option<AutopilotConfig>,
    indexes: OrdMap<Table, u64>,
}

impl Tables {
    /// Last index that modified `table`.
    pub fn index(&self, table: Table) -> u64 {
        self.indexes.get(&table).copied().unwrap_or(0)
    }

    /// The "as of" index for a query reading `tables`.
    pub fn max_index(&self, tables: &[Table]) -> u64 {
        tables.iter().map(|t| self.index(*t)).max().unwrap_or(0)
    }

    pub fn set_index(&mut self, table: Table, idx: u64) {
        self.indexes.insert(table, idx);
    }

    /// Raise the table index to `idx` if it is currently lower.
    pub fn bump_index(&mut self, table: Table, idx: u64) {
        if idx > self.index(table) {
            self.set_index(table, idx);
        }
    }
}

type Deferred = Box<dyn FnOnce() + Send + 'static>;

/// The in-memory database: one committed root and a writer lock.
#[derive(Default)]
pub(crate) struct MemDb {
    root: RwLock<Arc<Tables>>,
    writer: Mutex<()>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> ReadTxn {
        ReadTxn {
            tables: self.root.read().clone(),
        }
    }

    /// Begins a write transaction, blocking until any other writer finishes.
    pub fn write(&self) -> WriteTxn<'_> {
        let guard = self.writer.lock();
        let tables = Tables::clone(&self.root.read());
        WriteTxn {
            db: self,
            _guard: guard,
            tables,
            deferred: Vec::new(),
        }
    }
}

/// A consistent read-only view of the tables.
pub(crate) struct ReadTxn {
    tables: Arc<Tables>,
}

impl Deref for ReadTxn {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &self.tables
    }
}

/// A private, mutable copy of the tables.
pub(crate) struct WriteTxn<'a> {
    db: &'a MemDb,
    _guard: MutexGuard<'a, ()>,
    tables: Tables,
    deferred: Vec<Deferred>,
}

impl WriteTxn<'_> {
    /// Queue `f` to run after a successful commit.
    pub fn defer(&mut self, f: impl FnOnce() + Send + 'static) {
        self.deferred.push(Box::new(f));
    }

    /// Publish the changes, then run deferred callbacks in registration order.
    pub fn commit(self) {
        let WriteTxn {
            db,
            _guard: guard,
            tables,
            deferred,
        } = self;
        *db.root.write() = Arc::new(tables);
        drop(guard);
        for f in deferred {
            f();
        }
    }
}

impl Deref for WriteTxn<'_> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &self.tables
    }
}

impl DerefMut for WriteTxn<'_> {
    fn deref_mut(&mut self) -> &mut Tables {
        &mut self.tables
    }
}
