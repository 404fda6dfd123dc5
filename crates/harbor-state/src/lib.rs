//! harbor-state: transactional in-memory state store for Harbor.
//!
//! Holds the service catalog (nodes, services, health checks), the KV store
//! with sessions and locks, ACLs, prepared queries, network coordinates and
//! the autopilot configuration.
//!
//! # Architecture
//!
//! Tables are persistent ordered maps ([imbl](https://docs.rs/imbl)) keyed by
//! their primary key, with secondary indexes maintained alongside. A write
//! transaction clones the table set (O(1)), mutates the clone and swaps it in
//! on commit; readers keep whatever version they started with. Writers are
//! serialized by a single lock.
//!
//! Every write takes a caller-supplied index (the log index of the command
//! being applied) and stamps it on the rows it touches and on the table
//! index. Reads return the relevant table index next to the result so
//! callers can run blocking queries with [`blocking_query`].
//!
//! Deleted KV keys leave tombstones so that prefix indexes never go
//! backwards. [`TombstoneGc`] tells the owner when tombstones are old enough
//! to reap, which then happens through [`Fsm::apply`] like any other write.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` and can be shared across
//! async tasks. Snapshots can be written to and loaded from a
//! [redb](https://docs.rs/redb) file with [`persist`].

pub mod acl;
pub mod autopilot;
pub mod blocking;
pub mod catalog;
pub mod coordinate;
mod db;
mod delay;
pub mod error;
pub mod fsm;
mod graveyard;
pub mod kvs;
pub mod persist;
pub mod prepared_query;
pub mod schema;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod tables;
mod template;
pub mod tombstone_gc;
pub mod txn;
pub mod types;
pub mod watch;

pub use blocking::blocking_query;
pub use error::{StateError, StateResult};
pub use fsm::{AclOp, Command, CommandResponse, Fsm, QueryOp, SessionOp};
pub use schema::Table;
pub use snapshot::{SnapshotData, StateRestore, StateSnapshot};
pub use store::StateStore;
pub use tombstone_gc::TombstoneGc;
pub use txn::{KvVerb, TxnError, TxnKvOp, TxnOp, TxnResponse, TxnResult};
pub use types::*;
pub use watch::{
    FullTableWatch, KvsWatch, MultiWatch, PrefixWatch, QueryMethod, Watch, WatchSender,
    watch_channel,
};
