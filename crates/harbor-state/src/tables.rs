//! redb table definitions for durable snapshots.
//!
//! Each entity table maps a sequence number to one JSON-serialized row, in
//! the order the snapshot produced them. `META` holds scalar bookkeeping and
//! `INDEXES` the last index of every table.

use redb::TableDefinition;

/// Scalar snapshot metadata, e.g. `last_index`.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Per-table indexes keyed by [`crate::schema::Table::name`].
pub const INDEXES: TableDefinition<&str, u64> = TableDefinition::new("indexes");

pub const NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");

/// Service rows without the joined node columns.
pub const SERVICES: TableDefinition<u64, &[u8]> = TableDefinition::new("services");

pub const CHECKS: TableDefinition<u64, &[u8]> = TableDefinition::new("checks");

pub const KVS: TableDefinition<u64, &[u8]> = TableDefinition::new("kvs");

pub const TOMBSTONES: TableDefinition<u64, &[u8]> = TableDefinition::new("tombstones");

pub const SESSIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("sessions");

pub const ACLS: TableDefinition<u64, &[u8]> = TableDefinition::new("acls");

pub const PREPARED_QUERIES: TableDefinition<u64, &[u8]> =
    TableDefinition::new("prepared-queries");

pub const COORDINATES: TableDefinition<u64, &[u8]> = TableDefinition::new("coordinates");

/// Holds at most one row.
pub const AUTOPILOT: TableDefinition<u64, &[u8]> = TableDefinition::new("autopilot-config");

pub(crate) const LAST_INDEX: &str = "last_index";
