//! Error types for the Harbor state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    // ── Preconditions ──────────────────────────────────────────────
    #[error("Missing node registration")]
    MissingNode,

    #[error("Missing service registration")]
    MissingService,

    #[error("Missing session ID")]
    MissingSessionId,

    #[error("Missing ACL ID")]
    MissingAclId,

    #[error("Missing Query ID")]
    MissingQueryId,

    #[error("Missing check '{0}' registration")]
    MissingCheck(String),

    #[error("Check '{0}' is in critical state")]
    CriticalCheck(String),

    #[error("node ID '{id}' is already in use by node '{existing}'")]
    NodeIdConflict { id: String, existing: String },

    #[error("missing session")]
    MissingSession,

    #[error("invalid session {0:?}")]
    InvalidSession(String),

    #[error("invalid service {0:?}")]
    InvalidService(String),

    #[error("name '{0}' aliases an existing query name")]
    QueryNameAlias(String),

    #[error("name '{0}' aliases an existing query ID")]
    QueryIdAlias(String),

    #[error("query ID '{0}' aliases an existing query name")]
    IdNameAlias(String),

    #[error("invalid prepared query template: {0}")]
    InvalidTemplate(String),

    // ── KV guards ──────────────────────────────────────────────────
    #[error("failed to check {check}, key {key:?} doesn't exist")]
    GuardMissingKey { check: &'static str, key: String },

    #[error("failed session check for key {key:?}, current session {current:?} != {expected:?}")]
    SessionMismatch {
        key: String,
        current: String,
        expected: String,
    },

    #[error("failed index check for key {key:?}, current modify index {current} != {expected}")]
    IndexMismatch {
        key: String,
        current: u64,
        expected: u64,
    },

    #[error("{0}")]
    TxnOp(String),

    // ── Tombstone GC ───────────────────────────────────────────────
    #[error("tombstone TTL and granularity must be positive")]
    InvalidGcConfig,

    #[error("no async runtime available: {0}")]
    Runtime(String),

    // ── Persistence ────────────────────────────────────────────────
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}
