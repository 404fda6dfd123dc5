//! Multi-operation transactions.
//!
//! A batch runs inside one write transaction and is all-or-nothing: every
//! operation is attempted, each failure is recorded against its position,
//! and the whole batch is rolled back if any failed.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{Tables, WriteTxn};
use crate::error::{StateError, StateResult};
use crate::kvs::{entries_under, kvs_check_index_txn, kvs_check_session_txn};
use crate::store::StateStore;
use crate::types::DirEntry;
use crate::watch::WatchManager;

/// KV verbs accepted in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KvVerb {
    Set,
    Delete,
    DeleteCas,
    DeleteTree,
    Cas,
    Lock,
    Unlock,
    Get,
    GetTree,
    CheckIndex,
    CheckSession,
    CheckNotExists,
}

impl KvVerb {
    /// Verbs that never write.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            KvVerb::Get | KvVerb::GetTree | KvVerb::CheckIndex | KvVerb::CheckSession
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnKvOp {
    pub verb: KvVerb,
    pub entry: DirEntry,
}

/// One operation in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnOp {
    Kv(TxnKvOp),
}

impl TxnOp {
    pub fn kv(verb: KvVerb, entry: DirEntry) -> Self {
        TxnOp::Kv(TxnKvOp { verb, entry })
    }
}

/// One result of a successful batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnResult {
    Kv(DirEntry),
}

/// A failed operation and its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnError {
    pub op_index: usize,
    pub what: String,
}

/// Outcome of a batch: results on success, errors otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxnResponse {
    pub results: Vec<TxnResult>,
    pub errors: Vec<TxnError>,
}

impl TxnResponse {
    fn finish(results: Vec<TxnResult>, errors: Vec<TxnError>) -> Self {
        if errors.is_empty() {
            Self { results, errors }
        } else {
            Self {
                results: Vec::new(),
                errors,
            }
        }
    }
}

impl StateStore {
    /// Run a batch atomically at `idx`.
    pub fn txn_run(&self, idx: u64, ops: &[TxnOp]) -> TxnResponse {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        let mut results = Vec::new();
        let mut errors = Vec::new();

        for (op_index, op) in ops.iter().enumerate() {
            let TxnOp::Kv(op) = op;
            match self.txn_kvs(&mut tx, &mut watches, idx, op) {
                Ok(entries) => results.extend(entries.into_iter().map(TxnResult::Kv)),
                Err(e) => errors.push(TxnError {
                    op_index,
                    what: e.to_string(),
                }),
            }
        }

        if errors.is_empty() {
            self.commit(tx, watches);
            debug!(idx, ops = ops.len(), "txn committed");
        } else {
            debug!(idx, failed = errors.len(), "txn rolled back");
        }
        TxnResponse::finish(results, errors)
    }

    /// Run a batch of read verbs against a snapshot. Write verbs are
    /// rejected per operation.
    pub fn txn_ro(&self, ops: &[TxnOp]) -> TxnResponse {
        let tx = self.read();
        let mut results = Vec::new();
        let mut errors = Vec::new();

        for (op_index, op) in ops.iter().enumerate() {
            let TxnOp::Kv(op) = op;
            let outcome = if op.verb.is_read() {
                txn_kvs_read(&tx, op)
            } else {
                Err(StateError::TxnOp(format!(
                    "{:?} is not allowed in a read-only transaction",
                    op.verb
                )))
            };
            match outcome {
                Ok(entries) => results.extend(entries.into_iter().map(TxnResult::Kv)),
                Err(e) => errors.push(TxnError {
                    op_index,
                    what: e.to_string(),
                }),
            }
        }
        TxnResponse::finish(results, errors)
    }

    fn txn_kvs(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        op: &TxnKvOp,
    ) -> StateResult<Vec<DirEntry>> {
        let mut entry = op.entry.clone();
        let key = entry.key.clone();
        let written = match op.verb {
            KvVerb::Set => {
                self.kvs_set_txn(tx, watches, idx, &mut entry, false);
                entry
            }
            KvVerb::Cas => {
                if !self.kvs_set_cas_txn(tx, watches, idx, &mut entry) {
                    return Err(StateError::TxnOp(format!(
                        "failed to set key {key:?}, index is stale"
                    )));
                }
                entry
            }
            KvVerb::Lock => {
                if !self.kvs_lock_txn(tx, watches, idx, &mut entry)? {
                    return Err(StateError::TxnOp(format!(
                        "failed to lock key {key:?}, lock is already held"
                    )));
                }
                entry
            }
            KvVerb::Unlock => {
                if !self.kvs_unlock_txn(tx, watches, idx, &mut entry)? {
                    return Err(StateError::TxnOp(format!(
                        "failed to unlock key {key:?}, lock isn't held, or is held by another session"
                    )));
                }
                entry
            }
            KvVerb::Delete => {
                self.kvs_delete_txn(tx, watches, idx, &key);
                return Ok(Vec::new());
            }
            KvVerb::DeleteCas => {
                if !self.kvs_delete_cas_txn(tx, watches, idx, entry.modify_index, &key) {
                    return Err(StateError::TxnOp(format!(
                        "failed to delete key {key:?}, index is stale"
                    )));
                }
                return Ok(Vec::new());
            }
            KvVerb::DeleteTree => {
                self.kvs_delete_tree_txn(tx, watches, idx, &key);
                return Ok(Vec::new());
            }
            KvVerb::CheckNotExists => {
                if tx.kvs.contains(&key) {
                    return Err(StateError::TxnOp(format!("key {key:?} exists")));
                }
                return Ok(Vec::new());
            }
            KvVerb::Get | KvVerb::GetTree | KvVerb::CheckIndex | KvVerb::CheckSession => {
                return txn_kvs_read(tx, op);
            }
        };
        Ok(vec![written.without_value()])
    }
}

fn txn_kvs_read(tables: &Tables, op: &TxnKvOp) -> StateResult<Vec<DirEntry>> {
    let key = op.entry.key.as_str();
    match op.verb {
        KvVerb::Get => tables
            .kvs
            .get(&key.to_string())
            .map(|e| vec![e.clone()])
            .ok_or_else(|| StateError::TxnOp(format!("key {key:?} doesn't exist"))),
        KvVerb::GetTree => Ok(entries_under(tables, key).cloned().collect()),
        KvVerb::CheckIndex => {
            kvs_check_index_txn(tables, key, op.entry.modify_index).map(|e| vec![e.without_value()])
        }
        KvVerb::CheckSession => {
            let session = op.entry.session.as_deref().unwrap_or_default();
            kvs_check_session_txn(tables, key, session).map(|e| vec![e.without_value()])
        }
        verb => Err(StateError::TxnOp(format!("unknown KV verb {verb:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(verb: KvVerb, key: &str, value: &str) -> TxnOp {
        TxnOp::kv(verb, DirEntry::new(key, value))
    }

    #[test]
    fn results_strip_values_except_gets() {
        let store = StateStore::new();
        store.kvs_set(1, DirEntry::new("existing", "old"));

        let response = store.txn_run(
            2,
            &[
                op(KvVerb::Set, "foo", "bar"),
                op(KvVerb::Get, "existing", ""),
                op(KvVerb::Delete, "existing", ""),
                op(KvVerb::GetTree, "fo", ""),
            ],
        );
        assert!(response.errors.is_empty());
        let entries: Vec<_> = response
            .results
            .iter()
            .map(|TxnResult::Kv(e)| (e.key.as_str(), e.value.clone()))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("foo", Vec::new()),
                ("existing", b"old".to_vec()),
                ("foo", b"bar".to_vec()),
            ]
        );
        assert!(store.kvs_get("existing").1.is_none());
    }

    #[test]
    fn failing_op_rolls_back_batch() {
        let store = StateStore::new();
        store.kvs_set(1, DirEntry::new("guard", "v"));

        let stale = TxnOp::kv(
            KvVerb::CheckIndex,
            DirEntry {
                modify_index: 99,
                ..DirEntry::new("guard", "")
            },
        );
        let response = store.txn_run(
            2,
            &[
                op(KvVerb::Set, "a", "1"),
                op(KvVerb::Set, "b", "2"),
                stale,
                op(KvVerb::Set, "c", "3"),
                op(KvVerb::Get, "missing", ""),
            ],
        );

        assert!(response.results.is_empty());
        let failed: Vec<_> = response.errors.iter().map(|e| e.op_index).collect();
        assert_eq!(failed, vec![2, 4]);
        assert!(response.errors[0].what.contains("current modify index 1 != 99"));
        assert!(store.kvs_get("a").1.is_none());
        assert_eq!(store.kvs_list("").1.len(), 1);
    }

    #[test]
    fn cas_and_check_not_exists() {
        let store = StateStore::new();
        let response = store.txn_run(
            1,
            &[
                op(KvVerb::CheckNotExists, "foo", ""),
                op(KvVerb::Cas, "foo", "bar"),
            ],
        );
        assert!(response.errors.is_empty());

        let response = store.txn_run(2, &[op(KvVerb::CheckNotExists, "foo", "")]);
        assert_eq!(response.errors[0].what, "key \"foo\" exists");
    }

    #[test]
    fn read_only_rejects_writes() {
        let store = StateStore::new();
        store.kvs_set(1, DirEntry::new("foo", "bar"));

        let response = store.txn_ro(&[op(KvVerb::Get, "foo", "")]);
        assert_eq!(response.results.len(), 1);

        let response = store.txn_ro(&[op(KvVerb::Get, "foo", ""), op(KvVerb::Set, "x", "y")]);
        assert!(response.results.is_empty());
        assert_eq!(response.errors[0].op_index, 1);
    }

    #[test]
    fn verbs_use_kebab_case() {
        let op: TxnKvOp =
            serde_json::from_str(r#"{"verb":"delete-cas","entry":{"key":"k"}}"#).unwrap();
        assert_eq!(op.verb, KvVerb::DeleteCas);
    }
}
