//! Replicated-log command application.
//!
//! Every state change that travels through the log is a [`Command`]. The
//! [`Fsm`] applies a committed command at its log index, so replaying the
//! same log against an empty store reproduces the same state.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::StateStore;
use crate::txn::{KvVerb, TxnOp, TxnResponse};
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOp {
    Create,
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclOp {
    Set,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOp {
    Create,
    Update,
    Delete,
}

/// A state change carried by the replicated log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Register(RegisterRequest),
    /// Removes the service if `service_id` is set, else the check if
    /// `check_id` is set, else the whole node.
    Deregister {
        node: String,
        #[serde(default)]
        service_id: Option<String>,
        #[serde(default)]
        check_id: Option<String>,
    },
    Kvs {
        op: KvVerb,
        entry: DirEntry,
    },
    Session {
        op: SessionOp,
        session: Session,
    },
    Acl {
        op: AclOp,
        acl: Acl,
    },
    TombstoneReap {
        index: u64,
    },
    PreparedQuery {
        op: QueryOp,
        query: PreparedQuery,
    },
    Txn {
        ops: Vec<TxnOp>,
    },
    /// With `cas`, the write only lands if the stored config's modify index
    /// equals `config.modify_index`.
    Autopilot {
        #[serde(default)]
        cas: bool,
        config: AutopilotConfig,
    },
    CoordinateBatchUpdate {
        updates: Vec<Coordinate>,
    },
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandResponse {
    Ok,
    /// Outcome of a CAS, lock or unlock.
    Bool(bool),
    Txn(TxnResponse),
    /// Number of tombstones reaped.
    Reaped(usize),
}

/// Applies committed commands to a [`StateStore`].
#[derive(Clone, Default)]
pub struct Fsm {
    store: StateStore,
}

impl Fsm {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Apply `command` at log index `index`.
    pub fn apply(&self, index: u64, command: Command) -> StateResult<CommandResponse> {
        let store = &self.store;
        let response = match command {
            Command::Register(req) => {
                store.ensure_registration(index, &req)?;
                CommandResponse::Ok
            }
            Command::Deregister {
                node,
                service_id,
                check_id,
            } => {
                match (service_id.filter(|s| !s.is_empty()), check_id.filter(|c| !c.is_empty())) {
                    (Some(service_id), _) => store.delete_service(index, &node, &service_id)?,
                    (None, Some(check_id)) => store.delete_check(index, &node, &check_id)?,
                    (None, None) => store.delete_node(index, &node)?,
                }
                CommandResponse::Ok
            }
            Command::Kvs { op, entry } => self.apply_kvs(index, op, entry)?,
            Command::Session { op, session } => {
                match op {
                    SessionOp::Create => store.session_create(index, session)?,
                    SessionOp::Destroy => store.session_destroy(index, &session.id)?,
                }
                CommandResponse::Ok
            }
            Command::Acl { op, acl } => {
                match op {
                    AclOp::Set => store.acl_set(index, acl)?,
                    AclOp::Delete => store.acl_delete(index, &acl.id),
                }
                CommandResponse::Ok
            }
            Command::TombstoneReap { index: reap } => {
                CommandResponse::Reaped(store.reap_tombstones(reap))
            }
            Command::PreparedQuery { op, query } => {
                match op {
                    QueryOp::Create | QueryOp::Update => store.prepared_query_set(index, query)?,
                    QueryOp::Delete => store.prepared_query_delete(index, &query.id),
                }
                CommandResponse::Ok
            }
            Command::Txn { ops } => CommandResponse::Txn(store.txn_run(index, &ops)),
            Command::Autopilot { cas: true, config } => {
                let cidx = config.modify_index;
                CommandResponse::Bool(store.autopilot_cas_config(index, cidx, config))
            }
            Command::Autopilot { cas: false, config } => {
                store.update_autopilot_config(index, config);
                CommandResponse::Ok
            }
            Command::CoordinateBatchUpdate { updates } => {
                store.coordinate_batch_update(index, updates);
                CommandResponse::Ok
            }
        };
        debug!(index, ?response, "command applied");
        Ok(response)
    }

    fn apply_kvs(&self, index: u64, op: KvVerb, entry: DirEntry) -> StateResult<CommandResponse> {
        let store = &self.store;
        Ok(match op {
            KvVerb::Set => {
                store.kvs_set(index, entry);
                CommandResponse::Ok
            }
            KvVerb::Cas => CommandResponse::Bool(store.kvs_set_cas(index, entry)),
            KvVerb::Lock => CommandResponse::Bool(store.kvs_lock(index, entry)?),
            KvVerb::Unlock => CommandResponse::Bool(store.kvs_unlock(index, entry)?),
            KvVerb::Delete => {
                store.kvs_delete(index, &entry.key);
                CommandResponse::Ok
            }
            KvVerb::DeleteCas => CommandResponse::Bool(store.kvs_delete_cas(
                index,
                entry.modify_index,
                &entry.key,
            )),
            KvVerb::DeleteTree => {
                store.kvs_delete_tree(index, &entry.key);
                CommandResponse::Ok
            }
            verb => {
                return Err(StateError::TxnOp(format!(
                    "{verb:?} is not a valid KV log operation"
                )));
            }
        })
    }
}
