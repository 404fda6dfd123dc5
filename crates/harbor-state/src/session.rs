//! Sessions and the lock invalidation cascade.
//!
//! A session is tied to a node and a set of that node's health checks.
//! Destroying it, whether directly or because a check went critical or away,
//! releases or deletes every KV key it holds depending on its behavior and
//! deletes prepared queries bound to it.

use tokio::time::Instant;
use tracing::debug;

use crate::db::WriteTxn;
use crate::error::{StateError, StateResult};
use crate::schema::{By, Table};
use crate::store::StateStore;
use crate::types::*;
use crate::watch::WatchManager;

impl StateStore {
    /// Create a session. The node and every listed check must exist, and no
    /// check may be critical.
    pub fn session_create(&self, idx: u64, mut session: Session) -> StateResult<()> {
        if session.id.is_empty() {
            return Err(StateError::MissingSessionId);
        }
        session.lock_delay = session.lock_delay.min(MAX_LOCK_DELAY);

        let mut tx = self.write();
        let mut watches = self.watch_manager();

        let node = fold(&session.node);
        if !tx.nodes.contains(&node) {
            return Err(StateError::MissingNode);
        }
        for check_id in &session.checks {
            let check = tx
                .checks
                .get(&(node.clone(), check_id.clone()))
                .ok_or_else(|| StateError::MissingCheck(check_id.clone()))?;
            if check.status == HealthStatus::Critical {
                return Err(StateError::CriticalCheck(check_id.clone()));
            }
        }

        session.create_index = idx;
        session.modify_index = idx;
        for check_id in &session.checks {
            tx.session_checks.insert(SessionCheck {
                node: session.node.clone(),
                check_id: check_id.clone(),
                session: session.id.clone(),
            });
        }
        tx.set_index(Table::SessionChecks, idx);

        debug!(session = %session.id, node = %session.node, idx, "session created");
        tx.sessions.insert(session);
        tx.set_index(Table::Sessions, idx);
        watches.arm(Table::Sessions);

        self.commit(tx, watches);
        Ok(())
    }

    pub fn session_get(&self, id: &str) -> (u64, Option<Session>) {
        let tx = self.read();
        (tx.index(Table::Sessions), tx.sessions.get(&id.to_string()).cloned())
    }

    pub fn session_list(&self) -> (u64, Vec<Session>) {
        let tx = self.read();
        (tx.index(Table::Sessions), tx.sessions.iter().cloned().collect())
    }

    /// Sessions rooted at `node`.
    pub fn node_sessions(&self, node: &str) -> (u64, Vec<Session>) {
        let tx = self.read();
        let sessions = tx.sessions.lookup(By::Node, &fold(node)).cloned().collect();
        (tx.index(Table::Sessions), sessions)
    }

    /// Destroy a session, releasing or deleting the keys it holds.
    pub fn session_destroy(&self, idx: u64, id: &str) -> StateResult<()> {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        self.delete_session_txn(&mut tx, &mut watches, idx, id)?;
        self.commit(tx, watches);
        Ok(())
    }

    pub(crate) fn delete_session_txn(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        id: &str,
    ) -> StateResult<()> {
        let Some(session) = tx.sessions.remove(&id.to_string()) else {
            return Ok(());
        };
        tx.set_index(Table::Sessions, idx);
        watches.arm(Table::Sessions);

        let held = tx.kvs.lookup_keys(By::Session, id);
        for key in &held {
            match session.behavior {
                SessionBehavior::Release => {
                    let Some(mut entry) = tx.kvs.get(key).cloned() else {
                        continue;
                    };
                    entry.session = None;
                    entry.modify_index = idx;
                    tx.kvs.insert(entry);
                    tx.set_index(Table::Kvs, idx);
                    watches.arm_kvs(key, false);
                }
                SessionBehavior::Delete => {
                    self.kvs_delete_txn(tx, watches, idx, key);
                }
            }
        }

        if !session.lock_delay.is_zero() && !held.is_empty() {
            let lock_delay = self.lock_delay.clone();
            let delay = session.lock_delay;
            tx.defer(move || {
                let now = Instant::now();
                for key in &held {
                    lock_delay.set_expiration(key, now, delay);
                }
            });
        }

        for mapping in tx.session_checks.lookup_keys(By::Session, id) {
            tx.session_checks.remove(&mapping);
        }
        tx.set_index(Table::SessionChecks, idx);

        let queries = tx.prepared_queries.lookup_keys(By::Session, id);
        if !queries.is_empty() {
            for query in &queries {
                tx.prepared_queries.remove(query);
            }
            tx.set_index(Table::PreparedQueries, idx);
            watches.arm(Table::PreparedQueries);
        }

        debug!(session = %id, behavior = ?session.behavior, idx, "session destroyed");
        Ok(())
    }
}
