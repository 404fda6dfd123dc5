//! Key/value operations.
//!
//! Every primitive has a `*_txn` form so the multi-op transaction endpoint
//! can compose them inside one write transaction.

use tokio::time::Instant;
use tracing::debug;

use crate::db::{Tables, WriteTxn};
use crate::error::{StateError, StateResult};
use crate::graveyard::Graveyard;
use crate::schema::Table;
use crate::store::StateStore;
use crate::types::DirEntry;
use crate::watch::WatchManager;

impl StateStore {
    // ── Reads ──────────────────────────────────────────────────────

    pub fn kvs_get(&self, key: &str) -> (u64, Option<DirEntry>) {
        let tx = self.read();
        let idx = tx.max_index(&[Table::Kvs, Table::Tombstones]);
        (idx, tx.kvs.get(&key.to_string()).cloned())
    }

    /// Every entry under `prefix`. The index accounts for deleted keys so it
    /// never moves backwards when a prefix empties out.
    pub fn kvs_list(&self, prefix: &str) -> (u64, Vec<DirEntry>) {
        let tx = self.read();
        let entries: Vec<DirEntry> = entries_under(&tx, prefix).cloned().collect();
        let live = entries.iter().map(|e| e.modify_index).max().unwrap_or(0);
        (list_index(&tx, prefix, live), entries)
    }

    /// Keys under `prefix`, rolled up at the first `separator` past the
    /// prefix. An empty separator lists every key.
    pub fn kvs_list_keys(&self, prefix: &str, separator: &str) -> (u64, Vec<String>) {
        let tx = self.read();
        let mut keys: Vec<String> = Vec::new();
        let mut live = 0;
        for entry in entries_under(&tx, prefix) {
            live = live.max(entry.modify_index);
            if separator.is_empty() {
                keys.push(entry.key.clone());
                continue;
            }
            let rest = &entry.key[prefix.len()..];
            let key = match rest.find(separator) {
                Some(at) => &entry.key[..prefix.len() + at + separator.len()],
                None => entry.key.as_str(),
            };
            if keys.last().is_none_or(|prev| prev != key) {
                keys.push(key.to_string());
            }
        }
        (list_index(&tx, prefix, live), keys)
    }

    /// When `key` may be locked again after a session invalidation.
    pub fn kvs_lock_delay(&self, key: &str) -> Option<Instant> {
        self.lock_delay.get_expiration(key)
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Unconditional upsert. Lock state is preserved.
    pub fn kvs_set(&self, idx: u64, mut entry: DirEntry) {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        self.kvs_set_txn(&mut tx, &mut watches, idx, &mut entry, false);
        self.commit(tx, watches);
    }

    /// Shared upsert. `create_index` carries over from an existing entry; the
    /// session and lock index do too unless `update_session` is set. An
    /// unchanged entry is not rewritten and keeps its modify index.
    pub(crate) fn kvs_set_txn(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        entry: &mut DirEntry,
        update_session: bool,
    ) {
        let existing = tx.kvs.get(&entry.key).cloned();
        match &existing {
            Some(existing) => {
                entry.create_index = existing.create_index;
                if !update_session {
                    entry.session = existing.session.clone();
                    entry.lock_index = existing.lock_index;
                }
            }
            None => {
                entry.create_index = idx;
                if !update_session {
                    entry.session = None;
                    entry.lock_index = 0;
                }
            }
        }

        if let Some(existing) = existing.filter(|e| e.same_contents(entry)) {
            entry.modify_index = existing.modify_index;
            return;
        }
        entry.modify_index = idx;

        debug!(key = %entry.key, idx, "kv stored");
        tx.kvs.insert(entry.clone());
        tx.set_index(Table::Kvs, idx);
        watches.arm_kvs(&entry.key, false);
    }

    /// Check-and-set. A `modify_index` of 0 means "only if absent".
    pub fn kvs_set_cas(&self, idx: u64, mut entry: DirEntry) -> bool {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        if !self.kvs_set_cas_txn(&mut tx, &mut watches, idx, &mut entry) {
            return false;
        }
        self.commit(tx, watches);
        true
    }

    pub(crate) fn kvs_set_cas_txn(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        entry: &mut DirEntry,
    ) -> bool {
        let current = tx.kvs.get(&entry.key).map(|e| e.modify_index);
        let matches = match (entry.modify_index, current) {
            (0, None) => true,
            (0, Some(_)) => false,
            (want, Some(have)) => want == have,
            (_, None) => false,
        };
        if matches {
            self.kvs_set_txn(tx, watches, idx, entry, false);
        }
        matches
    }

    pub fn kvs_delete(&self, idx: u64, key: &str) {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        if self.kvs_delete_txn(&mut tx, &mut watches, idx, key) {
            self.commit(tx, watches);
        }
    }

    /// Remove `key`, leaving a tombstone. Returns whether it existed.
    pub(crate) fn kvs_delete_txn(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        key: &str,
    ) -> bool {
        if tx.kvs.remove(&key.to_string()).is_none() {
            return false;
        }
        self.graveyard.insert_txn(tx, key, idx);
        tx.set_index(Table::Kvs, idx);
        watches.arm_kvs(key, false);
        debug!(%key, idx, "kv deleted");
        true
    }

    /// Delete `key` only if its modify index is `cidx`. A missing key counts
    /// as already deleted.
    pub fn kvs_delete_cas(&self, idx: u64, cidx: u64, key: &str) -> bool {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        let ok = self.kvs_delete_cas_txn(&mut tx, &mut watches, idx, cidx, key);
        if ok {
            self.commit(tx, watches);
        }
        ok
    }

    pub(crate) fn kvs_delete_cas_txn(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        cidx: u64,
        key: &str,
    ) -> bool {
        match tx.kvs.get(&key.to_string()).map(|e| e.modify_index) {
            None => true,
            Some(current) if current != cidx => false,
            Some(_) => self.kvs_delete_txn(tx, watches, idx, key),
        }
    }

    /// Delete every key under `prefix`.
    pub fn kvs_delete_tree(&self, idx: u64, prefix: &str) {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        self.kvs_delete_tree_txn(&mut tx, &mut watches, idx, prefix);
        self.commit(tx, watches);
    }

    pub(crate) fn kvs_delete_tree_txn(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        prefix: &str,
    ) {
        let doomed: Vec<String> = entries_under(tx, prefix).map(|e| e.key.clone()).collect();
        if doomed.is_empty() {
            return;
        }
        for key in &doomed {
            tx.kvs.remove(key);
            self.graveyard.insert_txn(tx, key, idx);
        }
        tx.set_index(Table::Kvs, idx);
        watches.arm_kvs(prefix, true);
        debug!(%prefix, count = doomed.len(), idx, "kv tree deleted");
    }

    /// Acquire the lock on `entry.key` for `entry.session`.
    ///
    /// Returns `Ok(false)` when another session holds it. Re-locking by the
    /// holder keeps the lock index; a fresh acquisition bumps it.
    pub fn kvs_lock(&self, idx: u64, mut entry: DirEntry) -> StateResult<bool> {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        if !self.kvs_lock_txn(&mut tx, &mut watches, idx, &mut entry)? {
            return Ok(false);
        }
        self.commit(tx, watches);
        Ok(true)
    }

    pub(crate) fn kvs_lock_txn(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        entry: &mut DirEntry,
    ) -> StateResult<bool> {
        let session = entry
            .session_id()
            .ok_or(StateError::MissingSession)?
            .to_string();
        if !tx.sessions.contains(&session) {
            return Err(StateError::InvalidSession(session));
        }

        entry.lock_index = match tx.kvs.get(&entry.key) {
            Some(existing) => match existing.session_id() {
                Some(holder) if holder == session => existing.lock_index,
                Some(_) => return Ok(false),
                None => existing.lock_index + 1,
            },
            None => 1,
        };
        entry.session = Some(session);
        self.kvs_set_txn(tx, watches, idx, entry, true);
        Ok(true)
    }

    /// Release the lock on `entry.key` if `entry.session` holds it.
    pub fn kvs_unlock(&self, idx: u64, mut entry: DirEntry) -> StateResult<bool> {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        if !self.kvs_unlock_txn(&mut tx, &mut watches, idx, &mut entry)? {
            return Ok(false);
        }
        self.commit(tx, watches);
        Ok(true)
    }

    pub(crate) fn kvs_unlock_txn(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        entry: &mut DirEntry,
    ) -> StateResult<bool> {
        let session = entry
            .session_id()
            .ok_or(StateError::MissingSession)?
            .to_string();

        let Some(existing) = tx.kvs.get(&entry.key) else {
            return Ok(false);
        };
        if existing.session_id() != Some(session.as_str()) {
            return Ok(false);
        }
        entry.lock_index = existing.lock_index;
        entry.session = None;
        self.kvs_set_txn(tx, watches, idx, entry, true);
        Ok(true)
    }
}

// ── Guards ────────────────────────────────────────────────────────

/// Fails unless `key` exists with modify index `cidx`.
pub(crate) fn kvs_check_index_txn(tables: &Tables, key: &str, cidx: u64) -> StateResult<DirEntry> {
    let entry = tables
        .kvs
        .get(&key.to_string())
        .ok_or_else(|| StateError::GuardMissingKey {
            check: "modify index",
            key: key.to_string(),
        })?;
    if entry.modify_index != cidx {
        return Err(StateError::IndexMismatch {
            key: key.to_string(),
            current: entry.modify_index,
            expected: cidx,
        });
    }
    Ok(entry.clone())
}

/// Fails unless `key` exists and is held by `session`. An empty session
/// asserts the key is unlocked.
pub(crate) fn kvs_check_session_txn(
    tables: &Tables,
    key: &str,
    session: &str,
) -> StateResult<DirEntry> {
    let entry = tables
        .kvs
        .get(&key.to_string())
        .ok_or_else(|| StateError::GuardMissingKey {
            check: "session",
            key: key.to_string(),
        })?;
    let current = entry.session_id().unwrap_or_default();
    if current != session {
        return Err(StateError::SessionMismatch {
            key: key.to_string(),
            current: current.to_string(),
            expected: session.to_string(),
        });
    }
    Ok(entry.clone())
}

pub(crate) fn entries_under<'a>(
    tables: &'a Tables,
    prefix: &'a str,
) -> impl Iterator<Item = &'a DirEntry> + 'a {
    tables
        .kvs
        .range(prefix.to_string()..)
        .take_while(move |e| e.key.starts_with(prefix))
}

/// Index reported for a list under `prefix`, given the highest live index.
fn list_index(tables: &Tables, prefix: &str, live: u64) -> u64 {
    let table = tables.max_index(&[Table::Kvs, Table::Tombstones]);
    if prefix.is_empty() {
        return table;
    }
    match live.max(Graveyard::max_index_txn(tables, prefix)) {
        0 => table,
        idx => idx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Node, Session, SessionBehavior};
    use crate::watch::{Watch, watch_channel};

    fn with_session(store: &StateStore, id: &str, behavior: SessionBehavior) {
        if store.get_node("node").1.is_none() {
            store
                .ensure_node(
                    1,
                    Node {
                        node: "node".into(),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        store
            .session_create(
                2,
                Session {
                    id: id.into(),
                    node: "node".into(),
                    behavior,
                    ..Default::default()
                },
            )
            .unwrap();
    }

    fn locked(key: &str, session: &str) -> DirEntry {
        DirEntry {
            session: Some(session.into()),
            ..DirEntry::new(key, "v")
        }
    }

    #[test]
    fn set_preserves_create_and_lock_state() {
        let store = StateStore::new();
        with_session(&store, "s1", SessionBehavior::Release);
        assert!(store.kvs_lock(3, locked("foo", "s1")).unwrap());

        store.kvs_set(4, DirEntry::new("foo", "new"));
        let (idx, entry) = store.kvs_get("foo");
        let entry = entry.unwrap();
        assert_eq!(idx, 4);
        assert_eq!(entry.create_index, 3);
        assert_eq!(entry.modify_index, 4);
        assert_eq!(entry.lock_index, 1);
        assert_eq!(entry.session.as_deref(), Some("s1"));
    }

    #[test]
    fn identical_set_keeps_modify_index() {
        let store = StateStore::new();
        store.kvs_set(1, DirEntry::new("foo", "bar"));
        store.kvs_set(2, DirEntry::new("foo", "bar"));
        assert_eq!(store.kvs_get("foo").1.unwrap().modify_index, 1);
        assert_eq!(store.max_index(&[Table::Kvs]), 1);
    }

    #[test]
    fn cas_round_trip() {
        let store = StateStore::new();
        assert!(store.kvs_set_cas(1, DirEntry::new("foo", "a")));
        assert!(!store.kvs_set_cas(2, DirEntry::new("foo", "b")));

        let stale = DirEntry {
            modify_index: 7,
            ..DirEntry::new("foo", "b")
        };
        assert!(!store.kvs_set_cas(3, stale));
        assert_eq!(store.kvs_get("foo").1.unwrap().value, b"a");

        let current = DirEntry {
            modify_index: 1,
            ..DirEntry::new("foo", "c")
        };
        assert!(store.kvs_set_cas(4, current));
        assert_eq!(store.kvs_get("foo").1.unwrap().modify_index, 4);
    }

    #[test]
    fn delete_cas() {
        let store = StateStore::new();
        assert!(store.kvs_delete_cas(1, 0, "missing"));

        store.kvs_set(2, DirEntry::new("foo", "bar"));
        assert!(!store.kvs_delete_cas(3, 1, "foo"));
        assert!(store.kvs_get("foo").1.is_some());
        assert!(store.kvs_delete_cas(4, 2, "foo"));
        assert!(store.kvs_get("foo").1.is_none());
    }

    #[test]
    fn list_index_survives_deletes() {
        let store = StateStore::new();
        store.kvs_set(1, DirEntry::new("foo/a", "1"));
        store.kvs_set(2, DirEntry::new("bar", "2"));
        store.kvs_delete(5, "foo/a");

        let (idx, entries) = store.kvs_list("foo/");
        assert!(entries.is_empty());
        assert_eq!(idx, 5);

        let (idx, entries) = store.kvs_list("");
        assert_eq!(entries.len(), 1);
        assert_eq!(idx, 5);

        store.reap_tombstones(5);
        let (idx, _) = store.kvs_list("foo/");
        assert_eq!(idx, 5);
    }

    #[test]
    fn list_keys_rolls_up_at_separator() {
        let store = StateStore::new();
        for (i, key) in ["foo/a", "foo/b/1", "foo/b/2", "foo/c/x/y", "foo"]
            .iter()
            .enumerate()
        {
            store.kvs_set(i as u64 + 1, DirEntry::new(*key, "v"));
        }
        let (idx, keys) = store.kvs_list_keys("foo/", "/");
        assert_eq!(keys, vec!["foo/a", "foo/b/", "foo/c/"]);
        assert_eq!(idx, 4);

        let (_, all) = store.kvs_list_keys("foo", "");
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn delete_tree_fires_subtree_watch() {
        let store = StateStore::new();
        store.kvs_set(1, DirEntry::new("foo/a", "1"));
        store.kvs_set(2, DirEntry::new("foo/b/c", "2"));
        store.kvs_set(3, DirEntry::new("food", "3"));

        let (tx, mut rx) = watch_channel();
        store.get_kvs_watch("foo/b/").wait(tx);
        store.kvs_delete_tree(4, "foo/");

        assert!(rx.try_recv().is_ok());
        let (_, left) = store.kvs_list("");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].key, "food");
        assert_eq!(Graveyard::max_index_txn(&store.read(), "foo/"), 4);
    }

    #[test]
    fn lock_requires_valid_session() {
        let store = StateStore::new();
        assert!(matches!(
            store.kvs_lock(1, DirEntry::new("foo", "v")),
            Err(StateError::MissingSession)
        ));
        let err = store.kvs_lock(1, locked("foo", "nope")).unwrap_err();
        assert_eq!(err.to_string(), "invalid session \"nope\"");
    }

    #[test]
    fn lock_and_unlock() {
        let store = StateStore::new();
        with_session(&store, "s1", SessionBehavior::Release);
        with_session(&store, "s2", SessionBehavior::Release);

        assert!(store.kvs_lock(3, locked("foo", "s1")).unwrap());
        assert!(store.kvs_lock(4, locked("foo", "s1")).unwrap());
        assert_eq!(store.kvs_get("foo").1.unwrap().lock_index, 1);
        assert!(!store.kvs_lock(5, locked("foo", "s2")).unwrap());

        assert!(!store.kvs_unlock(6, locked("foo", "s2")).unwrap());
        assert!(store.kvs_unlock(7, locked("foo", "s1")).unwrap());
        let entry = store.kvs_get("foo").1.unwrap();
        assert!(entry.session.is_none());
        assert_eq!(entry.lock_index, 1);

        assert!(store.kvs_lock(8, locked("foo", "s2")).unwrap());
        assert_eq!(store.kvs_get("foo").1.unwrap().lock_index, 2);
    }

    #[test]
    fn guards() {
        let store = StateStore::new();
        store.kvs_set(3, DirEntry::new("foo", "v"));
        let tables = store.read();

        assert!(kvs_check_index_txn(&tables, "foo", 3).is_ok());
        let err = kvs_check_index_txn(&tables, "foo", 2).unwrap_err();
        assert!(matches!(err, StateError::IndexMismatch { current: 3, expected: 2, .. }));
        let err = kvs_check_index_txn(&tables, "bar", 3).unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to check modify index, key \"bar\" doesn't exist"
        );

        assert!(kvs_check_session_txn(&tables, "foo", "").is_ok());
        assert!(kvs_check_session_txn(&tables, "foo", "s1").is_err());
    }
}
