//! End-to-end behaviour of the state store through its public surface.

use std::sync::Arc;
use std::time::Duration;

use harbor_state::*;

fn node(name: &str) -> Node {
    Node {
        node: name.into(),
        address: "10.0.0.1".into(),
        ..Default::default()
    }
}

fn service(id: &str) -> NodeService {
    NodeService {
        id: id.into(),
        service: id.into(),
        port: 6379,
        ..Default::default()
    }
}

fn check(node: &str, id: &str, service_id: &str, status: HealthStatus) -> HealthCheck {
    HealthCheck {
        node: node.into(),
        check_id: id.into(),
        service_id: service_id.into(),
        status,
        ..Default::default()
    }
}

fn session(id: &str, node: &str, checks: &[&str], behavior: SessionBehavior) -> Session {
    Session {
        id: id.into(),
        node: node.into(),
        checks: checks.iter().map(|c| c.to_string()).collect(),
        behavior,
        ..Default::default()
    }
}

fn locked(key: &str, session: &str) -> DirEntry {
    DirEntry {
        session: Some(session.into()),
        ..DirEntry::new(key, "held")
    }
}

/// Node `foo` with service `redis` and a passing `redis-check`, at 1..=3.
fn redis_store() -> StateStore {
    let store = StateStore::new();
    store.ensure_node(1, node("foo")).unwrap();
    store.ensure_service(2, "foo", &service("redis")).unwrap();
    store
        .ensure_check(3, check("foo", "redis-check", "redis", HealthStatus::Passing))
        .unwrap();
    store
}

#[test]
fn check_service_nodes_reports_registration_index() {
    let store = redis_store();
    let (idx, results) = store.check_service_nodes("redis");
    assert_eq!(idx, 3);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].node.node, "foo");
    assert_eq!(results[0].service.id, "redis");
    assert_eq!(results[0].checks.len(), 1);
    assert_eq!(results[0].checks[0].check_id, "redis-check");
}

#[test]
fn prepared_query_for_unknown_service_is_rejected() {
    let store = StateStore::new();
    let err = store
        .prepared_query_set(
            3,
            PreparedQuery {
                id: "a7ec6c8f-3b4c-4ae6-9a0f-0c0d0c8c5c11".into(),
                service: ServiceQuery {
                    service: "redis".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(err.to_string().contains("invalid service"));
    assert_eq!(store.max_index(&[Table::PreparedQueries]), 0);
    assert!(store.prepared_query_list().1.is_empty());
}

#[test]
fn table_indexes_never_go_backwards() {
    let store = redis_store();
    let mut last = store.max_index(&Table::ALL);
    for idx in 4..10 {
        store.kvs_set(idx, DirEntry::new(format!("k{idx}"), "v"));
        if idx % 2 == 0 {
            store.kvs_delete(idx, &format!("k{}", idx - 1));
        }
        let now = store.max_index(&Table::ALL);
        assert!(now >= last);
        last = now;
    }
    assert_eq!(store.kvs_list("k").0, 9);
}

#[test]
fn repeated_registration_does_not_touch_indexes() {
    let store = StateStore::new();
    let req = RegisterRequest {
        node: "foo".into(),
        address: "10.0.0.1".into(),
        service: Some(service("redis")),
        check: Some(check("foo", "redis-check", "redis", HealthStatus::Passing)),
        ..Default::default()
    };
    store.ensure_registration(1, &req).unwrap();

    let (tx, mut rx) = watch_channel();
    store.get_query_watch(QueryMethod::CheckServiceNodes).wait(tx);
    store.ensure_registration(2, &req).unwrap();

    assert_eq!(store.max_index(&Table::ALL), 1);
    assert!(rx.try_recv().is_err());
    assert_eq!(store.get_node("foo").1.unwrap().modify_index, 1);
}

#[test]
fn node_delete_cascades_and_fires_each_watch_once() {
    let store = redis_store();
    store
        .session_create(4, session("s1", "foo", &["redis-check"], SessionBehavior::Release))
        .unwrap();
    assert!(store.kvs_lock(5, locked("leader", "s1")).unwrap());

    let mut receivers = Vec::new();
    for table in [Table::Nodes, Table::Services, Table::Checks, Table::Sessions] {
        let (tx, rx) = watch_channel();
        store.get_table_watch(table).wait(tx);
        receivers.push((table, rx));
    }

    store.delete_node(6, "foo").unwrap();

    for (table, mut rx) in receivers {
        assert!(rx.try_recv().is_ok(), "{table} watch did not fire");
        assert!(rx.try_recv().is_err(), "{table} watch fired twice");
        assert_eq!(store.get_table_watch(table).waiter_count(), 0);
    }
    assert!(store.get_node("foo").1.is_none());
    assert!(store.service_nodes("redis").1.is_empty());
    assert!(store.node_checks("foo").1.is_empty());
    assert!(store.session_get("s1").1.is_none());

    let (_, entry) = store.kvs_get("leader");
    let entry = entry.unwrap();
    assert_eq!(entry.session, None);
    assert_eq!(entry.modify_index, 6);
    assert_eq!(store.max_index(&[Table::Nodes, Table::Sessions]), 6);
}

#[test]
fn cas_round_trip() {
    let store = StateStore::new();
    assert!(store.kvs_set_cas(1, DirEntry::new("cfg", "v1")));
    assert!(!store.kvs_set_cas(2, DirEntry::new("cfg", "v2")));

    let (_, current) = store.kvs_get("cfg");
    let current = current.unwrap();
    let update = DirEntry {
        modify_index: current.modify_index,
        ..DirEntry::new("cfg", "v2")
    };
    assert!(store.kvs_set_cas(3, update.clone()));
    assert!(!store.kvs_set_cas(4, update));

    let (idx, entry) = store.kvs_get("cfg");
    let entry = entry.unwrap();
    assert_eq!(idx, 3);
    assert_eq!(entry.value, b"v2");
    assert_eq!(entry.create_index, 1);

    assert!(!store.kvs_delete_cas(5, 1, "cfg"));
    assert!(store.kvs_delete_cas(5, 3, "cfg"));
    assert!(store.kvs_get("cfg").1.is_none());
}

#[test]
fn deleting_the_highest_key_keeps_the_prefix_index() {
    let store = StateStore::new();
    store.kvs_set(1, DirEntry::new("app/a", "1"));
    store.kvs_set(2, DirEntry::new("app/b", "2"));
    store.kvs_delete(3, "app/b");

    let (idx, entries) = store.kvs_list("app/");
    assert_eq!(idx, 3);
    assert_eq!(entries.len(), 1);

    assert_eq!(store.reap_tombstones(3), 1);
    let (idx, _) = store.kvs_list("app/");
    assert_eq!(idx, 1);
}

#[test]
fn critical_check_releases_locks_for_release_sessions() {
    let store = redis_store();
    store
        .session_create(4, session("s1", "foo", &["redis-check"], SessionBehavior::Release))
        .unwrap();
    assert!(store.kvs_lock(5, locked("lock/a", "s1")).unwrap());

    store
        .ensure_check(6, check("foo", "redis-check", "redis", HealthStatus::Critical))
        .unwrap();

    assert!(store.session_get("s1").1.is_none());
    let entry = store.kvs_get("lock/a").1.unwrap();
    assert_eq!(entry.session, None);
    assert_eq!(entry.value, b"held");
    assert_eq!(entry.lock_index, 1);
}

#[test]
fn check_removal_deletes_keys_for_delete_sessions() {
    let store = redis_store();
    store
        .session_create(4, session("s1", "foo", &["redis-check"], SessionBehavior::Delete))
        .unwrap();
    assert!(store.kvs_lock(5, locked("lock/a", "s1")).unwrap());
    assert!(store.kvs_lock(5, locked("lock/b", "s1")).unwrap());

    store.delete_check(6, "foo", "redis-check").unwrap();

    assert!(store.session_get("s1").1.is_none());
    assert!(store.kvs_list("lock/").1.is_empty());
    assert_eq!(store.kvs_list("lock/").0, 6);
}

#[test]
fn lock_held_by_other_session_is_refused() {
    let store = redis_store();
    for id in ["s1", "s2"] {
        store
            .session_create(4, session(id, "foo", &[], SessionBehavior::Release))
            .unwrap();
    }
    assert!(store.kvs_lock(5, locked("k", "s1")).unwrap());
    assert!(!store.kvs_lock(6, locked("k", "s2")).unwrap());
    assert!(!store.kvs_unlock(6, locked("k", "s2")).unwrap());
    assert!(store.kvs_unlock(7, locked("k", "s1")).unwrap());
    assert!(store.kvs_lock(8, locked("k", "s2")).unwrap());
    assert_eq!(store.kvs_get("k").1.unwrap().lock_index, 2);
}

#[test]
fn txn_is_all_or_nothing() {
    let store = StateStore::new();
    store.kvs_set(1, DirEntry::new("guard", "v"));

    let ops = vec![
        TxnOp::kv(KvVerb::Set, DirEntry::new("a", "1")),
        TxnOp::kv(KvVerb::Set, DirEntry::new("b", "2")),
        TxnOp::kv(KvVerb::CheckNotExists, DirEntry::new("guard", "")),
        TxnOp::kv(KvVerb::Set, DirEntry::new("c", "3")),
        TxnOp::kv(KvVerb::Delete, DirEntry::new("guard", "")),
    ];
    let response = store.txn_run(2, &ops);

    assert!(response.results.is_empty());
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].op_index, 2);
    assert_eq!(store.kvs_list("").1.len(), 1);
    assert!(store.kvs_get("guard").1.is_some());
    assert_eq!(store.max_index(&Table::ALL), 1);
}

#[tokio::test(start_paused = true)]
async fn expired_tombstones_are_reaped_through_the_fsm() {
    let (gc, mut expired) = TombstoneGc::new(Duration::from_secs(10), Duration::from_secs(1)).unwrap();
    let gc = Arc::new(gc);
    gc.set_enabled(true);
    let fsm = Fsm::new(StateStore::with_tombstone_gc(gc.clone()));

    fsm.store().kvs_set(1, DirEntry::new("a", "1"));
    fsm.store().kvs_set(2, DirEntry::new("b", "2"));
    fsm.store().kvs_delete(3, "a");
    fsm.store().kvs_delete(4, "b");
    assert!(gc.pending_expiration());

    let index = expired.recv().await.unwrap();
    assert_eq!(index, 4);
    assert!(!gc.pending_expiration());

    let response = fsm.apply(5, Command::TombstoneReap { index }).unwrap();
    assert_eq!(response, CommandResponse::Reaped(2));
    assert!(fsm.store().snapshot().tombstones().is_empty());
}

#[tokio::test(start_paused = true)]
async fn blocking_query_wakes_on_write() {
    let store = StateStore::new();
    store.kvs_set(1, DirEntry::new("app/x", "1"));

    let writer = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        writer.kvs_set(2, DirEntry::new("app/y", "2"));
    });

    let watch = store.get_kvs_watch("app/");
    let (idx, entries) =
        blocking_query(&watch, 1, Duration::from_secs(30), || store.kvs_list("app/")).await;
    assert_eq!(idx, 2);
    assert_eq!(entries.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn blocking_query_times_out_with_current_result() {
    let store = StateStore::new();
    store.kvs_set(1, DirEntry::new("app/x", "1"));

    let watch = store.get_kvs_watch("app/");
    let (idx, entries) =
        blocking_query(&watch, 1, Duration::from_secs(5), || store.kvs_list("app/")).await;
    assert_eq!(idx, 1);
    assert_eq!(entries.len(), 1);
}

#[test]
fn snapshot_survives_redb_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harbor.redb");

    let store = redis_store();
    store
        .session_create(4, session("s1", "foo", &["redis-check"], SessionBehavior::Release))
        .unwrap();
    assert!(store.kvs_lock(5, locked("leader", "s1")).unwrap());
    store.kvs_set(6, DirEntry::new("gone", "x"));
    store.kvs_delete(7, "gone");
    persist::save_snapshot(&path, &store.snapshot()).unwrap();

    let restored = StateStore::new();
    assert_eq!(persist::load_snapshot(&path, &restored).unwrap(), 7);
    assert_eq!(restored.check_service_nodes("redis"), store.check_service_nodes("redis"));
    assert_eq!(restored.kvs_get("leader"), store.kvs_get("leader"));
    assert_eq!(restored.kvs_list("gone").0, 7);

    // Session check mappings come back too: a critical check still cascades.
    restored
        .ensure_check(8, check("foo", "redis-check", "redis", HealthStatus::Critical))
        .unwrap();
    assert!(restored.session_get("s1").1.is_none());
    assert_eq!(restored.kvs_get("leader").1.unwrap().session, None);
}
