//! Prepared queries.
//!
//! Queries are addressable by ID or by name, and the two namespaces may not
//! alias each other. A query with a template answers any name sharing its
//! prefix; see [`crate::template`].
//!
//! The `query_*` methods are the older names for the same table and simply
//! delegate.

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::schema::{By, Table};
use crate::store::StateStore;
use crate::template::CompiledTemplate;
use crate::types::{PreparedQuery, fold};

impl StateStore {
    /// Create or update a prepared query.
    pub fn prepared_query_set(&self, idx: u64, mut query: PreparedQuery) -> StateResult<()> {
        if query.id.is_empty() {
            return Err(StateError::MissingQueryId);
        }

        let mut tx = self.write();
        let mut watches = self.watch_manager();

        query.create_index = tx
            .prepared_queries
            .get(&query.id)
            .map_or(idx, |existing| existing.create_index);
        query.modify_index = idx;

        if !query.name.is_empty() {
            let taken = tx
                .prepared_queries
                .lookup(By::Name, &query.name.to_lowercase())
                .any(|q| q.id != query.id);
            if taken {
                return Err(StateError::QueryNameAlias(query.name.clone()));
            }
            if tx
                .prepared_queries
                .get(&query.name)
                .is_some_and(|q| q.id != query.id)
            {
                return Err(StateError::QueryIdAlias(query.name.clone()));
            }
        }
        if tx
            .prepared_queries
            .lookup(By::Name, &query.id.to_lowercase())
            .any(|q| q.id != query.id)
        {
            return Err(StateError::IdNameAlias(query.id.clone()));
        }

        if let Some(session) = query.session.as_deref().filter(|s| !s.is_empty()) {
            if !tx.sessions.contains(&session.to_string()) {
                return Err(StateError::InvalidSession(session.to_string()));
            }
        }

        if query.template.is_some() {
            CompiledTemplate::compile(&query)?;
        } else if tx
            .services
            .lookup(By::ServiceName, &fold(&query.service.service))
            .next()
            .is_none()
        {
            return Err(StateError::InvalidService(query.service.service.clone()));
        }

        debug!(query = %query.id, name = %query.name, idx, "prepared query stored");
        tx.prepared_queries.insert(query);
        tx.set_index(Table::PreparedQueries, idx);
        watches.arm(Table::PreparedQueries);
        self.commit(tx, watches);
        Ok(())
    }

    /// Delete a prepared query; a missing ID is not an error.
    pub fn prepared_query_delete(&self, idx: u64, id: &str) {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        if tx.prepared_queries.remove(&id.to_string()).is_none() {
            return;
        }
        tx.set_index(Table::PreparedQueries, idx);
        watches.arm(Table::PreparedQueries);
        self.commit(tx, watches);
        debug!(query = %id, idx, "prepared query deleted");
    }

    pub fn prepared_query_get(&self, id: &str) -> (u64, Option<PreparedQuery>) {
        let tx = self.read();
        let query = tx.prepared_queries.get(&id.to_string()).cloned();
        (tx.index(Table::PreparedQueries), query)
    }

    /// Look a query up by ID, then by exact name.
    pub fn prepared_query_lookup(&self, id_or_name: &str) -> (u64, Option<PreparedQuery>) {
        let tx = self.read();
        let idx = tx.index(Table::PreparedQueries);
        if id_or_name.is_empty() {
            return (idx, None);
        }
        let query = tx
            .prepared_queries
            .get(&id_or_name.to_string())
            .or_else(|| {
                tx.prepared_queries
                    .lookup(By::Name, &id_or_name.to_lowercase())
                    .next()
            })
            .cloned();
        (idx, query)
    }

    /// Resolve a lookup to a concrete query, rendering templates.
    ///
    /// UUID-shaped inputs are only matched against IDs. Other inputs match an
    /// exact non-template name first, then the template with the longest name
    /// that prefixes the input.
    pub fn prepared_query_resolve(
        &self,
        id_or_name: &str,
    ) -> StateResult<(u64, Option<PreparedQuery>)> {
        let tx = self.read();
        let idx = tx.index(Table::PreparedQueries);
        if id_or_name.is_empty() {
            return Ok((idx, None));
        }

        if uuid::Uuid::parse_str(id_or_name).is_ok() {
            let query = tx.prepared_queries.get(&id_or_name.to_string()).cloned();
            return Ok((idx, query));
        }

        let exact = tx
            .prepared_queries
            .lookup(By::Name, &id_or_name.to_lowercase())
            .find(|q| q.template.is_none());
        if let Some(query) = exact {
            return Ok((idx, Some(query.clone())));
        }

        let lowered = id_or_name.to_lowercase();
        let template = tx
            .prepared_queries
            .iter()
            .filter(|q| q.template.is_some())
            .filter(|q| lowered.starts_with(&q.name.to_lowercase()))
            .max_by_key(|q| q.name.len());
        match template {
            Some(query) => {
                let rendered = CompiledTemplate::compile(query)?.render(id_or_name)?;
                Ok((idx, Some(rendered)))
            }
            None => Ok((idx, None)),
        }
    }

    pub fn prepared_query_list(&self) -> (u64, Vec<PreparedQuery>) {
        let tx = self.read();
        let queries = tx.prepared_queries.iter().cloned().collect();
        (tx.index(Table::PreparedQueries), queries)
    }

    // ── Legacy names ───────────────────────────────────────────────

    pub fn query_set(&self, idx: u64, query: PreparedQuery) -> StateResult<()> {
        self.prepared_query_set(idx, query)
    }

    pub fn query_delete(&self, idx: u64, id: &str) {
        self.prepared_query_delete(idx, id)
    }

    pub fn query_get(&self, id: &str) -> (u64, Option<PreparedQuery>) {
        self.prepared_query_get(id)
    }

    pub fn query_lookup(&self, id_or_name: &str) -> (u64, Option<PreparedQuery>) {
        self.prepared_query_lookup(id_or_name)
    }

    pub fn query_list(&self) -> (u64, Vec<PreparedQuery>) {
        self.prepared_query_list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Node, NodeService, QueryTemplate, ServiceQuery, Session};

    const ID_A: &str = "a7ec6c8f-3b4c-4ae6-9a0f-0c0d0c8c5c11";
    const ID_B: &str = "b1d0e7a2-92b1-4a35-8df6-9b1b7b6e2f22";

    fn store_with_redis() -> StateStore {
        let store = StateStore::new();
        store
            .ensure_node(
                1,
                Node {
                    node: "foo".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .ensure_service(
                2,
                "foo",
                &NodeService {
                    id: "redis".into(),
                    service: "redis".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        store
    }

    fn query(id: &str, name: &str, service: &str) -> PreparedQuery {
        PreparedQuery {
            id: id.into(),
            name: name.into(),
            service: ServiceQuery {
                service: service.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn set_requires_id_and_service() {
        let store = StateStore::new();
        assert!(matches!(
            store.prepared_query_set(1, query("", "", "redis")),
            Err(StateError::MissingQueryId)
        ));
        let err = store
            .prepared_query_set(3, query(ID_A, "", "redis"))
            .unwrap_err();
        assert!(err.to_string().contains("invalid service"));
        assert_eq!(store.max_index(&[Table::PreparedQueries]), 0);
    }

    #[test]
    fn names_and_ids_may_not_alias() {
        let store = store_with_redis();
        store
            .prepared_query_set(3, query(ID_A, "cache", "redis"))
            .unwrap();

        let err = store
            .prepared_query_set(4, query(ID_B, "CACHE", "redis"))
            .unwrap_err();
        assert!(matches!(err, StateError::QueryNameAlias(_)));

        let err = store
            .prepared_query_set(4, query(ID_B, ID_A, "redis"))
            .unwrap_err();
        assert!(matches!(err, StateError::QueryIdAlias(_)));

        let err = store
            .prepared_query_set(4, query("cache", "", "redis"))
            .unwrap_err();
        assert!(matches!(err, StateError::IdNameAlias(_)));
    }

    #[test]
    fn update_keeps_create_index() {
        let store = store_with_redis();
        store
            .prepared_query_set(3, query(ID_A, "cache", "redis"))
            .unwrap();
        store
            .prepared_query_set(4, query(ID_A, "cache-renamed", "redis"))
            .unwrap();
        let (idx, stored) = store.query_get(ID_A);
        let stored = stored.unwrap();
        assert_eq!(idx, 4);
        assert_eq!(stored.create_index, 3);
        assert_eq!(stored.name, "cache-renamed");
        assert_eq!(store.query_lookup("CACHE-RENAMED").1.unwrap().id, ID_A);
    }

    #[test]
    fn session_must_exist_and_owns_query() {
        let store = store_with_redis();
        let mut q = query(ID_A, "cache", "redis");
        q.session = Some("s1".into());
        assert!(matches!(
            store.prepared_query_set(3, q.clone()),
            Err(StateError::InvalidSession(_))
        ));

        store
            .session_create(
                4,
                Session {
                    id: "s1".into(),
                    node: "foo".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        store.prepared_query_set(5, q).unwrap();
        store.session_destroy(6, "s1").unwrap();
        assert!(store.prepared_query_get(ID_A).1.is_none());
        assert_eq!(store.max_index(&[Table::PreparedQueries]), 6);
    }

    #[test]
    fn resolve_prefers_exact_then_longest_template() {
        let store = store_with_redis();
        store
            .prepared_query_set(3, query(ID_A, "geo-db-exact", "redis"))
            .unwrap();

        let mut short = query(ID_B, "geo-", "${name.suffix}");
        short.template = Some(QueryTemplate::default());
        store.prepared_query_set(4, short).unwrap();

        let mut long = query("c8a1f2b3-0d4e-4f5a-8b6c-7d8e9f0a1b2c", "geo-db-", "db-${name.suffix}");
        long.template = Some(QueryTemplate::default());
        store.prepared_query_set(5, long).unwrap();

        let (_, exact) = store.prepared_query_resolve("geo-db-exact").unwrap();
        assert_eq!(exact.unwrap().id, ID_A);

        let (_, rendered) = store.prepared_query_resolve("geo-db-customer").unwrap();
        assert_eq!(rendered.unwrap().service.service, "db-customer");

        let (_, rendered) = store.prepared_query_resolve("geo-web").unwrap();
        assert_eq!(rendered.unwrap().service.service, "web");

        let (_, by_id) = store.prepared_query_resolve(ID_B).unwrap();
        assert_eq!(by_id.unwrap().name, "geo-");

        assert!(store.prepared_query_resolve("other").unwrap().1.is_none());
        assert!(store.prepared_query_resolve("").unwrap().1.is_none());
    }

    #[test]
    fn delete_and_list() {
        let store = store_with_redis();
        store
            .prepared_query_set(3, query(ID_A, "a", "redis"))
            .unwrap();
        store
            .prepared_query_set(4, query(ID_B, "b", "redis"))
            .unwrap();
        store.query_delete(5, ID_A);
        store.query_delete(6, "missing");

        let (idx, all) = store.query_list();
        assert_eq!(idx, 5);
        assert_eq!(all.len(), 1);
    }
}
