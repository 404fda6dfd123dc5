//! ACL tokens.

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::schema::Table;
use crate::store::StateStore;
use crate::types::Acl;

impl StateStore {
    /// Create or update an ACL. The create index survives updates.
    pub fn acl_set(&self, idx: u64, mut acl: Acl) -> StateResult<()> {
        if acl.id.is_empty() {
            return Err(StateError::MissingAclId);
        }
        let mut tx = self.write();
        let mut watches = self.watch_manager();

        acl.create_index = tx
            .acls
            .get(&acl.id)
            .map_or(idx, |existing| existing.create_index);
        acl.modify_index = idx;

        debug!(acl = %acl.id, idx, "acl stored");
        tx.acls.insert(acl);
        tx.set_index(Table::Acls, idx);
        watches.arm(Table::Acls);
        self.commit(tx, watches);
        Ok(())
    }

    pub fn acl_get(&self, id: &str) -> (u64, Option<Acl>) {
        let tx = self.read();
        (tx.index(Table::Acls), tx.acls.get(&id.to_string()).cloned())
    }

    pub fn acl_list(&self) -> (u64, Vec<Acl>) {
        let tx = self.read();
        (tx.index(Table::Acls), tx.acls.iter().cloned().collect())
    }

    /// Delete an ACL; deleting a missing one is not an error.
    pub fn acl_delete(&self, idx: u64, id: &str) {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        if tx.acls.remove(&id.to_string()).is_none() {
            return;
        }
        tx.set_index(Table::Acls, idx);
        watches.arm(Table::Acls);
        self.commit(tx, watches);
        debug!(acl = %id, idx, "acl deleted");
    }
}
