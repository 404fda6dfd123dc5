//! Autopilot configuration singleton.

use tracing::debug;

use crate::db::WriteTxn;
use crate::schema::Table;
use crate::store::StateStore;
use crate::types::AutopilotConfig;

impl StateStore {
    pub fn autopilot_config(&self) -> (u64, Option<AutopilotConfig>) {
        let tx = self.read();
        (tx.index(Table::Autopilot), tx.autopilot.clone())
    }

    /// Replace the configuration.
    pub fn update_autopilot_config(&self, idx: u64, config: AutopilotConfig) {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        write_autopilot(&mut tx, idx, config);
        watches.arm(Table::Autopilot);
        self.commit(tx, watches);
    }

    /// Replace the configuration only if the stored one was last modified at
    /// `cidx`. Fails when nothing is stored yet.
    pub fn autopilot_cas_config(&self, idx: u64, cidx: u64, config: AutopilotConfig) -> bool {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        if tx.autopilot.as_ref().is_none_or(|c| c.modify_index != cidx) {
            return false;
        }
        write_autopilot(&mut tx, idx, config);
        watches.arm(Table::Autopilot);
        self.commit(tx, watches);
        true
    }
}

fn write_autopilot(tx: &mut WriteTxn<'_>, idx: u64, mut config: AutopilotConfig) {
    config.create_index = tx.autopilot.as_ref().map_or(idx, |c| c.create_index);
    config.modify_index = idx;
    tx.autopilot = Some(config);
    tx.set_index(Table::Autopilot, idx);
    debug!(idx, "autopilot config stored");
}
