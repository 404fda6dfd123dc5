//! Lock delay bookkeeping.
//!
//! When a session is invalidated, the keys it held cannot be re-acquired
//! until the session's lock delay elapses. The expirations are not part of
//! the replicated state; each server tracks them locally and expired
//! entries are dropped lazily on lookup.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Default)]
pub(crate) struct LockDelay {
    expires: Mutex<HashMap<String, Instant>>,
}

impl LockDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// When `key` becomes lockable again, if it is still delayed.
    pub fn get_expiration(&self, key: &str) -> Option<Instant> {
        let mut expires = self.expires.lock();
        match expires.get(key) {
            Some(at) if *at > Instant::now() => Some(*at),
            Some(_) => {
                expires.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set_expiration(&self, key: &str, now: Instant, delay: Duration) {
        self.expires.lock().insert(key.to_string(), now + delay);
    }
}
