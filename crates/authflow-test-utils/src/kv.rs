use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use authflow_core::error::Result;
use authflow_core::traits::{Clock, KvStore};

use crate::clock::FakeClock;

/// HashMap-backed [`KvStore`] with expiry driven by a [`FakeClock`].
pub struct FakeKv {
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
    clock: Arc<FakeClock>,
}

impl FakeKv {
    pub fn new(clock: Arc<FakeClock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<FakeClock> {
        &self.clock
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let entries = self.entries.lock().unwrap();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, (_, exp))| *exp > now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn live(&self, entries: &HashMap<String, (String, DateTime<Utc>)>, key: &str) -> bool {
        let now = self.clock.now();
        entries.get(key).is_some_and(|(_, exp)| *exp > now)
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        self.clock.now() + chrono::Duration::milliseconds(ttl.as_millis() as i64)
    }
}

impl KvStore for FakeKv {
    fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'_, Result<bool>> {
        let pairs = vec![(key.to_string(), value.to_string())];
        self.set_nx_multi(&pairs, ttl)
    }

    fn set_xx(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'_, Result<bool>> {
        let mut entries = self.entries.lock().unwrap();
        let written = if self.live(&entries, key) {
            entries.insert(key.to_string(), (value.to_string(), self.expiry(ttl)));
            true
        } else {
            false
        };
        Box::pin(async move { Ok(written) })
    }

    fn set_nx_multi(&self, pairs: &[(String, String)], ttl: Duration) -> BoxFuture<'_, Result<bool>> {
        let mut entries = self.entries.lock().unwrap();
        let written = if pairs.iter().any(|(k, _)| self.live(&entries, k)) {
            false
        } else {
            let expires_at = self.expiry(ttl);
            for (k, v) in pairs {
                entries.insert(k.clone(), (v.clone(), expires_at));
            }
            true
        };
        Box::pin(async move { Ok(written) })
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let entries = self.entries.lock().unwrap();
        let value = if self.live(&entries, key) {
            entries.get(key).map(|(v, _)| v.clone())
        } else {
            None
        };
        Box::pin(async move { Ok(value) })
    }

    fn del(&self, key: &str) -> BoxFuture<'_, Result<bool>> {
        let mut entries = self.entries.lock().unwrap();
        let was_live = self.live(&entries, key);
        entries.remove(key);
        Box::pin(async move { Ok(was_live) })
    }
}
