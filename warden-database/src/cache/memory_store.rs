use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// How often a write sweeps out entries nobody read again after they lapsed.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Entries {
    values: HashMap<String, (Vec<u8>, Instant)>,
    next_purge: Instant,
}

impl Entries {
    fn purge_expired(&mut self, now: Instant) {
        if now < self.next_purge {
            return;
        }
        self.values.retain(|_, (_, expires_at)| *expires_at > now);
        self.next_purge = now + PURGE_INTERVAL;
    }
}

impl Default for Entries {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
            next_purge: Instant::now() + PURGE_INTERVAL,
        }
    }
}

/// Process-local stand-in for Redis, used when Redis is disabled and in tests.
/// Keys expire on read, and writes periodically purge everything that lapsed.
#[derive(Clone, Debug, Default)]
pub struct MemoryCacheStore {
    entries: Arc<Mutex<Entries>>,
}

impl MemoryCacheStore {
    fn entries(&self) -> anyhow::Result<MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory cache mutex poisoned"))
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut entries = self.entries()?;
        let now = Instant::now();

        match entries.values.get(key) {
            Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        only_if_absent: bool,
    ) -> anyhow::Result<bool> {
        let mut entries = self.entries()?;
        let now = Instant::now();
        entries.purge_expired(now);

        if only_if_absent
            && entries
                .values
                .get(key)
                .is_some_and(|(_, expires_at)| *expires_at > now)
        {
            return Ok(false);
        }

        entries.values.insert(key.to_owned(), (value, now + ttl));
        Ok(true)
    }

    pub async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.entries()?.values.remove(key);
        Ok(())
    }
}
