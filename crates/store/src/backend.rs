use std::{
    collections::BTreeSet,
    time::{Duration, Instant},
};

use {async_trait::async_trait, dashmap::DashMap};

use crate::Result;

/// Minimal key/value plus set operations the directory is built on.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Store `value` under `key`; `ttl` of `None` never expires.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn del(&self, key: &str) -> Result<()>;
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    async fn srem(&self, key: &str, member: &str) -> Result<()>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local backend. Expired keys are dropped lazily on read.
#[derive(Default)]
pub struct MemoryBackend {
    values: DashMap<String, Entry>,
    sets: DashMap<String, BTreeSet<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.values.insert(key.to_string(), Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        // Drops the entry only if it is still the expired one.
        if self.values.remove_if(key, |_, e| e.expired(now)).is_some() {
            return Ok(None);
        }
        Ok(self.values.get(key).map(|e| e.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        self.sets.remove_if(key, |_, set| set.is_empty());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_expire() {
        let kv = MemoryBackend::new();
        kv.set("short", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        kv.set("forever", "v", None).await.unwrap();
        assert_eq!(kv.get("short").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(kv.get("short").await.unwrap().is_none());
        assert_eq!(kv.get("forever").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn sets_deduplicate_and_shrink() {
        let kv = MemoryBackend::new();
        kv.sadd("s", "a").await.unwrap();
        kv.sadd("s", "a").await.unwrap();
        kv.sadd("s", "b").await.unwrap();
        assert_eq!(kv.smembers("s").await.unwrap(), vec!["a", "b"]);

        kv.srem("s", "a").await.unwrap();
        kv.srem("s", "b").await.unwrap();
        assert!(kv.smembers("s").await.unwrap().is_empty());
        assert!(kv.sets.is_empty());
    }
}
