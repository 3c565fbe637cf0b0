use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{KvStore, StoreError};
use crate::clock::Clock;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, i64>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process store. Expiry is evaluated against the injected clock on every
/// access; dead entries linger until touched or purged.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn deadline(&self, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| StoreError::InvalidTtl(e.to_string()))?;
        Ok(self.clock.now() + ttl)
    }

    /// Live entry for `key`, dropping it first if it has expired.
    fn live_entry<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        match Self::live_entry(&mut entries, key, now) {
            None => Ok(None),
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = self.deadline(ttl)?;
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        let entries = self.lock()?;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        if Self::live_entry(&mut entries, key, now).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match entries.get_mut(key) {
            Some(Entry { value: Value::Hash(fields), .. }) => {
                let slot = fields.entry(field.to_string()).or_insert(0);
                *slot += delta;
                Ok(*slot)
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, i64>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        match Self::live_entry(&mut entries, key, now) {
            None => Ok(HashMap::new()),
            Some(Entry { value: Value::Hash(fields), .. }) => Ok(fields.clone()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        if Self::live_entry(&mut entries, key, now).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Set(HashSet::new()),
                    expires_at: None,
                },
            );
        }
        match entries.get_mut(key) {
            Some(Entry { value: Value::Set(members), .. }) => Ok(members.insert(member.to_string())),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        match Self::live_entry(&mut entries, key, now) {
            None => Ok(()),
            Some(Entry { value: Value::Set(members), .. }) => {
                members.remove(member);
                if members.is_empty() {
                    entries.remove(key);
                }
                Ok(())
            }
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        match Self::live_entry(&mut entries, key, now) {
            None => Ok(Vec::new()),
            Some(Entry { value: Value::Set(members), .. }) => {
                let mut out: Vec<String> = members.iter().cloned().collect();
                out.sort();
                Ok(out)
            }
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let expires_at = self.deadline(ttl)?;
        let mut entries = self.lock()?;
        match Self::live_entry(&mut entries, key, now) {
            None => Ok(false),
            Some(entry) => {
                entry.expires_at = Some(expires_at);
                Ok(true)
            }
        }
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok((before - entries.len()) as u64)
    }

    async fn ping(&self) -> Result<String, StoreError> {
        let keys = self.lock()?.len();
        Ok(format!("memory ({} keys)", keys))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
