//! In-memory `PredictionStore`.
//!
//! Mirrors the Redis semantics the engine relies on (TTL expiry on string
//! keys, set and sorted-set membership, all-or-nothing batches) behind a
//! single lock. Used by tests and for running the engine without Redis.

use super::{PredictionStore, StoreGuard, StoreOp, StoreResult};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::{RwLock, RwLockWriteGuard};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// Unix ms
    expires_at: Option<i64>,
}

#[derive(Debug, Default)]
struct Inner {
    strings: FxHashMap<String, Entry>,
    sets: FxHashMap<String, FxHashSet<String>>,
    sorted_sets: FxHashMap<String, FxHashMap<String, f64>>,
}

impl Inner {
    fn live_value(&self, key: &str, now_ms: i64) -> Option<String> {
        self.strings.get(key).and_then(|e| match e.expires_at {
            Some(exp) if exp <= now_ms => None,
            _ => Some(e.value.clone()),
        })
    }

    /// Drop string entries past their TTL
    fn purge_expired(&mut self, now_ms: i64) {
        self.strings
            .retain(|_, e| e.expires_at.map_or(true, |exp| exp > now_ms));
    }

    fn apply(&mut self, op: StoreOp, now_ms: i64) {
        match op {
            StoreOp::Set {
                key,
                value,
                ttl_secs,
            } => {
                let expires_at = ttl_secs.map(|t| now_ms + (t as i64) * 1000);
                self.strings.insert(key, Entry { value, expires_at });
            }
            StoreOp::Delete { key } => {
                self.strings.remove(&key);
                self.sets.remove(&key);
                self.sorted_sets.remove(&key);
            }
            StoreOp::SetAdd { key, member } => {
                self.sets.entry(key).or_default().insert(member);
            }
            StoreOp::SetRemove { key, member } => {
                if let Some(set) = self.sets.get_mut(&key) {
                    set.remove(&member);
                }
            }
            StoreOp::SortedSetAdd { key, score, member } => {
                self.sorted_sets.entry(key).or_default().insert(member, score);
            }
            StoreOp::SortedSetRemove { key, member } => {
                if let Some(zset) = self.sorted_sets.get_mut(&key) {
                    zset.remove(&member);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, as if the backend went away
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Force a string key past its TTL
    pub fn expire(&self, key: &str) {
        if let Some(entry) = self.inner.write().strings.get_mut(key) {
            entry.expires_at = Some(0);
        }
    }

    /// Remaining TTL in seconds for a string key, if it has one
    pub fn ttl_secs(&self, key: &str) -> Option<i64> {
        let now = now_ms();
        self.inner
            .read()
            .strings
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|exp| (exp - now) / 1000)
    }

    /// Write access with expired entries already swept out
    fn write(&self, now_ms: i64) -> RwLockWriteGuard<'_, Inner> {
        let mut inner = self.inner.write();
        inner.purge_expired(now_ms);
        inner
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl PredictionStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        Ok(self.inner.read().live_value(key, now_ms()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()> {
        self.check()?;
        let now = now_ms();
        self.write(now).apply(
            StoreOp::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl_secs,
            },
            now,
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        let now = now_ms();
        self.write(now).apply(
            StoreOp::Delete {
                key: key.to_string(),
            },
            now,
        );
        Ok(())
    }

    async fn sorted_set_add(&self, key: &str, score: f64, member: &str) -> StoreResult<()> {
        self.check()?;
        let now = now_ms();
        self.write(now).apply(
            StoreOp::SortedSetAdd {
                key: key.to_string(),
                score,
                member: member.to_string(),
            },
            now,
        );
        Ok(())
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StoreResult<Vec<String>> {
        self.check()?;
        let inner = self.inner.read();
        let mut members: Vec<(&String, f64)> = inner
            .sorted_sets
            .get(key)
            .map(|z| {
                z.iter()
                    .filter(|(_, s)| **s >= min && **s <= max)
                    .map(|(m, s)| (m, *s))
                    .collect()
            })
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(members.into_iter().map(|(m, _)| m.clone()).collect())
    }

    async fn sorted_set_card(&self, key: &str) -> StoreResult<usize> {
        self.check()?;
        Ok(self.inner.read().sorted_sets.get(key).map_or(0, |z| z.len()))
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check()?;
        let now = now_ms();
        self.write(now).apply(
            StoreOp::SetAdd {
                key: key.to_string(),
                member: member.to_string(),
            },
            now,
        );
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check()?;
        let now = now_ms();
        self.write(now).apply(
            StoreOp::SetRemove {
                key: key.to_string(),
                member: member.to_string(),
            },
            now,
        );
        Ok(())
    }

    async fn set_cardinality(&self, key: &str) -> StoreResult<usize> {
        self.check()?;
        Ok(self.inner.read().sets.get(key).map_or(0, |s| s.len()))
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check()?;
        let mut members: Vec<String> = self
            .inner
            .read()
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn multi_get(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        self.check()?;
        let now = now_ms();
        let inner = self.inner.read();
        Ok(keys.iter().map(|k| inner.live_value(k, now)).collect())
    }

    async fn atomic(&self, ops: Vec<StoreOp>) -> StoreResult<()> {
        self.check()?;
        let now = now_ms();
        let mut inner = self.write(now);
        for op in ops {
            inner.apply(op, now);
        }
        Ok(())
    }

    async fn atomic_if(&self, guard: StoreGuard, ops: Vec<StoreOp>) -> StoreResult<bool> {
        self.check()?;
        let now = now_ms();
        let mut inner = self.write(now);
        if inner.live_value(&guard.key, now) != guard.expected {
            return Ok(false);
        }
        for op in ops {
            inner.apply(op, now);
        }
        Ok(true)
    }
}
