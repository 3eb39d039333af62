//! Prediction store abstraction.
//!
//! This module provides:
//! - The `PredictionStore` trait (string get/set with TTL, sets, sorted sets,
//!   pipelined multi-get, atomic and guarded multi-op batches)
//! - Key layout shared by the ledger, settlement and aggregator
//! - An in-memory implementation for tests and local runs
//! - Retry with exponential backoff for transient store failures

use crate::error::StoreError;
use async_trait::async_trait;

pub mod memory;
pub mod retry;

pub use memory::MemoryStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Key layout
pub mod keys {
    pub const TIMELINE: &str = "predictions:timeline";
    pub const PENDING: &str = "predictions:pending";
    pub const SETTLED: &str = "predictions:settled";
    pub const CALIBRATION: &str = "model:calibration";

    pub fn prediction(market_id: &str) -> String {
        format!("prediction:{}", market_id)
    }
}

/// One write inside an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Set {
        key: String,
        value: String,
        ttl_secs: Option<u64>,
    },
    Delete {
        key: String,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetRemove {
        key: String,
        member: String,
    },
    SortedSetAdd {
        key: String,
        score: f64,
        member: String,
    },
    SortedSetRemove {
        key: String,
        member: String,
    },
}

/// Precondition of a guarded batch: the string at `key` still holds
/// `expected`. `None` means the key is absent or expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreGuard {
    pub key: String,
    pub expected: Option<String>,
}

impl StoreGuard {
    pub fn new(key: impl Into<String>, expected: Option<String>) -> Self {
        Self {
            key: key.into(),
            expected,
        }
    }

    pub fn absent(key: impl Into<String>) -> Self {
        Self::new(key, None)
    }
}

/// Operations the forecast engine needs from its backing store.
///
/// `atomic` must apply every op or none of them; the ledger relies on it to
/// keep a record and its indices consistent. `atomic_if` additionally checks
/// its guard in the same step as the writes, so a record read earlier can be
/// replaced only if nobody else replaced it first.
#[async_trait]
pub trait PredictionStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn sorted_set_add(&self, key: &str, score: f64, member: &str) -> StoreResult<()>;

    /// Members with `min <= score <= max`, ascending by score
    async fn sorted_set_range_by_score(&self, key: &str, min: f64, max: f64)
        -> StoreResult<Vec<String>>;

    async fn sorted_set_card(&self, key: &str) -> StoreResult<usize>;

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn set_cardinality(&self, key: &str) -> StoreResult<usize>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Pipelined read; the result is positionally aligned with `keys`
    async fn multi_get(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>>;

    async fn atomic(&self, ops: Vec<StoreOp>) -> StoreResult<()>;

    /// Apply `ops` only if `guard` holds. Returns `false`, writing nothing,
    /// when the guarded value changed.
    async fn atomic_if(&self, guard: StoreGuard, ops: Vec<StoreOp>) -> StoreResult<bool>;
}
