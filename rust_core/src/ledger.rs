//! Prediction ledger.
//!
//! Sole owner of `PredictionRecord` identity. Each record lives under
//! `prediction:{market_id}` with a 30 day TTL and is indexed three ways:
//! - `predictions:timeline` (sorted by creation ms)
//! - `predictions:pending` (set, until settlement)
//! - `predictions:settled` (sorted by creation ms, after settlement)
//!
//! Every write that replaces an existing record is guarded on the payload it
//! was derived from, so concurrent writers serialize instead of silently
//! undoing each other.

use crate::error::StoreError;
use crate::models::{MarketOdds, PredictionRecord, PredictionResult};
use crate::store::{keys, PredictionStore, StoreGuard, StoreOp, StoreResult};
use chrono::Utc;
use log::{debug, info, warn};
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::sync::Arc;

/// Guarded writes on one record before reporting a conflict
pub(crate) const MAX_CONFLICT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total: usize,
    pub pending: usize,
    pub settled: usize,
}

/// Index entries dropped by one prune pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub pending: usize,
    pub timeline: usize,
    pub settled: usize,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.pending + self.timeline + self.settled == 0
    }
}

/// A record together with the exact stored payload it was parsed from
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Snapshot {
    pub record: PredictionRecord,
    pub payload: String,
}

#[derive(Clone)]
pub struct PredictionLedger {
    store: Arc<dyn PredictionStore>,
    record_ttl_secs: u64,
}

impl PredictionLedger {
    pub fn new(store: Arc<dyn PredictionStore>, record_ttl_secs: u64) -> Self {
        Self {
            store,
            record_ttl_secs,
        }
    }

    pub fn store(&self) -> &Arc<dyn PredictionStore> {
        &self.store
    }

    pub fn record_ttl_secs(&self) -> u64 {
        self.record_ttl_secs
    }

    /// Build the durable record for a fresh prediction
    pub fn build_record(
        market_id: &str,
        team_a: &str,
        team_b: &str,
        result: &PredictionResult,
        market: &MarketOdds,
        timestamp: i64,
    ) -> PredictionRecord {
        PredictionRecord {
            market_id: market_id.to_string(),
            team_a: team_a.to_string(),
            team_b: team_b.to_string(),
            predicted_probability_a: result.team_a_probability,
            market_odds_a: market.implied_probability_a(),
            confidence: result.confidence,
            timestamp,
            model_version: result.model_version.clone(),
            settlement: None,
        }
    }

    /// Persist a new pending record with its timeline and pending indices.
    ///
    /// Re-recording a market that is still pending replaces the record. A
    /// market that has already settled is left untouched so its predicted
    /// probability never changes after the fact, even when the settlement
    /// lands between the read and the write.
    pub async fn record(&self, record: &PredictionRecord) -> StoreResult<bool> {
        let key = keys::prediction(&record.market_id);
        let payload = serde_json::to_string(record)?;

        for _ in 0..MAX_CONFLICT_ATTEMPTS {
            let current = self.store.get(&key).await?;
            if let Some(raw) = &current {
                let existing: PredictionRecord = serde_json::from_str(raw)?;
                if existing.is_settled() {
                    warn!(
                        "Prediction for {} already settled, ignoring new prediction",
                        record.market_id
                    );
                    return Ok(false);
                }
            }

            let ops = vec![
                StoreOp::Set {
                    key: key.clone(),
                    value: payload.clone(),
                    ttl_secs: Some(self.record_ttl_secs),
                },
                StoreOp::SortedSetAdd {
                    key: keys::TIMELINE.to_string(),
                    score: record.timestamp as f64,
                    member: record.market_id.clone(),
                },
                StoreOp::SetAdd {
                    key: keys::PENDING.to_string(),
                    member: record.market_id.clone(),
                },
            ];
            if self
                .store
                .atomic_if(StoreGuard::new(key.clone(), current), ops)
                .await?
            {
                debug!(
                    "Recorded prediction {} ({} vs {}, p={:.3})",
                    record.market_id, record.team_a, record.team_b, record.predicted_probability_a
                );
                return Ok(true);
            }
            debug!("Prediction {} changed while recording, re-reading", record.market_id);
        }

        Err(StoreError::Conflict(format!(
            "prediction {} kept changing while recording",
            record.market_id
        )))
    }

    /// Stamp a fresh prediction with the current time and record it
    pub async fn record_result(
        &self,
        market_id: &str,
        team_a: &str,
        team_b: &str,
        result: &PredictionResult,
        market: &MarketOdds,
    ) -> StoreResult<PredictionRecord> {
        let record = Self::build_record(
            market_id,
            team_a,
            team_b,
            result,
            market,
            Utc::now().timestamp_millis(),
        );
        self.record(&record).await?;
        Ok(record)
    }

    pub async fn get(&self, market_id: &str) -> StoreResult<Option<PredictionRecord>> {
        Ok(self.snapshot(market_id).await?.map(|s| s.record))
    }

    pub(crate) async fn snapshot(&self, market_id: &str) -> StoreResult<Option<Snapshot>> {
        match self.store.get(&keys::prediction(market_id)).await? {
            Some(payload) => Ok(Some(Snapshot {
                record: serde_json::from_str(&payload)?,
                payload,
            })),
            None => Ok(None),
        }
    }

    /// Fetch many records in one pipelined read. Missing or unparsable
    /// entries are skipped; order is not guaranteed to match `market_ids`.
    pub async fn get_many(&self, market_ids: &[String]) -> StoreResult<Vec<PredictionRecord>> {
        let record_keys: Vec<String> = market_ids.iter().map(|id| keys::prediction(id)).collect();
        let values = self.store.multi_get(&record_keys).await?;

        let mut records = Vec::with_capacity(values.len());
        for (id, value) in market_ids.iter().zip(values) {
            let Some(raw) = value else { continue };
            match serde_json::from_str::<PredictionRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unparsable prediction {}: {}", id, e),
            }
        }
        Ok(records)
    }

    /// Most recent predictions, newest first
    pub async fn recent(&self, limit: usize) -> StoreResult<Vec<PredictionRecord>> {
        let mut ids = self
            .store
            .sorted_set_range_by_score(keys::TIMELINE, f64::NEG_INFINITY, f64::INFINITY)
            .await?;
        ids.reverse();
        ids.truncate(limit);

        let mut records = self.get_many(&ids).await?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Settled records created at or after `since_ms`
    pub async fn settled_since(&self, since_ms: i64) -> StoreResult<Vec<PredictionRecord>> {
        let ids = self
            .store
            .sorted_set_range_by_score(keys::SETTLED, since_ms as f64, f64::INFINITY)
            .await?;
        let records = self.get_many(&ids).await?;
        Ok(records.into_iter().filter(|r| r.is_settled()).collect())
    }

    /// Ids on the timeline created at or after `since_ms`
    pub async fn timeline_since(&self, since_ms: i64) -> StoreResult<Vec<String>> {
        self.store
            .sorted_set_range_by_score(keys::TIMELINE, since_ms as f64, f64::INFINITY)
            .await
    }

    pub async fn pending_ids(&self) -> StoreResult<Vec<String>> {
        self.store.set_members(keys::PENDING).await
    }

    pub async fn stats(&self) -> StoreResult<LedgerStats> {
        Ok(LedgerStats {
            total: self.store.sorted_set_card(keys::TIMELINE).await?,
            pending: self.store.set_cardinality(keys::PENDING).await?,
            settled: self.store.sorted_set_card(keys::SETTLED).await?,
        })
    }

    /// Drop index entries whose record has expired
    pub async fn prune(&self) -> StoreResult<PruneReport> {
        self.prune_at(Utc::now().timestamp_millis()).await
    }

    /// Candidates are every pending id plus timeline and settled entries
    /// created before the TTL window ending at `now_ms`. An id is dropped
    /// from all three indices only while its record is still absent, so a
    /// market recorded again mid-pass keeps its entries.
    pub async fn prune_at(&self, now_ms: i64) -> StoreResult<PruneReport> {
        let cutoff = (now_ms - (self.record_ttl_secs as i64) * 1000) as f64;
        let pending: FxHashSet<String> = self.pending_ids().await?.into_iter().collect();
        let timeline: FxHashSet<String> = self
            .store
            .sorted_set_range_by_score(keys::TIMELINE, f64::NEG_INFINITY, cutoff)
            .await?
            .into_iter()
            .collect();
        let settled: FxHashSet<String> = self
            .store
            .sorted_set_range_by_score(keys::SETTLED, f64::NEG_INFINITY, cutoff)
            .await?
            .into_iter()
            .collect();

        let mut candidates: Vec<String> = pending
            .iter()
            .chain(&timeline)
            .chain(&settled)
            .cloned()
            .collect();
        candidates.sort();
        candidates.dedup();

        let mut report = PruneReport::default();
        if candidates.is_empty() {
            return Ok(report);
        }

        let record_keys: Vec<String> = candidates.iter().map(|id| keys::prediction(id)).collect();
        let values = self.store.multi_get(&record_keys).await?;

        for ((id, key), value) in candidates.iter().zip(record_keys).zip(values) {
            if value.is_some() {
                continue;
            }
            let mut ops = Vec::with_capacity(3);
            if pending.contains(id) {
                ops.push(StoreOp::SetRemove {
                    key: keys::PENDING.to_string(),
                    member: id.clone(),
                });
            }
            if timeline.contains(id) {
                ops.push(StoreOp::SortedSetRemove {
                    key: keys::TIMELINE.to_string(),
                    member: id.clone(),
                });
            }
            if settled.contains(id) {
                ops.push(StoreOp::SortedSetRemove {
                    key: keys::SETTLED.to_string(),
                    member: id.clone(),
                });
            }
            if !self.store.atomic_if(StoreGuard::absent(key), ops).await? {
                debug!("Prediction {} reappeared during prune, keeping its indices", id);
                continue;
            }
            report.pending += usize::from(pending.contains(id));
            report.timeline += usize::from(timeline.contains(id));
            report.settled += usize::from(settled.contains(id));
        }

        if !report.is_empty() {
            info!(
                "Pruned expired predictions: pending={} timeline={} settled={}",
                report.pending, report.timeline, report.settled
            );
        }
        Ok(report)
    }

    /// Write a settled record and move it from pending to settled in one
    /// batch. Returns `false`, writing nothing, when the stored payload is no
    /// longer `expected_payload`.
    pub(crate) async fn commit_settlement(
        &self,
        record: &PredictionRecord,
        expected_payload: &str,
    ) -> StoreResult<bool> {
        if !record.is_settled() {
            return Err(StoreError::Unavailable(format!(
                "refusing to commit unsettled record {}",
                record.market_id
            )));
        }
        let ops = self.settlement_ops(record)?;
        let guard = StoreGuard::new(
            keys::prediction(&record.market_id),
            Some(expected_payload.to_string()),
        );
        self.store.atomic_if(guard, ops).await
    }

    fn settlement_ops(&self, record: &PredictionRecord) -> StoreResult<Vec<StoreOp>> {
        let payload = serde_json::to_string(record)?;
        Ok(vec![
            StoreOp::Set {
                key: keys::prediction(&record.market_id),
                value: payload,
                ttl_secs: Some(self.record_ttl_secs),
            },
            StoreOp::SetRemove {
                key: keys::PENDING.to_string(),
                member: record.market_id.clone(),
            },
            StoreOp::SortedSetAdd {
                key: keys::SETTLED.to_string(),
                score: record.timestamp as f64,
                member: record.market_id.clone(),
            },
        ])
    }
}
