//! Settlement & scoring.
//!
//! Reconciles a pending prediction with the real outcome: correctness, Brier
//! score, log loss and an edge-gated unit-stake ROI. The updated record is
//! moved from the pending set to the settled index in one atomic batch.

use crate::config::SettlementConfig;
use crate::decision::edge_exceeds;
use crate::error::{Result, StoreError};
use crate::ledger::{PredictionLedger, Snapshot, MAX_CONFLICT_ATTEMPTS};
use crate::models::{Direction, MatchOutcome, PredictionRecord, Settlement};
use crate::store::retry::execute_with_retry;
use chrono::Utc;
use log::{debug, info, warn};

// ============================================================================
// Scoring
// ============================================================================

/// Squared error between the predicted probability for A and the outcome
pub fn brier_score(probability_a: f64, team_a_won: bool) -> f64 {
    let actual = if team_a_won { 1.0 } else { 0.0 };
    (probability_a - actual).powi(2)
}

/// Negative log of the probability assigned to what actually happened
pub fn log_loss(probability_a: f64, team_a_won: bool, epsilon: f64) -> f64 {
    let p_actual = if team_a_won {
        probability_a
    } else {
        1.0 - probability_a
    };
    -p_actual.max(epsilon).ln()
}

pub fn prediction_correct(probability_a: f64, team_a_won: bool) -> bool {
    (probability_a > 0.5) == team_a_won
}

/// Realized return of a hypothetical one-unit bet.
///
/// A bet is only placed when the model disagrees with the market by more
/// than `edge_threshold`; otherwise the return is exactly zero. An edge equal
/// to the threshold up to float noise places no bet on either side.
pub fn realized_roi(
    probability_a: f64,
    market_odds_a: f64,
    team_a_won: bool,
    edge_threshold: f64,
) -> f64 {
    if !(market_odds_a > 0.0 && market_odds_a < 1.0) {
        return 0.0;
    }
    let edge = probability_a - market_odds_a;
    if edge_exceeds(edge, edge_threshold) {
        if team_a_won {
            1.0 / market_odds_a - 1.0
        } else {
            -1.0
        }
    } else if edge_exceeds(-edge, edge_threshold) {
        if team_a_won {
            -1.0
        } else {
            1.0 / (1.0 - market_odds_a) - 1.0
        }
    } else {
        0.0
    }
}

/// Score a record against the winning side
pub fn score_record(
    record: &PredictionRecord,
    winner: Direction,
    score_a: u32,
    score_b: u32,
    settled_at: i64,
    config: &SettlementConfig,
) -> Settlement {
    let team_a_won = winner == Direction::TeamA;
    let p = record.predicted_probability_a;
    let actual_winner = if team_a_won {
        record.team_a.clone()
    } else {
        record.team_b.clone()
    };

    Settlement {
        actual_winner,
        actual_score_a: score_a,
        actual_score_b: score_b,
        result_updated_at: settled_at,
        prediction_correct: prediction_correct(p, team_a_won),
        brier_score: brier_score(p, team_a_won),
        log_loss: log_loss(p, team_a_won, config.log_loss_epsilon),
        expected_value: realized_roi(p, record.market_odds_a, team_a_won, config.edge_threshold),
    }
}

// ============================================================================
// Settlement Service
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// No prediction on file for the market
    NotFound,
    /// Winner matches neither team
    UnknownWinner,
    /// Same outcome already recorded; nothing written
    AlreadySettled,
    Settled(PredictionRecord),
    /// Earlier settlement corrected with a different result
    Resettled(PredictionRecord),
}

impl SettlementOutcome {
    /// True when the store was written
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Settled(_) | Self::Resettled(_))
    }
}

#[derive(Clone)]
pub struct SettlementService {
    ledger: PredictionLedger,
    config: SettlementConfig,
}

impl SettlementService {
    pub fn new(ledger: PredictionLedger, config: SettlementConfig) -> Self {
        Self { ledger, config }
    }

    /// Settle one market. Concurrent settlements of the same market are
    /// serialized: a commit only lands on the payload it was scored from,
    /// otherwise the record is re-read and the outcome re-decided.
    pub async fn settle(
        &self,
        market_id: &str,
        winner: &str,
        score_a: u32,
        score_b: u32,
    ) -> Result<SettlementOutcome> {
        let attempts = self.config.max_write_attempts;
        let ledger = &self.ledger;

        for _ in 0..MAX_CONFLICT_ATTEMPTS {
            let Some(Snapshot { record, payload }) =
                execute_with_retry(|| ledger.snapshot(market_id), attempts).await?
            else {
                info!("No prediction found for {}, skipping settlement", market_id);
                return Ok(SettlementOutcome::NotFound);
            };

            let Some(side) = record.side_of(winner) else {
                warn!(
                    "Winner '{}' matches neither {} nor {} for {}",
                    winner, record.team_a, record.team_b, market_id
                );
                return Ok(SettlementOutcome::UnknownWinner);
            };

            let previous = record.settlement.clone();
            if let Some(existing) = &previous {
                if record.side_of(&existing.actual_winner) == Some(side)
                    && existing.actual_score_a == score_a
                    && existing.actual_score_b == score_b
                {
                    return Ok(SettlementOutcome::AlreadySettled);
                }
            }

            let settlement = score_record(
                &record,
                side,
                score_a,
                score_b,
                Utc::now().timestamp_millis(),
                &self.config,
            );
            let mut updated = record;
            updated.settlement = Some(settlement);

            let committed =
                execute_with_retry(|| ledger.commit_settlement(&updated, &payload), attempts)
                    .await?;
            if !committed {
                debug!("Prediction {} changed during settlement, re-reading", market_id);
                continue;
            }

            if let Some(s) = &updated.settlement {
                info!(
                    "Settled {}: winner={} correct={} brier={:.4} roi={:+.2}",
                    market_id, s.actual_winner, s.prediction_correct, s.brier_score, s.expected_value
                );
            }

            return Ok(match previous {
                Some(_) => {
                    warn!("Corrected earlier settlement for {}", market_id);
                    SettlementOutcome::Resettled(updated)
                }
                None => SettlementOutcome::Settled(updated),
            });
        }

        Err(StoreError::Conflict(format!(
            "prediction {} kept changing during settlement",
            market_id
        ))
        .into())
    }

    pub async fn settle_outcome(&self, outcome: &MatchOutcome) -> Result<SettlementOutcome> {
        self.settle(
            &outcome.market_id,
            &outcome.winner,
            outcome.score_a,
            outcome.score_b,
        )
        .await
    }

    /// Settle a batch. One market failing does not stop the rest.
    pub async fn settle_many(
        &self,
        outcomes: &[MatchOutcome],
    ) -> Vec<(String, Result<SettlementOutcome>)> {
        let mut results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let result = self.settle_outcome(outcome).await;
            if let Err(e) = &result {
                warn!("Failed to settle {}: {}", outcome.market_id, e);
            }
            results.push((outcome.market_id.clone(), result));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerStats;
    use crate::store::{keys, MemoryStore, PredictionStore, StoreGuard, StoreOp, StoreResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    const EPS: f64 = 1e-4;

    fn record(id: &str, p: f64, odds: f64) -> PredictionRecord {
        PredictionRecord {
            market_id: id.to_string(),
            team_a: "Lakers".to_string(),
            team_b: "Celtics".to_string(),
            predicted_probability_a: p,
            market_odds_a: odds,
            confidence: 0.7,
            timestamp: 1_700_000_000_000,
            model_version: "test".to_string(),
            settlement: None,
        }
    }

    async fn service_with(records: &[PredictionRecord]) -> (Arc<MemoryStore>, SettlementService) {
        let store = Arc::new(MemoryStore::new());
        let config = SettlementConfig::default();
        let ledger = PredictionLedger::new(store.clone(), config.record_ttl_secs);
        for r in records {
            ledger.record(r).await.unwrap();
        }
        (store, SettlementService::new(ledger, config))
    }

    #[test]
    fn test_roi_edge_gated_examples() {
        assert!((realized_roi(0.8, 0.4, true, 0.05) - 1.5).abs() < 1e-12);
        assert_eq!(realized_roi(0.8, 0.4, false, 0.05), -1.0);
        assert_eq!(realized_roi(0.52, 0.50, true, 0.05), 0.0);
        assert_eq!(realized_roi(0.52, 0.50, false, 0.05), 0.0);
    }

    #[test]
    fn test_roi_zero_on_threshold_boundary() {
        // Each pair differs by 0.05 up to float noise in one direction or the other
        let boundary = [
            (0.55, 0.50),
            (0.45, 0.50),
            (0.60, 0.55),
            (0.40, 0.45),
            (0.35, 0.30),
            (0.25, 0.30),
            (0.95, 0.90),
            (0.05, 0.10),
        ];
        for (p, odds) in boundary {
            for a_won in [true, false] {
                assert_eq!(
                    realized_roi(p, odds, a_won, 0.05),
                    0.0,
                    "p={} odds={} a_won={}",
                    p,
                    odds,
                    a_won
                );
            }
        }
        // Just past the boundary bets on the matching side
        assert_eq!(realized_roi(0.5501, 0.50, false, 0.05), -1.0);
        assert_eq!(realized_roi(0.4499, 0.50, true, 0.05), -1.0);
    }

    #[test]
    fn test_roi_bets_team_b_on_negative_edge() {
        // Market 0.75 on A, model 0.5: back B at 0.25
        assert!((realized_roi(0.5, 0.75, false, 0.05) - 3.0).abs() < 1e-12);
        assert_eq!(realized_roi(0.5, 0.75, true, 0.05), -1.0);
    }

    #[test]
    fn test_roi_zero_for_degenerate_odds() {
        assert_eq!(realized_roi(0.9, 0.0, true, 0.05), 0.0);
        assert_eq!(realized_roi(0.1, 1.0, false, 0.05), 0.0);
    }

    #[test]
    fn test_brier_and_log_loss() {
        assert!((brier_score(0.8, true) - 0.04).abs() < 1e-12);
        assert!((brier_score(0.8, false) - 0.64).abs() < 1e-12);
        assert_eq!(brier_score(1.0, true), 0.0);
        assert!(brier_score(0.0, true) <= 1.0);

        assert!((log_loss(0.8, true, EPS) - (-(0.8f64).ln())).abs() < 1e-12);
        assert!((log_loss(0.8, false, EPS) - (-(0.2f64).ln())).abs() < 1e-9);
        // Floor keeps certainty-but-wrong finite
        assert!((log_loss(1.0, false, EPS) - (-(EPS).ln())).abs() < 1e-12);
    }

    #[test]
    fn test_prediction_correct_at_half() {
        assert!(prediction_correct(0.51, true));
        assert!(!prediction_correct(0.5, true));
        assert!(prediction_correct(0.5, false));
    }

    #[tokio::test]
    async fn test_settle_moves_pending_to_settled() {
        let (_, service) = service_with(&[record("m1", 0.8, 0.4)]).await;

        let outcome = service.settle("m1", "lakers", 110, 100).await.unwrap();
        let updated = match outcome {
            SettlementOutcome::Settled(updated) => updated,
            other => panic!("expected Settled, got {:?}", other),
        };
        let s = updated.settlement.as_ref().unwrap();
        assert_eq!(s.actual_winner, "Lakers");
        assert!(s.prediction_correct);
        assert!((s.expected_value - 1.5).abs() < 1e-12);

        let stats = service.ledger.stats().await.unwrap();
        assert_eq!(stats, LedgerStats { total: 1, pending: 0, settled: 1 });
        assert_eq!(service.ledger.get("m1").await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_settle_twice_is_idempotent() {
        let (store, service) = service_with(&[record("m1", 0.8, 0.4)]).await;
        service.settle("m1", "Celtics", 90, 101).await.unwrap();

        let before = store.get(&keys::prediction("m1")).await.unwrap();
        let again = service.settle("m1", "CELTICS", 90, 101).await.unwrap();
        assert_eq!(again, SettlementOutcome::AlreadySettled);
        assert!(!again.is_applied());

        assert_eq!(store.get(&keys::prediction("m1")).await.unwrap(), before);
        let stats = service.ledger.stats().await.unwrap();
        assert_eq!(stats, LedgerStats { total: 1, pending: 0, settled: 1 });
    }

    #[tokio::test]
    async fn test_corrected_result_resettles_once() {
        let (_, service) = service_with(&[record("m1", 0.8, 0.4)]).await;
        service.settle("m1", "Celtics", 90, 101).await.unwrap();

        let outcome = service.settle("m1", "Lakers", 102, 101).await.unwrap();
        let updated = match outcome {
            SettlementOutcome::Resettled(updated) => updated,
            other => panic!("expected Resettled, got {:?}", other),
        };
        assert!((updated.settlement.unwrap().expected_value - 1.5).abs() < 1e-12);
        assert_eq!(service.ledger.stats().await.unwrap().settled, 1);
    }

    #[tokio::test]
    async fn test_missing_prediction_and_unknown_winner() {
        let (store, service) = service_with(&[record("m1", 0.6, 0.5)]).await;

        assert_eq!(
            service.settle("nope", "Lakers", 1, 0).await.unwrap(),
            SettlementOutcome::NotFound
        );
        assert_eq!(
            service.settle("m1", "Knicks", 1, 0).await.unwrap(),
            SettlementOutcome::UnknownWinner
        );
        assert_eq!(store.set_members(keys::PENDING).await.unwrap(), vec!["m1"]);
        assert!(!service.ledger.get("m1").await.unwrap().unwrap().is_settled());
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let (store, service) = service_with(&[record("m1", 0.6, 0.5)]).await;
        store.set_unavailable(true);

        assert!(service.settle("m1", "Lakers", 1, 0).await.is_err());

        store.set_unavailable(false);
        assert_eq!(service.ledger.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_settle_many_reports_each_market() {
        let (_, service) =
            service_with(&[record("m1", 0.6, 0.5), record("m2", 0.3, 0.5)]).await;
        let outcomes = vec![
            MatchOutcome {
                market_id: "m1".to_string(),
                winner: "Lakers".to_string(),
                score_a: 100,
                score_b: 99,
            },
            MatchOutcome {
                market_id: "m3".to_string(),
                winner: "Lakers".to_string(),
                score_a: 100,
                score_b: 99,
            },
        ];

        let results = service.settle_many(&outcomes).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].1.as_ref().unwrap().is_applied());
        assert_eq!(results[1].1.as_ref().unwrap(), &SettlementOutcome::NotFound);
        assert_eq!(service.ledger.stats().await.unwrap().pending, 1);
    }

    /// Settles a market through a second service the first time any key is
    /// read, after the read itself has completed. The caller then acts on a
    /// value that is already stale.
    struct SettleAfterFirstRead {
        inner: Arc<MemoryStore>,
        competing: Mutex<Option<(SettlementService, &'static str, u32, u32)>>,
    }

    impl SettleAfterFirstRead {
        fn wrap(
            inner: Arc<MemoryStore>,
            winner: &'static str,
            score_a: u32,
            score_b: u32,
        ) -> Self {
            let config = SettlementConfig::default();
            let ledger = PredictionLedger::new(inner.clone(), config.record_ttl_secs);
            let service = SettlementService::new(ledger, config);
            Self {
                inner,
                competing: Mutex::new(Some((service, winner, score_a, score_b))),
            }
        }
    }

    #[async_trait]
    impl PredictionStore for SettleAfterFirstRead {
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            let value = self.inner.get(key).await?;
            let competing = self.competing.lock().take();
            if let Some((service, winner, score_a, score_b)) = competing {
                let outcome = service.settle("m1", winner, score_a, score_b).await.unwrap();
                assert!(matches!(outcome, SettlementOutcome::Settled(_)));
            }
            Ok(value)
        }

        async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()> {
            self.inner.set(key, value, ttl_secs).await
        }

        async fn delete(&self, key: &str) -> StoreResult<()> {
            self.inner.delete(key).await
        }

        async fn sorted_set_add(&self, key: &str, score: f64, member: &str) -> StoreResult<()> {
            self.inner.sorted_set_add(key, score, member).await
        }

        async fn sorted_set_range_by_score(
            &self,
            key: &str,
            min: f64,
            max: f64,
        ) -> StoreResult<Vec<String>> {
            self.inner.sorted_set_range_by_score(key, min, max).await
        }

        async fn sorted_set_card(&self, key: &str) -> StoreResult<usize> {
            self.inner.sorted_set_card(key).await
        }

        async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
            self.inner.set_add(key, member).await
        }

        async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
            self.inner.set_remove(key, member).await
        }

        async fn set_cardinality(&self, key: &str) -> StoreResult<usize> {
            self.inner.set_cardinality(key).await
        }

        async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
            self.inner.set_members(key).await
        }

        async fn multi_get(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
            self.inner.multi_get(keys).await
        }

        async fn atomic(&self, ops: Vec<StoreOp>) -> StoreResult<()> {
            self.inner.atomic(ops).await
        }

        async fn atomic_if(&self, guard: StoreGuard, ops: Vec<StoreOp>) -> StoreResult<bool> {
            self.inner.atomic_if(guard, ops).await
        }
    }

    async fn assert_settled_once(store: &Arc<MemoryStore>) {
        assert!(store.set_members(keys::PENDING).await.unwrap().is_empty());
        let settled = store
            .sorted_set_range_by_score(keys::SETTLED, f64::NEG_INFINITY, f64::INFINITY)
            .await
            .unwrap();
        assert_eq!(settled, vec!["m1"]);
    }

    #[tokio::test]
    async fn test_settlement_during_record_is_not_undone() {
        let (store, _) = service_with(&[record("m1", 0.6, 0.5)]).await;
        let racing = Arc::new(SettleAfterFirstRead::wrap(store.clone(), "Lakers", 1, 0));
        let ledger = PredictionLedger::new(racing, SettlementConfig::default().record_ttl_secs);

        // The replacement was derived from a pending read, but the market
        // settled before it could be written
        assert!(!ledger.record(&record("m1", 0.3, 0.5)).await.unwrap());

        let stored = ledger.get("m1").await.unwrap().unwrap();
        assert!(stored.is_settled());
        assert_eq!(stored.predicted_probability_a, 0.6);
        assert_settled_once(&store).await;
    }

    #[tokio::test]
    async fn test_settlement_racing_another_settlement_is_serialized() {
        let (store, _) = service_with(&[record("m1", 0.8, 0.4)]).await;
        let racing = Arc::new(SettleAfterFirstRead::wrap(store.clone(), "Celtics", 90, 101));
        let config = SettlementConfig::default();
        let service =
            SettlementService::new(PredictionLedger::new(racing, config.record_ttl_secs), config);

        // Scored from the pending read; the competing result commits first,
        // so this one lands as a correction of it rather than over it
        let outcome = service.settle("m1", "Lakers", 110, 100).await.unwrap();
        let updated = match outcome {
            SettlementOutcome::Resettled(updated) => updated,
            other => panic!("expected Resettled, got {:?}", other),
        };

        let stored = service.ledger.get("m1").await.unwrap().unwrap();
        assert_eq!(stored, updated);
        let s = stored.settlement.unwrap();
        assert_eq!(s.actual_winner, "Lakers");
        assert_eq!((s.actual_score_a, s.actual_score_b), (110, 100));
        assert_eq!(stored.predicted_probability_a, 0.8);
        assert_settled_once(&store).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_settlements_settle_exactly_once() {
        let (store, service) = service_with(&[record("m1", 0.8, 0.4)]).await;

        let handles: Vec<_> = ["Lakers", "Celtics", "Lakers", "Celtics"]
            .into_iter()
            .enumerate()
            .map(|(i, winner)| {
                let service = service.clone();
                tokio::spawn(async move { service.settle("m1", winner, 100 + i as u32, 95).await })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        let first = outcomes
            .iter()
            .filter(|o| matches!(o, SettlementOutcome::Settled(_)))
            .count();
        assert_eq!(first, 1);
        assert!(outcomes.iter().all(|o| o.is_applied()));

        let stored = service.ledger.get("m1").await.unwrap().unwrap();
        assert_eq!(stored.predicted_probability_a, 0.8);
        assert!(outcomes.iter().any(|o| match o {
            SettlementOutcome::Settled(r) | SettlementOutcome::Resettled(r) => *r == stored,
            _ => false,
        }));
        assert_settled_once(&store).await;
        assert_eq!(
            service.ledger.stats().await.unwrap(),
            LedgerStats { total: 1, pending: 0, settled: 1 }
        );
    }
}
