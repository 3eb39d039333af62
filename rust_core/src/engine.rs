//! Forecast engine.
//!
//! Runs the pure pipeline against the current calibration table, attaches an
//! investment decision when smart-money positioning is known, and records
//! the prediction in the ledger so it can be settled later.

use crate::config::ForecastConfig;
use crate::decision::map_decision;
use crate::error::{ForecastError, Result};
use crate::ledger::PredictionLedger;
use crate::models::{CalibrationTable, ForecastRequest, PredictionResult};
use crate::probability::{predict, predict_batch, CalibrationSource, SmartMoneySource};
use log::{info, warn};
use std::sync::Arc;

pub struct ForecastEngine {
    ledger: PredictionLedger,
    calibration: Arc<dyn CalibrationSource>,
    smart_money: Arc<dyn SmartMoneySource>,
    config: ForecastConfig,
}

impl ForecastEngine {
    pub fn new(
        ledger: PredictionLedger,
        calibration: Arc<dyn CalibrationSource>,
        smart_money: Arc<dyn SmartMoneySource>,
        config: ForecastConfig,
    ) -> Self {
        Self {
            ledger,
            calibration,
            smart_money,
            config,
        }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn ledger(&self) -> &PredictionLedger {
        &self.ledger
    }

    /// Current calibration table. An unreadable table means no correction.
    pub async fn current_calibration(&self) -> CalibrationTable {
        match self.calibration.calibration_table().await {
            Ok(table) => table,
            Err(e) => {
                warn!("Calibration table unavailable, predicting uncorrected: {}", e);
                CalibrationTable::empty()
            }
        }
    }

    /// Predict, attach the investment decision and record the prediction
    pub async fn forecast(&self, request: &ForecastRequest) -> Result<PredictionResult> {
        validate(request)?;

        let calibration = self.current_calibration().await;
        let mut result = predict(&request.inputs, &request.market, &calibration, &self.config);

        match self.smart_money.smart_money(&request.market_id).await {
            Ok(Some(signal)) => {
                result.investment = Some(map_decision(
                    result.team_a_probability,
                    &signal,
                    &self.config.decision,
                ));
            }
            Ok(None) => {}
            Err(e) => warn!("Smart money lookup failed for {}: {}", request.market_id, e),
        }

        self.ledger
            .record_result(
                &request.market_id,
                &request.team_a,
                &request.team_b,
                &result,
                &request.market,
            )
            .await?;

        info!(
            "Forecast {} {} vs {}: {:.1}% ({:?}, confidence {:.2})",
            request.market_id,
            request.team_a,
            request.team_b,
            result.team_a_probability * 100.0,
            result.recommendation,
            result.confidence
        );
        Ok(result)
    }

    /// Pure predictions for many requests against one calibration snapshot.
    /// Nothing is recorded.
    pub async fn predict_batch(&self, requests: &[ForecastRequest]) -> Vec<PredictionResult> {
        let calibration = self.current_calibration().await;
        predict_batch(requests, &calibration, &self.config)
    }
}

fn validate(request: &ForecastRequest) -> Result<()> {
    if request.market_id.trim().is_empty() {
        return Err(ForecastError::InvalidInput("market_id is empty".to_string()));
    }
    if request.team_a.trim().is_empty() || request.team_b.trim().is_empty() {
        return Err(ForecastError::InvalidInput(format!(
            "team names missing for {}",
            request.market_id
        )));
    }
    if request.team_a.trim().eq_ignore_ascii_case(request.team_b.trim()) {
        return Err(ForecastError::InvalidInput(format!(
            "{} lists {} on both sides",
            request.market_id, request.team_a
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Direction, InvestmentSignal, MarketOdds, MatchInputs, SmartMoneySignal,
    };
    use crate::performance::PerformanceAggregator;
    use crate::probability::{NoSmartMoney, StaticCalibration};
    use crate::settlement::SettlementService;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct Whales(SmartMoneySignal);

    #[async_trait]
    impl SmartMoneySource for Whales {
        async fn smart_money(&self, _market_id: &str) -> anyhow::Result<Option<SmartMoneySignal>> {
            Ok(Some(self.0))
        }
    }

    struct BrokenCalibration;

    #[async_trait]
    impl CalibrationSource for BrokenCalibration {
        async fn calibration_table(&self) -> anyhow::Result<CalibrationTable> {
            anyhow::bail!("calibration store offline")
        }
    }

    fn request(id: &str) -> ForecastRequest {
        ForecastRequest {
            market_id: id.to_string(),
            team_a: "Nuggets".to_string(),
            team_b: "Suns".to_string(),
            market: MarketOdds::new(0.5, 0.5),
            inputs: MatchInputs {
                rating_a: Some(60.0),
                rating_b: Some(50.0),
                team_a_home: Some(true),
                ..Default::default()
            },
        }
    }

    fn ledger(store: &Arc<MemoryStore>) -> PredictionLedger {
        let config = ForecastConfig::default();
        PredictionLedger::new(store.clone(), config.settlement.record_ttl_secs)
    }

    #[tokio::test]
    async fn test_forecast_records_pending_prediction() {
        let store = Arc::new(MemoryStore::new());
        let engine = ForecastEngine::new(
            ledger(&store),
            Arc::new(StaticCalibration(CalibrationTable::empty())),
            Arc::new(NoSmartMoney),
            ForecastConfig::default(),
        );

        let result = engine.forecast(&request("m1")).await.unwrap();
        assert!((result.team_a_probability - 0.713486).abs() < 1e-5);
        assert!(result.investment.is_none());

        let record = engine.ledger().get("m1").await.unwrap().unwrap();
        assert_eq!(record.predicted_probability_a, result.team_a_probability);
        assert_eq!(record.market_odds_a, 0.5);
        assert_eq!(record.model_version, "v2.1-calibrated");
        assert_eq!(engine.ledger().stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_forecast_attaches_investment_decision() {
        let store = Arc::new(MemoryStore::new());
        let engine = ForecastEngine::new(
            ledger(&store),
            Arc::new(StaticCalibration(CalibrationTable::empty())),
            Arc::new(Whales(SmartMoneySignal {
                direction: Direction::TeamA,
                concentration_pct: 70.0,
            })),
            ForecastConfig::default(),
        );

        let result = engine.forecast(&request("m1")).await.unwrap();
        let investment = result.investment.unwrap();
        // strength = |0.7135 - 0.5| * 2 = 0.427, agreeing with the whales
        assert_eq!(investment.signal, InvestmentSignal::BuyA);
    }

    #[tokio::test]
    async fn test_broken_calibration_falls_back_to_uncorrected() {
        let store = Arc::new(MemoryStore::new());
        let engine = ForecastEngine::new(
            ledger(&store),
            Arc::new(BrokenCalibration),
            Arc::new(NoSmartMoney),
            ForecastConfig::default(),
        );
        let result = engine.forecast(&request("m1")).await.unwrap();
        assert!((result.team_a_probability - 0.713486).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_without_write() {
        let store = Arc::new(MemoryStore::new());
        let engine = ForecastEngine::new(
            ledger(&store),
            Arc::new(StaticCalibration(CalibrationTable::empty())),
            Arc::new(NoSmartMoney),
            ForecastConfig::default(),
        );

        let mut bad = request("m1");
        bad.team_b = "nuggets".to_string();
        assert!(matches!(
            engine.forecast(&bad).await,
            Err(ForecastError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.forecast(&request(" ")).await,
            Err(ForecastError::InvalidInput(_))
        ));
        assert_eq!(engine.ledger().stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_predict_batch_does_not_record() {
        let store = Arc::new(MemoryStore::new());
        let engine = ForecastEngine::new(
            ledger(&store),
            Arc::new(StaticCalibration(CalibrationTable::empty())),
            Arc::new(NoSmartMoney),
            ForecastConfig::default(),
        );
        let results = engine.predict_batch(&[request("a"), request("b")]).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], results[1]);
        assert_eq!(engine.ledger().stats().await.unwrap().total, 0);
    }

    /// Predictions settle, calibration regenerates, and the next forecast
    /// in the same bin is corrected.
    #[tokio::test]
    async fn test_settlement_feeds_back_into_calibration() {
        let store = Arc::new(MemoryStore::new());
        let config = ForecastConfig::default();
        let ledger = ledger(&store);
        let aggregator = Arc::new(PerformanceAggregator::new(
            ledger.clone(),
            config.calibration,
        ));
        let engine = ForecastEngine::new(
            ledger.clone(),
            aggregator.clone(),
            Arc::new(NoSmartMoney),
            config.clone(),
        );
        let settlement = SettlementService::new(ledger.clone(), config.settlement);

        let baseline = engine.forecast(&request("base")).await.unwrap();
        assert_eq!(baseline.raw_probability, baseline.calibrated_probability);

        // Team A always wins from the same raw bin: the model is underconfident
        for i in 0..30 {
            let id = format!("m{}", i);
            engine.forecast(&request(&id)).await.unwrap();
            let outcome = settlement.settle(&id, "Nuggets", 100, 90).await.unwrap();
            assert!(outcome.is_applied());
        }

        let table = aggregator.generate_calibration_table().await.unwrap();
        let bin = table.lookup(baseline.raw_probability).unwrap();
        assert_eq!(bin.sample_size, 30);

        let corrected = engine.forecast(&request("next")).await.unwrap();
        assert!(corrected.calibrated_probability > corrected.raw_probability);
        assert!(corrected.team_a_probability > baseline.team_a_probability);
        assert!(corrected.team_a_probability <= 0.95);
    }
}
