//! Match win-probability pipeline.
//!
//! Factor scoring -> synergy -> confidence -> transform -> recommendation.
//! Everything in here is a pure function of `(inputs, config, calibration)`;
//! the calibration table and smart-money signal come from injected sources
//! so the pipeline can be exercised without a store.

use crate::config::ForecastConfig;
use crate::decision;
use crate::models::{
    CalibrationTable, ForecastRequest, MarketOdds, MatchInputs, PredictionResult,
    SmartMoneySignal,
};
use anyhow::Result;
use async_trait::async_trait;
use rayon::prelude::*;

pub mod confidence;
pub mod factors;
pub mod synergy;
pub mod transform;

/// Source of the calibration curve applied in the transform
#[async_trait]
pub trait CalibrationSource: Send + Sync {
    async fn calibration_table(&self) -> Result<CalibrationTable>;
}

/// Source of large-holder positioning for a market
#[async_trait]
pub trait SmartMoneySource: Send + Sync {
    async fn smart_money(&self, market_id: &str) -> Result<Option<SmartMoneySignal>>;
}

/// Fixed calibration table, mostly for tests and offline replays
pub struct StaticCalibration(pub CalibrationTable);

#[async_trait]
impl CalibrationSource for StaticCalibration {
    async fn calibration_table(&self) -> Result<CalibrationTable> {
        Ok(self.0.clone())
    }
}

/// No smart-money collaborator wired in
pub struct NoSmartMoney;

#[async_trait]
impl SmartMoneySource for NoSmartMoney {
    async fn smart_money(&self, _market_id: &str) -> Result<Option<SmartMoneySignal>> {
        Ok(None)
    }
}

/// Run the full pipeline for one match
pub fn predict(
    inputs: &MatchInputs,
    market: &MarketOdds,
    calibration: &CalibrationTable,
    config: &ForecastConfig,
) -> PredictionResult {
    let factors = factors::score_factors(inputs, &config.factors);

    let default_rest = config.factors.rest.default_rest_days;
    let rest_a = inputs.rest_days_a.unwrap_or(default_rest);
    let rest_b = inputs.rest_days_b.unwrap_or(default_rest);
    let synergy = synergy::evaluate_synergy(
        &factors,
        rest_a,
        rest_b,
        inputs.team_a_home,
        &config.synergy,
    );

    let head_to_head = inputs.head_to_head_history();
    let confidence = confidence::estimate_confidence(
        &factors,
        head_to_head.is_some(),
        inputs.has_advanced_stats(),
        &config.confidence,
    );

    let market_probability_a = market.implied_probability_a();
    let output = transform::transform(
        &factors,
        synergy.bonus,
        confidence,
        calibration,
        market_probability_a,
        head_to_head.map(|h| h.win_rate_a),
        &config.transform,
    );

    let team_a_probability = output.probability;
    let market_value = decision::market_value(team_a_probability, market_probability_a, &config.decision);
    let recommendation = decision::recommend(market_value.edge, &config.decision);

    let mut reasoning = Vec::new();
    let mut ranked: Vec<_> = factors.iter().filter(|f| f.score != 0.0).collect();
    ranked.sort_by(|a, b| {
        b.weighted_score()
            .abs()
            .total_cmp(&a.weighted_score().abs())
    });
    for factor in ranked.iter().take(3) {
        let side = if factor.score > 0.0 { "team A" } else { "team B" };
        reasoning.push(format!("{} {} favors {}: {}", factor.icon, factor.name, side, factor.description));
    }
    reasoning.extend(synergy.notes.iter().cloned());
    if output.calibrated_probability != output.raw_probability {
        reasoning.push(format!(
            "Calibration adjusted {:.1}% -> {:.1}%",
            output.raw_probability * 100.0,
            output.calibrated_probability * 100.0
        ));
    }
    reasoning.push(format!(
        "Model {:.1}% vs market {:.1}% (edge {:+.1}%)",
        team_a_probability * 100.0,
        market_probability_a * 100.0,
        market_value.edge * 100.0
    ));

    PredictionResult {
        team_a_probability,
        team_b_probability: 1.0 - team_a_probability,
        confidence,
        factors,
        recommendation,
        market_value,
        reasoning,
        model_version: config.model_version.clone(),
        synergy_bonus: synergy.bonus,
        raw_probability: output.raw_probability,
        calibrated_probability: output.calibrated_probability,
        investment: None,
    }
}

/// Batch predictions for many requests.
///
/// Uses parallel processing for optimal performance.
pub fn predict_batch(
    requests: &[ForecastRequest],
    calibration: &CalibrationTable,
    config: &ForecastConfig,
) -> Vec<PredictionResult> {
    requests
        .par_iter()
        .map(|r| predict(&r.inputs, &r.market, calibration, config))
        .collect()
}
