//! Score-to-probability transform.
//!
//! Steps, in order:
//! 1. Weighted mean of factor scores, plus the synergy bonus
//! 2. Logistic mapping with a steepness driven by confidence and factor count
//! 3. Bias correction from the published calibration table
//! 4. Bayesian blend with the market price (and head-to-head rate, if any)
//! 5. Final clamp away from certainty

use crate::config::TransformConfig;
use crate::models::{CalibrationTable, Factor};

/// Logistic function for probability calculation
#[inline]
fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformOutput {
    pub final_score: f64,
    pub steepness: f64,
    pub raw_probability: f64,
    pub calibrated_probability: f64,
    pub probability: f64,
}

/// Weighted mean of factor scores
pub fn weighted_score(factors: &[Factor]) -> f64 {
    let total_weight: f64 = factors.iter().map(|f| f.weight).sum();
    if total_weight <= 0.0 {
        // Fatigue always contributes, so this only happens for hand-built inputs
        return 0.0;
    }
    factors.iter().map(Factor::weighted_score).sum::<f64>() / total_weight
}

/// Sigmoid steepness. Lower confidence gives a larger K and pulls the
/// estimate toward 0.5.
pub fn dynamic_steepness(confidence: f64, factor_count: usize, config: &TransformConfig) -> f64 {
    let confidence_scale = 0.7 + 0.6 * (1.0 - confidence);
    let count_scale = (1.0 - (factor_count as f64 - 5.0) * 0.05).max(0.8);
    (config.base_k * confidence_scale * count_scale).clamp(config.min_k, config.max_k)
}

#[inline]
pub fn clamp_probability(p: f64, config: &TransformConfig) -> f64 {
    p.clamp(config.min_probability, config.max_probability)
}

/// Shift `raw` by the bin's observed bias when the bin has enough samples
pub fn apply_calibration(raw: f64, table: &CalibrationTable, config: &TransformConfig) -> f64 {
    match table.lookup(raw) {
        Some(bin) if bin.sample_size >= config.min_calibration_samples => {
            clamp_probability(raw + (bin.actual_win_rate - bin.midpoint()), config)
        }
        _ => raw,
    }
}

/// Confidence-weighted average of market, model and head-to-head rate
pub fn blend_with_market(
    model_probability: f64,
    market_probability: f64,
    head_to_head_rate: Option<f64>,
    confidence: f64,
    config: &TransformConfig,
) -> f64 {
    let mut weighted = Vec::with_capacity(3);
    weighted.push((market_probability, config.prior_weight_base * (1.0 - confidence)));
    weighted.push((model_probability, config.model_weight_base * confidence));
    if let Some(rate) = head_to_head_rate {
        weighted.push((rate, config.head_to_head_blend_weight));
    }

    let total: f64 = weighted.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return model_probability;
    }
    weighted.iter().map(|(p, w)| p * w).sum::<f64>() / total
}

pub fn transform(
    factors: &[Factor],
    synergy_bonus: f64,
    confidence: f64,
    calibration: &CalibrationTable,
    market_probability: f64,
    head_to_head_rate: Option<f64>,
    config: &TransformConfig,
) -> TransformOutput {
    let final_score = weighted_score(factors) + synergy_bonus;
    let steepness = dynamic_steepness(confidence, factors.len(), config);
    let raw_probability = logistic(final_score / steepness);
    let calibrated_probability = apply_calibration(raw_probability, calibration, config);
    let blended = blend_with_market(
        calibrated_probability,
        market_probability,
        head_to_head_rate,
        confidence,
        config,
    );

    TransformOutput {
        final_score,
        steepness,
        raw_probability,
        calibrated_probability,
        probability: clamp_probability(blended, config),
    }
}
