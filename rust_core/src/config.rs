//! Forecast configuration.
//!
//! Every rule table the pipeline consults lives here as plain immutable data:
//! - Factor weights and multipliers
//! - Injury penalties and the rest-day curve
//! - Synergy, transform and confidence constants
//! - Decision thresholds
//! - Settlement and calibration constants
//!
//! The whole pipeline is a function of `(inputs, &ForecastConfig)`.

use std::env;

/// Weight of each factor in the weighted mean
#[derive(Debug, Clone, Copy)]
pub struct FactorWeights {
    pub team_strength: f64,
    pub form: f64,
    pub injuries: f64,
    pub head_to_head: f64,
    pub offense: f64,
    pub fatigue: f64,
    pub home: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            team_strength: 0.25,
            form: 0.15,
            injuries: 0.15,
            head_to_head: 0.10,
            offense: 0.10,
            fatigue: 0.10,
            home: 0.15,
        }
    }
}

/// Per-player penalty by injury status (negative = hurts the team)
#[derive(Debug, Clone, Copy)]
pub struct InjuryPenalties {
    pub out: f64,
    pub doubtful: f64,
    pub questionable: f64,
    pub day_to_day: f64,
}

impl Default for InjuryPenalties {
    fn default() -> Self {
        Self {
            out: -15.0,
            doubtful: -9.0,
            questionable: -4.0,
            day_to_day: -2.0,
        }
    }
}

/// Rest-day step function
#[derive(Debug, Clone, Copy)]
pub struct RestCurve {
    /// 0 or 1 day of rest (back-to-back)
    pub back_to_back: f64,
    pub two_days: f64,
    pub three_days: f64,
    /// 4+ days
    pub extended: f64,
    /// Rest assumed when the caller has no schedule data
    pub default_rest_days: u32,
}

impl Default for RestCurve {
    fn default() -> Self {
        Self {
            back_to_back: -10.0,
            two_days: 0.0,
            three_days: 5.0,
            extended: 8.0,
            default_rest_days: 3,
        }
    }
}

impl RestCurve {
    pub fn value(&self, rest_days: u32) -> f64 {
        match rest_days {
            0 | 1 => self.back_to_back,
            2 => self.two_days,
            3 => self.three_days,
            _ => self.extended,
        }
    }
}

/// Factor scoring constants
#[derive(Debug, Clone, Copy)]
pub struct FactorConfig {
    pub weights: FactorWeights,
    pub injuries: InjuryPenalties,
    pub rest: RestCurve,
    /// Shared clamp for every factor score
    pub factor_bound: f64,
    pub rating_multiplier: f64,
    pub form_lookback: usize,
    pub form_multiplier: f64,
    pub head_to_head_multiplier: f64,
    pub offense_multiplier: f64,
    pub fatigue_multiplier: f64,
    pub home_advantage: f64,
}

impl Default for FactorConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            injuries: InjuryPenalties::default(),
            rest: RestCurve::default(),
            factor_bound: 100.0,
            rating_multiplier: 8.0,
            form_lookback: 5,
            form_multiplier: 15.0,
            head_to_head_multiplier: 150.0,
            offense_multiplier: 400.0,
            fatigue_multiplier: 2.0,
            home_advantage: 15.0,
        }
    }
}

/// Interaction rules between factors
#[derive(Debug, Clone, Copy)]
pub struct SynergyConfig {
    /// Home side rested while the opponent plays a back-to-back
    pub rested_home_bonus: f64,
    /// Injury-depleted side also on a back-to-back
    pub depleted_fatigue_penalty: f64,
    pub injury_deficit_threshold: f64,
    pub well_rested_days: u32,
    pub back_to_back_days: u32,
}

impl Default for SynergyConfig {
    fn default() -> Self {
        Self {
            rested_home_bonus: 8.0,
            depleted_fatigue_penalty: 6.0,
            injury_deficit_threshold: 20.0,
            well_rested_days: 3,
            back_to_back_days: 1,
        }
    }
}

/// Sigmoid, calibration and market blend constants
#[derive(Debug, Clone, Copy)]
pub struct TransformConfig {
    pub base_k: f64,
    pub min_k: f64,
    pub max_k: f64,
    pub min_probability: f64,
    pub max_probability: f64,
    pub prior_weight_base: f64,
    pub model_weight_base: f64,
    pub head_to_head_blend_weight: f64,
    /// Bins with fewer settled samples never move the estimate
    pub min_calibration_samples: u32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            base_k: 40.0,
            min_k: 25.0,
            max_k: 60.0,
            min_probability: 0.05,
            max_probability: 0.95,
            prior_weight_base: 0.3,
            model_weight_base: 0.7,
            head_to_head_blend_weight: 0.15,
            min_calibration_samples: 30,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceConfig {
    pub base: f64,
    pub head_to_head_bonus: f64,
    pub advanced_stats_bonus: f64,
    pub consensus_bonus: f64,
    /// Factors inside +/- this band don't vote on consensus
    pub noise_threshold: f64,
    pub max: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            base: 0.6,
            head_to_head_bonus: 0.10,
            advanced_stats_bonus: 0.10,
            consensus_bonus: 0.08,
            noise_threshold: 10.0,
            max: 0.98,
        }
    }
}

/// Thresholds for the investment decision and edge recommendation
#[derive(Debug, Clone, Copy)]
pub struct DecisionConfig {
    pub agreement_strength: f64,
    pub strong_strength: f64,
    pub weak_strength: f64,
    /// Whale concentration (percent) above which conflicts are riskier
    pub high_concentration_pct: f64,
    pub value_edge: f64,
    pub strong_value_edge: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            agreement_strength: 0.3,
            strong_strength: 0.5,
            weak_strength: 0.2,
            high_concentration_pct: 50.0,
            value_edge: 0.05,
            strong_value_edge: 0.10,
        }
    }
}

/// Settlement scoring and ledger retention
#[derive(Debug, Clone, Copy)]
pub struct SettlementConfig {
    /// Minimum |p - market| before a hypothetical bet is scored
    pub edge_threshold: f64,
    /// Probability floor inside log loss
    pub log_loss_epsilon: f64,
    pub record_ttl_secs: u64,
    pub max_write_attempts: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 0.05,
            log_loss_epsilon: 1e-4,
            record_ttl_secs: 30 * 24 * 60 * 60, // 30 days
            max_write_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationConfig {
    pub lookback_days: u32,
    pub table_bins: usize,
    pub score_bins: usize,
    /// Minimum samples for a bin to count toward the calibration score
    pub score_min_samples: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            table_bins: 5,
            score_bins: 10,
            score_min_samples: 5,
        }
    }
}

/// Top-level configuration shared by every component
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    pub model_version: String,
    pub factors: FactorConfig,
    pub synergy: SynergyConfig,
    pub transform: TransformConfig,
    pub confidence: ConfidenceConfig,
    pub decision: DecisionConfig,
    pub settlement: SettlementConfig,
    pub calibration: CalibrationConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            model_version: "v2.1-calibrated".to_string(),
            factors: FactorConfig::default(),
            synergy: SynergyConfig::default(),
            transform: TransformConfig::default(),
            confidence: ConfidenceConfig::default(),
            decision: DecisionConfig::default(),
            settlement: SettlementConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl ForecastConfig {
    /// Create config from environment variables with fallback to provided defaults
    pub fn from_env_with_defaults(defaults: Self) -> Self {
        let mut config = defaults;

        if let Ok(version) = env::var("MODEL_VERSION") {
            if !version.trim().is_empty() {
                config.model_version = version.trim().to_string();
            }
        }
        config.settlement.edge_threshold = env::var("EDGE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.settlement.edge_threshold);
        config.transform.min_calibration_samples = env::var("MIN_CALIBRATION_SAMPLES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.transform.min_calibration_samples);
        config.transform.base_k = env::var("BASE_K")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|k: &f64| *k > 0.0)
            .unwrap_or(config.transform.base_k);
        config.calibration.lookback_days = env::var("CALIBRATION_LOOKBACK_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.calibration.lookback_days);

        config
    }

    /// Log current configuration (useful at startup)
    pub fn log_config(&self) {
        log::info!("ForecastConfig loaded:");
        log::info!("  model_version: {}", self.model_version);
        log::info!("  edge_threshold: {:.3}", self.settlement.edge_threshold);
        log::info!(
            "  sigmoid K: base={:.1} range=[{:.1}, {:.1}]",
            self.transform.base_k,
            self.transform.min_k,
            self.transform.max_k
        );
        log::info!(
            "  calibration: lookback={}d min_samples={}",
            self.calibration.lookback_days,
            self.transform.min_calibration_samples
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_curve_steps() {
        let rest = RestCurve::default();
        assert_eq!(rest.value(0), -10.0);
        assert_eq!(rest.value(1), -10.0);
        assert_eq!(rest.value(2), 0.0);
        assert_eq!(rest.value(3), 5.0);
        assert_eq!(rest.value(4), 8.0);
        assert_eq!(rest.value(12), 8.0);
    }

    #[test]
    fn test_injury_penalties_strictly_ordered() {
        let p = InjuryPenalties::default();
        assert!(p.out.abs() > p.doubtful.abs());
        assert!(p.doubtful.abs() > p.questionable.abs());
        assert!(p.questionable.abs() > p.day_to_day.abs());
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = FactorWeights::default();
        let sum = w.team_strength + w.form + w.injuries + w.head_to_head + w.offense + w.fatigue + w.home;
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
