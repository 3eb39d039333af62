//! Confidence estimation from data availability and factor agreement.

use crate::config::ConfidenceConfig;
use crate::models::Factor;

/// True when at least two factors clear the noise band and all of them
/// point the same way
pub fn factors_agree(factors: &[Factor], noise_threshold: f64) -> bool {
    let significant: Vec<f64> = factors
        .iter()
        .map(|f| f.score)
        .filter(|s| s.abs() > noise_threshold)
        .collect();

    significant.len() >= 2
        && (significant.iter().all(|s| *s > 0.0) || significant.iter().all(|s| *s < 0.0))
}

pub fn estimate_confidence(
    factors: &[Factor],
    has_head_to_head: bool,
    has_advanced_stats: bool,
    config: &ConfidenceConfig,
) -> f64 {
    let mut confidence = config.base;
    if has_head_to_head {
        confidence += config.head_to_head_bonus;
    }
    if has_advanced_stats {
        confidence += config.advanced_stats_bonus;
    }
    if factors_agree(factors, config.noise_threshold) {
        confidence += config.consensus_bonus;
    }
    confidence.min(config.max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factor(score: f64) -> Factor {
        Factor::new("f", score, 0.1, String::new(), "")
    }

    #[test]
    fn test_base_confidence() {
        let c = estimate_confidence(&[], false, false, &ConfidenceConfig::default());
        assert!((c - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_agreement_ignores_noise() {
        assert!(factors_agree(&[factor(40.0), factor(5.0), factor(-8.0), factor(12.0)], 10.0));
        assert!(!factors_agree(&[factor(40.0), factor(-12.0)], 10.0));
        assert!(!factors_agree(&[factor(40.0)], 10.0));
        assert!(factors_agree(&[factor(-40.0), factor(-11.0)], 10.0));
    }

    #[test]
    fn test_confidence_increments_and_cap() {
        let cfg = ConfidenceConfig::default();
        let factors = [factor(50.0), factor(20.0)];
        let c = estimate_confidence(&factors, true, true, &cfg);
        assert!((c - 0.88).abs() < 1e-12);

        let generous = ConfidenceConfig {
            consensus_bonus: 0.5,
            ..cfg
        };
        assert_eq!(estimate_confidence(&factors, true, true, &generous), 0.98);
    }
}
