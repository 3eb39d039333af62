//! Synergy rules.
//!
//! A short, fixed rule set for interactions the linear weighting misses.
//! Positive bonus favors team A.

use super::factors::INJURIES;
use crate::config::SynergyConfig;
use crate::models::Factor;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynergyAssessment {
    pub bonus: f64,
    pub notes: Vec<String>,
}

pub fn evaluate_synergy(
    factors: &[Factor],
    rest_a: u32,
    rest_b: u32,
    team_a_home: Option<bool>,
    config: &SynergyConfig,
) -> SynergyAssessment {
    let mut assessment = SynergyAssessment::default();

    let rested = |days: u32| days >= config.well_rested_days;
    let back_to_back = |days: u32| days <= config.back_to_back_days;

    // Rested home side against a back-to-back visitor
    match team_a_home {
        Some(true) if rested(rest_a) && back_to_back(rest_b) => {
            assessment.bonus += config.rested_home_bonus;
            assessment
                .notes
                .push("Rested home side facing a back-to-back opponent".to_string());
        }
        Some(false) if rested(rest_b) && back_to_back(rest_a) => {
            assessment.bonus -= config.rested_home_bonus;
            assessment
                .notes
                .push("Team A on a back-to-back at a rested home side".to_string());
        }
        _ => {}
    }

    // Injury-depleted and tired compounds beyond the two weighted factors
    let injury_score = factors
        .iter()
        .find(|f| f.name == INJURIES)
        .map(|f| f.score)
        .unwrap_or(0.0);

    if injury_score < -config.injury_deficit_threshold && back_to_back(rest_a) {
        assessment.bonus -= config.depleted_fatigue_penalty;
        assessment
            .notes
            .push("Team A shorthanded on a back-to-back".to_string());
    } else if injury_score > config.injury_deficit_threshold && back_to_back(rest_b) {
        assessment.bonus += config.depleted_fatigue_penalty;
        assessment
            .notes
            .push("Team B shorthanded on a back-to-back".to_string());
    }

    assessment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn injury(score: f64) -> Factor {
        Factor::new(INJURIES, score, 0.15, String::new(), "")
    }

    #[test]
    fn test_no_synergy_by_default() {
        let s = evaluate_synergy(&[], 3, 3, None, &SynergyConfig::default());
        assert_eq!(s.bonus, 0.0);
        assert!(s.notes.is_empty());
    }

    #[test]
    fn test_rested_home_bonus_is_symmetric() {
        let cfg = SynergyConfig::default();
        let home = evaluate_synergy(&[], 3, 1, Some(true), &cfg);
        assert_eq!(home.bonus, 8.0);
        let away = evaluate_synergy(&[], 1, 3, Some(false), &cfg);
        assert_eq!(away.bonus, -8.0);
        // Home but opponent rested: nothing
        let none = evaluate_synergy(&[], 3, 2, Some(true), &cfg);
        assert_eq!(none.bonus, 0.0);
    }

    #[test]
    fn test_depleted_and_tired_penalty() {
        let cfg = SynergyConfig::default();
        let s = evaluate_synergy(&[injury(-30.0)], 1, 3, None, &cfg);
        assert_eq!(s.bonus, -6.0);
        let s = evaluate_synergy(&[injury(30.0)], 3, 0, None, &cfg);
        assert_eq!(s.bonus, 6.0);
        // Deficit at the threshold is not "large"
        let s = evaluate_synergy(&[injury(-20.0)], 1, 3, None, &cfg);
        assert_eq!(s.bonus, 0.0);
    }

    #[test]
    fn test_rules_stack() {
        let cfg = SynergyConfig::default();
        let s = evaluate_synergy(&[injury(25.0)], 4, 1, Some(true), &cfg);
        assert_eq!(s.bonus, 14.0);
        assert_eq!(s.notes.len(), 2);
    }
}
