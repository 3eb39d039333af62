//! Factor scoring.
//!
//! Converts raw match signals into bounded, signed factors. Positive scores
//! favor team A. A missing input drops its factor instead of inventing a
//! neutral value, except fatigue, which always contributes (rest defaults
//! to the configured neutral value).

use crate::config::{FactorConfig, InjuryPenalties};
use crate::models::{AdvancedStats, Factor, HeadToHead, InjuryReport, MatchInputs};

pub const TEAM_STRENGTH: &str = "Team Strength";
pub const RECENT_FORM: &str = "Recent Form";
pub const INJURIES: &str = "Injuries";
pub const HEAD_TO_HEAD: &str = "Head to Head";
pub const OFFENSE: &str = "Offensive Efficiency";
pub const FATIGUE: &str = "Rest & Fatigue";
pub const HOME_ADVANTAGE: &str = "Home Advantage";

#[inline]
fn clamp_score(score: f64, bound: f64) -> f64 {
    score.clamp(-bound, bound)
}

/// Build every factor the inputs support, in a fixed order
pub fn score_factors(inputs: &MatchInputs, config: &FactorConfig) -> Vec<Factor> {
    let mut factors = Vec::with_capacity(7);

    if let (Some(a), Some(b)) = (inputs.rating_a, inputs.rating_b) {
        factors.push(team_strength_factor(a, b, config));
    }
    if let (Some(a), Some(b)) = (inputs.form_a.as_deref(), inputs.form_b.as_deref()) {
        factors.push(form_factor(a, b, config));
    }
    if inputs.injuries_a.is_some() || inputs.injuries_b.is_some() {
        factors.push(injury_factor(
            inputs.injuries_a.as_deref().unwrap_or(&[]),
            inputs.injuries_b.as_deref().unwrap_or(&[]),
            config,
        ));
    }
    if let Some(h2h) = inputs.head_to_head_history() {
        factors.push(head_to_head_factor(&h2h, config));
    }
    if let (Some(a), Some(b)) = (inputs.advanced_a.as_ref(), inputs.advanced_b.as_ref()) {
        factors.push(offense_factor(a, b, config));
    }

    let default_rest = config.rest.default_rest_days;
    factors.push(fatigue_factor(
        inputs.rest_days_a.unwrap_or(default_rest),
        inputs.rest_days_b.unwrap_or(default_rest),
        config,
    ));

    if let Some(home) = inputs.team_a_home {
        factors.push(home_factor(home, config));
    }

    factors
}

pub fn team_strength_factor(rating_a: f64, rating_b: f64, config: &FactorConfig) -> Factor {
    let diff = rating_a - rating_b;
    let score = clamp_score(diff * config.rating_multiplier, config.factor_bound);
    Factor::new(
        TEAM_STRENGTH,
        score,
        config.weights.team_strength,
        format!("Rating {:.1} vs {:.1} ({:+.1})", rating_a, rating_b, diff),
        "💪",
    )
}

/// Wins among the last `lookback` results. Short strings count the missing
/// games as losses.
pub fn recent_wins(form: &str, lookback: usize) -> usize {
    let results: Vec<char> = form
        .chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| matches!(c, 'W' | 'L' | 'D'))
        .collect();
    let start = results.len().saturating_sub(lookback);
    results[start..].iter().filter(|c| **c == 'W').count()
}

pub fn form_factor(form_a: &str, form_b: &str, config: &FactorConfig) -> Factor {
    let lookback = config.form_lookback;
    let wins_a = recent_wins(form_a, lookback);
    let wins_b = recent_wins(form_b, lookback);
    let score = clamp_score(
        (wins_a as f64 - wins_b as f64) * config.form_multiplier,
        config.factor_bound,
    );
    Factor::new(
        RECENT_FORM,
        score,
        config.weights.form,
        format!(
            "{}/{} vs {}/{} wins in last {} games",
            wins_a, lookback, wins_b, lookback, lookback
        ),
        "📈",
    )
}

/// Penalty for one status string (0 for statuses outside the vocabulary)
pub fn injury_penalty(status: &str, penalties: &InjuryPenalties) -> f64 {
    let status = status.to_lowercase();
    // "doubtful" and "questionable" first so nothing else shadows them
    if status.contains("doubtful") {
        penalties.doubtful
    } else if status.contains("questionable") {
        penalties.questionable
    } else if status.contains("day-to-day")
        || status.contains("day to day")
        || status.contains("dtd")
    {
        penalties.day_to_day
    } else if status
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == "out")
    {
        penalties.out
    } else {
        0.0
    }
}

pub fn team_injury_penalty(reports: &[InjuryReport], penalties: &InjuryPenalties) -> f64 {
    reports
        .iter()
        .map(|r| injury_penalty(&r.status, penalties))
        .sum()
}

pub fn injury_factor(
    injuries_a: &[InjuryReport],
    injuries_b: &[InjuryReport],
    config: &FactorConfig,
) -> Factor {
    let penalty_a = team_injury_penalty(injuries_a, &config.injuries);
    let penalty_b = team_injury_penalty(injuries_b, &config.injuries);
    let score = clamp_score(penalty_a - penalty_b, config.factor_bound);
    Factor::new(
        INJURIES,
        score,
        config.weights.injuries,
        format!(
            "{} injured ({:.0}) vs {} injured ({:.0})",
            injuries_a.len(),
            penalty_a,
            injuries_b.len(),
            penalty_b
        ),
        "🏥",
    )
}

pub fn head_to_head_factor(h2h: &HeadToHead, config: &FactorConfig) -> Factor {
    let score = clamp_score(
        (h2h.win_rate_a - 0.5) * config.head_to_head_multiplier,
        config.factor_bound,
    );
    Factor::new(
        HEAD_TO_HEAD,
        score,
        config.weights.head_to_head,
        format!(
            "Won {:.0}% of {} previous meetings",
            h2h.win_rate_a * 100.0,
            h2h.games
        ),
        "⚔️",
    )
}

pub fn offense_factor(a: &AdvancedStats, b: &AdvancedStats, config: &FactorConfig) -> Factor {
    let diff = a.effective_fg_pct - b.effective_fg_pct;
    let score = clamp_score(diff * config.offense_multiplier, config.factor_bound);
    Factor::new(
        OFFENSE,
        score,
        config.weights.offense,
        format!(
            "eFG% {:.1} vs {:.1}",
            a.effective_fg_pct * 100.0,
            b.effective_fg_pct * 100.0
        ),
        "🎯",
    )
}

pub fn fatigue_factor(rest_a: u32, rest_b: u32, config: &FactorConfig) -> Factor {
    let value_a = config.rest.value(rest_a);
    let value_b = config.rest.value(rest_b);
    let score = clamp_score(
        (value_a - value_b) * config.fatigue_multiplier,
        config.factor_bound,
    );
    Factor::new(
        FATIGUE,
        score,
        config.weights.fatigue,
        format!("{} vs {} days of rest", rest_a, rest_b),
        "😴",
    )
}

pub fn home_factor(team_a_home: bool, config: &FactorConfig) -> Factor {
    let (score, description) = if team_a_home {
        (config.home_advantage, "Team A at home")
    } else {
        (-config.home_advantage, "Team B at home")
    };
    Factor::new(
        HOME_ADVANTAGE,
        clamp_score(score, config.factor_bound),
        config.weights.home,
        description.to_string(),
        "🏠",
    )
}
