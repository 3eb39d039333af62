//! Investment decision mapping.
//!
//! Combines the model's direction with smart-money positioning into one of
//! eight signals. Pure and deterministic; exactly one branch is taken.

use crate::config::DecisionConfig;
use crate::models::{
    Direction, InvestmentDecision, InvestmentSignal, MarketValue, Recommendation, SmartMoneySignal,
};

/// |p - 0.5| * 2, in [0, 1]
#[inline]
pub fn directional_strength(probability_a: f64) -> f64 {
    ((probability_a - 0.5).abs() * 2.0).min(1.0)
}

pub fn model_direction(probability_a: f64) -> Direction {
    if probability_a > 0.5 {
        Direction::TeamA
    } else if probability_a < 0.5 {
        Direction::TeamB
    } else {
        Direction::Neutral
    }
}

fn side_label(direction: Direction) -> &'static str {
    match direction {
        Direction::TeamA => "team A",
        Direction::TeamB => "team B",
        Direction::Neutral => "neither side",
    }
}

fn buy_signal(direction: Direction, strong: bool) -> InvestmentSignal {
    match (direction, strong) {
        (Direction::TeamA, true) => InvestmentSignal::StrongBuyA,
        (Direction::TeamA, false) => InvestmentSignal::BuyA,
        (Direction::TeamB, true) => InvestmentSignal::StrongBuyB,
        (Direction::TeamB, false) => InvestmentSignal::BuyB,
        (Direction::Neutral, _) => InvestmentSignal::Hold,
    }
}

fn hold(reasoning: String) -> InvestmentDecision {
    InvestmentDecision {
        signal: InvestmentSignal::Hold,
        confidence: 30.0,
        reasoning,
    }
}

pub fn map_decision(
    probability_a: f64,
    smart_money: &SmartMoneySignal,
    config: &DecisionConfig,
) -> InvestmentDecision {
    let strength = directional_strength(probability_a);
    let model = model_direction(probability_a);
    let whales = smart_money.direction;
    let concentration = smart_money.concentration_pct.clamp(0.0, 100.0);

    let both_sided = model != Direction::Neutral && whales != Direction::Neutral;

    // 1. Model and smart money agree with real conviction
    if both_sided && model == whales && strength > config.agreement_strength {
        let confidence = (60.0 + strength * 40.0).min(95.0);
        return InvestmentDecision {
            signal: buy_signal(model, strength > config.strong_strength),
            confidence,
            reasoning: format!(
                "Model ({:.0}% strength) and smart money both favor {}",
                strength * 100.0,
                side_label(model)
            ),
        };
    }

    // 2. Opposing views
    if both_sided && model != whales {
        let penalty = if concentration > config.high_concentration_pct {
            25.0
        } else {
            10.0
        };
        return InvestmentDecision {
            signal: InvestmentSignal::ConflictWarning,
            confidence: 40.0 - penalty,
            reasoning: format!(
                "Model favors {} but smart money ({:.0}% concentration) favors {}",
                side_label(model),
                concentration,
                side_label(whales)
            ),
        };
    }

    // 3. No smart-money view: model alone
    if whales == Direction::Neutral {
        if strength > config.agreement_strength && model != Direction::Neutral {
            return InvestmentDecision {
                signal: buy_signal(model, false),
                confidence: (45.0 + strength * 40.0).min(85.0),
                reasoning: format!(
                    "Smart money neutral; model favors {} on its own",
                    side_label(model)
                ),
            };
        }
        return hold("Smart money neutral and model signal weak".to_string());
    }

    // 4. Weak model, clear smart money
    if strength < config.weak_strength {
        let signal = match whales {
            Direction::TeamA => InvestmentSignal::FollowSmartMoneyA,
            _ => InvestmentSignal::FollowSmartMoneyB,
        };
        return InvestmentDecision {
            signal,
            confidence: (30.0 + concentration * 0.5).min(75.0),
            reasoning: format!(
                "Model undecided; following smart money toward {} ({:.0}% concentration)",
                side_label(whales),
                concentration
            ),
        };
    }

    hold("Signals too weak to act on".to_string())
}

/// Float noise absorbed when an edge is compared with its threshold, so
/// that 0.55 against 0.50 is an edge of exactly 0.05 on both sides
pub const EDGE_TOLERANCE: f64 = 1e-9;

/// True when `edge` is beyond `threshold` by more than float noise
pub fn edge_exceeds(edge: f64, threshold: f64) -> bool {
    edge > threshold + EDGE_TOLERANCE
}

/// Edge-based recommendation against the market
pub fn recommend(edge: f64, config: &DecisionConfig) -> Recommendation {
    if edge_exceeds(edge, config.strong_value_edge) {
        Recommendation::StrongBuyA
    } else if edge_exceeds(edge, config.value_edge) {
        Recommendation::BuyA
    } else if edge_exceeds(-edge, config.strong_value_edge) {
        Recommendation::StrongBuyB
    } else if edge_exceeds(-edge, config.value_edge) {
        Recommendation::BuyB
    } else {
        Recommendation::Hold
    }
}

pub fn market_value(probability_a: f64, market_probability_a: f64, config: &DecisionConfig) -> MarketValue {
    let edge = probability_a - market_probability_a;
    let value_side = if edge_exceeds(edge, config.value_edge) {
        Direction::TeamA
    } else if edge_exceeds(-edge, config.value_edge) {
        Direction::TeamB
    } else {
        Direction::Neutral
    };
    MarketValue {
        market_probability_a,
        edge,
        value_side,
        is_value_bet: value_side != Direction::Neutral,
    }
}
