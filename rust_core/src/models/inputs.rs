//! Raw signals consumed by the forecast pipeline.
//!
//! Everything here is produced by external collaborators (stat feeds, injury
//! reports, market data, large-holder analysis) and arrives as plain data.
//! Any field may be missing; the factor scorer skips what it doesn't have.

use serde::{Deserialize, Serialize};

/// Shooting efficiency and related advanced stats for one team
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdvancedStats {
    /// Effective field-goal percentage as a fraction (0.0 - 1.0)
    pub effective_fg_pct: f64,
    #[serde(default)]
    pub offensive_rating: Option<f64>,
    #[serde(default)]
    pub pace: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryReport {
    pub player: String,
    /// Free-form status text from the report ("Out", "Day-To-Day", ...)
    pub status: String,
}

impl InjuryReport {
    pub fn new(player: &str, status: &str) -> Self {
        Self {
            player: player.to_string(),
            status: status.to_string(),
        }
    }
}

/// Historical record of team A against team B
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadToHead {
    pub win_rate_a: f64,
    pub games: u32,
}

impl HeadToHead {
    /// Head-to-head only counts when at least one game was played
    pub fn has_history(&self) -> bool {
        self.games > 0
    }
}

/// Market-implied price pair for team A winning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketOdds {
    pub yes: f64,
    pub no: f64,
}

impl MarketOdds {
    pub fn new(yes: f64, no: f64) -> Self {
        Self { yes, no }
    }

    /// Normalized probability for team A, kept strictly inside (0, 1)
    pub fn implied_probability_a(&self) -> f64 {
        let total = self.yes + self.no;
        let p = if total > 0.0 && self.yes.is_finite() && self.no.is_finite() {
            self.yes / total
        } else {
            0.5
        };
        p.clamp(0.01, 0.99)
    }
}

/// Independently optional signals about one match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchInputs {
    pub rating_a: Option<f64>,
    pub rating_b: Option<f64>,
    pub advanced_a: Option<AdvancedStats>,
    pub advanced_b: Option<AdvancedStats>,
    /// Recent results, oldest first ("WWLDW")
    pub form_a: Option<String>,
    pub form_b: Option<String>,
    pub injuries_a: Option<Vec<InjuryReport>>,
    pub injuries_b: Option<Vec<InjuryReport>>,
    pub head_to_head: Option<HeadToHead>,
    pub rest_days_a: Option<u32>,
    pub rest_days_b: Option<u32>,
    /// `Some(true)` when team A plays at home, `None` when unknown
    pub team_a_home: Option<bool>,
}

impl MatchInputs {
    /// Head-to-head data with at least one game
    pub fn head_to_head_history(&self) -> Option<HeadToHead> {
        self.head_to_head.filter(HeadToHead::has_history)
    }

    pub fn has_advanced_stats(&self) -> bool {
        self.advanced_a.is_some() && self.advanced_b.is_some()
    }
}

/// Direction of a signal relative to the two sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    TeamA,
    TeamB,
    Neutral,
}

/// Large-holder positioning from the whale-analysis collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmartMoneySignal {
    pub direction: Direction,
    /// Share of open interest held by the largest holders (0 - 100)
    pub concentration_pct: f64,
}

/// Request to forecast a single market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub market_id: String,
    pub team_a: String,
    pub team_b: String,
    pub market: MarketOdds,
    #[serde(default)]
    pub inputs: MatchInputs,
}

/// Final result announced for a market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub market_id: String,
    pub winner: String,
    pub score_a: u32,
    pub score_b: u32,
}
