// Shared models for the forecast engine and its services
use serde::{Deserialize, Serialize};

pub mod inputs;

pub use inputs::*;

// ============================================================================
// Factors
// ============================================================================

/// One bounded, signed contribution to the match score.
///
/// Positive scores favor team A. Built fresh for every prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub name: String,
    pub score: f64,
    pub weight: f64,
    pub description: String,
    pub icon: String,
}

impl Factor {
    pub fn new(name: &str, score: f64, weight: f64, description: String, icon: &str) -> Self {
        Self {
            name: name.to_string(),
            score,
            weight,
            description,
            icon: icon.to_string(),
        }
    }

    pub fn weighted_score(&self) -> f64 {
        self.score * self.weight
    }
}

// ============================================================================
// Recommendation & Investment Signals
// ============================================================================

/// Edge-based recommendation against the market price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    StrongBuyA,
    BuyA,
    Hold,
    BuyB,
    StrongBuyB,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketValue {
    pub market_probability_a: f64,
    /// Model probability minus market probability for team A
    pub edge: f64,
    pub value_side: Direction,
    pub is_value_bet: bool,
}

/// Categorical signal combining the model with smart-money positioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvestmentSignal {
    StrongBuyA,
    BuyA,
    StrongBuyB,
    BuyB,
    FollowSmartMoneyA,
    FollowSmartMoneyB,
    ConflictWarning,
    Hold,
}

impl InvestmentSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentSignal::StrongBuyA => "STRONG_BUY_A",
            InvestmentSignal::BuyA => "BUY_A",
            InvestmentSignal::StrongBuyB => "STRONG_BUY_B",
            InvestmentSignal::BuyB => "BUY_B",
            InvestmentSignal::FollowSmartMoneyA => "FOLLOW_SMART_MONEY_A",
            InvestmentSignal::FollowSmartMoneyB => "FOLLOW_SMART_MONEY_B",
            InvestmentSignal::ConflictWarning => "CONFLICT_WARNING",
            InvestmentSignal::Hold => "HOLD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentDecision {
    pub signal: InvestmentSignal,
    /// 0 - 100
    pub confidence: f64,
    pub reasoning: String,
}

// ============================================================================
// Prediction Result
// ============================================================================

/// Output of one pass through the pipeline, as consumed by the API layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub team_a_probability: f64,
    pub team_b_probability: f64,
    pub confidence: f64,
    pub factors: Vec<Factor>,
    pub recommendation: Recommendation,
    pub market_value: MarketValue,
    pub reasoning: Vec<String>,
    pub model_version: String,
    pub synergy_bonus: f64,
    /// Sigmoid output before calibration and market blend
    pub raw_probability: f64,
    pub calibrated_probability: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investment: Option<InvestmentDecision>,
}

// ============================================================================
// Prediction Ledger Records
// ============================================================================

/// Settlement block; present only once the outcome is known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub actual_winner: String,
    pub actual_score_a: u32,
    pub actual_score_b: u32,
    /// Unix ms
    pub result_updated_at: i64,
    pub prediction_correct: bool,
    pub brier_score: f64,
    pub log_loss: f64,
    /// Realized ROI of the hypothetical unit bet (0 when no bet was placed)
    pub expected_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub market_id: String,
    pub team_a: String,
    pub team_b: String,
    pub predicted_probability_a: f64,
    pub market_odds_a: f64,
    pub confidence: f64,
    /// Creation time, Unix ms
    pub timestamp: i64,
    pub model_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<Settlement>,
}

impl PredictionRecord {
    pub fn is_settled(&self) -> bool {
        self.settlement.is_some()
    }

    /// Absolute gap between model and market for team A
    pub fn edge_magnitude(&self) -> f64 {
        (self.predicted_probability_a - self.market_odds_a).abs()
    }

    /// Resolve a winner name to a side, case-insensitively
    pub fn side_of(&self, winner: &str) -> Option<Direction> {
        let winner = winner.trim();
        if winner.eq_ignore_ascii_case(self.team_a.trim()) {
            Some(Direction::TeamA)
        } else if winner.eq_ignore_ascii_case(self.team_b.trim()) {
            Some(Direction::TeamB)
        } else {
            None
        }
    }
}

// ============================================================================
// Calibration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    /// Half-open `[low, high)`; the last bin of a table also includes `high`
    pub predicted_range: (f64, f64),
    pub actual_win_rate: f64,
    pub sample_size: u32,
}

impl CalibrationBin {
    pub fn midpoint(&self) -> f64 {
        (self.predicted_range.0 + self.predicted_range.1) / 2.0
    }

    fn contains(&self, p: f64, closed_high: bool) -> bool {
        let (low, high) = self.predicted_range;
        p >= low && (p < high || (closed_high && p <= high))
    }
}

/// Published calibration curve consumed by the probability transform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    pub bins: Vec<CalibrationBin>,
    /// Unix ms, 0 for a table that was never generated
    pub generated_at: i64,
    pub window_days: u32,
}

impl CalibrationTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Bin containing `p`, if any
    pub fn lookup(&self, p: f64) -> Option<&CalibrationBin> {
        let last = self.bins.len().checked_sub(1)?;
        self.bins
            .iter()
            .enumerate()
            .find(|(i, bin)| bin.contains(p, *i == last))
            .map(|(_, bin)| bin)
    }

    pub fn total_samples(&self) -> u32 {
        self.bins.iter().map(|b| b.sample_size).sum()
    }
}

// ============================================================================
// Model Performance
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyBucket {
    pub accuracy: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoiBucket {
    /// Mean realized ROI, percent
    pub roi: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBuckets {
    /// confidence > 0.8
    pub high: AccuracyBucket,
    /// 0.6 - 0.8
    pub medium: AccuracyBucket,
    /// < 0.6
    pub low: AccuracyBucket,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueBuckets {
    /// |edge| > 0.1
    pub strong_value: RoiBucket,
    /// 0.05 - 0.1
    pub value: RoiBucket,
    /// < 0.05
    pub fair: RoiBucket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAccuracy {
    /// UTC calendar day, YYYY-MM-DD
    pub date: String,
    pub accuracy: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub total_predictions: usize,
    pub settled_predictions: usize,
    pub accuracy: f64,
    pub avg_brier_score: f64,
    pub avg_log_loss: f64,
    pub calibration_score: f64,
    pub by_confidence: ConfidenceBuckets,
    pub by_value: ValueBuckets,
    pub last_7_days: Vec<DailyAccuracy>,
    pub last_30_days: Vec<DailyAccuracy>,
}

impl ModelPerformance {
    /// All-zero snapshot returned when analytics can't be computed
    pub fn empty() -> Self {
        Self::default()
    }
}

// ============================================================================
// Redis Channels
// ============================================================================

pub mod channels {
    pub const PREDICTION_REQUESTS: &str = "predictions:requests";
    pub const PREDICTION_RESULTS: &str = "predictions:results";
    pub const OUTCOMES_FINAL: &str = "outcomes:final";
    pub const MODEL_PERFORMANCE: &str = "model:performance";
    pub const CALIBRATION_UPDATED: &str = "model:calibration:updated";
}
