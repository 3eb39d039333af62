//! Performance aggregation and calibration feedback.
//!
//! Everything here is a read-side computation over settled ledger records.
//! The only state written back is the published calibration table under
//! `model:calibration`, which the probability transform consumes on the
//! next prediction.

use crate::config::CalibrationConfig;
use crate::decision::{edge_exceeds, EDGE_TOLERANCE};
use crate::ledger::PredictionLedger;
use crate::models::{
    AccuracyBucket, CalibrationBin, CalibrationTable, ConfidenceBuckets, DailyAccuracy, Direction,
    ModelPerformance, PredictionRecord, RoiBucket, Settlement, ValueBuckets,
};
use crate::probability::CalibrationSource;
use crate::store::{keys, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use log::{info, warn};
use rustc_hash::FxHashMap;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

const HIGH_CONFIDENCE: f64 = 0.8;
const MEDIUM_CONFIDENCE: f64 = 0.6;
const STRONG_VALUE_EDGE: f64 = 0.10;
const VALUE_EDGE: f64 = 0.05;

const SHORT_SERIES_DAYS: usize = 7;
const LONG_SERIES_DAYS: usize = 30;

/// Score reported when no bin has enough samples to judge
const UNKNOWN_CALIBRATION_SCORE: f64 = 0.5;

// ============================================================================
// Pure Aggregation
// ============================================================================

/// A settled record flattened to what the aggregates need
#[derive(Debug, Clone, Copy)]
struct Scored {
    timestamp: i64,
    probability_a: f64,
    confidence: f64,
    edge: f64,
    team_a_won: bool,
    correct: bool,
    brier: f64,
    log_loss: f64,
    roi: f64,
}

impl Scored {
    fn from_record(record: &PredictionRecord, settlement: &Settlement) -> Self {
        Self {
            timestamp: record.timestamp,
            probability_a: record.predicted_probability_a,
            confidence: record.confidence,
            edge: record.edge_magnitude(),
            team_a_won: record.side_of(&settlement.actual_winner) == Some(Direction::TeamA),
            correct: settlement.prediction_correct,
            brier: settlement.brier_score,
            log_loss: settlement.log_loss,
            roi: settlement.expected_value,
        }
    }
}

fn scored(records: &[PredictionRecord]) -> Vec<Scored> {
    records
        .iter()
        .filter_map(|r| r.settlement.as_ref().map(|s| Scored::from_record(r, s)))
        .collect()
}

fn below_value_edge(edge: f64) -> bool {
    edge < VALUE_EDGE - EDGE_TOLERANCE
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn bin_index(p: f64, bins: usize) -> usize {
    ((p.clamp(0.0, 1.0) * bins as f64) as usize).min(bins - 1)
}

fn bin_range(index: usize, bins: usize) -> (f64, f64) {
    (index as f64 / bins as f64, (index + 1) as f64 / bins as f64)
}

/// `(predicted, won)` pairs grouped into equal-width probability bins
fn group_by_bin(pairs: impl Iterator<Item = (f64, bool)>, bins: usize) -> Vec<Vec<(f64, bool)>> {
    let mut grouped = vec![Vec::new(); bins];
    for (p, won) in pairs {
        grouped[bin_index(p, bins)].push((p, won));
    }
    grouped
}

fn win_rate(samples: &[(f64, bool)]) -> f64 {
    mean(samples.iter().map(|(_, won)| if *won { 1.0 } else { 0.0 }))
}

/// `1 - mean |mean predicted - empirical win rate|` over bins with enough
/// samples
fn calibration_score(samples: &[Scored], bins: usize, min_samples: usize) -> f64 {
    if bins == 0 {
        return UNKNOWN_CALIBRATION_SCORE;
    }
    let grouped = group_by_bin(samples.iter().map(|s| (s.probability_a, s.team_a_won)), bins);
    let errors: Vec<f64> = grouped
        .iter()
        .filter(|bin| bin.len() >= min_samples.max(1))
        .map(|bin| (mean(bin.iter().map(|(p, _)| *p)) - win_rate(bin)).abs())
        .collect();

    if errors.is_empty() {
        UNKNOWN_CALIBRATION_SCORE
    } else {
        1.0 - mean(errors.into_iter())
    }
}

fn accuracy_bucket<'a>(samples: impl Iterator<Item = &'a Scored>) -> AccuracyBucket {
    let samples: Vec<&Scored> = samples.collect();
    AccuracyBucket {
        accuracy: mean(samples.iter().map(|s| if s.correct { 1.0 } else { 0.0 })),
        count: samples.len(),
    }
}

fn roi_bucket<'a>(samples: impl Iterator<Item = &'a Scored>) -> RoiBucket {
    let samples: Vec<&Scored> = samples.collect();
    RoiBucket {
        roi: mean(samples.iter().map(|s| s.roi)) * 100.0,
        count: samples.len(),
    }
}

fn utc_day(timestamp_ms: i64) -> Option<NaiveDate> {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.date_naive())
}

/// Accuracy per UTC calendar day for the `days` days ending today, oldest
/// first. Days without records are reported as zero.
fn daily_series(samples: &[Scored], days: usize, now: DateTime<Utc>) -> Vec<DailyAccuracy> {
    let mut per_day: FxHashMap<NaiveDate, (usize, usize)> = FxHashMap::default();
    for s in samples {
        if let Some(day) = utc_day(s.timestamp) {
            let entry = per_day.entry(day).or_default();
            entry.1 += 1;
            if s.correct {
                entry.0 += 1;
            }
        }
    }

    let today = now.date_naive();
    (0..days)
        .rev()
        .map(|offset| {
            let day = today - Duration::days(offset as i64);
            let (correct, count) = per_day.get(&day).copied().unwrap_or((0, 0));
            DailyAccuracy {
                date: day.format("%Y-%m-%d").to_string(),
                accuracy: if count == 0 {
                    0.0
                } else {
                    correct as f64 / count as f64
                },
                count,
            }
        })
        .collect()
}

/// Build a `ModelPerformance` snapshot.
///
/// Aggregates cover settled records created at or after `window_start_ms`;
/// the day series cover whatever of `records` falls on the reported days.
pub fn summarize(
    records: &[PredictionRecord],
    window_start_ms: i64,
    total_predictions: usize,
    now: DateTime<Utc>,
    config: &CalibrationConfig,
) -> ModelPerformance {
    let all = scored(records);
    let window: Vec<Scored> = all
        .iter()
        .filter(|s| s.timestamp >= window_start_ms)
        .copied()
        .collect();

    ModelPerformance {
        total_predictions,
        settled_predictions: window.len(),
        accuracy: accuracy_bucket(window.iter()).accuracy,
        avg_brier_score: mean(window.iter().map(|s| s.brier)),
        avg_log_loss: mean(window.iter().map(|s| s.log_loss)),
        calibration_score: calibration_score(
            &window,
            config.score_bins,
            config.score_min_samples,
        ),
        by_confidence: ConfidenceBuckets {
            high: accuracy_bucket(window.iter().filter(|s| s.confidence > HIGH_CONFIDENCE)),
            medium: accuracy_bucket(window.iter().filter(|s| {
                s.confidence >= MEDIUM_CONFIDENCE && s.confidence <= HIGH_CONFIDENCE
            })),
            low: accuracy_bucket(window.iter().filter(|s| s.confidence < MEDIUM_CONFIDENCE)),
        },
        by_value: ValueBuckets {
            strong_value: roi_bucket(
                window
                    .iter()
                    .filter(|s| edge_exceeds(s.edge, STRONG_VALUE_EDGE)),
            ),
            value: roi_bucket(window.iter().filter(|s| {
                !edge_exceeds(s.edge, STRONG_VALUE_EDGE) && !below_value_edge(s.edge)
            })),
            fair: roi_bucket(window.iter().filter(|s| below_value_edge(s.edge))),
        },
        last_7_days: daily_series(&all, SHORT_SERIES_DAYS, now),
        last_30_days: daily_series(&all, LONG_SERIES_DAYS, now),
    }
}

/// Equal-width calibration bins over the settled records
pub fn build_calibration_table(
    records: &[PredictionRecord],
    bins: usize,
    window_days: u32,
    generated_at: i64,
) -> CalibrationTable {
    if bins == 0 {
        return CalibrationTable::empty();
    }
    let samples = scored(records);
    let grouped = group_by_bin(samples.iter().map(|s| (s.probability_a, s.team_a_won)), bins);

    CalibrationTable {
        bins: grouped
            .iter()
            .enumerate()
            .map(|(i, bin)| CalibrationBin {
                predicted_range: bin_range(i, bins),
                actual_win_rate: win_rate(bin),
                sample_size: bin.len() as u32,
            })
            .collect(),
        generated_at,
        window_days,
    }
}

// ============================================================================
// Aggregator
// ============================================================================

#[derive(Clone)]
pub struct PerformanceAggregator {
    ledger: PredictionLedger,
    config: CalibrationConfig,
}

impl PerformanceAggregator {
    pub fn new(ledger: PredictionLedger, config: CalibrationConfig) -> Self {
        Self { ledger, config }
    }

    /// Performance over the last `window_days`. Never fails: store or parse
    /// problems yield `ModelPerformance::empty()`.
    pub async fn compute_performance(&self, window_days: u32) -> ModelPerformance {
        match self.try_compute_performance(window_days, Utc::now()).await {
            Ok(performance) => performance,
            Err(e) => {
                warn!("Failed to compute model performance: {}", e);
                ModelPerformance::empty()
            }
        }
    }

    async fn try_compute_performance(
        &self,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<ModelPerformance> {
        let now_ms = now.timestamp_millis();
        let window_start = now_ms - i64::from(window_days) * DAY_MS;
        let series_start = now_ms - LONG_SERIES_DAYS as i64 * DAY_MS;

        let records = self
            .ledger
            .settled_since(window_start.min(series_start))
            .await?;
        let total = self.ledger.timeline_since(window_start).await?.len();

        Ok(summarize(&records, window_start, total, now, &self.config))
    }

    /// Rebuild the calibration table from the lookback window and publish it
    pub async fn generate_calibration_table(&self) -> StoreResult<CalibrationTable> {
        let now_ms = Utc::now().timestamp_millis();
        let since = now_ms - i64::from(self.config.lookback_days) * DAY_MS;
        let records = self.ledger.settled_since(since).await?;

        let table = build_calibration_table(
            &records,
            self.config.table_bins,
            self.config.lookback_days,
            now_ms,
        );
        let payload = serde_json::to_string(&table)?;
        self.ledger
            .store()
            .set(keys::CALIBRATION, &payload, None)
            .await?;

        info!(
            "Calibration table regenerated from {} settled predictions ({} day window)",
            table.total_samples(),
            self.config.lookback_days
        );
        Ok(table)
    }

    /// Currently published table, empty if none was generated yet
    pub async fn calibration_table(&self) -> StoreResult<CalibrationTable> {
        match self.ledger.store().get(keys::CALIBRATION).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(CalibrationTable::empty()),
        }
    }
}

#[async_trait]
impl CalibrationSource for PerformanceAggregator {
    async fn calibration_table(&self) -> anyhow::Result<CalibrationTable> {
        Ok(PerformanceAggregator::calibration_table(self).await?)
    }
}
