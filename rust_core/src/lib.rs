//! Edgecast Core - Calibrated match forecasting with a settlement feedback loop.
//!
//! This module provides:
//! - Factor scoring, synergy and confidence for a two-sided match
//! - Logistic transform with dynamic steepness, calibration and market blend
//! - Investment decision mapping against smart-money positioning
//! - Prediction ledger with pending/settled indices and TTL retention
//! - Settlement scoring (Brier, log loss, edge-gated ROI)
//! - Performance analytics and calibration table regeneration
//! - Redis-backed store and pub/sub bus, plus an in-memory store

pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod models;
pub mod performance;
pub mod probability;
pub mod redis;
pub mod settlement;
pub mod store;

pub use config::ForecastConfig;
pub use engine::ForecastEngine;
pub use error::{ForecastError, Result, StoreError};
pub use ledger::{LedgerStats, PredictionLedger, PruneReport};
pub use performance::PerformanceAggregator;
pub use probability::{predict, predict_batch, CalibrationSource, SmartMoneySource};
pub use settlement::{SettlementOutcome, SettlementService};
pub use store::{MemoryStore, PredictionStore};
