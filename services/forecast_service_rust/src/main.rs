use anyhow::{Context, Result};
use dotenv::dotenv;
use edgecast_core::models::{channels, ForecastRequest, MatchOutcome, PredictionResult};
use edgecast_core::probability::NoSmartMoney;
use edgecast_core::redis::{RedisBus, RedisStore};
use edgecast_core::{
    ForecastConfig, ForecastEngine, PerformanceAggregator, PredictionLedger, SettlementOutcome,
    SettlementService,
};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

mod config;

use config::ServiceConfig;

/// Message published on `predictions:results`
#[derive(Debug, Serialize)]
struct ForecastAnnouncement<'a> {
    market_id: &'a str,
    team_a: &'a str,
    team_b: &'a str,
    #[serde(flatten)]
    result: &'a PredictionResult,
}

fn decode<T: DeserializeOwned>(msg: &redis::Msg, what: &str) -> Option<T> {
    let payload: String = match msg.get_payload() {
        Ok(p) => p,
        Err(e) => {
            warn!("Failed to get payload: {}", e);
            return None;
        }
    };
    match serde_json::from_str(&payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to parse {}: {}", what, e);
            None
        }
    }
}

async fn outcome_listener_loop(bus: RedisBus, settlement: SettlementService) -> Result<()> {
    let mut pubsub = bus.subscribe(channels::OUTCOMES_FINAL).await?;
    info!("Subscribed to {}", channels::OUTCOMES_FINAL);

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let Some(outcome) = decode::<MatchOutcome>(&msg, "match outcome") else {
            continue;
        };
        match settlement.settle_outcome(&outcome).await {
            Ok(SettlementOutcome::Settled(_)) | Ok(SettlementOutcome::Resettled(_)) => {}
            Ok(other) => debug!("Outcome for {} not applied: {:?}", outcome.market_id, other),
            Err(e) => error!("Error settling {}: {}", outcome.market_id, e),
        }
    }

    warn!("Outcome stream ended");
    Ok(())
}

async fn calibration_loop(bus: RedisBus, aggregator: Arc<PerformanceAggregator>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        match aggregator.generate_calibration_table().await {
            Ok(table) => {
                if let Err(e) = bus.publish(channels::CALIBRATION_UPDATED, &table).await {
                    error!("Failed to announce calibration table: {}", e);
                }
            }
            Err(e) => error!("Calibration regeneration failed: {}", e),
        }
    }
}

async fn performance_loop(
    bus: RedisBus,
    aggregator: Arc<PerformanceAggregator>,
    ledger: PredictionLedger,
    interval_secs: u64,
    window_days: u32,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        let performance = aggregator.compute_performance(window_days).await;
        info!(
            "Model performance ({}d): settled={} accuracy={:.1}% brier={:.4} calibration={:.3}",
            window_days,
            performance.settled_predictions,
            performance.accuracy * 100.0,
            performance.avg_brier_score,
            performance.calibration_score
        );
        if let Err(e) = bus.publish(channels::MODEL_PERFORMANCE, &performance).await {
            error!("Failed to publish model performance: {}", e);
        }

        match ledger.stats().await {
            Ok(stats) => debug!(
                "Ledger: total={} pending={} settled={}",
                stats.total, stats.pending, stats.settled
            ),
            Err(e) => warn!("Failed to read ledger stats: {}", e),
        }
    }
}

async fn prune_loop(ledger: PredictionLedger, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        if let Err(e) = ledger.prune().await {
            error!("Ledger prune failed: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    info!("Starting Rust Forecast Service...");

    // Configuration
    let service_config = ServiceConfig::from_env()?;
    let config = ForecastConfig::from_env_with_defaults(ForecastConfig::default());
    service_config.log_config();
    config.log_config();

    // Redis connections
    let store = Arc::new(
        RedisStore::connect(&service_config.redis_url)
            .await
            .context("Failed to connect prediction store")?,
    );
    let bus = RedisBus::new(&service_config.redis_url).await?;
    info!("Connected to Redis");

    // Core components
    let ledger = PredictionLedger::new(store, config.settlement.record_ttl_secs);
    let aggregator = Arc::new(PerformanceAggregator::new(
        ledger.clone(),
        config.calibration,
    ));
    let settlement = SettlementService::new(ledger.clone(), config.settlement);
    let engine = ForecastEngine::new(
        ledger.clone(),
        aggregator.clone(),
        Arc::new(NoSmartMoney),
        config,
    );

    // Outcome listener
    let bus_outcomes = bus.clone();
    tokio::spawn(async move {
        if let Err(e) = outcome_listener_loop(bus_outcomes, settlement).await {
            error!("Outcome listener error: {}", e);
        }
    });

    // Feedback loop: calibration regeneration, performance snapshots, pruning
    tokio::spawn(calibration_loop(
        bus.clone(),
        aggregator.clone(),
        service_config.calibration_interval_secs,
    ));
    tokio::spawn(performance_loop(
        bus.clone(),
        aggregator,
        ledger.clone(),
        service_config.performance_interval_secs,
        service_config.performance_window_days,
    ));
    tokio::spawn(prune_loop(ledger, service_config.prune_interval_secs));

    // Main message loop for prediction requests
    let mut pubsub_requests = bus.subscribe(channels::PREDICTION_REQUESTS).await?;
    info!("Subscribed to {}", channels::PREDICTION_REQUESTS);
    info!("Forecast Service started");

    let mut stream = pubsub_requests.on_message();
    while let Some(msg) = stream.next().await {
        let Some(request) = decode::<ForecastRequest>(&msg, "forecast request") else {
            continue;
        };

        let result = match engine.forecast(&request).await {
            Ok(r) => r,
            Err(e) => {
                error!("Error forecasting {}: {}", request.market_id, e);
                continue;
            }
        };

        let announcement = ForecastAnnouncement {
            market_id: &request.market_id,
            team_a: &request.team_a,
            team_b: &request.team_b,
            result: &result,
        };
        if let Err(e) = bus.publish(channels::PREDICTION_RESULTS, &announcement).await {
            error!("Failed to publish forecast for {}: {}", request.market_id, e);
        }
    }

    Ok(())
}
