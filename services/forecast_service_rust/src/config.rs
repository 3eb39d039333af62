//! Configuration for forecast_service_rust

use anyhow::{anyhow, Result};
use log::info;
use std::env;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    // Redis
    pub redis_url: String,

    // Feedback loop schedule
    pub calibration_interval_secs: u64,
    pub performance_interval_secs: u64,
    pub performance_window_days: u32,
    pub prune_interval_secs: u64,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let calibration_interval_secs = parse_u64("CALIBRATION_INTERVAL_SECS", 3600)?;
        let performance_interval_secs = parse_u64("PERFORMANCE_INTERVAL_SECS", 300)?;
        let performance_window_days = parse_u32("PERFORMANCE_WINDOW_DAYS", 30)?;
        let prune_interval_secs = parse_u64("PRUNE_INTERVAL_SECS", 3600)?;

        if calibration_interval_secs == 0 {
            return Err(anyhow!("CALIBRATION_INTERVAL_SECS must be > 0"));
        }
        if performance_interval_secs == 0 {
            return Err(anyhow!("PERFORMANCE_INTERVAL_SECS must be > 0"));
        }
        if prune_interval_secs == 0 {
            return Err(anyhow!("PRUNE_INTERVAL_SECS must be > 0"));
        }
        if performance_window_days == 0 {
            return Err(anyhow!("PERFORMANCE_WINDOW_DAYS must be > 0"));
        }

        Ok(Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            calibration_interval_secs,
            performance_interval_secs,
            performance_window_days,
            prune_interval_secs,
        })
    }

    pub fn log_config(&self) {
        info!("ServiceConfig loaded:");
        info!(
            "  calibration every {}s, performance every {}s over {}d, prune every {}s",
            self.calibration_interval_secs,
            self.performance_interval_secs,
            self.performance_window_days,
            self.prune_interval_secs
        );
    }
}

/// Parse environment variable as u32 with default fallback
fn parse_u32(var_name: &str, default: u32) -> Result<u32> {
    match env::var(var_name) {
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|_| anyhow!("{} must be a valid u32", var_name)),
        Err(_) => Ok(default),
    }
}

/// Parse environment variable as u64 with default fallback
fn parse_u64(var_name: &str, default: u64) -> Result<u64> {
    match env::var(var_name) {
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|_| anyhow!("{} must be a valid u64", var_name)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Only unset variables here; tests share one process environment.

    #[test]
    fn test_parse_u32_with_default() {
        assert_eq!(parse_u32("EDGECAST_NON_EXISTENT_U32", 30).unwrap(), 30);
    }

    #[test]
    fn test_parse_u64_with_default() {
        assert_eq!(parse_u64("EDGECAST_NON_EXISTENT_U64", 300).unwrap(), 300);
    }
}
