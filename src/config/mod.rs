//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on malformed values. Every variable
//! is optional; unset ones fall back to the defaults below.

use std::time::Duration;

use crate::engine::DispatchConfig;
use crate::error::{Error, Result};
use crate::ledger::DEFAULT_CAPACITY;
use crate::telemetry::TelemetryConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// `SWITCHBOARD_CAPACITY`: maximum calls in flight (default 10).
    pub capacity: usize,
    /// `SWITCHBOARD_MAX_ATTEMPTS`: handling attempts per call (default 3).
    pub max_attempts: u32,
    /// `SWITCHBOARD_HANDLE_TIMEOUT_MS`: abort attempts running longer than this.
    pub handle_timeout: Option<Duration>,
    /// `SWITCHBOARD_HANDLE_MIN_MS` / `SWITCHBOARD_HANDLE_MAX_MS`: simulated
    /// handling time bounds (default 50..=100 ms).
    pub handle_min: Duration,
    pub handle_max: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_attempts: 3,
            handle_timeout: None,
            handle_min: Duration::from_millis(50),
            handle_max: Duration::from_millis(100),
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let handle_min = optional_var::<u64>("SWITCHBOARD_HANDLE_MIN_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.handle_min);
        let handle_max = optional_var::<u64>("SWITCHBOARD_HANDLE_MAX_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.handle_max);
        if handle_max < handle_min {
            return Err(Error::Config(format!(
                "SWITCHBOARD_HANDLE_MAX_MS ({}) is below SWITCHBOARD_HANDLE_MIN_MS ({})",
                handle_max.as_millis(),
                handle_min.as_millis()
            )));
        }

        Ok(Self {
            capacity: positive_var("SWITCHBOARD_CAPACITY")?.unwrap_or(defaults.capacity),
            max_attempts: positive_var("SWITCHBOARD_MAX_ATTEMPTS")?
                .unwrap_or(defaults.max_attempts),
            handle_timeout: positive_var::<u64>("SWITCHBOARD_HANDLE_TIMEOUT_MS")?
                .map(Duration::from_millis),
            handle_min,
            handle_max,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            capacity: self.capacity,
            max_attempts: self.max_attempts,
            handle_timeout: self.handle_timeout,
        }
    }

    pub fn telemetry_config(&self, service_name: &str) -> TelemetryConfig {
        TelemetryConfig {
            endpoint: self.otel_endpoint.clone(),
            service_name: service_name.to_string(),
            log_level: self.log_level.clone(),
        }
    }
}

fn optional_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn positive_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    match optional_var::<T>(name)? {
        Some(v) if v <= T::default() => {
            Err(Error::Config(format!("{name} must be greater than zero")))
        }
        other => Ok(other),
    }
}
