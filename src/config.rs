use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    /// Geo mode switches to the deterministic fallback when unset.
    pub maps_api_key: Option<String>,
    pub maps_base_url: String,
    pub provider_timeout_ms: u64,
    pub eta_interval_secs: u64,
    pub arrival_interval_secs: u64,
    pub eta_change_threshold_minutes: i64,
    pub off_route_tolerance_meters: f64,
    pub geofence_radius_meters: f64,
    pub tick_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            event_buffer_size: 1024,
            maps_api_key: None,
            maps_base_url: "https://maps.googleapis.com/maps/api".to_string(),
            provider_timeout_ms: 5_000,
            eta_interval_secs: 300,
            arrival_interval_secs: 60,
            eta_change_threshold_minutes: 2,
            off_route_tolerance_meters: 200.0,
            geofence_radius_meters: 50.0,
            tick_concurrency: 8,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") | Err(_) => LogFormat::Compact,
            Ok(other) => {
                return Err(AppError::Internal(format!(
                    "invalid LOG_FORMAT: {other}, expected compact/json"
                )));
            }
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            maps_api_key: env::var("MAPS_API_KEY").ok().filter(|key| !key.trim().is_empty()),
            maps_base_url: env::var("MAPS_BASE_URL").unwrap_or(defaults.maps_base_url),
            provider_timeout_ms: parse_or_default(
                "PROVIDER_TIMEOUT_MS",
                defaults.provider_timeout_ms,
            )?,
            eta_interval_secs: parse_or_default("ETA_INTERVAL_SECS", defaults.eta_interval_secs)?,
            arrival_interval_secs: parse_or_default(
                "ARRIVAL_INTERVAL_SECS",
                defaults.arrival_interval_secs,
            )?,
            eta_change_threshold_minutes: parse_or_default(
                "ETA_CHANGE_THRESHOLD_MINUTES",
                defaults.eta_change_threshold_minutes,
            )?,
            off_route_tolerance_meters: parse_or_default(
                "OFF_ROUTE_TOLERANCE_METERS",
                defaults.off_route_tolerance_meters,
            )?,
            geofence_radius_meters: parse_or_default(
                "GEOFENCE_RADIUS_METERS",
                defaults.geofence_radius_meters,
            )?,
            tick_concurrency: parse_or_default("TICK_CONCURRENCY", defaults.tick_concurrency)?
                .max(1),
        })
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
