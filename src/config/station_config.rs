//! Station configuration loaded from TOML.
//!
//! Every tunable named in the deployment guide maps to a field here; missing
//! fields fall back to the constants in [`crate::config::defaults`], so a
//! partial config file is always valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use super::defaults;

/// Top-level station configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub station: StationSection,
    pub server: ServerSection,
    pub sampling: SamplingSection,
    pub detector: DetectorSection,
    pub calibration: CalibrationSection,
    pub storage: StorageSection,
    pub broker: BrokerSection,
    pub clock: ClockSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationSection {
    /// Station identifier, used as the broker client id and record source.
    pub id: String,
    /// Root directory for per-day record files.
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// HTTP/websocket bind address.
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSection {
    pub rate_hz: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    pub sta_window: usize,
    pub lta_window: usize,
    pub trigger_ratio: f64,
    pub threshold_micro_g: f64,
    pub threshold_light_g: f64,
    pub threshold_strong_g: f64,
    pub min_event_duration_ms: u64,
    pub adaptive_thresholds: bool,
    pub local_magnitude_offset: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSection {
    pub drift_check_interval_secs: u64,
    pub drift_warn_percent: f64,
    pub drift_critical_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub retention_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    pub data_interval_secs: u64,
    pub status_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub reconnect_min_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSection {
    pub sync_interval_secs: u64,
}

impl Default for StationSection {
    fn default() -> Self {
        Self {
            id: "SEISMO-01".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self {
            rate_hz: defaults::SAMPLING_RATE_HZ,
        }
    }
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            sta_window: defaults::STA_WINDOW,
            lta_window: defaults::LTA_WINDOW,
            trigger_ratio: defaults::STA_LTA_RATIO,
            threshold_micro_g: defaults::THRESHOLD_MICRO_G,
            threshold_light_g: defaults::THRESHOLD_LIGHT_G,
            threshold_strong_g: defaults::THRESHOLD_STRONG_G,
            min_event_duration_ms: defaults::MIN_EVENT_DURATION_MS,
            adaptive_thresholds: true,
            local_magnitude_offset: 0.0,
        }
    }
}

impl Default for CalibrationSection {
    fn default() -> Self {
        Self {
            drift_check_interval_secs: defaults::DRIFT_CHECK_INTERVAL_SECS,
            drift_warn_percent: defaults::DRIFT_WARN_PERCENT,
            drift_critical_percent: defaults::DRIFT_CRITICAL_PERCENT,
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            retention_days: defaults::DATA_RETENTION_DAYS,
        }
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            data_interval_secs: defaults::BROKER_DATA_INTERVAL_SECS,
            status_interval_secs: defaults::BROKER_STATUS_INTERVAL_SECS,
            heartbeat_interval_secs: defaults::BROKER_HEARTBEAT_INTERVAL_SECS,
            reconnect_min_secs: defaults::BROKER_RECONNECT_MIN_SECS,
        }
    }
}

impl Default for ClockSection {
    fn default() -> Self {
        Self {
            sync_interval_secs: defaults::CLOCK_SYNC_INTERVAL_SECS,
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            station: StationSection::default(),
            server: ServerSection::default(),
            sampling: SamplingSection::default(),
            detector: DetectorSection::default(),
            calibration: CalibrationSection::default(),
            storage: StorageSection::default(),
            broker: BrokerSection::default(),
            clock: ClockSection::default(),
        }
    }
}

impl StationConfig {
    /// Load configuration with the standard precedence:
    ///
    /// 1. Explicit path (from `--config`)
    /// 2. `SEISMO_CONFIG` environment variable
    /// 3. `station_config.toml` in the working directory
    /// 4. Built-in defaults
    pub fn load(explicit_path: Option<&str>) -> Self {
        let candidate = explicit_path
            .map(str::to_string)
            .or_else(|| std::env::var("SEISMO_CONFIG").ok())
            .unwrap_or_else(|| "station_config.toml".to_string());

        if Path::new(&candidate).exists() {
            match std::fs::read_to_string(&candidate) {
                Ok(contents) => match toml::from_str::<Self>(&contents) {
                    Ok(config) => {
                        info!(path = %candidate, "Loaded station configuration");
                        config.validate();
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %candidate, error = %e, "Invalid config file - using defaults");
                    }
                },
                Err(e) => {
                    warn!(path = %candidate, error = %e, "Could not read config file - using defaults");
                }
            }
        } else if explicit_path.is_some() {
            warn!(path = %candidate, "Config file not found - using defaults");
        }

        let config = Self::default();
        config.validate();
        config
    }

    /// Sanity-check loaded values. Out-of-range settings are logged as
    /// warnings; none are fatal since the detector tolerates any positive
    /// window sizes.
    pub fn validate(&self) {
        if self.sampling.rate_hz == 0 || self.sampling.rate_hz > 4_000 {
            warn!(
                rate_hz = self.sampling.rate_hz,
                "Sampling rate outside expected range (1-4000 Hz)"
            );
        }
        if self.detector.sta_window == 0 || self.detector.sta_window >= self.detector.lta_window {
            warn!(
                sta = self.detector.sta_window,
                lta = self.detector.lta_window,
                "STA window should be non-zero and smaller than the LTA window"
            );
        }
        if self.detector.trigger_ratio <= 1.0 {
            warn!(
                ratio = self.detector.trigger_ratio,
                "Trigger ratio at or below 1.0 will fire continuously"
            );
        }
        if self.detector.threshold_micro_g <= 0.0 {
            warn!("Micro threshold must be positive - adaptive scaling will substitute the default");
        }
        if self.storage.retention_days == 0 {
            warn!("Retention of 0 days disables the startup pruning sweep");
        }
    }

    /// Sampling period derived from the configured rate.
    pub fn sample_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.sampling.rate_hz.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_values() {
        let config = StationConfig::default();
        assert_eq!(config.sampling.rate_hz, 500);
        assert_eq!(config.detector.sta_window, 25);
        assert_eq!(config.detector.lta_window, 2_500);
        assert!((config.detector.trigger_ratio - 2.5).abs() < f64::EPSILON);
        assert_eq!(config.detector.min_event_duration_ms, 100);
        assert!(config.detector.adaptive_thresholds);
        assert_eq!(config.storage.retention_days, 90);
        assert_eq!(config.broker.data_interval_secs, 300);
        assert_eq!(config.broker.status_interval_secs, 600);
        assert_eq!(config.broker.heartbeat_interval_secs, 1_800);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let parsed: StationConfig = toml::from_str(
            r#"
            [sampling]
            rate_hz = 100

            [detector]
            trigger_ratio = 3.0
            "#,
        )
        .unwrap();

        assert_eq!(parsed.sampling.rate_hz, 100);
        assert!((parsed.detector.trigger_ratio - 3.0).abs() < f64::EPSILON);
        // Untouched sections keep defaults
        assert_eq!(parsed.detector.lta_window, 2_500);
        assert_eq!(parsed.station.id, "SEISMO-01");
    }

    #[test]
    fn sample_period_matches_rate() {
        let mut config = StationConfig::default();
        config.sampling.rate_hz = 500;
        assert_eq!(config.sample_period(), std::time::Duration::from_millis(2));
    }
}
