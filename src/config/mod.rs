//! Station Configuration Module
//!
//! Provides station-wide configuration loaded from TOML files, replacing
//! hardcoded detector thresholds and intervals with operator-tunable values.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` CLI argument
//! 2. `SEISMO_CONFIG` environment variable (path to TOML file)
//! 3. `station_config.toml` in the current working directory
//! 4. Built-in defaults (matching the detector design values)
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(StationConfig::load(None));
//!
//! // Anywhere in the codebase:
//! let ratio = config::get().detector.trigger_ratio;
//! ```

mod station_config;
pub mod defaults;

pub use station_config::*;

use std::sync::OnceLock;

/// Global station configuration, initialized once at startup.
static STATION_CONFIG: OnceLock<StationConfig> = OnceLock::new();

/// Initialize the global station configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: StationConfig) {
    if STATION_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once - ignoring");
    }
}

/// Get a reference to the global station configuration.
///
/// Falls back to defaults when `init()` has not been called, which keeps
/// unit tests of individual components free of global setup.
pub fn get() -> &'static StationConfig {
    STATION_CONFIG.get_or_init(StationConfig::default)
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    STATION_CONFIG.get().is_some()
}
