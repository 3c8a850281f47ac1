//! Bridge configuration.
//!
//! Configuration is sourced from environment variables with built-in
//! defaults, matching how the bridge is deployed: a single binary dropped
//! onto a host next to the display device, pointed at the backend via
//! `BACKEND_URL` and `API_KEY`.
//!
//! # Environment Variables
//!
//! | Variable | Default |
//! |----------|---------|
//! | `BACKEND_URL` | `http://localhost:5001` |
//! | `API_KEY` | *(empty, rejected by validation)* |
//! | `POLL_INTERVAL_SECS` | `2` |
//! | `SERIAL_BAUD_RATE` | `9600` |
//! | `CHUNK_SIZE` | `1024` |

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default backend endpoint for local testing.
const DEFAULT_BACKEND_URL: &str = "http://localhost:5001";

/// Default pause between poll cycles (seconds).
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Default serial baud rate for the display device.
const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default upload chunk size in bytes.
const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Display panel width in pixels.
const DEFAULT_DEVICE_WIDTH: u32 = 320;

/// Display panel height in pixels.
const DEFAULT_DEVICE_HEIGHT: u32 = 480;

// ============================================================================
// Config
// ============================================================================

/// Runtime configuration for the bridge.
///
/// Built from the environment via [`Config::from_env`] and checked with
/// [`Config::validate`] before the client starts.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the command backend.
    pub backend_url: String,

    /// API key sent as `X-API-Key` on every backend request.
    pub api_key: String,

    /// Host name reported during registration.
    pub host_name: String,

    /// Pause between successful poll cycles.
    pub poll_interval: Duration,

    /// Longer pause after a failed poll cycle.
    pub error_backoff: Duration,

    /// Consecutive poll-cycle failures before a reconnect cycle.
    pub max_consecutive_errors: u32,

    /// Serial baud rate for the display device.
    pub baud_rate: u32,

    /// Upload chunk size in bytes.
    pub chunk_size: usize,

    /// Display panel width in pixels.
    pub device_width: u32,

    /// Display panel height in pixels.
    pub device_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            api_key: String::new(),
            host_name: resolve_host_name(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            error_backoff: Duration::from_secs(5),
            max_consecutive_errors: 5,
            baud_rate: DEFAULT_BAUD_RATE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            device_width: DEFAULT_DEVICE_WIDTH,
            device_height: DEFAULT_DEVICE_HEIGHT,
        }
    }
}

impl Config {
    /// Builds a configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            backend_url: env::var("BACKEND_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.backend_url),
            api_key: env::var("API_KEY").unwrap_or(defaults.api_key),
            poll_interval: env_secs("POLL_INTERVAL_SECS", defaults.poll_interval),
            baud_rate: env_parse("SERIAL_BAUD_RATE", defaults.baud_rate),
            chunk_size: env_parse("CHUNK_SIZE", defaults.chunk_size),
            ..defaults
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the backend URL does not parse
    /// - [`Error::Config`] if the API key is empty or a placeholder
    /// - [`Error::Config`] if the chunk size is zero
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.backend_url)
            .map_err(|e| Error::config(format!("invalid backend URL {:?}: {e}", self.backend_url)))?;

        if self.api_key.is_empty() || self.api_key.contains("CHANGE-ME") {
            return Err(Error::config(
                "API_KEY not configured. Set the API_KEY environment variable.",
            ));
        }

        if self.chunk_size == 0 {
            return Err(Error::config("chunk size must be at least 1 byte"));
        }

        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Resolves the local host name, falling back to a fixed marker.
fn resolve_host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "UNKNOWN-PC".to_string())
}

/// Reads a parsable value from the environment, with fallback.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Reads a duration in whole seconds from the environment, with fallback.
fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

// ============================================================================
// Tests
// ============================================================================
