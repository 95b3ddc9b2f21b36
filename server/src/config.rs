//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::ratelimit::AdmissionConfig;

const DEFAULT_RELOAD_SECS: u64 = 30;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// JSON file holding burst-detection parameters (optional)
    pub parameters_file: Option<PathBuf>,

    /// How often the parameters file is re-read, in seconds (default: 30)
    pub parameters_reload_secs: u64,

    /// Admission control settings
    pub admission: AdmissionConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let parameters_reload_secs = match env::var("PARAMETERS_RELOAD_SECS") {
            Ok(v) => v.trim().parse().unwrap_or_else(|_| {
                warn!(
                    value = %v,
                    default = DEFAULT_RELOAD_SECS,
                    "Invalid PARAMETERS_RELOAD_SECS, using default"
                );
                DEFAULT_RELOAD_SECS
            }),
            Err(_) => DEFAULT_RELOAD_SECS,
        };

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            parameters_file: env::var("PARAMETERS_FILE")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            parameters_reload_secs,
            admission: AdmissionConfig::from_env(),
        })
    }

    pub fn parameters_reload_interval(&self) -> Duration {
        Duration::from_secs(self.parameters_reload_secs.max(1))
    }

    /// Configuration for tests, independent of the environment.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:0".into(),
            parameters_file: None,
            parameters_reload_secs: DEFAULT_RELOAD_SECS,
            admission: AdmissionConfig::default(),
        }
    }
}
