//! Admission control configuration.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::ratelimit::{
    ChannelMode, ChannelTuning, DEFAULT_AUDIT_CAPACITY, DEFAULT_BASE_GAMMA, DEFAULT_IDLE_SECS,
    DEFAULT_JANITOR_SECS, DEFAULT_MAX_CAPACITY, DEFAULT_MIN_CAPACITY, DEFAULT_WINDOW_MS,
};

/// Configuration for the admission controller.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Whether admission control is enabled
    pub enabled: bool,
    /// Whether to trust X-Forwarded-For / X-Real-IP headers.
    /// Only enable behind a reverse proxy that overwrites them.
    pub trust_proxy: bool,
    /// Whether loopback and private-network callers bypass admission control
    pub bypass_private: bool,
    /// Identities that bypass admission control
    pub allowlist: HashSet<String>,
    /// Damped (gamma-driven) capacity adaptation instead of load-ratio adaptation
    pub damped: bool,
    /// Tuning used when neither overrides nor parameters name a channel
    pub default_channel: ChannelTuning,
    /// Static per-channel tuning, consulted first
    pub channel_overrides: HashMap<ChannelMode, ChannelTuning>,
    /// Idle time after which the janitor evicts a key
    pub idle_secs: u64,
    /// Janitor sweep interval
    pub janitor_secs: u64,
    /// Capacity of the audit queue
    pub audit_capacity: usize,
}

impl Default for ChannelTuning {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            min: DEFAULT_MIN_CAPACITY,
            max: DEFAULT_MAX_CAPACITY,
            base_gamma: DEFAULT_BASE_GAMMA,
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trust_proxy: false,
            bypass_private: true,
            allowlist: HashSet::new(),
            damped: true,
            default_channel: ChannelTuning::default(),
            channel_overrides: HashMap::new(),
            idle_secs: DEFAULT_IDLE_SECS,
            janitor_secs: DEFAULT_JANITOR_SECS,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

impl AdmissionConfig {
    /// Creates configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RATE_LIMIT_ENABLED`: Enable/disable admission control (default: true)
    /// - `RATE_LIMIT_TRUST_PROXY`: Trust forwarding headers (default: false)
    /// - `RATE_LIMIT_BYPASS_PRIVATE`: Let loopback/private callers through (default: true)
    /// - `RATE_LIMIT_ALLOWLIST`: Comma-separated identity allowlist
    /// - `RATE_LIMIT_DAMPED`: Damped capacity adaptation (default: true)
    /// - `RATE_LIMIT_DEFAULT_CHANNEL`: Fallback tuning as "window_ms,min,max,gamma"
    /// - `RATE_LIMIT_CHANNEL_OVERRIDES`: "mode=window_ms,min,max,gamma;mode=..."
    /// - `RATE_LIMIT_IDLE_SECS`: Idle eviction horizon (default: 3600)
    /// - `RATE_LIMIT_JANITOR_SECS`: Janitor interval (default: 1800)
    /// - `RATE_LIMIT_AUDIT_CAPACITY`: Audit queue capacity (default: 1024)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RATE_LIMIT_ENABLED") {
            config.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_TRUST_PROXY") {
            config.trust_proxy = val.parse().unwrap_or(false);
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_BYPASS_PRIVATE") {
            config.bypass_private = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_ALLOWLIST") {
            config.allowlist = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_DAMPED") {
            config.damped = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_DEFAULT_CHANNEL") {
            if let Some(tuning) = parse_channel_tuning(&val) {
                config.default_channel = tuning;
            }
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_CHANNEL_OVERRIDES") {
            config.channel_overrides = parse_channel_overrides(&val);
        }
        if let Some(secs) = env_parse("RATE_LIMIT_IDLE_SECS") {
            config.idle_secs = secs;
        }
        if let Some(secs) = env_parse("RATE_LIMIT_JANITOR_SECS") {
            config.janitor_secs = secs;
        }
        if let Some(capacity) = env_parse("RATE_LIMIT_AUDIT_CAPACITY") {
            config.audit_capacity = capacity;
        }

        config
    }

    pub const fn idle_horizon(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_secs.max(1))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Parses channel tuning from "window_ms,min,max,gamma" format.
fn parse_channel_tuning(val: &str) -> Option<ChannelTuning> {
    let parts: Vec<&str> = val.split(',').collect();
    if parts.len() != 4 {
        return None;
    }
    let window_ms = parts[0].trim().parse().ok()?;
    let min = parts[1].trim().parse().ok()?;
    let max = parts[2].trim().parse().ok()?;
    let base_gamma: f64 = parts[3].trim().parse().ok()?;
    if window_ms == 0 || min > max || !base_gamma.is_finite() {
        return None;
    }
    Some(ChannelTuning {
        window_ms,
        min,
        max,
        base_gamma,
    })
}

/// Parses "mode=window_ms,min,max,gamma" entries separated by `;`.
///
/// Malformed entries are skipped.
fn parse_channel_overrides(val: &str) -> HashMap<ChannelMode, ChannelTuning> {
    val.split(';')
        .filter_map(|entry| {
            let (mode, tuning) = entry.split_once('=')?;
            let mode = mode.trim();
            if mode.is_empty() {
                return None;
            }
            Some((ChannelMode(mode.to_string()), parse_channel_tuning(tuning)?))
        })
        .collect()
}
