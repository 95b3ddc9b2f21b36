//! Tunable burst-detection parameters.
//!
//! The controller only ever reads a [`ParameterSnapshot`]. Operators change the
//! values at runtime through [`SharedParameters::replace`], or by editing the
//! JSON file watched by [`spawn_parameter_reload_task`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ratelimit::ChannelMode;

/// Errors raised by parameter providers.
#[derive(Debug, Error)]
pub enum ParameterError {
    /// The backing store could not be read.
    #[error("Parameter store unavailable: {0}")]
    Unavailable(#[from] std::io::Error),

    /// The stored parameters could not be parsed.
    #[error("Malformed parameters: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Parsed but failed validation.
    #[error("Invalid parameter `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Point-in-time view of the tunable thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSnapshot {
    /// Entry threshold; variance must stay below `beta_crit^2 * 1e6`
    pub beta_crit: f64,
    /// Exit threshold; variance above `beta_exit^2 * 1e6` releases a throttle
    pub beta_exit: f64,
    /// Critical damping ratio for capacity adaptation
    pub gamma_c: f64,
    /// Entropy below which a burst looks synchronized
    pub entropy_crit: f64,
    /// Noise below which a burst looks synchronized
    pub langevin_threshold: f64,
    /// Noise above which a throttle is released
    pub langevin_exit: f64,
    /// A/B experiment tag carried on audit events
    pub ab_test_group: String,
    /// Per-channel base damping ratios
    pub channel_damping: HashMap<ChannelMode, f64>,
}

impl Default for ParameterSnapshot {
    fn default() -> Self {
        Self {
            beta_crit: 0.05,
            beta_exit: 0.1,
            gamma_c: 2.0,
            entropy_crit: 2.0,
            langevin_threshold: 50.0,
            langevin_exit: 200.0,
            ab_test_group: "A".to_string(),
            channel_damping: HashMap::new(),
        }
    }
}

impl ParameterSnapshot {
    /// Rejects values that would make every comparison meaningless.
    pub fn validate(&self) -> Result<(), ParameterError> {
        let finite = [
            ("beta_crit", self.beta_crit),
            ("beta_exit", self.beta_exit),
            ("gamma_c", self.gamma_c),
            ("entropy_crit", self.entropy_crit),
            ("langevin_threshold", self.langevin_threshold),
            ("langevin_exit", self.langevin_exit),
        ];
        for (field, value) in finite {
            if !value.is_finite() {
                return Err(ParameterError::Invalid {
                    field,
                    reason: "must be finite",
                });
            }
        }
        if self.channel_damping.values().any(|g| !g.is_finite()) {
            return Err(ParameterError::Invalid {
                field: "channel_damping",
                reason: "must be finite",
            });
        }
        Ok(())
    }

    /// Variance entry threshold in squared milliseconds.
    pub fn variance_enter(&self) -> f64 {
        self.beta_crit.powi(2) * crate::ratelimit::BETA_SCALE
    }

    /// Variance exit threshold in squared milliseconds.
    pub fn variance_exit(&self) -> f64 {
        self.beta_exit.powi(2) * crate::ratelimit::BETA_SCALE
    }
}

/// Source of the current parameter snapshot.
pub trait ParameterProvider: Send + Sync {
    fn snapshot(&self) -> Result<Arc<ParameterSnapshot>, ParameterError>;
}

/// In-memory parameters that an operator can swap at runtime.
#[derive(Debug, Clone, Default)]
pub struct SharedParameters {
    inner: Arc<RwLock<Arc<ParameterSnapshot>>>,
}

impl SharedParameters {
    pub fn new(snapshot: ParameterSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// Replaces the current snapshot after validating it.
    pub fn replace(&self, snapshot: ParameterSnapshot) -> Result<(), ParameterError> {
        snapshot.validate()?;
        *self.inner.write() = Arc::new(snapshot);
        Ok(())
    }

    pub fn current(&self) -> Arc<ParameterSnapshot> {
        self.inner.read().clone()
    }
}

impl ParameterProvider for SharedParameters {
    fn snapshot(&self) -> Result<Arc<ParameterSnapshot>, ParameterError> {
        Ok(self.current())
    }
}

/// Reads and validates a JSON parameter file.
///
/// Missing fields take their defaults.
pub fn load_parameter_file(path: &Path) -> Result<ParameterSnapshot, ParameterError> {
    let raw = std::fs::read_to_string(path)?;
    let snapshot: ParameterSnapshot = serde_json::from_str(&raw)?;
    snapshot.validate()?;
    Ok(snapshot)
}

/// Start a background task that reloads `path` into `target` on an interval.
///
/// A failed reload keeps the last good snapshot. The first load happens
/// immediately so the file takes effect at startup.
pub fn spawn_parameter_reload_task(
    path: PathBuf,
    target: SharedParameters,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            reload_once(&path, &target);
        }
    })
}

fn reload_once(path: &Path, target: &SharedParameters) {
    match load_parameter_file(path) {
        Ok(snapshot) => {
            if *target.current() == snapshot {
                debug!(path = %path.display(), "Parameters unchanged");
                return;
            }
            // Already validated by load_parameter_file.
            *target.inner.write() = Arc::new(snapshot);
            info!(path = %path.display(), "Parameters reloaded");
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Parameter reload failed, keeping last snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_snapshot_thresholds() {
        let params = ParameterSnapshot::default();
        assert!((params.variance_enter() - 2500.0).abs() < 1e-6);
        assert!((params.variance_exit() - 10000.0).abs() < 1e-6);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_shared_parameters_replace() {
        let shared = SharedParameters::default();
        let mut next = ParameterSnapshot::default();
        next.entropy_crit = 1.25;
        next.ab_test_group = "B".to_string();
        shared.replace(next).unwrap();

        let snap = shared.snapshot().unwrap();
        assert_eq!(snap.entropy_crit, 1.25);
        assert_eq!(snap.ab_test_group, "B");
    }

    #[test]
    fn test_shared_parameters_rejects_non_finite() {
        let shared = SharedParameters::default();
        let mut bad = ParameterSnapshot::default();
        bad.langevin_exit = f64::NAN;
        assert!(matches!(
            shared.replace(bad),
            Err(ParameterError::Invalid { field: "langevin_exit", .. })
        ));
        assert_eq!(shared.current().langevin_exit, 200.0);
    }

    #[test]
    fn test_load_parameter_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"beta_crit": 0.2, "ab_test_group": "B", "channel_damping": {{"user_day_chat": 1.5}}}}"#
        )
        .unwrap();

        let snap = load_parameter_file(file.path()).unwrap();
        assert_eq!(snap.beta_crit, 0.2);
        assert_eq!(snap.ab_test_group, "B");
        assert_eq!(
            snap.channel_damping.get(&ChannelMode("user_day_chat".to_string())),
            Some(&1.5)
        );
        // Unspecified fields keep defaults
        assert_eq!(snap.gamma_c, 2.0);
    }

    #[test]
    fn test_load_parameter_file_errors() {
        let missing = load_parameter_file(Path::new("/nonexistent/params.json"));
        assert!(matches!(missing, Err(ParameterError::Unavailable(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let malformed = load_parameter_file(file.path());
        assert!(matches!(malformed, Err(ParameterError::Malformed(_))));
    }

    #[test]
    fn test_reload_keeps_last_snapshot_on_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"entropy_crit": 3.5}}"#).unwrap();
        let shared = SharedParameters::default();

        reload_once(file.path(), &shared);
        assert_eq!(shared.current().entropy_crit, 3.5);

        reload_once(Path::new("/nonexistent/params.json"), &shared);
        assert_eq!(shared.current().entropy_crit, 3.5);
    }
}
