//! Core admission controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, info, trace, warn};

use crate::ratelimit::{
    is_internal_identity, AdmissionConfig, AdmissionRequest, AuditEvent, AuditKind, AuditSink,
    ChannelMode, ChannelTuning, Decision, Features, KeyState, KeyStateView, ParameterProvider,
    ParameterSnapshot, RouteGroup, TimeOfDay, DAMPED_CAPACITY_STEP, ENTROPY_EXIT_MARGIN,
    GAMMA_JITTER, GAMMA_MAX, GAMMA_MIN, GROW_LOAD_RATIO, KEY_CAPACITY, KURTOSIS_ENTER,
    KURTOSIS_EXIT, SHRINK_LOAD_RATIO,
};

/// Burst-aware admission controller with per-key in-process state.
///
/// Cheap to clone; clones share the same key map, parameters and audit sink.
/// Each key's state is only touched while its map shard is write-locked, so
/// concurrent decisions for the same key never lose updates.
#[derive(Clone)]
pub struct AdmissionController {
    config: Arc<AdmissionConfig>,
    params: Arc<dyn ParameterProvider>,
    audit: Arc<dyn AuditSink>,
    states: Arc<DashMap<String, KeyState>>,
    last_known: Arc<RwLock<Option<Arc<ParameterSnapshot>>>>,
    sweeping: Arc<AtomicBool>,
}

/// Inputs to one evaluation of an existing key.
struct Evaluation<'a> {
    now: Instant,
    tuning: &'a ChannelTuning,
    params: &'a ParameterSnapshot,
    sensitive: bool,
    damped: bool,
}

/// Result of one evaluation.
struct Outcome {
    decision: Decision,
    transition: Option<(AuditKind, Features)>,
}

impl AdmissionController {
    pub fn new(
        config: AdmissionConfig,
        params: Arc<dyn ParameterProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            params,
            audit,
            states: Arc::new(DashMap::new()),
            last_known: Arc::new(RwLock::new(None)),
            sweeping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Decides whether to admit `request` at the current time.
    pub fn decide(&self, request: &AdmissionRequest) -> Decision {
        self.decide_at(request, Instant::now(), TimeOfDay::now())
    }

    /// Decides whether to admit `request` using an explicit clock reading.
    ///
    /// The first request for a key, and the first request after its window
    /// expires, are always admitted.
    #[tracing::instrument(skip(self, request, now), fields(identity = %request.identity))]
    pub fn decide_at(
        &self,
        request: &AdmissionRequest,
        now: Instant,
        time_of_day: TimeOfDay,
    ) -> Decision {
        if !self.config.enabled {
            return Decision::allow();
        }

        if self.is_bypassed(&request.identity) {
            trace!("Identity bypasses admission control");
            return Decision::allow();
        }

        let group = RouteGroup::from_path(&request.path);
        let mode = ChannelMode::new(request.privilege.unwrap_or_default(), time_of_day, group);
        let key = build_key(&request.identity, group);
        let params = self.parameters();
        let tuning = self.resolve_tuning(&mode, &params);

        let eval = Evaluation {
            now,
            tuning: &tuning,
            params: &params,
            sensitive: request.is_sensitive(),
            damped: self.config.damped,
        };

        let outcome = match self.states.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(KeyState::new(now, &tuning));
                debug!(key = %key, channel_mode = %mode, "Tracking new key");
                return Decision::allow();
            }
            Entry::Occupied(mut occupied) => evaluate(occupied.get_mut(), &eval),
        };

        if let Some((kind, features)) = outcome.transition {
            match kind {
                AuditKind::RateLimit => info!(
                    key = %key,
                    channel_mode = %mode,
                    variance = features.variance,
                    entropy = features.entropy,
                    kurtosis = features.kurtosis,
                    noise = features.noise,
                    "Synchronized burst detected, throttling key"
                ),
                AuditKind::RateLimitExit => info!(
                    key = %key,
                    channel_mode = %mode,
                    "Burst subsided, releasing throttle"
                ),
            }
            self.audit.record(AuditEvent {
                kind,
                key: key.clone(),
                channel_mode: mode.clone(),
                features,
                ab_test_group: params.ab_test_group.clone(),
                at: Utc::now(),
            });
        }

        if !outcome.decision.allow {
            debug!(
                key = %key,
                channel_mode = %mode,
                retry_after = outcome.decision.retry_after_secs,
                "Admission denied"
            );
        }

        outcome.decision
    }

    /// Whether `identity` skips admission control entirely.
    pub fn is_bypassed(&self, identity: &str) -> bool {
        self.config.allowlist.contains(identity)
            || (self.config.bypass_private && is_internal_identity(identity))
    }

    /// Current parameters; on provider failure the last good snapshot, else defaults.
    fn parameters(&self) -> Arc<ParameterSnapshot> {
        match self.params.snapshot() {
            Ok(snapshot) => {
                let mut last = self.last_known.write();
                if last.as_ref().is_none_or(|prev| !Arc::ptr_eq(prev, &snapshot)) {
                    *last = Some(Arc::clone(&snapshot));
                }
                snapshot
            }
            Err(e) => {
                warn!(error = %e, "Parameter provider failed, using last known parameters");
                self.last_known
                    .read()
                    .clone()
                    .unwrap_or_else(|| Arc::new(ParameterSnapshot::default()))
            }
        }
    }

    /// Override table first, then provider damping for the channel, then defaults.
    fn resolve_tuning(&self, mode: &ChannelMode, params: &ParameterSnapshot) -> ChannelTuning {
        if let Some(tuning) = self.config.channel_overrides.get(mode) {
            return *tuning;
        }
        if let Some(&base_gamma) = params.channel_damping.get(mode) {
            return ChannelTuning {
                base_gamma,
                ..self.config.default_channel
            };
        }
        self.config.default_channel
    }

    /// Evicts keys idle for longer than `horizon`.
    ///
    /// Returns `None` without doing anything if another sweep is running.
    pub fn evict_idle(&self, now: Instant, horizon: Duration) -> Option<usize> {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sweep already in progress, skipping");
            return None;
        }

        let before = self.states.len();
        self.states
            .retain(|_, state| now.saturating_duration_since(state.last) <= horizon);
        let evicted = before.saturating_sub(self.states.len());

        self.sweeping.store(false, Ordering::Release);
        Some(evicted)
    }

    /// Diagnostic copy of one key's state.
    pub fn inspect(&self, key: &str) -> Option<KeyStateView> {
        let now = Instant::now();
        self.states.get(key).map(|state| state.view(now))
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.states.len()
    }

    /// Returns the configuration for this controller.
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }
}

/// Builds the state key for an identity and route group.
pub fn build_key(identity: &str, group: RouteGroup) -> String {
    let mut key = String::with_capacity(KEY_CAPACITY);
    key.push_str(identity);
    key.push(':');
    key.push_str(group.as_str());
    key
}

fn evaluate(state: &mut KeyState, eval: &Evaluation<'_>) -> Outcome {
    let tuning = eval.tuning;

    if state.window_expired(eval.now, tuning) {
        state.reset(eval.now, tuning);
        return Outcome {
            decision: Decision::allow(),
            transition: None,
        };
    }

    state.record_arrival(eval.now);
    state.clamp_capacity(tuning);

    let features = Features::from_timestamps(&state.timestamps);
    let mut transition = None;

    if state.is_throttled {
        if should_release(&features, eval.params) {
            state.is_throttled = false;
            state.throttled_at = None;
            state.count = state.dynamic_capacity / 2;
            transition = Some((AuditKind::RateLimitExit, features));
        }
    } else if eval.sensitive && is_synchronized(&features, eval.params) {
        state.is_throttled = true;
        state.throttled_at = Some(eval.now);
        transition = Some((AuditKind::RateLimit, features));
    }

    adapt_capacity(state, eval);
    state.debug_check();

    let allow = if eval.sensitive {
        !state.is_throttled && state.count <= state.dynamic_capacity
    } else {
        // Reads are only held to the hard ceiling.
        state.count <= tuning.max
    };

    let decision = if allow {
        Decision::allow()
    } else {
        Decision::deny(state.retry_after_secs(eval.now, tuning))
    };

    Outcome {
        decision,
        transition,
    }
}

/// Entry condition: every feature must look like a synchronized burst.
fn is_synchronized(features: &Features, params: &ParameterSnapshot) -> bool {
    features.variance < params.variance_enter()
        && features.entropy < params.entropy_crit
        && features.kurtosis.abs() < KURTOSIS_ENTER
        && features.noise < params.langevin_threshold
}

/// Exit condition: any single feature leaving the burst regime releases.
fn should_release(features: &Features, params: &ParameterSnapshot) -> bool {
    features.variance > params.variance_exit()
        || features.entropy > params.entropy_crit + ENTROPY_EXIT_MARGIN
        || features.kurtosis.abs() > KURTOSIS_EXIT
        || features.noise > params.langevin_exit
}

fn adapt_capacity(state: &mut KeyState, eval: &Evaluation<'_>) {
    let elapsed_secs = state.elapsed(eval.now).as_secs_f64();
    let rate = f64::from(state.count) / (elapsed_secs + 1.0);
    let rate_delta = rate - state.last_rate;
    state.last_rate = rate;

    if eval.damped {
        let gamma_c = eval.params.gamma_c;
        if state.damping_ratio > gamma_c {
            state.dynamic_capacity = state.dynamic_capacity.saturating_add(DAMPED_CAPACITY_STEP);
        } else if state.damping_ratio < gamma_c {
            state.dynamic_capacity = state.dynamic_capacity.saturating_sub(DAMPED_CAPACITY_STEP);
        }
        let jitter = rand::thread_rng().gen_range(-GAMMA_JITTER..=GAMMA_JITTER);
        state.damping_ratio = (state.damping_ratio + jitter).clamp(GAMMA_MIN, GAMMA_MAX);
    } else {
        let capacity = f64::from(state.dynamic_capacity);
        if rate > capacity * SHRINK_LOAD_RATIO {
            state.dynamic_capacity = state.dynamic_capacity.saturating_sub(1);
        } else if rate < capacity * GROW_LOAD_RATIO {
            state.dynamic_capacity = state.dynamic_capacity.saturating_add(1);
        }
    }
    state.clamp_capacity(eval.tuning);

    trace!(
        rate,
        rate_delta,
        capacity = state.dynamic_capacity,
        gamma = state.damping_ratio,
        "Capacity adapted"
    );
}
