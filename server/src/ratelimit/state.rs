//! Per-key admission state.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::ratelimit::{ChannelTuning, GAMMA_MAX, GAMMA_MIN, MAX_TIMESTAMPS};

/// Mutable record for one `{identity}:{group}` key.
#[derive(Debug, Clone)]
pub struct KeyState {
    /// Requests seen in the current window
    pub count: u32,
    /// Start of the current counting window
    pub window_start: Instant,
    /// Most recent request, used for idle eviction
    pub last: Instant,
    /// Requests/sec at the previous evaluation
    pub last_rate: f64,
    /// Most recent arrivals, oldest first
    pub timestamps: VecDeque<Instant>,
    /// Damping ratio, kept within `[GAMMA_MIN, GAMMA_MAX]`
    pub damping_ratio: f64,
    /// Adaptive admission ceiling for sensitive requests
    pub dynamic_capacity: u32,
    pub is_throttled: bool,
    pub throttled_at: Option<Instant>,
}

impl KeyState {
    /// State for a key's first request, which is always admitted.
    pub fn new(now: Instant, tuning: &ChannelTuning) -> Self {
        let mut timestamps = VecDeque::with_capacity(MAX_TIMESTAMPS);
        timestamps.push_back(now);
        Self {
            count: 1,
            window_start: now,
            last: now,
            last_rate: 0.0,
            timestamps,
            damping_ratio: tuning.base_gamma.clamp(GAMMA_MIN, GAMMA_MAX),
            dynamic_capacity: capacity_bounds(tuning).0,
            is_throttled: false,
            throttled_at: None,
        }
    }

    /// Time since the current window opened.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.window_start)
    }

    pub fn window_expired(&self, now: Instant, tuning: &ChannelTuning) -> bool {
        self.elapsed(now) > Duration::from_millis(tuning.window_ms)
    }

    /// Hard reset at a window boundary; the triggering request counts as the first.
    pub fn reset(&mut self, now: Instant, tuning: &ChannelTuning) {
        self.count = 1;
        self.window_start = now;
        self.last = now;
        self.timestamps.clear();
        self.timestamps.push_back(now);
        self.is_throttled = false;
        self.throttled_at = None;
        self.dynamic_capacity = capacity_bounds(tuning).0;
    }

    /// Counts one more arrival and records it in the ring buffer.
    pub fn record_arrival(&mut self, now: Instant) {
        self.count = self.count.saturating_add(1);
        // Instants from one process are monotonic; keep the buffer ordered regardless.
        let ts = self.timestamps.back().map_or(now, |&prev| prev.max(now));
        if self.timestamps.len() == MAX_TIMESTAMPS {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(ts);
        self.last = self.last.max(now);
    }

    /// Pulls the capacity into `[min, max]` of the given channel.
    ///
    /// The channel for a key can change between requests (time of day,
    /// privilege, parameter reloads), so this runs before and after feedback.
    pub fn clamp_capacity(&mut self, tuning: &ChannelTuning) {
        let (min, max) = capacity_bounds(tuning);
        self.dynamic_capacity = self.dynamic_capacity.clamp(min, max);
    }

    /// Panics in debug builds if the record is internally inconsistent.
    pub fn debug_check(&self) {
        debug_assert!(self.timestamps.len() <= MAX_TIMESTAMPS);
        debug_assert!(
            self.timestamps
                .iter()
                .zip(self.timestamps.iter().skip(1))
                .all(|(a, b)| a <= b),
            "timestamps out of order"
        );
        debug_assert!((GAMMA_MIN..=GAMMA_MAX).contains(&self.damping_ratio));
        debug_assert_eq!(self.is_throttled, self.throttled_at.is_some());
    }

    /// Seconds left in the current window, rounded up and never below 1.
    pub fn retry_after_secs(&self, now: Instant, tuning: &ChannelTuning) -> u64 {
        let window = Duration::from_millis(tuning.window_ms);
        let remaining = window.saturating_sub(self.elapsed(now));
        remaining.as_secs_f64().ceil().max(1.0) as u64
    }

    pub fn view(&self, now: Instant) -> KeyStateView {
        KeyStateView {
            count: self.count,
            window_elapsed_ms: self.elapsed(now).as_millis() as u64,
            idle_ms: now.saturating_duration_since(self.last).as_millis() as u64,
            samples: self.timestamps.len(),
            damping_ratio: self.damping_ratio,
            dynamic_capacity: self.dynamic_capacity,
            is_throttled: self.is_throttled,
            throttled_for_ms: self
                .throttled_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
        }
    }
}

/// `[min, max]` for a channel, tolerating a misconfigured `min > max`.
pub fn capacity_bounds(tuning: &ChannelTuning) -> (u32, u32) {
    (tuning.min.min(tuning.max), tuning.max)
}

/// Read-only copy of a key's state, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyStateView {
    pub count: u32,
    pub window_elapsed_ms: u64,
    pub idle_ms: u64,
    pub samples: usize,
    pub damping_ratio: f64,
    pub dynamic_capacity: u32,
    pub is_throttled: bool,
    pub throttled_for_ms: Option<u64>,
}
