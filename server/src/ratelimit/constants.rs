//! Admission control constants.

/// Arrival timestamps retained per key
pub const MAX_TIMESTAMPS: usize = 30;

/// Key pre-allocation size
pub const KEY_CAPACITY: usize = 64;

/// IPv6 prefix segments for rate limiting (uses /64)
pub const IPV6_PREFIX_SEGMENTS: usize = 4;

/// Identity used when no caller address can be determined
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Fallback channel tuning
pub const DEFAULT_WINDOW_MS: u64 = 15 * 60 * 1000;
pub const DEFAULT_MIN_CAPACITY: u32 = 30;
pub const DEFAULT_MAX_CAPACITY: u32 = 400;
pub const DEFAULT_BASE_GAMMA: f64 = 2.5;

/// Variance thresholds are `beta^2` scaled into squared milliseconds
pub const BETA_SCALE: f64 = 1_000_000.0;

/// Kurtosis magnitude below which a burst may enter throttling
pub const KURTOSIS_ENTER: f64 = 10.0;
/// Kurtosis magnitude above which throttling is released
pub const KURTOSIS_EXIT: f64 = 20.0;
/// Entropy margin added to `entropy_crit` for the exit threshold
pub const ENTROPY_EXIT_MARGIN: f64 = 0.5;

/// Damping ratio bounds and per-evaluation perturbation
pub const GAMMA_MIN: f64 = 0.5;
pub const GAMMA_MAX: f64 = 5.0;
pub const GAMMA_JITTER: f64 = 0.05;

/// Capacity step in damped mode
pub const DAMPED_CAPACITY_STEP: u32 = 5;

/// Load ratios for the undamped capacity controller
pub const SHRINK_LOAD_RATIO: f64 = 0.8;
pub const GROW_LOAD_RATIO: f64 = 0.5;

/// Idle horizon after which a key is evicted (1 hour)
pub const DEFAULT_IDLE_SECS: u64 = 3600;

/// Janitor sweep interval (30 minutes)
pub const DEFAULT_JANITOR_SECS: u64 = 1800;

/// Audit queue capacity
pub const DEFAULT_AUDIT_CAPACITY: usize = 1024;

/// Max audit events drained per worker batch
pub const AUDIT_BATCH_CAPACITY: usize = 64;
