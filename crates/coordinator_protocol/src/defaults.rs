//! Flat default constants referenced across the coordinator: a plain
//! module of `pub const`s rather than a config-object-with-defaults.

/// Request signature validity window.
pub const SIGNATURE_DRIFT_SECS: i64 = 300;

/// Default long-poll `wait`, capped at the internal wake interval below.
pub const DEFAULT_LONG_POLL_WAIT_SECS: u64 = 20;

/// Long-poll handlers re-check the store at least this often even without
/// an explicit wake, so a missed notification never stalls a poller for
/// longer than this.
pub const LONG_POLL_INTERNAL_WAKE_SECS: u64 = 5;

/// `GET /jobs` default page size.
pub const DEFAULT_LIST_LIMIT: u32 = 20;

/// Default window, in seconds, within which a terminal job still appears
/// in an unfiltered `GET /jobs` listing.
pub const DEFAULT_RECENT_WINDOW_SECS: i64 = 3600;

/// Janitor tick interval and jitter bound (`interval ± jitter`, jitter
/// bounded by `min(0.5*interval, jitter)`).
pub const DEFAULT_JANITOR_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_JANITOR_JITTER_SECS: u64 = 5;

/// Reap thresholds, expressed as a multiplier of the relevant per-entity
/// interval.
pub const DEFAULT_WORKER_REAP_THRESHOLD: f64 = 3.0;
pub const DEFAULT_HEARTBEAT_REAP_THRESHOLD: f64 = 3.0;
pub const DEFAULT_CLIENT_HEARTBEAT_REAP_THRESHOLD: f64 = 3.0;

/// Fixed timeouts, in seconds, for jobs that never reach a further state.
pub const DEFAULT_ASSIGNMENT_TIMEOUT_SECS: i64 = 30;
pub const DEFAULT_PENDING_RETRY_DELAY_SECS: i64 = 10;
pub const DEFAULT_PENDING_TIMEOUT_SECS: i64 = 300;

/// `registration_interval`/`heartbeat_interval` callers get when they don't
/// specify one.
pub const DEFAULT_REGISTRATION_INTERVAL_SECS: u32 = 30;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u32 = 30;
