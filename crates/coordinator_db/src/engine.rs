//! Engine-specific "stale-row" predicates: a `Store` interface plus an
//! `Engine` providing parameterized-query execution, so engine-specific
//! stale-row predicates become method calls on the engine that return a
//! typed clause rather than dialect-`if`s scattered through the stores.
//!
//! Each predicate is a SQL boolean expression fragment, written in the
//! placeholder syntax its own backend expects, that the stores splice into
//! a `WHERE` clause. Parameter order is the same across engines so a
//! store's bind sequence doesn't need to change with the feature flag.

pub trait StaleRowEngine {
    /// `worker_last_seen + threshold_factor * heartbeat_interval < now`
    /// Binds: `(threshold_factor,)`.
    fn stale_running_predicate() -> &'static str;

    /// `last_update + timeout_seconds < now` (assigned jobs use a fixed
    /// timeout, not a per-job multiplier). Binds: `(timeout_seconds,)`.
    fn stale_assigned_predicate() -> &'static str;

    /// `created_at + min_seconds < now`. Binds: `(min_seconds,)`.
    fn stale_pending_min_predicate() -> &'static str;

    /// `created_at + max_seconds >= now` (upper bound exclusive of the
    /// failure threshold; absent when only a lower bound is wanted).
    /// Binds: `(max_seconds,)`.
    fn stale_pending_max_predicate() -> &'static str;

    /// `client_last_seen + threshold_factor * heartbeat_interval < now`.
    /// Binds: `(threshold_factor,)`.
    fn stale_monitored_predicate() -> &'static str;

    /// `last_seen + threshold_factor * registration_interval < now`.
    /// Binds: `(threshold_factor,)`.
    fn stale_worker_predicate() -> &'static str;

    /// Current time as the engine's native "now" expression, so a single
    /// query can compare every row against one consistent timestamp.
    fn now_expr() -> &'static str;
}

#[cfg(feature = "sqlite")]
pub struct SqliteEngine;

#[cfg(feature = "sqlite")]
impl StaleRowEngine for SqliteEngine {
    fn stale_running_predicate() -> &'static str {
        "(CAST(strftime('%s','now') AS INTEGER) - CAST(strftime('%s', worker_last_seen) AS INTEGER)) > (heartbeat_interval * ?)"
    }

    fn stale_assigned_predicate() -> &'static str {
        "(CAST(strftime('%s','now') AS INTEGER) - CAST(strftime('%s', last_update) AS INTEGER)) > ?"
    }

    fn stale_pending_min_predicate() -> &'static str {
        "(CAST(strftime('%s','now') AS INTEGER) - CAST(strftime('%s', created_at) AS INTEGER)) >= ?"
    }

    fn stale_pending_max_predicate() -> &'static str {
        "(CAST(strftime('%s','now') AS INTEGER) - CAST(strftime('%s', created_at) AS INTEGER)) < ?"
    }

    fn stale_monitored_predicate() -> &'static str {
        "(CAST(strftime('%s','now') AS INTEGER) - CAST(strftime('%s', client_last_seen) AS INTEGER)) > (heartbeat_interval * ?)"
    }

    fn stale_worker_predicate() -> &'static str {
        "(CAST(strftime('%s','now') AS INTEGER) - CAST(strftime('%s', last_seen) AS INTEGER)) > (registration_interval * ?)"
    }

    fn now_expr() -> &'static str {
        "strftime('%Y-%m-%dT%H:%M:%fZ','now')"
    }
}

#[cfg(feature = "postgres")]
pub struct PostgresEngine;

#[cfg(feature = "postgres")]
impl StaleRowEngine for PostgresEngine {
    fn stale_running_predicate() -> &'static str {
        "EXTRACT(EPOCH FROM (now() - worker_last_seen)) > (heartbeat_interval * $1)"
    }

    fn stale_assigned_predicate() -> &'static str {
        "EXTRACT(EPOCH FROM (now() - last_update)) > $1"
    }

    fn stale_pending_min_predicate() -> &'static str {
        "EXTRACT(EPOCH FROM (now() - created_at)) >= $1"
    }

    fn stale_pending_max_predicate() -> &'static str {
        "EXTRACT(EPOCH FROM (now() - created_at)) < $1"
    }

    fn stale_monitored_predicate() -> &'static str {
        "EXTRACT(EPOCH FROM (now() - client_last_seen)) > (heartbeat_interval * $1)"
    }

    fn stale_worker_predicate() -> &'static str {
        "EXTRACT(EPOCH FROM (now() - last_seen)) > (registration_interval * $1)"
    }

    fn now_expr() -> &'static str {
        "now()"
    }
}

#[cfg(feature = "sqlite")]
pub type DefaultEngine = SqliteEngine;
#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type DefaultEngine = PostgresEngine;
