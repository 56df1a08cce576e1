//! Environment-sourced runtime configuration.
//!
//! Every knob has a safe default; malformed values fall back to the
//! default with a warning rather than failing startup.

use std::env;

use tracing::warn;

use crate::queue::ReconcileStrategy;

const STRATEGY_VAR: &str = "POLICY_RECONCILE_STRATEGY";
const RESYNC_FAILURE_MAX_VAR: &str = "POLICY_RESYNC_FAILURE_MAX";
const RESYNC_DELAY_VAR: &str = "POLICY_RESYNC_DELAY_SECONDS";
const LAST_SEEN_LIMIT_VAR: &str = "POLICY_LAST_SEEN_LIMIT_SECONDS";
const RELIST_INTERVAL_VAR: &str = "POLICY_RELIST_INTERVAL_SECONDS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Lane partitioning for queued watch callbacks.
    pub reconcile_strategy: ReconcileStrategy,
    /// Consecutive stream failures tolerated before a watch gives up.
    pub resync_failure_max: u32,
    /// Delay before relisting after an idle stream is torn down.
    pub resync_delay_seconds: u64,
    /// Quiet period after which a stream is considered stalled.
    pub last_seen_limit_seconds: u64,
    /// Periodic full-relist interval requested from the transport.
    pub relist_interval_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconcile_strategy: ReconcileStrategy::default(),
            resync_failure_max: 5,
            resync_delay_seconds: 5,
            last_seen_limit_seconds: 300,
            relist_interval_seconds: 600,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        Self {
            reconcile_strategy: parse_strategy(&lookup, defaults.reconcile_strategy),
            resync_failure_max: parse_var(&lookup, RESYNC_FAILURE_MAX_VAR, defaults.resync_failure_max),
            resync_delay_seconds: parse_var(&lookup, RESYNC_DELAY_VAR, defaults.resync_delay_seconds),
            last_seen_limit_seconds: parse_var(
                &lookup,
                LAST_SEEN_LIMIT_VAR,
                defaults.last_seen_limit_seconds,
            ),
            relist_interval_seconds: parse_var(
                &lookup,
                RELIST_INTERVAL_VAR,
                defaults.relist_interval_seconds,
            ),
        }
    }
}

fn parse_strategy(
    lookup: &impl Fn(&str) -> Option<String>,
    default: ReconcileStrategy,
) -> ReconcileStrategy {
    match lookup(STRATEGY_VAR) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|err| {
            warn!(var = STRATEGY_VAR, value = %raw, %err, "falling back to default");
            default
        }),
    }
}

fn parse_var<T: std::str::FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> T {
    match lookup(name) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "not a valid number, falling back to default");
            default
        }),
    }
}
