use std::time::Duration;

use crate::sync::{DEFAULT_PULL_TIMEOUT, DEFAULT_PUSH_TIMEOUT};

/// Log filter env var, read by `main` before anything else so config
/// problems can be logged.
pub const LOG_ENV: &str = "ATTENDBOOK_LOG";
pub const DEFAULT_LOG_FILTER: &str = "attendbookd=info";

/// Sidecar settings read from the environment (and `.env` when present).
///
/// | Env Var                        | Default            |
/// |--------------------------------|--------------------|
/// | `ATTENDBOOK_PULL_TIMEOUT_SECS` | `15`               |
/// | `ATTENDBOOK_PUSH_TIMEOUT_SECS` | `30`               |
/// | `ATTENDBOOK_LOG`               | `attendbookd=info` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub pull_timeout: Duration,
    pub push_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            pull_timeout: secs(&lookup, "ATTENDBOOK_PULL_TIMEOUT_SECS", defaults.pull_timeout),
            push_timeout: secs(&lookup, "ATTENDBOOK_PUSH_TIMEOUT_SECS", defaults.push_timeout),
        }
    }
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Duration::from_secs(n),
        _ => {
            tracing::warn!(key, value = %raw, "not a positive number of seconds, using default");
            default
        }
    }
}
