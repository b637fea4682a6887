//! Configuration loading from `.env` files.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for all storage.
    pub store_root: PathBuf,
    /// Domain owned by this node, e.g. `alice.example` or `127.0.0.1:7700`.
    pub domain: String,
    /// HTTP bind address, e.g. `127.0.0.1:7700`.
    pub bind_http: String,
    /// Base addresses of peers polled for posts, e.g. `http://bob.example/`.
    pub peers: Vec<String>,
    /// Timeout applied to every remote fetch.
    pub fetch_timeout: Duration,
    /// Lower bound for the poller's sleep between cycles.
    pub poll_min: Duration,
    /// Upper bound for the poller's sleep between cycles.
    pub poll_max: Duration,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT")?);
        let domain = env::var("DOMAIN")?;
        let bind_http = env::var("BIND_HTTP")?;
        let peers = csv_strings(env::var("PEERS").unwrap_or_default())
            .into_iter()
            .map(|p| base_address(&p))
            .collect();
        let fetch_timeout = Duration::from_secs(secs_var("FETCH_TIMEOUT_SECS", 10));
        let poll_min = Duration::from_secs(secs_var("POLL_MIN_SECS", 30));
        // An inverted range would panic the poller's sampler.
        let poll_max = Duration::from_secs(secs_var("POLL_MAX_SECS", 90)).max(poll_min);
        Ok(Self {
            store_root,
            domain,
            bind_http,
            peers,
            fetch_timeout,
            poll_min,
            poll_max,
        })
    }
}

/// Read a seconds value, falling back to `default` when unset or invalid.
fn secs_var(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Normalize a peer base address to end with a single `/`.
pub fn base_address(base: &str) -> String {
    let mut base = base.trim().trim_end_matches('/').to_string();
    base.push('/');
    base
}

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}
