//! Process-level settings read from the environment.
//!
//! These cover only how the process runs; everything the bridge relays lives in
//! the YAML shards under the data directory.

use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use tracing::{info, warn};

/// Directory holding the configuration shards.
pub const DATA_DIR_ENV: &str = "CRAFTRELAY_DATA_DIR";
/// Bind address of the admin and chat HTTP surface.
pub const ADMIN_ADDR_ENV: &str = "CRAFTRELAY_ADMIN_ADDR";
/// Seconds between periodic write-behind flushes.
pub const FLUSH_INTERVAL_ENV: &str = "CRAFTRELAY_FLUSH_INTERVAL_SECS";
/// Queue length that triggers an early flush.
pub const FLUSH_THRESHOLD_ENV: &str = "CRAFTRELAY_FLUSH_THRESHOLD";
/// Seconds allowed for a remote-console connect and login.
pub const CONNECT_TIMEOUT_ENV: &str = "CRAFTRELAY_CONNECT_TIMEOUT_SECS";
/// Milliseconds server up/down notices are held back.
pub const STATUS_DELAY_ENV: &str = "CRAFTRELAY_STATUS_DELAY_MS";

const DEFAULT_DATA_DIR: &str = "config";
const DEFAULT_ADMIN_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
    8080,
);
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_FLUSH_THRESHOLD: usize = 50;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_STATUS_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime settings shared across the application.
pub struct AppConfig {
    /// Directory holding the configuration shards.
    pub data_dir: PathBuf,
    /// Address the admin and chat HTTP surface binds to.
    pub admin_addr: SocketAddr,
    /// Period of the write-behind flusher.
    pub flush_interval: Duration,
    /// Queued file count that triggers an early flush.
    pub flush_threshold: usize,
    /// Upper bound on one remote-console connect and auth.
    pub connect_timeout: Duration,
    /// Delay applied to server status notices.
    pub status_delay: Duration,
}

impl AppConfig {
    /// Read settings from the process environment, falling back to defaults.
    pub fn load() -> Self {
        let config = Self::from_lookup(|key| env::var(key).ok());
        info!(
            data_dir = %config.data_dir.display(),
            admin_addr = %config.admin_addr,
            flush_interval_secs = config.flush_interval.as_secs(),
            flush_threshold = config.flush_threshold,
            "runtime settings loaded"
        );
        config
    }

    /// Build settings from an arbitrary variable source.
    ///
    /// Values that fail to parse are logged and replaced with their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup(DATA_DIR_ENV)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        Self {
            data_dir,
            admin_addr: parsed(&lookup, ADMIN_ADDR_ENV).unwrap_or(DEFAULT_ADMIN_ADDR),
            flush_interval: parsed::<u64>(&lookup, FLUSH_INTERVAL_ENV)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_FLUSH_INTERVAL),
            flush_threshold: parsed::<usize>(&lookup, FLUSH_THRESHOLD_ENV)
                .filter(|threshold| *threshold > 0)
                .unwrap_or(DEFAULT_FLUSH_THRESHOLD),
            connect_timeout: parsed::<u64>(&lookup, CONNECT_TIMEOUT_ENV)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            status_delay: parsed::<u64>(&lookup, STATUS_DELAY_ENV)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_STATUS_DELAY),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = key, value = %raw, "invalid value; using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = AppConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("config"));
        assert_eq!(config.admin_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.flush_threshold, 50);
        assert_eq!(config.status_delay, Duration::from_secs(2));
    }

    #[test]
    fn variables_override_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            (DATA_DIR_ENV, "/srv/relay"),
            (ADMIN_ADDR_ENV, "0.0.0.0:9000"),
            (FLUSH_INTERVAL_ENV, "5"),
            (STATUS_DELAY_ENV, "0"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/srv/relay"));
        assert_eq!(config.admin_addr.port(), 9000);
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert_eq!(config.status_delay, Duration::ZERO);
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = AppConfig::from_lookup(lookup(&[
            (ADMIN_ADDR_ENV, "not-an-address"),
            (FLUSH_THRESHOLD_ENV, "0"),
            (CONNECT_TIMEOUT_ENV, "soon"),
        ]));
        assert_eq!(config.admin_addr, DEFAULT_ADMIN_ADDR);
        assert_eq!(config.flush_threshold, DEFAULT_FLUSH_THRESHOLD);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }
}
