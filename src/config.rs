use std::collections::HashMap;
use std::env;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;
use governor::Quota;
use ipnetwork::Ipv4Network;
use lazy_static::lazy_static;
use crate::error::DirectoryError;

lazy_static! {
    static ref DEFAULT_LAN_NETWORK: Ipv4Network =
        Ipv4Network::new([192, 168, 0, 0].into(), 24).expect("valid default LAN network");
}

#[derive(Debug, Clone)]
pub struct Config {
    // Master server
    pub master_url: String,
    pub master_timeout_secs: u64,

    // Probing
    pub probe_timeout_ms: u64,
    pub probe_period_ms: u64,
    pub probe_burst_limit: u32,
    pub io_worker_threads: usize,

    // LAN discovery
    pub lan_network: Ipv4Network,
    pub lan_port_min: u16,
    pub lan_port_max: u16,
    pub lan_window_ms: u64,

    // Server book
    pub max_history_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            master_url: "http://127.0.0.1/server/".to_string(),
            master_timeout_secs: 10,
            probe_timeout_ms: 2000,
            probe_period_ms: 5,
            probe_burst_limit: 64,
            io_worker_threads: 2,
            lan_network: *DEFAULT_LAN_NETWORK,
            lan_port_min: 37015,
            lan_port_max: 37020,
            lan_window_ms: 1000,
            max_history_entries: 100,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Self {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            master_url: lookup("MASTER_URL").unwrap_or(defaults.master_url),
            master_timeout_secs: parsed(&lookup, "MASTER_TIMEOUT_SECS", defaults.master_timeout_secs),
            probe_timeout_ms: parsed(&lookup, "PROBE_TIMEOUT_MS", defaults.probe_timeout_ms),
            probe_period_ms: parsed(&lookup, "PROBE_PERIOD_MS", defaults.probe_period_ms),
            probe_burst_limit: parsed(&lookup, "PROBE_BURST_LIMIT", defaults.probe_burst_limit),
            io_worker_threads: parsed(&lookup, "IO_WORKER_THREADS", defaults.io_worker_threads),
            lan_network: parsed(&lookup, "LAN_NETWORK", defaults.lan_network),
            lan_port_min: parsed(&lookup, "LAN_PORT_MIN", defaults.lan_port_min),
            lan_port_max: parsed(&lookup, "LAN_PORT_MAX", defaults.lan_port_max),
            lan_window_ms: parsed(&lookup, "LAN_WINDOW_MS", defaults.lan_window_ms),
            max_history_entries: parsed(&lookup, "MAX_HISTORY_ENTRIES", defaults.max_history_entries),
        }
    }

    pub fn validate(&self) -> Result<(), DirectoryError> {
        if self.io_worker_threads == 0 {
            return Err(DirectoryError::Config("IO_WORKER_THREADS must be at least 1".into()));
        }
        if self.lan_port_min > self.lan_port_max {
            return Err(DirectoryError::Config(format!(
                "LAN_PORT_MIN ({}) is above LAN_PORT_MAX ({})",
                self.lan_port_min, self.lan_port_max
            )));
        }
        self.probe_quota().map(|_| ())
    }

    /// Client-wide throttle for outgoing probes.
    pub fn probe_quota(&self) -> Result<Quota, DirectoryError> {
        let burst = NonZeroU32::new(self.probe_burst_limit)
            .ok_or_else(|| DirectoryError::Config("PROBE_BURST_LIMIT must be non-zero".into()))?;
        let quota = Quota::with_period(Duration::from_millis(self.probe_period_ms))
            .ok_or_else(|| DirectoryError::Config("PROBE_PERIOD_MS must be non-zero".into()))?;
        Ok(quota.allow_burst(burst))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn master_timeout(&self) -> Duration {
        Duration::from_secs(self.master_timeout_secs)
    }

    pub fn lan_window(&self) -> Duration {
        Duration::from_millis(self.lan_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lan_network.broadcast(), std::net::Ipv4Addr::new(192, 168, 0, 255));
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let mut vars = HashMap::new();
        vars.insert("MASTER_URL".to_string(), "http://master.example/server/".to_string());
        vars.insert("PROBE_TIMEOUT_MS".to_string(), "250".to_string());
        vars.insert("LAN_NETWORK".to_string(), "10.0.0.0/16".to_string());
        vars.insert("LAN_PORT_MIN".to_string(), "not a port".to_string());

        let config = Config::from_map(&vars);
        assert_eq!(config.master_url, "http://master.example/server/");
        assert_eq!(config.probe_timeout(), Duration::from_millis(250));
        assert_eq!(config.lan_network.broadcast(), std::net::Ipv4Addr::new(10, 0, 255, 255));
        assert_eq!(config.lan_port_min, Config::default().lan_port_min);
    }

    #[test]
    fn zero_burst_is_rejected() {
        let config = Config { probe_burst_limit: 0, ..Config::default() };
        assert!(matches!(config.validate(), Err(DirectoryError::Config(_))));
    }

    #[test]
    fn inverted_lan_ports_are_rejected() {
        let config = Config { lan_port_min: 40000, lan_port_max: 37015, ..Config::default() };
        assert!(matches!(config.validate(), Err(DirectoryError::Config(_))));
    }
}
