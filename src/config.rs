use std::path::PathBuf;
use std::str::FromStr;

use crate::limits::MAX_TENANTS;

/// Server settings, read once at startup from `VACANCY_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub max_tenants: usize,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "vacancy".into(),
            max_connections: 256,
            compact_threshold: 1000,
            max_tenants: MAX_TENANTS,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset or unparseable numeric
    /// values fall back to the defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parsed(&get, "VACANCY_PORT").unwrap_or(defaults.port),
            bind: get("VACANCY_BIND").unwrap_or(defaults.bind),
            data_dir: get("VACANCY_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: get("VACANCY_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&get, "VACANCY_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&get, "VACANCY_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            max_tenants: parsed(&get, "VACANCY_MAX_TENANTS").unwrap_or(defaults.max_tenants),
            tls_cert: get("VACANCY_TLS_CERT"),
            tls_key: get("VACANCY_TLS_KEY"),
            metrics_port: parsed(&get, "VACANCY_METRICS_PORT"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
