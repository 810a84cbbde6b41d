use crate::data::GenerateOptions;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a valid {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("TIMETABLE_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost {
        #[source]
        source: std::net::AddrParseError,
    },
}

/// Settings for the service, read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Options used when a request does not carry its own.
    pub defaults: GenerateOptions,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut defaults = GenerateOptions::default();
        if let Some(ms) = parse::<u64>(&lookup, "TIMETABLE_TIME_LIMIT_MS", "number of milliseconds")? {
            defaults.time_limit = Duration::from_millis(ms);
        }
        if let Some(budget) = parse::<u64>(&lookup, "TIMETABLE_BACKTRACK_BUDGET", "u64")? {
            defaults.backtrack_budget = budget;
        }
        if let Some(n) = parse::<usize>(&lookup, "TIMETABLE_MAX_ALTERNATIVES", "usize")? {
            defaults.max_alternatives = n;
        }

        Ok(Self {
            host: lookup("TIMETABLE_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse::<u16>(&lookup, "TIMETABLE_PORT", "u16")?.unwrap_or(8080),
            log_level: lookup("TIMETABLE_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            defaults,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key,
                expected,
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn uses_defaults_when_env_missing() {
        let config = load(&[]).expect("config loads with defaults");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.defaults, GenerateOptions::default());
    }

    #[test]
    fn overrides_search_defaults() {
        let config = load(&[
            ("TIMETABLE_TIME_LIMIT_MS", "250"),
            ("TIMETABLE_BACKTRACK_BUDGET", "42"),
            ("TIMETABLE_MAX_ALTERNATIVES", "5"),
        ])
        .expect("config loads");
        assert_eq!(config.defaults.time_limit, Duration::from_millis(250));
        assert_eq!(config.defaults.backtrack_budget, 42);
        assert_eq!(config.defaults.max_alternatives, 5);
    }

    #[test]
    fn rejects_bad_port() {
        let err = load(&[("TIMETABLE_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("TIMETABLE_PORT"));
    }

    #[test]
    fn accepts_localhost_host() {
        let config = load(&[("TIMETABLE_HOST", "localhost"), ("TIMETABLE_PORT", "9000")]).unwrap();
        let addr = config.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 9000));
    }
}
