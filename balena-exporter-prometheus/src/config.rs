//! Configuration for the balena exporter.
//!
//! Values come from, in increasing priority: built-in defaults, an optional
//! JSON5 file, and environment variables.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;
use tracing::Level;

/// Environment variable names.
pub mod env {
    pub const POLLING_INTERVAL_SECONDS: &str = "POLLING_INTERVAL_SECONDS";
    pub const EXPORTER_PORT: &str = "EXPORTER_PORT";
    pub const BALENA_API_URI: &str = "BALENA_API_URI";
    pub const BALENA_USER: &str = "BALENA_USER";
    pub const BALENA_PWD: &str = "BALENA_PWD";
    pub const BALENA_API_TOKEN: &str = "BALENA_API_TOKEN";
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Remote API settings.
    #[serde(default)]
    pub balena: BalenaConfig,

    /// Poll loop settings.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Prometheus HTTP endpoint settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote fleet API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalenaConfig {
    /// API base URL, without the `/v6` suffix.
    #[serde(default = "default_api_uri")]
    pub api_uri: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,

    /// Pre-issued API token. When set, no login is performed.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_uri() -> String {
    "https://api.balena-cloud.de".to_string()
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "********".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for BalenaConfig {
    fn default() -> Self {
        Self {
            api_uri: default_api_uri(),
            username: default_username(),
            password: default_password(),
            api_token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Poll scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Sleep between the end of one cycle and the start of the next (seconds).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Stop the exporter on the first failed cycle instead of waiting for
    /// the next interval.
    #[serde(default)]
    pub exit_on_error: bool,
}

fn default_interval() -> u64 {
    60
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            exit_on_error: false,
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to bind (default: "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on (default: 9877).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9877
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
        }
    }
}

impl PrometheusConfig {
    /// Socket address the HTTP server binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| {
                ConfigError::Validation(format!(
                    "Invalid listen address: {}:{}",
                    self.host, self.port
                ))
            })
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Parsed log level.
    pub fn max_level(&self) -> Result<Level, ConfigError> {
        self.level
            .parse()
            .map_err(|_| ConfigError::Validation(format!("Invalid log level: {}", self.level)))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ExporterConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(env::POLLING_INTERVAL_SECONDS) {
            self.polling.interval_secs = parse_env(env::POLLING_INTERVAL_SECONDS, value)?;
        }
        if let Some(value) = lookup(env::EXPORTER_PORT) {
            self.prometheus.port = parse_env(env::EXPORTER_PORT, value)?;
        }
        if let Some(value) = lookup(env::BALENA_API_URI) {
            self.balena.api_uri = value;
        }
        if let Some(value) = lookup(env::BALENA_USER) {
            self.balena.username = value;
        }
        if let Some(value) = lookup(env::BALENA_PWD) {
            self.balena.password = value;
        }
        if let Some(value) = lookup(env::BALENA_API_TOKEN) {
            self.balena.api_token = Some(value).filter(|t| !t.is_empty());
        }

        self.validate()
    }

    /// Replace the configured log level with the one given on the command
    /// line, if any.
    pub fn override_log_level(&mut self, level: Option<String>) -> Result<(), ConfigError> {
        if let Some(level) = level {
            self.logging.level = level;
        }
        self.logging.max_level().map(|_| ())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "interval_secs must be > 0".to_string(),
            ));
        }

        if self.prometheus.port == 0 {
            return Err(ConfigError::Validation("port must be > 0".to_string()));
        }

        if self.balena.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }

        if !(self.balena.api_uri.starts_with("http://")
            || self.balena.api_uri.starts_with("https://"))
        {
            return Err(ConfigError::Validation(format!(
                "API URI must start with http:// or https://: {}",
                self.balena.api_uri
            )));
        }

        self.prometheus.listen_addr()?;
        self.logging.max_level()?;

        // Validate path starts with /
        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| vars.get(var).cloned()
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert_eq!(config.polling.interval_secs, 60);
        assert!(!config.polling.exit_on_error);
        assert_eq!(config.prometheus.port, 9877);
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.balena.api_uri, "https://api.balena-cloud.de");
        assert_eq!(config.balena.username, "admin");
        assert_eq!(config.balena.password, "********");
        assert_eq!(config.balena.api_token, None);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            balena: {
                api_uri: "https://api.example.com",
                username: "ops",
                password: "hunter2",
                request_timeout_secs: 10
            },
            polling: {
                interval_secs: 15,
                exit_on_error: true
            },
            prometheus: {
                host: "127.0.0.1",
                port: 9100,
                path: "/prometheus/metrics"
            },
            logging: {
                level: "debug",
                format: "json"
            }
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.balena.api_uri, "https://api.example.com");
        assert_eq!(config.balena.username, "ops");
        assert_eq!(config.balena.request_timeout_secs, 10);
        assert_eq!(config.polling.interval_secs, 15);
        assert!(config.polling.exit_on_error);
        assert_eq!(
            config.prometheus.listen_addr().unwrap(),
            "127.0.0.1:9100".parse().unwrap()
        );
        assert_eq!(config.prometheus.path, "/prometheus/metrics");
        assert_eq!(config.logging.max_level().unwrap(), Level::DEBUG);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_log_level_from_file_kept_without_cli_flag() {
        let mut config = ExporterConfig::parse(r#"{ logging: { level: "warn" } }"#).unwrap();
        config.override_log_level(None).unwrap();

        assert_eq!(config.logging.max_level().unwrap(), Level::WARN);
    }

    #[test]
    fn test_log_level_cli_flag_wins() {
        let mut config = ExporterConfig::parse(r#"{ logging: { level: "warn" } }"#).unwrap();
        config
            .override_log_level(Some("trace".to_string()))
            .unwrap();

        assert_eq!(config.logging.max_level().unwrap(), Level::TRACE);
    }

    #[test]
    fn test_default_log_level_is_info() {
        let config = ExporterConfig::default();
        assert_eq!(config.logging.max_level().unwrap(), Level::INFO);
    }

    #[test]
    fn test_invalid_log_level() {
        let result = ExporterConfig::parse(r#"{ logging: { level: "loud" } }"#);
        assert!(result.unwrap_err().to_string().contains("Invalid log level"));

        let mut config = ExporterConfig::default();
        assert!(config.override_log_level(Some("loud".to_string())).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ polling: {{ interval_secs: 5 }} }}").unwrap();

        let config = ExporterConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.polling.interval_secs, 5);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ExporterConfig::default();
        config
            .apply_env(lookup_from(&[
                ("POLLING_INTERVAL_SECONDS", "30"),
                ("EXPORTER_PORT", "9999"),
                ("BALENA_API_URI", "https://api.balena-cloud.com"),
                ("BALENA_USER", "fleet"),
                ("BALENA_PWD", "s3cret"),
            ]))
            .unwrap();

        assert_eq!(config.polling.interval_secs, 30);
        assert_eq!(config.prometheus.port, 9999);
        assert_eq!(config.balena.api_uri, "https://api.balena-cloud.com");
        assert_eq!(config.balena.username, "fleet");
        assert_eq!(config.balena.password, "s3cret");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = ExporterConfig::parse("{ prometheus: { port: 9100 } }").unwrap();
        config
            .apply_env(lookup_from(&[("EXPORTER_PORT", "9200")]))
            .unwrap();

        assert_eq!(config.prometheus.port, 9200);
    }

    #[test]
    fn test_env_empty_token_ignored() {
        let mut config = ExporterConfig::default();
        config
            .apply_env(lookup_from(&[("BALENA_API_TOKEN", "")]))
            .unwrap();

        assert_eq!(config.balena.api_token, None);
    }

    #[test]
    fn test_env_invalid_integer() {
        let mut config = ExporterConfig::default();
        let result = config.apply_env(lookup_from(&[("POLLING_INTERVAL_SECONDS", "soon")]));

        assert!(matches!(
            result,
            Err(ConfigError::Env {
                var: "POLLING_INTERVAL_SECONDS",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_zero_interval() {
        let result = ExporterConfig::parse("{ polling: { interval_secs: 0 } }");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_api_uri_scheme() {
        let result = ExporterConfig::parse(r#"{ balena: { api_uri: "api.balena-cloud.com" } }"#);
        assert!(result.unwrap_err().to_string().contains("http://"));
    }

    #[test]
    fn test_validate_invalid_host() {
        let result = ExporterConfig::parse(r#"{ prometheus: { host: "not an address" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let json = r#"{
            prometheus: { path: "no-leading-slash" }
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );
    }
}
