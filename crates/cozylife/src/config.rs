//! Configuration file parsing and structures.
//!
//! The `run` command reads a TOML file naming every device to poll, plus
//! logging settings and defaults shared by all devices.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::capability::classify::ClassificationPolicy;
use crate::capability::classify::KindOverride;
use crate::capability::classify::DEFAULT_GANGS;
use crate::device::DeviceOptions;
use crate::protocol::DEFAULT_PORT;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Devices to poll, keyed by name
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,
}

#[derive(
    Debug,
    Default,
    Deserialize,
    Serialize,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"cozylife::transport" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Filter for the tracing subscriber. `level` replaces the configured
    /// default level when given; per-target overrides always apply.
    pub fn filter(&self, level: Option<LogLevel>) -> Targets {
        let default = level.unwrap_or(self.level);
        Targets::new()
            .with_default(LevelFilter::from(default))
            .with_targets(
                self.overrides
                    .iter()
                    .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
            )
    }
}

/// Settings applied to every device that does not set its own
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct DefaultsConfig {
    /// Timeout for one request/response exchange
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_poll_interval_secs() -> u64 {
    30
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// IP address or hostname
    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Force the device to be driven as a light or a switch
    #[serde(default)]
    pub kind: KindOverride,

    /// Gang count for bitmask switches
    #[serde(default = "default_gangs")]
    pub gangs: u8,
}

fn default_gangs() -> u8 {
    DEFAULT_GANGS
}

impl DeviceConfig {
    pub fn options(&self, defaults: &DefaultsConfig) -> DeviceOptions {
        DeviceOptions {
            host: self.host.clone(),
            port: self.port.unwrap_or(DEFAULT_PORT),
            timeout: Duration::from_millis(self.timeout_ms.unwrap_or(defaults.timeout_ms)),
            policy: ClassificationPolicy {
                kind: self.kind,
                gangs: self.gangs,
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        contents.parse()
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.defaults.timeout_ms == 0 {
            return Err(ConfigError::Invalid("defaults.timeout_ms must be positive".into()));
        }
        if self.defaults.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "defaults.poll_interval_secs must be positive".into(),
            ));
        }
        for (name, device) in &self.devices {
            if device.host.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("devices.{}.host is empty", name)));
            }
            if device.timeout_ms == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "devices.{}.timeout_ms must be positive",
                    name
                )));
            }
            if !(1..=64).contains(&device.gangs) {
                return Err(ConfigError::Invalid(format!(
                    "devices.{}.gangs must be between 1 and 64",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.defaults.poll_interval_secs)
    }

    /// Connection settings for every configured device, by name.
    pub fn device_options(&self) -> impl Iterator<Item = (&str, DeviceOptions)> + '_ {
        self.devices
            .iter()
            .map(|(name, device)| (name.as_str(), device.options(&self.defaults)))
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.defaults, DefaultsConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_parse_devices() {
        let toml = r#"
            [logging]
            level = "warn"
            overrides = { "cozylife::transport" = "debug" }

            [defaults]
            timeout_ms = 2000

            [devices.kitchen]
            host = "192.168.1.40"

            [devices.hall]
            host = "192.168.1.41"
            port = 5556
            timeout_ms = 500
            kind = "switch"
            gangs = 3
        "#;

        let config: Config = toml.parse().unwrap();
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(
            config.logging.overrides.get("cozylife::transport"),
            Some(&LogLevel::Debug)
        );
        assert_eq!(config.defaults.poll_interval_secs, 30);

        let options: BTreeMap<_, _> = config.device_options().collect();
        let kitchen = &options["kitchen"];
        assert_eq!(kitchen.host, "192.168.1.40");
        assert_eq!(kitchen.port, DEFAULT_PORT);
        assert_eq!(kitchen.timeout, Duration::from_millis(2000));
        assert_eq!(kitchen.policy, ClassificationPolicy::default());

        let hall = &options["hall"];
        assert_eq!(hall.port, 5556);
        assert_eq!(hall.timeout, Duration::from_millis(500));
        assert_eq!(
            hall.policy,
            ClassificationPolicy {
                kind: KindOverride::Switch,
                gangs: 3
            }
        );
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = "[devices.x]\nhost = \"\"\n".parse::<Config>().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");

        let err = "[devices.x]\nhost = \"a\"\ngangs = 0\n"
            .parse::<Config>()
            .unwrap_err();
        assert!(err.to_string().contains("gangs"));

        let err = "[defaults]\npoll_interval_secs = 0\n"
            .parse::<Config>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = "[devices.x]\nhost = \"a\"\nkind = \"fan\"\n"
            .parse::<Config>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[devices.desk]\nhost = \"10.0.0.7\"\nkind = \"light\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.devices["desk"].kind, KindOverride::Light);
        assert_eq!(config.devices["desk"].gangs, DEFAULT_GANGS);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        match Config::from_file(&path) {
            Err(ConfigError::Io(p, _)) => assert_eq!(p, path),
            other => panic!("expected I/O error, got {other:?}"),
        }
    }

    #[test]
    fn test_log_filter() {
        let logging = LoggingConfig {
            level: LogLevel::Warn,
            overrides: HashMap::from([("cozylife::transport".to_string(), LogLevel::Trace)]),
        };

        let filter = logging.filter(None);
        assert!(filter.would_enable("cozylife::transport", &tracing::Level::TRACE));
        assert!(!filter.would_enable("cozylife::device", &tracing::Level::INFO));
        assert!(filter.would_enable("cozylife::device", &tracing::Level::WARN));

        let filter = logging.filter(Some(LogLevel::Debug));
        assert!(filter.would_enable("cozylife::device", &tracing::Level::DEBUG));
    }
}
