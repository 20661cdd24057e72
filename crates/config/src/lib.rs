//! Configuration management for the SC metrics agent
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then `SC_*` environment overrides. Environment values that fail to parse
//! are ignored so a mistyped variable degrades to the default instead of
//! boot-looping the agent. Validation resolves the VM identity exactly once
//! and rejects configurations the pipeline cannot run with.

pub mod identity;

use figment::providers::{Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use identity::IdentityProbes;

/// Environment variable naming the config file when no path is passed.
pub const CONFIG_PATH_ENV: &str = "SC_AGENT_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config file {path}: {source}")]
    Load {
        path: PathBuf,
        source: Box<figment::Error>,
    },

    #[error(
        "vm_id cannot be determined: identity probes failed. \
         Set vm_id in the config file or the SC_VM_ID environment variable"
    )]
    IdentityUnresolved,

    #[error("at least one collector must be enabled")]
    NoCollectorsEnabled,

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Agent log level, mirroring the levels the original service accepted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

impl LogLevel {
    /// Directive string for a tracing `EnvFilter`. `fatal`/`panic` have no
    /// tracing equivalent and collapse to `error`.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error | Self::Fatal | Self::Panic => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            "panic" => Ok(Self::Panic),
            _ => Err(()),
        }
    }
}

/// Per-collector enable flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollectorConfig {
    pub cpu: bool,
    pub memory: bool,
    pub loadavg: bool,
    pub diskstats: bool,
    pub netdev: bool,
    pub filesystem: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            cpu: true,
            memory: true,
            loadavg: true,
            diskstats: true,
            netdev: true,
            filesystem: true,
        }
    }
}

impl CollectorConfig {
    /// True when at least one collector is enabled.
    pub fn any_enabled(&self) -> bool {
        self.cpu || self.memory || self.loadavg || self.diskstats || self.netdev || self.filesystem
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Period between pipeline ticks.
    #[serde(with = "humantime_serde")]
    pub collection_interval: Duration,

    /// Client-level timeout applied to every HTTP request.
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,

    /// Full URL of the identity-token metadata endpoint.
    pub metadata_service_endpoint: String,

    /// Identity override; when empty, the identity probes run.
    pub vm_id: String,

    /// Static operator labels added to every sample.
    pub labels: BTreeMap<String, String>,

    /// Per-collector enable flags.
    pub collectors: CollectorConfig,

    /// Agent log level.
    pub log_level: LogLevel,

    /// Retries after the first send attempt.
    pub max_retries: u32,

    /// Base delay between send attempts.
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Maximum records per write batch.
    pub batch_size: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(30),
            http_timeout: Duration::from_secs(30),
            metadata_service_endpoint: "http://169.254.169.254/metadata/v1/auth-token".to_string(),
            vm_id: String::new(),
            labels: BTreeMap::new(),
            collectors: CollectorConfig::default(),
            log_level: LogLevel::Info,
            max_retries: 3,
            retry_interval: Duration::from_secs(5),
            batch_size: 1000,
        }
    }
}

impl AgentConfig {
    /// Load configuration: defaults, then the YAML file (explicit path or
    /// `SC_AGENT_CONFIG`), then environment overrides, then identity
    /// resolution and validation.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        Self::load_with_probes(config_path, &IdentityProbes::default())
    }

    /// As [`AgentConfig::load`], with injectable identity probes.
    pub fn load_with_probes(
        config_path: Option<PathBuf>,
        probes: &IdentityProbes,
    ) -> Result<Self> {
        let path = config_path.or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        let mut figment = Figment::from(Serialized::defaults(AgentConfig::default()));
        if let Some(ref path) = path {
            figment = figment.merge(Yaml::file(path));
        }

        let mut config: AgentConfig = figment.extract().map_err(|e| ConfigError::Load {
            path: path.unwrap_or_default(),
            source: Box::new(e),
        })?;

        config.apply_env_overrides();

        if config.vm_id.is_empty() {
            config.vm_id = identity::resolve(probes).unwrap_or_default();
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply `SC_*` environment overrides. Malformed values are ignored and
    /// the current (default or file) value is kept.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_duration("SC_COLLECTION_INTERVAL") {
            self.collection_interval = v;
        }
        if let Some(v) = env_duration("SC_HTTP_TIMEOUT") {
            self.http_timeout = v;
        }
        if let Ok(v) = std::env::var("SC_METADATA_SERVICE_ENDPOINT") {
            if !v.is_empty() {
                self.metadata_service_endpoint = v;
            }
        }
        if let Ok(v) = std::env::var("SC_VM_ID") {
            if !v.is_empty() {
                self.vm_id = v;
            }
        }
        if let Some(v) = env_parse::<LogLevel>("SC_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = env_parse::<u32>("SC_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = env_duration("SC_RETRY_INTERVAL") {
            self.retry_interval = v;
        }
        if let Some(v) = env_parse::<usize>("SC_BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Ok(v) = std::env::var("SC_LABELS") {
            for (key, value) in parse_labels(&v) {
                self.labels.insert(key, value);
            }
        }

        for (name, flag) in [
            ("SC_COLLECTOR_CPU", &mut self.collectors.cpu),
            ("SC_COLLECTOR_MEMORY", &mut self.collectors.memory),
            ("SC_COLLECTOR_LOADAVG", &mut self.collectors.loadavg),
            ("SC_COLLECTOR_DISKSTATS", &mut self.collectors.diskstats),
            ("SC_COLLECTOR_NETDEV", &mut self.collectors.netdev),
            ("SC_COLLECTOR_FILESYSTEM", &mut self.collectors.filesystem),
        ] {
            if let Some(v) = env_parse::<bool>(name) {
                *flag = v;
            }
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.collection_interval.is_zero() {
            return Err(ConfigError::Invalid {
                reason: "collection_interval must be positive".to_string(),
            });
        }
        if self.http_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                reason: "http_timeout must be positive".to_string(),
            });
        }
        if self.retry_interval.is_zero() {
            return Err(ConfigError::Invalid {
                reason: "retry_interval must be positive".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                reason: "batch_size must be positive".to_string(),
            });
        }
        if self.metadata_service_endpoint.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "metadata_service_endpoint must not be empty".to_string(),
            });
        }
        if self.vm_id.is_empty() {
            return Err(ConfigError::IdentityUnresolved);
        }
        if !self.collectors.any_enabled() {
            return Err(ConfigError::NoCollectorsEnabled);
        }

        // The decorator never overwrites labels; a static label colliding
        // with the identity key is a configuration defect caught here.
        if self.labels.contains_key("vm_id") {
            return Err(ConfigError::Invalid {
                reason: "label key 'vm_id' is reserved for the VM identity".to_string(),
            });
        }
        for key in self.labels.keys() {
            if !is_valid_label_key(key) {
                return Err(ConfigError::Invalid {
                    reason: format!("invalid label key: '{key}'"),
                });
            }
        }

        Ok(())
    }
}

/// Parse a `key1=value1,key2=value2` label string. Pairs without an `=` or
/// with an empty key are skipped.
pub fn parse_labels(raw: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for pair in raw.split(',') {
        if let Some((key, value)) = pair.trim().split_once('=') {
            let key = key.trim();
            if !key.is_empty() {
                labels.insert(key.to_string(), value.trim().to_string());
            }
        }
    }
    labels
}

/// Label keys must match `[a-z_][a-z0-9_]*`.
fn is_valid_label_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_duration(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    humantime::parse_duration(&raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Environment variables are process-global; tests that read or write
    // them serialize on this lock.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn valid_config() -> AgentConfig {
        AgentConfig {
            vm_id: "123e4567-e89b-12d3-a456-426614174000".to_string(),
            ..AgentConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.collection_interval, Duration::from_secs(30));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(
            config.metadata_service_endpoint,
            "http://169.254.169.254/metadata/v1/auth-token"
        );
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.collectors.any_enabled());
    }

    #[test]
    fn test_validate_accepts_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_vm_id() {
        let config = AgentConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IdentityUnresolved)
        ));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = valid_config();
        config.collection_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_rejects_no_collectors() {
        let mut config = valid_config();
        config.collectors = CollectorConfig {
            cpu: false,
            memory: false,
            loadavg: false,
            diskstats: false,
            netdev: false,
            filesystem: false,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoCollectorsEnabled)
        ));
    }

    #[test]
    fn test_validate_rejects_reserved_label() {
        let mut config = valid_config();
        config
            .labels
            .insert("vm_id".to_string(), "spoofed".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_label_key() {
        let mut config = valid_config();
        config
            .labels
            .insert("Bad-Key".to_string(), "x".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels("env=prod, region=fra1 ,=skipped,noequals");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels["env"], "prod");
        assert_eq!(labels["region"], "fra1");
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("panic".parse::<LogLevel>(), Ok(LogLevel::Panic));
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let _env = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "collection_interval: 10s\nvm_id: from-file\nlabels:\n  env: staging\ncollectors:\n  netdev: false"
        )
        .unwrap();

        let probes = IdentityProbes {
            dmidecode_commands: vec![],
            machine_id_path: PathBuf::from("/nonexistent"),
            boot_id_path: PathBuf::from("/nonexistent"),
            hostname_path: PathBuf::from("/nonexistent"),
        };
        let config =
            AgentConfig::load_with_probes(Some(file.path().to_path_buf()), &probes).unwrap();

        assert_eq!(config.collection_interval, Duration::from_secs(10));
        assert_eq!(config.vm_id, "from-file");
        assert_eq!(config.labels["env"], "staging");
        assert!(!config.collectors.netdev);
        // Untouched keys keep their defaults.
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert!(config.collectors.cpu);
    }

    #[test]
    fn test_env_override_round_trip() {
        let _env = ENV_LOCK.lock().unwrap();
        std::env::set_var("SC_COLLECTION_INTERVAL", "45s");
        std::env::set_var("SC_MAX_RETRIES", "not-a-number");
        std::env::set_var("SC_LABELS", "env=prod,team=infra");
        std::env::set_var("SC_COLLECTOR_FILESYSTEM", "false");

        let mut config = valid_config();
        config.apply_env_overrides();

        std::env::remove_var("SC_COLLECTION_INTERVAL");
        std::env::remove_var("SC_MAX_RETRIES");
        std::env::remove_var("SC_LABELS");
        std::env::remove_var("SC_COLLECTOR_FILESYSTEM");

        assert_eq!(config.collection_interval, Duration::from_secs(45));
        // Malformed value falls back to the default silently.
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.labels["env"], "prod");
        assert_eq!(config.labels["team"], "infra");
        assert!(!config.collectors.filesystem);
    }
}
