//! Server configuration: TOML file, `ZK_REVIEW_*` environment overrides,
//! validation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::challenge::MIN_KEY_BYTES;
use crate::group::GroupInfo;
use crate::merkle::tree::MAX_DEPTH;
use crate::storage::Target;

const ENV_PREFIX: &str = "ZK_REVIEW_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid environment override {name}: {value:?}")]
    Env { name: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub challenge: ChallengeConfig,
    pub proving: ProvingConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub groups: Vec<GroupInfo>,
    pub targets: Vec<Target>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            request_timeout_secs: 30,
            max_body_size: 64 * 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Hex-encoded HMAC key, at least 32 bytes. Generated per process if unset.
    pub secret: Option<String>,
    pub ttl_secs: u64,
    /// Log issued codes. Development only.
    pub reveal_codes: bool,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            secret: None,
            ttl_secs: 600,
            reveal_codes: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvingConfig {
    pub tree_depth: usize,
    /// Directory holding `proving.key` and `verifying.key`.
    pub key_dir: Option<PathBuf>,
    pub verify_workers: usize,
    pub verify_timeout_secs: u64,
}

impl Default for ProvingConfig {
    fn default() -> Self {
        Self {
            tree_depth: 16,
            key_dir: None,
            verify_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            verify_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load from a TOML file (defaults if it does not exist), apply
    /// environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            info!("Config file {:?} not found, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), contents)?;
        Ok(())
    }

    /// Apply `ZK_REVIEW_*` overrides from `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{}{}", ENV_PREFIX, suffix);
            lookup(&name).map(|value| (name, value))
        };
        let invalid = |name: String, value: String| ConfigError::Env { name, value };

        if let Some((_, dir)) = var("DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some((name, bind)) = var("BIND") {
            self.server.bind_address = bind.parse().map_err(|_| invalid(name, bind.clone()))?;
        }
        if let Some((name, port)) = var("PORT") {
            self.server.port = port.parse().map_err(|_| invalid(name, port.clone()))?;
        }
        if let Some((_, level)) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some((name, json)) = var("LOG_JSON") {
            self.logging.json = parse_bool(&json).ok_or_else(|| invalid(name, json.clone()))?;
        }
        if let Some((_, secret)) = var("CHALLENGE_SECRET") {
            self.challenge.secret = Some(secret);
        }
        if let Some((name, depth)) = var("TREE_DEPTH") {
            self.proving.tree_depth = depth.parse().map_err(|_| invalid(name, depth.clone()))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server port cannot be 0".into()));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request timeout must be positive".into()));
        }
        if self.proving.tree_depth == 0 || self.proving.tree_depth > MAX_DEPTH {
            return Err(ConfigError::Invalid(format!(
                "tree depth must be in 1..={}",
                MAX_DEPTH
            )));
        }
        if self.proving.verify_workers == 0 {
            return Err(ConfigError::Invalid("verify_workers must be positive".into()));
        }
        if self.proving.verify_timeout_secs == 0 {
            return Err(ConfigError::Invalid("verify timeout must be positive".into()));
        }
        if self.challenge.ttl_secs == 0 {
            return Err(ConfigError::Invalid("challenge ttl must be positive".into()));
        }
        if let Some(secret) = &self.challenge.secret {
            let key = hex::decode(secret.trim())
                .map_err(|_| ConfigError::Invalid("challenge secret must be hex".into()))?;
            if key.len() < MIN_KEY_BYTES {
                return Err(ConfigError::Invalid(format!(
                    "challenge secret must be at least {} bytes",
                    MIN_KEY_BYTES
                )));
            }
        }

        let mut seen = HashSet::new();
        for group in &self.groups {
            check_id("group", &group.id)?;
            if !seen.insert(group.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate group id {}", group.id)));
            }
            if group.domain.is_empty()
                || group.domain != group.domain.to_lowercase()
                || group.domain.contains('@')
                || !group.domain.contains('.')
            {
                return Err(ConfigError::Invalid(format!(
                    "group {} has invalid domain {:?}",
                    group.id, group.domain
                )));
            }
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            check_id("target", &target.id)?;
            if !seen.insert(target.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate target id {}", target.id)));
            }
        }

        if self.challenge.reveal_codes {
            warn!("challenge.reveal_codes is enabled; verification codes will be logged");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind_address, self.server.port)
    }

    pub fn key_dir(&self) -> PathBuf {
        self.proving
            .key_dir
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("keys"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.proving.verify_timeout_secs)
    }

    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge.ttl_secs)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn check_id(kind: &str, id: &str) -> Result<(), ConfigError> {
    static ID: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = ID
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").ok())
        .as_ref()
        .ok_or_else(|| ConfigError::Invalid("id pattern unavailable".into()))?;
    if !pattern.is_match(id) {
        return Err(ConfigError::Invalid(format!("invalid {} id {:?}", kind, id)));
    }
    Ok(())
}
