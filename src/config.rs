//! Configuration management for modelpool
//!
//! Parses TOML configuration files and provides typed access to settings.

use crate::error::{AppError, AppResult};
use crate::pool::backoff::BackoffKind;
use crate::pool::strategy::SelectionStrategy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    pub endpoints: Vec<Endpoint>,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Pool-wide selection and failover settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub strategy: SelectionStrategy,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub backoff: BackoffKind,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::default(),
            health_check_interval_ms: default_health_check_interval_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff: BackoffKind::default(),
        }
    }
}

impl PoolConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

/// Backend protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Full-featured local model server
    Ollama,
    /// Constrained NPU server with single-model residency
    Rkllama,
    /// Hosted chat-completion API
    Openai,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Ollama => "ollama",
            BackendType::Rkllama => "rkllama",
            BackendType::Openai => "openai",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured backend endpoint
///
/// All fields are private. Configuration is loaded via deserialization and
/// validated via `Config::validate()`; code building endpoints directly uses
/// [`Endpoint::new`] and the `with_*` methods.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    url: String,
    backend_type: BackendType,
    /// Lower value is tried first
    #[serde(default = "default_priority")]
    priority: u32,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    /// Model used when a request does not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
}

fn default_priority() -> u32 {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_enabled() -> bool {
    true
}

impl Endpoint {
    pub fn new(url: impl Into<String>, backend_type: BackendType) -> Self {
        Self {
            name: None,
            url: url.into(),
            backend_type,
            priority: default_priority(),
            max_retries: default_max_retries(),
            enabled: default_enabled(),
            api_key: None,
            model: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Display name for logs and metric labels, defaults to the URL
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const MAX_TIMEOUT_SECONDS: u64 = 1800;
const DEFAULT_OLLAMA_TIMEOUT: u64 = 120;
const DEFAULT_RKLLAMA_TIMEOUT: u64 = 600;
const DEFAULT_OPENAI_TIMEOUT: u64 = 120;

/// Per-family request timeouts in seconds
///
/// # Custom Deserialization
///
/// Implements `Deserialize` by hand so every value is checked against the
/// (0, 1800] second range while the TOML is being parsed. An invalid
/// `TimeoutsConfig` therefore never exists, not even between parsing and
/// `Config::validate()`.
#[derive(Debug, Clone, Serialize)]
pub struct TimeoutsConfig {
    ollama: u64,
    rkllama: u64,
    openai: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            ollama: DEFAULT_OLLAMA_TIMEOUT,
            rkllama: DEFAULT_RKLLAMA_TIMEOUT,
            openai: DEFAULT_OPENAI_TIMEOUT,
        }
    }
}

impl TimeoutsConfig {
    /// Create a new TimeoutsConfig with validated timeout values
    ///
    /// # Errors
    ///
    /// Returns an error if any timeout is zero or exceeds 1800 seconds. The
    /// upper bound also rejects extreme values such as `u64::MAX`.
    pub fn new(ollama: u64, rkllama: u64, openai: u64) -> AppResult<Self> {
        for (family, timeout) in [("ollama", ollama), ("rkllama", rkllama), ("openai", openai)] {
            if timeout == 0 {
                return Err(AppError::Config(format!(
                    "timeouts.{} must be greater than 0, got {}",
                    family, timeout
                )));
            }
            if timeout > MAX_TIMEOUT_SECONDS {
                return Err(AppError::Config(format!(
                    "timeouts.{} cannot exceed {} seconds, got {}",
                    family, MAX_TIMEOUT_SECONDS, timeout
                )));
            }
        }
        Ok(Self {
            ollama,
            rkllama,
            openai,
        })
    }

    pub fn ollama(&self) -> u64 {
        self.ollama
    }

    pub fn rkllama(&self) -> u64 {
        self.rkllama
    }

    pub fn openai(&self) -> u64 {
        self.openai
    }

    /// Timeout in seconds for the given backend family
    pub fn seconds_for(&self, backend_type: BackendType) -> u64 {
        match backend_type {
            BackendType::Ollama => self.ollama,
            BackendType::Rkllama => self.rkllama,
            BackendType::Openai => self.openai,
        }
    }
}

impl<'de> Deserialize<'de> for TimeoutsConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, MapAccess, Visitor};

        #[derive(Deserialize)]
        #[serde(field_identifier, rename_all = "lowercase")]
        enum Field {
            Ollama,
            Rkllama,
            Openai,
        }

        struct TimeoutsConfigVisitor;

        impl<'de> Visitor<'de> for TimeoutsConfigVisitor {
            type Value = TimeoutsConfig;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a table with optional timeout fields (ollama, rkllama, openai)")
            }

            fn visit_map<V>(self, mut map: V) -> Result<TimeoutsConfig, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut ollama = None;
                let mut rkllama = None;
                let mut openai = None;

                while let Some(key) = map.next_key()? {
                    match key {
                        Field::Ollama => {
                            if ollama.is_some() {
                                return Err(de::Error::duplicate_field("ollama"));
                            }
                            ollama = Some(map.next_value()?);
                        }
                        Field::Rkllama => {
                            if rkllama.is_some() {
                                return Err(de::Error::duplicate_field("rkllama"));
                            }
                            rkllama = Some(map.next_value()?);
                        }
                        Field::Openai => {
                            if openai.is_some() {
                                return Err(de::Error::duplicate_field("openai"));
                            }
                            openai = Some(map.next_value()?);
                        }
                    }
                }

                TimeoutsConfig::new(
                    ollama.unwrap_or(DEFAULT_OLLAMA_TIMEOUT),
                    rkllama.unwrap_or(DEFAULT_RKLLAMA_TIMEOUT),
                    openai.unwrap_or(DEFAULT_OPENAI_TIMEOUT),
                )
                .map_err(|e| de::Error::custom(format!("Invalid timeout configuration: {}", e)))
            }
        }

        deserializer.deserialize_struct(
            "TimeoutsConfig",
            &["ollama", "rkllama", "openai"],
            TimeoutsConfigVisitor,
        )
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        // Phase 3: Validate parsed config
        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Endpoints that take part in the pool
    pub fn enabled_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().filter(|e| e.enabled())
    }

    /// Request timeout for the given backend family
    pub fn timeout_for(&self, backend_type: BackendType) -> Duration {
        Duration::from_secs(self.timeouts.seconds_for(backend_type))
    }

    /// Validate configuration after parsing
    ///
    /// Called automatically by `from_file()` and `from_str()`, and can be
    /// called explicitly when the config is built by other means.
    pub fn validate(&self) -> AppResult<()> {
        if self.enabled_endpoints().next().is_none() {
            return Err(AppError::Config(
                "Configuration error: no enabled endpoints. Add at least one:\n\n\
                [[endpoints]]\n\
                url = \"http://localhost:11434\"\n\
                backend_type = \"ollama\"\n\
                priority = 1"
                    .to_string(),
            ));
        }

        let mut seen_urls = HashSet::new();
        for endpoint in &self.endpoints {
            if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
                return Err(AppError::Config(format!(
                    "Configuration error: Endpoint '{}' has invalid url '{}'. \
                    url must start with 'http://' or 'https://'.",
                    endpoint.name(),
                    endpoint.url
                )));
            }

            if !seen_urls.insert(endpoint.url.trim_end_matches('/')) {
                return Err(AppError::Config(format!(
                    "Configuration error: url '{}' is configured more than once",
                    endpoint.url
                )));
            }

            if endpoint.max_retries == 0 {
                return Err(AppError::Config(format!(
                    "Configuration error: Endpoint '{}' has max_retries=0. \
                    max_retries must be at least 1.",
                    endpoint.name()
                )));
            }

            if endpoint.backend_type == BackendType::Openai
                && endpoint.api_key().is_none_or(|k| k.trim().is_empty())
            {
                return Err(AppError::Config(format!(
                    "Configuration error: Endpoint '{}' uses backend_type 'openai' \
                    and requires a non-empty api_key",
                    endpoint.name()
                )));
            }
        }

        if self.pool.health_check_interval_ms == 0 {
            return Err(AppError::Config(
                "Configuration error: pool.health_check_interval_ms must be greater than 0"
                    .to_string(),
            ));
        }

        // Timeout ranges are enforced by TimeoutsConfig's Deserialize impl.

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
