//! Configuration management for webbridge.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `WEBBRIDGE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable prefix used for overrides (`WEBBRIDGE_CALL_TIMEOUT_MS=500`).
pub const ENV_PREFIX: &str = "WEBBRIDGE";

/// Default deadline for awaited requests.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Placeholder in `deliver_command` replaced by the serialized batch.
pub const BATCH_PLACEHOLDER: &str = "%s";

/// Default buffer size of the diagnostics broadcast channel.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 64;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or merged.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A path could not be expanded.
    #[error("Invalid config path: {0}")]
    InvalidPath(String),

    /// A value failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Settings shared by both sides of a bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Tag embedded in correlation ids minted by the host side.
    #[serde(default = "default_host_tag")]
    pub host_tag: String,

    /// Tag embedded in correlation ids minted by the guest side.
    #[serde(default = "default_guest_tag")]
    pub guest_tag: String,

    /// URL scheme of a wake-up navigation. Must be lowercase.
    #[serde(default = "default_signal_scheme")]
    pub signal_scheme: String,

    /// URL host of a wake-up navigation.
    #[serde(default = "default_signal_host")]
    pub signal_host: String,

    /// Script the host evaluates in the guest to drain the guest's queue.
    #[serde(default = "default_fetch_command")]
    pub fetch_command: String,

    /// Script the host evaluates in the guest to hand it a batch. `%s` is
    /// replaced by the batch, a JSON array literal.
    #[serde(default = "default_deliver_command")]
    pub deliver_command: String,

    /// Script the host evaluates in the guest to check whether the bridge exists.
    #[serde(default = "default_ready_check_command")]
    pub ready_check_command: String,

    /// Deadline for awaited requests in milliseconds. `0` waits forever.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    /// Capacity of the diagnostics broadcast channel.
    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,

    /// Log every sent and received message at debug level.
    #[serde(default)]
    pub log_traffic: bool,
}

fn default_host_tag() -> String {
    "Native".to_string()
}

fn default_guest_tag() -> String {
    "JS".to_string()
}

fn default_signal_scheme() -> String {
    "wvbscheme".to_string()
}

fn default_signal_host() -> String {
    "__wvb_host_message__".to_string()
}

fn default_fetch_command() -> String {
    "WebBridge._fetchQueue();".to_string()
}

fn default_deliver_command() -> String {
    "WebBridge._handleMessages(%s);".to_string()
}

fn default_ready_check_command() -> String {
    "typeof WebBridge == 'object';".to_string()
}

fn default_call_timeout() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}

fn default_diagnostics_capacity() -> usize {
    DEFAULT_DIAGNOSTICS_CAPACITY
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host_tag: default_host_tag(),
            guest_tag: default_guest_tag(),
            signal_scheme: default_signal_scheme(),
            signal_host: default_signal_host(),
            fetch_command: default_fetch_command(),
            deliver_command: default_deliver_command(),
            ready_check_command: default_ready_check_command(),
            call_timeout_ms: default_call_timeout(),
            diagnostics_capacity: default_diagnostics_capacity(),
            log_traffic: false,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from defaults, an optional TOML file and the environment.
    ///
    /// When `path` is `None`, `<config dir>/webbridge/config.toml` is used if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        let file = match path {
            Some(p) => Some(expand_path(p)?),
            None => default_config_path().filter(|p| p.exists()),
        };

        if let Some(file) = file {
            builder = builder.add_source(
                config::File::from(file.as_path()).format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX).try_parsing(true),
        );

        let loaded: BridgeConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let loaded: BridgeConfig = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host_tag.is_empty() || self.guest_tag.is_empty() {
            return Err(ConfigError::Invalid("side tags must not be empty".to_string()));
        }
        if self.host_tag == self.guest_tag {
            return Err(ConfigError::Invalid(format!(
                "host and guest tags must differ (both are '{}')",
                self.host_tag
            )));
        }
        // Navigation URLs arrive with a lowercased scheme.
        if self.signal_scheme.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::Invalid(format!(
                "signal scheme '{}' must be lowercase",
                self.signal_scheme
            )));
        }
        if !self.deliver_command.contains(BATCH_PLACEHOLDER) {
            return Err(ConfigError::Invalid(format!(
                "deliver_command must contain '{}'",
                BATCH_PLACEHOLDER
            )));
        }
        if self.diagnostics_capacity == 0 {
            return Err(ConfigError::Invalid(
                "diagnostics_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The URL a guest navigates to in order to wake the host.
    pub fn signal_url(&self) -> String {
        format!("{}://{}", self.signal_scheme, self.signal_host)
    }

    /// The script that hands `batch` to the guest.
    pub fn deliver_script(&self, batch: &str) -> String {
        self.deliver_command.replacen(BATCH_PLACEHOLDER, batch, 1)
    }

    /// Set the request deadline.
    pub fn with_call_timeout(mut self, timeout_ms: u64) -> Self {
        self.call_timeout_ms = timeout_ms;
        self
    }

    /// Enable or disable traffic logging.
    pub fn with_log_traffic(mut self, enabled: bool) -> Self {
        self.log_traffic = enabled;
        self
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("webbridge").join("config.toml"))
}

fn expand_path(path: &Path) -> Result<PathBuf, ConfigError> {
    let raw = path
        .to_str()
        .ok_or_else(|| ConfigError::InvalidPath(path.display().to_string()))?;
    let expanded = shellexpand::full(raw)
        .map_err(|e| ConfigError::InvalidPath(format!("{}: {}", raw, e)))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
