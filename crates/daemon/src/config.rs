//! Configuration management for the file-drop daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/filedrop/config.toml`.
//! Command-line flags are applied on top of the loaded file by `main`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("username must be between 4 and 32 characters, got {0}")]
    InvalidUsernameLength(usize),

    #[error("{name} must be a permission mode no larger than 0o777, got {mode:#o}")]
    InvalidMode { name: &'static str, mode: u32 },

    #[error("idle_grace_secs must be greater than 0")]
    InvalidIdleGrace,

    #[error("handshake_timeout_secs must be between 1 and 300, got {0}")]
    InvalidHandshakeTimeout(u64),

    #[error("max_attempts must be between 1 and 20, got {0}")]
    InvalidMaxAttempts(u32),

    #[error("max_attempts * delay_ms ({0} ms) must fit within handshake_timeout_secs")]
    AuthExceedsTimeout(u64),

    #[error("root must not be empty")]
    EmptyRoot,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Username length bounds, in characters.
pub const USERNAME_MIN_LEN: usize = 4;
pub const USERNAME_MAX_LEN: usize = 32;

/// Main configuration structure for the file-drop daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listener and lifecycle configuration.
    pub server: ListenConfig,

    /// Login configuration.
    pub auth: AuthConfig,

    /// Data root and file creation settings.
    pub storage: StorageConfig,

    /// Host key location.
    pub keys: KeyConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Listener and lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenConfig {
    /// Address to bind, e.g. `0.0.0.0:2022`. Ignored with socket activation.
    pub endpoint: String,

    /// Adopt a listening socket passed in by systemd instead of binding.
    pub socket_activation: bool,

    /// Shut down after the last connection closes and the grace period passes.
    pub exit_when_idle: bool,

    /// Grace period before an idle shutdown, in seconds.
    pub idle_grace_secs: u64,

    /// Upper bound on the handshake and login phase, in seconds.
    pub handshake_timeout_secs: u64,
}

/// Login configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// The single username allowed to log in.
    pub username: Option<String>,

    /// Hex SHA-256 digest over `username ∥ password`.
    pub password_hash: Option<String>,

    /// Fixed delay applied to every login attempt, in milliseconds.
    pub delay_ms: u64,

    /// Login attempts allowed per connection.
    pub max_attempts: u32,
}

/// Data root and file creation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory every client path is confined to.
    pub root: PathBuf,

    /// Mode for newly created files.
    pub file_mode: u32,

    /// Mode for newly created directories.
    pub dir_mode: u32,

    /// Reserved for a storage quota. Not enforced.
    pub max_bytes: u64,

    /// Whether a session owns the directories it creates.
    pub claim_new_directories: bool,
}

/// Host key location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeyConfig {
    /// Private key path (public key is `<path>.pub`), or `-` for stdin.
    pub host_key: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            endpoint: "0.0.0.0:2022".to_string(),
            socket_activation: false,
            exit_when_idle: false,
            idle_grace_secs: 10,
            handshake_timeout_secs: 10,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: None,
            password_hash: None,
            delay_ms: 500,
            max_attempts: 3,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./sftproot"),
            file_mode: 0o660,
            dir_mode: 0o770,
            max_bytes: 0,
            claim_new_directories: true,
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            host_key: PathBuf::from("./id_ed25519"),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filedrop")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - FILEDROP_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - FILEDROP_ROOT: Override the data root
    /// - FILEDROP_ENDPOINT: Override the listen endpoint
    /// - FILEDROP_USER: Override the username
    /// - FILEDROP_PASSWORD_HASH: Override the password digest
    pub fn apply_env_overrides(&mut self) {
        if let Some(level) = non_empty_env("FILEDROP_LOG_LEVEL") {
            tracing::info!("Overriding log_level from environment: {}", level);
            self.daemon.log_level = level;
        }
        if let Some(root) = non_empty_env("FILEDROP_ROOT") {
            tracing::info!("Overriding root from environment: {}", root);
            self.storage.root = PathBuf::from(root);
        }
        if let Some(endpoint) = non_empty_env("FILEDROP_ENDPOINT") {
            tracing::info!("Overriding endpoint from environment: {}", endpoint);
            self.server.endpoint = endpoint;
        }
        if let Some(user) = non_empty_env("FILEDROP_USER") {
            tracing::info!("Overriding username from environment: {}", user);
            self.auth.username = Some(user);
        }
        if let Some(hash) = non_empty_env("FILEDROP_PASSWORD_HASH") {
            tracing::info!("Overriding password_hash from environment");
            self.auth.password_hash = Some(hash);
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(username) = &self.auth.username {
            validate_username(username)?;
        }

        if self.storage.file_mode > 0o777 {
            return Err(ConfigError::InvalidMode {
                name: "file_mode",
                mode: self.storage.file_mode,
            });
        }
        if self.storage.dir_mode > 0o777 {
            return Err(ConfigError::InvalidMode {
                name: "dir_mode",
                mode: self.storage.dir_mode,
            });
        }

        if self.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRoot);
        }

        if self.server.exit_when_idle && self.server.idle_grace_secs == 0 {
            return Err(ConfigError::InvalidIdleGrace);
        }

        let timeout = self.server.handshake_timeout_secs;
        if !(1..=300).contains(&timeout) {
            return Err(ConfigError::InvalidHandshakeTimeout(timeout));
        }

        if !(1..=20).contains(&self.auth.max_attempts) {
            return Err(ConfigError::InvalidMaxAttempts(self.auth.max_attempts));
        }

        let auth_ms = u64::from(self.auth.max_attempts).saturating_mul(self.auth.delay_ms);
        if auth_ms >= timeout * 1000 {
            return Err(ConfigError::AuthExceedsTimeout(auth_ms));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Checks the username length rule.
pub fn validate_username(username: &str) -> Result<(), ConfigError> {
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(ConfigError::InvalidUsernameLength(len));
    }
    Ok(())
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();
    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        for name in [
            "FILEDROP_LOG_LEVEL",
            "FILEDROP_ROOT",
            "FILEDROP_ENDPOINT",
            "FILEDROP_USER",
            "FILEDROP_PASSWORD_HASH",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.server.endpoint, "0.0.0.0:2022");
        assert!(!config.server.socket_activation);
        assert!(!config.server.exit_when_idle);
        assert_eq!(config.server.idle_grace_secs, 10);
        assert_eq!(config.auth.delay_ms, 500);
        assert_eq!(config.auth.max_attempts, 3);
        assert_eq!(config.storage.root, PathBuf::from("./sftproot"));
        assert_eq!(config.storage.file_mode, 0o660);
        assert_eq!(config.storage.dir_mode, 0o770);
        assert!(config.storage.claim_new_directories);
        assert_eq!(config.keys.host_key, PathBuf::from("./id_ed25519"));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
exit_when_idle = true

[auth]
username = "uploader"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert!(config.server.exit_when_idle);
        assert_eq!(config.auth.username.as_deref(), Some("uploader"));
        assert_eq!(config.server.endpoint, "0.0.0.0:2022");
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[daemon]
log_level = "trace"

[server]
endpoint = "127.0.0.1:9022"
socket_activation = false
exit_when_idle = true
idle_grace_secs = 30
handshake_timeout_secs = 5

[auth]
username = "uploader"
password_hash = "00ff"
delay_ms = 250
max_attempts = 6

[storage]
root = "/srv/drop"
file_mode = 416
dir_mode = 488
max_bytes = 1048576
claim_new_directories = false

[keys]
host_key = "/etc/filedrop/host_key"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.daemon.log_level, "trace");
        assert_eq!(config.server.endpoint, "127.0.0.1:9022");
        assert_eq!(config.server.idle_grace_secs, 30);
        assert_eq!(config.server.handshake_timeout_secs, 5);
        assert_eq!(config.auth.password_hash.as_deref(), Some("00ff"));
        assert_eq!(config.auth.delay_ms, 250);
        assert_eq!(config.auth.max_attempts, 6);
        assert_eq!(config.storage.root, PathBuf::from("/srv/drop"));
        assert_eq!(config.storage.file_mode, 0o640);
        assert_eq!(config.storage.dir_mode, 0o750);
        assert_eq!(config.storage.max_bytes, 1048576);
        assert!(!config.storage.claim_new_directories);
        assert_eq!(config.keys.host_key, PathBuf::from("/etc/filedrop/host_key"));
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[daemon
log_level = "debug"
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[storage]
file_mode = "rw-rw----"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.daemon.log_level = "warn".to_string();
        original.auth.username = Some("uploader".to_string());
        original.storage.claim_new_directories = false;

        let toml = original.to_toml().unwrap();
        let loaded = Config::from_toml(&toml).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = Config::default();
        original.server.exit_when_idle = true;
        original.save(&config_path).unwrap();

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("filedrop"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_validate_username_bounds() {
        assert_eq!(
            validate_username("abc"),
            Err(ConfigError::InvalidUsernameLength(3))
        );
        assert_eq!(validate_username("abcd"), Ok(()));
        assert_eq!(validate_username(&"a".repeat(32)), Ok(()));
        assert_eq!(
            validate_username(&"a".repeat(33)),
            Err(ConfigError::InvalidUsernameLength(33))
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.storage.file_mode = 0o4755;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMode { name: "file_mode", .. })
        ));

        let mut config = Config::default();
        config.server.exit_when_idle = true;
        config.server.idle_grace_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidIdleGrace));

        let mut config = Config::default();
        config.server.handshake_timeout_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidHandshakeTimeout(0))
        );

        let mut config = Config::default();
        config.auth.max_attempts = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxAttempts(0)));

        let mut config = Config::default();
        config.auth.max_attempts = 20;
        config.auth.delay_ms = 500;
        assert_eq!(
            config.validate(),
            Err(ConfigError::AuthExceedsTimeout(10_000))
        );

        let mut config = Config::default();
        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );

        let mut config = Config::default();
        config.storage.root = PathBuf::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyRoot));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("FILEDROP_ROOT", "/tmp/drop");
        std::env::set_var("FILEDROP_USER", "uploader");
        std::env::set_var("FILEDROP_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.storage.root, PathBuf::from("/tmp/drop"));
        assert_eq!(config.auth.username.as_deref(), Some("uploader"));
        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.server.endpoint, "0.0.0.0:2022");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("FILEDROP_ENDPOINT", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.endpoint, "0.0.0.0:2022");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_password_hash() {
        clear_env();
        std::env::set_var("FILEDROP_PASSWORD_HASH", "abcd");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.auth.password_hash.as_deref(), Some("abcd"));

        clear_env();
    }
}
