//! Configuration system for the tether CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_core::ConnectionConfig;

/// tether configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Identity store locations
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Secret identity key file (hex)
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
    /// Pinned peer public key file (hex)
    #[serde(default = "default_peer_key_file")]
    pub peer_key_file: PathBuf,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bridge listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Address the wallet connects to
    #[serde(default = "default_connect_addr")]
    pub connect_addr: String,
    /// Seconds allowed for the handshake to complete
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bytes sealed under one key before a rekey
    #[serde(default = "default_rekey_threshold")]
    pub rekey_threshold: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn tether_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".tether")
}

fn default_key_file() -> PathBuf {
    tether_dir().join("identity.key")
}

fn default_peer_key_file() -> PathBuf {
    tether_dir().join("peer.pub")
}

fn default_listen_addr() -> String {
    "127.0.0.1:8337".to_string()
}

fn default_connect_addr() -> String {
    "127.0.0.1:8337".to_string()
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_rekey_threshold() -> u64 {
    ConnectionConfig::default().rekey_threshold
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
            peer_key_file: default_peer_key_file(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            connect_addr: default_connect_addr(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rekey_threshold: default_rekey_threshold(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("tether/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Handshake deadline
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.network.handshake_timeout_secs)
    }

    /// Per-connection parameters for the core
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::with_rekey_threshold(self.session.rekey_threshold)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_endpoint("listen_addr", &self.network.listen_addr)?;
        validate_endpoint("connect_addr", &self.network.connect_addr)?;

        if self.network.handshake_timeout_secs == 0 || self.network.handshake_timeout_secs > 300 {
            anyhow::bail!("Handshake timeout must be between 1 and 300 seconds");
        }

        self.connection_config().validate()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}

/// Check a `host:port` endpoint without resolving the host.
fn validate_endpoint(name: &str, addr: &str) -> anyhow::Result<()> {
    if addr.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }

    let Some((host, port)) = addr.rsplit_once(':') else {
        anyhow::bail!("{name} must be host:port, got {addr:?}");
    };
    if host.is_empty() || host.contains(':') || host.contains(char::is_whitespace) {
        anyhow::bail!("{name} has an invalid host: {addr:?}");
    }
    if port.parse::<u16>().is_err() {
        anyhow::bail!("{name} has an invalid port: {addr:?}");
    }
    Ok(())
}
