//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (applied by the binary on top of the loaded record)
//!
//! The loaded [`Config`] is treated as a static record for the lifetime of
//! the process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchdogError};
use crate::transport::Endpoint;

/// Environment variable overriding the control host
pub const ENV_HOST: &str = "STREAMWATCH_HOST";
/// Environment variable overriding the control port
pub const ENV_PORT: &str = "STREAMWATCH_PORT";
/// Environment variable overriding the control password
pub const ENV_PASSWORD: &str = "STREAMWATCH_PASSWORD";
/// Environment variable enabling debug mode
pub const ENV_DEBUG: &str = "STREAMWATCH_DEBUG";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Control socket connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Reconnect policy settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Supervision loop settings
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

impl Config {
    /// Default config file location (`<config_dir>/streamwatch/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("streamwatch").join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WatchdogError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Resolve the full configuration.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// used when present and defaults otherwise. Environment overrides are
    /// applied last and the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?.with_env_overrides()?,
            None => match Self::default_path() {
                Some(default) if default.exists() => {
                    Self::from_file(default)?.with_env_overrides()?
                },
                _ => Self::from_env()?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply `STREAMWATCH_*` environment variables
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.connection.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.connection.port = port
                .parse()
                .map_err(|e| WatchdogError::Config(format!("Invalid {ENV_PORT} '{port}': {e}")))?;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.connection.password = Some(password);
        }
        if let Some(debug) = lookup(ENV_DEBUG) {
            self.watchdog.debug_mode = matches!(debug.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(self)
    }

    /// Check invariants the rest of the crate relies on
    pub fn validate(&self) -> Result<()> {
        if self.connection.host.trim().is_empty() {
            return Err(WatchdogError::Config("connection.host must not be empty".into()));
        }
        if self.connection.port == 0 {
            return Err(WatchdogError::Config("connection.port must not be 0".into()));
        }
        if self.retry.max_retries == 0 {
            return Err(WatchdogError::Config("retry.max_retries must be at least 1".into()));
        }
        if self.watchdog.check_interval_secs == 0 {
            return Err(WatchdogError::Config(
                "watchdog.check_interval_secs must be at least 1".into(),
            ));
        }
        if let Some(cmd) = &self.watchdog.fallback_command {
            if cmd.is_empty() {
                return Err(WatchdogError::Config(
                    "watchdog.fallback_command must name a program".into(),
                ));
            }
        }
        Ok(())
    }

    /// Immutable control endpoint derived from the connection section
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(
            self.connection.host.clone(),
            self.connection.port,
            self.connection.password.clone(),
        )
    }
}

/// Control socket connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Host running the controlled application
    pub host: String,

    /// Control socket port
    pub port: u16,

    /// Control password (empty or absent = unauthenticated)
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4444,
            password: None,
        }
    }
}

/// Reconnect policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Establishment attempts per tick before giving up
    pub max_retries: u32,

    /// Delay between establishment attempts
    pub retry_delay_secs: u64,

    /// TCP reachability probe timeout
    pub probe_timeout_ms: u64,

    /// Bound on reaching `Identified` after connecting
    pub handshake_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 5,
            probe_timeout_ms: 2000,
            handshake_timeout_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Delay between attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Reachability probe timeout
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Handshake completion bound
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Supervision loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Seconds between supervision ticks
    pub check_interval_secs: u64,

    /// Wait after a status query before reading the tracked state
    pub status_grace_ms: u64,

    /// Trigger the fallback actuator when no session can be established
    pub use_fallback_on_failure: bool,

    /// Verbose logging including raw frames
    pub debug_mode: bool,

    /// Process name matched by the liveness probe
    pub process_name: String,

    /// Program and arguments run as the fallback actuator
    pub fallback_command: Option<Vec<String>>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
            status_grace_ms: 1000,
            use_fallback_on_failure: true,
            debug_mode: false,
            process_name: "obs".to_string(),
            fallback_command: None,
        }
    }
}

impl WatchdogConfig {
    /// Tick period
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Status grace period
    pub fn status_grace(&self) -> Duration {
        Duration::from_millis(self.status_grace_ms)
    }
}
