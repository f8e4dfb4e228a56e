//! Helper configuration.

use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration.
    #[error("Configuration error: {0}")]
    Parse(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Helper process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HelperConfig {
    /// Unix socket the extension connects to.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Lock file guarding against a second helper instance.
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,

    /// Log to this file instead of stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How long a new session may take to send `client_init`.
    #[serde(default = "default_client_init_timeout_ms")]
    pub client_init_timeout_ms: u64,

    /// Maximum concurrent sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Reject peers running as a different user (root is always accepted).
    #[serde(default = "default_check_peer_uid")]
    pub check_peer_uid: bool,

    /// Remote configuration directory poll interval.
    #[serde(default = "default_rc_poll_interval_ms")]
    pub rc_poll_interval_ms: u64,
}

impl HelperConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `appsec-helper.toml` in the current directory (if present)
    /// 3. Specified config file path (if provided)
    /// 4. Environment variables with `DD_APPSEC_HELPER_` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Toml::file("appsec-helper.toml"));

        if let Some(p) = path {
            figment = figment.merge(Toml::file(p));
        }

        let config: Self = figment
            .merge(Env::prefixed("DD_APPSEC_HELPER_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".to_owned(),
            ));
        }
        if self.rc_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "rc_poll_interval_ms must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn client_init_timeout(&self) -> Duration {
        Duration::from_millis(self.client_init_timeout_ms)
    }

    #[must_use]
    pub const fn rc_poll_interval(&self) -> Duration {
        Duration::from_millis(self.rc_poll_interval_ms)
    }
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            lock_path: default_lock_path(),
            log_file: None,
            log_level: default_log_level(),
            client_init_timeout_ms: default_client_init_timeout_ms(),
            max_connections: default_max_connections(),
            check_peer_uid: default_check_peer_uid(),
            rc_poll_interval_ms: default_rc_poll_interval_ms(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/ddappsec.sock")
}

fn default_lock_path() -> PathBuf {
    PathBuf::from("/tmp/ddappsec.lock")
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_client_init_timeout_ms() -> u64 {
    500
}

const fn default_max_connections() -> usize {
    256
}

const fn default_check_peer_uid() -> bool {
    true
}

const fn default_rc_poll_interval_ms() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HelperConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/ddappsec.sock"));
        assert_eq!(config.client_init_timeout(), Duration::from_millis(500));
        assert_eq!(config.max_connections, 256);
        assert!(config.check_peer_uid);
        assert!(config.log_file.is_none());
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        std::fs::write(file.path(), contents).unwrap();
        file
    }

    #[test]
    fn file_overrides_defaults() {
        let file = write_config(
            r#"
                socket_path = "/run/appsec/helper.sock"
                max_connections = 8
                log_file = "/var/log/appsec-helper.log"
            "#,
        );
        let config = HelperConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/run/appsec/helper.sock"));
        assert_eq!(config.max_connections, 8);
        assert_eq!(
            config.log_file.as_deref(),
            Some(std::path::Path::new("/var/log/appsec-helper.log"))
        );
        assert_eq!(config.lock_path, PathBuf::from("/tmp/ddappsec.lock"));
    }

    #[test]
    fn rejects_zero_connections() {
        let file = write_config("max_connections = 0");
        let err = HelperConfig::load(file.path().to_str()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_wrong_types() {
        let file = write_config(r#"client_init_timeout_ms = "soon""#);
        let err = HelperConfig::load(file.path().to_str()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
