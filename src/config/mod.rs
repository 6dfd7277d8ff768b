//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//!
//! ```toml
//! [[accounts]]
//! account = "alice@example.com"
//! password = "secret"
//! server = "xmpp.example.com:5222"
//!
//! [liveness]
//! ping_interval_secs = 120
//!
//! [logging]
//! traffic = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dialer::DialerConfig;
use crate::error::{Result, XmppError};
use crate::protocol::LivenessConfig;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Configured accounts
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    /// Keepalive and ping timing
    #[serde(default)]
    pub liveness: LivenessSettings,

    /// Logging options
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            XmppError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| XmppError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Load a single account from `XMPP_ACCOUNT`, `XMPP_PASSWORD` and
    /// optionally `XMPP_SERVER`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let (Ok(account), Ok(password)) =
            (std::env::var("XMPP_ACCOUNT"), std::env::var("XMPP_PASSWORD"))
        {
            config.accounts.push(AccountConfig {
                account,
                password,
                server: std::env::var("XMPP_SERVER").ok().filter(|s| !s.is_empty()),
                require_tls: false,
            });
        }

        config
    }

    /// Default config file location (`~/.config/xmpp-dial/config.toml` on Linux)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("xmpp-dial").join("config.toml"))
    }

    /// Pick an account: the named one, or the only one configured.
    pub fn account(&self, name: Option<&str>) -> Result<&AccountConfig> {
        match name {
            Some(name) => self
                .accounts
                .iter()
                .find(|a| a.account == name)
                .ok_or_else(|| XmppError::Config(format!("No account named {name}"))),
            None => match self.accounts.as_slice() {
                [only] => Ok(only),
                [] => Err(XmppError::Config("No accounts configured".to_string())),
                _ => Err(XmppError::Config(
                    "Several accounts configured; choose one with --account".to_string(),
                )),
            },
        }
    }
}

/// One account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Bare identity, `local@domain`
    pub account: String,

    /// Password
    pub password: String,

    /// Explicit `host:port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    /// Refuse servers without STARTTLS
    #[serde(default)]
    pub require_tls: bool,
}

impl AccountConfig {
    /// Build dial settings for this account.
    pub fn dialer_config(&self, liveness: &LivenessSettings) -> DialerConfig {
        let mut config = DialerConfig::new(&self.account, &self.password)
            .with_liveness(liveness.to_liveness())
            .with_require_tls(self.require_tls);
        if let Some(server) = self.server.as_deref().filter(|s| !s.is_empty()) {
            config = config.with_server(server);
        }
        config
    }
}

/// Liveness timing in seconds; zero disables a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessSettings {
    /// Seconds between keepalives
    pub keepalive_interval_secs: u64,

    /// Keepalive write deadline in seconds
    pub keepalive_timeout_secs: u64,

    /// Seconds between pings
    pub ping_interval_secs: u64,

    /// Ping reply deadline in seconds
    pub ping_timeout_secs: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        let defaults = LivenessConfig::default();
        Self {
            keepalive_interval_secs: defaults.keepalive_interval.as_secs(),
            keepalive_timeout_secs: defaults.keepalive_timeout.as_secs(),
            ping_interval_secs: defaults.ping_interval.as_secs(),
            ping_timeout_secs: defaults.ping_timeout.as_secs(),
        }
    }
}

impl LivenessSettings {
    /// Convert to runtime timing.
    pub fn to_liveness(&self) -> LivenessConfig {
        LivenessConfig {
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            keepalive_timeout: Duration::from_secs(self.keepalive_timeout_secs),
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            ping_timeout: Duration::from_secs(self.ping_timeout_secs),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Copy raw XML traffic to stderr
    pub traffic: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.accounts.is_empty());
        assert_eq!(config.liveness.ping_interval_secs, 60);
        assert!(!config.logging.traffic);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [[accounts]]
            account = "alice@example.com"
            password = "secret"
            server = "10.0.0.1:5223"
            require_tls = true

            [[accounts]]
            account = "bob@example.org"
            password = "hunter2"

            [liveness]
            ping_interval_secs = 0

            [logging]
            traffic = true
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[0].server.as_deref(), Some("10.0.0.1:5223"));
        assert!(config.accounts[0].require_tls);
        assert_eq!(config.accounts[1].server, None);
        assert_eq!(config.liveness.ping_interval_secs, 0);
        assert_eq!(config.liveness.keepalive_interval_secs, 30);
        assert!(config.logging.traffic);
    }

    #[test]
    fn test_account_selection() {
        let mut config = Config::default();
        assert!(config.account(None).is_err());

        config.accounts.push(AccountConfig {
            account: "alice@example.com".to_string(),
            password: "a".to_string(),
            ..AccountConfig::default()
        });
        assert_eq!(config.account(None).unwrap().account, "alice@example.com");

        config.accounts.push(AccountConfig {
            account: "bob@example.org".to_string(),
            password: "b".to_string(),
            ..AccountConfig::default()
        });
        assert!(config.account(None).is_err());
        assert_eq!(
            config.account(Some("bob@example.org")).unwrap().password,
            "b"
        );
        assert!(config.account(Some("carol@example.net")).is_err());
    }

    #[test]
    fn test_dialer_config_from_account() {
        let account = AccountConfig {
            account: "alice@example.com".to_string(),
            password: "secret".to_string(),
            server: Some(String::new()),
            require_tls: true,
        };
        let config = account.dialer_config(&LivenessSettings::default());
        assert!(config.server.is_none());
        assert!(config.require_tls);
        assert_eq!(config.liveness, LivenessConfig::default());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[accounts]]\naccount = \"alice@example.com\"\npassword = \"secret\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.accounts[0].account, "alice@example.com");
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::from_file(&missing),
            Err(XmppError::Config(_))
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "accounts = 3").unwrap();
        assert!(matches!(Config::from_file(&bad), Err(XmppError::Config(_))));
    }
}
