//! Application configuration management.
//!
//! Handles loading, saving, and accessing configuration: account credentials,
//! connection parameters, OMEMO storage and trust behaviour, and logging.
//! Configuration is persisted as TOML on disk; CLI flags override it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{XsError, XsResult};
use crate::platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Account credentials.
    #[serde(default)]
    pub account: AccountConfig,

    /// Server connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// OMEMO key storage and trust settings.
    #[serde(default)]
    pub omemo: OmemoConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Account credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Sender JID (e.g., "sender@example.com").
    #[serde(default)]
    pub jid: String,

    /// Account password. Usually supplied via flag, environment or prompt instead.
    #[serde(default)]
    pub password: String,

    /// Resource to bind. If empty, one is derived from the hostname.
    #[serde(default)]
    pub resource: String,
}

/// How the transport is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain TCP upgraded with STARTTLS (required).
    #[default]
    Starttls,
    /// No TLS at all. Only meant for local test servers.
    None,
}

impl std::str::FromStr for TlsMode {
    type Err = XsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "starttls" => Ok(Self::Starttls),
            "none" => Ok(Self::None),
            other => Err(XsError::Config(format!("unknown tls mode '{other}'"))),
        }
    }
}

/// Server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Host to connect to. If empty, the JID domain is used.
    #[serde(default)]
    pub host: String,

    /// TCP port. 0 selects the default client port.
    ///
    /// With neither host nor port set, the server is looked up through the
    /// domain's `_xmpp-client._tcp` SRV records.
    #[serde(default)]
    pub port: u16,

    /// Transport security mode.
    #[serde(default)]
    pub tls: TlsMode,

    /// Timeout for establishing the session, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Timeout for each IQ round trip, in milliseconds.
    #[serde(default = "default_iq_timeout")]
    pub iq_timeout_ms: u64,
}

/// What to do with recipient devices that have no trust decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustPolicy {
    /// Trust undecided devices automatically.
    #[default]
    Blind,
    /// Refuse to encrypt for undecided devices.
    Manual,
}

impl std::str::FromStr for TrustPolicy {
    type Err = XsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blind" => Ok(Self::Blind),
            "manual" => Ok(Self::Manual),
            other => Err(XsError::Config(format!("unknown trust policy '{other}'"))),
        }
    }
}

/// OMEMO configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmemoConfig {
    /// Directory holding the key store. If empty, `./omemo` is used.
    #[serde(default)]
    pub data_dir: String,

    /// Trust policy for undecided devices.
    #[serde(default)]
    pub trust: TrustPolicy,

    /// Number of one-time prekeys kept in the published bundle.
    #[serde(default = "default_prekey_count")]
    pub prekey_count: u32,

    /// Send a plaintext notice to the recipient when encryption runs into problems.
    #[serde(default = "default_true")]
    pub notify_recipient_on_error: bool,

    /// Plaintext body attached for clients without OMEMO support.
    #[serde(default = "default_fallback_body")]
    pub fallback_body: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, logs only go to stderr.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output in log files.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_connect_timeout() -> u64 {
    constants::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_iq_timeout() -> u64 {
    constants::DEFAULT_IQ_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_prekey_count() -> u32 {
    constants::DEFAULT_PREKEY_COUNT
}

fn default_fallback_body() -> String {
    constants::DEFAULT_FALLBACK_BODY.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            tls: TlsMode::default(),
            connect_timeout_ms: default_connect_timeout(),
            iq_timeout_ms: default_iq_timeout(),
        }
    }
}

impl Default for OmemoConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            trust: TrustPolicy::default(),
            prekey_count: default_prekey_count(),
            notify_recipient_on_error: true,
            fallback_body: default_fallback_body(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default config file path, if it exists.
    pub fn load_default() -> XsResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> XsResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> XsResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| XsError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> XsResult<PathBuf> {
        Ok(platform::config_dir()?.join("config.toml"))
    }

    /// Get the effective OMEMO data directory, using the configured path or `./omemo`.
    pub fn effective_data_dir(&self) -> PathBuf {
        if self.omemo.data_dir.is_empty() {
            PathBuf::from(constants::DEFAULT_DATA_DIR)
        } else {
            PathBuf::from(&self.omemo.data_dir)
        }
    }

    /// Get the effective log directory, if file logging is enabled.
    pub fn effective_log_dir(&self) -> Option<PathBuf> {
        if self.logging.directory.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.logging.directory))
        }
    }

    /// Get the resource to bind, deriving one from the hostname when unset.
    pub fn effective_resource(&self) -> String {
        if self.account.resource.is_empty() {
            format!("{}-{}", constants::APP_NAME, platform::hostname())
        } else {
            self.account.resource.clone()
        }
    }

    /// Get the port to connect to, falling back to the default client port.
    pub fn effective_port(&self) -> u16 {
        match self.connection.port {
            0 => constants::DEFAULT_CLIENT_PORT,
            port => port,
        }
    }

    /// Whether the server address comes from SRV records of the JID domain.
    ///
    /// Only STARTTLS connections without an explicit host or port use SRV.
    pub fn use_srv(&self) -> bool {
        self.connection.tls == TlsMode::Starttls
            && self.connection.host.is_empty()
            && self.connection.port == 0
    }

    /// Check that the account is usable for logging in.
    ///
    /// The JID must have a local part and a domain; the password must be set.
    pub fn validate(&self) -> XsResult<()> {
        let jid = self.account.jid.trim();
        if jid.is_empty() {
            return Err(XsError::MissingConfig("account jid".into()));
        }
        match jid.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(XsError::InvalidJid(jid.to_string())),
        }
        if self.account.password.is_empty() {
            return Err(XsError::MissingConfig("account password".into()));
        }
        if self.omemo.prekey_count == 0 {
            return Err(XsError::Config("omemo.prekey_count must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.connection.iq_timeout_ms, 30_000);
        assert_eq!(config.connection.tls, TlsMode::Starttls);
        assert_eq!(config.omemo.trust, TrustPolicy::Blind);
        assert_eq!(config.omemo.prekey_count, 100);
        assert!(config.omemo.notify_recipient_on_error);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.effective_data_dir(), PathBuf::from("omemo"));
        assert!(config.effective_log_dir().is_none());
    }

    #[test]
    fn test_effective_port() {
        let mut config = AppConfig::default();
        assert_eq!(config.effective_port(), 5222);
        config.connection.port = 15222;
        assert_eq!(config.effective_port(), 15222);
    }

    #[test]
    fn test_use_srv_only_without_explicit_address() {
        let mut config = AppConfig::default();
        assert!(config.use_srv());

        config.connection.host = "xmpp.example.com".into();
        assert!(!config.use_srv());

        config.connection.host.clear();
        config.connection.port = 5222;
        assert!(!config.use_srv());

        config.connection.port = 0;
        config.connection.tls = TlsMode::None;
        assert!(!config.use_srv());
    }

    #[test]
    fn test_validate() {
        let mut config = AppConfig::default();
        assert!(matches!(config.validate(), Err(XsError::MissingConfig(_))));

        config.account.jid = "example.com".into();
        config.account.password = "secret".into();
        assert!(matches!(config.validate(), Err(XsError::InvalidJid(_))));

        config.account.jid = "sender@example.com".into();
        assert!(config.validate().is_ok());

        config.account.password.clear();
        assert!(matches!(config.validate(), Err(XsError::MissingConfig(_))));
    }

    #[test]
    fn test_effective_resource() {
        let mut config = AppConfig::default();
        assert!(config.effective_resource().starts_with("send-msg-"));
        config.account.resource = "laptop".into();
        assert_eq!(config.effective_resource(), "laptop");
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("NONE".parse::<TlsMode>().unwrap(), TlsMode::None);
        assert!("direct".parse::<TlsMode>().is_err());
        assert_eq!("manual".parse::<TrustPolicy>().unwrap(), TrustPolicy::Manual);
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [account]
            jid = "sender@example.com"

            [connection]
            tls = "none"

            [omemo]
            trust = "manual"
            "#,
        )
        .unwrap();
        assert_eq!(config.account.jid, "sender@example.com");
        assert_eq!(config.connection.tls, TlsMode::None);
        assert_eq!(config.connection.connect_timeout_ms, 15_000);
        assert_eq!(config.omemo.trust, TrustPolicy::Manual);
        assert_eq!(config.omemo.prekey_count, 100);
    }

    #[test]
    fn test_roundtrip_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.account.jid = "sender@example.com".into();
        config.omemo.data_dir = "/var/lib/send-msg".into();
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.account.jid, "sender@example.com");
        assert_eq!(loaded.effective_data_dir(), PathBuf::from("/var/lib/send-msg"));
    }
}
