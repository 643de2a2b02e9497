//! Global error types for send-msg.
//!
//! All error categories across the workspace are unified into a single
//! `XsError` enum with conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using XsError.
pub type XsResult<T> = Result<T, XsError>;

/// A per-device problem found while preparing an OMEMO encryption.
///
/// Problems are collected for every recipient device before anything is
/// encrypted, so the caller can decide to skip the affected devices and retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionProblem {
    /// The device is listed but its bundle could not be fetched.
    MissingBundle { jid: String, device_id: u32 },
    /// The bundle was fetched but is malformed or carries a bad signature.
    InvalidBundle {
        jid: String,
        device_id: u32,
        reason: String,
    },
}

impl EncryptionProblem {
    /// Bare JID the problem belongs to.
    pub fn jid(&self) -> &str {
        match self {
            Self::MissingBundle { jid, .. } | Self::InvalidBundle { jid, .. } => jid,
        }
    }

    /// Device id the problem belongs to.
    pub fn device_id(&self) -> u32 {
        match self {
            Self::MissingBundle { device_id, .. } | Self::InvalidBundle { device_id, .. } => {
                *device_id
            }
        }
    }
}

impl std::fmt::Display for EncryptionProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingBundle { jid, device_id } => {
                write!(f, "missing bundle for device {device_id} of {jid}")
            }
            Self::InvalidBundle {
                jid,
                device_id,
                reason,
            } => write!(f, "invalid bundle for device {device_id} of {jid}: {reason}"),
        }
    }
}

/// Unified error type covering all error categories in send-msg.
#[derive(Error, Debug)]
pub enum XsError {
    // -- Configuration errors --
    /// Failed to load or parse configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// A JID could not be parsed.
    #[error("invalid jid: {0}")]
    InvalidJid(String),

    // -- Storage errors --
    /// SQLite database error.
    #[error("database error: {0}")]
    Database(String),

    /// Database migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database connection pool error.
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Database integrity check failed.
    #[error("database integrity check failed: {0}")]
    IntegrityCheck(String),

    // -- Network errors --
    /// TCP connection could not be established.
    #[error("connection error: {0}")]
    Connection(String),

    /// An operation did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// TLS negotiation or certificate error.
    #[error("tls error: {0}")]
    Tls(String),

    /// Malformed XML on the stream.
    #[error("xml error: {0}")]
    Xml(String),

    /// The server closed the stream or sent a stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// The stream ended unexpectedly.
    #[error("disconnected")]
    Disconnected,

    // -- Session establishment --
    /// SASL authentication failed.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Resource binding failed.
    #[error("resource binding failed: {0}")]
    Bind(String),

    /// An IQ request returned a stanza error.
    #[error("stanza error: {condition}{}", stanza_text_suffix(.text))]
    StanzaError {
        /// Defined condition, e.g. `item-not-found`.
        condition: String,
        /// Optional human-readable text.
        text: Option<String>,
    },

    // -- OMEMO errors --
    /// A recipient device has no trust decision yet.
    #[error("undecided device {device_id} of {jid}")]
    UndecidedDevice {
        /// Bare JID owning the device.
        jid: String,
        /// Device id.
        device_id: u32,
        /// Serialized identity public key of the device.
        identity_key: Vec<u8>,
    },

    /// Encryption cannot proceed until the listed problems are resolved or expected.
    #[error("encryption prepare failed: {}", join_problems(.0))]
    EncryptionPrepare(Vec<EncryptionProblem>),

    /// A recipient has no device that can receive the message.
    #[error("no eligible devices for {0}")]
    NoEligibleDevices(String),

    /// Session or key handling failed.
    #[error("omemo error: {0}")]
    Omemo(String),

    /// Low-level cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    // -- Message errors --
    /// The message could not be sent.
    #[error("send failed: {0}")]
    SendFailed(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Service errors --
    /// A service is not yet initialized.
    #[error("service not initialized: {0}")]
    ServiceNotInitialized(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn stanza_text_suffix(text: &Option<String>) -> String {
    text.as_deref().map(|t| format!(" ({t})")).unwrap_or_default()
}

fn join_problems(problems: &[EncryptionProblem]) -> String {
    problems
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl XsError {
    /// Whether this error came back from an IQ exchange (error reply or timeout).
    pub fn is_iq_failure(&self) -> bool {
        matches!(self, Self::StanzaError { .. } | Self::Timeout(_))
    }

    /// Build a stanza error from a defined condition.
    pub fn stanza(condition: impl Into<String>) -> Self {
        Self::StanzaError {
            condition: condition.into(),
            text: None,
        }
    }

    /// Process exit status for this error.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Config(_) | Self::MissingConfig(_) | Self::InvalidJid(_) => ExitStatus::Usage,
            Self::Connection(_)
            | Self::Timeout(_)
            | Self::Tls(_)
            | Self::Xml(_)
            | Self::Stream(_)
            | Self::Disconnected => ExitStatus::Connection,
            Self::AuthFailed(_) | Self::Bind(_) => ExitStatus::Auth,
            Self::UndecidedDevice { .. }
            | Self::EncryptionPrepare(_)
            | Self::NoEligibleDevices(_)
            | Self::Omemo(_)
            | Self::Crypto(_)
            | Self::StanzaError { .. }
            | Self::SendFailed(_) => ExitStatus::Encryption,
            Self::Database(_) | Self::Migration(_) | Self::Pool(_) | Self::IntegrityCheck(_) => {
                ExitStatus::Storage
            }
            _ => ExitStatus::Internal,
        }
    }
}

impl From<serde_json::Error> for XsError {
    fn from(e: serde_json::Error) -> Self {
        XsError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for XsError {
    fn from(e: toml::de::Error) -> Self {
        XsError::Config(e.to_string())
    }
}

/// Process exit codes reported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    /// Message sent.
    Success = 0,
    /// Unexpected internal failure.
    Internal = 1,
    /// Bad configuration or arguments.
    Usage = 2,
    /// Network, TLS or stream failure.
    Connection = 3,
    /// Authentication or bind failure.
    Auth = 4,
    /// OMEMO encryption or trust failure.
    Encryption = 5,
    /// Key storage failure.
    Storage = 6,
}

impl ExitStatus {
    /// Convert an integer code to an ExitStatus variant.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Success,
            2 => Self::Usage,
            3 => Self::Connection,
            4 => Self::Auth,
            5 => Self::Encryption,
            6 => Self::Storage,
            _ => Self::Internal,
        }
    }

    /// Get the integer code for this status.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}
