//! Application-wide constants.

/// Application name, also used as the default resource prefix.
pub const APP_NAME: &str = "send-msg";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default client-to-server port (STARTTLS or plain).
pub const DEFAULT_CLIENT_PORT: u16 = 5222;

/// Default timeout for establishing a session, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;

/// Default timeout for one IQ round trip, in milliseconds.
pub const DEFAULT_IQ_TIMEOUT_MS: u64 = 30_000;

/// Default OMEMO data directory, relative to the working directory.
pub const DEFAULT_DATA_DIR: &str = "omemo";

/// Number of one-time prekeys kept in the published bundle.
pub const DEFAULT_PREKEY_COUNT: u32 = 100;

/// Maximum number of skipped message keys kept per receiving chain.
pub const MAX_SKIP: u32 = 1000;

/// Database schema version.
pub const DB_SCHEMA_VERSION: i32 = 2;

/// Environment variable consulted for the account password.
pub const PASSWORD_ENV_VAR: &str = "SEND_MSG_PASSWORD";

/// Body attached for clients that cannot decrypt OMEMO.
pub const DEFAULT_FALLBACK_BODY: &str =
    "I sent you an OMEMO encrypted message but your client doesn't seem to support that.";

/// Disco#info identity advertised to the server.
pub const DISCO_IDENTITY_NAME: &str = "send-msg";

/// Namespaces not covered by `xmpp_parsers::ns`.
pub mod ns {
    pub const HINTS: &str = "urn:xmpp:hints";
    pub const OMEMO_DEVICELIST_NOTIFY: &str = "eu.siacs.conversations.axolotl.devicelist+notify";
}
