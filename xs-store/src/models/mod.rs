//! Key store record definitions.

pub mod device;
pub mod identity;
pub mod own_identity;
pub mod prekey;
pub mod session;

/// Current time as an RFC 3339 string, the format used for all timestamps.
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
