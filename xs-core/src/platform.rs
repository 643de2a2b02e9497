//! OS-specific locations and host information.

use std::path::PathBuf;

use crate::error::{XsError, XsResult};

/// Get the platform-specific configuration directory.
///
/// - Windows: `%APPDATA%/send-msg`
/// - macOS: `~/Library/Application Support/send-msg`
/// - Linux: `~/.config/send-msg`
pub fn config_dir() -> XsResult<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| XsError::Config("could not determine config directory".into()))?;
    Ok(base.join(crate::constants::APP_NAME))
}

/// Get the system hostname for resource generation.
pub fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
