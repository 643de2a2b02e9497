//! Fingerprint command - show this device's OMEMO identity without connecting.

use console::style;
use serde::Serialize;

use xs_core::config::AppConfig;
use xs_core::error::{XsError, XsResult};
use xs_services::{SendMsg, Service};
use xs_store::{Database, DatabaseStats};

use super::{print_json, prompt_text};
use crate::OutputFormat;

#[derive(Debug, Serialize)]
struct DeviceInfo {
    jid: String,
    device_id: u32,
    fingerprint: String,
    database: String,
    stats: DatabaseStats,
}

/// Run the fingerprint command. Creates the device on first use.
pub fn run(mut config: AppConfig, format: OutputFormat) -> XsResult<()> {
    if config.account.jid.trim().is_empty() {
        config.account.jid = prompt_text("Account JID")?;
    }

    let mut service = SendMsg::new(config)?;
    service.init()?;
    let (device_id, fingerprint) = service.fingerprint()?;
    let path = service.database_path();
    let jid = service.account().to_string();
    service.shutdown()?;

    let stats = Database::open(&path)?.stats()?;
    check_keys(&stats)?;
    let info = DeviceInfo {
        jid,
        device_id,
        fingerprint,
        database: path.display().to_string(),
        stats,
    };

    match format {
        OutputFormat::Json => print_json(&info),
        OutputFormat::Text => {
            println!("{}", style(&info.jid).bold());
            println!("  Device:      {}", info.device_id);
            println!("  Fingerprint: {}", style(&info.fingerprint).cyan());
            println!("  Key store:   {}", info.database);
            println!(
                "  Keys:        {} prekeys, {} signed prekey(s)",
                info.stats.prekeys, info.stats.signed_prekeys
            );
            println!(
                "  Contacts:    {} device(s), {} identities, {} session(s)",
                info.stats.devices, info.stats.identities, info.stats.sessions
            );
            Ok(())
        }
    }
}

/// A store without prekeys cannot accept new sessions, whatever the output format.
fn check_keys(stats: &DatabaseStats) -> XsResult<()> {
    if stats.prekeys == 0 {
        return Err(XsError::Omemo("key store has no prekeys".into()));
    }
    Ok(())
}
