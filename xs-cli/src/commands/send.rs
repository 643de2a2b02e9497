//! Send command - the default action: encrypt and deliver one message.

use console::style;
use tracing::info;

use xs_core::config::AppConfig;
use xs_core::error::{XsError, XsResult};
use xs_services::{SendMsg, SendReport, Service};

use super::{print_json, prompt_password, prompt_text, step};
use crate::OutputFormat;

/// Run the send command.
///
/// Recipient and message come from the flags or are asked for; the account
/// JID and password fall back to prompts when neither flags, environment nor
/// config provide them.
pub async fn run(
    mut config: AppConfig,
    to: Option<String>,
    message: Option<String>,
    format: OutputFormat,
    quiet: bool,
) -> XsResult<()> {
    let to = match to {
        Some(to) => to,
        None => prompt_text("Send To")?,
    };
    let message = match message {
        Some(message) => message,
        None => prompt_text("Message")?,
    };
    if to.trim().is_empty() {
        return Err(XsError::MissingConfig("recipient".into()));
    }

    if config.account.jid.trim().is_empty() {
        config.account.jid = prompt_text("Account JID")?;
    }
    if config.account.password.is_empty() {
        config.account.password =
            prompt_password(&format!("Password for {}", config.account.jid.trim()))?;
    }
    config.validate()?;

    let progress = format == OutputFormat::Text && !quiet;
    if progress {
        step(1, 2, "Loading OMEMO keys...");
    }
    let mut service = SendMsg::new(config)?;
    service.init()?;

    if progress {
        step(2, 2, &format!("Sending to {}...", to.trim()));
    }
    let result = service.send(to.trim(), &message).await;
    service.shutdown()?;
    let report = result?;
    info!("message {} delivered to the server", report.message_id);

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text if !quiet => {
            print_report(&report);
            Ok(())
        }
        OutputFormat::Text => Ok(()),
    }
}

fn print_report(report: &SendReport) {
    println!(
        "  {} Sent to {} (id {})",
        style("OK").green().bold(),
        report.recipient,
        report.message_id
    );
    let devices: Vec<String> = report.devices.iter().map(|d| d.to_string()).collect();
    println!(
        "  Encrypted for {} device(s): {}",
        devices.len(),
        devices.join(", ")
    );
    for device in &report.trusted {
        println!(
            "  {} trusted device {} of {}",
            style("NOTE").yellow(),
            device.device_id,
            device.jid
        );
    }
    for device in &report.skipped {
        println!(
            "  {} skipped device {} of {} (no usable keys)",
            style("WARN").yellow().bold(),
            device.device_id,
            device.jid
        );
    }
    if report.notices > 0 {
        println!("  {} plain-text notice(s) sent", report.notices);
    }
}
