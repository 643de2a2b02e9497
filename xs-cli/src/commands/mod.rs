//! CLI command implementations.

pub mod fingerprint;
pub mod send;

use console::style;
use dialoguer::{Input, Password};

use xs_core::error::{XsError, XsResult};

/// Ask for a line of text on the terminal.
pub fn prompt_text(prompt: &str) -> XsResult<String> {
    Input::<String>::new()
        .with_prompt(prompt)
        .interact_text()
        .map_err(|e| XsError::Internal(format!("could not read {prompt}: {e}")))
}

/// Ask for a password on the terminal without echoing it.
pub fn prompt_password(prompt: &str) -> XsResult<String> {
    Password::new()
        .with_prompt(prompt)
        .interact()
        .map_err(|e| XsError::Internal(format!("could not read {prompt}: {e}")))
}

/// Print a numbered progress step.
pub fn step(current: usize, total: usize, text: &str) {
    println!("{} {text}", style(format!("[{current}/{total}]")).bold().dim());
}

/// Print a value as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> XsResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
