//! send-msg - log in to an XMPP account and send one OMEMO-encrypted message.
//!
//! Usage:
//!   send-msg -t bob@example.com -m "This is a message"
//!
//! Missing recipient, message or password are asked for on the terminal.

mod commands;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error};

use xs_core::config::{AppConfig, TlsMode, TrustPolicy};
use xs_core::constants::{self, PASSWORD_ENV_VAR};
use xs_core::error::XsResult;
use xs_core::logging;

/// Send a single OMEMO-encrypted XMPP chat message.
#[derive(Parser, Debug)]
#[command(
    name = "send-msg",
    version,
    about = "Send one OMEMO-encrypted XMPP message",
    long_about = "Logs in to an XMPP account, sends one OMEMO-encrypted chat message \
                  to a recipient and logs out.\n\
                  Exit status: 0 sent, 2 usage/config, 3 connection, 4 authentication, \
                  5 encryption/trust, 6 key storage, 1 other."
)]
struct Cli {
    /// Set logging to ERROR.
    #[arg(short, long, conflicts_with = "debug")]
    quiet: bool,

    /// Set logging to DEBUG.
    #[arg(short, long)]
    debug: bool,

    /// JID to send the message to.
    #[arg(short, long)]
    to: Option<String>,

    /// Message to send.
    #[arg(short, long)]
    message: Option<String>,

    /// OMEMO data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Account JID to send from (overrides config).
    #[arg(short, long)]
    jid: Option<String>,

    /// Account password (overrides config).
    #[arg(short, long, env = PASSWORD_ENV_VAR, hide_env_values = true)]
    password: Option<String>,

    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host to connect to instead of the JID's domain.
    #[arg(long)]
    host: Option<String>,

    /// Server port.
    #[arg(long)]
    port: Option<u16>,

    /// Transport security: starttls or none.
    #[arg(long)]
    tls: Option<TlsMode>,

    /// Trust policy for undecided devices: blind or manual.
    #[arg(long)]
    trust: Option<TrustPolicy>,

    /// Do not tell the recipient about skipped devices.
    #[arg(long)]
    no_notices: bool,

    /// Print this device's OMEMO fingerprint and exit.
    #[arg(long)]
    fingerprint: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, default_value = "text")]
    format: OutputFormat,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(jid) = &self.jid {
            config.account.jid = jid.clone();
        }
        if let Some(password) = &self.password {
            config.account.password = password.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.omemo.data_dir = dir.display().to_string();
        }
        if let Some(host) = &self.host {
            config.connection.host = host.clone();
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if let Some(tls) = self.tls {
            config.connection.tls = tls;
        }
        if let Some(trust) = self.trust {
            config.omemo.trust = trust;
        }
        if self.no_notices {
            config.omemo.notify_recipient_on_error = false;
        }
    }

    /// Log filter: the verbosity flags win over the configured level.
    fn log_level<'a>(&self, config: &'a AppConfig) -> &'a str {
        if self.quiet || self.debug {
            logging::level_for_flags(self.quiet, self.debug)
        } else {
            &config.logging.level
        }
    }
}

fn load_config(path: Option<&Path>) -> XsResult<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load_default(),
    }
}

async fn run(cli: Cli) -> XsResult<()> {
    let mut config = load_config(cli.config.as_deref())?;
    cli.apply(&mut config);

    let level = cli.log_level(&config).to_string();
    let _guard = match config.effective_log_dir() {
        Some(dir) => Some(logging::init_logging(&level, &dir, config.logging.json_output)?),
        None => {
            logging::init_console_logging(&level);
            None
        }
    };
    debug!("{} v{}", constants::APP_NAME, constants::APP_VERSION);

    if cli.fingerprint {
        return commands::fingerprint::run(config, cli.format);
    }
    commands::send::run(config, cli.to, cli.message, cli.format, cli.quiet).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logging::init_console_logging("error");
            error!("{e}");
            ExitCode::from(e.exit_status().code())
        }
    }
}
