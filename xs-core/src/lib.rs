//! send-msg core - foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by all other send-msg crates:
//! - Application configuration (account, connection, OMEMO, logging)
//! - Global error types and process exit codes
//! - Structured logging with tracing
//! - OS-specific config locations
//! - Protocol constants and XML namespaces

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod platform;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, TlsMode, TrustPolicy};
pub use error::{EncryptionProblem, ExitStatus, XsError, XsResult};
pub use logging::{init_console_logging, init_logging};
