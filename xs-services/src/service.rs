//! Service trait and lifecycle management.
//!
//! Services implement the `Service` trait, which gives them a standard
//! lifecycle (init, shutdown) and a health check.

use xs_core::error::XsResult;

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Service has been created but not initialized.
    Created,
    /// Service is initializing.
    Initializing,
    /// Service is running and ready.
    Running,
    /// Service is shutting down.
    ShuttingDown,
    /// Service has been stopped.
    Stopped,
    /// Service encountered a fatal error.
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Trait that send-msg services implement.
///
/// `init` does the synchronous setup (opening stores, loading keys);
/// network work happens in the service's own async methods afterwards.
pub trait Service: Send {
    /// Human-readable name of this service.
    fn name(&self) -> &str;

    /// Current state of this service.
    fn state(&self) -> ServiceState;

    /// Initialize the service. Called once before use.
    fn init(&mut self) -> XsResult<()>;

    /// Shut the service down and release what it holds.
    fn shutdown(&mut self) -> XsResult<()>;

    /// Health check. Returns true if the service is operational.
    fn is_healthy(&self) -> bool {
        self.state() == ServiceState::Running
    }
}
