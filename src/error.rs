use thiserror::Error;

/// Error taxonomy for the debug orchestrator core.
///
/// Variants map onto the kinds described by the error-handling design:
/// configuration, prerequisite, transport, protocol, state, timeout and
/// terminated are all represented, though "terminated" is carried as data
/// on a `StopResult` rather than as an error (it is not a failure).
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No active debug session. Call start_debug_session first.")]
    NoActiveSession,

    #[error("Unknown adapter type: {0}")]
    AdapterNotFound(String),

    #[error("Cannot auto-detect debug adapter type from program path: {0}")]
    UndetectableType(String),

    #[error("Invalid launch configuration: {0}")]
    Configuration(String),

    #[error("{0}")]
    Prerequisite(String),

    #[error("DAP error: {0}")]
    Dap(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    PhaseTransition(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable short code for this error's kind, for callers that want to
    /// branch on category without matching every variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::Json(_) => "internal",
            Error::NoActiveSession => "state",
            Error::AdapterNotFound(_) | Error::UndetectableType(_) | Error::Configuration(_) => {
                "configuration"
            }
            Error::Prerequisite(_) => "prerequisite",
            Error::Dap(_) | Error::Cdp(_) => "protocol",
            Error::Process(_) | Error::ConnectionClosed => "transport",
            Error::Timeout(_) => "timeout",
            Error::PhaseTransition(_) => "state",
            Error::Internal(_) => "internal",
        }
    }
}
