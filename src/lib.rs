pub mod adapter;
pub mod cdp;
pub mod config;
pub mod dap;
pub mod error;
pub mod net;
pub mod phase;
pub mod session;

pub use config::{LaunchConfig, SourceBreakpointRequest};
pub use error::Error;
pub use phase::{Phase, PhaseRegistry, PhaseState};
pub use session::{OperationSurface, Session, SessionManager};

pub type Result<T> = std::result::Result<T, Error>;
