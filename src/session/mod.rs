//! Session manager (C9) and high-level operation surface (C10): a single
//! active-session slot plus a monotonic session-id counter, rather than
//! a multi-session registry, since at most one debug session is ever
//! live at a time.

pub mod manager;
pub mod operations;
pub mod state;

pub use manager::SessionManager;
pub use operations::OperationSurface;
pub use state::{ListedBreakpoint, Session, StoredBreakpoint};
