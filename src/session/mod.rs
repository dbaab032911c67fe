//! The interview room lifecycle.

pub mod context;
pub mod orchestrator;
pub mod phase;

pub use context::SessionContext;
pub use orchestrator::{InterviewSession, SessionBackends, SessionSnapshot};
pub use phase::SessionPhase;
