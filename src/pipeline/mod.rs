//! Session orchestration

pub mod session;

pub use session::{Session, SessionHandle, SessionStats, SessionSummary};
