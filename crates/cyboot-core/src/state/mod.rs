//! State machine module.

pub mod machine;

pub use machine::{Action, ErrorKind, SessionContext, SessionState};
