//! Command channel module.

pub mod mock;
pub mod traits;

pub use mock::{Command, CommandKind, Failure, MockChannel};
pub use traits::{AppStatus, CommandChannel, CommandError};
