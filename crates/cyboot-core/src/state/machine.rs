//! Session state machine definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::session::RowLocation;

/// Operation applied to every row of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Erase,
    /// Program then verify each row.
    Program,
    Verify,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Erase => write!(f, "erase"),
            Action::Program => write!(f, "program"),
            Action::Verify => write!(f, "verify"),
        }
    }
}

/// Failure categories surfaced by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// File or transport failure.
    Io,
    /// Parse or checksum failure in the row image.
    MalformedImage,
    /// The bootloader rejected a command.
    Protocol,
    /// The target application slot is active.
    ActiveApplication,
    /// Post-write validation failed.
    Checksum,
    /// Stopped on request.
    Aborted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Io => write!(f, "I/O error"),
            ErrorKind::MalformedImage => write!(f, "malformed image"),
            ErrorKind::Protocol => write!(f, "protocol error"),
            ErrorKind::ActiveApplication => write!(f, "active application"),
            ErrorKind::Checksum => write!(f, "checksum error"),
            ErrorKind::Aborted => write!(f, "aborted"),
        }
    }
}

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    HeaderRead,
    OperationStarted,
    Erasing,
    Programming,
    Verifying,
    Finalizing,
    Closed(Result<(), ErrorKind>),
}

impl SessionState {
    /// Row-loop state for an action.
    pub fn for_action(action: Action) -> Self {
        match action {
            Action::Erase => SessionState::Erasing,
            Action::Program => SessionState::Programming,
            Action::Verify => SessionState::Verifying,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::HeaderRead => write!(f, "HEADER_READ"),
            SessionState::OperationStarted => write!(f, "OPERATION_STARTED"),
            SessionState::Erasing => write!(f, "ERASING"),
            SessionState::Programming => write!(f, "PROGRAMMING"),
            SessionState::Verifying => write!(f, "VERIFYING"),
            SessionState::Finalizing => write!(f, "FINALIZING"),
            SessionState::Closed(Ok(())) => write!(f, "CLOSED(OK)"),
            SessionState::Closed(Err(kind)) => write!(f, "CLOSED({})", kind),
        }
    }
}

/// Runtime state of a session, reset at the start of every run.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub state: SessionState,
    /// Reported by the bootloader once the operation has started.
    pub bootloader_version: Option<u32>,
    /// Device application slot (0 or 1), if the run targets one.
    pub app_slot: Option<u8>,
    /// Start was attempted; End is owed unless the link died.
    pub entered: bool,
    pub transport_open: bool,
    /// Last row that completed successfully.
    pub last_row: Option<RowLocation>,
    pub rows_done: usize,
}

impl SessionContext {
    /// Transition to a new state, returning the previous one.
    pub fn goto_state(&mut self, new_state: SessionState) -> SessionState {
        tracing::debug!(from = %self.state, to = %new_state, "State transition");
        std::mem::replace(&mut self.state, new_state)
    }
}
