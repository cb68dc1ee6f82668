//! Event system for UI decoupling.
//!
//! Front ends subscribe to session events (row progress, phase changes,
//! failures) without coupling to the protocol core.

use std::fmt;

use crate::channel::AppStatus;
use crate::state::{ErrorKind, SessionState};

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

/// Events emitted by a bootload session.
#[derive(Debug, Clone, PartialEq)]
pub enum BootloadEvent {
    /// State changed.
    PhaseChanged { from: SessionState, to: SessionState },
    /// Bootloader entered.
    OperationStarted { bootloader_version: u32 },
    /// Application status read; `None` on single-application bootloaders.
    AppStatus { slot: u8, status: Option<AppStatus> },
    /// A row operation fully succeeded.
    RowComplete { array_id: u8, row_number: u16 },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Run failed.
    Error { kind: ErrorKind, message: String },
    /// Run finished successfully.
    Complete,
}

impl fmt::Display for BootloadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootloadEvent::PhaseChanged { from, to } => write!(f, "{} -> {}", from, to),
            BootloadEvent::OperationStarted { bootloader_version } => {
                write!(f, "bootloader v0x{:06X}", bootloader_version)
            }
            BootloadEvent::AppStatus { slot, status } => match status {
                Some(s) => write!(f, "app {}: valid={} active={}", slot, s.valid, s.active),
                None => write!(f, "app {}: single-application bootloader", slot),
            },
            BootloadEvent::RowComplete {
                array_id,
                row_number,
            } => write!(f, "array {} row {}", array_id, row_number),
            BootloadEvent::Log { message, .. } => write!(f, "{}", message),
            BootloadEvent::Error { kind, message } => write!(f, "{}: {}", kind, message),
            BootloadEvent::Complete => write!(f, "complete"),
        }
    }
}

/// Observer trait for receiving session events.
///
/// Called synchronously from the run loop; implementations must not block.
pub trait BootloadObserver: Send + Sync {
    fn on_event(&self, event: &BootloadEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl BootloadObserver for NullObserver {
    fn on_event(&self, _event: &BootloadEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl BootloadObserver for TracingObserver {
    fn on_event(&self, event: &BootloadEvent) {
        match event {
            BootloadEvent::PhaseChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Phase changed");
            }
            BootloadEvent::OperationStarted { bootloader_version } => {
                tracing::info!(version = %format!("0x{:06X}", bootloader_version), "Bootloader entered");
            }
            BootloadEvent::AppStatus { slot, status } => {
                tracing::info!(slot = slot, status = ?status, "Application status");
            }
            BootloadEvent::RowComplete {
                array_id,
                row_number,
            } => {
                tracing::info!(array_id = array_id, row = row_number, "Row complete");
            }
            BootloadEvent::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
            },
            BootloadEvent::Error { kind, message } => {
                tracing::error!(kind = %kind, "Error: {}", message);
            }
            BootloadEvent::Complete => {
                tracing::info!("Operation complete");
            }
        }
    }
}

/// Adapts a `Fn(array_id, row_number)` progress callback.
///
/// Only [`BootloadEvent::RowComplete`] reaches the callback.
pub struct ProgressFn<F>(pub F);

impl<F> BootloadObserver for ProgressFn<F>
where
    F: Fn(u8, u16) + Send + Sync,
{
    fn on_event(&self, event: &BootloadEvent) {
        if let BootloadEvent::RowComplete {
            array_id,
            row_number,
        } = event
        {
            (self.0)(*array_id, *row_number);
        }
    }
}
