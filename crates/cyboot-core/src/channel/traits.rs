//! Command channel abstraction.
//!
//! A `CommandChannel` turns semantic bootloader operations into request /
//! response exchanges over its owned [`Transport`]. The packet codec lives
//! behind this trait.

use thiserror::Error;

use crate::protocol::{BootloaderStatus, ChecksumType};
use crate::transport::{Transport, TransportError};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Bootloader rejected command: {0}")]
    Status(BootloaderStatus),

    #[error("Row checksum mismatch: expected 0x{expected:02X}, device has 0x{actual:02X}")]
    VerifyMismatch { expected: u8, actual: u8 },
}

impl CommandError {
    /// The link itself failed; no further bytes should be sent.
    pub fn is_transport(&self) -> bool {
        matches!(self, CommandError::Transport(_))
    }

    /// Status answered by single-application bootloaders to the
    /// application status query.
    pub fn is_unsupported_command(&self) -> bool {
        matches!(
            self,
            CommandError::Status(BootloaderStatus::UnsupportedCommand)
        )
    }
}

/// Validity and activity of one application slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppStatus {
    pub valid: bool,
    pub active: bool,
}

/// Bootloader operations used by the session.
pub trait CommandChannel {
    type Transport: Transport;

    /// Transport owned by this channel.
    fn transport(&mut self) -> &mut Self::Transport;

    /// Select the packet checksum used for subsequent commands.
    fn set_checksum_type(&mut self, checksum_type: ChecksumType);

    /// Enter the bootloader, returning its version.
    fn start(
        &mut self,
        silicon_id: u32,
        silicon_rev: u8,
        security_key: Option<&[u8]>,
    ) -> Result<u32, CommandError>;

    /// Leave the bootloader.
    fn end(&mut self) -> Result<(), CommandError>;

    fn erase_row(&mut self, array_id: u8, row_number: u16) -> Result<(), CommandError>;

    fn program_row(&mut self, array_id: u8, row_number: u16, data: &[u8])
    -> Result<(), CommandError>;

    /// Compare the device's checksum of a row against `checksum`.
    fn verify_row(&mut self, array_id: u8, row_number: u16, checksum: u8)
    -> Result<(), CommandError>;

    /// Device slot (0 or 1) status.
    fn get_app_status(&mut self, slot: u8) -> Result<AppStatus, CommandError>;

    /// Mark device slot (0 or 1) as the active application.
    fn set_app_status(&mut self, slot: u8) -> Result<(), CommandError>;

    /// Whole-application checksum check; `Ok(false)` when the image is invalid.
    fn verify_application(&mut self) -> Result<bool, CommandError>;
}
