//! Bootloader status codes and packet checksum selection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status byte reported by the bootloader for a rejected command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderStatus {
    /// Security key mismatch.
    Key,
    /// Row or application verification failed.
    Verify,
    /// Packet length invalid for the command.
    Length,
    /// Packet data invalid.
    Data,
    /// Command not recognised. Single-application bootloaders answer the
    /// application status query with this code.
    UnsupportedCommand,
    /// Silicon id/revision mismatch.
    Device,
    /// Bootloader version mismatch.
    Version,
    /// Packet checksum mismatch.
    Checksum,
    /// Flash array id out of range.
    Array,
    /// Flash row number out of range.
    Row,
    /// Bootloader application invalid.
    Bootloader,
    /// Target application is active and cannot be modified.
    ActiveApp,
    /// Unspecified device error.
    Unknown,
    /// Any code outside the known set.
    Other(u8),
}

impl BootloaderStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => BootloaderStatus::Key,
            0x02 => BootloaderStatus::Verify,
            0x03 => BootloaderStatus::Length,
            0x04 => BootloaderStatus::Data,
            0x05 => BootloaderStatus::UnsupportedCommand,
            0x06 => BootloaderStatus::Device,
            0x07 => BootloaderStatus::Version,
            0x08 => BootloaderStatus::Checksum,
            0x09 => BootloaderStatus::Array,
            0x0A => BootloaderStatus::Row,
            0x0B => BootloaderStatus::Bootloader,
            0x0C => BootloaderStatus::ActiveApp,
            0x0F => BootloaderStatus::Unknown,
            other => BootloaderStatus::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match *self {
            BootloaderStatus::Key => 0x01,
            BootloaderStatus::Verify => 0x02,
            BootloaderStatus::Length => 0x03,
            BootloaderStatus::Data => 0x04,
            BootloaderStatus::UnsupportedCommand => 0x05,
            BootloaderStatus::Device => 0x06,
            BootloaderStatus::Version => 0x07,
            BootloaderStatus::Checksum => 0x08,
            BootloaderStatus::Array => 0x09,
            BootloaderStatus::Row => 0x0A,
            BootloaderStatus::Bootloader => 0x0B,
            BootloaderStatus::ActiveApp => 0x0C,
            BootloaderStatus::Unknown => 0x0F,
            BootloaderStatus::Other(code) => code,
        }
    }
}

impl fmt::Display for BootloaderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootloaderStatus::Key => "invalid security key",
            BootloaderStatus::Verify => "verification failed",
            BootloaderStatus::Length => "invalid length",
            BootloaderStatus::Data => "invalid data",
            BootloaderStatus::UnsupportedCommand => "unsupported command",
            BootloaderStatus::Device => "device mismatch",
            BootloaderStatus::Version => "version mismatch",
            BootloaderStatus::Checksum => "packet checksum mismatch",
            BootloaderStatus::Array => "invalid flash array",
            BootloaderStatus::Row => "invalid flash row",
            BootloaderStatus::Bootloader => "bootloader invalid",
            BootloaderStatus::ActiveApp => "application is active",
            BootloaderStatus::Unknown => "unknown error",
            BootloaderStatus::Other(_) => "unrecognised status",
        };
        write!(f, "{} (0x{:02X})", name, self.code())
    }
}

/// Packet checksum algorithm selected by the row-image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    /// Two's complement additive checksum.
    #[default]
    Sum,
    /// CRC-16.
    Crc16,
}

impl ChecksumType {
    pub fn code(&self) -> u8 {
        match self {
            ChecksumType::Sum => 0x00,
            ChecksumType::Crc16 => 0x01,
        }
    }
}

impl TryFrom<u8> for ChecksumType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ChecksumType::Sum),
            0x01 => Ok(ChecksumType::Crc16),
            other => Err(other),
        }
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumType::Sum => write!(f, "SUM"),
            ChecksumType::Crc16 => write!(f, "CRC16"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        for code in 0u8..=0x10 {
            assert_eq!(BootloaderStatus::from_code(code).code(), code);
        }
        assert_eq!(
            BootloaderStatus::from_code(0x05),
            BootloaderStatus::UnsupportedCommand
        );
    }

    #[test]
    fn test_checksum_type() {
        assert_eq!(ChecksumType::try_from(0), Ok(ChecksumType::Sum));
        assert_eq!(ChecksumType::try_from(1), Ok(ChecksumType::Crc16));
        assert_eq!(ChecksumType::try_from(7), Err(7));
    }
}
