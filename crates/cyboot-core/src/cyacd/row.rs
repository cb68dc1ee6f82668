//! Header and row lines of the row-image (`.cyacd`) format.
//!
//! Header: `SSSSSSSSRRCC` - silicon id (big-endian), silicon revision,
//! checksum type.
//! Row: `:AARRRRLLLL<data>CC` - array id, row number, data size, `size` data
//! bytes and a two's complement checksum over the row number, size and data
//! bytes. All numbers are uppercase hex and big-endian.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::checksum::{sum8, twos_complement8};
use crate::protocol::{ChecksumType, DEFAULT_ARRAY_ID};

/// Decoded length of a header line.
const HEADER_LEN: usize = 6;
/// Array id, row number, size and checksum bytes around the row data.
const ROW_OVERHEAD: usize = 6;

/// Why a single line was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LineError {
    #[error("Missing start code ':'")]
    MissingStartCode,

    #[error("Invalid hex digits: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Expected {expected} bytes, got {actual}")]
    BadLength { expected: usize, actual: usize },

    #[error("Row declares {declared} data bytes but carries {actual}")]
    SizeMismatch { declared: u16, actual: usize },

    #[error("Row checksum mismatch: expected 0x{expected:02X}, found 0x{found:02X}")]
    ChecksumMismatch { expected: u8, found: u8 },

    #[error("Unknown checksum type 0x{0:02X}")]
    UnknownChecksumType(u8),

    #[error("Row data too long: {len} bytes does not fit a 16-bit size")]
    RowTooLong { len: usize },
}

/// First line of a row image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub silicon_id: u32,
    pub silicon_rev: u8,
    pub checksum_type: ChecksumType,
}

impl ImageHeader {
    pub fn new(silicon_id: u32, silicon_rev: u8) -> Self {
        Self {
            silicon_id,
            silicon_rev,
            checksum_type: ChecksumType::Sum,
        }
    }

    /// Parse a header line (line terminator already removed).
    pub fn parse(line: &str) -> Result<Self, LineError> {
        let bytes = hex::decode(line)?;
        if bytes.len() != HEADER_LEN {
            return Err(LineError::BadLength {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let checksum_type =
            ChecksumType::try_from(bytes[5]).map_err(LineError::UnknownChecksumType)?;
        Ok(Self {
            silicon_id: BigEndian::read_u32(&bytes[0..4]),
            silicon_rev: bytes[4],
            checksum_type,
        })
    }
}

impl fmt::Display for ImageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}{:02X}{:02X}",
            self.silicon_id,
            self.silicon_rev,
            self.checksum_type.code()
        )
    }
}

/// One flash row as carried by the row image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRow {
    pub array_id: u8,
    pub row_number: u16,
    pub size: u16,
    pub data: Vec<u8>,
    pub checksum: u8,
}

impl FlashRow {
    /// Build a row in the default array, computing size and checksum.
    pub fn new(row_number: u16, data: Vec<u8>) -> Result<Self, LineError> {
        Self::with_array(DEFAULT_ARRAY_ID, row_number, data)
    }

    pub fn with_array(array_id: u8, row_number: u16, data: Vec<u8>) -> Result<Self, LineError> {
        let size =
            u16::try_from(data.len()).map_err(|_| LineError::RowTooLong { len: data.len() })?;
        let checksum = row_checksum(row_number, size, &data);
        Ok(Self {
            array_id,
            row_number,
            size,
            data,
            checksum,
        })
    }

    /// Parse a row line (line terminator already removed).
    pub fn parse(line: &str) -> Result<Self, LineError> {
        let body = line.strip_prefix(':').ok_or(LineError::MissingStartCode)?;
        let bytes = hex::decode(body)?;
        if bytes.len() < ROW_OVERHEAD {
            return Err(LineError::BadLength {
                expected: ROW_OVERHEAD,
                actual: bytes.len(),
            });
        }

        let array_id = bytes[0];
        let row_number = BigEndian::read_u16(&bytes[1..3]);
        let size = BigEndian::read_u16(&bytes[3..5]);
        let data_len = bytes.len() - ROW_OVERHEAD;
        if data_len != size as usize {
            return Err(LineError::SizeMismatch {
                declared: size,
                actual: data_len,
            });
        }

        let data = bytes[5..5 + data_len].to_vec();
        let found = bytes[bytes.len() - 1];
        let expected = row_checksum(row_number, size, &data);
        if found != expected {
            return Err(LineError::ChecksumMismatch { expected, found });
        }

        Ok(Self {
            array_id,
            row_number,
            size,
            data,
            checksum: found,
        })
    }

    /// Checksum the device reports for this row once programmed:
    /// `checksum + array_id + row_lo + row_hi + size_lo + size_hi` (mod 256).
    pub fn verify_checksum(&self) -> u8 {
        let [row_hi, row_lo] = self.row_number.to_be_bytes();
        let [size_hi, size_lo] = self.size.to_be_bytes();
        sum8(&[self.checksum, self.array_id, row_lo, row_hi, size_lo, size_hi])
    }

    /// Whether every data byte is zero.
    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

impl fmt::Display for FlashRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ":{:02X}{:04X}{:04X}{}{:02X}",
            self.array_id,
            self.row_number,
            self.size,
            hex::encode_upper(&self.data),
            self.checksum
        )
    }
}

/// Two's complement of the low byte of
/// `row_lo + row_hi + size_lo + size_hi + sum(data)`.
pub fn row_checksum(row_number: u16, size: u16, data: &[u8]) -> u8 {
    let [row_hi, row_lo] = row_number.to_be_bytes();
    let [size_hi, size_lo] = size.to_be_bytes();
    let prefix = sum8(&[row_lo, row_hi, size_lo, size_hi]);
    twos_complement8(&[prefix, sum8(data)])
}
