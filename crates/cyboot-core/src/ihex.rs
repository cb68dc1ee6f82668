//! Intel-HEX record parsing.
//!
//! One text line maps to one [`HexRecord`]. Parsing is strict: the start code,
//! every field and the trailing checksum must be present and the two's
//! complement checksum must bring the byte sum to zero.

use std::fmt;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::checksum::{sum8, twos_complement8};

/// Byte count, two address bytes, record type and checksum.
const RECORD_OVERHEAD: usize = 5;

/// Every variant is a malformed record; the caller aborts the conversion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Missing start code ':'")]
    MissingStartCode,

    #[error("Invalid hex digits: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Record too short: {actual} bytes")]
    Truncated { actual: usize },

    #[error("Byte count {declared} does not match {actual} data bytes")]
    LengthMismatch { declared: u8, actual: usize },

    #[error("Checksum mismatch: record sums to 0x{sum:02X}")]
    ChecksumMismatch { sum: u8 },

    #[error("Record data too long: {len} bytes, at most 255 fit")]
    TooLong { len: usize },
}

/// Intel-HEX record type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Data,
    EndOfFile,
    ExtendedSegmentAddress,
    StartSegmentAddress,
    ExtendedLinearAddress,
    StartLinearAddress,
    Other(u8),
}

impl From<u8> for RecordType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => RecordType::Data,
            0x01 => RecordType::EndOfFile,
            0x02 => RecordType::ExtendedSegmentAddress,
            0x03 => RecordType::StartSegmentAddress,
            0x04 => RecordType::ExtendedLinearAddress,
            0x05 => RecordType::StartLinearAddress,
            other => RecordType::Other(other),
        }
    }
}

impl From<RecordType> for u8 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::Data => 0x00,
            RecordType::EndOfFile => 0x01,
            RecordType::ExtendedSegmentAddress => 0x02,
            RecordType::StartSegmentAddress => 0x03,
            RecordType::ExtendedLinearAddress => 0x04,
            RecordType::StartLinearAddress => 0x05,
            RecordType::Other(other) => other,
        }
    }
}

/// A single validated Intel-HEX record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    pub byte_count: u8,
    pub address: u16,
    pub record_type: RecordType,
    pub data: Vec<u8>,
    pub checksum: u8,
}

impl HexRecord {
    /// Build a data record with a correct checksum.
    pub fn data(address: u16, data: &[u8]) -> Result<Self, HexError> {
        let byte_count =
            u8::try_from(data.len()).map_err(|_| HexError::TooLong { len: data.len() })?;
        Ok(Self::with_type(RecordType::Data, address, byte_count, data))
    }

    /// The `:00000001FF` terminator record.
    pub fn end_of_file() -> Self {
        Self::with_type(RecordType::EndOfFile, 0, 0, &[])
    }

    fn with_type(record_type: RecordType, address: u16, byte_count: u8, data: &[u8]) -> Self {
        let mut record = Self {
            byte_count,
            address,
            record_type,
            data: data.to_vec(),
            checksum: 0,
        };
        record.checksum = twos_complement8(&record.header_and_data());
        record
    }

    /// Parse one text line, validating the checksum.
    pub fn parse_line(line: &str) -> Result<Self, HexError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let body = line.strip_prefix(':').ok_or(HexError::MissingStartCode)?;
        let bytes = hex::decode(body)?;

        if bytes.len() < RECORD_OVERHEAD {
            return Err(HexError::Truncated {
                actual: bytes.len(),
            });
        }

        let byte_count = bytes[0];
        let data_len = bytes.len() - RECORD_OVERHEAD;
        if data_len != byte_count as usize {
            return Err(HexError::LengthMismatch {
                declared: byte_count,
                actual: data_len,
            });
        }

        let sum = sum8(&bytes);
        if sum != 0 {
            return Err(HexError::ChecksumMismatch { sum });
        }

        Ok(Self {
            byte_count,
            address: BigEndian::read_u16(&bytes[1..3]),
            record_type: RecordType::from(bytes[3]),
            data: bytes[4..4 + data_len].to_vec(),
            checksum: bytes[bytes.len() - 1],
        })
    }

    /// Whether this record carries payload bytes to place in memory.
    pub fn is_data(&self) -> bool {
        self.record_type == RecordType::Data
    }

    /// Exclusive end address of the data bytes.
    pub fn end_address(&self) -> u32 {
        self.address as u32 + self.byte_count as u32
    }

    fn header_and_data(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() + RECORD_OVERHEAD);
        bytes.push(self.byte_count);
        bytes.extend_from_slice(&self.address.to_be_bytes());
        bytes.push(self.record_type.into());
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

impl FromStr for HexRecord {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_line(s)
    }
}

impl fmt::Display for HexRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = self.header_and_data();
        bytes.push(self.checksum);
        write!(f, ":{}", hex::encode_upper(bytes))
    }
}
