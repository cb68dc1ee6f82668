//! Static per-CPU-family device parameters.
//!
//! The row-image header and row geometry come from this table rather than
//! from the device; there is no runtime discovery path.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported microcontroller families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuFamily {
    /// CY8C41xx parts.
    #[default]
    Cy8c41,
    /// CY8C42xx parts.
    Cy8c42,
}

/// Identity and flash geometry of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyInfo {
    pub silicon_id: u32,
    pub silicon_rev: u8,
    /// Flash row size, in bytes.
    pub flash_row_size: u16,
}

impl CpuFamily {
    pub const ALL: [CpuFamily; 2] = [CpuFamily::Cy8c41, CpuFamily::Cy8c42];

    #[inline]
    pub fn info(&self) -> FamilyInfo {
        match *self {
            CpuFamily::Cy8c41 => FamilyInfo {
                silicon_id: 0x0416_1193,
                silicon_rev: 0x11,
                flash_row_size: 128,
            },
            CpuFamily::Cy8c42 => FamilyInfo {
                silicon_id: 0x04C8_1193,
                silicon_rev: 0x11,
                flash_row_size: 128,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match *self {
            CpuFamily::Cy8c41 => "cy8c41",
            CpuFamily::Cy8c42 => "cy8c42",
        }
    }
}

impl fmt::Display for CpuFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid CPU family `{0}`, expected one of: `cy8c41`, `cy8c42`")]
pub struct ParseFamilyError(String);

impl FromStr for CpuFamily {
    type Err = ParseFamilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CpuFamily::ALL
            .into_iter()
            .find(|family| family.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseFamilyError(s.to_string()))
    }
}
