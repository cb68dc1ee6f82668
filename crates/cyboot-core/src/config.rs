//! TOML-backed tool configuration.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::family::CpuFamily;
use crate::protocol::SECURITY_KEY_LEN;

/// Image preparation settings.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Target CPU family.
    pub cpu: CpuFamily,
    /// Flash bytes occupied by the bootloader itself.
    pub bootloader_size: u32,
}

/// Bootloader security key, written in config files as 12 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecurityKey([u8; SECURITY_KEY_LEN]);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseKeyError {
    #[error("security key is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("security key must be {expected} bytes, got {actual}")]
    BadLength { expected: usize, actual: usize },
}

impl SecurityKey {
    pub fn new(bytes: [u8; SECURITY_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for SecurityKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())?;
        <[u8; SECURITY_KEY_LEN]>::try_from(bytes.as_slice())
            .map(Self)
            .map_err(|_| ParseKeyError::BadLength {
                expected: SECURITY_KEY_LEN,
                actual: bytes.len(),
            })
    }
}

impl TryFrom<String> for SecurityKey {
    type Error = ParseKeyError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SecurityKey> for String {
    fn from(key: SecurityKey) -> Self {
        hex::encode_upper(key.0)
    }
}

/// Device update settings.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Application slot (1 or 2) on multi-application bootloaders.
    pub app_slot: Option<u8>,
    pub security_key: Option<SecurityKey>,
}

/// Complete configuration file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub convert: ConvertConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
