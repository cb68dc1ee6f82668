//! Image preparation: Intel-HEX text to row-image text.
//!
//! The whole output is built in memory; nothing is written when any input
//! line fails to parse.

use std::fs;
use std::io::{self, BufRead};
use std::path::Path;

use thiserror::Error;
use tracing::{info, instrument};

use crate::cyacd::{EncodeSummary, RowImageEncoder};
use crate::config::ConvertConfig;
use crate::ihex::{HexError, HexRecord};
use crate::image::MemoryImage;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed record on line {line}: {source}")]
    MalformedRecord { line: usize, source: HexError },
}

/// Feed every line of an Intel-HEX stream into a fresh [`MemoryImage`].
pub fn load_image<R: BufRead>(reader: R, reserved_size: u32) -> Result<MemoryImage, ConvertError> {
    let mut image = MemoryImage::new(reserved_size);
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let record = HexRecord::parse_line(&line).map_err(|source| ConvertError::MalformedRecord {
            line: index + 1,
            source,
        })?;
        image.apply(&record);
    }
    Ok(image)
}

/// Convert Intel-HEX text to row-image text.
pub fn convert_hex(
    hex_text: &str,
    config: &ConvertConfig,
) -> Result<(String, EncodeSummary), ConvertError> {
    let image = load_image(hex_text.as_bytes(), config.bootloader_size)?;
    let encoder = RowImageEncoder::new(config.cpu, config.bootloader_size);
    Ok(encoder.encode_to_string(&image)?)
}

/// Convert `input` into `output`. The output file is only created on success.
#[instrument(skip(config), fields(cpu = %config.cpu, bootloader_size = config.bootloader_size))]
pub fn convert_file(
    input: &Path,
    output: &Path,
    config: &ConvertConfig,
) -> Result<EncodeSummary, ConvertError> {
    let text = fs::read_to_string(input)?;
    let (encoded, summary) = convert_hex(&text, config)?;
    fs::write(output, encoded)?;
    info!(output = %output.display(), rows = summary.rows_written, "Wrote row image");
    Ok(summary)
}
