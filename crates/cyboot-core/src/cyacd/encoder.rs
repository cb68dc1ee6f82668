//! Row-image encoder: walks a [`MemoryImage`] row by row.

use std::io::{self, Write};

use tracing::{debug, info};

use super::row::{FlashRow, ImageHeader};
use crate::family::{CpuFamily, FamilyInfo};
use crate::image::MemoryImage;

/// Row-image line terminator.
pub const LINE_ENDING: &str = "\r\n";

/// Counts reported after encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeSummary {
    pub first_row: u16,
    pub rows_written: usize,
    /// All-zero rows left out of the output.
    pub rows_skipped: usize,
}

/// Encodes a memory image for one CPU family.
#[derive(Debug, Clone, Copy)]
pub struct RowImageEncoder {
    info: FamilyInfo,
    reserved_size: u32,
}

impl RowImageEncoder {
    pub fn new(family: CpuFamily, reserved_size: u32) -> Self {
        Self {
            info: family.info(),
            reserved_size,
        }
    }

    pub fn header(&self) -> ImageHeader {
        ImageHeader::new(self.info.silicon_id, self.info.silicon_rev)
    }

    /// First row after the bootloader's reserved region:
    /// `ceil(reserved_size / flash_row_size)`.
    pub fn first_row(&self) -> u32 {
        self.reserved_size.div_ceil(self.row_size())
    }

    fn row_size(&self) -> u32 {
        self.info.flash_row_size as u32
    }

    /// Every row from [`first_row`](Self::first_row) up to the image extent,
    /// blank ones included, in ascending order.
    pub fn all_rows<'a>(&self, image: &'a MemoryImage) -> impl Iterator<Item = FlashRow> + 'a {
        let row_size = self.row_size();
        let extent = image.extent();
        (self.first_row()..)
            .take_while(move |row| row * row_size < extent)
            .map_while(|row| u16::try_from(row).ok())
            // A window is exactly one row long, which always fits the size field.
            .map_while(move |row| {
                let data = image.window(row as u32 * row_size, row_size as usize);
                FlashRow::new(row, data).ok()
            })
    }

    /// Rows that carry at least one non-zero byte.
    pub fn rows<'a>(&self, image: &'a MemoryImage) -> impl Iterator<Item = FlashRow> + 'a {
        self.all_rows(image).filter(|row| !row.is_blank())
    }

    /// Write the header and every non-blank row.
    pub fn encode<W: Write>(&self, image: &MemoryImage, mut writer: W) -> io::Result<EncodeSummary> {
        let mut summary = EncodeSummary {
            first_row: u16::try_from(self.first_row()).unwrap_or(u16::MAX),
            ..Default::default()
        };

        write!(writer, "{}{}", self.header(), LINE_ENDING)?;

        for row in self.all_rows(image) {
            if row.is_blank() {
                debug!(row = row.row_number, "Skipping blank row");
                summary.rows_skipped += 1;
                continue;
            }
            write!(writer, "{}{}", row, LINE_ENDING)?;
            summary.rows_written += 1;
        }

        writer.flush()?;
        info!(
            first_row = summary.first_row,
            written = summary.rows_written,
            skipped = summary.rows_skipped,
            "Row image encoded"
        );
        Ok(summary)
    }

    /// Encode into an in-memory string.
    pub fn encode_to_string(&self, image: &MemoryImage) -> io::Result<(String, EncodeSummary)> {
        let mut out = Vec::new();
        let summary = self.encode(image, &mut out)?;
        Ok((String::from_utf8_lossy(&out).into_owned(), summary))
    }
}
