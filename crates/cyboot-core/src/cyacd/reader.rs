//! Sequential pull parser for the row-image format.
//!
//! The header must be read exactly once, before any row. Rows must appear
//! in strictly ascending (array, row) order. Blank or comment lines are not
//! part of the grammar and are rejected.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, instrument};

use super::row::{FlashRow, ImageHeader, LineError};

#[derive(Error, Debug)]
pub enum RowImageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Row image is empty: missing header line")]
    MissingHeader,

    #[error("Malformed header on line {line}: {source}")]
    MalformedHeader { line: usize, source: LineError },

    #[error("Malformed row on line {line}: {source}")]
    MalformedRow { line: usize, source: LineError },

    #[error("Row {array_id}:{row_number} on line {line} does not follow the previous row")]
    RowOutOfOrder {
        line: usize,
        array_id: u8,
        row_number: u16,
    },

    #[error("Header must be read before any row")]
    HeaderNotRead,

    #[error("Header has already been read")]
    HeaderAlreadyRead,
}

impl RowImageError {
    /// Line number the error refers to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            RowImageError::MalformedHeader { line, .. }
            | RowImageError::MalformedRow { line, .. }
            | RowImageError::RowOutOfOrder { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Pull parser over any buffered reader.
pub struct RowImageReader<R> {
    reader: R,
    line: String,
    line_number: usize,
    header: Option<ImageHeader>,
    last_row: Option<(u8, u16)>,
}

impl RowImageReader<BufReader<File>> {
    /// Open a row-image file.
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RowImageError> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<'a> RowImageReader<&'a [u8]> {
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

impl<R: BufRead> RowImageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_number: 0,
            header: None,
            last_row: None,
        }
    }

    /// Header read so far, if any.
    pub fn header(&self) -> Option<&ImageHeader> {
        self.header.as_ref()
    }

    /// Read and validate the header line. Must be called exactly once.
    pub fn read_header(&mut self) -> Result<ImageHeader, RowImageError> {
        if self.header.is_some() {
            return Err(RowImageError::HeaderAlreadyRead);
        }
        if !self.next_line()? {
            return Err(RowImageError::MissingHeader);
        }

        let header = ImageHeader::parse(&self.line).map_err(|source| {
            RowImageError::MalformedHeader {
                line: self.line_number,
                source,
            }
        })?;
        debug!(
            silicon_id = %format!("0x{:08X}", header.silicon_id),
            silicon_rev = %format!("0x{:02X}", header.silicon_rev),
            checksum_type = %header.checksum_type,
            "Parsed row image header"
        );
        self.header = Some(header);
        Ok(header)
    }

    /// Next row, or `None` once the image is exhausted.
    pub fn read_row(&mut self) -> Result<Option<FlashRow>, RowImageError> {
        if self.header.is_none() {
            return Err(RowImageError::HeaderNotRead);
        }
        if !self.next_line()? {
            return Ok(None);
        }

        let line = self.line_number;
        let row = FlashRow::parse(&self.line)
            .map_err(|source| RowImageError::MalformedRow { line, source })?;

        let key = (row.array_id, row.row_number);
        if self.last_row.is_some_and(|last| key <= last) {
            return Err(RowImageError::RowOutOfOrder {
                line,
                array_id: row.array_id,
                row_number: row.row_number,
            });
        }
        self.last_row = Some(key);
        Ok(Some(row))
    }

    /// Read the header and all rows.
    pub fn read_all(mut self) -> Result<(ImageHeader, Vec<FlashRow>), RowImageError> {
        let header = self.read_header()?;
        let mut rows = Vec::new();
        while let Some(row) = self.read_row()? {
            rows.push(row);
        }
        Ok((header, rows))
    }

    /// Load the next line into `self.line` without its terminator.
    fn next_line(&mut self) -> io::Result<bool> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Ok(false);
        }
        self.line_number += 1;
        if self.line.ends_with('\n') {
            self.line.pop();
            if self.line.ends_with('\r') {
                self.line.pop();
            }
        }
        Ok(true)
    }
}
