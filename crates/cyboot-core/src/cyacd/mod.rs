//! Row-image (`.cyacd`) format: header and row lines, encoder and reader.

pub mod encoder;
pub mod reader;
pub mod row;

pub use encoder::{EncodeSummary, LINE_ENDING, RowImageEncoder};
pub use reader::{RowImageError, RowImageReader};
pub use row::{FlashRow, ImageHeader, LineError, row_checksum};
