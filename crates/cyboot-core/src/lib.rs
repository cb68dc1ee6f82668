//! Cyboot-Core: PSoC 4 bootloader image conversion and bootload sessions.
//!
//! This crate turns Intel-HEX application images into the row-oriented
//! `.cyacd` format understood by Cypress PSoC 4 bootloaders, and drives a
//! bootloader through erase/program/verify runs over such images.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Ihex / Image**: Intel-HEX record parsing and the sparse memory image
//! - **Cyacd**: Row-image header and row lines, encoder and streaming reader
//! - **Convert**: HEX to row-image conversion pipeline
//! - **Protocol**: Bootloader status codes and shared constants
//! - **Transport**: Byte-stream link abstraction (mock)
//! - **Channel**: Bootloader command abstraction (mock)
//! - **State**: Session state machine
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use cyboot_core::config::ConvertConfig;
//! use cyboot_core::convert::convert_file;
//! use cyboot_core::family::CpuFamily;
//!
//! let config = ConvertConfig {
//!     cpu: CpuFamily::Cy8c42,
//!     bootloader_size: 0x1000,
//! };
//!
//! convert_file(Path::new("app.hex"), Path::new("app.cyacd"), &config).expect("conversion failed");
//! ```

pub mod channel;
pub mod checksum;
pub mod config;
pub mod convert;
pub mod cyacd;
pub mod events;
pub mod family;
pub mod ihex;
pub mod image;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use channel::{AppStatus, CommandChannel, CommandError, MockChannel};
pub use config::{Config, ConvertConfig, SecurityKey, SessionConfig};
pub use convert::{ConvertError, convert_file, convert_hex};
pub use cyacd::{EncodeSummary, FlashRow, ImageHeader, RowImageEncoder, RowImageReader};
pub use events::{BootloadEvent, BootloadObserver, LogLevel, NullObserver, TracingObserver};
pub use family::{CpuFamily, FamilyInfo};
pub use ihex::{HexError, HexRecord, RecordType};
pub use image::MemoryImage;
pub use protocol::{BootloaderStatus, ChecksumType};
pub use session::{AbortHandle, BootloadError, BootloadSession, RowLocation};
pub use state::{Action, ErrorKind, SessionState};
pub use transport::{MockTransport, Transport, TransportError};
