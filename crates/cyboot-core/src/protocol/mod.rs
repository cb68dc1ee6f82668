//! Protocol module - bootloader status codes and shared constants.

pub mod constants;
pub mod status;

pub use constants::*;
pub use status::{BootloaderStatus, ChecksumType};
