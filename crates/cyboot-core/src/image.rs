//! Sparse memory image assembled from Intel-HEX data records.

use std::collections::BTreeMap;

use tracing::trace;

use crate::ihex::HexRecord;

/// Sparse byte store keyed by absolute address; unwritten bytes read as zero.
///
/// Records below `reserved_size` belong to the bootloader itself and are
/// dropped. Overlapping writes are accepted, the last one wins.
#[derive(Debug, Clone, Default)]
pub struct MemoryImage {
    reserved_size: u32,
    bytes: BTreeMap<u32, u8>,
    extent: u32,
}

impl MemoryImage {
    pub fn new(reserved_size: u32) -> Self {
        Self {
            reserved_size,
            ..Default::default()
        }
    }

    /// Apply one record. Non-data records and records inside the reserved
    /// region leave the image untouched.
    pub fn apply(&mut self, record: &HexRecord) {
        if !record.is_data() || (record.address as u32) < self.reserved_size {
            trace!(
                address = %format!("0x{:04X}", record.address),
                record_type = ?record.record_type,
                "Skipping record"
            );
            return;
        }

        let base = record.address as u32;
        for (offset, &byte) in record.data.iter().enumerate() {
            self.bytes.insert(base + offset as u32, byte);
        }
        self.extent = self.extent.max(record.end_address());
    }

    /// Byte at `address`, zero if never written.
    pub fn get(&self, address: u32) -> u8 {
        self.bytes.get(&address).copied().unwrap_or(0)
    }

    /// Copy of `len` bytes starting at `start`, zero-filled where unwritten.
    pub fn window(&self, start: u32, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let end = start.saturating_add(len as u32);
        for (&address, &byte) in self.bytes.range(start..end) {
            out[(address - start) as usize] = byte;
        }
        out
    }

    /// Highest written address plus one; zero for an empty image.
    pub fn extent(&self) -> u32 {
        self.extent
    }

    pub fn reserved_size(&self) -> u32 {
        self.reserved_size
    }

    /// Number of distinct bytes written.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
