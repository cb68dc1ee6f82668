//! 8-bit additive checksums shared by the HEX and row-image formats.

/// Sum of all bytes, truncated to 8 bits.
pub fn sum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Two's complement of the 8-bit sum, i.e. the byte that brings the sum to zero.
pub fn twos_complement8(bytes: &[u8]) -> u8 {
    sum8(bytes).wrapping_neg()
}
