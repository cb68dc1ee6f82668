/// First bootloader version (v2.20 of the bootloader component) that
/// supports the whole-application verify command.
pub const BL_VER_SUPPORT_VERIFY: u32 = 0x010214;

/// Length of the optional bootloader security key, in bytes.
pub const SECURITY_KEY_LEN: usize = 6;

/// Application slots addressed by the caller (1-based).
pub const APP_SLOT_FIRST: u8 = 1;
pub const APP_SLOT_LAST: u8 = 2;

/// Array id written by the encoder; this family has a single flash array.
pub const DEFAULT_ARRAY_ID: u8 = 0x00;
