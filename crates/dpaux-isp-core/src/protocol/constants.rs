//! DPCD register map and AUX-ISP protocol constants.
//!
//! Addresses are DPCD offsets as seen through the AUX channel.

// ============================================================================
// Sink Identification
// ============================================================================

/// Source IEEE OUI register
pub const DPCD_ADDR_IEEE_OUI: u32 = 0x00300;
pub const DPCD_SIZE_IEEE_OUI: usize = 3;

/// Branch device id string, six ASCII bytes
pub const DPCD_ADDR_BRANCH_ID_STR: u32 = 0x00503;
pub const DPCD_SIZE_BRANCH_ID_STR: usize = 6;

/// Firmware sub-version byte, start of the Puma device-info block
pub const DPCD_ADDR_BRANCH_FW_SUB: u32 = 0x00508;
/// Hardware revision byte, start of the Secure device-info block
pub const DPCD_ADDR_BRANCH_HW_REV: u32 = 0x00509;
pub const DPCD_SIZE_DEVICE_INFO: usize = 16;

// ============================================================================
// Secure Family (Jaguar / Mustang)
// ============================================================================

/// Proprietary command and status register
pub const DPCD_ADDR_CMD_STATUS_REG: u32 = 0x0050D;
/// Command parameter / secondary status
pub const DPCD_ADDR_PARAM_REG: u32 = 0x0050E;
/// Length of the reply written by the chip
pub const DPCD_ADDR_REPLY_LEN_REG: u32 = 0x00513;
/// Reply data area, shared by host and chip
pub const DPCD_ADDR_REPLY_DATA_REG: u32 = 0x00514;
pub const DPCD_SIZE_REPLY_DATA_REG: usize = 12;

/// Set by the host on a new command, cleared by the chip once handled
pub const DPCD_KT_CONFIRMATION_BIT: u8 = 0x80;
pub const DPCD_KT_COMMAND_MASK: u8 = 0x7F;

/// Erase time assumed when the ISP driver reports none
pub const DEFAULT_SECURE_ERASE_TIME: u16 = 10;

// ============================================================================
// Puma Family
// ============================================================================

/// Mode request register; reads back the chip state
pub const PUMA_DPCD_SINK_MODE_REG: u32 = 0x0050D;
/// Transfer status register
pub const PUMA_DPCD_CMD_STATUS_REG: u32 = 0x0050E;

// ============================================================================
// Payload Window
// ============================================================================

/// Base of the 32 KiB payload window (0x80000 ~ 0x87FFF)
pub const DPCD_ADDR_AUX_WIN: u32 = 0x80000;
pub const DPCD_SIZE_AUX_WIN: usize = 0x8000;
/// Largest single AUX transfer
pub const AUX_TRANSACTION_SIZE: usize = 16;

/// Flash info record at the window base: id, size in KiB, erase time (u16 each).
/// Byte order differs per family.
pub const FLASH_INFO_SIZE: usize = 6;

// ============================================================================
// Ownership and Checksums
// ============================================================================

/// MegaChips America OUI, claims the sink for ISP
pub const MCA_OUI: [u8; DPCD_SIZE_IEEE_OUI] = [0x00, 0x60, 0xAD];

/// Initial value and polynomial of the window CRC-16
pub const INIT_CRC16: u16 = 0x1021;

// ============================================================================
// Size Constants
// ============================================================================

pub const SIZE_1MB: usize = 1024 * 1024;
pub const SIZE_512KB: usize = 512 * 1024;
