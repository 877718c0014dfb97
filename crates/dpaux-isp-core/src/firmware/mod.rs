//! Firmware container codec.
//!
//! A container carries the ISP driver (uploaded to chip RAM) and the
//! application firmware (written to SPI flash). The application image is
//! identified by an embedded chip signature and then parsed by a
//! family-specific sub-parser.

pub mod container;
pub mod puma;
pub mod secure;
pub mod signature;
pub mod trim;

use std::fmt;

use crate::identify::{ChipFamily, ChipModel};

pub use container::{FirmwareContainer, parse_container, split_container, write_container};
pub use signature::{CodeLayout, FirmwareSignature, SIGNATURE_TABLE, detect_signature};
pub use trim::{trim_padding, trimmed_len};

/// Standard firmware version packed as `major << 16 | minor << 8 | rev`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct StdVersion(pub u32);

impl StdVersion {
    pub fn new(major: u8, minor: u8, rev: u8) -> Self {
        Self(u32::from(major) << 16 | u32::from(minor) << 8 | u32::from(rev))
    }

    pub fn major(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn minor(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn rev(&self) -> u8 {
        self.0 as u8
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}.{:02}", self.major(), self.minor(), self.rev())
    }
}

/// Configuration/calibration block found in the application image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdbInfo {
    /// Bytes to transfer.
    pub size: u32,
    pub version: u16,
    pub revision: u32,
}

/// Metadata derived from the application firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub model: ChipModel,
    pub layout: CodeLayout,
    /// Offset of the chip signature inside the application image.
    pub signature_offset: usize,
    pub std_fw_ver: StdVersion,
    pub customer_project_id: u8,
    pub customer_fw_ver: u16,
    pub esm_payload_size: u32,
    pub app_code_size: u32,
    pub app_init_data_size: u32,
    pub cmdb: Option<CmdbInfo>,
}

impl FirmwareInfo {
    pub fn family(&self) -> ChipFamily {
        self.model.family()
    }

    pub fn is_xip(&self) -> bool {
        self.layout == CodeLayout::Xip
    }

    /// CMDB transfer size; zero disables the CMDB phase.
    pub fn cmdb_block_size(&self) -> u32 {
        self.cmdb.map_or(0, |c| c.size)
    }
}
