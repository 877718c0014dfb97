//! Secure-family (Jaguar / Mustang) application image parsing.
//!
//! The image is a full 1 MiB SPI-flash bank. Sections live at fixed offsets
//! and are padded with 0xFF; the app-ID footer sits just before the end of
//! the code space and carries version and customer information.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use tracing::debug;

use super::signature::{CodeLayout, FirmwareSignature};
use super::trim::{trim_padding, trimmed_len};
use super::{CmdbInfo, FirmwareInfo, StdVersion};
use crate::error::{IspError, Result};
use crate::protocol::constants::SIZE_1MB;

pub const FW_CERTIFICATE_SIZE: usize = 1024;
pub const FW_RSA_SIGNATURE_BLOCK_SIZE: usize = 256;
/// ESM and app certificates plus their RSA signatures.
pub const FW_CERTIFICATES_TOTAL: usize = FW_CERTIFICATE_SIZE * 2 + FW_RSA_SIGNATURE_BLOCK_SIZE * 2;

pub const SPI_CERTIFICATES_START: usize = 0x0000_0000;
pub const SPI_ESM_PAYLOAD_START: usize = 0x0000_1000;
pub const ESM_PAYLOAD_BLOCK_SIZE: usize = 0x0002_0000;
pub const SPI_APP_PAYLOAD_START: usize = 0x0002_1000;
pub const APP_CODE_NORMAL_BLOCK_SIZE: usize = 0x000A_0000;
pub const APP_CODE_EXTEND_BLOCK_SIZE: usize = 0x0006_0000;
pub const SPI_APP_NORMAL_INIT_DATA_START: usize = 0x000C_1000;
pub const APP_INIT_DATA_NORMAL_BLOCK_SIZE: usize = 0x0001_0000;
pub const SPI_APP_EXTEND_INIT_DATA_START: usize = 0x0008_1000;
pub const APP_INIT_DATA_EXTEND_BLOCK_SIZE: usize = 0x0005_0000;
pub const SPI_CMDB_BLOCK_START: usize = 0x000D_1000;
pub const CMDB_BLOCK_SIZE: usize = 0x0000_2000;
pub const STD_APP_ID_SIZE: usize = 32;

const CMDB_SIGNATURE: &[u8; 4] = b"MCDB";
const CMDB_HEADER_SIZE: usize = 9;

/// Application-ID footer (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JaguarFooter {
    pub app_id_struct_ver: u32,
    pub app_id: [u8; 4],
    pub app_ver_id: u32,
    pub fw_ver: u16,
    pub fw_rev: u8,
    pub customer_fw_project_id: u8,
    pub customer_fw_ver: u16,
    pub chip_rev: u8,
    pub is_fpga_enabled: u8,
}

impl JaguarFooter {
    pub const SIZE: usize = STD_APP_ID_SIZE;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(IspError::invalid_data(format!(
                "app ID footer needs {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        let mut cursor = Cursor::new(data);
        let mut footer = Self {
            app_id_struct_ver: cursor.read_u32::<LittleEndian>().map_err(short_read)?,
            ..Default::default()
        };
        cursor.read_exact(&mut footer.app_id).map_err(short_read)?;
        footer.app_ver_id = cursor.read_u32::<LittleEndian>().map_err(short_read)?;
        footer.fw_ver = cursor.read_u16::<BigEndian>().map_err(short_read)?;
        footer.fw_rev = cursor.read_u8().map_err(short_read)?;
        footer.customer_fw_project_id = cursor.read_u8().map_err(short_read)?;
        footer.customer_fw_ver = cursor.read_u16::<BigEndian>().map_err(short_read)?;
        footer.chip_rev = cursor.read_u8().map_err(short_read)?;
        footer.is_fpga_enabled = cursor.read_u8().map_err(short_read)?;
        Ok(footer)
    }

    /// 24-bit standard version: `fw_ver` holds major.minor, `fw_rev` the revision.
    pub fn std_fw_ver(&self) -> StdVersion {
        StdVersion(u32::from(self.fw_ver) << 8 | u32::from(self.fw_rev))
    }
}

fn short_read(e: std::io::Error) -> IspError {
    IspError::invalid_data(format!("truncated footer: {}", e))
}

/// Byte ranges of every transferable section of a Secure image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureLayout {
    pub app_code_block: usize,
    pub init_data_start: usize,
    pub init_data_block: usize,
    pub app_id_start: usize,
}

impl SecureLayout {
    pub fn new(layout: CodeLayout, signature_offset: usize) -> Self {
        let (app_code_block, init_data_start, init_data_block) = match layout {
            CodeLayout::Normal => (
                APP_CODE_NORMAL_BLOCK_SIZE,
                SPI_APP_NORMAL_INIT_DATA_START,
                APP_INIT_DATA_NORMAL_BLOCK_SIZE,
            ),
            CodeLayout::Xip => (
                APP_CODE_EXTEND_BLOCK_SIZE,
                SPI_APP_EXTEND_INIT_DATA_START,
                APP_INIT_DATA_EXTEND_BLOCK_SIZE,
            ),
        };
        Self {
            app_code_block,
            init_data_start,
            init_data_block,
            // The app ID tag is the second field of the footer
            app_id_start: signature_offset - 4,
        }
    }
}

/// Parse a Secure-family application image.
pub fn parse_secure_app(app: &[u8], signature: &FirmwareSignature) -> Result<FirmwareInfo> {
    if app.len() != SIZE_1MB {
        return Err(IspError::invalid_data(format!(
            "{} image must be exactly {} bytes, got {}",
            signature.model,
            SIZE_1MB,
            app.len()
        )));
    }

    let layout = SecureLayout::new(signature.layout, signature.offset);
    let footer = JaguarFooter::from_bytes(&app[layout.app_id_start..])?;

    let esm = &app[SPI_ESM_PAYLOAD_START..SPI_ESM_PAYLOAD_START + ESM_PAYLOAD_BLOCK_SIZE];
    let code = &app[SPI_APP_PAYLOAD_START..SPI_APP_PAYLOAD_START + layout.app_code_block];
    let init = &app[layout.init_data_start..layout.init_data_start + layout.init_data_block];
    let cmdb = parse_cmdb(&app[SPI_CMDB_BLOCK_START..SPI_CMDB_BLOCK_START + CMDB_BLOCK_SIZE]);

    let info = FirmwareInfo {
        model: signature.model,
        layout: signature.layout,
        signature_offset: signature.offset,
        std_fw_ver: footer.std_fw_ver(),
        customer_project_id: footer.customer_fw_project_id,
        customer_fw_ver: footer.customer_fw_ver,
        esm_payload_size: trimmed_len(esm) as u32,
        app_code_size: trimmed_len(code) as u32,
        app_init_data_size: trimmed_len(init) as u32,
        cmdb,
    };
    debug!(
        model = %info.model,
        version = %info.std_fw_ver,
        esm = info.esm_payload_size,
        app = info.app_code_size,
        init = info.app_init_data_size,
        cmdb = info.cmdb_block_size(),
        xip = info.is_xip(),
        "Parsed Secure app firmware"
    );
    Ok(info)
}

/// Validate the CMDB region; `None` when absent or its checksum fails.
///
/// Layout: `"MCDB" | version u16be | revision u24be | ... | checksum u8`, where the
/// checksum is the last byte before the 0xFF fill and equals the wrapping sum
/// of every byte before it.
fn parse_cmdb(region: &[u8]) -> Option<CmdbInfo> {
    if !region.starts_with(CMDB_SIGNATURE) {
        debug!("CMDB block not found");
        return None;
    }
    let block = trim_padding(region);
    if block.len() <= CMDB_HEADER_SIZE {
        return None;
    }
    let (body, checksum) = block.split_at(block.len() - 1);
    let sum = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != checksum[0] {
        debug!(
            expected = checksum[0],
            actual = sum,
            "CMDB checksum mismatch, skipping block"
        );
        return None;
    }
    let mut cursor = Cursor::new(&block[CMDB_SIGNATURE.len()..]);
    let version = cursor.read_u16::<BigEndian>().ok()?;
    let revision = cursor.read_u24::<BigEndian>().ok()?;
    Some(CmdbInfo {
        size: block.len() as u32,
        version,
        revision,
    })
}
