//! Puma application image parsing.
//!
//! The image starts with an object table (certificate, ESM, signatures,
//! hashes, app) whose lengths add up to the declared payload size.

use std::io::Cursor;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use tracing::debug;

use super::signature::FirmwareSignature;
use super::{CmdbInfo, FirmwareInfo, StdVersion};
use crate::error::{IspError, Result};
use crate::protocol::constants::SIZE_512KB;

pub const PUMA_FW_HEADER_OBJECT_MAX: usize = 8;
/// Size of one object table entry: type, subtype, length.
pub const PUMA_FW_HEADER_INFO_SIZE: usize = 6;
/// Object count prefix plus the full table.
pub const PUMA_FW_HEADER_SIZE: usize = 2 + PUMA_FW_HEADER_OBJECT_MAX * PUMA_FW_HEADER_INFO_SIZE;
pub const PUMA_FW_HASH_SIZE: usize = 32;
pub const PUMA_STS_FW_PAYLOAD_SIZE: usize =
    SIZE_512KB + PUMA_FW_HEADER_SIZE + PUMA_FW_HASH_SIZE * 2;
pub const PUMA_FW_STD_VER_START_ADDR: usize = PUMA_STS_FW_PAYLOAD_SIZE - 52; // 0x8003E

pub const PUMA_CMDB_SIZE: usize = 128;
pub const PUMA_FW_CMDB_START_ADDR: usize = 0x7FE52;
pub const PUMA_FW_CMDB_STD_VER_ADDR: usize = 0x7FE56;
pub const PUMA_FW_CMDB_REV_ADDR: usize = 0x7FE58;
const PUMA_CMDB_SIGNATURE: &[u8; 4] = b"PMDB";

/// One entry of the object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumaHeaderInfo {
    pub object_type: u8,
    pub subtype: u8,
    pub length: u32,
}

/// Object table at the start of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumaHeader {
    pub objects: Vec<PumaHeaderInfo>,
}

impl PumaHeader {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < PUMA_FW_HEADER_SIZE {
            return Err(IspError::invalid_data(format!(
                "Puma header needs {} bytes, got {}",
                PUMA_FW_HEADER_SIZE,
                data.len()
            )));
        }
        let mut cursor = Cursor::new(data);
        let truncated = |_| IspError::invalid_data("truncated Puma header");
        let _unknown = cursor.read_u8().map_err(truncated)?;
        let object_count = cursor.read_u8().map_err(truncated)? as usize;
        if object_count != PUMA_FW_HEADER_OBJECT_MAX {
            return Err(IspError::invalid_data(format!(
                "F/W header object count ({}) is not {}",
                object_count, PUMA_FW_HEADER_OBJECT_MAX
            )));
        }
        let mut objects = Vec::with_capacity(object_count);
        for _ in 0..object_count {
            objects.push(PumaHeaderInfo {
                object_type: cursor.read_u8().map_err(truncated)?,
                subtype: cursor.read_u8().map_err(truncated)?,
                length: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            });
        }
        Ok(Self { objects })
    }

    /// Total payload length declared by the header, including the header itself.
    pub fn declared_size(&self) -> u64 {
        PUMA_FW_HEADER_SIZE as u64
            + self
                .objects
                .iter()
                .map(|o| u64::from(o.length))
                .sum::<u64>()
    }
}

/// Parse a Puma application image.
pub fn parse_puma_app(app: &[u8], signature: &FirmwareSignature) -> Result<FirmwareInfo> {
    if app.len() < SIZE_512KB {
        return Err(IspError::invalid_data(format!(
            "F/W payload size ({}) is not valid",
            app.len()
        )));
    }
    let header = PumaHeader::from_bytes(app)?;
    let code_size = header.declared_size();
    if code_size < (SIZE_512KB + PUMA_FW_HEADER_SIZE) as u64 {
        return Err(IspError::invalid_data(format!(
            "Puma F/W declared size ({}) not reasonable",
            code_size
        )));
    }
    if code_size != app.len() as u64 {
        return Err(IspError::invalid_data(format!(
            "Puma F/W declares {} bytes but payload holds {}",
            code_size,
            app.len()
        )));
    }

    let ver = &app[PUMA_FW_STD_VER_START_ADDR..PUMA_FW_STD_VER_START_ADDR + 3];
    let std_fw_ver = StdVersion::new(ver[1], ver[0], ver[2]);
    let cmdb = parse_cmdb(app);

    let info = FirmwareInfo {
        model: signature.model,
        layout: signature.layout,
        signature_offset: signature.offset,
        std_fw_ver,
        customer_project_id: 0,
        customer_fw_ver: 0,
        esm_payload_size: 0,
        app_code_size: code_size as u32,
        app_init_data_size: 0,
        cmdb,
    };
    debug!(
        version = %info.std_fw_ver,
        code_size = info.app_code_size,
        cmdb = info.cmdb_block_size(),
        "Parsed Puma app firmware"
    );
    Ok(info)
}

/// The CMDB checksum is the wrapping sum of all 128 block bytes, compared with
/// the first revision byte shifted left by one.
fn parse_cmdb(app: &[u8]) -> Option<CmdbInfo> {
    let block = app.get(PUMA_FW_CMDB_START_ADDR..PUMA_FW_CMDB_START_ADDR + PUMA_CMDB_SIZE)?;
    if !block.starts_with(PUMA_CMDB_SIGNATURE) {
        debug!("CMDB block not found in Puma app firmware");
        return None;
    }
    let checksum = app[PUMA_FW_CMDB_REV_ADDR] << 1;
    let sum = block.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != checksum {
        debug!(expected = checksum, actual = sum, "Puma CMDB checksum mismatch");
        return None;
    }
    let mut cursor = Cursor::new(&app[PUMA_FW_CMDB_STD_VER_ADDR..]);
    let version = cursor.read_u16::<BigEndian>().ok()?;
    let revision = cursor.read_u24::<BigEndian>().ok()?;
    Some(CmdbInfo {
        size: PUMA_CMDB_SIZE as u32,
        version,
        revision,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::firmware::signature::detect_signature;
    use crate::identify::ChipModel;

    /// Synthetic Puma image of exactly `PUMA_STS_FW_PAYLOAD_SIZE` bytes.
    pub(crate) fn build_puma_image(with_cmdb: bool) -> Vec<u8> {
        let total = PUMA_STS_FW_PAYLOAD_SIZE;
        let mut app = vec![0x5Au8; total];
        app[0] = 0x00;
        app[1] = PUMA_FW_HEADER_OBJECT_MAX as u8;
        let mut off = 2;
        let app_len = total - PUMA_FW_HEADER_SIZE - 0x1000 - 1024 * 2 - 256 * 2 - 32 * 2;
        let lengths = [1024u32, 0x1000, 256, 32, 1024, app_len as u32, 256, 32];
        for (i, len) in lengths.iter().enumerate() {
            app[off] = i as u8;
            app[off + 1] = 0;
            app[off + 2..off + 6].copy_from_slice(&len.to_le_bytes());
            off += PUMA_FW_HEADER_INFO_SIZE;
        }
        // minor, major, rev
        app[PUMA_FW_STD_VER_START_ADDR..PUMA_FW_STD_VER_START_ADDR + 3].copy_from_slice(&[5, 2, 7]);
        app[0x80042..0x80046].copy_from_slice(b"PUMA");

        if with_cmdb {
            let block = &mut app[PUMA_FW_CMDB_START_ADDR..PUMA_FW_CMDB_START_ADDR + PUMA_CMDB_SIZE];
            block.fill(0);
            block[..4].copy_from_slice(b"PMDB");
            block[4..6].copy_from_slice(&[0x00, 0x03]);
            block[6..9].copy_from_slice(&[0x10, 0x00, 0x02]);
            let target = 0x10u8 << 1;
            let partial = block.iter().fold(0u8, |a, b| a.wrapping_add(*b));
            block[PUMA_CMDB_SIZE - 1] = target.wrapping_sub(partial);
        }
        app
    }

    #[test]
    fn test_parse_puma_image() {
        let app = build_puma_image(true);
        let sig = detect_signature(&app).unwrap();
        assert_eq!(sig.model, ChipModel::Puma2900);

        let info = parse_puma_app(&app, sig).unwrap();
        assert_eq!(info.std_fw_ver, StdVersion::new(2, 5, 7));
        assert_eq!(info.app_code_size as usize, app.len());
        let cmdb = info.cmdb.unwrap();
        assert_eq!(cmdb.size, 128);
        assert_eq!(cmdb.version, 0x0003);
        assert_eq!(cmdb.revision, 0x100002);
    }

    #[test]
    fn test_puma_without_cmdb() {
        let app = build_puma_image(false);
        let sig = detect_signature(&app).unwrap();
        let info = parse_puma_app(&app, sig).unwrap();
        assert_eq!(info.cmdb_block_size(), 0);
    }

    #[test]
    fn test_declared_length_mismatch() {
        let mut app = build_puma_image(false);
        let sig = *detect_signature(&app).unwrap();
        app.extend_from_slice(&[0u8; 16]);
        let err = parse_puma_app(&app, &sig).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        app.truncate(PUMA_STS_FW_PAYLOAD_SIZE - 16);
        assert!(parse_puma_app(&app, &sig).is_err());
    }

    #[test]
    fn test_bad_object_count() {
        let mut app = build_puma_image(false);
        app[1] = 7;
        let sig = *detect_signature(&app).unwrap();
        assert_eq!(
            parse_puma_app(&app, &sig).unwrap_err().kind(),
            ErrorKind::InvalidData
        );
    }
}
