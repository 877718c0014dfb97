//! Outer firmware container: `u32le isp_len | isp_driver | app_firmware`.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{info, instrument};

use super::signature::detect_signature;
use super::{FirmwareInfo, puma, secure};
use crate::error::{IspError, Result};
use crate::identify::{ChipFamily, ChipIdentity, RunState};

pub const CONTAINER_HEADER_SIZE: usize = 4;

/// A parsed update image: ISP driver plus application firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareContainer {
    isp_driver: Vec<u8>,
    app_firmware: Vec<u8>,
    info: FirmwareInfo,
}

impl FirmwareContainer {
    /// Parse and validate a container.
    pub fn parse(data: &[u8]) -> Result<Self> {
        parse_container(data)
    }

    /// ISP driver image; empty when the container only carries application firmware.
    pub fn isp_driver(&self) -> &[u8] {
        &self.isp_driver
    }

    pub fn app_firmware(&self) -> &[u8] {
        &self.app_firmware
    }

    pub fn info(&self) -> &FirmwareInfo {
        &self.info
    }

    pub fn family(&self) -> ChipFamily {
        self.info.family()
    }

    /// Identity implied by the embedded chip signature.
    pub fn identity(&self) -> ChipIdentity {
        ChipIdentity::from_model(self.info.model, RunState::None)
    }

    /// Serialize back to the container byte format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        write_container(&self.isp_driver, &self.app_firmware)
    }
}

/// Split a container into its ISP-driver and application sub-images.
pub fn split_container(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let mut cursor = Cursor::new(data);
    let isp_len = cursor.read_u32::<LittleEndian>().map_err(|_| {
        IspError::invalid_data(format!(
            "container of {} bytes has no ISP driver length field",
            data.len()
        ))
    })? as usize;
    let body = &data[CONTAINER_HEADER_SIZE..];
    if isp_len > body.len() {
        return Err(IspError::invalid_data(format!(
            "ISP driver length {} exceeds remaining {} bytes",
            isp_len,
            body.len()
        )));
    }
    Ok(body.split_at(isp_len))
}

/// Parse a container and the application image inside it.
#[instrument(skip(data), fields(len = data.len()))]
pub fn parse_container(data: &[u8]) -> Result<FirmwareContainer> {
    let (isp_driver, app_firmware) = split_container(data)?;
    let signature = detect_signature(app_firmware)?;
    let info = match signature.model.family() {
        ChipFamily::Secure => secure::parse_secure_app(app_firmware, signature)?,
        ChipFamily::Puma => puma::parse_puma_app(app_firmware, signature)?,
        ChipFamily::Unknown => {
            return Err(IspError::Unsupported("unknown chip family".into()));
        }
    };
    info!(
        model = %info.model,
        version = %info.std_fw_ver,
        isp_driver = isp_driver.len(),
        app = app_firmware.len(),
        "Firmware container parsed"
    );
    Ok(FirmwareContainer {
        isp_driver: isp_driver.to_vec(),
        app_firmware: app_firmware.to_vec(),
        info,
    })
}

/// Concatenate the length header, the ISP driver and the application firmware.
pub fn write_container(isp_driver: &[u8], app_firmware: &[u8]) -> Result<Vec<u8>> {
    let isp_len = u32::try_from(isp_driver.len()).map_err(|_| {
        IspError::invalid_data(format!("ISP driver of {} bytes is too large", isp_driver.len()))
    })?;
    let mut buf =
        Vec::with_capacity(CONTAINER_HEADER_SIZE + isp_driver.len() + app_firmware.len());
    buf.write_u32::<LittleEndian>(isp_len)
        .map_err(|e| IspError::invalid_data(e.to_string()))?;
    buf.extend_from_slice(isp_driver);
    buf.extend_from_slice(app_firmware);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::firmware::puma::tests::build_puma_image;
    use crate::firmware::secure::tests::SecureImageBuilder;
    use crate::identify::ChipModel;

    fn container(isp: &[u8], app: &[u8]) -> Vec<u8> {
        write_container(isp, app).unwrap()
    }

    #[test]
    fn test_secure_container_roundtrip() {
        let isp: Vec<u8> = (0..0x1234u32).map(|i| i as u8).collect();
        let app = SecureImageBuilder::default().build();
        let bytes = container(&isp, &app);

        let parsed = parse_container(&bytes).unwrap();
        assert_eq!(parsed.isp_driver(), &isp[..]);
        assert_eq!(parsed.app_firmware(), &app[..]);
        assert_eq!(parsed.family(), ChipFamily::Secure);
        assert_eq!(parsed.identity().model, ChipModel::Jaguar5000);
        assert!(!parsed.info().std_fw_ver.is_empty());
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_puma_container_roundtrip_without_driver() {
        let app = build_puma_image(false);
        let bytes = container(&[], &app);

        let parsed = FirmwareContainer::parse(&bytes).unwrap();
        assert!(parsed.isp_driver().is_empty());
        assert_eq!(parsed.family(), ChipFamily::Puma);
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_split_layout() {
        let bytes: [u8; 9] = [3, 0, 0, 0, 0xAA, 0xBB, 0xCC, 0x01, 0x02];
        let (isp, app) = split_container(&bytes).unwrap();
        assert_eq!(isp, &[0xAAu8, 0xBB, 0xCC][..]);
        assert_eq!(app, &[0x01u8, 0x02][..]);
    }

    #[test]
    fn test_isp_length_exceeds_stream() {
        let bytes: [u8; 7] = [0x10, 0, 0, 0, 1, 2, 3];
        let err = split_container(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        let err = parse_container(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_header() {
        let err = parse_container(&[0x01, 0x00]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_app_length_mismatch() {
        let mut app = build_puma_image(false);
        app.push(0x00);
        let err = parse_container(&container(&[1, 2, 3], &app)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        let mut app = SecureImageBuilder::default().build();
        app.truncate(app.len() - 1);
        // Truncating drops the trailing footer bytes, but the signature is still found
        let err = parse_container(&container(&[], &app)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_unknown_signature() {
        let err = parse_container(&container(&[0; 8], &[0u8; 4096])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
