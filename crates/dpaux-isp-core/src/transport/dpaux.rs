//! Linux `drm_dp_aux` character-device transport.
//!
//! The kernel exposes the DPCD address space of each AUX channel as
//! `/dev/drm_dp_auxN`; positioned reads and writes map directly onto
//! native AUX transactions.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace};

use super::traits::{AuxTransport, TransportError};

/// Transport over an open `/dev/drm_dp_aux*` node.
pub struct DpAuxTransport {
    file: File,
    path: PathBuf,
}

impl DpAuxTransport {
    /// Open an AUX device node for read/write.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| TransportError::OpenFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        debug!("AUX device opened");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuxTransport for DpAuxTransport {
    fn read(&self, offset: u32, length: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; length];
        self.file
            .read_exact_at(&mut buf, u64::from(offset))
            .map_err(|e| TransportError::ReadFailed {
                offset,
                len: length,
                message: e.to_string(),
            })?;
        trace!(offset = %format!("0x{:05X}", offset), len = length, "AUX read");
        Ok(buf)
    }

    fn write(&self, offset: u32, data: &[u8]) -> Result<(), TransportError> {
        self.file
            .write_all_at(data, u64::from(offset))
            .map_err(|e| TransportError::WriteFailed {
                offset,
                len: data.len(),
                message: e.to_string(),
            })?;
        trace!(offset = %format!("0x{:05X}", offset), len = data.len(), "AUX write");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_node() {
        let err = DpAuxTransport::open("/nonexistent/drm_dp_aux9").err().unwrap();
        assert!(matches!(err, TransportError::OpenFailed { .. }));
    }

    #[test]
    fn test_positioned_io_on_regular_file() {
        let path = std::env::temp_dir().join(format!("dpaux-test-{}", std::process::id()));
        std::fs::write(&path, vec![0u8; 0x600]).unwrap();

        let aux = DpAuxTransport::open(&path).unwrap();
        aux.write(0x300, &[0x00, 0x60, 0xAD]).unwrap();
        assert_eq!(aux.read(0x300, 3).unwrap(), vec![0x00, 0x60, 0xAD]);
        assert_eq!(aux.read_u8(0x301).unwrap(), 0x60);
        // Reading past the end of the backing file is a short read
        assert!(aux.read(0x5FF, 4).is_err());

        std::fs::remove_file(&path).unwrap();
    }
}
