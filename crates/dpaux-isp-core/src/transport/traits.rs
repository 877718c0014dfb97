//! Register transport abstraction.
//!
//! Defines the `AuxTransport` trait for positioned access to the DPCD
//! register space, allowing different implementations (drm_dp_aux, mock, etc.).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open AUX device {path}: {message}")]
    OpenFailed { path: String, message: String },

    #[error("Write of {len} bytes at 0x{offset:05X} failed: {message}")]
    WriteFailed {
        offset: u32,
        len: usize,
        message: String,
    },

    #[error("Read of {len} bytes at 0x{offset:05X} failed: {message}")]
    ReadFailed {
        offset: u32,
        len: usize,
        message: String,
    },

    #[error("Device disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract DPCD register transport.
///
/// Every offset is absolute within the register address space. Implementations
/// perform exactly one transaction per call: no retries, no interpretation.
pub trait AuxTransport: Send + Sync {
    /// Read `length` bytes starting at `offset`.
    fn read(&self, offset: u32, length: usize) -> Result<Vec<u8>, TransportError>;

    /// Write `data` starting at `offset`.
    fn write(&self, offset: u32, data: &[u8]) -> Result<(), TransportError>;

    /// Read a single register byte.
    fn read_u8(&self, offset: u32) -> Result<u8, TransportError> {
        let bytes = self.read(offset, 1)?;
        bytes.first().copied().ok_or(TransportError::ReadFailed {
            offset,
            len: 1,
            message: "Empty response".into(),
        })
    }

    /// Write a single register byte.
    fn write_u8(&self, offset: u32, value: u8) -> Result<(), TransportError> {
        self.write(offset, &[value])
    }
}
