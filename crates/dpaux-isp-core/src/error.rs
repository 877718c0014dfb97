//! Error types for the AUX-ISP engine.

use std::fmt;

use thiserror::Error;

use crate::events::IspPhase;
use crate::transport::TransportError;

/// Coarse error taxonomy, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IoFailure,
    InvalidData,
    Unsupported,
    Timeout,
    ChunkCrcMismatch,
    InstallFailed,
    /// Device answered with a status that fits no other kind.
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::IoFailure => write!(f, "I/O failure"),
            ErrorKind::InvalidData => write!(f, "invalid data"),
            ErrorKind::Unsupported => write!(f, "unsupported"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::ChunkCrcMismatch => write!(f, "chunk CRC mismatch"),
            ErrorKind::InstallFailed => write!(f, "install failed"),
            ErrorKind::Protocol => write!(f, "protocol error"),
        }
    }
}

#[derive(Error, Debug)]
pub enum IspError {
    #[error("AUX I/O failure: {0}")]
    Io(#[from] TransportError),

    #[error("Invalid firmware data: {0}")]
    InvalidData(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("SPI flash not supported (flash id 0x{flash_id:04X})")]
    UnsupportedFlash { flash_id: u16 },

    #[error("SPI flash not connected")]
    NoFlash,

    #[error("Timed out in phase {phase}")]
    Timeout { phase: IspPhase },

    #[error("Chunk data CRC check failed in phase {phase}")]
    ChunkCrcMismatch { phase: IspPhase },

    #[error("Installing images failed (status 0x{status:02X})")]
    InstallFailed { status: u8 },

    #[error("Invalid ISP driver")]
    InvalidIspDriver,

    #[error("Unexpected status 0x{status:02X} in phase {phase}")]
    UnexpectedStatus { phase: IspPhase, status: u8 },

    #[error("Reply of {len} bytes exceeds the {max}-byte reply register")]
    ReplyTooLong { len: usize, max: usize },
}

impl IspError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IspError::Io(_) => ErrorKind::IoFailure,
            IspError::InvalidData(_) => ErrorKind::InvalidData,
            IspError::Unsupported(_) | IspError::UnsupportedFlash { .. } | IspError::NoFlash => {
                ErrorKind::Unsupported
            }
            IspError::Timeout { .. } => ErrorKind::Timeout,
            IspError::ChunkCrcMismatch { .. } => ErrorKind::ChunkCrcMismatch,
            IspError::InstallFailed { .. } => ErrorKind::InstallFailed,
            IspError::InvalidIspDriver
            | IspError::UnexpectedStatus { .. }
            | IspError::ReplyTooLong { .. } => ErrorKind::Protocol,
        }
    }

    pub(crate) fn invalid_data(message: impl Into<String>) -> Self {
        IspError::InvalidData(message.into())
    }
}

pub type Result<T, E = IspError> = std::result::Result<T, E>;
