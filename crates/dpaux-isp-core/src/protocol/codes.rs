//! Command and status codes for both chip families.

use std::fmt;

/// Status values reported in the Secure command/status and param registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecureStatus {
    None = 0x00,
    InvalidInfo = 0x01,
    CrcFailure = 0x02,
    InvalidImage = 0x03,
    SecureEnabled = 0x04,
    SecureDisabled = 0x05,
    SpiFlashFailure = 0x06,
}

impl SecureStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::None,
            0x01 => Self::InvalidInfo,
            0x02 => Self::CrcFailure,
            0x03 => Self::InvalidImage,
            0x04 => Self::SecureEnabled,
            0x05 => Self::SecureDisabled,
            0x06 => Self::SpiFlashFailure,
            _ => return None,
        })
    }
}

impl fmt::Display for SecureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecureStatus::None => write!(f, "none"),
            SecureStatus::InvalidInfo => write!(f, "invalid-info"),
            SecureStatus::CrcFailure => write!(f, "crc-failure"),
            SecureStatus::InvalidImage => write!(f, "invalid-image"),
            SecureStatus::SecureEnabled => write!(f, "secure-enabled"),
            SecureStatus::SecureDisabled => write!(f, "secure-disabled"),
            SecureStatus::SpiFlashFailure => write!(f, "spi-flash-failure"),
        }
    }
}

/// Proprietary commands of the Secure family.
///
/// 0x70 ~ 0x7F are reserved for other usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecureCommand {
    PrepareForIspMode = 0x23,
    EnterCodeLoadingMode = 0x24,
    ExecuteRamCode = 0x25,
    EnterFwUpdateMode = 0x26,
    ChunkDataProcessed = 0x27,
    InstallImages = 0x28,
    ResetSystem = 0x29,
    EnableAuxForward = 0x31,
    DisableAuxForward = 0x32,
    GetActiveFlashBank = 0x33,
}

impl SecureCommand {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SecureCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecureCommand::PrepareForIspMode => "PREPARE_FOR_ISP_MODE",
            SecureCommand::EnterCodeLoadingMode => "ENTER_CODE_LOADING_MODE",
            SecureCommand::ExecuteRamCode => "EXECUTE_RAM_CODE",
            SecureCommand::EnterFwUpdateMode => "ENTER_FW_UPDATE_MODE",
            SecureCommand::ChunkDataProcessed => "CHUNK_DATA_PROCESSED",
            SecureCommand::InstallImages => "INSTALL_IMAGES",
            SecureCommand::ResetSystem => "RESET_SYSTEM",
            SecureCommand::EnableAuxForward => "ENABLE_AUX_FORWARD",
            SecureCommand::DisableAuxForward => "DISABLE_AUX_FORWARD",
            SecureCommand::GetActiveFlashBank => "GET_ACTIVE_FLASH_BANK",
        };
        write!(f, "{} (0x{:02X})", name, self.code())
    }
}

/// Requests written to, and states read back from, the Puma mode register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PumaRequest {
    ChipResetRequest = 0x00,
    CodeLoadRequest = 0x01,
    CodeLoadReady = 0x03,
    CodeBootupDone = 0x07,
    CmdbGetInfoReq = 0xA0,
    CmdbGetInfoRead = 0xA1,
    CmdbGetInfoInvalid = 0xA2,
    CmdbGetInfoDone = 0xA3,
    FlashEraseDone = 0xE0,
    FlashEraseFail = 0xE1,
    FlashEraseRequest = 0xEE,
    FwUpdateDone = 0xF8,
    FwUpdateReady = 0xFC,
    FwUpdateRequest = 0xFE,
}

impl PumaRequest {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Values of the Puma status register during transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PumaMode {
    ChunkProcessed = 0x03,
    ChunkReceived = 0x07,
    FlashInfoReady = 0xA1,
    UpdateAbort = 0x55,
}

impl PumaMode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Active flash bank of a dual-bank Secure device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashBank {
    A,
    B,
    #[default]
    None,
}

impl FlashBank {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => FlashBank::A,
            1 => FlashBank::B,
            _ => FlashBank::None,
        }
    }
}

impl fmt::Display for FlashBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashBank::A => write!(f, "A"),
            FlashBank::B => write!(f, "B"),
            FlashBank::None => write!(f, "none"),
        }
    }
}
