//! Protocol module - DPCD register map, command codes and checksums.

pub mod codes;
pub mod constants;
pub mod crc;

pub use codes::{FlashBank, PumaMode, PumaRequest, SecureCommand, SecureStatus};
pub use constants::*;
pub use crc::{Crc16, crc16};
