//! Kinetic proprietary CRC-16.
//!
//! Bit-serial, MSB-first, no reflection and no final xor. The initial value and the
//! polynomial are the same constant (0x1021), which makes it unlike any catalogued
//! CRC-16 variant. The device expects the result widened to a little-endian u32.

use super::constants::INIT_CRC16;

/// Running CRC over one payload window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    accum: u16,
}

impl Crc16 {
    pub fn new() -> Self {
        Self { accum: INIT_CRC16 }
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let mut data_in = byte;
            for _ in 0..8 {
                let flag = data_in ^ (self.accum >> 8) as u8;
                self.accum <<= 1;
                if flag & 0x80 != 0 {
                    self.accum ^= INIT_CRC16;
                }
                data_in <<= 1;
            }
        }
    }

    pub fn value(&self) -> u16 {
        self.accum
    }

    /// The 4-byte form written to the reply-data register.
    pub fn to_wire(&self) -> [u8; 4] {
        u32::from(self.accum).to_le_bytes()
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot CRC of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(data);
    crc.value()
}
