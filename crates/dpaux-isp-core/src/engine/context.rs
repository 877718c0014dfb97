//! Per-update protocol state shared by both engines.

use std::io::Cursor;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use tracing::{debug, info};

use super::chunk::{Window, WindowIter};
use super::timing::IspTimings;
use crate::error::{IspError, Result};
use crate::events::{IspEvent, IspObserver, IspPhase, LogLevel};
use crate::identify::ChipIdentity;
use crate::protocol::constants::FLASH_INFO_SIZE;
use crate::transport::AuxTransport;

/// SPI flash characteristics reported by the ISP driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlashInfo {
    pub id: u16,
    /// Size in KiB; zero means no usable flash.
    pub size: u16,
    /// Erase time as reported by the chip.
    pub erase_time: u16,
}

impl FlashInfo {
    /// Decode `id | size | erase_time`, big-endian. Missing bytes read as zero.
    ///
    /// Secure ISP drivers build the record field by field in this order.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::decode::<BigEndian>(data)
    }

    /// Decode the same record in little-endian order, as Puma drivers store it.
    pub fn from_le_bytes(data: &[u8]) -> Self {
        Self::decode::<LittleEndian>(data)
    }

    fn decode<B: ByteOrder>(data: &[u8]) -> Self {
        let mut buf = [0u8; FLASH_INFO_SIZE];
        let n = data.len().min(FLASH_INFO_SIZE);
        buf[..n].copy_from_slice(&data[..n]);
        let mut cursor = Cursor::new(&buf[..]);
        // A fixed six-byte buffer cannot run short
        let id = cursor.read_u16::<B>().unwrap_or(0);
        let size = cursor.read_u16::<B>().unwrap_or(0);
        let erase_time = cursor.read_u16::<B>().unwrap_or(0);
        Self {
            id,
            size,
            erase_time,
        }
    }

    /// Reject missing or unknown flash.
    pub fn check(&self) -> Result<()> {
        match (self.size, self.id) {
            (0, 0) => Err(IspError::NoFlash),
            (0, flash_id) => Err(IspError::UnsupportedFlash { flash_id }),
            _ => Ok(()),
        }
    }
}

/// Bytes processed so far against the session total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub done: u64,
    pub total: u64,
}

/// State of one update attempt.
///
/// Borrows the transport and the observer for the duration of the update.
pub struct ProtocolSession<'a, T: AuxTransport + ?Sized, O: IspObserver + ?Sized> {
    pub transport: &'a T,
    observer: &'a O,
    pub identity: ChipIdentity,
    pub timings: &'a IspTimings,
    phase: IspPhase,
    progress: Progress,
    pub flash: FlashInfo,
}

impl<'a, T: AuxTransport + ?Sized, O: IspObserver + ?Sized> ProtocolSession<'a, T, O> {
    pub fn new(
        transport: &'a T,
        observer: &'a O,
        identity: ChipIdentity,
        timings: &'a IspTimings,
    ) -> Self {
        Self {
            transport,
            observer,
            identity,
            timings,
            phase: IspPhase::Start,
            progress: Progress::default(),
            flash: FlashInfo::default(),
        }
    }

    pub fn phase(&self) -> IspPhase {
        self.phase
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Transition to a new phase.
    pub fn goto_phase(&mut self, to: IspPhase) {
        let from = self.phase;
        info!(from = %from, to = %to, "State transition");
        self.phase = to;
        self.emit(IspEvent::PhaseChanged { from, to });
    }

    pub fn emit(&self, event: IspEvent) {
        self.observer.on_event(&event);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(IspEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub fn set_total(&mut self, total: u64) {
        self.progress.total = total;
    }

    /// Count `bytes` as sent and report progress.
    pub fn advance(&mut self, bytes: usize) {
        self.progress.done += bytes as u64;
        self.emit(IspEvent::Progress {
            phase: self.phase,
            current: self.progress.done,
            total: self.progress.total,
        });
    }

    /// Report a fatal error against the current phase.
    pub fn report_error(&self, err: &IspError) {
        self.emit(IspEvent::Error {
            phase: self.phase,
            message: err.to_string(),
        });
    }

    /// Write one window into the AUX window, 16 bytes at a time.
    pub fn write_window(&self, window: &Window<'_>) -> Result<()> {
        for (offset, bytes) in window.transactions() {
            self.transport.write(offset, bytes)?;
        }
        Ok(())
    }

    /// Send `payload` window by window. `ack` runs after each window has
    /// been written and must confirm the device took it.
    pub fn send_windows<F>(&mut self, payload: &[u8], mut ack: F) -> Result<()>
    where
        F: FnMut(&mut Self, &Window<'_>) -> Result<()>,
    {
        let windows = WindowIter::new(payload);
        let total = windows.total();
        for (index, window) in windows.enumerate() {
            self.write_window(&window)?;
            ack(self, &window)?;
            self.advance(window.len());
            debug!(
                phase = %self.phase,
                window = index + 1,
                windows = total,
                bytes = window.len(),
                "Window sent"
            );
        }
        Ok(())
    }
}
