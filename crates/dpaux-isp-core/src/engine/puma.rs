//! AUX-ISP engine for the Puma family (MC2900).
//!
//! Requests are written to the mode register, which reads back the chip's
//! current state. The status register reports per-window progress and the
//! flash-info handshake. There is no confirmation bit and no CRC exchange.

use tracing::{debug, info, instrument};

use super::context::{FlashInfo, ProtocolSession};
use super::timing::{PumaTimings, WaitBudget, settle};
use super::{DeviceInfo, finish};
use crate::error::{IspError, Result};
use crate::events::{IspObserver, IspPhase, LogLevel};
use crate::firmware::{FirmwareContainer, StdVersion};
use crate::identify::ChipIdentity;
use crate::protocol::codes::{FlashBank, PumaMode, PumaRequest};
use crate::protocol::constants::*;
use crate::transport::AuxTransport;

/// Puma-family engine.
#[derive(Debug, Clone, Default)]
pub struct PumaEngine {
    timings: PumaTimings,
}

impl PumaEngine {
    pub fn new(timings: PumaTimings) -> Self {
        Self { timings }
    }

    pub fn timings(&self) -> &PumaTimings {
        &self.timings
    }

    #[instrument(level = "debug", skip_all)]
    pub fn get_device_info<T: AuxTransport + ?Sized>(
        &self,
        transport: &T,
        identity: &ChipIdentity,
    ) -> Result<DeviceInfo> {
        let buf = transport.read(DPCD_ADDR_BRANCH_FW_SUB, DPCD_SIZE_DEVICE_INFO)?;
        let byte = |i: usize| buf.get(i).copied().unwrap_or(0);

        let dev = DeviceInfo {
            identity: *identity,
            chip_rev: byte(1),
            std_fw_ver: StdVersion(
                u32::from(byte(2)) << 16 | u32::from(byte(3)) << 8 | u32::from(byte(0)),
            ),
            customer_project_id: 0,
            customer_fw_ver: 0,
            chip_type: identity.chip_type,
            is_dual_bank_supported: false,
            flash_bank: FlashBank::None,
        };
        debug!(?dev, "Puma device info");
        Ok(dev)
    }

    /// Run a full update. Reset is always attempted afterwards.
    pub fn start<T, O>(
        &self,
        session: &mut ProtocolSession<'_, T, O>,
        container: &FirmwareContainer,
    ) -> Result<()>
    where
        T: AuxTransport + ?Sized,
        O: IspObserver + ?Sized,
    {
        info!(chip = %session.identity, "Starting Puma AUX-ISP");
        let result = self.run(session, container);
        finish(session, result, |s| self.reset(s))
    }

    fn run<T, O>(
        &self,
        session: &mut ProtocolSession<'_, T, O>,
        container: &FirmwareContainer,
    ) -> Result<()>
    where
        T: AuxTransport + ?Sized,
        O: IspObserver + ?Sized,
    {
        let app_mode = session.identity.is_app_mode();
        let isp_driver = if app_mode { &[][..] } else { container.isp_driver() };
        let app = container.app_firmware();
        session.set_total((isp_driver.len() + app.len()) as u64);

        session.goto_phase(IspPhase::ClaimOwnership);
        session.transport.write(DPCD_ADDR_IEEE_OUI, &MCA_OUI)?;

        if isp_driver.is_empty() {
            debug!(app_mode, "Skipping ISP driver load");
        } else {
            self.load_isp_driver(session, isp_driver)?;
        }

        session.goto_phase(IspPhase::EnterFwUpdateMode);
        write_mode(session.transport, PumaRequest::FwUpdateRequest)?;
        if app_mode {
            session.goto_phase(IspPhase::WaitFlashInfoReady);
            self.wait_flash_info_ready(session)?;
        }

        session.goto_phase(IspPhase::WaitFlashEraseDone);
        let erase_ms = match session.flash.erase_time {
            0 => self.timings.default_erase_ms,
            ms => u64::from(ms),
        };
        debug!(erase_ms, "Waiting for flash erase");
        settle(erase_ms);
        wait_mode(
            session.transport,
            PumaRequest::FwUpdateReady,
            &self.timings.flash_erase_done,
            IspPhase::WaitFlashEraseDone,
        )?;

        session.goto_phase(IspPhase::TransferAppFirmware);
        self.send_payload(session, app, false)?;

        session.goto_phase(IspPhase::ValidateFirmware);
        settle(self.timings.validate_settle_ms);
        wait_mode(
            session.transport,
            PumaRequest::FwUpdateDone,
            &self.timings.validate,
            IspPhase::ValidateFirmware,
        )?;
        session.log(LogLevel::Info, "Firmware update done");
        Ok(())
    }

    fn load_isp_driver<T, O>(
        &self,
        session: &mut ProtocolSession<'_, T, O>,
        isp_driver: &[u8],
    ) -> Result<()>
    where
        T: AuxTransport + ?Sized,
        O: IspObserver + ?Sized,
    {
        session.goto_phase(IspPhase::EnterCodeLoadingMode);
        write_mode(session.transport, PumaRequest::CodeLoadRequest)?;
        wait_mode(
            session.transport,
            PumaRequest::CodeLoadReady,
            &self.timings.code_load_ready,
            IspPhase::EnterCodeLoadingMode,
        )?;

        session.goto_phase(IspPhase::LoadIspDriver);
        self.send_payload(session, isp_driver, true)?;

        session.goto_phase(IspPhase::WaitIspDriverReady);
        session.flash = FlashInfo::default();
        wait_mode(
            session.transport,
            PumaRequest::CodeBootupDone,
            &self.timings.isp_driver_ready,
            IspPhase::WaitIspDriverReady,
        )?;
        let flash = read_flash_info(session.transport)?;
        session.flash = flash;
        info!(
            flash_id = %format!("0x{:04X}", flash.id),
            flash_size = flash.size,
            erase_time = flash.erase_time,
            "ISP driver running"
        );
        flash.check()
    }

    fn wait_flash_info_ready<T, O>(&self, session: &mut ProtocolSession<'_, T, O>) -> Result<()>
    where
        T: AuxTransport + ?Sized,
        O: IspObserver + ?Sized,
    {
        settle(self.timings.flash_info_settle_ms);
        let transport = session.transport;
        let expected = PumaMode::FlashInfoReady.code();
        self.timings
            .flash_info_ready
            .poll(|| Ok((transport.read_u8(PUMA_DPCD_CMD_STATUS_REG)? == expected).then_some(())))?
            .ok_or(IspError::Timeout {
                phase: IspPhase::WaitFlashInfoReady,
            })?;

        let flash = read_flash_info(transport)?;
        session.flash = flash;
        info!(
            flash_id = %format!("0x{:04X}", flash.id),
            flash_size = flash.size,
            erase_time = flash.erase_time,
            "Flash info ready"
        );
        flash.check()
    }

    /// Send windows, each acknowledged by "chunk received" then "chunk processed".
    ///
    /// With `ignore_ack` a missing acknowledgement is logged and the transfer
    /// goes on; transport failures still abort.
    fn send_payload<T, O>(
        &self,
        session: &mut ProtocolSession<'_, T, O>,
        payload: &[u8],
        ignore_ack: bool,
    ) -> Result<()>
    where
        T: AuxTransport + ?Sized,
        O: IspObserver + ?Sized,
    {
        let budget = self.timings.chunk_processed;
        let phase = session.phase();
        session.send_windows(payload, |s, window| {
            match wait_chunk_processed(s.transport, &budget, phase) {
                Err(IspError::Io(e)) => Err(IspError::Io(e)),
                Err(e) if ignore_ack => {
                    debug!(offset = window.offset, error = %e, "Ignoring window acknowledgement");
                    Ok(())
                }
                other => other,
            }
        })
    }

    fn reset<T, O>(&self, session: &mut ProtocolSession<'_, T, O>) -> Result<()>
    where
        T: AuxTransport + ?Sized,
        O: IspObserver + ?Sized,
    {
        settle(self.timings.reset_settle_ms);
        write_mode(session.transport, PumaRequest::ChipResetRequest)
    }
}

fn write_mode<T: AuxTransport + ?Sized>(transport: &T, request: PumaRequest) -> Result<()> {
    debug!(request = ?request, "Writing Puma mode request");
    transport.write_u8(PUMA_DPCD_SINK_MODE_REG, request.code())?;
    Ok(())
}

/// Poll the mode register until it reads `expected`.
fn wait_mode<T: AuxTransport + ?Sized>(
    transport: &T,
    expected: PumaRequest,
    budget: &WaitBudget,
    phase: IspPhase,
) -> Result<()> {
    let code = expected.code();
    budget
        .poll(|| Ok((transport.read_u8(PUMA_DPCD_SINK_MODE_REG)? == code).then_some(())))?
        .ok_or(IspError::Timeout { phase })
}

fn wait_chunk_processed<T: AuxTransport + ?Sized>(
    transport: &T,
    budget: &WaitBudget,
    phase: IspPhase,
) -> Result<()> {
    let mut show_message = true;
    budget
        .poll(|| {
            let status = transport.read_u8(PUMA_DPCD_CMD_STATUS_REG)?;
            if status == PumaMode::ChunkProcessed.code() {
                debug!("Data chunk processed");
                return Ok(Some(()));
            }
            if status == PumaMode::ChunkReceived.code() {
                if show_message {
                    debug!("Data chunk received, waiting for processing");
                    show_message = false;
                }
            } else if status == PumaMode::UpdateAbort.code() {
                return Err(IspError::UnexpectedStatus { phase, status });
            }
            Ok(None)
        })?
        .ok_or(IspError::Timeout { phase })
}

fn read_flash_info<T: AuxTransport + ?Sized>(transport: &T) -> Result<FlashInfo> {
    let record = transport.read(DPCD_ADDR_AUX_WIN, FLASH_INFO_SIZE)?;
    Ok(FlashInfo::from_le_bytes(&record))
}
