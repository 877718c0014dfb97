//! AUX-ISP engine for the Secure family (Jaguar 5000 / Mustang 5200).
//!
//! Every proprietary command is a byte written to the command/status
//! register with the confirmation bit set. The chip clears the bit when the
//! command has been processed, or replaces the byte with an error status.
//! Payload windows are followed by their CRC-16 in the reply-data register
//! and a "chunk processed" command.

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, info, instrument, warn};

use super::context::{FlashInfo, ProtocolSession};
use super::timing::{SecureTimings, WaitBudget, settle};
use super::{DeviceInfo, finish};
use crate::error::{IspError, Result};
use crate::events::{IspObserver, IspPhase, LogLevel};
use crate::firmware::secure::{
    FW_CERTIFICATES_TOTAL, SPI_APP_PAYLOAD_START, SPI_CERTIFICATES_START, SPI_CMDB_BLOCK_START,
    SPI_ESM_PAYLOAD_START, STD_APP_ID_SIZE, SecureLayout,
};
use crate::firmware::{FirmwareContainer, FirmwareInfo, StdVersion};
use crate::identify::ChipIdentity;
use crate::protocol::codes::{FlashBank, SecureCommand, SecureStatus};
use crate::protocol::constants::*;
use crate::protocol::crc::Crc16;
use crate::session::DevicePort;
use crate::transport::AuxTransport;

/// Secure-family engine.
#[derive(Debug, Clone, Default)]
pub struct SecureEngine {
    timings: SecureTimings,
}

impl SecureEngine {
    pub fn new(timings: SecureTimings) -> Self {
        Self { timings }
    }

    pub fn timings(&self) -> &SecureTimings {
        &self.timings
    }

    /// Read version and customer information from the running chip.
    ///
    /// In application mode the chip is dual-bank capable and the active bank
    /// is queried as well.
    #[instrument(level = "debug", skip_all)]
    pub fn get_device_info<T: AuxTransport + ?Sized>(
        &self,
        transport: &T,
        identity: &ChipIdentity,
    ) -> Result<DeviceInfo> {
        let buf = transport.read(DPCD_ADDR_BRANCH_HW_REV, DPCD_SIZE_DEVICE_INFO)?;
        let byte = |i: usize| buf.get(i).copied().unwrap_or(0);

        let mut dev = DeviceInfo {
            identity: *identity,
            chip_rev: byte(0),
            std_fw_ver: StdVersion(
                u32::from(byte(1)) << 16 | u32::from(byte(2)) << 8 | u32::from(byte(3)),
            ),
            customer_project_id: byte(12),
            customer_fw_ver: u16::from(byte(6)) << 8 | u16::from(byte(11)),
            chip_type: byte(13),
            is_dual_bank_supported: false,
            flash_bank: FlashBank::None,
        };
        if identity.is_app_mode() {
            dev.is_dual_bank_supported = true;
            dev.flash_bank = self.get_flash_bank_idx(transport)?;
        }
        debug!(?dev, "Secure device info");
        Ok(dev)
    }

    /// Ask the application firmware which flash bank it booted from.
    ///
    /// The source OUI is saved and restored around the query.
    #[instrument(level = "debug", skip_all)]
    pub fn get_flash_bank_idx<T: AuxTransport + ?Sized>(&self, transport: &T) -> Result<FlashBank> {
        let saved_oui = transport.read(DPCD_ADDR_IEEE_OUI, DPCD_SIZE_IEEE_OUI)?;
        write_mca_oui(transport)?;

        let queried = self.query_active_bank(transport);
        let restored = transport.write(DPCD_ADDR_IEEE_OUI, &saved_oui);
        let raw = queried?;
        restored?;

        let bank = FlashBank::from_u8(raw);
        if bank == FlashBank::None {
            warn!(raw = %format!("0x{:02X}", raw), "Chip reported no active flash bank");
        } else {
            info!(bank = %bank, "Active flash bank");
        }
        Ok(bank)
    }

    fn query_active_bank<T: AuxTransport + ?Sized>(&self, transport: &T) -> Result<u8> {
        send_kt_prop_cmd(
            transport,
            SecureCommand::GetActiveFlashBank,
            &self.timings.flash_bank_query,
            IspPhase::QueryFlashBank,
        )?;
        let raw = transport.read_u8(DPCD_ADDR_PARAM_REG)?;
        clear_kt_prop_cmd(transport)?;
        Ok(raw)
    }

    /// Forward AUX traffic to a downstream port.
    #[instrument(level = "debug", skip(self, transport))]
    pub fn enable_aux_forward<T: AuxTransport + ?Sized>(
        &self,
        transport: &T,
        port: DevicePort,
    ) -> Result<()> {
        write_mca_oui(transport)?;
        transport.write_u8(DPCD_ADDR_PARAM_REG, port.index())?;
        send_kt_prop_cmd(
            transport,
            SecureCommand::EnableAuxForward,
            &self.timings.aux_forward,
            IspPhase::AuxForward,
        )?;
        clear_kt_prop_cmd(transport)
    }

    /// Stop forwarding AUX traffic.
    pub fn disable_aux_forward<T: AuxTransport + ?Sized>(&self, transport: &T) -> Result<()> {
        write_mca_oui(transport)?;
        send_kt_prop_cmd(
            transport,
            SecureCommand::DisableAuxForward,
            &self.timings.aux_forward,
            IspPhase::AuxForward,
        )?;
        clear_kt_prop_cmd(transport)
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
        info!(chip = %session.identity, "Starting Secure AUX-ISP");
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
        let info = container.info();
        let isp_driver = container.isp_driver();
        let sections = app_sections(container.app_firmware(), info)?;
        let section_bytes: usize = sections.iter().map(|(_, data)| data.len()).sum();
        session.set_total((isp_driver.len() + section_bytes) as u64);

        session.goto_phase(IspPhase::ClaimOwnership);
        write_mca_oui(session.transport)?;

        let mut secure_auth = true;
        if isp_driver.is_empty() {
            session.log(
                LogLevel::Debug,
                "No ISP driver in container, keeping secure authentication on",
            );
        } else {
            session.goto_phase(IspPhase::LoadIspDriver);
            self.enter_code_loading_mode(session, isp_driver.len())?;
            self.send_payload(session, isp_driver, &self.timings.isp_chunk)?;

            session.goto_phase(IspPhase::ExecuteIspDriver);
            secure_auth = self.execute_isp_driver(session)?;
        }
        if !secure_auth {
            let total = session.progress().total;
            session.set_total(total.saturating_sub(FW_CERTIFICATES_TOTAL as u64));
        }

        session.goto_phase(IspPhase::EnterFwUpdateMode);
        self.enter_fw_update_mode(session, info)?;

        for (phase, data) in sections {
            if phase == IspPhase::TransferCertificates && !secure_auth {
                debug!("Secure authentication off, skipping certificates");
                continue;
            }
            session.goto_phase(phase);
            self.send_payload(session, data, &self.timings.app_chunk)?;
        }

        session.goto_phase(IspPhase::InstallImages);
        self.install_images(session)
    }

    fn enter_code_loading_mode<T, O>(
        &self,
        session: &mut ProtocolSession<'_, T, O>,
        code_size: usize,
    ) -> Result<()>
    where
        T: AuxTransport + ?Sized,
        O: IspObserver + ?Sized,
    {
        let phase = session.phase();
        if session.identity.is_app_mode() {
            send_kt_prop_cmd(
                session.transport,
                SecureCommand::PrepareForIspMode,
                &self.timings.prepare_isp_mode,
                phase,
            )?;
        }
        let size = u32::try_from(code_size)
            .map_err(|_| IspError::invalid_data(format!("ISP driver of {} bytes", code_size)))?;
        write_reply_data(session.transport, &size.to_le_bytes())?;
        send_kt_prop_cmd(
            session.transport,
            SecureCommand::EnterCodeLoadingMode,
            &self.timings.enter_code_loading,
            phase,
        )
    }

    /// Send windows, each followed by its CRC and a "chunk processed" handshake.
    fn send_payload<T, O>(
        &self,
        session: &mut ProtocolSession<'_, T, O>,
        payload: &[u8],
        budget: &WaitBudget,
    ) -> Result<()>
    where
        T: AuxTransport + ?Sized,
        O: IspObserver + ?Sized,
    {
        let phase = session.phase();
        session.send_windows(payload, |s, window| {
            let mut crc = Crc16::new();
            crc.update(window.data);
            write_reply_data(s.transport, &crc.to_wire())?;
            send_kt_prop_cmd(s.transport, SecureCommand::ChunkDataProcessed, budget, phase)
        })
    }

    /// Start the loaded driver; returns whether secure authentication is on.
    fn execute_isp_driver<T, O>(&self, session: &mut ProtocolSession<'_, T, O>) -> Result<bool>
    where
        T: AuxTransport + ?Sized,
        O: IspObserver + ?Sized,
    {
        session.flash = FlashInfo::default();
        write_kt_prop_cmd(session.transport, SecureCommand::ExecuteRamCode)?;
        wait_cmd_cleared(session.transport, &self.timings.execute_ram_code)?;

        let param = session.transport.read_u8(DPCD_ADDR_PARAM_REG)?;
        let secure_auth = match SecureStatus::from_u8(param) {
            Some(SecureStatus::SecureEnabled) => true,
            Some(SecureStatus::SecureDisabled) => false,
            _ => {
                return Err(IspError::UnexpectedStatus {
                    phase: IspPhase::ExecuteIspDriver,
                    status: param,
                });
            }
        };

        let reply = read_reply_data(session.transport, FLASH_INFO_SIZE)?;
        let mut flash = FlashInfo::from_bytes(&reply);
        if flash.erase_time == 0 {
            flash.erase_time = DEFAULT_SECURE_ERASE_TIME;
        }
        session.flash = flash;
        info!(
            flash_id = %format!("0x{:04X}", flash.id),
            flash_size = flash.size,
            erase_time = flash.erase_time,
            secure_auth,
            "ISP driver running"
        );
        flash.check()?;
        Ok(secure_auth)
    }

    fn enter_fw_update_mode<T, O>(
        &self,
        session: &mut ProtocolSession<'_, T, O>,
        info: &FirmwareInfo,
    ) -> Result<()>
    where
        T: AuxTransport + ?Sized,
        O: IspObserver + ?Sized,
    {
        let record = sizes_record(info)?;
        write_reply_data(session.transport, &record)?;
        send_kt_prop_cmd(
            session.transport,
            SecureCommand::EnterFwUpdateMode,
            &self.timings.enter_fw_update,
            IspPhase::EnterFwUpdateMode,
        )
    }

    fn install_images<T, O>(&self, session: &mut ProtocolSession<'_, T, O>) -> Result<()>
    where
        T: AuxTransport + ?Sized,
        O: IspObserver + ?Sized,
    {
        let code = SecureCommand::InstallImages.code();
        write_kt_prop_cmd(session.transport, SecureCommand::InstallImages)?;
        let transport = session.transport;
        let done = self.timings.install_images.poll(|| {
            let status = transport.read_u8(DPCD_ADDR_CMD_STATUS_REG)?;
            if status & DPCD_KT_CONFIRMATION_BIT != 0 {
                return Ok(None);
            }
            if status == code {
                Ok(Some(()))
            } else {
                Err(IspError::InstallFailed { status })
            }
        })?;
        done.ok_or(IspError::Timeout {
            phase: IspPhase::InstallImages,
        })?;
        session.log(LogLevel::Info, "Firmware images installed");
        Ok(())
    }

    fn reset<T, O>(&self, session: &mut ProtocolSession<'_, T, O>) -> Result<()>
    where
        T: AuxTransport + ?Sized,
        O: IspObserver + ?Sized,
    {
        settle(self.timings.reset_settle_ms);
        write_kt_prop_cmd(session.transport, SecureCommand::ResetSystem)
    }
}

/// Transfer order of the application image, paired with the phase that sends each part.
fn app_sections<'a>(app: &'a [u8], info: &FirmwareInfo) -> Result<Vec<(IspPhase, &'a [u8])>> {
    let layout = SecureLayout::new(info.layout, info.signature_offset);
    let slice = |start: usize, len: usize| {
        app.get(start..start + len).ok_or_else(|| {
            IspError::invalid_data(format!(
                "section 0x{:X}+0x{:X} lies outside the {}-byte image",
                start,
                len,
                app.len()
            ))
        })
    };

    let mut sections = vec![
        (
            IspPhase::TransferCertificates,
            slice(SPI_CERTIFICATES_START, FW_CERTIFICATES_TOTAL)?,
        ),
        (
            IspPhase::TransferEsm,
            slice(SPI_ESM_PAYLOAD_START, info.esm_payload_size as usize)?,
        ),
        (
            IspPhase::TransferApp,
            slice(SPI_APP_PAYLOAD_START, info.app_code_size as usize)?,
        ),
        (
            IspPhase::TransferInitData,
            slice(layout.init_data_start, info.app_init_data_size as usize)?,
        ),
    ];
    let cmdb_size = info.cmdb_block_size() as usize;
    if cmdb_size > 0 {
        sections.push((
            IspPhase::TransferConfigBlock,
            slice(SPI_CMDB_BLOCK_START, cmdb_size)?,
        ));
    }
    sections.push((
        IspPhase::TransferAppId,
        slice(layout.app_id_start, STD_APP_ID_SIZE)?,
    ));
    Ok(sections)
}

/// `esm u32le | app u32le | init u16le | (xip << 15 | cmdb) u16le`.
fn sizes_record(info: &FirmwareInfo) -> Result<Vec<u8>> {
    let xip_flag: u16 = if info.is_xip() { 1 << 15 } else { 0 };
    let mut record = Vec::with_capacity(DPCD_SIZE_REPLY_DATA_REG);
    let mut put = || -> std::io::Result<()> {
        record.write_u32::<LittleEndian>(info.esm_payload_size)?;
        record.write_u32::<LittleEndian>(info.app_code_size)?;
        record.write_u16::<LittleEndian>(info.app_init_data_size as u16)?;
        record.write_u16::<LittleEndian>(xip_flag | info.cmdb_block_size() as u16)
    };
    put().map_err(|e| IspError::invalid_data(e.to_string()))?;
    Ok(record)
}

fn write_mca_oui<T: AuxTransport + ?Sized>(transport: &T) -> Result<()> {
    transport.write(DPCD_ADDR_IEEE_OUI, &MCA_OUI)?;
    Ok(())
}

fn write_kt_prop_cmd<T: AuxTransport + ?Sized>(transport: &T, cmd: SecureCommand) -> Result<()> {
    debug!(cmd = %cmd, "Sending proprietary command");
    transport.write_u8(DPCD_ADDR_CMD_STATUS_REG, cmd.code() | DPCD_KT_CONFIRMATION_BIT)?;
    Ok(())
}

fn clear_kt_prop_cmd<T: AuxTransport + ?Sized>(transport: &T) -> Result<()> {
    transport.write_u8(DPCD_ADDR_CMD_STATUS_REG, SecureStatus::None as u8)?;
    Ok(())
}

/// Issue `cmd` and poll until the chip clears the confirmation bit.
pub(crate) fn send_kt_prop_cmd<T: AuxTransport + ?Sized>(
    transport: &T,
    cmd: SecureCommand,
    budget: &WaitBudget,
    phase: IspPhase,
) -> Result<()> {
    write_kt_prop_cmd(transport, cmd)?;
    let code = cmd.code();
    let processed = budget.poll(|| {
        let status = transport.read_u8(DPCD_ADDR_CMD_STATUS_REG)?;
        if status == code | DPCD_KT_CONFIRMATION_BIT {
            return Ok(None);
        }
        if status == code {
            return Ok(Some(()));
        }
        match SecureStatus::from_u8(status & DPCD_KT_COMMAND_MASK) {
            Some(SecureStatus::CrcFailure) => Err(IspError::ChunkCrcMismatch { phase }),
            _ => Err(IspError::UnexpectedStatus { phase, status }),
        }
    })?;
    processed.ok_or(IspError::Timeout { phase })
}

/// Poll until the chip clears the command register after "execute RAM code".
fn wait_cmd_cleared<T: AuxTransport + ?Sized>(transport: &T, budget: &WaitBudget) -> Result<()> {
    let phase = IspPhase::ExecuteIspDriver;
    let cleared = budget.poll(|| {
        let status = transport.read_u8(DPCD_ADDR_CMD_STATUS_REG)?;
        if status == SecureStatus::None as u8 {
            return Ok(Some(()));
        }
        if status & DPCD_KT_CONFIRMATION_BIT != 0 {
            return Ok(None);
        }
        if status == SecureStatus::InvalidImage as u8 {
            Err(IspError::InvalidIspDriver)
        } else {
            Err(IspError::UnexpectedStatus { phase, status })
        }
    })?;
    cleared.ok_or(IspError::Timeout { phase })
}

/// Write up to 12 bytes of reply data followed by their length.
fn write_reply_data<T: AuxTransport + ?Sized>(transport: &T, data: &[u8]) -> Result<()> {
    if data.len() > DPCD_SIZE_REPLY_DATA_REG {
        return Err(IspError::ReplyTooLong {
            len: data.len(),
            max: DPCD_SIZE_REPLY_DATA_REG,
        });
    }
    transport.write(DPCD_ADDR_REPLY_DATA_REG, data)?;
    transport.write_u8(DPCD_ADDR_REPLY_LEN_REG, data.len() as u8)?;
    Ok(())
}

/// Read the reply data the chip left, refusing more than `max` bytes.
fn read_reply_data<T: AuxTransport + ?Sized>(transport: &T, max: usize) -> Result<Vec<u8>> {
    let len = transport.read_u8(DPCD_ADDR_REPLY_LEN_REG)? as usize;
    if len > max {
        return Err(IspError::ReplyTooLong { len, max });
    }
    if len == 0 {
        return Ok(Vec::new());
    }
    Ok(transport.read(DPCD_ADDR_REPLY_DATA_REG, len)?)
}
