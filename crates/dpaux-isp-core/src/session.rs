//! Update session - high-level orchestrator for one AUX channel.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::engine::{AuxIspEngine, DeviceInfo, FlashInfo, IspTimings, ProtocolSession};
use crate::error::{IspError, Result};
use crate::events::{IspObserver, ProgressFn, Tee, TracingObserver};
use crate::firmware::FirmwareContainer;
use crate::identify::{self, ChipIdentity, RunState};
use crate::transport::{AuxTransport, DpAuxTransport, TransportError};

/// Configuration for an update session.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Path to the `/dev/drm_dp_aux*` node.
    pub device_path: Option<String>,
    /// Force the run state instead of trusting the branch id:
    /// `true` for application firmware, `false` for the IROM loader.
    pub app_mode: Option<bool>,
    /// Poll budgets and settle delays.
    pub timings: IspTimings,
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Downstream position of a chip behind the host's AUX channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DevicePort {
    #[default]
    Host,
    Port1,
    Port2,
    Port3,
}

impl DevicePort {
    pub const ALL: [DevicePort; 4] = [
        DevicePort::Host,
        DevicePort::Port1,
        DevicePort::Port2,
        DevicePort::Port3,
    ];

    pub fn index(self) -> u8 {
        match self {
            DevicePort::Host => 0,
            DevicePort::Port1 => 1,
            DevicePort::Port2 => 2,
            DevicePort::Port3 => 3,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }
}

impl fmt::Display for DevicePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePort::Host => write!(f, "host"),
            port => write!(f, "port{}", port.index()),
        }
    }
}

/// What is known about the chip at one port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortSlot {
    pub identity: Option<ChipIdentity>,
    pub device_info: Option<DeviceInfo>,
    pub flash: Option<FlashInfo>,
}

/// Per-port state, owned by the caller.
#[derive(Debug, Clone, Default)]
pub struct PortArena {
    slots: [PortSlot; 4],
}

impl PortArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, port: DevicePort) -> &PortSlot {
        &self.slots[usize::from(port.index())]
    }

    pub fn slot_mut(&mut self, port: DevicePort) -> &mut PortSlot {
        &mut self.slots[usize::from(port.index())]
    }

    pub fn clear(&mut self, port: DevicePort) {
        *self.slot_mut(port) = PortSlot::default();
    }
}

/// Update session - identifies the chip and drives the matching engine.
pub struct UpdateSession<O: IspObserver> {
    config: SessionConfig,
    observer: Arc<O>,
}

impl UpdateSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: IspObserver> UpdateSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open the configured AUX device.
    pub fn open_device(&self) -> Result<DpAuxTransport> {
        let path = self.config.device_path.as_deref().ok_or_else(|| {
            IspError::from(TransportError::OpenFailed {
                path: String::new(),
                message: "no AUX device configured".into(),
            })
        })?;
        Ok(DpAuxTransport::open(path)?)
    }

    /// Identify the chip, applying the configured run-state override.
    pub fn identify<T: AuxTransport + ?Sized>(&self, transport: &T) -> Result<ChipIdentity> {
        let mut identity = identify::identify(transport)?;
        if let Some(app_mode) = self.config.app_mode {
            let run_state = if app_mode { RunState::App } else { RunState::Irom };
            if run_state != identity.run_state {
                warn!(read = %identity.run_state, forced = %run_state, "Overriding run state");
                identity.run_state = run_state;
            }
        }
        Ok(identity)
    }

    /// Read device info and remember it for `port`.
    pub fn device_info<T: AuxTransport + ?Sized>(
        &self,
        arena: &mut PortArena,
        port: DevicePort,
        transport: &T,
        identity: &ChipIdentity,
    ) -> Result<DeviceInfo> {
        let engine = AuxIspEngine::for_identity(identity, &self.config.timings)?;
        let info = engine.get_device_info(transport, identity)?;
        let slot = arena.slot_mut(port);
        slot.identity = Some(*identity);
        slot.device_info = Some(info);
        Ok(info)
    }

    /// Flash `container` onto the chip at `port`.
    ///
    /// The container must target the chip's family; a mismatch is rejected
    /// before anything is written.
    #[instrument(skip_all, fields(port = %port, chip = %identity.model))]
    pub fn run_update<T: AuxTransport + ?Sized>(
        &self,
        arena: &mut PortArena,
        port: DevicePort,
        transport: &T,
        identity: ChipIdentity,
        container: &FirmwareContainer,
    ) -> Result<()> {
        if container.family() != identity.family {
            return Err(IspError::Unsupported(format!(
                "firmware for {} cannot be flashed onto {}",
                container.info().model,
                identity.model
            )));
        }
        let engine = AuxIspEngine::for_identity(&identity, &self.config.timings)?;
        info!(
            version = %container.info().std_fw_ver,
            isp_driver = container.isp_driver().len(),
            app = container.app_firmware().len(),
            "Starting update"
        );

        let mut session =
            ProtocolSession::new(transport, self.observer.as_ref(), identity, &self.config.timings);
        let result = engine.start(&mut session, container);

        let slot = arena.slot_mut(port);
        slot.identity = Some(identity);
        slot.flash = Some(session.flash);
        result
    }
}

/// Flash `container` with default timings, reporting `(bytes_done, bytes_total)`
/// to `progress_sink`.
pub fn run_update<T, F>(
    handle: &T,
    identity: ChipIdentity,
    container: &FirmwareContainer,
    progress_sink: F,
) -> Result<()>
where
    T: AuxTransport + ?Sized,
    F: Fn(u64, u64) + Send + Sync,
{
    let observer = Arc::new(Tee(TracingObserver, ProgressFn(progress_sink)));
    let session = UpdateSession::with_observer(SessionConfig::default(), observer);
    let mut arena = PortArena::new();
    session.run_update(&mut arena, DevicePort::Host, handle, identity, container)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WaitBudget;
    use crate::error::ErrorKind;
    use crate::events::NullObserver;
    use crate::firmware::puma::tests::build_puma_image;
    use crate::firmware::secure::tests::SecureImageBuilder;
    use crate::firmware::write_container;
    use crate::identify::ChipModel;
    use crate::protocol::constants::*;
    use crate::transport::MockTransport;
    use std::sync::Mutex;

    fn immediate_session() -> UpdateSession<NullObserver> {
        let config = SessionConfig {
            timings: IspTimings::immediate(),
            ..Default::default()
        };
        UpdateSession::with_observer(config, Arc::new(NullObserver))
    }

    fn secure_container() -> FirmwareContainer {
        let app = SecureImageBuilder::default().build();
        FirmwareContainer::parse(&write_container(&[], &app).unwrap()).unwrap()
    }

    #[test]
    fn test_config_file_roundtrip() {
        let mut config = SessionConfig {
            device_path: Some("/dev/drm_dp_aux2".into()),
            app_mode: Some(true),
            ..Default::default()
        };
        config.timings.secure.install_images = WaitBudget::new(1000, 10);

        let path = std::env::temp_dir().join(format!("dpaux-isp-{}.toml", std::process::id()));
        config.save_to_file(&path).unwrap();
        let loaded = SessionConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: SessionConfig = toml::from_str("device_path = \"/dev/drm_dp_aux0\"\n").unwrap();
        assert_eq!(config.device_path.as_deref(), Some("/dev/drm_dp_aux0"));
        assert_eq!(config.app_mode, None);
        assert_eq!(config.timings, IspTimings::default());
    }

    #[test]
    fn test_device_port() {
        assert_eq!(DevicePort::from_index(2), Some(DevicePort::Port2));
        assert_eq!(DevicePort::from_index(4), None);
        assert_eq!(DevicePort::Host.to_string(), "host");
        assert_eq!(DevicePort::Port3.to_string(), "port3");
    }

    #[test]
    fn test_family_mismatch_rejected_before_any_write() {
        let mock = MockTransport::new();
        let identity = ChipIdentity::from_model(ChipModel::Puma2900, RunState::App);
        let mut arena = PortArena::new();

        let err = immediate_session()
            .run_update(&mut arena, DevicePort::Host, &mock, identity, &secure_container())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(mock.get_writes().is_empty());
        assert_eq!(*arena.slot(DevicePort::Host), PortSlot::default());
    }

    #[test]
    fn test_silent_device_times_out_and_is_recorded() {
        let mock = MockTransport::new();
        let identity = ChipIdentity::from_model(ChipModel::Jaguar5000, RunState::App);
        let mut arena = PortArena::new();

        let err = immediate_session()
            .run_update(&mut arena, DevicePort::Port1, &mock, identity, &secure_container())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let slot = arena.slot(DevicePort::Port1);
        assert_eq!(slot.identity, Some(identity));
        assert_eq!(slot.flash, Some(FlashInfo::default()));
        assert_eq!(*arena.slot(DevicePort::Host), PortSlot::default());
    }

    #[test]
    fn test_identify_with_run_state_override() {
        let mock = MockTransport::new();
        mock.load(DPCD_ADDR_BRANCH_ID_STR, b"DP2900");
        let config = SessionConfig {
            app_mode: Some(false),
            ..Default::default()
        };
        let session = UpdateSession::with_observer(config, Arc::new(NullObserver));

        let identity = session.identify(&mock).unwrap();
        assert_eq!(identity.run_state, RunState::Irom);
    }

    #[test]
    fn test_device_info_recorded_in_arena() {
        let mock = MockTransport::new();
        mock.load(DPCD_ADDR_BRANCH_FW_SUB, &[0x01, 0x10, 0x03, 0x02]);
        let identity = ChipIdentity::from_model(ChipModel::Puma2900, RunState::Irom);
        let mut arena = PortArena::new();

        let info = immediate_session()
            .device_info(&mut arena, DevicePort::Port2, &mock, &identity)
            .unwrap();
        assert_eq!(arena.slot(DevicePort::Port2).device_info, Some(info));

        arena.clear(DevicePort::Port2);
        assert_eq!(*arena.slot(DevicePort::Port2), PortSlot::default());
    }

    #[test]
    fn test_free_run_update_checks_family() {
        let mock = MockTransport::new();
        let calls = Mutex::new(0u32);
        let isp = [0u8; 4];
        let container =
            FirmwareContainer::parse(&write_container(&isp, &build_puma_image(false)).unwrap())
                .unwrap();
        let identity = ChipIdentity::from_model(ChipModel::Mustang5200, RunState::Irom);

        let err = run_update(&mock, identity, &container, |_: u64, _: u64| {
            *calls.lock().unwrap() += 1
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
