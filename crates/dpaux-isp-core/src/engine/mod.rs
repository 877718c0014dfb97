//! AUX-ISP protocol engines.
//!
//! One engine per chip family behind a single [`AuxIspEngine`] enum, selected
//! from the chip identity.

pub mod chunk;
pub mod context;
pub mod poll;
pub mod puma;
pub mod secure;
pub mod timing;

use tracing::{info, warn};

use crate::error::{IspError, Result};
use crate::events::{IspEvent, IspObserver, IspPhase, LogLevel};
use crate::firmware::{FirmwareContainer, StdVersion};
use crate::identify::{ChipFamily, ChipIdentity};
use crate::protocol::codes::FlashBank;
use crate::transport::AuxTransport;

pub use context::{FlashInfo, Progress, ProtocolSession};
pub use poll::retry_with_interval;
pub use puma::PumaEngine;
pub use secure::SecureEngine;
pub use timing::{IspTimings, PumaTimings, SecureTimings, WaitBudget};

/// Version and capability information read from a running chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identity: ChipIdentity,
    pub chip_rev: u8,
    pub std_fw_ver: StdVersion,
    pub customer_project_id: u8,
    pub customer_fw_ver: u16,
    pub chip_type: u8,
    pub is_dual_bank_supported: bool,
    pub flash_bank: FlashBank,
}

/// Family-specific engine.
#[derive(Debug, Clone)]
pub enum AuxIspEngine {
    Secure(SecureEngine),
    Puma(PumaEngine),
}

impl AuxIspEngine {
    /// Pick the engine for `identity`.
    pub fn for_identity(identity: &ChipIdentity, timings: &IspTimings) -> Result<Self> {
        match identity.family {
            ChipFamily::Secure => Ok(Self::Secure(SecureEngine::new(timings.secure.clone()))),
            ChipFamily::Puma => Ok(Self::Puma(PumaEngine::new(timings.puma.clone()))),
            ChipFamily::Unknown => Err(IspError::Unsupported(format!(
                "no AUX-ISP engine for {}",
                identity
            ))),
        }
    }

    pub fn family(&self) -> ChipFamily {
        match self {
            Self::Secure(_) => ChipFamily::Secure,
            Self::Puma(_) => ChipFamily::Puma,
        }
    }

    pub fn get_device_info<T: AuxTransport + ?Sized>(
        &self,
        transport: &T,
        identity: &ChipIdentity,
    ) -> Result<DeviceInfo> {
        match self {
            Self::Secure(engine) => engine.get_device_info(transport, identity),
            Self::Puma(engine) => engine.get_device_info(transport, identity),
        }
    }

    /// Run a complete update against the session's chip.
    pub fn start<T, O>(
        &self,
        session: &mut ProtocolSession<'_, T, O>,
        container: &FirmwareContainer,
    ) -> Result<()>
    where
        T: AuxTransport + ?Sized,
        O: IspObserver + ?Sized,
    {
        match self {
            Self::Secure(engine) => engine.start(session, container),
            Self::Puma(engine) => engine.start(session, container),
        }
    }
}

/// Common exit path: report the outcome, always attempt reset, never let a
/// reset failure replace the first error.
pub(crate) fn finish<'a, T, O, F>(
    session: &mut ProtocolSession<'a, T, O>,
    result: Result<()>,
    reset: F,
) -> Result<()>
where
    T: AuxTransport + ?Sized,
    O: IspObserver + ?Sized,
    F: FnOnce(&mut ProtocolSession<'a, T, O>) -> Result<()>,
{
    if let Err(e) = &result {
        session.report_error(e);
    }

    session.goto_phase(IspPhase::Reset);
    if let Err(e) = reset(session) {
        warn!(error = %e, "Reset failed");
        session.log(LogLevel::Warn, format!("Reset failed: {}", e));
    }

    match result {
        Ok(()) => {
            session.goto_phase(IspPhase::Complete);
            session.emit(IspEvent::Complete);
            info!("AUX-ISP finished");
            Ok(())
        }
        Err(e) => {
            session.goto_phase(IspPhase::Failed);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::NullObserver;
    use crate::identify::{ChipModel, RunState};
    use crate::transport::MockTransport;

    #[test]
    fn test_engine_selection() {
        let timings = IspTimings::default();
        let secure = ChipIdentity::from_model(ChipModel::Mustang5200, RunState::App);
        let puma = ChipIdentity::from_model(ChipModel::Puma2900, RunState::Irom);

        assert_eq!(
            AuxIspEngine::for_identity(&secure, &timings).unwrap().family(),
            ChipFamily::Secure
        );
        assert_eq!(
            AuxIspEngine::for_identity(&puma, &timings).unwrap().family(),
            ChipFamily::Puma
        );

        let unknown = ChipIdentity {
            family: ChipFamily::Unknown,
            ..puma
        };
        let err = AuxIspEngine::for_identity(&unknown, &timings).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_finish_keeps_first_error() {
        let mock = MockTransport::new();
        let timings = IspTimings::immediate();
        let identity = ChipIdentity::from_model(ChipModel::Jaguar5000, RunState::Irom);
        let mut session = ProtocolSession::new(&mock, &NullObserver, identity, &timings);

        let err = finish(&mut session, Err(IspError::NoFlash), |_| {
            Err(IspError::Timeout {
                phase: IspPhase::Reset,
            })
        })
        .unwrap_err();
        assert!(matches!(err, IspError::NoFlash));
        assert_eq!(session.phase(), IspPhase::Failed);
    }

    #[test]
    fn test_finish_runs_reset_on_success() {
        let mock = MockTransport::new();
        let timings = IspTimings::immediate();
        let identity = ChipIdentity::from_model(ChipModel::Puma2900, RunState::Irom);
        let mut session = ProtocolSession::new(&mock, &NullObserver, identity, &timings);

        let mut reset_ran = false;
        finish(&mut session, Ok(()), |_| {
            reset_ran = true;
            Ok(())
        })
        .unwrap();
        assert!(reset_ran);
        assert_eq!(session.phase(), IspPhase::Complete);
    }
}
