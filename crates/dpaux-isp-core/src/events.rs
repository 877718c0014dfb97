//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other front end) to follow an update without
//! tight coupling to the engines.

use std::fmt;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// AUX-ISP state machine phases, shared by both chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IspPhase {
    #[default]
    Start,
    /// Vendor OUI written to the ownership register.
    ClaimOwnership,
    /// Puma: request the code-loading mode.
    EnterCodeLoadingMode,
    /// ISP driver streamed into chip RAM.
    LoadIspDriver,
    /// Secure: run the loaded driver and read flash info.
    ExecuteIspDriver,
    /// Puma: wait for the driver to boot.
    WaitIspDriverReady,
    EnterFwUpdateMode,
    WaitFlashInfoReady,
    WaitFlashEraseDone,
    TransferCertificates,
    TransferEsm,
    TransferApp,
    TransferInitData,
    TransferConfigBlock,
    TransferAppId,
    /// Puma: the whole application image.
    TransferAppFirmware,
    InstallImages,
    ValidateFirmware,
    Reset,
    /// Secure: active bank query outside an update.
    QueryFlashBank,
    /// Secure: AUX forwarding to a downstream port.
    AuxForward,
    Complete,
    Failed,
}

impl fmt::Display for IspPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IspPhase::Start => "Start",
            IspPhase::ClaimOwnership => "Claim Ownership",
            IspPhase::EnterCodeLoadingMode => "Enter Code Loading Mode",
            IspPhase::LoadIspDriver => "Load ISP Driver",
            IspPhase::ExecuteIspDriver => "Execute ISP Driver",
            IspPhase::WaitIspDriverReady => "Wait ISP Driver Ready",
            IspPhase::EnterFwUpdateMode => "Enter FW Update Mode",
            IspPhase::WaitFlashInfoReady => "Wait Flash Info Ready",
            IspPhase::WaitFlashEraseDone => "Wait Flash Erase Done",
            IspPhase::TransferCertificates => "Transfer Certificates",
            IspPhase::TransferEsm => "Transfer ESM",
            IspPhase::TransferApp => "Transfer App",
            IspPhase::TransferInitData => "Transfer Init Data",
            IspPhase::TransferConfigBlock => "Transfer CMDB",
            IspPhase::TransferAppId => "Transfer App ID",
            IspPhase::TransferAppFirmware => "Transfer App Firmware",
            IspPhase::InstallImages => "Install Images",
            IspPhase::ValidateFirmware => "Validate Firmware",
            IspPhase::Reset => "Reset",
            IspPhase::QueryFlashBank => "Query Flash Bank",
            IspPhase::AuxForward => "AUX Forward",
            IspPhase::Complete => "Complete",
            IspPhase::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Events emitted by an update session.
#[derive(Debug, Clone)]
pub enum IspEvent {
    /// Phase changed.
    PhaseChanged { from: IspPhase, to: IspPhase },
    /// Progress update, in payload bytes for the whole session.
    Progress {
        phase: IspPhase,
        current: u64,
        total: u64,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Error occurred; the session will reset and stop.
    Error { phase: IspPhase, message: String },
    /// Update finished successfully.
    Complete,
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait IspObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &IspEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl IspObserver for NullObserver {
    fn on_event(&self, _event: &IspEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl IspObserver for TracingObserver {
    fn on_event(&self, event: &IspEvent) {
        match event {
            IspEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            IspEvent::Progress {
                phase,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(phase = %phase, progress = %format!("{}%", pct), "Progress");
            }
            IspEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            IspEvent::Error { phase, message } => {
                tracing::error!(phase = %phase, "Error: {}", message);
            }
            IspEvent::Complete => {
                tracing::info!("Update complete");
            }
        }
    }
}

/// Adapts a `(bytes_done, bytes_total)` callback into an observer.
pub struct ProgressFn<F>(pub F);

impl<F> IspObserver for ProgressFn<F>
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn on_event(&self, event: &IspEvent) {
        if let IspEvent::Progress { current, total, .. } = event {
            (self.0)(*current, *total);
        }
    }
}

/// Fans events out to two observers.
pub struct Tee<A, B>(pub A, pub B);

impl<A: IspObserver, B: IspObserver> IspObserver for Tee<A, B> {
    fn on_event(&self, event: &IspEvent) {
        self.0.on_event(event);
        self.1.on_event(event);
    }
}
