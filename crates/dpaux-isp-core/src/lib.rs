//! dpaux-isp-core: Kinetic DisplayPort converter AUX-ISP in Rust.
//!
//! This crate reflashes Kinetic DisplayPort protocol converters over their
//! AUX channel (the DPCD register space), as exposed by Linux
//! `/dev/drm_dp_aux*` nodes.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Transport**: positioned DPCD register access (drm_dp_aux, mock)
//! - **Protocol**: register map, command/status codes, CRC-16
//! - **Firmware**: container codec and per-family image parsing
//! - **Identify**: branch-id based chip and family detection
//! - **Engine**: Secure and Puma AUX-ISP state machines
//! - **Events**: observer pattern for UI decoupling
//! - **Session**: configuration, per-port state and the update entry point
//!
//! # Example
//!
//! ```no_run
//! use dpaux_isp_core::{DpAuxTransport, identify, parse_container, run_update};
//!
//! let transport = DpAuxTransport::open("/dev/drm_dp_aux0")?;
//! let identity = identify(&transport)?;
//! let container = parse_container(&std::fs::read("KTM50X0.bin")?)?;
//! run_update(&transport, identity, &container, |done, total| {
//!     eprintln!("{done}/{total}");
//! })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod engine;
pub mod error;
pub mod events;
pub mod firmware;
pub mod identify;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use engine::{AuxIspEngine, DeviceInfo, FlashInfo, IspTimings};
pub use error::{ErrorKind, IspError, Result};
pub use events::{IspEvent, IspObserver, IspPhase, LogLevel, NullObserver, TracingObserver};
pub use firmware::{FirmwareContainer, FirmwareInfo, parse_container, write_container};
pub use identify::{ChipFamily, ChipIdentity, ChipModel, RunState, identify};
pub use protocol::FlashBank;
pub use session::{DevicePort, PortArena, SessionConfig, UpdateSession, run_update};
pub use transport::{AuxTransport, DpAuxTransport, MockTransport, TransportError};
