//! Transport layer module.

pub mod dpaux;
pub mod mock;
pub mod traits;

pub use dpaux::DpAuxTransport;
pub use mock::{MockAccess, MockRegisters, MockTransport};
pub use traits::{AuxTransport, TransportError};
