//! Chip and family identification.
//!
//! The branch device-ID string at DPCD 0x503 tells both the chip model and
//! whether the chip is still in its IROM loader or already running the
//! application firmware.

use std::fmt;

use tracing::{debug, info, instrument};

use crate::error::{IspError, Result};
use crate::protocol::constants::{
    DPCD_ADDR_BRANCH_HW_REV, DPCD_ADDR_BRANCH_ID_STR, DPCD_SIZE_BRANCH_ID_STR,
};
use crate::transport::AuxTransport;

/// Protocol family; selects the AUX-ISP engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipFamily {
    Secure,
    Puma,
    Unknown,
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipFamily::Secure => write!(f, "Secure"),
            ChipFamily::Puma => write!(f, "Puma"),
            ChipFamily::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Supported chip models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipModel {
    Jaguar5000,
    Mustang5200,
    Puma2900,
}

impl ChipModel {
    pub fn family(self) -> ChipFamily {
        match self {
            ChipModel::Jaguar5000 | ChipModel::Mustang5200 => ChipFamily::Secure,
            ChipModel::Puma2900 => ChipFamily::Puma,
        }
    }

    /// Vendor chip-type code.
    pub fn chip_type(self) -> u8 {
        match self {
            ChipModel::Puma2900 => 6,
            ChipModel::Jaguar5000 => 8,
            ChipModel::Mustang5200 => 9,
        }
    }
}

impl fmt::Display for ChipModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipModel::Jaguar5000 => write!(f, "KTM50X0 (Jaguar)"),
            ChipModel::Mustang5200 => write!(f, "KTM52X0 (Mustang)"),
            ChipModel::Puma2900 => write!(f, "MC2900 (Puma)"),
        }
    }
}

/// Which code the chip is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    None,
    Irom,
    BootCode,
    App,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::None => write!(f, "none"),
            RunState::Irom => write!(f, "irom"),
            RunState::BootCode => write!(f, "boot-code"),
            RunState::App => write!(f, "app"),
        }
    }
}

struct BranchIdEntry {
    id: &'static [u8; DPCD_SIZE_BRANCH_ID_STR],
    model: ChipModel,
    state: RunState,
}

const BRANCH_ID_TABLE: &[BranchIdEntry] = &[
    BranchIdEntry {
        id: b"5010IR",
        model: ChipModel::Jaguar5000,
        state: RunState::Irom,
    },
    BranchIdEntry {
        id: b"DP50X0",
        model: ChipModel::Jaguar5000,
        state: RunState::App,
    },
    BranchIdEntry {
        id: b"5210IR",
        model: ChipModel::Mustang5200,
        state: RunState::Irom,
    },
    BranchIdEntry {
        id: b"DP52X0",
        model: ChipModel::Mustang5200,
        state: RunState::App,
    },
    BranchIdEntry {
        id: b"2900IR",
        model: ChipModel::Puma2900,
        state: RunState::Irom,
    },
    BranchIdEntry {
        id: b"DP2900",
        model: ChipModel::Puma2900,
        state: RunState::App,
    },
];

/// Identity of the chip behind an AUX channel. Immutable once derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipIdentity {
    pub family: ChipFamily,
    pub model: ChipModel,
    pub revision: u8,
    pub chip_type: u8,
    pub run_state: RunState,
}

impl ChipIdentity {
    /// Build an identity from a model; used when the source is a firmware signature.
    pub fn from_model(model: ChipModel, run_state: RunState) -> Self {
        Self {
            family: model.family(),
            model,
            revision: 0,
            chip_type: model.chip_type(),
            run_state,
        }
    }

    /// Match a 6-byte branch device-ID string.
    pub fn from_branch_id(branch_id: &[u8], revision: u8) -> Result<Self> {
        let entry = BRANCH_ID_TABLE
            .iter()
            .find(|e| branch_id.len() >= e.id.len() && &branch_id[..e.id.len()] == e.id)
            .ok_or_else(|| {
                IspError::Unsupported(format!(
                    "branch id '{}' is not a supported chip",
                    String::from_utf8_lossy(branch_id).trim_end_matches('\0')
                ))
            })?;
        Ok(Self {
            revision,
            ..Self::from_model(entry.model, entry.state)
        })
    }

    pub fn is_app_mode(&self) -> bool {
        self.run_state == RunState::App
    }
}

impl fmt::Display for ChipIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} family, rev 0x{:02X}, running {}]",
            self.model, self.family, self.revision, self.run_state
        )
    }
}

/// Read the branch ID and hardware revision and classify the chip.
#[instrument(skip(transport))]
pub fn identify<T: AuxTransport + ?Sized>(transport: &T) -> Result<ChipIdentity> {
    let branch_id = transport.read(DPCD_ADDR_BRANCH_ID_STR, DPCD_SIZE_BRANCH_ID_STR)?;
    let revision = transport.read_u8(DPCD_ADDR_BRANCH_HW_REV)?;
    debug!(
        branch_id = %String::from_utf8_lossy(&branch_id),
        revision = %format!("0x{:02X}", revision),
        "Branch ID read"
    );
    let identity = ChipIdentity::from_branch_id(&branch_id, revision)?;
    info!(chip = %identity, "Chip identified");
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::transport::MockTransport;

    #[test]
    fn test_branch_id_table() {
        let id = ChipIdentity::from_branch_id(b"DP50X0", 0x10).unwrap();
        assert_eq!(id.family, ChipFamily::Secure);
        assert_eq!(id.model, ChipModel::Jaguar5000);
        assert_eq!(id.run_state, RunState::App);
        assert_eq!(id.revision, 0x10);

        let id = ChipIdentity::from_branch_id(b"5210IR", 0).unwrap();
        assert_eq!(id.model, ChipModel::Mustang5200);
        assert_eq!(id.run_state, RunState::Irom);
        assert_eq!(id.chip_type, 9);

        let id = ChipIdentity::from_branch_id(b"2900IR", 0).unwrap();
        assert_eq!(id.family, ChipFamily::Puma);
        assert!(!id.is_app_mode());
    }

    #[test]
    fn test_unknown_branch_id() {
        let err = ChipIdentity::from_branch_id(b"DP2800", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_identify_reads_dpcd() {
        let mock = MockTransport::new();
        mock.load(DPCD_ADDR_BRANCH_ID_STR, b"DP2900");
        mock.set_register(DPCD_ADDR_BRANCH_HW_REV, 0x21);

        let id = identify(&mock).unwrap();
        assert_eq!(id.model, ChipModel::Puma2900);
        assert_eq!(id.run_state, RunState::App);
        assert_eq!(id.revision, 0x21);
        assert!(mock.get_writes().is_empty());
    }
}
