//! Chip signatures embedded in application firmware.

use crate::error::{IspError, Result};
use crate::identify::ChipModel;

/// Code-space layout of a Secure application image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeLayout {
    #[default]
    Normal,
    /// Extended (ESM XIP) layout: more init data, less code space.
    Xip,
}

/// One (offset, tag, layout) entry of the signature table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareSignature {
    pub model: ChipModel,
    pub offset: usize,
    pub tag: [u8; 4],
    pub layout: CodeLayout,
}

pub const SIGNATURE_TABLE: &[FirmwareSignature] = &[
    FirmwareSignature {
        model: ChipModel::Jaguar5000,
        offset: 0x0F_FFE4,
        tag: *b"JAGR",
        layout: CodeLayout::Normal,
    },
    FirmwareSignature {
        model: ChipModel::Jaguar5000,
        offset: 0x0F_7FE4,
        tag: *b"JAGR",
        layout: CodeLayout::Xip,
    },
    FirmwareSignature {
        model: ChipModel::Mustang5200,
        offset: 0x0F_FFE4,
        tag: *b"MSTG",
        layout: CodeLayout::Normal,
    },
    FirmwareSignature {
        model: ChipModel::Mustang5200,
        offset: 0x0F_7FE4,
        tag: *b"MSTG",
        layout: CodeLayout::Xip,
    },
    FirmwareSignature {
        model: ChipModel::Puma2900,
        offset: 0x08_0042,
        tag: *b"PUMA",
        layout: CodeLayout::Normal,
    },
];

impl FirmwareSignature {
    fn matches(&self, app: &[u8]) -> bool {
        app.get(self.offset..self.offset + self.tag.len()) == Some(&self.tag[..])
    }
}

/// First table entry whose tag is present in `app`.
pub fn detect_signature(app: &[u8]) -> Result<&'static FirmwareSignature> {
    SIGNATURE_TABLE
        .iter()
        .find(|sig| sig.matches(app))
        .ok_or_else(|| IspError::Unsupported("no known chip signature in firmware".into()))
}
