// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

use thiserror::Error;

use crate::word::Address;

/// Failures reported by memory blocks and by the bus that owns them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("saved contents hold {found} words, block expects {expected}")]
    SizeMismatch { expected: usize, found: usize },
    #[error("snapshot holds {found} blocks, bus has {expected}")]
    BlockCountMismatch { expected: usize, found: usize },
    #[error("more {kind} breakpoints removed than added on block #{block}")]
    CounterUnderflow { block: u32, kind: BreakpointKind },
    #[error("address {0:#x} is outside the address space")]
    OutOfRange(Address),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BreakpointKind {
    Read,
    Write,
}

impl BreakpointKind {
    pub fn from_write(is_write: bool) -> Self {
        if is_write { BreakpointKind::Write } else { BreakpointKind::Read }
    }
}

impl std::fmt::Display for BreakpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakpointKind::Read => write!(f, "read"),
            BreakpointKind::Write => write!(f, "write"),
        }
    }
}

/// Failures that prevent an image from being loaded at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("image has no recognizable tape blocks and no load address")]
    NoLoadAddress,
    #[error("no memory allocated at {addr:#x} to load the image into")]
    NotAllocated { addr: Address },
}

/// Conditions that end parsing of an Absolute Format tape.
///
/// None of these are fatal: blocks accepted before the condition stay loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TapeError {
    #[error("invalid signature ({signature:#06x}) at offset {offset:#06x}")]
    InvalidSignature { offset: usize, signature: u16 },
    #[error("invalid block at offset {offset:#06x}")]
    InvalidBlock { offset: usize },
    #[error("insufficient data for block at offset {offset:#06x}")]
    InsufficientData { offset: usize },
    #[error("invalid checksum ({sum:#04x}) for block at offset {offset:#06x}")]
    ChecksumMismatch { offset: usize, sum: u8 },
}
