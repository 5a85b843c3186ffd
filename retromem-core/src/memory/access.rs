// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

//! Selection of the access handlers a block dispatches to.
//!
//! Handlers are plain tags rather than function pointers: a block's dispatch is always a pure
//! function of its type and breakpoint counts, so it can be recomputed at any time and never
//! points at handlers of a type the block no longer has.

use super::MemoryType;

/// Read handlers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ReadFn {
    /// Faults and yields the invalid word.
    None,
    /// Returns the stored word.
    Value,
}

/// Write handlers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum WriteFn {
    /// Faults and stores nothing.
    None,
    /// Silently discards the value (read-only memory).
    Ignore,
    /// Stores the value, marking the block dirty when it changes.
    Value,
}

/// A handler, either called directly or after the debugger has had a look at the access.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Access<F> {
    Direct(F),
    Checked(F),
}

impl<F: Copy> Access<F> {
    #[inline]
    pub fn handler(&self) -> F {
        match *self {
            Access::Direct(f) | Access::Checked(f) => f,
        }
    }

    #[inline]
    pub fn is_checked(&self) -> bool {
        matches!(self, Access::Checked(_))
    }
}

/// Which kind of dispatch a block currently performs for one direction of access.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessMode {
    /// Unallocated memory: every access faults.
    None,
    /// Accesses go straight to the type's handler.
    Direct,
    /// Accesses are reported to the debugger before reaching the type's handler.
    Checked,
}

/// The complete handler table of a block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Dispatch {
    pub read: Access<ReadFn>,
    pub write: Access<WriteFn>,
    pub read_direct: ReadFn,
    pub write_direct: WriteFn,
}

impl Dispatch {
    /// Builds the table for a block of type `mem_type` with the given breakpoint counts.
    pub fn select(mem_type: MemoryType, read_breakpoints: u32, write_breakpoints: u32) -> Self {
        Dispatch {
            read: wrap(read_fn(mem_type), read_breakpoints),
            write: wrap(write_fn(mem_type), write_breakpoints),
            read_direct: read_fn(mem_type),
            write_direct: write_direct_fn(mem_type),
        }
    }
}

fn wrap<F>(handler: F, breakpoints: u32) -> Access<F> {
    if breakpoints > 0 { Access::Checked(handler) } else { Access::Direct(handler) }
}

pub(crate) fn read_fn(mem_type: MemoryType) -> ReadFn {
    match mem_type {
        MemoryType::None => ReadFn::None,
        MemoryType::Rom | MemoryType::Ram => ReadFn::Value,
    }
}

/// Handler used by normal (CPU) writes.
pub(crate) fn write_fn(mem_type: MemoryType) -> WriteFn {
    match mem_type {
        MemoryType::None => WriteFn::None,
        MemoryType::Rom => WriteFn::Ignore,
        MemoryType::Ram => WriteFn::Value,
    }
}

/// Handler used by direct writes. ROM is writable here so its contents can be loaded and patched.
pub(crate) fn write_direct_fn(mem_type: MemoryType) -> WriteFn {
    match mem_type {
        MemoryType::None => WriteFn::None,
        MemoryType::Rom | MemoryType::Ram => WriteFn::Value,
    }
}
