// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

//! Block-granular memory.
//!
//! The bus carves the address space into equally sized [`MemoryBlock`]s. Every block starts out
//! as [`MemoryType::None`] and is later turned into RAM or ROM when a device asks for memory.
//! The bus resolves an address to a `(block, offset)` pair and calls the block's `read`/`write`,
//! which dispatch according to the block's type and to any breakpoints placed on it.
//!
//! Breakpoints must only be added or removed while the CPU owning the bus is paused.

mod access;
mod breakpoints;

pub use access::AccessMode;
pub use breakpoints::BreakpointCount;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use cfg_if::cfg_if;
use log::{debug, error, trace};
use serde::{Deserialize, Serialize};

use access::{Access, Dispatch, ReadFn, WriteFn};
use crate::error::{BreakpointKind, MemoryError};
use crate::loader::Symbol;
use crate::word::{Address, Word, WordWidth};

/// Receives accesses to unallocated memory.
pub trait FaultSink {
    fn fault(&mut self, addr: Address);
}

/// Debugger hooks used by blocks carrying breakpoints.
///
/// The hooks observe accesses; they cannot change the value read or the effect of a write.
pub trait Debugger {
    fn check_memory_read(&mut self, addr: Address, len: usize);
    fn check_memory_write(&mut self, addr: Address, len: usize);

    /// Receives the symbol table of an image loaded into `[addr, addr + size)`.
    fn add_symbols(&mut self, _addr: Address, _size: usize, _symbols: &[Symbol]) {}
}

/// Shared handle to the debugger, if one is attached to the machine.
pub type DebuggerLink = Rc<RefCell<dyn Debugger>>;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    #[default]
    None,
    Rom,
    Ram,
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoryType::None => write!(f, "NONE"),
            MemoryType::Rom => write!(f, "ROM"),
            MemoryType::Ram => write!(f, "RAM"),
        }
    }
}

// Original blocks get even IDs, blocks converted from another block get odd ones.
static NEXT_BLOCK_ID: AtomicU32 = AtomicU32::new(0);

/// One block-aligned region of the address space.
pub struct MemoryBlock {
    id: u32,
    addr: Option<Address>,
    size: usize,
    mem_type: MemoryType,
    read_only: bool,
    width: WordWidth,
    words: Vec<Word>,
    dirty: bool,
    dirty_ever: bool,
    read_breakpoints: BreakpointCount,
    write_breakpoints: BreakpointCount,
    dispatch: Dispatch,
    debugger: Option<DebuggerLink>,
}

impl MemoryBlock {
    /// Creates a block of `size` words, zero-filled.
    ///
    /// A block without storage is always of type [`MemoryType::None`], and vice versa.
    pub fn new(addr: Option<Address>, size: usize, mem_type: MemoryType, width: WordWidth) -> Self {
        let (size, mem_type) = match (size, mem_type) {
            (0, _) | (_, MemoryType::None) => (0, MemoryType::None),
            (size, mem_type) => (size, mem_type),
        };
        MemoryBlock {
            id: NEXT_BLOCK_ID.fetch_add(2, Ordering::Relaxed).wrapping_add(2),
            addr,
            size,
            mem_type,
            read_only: mem_type == MemoryType::Rom,
            width,
            words: vec![0; size],
            dirty: false,
            dirty_ever: false,
            read_breakpoints: BreakpointCount::default(),
            write_breakpoints: BreakpointCount::default(),
            dispatch: Dispatch::select(mem_type, 0, 0),
            debugger: None,
        }
    }

    /// Creates an empty block; every access to it faults.
    pub fn none(addr: Option<Address>, width: WordWidth) -> Self {
        Self::new(addr, 0, MemoryType::None, width)
    }

    /// Gives the block `size` zero-filled words of type `mem_type`.
    ///
    /// Breakpoints placed on the block while it had no storage stay in effect.
    pub fn allocate(&mut self, size: usize, mem_type: MemoryType) {
        let (size, mem_type) = match (size, mem_type) {
            (0, _) | (_, MemoryType::None) => (0, MemoryType::None),
            (size, mem_type) => (size, mem_type),
        };
        self.size = size;
        self.mem_type = mem_type;
        self.read_only = mem_type == MemoryType::Rom;
        self.words = vec![0; size];
        self.dirty = false;
        self.update_dispatch();
    }

    /// Reassigns the block's base address when the bus reuses it.
    pub fn init(&mut self, addr: Address) {
        self.addr = Some(addr);
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn addr(&self) -> Option<Address> {
        self.addr
    }

    /// Capacity in words (0 for [`MemoryType::None`]).
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn mem_type(&self) -> MemoryType {
        self.mem_type
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn width(&self) -> WordWidth {
        self.width
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag, returning its previous value.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Whether the block was ever modified since it was created.
    pub fn dirty_ever(&self) -> bool {
        self.dirty_ever
    }

    pub fn read_breakpoints(&self) -> u32 {
        self.read_breakpoints.get()
    }

    pub fn write_breakpoints(&self) -> u32 {
        self.write_breakpoints.get()
    }

    pub fn set_debugger(&mut self, debugger: Option<DebuggerLink>) {
        self.debugger = debugger;
    }

    /// Current dispatch for reads (`is_write == false`) or writes.
    pub fn access_mode(&self, is_write: bool) -> AccessMode {
        let (checked, is_none) = if is_write {
            (self.dispatch.write.is_checked(), self.dispatch.write.handler() == WriteFn::None)
        } else {
            (self.dispatch.read.is_checked(), self.dispatch.read.handler() == ReadFn::None)
        };
        match (checked, is_none) {
            (true, _) => AccessMode::Checked,
            (false, true) => AccessMode::None,
            (false, false) => AccessMode::Direct,
        }
    }

    /// Reads the word at `off`, as seen by the CPU.
    ///
    /// `addr` is the full address of the access; it is only used for fault reporting. The caller
    /// guarantees `off` lies within the block's address window.
    #[inline]
    pub fn read(&self, off: usize, addr: Address, faults: &mut dyn FaultSink) -> Word {
        match self.dispatch.read {
            Access::Direct(f) => self.read_with(f, off, addr, faults),
            Access::Checked(f) => {
                self.check(off, BreakpointKind::Read);
                self.read_with(f, off, addr, faults)
            }
        }
    }

    /// Writes `value` at `off`, as seen by the CPU. Writes to ROM are discarded.
    #[inline]
    pub fn write(&mut self, off: usize, addr: Address, value: Word, faults: &mut dyn FaultSink) {
        match self.dispatch.write {
            Access::Direct(f) => self.write_with(f, off, addr, value, faults),
            Access::Checked(f) => {
                self.check(off, BreakpointKind::Write);
                self.write_with(f, off, addr, value, faults)
            }
        }
    }

    /// Reads the word at `off` without involving the debugger.
    #[inline]
    pub fn read_direct(&self, off: usize, addr: Address, faults: &mut dyn FaultSink) -> Word {
        self.read_with(self.dispatch.read_direct, off, addr, faults)
    }

    /// Writes the word at `off` without involving the debugger. ROM is writable through this path.
    #[inline]
    pub fn write_direct(&mut self, off: usize, addr: Address, value: Word, faults: &mut dyn FaultSink) {
        self.write_with(self.dispatch.write_direct, off, addr, value, faults)
    }

    fn read_with(&self, f: ReadFn, off: usize, addr: Address, faults: &mut dyn FaultSink) -> Word {
        match f {
            ReadFn::Value => self.words[off],
            ReadFn::None => {
                trace!("attempt to read invalid address {:#x}", addr);
                faults.fault(addr);
                self.width.invalid()
            }
        }
    }

    fn write_with(&mut self, f: WriteFn, off: usize, addr: Address, value: Word, faults: &mut dyn FaultSink) {
        match f {
            WriteFn::Value => self.store(off, value),
            WriteFn::Ignore => trace!("ignoring write of {:#x} to read-only address {:#x}", value, addr),
            WriteFn::None => {
                trace!("attempt to write {:#x} to invalid address {:#x}", value, addr);
                faults.fault(addr);
            }
        }
    }

    #[inline]
    fn store(&mut self, off: usize, value: Word) {
        let value = self.width.wrap(value);
        if self.words[off] != value {
            self.words[off] = value;
            self.dirty = true;
            self.dirty_ever = true;
        }
    }

    fn check(&self, off: usize, kind: BreakpointKind) {
        if let (Some(debugger), Some(base)) = (&self.debugger, self.addr) {
            let addr = base + off as Address;
            match kind {
                BreakpointKind::Read => debugger.borrow_mut().check_memory_read(addr, 1),
                BreakpointKind::Write => debugger.borrow_mut().check_memory_write(addr, 1),
            }
        }
    }

    fn update_dispatch(&mut self) {
        self.dispatch = Dispatch::select(
            self.mem_type,
            self.read_breakpoints.get(),
            self.write_breakpoints.get(),
        );
    }

    fn describe(&self) -> String {
        match self.addr {
            Some(addr) => format!("@{:#x}", addr),
            None => format!("#{}", self.id),
        }
    }

    /// Registers a breakpoint inside the block; the first one switches the block to checked access.
    pub fn add_breakpoint(&mut self, _off: usize, is_write: bool) {
        let counter = if is_write { &mut self.write_breakpoints } else { &mut self.read_breakpoints };
        if counter.increment() {
            self.update_dispatch();
        }
        debug!("{} breakpoint added to memory block {}", BreakpointKind::from_write(is_write), self.describe());
    }

    /// Unregisters a breakpoint; removing the last one restores direct access.
    ///
    /// Removing more breakpoints than were added is a caller bug: the count stays at zero and
    /// [`MemoryError::CounterUnderflow`] is returned.
    pub fn remove_breakpoint(&mut self, _off: usize, is_write: bool) -> Result<(), MemoryError> {
        let kind = BreakpointKind::from_write(is_write);
        let counter = if is_write { &mut self.write_breakpoints } else { &mut self.read_breakpoints };
        match counter.decrement() {
            Some(true) => {
                self.update_dispatch();
                debug!("all {} breakpoints removed from memory block {}", kind, self.describe());
                Ok(())
            }
            Some(false) => Ok(()),
            None => {
                error!("{} breakpoint count underflow on memory block {}", kind, self.describe());
                Err(MemoryError::CounterUnderflow { block: self.id, kind })
            }
        }
    }

    /// Turns this block into `source`, optionally changing its type.
    ///
    /// The storage of `source` moves into this block; `source` is consumed so nothing else can
    /// keep using it. The read-only flag and the dispatch are derived again from the resulting
    /// type, and breakpoints carried by `source` keep this block in checked mode.
    pub fn adopt(&mut self, source: MemoryBlock, mem_type: Option<MemoryType>) {
        let mem_type = match mem_type.unwrap_or(source.mem_type) {
            _ if source.size == 0 => MemoryType::None,
            t => t,
        };
        self.id = source.id | 0x1;
        self.size = if mem_type == MemoryType::None { 0 } else { source.size };
        self.mem_type = mem_type;
        self.read_only = mem_type == MemoryType::Rom;
        self.width = source.width;
        self.words = if self.size == 0 { Vec::new() } else { source.words };
        self.dirty = source.dirty;
        self.dirty_ever = source.dirty_ever;
        self.read_breakpoints = source.read_breakpoints;
        self.write_breakpoints = source.write_breakpoints;
        if source.debugger.is_some() {
            self.debugger = source.debugger;
        }
        self.update_dispatch();
    }

    /// Fills up to `len` words starting at `off` with `pattern` (the rest of the block by default).
    ///
    /// Negative patterns are converted to their unsigned two's complement form first.
    pub fn zero(&mut self, off: usize, len: Option<usize>, pattern: i64) {
        let pattern = self.width.normalize(pattern);
        if off >= self.size {
            return;
        }
        let end = match len {
            Some(len) => off.saturating_add(len).min(self.size),
            None => self.size,
        };
        for i in off..end {
            self.store(i, pattern);
        }
    }

    /// Returns the block's live contents, or `None` for a block without storage.
    pub fn save(&self) -> Option<&[Word]> {
        match self.mem_type {
            MemoryType::None => None,
            _ => Some(&self.words),
        }
    }

    /// Replaces the block's contents. Fails, leaving the block untouched, on a length mismatch.
    pub fn restore(&mut self, mut words: Vec<Word>) -> Result<(), MemoryError> {
        if words.len() != self.size {
            return Err(MemoryError::SizeMismatch { expected: self.size, found: words.len() });
        }
        for w in words.iter_mut() {
            *w = self.width.wrap(*w);
        }
        self.words = words;
        self.dirty = true;
        self.dirty_ever = true;
        Ok(())
    }
}

cfg_if! {
    if #[cfg(feature = "debugging")] {
        impl MemoryBlock {
            /// Raw contents, for memory viewers.
            pub fn words(&self) -> &[Word] {
                &self.words
            }
        }
    }
}

impl fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("size", &self.size)
            .field("mem_type", &self.mem_type)
            .field("dirty", &self.dirty)
            .field("read_breakpoints", &self.read_breakpoints.get())
            .field("write_breakpoints", &self.write_breakpoints.get())
            .finish()
    }
}
