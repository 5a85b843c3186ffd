// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::memory::{DebuggerLink, FaultSink, MemoryBlock, MemoryType};
use crate::snapshot::Snapshot;
use crate::word::{Address, Word, WordWidth};

/// What devices and the loader need from the bus they are attached to.
pub trait Bus: FaultSink {
    /// Allocates `size` words of memory of type `mem_type` at `addr`.
    ///
    /// # Returns
    ///
    /// `false` if the request cannot be honored (unaligned, out of range, or overlapping memory
    /// that is already allocated).
    fn add_memory(&mut self, addr: Address, size: usize, mem_type: MemoryType) -> bool;

    /// Fills `size` words at `addr` with `pattern`, ROM included.
    fn zero_memory(&mut self, addr: Address, size: usize, pattern: i64);

    /// Stores a byte into the word at `addr`, bypassing breakpoints and ROM protection.
    fn set_byte_direct(&mut self, addr: Address, value: u8);

    /// Stores a word at `addr`, bypassing breakpoints and ROM protection.
    fn set_word_direct(&mut self, addr: Address, value: Word);

    /// Reads the word at `addr` without involving the debugger.
    fn get_word_direct(&mut self, addr: Address) -> Word;
}

/// Shape of an emulated address space.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Width of an address; the bus spans `2^addr_bits` words.
    pub addr_bits: u32,
    /// Words per block. Must divide the address space evenly.
    pub block_size: usize,
    #[serde(default)]
    pub width: WordWidth,
}

impl BusConfig {
    pub const PDP10: BusConfig = BusConfig { addr_bits: 18, block_size: 2048, width: WordWidth::BITS36 };
    pub const PDP11: BusConfig = BusConfig { addr_bits: 16, block_size: 8192, width: WordWidth::BITS16 };
    pub const I8080: BusConfig = BusConfig { addr_bits: 16, block_size: 1024, width: WordWidth::BITS8 };

    /// Number of words addressable on the bus.
    pub fn total_words(&self) -> usize {
        1usize << self.addr_bits
    }

    pub fn block_count(&self) -> usize {
        self.total_words() / self.block_size
    }
}

/// Accesses to unallocated memory seen by the bus.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FaultLog {
    pub count: u64,
    pub last: Option<Address>,
}

impl FaultSink for FaultLog {
    fn fault(&mut self, addr: Address) {
        self.count += 1;
        self.last = Some(addr);
        debug!("memory fault at {:#x}", addr);
    }
}

/// Reference bus: a flat array of equally sized blocks, one word cell per address.
pub struct MemoryBus {
    config: BusConfig,
    blocks: Vec<MemoryBlock>,
    faults: FaultLog,
    debugger: Option<DebuggerLink>,
}

impl MemoryBus {
    /// Creates a bus whose whole address space is unallocated.
    ///
    /// # Panics
    ///
    /// Panics if the block size is zero or does not divide the address space.
    pub fn new(config: BusConfig) -> Self {
        assert!(config.block_size > 0 && config.total_words() % config.block_size == 0);
        let blocks = (0..config.block_count())
            .map(|i| MemoryBlock::none(Some((i * config.block_size) as Address), config.width))
            .collect();
        MemoryBus { config, blocks, faults: FaultLog::default(), debugger: None }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn faults(&self) -> FaultLog {
        self.faults
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, index: usize) -> Option<&MemoryBlock> {
        self.blocks.get(index)
    }

    /// Block holding `addr`.
    pub fn block_at(&self, addr: Address) -> Option<&MemoryBlock> {
        self.locate(addr).map(|(i, _)| &self.blocks[i])
    }

    #[inline]
    fn locate(&self, addr: Address) -> Option<(usize, usize)> {
        let addr = addr as usize;
        if addr >= self.config.total_words() {
            return None;
        }
        Some((addr / self.config.block_size, addr % self.config.block_size))
    }

    /// Indices of the blocks `[addr, addr + size)` covers, if the range is block-aligned and in range.
    fn block_range(&self, addr: Address, size: usize) -> Option<std::ops::Range<usize>> {
        let (first, off) = self.locate(addr)?;
        if off != 0 || size == 0 {
            return None;
        }
        let last = first.checked_add(size.div_ceil(self.config.block_size))?;
        (last <= self.blocks.len()).then_some(first..last)
    }

    pub fn read(&mut self, addr: Address) -> Word {
        match self.locate(addr) {
            Some((i, off)) => self.blocks[i].read(off, addr, &mut self.faults),
            None => self.out_of_range(addr),
        }
    }

    pub fn write(&mut self, addr: Address, value: Word) {
        match self.locate(addr) {
            Some((i, off)) => self.blocks[i].write(off, addr, value, &mut self.faults),
            None => {
                self.out_of_range(addr);
            }
        }
    }

    pub fn read_direct(&mut self, addr: Address) -> Word {
        match self.locate(addr) {
            Some((i, off)) => self.blocks[i].read_direct(off, addr, &mut self.faults),
            None => self.out_of_range(addr),
        }
    }

    pub fn write_direct(&mut self, addr: Address, value: Word) {
        match self.locate(addr) {
            Some((i, off)) => self.blocks[i].write_direct(off, addr, value, &mut self.faults),
            None => {
                self.out_of_range(addr);
            }
        }
    }

    fn out_of_range(&mut self, addr: Address) -> Word {
        trace!("access to {:#x} beyond the end of the bus", addr);
        self.faults.fault(addr);
        self.config.width.invalid()
    }

    /// Places a breakpoint on `addr`. Must only be called while the CPU is paused.
    pub fn add_breakpoint(&mut self, addr: Address, is_write: bool) -> Result<(), MemoryError> {
        let (i, off) = self.locate(addr).ok_or(MemoryError::OutOfRange(addr))?;
        self.blocks[i].add_breakpoint(off, is_write);
        Ok(())
    }

    /// Removes a breakpoint from `addr`. Must only be called while the CPU is paused.
    pub fn remove_breakpoint(&mut self, addr: Address, is_write: bool) -> Result<(), MemoryError> {
        let (i, off) = self.locate(addr).ok_or(MemoryError::OutOfRange(addr))?;
        self.blocks[i].remove_breakpoint(off, is_write)
    }

    /// Converts the blocks covering `[addr, addr + size)` to `mem_type`, keeping their contents
    /// and breakpoints. Converting to [`MemoryType::None`] releases the memory.
    ///
    /// Unallocated blocks have nothing to convert: use [`Bus::add_memory`] for them.
    pub fn set_memory_type(&mut self, addr: Address, size: usize, mem_type: MemoryType) -> bool {
        let Some(range) = self.block_range(addr, size) else {
            warn!("cannot convert {:#x} words at {:#x} to {}", size, addr, mem_type);
            return false;
        };
        if mem_type != MemoryType::None {
            if let Some(i) = range.clone().find(|&i| self.blocks[i].mem_type() == MemoryType::None) {
                warn!(
                    "cannot convert unallocated block at {:#x} to {}",
                    i * self.config.block_size,
                    mem_type
                );
                return false;
            }
        }
        for i in range {
            let base = (i * self.config.block_size) as Address;
            let mut block = MemoryBlock::none(Some(base), self.config.width);
            block.set_debugger(self.debugger.clone());
            let old = std::mem::replace(&mut self.blocks[i], block);
            self.blocks[i].adopt(old, Some(mem_type));
        }
        info!("converted {:#x} words at {:#x} to {}", size, addr, mem_type);
        true
    }

    /// Connects (or disconnects) the debugger notified by blocks carrying breakpoints.
    pub fn attach_debugger(&mut self, debugger: Option<DebuggerLink>) {
        for block in self.blocks.iter_mut() {
            block.set_debugger(debugger.clone());
        }
        self.debugger = debugger;
    }

    pub fn has_debugger(&self) -> bool {
        self.debugger.is_some()
    }

    /// Copies the contents of every RAM block, and of ROM blocks too if `include_rom` is set.
    pub fn save_memory(&self, include_rom: bool) -> Snapshot {
        Snapshot::capture(&self.blocks, include_rom)
    }

    /// Puts back the contents saved by [`MemoryBus::save_memory`].
    ///
    /// Nothing is restored unless every entry of the snapshot fits its block.
    pub fn restore_memory(&mut self, snapshot: &Snapshot) -> Result<(), MemoryError> {
        snapshot.apply(&mut self.blocks).inspect_err(|e| warn!("snapshot rejected: {}", e))
    }

    /// Indices of the blocks modified since the last call.
    pub fn take_dirty(&mut self) -> Vec<usize> {
        self.blocks
            .iter_mut()
            .enumerate()
            .filter_map(|(i, b)| b.take_dirty().then_some(i))
            .collect()
    }
}

impl FaultSink for MemoryBus {
    fn fault(&mut self, addr: Address) {
        self.faults.fault(addr);
    }
}

impl Bus for MemoryBus {
    fn add_memory(&mut self, addr: Address, size: usize, mem_type: MemoryType) -> bool {
        let range = match self.block_range(addr, size) {
            Some(range) if mem_type != MemoryType::None => range,
            _ => {
                warn!("invalid memory request: {} {:#x} words at {:#x}", mem_type, size, addr);
                return false;
            }
        };
        if let Some(i) = range.clone().find(|&i| self.blocks[i].mem_type() != MemoryType::None) {
            warn!(
                "{} request at {:#x} overlaps {} block at {:#x}",
                mem_type,
                addr,
                self.blocks[i].mem_type(),
                i * self.config.block_size
            );
            return false;
        }
        for i in range {
            self.blocks[i].allocate(self.config.block_size, mem_type);
        }
        info!("{} at {:#x}: {:#x} words", mem_type, addr, size);
        true
    }

    fn zero_memory(&mut self, addr: Address, size: usize, pattern: i64) {
        let mut addr = addr as usize;
        let end = addr.saturating_add(size).min(self.config.total_words());
        while addr < end {
            let (i, off) = (addr / self.config.block_size, addr % self.config.block_size);
            let len = (self.config.block_size - off).min(end - addr);
            self.blocks[i].zero(off, Some(len), pattern);
            addr += len;
        }
    }

    fn set_byte_direct(&mut self, addr: Address, value: u8) {
        self.write_direct(addr, Word::from(value));
    }

    fn set_word_direct(&mut self, addr: Address, value: Word) {
        self.write_direct(addr, value);
    }

    fn get_word_direct(&mut self, addr: Address) -> Word {
        self.read_direct(addr)
    }
}
