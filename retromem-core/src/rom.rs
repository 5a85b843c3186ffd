// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::memory::MemoryType;
use crate::word::{Address, Word};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomConfig {
    pub addr: Address,
    pub values: Vec<Word>,
}

/// A ROM region holding fixed contents.
///
/// The CPU cannot change it, but a debugger can [`patch`](RomDevice::patch) it; a reset brings
/// back the original values.
pub struct RomDevice {
    config: RomConfig,
    allocated: bool,
}

impl RomDevice {
    pub fn new(config: RomConfig) -> Self {
        RomDevice { config, allocated: false }
    }

    pub fn addr(&self) -> Address {
        self.config.addr
    }

    pub fn size(&self) -> usize {
        self.config.values.len()
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.config.addr && ((addr - self.config.addr) as usize) < self.size()
    }

    /// Allocates the region and writes the ROM contents into it.
    pub fn power_up<B: Bus + ?Sized>(&mut self, bus: &mut B) -> bool {
        if !self.allocated {
            if !bus.add_memory(self.config.addr, self.size(), MemoryType::Rom) {
                warn!("unable to allocate ROM at {:#x} ({:#x} words)", self.config.addr, self.size());
                return false;
            }
            self.allocated = true;
        }
        self.write_values(bus);
        info!("ROM at {:#x}: {:#x} words", self.config.addr, self.size());
        true
    }

    /// Changes one word of the ROM, returning its previous value.
    ///
    /// Returns `None`, changing nothing, for addresses outside the ROM.
    pub fn patch<B: Bus + ?Sized>(&mut self, bus: &mut B, addr: Address, value: Word) -> Option<Word> {
        if !self.allocated || !self.contains(addr) {
            return None;
        }
        let previous = bus.get_word_direct(addr);
        bus.set_word_direct(addr, value);
        debug!("ROM patched at {:#x}: {:#x} -> {:#x}", addr, previous, value);
        Some(previous)
    }

    /// Undoes every patch.
    pub fn reset<B: Bus + ?Sized>(&mut self, bus: &mut B) {
        if self.allocated {
            self.write_values(bus);
        }
    }

    fn write_values<B: Bus + ?Sized>(&self, bus: &mut B) {
        for (i, &value) in self.config.values.iter().enumerate() {
            bus.set_word_direct(self.config.addr + i as Address, value);
        }
    }
}
