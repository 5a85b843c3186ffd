// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

pub mod bus;
pub mod error;
pub mod loader;
pub mod memory;
pub mod ram;
pub mod rom;
pub mod snapshot;
pub mod word;

pub use {
    bus::{Bus, BusConfig, MemoryBus},
    error::{LoadError, MemoryError, TapeError},
    loader::{load_image, CpuControl, ImageDescriptor, LoadOptions, LoadReport},
    memory::{Debugger, DebuggerLink, MemoryBlock, MemoryType},
    ram::{RamConfig, RamDevice},
    rom::{RomConfig, RomDevice},
    snapshot::Snapshot,
    word::{Address, Word, WordWidth},
};
