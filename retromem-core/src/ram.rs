// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

//! A RAM region, optionally preloaded with a program image.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::error::LoadError;
use crate::loader::{load_image, CpuControl, ImageDescriptor, LoadOptions, LoadReport};
use crate::memory::{DebuggerLink, MemoryType};
use crate::word::Address;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamConfig {
    pub addr: Address,
    pub size: usize,
    /// Overrides the load address of the image.
    #[serde(default)]
    pub load: Option<Address>,
    /// Overrides the exec address of the image.
    #[serde(default)]
    pub exec: Option<Address>,
}

pub struct RamDevice {
    config: RamConfig,
    image: Option<ImageDescriptor>,
    allocated: bool,
    auto_start: bool,
    // Set by power-up so the reset that follows it does not load the image a second time.
    fresh: bool,
}

impl RamDevice {
    pub fn new(config: RamConfig, image: Option<ImageDescriptor>) -> Self {
        RamDevice { config, image, allocated: false, auto_start: true, fresh: false }
    }

    /// Whether loading an image with an exec address starts the CPU. On by default; an attached
    /// debugger always keeps the CPU halted.
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn config(&self) -> &RamConfig {
        &self.config
    }

    pub fn image(&self) -> Option<&ImageDescriptor> {
        self.image.as_ref()
    }

    /// Allocates the region and loads the image into it.
    ///
    /// # Arguments
    ///
    /// * `bus` - The bus to allocate memory on.
    /// * `cpu` - Receives the exec address of the image.
    /// * `debugger` - If present, receives the symbol table of the image and keeps the CPU from
    ///   starting on its own.
    ///
    /// # Returns
    ///
    /// The report of the load, or `None` if there is no image.
    pub fn power_up<B, C>(&mut self, bus: &mut B, cpu: &mut C, debugger: Option<&DebuggerLink>)
        -> Result<Option<LoadReport>, LoadError>
    where
        B: Bus + ?Sized,
        C: CpuControl + ?Sized,
    {
        if !self.allocated && self.config.size > 0 {
            if bus.add_memory(self.config.addr, self.config.size, MemoryType::Ram) {
                self.allocated = true;
            } else {
                warn!("unable to allocate RAM at {:#x} ({:#x} words)", self.config.addr, self.config.size);
                self.config.size = 0;
            }
        }

        if let (Some(image), Some(debugger)) = (self.image.as_mut(), debugger) {
            if !image.symbols.is_empty() {
                debug!("passing {} symbol(s) to the debugger", image.symbols.len());
                debugger.borrow_mut().add_symbols(self.config.addr, self.config.size, &image.symbols);
            }
        }
        if let Some(image) = self.image.as_mut() {
            image.symbols.clear();
        }

        let report = self.load(bus, cpu, self.auto_start && debugger.is_none())?;
        self.fresh = true;
        Ok(report)
    }

    /// Zeroes the region and loads the original image again.
    ///
    /// The first reset after [`RamDevice::power_up`] is skipped, as memory is already in that state.
    pub fn reset<B, C>(&mut self, bus: &mut B, cpu: &mut C, debugger_attached: bool)
        -> Result<Option<LoadReport>, LoadError>
    where
        B: Bus + ?Sized,
        C: CpuControl + ?Sized,
    {
        if std::mem::take(&mut self.fresh) {
            return Ok(None);
        }
        if self.allocated {
            info!("resetting RAM at {:#x}", self.config.addr);
            bus.zero_memory(self.config.addr, self.config.size, 0);
        }
        self.load(bus, cpu, self.auto_start && !debugger_attached)
    }

    fn load<B, C>(&self, bus: &mut B, cpu: &mut C, start: bool) -> Result<Option<LoadReport>, LoadError>
    where
        B: Bus + ?Sized,
        C: CpuControl + ?Sized,
    {
        let Some(image) = self.image.as_ref() else {
            return Ok(None);
        };
        if !self.allocated {
            return Err(LoadError::NotAllocated { addr: self.config.addr });
        }
        let opts = LoadOptions {
            load: self.config.load.or(image.load),
            exec: self.config.exec,
            default_load: Some(self.config.addr),
            start,
        };
        load_image(bus, cpu, image, opts).map(Some)
    }
}
