// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

//! Loading of program images into memory.
//!
//! Byte images given without a load address are first tried as paper tapes in the
//! "Absolute Format" (see [`absolute`]); anything else is copied as-is to a single address.
//! Writes go through the bus' direct path, so ROM can be initialized and breakpoints are not hit.

mod absolute;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::error::{LoadError, TapeError};
use crate::word::{Address, Word};

/// What the loader needs from the CPU.
pub trait CpuControl {
    fn stop_cpu(&mut self);
    fn set_reset(&mut self, addr: Address, auto_start: bool);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub addr: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageData {
    Bytes(Vec<u8>),
    Words(Vec<Word>),
}

impl ImageData {
    pub fn len(&self) -> usize {
        match self {
            ImageData::Bytes(b) => b.len(),
            ImageData::Words(w) => w.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A program image, as produced by whoever fetched and parsed the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ImageResource", into = "ImageResource")]
pub struct ImageDescriptor {
    pub data: ImageData,
    pub load: Option<Address>,
    pub exec: Option<Address>,
    pub symbols: Vec<Symbol>,
}

impl ImageDescriptor {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        ImageDescriptor { data: ImageData::Bytes(bytes), load: None, exec: None, symbols: Vec::new() }
    }

    pub fn from_words(words: Vec<Word>) -> Self {
        ImageDescriptor { data: ImageData::Words(words), load: None, exec: None, symbols: Vec::new() }
    }

    pub fn with_load(mut self, load: Address) -> Self {
        self.load = Some(load);
        self
    }

    pub fn with_exec(mut self, exec: Address) -> Self {
        self.exec = Some(exec);
        self
    }
}

/// Wire form of [`ImageDescriptor`]: exactly one of `bytes` or `words` (alias `data`).
#[derive(Serialize, Deserialize)]
struct ImageResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bytes: Option<Vec<u8>>,
    #[serde(default, alias = "data", skip_serializing_if = "Option::is_none")]
    words: Option<Vec<Word>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    load: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exec: Option<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    symbols: Vec<Symbol>,
}

impl TryFrom<ImageResource> for ImageDescriptor {
    type Error = String;

    fn try_from(res: ImageResource) -> Result<Self, Self::Error> {
        let data = match (res.bytes, res.words) {
            (Some(bytes), None) => ImageData::Bytes(bytes),
            (None, Some(words)) => ImageData::Words(words),
            (Some(_), Some(_)) => return Err("resource has both \"bytes\" and \"words\"".into()),
            (None, None) => return Err("resource has neither \"bytes\" nor \"words\"".into()),
        };
        Ok(ImageDescriptor { data, load: res.load, exec: res.exec, symbols: res.symbols })
    }
}

impl From<ImageDescriptor> for ImageResource {
    fn from(image: ImageDescriptor) -> Self {
        let (bytes, words) = match image.data {
            ImageData::Bytes(b) => (Some(b), None),
            ImageData::Words(w) => (None, Some(w)),
        };
        ImageResource { bytes, words, load: image.load, exec: image.exec, symbols: image.symbols }
    }
}

/// Caller-side choices for one load.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Explicit load address. When set, the image is always copied as-is.
    pub load: Option<Address>,
    /// Explicit exec address; takes precedence over any found in the image.
    pub exec: Option<Address>,
    /// Load address used for flat images when no explicit one is given.
    pub default_load: Option<Address>,
    /// Whether the CPU should start running from the exec address.
    pub start: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImageFormat {
    Absolute,
    Flat,
}

/// Outcome of a successful load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub format: ImageFormat,
    /// Tape blocks accepted (0 for flat images).
    pub blocks: usize,
    /// Bytes or words written to memory.
    pub written: usize,
    pub exec: Option<Address>,
    pub stopped: bool,
    pub started: bool,
    /// What ended tape parsing early, if anything.
    pub tape_error: Option<TapeError>,
}

/// Loads `image` into memory and points the CPU at its exec address.
///
/// When no exec address is known, or the tape asked for a halt, the CPU is stopped and does not
/// auto-start; a known exec address is always passed on through [`CpuControl::set_reset`].
pub fn load_image<B, C>(bus: &mut B, cpu: &mut C, image: &ImageDescriptor, opts: LoadOptions)
    -> Result<LoadReport, LoadError>
where
    B: Bus + ?Sized,
    C: CpuControl + ?Sized,
{
    let mut exec = opts.exec.or(image.exec);
    let mut halt = false;
    let mut report = None;
    let mut tape_error = None;

    if let (None, ImageData::Bytes(bytes)) = (opts.load, &image.data) {
        let tape = absolute::load_tape(bus, bytes);
        if let (0, Some(err)) = (tape.blocks, &tape.error) {
            debug!("not an Absolute Format tape: {}", err);
        }
        tape_error = tape.error.clone();
        if tape.blocks > 0 {
            halt = tape.halt;
            exec = exec.or(tape.start);
            report = Some(LoadReport {
                format: ImageFormat::Absolute,
                blocks: tape.blocks,
                written: tape.written,
                exec: None,
                stopped: false,
                started: false,
                tape_error: tape.error,
            });
        }
    }

    let mut report = match report {
        Some(report) => report,
        None => {
            let load = opts.load.or(opts.default_load).or(image.load).ok_or_else(|| {
                warn!("no load address for a {}-element image", image.data.len());
                LoadError::NoLoadAddress
            })?;
            info!("loading {} element(s) at {:#x}", image.data.len(), load);
            write_flat(bus, load, &image.data);
            LoadReport {
                format: ImageFormat::Flat,
                blocks: 0,
                written: image.data.len(),
                exec: None,
                stopped: false,
                started: false,
                tape_error,
            }
        }
    };

    let mut start = opts.start;
    if exec.is_none() || halt {
        cpu.stop_cpu();
        start = false;
        report.stopped = true;
    }
    if let Some(addr) = exec {
        info!("starting address: {:#x}{}", addr, if start { "" } else { " (stopped)" });
        cpu.set_reset(addr, start);
        report.started = start;
    }
    report.exec = exec;
    Ok(report)
}

fn write_flat<B: Bus + ?Sized>(bus: &mut B, load: Address, data: &ImageData) {
    match data {
        ImageData::Bytes(bytes) => {
            for (i, &b) in bytes.iter().enumerate() {
                bus.set_byte_direct(load.wrapping_add(i as Address), b);
            }
        }
        ImageData::Words(words) => {
            for (i, &w) in words.iter().enumerate() {
                bus.set_word_direct(load.wrapping_add(i as Address), w);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bus::{BusConfig, MemoryBus};
    use crate::memory::MemoryType;

    #[derive(Debug, Default, PartialEq, Eq)]
    pub(crate) struct Cpu {
        pub stopped: usize,
        pub resets: Vec<(Address, bool)>,
    }

    impl CpuControl for Cpu {
        fn stop_cpu(&mut self) {
            self.stopped += 1;
        }
        fn set_reset(&mut self, addr: Address, auto_start: bool) {
            self.resets.push((addr, auto_start));
        }
    }

    pub(crate) fn block(addr: u16, payload: &[u8]) -> Vec<u8> {
        let len = (payload.len() + 6) as u16;
        let mut out = vec![0x01, 0x00];
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&addr.to_le_bytes());
        out.extend_from_slice(payload);
        let sum = out.iter().fold(0u8, |s, &b| s.wrapping_add(b));
        out.push(sum.wrapping_neg());
        out
    }

    fn ram_bus() -> MemoryBus {
        let mut bus = MemoryBus::new(BusConfig::PDP11);
        assert!(bus.add_memory(0, 0x4000, MemoryType::Ram));
        bus
    }

    fn started() -> LoadOptions {
        LoadOptions { start: true, ..Default::default() }
    }

    #[test]
    fn tape_block_loads_payload() {
        let mut bus = ram_bus();
        let mut cpu = Cpu::default();
        let tape = vec![0x01, 0x00, 0x09, 0x00, 0x00, 0x10, 5, 6, 7,
                        (0u8).wrapping_sub(1 + 9 + 0x10 + 5 + 6 + 7)];
        assert_eq!(tape, block(0x1000, &[5, 6, 7]));

        let report = load_image(&mut bus, &mut cpu, &ImageDescriptor::from_bytes(tape), started()).unwrap();
        assert_eq!(report.format, ImageFormat::Absolute);
        assert_eq!(report.blocks, 1);
        assert_eq!(report.written, 3);
        assert_eq!(bus.read(0x1000), 5);
        assert_eq!(bus.read(0x1001), 6);
        assert_eq!(bus.read(0x1002), 7);
        // No exec address anywhere: the CPU stays stopped
        assert_eq!(cpu.stopped, 1);
        assert!(cpu.resets.is_empty());
    }

    #[test]
    fn even_end_block_sets_exec_and_starts() {
        let mut bus = ram_bus();
        let mut cpu = Cpu::default();
        let mut tape = block(0x0200, &[1, 2]);
        tape.extend(block(0x0002, &[]));

        let report = load_image(&mut bus, &mut cpu, &ImageDescriptor::from_bytes(tape), started()).unwrap();
        assert_eq!(report.blocks, 2);
        assert_eq!(report.exec, Some(0x0002));
        assert!(report.started);
        assert_eq!(cpu.resets, vec![(0x0002, true)]);
        assert_eq!(cpu.stopped, 0);
    }

    #[test]
    fn explicit_exec_wins_over_end_block() {
        let mut bus = ram_bus();
        let mut cpu = Cpu::default();
        let mut tape = block(0x0200, &[1]);
        tape.extend(block(0x0002, &[]));
        let image = ImageDescriptor::from_bytes(tape).with_exec(0x0200);

        load_image(&mut bus, &mut cpu, &image, started()).unwrap();
        assert_eq!(cpu.resets, vec![(0x0200, true)]);
    }

    #[test]
    fn odd_end_block_stops_cpu() {
        let mut bus = ram_bus();
        let mut cpu = Cpu::default();
        let mut tape = block(0x0200, &[1]);
        tape.extend(block(0x0001, &[]));
        let image = ImageDescriptor::from_bytes(tape).with_exec(0x0200);

        let report = load_image(&mut bus, &mut cpu, &image, started()).unwrap();
        assert!(report.stopped);
        assert!(!report.started);
        assert_eq!(cpu.stopped, 1);
        assert_eq!(cpu.resets, vec![(0x0200, false)]);
    }

    #[test]
    fn bad_checksum_keeps_earlier_blocks() {
        let mut bus = ram_bus();
        let mut cpu = Cpu::default();
        let mut tape = block(0x0100, &[0xAA]);
        let mut bad = block(0x0300, &[0xBB]);
        *bad.last_mut().unwrap() ^= 0x01;
        tape.extend(bad);

        let report = load_image(&mut bus, &mut cpu, &ImageDescriptor::from_bytes(tape), started()).unwrap();
        assert_eq!(report.format, ImageFormat::Absolute);
        assert_eq!(report.blocks, 1);
        assert!(matches!(report.tape_error, Some(TapeError::ChecksumMismatch { offset: 8, .. })));
        assert_eq!(bus.read(0x0100), 0xAA);
        assert_eq!(bus.read(0x0300), 0);
    }

    #[test]
    fn non_tape_falls_back_to_flat() {
        let mut bus = ram_bus();
        let mut cpu = Cpu::default();
        let image = ImageDescriptor::from_bytes(vec![0x12, 0x34, 0x56]).with_exec(0x0400);
        let opts = LoadOptions { default_load: Some(0x0400), start: true, ..Default::default() };

        let report = load_image(&mut bus, &mut cpu, &image, opts).unwrap();
        assert_eq!(report.format, ImageFormat::Flat);
        assert!(matches!(report.tape_error, Some(TapeError::InvalidSignature { signature: 0x3412, .. })));
        assert_eq!(bus.read(0x0402), 0x56);
        assert_eq!(cpu.resets, vec![(0x0400, true)]);
    }

    #[test]
    fn explicit_load_skips_tape_parsing() {
        let mut bus = ram_bus();
        let mut cpu = Cpu::default();
        let tape = block(0x1000, &[5, 6, 7]);
        let opts = LoadOptions { load: Some(0x2000), ..Default::default() };

        let report = load_image(&mut bus, &mut cpu, &ImageDescriptor::from_bytes(tape.clone()), opts).unwrap();
        assert_eq!(report.format, ImageFormat::Flat);
        assert_eq!(report.tape_error, None);
        assert_eq!(bus.read(0x2000), 0x01);
        assert_eq!(bus.read(0x2000 + tape.len() as Address - 1), u64::from(*tape.last().unwrap()));
        assert_eq!(bus.read(0x1000), 0);
    }

    #[test]
    fn load_address_resolution_order() {
        let mut cpu = Cpu::default();
        let image = ImageDescriptor::from_words(vec![7]).with_load(0x30);

        let mut bus = ram_bus();
        let opts = LoadOptions { default_load: Some(0x20), ..Default::default() };
        load_image(&mut bus, &mut cpu, &image, opts).unwrap();
        assert_eq!(bus.read(0x20), 7);
        assert_eq!(bus.read(0x30), 0);

        let mut bus = ram_bus();
        load_image(&mut bus, &mut cpu, &image, LoadOptions::default()).unwrap();
        assert_eq!(bus.read(0x30), 7);
    }

    #[test]
    fn words_load_flat_and_wrap() {
        let mut bus = MemoryBus::new(BusConfig::PDP10);
        assert!(bus.add_memory(0, 0x1000, MemoryType::Ram));
        let mut cpu = Cpu::default();
        let image = ImageDescriptor::from_words(vec![0o777777_777777, 1 << 40]).with_load(0o100);

        let report = load_image(&mut bus, &mut cpu, &image, LoadOptions::default()).unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(bus.read(0o100), 0o777777_777777);
        assert_eq!(bus.read(0o101), 0);
    }

    #[test]
    fn missing_load_address_is_an_error() {
        let mut bus = ram_bus();
        let mut cpu = Cpu::default();
        let image = ImageDescriptor::from_bytes(vec![0xFF, 0xFF]);
        let err = load_image(&mut bus, &mut cpu, &image, LoadOptions::default()).unwrap_err();
        assert_eq!(err, LoadError::NoLoadAddress);
        assert_eq!(cpu, Cpu::default());
    }

    #[test]
    fn tape_writes_reach_rom() {
        let mut bus = MemoryBus::new(BusConfig::PDP11);
        assert!(bus.add_memory(0xE000, 0x2000, MemoryType::Rom));
        let mut cpu = Cpu::default();
        let tape = block(0xE000, &[0x42]);
        load_image(&mut bus, &mut cpu, &ImageDescriptor::from_bytes(tape), LoadOptions::default()).unwrap();
        assert_eq!(bus.read(0xE000), 0x42);
    }

    #[test]
    fn resource_json_forms() {
        let image: ImageDescriptor =
            serde_json::from_str(r#"{"load": 512, "exec": 514, "bytes": [1, 2, 3]}"#).unwrap();
        assert_eq!(image.data, ImageData::Bytes(vec![1, 2, 3]));
        assert_eq!((image.load, image.exec), (Some(512), Some(514)));

        let image: ImageDescriptor =
            serde_json::from_str(r#"{"data": [68719476735], "symbols": [{"name": "START", "addr": 64}]}"#).unwrap();
        assert_eq!(image.data, ImageData::Words(vec![(1 << 36) - 1]));
        assert_eq!(image.symbols[0].name, "START");

        assert!(serde_json::from_str::<ImageDescriptor>(r#"{"load": 1}"#).is_err());
        assert!(serde_json::from_str::<ImageDescriptor>(r#"{"bytes": [], "words": []}"#).is_err());
    }
}
