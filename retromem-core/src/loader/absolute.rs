// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

//! Paper tapes in DEC's "Absolute Format".
//!
//! A tape is a sequence of blocks, each made of a 6-byte little-endian header
//!
//! ```text
//! u16 signature (0x0001) | u16 length (payload + 6) | u16 load address
//! ```
//!
//! followed by the payload and a single checksum byte chosen so that the 8-bit sum of every byte
//! in the block is zero. A block without payload ends the tape: its address is where execution
//! starts, unless it is odd, in which case the machine halts.
//!
//! Real tapes are sloppy: they may be padded with zeros before and between blocks, and may end
//! with garbage. Parsing stops at the first thing that is not a valid block, keeping whatever was
//! loaded up to that point.

use log::{debug, info, warn};

use crate::bus::Bus;
use crate::error::TapeError;
use crate::word::Address;

const SIGNATURE: u16 = 0x0001;
const HEADER_LEN: usize = 6;

#[derive(Debug, Default)]
pub(super) struct TapeLoad {
    pub blocks: usize,
    pub written: usize,
    pub start: Option<Address>,
    pub halt: bool,
    pub error: Option<TapeError>,
}

#[inline]
fn read_u16(bytes: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([bytes[off], bytes[off + 1]])
}

pub(super) fn load_tape<B: Bus + ?Sized>(bus: &mut B, bytes: &[u8]) -> TapeLoad {
    let mut tape = TapeLoad::default();
    let mut off = 0;

    while off + 1 < bytes.len() {
        let w = read_u16(bytes, off);
        if w == 0 {
            off += 2;
            continue;
        }
        if w & 0xFF == 0 {
            off += 1;
            continue;
        }

        let offset = off;
        if w != SIGNATURE {
            tape.error = Some(TapeError::InvalidSignature { offset, signature: w });
            break;
        }
        if off + HEADER_LEN >= bytes.len() {
            tape.error = Some(TapeError::InvalidBlock { offset });
            break;
        }
        let len = usize::from(read_u16(bytes, off + 2));
        let addr = read_u16(bytes, off + 4);
        let data = off + HEADER_LEN;
        let checksum_at = match len.checked_sub(HEADER_LEN) {
            Some(n) if data + n < bytes.len() => data + n,
            _ => {
                tape.error = Some(TapeError::InsufficientData { offset });
                break;
            }
        };
        let sum = bytes[offset..=checksum_at].iter().fold(0u8, |s, &b| s.wrapping_add(b));
        if sum != 0 {
            tape.error = Some(TapeError::ChecksumMismatch { offset, sum });
            break;
        }
        off = checksum_at + 1;
        tape.blocks += 1;

        let payload = &bytes[data..checksum_at];
        if payload.is_empty() {
            if addr & 0x1 != 0 {
                info!("end of tape at offset {:#06x}: halt", offset);
                tape.halt = true;
            } else {
                info!("end of tape at offset {:#06x}: start at {:#06x}", offset, addr);
                tape.start = tape.start.or(Some(Address::from(addr)));
            }
            break;
        }

        debug!(
            "loading {:#06x} bytes at {:#06x}-{:#06x}",
            payload.len(),
            addr,
            usize::from(addr) + payload.len()
        );
        let base = Address::from(addr);
        for (i, &b) in payload.iter().enumerate() {
            bus.set_byte_direct(base + i as Address, b);
        }
        tape.written += payload.len();
    }

    if let (1.., Some(err)) = (tape.blocks, &tape.error) {
        warn!("tape parsing stopped after {} block(s): {}", tape.blocks, err);
    }
    tape
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusConfig, MemoryBus};
    use crate::loader::tests::block;
    use crate::memory::MemoryType;

    fn ram_bus() -> MemoryBus {
        let mut bus = MemoryBus::new(BusConfig::PDP11);
        assert!(bus.add_memory(0, 0x10000, MemoryType::Ram));
        bus
    }

    #[test]
    fn skips_leading_and_interleaved_zeros() {
        let mut bus = ram_bus();
        let mut bytes = vec![0, 0, 0, 0, 0];
        bytes.extend(block(0x0010, &[0x11, 0x22]));
        bytes.extend([0, 0, 0]);
        bytes.extend(block(0x0020, &[0x33]));

        let tape = load_tape(&mut bus, &bytes);
        assert_eq!(tape.blocks, 2);
        assert_eq!(tape.written, 3);
        assert_eq!(bus.read(0x0011), 0x22);
        assert_eq!(bus.read(0x0020), 0x33);
    }

    #[test]
    fn stops_at_end_of_tape() {
        let mut bus = ram_bus();
        let mut bytes = block(0x0100, &[1]);
        bytes.extend(block(0x0200, &[]));
        bytes.extend(block(0x0300, &[9]));

        let tape = load_tape(&mut bus, &bytes);
        assert_eq!(tape.blocks, 2);
        assert_eq!(tape.start, Some(0x0200));
        assert!(!tape.halt);
        assert_eq!(bus.read(0x0300), 0);
    }

    #[test]
    fn truncated_payload() {
        let mut bus = ram_bus();
        let mut bytes = block(0x0100, &[1, 2, 3, 4]);
        bytes.truncate(bytes.len() - 2);

        let tape = load_tape(&mut bus, &bytes);
        assert_eq!(tape.blocks, 0);
        assert_eq!(tape.error, Some(TapeError::InsufficientData { offset: 0 }));
        assert_eq!(bus.read(0x0100), 0);
    }

    #[test]
    fn short_header() {
        let mut bus = ram_bus();
        let tape = load_tape(&mut bus, &[0x01, 0x00, 0x06, 0x00, 0x00, 0x01]);
        assert_eq!(tape.error, Some(TapeError::InvalidBlock { offset: 0 }));
    }

    #[test]
    fn length_below_header_size() {
        let mut bus = ram_bus();
        let tape = load_tape(&mut bus, &[0x01, 0x00, 0x04, 0x00, 0x00, 0x01, 0xFA]);
        assert_eq!(tape.error, Some(TapeError::InsufficientData { offset: 0 }));
    }

    #[test]
    fn nothing_written_before_checksum_validates() {
        let mut bus = ram_bus();
        let mut bytes = block(0x0400, &[0x5A, 0xA5]);
        let last = bytes.len() - 1;
        bytes[last] = bytes[last].wrapping_add(1);

        let tape = load_tape(&mut bus, &bytes);
        assert_eq!(tape.blocks, 0);
        assert!(matches!(tape.error, Some(TapeError::ChecksumMismatch { offset: 0, sum: 1 })));
        assert_eq!(bus.read(0x0400), 0);
    }
}
