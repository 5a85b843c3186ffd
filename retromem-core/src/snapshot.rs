// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::memory::{MemoryBlock, MemoryType};
use crate::word::Word;

/// Contents of every block of a bus, in address order.
///
/// Blocks that were not saved (unallocated memory, and ROM unless requested) have no entry and
/// are left alone on restore.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    blocks: Vec<Option<Vec<Word>>>,
}

impl Snapshot {
    pub fn capture(blocks: &[MemoryBlock], include_rom: bool) -> Self {
        let blocks = blocks
            .iter()
            .map(|b| match b.mem_type() {
                MemoryType::Ram => b.save().map(<[Word]>::to_vec),
                MemoryType::Rom if include_rom => b.save().map(<[Word]>::to_vec),
                _ => None,
            })
            .collect();
        Snapshot { blocks }
    }

    /// Restores every saved entry into `blocks`.
    ///
    /// All entries are checked before anything is written, so a mismatch leaves every block as it
    /// was.
    pub fn apply(&self, blocks: &mut [MemoryBlock]) -> Result<(), MemoryError> {
        if self.blocks.len() != blocks.len() {
            return Err(MemoryError::BlockCountMismatch { expected: blocks.len(), found: self.blocks.len() });
        }
        for (saved, block) in self.blocks.iter().zip(blocks.iter()) {
            if let Some(words) = saved {
                if words.len() != block.size() || block.mem_type() == MemoryType::None {
                    return Err(MemoryError::SizeMismatch { expected: block.size(), found: words.len() });
                }
            }
        }
        for (saved, block) in self.blocks.iter().zip(blocks.iter_mut()) {
            if let Some(words) = saved {
                block.restore(words.clone())?;
            }
        }
        Ok(())
    }

    pub fn blocks(&self) -> &[Option<Vec<Word>>] {
        &self.blocks
    }

    /// Number of blocks that carry saved contents.
    pub fn saved_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::tests::Faults;
    use crate::word::WordWidth;

    fn blocks() -> Vec<MemoryBlock> {
        vec![
            MemoryBlock::new(Some(0), 4, MemoryType::Ram, WordWidth::BITS16),
            MemoryBlock::none(Some(4), WordWidth::BITS16),
            MemoryBlock::new(Some(8), 4, MemoryType::Rom, WordWidth::BITS16),
        ]
    }

    #[test]
    fn rom_is_saved_only_on_request() {
        let blocks = blocks();
        let s = Snapshot::capture(&blocks, false);
        assert_eq!(s.saved_blocks(), 1);
        assert_eq!(s.blocks()[0], Some(vec![0; 4]));
        assert_eq!(Snapshot::capture(&blocks, true).saved_blocks(), 2);
    }

    #[test]
    fn mismatch_leaves_everything_untouched() {
        let mut faults = Faults::default();
        let mut blocks = blocks();
        blocks[0].write(1, 1, 0x1111, &mut faults);
        let mut s = Snapshot::capture(&blocks, true);
        blocks[0].write(1, 1, 0x2222, &mut faults);

        s.blocks[2] = Some(vec![0; 3]);
        let err = s.apply(&mut blocks).unwrap_err();
        assert_eq!(err, MemoryError::SizeMismatch { expected: 4, found: 3 });
        assert_eq!(blocks[0].save().unwrap()[1], 0x2222);

        s.blocks.pop();
        assert!(matches!(s.apply(&mut blocks), Err(MemoryError::BlockCountMismatch { expected: 3, found: 2 })));
    }

    #[test]
    fn json_round_trip() {
        let mut faults = Faults::default();
        let mut blocks = blocks();
        blocks[0].write(3, 3, 0xABCD, &mut faults);
        let json = serde_json::to_string(&Snapshot::capture(&blocks, false)).unwrap();
        assert_eq!(json, r#"{"blocks":[[0,0,0,43981],null,null]}"#);

        blocks[0].zero(0, None, 0);
        let s: Snapshot = serde_json::from_str(&json).unwrap();
        s.apply(&mut blocks).unwrap();
        assert_eq!(blocks[0].save().unwrap(), &[0, 0, 0, 0xABCD]);
    }
}
