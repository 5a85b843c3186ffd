// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

use serde::{Deserialize, Serialize};

/// Unsigned value stored in one memory cell. Every supported width fits in 64 bits.
pub type Word = u64;

/// Emulated address, in words.
pub type Address = u32;

/// Describes the word format of an emulated machine.
///
/// All values are stored unsigned; signed quantities are kept in their two's complement form.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WordWidthConfig", into = "WordWidthConfig")]
pub struct WordWidth {
    bits: u32,
    mask: Word,
    invalid: Word,
}

#[derive(Serialize, Deserialize)]
struct WordWidthConfig {
    bits: u32,
    #[serde(default)]
    invalid: Option<Word>,
}

impl TryFrom<WordWidthConfig> for WordWidth {
    type Error = String;

    fn try_from(config: WordWidthConfig) -> Result<Self, Self::Error> {
        if !(1..=64).contains(&config.bits) {
            return Err(format!("word width must be 1 to 64 bits, not {}", config.bits));
        }
        let width = WordWidth::new(config.bits);
        Ok(match config.invalid {
            Some(invalid) => width.with_invalid(invalid),
            None => width,
        })
    }
}

impl From<WordWidth> for WordWidthConfig {
    fn from(width: WordWidth) -> Self {
        WordWidthConfig { bits: width.bits, invalid: Some(width.invalid) }
    }
}

impl WordWidth {
    /// 8080-class machines.
    pub const BITS8: WordWidth = WordWidth::new(8);
    /// PDP-11-class machines.
    pub const BITS16: WordWidth = WordWidth::new(16);
    /// PDP-10-class machines.
    pub const BITS36: WordWidth = WordWidth::new(36);

    /// Creates a width of `bits` bits, using the all-ones pattern as the invalid word.
    ///
    /// # Panics
    ///
    /// Panics if `bits` is zero or larger than 64.
    pub const fn new(bits: u32) -> Self {
        assert!(bits > 0 && bits <= 64);
        let mask = if bits == 64 { Word::MAX } else { (1 << bits) - 1 };
        WordWidth { bits, mask, invalid: mask }
    }

    /// Overrides the value returned when reading unallocated memory.
    pub const fn with_invalid(self, invalid: Word) -> Self {
        WordWidth { invalid, ..self }
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    #[inline]
    pub fn mask(&self) -> Word {
        self.mask
    }

    /// Sentinel returned by reads of unallocated memory.
    #[inline]
    pub fn invalid(&self) -> Word {
        self.invalid
    }

    /// Number of distinct values (2^bits), or `None` for 64-bit words.
    #[inline]
    pub fn limit(&self) -> Option<Word> {
        self.mask.checked_add(1)
    }

    /// Magnitude limit of a signed word (2^(bits-1)).
    #[inline]
    pub fn half_limit(&self) -> Word {
        1 << (self.bits - 1)
    }

    /// Truncates `value` to the word width.
    #[inline]
    pub fn wrap(&self, value: Word) -> Word {
        value & self.mask
    }

    /// Converts a possibly negative fill pattern into an unsigned word.
    ///
    /// Negative patterns within the signed range of the word are mapped to their two's complement
    /// counterpart; anything else is reduced to its magnitude modulo 2^bits.
    pub fn normalize(&self, pattern: i64) -> Word {
        let half = self.half_limit() as i128;
        let limit = self.mask as i128 + 1;
        let mut value = pattern as i128;
        if value < 0 && value >= -half {
            value += limit;
        }
        (value.abs() % limit) as Word
    }
}

impl Default for WordWidth {
    fn default() -> Self {
        WordWidth::BITS8
    }
}
