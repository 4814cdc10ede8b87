// Copyright (c) 2024 Mike Tsao

use bit_vec::BitVec;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a pattern access was refused.
#[derive(Debug, Error, PartialEq)]
pub enum PatternError {
    /// The addressed bit is outside the pattern's dimensions.
    #[error("bit ({i}, {j}, {step}) is out of bounds for a {banks}x{subs}x{length} pattern")]
    OutOfBounds {
        #[allow(missing_docs)]
        i: usize,
        #[allow(missing_docs)]
        j: usize,
        #[allow(missing_docs)]
        step: usize,
        #[allow(missing_docs)]
        banks: usize,
        #[allow(missing_docs)]
        subs: usize,
        #[allow(missing_docs)]
        length: usize,
    },
}

/// A 3D bit cube addressed `(bank i, sub-pattern j, step)`.
///
/// The editor toggles bits; during playback the sequencer reads one step per
/// tic, using whichever `(i, j)` bank pair is currently selected on the
/// audio-scope state. Addressing out of range is a caller bug and is
/// reported as an error rather than being silently masked.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[serde(from = "PatternRepr", into = "PatternRepr")]
#[builder(build_fn(private, name = "build_from_builder"))]
pub struct Pattern {
    /// The number of banks (dimension 0, e.g. drum kits).
    #[builder(default = "1")]
    banks: usize,
    /// The number of sub-patterns per bank (dimension 1).
    #[builder(default = "1")]
    subs: usize,
    /// The number of steps per sub-pattern.
    #[builder(default = "16")]
    length: usize,
    #[builder(setter(skip))]
    bits: BitVec,
}
impl PatternBuilder {
    /// Builds the [Pattern], allocating its cleared bit cube.
    pub fn build(&self) -> Result<Pattern, PatternBuilderError> {
        let mut r = self.build_from_builder()?;
        r.bits = BitVec::from_elem(r.banks * r.subs * r.length, false);
        Ok(r)
    }
}
impl Default for Pattern {
    fn default() -> Self {
        PatternBuilder::default().build().unwrap()
    }
}
impl Pattern {
    #[allow(missing_docs)]
    pub fn banks(&self) -> usize {
        self.banks
    }

    #[allow(missing_docs)]
    pub fn subs(&self) -> usize {
        self.subs
    }

    /// The number of steps per sub-pattern.
    pub fn length(&self) -> usize {
        self.length
    }

    fn index(&self, i: usize, j: usize, step: usize) -> Result<usize, PatternError> {
        if i >= self.banks || j >= self.subs || step >= self.length {
            return Err(PatternError::OutOfBounds {
                i,
                j,
                step,
                banks: self.banks,
                subs: self.subs,
                length: self.length,
            });
        }
        Ok((i * self.subs + j) * self.length + step)
    }

    /// Reads one bit.
    pub fn get_bit(&self, i: usize, j: usize, step: usize) -> Result<bool, PatternError> {
        let index = self.index(i, j, step)?;
        Ok(self.bits.get(index).unwrap_or_default())
    }

    /// Writes one bit.
    pub fn set_bit(
        &mut self,
        i: usize,
        j: usize,
        step: usize,
        value: bool,
    ) -> Result<(), PatternError> {
        let index = self.index(i, j, step)?;
        self.bits.set(index, value);
        Ok(())
    }

    /// Flips one bit, returning its new value.
    pub fn toggle_bit(&mut self, i: usize, j: usize, step: usize) -> Result<bool, PatternError> {
        let index = self.index(i, j, step)?;
        let value = !self.bits.get(index).unwrap_or_default();
        self.bits.set(index, value);
        Ok(value)
    }

    /// Resizes the cube, preserving every bit that remains addressable.
    pub fn resize(&mut self, banks: usize, subs: usize, length: usize) {
        let mut bits = BitVec::from_elem(banks * subs * length, false);
        for i in 0..banks.min(self.banks) {
            for j in 0..subs.min(self.subs) {
                for step in 0..length.min(self.length) {
                    if self.get_bit(i, j, step).unwrap_or_default() {
                        bits.set((i * subs + j) * length + step, true);
                    }
                }
            }
        }
        self.banks = banks;
        self.subs = subs;
        self.length = length;
        self.bits = bits;
    }
}

/// The packed wire/file form of a [Pattern].
#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
struct PatternRepr {
    banks: usize,
    subs: usize,
    length: usize,
    bits: Vec<u8>,
}
impl From<Pattern> for PatternRepr {
    fn from(value: Pattern) -> Self {
        Self {
            banks: value.banks,
            subs: value.subs,
            length: value.length,
            bits: value.bits.to_bytes(),
        }
    }
}
impl From<PatternRepr> for Pattern {
    fn from(value: PatternRepr) -> Self {
        let mut bits = BitVec::from_bytes(&value.bits);
        // from_bytes() rounds the length up to a byte multiple.
        bits.truncate(value.banks * value.subs * value.length);
        Self {
            banks: value.banks,
            subs: value.subs,
            length: value.length,
            bits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_is_idempotent_when_applied_twice() {
        let mut pattern = PatternBuilder::default()
            .banks(2)
            .subs(2)
            .length(16)
            .build()
            .unwrap();

        assert!(!pattern.get_bit(1, 0, 7).unwrap());
        assert!(pattern.toggle_bit(1, 0, 7).unwrap());
        assert!(pattern.get_bit(1, 0, 7).unwrap());
        assert!(!pattern.toggle_bit(1, 0, 7).unwrap());
        assert!(
            !pattern.get_bit(1, 0, 7).unwrap(),
            "two toggles should restore the original value"
        );
    }

    #[test]
    fn out_of_bounds_is_an_error_not_a_panic() {
        let mut pattern = PatternBuilder::default().length(8).build().unwrap();

        assert!(matches!(
            pattern.get_bit(0, 0, 8),
            Err(PatternError::OutOfBounds { step: 8, .. })
        ));
        assert!(pattern.set_bit(1, 0, 0, true).is_err());
        assert!(pattern.toggle_bit(0, 1, 0).is_err());
    }

    #[test]
    fn zero_length_pattern_is_inert() {
        let pattern = PatternBuilder::default().length(0).build().unwrap();
        assert_eq!(pattern.length(), 0);
        assert!(
            pattern.get_bit(0, 0, 0).is_err(),
            "every step of an empty pattern is out of bounds"
        );
    }

    #[test]
    fn resize_preserves_overlapping_bits() {
        let mut pattern = PatternBuilder::default()
            .banks(2)
            .subs(1)
            .length(8)
            .build()
            .unwrap();
        pattern.set_bit(0, 0, 3, true).unwrap();
        pattern.set_bit(1, 0, 7, true).unwrap();

        pattern.resize(1, 1, 16);
        assert!(pattern.get_bit(0, 0, 3).unwrap());
        assert!(
            pattern.get_bit(0, 0, 7).is_ok(),
            "grown steps should be addressable"
        );
        assert!(!pattern.get_bit(0, 0, 7).unwrap());
    }

    #[test]
    fn serde_round_trip_preserves_the_cube() {
        let mut pattern = PatternBuilder::default()
            .banks(2)
            .subs(2)
            .length(12)
            .build()
            .unwrap();
        pattern.set_bit(0, 0, 0, true).unwrap();
        pattern.set_bit(1, 1, 11, true).unwrap();

        let json = serde_json::to_string(&pattern).unwrap();
        let restored: Pattern = serde_json::from_str(&json).unwrap();
        assert_eq!(pattern, restored);
    }
}
