// Copyright (c) 2024 Mike Tsao

//! Handles digital-audio and musical time.

use core::fmt;
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use synonym::Synonym;

/// Beats per minute.
#[derive(Synonym, Serialize, Deserialize, Derivative)]
#[derivative(Default)]
#[synonym(skip(Default, Display))]
#[serde(rename_all = "kebab-case")]
pub struct Tempo(#[derivative(Default(value = "120.0"))] pub f64);
impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:0.2} BPM", self.0))
    }
}
impl From<u16> for Tempo {
    fn from(value: u16) -> Self {
        Self(value as f64)
    }
}
impl Tempo {
    /// The largest value we'll allow.
    pub const MAX_VALUE: f64 = 1024.0;

    /// The smallest value we'll allow. Zero would make the tic interval
    /// infinite, so the floor is above it.
    pub const MIN_VALUE: f64 = 1.0;

    /// Beats per second.
    pub fn bps(&self) -> f64 {
        self.0 / 60.0
    }

    /// MIN..=MAX
    pub const fn range() -> core::ops::RangeInclusive<f64> {
        Self::MIN_VALUE..=Self::MAX_VALUE
    }
}

/// Samples per second. Always a positive integer; cannot be zero.
#[derive(Synonym, Serialize, Deserialize, Derivative)]
#[derivative(Default)]
#[synonym(skip(Default))]
#[serde(rename_all = "kebab-case")]
pub struct SampleRate(#[derivative(Default(value = "44100"))] pub usize);
#[allow(missing_docs)]
impl SampleRate {
    pub const DEFAULT_SAMPLE_RATE: usize = 44100;
    pub const DEFAULT: SampleRate = SampleRate::new(Self::DEFAULT_SAMPLE_RATE);

    pub const fn new(value: usize) -> Self {
        if value != 0 {
            Self(value)
        } else {
            Self(Self::DEFAULT_SAMPLE_RATE)
        }
    }
}
impl From<f64> for SampleRate {
    fn from(value: f64) -> Self {
        Self::new(value as usize)
    }
}
impl From<SampleRate> for f64 {
    fn from(value: SampleRate) -> Self {
        value.0 as f64
    }
}
impl From<SampleRate> for u32 {
    fn from(value: SampleRate) -> Self {
        value.0 as u32
    }
}

/// The number of frames in one device period, which is the granularity at
/// which the realtime thread produces audio. Always a positive integer.
#[derive(Synonym, Serialize, Deserialize, Derivative)]
#[derivative(Default)]
#[synonym(skip(Default))]
#[serde(rename_all = "kebab-case")]
pub struct BufferSize(#[derivative(Default(value = "512"))] pub usize);
#[allow(missing_docs)]
impl BufferSize {
    pub const DEFAULT_BUFFER_SIZE: usize = 512;
    pub const DEFAULT: BufferSize = BufferSize::new(Self::DEFAULT_BUFFER_SIZE);

    pub const fn new(value: usize) -> Self {
        if value != 0 {
            Self(value)
        } else {
            Self(Self::DEFAULT_BUFFER_SIZE)
        }
    }
}

/// A zoom-derived tic resolution. The stored value is the editor's zoom menu
/// index; the multiplier it contributes to the tic interval is the
/// power-of-two `2^(4 - index)`. Index 4 means one tic per beat; smaller
/// indices stretch the interval, larger ones subdivide it.
#[derive(Synonym, Serialize, Deserialize, Derivative)]
#[derivative(Default)]
#[synonym(skip(Default))]
#[serde(rename_all = "kebab-case")]
pub struct TicUnit(#[derivative(Default(value = "2"))] pub usize);
impl TicUnit {
    /// The multiplier applied to the beat-derived tic interval.
    pub fn factor(&self) -> f64 {
        (2.0f64).powi(4 - self.0 as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempo() {
        let t = Tempo::default();
        assert_eq!(t.0, 120.0);
        assert_eq!(Tempo(90.0).bps(), 1.5);
    }

    #[test]
    fn sample_rate_default_is_sane() {
        let sr = SampleRate::default();
        assert_eq!(sr.0, 44100);
        assert_eq!(SampleRate::new(0).0, 44100, "zero rate should be rejected");
    }

    #[test]
    fn buffer_size_default_is_sane() {
        assert_eq!(BufferSize::default().0, 512);
        assert_eq!(BufferSize::new(0).0, 512, "zero size should be rejected");
    }

    #[test]
    fn tic_unit_factor_is_a_power_of_two() {
        assert_eq!(TicUnit(4).factor(), 1.0);
        assert_eq!(TicUnit(2).factor(), 4.0);
        assert_eq!(TicUnit(6).factor(), 0.25);
        assert_eq!(TicUnit::default().factor(), 4.0);
    }
}
