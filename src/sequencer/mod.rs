// Copyright (c) 2024 Mike Tsao

//! The tic-synchronized step sequencer: the BPM-derived [Delay] tic source
//! and the [CopyPattern] family that turns pattern bits into audible
//! signals.

/// The most commonly used imports.
pub mod prelude {
    pub use super::{
        CopyPatternAudio, CopyPatternAudioRun, CopyPatternChannel, CopyPatternChannelRun,
        DelayAudio, DelayAudioRun, Pattern, PatternBuilder, PatternError,
    };
}

pub use {
    copy_pattern::{
        CopyPatternAudio, CopyPatternAudioRun, CopyPatternChannel, CopyPatternChannelRun,
    },
    delay::{delay_periods, DelayAudio, DelayAudioRun},
    pattern::{Pattern, PatternBuilder, PatternError},
};

mod copy_pattern;
mod delay;
mod pattern;
