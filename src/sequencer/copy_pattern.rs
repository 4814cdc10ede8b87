// Copyright (c) 2024 Mike Tsao

use super::Pattern;
use crate::{recall::RecallUid, topology::ChannelUid};

/// The audio-scope state of the step sequencer: which `(bank, sub-pattern)`
/// pair of the cube is being played, and whether playback wraps at the end
/// of the pattern or completes.
#[derive(Debug, Clone, Default)]
pub struct CopyPatternAudio {
    /// Dimension-0 selection (e.g. the drum kit).
    pub bank_0: usize,
    /// Dimension-1 selection (e.g. the variation).
    pub bank_1: usize,
    /// Wrap at the end of the pattern instead of completing.
    pub looping: bool,
    /// Steps per round. The pass cursor counts `0..=length`; the channel
    /// patterns are expected to be dimensioned to match.
    pub length: usize,
}
impl CopyPatternAudio {
    /// Creates state playing the given bank pair.
    pub fn new_with(bank_0: usize, bank_1: usize, looping: bool, length: usize) -> Self {
        Self {
            bank_0,
            bank_1,
            looping,
            length,
        }
    }
}

/// The pass-level cursor of the step sequencer. It lives on the audio run,
/// not the channel runs, so that every channel of one pass agrees on the
/// current step, while two concurrent passes advance independently.
#[derive(Debug, Clone, Default)]
pub struct CopyPatternAudioRun {
    /// The audio-scope data recall this run reads bank/loop state from.
    pub(crate) copy_pattern_audio: Option<RecallUid>,
    /// The delay run this pass depends on, resolved after duplication.
    pub(crate) delay_run: Option<RecallUid>,
    /// The step cursor, `0..=length`. `length` means the pattern has played
    /// out (and either wraps or completes, per the audio-scope loop flag).
    pub bit: usize,
}
impl CopyPatternAudioRun {
    /// Creates a run reading from the given audio-scope data recall.
    pub fn new_with(copy_pattern_audio: RecallUid) -> Self {
        Self {
            copy_pattern_audio: Some(copy_pattern_audio),
            ..Default::default()
        }
    }
}

/// The channel-scope data of the step sequencer: one pattern cube per source
/// channel (one drum pad, one line).
#[derive(Debug, Clone)]
pub struct CopyPatternChannel {
    /// The channel whose recyclings receive signals on active steps.
    pub source: ChannelUid,
    /// The channel's pattern cube.
    pub pattern: Pattern,
}
impl CopyPatternChannel {
    /// Creates channel data for the given source.
    pub fn new_with(source: ChannelUid, pattern: Pattern) -> Self {
        Self { source, pattern }
    }
}

/// The per-pass, per-channel worker of the step sequencer. On each tic for
/// its channel's audio channel it reads the pass cursor, consults the
/// pattern, and on an active step creates one transient signal per recycling
/// in the source channel's range.
#[derive(Debug, Clone)]
pub struct CopyPatternChannelRun {
    /// The channel-scope data recall (pattern and source channel).
    pub(crate) copy_pattern_channel: RecallUid,
    /// The audio-scope data recall (banks, loop flag).
    pub(crate) copy_pattern_audio: RecallUid,
    /// The pass-level audio run (cursor), resolved after duplication.
    pub(crate) audio_run: Option<RecallUid>,
}
impl CopyPatternChannelRun {
    /// Creates a worker wired to its data recalls. The pass-level audio run
    /// is resolved once the pass exists.
    pub fn new_with(copy_pattern_channel: RecallUid, copy_pattern_audio: RecallUid) -> Self {
        Self {
            copy_pattern_channel,
            copy_pattern_audio,
            audio_run: None,
        }
    }
}
