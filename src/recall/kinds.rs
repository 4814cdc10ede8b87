// Copyright (c) 2024 Mike Tsao

use crate::{
    sequencer::{
        CopyPatternAudio, CopyPatternAudioRun, CopyPatternChannel, CopyPatternChannelRun,
        DelayAudio, DelayAudioRun,
    },
    topology::ChannelUid,
    traits::BridgeHooks,
    types::Sample,
};

/// Streams a channel's transient signals into the device output buffer and
/// consumes them as it goes. This is the terminal recall of a playback pass:
/// everything upstream exists so this one has something to mix.
#[derive(Debug, Clone)]
pub struct PlayChannelRun {
    /// The channel whose recycling range is played.
    pub source: ChannelUid,
}

/// Scales a channel's transient signals in place. Runs during the inter
/// stage, so it sees buffers after they were produced and before they are
/// mixed to the device.
#[derive(Debug, Clone)]
pub struct VolumeChannelRun {
    /// The channel whose signals are scaled.
    pub source: ChannelUid,
    /// The linear gain factor.
    pub volume: Sample,
}

/// An externally supplied effect participating in the graph through
/// [BridgeHooks]. The core gives it the same lifecycle as a built-in recall
/// and hands it each signal buffer to transform in place.
#[derive(Debug)]
pub struct BridgeRecall {
    /// The channel whose signals are transformed.
    pub source: ChannelUid,
    /// The external implementation.
    pub hooks: Box<dyn BridgeHooks>,
}

/// Everything kind-specific about a recall: its state and, by discriminant,
/// its behavior. Data kinds (`DelayAudio`, `CopyPatternAudio`,
/// `CopyPatternChannel`) hold shared editing-time state and are never
/// duplicated; run kinds hold per-pass state and are duplicated once per
/// playback pass.
#[derive(Debug)]
pub enum RecallKind {
    /// Tempo-derived tic interval state (audio scope, shared).
    DelayAudio(DelayAudio),
    /// Tic counter and fan-out (audio scope, per pass).
    DelayAudioRun(DelayAudioRun),
    /// Bank selection and loop flag (audio scope, shared).
    CopyPatternAudio(CopyPatternAudio),
    /// Step cursor (audio scope, per pass).
    CopyPatternAudioRun(CopyPatternAudioRun),
    /// Pattern cube per source channel (channel scope, shared).
    CopyPatternChannel(CopyPatternChannel),
    /// Step worker (channel scope, per pass).
    CopyPatternChannelRun(CopyPatternChannelRun),
    /// Device-buffer mixer (channel scope, per pass).
    PlayChannelRun(PlayChannelRun),
    /// Gain (channel scope, per pass).
    VolumeChannelRun(VolumeChannelRun),
    /// External effect (channel scope, per pass).
    Bridge(BridgeRecall),
}
impl RecallKind {
    /// A kebab-case name describing what this kind does.
    pub fn name(&self) -> &'static str {
        match self {
            RecallKind::DelayAudio(_) => "delay",
            RecallKind::DelayAudioRun(_) => "delay-run",
            RecallKind::CopyPatternAudio(_) => "copy-pattern",
            RecallKind::CopyPatternAudioRun(_) => "copy-pattern-run",
            RecallKind::CopyPatternChannel(_) => "copy-pattern-channel",
            RecallKind::CopyPatternChannelRun(_) => "copy-pattern-channel-run",
            RecallKind::PlayChannelRun(_) => "play",
            RecallKind::VolumeChannelRun(_) => "volume",
            RecallKind::Bridge(_) => "bridge",
        }
    }

    /// Whether this kind carries per-pass state and participates in
    /// template duplication.
    pub fn is_run_kind(&self) -> bool {
        matches!(
            self,
            RecallKind::DelayAudioRun(_)
                | RecallKind::CopyPatternAudioRun(_)
                | RecallKind::CopyPatternChannelRun(_)
                | RecallKind::PlayChannelRun(_)
                | RecallKind::VolumeChannelRun(_)
                | RecallKind::Bridge(_)
        )
    }

    /// Produces the state for a fresh instance of this kind. Shared wiring
    /// (references to data recalls) carries over; per-pass state (counters,
    /// cursors, resolved run links) starts fresh; external hooks spawn a new
    /// instance of themselves.
    pub(crate) fn duplicate(&self) -> RecallKind {
        match self {
            RecallKind::DelayAudio(state) => RecallKind::DelayAudio(state.clone()),
            RecallKind::DelayAudioRun(state) => RecallKind::DelayAudioRun(DelayAudioRun {
                delay_audio: state.delay_audio,
                ..Default::default()
            }),
            RecallKind::CopyPatternAudio(state) => RecallKind::CopyPatternAudio(state.clone()),
            RecallKind::CopyPatternAudioRun(state) => {
                RecallKind::CopyPatternAudioRun(CopyPatternAudioRun {
                    copy_pattern_audio: state.copy_pattern_audio,
                    ..Default::default()
                })
            }
            RecallKind::CopyPatternChannel(state) => RecallKind::CopyPatternChannel(state.clone()),
            RecallKind::CopyPatternChannelRun(state) => {
                RecallKind::CopyPatternChannelRun(CopyPatternChannelRun {
                    audio_run: None,
                    ..state.clone()
                })
            }
            RecallKind::PlayChannelRun(state) => RecallKind::PlayChannelRun(state.clone()),
            RecallKind::VolumeChannelRun(state) => RecallKind::VolumeChannelRun(state.clone()),
            RecallKind::Bridge(state) => RecallKind::Bridge(BridgeRecall {
                source: state.source,
                hooks: state.hooks.spawn(),
            }),
        }
    }
}
