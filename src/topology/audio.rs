// Copyright (c) 2024 Mike Tsao

use super::{ChannelKind, ChannelUid};
use crate::{
    recall::{RecallId, RecallUid},
    types::IsUid,
};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use synonym::Synonym;

/// An identifier for an [Audio].
#[derive(Synonym, Serialize, Deserialize, Eq, PartialEq)]
#[synonym(skip(PartialEq))]
#[serde(rename_all = "kebab-case")]
pub struct AudioUid(pub usize);
impl IsUid for AudioUid {
    fn as_usize(&self) -> usize {
        self.0
    }
}

/// Describes the shape and recycling behavior of an [Audio] at creation
/// time. The three booleans characterize the machine kind: a drum machine
/// has recycling inputs (each pad owns its source buffers) and async fan-in;
/// a synth has recycling outputs; a mixer or master strip has neither and
/// passes ranges through.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct AudioConfig {
    /// Columns per pad: mono 1, stereo 2, ...
    #[builder(default = "1")]
    pub audio_channels: usize,
    /// Rows of output channels.
    #[builder(default = "1")]
    pub output_pads: usize,
    /// Rows of input channels.
    #[builder(default = "1")]
    pub input_pads: usize,
    /// Output channels own fresh recyclings (the machine originates audio at
    /// its outputs).
    #[builder(default)]
    pub output_has_recycling: bool,
    /// Input channels own fresh recyclings (the machine originates audio at
    /// its inputs, e.g. one sample per drum pad).
    #[builder(default)]
    pub input_has_recycling: bool,
    /// All input pads of one audio channel fan into the same output channel.
    #[builder(default)]
    pub is_async: bool,
}
impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfigBuilder::default().build().unwrap()
    }
}

/// A machine in the topology: a 2D grid of output channels, a 2D grid of
/// input channels, and the audio-scope recall lists shared by all of them.
#[derive(Debug)]
pub struct Audio {
    pub(crate) uid: AudioUid,
    pub(crate) audio_channels: usize,
    pub(crate) output_pads: usize,
    pub(crate) input_pads: usize,
    pub(crate) output_has_recycling: bool,
    pub(crate) input_has_recycling: bool,
    pub(crate) is_async: bool,
    /// Output channels, pad-major (`line = pad * audio_channels + column`).
    pub(crate) output: Vec<ChannelUid>,
    /// Input channels, pad-major.
    pub(crate) input: Vec<ChannelUid>,
    pub(crate) play: Vec<RecallUid>,
    pub(crate) recall: Vec<RecallUid>,
    pub(crate) recall_ids: Vec<RecallId>,
}
impl Audio {
    pub(crate) fn new(uid: AudioUid, config: &AudioConfig) -> Self {
        Self {
            uid,
            audio_channels: config.audio_channels,
            output_pads: config.output_pads,
            input_pads: config.input_pads,
            output_has_recycling: config.output_has_recycling,
            input_has_recycling: config.input_has_recycling,
            is_async: config.is_async,
            output: Default::default(),
            input: Default::default(),
            play: Default::default(),
            recall: Default::default(),
            recall_ids: Default::default(),
        }
    }

    #[allow(missing_docs)]
    pub fn uid(&self) -> AudioUid {
        self.uid
    }

    #[allow(missing_docs)]
    pub fn audio_channels(&self) -> usize {
        self.audio_channels
    }

    /// The number of pads of the given kind.
    pub fn pads(&self, kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::Output => self.output_pads,
            ChannelKind::Input => self.input_pads,
        }
    }

    /// The number of lines (pads x audio channels) of the given kind.
    pub fn lines(&self, kind: ChannelKind) -> usize {
        self.pads(kind) * self.audio_channels
    }

    /// The channel list of the given kind, pad-major.
    pub fn channels(&self, kind: ChannelKind) -> &[ChannelUid] {
        match kind {
            ChannelKind::Output => &self.output,
            ChannelKind::Input => &self.input,
        }
    }

    /// The channel at (pad, audio_channel) of the given kind.
    pub fn channel_at(
        &self,
        kind: ChannelKind,
        pad: usize,
        audio_channel: usize,
    ) -> Option<ChannelUid> {
        if audio_channel >= self.audio_channels {
            return None;
        }
        self.channels(kind)
            .get(pad * self.audio_channels + audio_channel)
            .copied()
    }

    /// The channel at the given flattened line of the given kind.
    pub fn channel_at_line(&self, kind: ChannelKind, line: usize) -> Option<ChannelUid> {
        self.channels(kind).get(line).copied()
    }

    /// Whether channels of the given kind own their recyclings.
    pub fn has_recycling(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Output => self.output_has_recycling,
            ChannelKind::Input => self.input_has_recycling,
        }
    }

    /// Whether all input pads of one audio channel fan into the same output.
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// The recalls of the requested pass list.
    pub fn recalls(&self, background: bool) -> &[RecallUid] {
        if background {
            &self.recall
        } else {
            &self.play
        }
    }

    /// The playback passes this audio currently participates in.
    pub fn recall_ids(&self) -> &[RecallId] {
        &self.recall_ids
    }
}
