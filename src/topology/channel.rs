// Copyright (c) 2024 Mike Tsao

use super::AudioUid;
use crate::{
    buffer::RecyclingUid,
    recall::{RecallId, RecallUid},
    types::IsUid,
};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use synonym::Synonym;
use thiserror::Error;

/// An identifier for a [Channel].
#[derive(Synonym, Serialize, Deserialize, Eq, PartialEq)]
#[synonym(skip(PartialEq))]
#[serde(rename_all = "kebab-case")]
pub struct ChannelUid(pub usize);
impl IsUid for ChannelUid {
    fn as_usize(&self) -> usize {
        self.0
    }
}

/// Which of an audio's two channel lists a channel belongs to.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    /// A channel that emits toward the device (or a downstream machine).
    Output,
    /// A channel that accepts from an upstream machine (or owns its source).
    Input,
}
impl ChannelKind {
    /// The other kind.
    pub fn opposite(&self) -> ChannelKind {
        match self {
            ChannelKind::Output => ChannelKind::Input,
            ChannelKind::Input => ChannelKind::Output,
        }
    }
}

/// Why a link operation was refused. Validation happens before any mutation,
/// so a refused link leaves both endpoints exactly as they were.
#[derive(Debug, Error, PartialEq)]
pub enum LinkError {
    /// The named channel uid doesn't exist.
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelUid),

    /// A channel can't be its own patch-cable peer.
    #[error("channel {0} cannot be linked to itself")]
    SelfLink(ChannelUid),

    /// Links connect machines; both ends can't belong to the same audio.
    #[error("channels {0} and {1} belong to the same audio")]
    SameAudio(ChannelUid, ChannelUid),

    /// Links pair an output with an input.
    #[error("channels {0} and {1} are both {2} channels")]
    IncompatibleKinds(ChannelUid, ChannelUid, ChannelKind),

    /// The requested link would make the signal flow circular.
    #[error("linking {0} to {1} would create a feedback cycle")]
    WouldCycle(ChannelUid, ChannelUid),
}

/// One port in the audio topology.
///
/// Channels form a 2D grid per audio: `audio_channel` selects the column
/// (left, right, ...) and `pad` the row (drum kit line, mixer strip). `line`
/// is the flattened pad-major index. A channel may `link` to exactly one
/// channel of the opposite kind on another audio; the relation is symmetric
/// and is maintained by [Topology](super::Topology), never directly.
#[derive(Debug)]
pub struct Channel {
    pub(crate) uid: ChannelUid,
    pub(crate) audio: AudioUid,
    pub(crate) kind: ChannelKind,
    pub(crate) pad: usize,
    pub(crate) audio_channel: usize,
    pub(crate) line: usize,
    pub(crate) link: Option<ChannelUid>,
    pub(crate) first_recycling: Option<RecyclingUid>,
    pub(crate) last_recycling: Option<RecyclingUid>,
    /// Whether this channel owns the recyclings in its range (as opposed to
    /// borrowing a linked or derived range).
    pub(crate) owns_recycling: bool,
    /// Live-pass recall list.
    pub(crate) play: Vec<RecallUid>,
    /// Background-pass recall list.
    pub(crate) recall: Vec<RecallUid>,
    /// One entry per playback pass this channel currently participates in.
    pub(crate) recall_ids: Vec<RecallId>,
}
impl Channel {
    pub(crate) fn new(
        uid: ChannelUid,
        audio: AudioUid,
        kind: ChannelKind,
        pad: usize,
        audio_channel: usize,
        line: usize,
    ) -> Self {
        Self {
            uid,
            audio,
            kind,
            pad,
            audio_channel,
            line,
            link: None,
            first_recycling: None,
            last_recycling: None,
            owns_recycling: false,
            play: Default::default(),
            recall: Default::default(),
            recall_ids: Default::default(),
        }
    }

    #[allow(missing_docs)]
    pub fn uid(&self) -> ChannelUid {
        self.uid
    }

    /// The audio this channel belongs to.
    pub fn audio(&self) -> AudioUid {
        self.audio
    }

    #[allow(missing_docs)]
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    #[allow(missing_docs)]
    pub fn pad(&self) -> usize {
        self.pad
    }

    #[allow(missing_docs)]
    pub fn audio_channel(&self) -> usize {
        self.audio_channel
    }

    /// The flattened pad-major index of this channel within its list.
    pub fn line(&self) -> usize {
        self.line
    }

    /// The patch-cable peer, if any.
    pub fn link(&self) -> Option<ChannelUid> {
        self.link
    }

    /// The first recycling of this channel's range, if any.
    pub fn first_recycling(&self) -> Option<RecyclingUid> {
        self.first_recycling
    }

    /// The last recycling of this channel's range, if any.
    pub fn last_recycling(&self) -> Option<RecyclingUid> {
        self.last_recycling
    }

    /// The channel's recycling range as a pair, if any.
    pub fn recycling_range(&self) -> Option<(RecyclingUid, RecyclingUid)> {
        match (self.first_recycling, self.last_recycling) {
            (Some(first), Some(last)) => Some((first, last)),
            _ => None,
        }
    }

    /// The recalls of the requested pass list.
    pub fn recalls(&self, background: bool) -> &[RecallUid] {
        if background {
            &self.recall
        } else {
            &self.play
        }
    }

    /// The playback passes this channel currently participates in.
    pub fn recall_ids(&self) -> &[RecallId] {
        &self.recall_ids
    }
}
