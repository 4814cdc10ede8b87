// Copyright (c) 2024 Mike Tsao

use crate::{
    prelude::*,
    recall::GroupId,
    topology::{AudioUid, ChannelKind, ChannelUid},
};
use strum_macros::Display;

/// A mutation requested by a non-realtime thread. Tasks are the only
/// sanctioned way to touch state the realtime thread reads: they queue in
/// FIFO order and are applied between tics, never mid-period. A task that
/// fails to apply is logged and dropped; it never blocks the queue.
#[derive(Debug, Clone, Display, PartialEq)]
pub enum Task {
    /// Establish or clear a channel link.
    SetLink {
        #[allow(missing_docs)]
        channel: ChannelUid,
        #[allow(missing_docs)]
        link: Option<ChannelUid>,
    },
    /// Resize an audio's channel count.
    SetAudioChannels {
        #[allow(missing_docs)]
        audio: AudioUid,
        #[allow(missing_docs)]
        audio_channels: usize,
    },
    /// Resize an audio's pad count.
    SetPads {
        #[allow(missing_docs)]
        audio: AudioUid,
        #[allow(missing_docs)]
        kind: ChannelKind,
        #[allow(missing_docs)]
        pads: usize,
    },
    /// Flip one pattern bit on a channel's step sequencer.
    TogglePatternBit {
        #[allow(missing_docs)]
        channel: ChannelUid,
        #[allow(missing_docs)]
        i: usize,
        #[allow(missing_docs)]
        j: usize,
        #[allow(missing_docs)]
        step: usize,
    },
    /// Change the master tempo. Affects only future tic intervals.
    SetTempo(Tempo),
    /// Change the zoom-derived tic resolution.
    SetTicUnit(TicUnit),
    /// Start a playback pass over a whole audio.
    StartAudio {
        #[allow(missing_docs)]
        audio: AudioUid,
    },
    /// Start a playback pass from one channel.
    StartChannel {
        #[allow(missing_docs)]
        channel: ChannelUid,
        /// Run in the background ("recall") lists instead of the live
        /// ("play") lists.
        background: bool,
    },
    /// Cancel a running playback pass.
    CancelGroup {
        #[allow(missing_docs)]
        group_id: GroupId,
    },
    /// Stop the realtime loop once the lists drain.
    Stop,
}
