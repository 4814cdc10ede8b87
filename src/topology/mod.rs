// Copyright (c) 2024 Mike Tsao

//! The static graph of audio ports: [Audio] machines, their [Channel] grids,
//! the pairwise link relation between machines, and the recycling ranges
//! that follow from both.
//!
//! Everything here is plain data plus invariant maintenance. The realtime
//! scheduler reads this graph every tic, so all mutation is expected to
//! arrive through the engine's task queue; nothing in this module locks.

use crate::{
    buffer::{RecyclingArena, RecyclingUid},
    recall::RecallUid,
    types::UidFactory,
};
use rustc_hash::FxHashMap;
use strum_macros::Display;

/// The most commonly used imports.
pub mod prelude {
    pub use super::{
        Audio, AudioConfig, AudioConfigBuilder, AudioUid, Channel, ChannelKind, ChannelUid,
        LinkError, Topology, TopologyEvent,
    };
}

pub use {
    audio::{Audio, AudioConfig, AudioConfigBuilder, AudioUid},
    channel::{Channel, ChannelKind, ChannelUid, LinkError},
};

mod audio;
mod channel;

/// A notification that a topology mutation changed something an external
/// editor (or the recall layer) might care about. Mutating operations return
/// these in the order the changes happened.
#[derive(Debug, Clone, Display, PartialEq)]
pub enum TopologyEvent {
    /// A new audio was created.
    AudioAdded(AudioUid),
    /// A new channel was created.
    ChannelAdded(ChannelUid),
    /// A channel was destroyed. Carries the recall uids that were attached to
    /// it so the recall layer can purge them.
    ChannelRemoved {
        #[allow(missing_docs)]
        channel: ChannelUid,
        #[allow(missing_docs)]
        recalls: Vec<RecallUid>,
    },
    /// A channel's link changed.
    LinkChanged {
        #[allow(missing_docs)]
        channel: ChannelUid,
        #[allow(missing_docs)]
        link: Option<ChannelUid>,
    },
    /// A channel's recycling range changed.
    RecyclingChanged {
        #[allow(missing_docs)]
        channel: ChannelUid,
        #[allow(missing_docs)]
        old: Option<(RecyclingUid, RecyclingUid)>,
        #[allow(missing_docs)]
        new: Option<(RecyclingUid, RecyclingUid)>,
    },
    /// An audio's channel count changed.
    AudioChannelsChanged {
        #[allow(missing_docs)]
        audio: AudioUid,
        #[allow(missing_docs)]
        audio_channels: usize,
    },
    /// An audio's pad count changed.
    PadsChanged {
        #[allow(missing_docs)]
        audio: AudioUid,
        #[allow(missing_docs)]
        kind: ChannelKind,
        #[allow(missing_docs)]
        pads: usize,
    },
}

/// Owns every [Audio] and [Channel] in the engine, plus the
/// [RecyclingArena] beneath them, and maintains the structural invariants:
/// link symmetry, recycling range consistency, and grid shape.
#[derive(Debug)]
pub struct Topology {
    audio_factory: UidFactory<AudioUid>,
    channel_factory: UidFactory<ChannelUid>,
    pub(crate) audios: FxHashMap<AudioUid, Audio>,
    pub(crate) channels: FxHashMap<ChannelUid, Channel>,
    /// The recycling storage for the whole graph.
    pub recyclings: RecyclingArena,
}
impl Default for Topology {
    fn default() -> Self {
        Self {
            audio_factory: UidFactory::new(1),
            channel_factory: UidFactory::new(1),
            audios: Default::default(),
            channels: Default::default(),
            recyclings: Default::default(),
        }
    }
}
impl Topology {
    /// Creates a new audio with the shape described by `config`, including
    /// its channel grids and owned recyclings.
    pub fn create_audio(&mut self, config: &AudioConfig) -> (AudioUid, Vec<TopologyEvent>) {
        let uid = self.audio_factory.mint_next();
        let mut audio = Audio::new(uid, config);
        // The grids start empty; rebuild_grid() fills them out below.
        audio.output_pads = 0;
        audio.input_pads = 0;
        self.audios.insert(uid, audio);

        let mut events = vec![TopologyEvent::AudioAdded(uid)];
        self.rebuild_grid(uid, ChannelKind::Output, config.output_pads, &mut events);
        self.rebuild_grid(uid, ChannelKind::Input, config.input_pads, &mut events);
        self.refresh_audio(uid, &mut events);
        (uid, events)
    }

    #[allow(missing_docs)]
    pub fn audio(&self, uid: AudioUid) -> Option<&Audio> {
        self.audios.get(&uid)
    }

    #[allow(missing_docs)]
    pub fn audio_mut(&mut self, uid: AudioUid) -> Option<&mut Audio> {
        self.audios.get_mut(&uid)
    }

    #[allow(missing_docs)]
    pub fn channel(&self, uid: ChannelUid) -> Option<&Channel> {
        self.channels.get(&uid)
    }

    #[allow(missing_docs)]
    pub fn channel_mut(&mut self, uid: ChannelUid) -> Option<&mut Channel> {
        self.channels.get_mut(&uid)
    }

    /// The channel on the same pad at the next audio channel.
    pub fn next(&self, uid: ChannelUid) -> Option<ChannelUid> {
        let channel = self.channels.get(&uid)?;
        let audio = self.audios.get(&channel.audio)?;
        audio.channel_at(channel.kind, channel.pad, channel.audio_channel + 1)
    }

    /// The channel on the same pad at the previous audio channel.
    pub fn prev(&self, uid: ChannelUid) -> Option<ChannelUid> {
        let channel = self.channels.get(&uid)?;
        let audio = self.audios.get(&channel.audio)?;
        audio.channel_at(channel.kind, channel.pad, channel.audio_channel.checked_sub(1)?)
    }

    /// The channel on the same audio channel at the next pad.
    pub fn next_pad(&self, uid: ChannelUid) -> Option<ChannelUid> {
        let channel = self.channels.get(&uid)?;
        let audio = self.audios.get(&channel.audio)?;
        audio.channel_at(channel.kind, channel.pad + 1, channel.audio_channel)
    }

    /// The channel on the same audio channel at the previous pad.
    pub fn prev_pad(&self, uid: ChannelUid) -> Option<ChannelUid> {
        let channel = self.channels.get(&uid)?;
        let audio = self.audios.get(&channel.audio)?;
        audio.channel_at(channel.kind, channel.pad.checked_sub(1)?, channel.audio_channel)
    }

    /// Resizes the number of audio channels (grid columns) of both channel
    /// lists. Shrinking destroys the orphaned channels.
    pub fn set_audio_channels(
        &mut self,
        uid: AudioUid,
        audio_channels: usize,
    ) -> anyhow::Result<Vec<TopologyEvent>> {
        let Some(audio) = self.audios.get(&uid) else {
            anyhow::bail!("unknown audio {uid}");
        };
        let old = audio.audio_channels;
        if old == audio_channels {
            return Ok(Default::default());
        }

        let mut events = Vec::default();
        self.resize_columns(uid, ChannelKind::Output, audio_channels, &mut events);
        self.resize_columns(uid, ChannelKind::Input, audio_channels, &mut events);
        self.audios.get_mut(&uid).unwrap().audio_channels = audio_channels;
        events.push(TopologyEvent::AudioChannelsChanged {
            audio: uid,
            audio_channels,
        });
        self.refresh_audio(uid, &mut events);
        Ok(events)
    }

    /// Resizes the number of pads (grid rows) of one channel list. Shrinking
    /// destroys the orphaned channels; growing creates fresh ones.
    pub fn set_pads(
        &mut self,
        uid: AudioUid,
        kind: ChannelKind,
        pads: usize,
    ) -> anyhow::Result<Vec<TopologyEvent>> {
        let Some(audio) = self.audios.get(&uid) else {
            anyhow::bail!("unknown audio {uid}");
        };
        if audio.pads(kind) == pads {
            return Ok(Default::default());
        }
        let mut events = Vec::default();
        self.rebuild_grid(uid, kind, pads, &mut events);
        events.push(TopologyEvent::PadsChanged {
            audio: uid,
            kind,
            pads,
        });
        self.refresh_audio(uid, &mut events);
        Ok(events)
    }

    /// Establishes (or, with `None`, clears) the symmetric link relation
    /// between two channels. Validation happens before any mutation; on
    /// error both channels are untouched. On success, prior peers are
    /// detached, both sides point at each other, and every affected
    /// recycling range is reconciled, including ranges derived upward
    /// through pass-through audios.
    pub fn set_link(
        &mut self,
        channel: ChannelUid,
        link: Option<ChannelUid>,
    ) -> Result<Vec<TopologyEvent>, LinkError> {
        let Some(chan) = self.channels.get(&channel) else {
            return Err(LinkError::UnknownChannel(channel));
        };

        let Some(peer) = link else {
            // Clearing an absent link is a no-op.
            let Some(peer) = chan.link else {
                return Ok(Default::default());
            };
            let (input_uid, _output_uid) = if chan.kind == ChannelKind::Input {
                (channel, peer)
            } else {
                (peer, channel)
            };
            let mut events = Vec::default();
            self.clear_link_pair(channel, peer, &mut events);
            self.reset_unlinked_input(input_uid, &mut events);
            return Ok(events);
        };

        let Some(peer_chan) = self.channels.get(&peer) else {
            return Err(LinkError::UnknownChannel(peer));
        };
        if peer == channel {
            return Err(LinkError::SelfLink(channel));
        }
        if peer_chan.audio == chan.audio {
            return Err(LinkError::SameAudio(channel, peer));
        }
        if peer_chan.kind == chan.kind {
            return Err(LinkError::IncompatibleKinds(channel, peer, chan.kind));
        }
        let (input_uid, output_uid) = if chan.kind == ChannelKind::Input {
            (channel, peer)
        } else {
            (peer, channel)
        };
        if self.channels[&input_uid].link == Some(output_uid) {
            return Ok(Default::default());
        }

        // The new edge makes the output's audio feed the input's audio. If
        // the input's audio already (transitively) feeds the output's audio,
        // the graph would loop.
        let input_audio = self.channels[&input_uid].audio;
        let output_audio = self.channels[&output_uid].audio;
        if self.reaches_downstream(output_audio, input_audio) {
            return Err(LinkError::WouldCycle(channel, peer));
        }

        let mut events = Vec::default();

        // Detach prior peers.
        if let Some(old_output) = self.channels[&input_uid].link {
            self.clear_link_pair(input_uid, old_output, &mut events);
        }
        if let Some(old_input) = self.channels[&output_uid].link {
            self.clear_link_pair(output_uid, old_input, &mut events);
            self.reset_unlinked_input(old_input, &mut events);
        }

        // Connect both sides.
        self.channels.get_mut(&input_uid).unwrap().link = Some(output_uid);
        self.channels.get_mut(&output_uid).unwrap().link = Some(input_uid);
        events.push(TopologyEvent::LinkChanged {
            channel: input_uid,
            link: Some(output_uid),
        });
        events.push(TopologyEvent::LinkChanged {
            channel: output_uid,
            link: Some(input_uid),
        });

        // The input adopts the output's recycling range.
        self.drop_owned_recyclings(input_uid);
        let range = self.channels[&output_uid].recycling_range();
        self.apply_range(input_uid, range, false, &mut events);
        self.refresh_audio(input_audio, &mut events);

        Ok(events)
    }

    /// True if, walking downstream (through input links), `from` reaches
    /// `target`.
    fn reaches_downstream(&self, from: AudioUid, target: AudioUid) -> bool {
        let mut visited = Vec::default();
        let mut stack = vec![from];
        while let Some(audio_uid) = stack.pop() {
            if audio_uid == target {
                return true;
            }
            if visited.contains(&audio_uid) {
                continue;
            }
            visited.push(audio_uid);
            let Some(audio) = self.audios.get(&audio_uid) else {
                continue;
            };
            for input_uid in audio.channels(ChannelKind::Input) {
                if let Some(link) = self.channels.get(input_uid).and_then(|c| c.link) {
                    if let Some(linked) = self.channels.get(&link) {
                        stack.push(linked.audio);
                    }
                }
            }
        }
        false
    }

    fn clear_link_pair(&mut self, a: ChannelUid, b: ChannelUid, events: &mut Vec<TopologyEvent>) {
        if let Some(chan) = self.channels.get_mut(&a) {
            chan.link = None;
            events.push(TopologyEvent::LinkChanged {
                channel: a,
                link: None,
            });
        }
        if let Some(chan) = self.channels.get_mut(&b) {
            chan.link = None;
            events.push(TopologyEvent::LinkChanged {
                channel: b,
                link: None,
            });
        }
    }

    /// Restores an input channel that just lost its upstream source: a fresh
    /// owned recycling if its audio kind owns input recyclings, an empty
    /// range otherwise.
    fn reset_unlinked_input(&mut self, uid: ChannelUid, events: &mut Vec<TopologyEvent>) {
        let Some(channel) = self.channels.get(&uid) else {
            return;
        };
        let audio_uid = channel.audio;
        let owns = self
            .audios
            .get(&audio_uid)
            .map(|a| a.has_recycling(ChannelKind::Input))
            .unwrap_or_default();

        self.drop_owned_recyclings(uid);
        if owns {
            let recycling = self.recyclings.create(uid);
            self.apply_range(uid, Some((recycling, recycling)), true, events);
        } else {
            self.apply_range(uid, None, false, events);
        }
        self.refresh_audio(audio_uid, events);
    }

    /// Removes the recyclings a channel owns, if any. Borrowed ranges are
    /// left alone.
    fn drop_owned_recyclings(&mut self, uid: ChannelUid) {
        let Some(channel) = self.channels.get(&uid) else {
            return;
        };
        if !channel.owns_recycling {
            return;
        }
        if let Some((first, last)) = channel.recycling_range() {
            for r in self.recyclings.range_uids(first, last) {
                self.recyclings.remove(r);
            }
        }
    }

    /// Sets a channel's recycling range, emitting a change event if it
    /// actually changed.
    fn apply_range(
        &mut self,
        uid: ChannelUid,
        range: Option<(RecyclingUid, RecyclingUid)>,
        owns: bool,
        events: &mut Vec<TopologyEvent>,
    ) {
        let Some(channel) = self.channels.get_mut(&uid) else {
            return;
        };
        let old = channel.recycling_range();
        channel.owns_recycling = owns;
        channel.first_recycling = range.map(|(first, _)| first);
        channel.last_recycling = range.map(|(_, last)| last);
        if old != range {
            events.push(TopologyEvent::RecyclingChanged {
                channel: uid,
                old,
                new: range,
            });
        }
    }

    /// Recomputes the derived recycling state of one audio (async chain
    /// stitching across pads, pass-through output ranges) and then
    /// propagates upward through any output links. Audios whose outputs own
    /// their recyclings are propagation boundaries.
    fn refresh_audio(&mut self, uid: AudioUid, events: &mut Vec<TopologyEvent>) {
        let Some(audio) = self.audios.get(&uid) else {
            return;
        };
        let audio_channels = audio.audio_channels;
        let is_async = audio.is_async;
        let output_has_recycling = audio.output_has_recycling;
        let inputs: Vec<ChannelUid> = audio.input.clone();
        let outputs: Vec<ChannelUid> = audio.output.clone();

        for ac in 0..audio_channels {
            // Ranges of this column's inputs, in pad order.
            let column_ranges: Vec<(RecyclingUid, RecyclingUid)> = inputs
                .iter()
                .filter(|uid| {
                    self.channels
                        .get(uid)
                        .map(|c| c.audio_channel == ac)
                        .unwrap_or_default()
                })
                .filter_map(|uid| self.channels.get(uid).and_then(|c| c.recycling_range()))
                .collect();

            if is_async {
                // Stitch consecutive pads' ranges into one walkable chain.
                self.recyclings.stitch(None, column_ranges.first().map(|r| r.0));
                for pair in column_ranges.windows(2) {
                    self.recyclings.stitch(Some(pair[0].1), Some(pair[1].0));
                }
                self.recyclings.stitch(column_ranges.last().map(|r| r.1), None);
            }

            if output_has_recycling {
                continue;
            }

            // Pass-through outputs mirror their column's inputs.
            let derived = match (column_ranges.first(), column_ranges.last()) {
                (Some(first), Some(last)) => Some((first.0, last.1)),
                _ => None,
            };
            let column_outputs: Vec<ChannelUid> = outputs
                .iter()
                .filter(|uid| {
                    self.channels
                        .get(uid)
                        .map(|c| c.audio_channel == ac)
                        .unwrap_or_default()
                })
                .copied()
                .collect();
            for output_uid in column_outputs {
                if is_async {
                    self.apply_range(output_uid, derived, false, events);
                } else {
                    // Sync audios mirror line for line.
                    let Some(line) = self.channels.get(&output_uid).map(|c| c.line) else {
                        continue;
                    };
                    let range = inputs
                        .get(line)
                        .and_then(|uid| self.channels.get(uid))
                        .and_then(|c| c.recycling_range());
                    self.apply_range(output_uid, range, false, events);
                }
                // Push the new range across the output's link, if any.
                let Some(output) = self.channels.get(&output_uid) else {
                    continue;
                };
                if let Some(parent_input) = output.link {
                    let range = output.recycling_range();
                    let Some(parent_audio) =
                        self.channels.get(&parent_input).map(|c| c.audio)
                    else {
                        continue;
                    };
                    self.apply_range(parent_input, range, false, events);
                    self.refresh_audio(parent_audio, events);
                }
            }
        }
    }

    /// Changes the column count of one grid, preserving the channels that
    /// survive and renumbering lines pad-major under the new width.
    fn resize_columns(
        &mut self,
        uid: AudioUid,
        kind: ChannelKind,
        audio_channels: usize,
        events: &mut Vec<TopologyEvent>,
    ) {
        let Some(audio) = self.audios.get(&uid) else {
            return;
        };
        let old_columns = audio.audio_channels;
        let pads = audio.pads(kind);
        let owns = audio.has_recycling(kind);
        let old: Vec<ChannelUid> = audio.channels(kind).to_vec();

        let mut grid: Vec<ChannelUid> = Vec::with_capacity(pads * audio_channels);
        for pad in 0..pads {
            for ac in 0..audio_channels {
                let line = pad * audio_channels + ac;
                if ac < old_columns {
                    let channel_uid = old[pad * old_columns + ac];
                    let channel = self.channels.get_mut(&channel_uid).unwrap();
                    channel.line = line;
                    grid.push(channel_uid);
                } else {
                    grid.push(self.create_channel(uid, kind, pad, ac, line, owns, events));
                }
            }
            for ac in audio_channels..old_columns {
                self.destroy_channel(old[pad * old_columns + ac], events);
            }
        }

        let audio = self.audios.get_mut(&uid).unwrap();
        match kind {
            ChannelKind::Output => audio.output = grid,
            ChannelKind::Input => audio.input = grid,
        }
    }

    fn create_channel(
        &mut self,
        audio: AudioUid,
        kind: ChannelKind,
        pad: usize,
        audio_channel: usize,
        line: usize,
        owns: bool,
        events: &mut Vec<TopologyEvent>,
    ) -> ChannelUid {
        let channel_uid = self.channel_factory.mint_next();
        let mut channel = Channel::new(channel_uid, audio, kind, pad, audio_channel, line);
        if owns {
            let recycling = self.recyclings.create(channel_uid);
            channel.first_recycling = Some(recycling);
            channel.last_recycling = Some(recycling);
            channel.owns_recycling = true;
        }
        self.channels.insert(channel_uid, channel);
        events.push(TopologyEvent::ChannelAdded(channel_uid));
        channel_uid
    }

    fn rebuild_grid(
        &mut self,
        uid: AudioUid,
        kind: ChannelKind,
        pads: usize,
        events: &mut Vec<TopologyEvent>,
    ) {
        let Some(audio) = self.audios.get(&uid) else {
            return;
        };
        let audio_channels = audio.audio_channels;
        let owns = audio.has_recycling(kind);
        let old: Vec<ChannelUid> = audio.channels(kind).to_vec();
        let old_pads = audio.pads(kind);

        let keep = pads.min(old_pads) * audio_channels;
        let mut grid: Vec<ChannelUid> = old[..keep.min(old.len())].to_vec();

        // Destroy orphans.
        for &channel_uid in &old[keep.min(old.len())..] {
            self.destroy_channel(channel_uid, events);
        }

        // Create new rows.
        for pad in old_pads.min(pads)..pads {
            for ac in 0..audio_channels {
                let line = pad * audio_channels + ac;
                grid.push(self.create_channel(uid, kind, pad, ac, line, owns, events));
            }
        }

        let audio = self.audios.get_mut(&uid).unwrap();
        match kind {
            ChannelKind::Output => {
                audio.output = grid;
                audio.output_pads = pads;
            }
            ChannelKind::Input => {
                audio.input = grid;
                audio.input_pads = pads;
            }
        }
    }

    fn destroy_channel(&mut self, uid: ChannelUid, events: &mut Vec<TopologyEvent>) {
        if let Some(peer) = self.channels.get(&uid).and_then(|c| c.link) {
            // Unlink first so the peer's range gets reconciled.
            let kind = self.channels[&uid].kind;
            let input_uid = if kind == ChannelKind::Input { uid } else { peer };
            self.clear_link_pair(uid, peer, events);
            if input_uid != uid {
                self.reset_unlinked_input(input_uid, events);
            }
        }
        self.drop_owned_recyclings(uid);
        if let Some(channel) = self.channels.remove(&uid) {
            let mut recalls = channel.play;
            recalls.extend(channel.recall);
            events.push(TopologyEvent::ChannelRemoved {
                channel: uid,
                recalls,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer(topology: &mut Topology) -> AudioUid {
        let config = AudioConfigBuilder::default()
            .audio_channels(1)
            .output_pads(1)
            .input_pads(2)
            .build()
            .unwrap();
        topology.create_audio(&config).0
    }

    fn drum_machine(topology: &mut Topology) -> AudioUid {
        let config = AudioConfigBuilder::default()
            .audio_channels(1)
            .output_pads(1)
            .input_pads(4)
            .input_has_recycling(true)
            .is_async(true)
            .build()
            .unwrap();
        topology.create_audio(&config).0
    }

    #[test]
    fn grid_navigation_is_consistent() {
        let mut topology = Topology::default();
        let config = AudioConfigBuilder::default()
            .audio_channels(2)
            .output_pads(3)
            .input_pads(3)
            .build()
            .unwrap();
        let (audio_uid, _) = topology.create_audio(&config);
        let audio = topology.audio(audio_uid).unwrap();

        let c00 = audio.channel_at(ChannelKind::Output, 0, 0).unwrap();
        let c01 = audio.channel_at(ChannelKind::Output, 0, 1).unwrap();
        let c10 = audio.channel_at(ChannelKind::Output, 1, 0).unwrap();

        assert_eq!(topology.next(c00), Some(c01));
        assert_eq!(topology.prev(c01), Some(c00));
        assert_eq!(topology.next_pad(c00), Some(c10));
        assert_eq!(topology.prev_pad(c10), Some(c00));
        assert_eq!(topology.prev(c00), None);
        assert_eq!(topology.prev_pad(c00), None);

        assert_eq!(topology.channel(c10).unwrap().line(), 2);
    }

    #[test]
    fn link_symmetry() {
        let mut topology = Topology::default();
        let drums = drum_machine(&mut topology);
        let master = mixer(&mut topology);

        let drum_out = topology
            .audio(drums)
            .unwrap()
            .channel_at(ChannelKind::Output, 0, 0)
            .unwrap();
        let master_in = topology
            .audio(master)
            .unwrap()
            .channel_at(ChannelKind::Input, 0, 0)
            .unwrap();

        assert!(topology.set_link(master_in, Some(drum_out)).is_ok());
        assert_eq!(topology.channel(master_in).unwrap().link(), Some(drum_out));
        assert_eq!(topology.channel(drum_out).unwrap().link(), Some(master_in));

        assert!(topology.set_link(master_in, None).is_ok());
        assert_eq!(topology.channel(master_in).unwrap().link(), None);
        assert_eq!(
            topology.channel(drum_out).unwrap().link(),
            None,
            "clearing one side must clear the other"
        );
    }

    #[test]
    fn link_validation_leaves_state_untouched() {
        let mut topology = Topology::default();
        let drums = drum_machine(&mut topology);
        let master = mixer(&mut topology);

        let drum_out = topology
            .audio(drums)
            .unwrap()
            .channel_at(ChannelKind::Output, 0, 0)
            .unwrap();
        let drum_in = topology
            .audio(drums)
            .unwrap()
            .channel_at(ChannelKind::Input, 0, 0)
            .unwrap();
        let master_in_0 = topology
            .audio(master)
            .unwrap()
            .channel_at(ChannelKind::Input, 0, 0)
            .unwrap();
        let master_in_1 = topology
            .audio(master)
            .unwrap()
            .channel_at(ChannelKind::Input, 1, 0)
            .unwrap();

        assert_eq!(
            topology.set_link(drum_out, Some(drum_out)),
            Err(LinkError::SelfLink(drum_out))
        );
        assert_eq!(
            topology.set_link(drum_out, Some(drum_in)),
            Err(LinkError::SameAudio(drum_out, drum_in))
        );
        assert_eq!(
            topology.set_link(master_in_0, Some(master_in_1)),
            Err(LinkError::IncompatibleKinds(
                master_in_0,
                master_in_1,
                ChannelKind::Input
            )),
        );
        assert_eq!(topology.channel(drum_out).unwrap().link(), None);
        assert_eq!(topology.channel(master_in_0).unwrap().link(), None);
    }

    #[test]
    fn link_refuses_cycles() {
        let mut topology = Topology::default();
        let a = mixer(&mut topology);
        let b = mixer(&mut topology);

        let a_out = topology
            .audio(a)
            .unwrap()
            .channel_at(ChannelKind::Output, 0, 0)
            .unwrap();
        let a_in = topology
            .audio(a)
            .unwrap()
            .channel_at(ChannelKind::Input, 0, 0)
            .unwrap();
        let b_out = topology
            .audio(b)
            .unwrap()
            .channel_at(ChannelKind::Output, 0, 0)
            .unwrap();
        let b_in = topology
            .audio(b)
            .unwrap()
            .channel_at(ChannelKind::Input, 0, 0)
            .unwrap();

        assert!(topology.set_link(b_in, Some(a_out)).is_ok());
        assert!(matches!(
            topology.set_link(a_in, Some(b_out)),
            Err(LinkError::WouldCycle(_, _))
        ));
    }

    #[test]
    fn relinking_detaches_prior_peer() {
        let mut topology = Topology::default();
        let drums_1 = drum_machine(&mut topology);
        let drums_2 = drum_machine(&mut topology);
        let master = mixer(&mut topology);

        let out_1 = topology
            .audio(drums_1)
            .unwrap()
            .channel_at(ChannelKind::Output, 0, 0)
            .unwrap();
        let out_2 = topology
            .audio(drums_2)
            .unwrap()
            .channel_at(ChannelKind::Output, 0, 0)
            .unwrap();
        let master_in = topology
            .audio(master)
            .unwrap()
            .channel_at(ChannelKind::Input, 0, 0)
            .unwrap();

        assert!(topology.set_link(master_in, Some(out_1)).is_ok());
        assert!(topology.set_link(master_in, Some(out_2)).is_ok());
        assert_eq!(topology.channel(master_in).unwrap().link(), Some(out_2));
        assert_eq!(
            topology.channel(out_1).unwrap().link(),
            None,
            "replaced peer should be detached"
        );
    }

    #[test]
    fn drum_input_ranges_derive_to_output() {
        let mut topology = Topology::default();
        let drums = drum_machine(&mut topology);

        let audio = topology.audio(drums).unwrap();
        let input_0 = audio.channel_at(ChannelKind::Input, 0, 0).unwrap();
        let input_3 = audio.channel_at(ChannelKind::Input, 3, 0).unwrap();
        let output = audio.channel_at(ChannelKind::Output, 0, 0).unwrap();

        let first = topology.channel(input_0).unwrap().first_recycling().unwrap();
        let last = topology.channel(input_3).unwrap().last_recycling().unwrap();

        let output_channel = topology.channel(output).unwrap();
        assert_eq!(
            output_channel.recycling_range(),
            Some((first, last)),
            "async pass-through output should span all input pads"
        );
        assert_eq!(
            topology.recyclings.range_uids(first, last).len(),
            4,
            "pad ranges should be stitched into one chain"
        );
    }

    #[test]
    fn unlinking_restores_owned_recycling() {
        let mut topology = Topology::default();
        let drums = drum_machine(&mut topology);
        let master = mixer(&mut topology);

        let drum_out = topology
            .audio(drums)
            .unwrap()
            .channel_at(ChannelKind::Output, 0, 0)
            .unwrap();
        let master_in = topology
            .audio(master)
            .unwrap()
            .channel_at(ChannelKind::Input, 0, 0)
            .unwrap();

        assert!(topology.channel(master_in).unwrap().recycling_range().is_none());
        assert!(topology.set_link(master_in, Some(drum_out)).is_ok());
        assert_eq!(
            topology.channel(master_in).unwrap().recycling_range(),
            topology.channel(drum_out).unwrap().recycling_range(),
            "linked input should adopt the output's range"
        );

        assert!(topology.set_link(master_in, None).is_ok());
        assert!(
            topology.channel(master_in).unwrap().recycling_range().is_none(),
            "a mixer input has no range of its own after unlinking"
        );
    }

    #[test]
    fn shrinking_pads_destroys_channels() {
        let mut topology = Topology::default();
        let drums = drum_machine(&mut topology);

        let events = topology
            .set_pads(drums, ChannelKind::Input, 2)
            .unwrap();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, TopologyEvent::ChannelRemoved { .. }))
                .count(),
            2
        );
        assert_eq!(topology.audio(drums).unwrap().lines(ChannelKind::Input), 2);

        let audio = topology.audio(drums).unwrap();
        let input_0 = audio.channel_at(ChannelKind::Input, 0, 0).unwrap();
        let input_1 = audio.channel_at(ChannelKind::Input, 1, 0).unwrap();
        let output = audio.channel_at(ChannelKind::Output, 0, 0).unwrap();
        let first = topology.channel(input_0).unwrap().first_recycling().unwrap();
        let last = topology.channel(input_1).unwrap().last_recycling().unwrap();
        assert_eq!(
            topology.channel(output).unwrap().recycling_range(),
            Some((first, last)),
            "derived output range should shrink with the pads"
        );
    }
}
