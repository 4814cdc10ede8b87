// Copyright (c) 2024 Mike Tsao

use crate::{
    prelude::*,
    recall::{GroupId, RecallUid},
    topology::{AudioUid, ChannelUid},
};
use strum_macros::Display;

/// What a play-list entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub enum PlayScope {
    /// A single recall, run directly.
    Recall(RecallUid),
    /// A channel, run via recursive traversal.
    Channel(ChannelUid),
    /// A whole audio, run via each of its output channels.
    Audio(AudioUid),
}

/// One unit of per-tic work: a source to run and the pass it belongs to. An
/// entry flagged `remove` is evicted only during the between-tics drain
/// step, never while the lists are being walked.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayEntry {
    #[allow(missing_docs)]
    pub scope: PlayScope,
    #[allow(missing_docs)]
    pub group_id: GroupId,
    #[allow(missing_docs)]
    pub remove: bool,
}
impl PlayEntry {
    /// Creates an entry for the given source and pass.
    pub fn new_with(scope: PlayScope, group_id: GroupId) -> Self {
        Self {
            scope,
            group_id,
            remove: false,
        }
    }
}

/// One period's worth of output: one plane of samples per device channel.
#[derive(Debug, Clone, Default)]
pub struct DeviceBuffer {
    planes: Vec<GenerationBuffer<Sample>>,
}
impl DeviceBuffer {
    /// Creates a buffer with the given channel count and period size.
    pub fn new_with(channels: usize, buffer_size: BufferSize) -> Self {
        Self {
            planes: vec![GenerationBuffer::new_with(buffer_size.0); channels],
        }
    }

    /// Silences every plane.
    pub fn clear(&mut self) {
        for plane in &mut self.planes {
            plane.clear();
        }
    }

    #[allow(missing_docs)]
    pub fn planes(&self) -> &[GenerationBuffer<Sample>] {
        &self.planes
    }

    #[allow(missing_docs)]
    pub fn planes_mut(&mut self) -> &mut [GenerationBuffer<Sample>] {
        &mut self.planes
    }

    /// The frame-interleaved form the device consumes.
    pub fn interleaved(&self) -> Vec<Sample> {
        let channels = self.planes.len();
        let frames = self.planes.first().map(|p| p.buffer_size()).unwrap_or_default();
        let mut samples = vec![0.0; channels * frames];
        for (c, plane) in self.planes.iter().enumerate() {
            for (i, sample) in plane.buffer().iter().enumerate() {
                samples[i * channels + c] = *sample;
            }
        }
        samples
    }
}

/// Per-tic sample offsets. Tics rarely land exactly on period boundaries;
/// the attack records where, within the period, the current tic begins, so
/// signals triggered this tic can start sample-accurately.
#[derive(Debug, Clone)]
pub struct Attack {
    /// Offset of the tic boundary in the current period.
    pub first_start: usize,
    /// Frames from the boundary to the end of the period.
    pub first_length: usize,
    /// Offset used once the boundary has wrapped.
    pub second_start: usize,
    /// Frames belonging to the wrapped portion.
    pub second_length: usize,
}
impl Attack {
    /// Builds a table for a tic boundary at `offset` within a period.
    pub fn alloc(offset: usize, buffer_size: BufferSize) -> Self {
        let offset = offset.min(buffer_size.0);
        Self {
            first_start: offset,
            first_length: buffer_size.0 - offset,
            second_start: 0,
            second_length: offset,
        }
    }
}

/// The realtime sink: device parameters, the flip buffers the producer
/// cycles through, the attack table, and the three work lists enumerating
/// what must be serviced each tic.
#[derive(Debug)]
pub struct Devout {
    sample_rate: SampleRate,
    buffer_size: BufferSize,
    dsp_channels: usize,
    tempo: Tempo,
    tic_unit: TicUnit,

    buffers: Vec<DeviceBuffer>,
    current: usize,

    attack: Attack,
    attack_first: bool,
    delay: usize,
    delay_counter: usize,

    playing: bool,

    /// Entries run directly as recalls.
    pub play_recall: Vec<PlayEntry>,
    /// Entries run via channel traversal.
    pub play_channel: Vec<PlayEntry>,
    /// Entries run via each output channel of an audio.
    pub play_audio: Vec<PlayEntry>,
}
impl Devout {
    /// The number of flip buffers the producer cycles through.
    pub const FLIP_BUFFER_COUNT: usize = 4;

    /// Creates a [Devout] for the given device shape.
    pub fn new_with(sample_rate: SampleRate, buffer_size: BufferSize, dsp_channels: usize) -> Self {
        let mut r = Self {
            sample_rate,
            buffer_size,
            dsp_channels,
            tempo: Default::default(),
            tic_unit: Default::default(),
            buffers: vec![
                DeviceBuffer::new_with(dsp_channels, buffer_size);
                Self::FLIP_BUFFER_COUNT
            ],
            current: 0,
            attack: Attack::alloc(0, buffer_size),
            attack_first: true,
            delay: 1,
            delay_counter: 0,
            playing: false,
            play_recall: Default::default(),
            play_channel: Default::default(),
            play_audio: Default::default(),
        };
        r.recompute_delay();
        r
    }

    #[allow(missing_docs)]
    pub fn dsp_channels(&self) -> usize {
        self.dsp_channels
    }

    /// The flip buffer currently being filled.
    pub fn current_buffer_mut(&mut self) -> &mut DeviceBuffer {
        &mut self.buffers[self.current]
    }

    #[allow(missing_docs)]
    pub fn current_buffer(&self) -> &DeviceBuffer {
        &self.buffers[self.current]
    }

    /// Rotates to the next flip buffer.
    pub fn switch_buffer(&mut self) {
        self.current = (self.current + 1) % self.buffers.len();
    }

    /// The most recently completed flip buffer.
    pub fn previous_buffer(&self) -> &DeviceBuffer {
        let count = self.buffers.len();
        &self.buffers[(self.current + count - 1) % count]
    }

    /// The sample offset at which signals triggered this tic begin.
    pub fn attack_offset(&self) -> usize {
        if self.attack_first {
            self.attack.first_start
        } else {
            self.attack.second_start
        }
    }

    /// Counts one period against the engine-level tic interval and flips
    /// the attack phase on each rollover.
    pub fn advance_attack(&mut self) {
        self.delay_counter += 1;
        if self.delay_counter >= self.delay.max(1) {
            self.attack_first = !self.attack_first;
            self.delay_counter = 0;
        }
    }

    #[allow(missing_docs)]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    #[allow(missing_docs)]
    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    /// Appends a play entry to the list matching its scope.
    pub fn append(&mut self, entry: PlayEntry) {
        match entry.scope {
            PlayScope::Recall(_) => self.play_recall.push(entry),
            PlayScope::Channel(_) => self.play_channel.push(entry),
            PlayScope::Audio(_) => self.play_audio.push(entry),
        }
        self.playing = true;
    }

    /// Evicts entries flagged `remove`. Called only from the between-tics
    /// drain step so in-flight list walks stay stable.
    pub fn evict_removed(&mut self) {
        self.play_recall.retain(|entry| !entry.remove);
        self.play_channel.retain(|entry| !entry.remove);
        self.play_audio.retain(|entry| !entry.remove);
        if self.play_recall.is_empty()
            && self.play_channel.is_empty()
            && self.play_audio.is_empty()
        {
            self.playing = false;
        }
    }

    /// Every live entry, across all three lists.
    pub fn entries(&self) -> impl Iterator<Item = &PlayEntry> {
        self.play_recall
            .iter()
            .chain(self.play_channel.iter())
            .chain(self.play_audio.iter())
    }

    fn recompute_delay(&mut self) {
        self.delay = crate::sequencer::delay_periods(
            self.sample_rate,
            self.buffer_size,
            self.tempo,
            self.tic_unit,
        );
    }
}
impl Configurable for Devout {
    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn update_sample_rate(&mut self, sample_rate: SampleRate) {
        self.sample_rate = sample_rate;
        self.recompute_delay();
    }

    fn tempo(&self) -> Tempo {
        self.tempo
    }

    fn update_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo;
        self.recompute_delay();
    }

    fn buffer_size(&self) -> BufferSize {
        self.buffer_size
    }

    fn update_buffer_size(&mut self, buffer_size: BufferSize) {
        self.buffer_size = buffer_size;
        self.buffers = vec![
            DeviceBuffer::new_with(self.dsp_channels, buffer_size);
            Self::FLIP_BUFFER_COUNT
        ];
        self.attack = Attack::alloc(0, buffer_size);
        self.recompute_delay();
    }

    fn tic_unit(&self) -> TicUnit {
        self.tic_unit
    }

    fn update_tic_unit(&mut self, tic_unit: TicUnit) {
        self.tic_unit = tic_unit;
        self.recompute_delay();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_buffers_rotate() {
        let mut devout = Devout::new_with(SampleRate::DEFAULT, BufferSize::new(8), 2);
        for _ in 0..Devout::FLIP_BUFFER_COUNT {
            devout.switch_buffer();
        }
        assert_eq!(
            devout.current, 0,
            "a full rotation should return to the first buffer"
        );
    }

    #[test]
    fn interleaving() {
        let mut buffer = DeviceBuffer::new_with(2, BufferSize::new(2));
        buffer.planes_mut()[0].buffer_mut().copy_from_slice(&[0.1, 0.2]);
        buffer.planes_mut()[1].buffer_mut().copy_from_slice(&[0.3, 0.4]);
        assert_eq!(buffer.interleaved(), vec![0.1, 0.3, 0.2, 0.4]);
    }

    #[test]
    fn eviction_only_removes_flagged_entries() {
        let mut devout = Devout::new_with(SampleRate::DEFAULT, BufferSize::DEFAULT, 2);
        devout.append(PlayEntry::new_with(
            PlayScope::Audio(AudioUid(1)),
            GroupId(1),
        ));
        devout.append(PlayEntry::new_with(
            PlayScope::Audio(AudioUid(2)),
            GroupId(2),
        ));
        devout.play_audio[0].remove = true;

        devout.evict_removed();
        assert_eq!(devout.play_audio.len(), 1);
        assert!(devout.is_playing());

        devout.play_audio[0].remove = true;
        devout.evict_removed();
        assert!(
            !devout.is_playing(),
            "emptying the lists should stop playback"
        );
    }

    #[test]
    fn attack_table_partitions_the_period() {
        let attack = Attack::alloc(100, BufferSize::new(512));
        assert_eq!(attack.first_start, 100);
        assert_eq!(attack.first_length, 412);
        assert_eq!(attack.second_start, 0);
        assert_eq!(attack.second_length, 100);
    }
}
