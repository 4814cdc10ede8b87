// Copyright (c) 2024 Mike Tsao

use super::{
    devout::{Devout, PlayEntry, PlayScope},
    playback,
    tasks::Task,
};
use crate::{
    prelude::*,
    recall::{id, GroupId, RecallFlags, RecallKind, RecallScope, RecallUid, RunStage},
    sequencer::{
        CopyPatternAudio, CopyPatternAudioRun, CopyPatternChannel, CopyPatternChannelRun,
        DelayAudio, DelayAudioRun, PatternBuilder,
    },
    topology::{AudioUid, ChannelKind, ChannelUid, Topology, TopologyEvent},
    types::UidFactory,
    util::CrossbeamChannel,
};
use anyhow::anyhow;
use crossbeam::channel::Sender;

/// The whole engine, explicitly owned: topology, recall arena, realtime
/// sink, group-id factory, and task queue. There are no globals; construct
/// one of these at startup, hand it to a [DevoutService](super::DevoutService)
/// for live use, or drive [EngineContext::run_tic] yourself for offline
/// rendering and tests.
#[derive(Debug)]
pub struct EngineContext {
    /// The audio/channel graph.
    pub topology: Topology,
    /// The recall arena.
    pub recalls: crate::recall::RecallRepository,
    /// The realtime sink state.
    pub devout: Devout,
    group_ids: UidFactory<GroupId>,
    tasks: CrossbeamChannel<Task>,
}
impl Default for EngineContext {
    fn default() -> Self {
        Self::new_with(SampleRate::DEFAULT, BufferSize::DEFAULT, 2)
    }
}
impl EngineContext {
    /// Creates an engine for the given device shape.
    pub fn new_with(sample_rate: SampleRate, buffer_size: BufferSize, dsp_channels: usize) -> Self {
        let mut topology = Topology::default();
        topology.recyclings.set_buffer_size(buffer_size);
        Self {
            topology,
            recalls: Default::default(),
            devout: Devout::new_with(sample_rate, buffer_size, dsp_channels),
            group_ids: UidFactory::new(1),
            tasks: Default::default(),
        }
    }

    /// A handle non-realtime threads use to request mutations. Tasks are
    /// applied in FIFO order between tics.
    pub fn task_sender(&self) -> Sender<Task> {
        self.tasks.sender.clone()
    }

    /// Allocates a fresh, process-unique group id.
    pub fn generate_group_id(&self) -> GroupId {
        self.group_ids.mint_next()
    }

    /// Installs the step-sequencer recall family on an audio: shared data
    /// recalls (tempo state, bank selection, one pattern per input channel)
    /// plus run templates in both the live and background lists.
    pub fn install_pattern_sequencer(
        &mut self,
        audio: AudioUid,
        banks: usize,
        subs: usize,
        length: usize,
        looping: bool,
    ) -> anyhow::Result<()> {
        let Some(audio_ref) = self.topology.audio(audio) else {
            return Err(anyhow!("unknown audio {audio}"));
        };
        let inputs: Vec<ChannelUid> = audio_ref.channels(ChannelKind::Input).to_vec();

        // Shared data recalls. Referenced by uid from both template
        // families, so the pattern and tempo state exist exactly once.
        let mut delay_audio = DelayAudio::default();
        delay_audio.update_sample_rate(self.devout.sample_rate());
        delay_audio.update_buffer_size(self.devout.buffer_size());
        delay_audio.update_tempo(self.devout.tempo());
        delay_audio.update_tic_unit(self.devout.tic_unit());
        let delay_audio = self.recalls.create(
            RecallScope::Audio(audio),
            RecallFlags::template(),
            RecallKind::DelayAudio(delay_audio),
        );
        let copy_pattern_audio = self.recalls.create(
            RecallScope::Audio(audio),
            RecallFlags::template(),
            RecallKind::CopyPatternAudio(CopyPatternAudio::new_with(0, 0, looping, length)),
        );
        let mut channel_data = Vec::default();
        for input in &inputs {
            let pattern = PatternBuilder::default()
                .banks(banks)
                .subs(subs)
                .length(length)
                .build()?;
            channel_data.push((
                *input,
                self.recalls.create(
                    RecallScope::Channel(*input),
                    RecallFlags::template(),
                    RecallKind::CopyPatternChannel(CopyPatternChannel::new_with(*input, pattern)),
                ),
            ));
        }
        if let Some(audio_ref) = self.topology.audio_mut(audio) {
            audio_ref.play.push(delay_audio);
            audio_ref.play.push(copy_pattern_audio);
        }
        for (input, data) in &channel_data {
            if let Some(channel) = self.topology.channel_mut(*input) {
                channel.play.push(*data);
            }
        }

        // Run templates, one family per pass list.
        for background in [false, true] {
            let template = RecallFlags {
                template: true,
                persistent: true,
                ..Default::default()
            };
            // The delay run is not persistent: it stops itself exactly when
            // its dependency count says nobody needs tics anymore.
            let delay_run = self.recalls.create(
                RecallScope::Audio(audio),
                RecallFlags::template(),
                RecallKind::DelayAudioRun(DelayAudioRun::new_with(delay_audio)),
            );
            let audio_run = self.recalls.create(
                RecallScope::Audio(audio),
                template,
                RecallKind::CopyPatternAudioRun(CopyPatternAudioRun::new_with(copy_pattern_audio)),
            );
            if let Some(audio_ref) = self.topology.audio_mut(audio) {
                let list = if background {
                    &mut audio_ref.recall
                } else {
                    &mut audio_ref.play
                };
                list.push(delay_run);
                list.push(audio_run);
            }
            for (input, data) in &channel_data {
                let worker = self.recalls.create(
                    RecallScope::Channel(*input),
                    template,
                    RecallKind::CopyPatternChannelRun(CopyPatternChannelRun::new_with(
                        *data,
                        copy_pattern_audio,
                    )),
                );
                if let Some(channel) = self.topology.channel_mut(*input) {
                    let list = if background {
                        &mut channel.recall
                    } else {
                        &mut channel.play
                    };
                    list.push(worker);
                }
            }
        }
        Ok(())
    }

    /// Installs playback recalls (gain, then device mixing) on each output
    /// channel of an audio, in both pass lists.
    pub fn install_playback(&mut self, audio: AudioUid) -> anyhow::Result<()> {
        let Some(audio_ref) = self.topology.audio(audio) else {
            return Err(anyhow!("unknown audio {audio}"));
        };
        let outputs: Vec<ChannelUid> = audio_ref.channels(ChannelKind::Output).to_vec();
        for background in [false, true] {
            for output in &outputs {
                let template = RecallFlags {
                    template: true,
                    persistent: true,
                    ..Default::default()
                };
                let volume = self.recalls.create(
                    RecallScope::Channel(*output),
                    template,
                    RecallKind::VolumeChannelRun(crate::recall::VolumeChannelRun {
                        source: *output,
                        volume: 1.0,
                    }),
                );
                let play = self.recalls.create(
                    RecallScope::Channel(*output),
                    template,
                    RecallKind::PlayChannelRun(crate::recall::PlayChannelRun { source: *output }),
                );
                if let Some(channel) = self.topology.channel_mut(*output) {
                    let list = if background {
                        &mut channel.recall
                    } else {
                        &mut channel.play
                    };
                    // List order is run order: gain first, then the mix to
                    // the device.
                    list.push(volume);
                    list.push(play);
                }
            }
        }
        Ok(())
    }

    /// Reads one pattern bit of the step sequencer installed on `channel`.
    pub fn pattern_bit(
        &self,
        channel: ChannelUid,
        i: usize,
        j: usize,
        step: usize,
    ) -> anyhow::Result<bool> {
        let data = self
            .find_pattern_data(channel)
            .ok_or_else(|| anyhow!("channel {channel} has no step sequencer"))?;
        match self.recalls.get(data).map(|r| r.kind()) {
            Some(RecallKind::CopyPatternChannel(data)) => Ok(data.pattern.get_bit(i, j, step)?),
            _ => Err(anyhow!("channel {channel} has no step sequencer")),
        }
    }

    /// Flips one pattern bit of the step sequencer installed on `channel`,
    /// returning the new value.
    pub fn toggle_pattern_bit(
        &mut self,
        channel: ChannelUid,
        i: usize,
        j: usize,
        step: usize,
    ) -> anyhow::Result<bool> {
        let data = self
            .find_pattern_data(channel)
            .ok_or_else(|| anyhow!("channel {channel} has no step sequencer"))?;
        match self.recalls.get_mut(data).map(|r| r.kind_mut()) {
            Some(RecallKind::CopyPatternChannel(data)) => Ok(data.pattern.toggle_bit(i, j, step)?),
            _ => Err(anyhow!("channel {channel} has no step sequencer")),
        }
    }

    fn find_pattern_data(&self, channel: ChannelUid) -> Option<RecallUid> {
        let list = self.topology.channel(channel)?.recalls(false);
        self.recalls.find_template(list, |kind| {
            matches!(kind, RecallKind::CopyPatternChannel(_))
        })
    }

    /// Starts a playback pass from one channel. Returns the pass's group
    /// id.
    pub fn start_channel(
        &mut self,
        channel: ChannelUid,
        background: bool,
    ) -> anyhow::Result<GroupId> {
        if self.topology.channel(channel).is_none() {
            return Err(anyhow!("unknown channel {channel}"));
        }
        let (group_id, targets) =
            playback::arrange_pass(&mut self.topology, &self.group_ids, channel, background);
        playback::duplicate_pass(&mut self.topology, &mut self.recalls, &targets, background);
        self.devout
            .append(PlayEntry::new_with(PlayScope::Channel(channel), group_id));
        Ok(group_id)
    }

    /// Starts a playback pass over a whole audio: one group id shared by
    /// every output channel. Returns the pass's group id.
    pub fn start_audio(&mut self, audio: AudioUid) -> anyhow::Result<GroupId> {
        let Some(audio_ref) = self.topology.audio(audio) else {
            return Err(anyhow!("unknown audio {audio}"));
        };
        let outputs: Vec<ChannelUid> = audio_ref.channels(ChannelKind::Output).to_vec();
        if outputs.is_empty() {
            return Err(anyhow!("audio {audio} has no output channels"));
        }

        let mut merged = playback::PassTargets::default();
        let mut group_id = None;
        for output in &outputs {
            let (group, targets) = if let Some(group) = group_id {
                playback::arrange_pass_with(
                    &mut self.topology,
                    &self.group_ids,
                    *output,
                    false,
                    group,
                )
            } else {
                let (group, targets) = playback::arrange_pass(
                    &mut self.topology,
                    &self.group_ids,
                    *output,
                    false,
                );
                (group, targets)
            };
            group_id = Some(group);
            merged.merge(targets);
        }
        let group_id = group_id.unwrap();
        playback::duplicate_pass(&mut self.topology, &mut self.recalls, &merged, false);
        self.devout
            .append(PlayEntry::new_with(PlayScope::Audio(audio), group_id));
        Ok(group_id)
    }

    /// Cancels a running pass. Cancellation is graceful: every instance
    /// routes through done so dependency counts stay balanced, and the play
    /// entry is evicted at the next drain.
    pub fn cancel_group(&mut self, group_id: GroupId) {
        for uid in self.recalls.instances_of_group(group_id) {
            self.recalls.cancel(uid);
        }
    }

    /// Applies one task immediately. Used by the drain step; non-realtime
    /// callers should send through [EngineContext::task_sender] instead.
    pub fn apply_task(&mut self, task: Task) -> anyhow::Result<()> {
        match task {
            Task::SetLink { channel, link } => {
                let events = self.topology.set_link(channel, link)?;
                self.process_topology_events(events);
            }
            Task::SetAudioChannels {
                audio,
                audio_channels,
            } => {
                let events = self.topology.set_audio_channels(audio, audio_channels)?;
                self.process_topology_events(events);
            }
            Task::SetPads { audio, kind, pads } => {
                let events = self.topology.set_pads(audio, kind, pads)?;
                self.process_topology_events(events);
            }
            Task::TogglePatternBit { channel, i, j, step } => {
                self.toggle_pattern_bit(channel, i, j, step)?;
            }
            Task::SetTempo(tempo) => self.set_tempo(tempo),
            Task::SetTicUnit(tic_unit) => self.set_tic_unit(tic_unit),
            Task::StartAudio { audio } => {
                self.start_audio(audio)?;
            }
            Task::StartChannel {
                channel,
                background,
            } => {
                self.start_channel(channel, background)?;
            }
            Task::CancelGroup { group_id } => self.cancel_group(group_id),
            Task::Stop => self.devout.set_playing(false),
        }
        Ok(())
    }

    /// Changes the master tempo. Only future tic intervals are affected;
    /// counters in flight keep their phase.
    pub fn set_tempo(&mut self, tempo: Tempo) {
        self.devout.update_tempo(tempo);
        self.for_each_delay_audio(|delay_audio| delay_audio.update_tempo(tempo));
    }

    /// Changes the zoom-derived tic resolution.
    pub fn set_tic_unit(&mut self, tic_unit: TicUnit) {
        self.devout.update_tic_unit(tic_unit);
        self.for_each_delay_audio(|delay_audio| delay_audio.update_tic_unit(tic_unit));
    }

    fn for_each_delay_audio(&mut self, f: impl Fn(&mut DelayAudio)) {
        for uid in self.recalls.uids() {
            if let Some(RecallKind::DelayAudio(delay_audio)) =
                self.recalls.get_mut(uid).map(|r| r.kind_mut())
            {
                f(delay_audio);
            }
        }
    }

    fn process_topology_events(&mut self, events: Vec<TopologyEvent>) {
        for event in events {
            match event {
                TopologyEvent::ChannelRemoved { recalls, .. } => {
                    self.recalls.purge(&recalls);
                }
                TopologyEvent::RecyclingChanged { channel, old, new } => {
                    // Re-window any pass that was scoped to the range that
                    // just moved, both on the channel's id list and on the
                    // instances' own copies. Unscoped passes (region None)
                    // follow the channel range automatically and need no
                    // rewrite.
                    if old.is_some() {
                        if let Some(channel) = self.topology.channel_mut(channel) {
                            for recall_id in &mut channel.recall_ids {
                                if recall_id.region == old {
                                    recall_id.region = new;
                                }
                            }
                        }
                        self.recalls.rewindow(old, new);
                    }
                }
                _ => {}
            }
        }
    }

    /// Drains and applies queued tasks in FIFO submission order, sweeps
    /// finished passes, and evicts removable play entries. This is the only
    /// point where the lists change shape. Returns descriptions of tasks
    /// that failed to apply; failures are logged and dropped, never left in
    /// the queue.
    pub fn drain_tasks(&mut self) -> Vec<String> {
        let mut failures = Vec::default();
        while let Ok(task) = self.tasks.receiver.try_recv() {
            if let Err(e) = self.apply_task(task.clone()) {
                log::warn!("dropping failed task {task}: {e}");
                failures.push(format!("{task}: {e}"));
            }
        }
        self.sweep_finished_passes();
        self.devout.evict_removed();
        failures
    }

    /// Marks entries whose pass has no live tempo driver left, cleans up
    /// the pass's remains, and lets the eviction step drop them.
    fn sweep_finished_passes(&mut self) {
        let groups: Vec<GroupId> = self.devout.entries().map(|e| e.group_id).collect();
        for group_id in groups {
            if self.recalls.group_has_live_driver(group_id) {
                continue;
            }
            // The driver stopped: wind down whatever is left of the pass.
            let leftovers = self.recalls.instances_of_group(group_id);
            for uid in &leftovers {
                self.recalls.cancel(*uid);
            }
            // Children first, then parents.
            for uid in &leftovers {
                self.recalls.child_check_remove(*uid);
            }
            for uid in &leftovers {
                self.recalls.remove(*uid);
            }
            self.compact_recall_lists();
            for channel in self.topology.channels.values_mut() {
                id::remove_group(&mut channel.recall_ids, group_id);
            }
            for audio in self.topology.audios.values_mut() {
                id::remove_group(&mut audio.recall_ids, group_id);
            }
            for entry in self
                .devout
                .play_recall
                .iter_mut()
                .chain(self.devout.play_channel.iter_mut())
                .chain(self.devout.play_audio.iter_mut())
            {
                if entry.group_id == group_id {
                    entry.remove = true;
                }
            }
        }
    }

    fn compact_recall_lists(&mut self) {
        let recalls = &self.recalls;
        for channel in self.topology.channels.values_mut() {
            channel.play.retain(|uid| recalls.get(*uid).is_some());
            channel.recall.retain(|uid| recalls.get(*uid).is_some());
        }
        for audio in self.topology.audios.values_mut() {
            audio.play.retain(|uid| recalls.get(*uid).is_some());
            audio.recall.retain(|uid| recalls.get(*uid).is_some());
        }
    }

    /// Produces one device period: drains tasks, runs the three play lists
    /// through the pre/inter/post stages, advances the attack phase, and
    /// flips buffers. The freshly produced period is then available as
    /// [EngineContext::last_period]. Returns descriptions of any tasks that
    /// failed during the drain.
    pub fn run_tic(&mut self) -> Vec<String> {
        let failures = self.drain_tasks();

        let EngineContext {
            topology,
            recalls,
            devout,
            ..
        } = self;

        let entries_recall = devout.play_recall.clone();
        let entries_channel = devout.play_channel.clone();
        let entries_audio = devout.play_audio.clone();
        let attack = devout.attack_offset();

        let audio_outputs: Vec<(GroupId, Vec<ChannelUid>)> = entries_audio
            .iter()
            .filter_map(|entry| match entry.scope {
                PlayScope::Audio(audio) => topology
                    .audio(audio)
                    .map(|a| (entry.group_id, a.channels(ChannelKind::Output).to_vec())),
                _ => None,
            })
            .collect();

        {
            let buffer = devout.current_buffer_mut();
            buffer.clear();
            let planes = buffer.planes_mut();

            for stage in RunStage::ALL {
                for entry in &entries_recall {
                    let PlayScope::Recall(uid) = entry.scope else {
                        continue;
                    };
                    let mut ctx = crate::recall::RunContext {
                        topology: &mut *topology,
                        output: &mut *planes,
                        attack,
                    };
                    recalls.run_stage(&mut ctx, uid, stage, 0);
                    recalls.check_cancel(uid);
                    recalls.child_check_remove(uid);
                }
            }

            for stage in RunStage::ALL {
                for entry in &entries_channel {
                    let PlayScope::Channel(channel) = entry.scope else {
                        continue;
                    };
                    playback::recursive_play(
                        topology,
                        recalls,
                        &mut *planes,
                        attack,
                        channel,
                        entry.group_id,
                        stage,
                    );
                }
            }

            for stage in RunStage::ALL {
                for (group_id, outputs) in &audio_outputs {
                    for output in outputs {
                        playback::recursive_play(
                            topology,
                            recalls,
                            &mut *planes,
                            attack,
                            *output,
                            *group_id,
                            stage,
                        );
                    }
                }
            }
        }

        devout.advance_attack();
        devout.switch_buffer();
        failures
    }

    /// The frame-interleaved samples of the most recently produced period.
    pub fn last_period(&self) -> Vec<Sample> {
        self.devout.previous_buffer().interleaved()
    }
}
