// Copyright (c) 2024 Mike Tsao

//! Turning a static template graph into a live, per-invocation instance
//! graph, and walking that graph every tic.
//!
//! A playback pass begins with an *arrange* walk that assigns a coherent
//! group-id lineage to every channel and audio the pass can reach, then a
//! *duplicate* walk that instantiates every reachable template under those
//! ids, wires instances to their same-group peers, and run-initializes
//! them. From then on the per-tic *recursive play* walk runs each level
//! against the recall id it was assigned.
//!
//! A pass lives entirely in one list family: the live ("play") lists or the
//! background ("recall") lists, chosen at start and recorded on every
//! [RecallId] the pass hands out.

use crate::{
    buffer::RecyclingUid,
    recall::{
        id, GroupId, RecallId, RecallRepository, RecallScope, RecallUid, RunContext, RunStage,
    },
    topology::{AudioUid, ChannelKind, ChannelUid, Topology},
    traits::GenerationBuffer,
    types::{Sample, UidFactory},
};
use rustc_hash::FxHashMap;

/// The channels and audios one pass reaches, each with the [RecallId] it
/// was assigned during the arrange walk.
#[derive(Debug, Default)]
pub(crate) struct PassTargets {
    pub(crate) channels: Vec<(ChannelUid, RecallId)>,
    pub(crate) audios: Vec<(AudioUid, RecallId)>,
}
impl PassTargets {
    fn record_channel(&mut self, topology: &mut Topology, uid: ChannelUid, recall_id: RecallId) {
        if let Some(channel) = topology.channel_mut(uid) {
            id::add(&mut channel.recall_ids, recall_id.clone());
        }
        if !self
            .channels
            .iter()
            .any(|(c, r)| *c == uid && r.group_id == recall_id.group_id)
        {
            self.channels.push((uid, recall_id));
        }
    }

    fn record_audio(&mut self, topology: &mut Topology, uid: AudioUid, recall_id: RecallId) {
        if let Some(audio) = topology.audio_mut(uid) {
            id::add(&mut audio.recall_ids, recall_id.clone());
        }
        if !self
            .audios
            .iter()
            .any(|(a, r)| *a == uid && r.group_id == recall_id.group_id)
        {
            self.audios.push((uid, recall_id));
        }
    }

    /// Folds another walk's targets into this one, skipping duplicates.
    pub(crate) fn merge(&mut self, other: PassTargets) {
        for (uid, recall_id) in other.channels {
            if !self
                .channels
                .iter()
                .any(|(c, r)| *c == uid && r.group_id == recall_id.group_id)
            {
                self.channels.push((uid, recall_id));
            }
        }
        for (uid, recall_id) in other.audios {
            if !self
                .audios
                .iter()
                .any(|(a, r)| *a == uid && r.group_id == recall_id.group_id)
            {
                self.audios.push((uid, recall_id));
            }
        }
    }
}

/// Assigns a fresh, process-unique group-id lineage to every channel that
/// participates in a pass starting at `start`. Returns the pass's top-level
/// group id and the visited targets.
pub(crate) fn arrange_pass(
    topology: &mut Topology,
    group_ids: &UidFactory<GroupId>,
    start: ChannelUid,
    background: bool,
) -> (GroupId, PassTargets) {
    let group_id = group_ids.mint_next();
    arrange_pass_with(topology, group_ids, start, background, group_id)
}

/// Like [arrange_pass], but reuses a caller-supplied group id so several
/// walks (one per output channel of an audio) can form a single pass.
pub(crate) fn arrange_pass_with(
    topology: &mut Topology,
    group_ids: &UidFactory<GroupId>,
    start: ChannelUid,
    background: bool,
    group_id: GroupId,
) -> (GroupId, PassTargets) {
    let child_group_id = group_ids.mint_next();
    let region = topology.channel(start).and_then(|c| c.recycling_range());

    let mut targets = PassTargets::default();
    arrange_up(
        topology,
        start,
        group_id,
        child_group_id,
        region,
        background,
        &mut targets,
    );

    // Descend from the start's own level.
    let start_kind = topology.channel(start).map(|c| c.kind());
    match start_kind {
        Some(ChannelKind::Output) => {
            arrange_down(
                topology,
                group_ids,
                start,
                None,
                group_id,
                child_group_id,
                background,
                &mut targets,
            );
        }
        Some(ChannelKind::Input) => {
            if let Some(child_output) = topology.channel(start).and_then(|c| c.link()) {
                arrange_down(
                    topology,
                    group_ids,
                    child_output,
                    None,
                    group_id,
                    child_group_id,
                    background,
                    &mut targets,
                );
            }
        }
        None => {}
    }

    (group_id, targets)
}

/// Walks from `start` toward the device, assigning the pass's top-level
/// group id. Stops at a recycling boundary: levels above it belong to
/// whoever owns that boundary's playback.
fn arrange_up(
    topology: &mut Topology,
    start: ChannelUid,
    group_id: GroupId,
    child_group_id: GroupId,
    region: Option<(RecyclingUid, RecyclingUid)>,
    background: bool,
    targets: &mut PassTargets,
) {
    let recall_id = RecallId::new_with(group_id, None, Some(child_group_id), region, background);

    let mut current = start;
    loop {
        let Some((kind, audio_uid, audio_channel, line)) = topology
            .channel(current)
            .map(|c| (c.kind(), c.audio(), c.audio_channel(), c.line()))
        else {
            return;
        };

        let output = if kind == ChannelKind::Input {
            targets.record_channel(topology, current, recall_id.clone());
            targets.record_audio(topology, audio_uid, recall_id.clone());

            let Some(audio) = topology.audio(audio_uid) else {
                return;
            };
            if audio.has_recycling(ChannelKind::Output) {
                // The level above originates its own audio; this pass ends
                // here.
                return;
            }
            let output = if audio.is_async() {
                audio.channel_at(ChannelKind::Output, 0, audio_channel)
            } else {
                audio.channel_at_line(ChannelKind::Output, line)
            };
            match output {
                Some(output) => output,
                None => return,
            }
        } else {
            targets.record_audio(topology, audio_uid, recall_id.clone());
            current
        };

        targets.record_channel(topology, output, recall_id.clone());

        let Some(parent_input) = topology.channel(output).and_then(|c| c.link()) else {
            return;
        };
        let parent_audio = topology.channel(parent_input).map(|c| c.audio());
        if let Some(parent_audio) = parent_audio {
            if topology
                .audio(parent_audio)
                .map(|a| a.has_recycling(ChannelKind::Input))
                .unwrap_or_default()
            {
                return;
            }
        }
        current = parent_input;
    }
}

/// Walks downstream from `output`, assigning ids. Crossing into an audio
/// that originates its own output audio switches to the child group id and
/// mints a fresh grandchild for the next boundary.
#[allow(clippy::too_many_arguments)]
fn arrange_down(
    topology: &mut Topology,
    group_ids: &UidFactory<GroupId>,
    output: ChannelUid,
    parent_group_id: Option<GroupId>,
    group_id: GroupId,
    child_group_id: GroupId,
    background: bool,
    targets: &mut PassTargets,
) {
    let Some((audio_uid, audio_channel, line)) = topology
        .channel(output)
        .map(|c| (c.audio(), c.audio_channel(), c.line()))
    else {
        return;
    };
    let recall_id = RecallId::new_with(
        group_id,
        parent_group_id,
        Some(child_group_id),
        None,
        background,
    );

    targets.record_audio(topology, audio_uid, recall_id.clone());
    targets.record_channel(topology, output, recall_id.clone());

    let Some(audio) = topology.audio(audio_uid) else {
        return;
    };
    let inputs: Vec<ChannelUid> = if audio.is_async() {
        (0..audio.pads(ChannelKind::Input))
            .filter_map(|pad| audio.channel_at(ChannelKind::Input, pad, audio_channel))
            .collect()
    } else {
        audio
            .channel_at_line(ChannelKind::Input, line)
            .into_iter()
            .collect()
    };

    for input in inputs {
        targets.record_channel(topology, input, recall_id.clone());
        let Some(child_output) = topology.channel(input).and_then(|c| c.link()) else {
            continue;
        };
        let child_audio = topology.channel(child_output).map(|c| c.audio());
        let crosses_boundary = child_audio
            .and_then(|a| topology.audio(a))
            .map(|a| a.has_recycling(ChannelKind::Output))
            .unwrap_or_default();
        if crosses_boundary {
            let grandchild = group_ids.mint_next();
            arrange_down(
                topology,
                group_ids,
                child_output,
                Some(group_id),
                child_group_id,
                grandchild,
                background,
                targets,
            );
        } else {
            arrange_down(
                topology,
                group_ids,
                child_output,
                parent_group_id,
                group_id,
                child_group_id,
                background,
                targets,
            );
        }
    }
}

/// Duplicates every reachable template under the ids assigned by
/// [arrange_pass], appends the instances to the lists their templates live
/// in, wires them to their same-group peers, and run-initializes them.
/// Returns the new instance uids.
pub(crate) fn duplicate_pass(
    topology: &mut Topology,
    recalls: &mut RecallRepository,
    targets: &PassTargets,
    background: bool,
) -> Vec<RecallUid> {
    let mut instances: Vec<RecallUid> = Vec::default();

    for (audio_uid, recall_id) in &targets.audios {
        let Some(audio) = topology.audio(*audio_uid) else {
            continue;
        };
        let list = audio.recalls(background).to_vec();
        let new = recalls.duplicate_templates(&list, recall_id);
        if let Some(audio) = topology.audio_mut(*audio_uid) {
            let list = if background {
                &mut audio.recall
            } else {
                &mut audio.play
            };
            list.extend(new.iter().copied());
        }
        instances.extend(new);
    }

    for (channel_uid, recall_id) in &targets.channels {
        let Some(channel) = topology.channel(*channel_uid) else {
            continue;
        };
        let list = channel.recalls(background).to_vec();
        let new = recalls.duplicate_templates(&list, recall_id);
        if let Some(channel) = topology.channel_mut(*channel_uid) {
            let list = if background {
                &mut channel.recall
            } else {
                &mut channel.play
            };
            list.extend(new.iter().copied());
        }
        instances.extend(new);
    }

    // Group the new instances by the audio they hang off, then wire each to
    // its same-audio peers.
    let mut by_audio: FxHashMap<AudioUid, Vec<RecallUid>> = Default::default();
    for uid in &instances {
        let audio = match recalls.get(*uid).map(|r| r.scope()) {
            Some(RecallScope::Audio(audio)) => Some(audio),
            Some(RecallScope::Channel(channel)) => topology.channel(channel).map(|c| c.audio()),
            None => None,
        };
        if let Some(audio) = audio {
            by_audio.entry(audio).or_default().push(*uid);
        }
    }
    for uids in by_audio.values() {
        for uid in uids {
            recalls.resolve_dependencies(*uid, uids);
        }
    }

    // One-time setup, now that wiring is in place.
    for uid in &instances {
        let audio_channel = match recalls.get(*uid).map(|r| r.scope()) {
            Some(RecallScope::Channel(channel)) => topology
                .channel(channel)
                .map(|c| c.audio_channel())
                .unwrap_or_default(),
            _ => 0,
        };
        let mut ctx = RunContext {
            topology: &mut *topology,
            output: &mut [],
            attack: 0,
        };
        recalls.run_init(&mut ctx, *uid, audio_channel);
    }

    instances
}

/// Runs one stage of one pass over the subtree reachable from `channel`.
pub(crate) fn recursive_play(
    topology: &mut Topology,
    recalls: &mut RecallRepository,
    output: &mut [GenerationBuffer<Sample>],
    attack: usize,
    channel: ChannelUid,
    group_id: GroupId,
    stage: RunStage,
) {
    let Some((kind, background)) = topology.channel(channel).map(|c| {
        (
            c.kind(),
            id::find_group_id(c.recall_ids(), group_id)
                .map(|id| id.higher_level_is_recall)
                .unwrap_or_default(),
        )
    }) else {
        return;
    };
    match kind {
        ChannelKind::Output => {
            play_output(
                topology, recalls, output, attack, channel, group_id, stage, background,
            );
        }
        ChannelKind::Input => {
            play_input(
                topology, recalls, output, attack, channel, group_id, stage, background,
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn play_input(
    topology: &mut Topology,
    recalls: &mut RecallRepository,
    output: &mut [GenerationBuffer<Sample>],
    attack: usize,
    input: ChannelUid,
    group_id: GroupId,
    stage: RunStage,
    background: bool,
) {
    if let Some(child_output) = topology.channel(input).and_then(|c| c.link()) {
        if let Some(child_group) = child_group(topology, child_output, group_id) {
            play_output(
                topology,
                recalls,
                output,
                attack,
                child_output,
                child_group,
                stage,
                background,
            );
        }
    }
    channel_play(
        topology, recalls, output, attack, input, group_id, stage, background,
    );
}

/// Resolves the group id of the level below a link: the same group when the
/// pass flows straight through, the child lineage when the level below sits
/// beyond a recycling boundary.
fn child_group(topology: &Topology, child_output: ChannelUid, group_id: GroupId) -> Option<GroupId> {
    let child = topology.channel(child_output)?;
    id::find_group_id(child.recall_ids(), group_id)
        .or_else(|| id::find_parent_group_id(child.recall_ids(), group_id))
        .map(|id| id.group_id)
}

#[allow(clippy::too_many_arguments)]
fn play_output(
    topology: &mut Topology,
    recalls: &mut RecallRepository,
    output_planes: &mut [GenerationBuffer<Sample>],
    attack: usize,
    output: ChannelUid,
    group_id: GroupId,
    stage: RunStage,
    background: bool,
) {
    let Some((audio_uid, audio_channel, line)) = topology
        .channel(output)
        .map(|c| (c.audio(), c.audio_channel(), c.line()))
    else {
        return;
    };
    let Some(audio) = topology.audio(audio_uid) else {
        return;
    };
    let output_originates = audio.has_recycling(ChannelKind::Output);
    let inputs: Vec<ChannelUid> = if audio.is_async() {
        (0..audio.pads(ChannelKind::Input))
            .filter_map(|pad| audio.channel_at(ChannelKind::Input, pad, audio_channel))
            .collect()
    } else {
        audio
            .channel_at_line(ChannelKind::Input, line)
            .into_iter()
            .collect()
    };

    for input in inputs {
        // Below a recycling-originating level, the inputs run under the
        // child lineage.
        let input_group = if output_originates {
            topology
                .channel(input)
                .and_then(|c| id::find_parent_group_id(c.recall_ids(), group_id))
                .map(|id| id.group_id)
        } else {
            Some(group_id)
        };
        let Some(input_group) = input_group else {
            continue;
        };
        play_input(
            topology,
            recalls,
            output_planes,
            attack,
            input,
            input_group,
            stage,
            background,
        );
    }

    // Audio-scope recalls run once per tic, on the first column.
    if audio_channel == 0 {
        audio_play(
            topology,
            recalls,
            output_planes,
            attack,
            audio_uid,
            group_id,
            stage,
            background,
        );
    }

    channel_play(
        topology,
        recalls,
        output_planes,
        attack,
        output,
        group_id,
        stage,
        background,
    );
}

#[allow(clippy::too_many_arguments)]
fn audio_play(
    topology: &mut Topology,
    recalls: &mut RecallRepository,
    output: &mut [GenerationBuffer<Sample>],
    attack: usize,
    audio: AudioUid,
    group_id: GroupId,
    stage: RunStage,
    background: bool,
) {
    let Some(list) = topology.audio(audio).map(|a| a.recalls(background).to_vec()) else {
        return;
    };
    run_list(
        topology, recalls, output, attack, list, group_id, stage, 0,
    );
    if let Some(audio) = topology.audio_mut(audio) {
        let list = if background {
            &mut audio.recall
        } else {
            &mut audio.play
        };
        list.retain(|uid| recalls.get(*uid).is_some());
    }
}

#[allow(clippy::too_many_arguments)]
fn channel_play(
    topology: &mut Topology,
    recalls: &mut RecallRepository,
    output: &mut [GenerationBuffer<Sample>],
    attack: usize,
    channel: ChannelUid,
    group_id: GroupId,
    stage: RunStage,
    background: bool,
) {
    let Some((audio_channel, list)) = topology
        .channel(channel)
        .map(|c| (c.audio_channel(), c.recalls(background).to_vec()))
    else {
        return;
    };
    run_list(
        topology,
        recalls,
        output,
        attack,
        list,
        group_id,
        stage,
        audio_channel,
    );
    if let Some(channel) = topology.channel_mut(channel) {
        let list = if background {
            &mut channel.recall
        } else {
            &mut channel.play
        };
        list.retain(|uid| recalls.get(*uid).is_some());
    }
}

/// The common body of a channel- or audio-list walk: run matching, visible
/// instances, then sweep cancel and removal requests. Removal here detaches
/// from the arena; the owning list is compacted by the caller.
#[allow(clippy::too_many_arguments)]
fn run_list(
    topology: &mut Topology,
    recalls: &mut RecallRepository,
    output: &mut [GenerationBuffer<Sample>],
    attack: usize,
    list: Vec<RecallUid>,
    group_id: GroupId,
    stage: RunStage,
    audio_channel: usize,
) {
    for uid in list {
        let Some(recall) = recalls.get(uid) else {
            continue;
        };
        if recall.flags().template || recall.group_id() != Some(group_id) {
            continue;
        }
        let hidden = recall.flags().hide;
        if !hidden {
            let mut ctx = RunContext {
                topology: &mut *topology,
                output: &mut *output,
                attack,
            };
            recalls.run_stage(&mut ctx, uid, stage, audio_channel);
        }
        recalls.check_cancel(uid);
        recalls.child_check_remove(uid);
        if recalls
            .get(uid)
            .map(|r| r.flags().remove && r.children().is_empty())
            .unwrap_or_default()
        {
            recalls.remove(uid);
        }
    }
}
