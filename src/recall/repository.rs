// Copyright (c) 2024 Mike Tsao

use super::{
    id::RecallId, kinds::RecallKind, DependencyKind, GroupId, Recall, RecallFlags, RecallScope,
    RecallUid, RunStage,
};
use crate::{
    topology::Topology,
    traits::GenerationBuffer,
    types::{Sample, UidFactory},
};
use rustc_hash::FxHashMap;

/// What a recall gets to touch while running: the topology (whose recyclings
/// hold the signals), the device output planes for the current period, and
/// the attack offset assigned to anything triggered this tic.
#[derive(Debug)]
pub struct RunContext<'a> {
    /// The graph and its recyclings.
    pub topology: &'a mut Topology,
    /// One plane of `buffer_size` samples per device channel.
    pub output: &'a mut [GenerationBuffer<Sample>],
    /// The sample offset, within the current period, at which signals
    /// triggered this tic begin.
    pub attack: usize,
}

/// Cross-recall effects produced while one recall is checked out of the
/// arena. They are applied after the recall is back, which keeps every
/// mutation single-owner without any locking.
#[derive(Debug)]
enum Deferred {
    /// A delay fired; fan the tic out to its listeners.
    Tic {
        delay_run: RecallUid,
        audio_channel: usize,
        attack: usize,
    },
    /// A recall completed voluntarily.
    Done(RecallUid),
    /// Adjust a dependency counter.
    Dependency {
        target: RecallUid,
        kind: DependencyKind,
        delta: i32,
    },
    /// A channel-run finished its stage work for the pass.
    ReportPass { channel_run: RecallUid },
}

/// Owns every [Recall], templates and instances alike, and implements the
/// lifecycle: duplication, run stages, voluntary completion, cancellation,
/// cascading removal, and dependency counting.
#[derive(Debug)]
pub struct RecallRepository {
    uid_factory: UidFactory<RecallUid>,
    recalls: FxHashMap<RecallUid, Recall>,
}
impl Default for RecallRepository {
    fn default() -> Self {
        Self {
            uid_factory: UidFactory::new(1),
            recalls: Default::default(),
        }
    }
}
impl RecallRepository {
    /// Adds a recall with the given scope, flags, and kind. Returns its uid.
    pub fn create(&mut self, scope: RecallScope, flags: RecallFlags, kind: RecallKind) -> RecallUid {
        let uid = self.uid_factory.mint_next();
        self.recalls.insert(
            uid,
            Recall {
                uid,
                scope,
                flags,
                recall_id: None,
                parent: None,
                children: Default::default(),
                kind,
            },
        );
        uid
    }

    #[allow(missing_docs)]
    pub fn get(&self, uid: RecallUid) -> Option<&Recall> {
        self.recalls.get(&uid)
    }

    #[allow(missing_docs)]
    pub fn get_mut(&mut self, uid: RecallUid) -> Option<&mut Recall> {
        self.recalls.get_mut(&uid)
    }

    /// The number of recalls in the arena, templates included.
    pub fn len(&self) -> usize {
        self.recalls.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.recalls.is_empty()
    }

    /// Attaches `child` under `parent`, sharing the parent's [RecallId].
    pub fn add_child(&mut self, parent: RecallUid, child: RecallUid) {
        let Some(parent_recall) = self.recalls.get_mut(&parent) else {
            return;
        };
        let recall_id = parent_recall.recall_id.clone();
        if !parent_recall.children.contains(&child) {
            parent_recall.children.push(child);
        }
        if let Some(child_recall) = self.recalls.get_mut(&child) {
            child_recall.parent = Some(parent);
            child_recall.recall_id = recall_id;
        }
    }

    /// Attaches `child` under `parent` after the fact. If the parent is
    /// already run-initialized, the child catches up with its own init
    /// stages immediately so it participates in the very next tic.
    pub fn attach_child(
        &mut self,
        ctx: &mut RunContext,
        parent: RecallUid,
        child: RecallUid,
        audio_channel: usize,
    ) {
        self.add_child(parent, child);
        let parent_initialized = self
            .recalls
            .get(&parent)
            .map(|r| r.flags.run_initialized)
            .unwrap_or_default();
        if parent_initialized {
            self.run_init(ctx, child, audio_channel);
        }
    }

    /// Rewrites the scoping window of every instance whose pass was scoped
    /// to `old`. Called when a link change moved the recycling range under
    /// a running pass.
    pub fn rewindow(
        &mut self,
        old: Option<(crate::buffer::RecyclingUid, crate::buffer::RecyclingUid)>,
        new: Option<(crate::buffer::RecyclingUid, crate::buffer::RecyclingUid)>,
    ) {
        if old.is_none() {
            return;
        }
        for recall in self.recalls.values_mut() {
            if let Some(recall_id) = &mut recall.recall_id {
                if recall_id.region == old {
                    recall_id.region = new;
                }
            }
        }
    }

    /// Deletes recalls outright, without lifecycle. Used when the structure
    /// beneath them (a channel) is destroyed.
    pub fn purge(&mut self, uids: &[RecallUid]) {
        for uid in uids {
            if let Some(recall) = self.recalls.remove(uid) {
                self.purge(&recall.children);
            }
        }
    }

    /// Duplicates a template (or an already-duplicated instance being
    /// duplicated again for a nested pass) into a fresh non-template
    /// instance owned by `recall_id`. The source is never mutated; children
    /// are duplicated recursively and keep their positions.
    pub fn duplicate(&mut self, source: RecallUid, recall_id: &RecallId) -> Option<RecallUid> {
        let (scope, mut flags, kind, children) = {
            let source = self.recalls.get(&source)?;
            (
                source.scope,
                source.flags,
                source.kind.duplicate(),
                source.children.clone(),
            )
        };
        flags.template = false;
        flags.run_initialized = false;

        let uid = self.uid_factory.mint_next();
        self.recalls.insert(
            uid,
            Recall {
                uid,
                scope,
                flags,
                recall_id: Some(recall_id.clone()),
                parent: None,
                children: Default::default(),
                kind,
            },
        );
        for child in children {
            if let Some(child_copy) = self.duplicate(child, recall_id) {
                self.add_child(uid, child_copy);
            }
        }
        Some(uid)
    }

    /// Duplicates every top-level run-kind template in `list` under
    /// `recall_id`, returning the new instance uids in list order.
    pub fn duplicate_templates(
        &mut self,
        list: &[RecallUid],
        recall_id: &RecallId,
    ) -> Vec<RecallUid> {
        let sources: Vec<RecallUid> = list
            .iter()
            .filter(|uid| {
                self.recalls
                    .get(uid)
                    .map(|r| r.flags.template && r.parent.is_none() && r.kind.is_run_kind())
                    .unwrap_or_default()
            })
            .copied()
            .collect();
        sources
            .iter()
            .filter_map(|uid| self.duplicate(*uid, recall_id))
            .collect()
    }

    /// Wires a freshly duplicated instance to its same-group peers:
    /// copy-pattern audio runs find their delay run and subscribe for count
    /// delivery; copy-pattern channel runs find their audio run and
    /// subscribe for alloc delivery.
    pub fn resolve_dependencies(&mut self, uid: RecallUid, candidates: &[RecallUid]) {
        let Some(recall) = self.recalls.get(&uid) else {
            return;
        };
        let Some(group_id) = recall.group_id() else {
            return;
        };

        match &recall.kind {
            RecallKind::CopyPatternAudioRun(_) => {
                let Some(delay_run) = self.find_with_group(candidates, group_id, |kind| {
                    matches!(kind, RecallKind::DelayAudioRun(_))
                }) else {
                    return;
                };
                if let Some(RecallKind::CopyPatternAudioRun(run)) =
                    self.recalls.get_mut(&uid).map(|r| &mut r.kind)
                {
                    run.delay_run = Some(delay_run);
                }
                if let Some(RecallKind::DelayAudioRun(delay)) =
                    self.recalls.get_mut(&delay_run).map(|r| &mut r.kind)
                {
                    if !delay.count_listeners.contains(&uid) {
                        delay.count_listeners.push(uid);
                    }
                }
            }
            RecallKind::CopyPatternChannelRun(_) => {
                let Some(audio_run) = self.find_with_group(candidates, group_id, |kind| {
                    matches!(kind, RecallKind::CopyPatternAudioRun(_))
                }) else {
                    return;
                };
                if let Some(RecallKind::CopyPatternChannelRun(run)) =
                    self.recalls.get_mut(&uid).map(|r| &mut r.kind)
                {
                    run.audio_run = Some(audio_run);
                }
                let delay_run = self.delay_run_of(audio_run);
                if let Some(delay_run) = delay_run {
                    if let Some(RecallKind::DelayAudioRun(delay)) =
                        self.recalls.get_mut(&delay_run).map(|r| &mut r.kind)
                    {
                        if !delay.alloc_listeners.contains(&uid) {
                            delay.alloc_listeners.push(uid);
                        }
                    }
                }
            }
            _ => {}
        }

        let children: Vec<RecallUid> = self
            .recalls
            .get(&uid)
            .map(|r| r.children.clone())
            .unwrap_or_default();
        for child in children {
            self.resolve_dependencies(child, candidates);
        }
    }

    /// Finds an instance in `list` with the given group id whose kind
    /// matches the predicate.
    pub fn find_with_group(
        &self,
        list: &[RecallUid],
        group_id: GroupId,
        predicate: impl Fn(&RecallKind) -> bool,
    ) -> Option<RecallUid> {
        list.iter()
            .find(|uid| {
                self.recalls
                    .get(uid)
                    .map(|r| r.group_id() == Some(group_id) && predicate(&r.kind))
                    .unwrap_or_default()
            })
            .copied()
    }

    /// Finds a template in `list` whose kind matches the predicate.
    pub fn find_template(
        &self,
        list: &[RecallUid],
        predicate: impl Fn(&RecallKind) -> bool,
    ) -> Option<RecallUid> {
        list.iter()
            .find(|uid| {
                self.recalls
                    .get(uid)
                    .map(|r| r.flags.template && predicate(&r.kind))
                    .unwrap_or_default()
            })
            .copied()
    }

    /// One-time setup for a new instance, children first: counters rewind,
    /// dependencies are acquired, external hooks initialize. Marks the
    /// subtree run-initialized.
    pub fn run_init(&mut self, ctx: &mut RunContext, uid: RecallUid, audio_channel: usize) {
        let mut deferred = Vec::default();
        self.run_init_inner(ctx, uid, audio_channel, &mut deferred);
        self.drain(ctx, deferred);
    }

    fn run_init_inner(
        &mut self,
        ctx: &mut RunContext,
        uid: RecallUid,
        audio_channel: usize,
        deferred: &mut Vec<Deferred>,
    ) {
        let children: Vec<RecallUid> = self
            .recalls
            .get(&uid)
            .map(|r| r.children.clone())
            .unwrap_or_default();
        for child in children {
            self.run_init_inner(ctx, child, audio_channel, deferred);
        }

        let Some(mut recall) = self.recalls.remove(&uid) else {
            return;
        };
        if recall.flags.template || recall.flags.run_initialized {
            self.recalls.insert(uid, recall);
            return;
        }
        match &mut recall.kind {
            RecallKind::DelayAudioRun(run) => run.reset_counter(),
            RecallKind::CopyPatternChannelRun(run) => {
                if let Some(delay_run) = run.audio_run.and_then(|a| self.delay_run_of(a)) {
                    deferred.push(Deferred::Dependency {
                        target: delay_run,
                        kind: DependencyKind::ChannelRun,
                        delta: 1,
                    });
                }
            }
            RecallKind::Bridge(bridge) => bridge.hooks.run_init(audio_channel),
            _ => {}
        }
        recall.flags.run_initialized = true;
        self.recalls.insert(uid, recall);
    }

    /// Runs one stage of one recall subtree, children first, then applies
    /// whatever cross-recall effects the stage produced. Anything that goes
    /// wrong inside a stage is contained: the offending recall is cancelled
    /// and the tic continues.
    pub fn run_stage(
        &mut self,
        ctx: &mut RunContext,
        uid: RecallUid,
        stage: RunStage,
        audio_channel: usize,
    ) {
        let mut deferred = Vec::default();
        self.run_stage_inner(ctx, uid, stage, audio_channel, &mut deferred);
        self.drain(ctx, deferred);
    }

    fn run_stage_inner(
        &mut self,
        ctx: &mut RunContext,
        uid: RecallUid,
        stage: RunStage,
        audio_channel: usize,
        deferred: &mut Vec<Deferred>,
    ) {
        let children: Vec<RecallUid> = self
            .recalls
            .get(&uid)
            .map(|r| r.children.clone())
            .unwrap_or_default();
        for child in children {
            self.run_stage_inner(ctx, child, stage, audio_channel, deferred);
        }

        let Some(mut recall) = self.recalls.remove(&uid) else {
            return;
        };
        if recall.flags.template || recall.flags.done || recall.flags.hide {
            self.recalls.insert(uid, recall);
            return;
        }
        if let Err(e) = self.run_kind_stage(ctx, &mut recall, stage, audio_channel, deferred) {
            log::error!(
                "recall {} ({}) failed during {} stage: {e}; cancelling it",
                recall.uid,
                recall.name(),
                stage
            );
            recall.flags.cancel = true;
        }
        self.recalls.insert(uid, recall);
    }

    fn run_kind_stage(
        &mut self,
        ctx: &mut RunContext,
        recall: &mut Recall,
        stage: RunStage,
        audio_channel: usize,
        deferred: &mut Vec<Deferred>,
    ) -> anyhow::Result<()> {
        match stage {
            RunStage::Pre => {
                if matches!(recall.kind, RecallKind::DelayAudioRun(_)) {
                    self.delay_pre(ctx, recall, deferred);
                }
            }
            RunStage::Inter => match &recall.kind {
                RecallKind::VolumeChannelRun(_) => self.scale_signals(ctx, recall)?,
                RecallKind::Bridge(_) => self.bridge_signals(ctx, recall, audio_channel)?,
                RecallKind::PlayChannelRun(_) => self.mix_signals(ctx, recall)?,
                _ => {}
            },
            RunStage::Post => match &recall.kind {
                RecallKind::DelayAudioRun(run) => {
                    if run.is_idle() && !recall.flags.persistent {
                        deferred.push(Deferred::Done(recall.uid));
                    }
                }
                RecallKind::CopyPatternChannelRun(_) => {
                    deferred.push(Deferred::ReportPass {
                        channel_run: recall.uid,
                    });
                }
                RecallKind::PlayChannelRun(_) => self.advance_signals(ctx, recall)?,
                _ => {}
            },
        }
        Ok(())
    }

    /// The delay run's period count: advance, and on rollover fan a tic out
    /// to every audio channel.
    fn delay_pre(&mut self, ctx: &mut RunContext, recall: &mut Recall, deferred: &mut Vec<Deferred>) {
        let uid = recall.uid;
        let attack = ctx.attack;
        let audio_channels = match recall.scope {
            RecallScope::Audio(audio) => ctx
                .topology
                .audio(audio)
                .map(|a| a.audio_channels())
                .unwrap_or(1),
            RecallScope::Channel(_) => 1,
        };
        let delay = match &recall.kind {
            RecallKind::DelayAudioRun(run) => run
                .delay_audio
                .and_then(|data| self.recalls.get(&data))
                .and_then(|r| match &r.kind {
                    RecallKind::DelayAudio(delay_audio) => Some(delay_audio.delay()),
                    _ => None,
                })
                .unwrap_or(1),
            _ => return,
        };
        let RecallKind::DelayAudioRun(run) = &mut recall.kind else {
            return;
        };
        if run.advance(delay) {
            for ac in 0..audio_channels {
                deferred.push(Deferred::Tic {
                    delay_run: uid,
                    audio_channel: ac,
                    attack,
                });
            }
        }
    }

    /// The recycling range a recall may touch: its pass's scoping window if
    /// one was set, its source channel's range otherwise.
    fn effective_range(&self, recall: &Recall, ctx: &RunContext, source: crate::topology::ChannelUid) -> Vec<crate::buffer::RecyclingUid> {
        let window = recall.recall_id.as_ref().and_then(|id| id.region);
        let range = window.or_else(|| {
            ctx.topology
                .channel(source)
                .and_then(|c| c.recycling_range())
        });
        match range {
            Some((first, last)) => ctx.topology.recyclings.range_uids(first, last),
            None => Default::default(),
        }
    }

    fn scale_signals(&mut self, ctx: &mut RunContext, recall: &Recall) -> anyhow::Result<()> {
        let Some(group_id) = recall.group_id() else {
            return Ok(());
        };
        let (source, gain) = match &recall.kind {
            RecallKind::VolumeChannelRun(volume) => (volume.source, volume.volume),
            _ => return Ok(()),
        };
        for r_uid in self.effective_range(recall, ctx, source) {
            if let Some(recycling) = ctx.topology.recyclings.get_mut(r_uid) {
                for signal in recycling.signals_mut() {
                    if signal.group_id() != Some(group_id) {
                        continue;
                    }
                    if let Some(buffer) = signal.current_buffer_mut() {
                        for sample in buffer {
                            *sample *= gain;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn bridge_signals(
        &mut self,
        ctx: &mut RunContext,
        recall: &mut Recall,
        audio_channel: usize,
    ) -> anyhow::Result<()> {
        let Some(group_id) = recall.group_id() else {
            return Ok(());
        };
        let source = match &recall.kind {
            RecallKind::Bridge(bridge) => bridge.source,
            _ => return Ok(()),
        };
        let range = self.effective_range(recall, ctx, source);
        let RecallKind::Bridge(bridge) = &mut recall.kind else {
            return Ok(());
        };
        for r_uid in range {
            if let Some(recycling) = ctx.topology.recyclings.get_mut(r_uid) {
                for signal in recycling.signals_mut() {
                    if signal.group_id() != Some(group_id) {
                        continue;
                    }
                    if let Some(buffer) = signal.current_buffer_mut() {
                        bridge.hooks.run(audio_channel, buffer);
                    }
                }
            }
        }
        Ok(())
    }

    fn mix_signals(&mut self, ctx: &mut RunContext, recall: &Recall) -> anyhow::Result<()> {
        let Some(group_id) = recall.group_id() else {
            return Ok(());
        };
        let source = match &recall.kind {
            RecallKind::PlayChannelRun(play) => play.source,
            _ => return Ok(()),
        };
        let Some(audio_channel) = ctx.topology.channel(source).map(|c| c.audio_channel()) else {
            return Ok(());
        };
        if audio_channel >= ctx.output.len() {
            return Ok(());
        }
        for r_uid in self.effective_range(recall, ctx, source) {
            let Some(recycling) = ctx.topology.recyclings.get(r_uid) else {
                continue;
            };
            // Collect (attack, samples) pairs first; the plane borrow below
            // must not overlap the recycling borrow.
            let mut mixes: Vec<(usize, Vec<Sample>)> = Vec::default();
            for signal in recycling.signals_for_group(group_id) {
                if let Some(buffer) = signal.current_buffer() {
                    mixes.push((signal.pending_attack(), buffer.to_vec()));
                }
            }
            let plane = ctx.output[audio_channel].buffer_mut();
            for (attack, samples) in mixes {
                let n = plane.len().saturating_sub(attack).min(samples.len());
                for i in 0..n {
                    plane[attack + i] += samples[i];
                }
            }
        }
        Ok(())
    }

    fn advance_signals(&mut self, ctx: &mut RunContext, recall: &Recall) -> anyhow::Result<()> {
        let Some(group_id) = recall.group_id() else {
            return Ok(());
        };
        let source = match &recall.kind {
            RecallKind::PlayChannelRun(play) => play.source,
            _ => return Ok(()),
        };
        for r_uid in self.effective_range(recall, ctx, source) {
            if let Some(recycling) = ctx.topology.recyclings.get_mut(r_uid) {
                for signal in recycling.signals_mut() {
                    if signal.group_id() == Some(group_id) {
                        signal.advance();
                    }
                }
                recycling.prune_exhausted();
            }
        }
        Ok(())
    }

    fn drain(&mut self, ctx: &mut RunContext, mut deferred: Vec<Deferred>) {
        while !deferred.is_empty() {
            let batch: Vec<Deferred> = deferred.drain(..).collect();
            for effect in batch {
                match effect {
                    Deferred::Tic {
                        delay_run,
                        audio_channel,
                        attack,
                    } => {
                        let (alloc, count) = match self.recalls.get(&delay_run).map(|r| &r.kind) {
                            Some(RecallKind::DelayAudioRun(run)) => {
                                (run.alloc_listeners.clone(), run.count_listeners.clone())
                            }
                            _ => continue,
                        };
                        for listener in alloc {
                            self.copy_pattern_alloc(
                                ctx,
                                listener,
                                audio_channel,
                                attack,
                                &mut deferred,
                            );
                        }
                        for listener in count {
                            self.copy_pattern_count(listener, audio_channel);
                        }
                    }
                    Deferred::Done(uid) => self.done_inner(uid, &mut deferred),
                    Deferred::Dependency {
                        target,
                        kind,
                        delta,
                    } => self.apply_dependency(target, kind, delta),
                    Deferred::ReportPass { channel_run } => {
                        let delay_run = self
                            .recalls
                            .get(&channel_run)
                            .and_then(|r| match &r.kind {
                                RecallKind::CopyPatternChannelRun(run) => run.audio_run,
                                _ => None,
                            })
                            .and_then(|audio_run| self.delay_run_of(audio_run));
                        if let Some(delay_run) = delay_run {
                            if let Some(RecallKind::DelayAudioRun(run)) =
                                self.recalls.get_mut(&delay_run).map(|r| &mut r.kind)
                            {
                                run.report_pass();
                            }
                        }
                    }
                }
            }
        }
    }

    /// One alloc-listener delivery: consult the pass cursor and the pattern,
    /// and either trigger signals, finish, or reseed for another loop round.
    fn copy_pattern_alloc(
        &mut self,
        ctx: &mut RunContext,
        uid: RecallUid,
        audio_channel: usize,
        attack: usize,
        deferred: &mut Vec<Deferred>,
    ) {
        let Some(recall) = self.recalls.get(&uid) else {
            return;
        };
        if recall.flags.done || recall.flags.template {
            return;
        }
        let Some(group_id) = recall.group_id() else {
            return;
        };
        let RecallKind::CopyPatternChannelRun(worker) = &recall.kind else {
            return;
        };
        let Some(audio_run_uid) = worker.audio_run else {
            return;
        };
        let channel_data_uid = worker.copy_pattern_channel;
        let audio_data_uid = worker.copy_pattern_audio;

        let Some((source, pattern)) = self.recalls.get(&channel_data_uid).and_then(|r| match &r
            .kind
        {
            RecallKind::CopyPatternChannel(data) => Some((data.source, data.pattern.clone())),
            _ => None,
        }) else {
            return;
        };
        if ctx
            .topology
            .channel(source)
            .map(|c| c.audio_channel() != audio_channel)
            .unwrap_or(true)
        {
            return;
        }
        let Some((bank_0, bank_1, looping)) =
            self.recalls.get(&audio_data_uid).and_then(|r| match &r.kind {
                RecallKind::CopyPatternAudio(data) => {
                    Some((data.bank_0, data.bank_1, data.looping))
                }
                _ => None,
            })
        else {
            return;
        };
        let Some(bit) = self.recalls.get(&audio_run_uid).and_then(|r| match &r.kind {
            RecallKind::CopyPatternAudioRun(run) => Some(run.bit),
            _ => None,
        }) else {
            return;
        };

        if pattern.length() == 0 {
            return;
        }
        if bit >= pattern.length() {
            if looping {
                // Reseed: refresh the destination templates so the next
                // round starts from a pristine loop.
                let range = self.effective_range(recall, ctx, source);
                for r_uid in range {
                    if let Some(recycling) = ctx.topology.recyclings.get_mut(r_uid) {
                        if let Some(template) = recycling.template() {
                            let mut fresh = template.clone();
                            fresh.rewind();
                            recycling.add_audio_signal(fresh);
                        }
                    }
                }
            } else {
                // The pattern has played out: this worker's job is over.
                if let Some(recall) = self.recalls.get_mut(&uid) {
                    recall.flags.persistent = false;
                    if recall.children.is_empty() {
                        deferred.push(Deferred::Done(uid));
                    }
                }
            }
            return;
        }

        match pattern.get_bit(bank_0, bank_1, bit) {
            Ok(true) => {
                let range = self.effective_range(recall, ctx, source);
                for r_uid in range {
                    let signal_uid = ctx.topology.recyclings.mint_signal_uid();
                    if let Some(recycling) = ctx.topology.recyclings.get_mut(r_uid) {
                        recycling.create_audio_signal_with_defaults(signal_uid, group_id, attack);
                    }
                }
            }
            Ok(false) => {}
            Err(e) => {
                log::error!("pattern read failed: {e}; cancelling step worker {uid}");
                if let Some(recall) = self.recalls.get_mut(&uid) {
                    recall.flags.cancel = true;
                }
            }
        }
    }

    /// One count-listener delivery: advance the pass cursor. Only the first
    /// audio channel advances, so a stereo machine doesn't double-step.
    fn copy_pattern_count(&mut self, uid: RecallUid, audio_channel: usize) {
        if audio_channel != 0 {
            return;
        }
        let length = match self.recalls.get(&uid).map(|r| &r.kind) {
            Some(RecallKind::CopyPatternAudioRun(run)) => run
                .copy_pattern_audio
                .and_then(|data| self.recalls.get(&data))
                .and_then(|r| match &r.kind {
                    RecallKind::CopyPatternAudio(data) => Some(data.length),
                    _ => None,
                }),
            _ => None,
        };
        let Some(length) = length else {
            return;
        };
        let looping = match self.recalls.get(&uid).map(|r| &r.kind) {
            Some(RecallKind::CopyPatternAudioRun(run)) => run
                .copy_pattern_audio
                .and_then(|data| self.recalls.get(&data))
                .map(|r| match &r.kind {
                    RecallKind::CopyPatternAudio(data) => data.looping,
                    _ => false,
                })
                .unwrap_or_default(),
            _ => false,
        };
        if let Some(RecallKind::CopyPatternAudioRun(run)) =
            self.recalls.get_mut(&uid).map(|r| &mut r.kind)
        {
            if length == 0 {
                return;
            }
            if run.bit < length {
                run.bit += 1;
            } else if looping {
                run.bit = 0;
            }
        }
    }

    /// Voluntary completion. Marks the recall done (and hidden, so it stays
    /// addressable without running), releases its dependencies exactly once,
    /// and schedules removal unless it is persistent.
    pub fn done(&mut self, uid: RecallUid) {
        let mut deferred = Vec::default();
        self.done_inner(uid, &mut deferred);
        self.drain_detached(deferred);
    }

    fn done_inner(&mut self, uid: RecallUid, deferred: &mut Vec<Deferred>) {
        let audio_run = {
            let Some(recall) = self.recalls.get_mut(&uid) else {
                return;
            };
            if recall.flags.done {
                return;
            }
            recall.flags.done = true;
            recall.flags.hide = true;
            if !recall.flags.persistent {
                recall.flags.remove = true;
            }
            match &mut recall.kind {
                RecallKind::Bridge(bridge) => {
                    bridge.hooks.done();
                    None
                }
                RecallKind::CopyPatternChannelRun(run) => run.audio_run,
                _ => None,
            }
        };
        // Release the delay dependency this worker acquired at init.
        if let Some(delay_run) = audio_run.and_then(|audio_run| self.delay_run_of(audio_run)) {
            deferred.push(Deferred::Dependency {
                target: delay_run,
                kind: DependencyKind::ChannelRun,
                delta: -1,
            });
        }
    }

    /// External interruption. Cancellation is advisory and completes
    /// gracefully: it routes through done so dependency counts stay
    /// balanced, then forces removal even for persistent recalls.
    pub fn cancel(&mut self, uid: RecallUid) {
        self.done(uid);
        if let Some(recall) = self.recalls.get_mut(&uid) {
            recall.flags.cancel = false;
            recall.flags.remove = true;
        }
    }

    /// Post-stage sweep: cancels every recall in the subtree (children
    /// first) whose cancel flag was raised during the stage.
    pub fn check_cancel(&mut self, uid: RecallUid) {
        let children: Vec<RecallUid> = self
            .recalls
            .get(&uid)
            .map(|r| r.children.clone())
            .unwrap_or_default();
        for child in children {
            self.check_cancel(child);
        }
        if self
            .recalls
            .get(&uid)
            .map(|r| r.flags.cancel)
            .unwrap_or_default()
        {
            self.cancel(uid);
        }
    }

    /// Post-stage sweep: removes every descendant (leaves first) whose
    /// remove flag is set. The recall itself is left for its owning list's
    /// eviction step.
    pub fn child_check_remove(&mut self, uid: RecallUid) {
        let children: Vec<RecallUid> = self
            .recalls
            .get(&uid)
            .map(|r| r.children.clone())
            .unwrap_or_default();
        for child in children {
            self.child_check_remove(child);
            if self
                .recalls
                .get(&child)
                .map(|r| r.flags.remove)
                .unwrap_or_default()
            {
                self.remove(child);
            }
        }
    }

    /// Physically detaches a recall. Only valid once no children remain; a
    /// parent waiting on `propagate_done` completes when its child list
    /// empties.
    pub fn remove(&mut self, uid: RecallUid) {
        let Some(recall) = self.recalls.get(&uid) else {
            return;
        };
        if !recall.children.is_empty() {
            log::warn!("refusing to remove recall {uid} with live children");
            return;
        }
        let parent = recall.parent;
        self.recalls.remove(&uid);

        if let Some(parent) = parent {
            let finished_parent = if let Some(parent_recall) = self.recalls.get_mut(&parent) {
                parent_recall.children.retain(|child| *child != uid);
                parent_recall.flags.propagate_done && parent_recall.children.is_empty()
            } else {
                false
            };
            if finished_parent {
                self.done(parent);
            }
        }
    }

    /// Adjusts a dependency counter on the target recall. An unmatched
    /// release is fatal in debug builds and a logged no-op in release.
    pub fn notify_dependency(&mut self, target: RecallUid, kind: DependencyKind, delta: i32) {
        self.apply_dependency(target, kind, delta);
    }

    fn apply_dependency(&mut self, target: RecallUid, kind: DependencyKind, delta: i32) {
        let Some(recall) = self.recalls.get_mut(&target) else {
            log::warn!("dependency {kind} notification for unknown recall {target}");
            return;
        };
        match &mut recall.kind {
            RecallKind::DelayAudioRun(run) => {
                if delta >= 0 {
                    for _ in 0..delta {
                        run.add_dependency();
                    }
                } else {
                    for _ in 0..-delta {
                        run.remove_dependency();
                    }
                }
            }
            _ => {
                log::warn!(
                    "dependency {kind} notification for non-counting recall {target}"
                );
            }
        }
    }

    fn drain_detached(&mut self, deferred: Vec<Deferred>) {
        // Lifecycle-only effects (no topology access needed).
        for effect in deferred {
            match effect {
                Deferred::Done(uid) => self.done(uid),
                Deferred::Dependency {
                    target,
                    kind,
                    delta,
                } => self.apply_dependency(target, kind, delta),
                Deferred::Tic { .. } | Deferred::ReportPass { .. } => {}
            }
        }
    }

    /// Every recall uid currently in the arena.
    pub fn uids(&self) -> Vec<RecallUid> {
        self.recalls.keys().copied().collect()
    }

    /// Every instance belonging to the given playback pass.
    pub fn instances_of_group(&self, group_id: GroupId) -> Vec<RecallUid> {
        self.recalls
            .values()
            .filter(|r| r.group_id() == Some(group_id))
            .map(|r| r.uid)
            .collect()
    }

    /// Whether the pass still has a live tempo driver. Once the driver is
    /// done (or gone), the pass can produce no further tics and is over.
    pub fn group_has_live_driver(&self, group_id: GroupId) -> bool {
        self.recalls.values().any(|r| {
            r.group_id() == Some(group_id)
                && matches!(r.kind, RecallKind::DelayAudioRun(_))
                && !r.flags.done
        })
    }

    /// The delay run a copy-pattern audio run is attached to.
    fn delay_run_of(&self, audio_run: RecallUid) -> Option<RecallUid> {
        self.recalls.get(&audio_run).and_then(|r| match &r.kind {
            RecallKind::CopyPatternAudioRun(run) => run.delay_run,
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{CopyPatternAudio, DelayAudioRun};

    fn audio_scope() -> RecallScope {
        RecallScope::Audio(crate::topology::AudioUid(1))
    }

    #[test]
    fn duplicate_strips_template_and_copies_children() {
        let mut repo = RecallRepository::default();
        let parent = repo.create(
            audio_scope(),
            RecallFlags::template(),
            RecallKind::DelayAudioRun(DelayAudioRun::default()),
        );
        let child = repo.create(
            audio_scope(),
            RecallFlags::template(),
            RecallKind::CopyPatternAudio(CopyPatternAudio::default()),
        );
        repo.add_child(parent, child);

        let recall_id = RecallId::new_with(GroupId(42), None, None, None, false);
        let copy = repo.duplicate(parent, &recall_id).unwrap();

        let source = repo.get(parent).unwrap();
        assert!(
            source.flags().template,
            "duplicate must never mutate its source"
        );
        assert!(source.recall_id().is_none());

        let copy = repo.get(copy).unwrap();
        assert!(!copy.flags().template);
        assert_eq!(copy.group_id(), Some(GroupId(42)));
        assert_eq!(copy.children().len(), 1, "children should be deep-copied");
        let copied_child = repo.get(copy.children()[0]).unwrap();
        assert_eq!(copied_child.group_id(), Some(GroupId(42)));
        assert_ne!(copied_child.uid(), child);
    }

    #[test]
    fn duplication_isolation() {
        let mut repo = RecallRepository::default();
        let template = repo.create(
            audio_scope(),
            RecallFlags::template(),
            RecallKind::DelayAudioRun(DelayAudioRun::default()),
        );

        let id_a = RecallId::new_with(GroupId(1), None, None, None, false);
        let id_b = RecallId::new_with(GroupId(2), None, None, None, false);
        let a = repo.duplicate(template, &id_a).unwrap();
        let b = repo.duplicate(template, &id_b).unwrap();

        if let Some(RecallKind::DelayAudioRun(run)) = repo.get_mut(a).map(|r| r.kind_mut()) {
            run.advance(100);
            run.advance(100);
        }
        let counter_b = match repo.get(b).map(|r| r.kind()) {
            Some(RecallKind::DelayAudioRun(run)) => run.counter(),
            _ => unreachable!(),
        };
        assert_eq!(
            counter_b, 0,
            "mutating one instance must not affect its sibling"
        );
    }

    #[test]
    fn dependency_balance_via_notifications() {
        let mut repo = RecallRepository::default();
        let delay = repo.create(
            audio_scope(),
            RecallFlags::default(),
            RecallKind::DelayAudioRun(DelayAudioRun::default()),
        );

        repo.notify_dependency(delay, DependencyKind::ChannelRun, 1);
        repo.notify_dependency(delay, DependencyKind::ChannelRun, 1);
        match repo.get(delay).map(|r| r.kind()) {
            Some(RecallKind::DelayAudioRun(run)) => assert_eq!(run.recall_ref(), 2),
            _ => unreachable!(),
        }

        repo.notify_dependency(delay, DependencyKind::ChannelRun, -2);
        match repo.get(delay).map(|r| r.kind()) {
            Some(RecallKind::DelayAudioRun(run)) => assert_eq!(run.recall_ref(), 0),
            _ => unreachable!(),
        }
    }

    #[test]
    fn done_hides_and_schedules_removal() {
        let mut repo = RecallRepository::default();
        let uid = repo.create(
            audio_scope(),
            RecallFlags::default(),
            RecallKind::CopyPatternAudio(CopyPatternAudio::default()),
        );
        repo.done(uid);
        let recall = repo.get(uid).unwrap();
        assert!(recall.flags().done);
        assert!(recall.flags().hide);
        assert!(recall.flags().remove);
    }

    #[test]
    fn remove_completes_propagate_done_parent() {
        let mut repo = RecallRepository::default();
        let parent = repo.create(
            audio_scope(),
            RecallFlags {
                propagate_done: true,
                ..Default::default()
            },
            RecallKind::DelayAudioRun(DelayAudioRun::default()),
        );
        let child = repo.create(
            audio_scope(),
            RecallFlags::default(),
            RecallKind::CopyPatternAudio(CopyPatternAudio::default()),
        );
        repo.add_child(parent, child);

        assert!(!repo.get(parent).unwrap().flags().done);
        repo.remove(child);
        assert!(
            repo.get(parent).unwrap().flags().done,
            "removing the last child should complete a propagate-done parent"
        );
    }

    #[test]
    fn remove_refuses_while_children_remain() {
        let mut repo = RecallRepository::default();
        let parent = repo.create(
            audio_scope(),
            RecallFlags::default(),
            RecallKind::DelayAudioRun(DelayAudioRun::default()),
        );
        let child = repo.create(
            audio_scope(),
            RecallFlags::default(),
            RecallKind::CopyPatternAudio(CopyPatternAudio::default()),
        );
        repo.add_child(parent, child);

        repo.remove(parent);
        assert!(
            repo.get(parent).is_some(),
            "a parent with live children must not be removed"
        );

        repo.remove(child);
        repo.remove(parent);
        assert!(repo.get(parent).is_none());
    }
}
