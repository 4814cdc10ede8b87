// Copyright (c) 2024 Mike Tsao

use super::{AudioSignal, SignalUid};
use crate::{recall::GroupId, topology::ChannelUid, types::UidFactory};
use crate::types::IsUid;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use synonym::Synonym;

/// An identifier for a [Recycling].
#[derive(Synonym, Serialize, Deserialize, Eq, PartialEq)]
#[synonym(skip(PartialEq))]
#[serde(rename_all = "kebab-case")]
pub struct RecyclingUid(pub usize);
impl IsUid for RecyclingUid {
    fn as_usize(&self) -> usize {
        self.0
    }
}

/// An ordered container of [AudioSignal]s owned by exactly one channel.
///
/// Insertion order is playback priority: the template signal, if present, is
/// always first. `prev`/`next` stitch recyclings into chains so that a range
/// (`first..=last`, as recorded by a channel) can be walked contiguously
/// even when the range spans several pads.
#[derive(Debug)]
pub struct Recycling {
    uid: RecyclingUid,
    channel: ChannelUid,
    prev: Option<RecyclingUid>,
    next: Option<RecyclingUid>,
    signals: Vec<AudioSignal>,
}
impl Recycling {
    fn new(uid: RecyclingUid, channel: ChannelUid) -> Self {
        Self {
            uid,
            channel,
            prev: None,
            next: None,
            signals: Default::default(),
        }
    }

    #[allow(missing_docs)]
    pub fn uid(&self) -> RecyclingUid {
        self.uid
    }

    /// The channel that owns this recycling.
    pub fn channel(&self) -> ChannelUid {
        self.channel
    }

    #[allow(missing_docs)]
    pub fn prev(&self) -> Option<RecyclingUid> {
        self.prev
    }

    #[allow(missing_docs)]
    pub fn next(&self) -> Option<RecyclingUid> {
        self.next
    }

    /// The persistent template signal, if one has been installed.
    pub fn template(&self) -> Option<&AudioSignal> {
        self.signals.first().filter(|s| s.is_template())
    }

    /// Adds a signal. A template goes to the front, replacing any existing
    /// template; transients append in arrival order.
    pub fn add_audio_signal(&mut self, signal: AudioSignal) {
        if signal.is_template() {
            if self.template().is_some() {
                self.signals[0] = signal;
            } else {
                self.signals.insert(0, signal);
            }
        } else {
            self.signals.push(signal);
        }
    }

    /// Removes the signal with the given uid, returning it if present.
    pub fn remove_audio_signal(&mut self, uid: SignalUid) -> Option<AudioSignal> {
        let index = self.signals.iter().position(|s| s.uid() == uid)?;
        Some(self.signals.remove(index))
    }

    /// Creates a transient signal that plays this recycling's template, tagged
    /// with the producing run's group id, and adds it. Returns its uid, or
    /// None if no template is installed.
    pub fn create_audio_signal_with_defaults(
        &mut self,
        uid: SignalUid,
        group_id: GroupId,
        attack: usize,
    ) -> Option<SignalUid> {
        let template = self.template()?;
        let signal = AudioSignal::from_template(uid, template, group_id, attack);
        self.signals.push(signal);
        Some(uid)
    }

    /// All signals, template first.
    pub fn signals(&self) -> &[AudioSignal] {
        &self.signals
    }

    #[allow(missing_docs)]
    pub fn signals_mut(&mut self) -> &mut [AudioSignal] {
        &mut self.signals
    }

    /// Signals belonging to the given playback run.
    pub fn signals_for_group(&self, group_id: GroupId) -> impl Iterator<Item = &AudioSignal> {
        self.signals
            .iter()
            .filter(move |s| s.group_id() == Some(group_id))
    }

    /// Drops transient signals whose streams are exhausted. Returns how many
    /// were dropped.
    pub fn prune_exhausted(&mut self) -> usize {
        let before = self.signals.len();
        self.signals.retain(|s| !s.is_exhausted());
        before - self.signals.len()
    }
}

/// Owns every [Recycling] in the engine and the chain links between them.
/// Channels refer to recyclings by uid; destroying a channel destroys its
/// recyclings here.
#[derive(Debug)]
pub struct RecyclingArena {
    uid_factory: UidFactory<RecyclingUid>,
    signal_uid_factory: UidFactory<SignalUid>,
    recyclings: FxHashMap<RecyclingUid, Recycling>,
    buffer_size: crate::types::BufferSize,
}
impl Default for RecyclingArena {
    fn default() -> Self {
        Self {
            uid_factory: UidFactory::new(1),
            signal_uid_factory: UidFactory::new(1),
            recyclings: Default::default(),
            buffer_size: Default::default(),
        }
    }
}
impl RecyclingArena {
    /// Sets the period size used for freshly seeded template signals.
    pub fn set_buffer_size(&mut self, buffer_size: crate::types::BufferSize) {
        self.buffer_size = buffer_size;
    }

    /// Creates a new recycling owned by the given channel. It is born with a
    /// one-period silent template signal; loading a sample or holding a note
    /// replaces that template.
    pub fn create(&mut self, channel: ChannelUid) -> RecyclingUid {
        let uid = self.uid_factory.mint_next();
        let mut recycling = Recycling::new(uid, channel);
        let template_uid = self.signal_uid_factory.mint_next();
        recycling.add_audio_signal(AudioSignal::new_template(template_uid, self.buffer_size, 1));
        self.recyclings.insert(uid, recycling);
        uid
    }

    /// Mints a uid for a new [AudioSignal]. Decoders and recalls use this
    /// before constructing a signal.
    pub fn mint_signal_uid(&self) -> SignalUid {
        self.signal_uid_factory.mint_next()
    }

    /// Removes a recycling, splicing its neighbors together.
    pub fn remove(&mut self, uid: RecyclingUid) -> Option<Recycling> {
        let removed = self.recyclings.remove(&uid)?;
        if let Some(prev) = removed.prev {
            if let Some(r) = self.recyclings.get_mut(&prev) {
                r.next = removed.next;
            }
        }
        if let Some(next) = removed.next {
            if let Some(r) = self.recyclings.get_mut(&next) {
                r.prev = removed.prev;
            }
        }
        Some(removed)
    }

    #[allow(missing_docs)]
    pub fn get(&self, uid: RecyclingUid) -> Option<&Recycling> {
        self.recyclings.get(&uid)
    }

    #[allow(missing_docs)]
    pub fn get_mut(&mut self, uid: RecyclingUid) -> Option<&mut Recycling> {
        self.recyclings.get_mut(&uid)
    }

    /// Splices `a -> b` in the chain. Passing None clears the respective
    /// pointer.
    pub fn stitch(&mut self, a: Option<RecyclingUid>, b: Option<RecyclingUid>) {
        if let Some(a) = a {
            if let Some(r) = self.recyclings.get_mut(&a) {
                r.next = b;
            }
        }
        if let Some(b) = b {
            if let Some(r) = self.recyclings.get_mut(&b) {
                r.prev = a;
            }
        }
    }

    /// The uids of the chain segment `first..=last`, in order. An invalid
    /// range (broken chain) yields the reachable prefix.
    pub fn range_uids(&self, first: RecyclingUid, last: RecyclingUid) -> Vec<RecyclingUid> {
        let mut uids = Vec::new();
        let mut current = Some(first);
        while let Some(uid) = current {
            if !self.recyclings.contains_key(&uid) {
                break;
            }
            uids.push(uid);
            if uid == last {
                break;
            }
            current = self.recyclings.get(&uid).and_then(|r| r.next);
        }
        uids
    }

    /// The number of recyclings in the arena.
    pub fn len(&self) -> usize {
        self.recyclings.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.recyclings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BufferSize;

    #[test]
    fn recyclings_are_born_with_a_template() {
        let mut arena = RecyclingArena::default();
        let r_uid = arena.create(ChannelUid(1));
        let recycling = arena.get(r_uid).unwrap();
        assert!(recycling.template().is_some());
        assert_eq!(recycling.signals().len(), 1);
    }

    #[test]
    fn template_stays_first() {
        let mut arena = RecyclingArena::default();
        let r_uid = arena.create(ChannelUid(1));

        let transient_uid = arena.mint_signal_uid();
        let template_uid = arena.mint_signal_uid();
        let recycling = arena.get_mut(r_uid).unwrap();

        let group = GroupId(9);
        let mut transient = AudioSignal::new_with(transient_uid, BufferSize::new(4), group);
        transient.append_buffer(&[0.0; 4]);
        recycling.add_audio_signal(transient);
        recycling.add_audio_signal(AudioSignal::new_template(template_uid, BufferSize::new(4), 2));

        assert!(
            recycling.signals()[0].is_template(),
            "template should sort to the front regardless of insertion order"
        );
        assert_eq!(
            recycling.signals().len(),
            2,
            "a new template replaces the seeded one instead of piling up"
        );
        assert_eq!(recycling.signals_for_group(group).count(), 1);
    }

    #[test]
    fn create_with_defaults_requires_template() {
        let mut arena = RecyclingArena::default();
        let r_uid = arena.create(ChannelUid(1));
        let signal_uid = arena.mint_signal_uid();

        let seeded = arena.get(r_uid).unwrap().template().unwrap().uid();
        arena.get_mut(r_uid).unwrap().remove_audio_signal(seeded);
        assert!(
            arena
                .get_mut(r_uid)
                .unwrap()
                .create_audio_signal_with_defaults(signal_uid, GroupId(1), 0)
                .is_none(),
            "a recycling without a template has nothing to instantiate"
        );

        let template_uid = arena.mint_signal_uid();
        let recycling = arena.get_mut(r_uid).unwrap();
        recycling.add_audio_signal(AudioSignal::new_template(template_uid, BufferSize::new(4), 2));
        let created = recycling
            .create_audio_signal_with_defaults(signal_uid, GroupId(1), 3)
            .unwrap();
        let signal = recycling
            .signals()
            .iter()
            .find(|s| s.uid() == created)
            .unwrap();
        assert!(!signal.is_template());
        assert_eq!(signal.length(), 2, "instance should copy template length");
        assert_eq!(signal.pending_attack(), 3);
    }

    #[test]
    fn prune_drops_only_exhausted_transients() {
        let mut arena = RecyclingArena::default();
        let r_uid = arena.create(ChannelUid(1));
        let signal_uid = arena.mint_signal_uid();

        let recycling = arena.get_mut(r_uid).unwrap();
        recycling.create_audio_signal_with_defaults(signal_uid, GroupId(1), 0);

        assert_eq!(recycling.prune_exhausted(), 0);
        for signal in recycling.signals_mut() {
            if !signal.is_template() {
                signal.advance();
            }
        }
        assert_eq!(recycling.prune_exhausted(), 1);
        assert!(
            recycling.template().is_some(),
            "the template must survive pruning"
        );
    }

    #[test]
    fn chain_ranges_walk_in_order() {
        let mut arena = RecyclingArena::default();
        let a = arena.create(ChannelUid(1));
        let b = arena.create(ChannelUid(2));
        let c = arena.create(ChannelUid(3));
        arena.stitch(Some(a), Some(b));
        arena.stitch(Some(b), Some(c));

        assert_eq!(arena.range_uids(a, c), vec![a, b, c]);
        assert_eq!(arena.range_uids(b, b), vec![b]);

        arena.remove(b);
        assert_eq!(
            arena.range_uids(a, c),
            vec![a, c],
            "removal should splice neighbors together"
        );
    }
}
