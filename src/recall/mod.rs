// Copyright (c) 2024 Mike Tsao

//! The recall layer: the polymorphic unit of audio-processing behavior.
//!
//! A recall exists in one of two roles distinguished by a flag, not a type:
//! an immutable *template* built at topology-edit time, or a per-run
//! *instance* produced by duplicating a template under a [RecallId]. All
//! recalls of both roles live in one [RecallRepository] arena and refer to
//! each other by uid, which keeps the parent/child structure cycle-free and
//! lets instances be dropped without reference counting.

use crate::types::IsUid;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use synonym::Synonym;

/// The most commonly used imports.
pub mod prelude {
    pub use super::{
        DependencyKind, GroupId, Recall, RecallFlags, RecallId, RecallKind, RecallRepository,
        RecallScope, RecallUid, RunContext, RunStage,
    };
}

pub use {
    id::{GroupId, RecallId},
    kinds::{BridgeRecall, PlayChannelRun, RecallKind, VolumeChannelRun},
    repository::{RecallRepository, RunContext},
};

pub mod id;
mod kinds;
mod repository;

/// An identifier for a [Recall] in the repository arena.
#[derive(Synonym, Serialize, Deserialize, Eq, PartialEq)]
#[synonym(skip(PartialEq))]
#[serde(rename_all = "kebab-case")]
pub struct RecallUid(pub usize);
impl IsUid for RecallUid {
    fn as_usize(&self) -> usize {
        self.0
    }
}

/// The three sub-stages every run step goes through, in fixed order: pre
/// produces and triggers, inter mixes and applies, post finalizes and cleans
/// up.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum RunStage {
    #[allow(missing_docs)]
    Pre,
    #[allow(missing_docs)]
    Inter,
    #[allow(missing_docs)]
    Post,
}
impl RunStage {
    /// All stages in execution order.
    pub const ALL: [RunStage; 3] = [RunStage::Pre, RunStage::Inter, RunStage::Post];
}

/// Which counter a dependency notification targets.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum DependencyKind {
    /// The dependent is an audio-scope run.
    AudioRun,
    /// The dependent is a channel-scope run.
    ChannelRun,
}

/// Where a recall is attached: to a whole audio, or to one of its channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecallScope {
    /// Attached to an audio; runs once per audio channel per tic.
    Audio(crate::topology::AudioUid),
    /// Attached to a single channel.
    Channel(crate::topology::ChannelUid),
}

/// The lifecycle state bits of a [Recall].
///
/// `template` is set for the inert editing-time master copy and never for an
/// instance. `cancel` and `remove` are requests observed at stage
/// boundaries, never preemptively. `hide` keeps a finished instance
/// addressable (for dependency reporting) without running it. A
/// `propagate_done` parent completes itself when its last child is removed.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RecallFlags {
    #[allow(missing_docs)]
    pub template: bool,
    #[allow(missing_docs)]
    pub run_initialized: bool,
    #[allow(missing_docs)]
    pub persistent: bool,
    #[allow(missing_docs)]
    pub done: bool,
    #[allow(missing_docs)]
    pub cancel: bool,
    #[allow(missing_docs)]
    pub remove: bool,
    #[allow(missing_docs)]
    pub hide: bool,
    #[allow(missing_docs)]
    pub propagate_done: bool,
}
impl RecallFlags {
    /// Flags for a new template recall.
    pub fn template() -> Self {
        Self {
            template: true,
            ..Default::default()
        }
    }
}

/// A named unit of behavior: the heart of the design.
///
/// The shared representation carries lifecycle flags, the owning pass's
/// [RecallId] (instances only), and the parent/child tree that mirrors the
/// audio/channel containment; everything kind-specific lives in the tagged
/// [RecallKind].
#[derive(Debug)]
pub struct Recall {
    pub(crate) uid: RecallUid,
    pub(crate) scope: RecallScope,
    pub(crate) flags: RecallFlags,
    pub(crate) recall_id: Option<RecallId>,
    pub(crate) parent: Option<RecallUid>,
    pub(crate) children: Vec<RecallUid>,
    pub(crate) kind: RecallKind,
}
impl Recall {
    #[allow(missing_docs)]
    pub fn uid(&self) -> RecallUid {
        self.uid
    }

    /// Where this recall is attached.
    pub fn scope(&self) -> RecallScope {
        self.scope
    }

    #[allow(missing_docs)]
    pub fn flags(&self) -> &RecallFlags {
        &self.flags
    }

    /// The pass this instance belongs to. Templates have none.
    pub fn recall_id(&self) -> Option<&RecallId> {
        self.recall_id.as_ref()
    }

    /// This instance's group id, if it has a [RecallId].
    pub fn group_id(&self) -> Option<GroupId> {
        self.recall_id.as_ref().map(|id| id.group_id)
    }

    #[allow(missing_docs)]
    pub fn parent(&self) -> Option<RecallUid> {
        self.parent
    }

    #[allow(missing_docs)]
    pub fn children(&self) -> &[RecallUid] {
        &self.children
    }

    #[allow(missing_docs)]
    pub fn kind(&self) -> &RecallKind {
        &self.kind
    }

    #[allow(missing_docs)]
    pub fn kind_mut(&mut self) -> &mut RecallKind {
        &mut self.kind
    }

    /// A kebab-case name describing what this recall does.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}
