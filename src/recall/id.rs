// Copyright (c) 2024 Mike Tsao

//! Group ids, [RecallId] lineage, and the list helpers channels use to
//! track which passes they participate in.

use crate::{buffer::RecyclingUid, types::IsUid};
use serde::{Deserialize, Serialize};
use synonym::Synonym;

/// The identifier binding together every recall instance created for one
/// playback pass. Group ids are minted by an atomic factory and are never
/// reused within a process, which is what lets two concurrently triggered
/// machines coexist on the same channels without seeing each other's state.
#[derive(Synonym, Serialize, Deserialize, Eq, PartialEq)]
#[synonym(skip(PartialEq))]
#[serde(rename_all = "kebab-case")]
pub struct GroupId(pub usize);
impl IsUid for GroupId {
    fn as_usize(&self) -> usize {
        self.0
    }
}

/// The versioning token for one playback invocation, as seen from one
/// channel or audio.
///
/// A pass that crosses a recycling boundary (into a machine whose outputs
/// originate fresh audio) continues under a child group id; the lineage
/// recorded here is how dependency notifications find the right peers on
/// either side of the boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct RecallId {
    /// This level's own group id.
    pub group_id: GroupId,
    /// The group id of the level above, if this level was entered through a
    /// recycling boundary.
    pub parent_group_id: Option<GroupId>,
    /// The group id assigned to levels below the next recycling boundary.
    pub child_group_id: Option<GroupId>,
    /// Limits which recyclings this pass's recalls may touch, when the pass
    /// was started from a channel partway down the graph.
    pub region: Option<(RecyclingUid, RecyclingUid)>,
    /// True when the level above runs in the background ("recall") list
    /// rather than the live ("play") list.
    pub higher_level_is_recall: bool,
}
impl RecallId {
    /// Creates a new [RecallId].
    pub fn new_with(
        group_id: GroupId,
        parent_group_id: Option<GroupId>,
        child_group_id: Option<GroupId>,
        region: Option<(RecyclingUid, RecyclingUid)>,
        higher_level_is_recall: bool,
    ) -> Self {
        Self {
            group_id,
            parent_group_id,
            child_group_id,
            region,
            higher_level_is_recall,
        }
    }
}

/// Finds the [RecallId] with the given group id.
pub fn find_group_id(ids: &[RecallId], group_id: GroupId) -> Option<&RecallId> {
    ids.iter().find(|id| id.group_id == group_id)
}

/// Finds the [RecallId] whose parent is the given group id. This is the
/// lookup used when descending across a recycling boundary: the level below
/// carries its own group id, but remembers the caller's.
pub fn find_parent_group_id(ids: &[RecallId], parent_group_id: GroupId) -> Option<&RecallId> {
    ids.iter()
        .find(|id| id.parent_group_id == Some(parent_group_id))
}

/// Inserts a new [RecallId] into a channel's (or audio's) id list, returning
/// a reference to it. The caller provides the complete lineage; this only
/// guards against double insertion of the same group.
pub fn add(ids: &mut Vec<RecallId>, id: RecallId) -> &RecallId {
    if let Some(index) = ids.iter().position(|existing| existing.group_id == id.group_id) {
        ids[index] = id;
        &ids[index]
    } else {
        ids.push(id);
        ids.last().unwrap()
    }
}

/// Removes every [RecallId] belonging to the given group.
pub fn remove_group(ids: &mut Vec<RecallId>, group_id: GroupId) {
    ids.retain(|id| id.group_id != group_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lineage_lookups() {
        let mut ids = Vec::default();
        add(
            &mut ids,
            RecallId::new_with(GroupId(1), None, Some(GroupId(2)), None, false),
        );
        add(
            &mut ids,
            RecallId::new_with(GroupId(2), Some(GroupId(1)), None, None, false),
        );

        assert_eq!(find_group_id(&ids, GroupId(1)).unwrap().group_id, GroupId(1));
        assert!(find_group_id(&ids, GroupId(3)).is_none());

        let child = find_parent_group_id(&ids, GroupId(1)).unwrap();
        assert_eq!(
            child.group_id,
            GroupId(2),
            "descending a boundary should find the child by parent lineage"
        );
    }

    #[test]
    fn add_replaces_same_group() {
        let mut ids = Vec::default();
        add(
            &mut ids,
            RecallId::new_with(GroupId(1), None, None, None, false),
        );
        add(
            &mut ids,
            RecallId::new_with(GroupId(1), None, Some(GroupId(5)), None, true),
        );
        assert_eq!(ids.len(), 1, "same group should not be double-inserted");
        assert!(ids[0].higher_level_is_recall);

        remove_group(&mut ids, GroupId(1));
        assert!(ids.is_empty());
    }
}
