//! History records (§3 "History record", §4.E step 3).

use crate::graph::{VertexId, VertexKind};
use std::collections::HashMap;

/// What was captured for a composite's history pseudostate at the moment
/// it was last exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistorySnapshot {
    /// Shallow history: only the direct active child. On restore, normal
    /// recursive-initial-entry resumes from that child.
    Shallow(VertexId),
    /// Deep history: every active descendant under the composite,
    /// ordered shallowest first. On restore, each is entered explicitly
    /// rather than re-derived from initial-state inference.
    Deep(Vec<VertexId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HistoryKey(VertexId, HistoryKindTag);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum HistoryKindTag {
    Shallow,
    Deep,
}

impl From<VertexKind> for HistoryKindTag {
    fn from(kind: VertexKind) -> Self {
        match kind {
            VertexKind::ShallowHistory => HistoryKindTag::Shallow,
            VertexKind::DeepHistory => HistoryKindTag::Deep,
            _ => panic!("not a history vertex kind: {:?}", kind),
        }
    }
}

/// Per-machine store of history snapshots, keyed by the composite that
/// owns the history pseudostate (a composite may carry at most one
/// shallow and one deep history pseudostate simultaneously).
#[derive(Debug, Default)]
pub struct HistoryStore {
    records: HashMap<HistoryKey, HistorySnapshot>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_shallow(&mut self, composite: VertexId, active_child: VertexId) {
        self.records.insert(
            HistoryKey(composite, HistoryKindTag::Shallow),
            HistorySnapshot::Shallow(active_child),
        );
    }

    pub fn record_deep(&mut self, composite: VertexId, active_descendants: Vec<VertexId>) {
        self.records.insert(
            HistoryKey(composite, HistoryKindTag::Deep),
            HistorySnapshot::Deep(active_descendants),
        );
    }

    pub fn shallow(&self, composite: VertexId) -> Option<&HistorySnapshot> {
        self.records.get(&HistoryKey(composite, HistoryKindTag::Shallow))
    }

    pub fn deep(&self, composite: VertexId) -> Option<&HistorySnapshot> {
        self.records.get(&HistoryKey(composite, HistoryKindTag::Deep))
    }

    pub fn for_kind(&self, composite: VertexId, kind: VertexKind) -> Option<&HistorySnapshot> {
        self.records.get(&HistoryKey(composite, kind.into()))
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shallow_and_deep_coexist_independently() {
        let mut store = HistoryStore::new();
        let composite = VertexId(1);
        store.record_shallow(composite, VertexId(2));
        store.record_deep(composite, vec![VertexId(3), VertexId(4)]);

        assert_eq!(store.shallow(composite), Some(&HistorySnapshot::Shallow(VertexId(2))));
        assert_eq!(
            store.deep(composite),
            Some(&HistorySnapshot::Deep(vec![VertexId(3), VertexId(4)]))
        );
    }

    #[test]
    fn unrecorded_composite_has_no_snapshot() {
        let store = HistoryStore::new();
        assert_eq!(store.shallow(VertexId(9)), None);
    }
}
