//! The live configuration: the set of currently active vertices (§3
//! "Configuration", §8 invariants).

use crate::graph::{Graph, VertexId, VertexKind};
use std::collections::HashSet;

/// The set of active vertices. Strictly consumer-thread-local once the
/// machine has started (§5): only the RTC executor mutates it.
#[derive(Debug, Default, Clone)]
pub struct Configuration {
    active: HashSet<VertexId>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: VertexId) -> bool {
        self.active.contains(&id)
    }

    pub fn insert(&mut self, id: VertexId) {
        self.active.insert(id);
    }

    pub fn remove(&mut self, id: VertexId) {
        self.active.remove(&id);
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.active.iter().copied()
    }

    /// Active vertices with no active child — the innermost state of
    /// every active branch (one per orthogonal region). Candidate
    /// gathering (§4.D step 1) starts from these and ascends.
    pub fn leaves<C, E>(&self, graph: &Graph<C, E>) -> Vec<VertexId> {
        self.active
            .iter()
            .copied()
            .filter(|&v| !graph.children(v).iter().any(|c| self.active.contains(c)))
            .collect()
    }

    /// Every active descendant of `root` (inclusive), shallowest first.
    /// Used both for the exit set (§4.E.1) and for deep-history snapshots.
    pub fn active_descendants<C, E>(&self, graph: &Graph<C, E>, root: VertexId) -> Vec<VertexId> {
        let mut out = Vec::new();
        if !self.active.contains(&root) {
            return out;
        }
        let mut queue = std::collections::VecDeque::from([root]);
        while let Some(v) = queue.pop_front() {
            out.push(v);
            for &child in graph.children(v) {
                if self.active.contains(&child) {
                    queue.push_back(child);
                }
            }
        }
        out
    }

    /// §8 "Composite exclusivity": for any active non-parallel composite,
    /// exactly one child is active (a Final that hasn't bubbled yet is
    /// the documented transient exception, so callers checking this
    /// invariant between RTC steps rather than mid-step will never see
    /// it violated).
    pub fn composite_exclusivity_holds<C, E>(&self, graph: &Graph<C, E>) -> bool {
        for v in self.iter() {
            let vertex = graph.vertex(v);
            if vertex.kind != VertexKind::Composite {
                continue;
            }
            let active_children: Vec<_> = graph
                .children(v)
                .iter()
                .copied()
                .filter(|c| self.contains(*c))
                .collect();
            if active_children.len() > 1 {
                return false;
            }
        }
        true
    }

    /// §8 "Configuration closure": every active vertex's parent is active
    /// or it is the root.
    pub fn closure_holds<C, E>(&self, graph: &Graph<C, E>) -> bool {
        self.iter().all(|v| match graph.parent(v) {
            Some(p) => self.contains(p),
            None => true,
        })
    }

    /// §8 "Pseudostate transience": no non-history pseudostate is active.
    pub fn no_transient_pseudostate_active<C, E>(&self, graph: &Graph<C, E>) -> bool {
        self.iter().all(|v| !graph.vertex(v).kind.is_transient_pseudostate())
    }

    /// The exit set of an External transition rooted at `source`, given
    /// `lca` = LCA(source, target) (§4.E.1): every active vertex on the
    /// path from the deepest active descendant of `source` up through
    /// `source`'s ancestors, stopping below `lca`. Internal transitions
    /// have an empty exit set and never call this.
    pub fn exit_set<C, E>(&self, graph: &Graph<C, E>, source: VertexId, lca: VertexId) -> HashSet<VertexId> {
        let mut exit: HashSet<VertexId> = self.active_descendants(graph, source).into_iter().collect();
        let mut cur = graph.parent(source);
        while let Some(p) = cur {
            if p == lca {
                break;
            }
            if self.contains(p) {
                exit.insert(p);
            }
            cur = graph.parent(p);
        }
        exit
    }
}
