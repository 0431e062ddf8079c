//! The arena itself (§4.A, §9 "Cyclic graph ownership").

use super::{Transition, TransitionId, TransitionKind, Trigger, Vertex, VertexData, VertexId, VertexKind};
use crate::error::{EngineResult, StructuralError};

/// An arena of vertices and transitions. Vertices are addressed by
/// [`VertexId`], an index into `vertices`; transitions likewise by
/// [`TransitionId`]. The graph is mutable during construction and is
/// frozen once the owning machine starts (§3 Lifecycle).
pub struct Graph<C, E> {
    vertices: Vec<Vertex<C, E>>,
    transitions: Vec<Transition<C, E>>,
    root: VertexId,
    frozen: bool,
}

impl<C, E> Graph<C, E> {
    /// Creates a graph with a single root Composite vertex. All top-level
    /// states are children of this (unnamed, diagnostics-only) root.
    pub fn new() -> Self {
        let root = Vertex {
            id: VertexId(0),
            name: Some("<root>".to_string()),
            parent: None,
            kind: VertexKind::Composite,
            data: VertexData::default(),
        };
        Self {
            vertices: vec![root],
            transitions: Vec::new(),
            root: VertexId(0),
            frozen: false,
        }
    }

    pub fn root(&self) -> VertexId {
        self.root
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    fn check_mutable(&self) -> EngineResult<()> {
        if self.frozen {
            return Err(StructuralError::BuilderAfterStart.into());
        }
        Ok(())
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex<C, E> {
        &self.vertices[id.index()]
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex<C, E> {
        &mut self.vertices[id.index()]
    }

    pub fn try_vertex(&self, id: VertexId) -> EngineResult<&Vertex<C, E>> {
        self.vertices
            .get(id.index())
            .ok_or(StructuralError::UnknownVertex(id).into())
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex<C, E>> {
        self.vertices.iter()
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition<C, E>> {
        self.transitions.iter()
    }

    pub fn transition(&self, id: TransitionId) -> &Transition<C, E> {
        &self.transitions[id.0]
    }

    /// Adds a vertex as a child of `parent` (or as a sibling of the root
    /// if `parent` is `None`). Composite/Parallel parents get the new
    /// vertex appended to their ordered `children` list — order of
    /// declaration is significant (§4.A).
    pub fn add_vertex(
        &mut self,
        kind: VertexKind,
        name: Option<String>,
        parent: Option<VertexId>,
        data: VertexData<C, E>,
    ) -> EngineResult<VertexId> {
        self.check_mutable()?;
        let parent = parent.unwrap_or(self.root);
        self.try_vertex(parent)?;

        let id = VertexId(self.vertices.len());
        self.vertices.push(Vertex {
            id,
            name,
            parent: Some(parent),
            kind,
            data,
        });

        let parent_vertex = self.vertex_mut(parent);
        parent_vertex.data.children.push(id);
        let is_initial_pseudostate = kind == VertexKind::Initial;
        if is_initial_pseudostate && parent_vertex.data.initial_child.is_none() {
            parent_vertex.data.initial_child = Some(id);
        }
        Ok(id)
    }

    /// Explicitly designates `child` as the initial child of `composite`,
    /// overriding initial-state inference.
    pub fn set_initial(&mut self, composite: VertexId, child: VertexId) -> EngineResult<()> {
        self.check_mutable()?;
        self.try_vertex(child)?;
        self.vertex_mut(composite).data.initial_child = Some(child);
        Ok(())
    }

    pub fn set_history_default(&mut self, history: VertexId, target: VertexId) -> EngineResult<()> {
        self.check_mutable()?;
        self.try_vertex(target)?;
        self.vertex_mut(history).data.history_default = Some(target);
        Ok(())
    }

    pub fn add_transition(
        &mut self,
        source: VertexId,
        target: VertexId,
        kind: TransitionKind,
        trigger: Trigger<E>,
        guard: Option<std::sync::Arc<dyn super::Guard<C, E>>>,
        action: Option<std::sync::Arc<std::sync::Mutex<Box<dyn super::Action<C, E>>>>>,
        label: Option<String>,
    ) -> EngineResult<TransitionId> {
        self.check_mutable()?;
        self.try_vertex(source)?;
        self.try_vertex(target)?;
        if matches!(kind, TransitionKind::Internal) && source != target {
            return Err(StructuralError::UnsupportedPseudostate {
                kind: "Internal",
                detail: "internal transitions require source == target".to_string(),
            }
            .into());
        }
        let id = TransitionId(self.transitions.len());
        self.transitions.push(Transition {
            id,
            label,
            source,
            target,
            kind,
            trigger,
            guard,
            action,
            is_else: false,
        });
        Ok(id)
    }

    pub fn mark_else(&mut self, id: TransitionId) {
        self.transitions[id.0].is_else = true;
    }

    pub fn parent(&self, id: VertexId) -> Option<VertexId> {
        self.vertex(id).parent
    }

    pub fn children(&self, id: VertexId) -> &[VertexId] {
        &self.vertex(id).data.children
    }

    /// `id` and every ancestor up to and including the root, nearest first.
    pub fn ancestors(&self, id: VertexId) -> Vec<VertexId> {
        let mut chain = vec![id];
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            chain.push(p);
            cur = p;
        }
        chain
    }

    pub fn is_ancestor(&self, ancestor: VertexId, of: VertexId) -> bool {
        self.ancestors(of).contains(&ancestor)
    }

    pub fn depth(&self, id: VertexId) -> usize {
        self.ancestors(id).len() - 1
    }

    /// The deepest composite that is an ancestor of both `a` and `b`,
    /// inclusive (§4.A). The root is always a common ancestor, so this
    /// never fails for two vertices of the same graph.
    pub fn lca(&self, a: VertexId, b: VertexId) -> EngineResult<VertexId> {
        let a_chain = self.ancestors(a);
        let b_chain: std::collections::HashSet<_> = self.ancestors(b).into_iter().collect();
        a_chain
            .into_iter()
            .find(|v| b_chain.contains(v))
            .ok_or(StructuralError::NoCommonAncestor(a, b).into())
    }

    pub fn outgoing(&self, id: VertexId) -> Vec<&Transition<C, E>> {
        self.transitions.iter().filter(|t| t.source == id).collect()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Removes a vertex and every transition incident to it. Used by
    /// masking (§4.C); does not renumber ids, so existing `VertexId`s to
    /// other vertices stay valid.
    pub(crate) fn remove_vertex_and_incident_transitions(&mut self, id: VertexId) {
        if let Some(parent) = self.parent(id) {
            self.vertex_mut(parent).data.children.retain(|c| *c != id);
            let parent_vertex = self.vertex_mut(parent);
            if parent_vertex.data.initial_child == Some(id) {
                parent_vertex.data.initial_child = None;
            }
        }
        self.transitions
            .retain(|t| t.source != id && t.target != id);
    }

    /// Deep-clones the subtree rooted at `root` (from a *different* graph,
    /// typically a reusable template) into `self`, as a new child of
    /// `new_parent` (§4.C "Composition & masking"). Every vertex in the
    /// subtree gets a freshly allocated `VertexId` in `self`'s arena;
    /// behavior hooks, guards and actions are shared (via `Arc`) rather
    /// than duplicated, so semantics survive the clone but identity does
    /// not — the clone's ids are meaningless to the template graph and
    /// vice versa. Only transitions with both endpoints inside the
    /// subtree are carried over; a transition crossing into the template's
    /// surrounding graph would dangle and is silently dropped (masking,
    /// §4.C, is the mechanism for pruning those before composition).
    pub fn clone_subtree_from(
        &mut self,
        template: &Graph<C, E>,
        root: VertexId,
        new_parent: VertexId,
    ) -> EngineResult<VertexId> {
        self.check_mutable()?;
        self.try_vertex(new_parent)?;
        template.try_vertex(root)?;

        let mut old_to_new = std::collections::HashMap::new();
        let mut subtree = Vec::new();
        let mut stack = vec![root];
        while let Some(old_id) = stack.pop() {
            subtree.push(old_id);
            stack.extend(template.children(old_id).iter().copied());
        }

        // Allocate clones first so every remap target is known before any
        // children/initial_child/transition endpoint is rewritten.
        for &old_id in &subtree {
            let old_vertex = template.vertex(old_id);
            let new_id = VertexId(self.vertices.len());
            self.vertices.push(old_vertex.structural_clone(new_id));
            old_to_new.insert(old_id, new_id);
        }

        for &old_id in &subtree {
            let old_vertex = template.vertex(old_id);
            let new_id = old_to_new[&old_id];
            let parent = if old_id == root {
                new_parent
            } else {
                old_to_new[&old_vertex.parent.expect("non-root subtree vertex has a parent")]
            };
            self.vertex_mut(new_id).parent = Some(parent);
            self.vertex_mut(new_id).data.children = old_vertex
                .data
                .children
                .iter()
                .map(|c| old_to_new[c])
                .collect();
            self.vertex_mut(new_id).data.initial_child =
                old_vertex.data.initial_child.map(|c| old_to_new[&c]);
            self.vertex_mut(new_id).data.history_default =
                old_vertex.data.history_default.map(|c| old_to_new[&c]);
        }

        self.vertex_mut(new_parent).data.children.push(old_to_new[&root]);

        for t in template.transitions() {
            if let (Some(&src), Some(&tgt)) = (old_to_new.get(&t.source), old_to_new.get(&t.target)) {
                let mut cloned = t.clone();
                cloned.source = src;
                cloned.target = tgt;
                cloned.id = TransitionId(self.transitions.len());
                self.transitions.push(cloned);
            }
        }

        Ok(old_to_new[&root])
    }
}

impl<C, E> Default for Graph<C, E> {
    fn default() -> Self {
        Self::new()
    }
}
