//! The graph builder DSL (§4.B).
//!
//! Vertex constructors return a [`VertexId`] immediately; the transition
//! association operation (`on`/`internal`) also returns the right-hand
//! (target) vertex, so chained association reads left to right:
//!
//! ```ignore
//! let s2 = builder.state(None, "s2")?;
//! let s1 = builder.state(None, "s1")?;
//! builder.on(s1, "a", s2)?;   // s1 --a--> s2
//! ```
//!
//! A literal, non-[`Trigger`] value passed as the trigger is lifted to an
//! equality trigger via [`Trigger::from`] (§4.B).

use crate::dispatch::Dispatch;
use crate::error::{EngineResult, StructuralError};
use crate::graph::{
    Action, Graph, Guard, Transition, TransitionId, TransitionKind, Trigger, Vertex, VertexData,
    VertexId, VertexKind,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Shallow,
    Deep,
}

/// Wraps a [`Graph`] under construction; once handed to a running
/// machine the underlying graph is frozen and every method here starts
/// failing with [`StructuralError::BuilderAfterStart`].
pub struct GraphBuilder<C, E> {
    graph: Graph<C, E>,
}

impl<C, E> GraphBuilder<C, E> {
    pub fn new() -> Self {
        Self { graph: Graph::new() }
    }

    pub fn root(&self) -> VertexId {
        self.graph.root()
    }

    pub fn into_graph(self) -> Graph<C, E> {
        self.graph
    }

    pub fn graph(&self) -> &Graph<C, E> {
        &self.graph
    }

    fn add(
        &mut self,
        kind: VertexKind,
        name: Option<&str>,
        parent: Option<VertexId>,
    ) -> EngineResult<VertexId> {
        self.graph
            .add_vertex(kind, name.map(str::to_string), parent, VertexData::default())
    }

    pub fn state(&mut self, parent: Option<VertexId>, name: &str) -> EngineResult<VertexId> {
        self.add(VertexKind::Simple, Some(name), parent)
    }

    pub fn composite(&mut self, parent: Option<VertexId>, name: &str) -> EngineResult<VertexId> {
        self.add(VertexKind::Composite, Some(name), parent)
    }

    /// Creates a Parallel state whose children are the given (already
    /// built) region roots, which must each be Composite vertices
    /// reparented under the new Parallel vertex.
    pub fn parallel(
        &mut self,
        parent: Option<VertexId>,
        name: &str,
        regions: &[VertexId],
    ) -> EngineResult<VertexId> {
        if regions.len() < 2 {
            return Err(StructuralError::NotEnoughRegions(self.graph.root()).into());
        }
        let id = self.add(VertexKind::Parallel, Some(name), parent)?;
        for region in regions {
            self.reparent(*region, id)?;
        }
        Ok(id)
    }

    /// Moves `vertex` (and implicitly its subtree, since children are
    /// tracked by the parent only) under `new_parent`.
    pub fn reparent(&mut self, vertex: VertexId, new_parent: VertexId) -> EngineResult<()> {
        if self.graph.is_frozen() {
            return Err(StructuralError::BuilderAfterStart.into());
        }
        if let Some(old_parent) = self.graph.parent(vertex) {
            let old = self.graph.vertex_mut(old_parent);
            old.data.children.retain(|c| *c != vertex);
            if old.data.initial_child == Some(vertex) {
                old.data.initial_child = None;
            }
        }
        self.graph.vertex_mut(vertex).parent = Some(new_parent);
        self.graph.vertex_mut(new_parent).data.children.push(vertex);
        Ok(())
    }

    pub fn initial(&mut self, parent: VertexId, name: &str) -> EngineResult<VertexId> {
        self.add(VertexKind::Initial, Some(name), Some(parent))
    }

    pub fn final_state(&mut self, parent: VertexId, name: &str) -> EngineResult<VertexId> {
        self.add(VertexKind::Final, Some(name), Some(parent))
    }

    pub fn terminate(&mut self, parent: VertexId, name: &str) -> EngineResult<VertexId> {
        self.add(VertexKind::Terminate, Some(name), Some(parent))
    }

    pub fn junction(&mut self, parent: VertexId, name: &str) -> EngineResult<VertexId> {
        self.add(VertexKind::Junction, Some(name), Some(parent))
    }

    pub fn history(
        &mut self,
        parent: VertexId,
        kind: HistoryKind,
        name: &str,
    ) -> EngineResult<VertexId> {
        let vk = match kind {
            HistoryKind::Shallow => VertexKind::ShallowHistory,
            HistoryKind::Deep => VertexKind::DeepHistory,
        };
        self.add(vk, Some(name), Some(parent))
    }

    /// Marks `child` as the designated initial substate of `composite`,
    /// overriding inference from the first `Initial` pseudostate declared.
    pub fn set_initial(&mut self, composite: VertexId, child: VertexId) -> EngineResult<()> {
        self.graph.set_initial(composite, child)
    }

    pub fn set_history_default(&mut self, history: VertexId, target: VertexId) -> EngineResult<()> {
        self.graph.set_history_default(history, target)
    }

    pub fn set_entry(
        &mut self,
        vertex: VertexId,
        hook: impl FnMut(&mut C, &Dispatch<E>) + Send + 'static,
    ) {
        self.graph.vertex_mut(vertex).data.entry =
            Some(Arc::new(Mutex::new(Box::new(hook))));
    }

    pub fn set_exit(
        &mut self,
        vertex: VertexId,
        hook: impl FnMut(&mut C, &Dispatch<E>) + Send + 'static,
    ) {
        self.graph.vertex_mut(vertex).data.exit =
            Some(Arc::new(Mutex::new(Box::new(hook))));
    }

    pub fn set_do_activity(&mut self, vertex: VertexId, hook: impl FnMut(&mut C) + Send + 'static) {
        self.graph.vertex_mut(vertex).data.do_activity =
            Some(Arc::new(Mutex::new(Box::new(hook))));
    }

    pub fn set_timeout(&mut self, vertex: VertexId, timeout: Duration) {
        self.graph.vertex_mut(vertex).data.timeout = Some(timeout);
    }

    /// Associates a transition `source --trigger--> target`, returning
    /// `target` so the call can be chained into the next association.
    #[allow(clippy::too_many_arguments)]
    pub fn on(
        &mut self,
        source: VertexId,
        trigger: impl Into<Trigger<E>>,
        target: VertexId,
    ) -> EngineResult<VertexId> {
        self.graph.add_transition(
            source,
            target,
            TransitionKind::External,
            trigger.into(),
            None,
            None,
            None,
        )?;
        Ok(target)
    }

    /// Like [`on`](Self::on) but attaches a guard.
    pub fn on_guarded(
        &mut self,
        source: VertexId,
        trigger: impl Into<Trigger<E>>,
        guard: impl Guard<C, E> + 'static,
        target: VertexId,
    ) -> EngineResult<VertexId> {
        self.graph.add_transition(
            source,
            target,
            TransitionKind::External,
            trigger.into(),
            Some(Arc::new(guard)),
            None,
            None,
        )?;
        Ok(target)
    }

    /// Full control: trigger, optional guard, optional action, optional
    /// label, explicit internal/external kind.
    #[allow(clippy::too_many_arguments)]
    pub fn transition(
        &mut self,
        source: VertexId,
        target: VertexId,
        kind: TransitionKind,
        trigger: impl Into<Trigger<E>>,
        guard: Option<Arc<dyn Guard<C, E>>>,
        action: Option<Arc<Mutex<Box<dyn Action<C, E>>>>>,
        label: Option<&str>,
    ) -> EngineResult<TransitionId> {
        self.graph.add_transition(
            source,
            target,
            kind,
            trigger.into(),
            guard,
            action,
            label.map(str::to_string),
        )
    }

    /// Adds a junction's "else" fallback: fires only if none of the
    /// junction's other guarded outgoing transitions matched (§3, §4.E).
    pub fn else_transition(
        &mut self,
        junction: VertexId,
        target: VertexId,
    ) -> EngineResult<TransitionId> {
        let id = self.graph.add_transition(
            junction,
            target,
            TransitionKind::External,
            Trigger::Completion,
            None,
            None,
            Some("else".to_string()),
        )?;
        self.graph.mark_else(id);
        Ok(id)
    }

    /// Attaches a *deep clone* of `template`'s subtree rooted at
    /// `template_root` as a new child of `parent` (§4.C "Composition &
    /// masking"). The clone gets fresh ids in this builder's graph;
    /// `template` is left untouched and may be reused to attach further
    /// copies (e.g. under several different outer machines), since
    /// sharing `VertexId` identity across machines is forbidden but
    /// sharing *behavior* (entry/exit/guard/action closures) is exactly
    /// the point of reuse.
    pub fn attach_template(
        &mut self,
        parent: VertexId,
        template: &Graph<C, E>,
        template_root: VertexId,
    ) -> EngineResult<VertexId> {
        self.graph.clone_subtree_from(template, template_root, parent)
    }

    /// Finds the single child of `composite` with the given name. Used as
    /// the lookup step of [`mask`](Self::mask).
    pub fn find_child_by_name(&self, composite: VertexId, name: &str) -> Option<VertexId> {
        self.graph
            .children(composite)
            .iter()
            .copied()
            .find(|c| self.graph.vertex(*c).name.as_deref() == Some(name))
    }

    /// Masks (removes) the child of `composite` named `name`, along with
    /// every transition incident to it — and, transitively, every
    /// transition incident to any of its descendants, since a masked
    /// composite takes its whole subtree with it (§4.C). This is a
    /// structural edit applied during construction, not a runtime
    /// dispatch trick: once masked, the vertex and its incoming/outgoing
    /// transitions simply no longer exist in the graph.
    ///
    /// Re-validates the enclosing composite afterward: it must still have
    /// an initial child if any children remain (§4.C). A template meant
    /// only for later composition — where the remaining stub isn't
    /// expected to be valid standalone — should finish its masking passes
    /// before anything downstream calls `validate`/`start` on it.
    pub fn mask(&mut self, composite: VertexId, name: &str) -> EngineResult<()> {
        let Some(target) = self.find_child_by_name(composite, name) else {
            return Ok(());
        };
        let mut subtree = vec![target];
        let mut stack = vec![target];
        while let Some(id) = stack.pop() {
            let children = self.graph.children(id).to_vec();
            subtree.extend(children.iter().copied());
            stack.extend(children);
        }
        // Remove deepest-first so a removed parent doesn't still list a
        // not-yet-removed child as one of its own.
        for id in subtree.into_iter().rev() {
            self.graph.remove_vertex_and_incident_transitions(id);
        }
        self.validate_composite(self.graph.vertex(composite))
    }

    /// Validates the graph against §6's construction-time rules. Called
    /// automatically by `start()`, but exposed so callers can validate
    /// ahead of time.
    pub fn validate(&self) -> EngineResult<()> {
        for vertex in self.graph.vertices() {
            match vertex.kind {
                VertexKind::Composite | VertexKind::Parallel => {
                    self.validate_composite(vertex)?;
                }
                VertexKind::Initial => {
                    self.validate_initial(vertex)?;
                }
                VertexKind::Junction => {
                    self.validate_junction(vertex)?;
                }
                VertexKind::ShallowHistory | VertexKind::DeepHistory => {
                    self.validate_history(vertex)?;
                }
                _ => {}
            }
        }
        for transition in self.graph.transitions() {
            self.validate_guard_evaluability(transition)?;
            self.validate_compound_transition_bounds(transition)?;
        }
        Ok(())
    }

    fn validate_composite(&self, vertex: &Vertex<C, E>) -> EngineResult<()> {
        if vertex.kind == VertexKind::Parallel {
            if vertex.data.children.len() < 2 {
                return Err(StructuralError::NotEnoughRegions(vertex.id).into());
            }
            return Ok(());
        }
        if vertex.data.children.is_empty() {
            return Ok(());
        }
        let initials: Vec<_> = vertex
            .data
            .children
            .iter()
            .filter(|c| self.graph.vertex(**c).kind == VertexKind::Initial)
            .collect();
        if initials.len() > 1 {
            return Err(StructuralError::MultipleInitials(vertex.id).into());
        }
        if vertex.data.initial_child.is_none() {
            return Err(StructuralError::MissingInitial(vertex.id).into());
        }
        Ok(())
    }

    fn validate_initial(&self, vertex: &Vertex<C, E>) -> EngineResult<()> {
        let outgoing = self.graph.outgoing(vertex.id);
        if outgoing.len() != 1 {
            return Err(StructuralError::InvalidInitialTransition(vertex.id).into());
        }
        let t = outgoing[0];
        if t.guard.is_some() || !matches!(t.trigger, Trigger::Completion) {
            return Err(StructuralError::InvalidInitialTransition(vertex.id).into());
        }
        Ok(())
    }

    fn validate_junction(&self, vertex: &Vertex<C, E>) -> EngineResult<()> {
        let outgoing = self.graph.outgoing(vertex.id);
        let has_else = outgoing.iter().any(|t| t.is_else);
        let has_guarded = outgoing.iter().any(|t| t.guard.is_some());
        if outgoing.is_empty() || (!has_else && !has_guarded) {
            return Err(StructuralError::JunctionDeadlock(vertex.id).into());
        }
        Ok(())
    }

    /// A completion/timeout dispatch carries no posted event, so only a
    /// junction's guarded branches (evaluated specially during pseudostate
    /// traversal, falling back to "not taken" with no event) can meaningfully
    /// use a guard there. A guarded completion/timeout transition rooted
    /// anywhere else would always be treated as enabled by the selector,
    /// silently ignoring its guard — reject it here instead.
    fn validate_guard_evaluability(&self, transition: &Transition<C, E>) -> EngineResult<()> {
        let completion_or_timeout = transition.trigger.is_completion() || transition.trigger.is_timeout();
        if !completion_or_timeout || transition.guard.is_none() {
            return Ok(());
        }
        if self.graph.vertex(transition.source).kind == VertexKind::Junction {
            return Ok(());
        }
        Err(StructuralError::UnevaluatableGuard(transition.id).into())
    }

    /// The executor exits up to `lca(transition.source, transition.target)`
    /// before chasing a junction/history target further (§4.E). If that
    /// first hop's target is itself a pseudostate, the chain can settle on
    /// a concrete vertex whose real exit boundary is shallower than this
    /// first-hop LCA — in which case the outer composite it should have
    /// exited never gets exited.
    ///
    /// One case is exempt: when the first-hop LCA collapses onto the
    /// transition's own source (the common idiom of parenting a junction
    /// directly under the state that transitions into it), the executor's
    /// exit walk has nowhere to stop at that boundary and keeps ascending
    /// through every active ancestor anyway, so it always exits at least as
    /// much as any later hop could need.
    fn validate_compound_transition_bounds(&self, transition: &Transition<C, E>) -> EngineResult<()> {
        if transition.kind == TransitionKind::Internal {
            return Ok(());
        }
        let Ok(boundary) = self.graph.lca(transition.source, transition.target) else {
            return Ok(());
        };
        if boundary == transition.source {
            return Ok(());
        }
        let mut seen = std::collections::HashSet::new();
        self.check_landing_within_boundary(transition.target, transition.source, boundary, transition.id, &mut seen)
    }

    fn check_landing_within_boundary(
        &self,
        vertex: VertexId,
        source: VertexId,
        boundary: VertexId,
        origin: TransitionId,
        seen: &mut std::collections::HashSet<VertexId>,
    ) -> EngineResult<()> {
        if !seen.insert(vertex) {
            return Ok(());
        }
        match self.graph.vertex(vertex).kind {
            VertexKind::Junction => {
                for t in self.graph.outgoing(vertex) {
                    self.check_landing_within_boundary(t.target, source, boundary, origin, seen)?;
                }
                Ok(())
            }
            VertexKind::ShallowHistory | VertexKind::DeepHistory => {
                // A recorded snapshot can only ever land inside the
                // history's own parent composite, so checking the parent
                // covers every restore regardless of which descendant was
                // last active; the default transition is checked
                // separately since it can point anywhere.
                if let Some(parent) = self.graph.parent(vertex) {
                    self.check_landing_within_boundary(parent, source, boundary, origin, seen)?;
                }
                if let Some(default) = self.graph.vertex(vertex).data.history_default {
                    self.check_landing_within_boundary(default, source, boundary, origin, seen)?;
                }
                Ok(())
            }
            _ => {
                let real_boundary = self.graph.lca(source, vertex).unwrap_or(boundary);
                if real_boundary != boundary && self.graph.is_ancestor(real_boundary, boundary) {
                    return Err(StructuralError::PseudostateTargetEscapesExitBoundary(origin).into());
                }
                Ok(())
            }
        }
    }

    fn validate_history(&self, vertex: &Vertex<C, E>) -> EngineResult<()> {
        let Some(parent) = vertex.parent else {
            return Ok(());
        };
        let has_final = self
            .graph
            .children(parent)
            .iter()
            .any(|c| self.graph.vertex(*c).kind == VertexKind::Final);
        if !has_final && vertex.data.history_default.is_none() {
            return Err(StructuralError::UnreachableFinal(parent).into());
        }
        Ok(())
    }
}

impl<C, E> Default for GraphBuilder<C, E> {
    fn default() -> Self {
        Self::new()
    }
}
