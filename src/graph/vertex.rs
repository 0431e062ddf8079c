//! Vertex identity and kinds (§3 Vertex, Pseudostate).

use crate::dispatch::Dispatch;
use std::sync::{Arc, Mutex};

/// A stable, arena-local identifier for a vertex. Ids are never reused
/// within a single [`Graph`](super::Graph) and are the only way vertices,
/// transitions and parent links refer to one another — this is what lets
/// the graph contain cycles (via transitions) without Rust ownership
/// cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VertexId(pub(crate) usize);

impl VertexId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of a vertex, exhaustively matched by the executor (§9 design
/// note: "Polymorphism over vertex kinds").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexKind {
    Simple,
    Composite,
    Parallel,
    Initial,
    Final,
    Terminate,
    Junction,
    ShallowHistory,
    DeepHistory,
}

impl VertexKind {
    /// True for vertices that may never be persistently active after an
    /// RTC step completes (§8: pseudostate transience), except history,
    /// which is the one pseudostate the configuration invariant allows.
    pub fn is_transient_pseudostate(self) -> bool {
        matches!(
            self,
            VertexKind::Initial | VertexKind::Junction | VertexKind::Terminate
        )
    }

    pub fn is_history(self) -> bool {
        matches!(self, VertexKind::ShallowHistory | VertexKind::DeepHistory)
    }

    pub fn is_pseudostate(self) -> bool {
        !matches!(
            self,
            VertexKind::Simple | VertexKind::Composite | VertexKind::Parallel
        )
    }

    pub fn has_regions(self) -> bool {
        matches!(self, VertexKind::Composite | VertexKind::Parallel)
    }

    pub fn can_be_entered_persistently(self) -> bool {
        matches!(
            self,
            VertexKind::Simple | VertexKind::Composite | VertexKind::Parallel | VertexKind::Final
        )
    }
}

/// A vertex in the graph: identity, optional name, parent link and kind
/// are universal; everything kind-specific lives in [`VertexData`].
pub struct Vertex<C, E> {
    pub id: VertexId,
    pub name: Option<String>,
    pub parent: Option<VertexId>,
    pub kind: VertexKind,
    pub data: VertexData<C, E>,
}

impl<C, E> Vertex<C, E> {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }

    /// Structural clone under a freshly allocated id. Behavior hooks are
    /// shared (via `Arc`), not duplicated — composition (§4.C) preserves
    /// semantics, not identity, and closures captured in hooks aren't
    /// `Clone` in general. `children`/`parent`/`initial_child` are left for
    /// the caller to remap, since they refer to old ids.
    pub fn structural_clone(&self, new_id: VertexId) -> Self {
        Vertex {
            id: new_id,
            name: self.name.clone(),
            parent: None,
            kind: self.kind,
            data: self.data.clone(),
        }
    }
}

/// Kind-specific payload. Most fields are only meaningful for a subset of
/// [`VertexKind`] variants; the builder is responsible for only populating
/// the fields that make sense for the kind it constructs.
///
/// Hooks are `Arc`-wrapped (with an inner `Mutex` for the `FnMut` ones) so
/// that [`structural_clone`](Vertex::structural_clone) can share behavior
/// across a deep-cloned subgraph without requiring arbitrary user closures
/// to implement `Clone`. The machine is single-threaded with respect to
/// its own configuration (§5), so the mutex is never contended; it exists
/// only to keep the trait object `Sync`-compatible for `Arc`.
/// Entry/exit behaviors are handed the [`Dispatch`] that caused this RTC
/// step — a real posted event, a timeout, or the engine's synthetic
/// completion notification — rather than a raw `E`, since a compound
/// transition chased entirely through pseudostates (initial-state entry
/// at `start()`, a completion cascade) has no real posted event to offer.
pub type BehaviorHook<C, E> = Arc<Mutex<Box<dyn FnMut(&mut C, &Dispatch<E>) + Send>>>;
pub type DoActivityHook<C> = Arc<Mutex<Box<dyn FnMut(&mut C) + Send>>>;

pub struct VertexData<C, E> {
    pub entry: Option<BehaviorHook<C, E>>,
    pub exit: Option<BehaviorHook<C, E>>,
    pub do_activity: Option<DoActivityHook<C>>,
    pub timeout: Option<std::time::Duration>,

    /// Composite/Parallel: ordered children (regions, for Parallel).
    pub children: Vec<VertexId>,
    /// Composite only: the designated initial child.
    pub initial_child: Option<VertexId>,

    /// History only: default target followed when no snapshot exists.
    pub history_default: Option<VertexId>,
}

impl<C, E> Default for VertexData<C, E> {
    fn default() -> Self {
        Self {
            entry: None,
            exit: None,
            do_activity: None,
            timeout: None,
            children: Vec::new(),
            initial_child: None,
            history_default: None,
        }
    }
}

impl<C, E> Clone for VertexData<C, E> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            exit: self.exit.clone(),
            do_activity: self.do_activity.clone(),
            timeout: self.timeout,
            children: Vec::new(),
            initial_child: None,
            history_default: None,
        }
    }
}

impl<C, E> std::fmt::Debug for VertexData<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexData")
            .field("has_entry", &self.entry.is_some())
            .field("has_exit", &self.exit.is_some())
            .field("has_do_activity", &self.do_activity.is_some())
            .field("timeout", &self.timeout)
            .field("children", &self.children)
            .field("initial_child", &self.initial_child)
            .field("history_default", &self.history_default)
            .finish()
    }
}
