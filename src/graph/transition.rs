//! Transitions and triggers (§3 Transition).

use super::VertexId;
use crate::dispatch::Dispatch;
use std::sync::{Arc, Mutex};

/// Stable id of a transition within its [`Graph`](super::Graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransitionId(pub(crate) usize);

impl std::fmt::Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// External transitions exit the source; internal transitions never exit
/// or re-enter anything (source must equal target).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    External,
    Internal,
}

/// A transition's trigger predicate.
///
/// `Completion` is the "untriggered" marker from §3: it covers both an
/// Initial pseudostate's single mandatory outgoing transition (followed
/// immediately on traversal, never through event dispatch) and a
/// completion-triggered transition rooted at an ancestor of a region that
/// just reached Final (delivered only in response to the engine's
/// synthetic completion notification, §4.D step 5). The two are
/// disambiguated by how the executor reaches them, not by the trigger
/// value itself.
pub enum Trigger<E> {
    Completion,
    /// Fires when the predicate returns true for a posted event. `Arc`,
    /// not `Box`, so a trigger survives the structural clone a deep-cloned
    /// subgraph (§4.C) performs on its internal (non-cut) transitions.
    Event(Arc<dyn Fn(&E) -> bool + Send + Sync>),
    /// Fires only for the synthetic timeout notification of the state
    /// this transition is rooted at (§4.F); never matched against a
    /// posted `E`.
    Timeout,
}

impl<E> Trigger<E> {
    pub fn matches(&self, event: &E) -> bool {
        match self {
            Trigger::Completion | Trigger::Timeout => false,
            Trigger::Event(pred) => pred(event),
        }
    }

    pub fn is_completion(&self) -> bool {
        matches!(self, Trigger::Completion)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Trigger::Timeout)
    }
}

impl<E: PartialEq + Send + Sync + 'static> From<E> for Trigger<E> {
    /// A literal (non-transition) value supplied where a transition is
    /// expected is lifted to an equality trigger on that value (§4.B).
    fn from(value: E) -> Self {
        Trigger::Event(Arc::new(move |e: &E| e == &value))
    }
}

/// A guard: `fn(&context, &event) -> bool`. Stored as a trait object so a
/// transition can carry any closure or reusable guard type. `check` takes
/// `&self`, so guards are shareable via a plain `Arc` (no inner mutex
/// needed) when a subgraph carrying them is deep-cloned (§4.C).
pub trait Guard<C, E>: Send + Sync {
    fn check(&self, context: &C, event: &E) -> bool;
}

impl<C, E, F> Guard<C, E> for F
where
    F: Fn(&C, &E) -> bool + Send + Sync,
{
    fn check(&self, context: &C, event: &E) -> bool {
        self(context, event)
    }
}

/// An action: `fn(&mut context, &dispatch)`, run for its side effects.
/// Like entry/exit hooks (§3), actions see the full [`Dispatch`] rather
/// than a raw `E`, so an action on a compound transition reached purely
/// through pseudostates (no live posted event) still has something to
/// inspect.
pub trait Action<C, E>: Send {
    fn perform(&mut self, context: &mut C, event: &Dispatch<E>);
}

impl<C, E, F> Action<C, E> for F
where
    F: FnMut(&mut C, &Dispatch<E>) + Send,
{
    fn perform(&mut self, context: &mut C, event: &Dispatch<E>) {
        self(context, event)
    }
}

pub struct Transition<C, E> {
    pub id: TransitionId,
    pub label: Option<String>,
    pub source: VertexId,
    pub target: VertexId,
    pub kind: TransitionKind,
    pub trigger: Trigger<E>,
    pub guard: Option<Arc<dyn Guard<C, E>>>,
    pub action: Option<Arc<Mutex<Box<dyn Action<C, E>>>>>,
    /// True for the synthetic "else" fallback of a junction: fires only
    /// when no other outgoing guarded transition of the junction matched.
    pub is_else: bool,
}

impl<C, E> Transition<C, E> {
    pub fn is_internal(&self) -> bool {
        matches!(self.kind, TransitionKind::Internal)
    }
}

impl<C, E> Clone for Transition<C, E> {
    /// Shares guard/action behavior via their `Arc`s; `source`/`target`
    /// are left as-is for the caller to remap onto the new arena's ids.
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            label: self.label.clone(),
            source: self.source,
            target: self.target,
            kind: self.kind,
            trigger: match &self.trigger {
                Trigger::Completion => Trigger::Completion,
                Trigger::Timeout => Trigger::Timeout,
                Trigger::Event(pred) => Trigger::Event(pred.clone()),
            },
            guard: self.guard.clone(),
            action: self.action.clone(),
            is_else: self.is_else,
        }
    }
}
