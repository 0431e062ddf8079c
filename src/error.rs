//! Error types for the run-to-completion engine.

use crate::graph::{TransitionId, VertexId};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// Top-level error type returned from the construction and producer APIs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("event queue is closed: the machine has been stopped")]
    QueueClosed,

    #[error("machine already started")]
    AlreadyStarted,

    #[error("machine has not been started")]
    NotStarted,
}

/// Errors raised while building or validating the graph. These are always
/// surfaced to the caller; none of them are recoverable mid-RTC-step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StructuralError {
    #[error("builder operation attempted after the machine was started")]
    BuilderAfterStart,

    #[error("composite {0:?} has children but no initial vertex")]
    MissingInitial(VertexId),

    #[error("composite {0:?} declares more than one initial vertex")]
    MultipleInitials(VertexId),

    #[error("initial pseudostate {0:?} must have exactly one outgoing, untriggered, unguarded transition")]
    InvalidInitialTransition(VertexId),

    #[error("junction {0:?} has no satisfiable outgoing transition and no else fallback")]
    JunctionDeadlock(VertexId),

    #[error("junction {0:?} deadlocked at runtime: no guard matched and no else transition")]
    JunctionRuntimeDeadlock(VertexId),

    #[error("cycle detected while traversing the pseudostate chain starting at {0:?}")]
    PseudostateCycle(VertexId),

    #[error("parallel state {0:?} must declare at least two regions")]
    NotEnoughRegions(VertexId),

    #[error("history configured on {0:?} but no Final is reachable in that composite")]
    UnreachableFinal(VertexId),

    #[error("vertex kind {kind} is not supported by this engine: {detail}")]
    UnsupportedPseudostate { kind: &'static str, detail: String },

    #[error("vertex {0:?} is unknown to this graph")]
    UnknownVertex(VertexId),

    #[error("transition source {0:?} and target {1:?} have no common ancestor")]
    NoCommonAncestor(VertexId, VertexId),

    #[error("history pseudostate {0:?} has no recorded snapshot and no default transition")]
    HistoryNoDefault(VertexId),

    #[error("transition {0:?} is guarded but triggered by completion/timeout outside a junction, where there is no posted event to evaluate the guard against")]
    UnevaluatableGuard(TransitionId),

    #[error("transition {0:?} chases a pseudostate chain that can land outside the region its first hop would exit up to")]
    PseudostateTargetEscapesExitBoundary(TransitionId),
}
