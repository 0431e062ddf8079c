//! The graph model (§4.A): an arena of state vertices addressed by stable
//! ids, with parent links and transition edges stored as ids rather than
//! owning references.

mod arena;
mod transition;
mod vertex;

pub use arena::Graph;
pub use transition::{Action, Guard, Transition, TransitionId, TransitionKind, Trigger};
pub use vertex::{BehaviorHook, DoActivityHook, Vertex, VertexData, VertexId, VertexKind};
