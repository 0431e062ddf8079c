//! A UML2-style hierarchical run-to-completion state-machine interpreter.
//!
//! Build a graph of states, pseudostates and transitions with
//! [`builder::GraphBuilder`] (via [`machine::Machine`]), `start()` it, and
//! drive it by posting events from any thread. One consumer thread owns
//! the live configuration and runs each posted event to quiescence before
//! taking the next (§4.E/§4.F of the design notes carried in `DESIGN.md`).
//!
//! ```ignore
//! let mut machine = Machine::<MyContext, MyEvent>::new();
//! let b = machine.builder_mut()?;
//! let s1 = b.state(None, "s1")?;
//! let s2 = b.state(None, "s2")?;
//! b.on(s1, MyEvent::Go, s2)?;
//! b.set_initial(b.root(), s1)?;
//! let handle = machine.start(MyContext::default(), MachineConfig::default())?;
//! handle.post(MyEvent::Go)?;
//! handle.stop();
//! handle.join(None)?;
//! ```

pub mod active;
pub mod builder;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod graph;
pub mod history;
pub mod machine;
pub mod selector;
pub mod timers;

#[cfg(feature = "graphviz")]
pub mod graphviz;

pub use builder::{GraphBuilder, HistoryKind};
pub use config::{MachineConfig, PanicPolicy};
pub use context::ContextStore;
pub use dispatch::Dispatch;
pub use error::{EngineError, EngineResult, StructuralError};
pub use graph::{Action, Graph, Guard, Transition, TransitionId, TransitionKind, Trigger, VertexId, VertexKind};
pub use machine::{Machine, MachineHandle};
