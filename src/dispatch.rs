//! What gets run through one RTC step (§3 "Event", §4.D, §4.F).
//!
//! The engine only ever inspects three kinds of notification: a posted
//! user event, a timer's synthetic timeout, and its own synthetic
//! completion notification (§3: "never representable as a user `E`").
//! Keeping them as one enum lets the selector and executor share a single
//! dispatch path instead of three parallel ones.

use crate::graph::VertexId;
use crate::timers::TimerToken;

pub enum Dispatch<E> {
    /// A user-posted event, delivered to `Trigger::Event` predicates.
    External(E),
    /// A timer firing for the vertex/generation in `TimerToken`, delivered
    /// only to `Trigger::Timeout` transitions rooted at that same vertex,
    /// and only if the token is still live (§4.F).
    Timeout(TimerToken),
    /// The region rooted at the given composite/parallel vertex just
    /// reached completion; delivered only to `Trigger::Completion`
    /// transitions whose source is an ancestor of that vertex (§4.D step 5).
    Completion(VertexId),
    /// The synthetic kickoff of the machine's initial configuration at
    /// `start()` — no transition actually fires, so no real dispatch
    /// exists, but entry hooks along the initial compound transition still
    /// need something to inspect.
    Start,
    /// The forced exit of every active state on `stop()` (§5
    /// "Cancellation"), invoked deepest-first outside of any transition.
    Shutdown,
}

impl<E> Dispatch<E> {
    pub fn as_external(&self) -> Option<&E> {
        match self {
            Dispatch::External(e) => Some(e),
            _ => None,
        }
    }
}
