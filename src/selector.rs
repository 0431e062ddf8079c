//! The transition selector (§4.D): given the current configuration and a
//! dispatch, compute the execution set for this RTC step.

use crate::active::Configuration;
use crate::config::PanicPolicy;
use crate::dispatch::Dispatch;
use crate::graph::{Graph, TransitionId, VertexId};
use crate::timers::TimerScheduler;
use std::panic::{self, AssertUnwindSafe};

struct Candidate {
    id: TransitionId,
    source: VertexId,
    depth: usize,
}

/// Computes the execution set for one dispatch (§4.D). Empty means the
/// dispatch is silently discarded — no state change, no action.
pub fn select<C, E>(
    graph: &Graph<C, E>,
    config: &Configuration,
    context: &C,
    timers: &TimerScheduler,
    dispatch: &Dispatch<E>,
    panic_policy: PanicPolicy,
) -> Vec<TransitionId> {
    let mut candidates: Vec<Candidate> = Vec::new();

    // Step 1 + 2: candidate gathering with depth priority. Each active
    // leaf (one independent region, §4.D step 3) ascends from itself
    // toward the root, stopping at the first ancestor level that yields
    // at least one enabled transition — "deepest-enabled wins within a
    // region".
    for leaf in config.leaves(graph) {
        for vertex in graph.ancestors(leaf) {
            let enabled: Vec<_> = graph
                .outgoing(vertex)
                .into_iter()
                .filter(|t| !t.is_else)
                .filter(|t| is_enabled(t, dispatch, timers, context, panic_policy))
                .collect();
            if enabled.is_empty() {
                continue;
            }
            for t in enabled {
                candidates.push(Candidate {
                    id: t.id,
                    source: t.source,
                    depth: graph.depth(vertex),
                });
            }
            break;
        }
    }

    dedup_by_transition(&mut candidates);

    // Step 4: conflict resolution. Two candidates conflict if their exit
    // sets intersect; the deeper-sourced one wins, ties broken by
    // declaration order in the enclosing composite's children list.
    resolve_conflicts(graph, config, candidates)
}

fn is_enabled<C, E>(
    t: &crate::graph::Transition<C, E>,
    dispatch: &Dispatch<E>,
    timers: &TimerScheduler,
    context: &C,
    panic_policy: PanicPolicy,
) -> bool {
    // `t.source` is always the vertex the outer ascent is currently
    // standing on (outgoing() filters by source == id), and that ascent
    // only ever walks upward from an active leaf — so for `Completion`,
    // "source is an ancestor of the completed region" (§4.D step 5) holds
    // for free; nothing further to check here.
    let trigger_matches = match dispatch {
        Dispatch::External(event) => t.trigger.matches(event),
        Dispatch::Timeout(token) => {
            t.trigger.is_timeout() && t.source == token.vertex && timers.is_live(*token)
        }
        Dispatch::Completion(_) => t.trigger.is_completion(),
    };
    if !trigger_matches {
        return false;
    }
    match (dispatch, &t.guard) {
        (Dispatch::External(event), Some(guard)) => {
            call_guard(guard.as_ref(), context, event, panic_policy)
        }
        // Completion/timeout dispatches carry no user `E` to hand a guard.
        // A guarded completion/timeout transition outside a junction is
        // rejected by `GraphBuilder::validate` before the machine ever
        // starts, so every transition reaching this arm is either
        // unguarded or a junction's own outgoing edge (evaluated
        // separately in `enter_junction`, not here).
        _ => true,
    }
}

/// Invokes a guard per §7's GuardError disposition: a panicking guard is
/// caught and treated as `false` for that transition, with a diagnostic
/// emitted, rather than poisoning the whole RTC step. `PanicPolicy::
/// Propagate` skips the catch so tests can make a hook bug fail loudly.
pub(crate) fn call_guard<C, E>(
    guard: &(dyn crate::graph::Guard<C, E> + '_),
    context: &C,
    event: &E,
    panic_policy: PanicPolicy,
) -> bool {
    match panic_policy {
        PanicPolicy::Propagate => guard.check(context, event),
        PanicPolicy::LogAndContinue => {
            match panic::catch_unwind(AssertUnwindSafe(|| guard.check(context, event))) {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("guard panicked; treating transition as not enabled");
                    false
                }
            }
        }
    }
}

fn dedup_by_transition(candidates: &mut Vec<Candidate>) {
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.id));
}

fn resolve_conflicts<C, E>(
    graph: &Graph<C, E>,
    config: &Configuration,
    candidates: Vec<Candidate>,
) -> Vec<TransitionId> {
    let mut winners: Vec<Candidate> = Vec::new();
    'outer: for candidate in candidates {
        let candidate_exit = if graph.transition(candidate.id).is_internal() {
            std::collections::HashSet::new()
        } else {
            let lca = match graph.lca(candidate.source, graph.transition(candidate.id).target) {
                Ok(lca) => lca,
                Err(_) => continue,
            };
            config.exit_set(graph, candidate.source, lca)
        };

        let mut i = 0;
        while i < winners.len() {
            let other = &winners[i];
            let other_exit = if graph.transition(other.id).is_internal() {
                std::collections::HashSet::new()
            } else {
                let lca = match graph.lca(other.source, graph.transition(other.id).target) {
                    Ok(lca) => lca,
                    Err(_) => {
                        i += 1;
                        continue;
                    }
                };
                config.exit_set(graph, other.source, lca)
            };

            if candidate_exit.is_disjoint(&other_exit) {
                i += 1;
                continue;
            }

            // Conflict: deeper source wins; ties broken by declaration
            // order within the shared parent's children list.
            if candidate.depth > other.depth
                || (candidate.depth == other.depth && declared_before(graph, candidate.source, other.source))
            {
                winners.remove(i);
                continue;
            } else {
                continue 'outer;
            }
        }
        winners.push(candidate);
    }
    winners.into_iter().map(|c| c.id).collect()
}

/// True if `a` appears before `b` in their common parent's ordered
/// children list. Falls back to `false` if they don't share a parent
/// (shouldn't happen for conflicting transitions at equal depth, since a
/// conflict implies overlapping exit sets which implies a common region).
fn declared_before<C, E>(graph: &Graph<C, E>, a: VertexId, b: VertexId) -> bool {
    let Some(parent) = graph.parent(a) else {
        return false;
    };
    if graph.parent(b) != Some(parent) {
        return false;
    }
    let siblings = graph.children(parent);
    let pos_a = siblings.iter().position(|v| *v == a);
    let pos_b = siblings.iter().position(|v| *v == b);
    matches!((pos_a, pos_b), (Some(pa), Some(pb)) if pa < pb)
}
