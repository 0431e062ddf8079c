//! The RTC executor (§4.E): exit/entry set computation via LCA,
//! pseudostate traversal, action ordering, history recording.

use crate::active::Configuration;
use crate::config::PanicPolicy;
use crate::dispatch::Dispatch;
use crate::error::{EngineResult, StructuralError};
use crate::graph::{DoActivityHook, Graph, TransitionId, VertexId, VertexKind};
use crate::history::HistoryStore;
use crate::selector::{call_guard, select};
use crate::timers::TimerScheduler;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

/// What happened over the course of one RTC step (§4.F, §5 cancellation).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub terminated: bool,
}

/// Mutable state the executor threads through a single RTC step. Bundled
/// so the recursive entry-chase doesn't need a dozen parameters at every
/// call site.
struct ExecCtx<'a, C, E> {
    graph: &'a Graph<C, E>,
    config: &'a mut Configuration,
    history: &'a mut HistoryStore,
    timers: &'a mut TimerScheduler,
    context: &'a mut C,
    do_activities: &'a mut HashMap<VertexId, DoActivityHook<C>>,
    terminated: bool,
    panic_policy: PanicPolicy,
}

/// Invokes a user hook per §7's ActionError disposition. `Propagate` calls
/// it directly, letting a real panic unwind the consumer thread (caught and
/// re-raised from `MachineHandle::join`). `LogAndContinue` catches the
/// panic, emits a diagnostic, and lets the RTC step carry on with whatever
/// exits/entries remain — the panicking hook's own effect is simply lost.
pub(crate) fn invoke_guarded<F: FnOnce()>(panic_policy: PanicPolicy, what: &str, f: F) {
    match panic_policy {
        PanicPolicy::Propagate => f(),
        PanicPolicy::LogAndContinue => {
            if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
                tracing::warn!("{what} panicked; continuing RTC step on a best-effort basis");
            }
        }
    }
}

/// Runs one RTC step to quiescence (§4.E final paragraph: "terminates
/// when no further completion events produce transitions"). `dispatch` is
/// the initiating event, timeout, or (at `start()`) a synthetic kickoff.
pub fn run_to_completion<C, E>(
    graph: &Graph<C, E>,
    config: &mut Configuration,
    history: &mut HistoryStore,
    timers: &mut TimerScheduler,
    context: &mut C,
    do_activities: &mut HashMap<VertexId, DoActivityHook<C>>,
    dispatch: Dispatch<E>,
    panic_policy: PanicPolicy,
) -> EngineResult<StepReport> {
    let mut ctx = ExecCtx {
        graph,
        config,
        history,
        timers,
        context,
        do_activities,
        terminated: false,
        panic_policy,
    };
    let mut pending: VecDeque<Dispatch<E>> = VecDeque::from([dispatch]);

    while let Some(dispatch) = pending.pop_front() {
        let execution_set = select(ctx.graph, ctx.config, ctx.context, ctx.timers, &dispatch, ctx.panic_policy);
        if execution_set.is_empty() {
            tracing::trace!("dispatch produced no enabled transitions; discarding");
            continue;
        }
        for transition_id in execution_set {
            let completions = fire_transition(&mut ctx, &dispatch, transition_id)?;
            if ctx.terminated {
                return Ok(StepReport { terminated: true });
            }
            for region in completions {
                pending.push_back(Dispatch::Completion(region));
            }
        }
    }
    Ok(StepReport { terminated: false })
}

/// Performs exits, the transition's own action, and entries (possibly
/// chasing a pseudostate compound transition) for one selected transition.
/// Returns the set of composites/regions that reached completion as a
/// result, to be redelivered as completion dispatches in the next pass.
fn fire_transition<C, E>(
    ctx: &mut ExecCtx<C, E>,
    dispatch: &Dispatch<E>,
    transition_id: TransitionId,
) -> EngineResult<Vec<VertexId>> {
    let transition_source = ctx.graph.transition(transition_id).source;
    let transition_target = ctx.graph.transition(transition_id).target;
    let is_internal = ctx.graph.transition(transition_id).is_internal();

    let mut completions = Vec::new();

    if !is_internal {
        let lca = ctx.graph.lca(transition_source, transition_target)?;
        exit_through(ctx, transition_source, lca, dispatch)?;
    }

    invoke_action(ctx, transition_id, dispatch);

    if !is_internal {
        let lca = ctx.graph.lca(transition_source, transition_target)?;
        let mut path = entry_path(ctx.graph, transition_target, lca);
        // Every vertex strictly between the LCA and the target is just a
        // waypoint: the next step of the path is already determined, so it
        // is settled (activated, entry behavior invoked) without further
        // recursion. Only the path's last vertex — the transition's actual
        // target — gets the full recursive treatment (composite → initial
        // child, parallel → all regions, pseudostate → continued
        // traversal), since nothing downstream of it is already decided.
        if let Some(last) = path.pop() {
            for waypoint in path {
                settle_vertex(ctx, waypoint, dispatch);
            }
            enter_vertex(ctx, last, dispatch, &mut completions)?;
        }
    }

    Ok(completions)
}

/// Snapshots history for any exited composite that carries a history
/// pseudostate, using the *pre-exit* configuration (the whole exit set is
/// computed up front, before any vertex is actually removed, because
/// exit order is deepest-first and a composite's active substate would
/// otherwise already be gone by the time the composite itself is
/// processed).
fn exit_through<C, E>(
    ctx: &mut ExecCtx<C, E>,
    source: VertexId,
    lca: VertexId,
    dispatch: &Dispatch<E>,
) -> EngineResult<()> {
    let exit_set = ctx.config.exit_set(ctx.graph, source, lca);
    let mut ordered: Vec<VertexId> = exit_set.into_iter().collect();
    ordered.sort_by_key(|v| std::cmp::Reverse(ctx.graph.depth(*v)));

    // Snapshotted from the full pre-exit configuration, before any vertex
    // in `ordered` is actually removed: exit proceeds deepest-first, so by
    // the time a composite itself is reached its active substate would
    // already be gone.
    for &v in &ordered {
        snapshot_history_if_applicable(ctx, v);
    }

    for v in ordered {
        ctx.do_activities.remove(&v);
        ctx.timers.disarm(v);
        if let Some(hook) = ctx.graph.vertex(v).data.exit.clone() {
            let panic_policy = ctx.panic_policy;
            let context = &mut *ctx.context;
            invoke_guarded(panic_policy, "exit hook", || {
                let mut hook = hook.lock().unwrap_or_else(|e| e.into_inner());
                (hook)(context, dispatch);
            });
        }
        ctx.config.remove(v);
    }
    Ok(())
}

fn snapshot_history_if_applicable<C, E>(ctx: &mut ExecCtx<C, E>, composite: VertexId) {
    let kind = ctx.graph.vertex(composite).kind;
    if !matches!(kind, VertexKind::Composite | VertexKind::Parallel) {
        return;
    }
    let has_shallow = ctx
        .graph
        .children(composite)
        .iter()
        .any(|c| ctx.graph.vertex(*c).kind == VertexKind::ShallowHistory);
    let has_deep = ctx
        .graph
        .children(composite)
        .iter()
        .any(|c| ctx.graph.vertex(*c).kind == VertexKind::DeepHistory);
    if !has_shallow && !has_deep {
        return;
    }
    if has_shallow {
        if let Some(&active_child) = ctx
            .graph
            .children(composite)
            .iter()
            .find(|c| ctx.config.contains(**c) && !ctx.graph.vertex(**c).kind.is_pseudostate())
        {
            ctx.history.record_shallow(composite, active_child);
        }
    }
    if has_deep {
        let mut descendants = ctx.config.active_descendants(ctx.graph, composite);
        descendants.retain(|v| *v != composite);
        ctx.history.record_deep(composite, descendants);
    }
}

/// The path from (but not including) `lca` down to `target`, shallowest
/// first (§4.E.2).
fn entry_path<C, E>(graph: &Graph<C, E>, target: VertexId, lca: VertexId) -> Vec<VertexId> {
    let chain = graph.ancestors(target);
    let idx = chain.iter().position(|v| *v == lca).unwrap_or(chain.len());
    let mut path = chain[..idx].to_vec();
    path.reverse();
    path
}

fn invoke_action<C, E>(ctx: &mut ExecCtx<C, E>, transition_id: TransitionId, dispatch: &Dispatch<E>) {
    let Some(action) = ctx.graph.transition(transition_id).action.clone() else {
        return;
    };
    let panic_policy = ctx.panic_policy;
    let context = &mut *ctx.context;
    invoke_guarded(panic_policy, "transition action", || {
        let mut action = action.lock().unwrap_or_else(|e| e.into_inner());
        action.perform(context, dispatch);
    });
}

/// Adds `vertex` to the configuration, invokes its entry behavior, and
/// continues the compound transition through it: recursing into a
/// composite's initial substate, into all of a parallel's regions, or
/// chasing a pseudostate traversal rule (§4.E.6). Accumulates completed
/// composites into `completions` for the caller to redeliver.
fn enter_vertex<C, E>(
    ctx: &mut ExecCtx<C, E>,
    vertex: VertexId,
    dispatch: &Dispatch<E>,
    completions: &mut Vec<VertexId>,
) -> EngineResult<()> {
    if ctx.terminated {
        return Ok(());
    }
    match ctx.graph.vertex(vertex).kind {
        VertexKind::Terminate => {
            ctx.terminated = true;
            Ok(())
        }
        VertexKind::Initial => enter_initial(ctx, vertex, dispatch, completions),
        VertexKind::Junction => enter_junction(ctx, vertex, dispatch, completions),
        VertexKind::ShallowHistory => enter_history(ctx, vertex, dispatch, completions, false),
        VertexKind::DeepHistory => enter_history(ctx, vertex, dispatch, completions, true),
        VertexKind::Final => {
            settle_vertex(ctx, vertex, dispatch);
            if let Some(region) = completed_region(ctx, vertex) {
                completions.push(region);
            }
            Ok(())
        }
        VertexKind::Simple => {
            settle_vertex(ctx, vertex, dispatch);
            Ok(())
        }
        VertexKind::Composite => {
            settle_vertex(ctx, vertex, dispatch);
            let Some(initial_child) = ctx.graph.vertex(vertex).data.initial_child else {
                return Ok(());
            };
            enter_vertex(ctx, initial_child, dispatch, completions)
        }
        VertexKind::Parallel => {
            settle_vertex(ctx, vertex, dispatch);
            let regions = ctx.graph.children(vertex).to_vec();
            for region in regions {
                enter_vertex(ctx, region, dispatch, completions)?;
                if ctx.terminated {
                    return Ok(());
                }
            }
            Ok(())
        }
    }
}

/// Adds `vertex` to the configuration, invokes entry behavior and arms
/// its timer. Shared tail of every non-pseudostate (persistently
/// entered) vertex kind.
fn settle_vertex<C, E>(ctx: &mut ExecCtx<C, E>, vertex: VertexId, dispatch: &Dispatch<E>) {
    ctx.config.insert(vertex);
    if let Some(hook) = ctx.graph.vertex(vertex).data.entry.clone() {
        let panic_policy = ctx.panic_policy;
        let context = &mut *ctx.context;
        invoke_guarded(panic_policy, "entry hook", || {
            let mut hook = hook.lock().unwrap_or_else(|e| e.into_inner());
            (hook)(context, dispatch);
        });
    }
    if let Some(do_activity) = ctx.graph.vertex(vertex).data.do_activity.clone() {
        ctx.do_activities.insert(vertex, do_activity);
    }
    if let Some(timeout) = ctx.graph.vertex(vertex).data.timeout {
        ctx.timers.arm(vertex, timeout, Instant::now());
    }
}

fn enter_initial<C, E>(
    ctx: &mut ExecCtx<C, E>,
    initial: VertexId,
    dispatch: &Dispatch<E>,
    completions: &mut Vec<VertexId>,
) -> EngineResult<()> {
    let outgoing = ctx.graph.outgoing(initial);
    let Some(transition) = outgoing.first() else {
        return Err(StructuralError::InvalidInitialTransition(initial).into());
    };
    let transition_id = transition.id;
    let target = transition.target;
    invoke_action(ctx, transition_id, dispatch);
    enter_vertex(ctx, target, dispatch, completions)
}

fn enter_junction<C, E>(
    ctx: &mut ExecCtx<C, E>,
    junction: VertexId,
    dispatch: &Dispatch<E>,
    completions: &mut Vec<VertexId>,
) -> EngineResult<()> {
    let outgoing = ctx.graph.outgoing(junction);
    let mut chosen = None;
    for t in &outgoing {
        if t.is_else {
            continue;
        }
        let satisfied = match (&t.guard, dispatch.as_external()) {
            (None, _) => true,
            (Some(guard), Some(event)) => call_guard(guard.as_ref(), ctx.context, event, ctx.panic_policy),
            // No live posted event to hand a guard (this junction was
            // reached via a timeout/completion cascade); such a branch
            // can't be evaluated, so it's treated as not taken.
            (Some(_), None) => false,
        };
        if satisfied {
            chosen = Some(t.id);
            break;
        }
    }
    if chosen.is_none() {
        chosen = outgoing.iter().find(|t| t.is_else).map(|t| t.id);
    }
    let Some(transition_id) = chosen else {
        return Err(StructuralError::JunctionRuntimeDeadlock(junction).into());
    };
    let target = ctx.graph.transition(transition_id).target;
    invoke_action(ctx, transition_id, dispatch);
    enter_vertex(ctx, target, dispatch, completions)
}

fn enter_history<C, E>(
    ctx: &mut ExecCtx<C, E>,
    history_vertex: VertexId,
    dispatch: &Dispatch<E>,
    completions: &mut Vec<VertexId>,
    deep: bool,
) -> EngineResult<()> {
    let Some(composite) = ctx.graph.parent(history_vertex) else {
        return Err(StructuralError::HistoryNoDefault(history_vertex).into());
    };
    let kind = if deep {
        VertexKind::DeepHistory
    } else {
        VertexKind::ShallowHistory
    };
    let snapshot = ctx.history.for_kind(composite, kind).cloned();
    match snapshot {
        Some(crate::history::HistorySnapshot::Shallow(child)) => {
            enter_vertex(ctx, child, dispatch, completions)
        }
        Some(crate::history::HistorySnapshot::Deep(descendants)) => {
            // Entered in recorded (shallowest-first) order; each vertex is
            // settled directly rather than re-derived from initial-state
            // inference, since the snapshot is exact (§3 History record).
            for v in descendants {
                settle_vertex(ctx, v, dispatch);
                if ctx.terminated {
                    return Ok(());
                }
            }
            Ok(())
        }
        None => {
            let Some(default_target) = ctx.graph.vertex(history_vertex).data.history_default else {
                return Err(StructuralError::HistoryNoDefault(history_vertex).into());
            };
            enter_vertex(ctx, default_target, dispatch, completions)
        }
    }
}

/// If entering `final_vertex` completes its enclosing region (and, for a
/// region under a `Parallel`, every sibling region is also complete),
/// returns the composite whose completion should be dispatched next
/// (§4.E.6 "Entering a Final").
fn completed_region<C, E>(ctx: &ExecCtx<C, E>, final_vertex: VertexId) -> Option<VertexId> {
    let region = ctx.graph.parent(final_vertex)?;
    let owner = ctx.graph.parent(region)?;
    if ctx.graph.vertex(owner).kind == VertexKind::Parallel {
        let all_regions_done = ctx
            .graph
            .children(owner)
            .iter()
            .all(|r| region_has_active_final(ctx, *r));
        if all_regions_done {
            Some(owner)
        } else {
            None
        }
    } else {
        Some(region)
    }
}

fn region_has_active_final<C, E>(ctx: &ExecCtx<C, E>, region: VertexId) -> bool {
    ctx.graph
        .children(region)
        .iter()
        .any(|c| ctx.graph.vertex(*c).kind == VertexKind::Final && ctx.config.contains(*c))
}

/// Enters the machine's initial configuration at `start()`: descends from
/// the arena root's designated initial child the same way any other
/// compound transition would, then drains whatever completion cascade
/// that initial entry produces (an edge case — an initial child that is
/// itself an immediately-completing Parallel, say — but handled the same
/// way a normal RTC step's completions are). The root itself is never
/// added to the configuration; it is a purely structural ancestor (§3
/// Configuration: "all ancestors up to the root are active" excludes the
/// root by construction since it is never entered).
pub fn enter_initial_configuration<C, E>(
    graph: &Graph<C, E>,
    config: &mut Configuration,
    history: &mut HistoryStore,
    timers: &mut TimerScheduler,
    context: &mut C,
    do_activities: &mut HashMap<VertexId, DoActivityHook<C>>,
    panic_policy: PanicPolicy,
) -> EngineResult<StepReport> {
    let mut ctx = ExecCtx {
        graph,
        config,
        history,
        timers,
        context,
        do_activities,
        terminated: false,
        panic_policy,
    };
    let Some(initial_child) = graph.vertex(graph.root()).data.initial_child else {
        return Ok(StepReport::default());
    };

    let mut pending: VecDeque<Dispatch<E>> = VecDeque::new();
    let mut completions = Vec::new();
    enter_vertex(&mut ctx, initial_child, &Dispatch::Start, &mut completions)?;
    if ctx.terminated {
        return Ok(StepReport { terminated: true });
    }
    pending.extend(completions.into_iter().map(Dispatch::Completion));

    while let Some(dispatch) = pending.pop_front() {
        let execution_set = select(ctx.graph, ctx.config, ctx.context, ctx.timers, &dispatch, ctx.panic_policy);
        for transition_id in execution_set {
            let more = fire_transition(&mut ctx, &dispatch, transition_id)?;
            if ctx.terminated {
                return Ok(StepReport { terminated: true });
            }
            pending.extend(more.into_iter().map(Dispatch::Completion));
        }
    }
    Ok(StepReport { terminated: false })
}

/// Forces every active vertex out of the configuration, deepest first,
/// invoking exit behavior and recording history exactly as a normal exit
/// would — but outside of any transition (§5 "Cancellation": `stop()`
/// exits all active states in deepest-first order). Used once, at
/// shutdown; the machine does not resume afterward.
pub fn shutdown<C, E>(
    graph: &Graph<C, E>,
    config: &mut Configuration,
    history: &mut HistoryStore,
    timers: &mut TimerScheduler,
    context: &mut C,
    do_activities: &mut HashMap<VertexId, DoActivityHook<C>>,
    panic_policy: PanicPolicy,
) {
    let mut ctx = ExecCtx {
        graph,
        config,
        history,
        timers,
        context,
        do_activities,
        terminated: false,
        panic_policy,
    };
    let mut ordered: Vec<VertexId> = ctx.config.iter().collect();
    ordered.sort_by_key(|v| std::cmp::Reverse(ctx.graph.depth(*v)));

    for &v in &ordered {
        snapshot_history_if_applicable(&mut ctx, v);
    }
    for v in ordered {
        ctx.do_activities.remove(&v);
        ctx.timers.disarm(v);
        if let Some(hook) = ctx.graph.vertex(v).data.exit.clone() {
            let context = &mut *ctx.context;
            invoke_guarded(panic_policy, "exit hook", || {
                let mut hook = hook.lock().unwrap_or_else(|e| e.into_inner());
                (hook)(context, &Dispatch::Shutdown);
            });
        }
        ctx.config.remove(v);
    }
}
