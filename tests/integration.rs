//! End-to-end scenarios driving the real producer API (`post`/`start`/
//! `stop`/`join`) against a live consumer thread, one test per literal
//! scenario in the design notes' testable-properties section (§8).
//!
//! `Configuration` is consumer-thread-private, so these tests observe
//! behavior the same way an external caller would: through entry/exit/
//! action hooks that log into a context shared (via `Arc<Mutex<_>>`)
//! with the test thread, not by peeking at engine internals. The three
//! structural invariants (closure, exclusivity, pseudostate transience)
//! are exercised directly against `Configuration` in `src/active.rs`'s
//! unit tests instead, where the type is actually reachable.

use rtc_machine::{Action, Dispatch, Guard, Machine, MachineConfig, Trigger, TransitionKind};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Ev = &'static str;

#[derive(Clone, Default)]
struct Ctx(Arc<Mutex<Vec<String>>>);

impl Ctx {
    fn log(&self, what: &str) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(what.to_string());
    }

    fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn recorder(label: &'static str) -> impl FnMut(&mut Ctx, &Dispatch<Ev>) + Send + 'static {
    move |ctx: &mut Ctx, _d: &Dispatch<Ev>| ctx.log(label)
}

fn action(label: &'static str) -> Arc<Mutex<Box<dyn Action<Ctx, Ev>>>> {
    Arc::new(Mutex::new(Box::new(
        move |ctx: &mut Ctx, _d: &Dispatch<Ev>| ctx.log(label),
    ) as Box<dyn Action<Ctx, Ev>>))
}

/// Polls `ctx`'s trace until `predicate` holds or `timeout` elapses,
/// returning whatever snapshot it last observed either way.
fn wait_for(ctx: &Ctx, timeout: Duration, predicate: impl Fn(&[String]) -> bool) -> Vec<String> {
    let deadline = Instant::now() + timeout;
    loop {
        let snap = ctx.snapshot();
        if predicate(&snap) || Instant::now() >= deadline {
            return snap;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn contains(trace: &[String], entry: &str) -> bool {
    trace.iter().any(|s| s == entry)
}

/// States {S1, S2, F}. S1->S2 on "a"; S2->S1 on "b"; S2->F on "c" (action
/// logs "done"). `post("a","a","b","a","c")`: the second "a" lands on S2,
/// which has no "a" transition, so it's silently discarded; the machine
/// still reaches F, and shutdown leaves it in the clean terminated state.
#[test]
fn linear_sequence_reaches_final_then_shuts_down_cleanly() {
    let mut machine: Machine<Ctx, Ev> = Machine::new();
    {
        let b = machine.builder_mut().unwrap();
        let s1 = b.state(None, "S1").unwrap();
        let s2 = b.state(None, "S2").unwrap();
        let f = b.final_state(b.root(), "F").unwrap();
        b.set_entry(s1, recorder("enter:S1"));
        b.set_exit(s1, recorder("exit:S1"));
        b.set_entry(s2, recorder("enter:S2"));
        b.set_exit(s2, recorder("exit:S2"));
        b.set_entry(f, recorder("enter:F"));
        b.on(s1, "a", s2).unwrap();
        b.on(s2, "b", s1).unwrap();
        b.transition(s2, f, TransitionKind::External, "c", None, Some(action("done")), None)
            .unwrap();
        b.set_initial(b.root(), s1).unwrap();
    }

    let ctx = Ctx::default();
    let handle = machine.start(ctx.clone(), MachineConfig::default()).unwrap();

    for event in ["a", "a", "b", "a", "c"] {
        handle.post(event).unwrap();
    }

    let snap = wait_for(&ctx, Duration::from_secs(1), |t| contains(t, "enter:F"));
    assert!(contains(&snap, "done"));
    assert!(contains(&snap, "enter:F"));
    // The discarded second "a" never produced a spurious exit:S2/enter:S1.
    assert_eq!(snap.iter().filter(|s| **s == "enter:S2").count(), 2);

    handle.stop();
    assert!(handle.join(Some(Duration::from_secs(1))).unwrap());
    let after_shutdown = ctx.snapshot();
    assert!(contains(&after_shutdown, "exit:S1"));
}

/// Composite C{Ic->X, X->Y on "p", Y->F_inner on "q"}; C->Done on C's
/// completion. Posting "p" then "q" drives X->Y->F_inner, which bubbles a
/// completion event that fires C->Done within the same RTC step as "q".
#[test]
fn hierarchy_with_completion_bubbles_to_outer_done() {
    let mut machine: Machine<Ctx, Ev> = Machine::new();
    {
        let b = machine.builder_mut().unwrap();
        let done = b.state(None, "Done").unwrap();
        let c = b.composite(None, "C").unwrap();
        b.set_entry(c, recorder("enter:C"));
        b.set_exit(c, recorder("exit:C"));
        b.on(c, Trigger::Completion, done).unwrap();
        b.set_initial(b.root(), c).unwrap();

        let x = b.state(Some(c), "X").unwrap();
        b.set_entry(x, recorder("enter:X"));
        let y = b.state(Some(c), "Y").unwrap();
        b.set_entry(y, recorder("enter:Y"));
        let f_inner = b.final_state(c, "FInner").unwrap();
        b.set_initial(c, x).unwrap();

        b.on(x, "p", y).unwrap();
        b.on(y, "q", f_inner).unwrap();
        b.set_entry(done, recorder("enter:Done"));
    }

    let ctx = Ctx::default();
    let handle = machine.start(ctx.clone(), MachineConfig::default()).unwrap();

    handle.post("p").unwrap();
    let after_p = wait_for(&ctx, Duration::from_secs(1), |t| contains(t, "enter:Y"));
    assert!(!contains(&after_p, "enter:Done"));

    handle.post("q").unwrap();
    let snap = wait_for(&ctx, Duration::from_secs(1), |t| contains(t, "enter:Done"));
    assert!(contains(&snap, "exit:C"));
    assert!(contains(&snap, "enter:Done"));

    handle.stop();
    assert!(handle.join(Some(Duration::from_secs(1))).unwrap());
}

fn build_parallel_machine() -> (Machine<Ctx, Ev>, Ctx) {
    let mut machine: Machine<Ctx, Ev> = Machine::new();
    {
        let b = machine.builder_mut().unwrap();

        let r1 = b.composite(None, "R1").unwrap();
        let i1 = b.initial(r1, "I1").unwrap();
        let region_a = b.state(Some(r1), "A").unwrap();
        b.on(i1, Trigger::Completion, region_a).unwrap();
        b.set_entry(region_a, recorder("enter:A"));
        b.set_exit(region_a, recorder("exit:A"));
        let f1 = b.final_state(r1, "F1").unwrap();
        b.on(region_a, "x", f1).unwrap();

        let r2 = b.composite(None, "R2").unwrap();
        let i2 = b.initial(r2, "I2").unwrap();
        let region_b = b.state(Some(r2), "B").unwrap();
        b.on(i2, Trigger::Completion, region_b).unwrap();
        b.set_entry(region_b, recorder("enter:B"));
        b.set_exit(region_b, recorder("exit:B"));
        let f2 = b.final_state(r2, "F2").unwrap();
        b.on(region_b, "y", f2).unwrap();

        let p = b.parallel(None, "P", &[r1, r2]).unwrap();
        let end = b.state(None, "End").unwrap();
        b.set_entry(end, recorder("enter:End"));
        b.on(p, Trigger::Completion, end).unwrap();
        b.set_initial(b.root(), p).unwrap();
    }
    let ctx = Ctx::default();
    (machine, ctx)
}

/// Parallel P{R1{I1->A->F1 on "x"}, R2{I2->B->F2 on "y"}}; P->End on
/// completion. Completion only fires once *both* regions have reached
/// their Final, regardless of which order the triggering events arrive in.
#[test]
fn parallel_regions_complete_in_posted_order() {
    let (machine, ctx) = build_parallel_machine();
    let handle = machine.start(ctx.clone(), MachineConfig::default()).unwrap();

    handle.post("x").unwrap();
    handle.post("y").unwrap();

    let snap = wait_for(&ctx, Duration::from_secs(1), |t| contains(t, "enter:End"));
    assert!(contains(&snap, "exit:A"));
    assert!(contains(&snap, "exit:B"));
    assert!(contains(&snap, "enter:End"));

    handle.stop();
    assert!(handle.join(Some(Duration::from_secs(1))).unwrap());
}

#[test]
fn parallel_regions_complete_in_reverse_posted_order() {
    let (machine, ctx) = build_parallel_machine();
    let handle = machine.start(ctx.clone(), MachineConfig::default()).unwrap();

    handle.post("y").unwrap();
    handle.post("x").unwrap();

    let snap = wait_for(&ctx, Duration::from_secs(1), |t| contains(t, "enter:End"));
    assert!(contains(&snap, "enter:End"));

    handle.stop();
    assert!(handle.join(Some(Duration::from_secs(1))).unwrap());
}

/// Posting only "x" completes R1's region but leaves R2 (and thus P) active
/// — completion never fires for just one region of a Parallel.
#[test]
fn parallel_regions_partial_completion_leaves_the_other_region_active() {
    let (machine, ctx) = build_parallel_machine();
    let handle = machine.start(ctx.clone(), MachineConfig::default()).unwrap();

    handle.post("x").unwrap();
    let snap = wait_for(&ctx, Duration::from_millis(300), |t| contains(t, "exit:A"));

    assert!(contains(&snap, "exit:A"));
    assert!(!contains(&snap, "exit:B"));
    assert!(!contains(&snap, "enter:End"));

    handle.stop();
    assert!(handle.join(Some(Duration::from_secs(1))).unwrap());
}

/// Composite C{D(initial){D1(initial), D2}, E, H(deep)}; D1->D2 on "d";
/// C->Out on "leave"; Out->H on "back". Re-entering through the deep
/// history pseudostate restores {C, D, D2} exactly, not C's default
/// initial chain through D1.
#[test]
fn deep_history_restores_exact_prior_leaf_configuration() {
    use rtc_machine::HistoryKind;

    let mut machine: Machine<Ctx, Ev> = Machine::new();
    {
        let b = machine.builder_mut().unwrap();
        let c = b.composite(None, "C").unwrap();
        b.set_entry(c, recorder("enter:C"));
        b.set_exit(c, recorder("exit:C"));
        let out = b.state(None, "Out").unwrap();
        b.set_entry(out, recorder("enter:Out"));
        b.set_initial(b.root(), c).unwrap();

        let d = b.composite(Some(c), "D").unwrap();
        let _e = b.state(Some(c), "E").unwrap();
        let hist = b.history(c, HistoryKind::Deep, "H").unwrap();
        b.set_initial(c, d).unwrap();

        let d1 = b.state(Some(d), "D1").unwrap();
        b.set_entry(d1, recorder("enter:D1"));
        let d2 = b.state(Some(d), "D2").unwrap();
        b.set_entry(d2, recorder("enter:D2"));
        b.set_initial(d, d1).unwrap();
        b.on(d1, "d", d2).unwrap();

        // No Final reachable under C; a history default keeps the
        // composite constructible without one (§3 "History record").
        b.set_history_default(hist, d).unwrap();

        b.on(c, "leave", out).unwrap();
        b.on(out, "back", hist).unwrap();
    }

    let ctx = Ctx::default();
    let handle = machine.start(ctx.clone(), MachineConfig::default()).unwrap();

    wait_for(&ctx, Duration::from_secs(1), |t| contains(t, "enter:D1"));

    handle.post("d").unwrap();
    wait_for(&ctx, Duration::from_secs(1), |t| contains(t, "enter:D2"));

    handle.post("leave").unwrap();
    wait_for(&ctx, Duration::from_secs(1), |t| contains(t, "enter:Out"));

    handle.post("back").unwrap();
    let snap = wait_for(&ctx, Duration::from_secs(1), |t| {
        t.iter().filter(|s| **s == "enter:D2").count() >= 2
    });

    assert_eq!(snap.iter().filter(|s| **s == "enter:D1").count(), 1);
    assert_eq!(snap.iter().filter(|s| **s == "enter:D2").count(), 2);
    assert_eq!(snap.iter().filter(|s| **s == "enter:C").count(), 2);

    handle.stop();
    assert!(handle.join(Some(Duration::from_secs(1))).unwrap());
}

#[derive(Clone, Default)]
struct JunctionCtx {
    trace: Ctx,
    k: i32,
}

struct KEqualsOne;
impl Guard<JunctionCtx, Ev> for KEqualsOne {
    fn check(&self, context: &JunctionCtx, _event: &Ev) -> bool {
        context.k == 1
    }
}

/// S1->J on "ev"; J->T1 guarded on k==1, else->T2. With k=2, "ev" lands on
/// T2; T1's entry behavior never runs.
#[test]
fn junction_with_failing_guard_falls_through_to_else() {
    let mut machine: Machine<JunctionCtx, Ev> = Machine::new();
    {
        let b = machine.builder_mut().unwrap();
        let s1 = b.state(None, "S1").unwrap();
        let j = b.junction(s1, "J").unwrap();
        b.set_initial(b.root(), s1).unwrap();
        let t1 = b.state(None, "T1").unwrap();
        let t2 = b.state(None, "T2").unwrap();
        b.set_entry(t1, |ctx: &mut JunctionCtx, _d: &Dispatch<Ev>| ctx.trace.log("enter:T1"));
        b.set_entry(t2, |ctx: &mut JunctionCtx, _d: &Dispatch<Ev>| ctx.trace.log("enter:T2"));
        b.on_guarded(j, Trigger::Completion, KEqualsOne, t1).unwrap();
        b.else_transition(j, t2).unwrap();
        b.on(s1, "ev", j).unwrap();
    }

    let ctx = JunctionCtx { trace: Ctx::default(), k: 2 };
    let handle = machine.start(ctx.clone(), MachineConfig::default()).unwrap();

    handle.post("ev").unwrap();
    let snap = wait_for(&ctx.trace, Duration::from_secs(1), |t| contains(t, "enter:T2"));

    assert!(contains(&snap, "enter:T2"));
    assert!(!contains(&snap, "enter:T1"));

    handle.stop();
    assert!(handle.join(Some(Duration::from_secs(1))).unwrap());
}

/// State W with a 60ms timeout and W->Exit on timeout. An unrelated event
/// posted well inside the window is a no-op; the timeout still fires once
/// the window elapses, and never re-fires after the machine has moved on.
#[test]
fn timeout_fires_once_after_the_armed_duration_and_not_before() {
    let mut machine: Machine<Ctx, Ev> = Machine::new();
    {
        let b = machine.builder_mut().unwrap();
        let w = b.state(None, "W").unwrap();
        let exit = b.state(None, "Exit").unwrap();
        b.set_entry(w, recorder("enter:W"));
        b.set_exit(w, recorder("exit:W"));
        b.set_entry(exit, recorder("enter:Exit"));
        b.set_timeout(w, Duration::from_millis(60));
        b.on(w, Trigger::Timeout, exit).unwrap();
        b.set_initial(b.root(), w).unwrap();
    }

    let ctx = Ctx::default();
    let config = MachineConfig::default().with_timer_tick_granularity(Duration::from_millis(5));
    let handle = machine.start(ctx.clone(), config).unwrap();

    std::thread::sleep(Duration::from_millis(20));
    handle.post("other").unwrap();
    std::thread::sleep(Duration::from_millis(10));
    assert!(!contains(&ctx.snapshot(), "enter:Exit"));

    let snap = wait_for(&ctx, Duration::from_secs(1), |t| contains(t, "enter:Exit"));
    assert!(contains(&snap, "exit:W"));
    assert!(contains(&snap, "enter:Exit"));

    handle.post("other").unwrap();
    std::thread::sleep(Duration::from_millis(150));
    let final_snap = ctx.snapshot();
    assert_eq!(final_snap.iter().filter(|s| **s == "enter:Exit").count(), 1);

    handle.stop();
    assert!(handle.join(Some(Duration::from_secs(1))).unwrap());
}
