//! Event loop and producer API (§4.F, §5, §6).
//!
//! [`Machine`] owns the graph under construction; [`Machine::start`]
//! validates and freezes it, spawns the single consumer thread that owns
//! the configuration/history/timers/context, and hands back a
//! [`MachineHandle`] — the thread-safe producer side (`post`/`stop`/`join`
//! plus the opaque [`ContextStore`] `assign`/`lookup`).

use crate::active::Configuration;
use crate::context::ContextStore;
use crate::dispatch::Dispatch;
use crate::error::{EngineError, EngineResult};
use crate::executor;
use crate::graph::{DoActivityHook, Graph, VertexId};
use crate::history::HistoryStore;
use crate::{
    builder::GraphBuilder,
    config::{MachineConfig, PanicPolicy},
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// A FIFO of posted events guarded by a mutex + condvar, the way the
/// teacher wraps shared mutable state behind a small owning type rather
/// than raw channel primitives (§4.F).
struct EventQueue<E> {
    state: Mutex<QueueState<E>>,
    ready: Condvar,
}

struct QueueState<E> {
    events: VecDeque<E>,
    closed: bool,
}

enum Popped<E> {
    Event(E),
    TimedOut,
    Closed,
}

impl<E> EventQueue<E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn push(&self, event: E) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return Err(EngineError::QueueClosed);
        }
        state.events.push_back(event);
        self.ready.notify_one();
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        self.ready.notify_all();
    }

    /// Waits up to `timeout` for an event, draining the FIFO in posted
    /// order (one at a time — the loop runs one RTC step per pop). Also
    /// wakes on `close()`, even with nothing queued, so shutdown isn't
    /// delayed behind a long timer wait.
    fn pop_wait(&self, timeout: Duration) -> Popped<E> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.events.is_empty() && !s.closed)
            .unwrap_or_else(|e| e.into_inner());
        if let Some(event) = state.events.pop_front() {
            return Popped::Event(event);
        }
        if state.closed {
            return Popped::Closed;
        }
        Popped::TimedOut
    }
}

/// The result of the consumer thread's run, captured so `join` can
/// propagate a structural failure or re-raise a genuine panic rather than
/// dying silently (§7: "no error causes the consumer thread to die
/// silently").
type ConsumerOutcome = EngineResult<()>;

/// Owns the graph under construction. Once [`start`](Machine::start)
/// consumes it, further construction calls are unreachable (the builder
/// moved into the consumer thread) — callers instead see
/// [`EngineError::AlreadyStarted`] from a second `start` call.
pub struct Machine<C, E> {
    builder: Option<GraphBuilder<C, E>>,
}

impl<C, E> Machine<C, E> {
    pub fn new() -> Self {
        Self {
            builder: Some(GraphBuilder::new()),
        }
    }

    /// Mutable access to the graph builder, for construction (§4.B/C).
    /// Fails once the machine has been started.
    pub fn builder_mut(&mut self) -> EngineResult<&mut GraphBuilder<C, E>> {
        self.builder
            .as_mut()
            .ok_or_else(|| crate::error::StructuralError::BuilderAfterStart.into())
    }

    /// Validates and freezes the graph, spawns the consumer thread with
    /// `initial_context` as its owned `C`, enters the initial
    /// configuration, and returns the thread-safe producer handle.
    pub fn start(&mut self, initial_context: C, config: MachineConfig) -> EngineResult<MachineHandle<E>>
    where
        C: Send + 'static,
        E: Send + 'static,
    {
        let builder = self.builder.take().ok_or(EngineError::AlreadyStarted)?;
        builder.validate()?;
        let mut graph = builder.into_graph();
        graph.freeze();
        let graph = Arc::new(graph);

        let queue: Arc<EventQueue<E>> = Arc::new(EventQueue::new());
        let context_store = Arc::new(ContextStore::new());

        let loop_queue = Arc::clone(&queue);
        let loop_graph = Arc::clone(&graph);
        let tick = config.timer_tick_granularity;
        let panic_policy = config.action_panic_policy;

        let join_handle = thread::Builder::new()
            .name("rtc-machine-consumer".to_string())
            .spawn(move || -> ConsumerOutcome {
                run_consumer_loop(loop_graph, initial_context, loop_queue, tick, panic_policy)
            })
            .expect("failed to spawn consumer thread");

        Ok(MachineHandle {
            queue,
            context_store,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }
}

impl<C, E> Default for Machine<C, E> {
    fn default() -> Self {
        Self::new()
    }
}

fn run_consumer_loop<C, E>(
    graph: Arc<Graph<C, E>>,
    mut context: C,
    queue: Arc<EventQueue<E>>,
    tick: Duration,
    panic_policy: PanicPolicy,
) -> ConsumerOutcome {
    let mut configuration = Configuration::new();
    let mut history = HistoryStore::new();
    let mut timers = crate::timers::TimerScheduler::new();
    let mut do_activities: HashMap<VertexId, DoActivityHook<C>> = HashMap::new();

    let report = executor::enter_initial_configuration(
        &graph,
        &mut configuration,
        &mut history,
        &mut timers,
        &mut context,
        &mut do_activities,
        panic_policy,
    )?;
    if report.terminated {
        tracing::debug!("machine reached Terminate during initial entry");
        return Ok(());
    }

    loop {
        poll_do_activities(&do_activities, &mut context, panic_policy);

        let wait = timers
            .next_deadline(Instant::now())
            .unwrap_or(tick)
            .min(tick);

        match queue.pop_wait(wait) {
            Popped::Event(event) => {
                let span = tracing::debug_span!("dispatch");
                let _enter = span.enter();
                let report = executor::run_to_completion(
                    &graph,
                    &mut configuration,
                    &mut history,
                    &mut timers,
                    &mut context,
                    &mut do_activities,
                    Dispatch::External(event),
                    panic_policy,
                )?;
                if report.terminated {
                    tracing::debug!("machine reached Terminate");
                    return Ok(());
                }
            }
            Popped::TimedOut => {
                for token in timers.pop_expired(Instant::now()) {
                    tracing::trace!(vertex = ?token.vertex, "timeout fired");
                    let report = executor::run_to_completion(
                        &graph,
                        &mut configuration,
                        &mut history,
                        &mut timers,
                        &mut context,
                        &mut do_activities,
                        Dispatch::Timeout(token),
                        panic_policy,
                    )?;
                    if report.terminated {
                        tracing::debug!("machine reached Terminate via timeout");
                        return Ok(());
                    }
                }
            }
            Popped::Closed => {
                tracing::debug!("shutting down, exiting active configuration");
                executor::shutdown(
                    &graph,
                    &mut configuration,
                    &mut history,
                    &mut timers,
                    &mut context,
                    &mut do_activities,
                    panic_policy,
                );
                return Ok(());
            }
        }
    }
}

/// Polls every registered do-activity once (§9 Open Question 4: a
/// single-threaded do-activity, not a spawned task). A panicking hook is
/// handled the same way as any other behavior hook (§7 ActionError).
fn poll_do_activities<C>(
    do_activities: &HashMap<VertexId, DoActivityHook<C>>,
    context: &mut C,
    panic_policy: PanicPolicy,
) {
    for hook in do_activities.values() {
        let context = &mut *context;
        executor::invoke_guarded(panic_policy, "do-activity hook", || {
            let mut hook = hook.lock().unwrap_or_else(|e| e.into_inner());
            (hook)(context);
        });
    }
}

/// Thread-safe producer handle (§6 "Producer API"). `post`/`assign`/
/// `lookup` are safe to call from any number of threads at once (the
/// queue and context store are each guarded independently); share one
/// handle behind an `Arc` across producers rather than cloning it, since
/// `join` can only be driven to completion once.
pub struct MachineHandle<E> {
    queue: Arc<EventQueue<E>>,
    context_store: Arc<ContextStore>,
    join_handle: Mutex<Option<thread::JoinHandle<ConsumerOutcome>>>,
}

impl<E> MachineHandle<E> {
    /// Enqueues `event`; never blocks beyond the queue mutex. Fails if
    /// `stop()` has already been called.
    pub fn post(&self, event: E) -> EngineResult<()> {
        self.queue.push(event)
    }

    /// Signals the consumer thread to drain its current RTC step and exit
    /// all active states. Idempotent.
    pub fn stop(&self) {
        self.queue.close();
    }

    /// Blocks until the consumer thread exits or `timeout` elapses
    /// (`None` waits indefinitely). Returns whether shutdown completed.
    /// A structural error recorded by the consumer loop is returned here;
    /// a genuine panic is re-raised (§7: captured and re-raised from
    /// `join`, never swallowed).
    pub fn join(&self, timeout: Option<Duration>) -> EngineResult<bool> {
        let mut slot = self.join_handle.lock().unwrap_or_else(|e| e.into_inner());
        let Some(handle) = slot.take() else {
            return Ok(true);
        };
        let Some(budget) = timeout else {
            return Self::finish(handle);
        };
        let deadline = Instant::now() + budget;
        loop {
            if handle.is_finished() {
                return Self::finish(handle);
            }
            if Instant::now() >= deadline {
                *slot = Some(handle);
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(5).min(budget));
        }
    }

    fn finish(handle: thread::JoinHandle<ConsumerOutcome>) -> EngineResult<bool> {
        match handle.join() {
            Ok(Ok(())) => Ok(true),
            Ok(Err(engine_error)) => Err(engine_error),
            Err(panic_payload) => std::panic::resume_unwind(panic_payload),
        }
    }

    /// Stores `value` under `key` in the opaque context store. Only safe
    /// to call from the consumer thread in practice (from inside a guard,
    /// action, or entry/exit hook) — see [`ContextStore`] docs.
    pub fn assign<T: std::any::Any + Send>(&self, key: impl Into<String>, value: T) {
        self.context_store.assign(key, value);
    }

    pub fn lookup<T: std::any::Any + Clone + Send>(&self, key: &str) -> Option<T> {
        self.context_store.lookup(key)
    }
}
