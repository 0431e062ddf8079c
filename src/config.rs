//! Ambient configuration (§10). Loading config from files/env is out of
//! scope (§1); this is a plain struct with a `Default` impl and a small
//! builder, the shape the teacher uses in its own `utils/config` module.

use std::time::Duration;

/// What to do when a guard or action panics mid-RTC-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicPolicy {
    /// Log a diagnostic and continue the RTC step on a best-effort basis
    /// (§7: the default — GuardError/ActionError disposition).
    LogAndContinue,
    /// Re-raise the panic, tearing down the consumer thread. Useful in
    /// tests that want a hook bug to fail loudly.
    Propagate,
}

#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// A hint for the event queue's initial capacity; the queue is
    /// logically unbounded (§4.F) regardless of this value.
    pub channel_capacity_hint: usize,
    pub action_panic_policy: PanicPolicy,
    /// How often the consumer loop wakes up even absent a new event, to
    /// check for expired timers (§4.F).
    pub timer_tick_granularity: Duration,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            channel_capacity_hint: 16,
            action_panic_policy: PanicPolicy::LogAndContinue,
            timer_tick_granularity: Duration::from_millis(10),
        }
    }
}

impl MachineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel_capacity_hint(mut self, hint: usize) -> Self {
        self.channel_capacity_hint = hint;
        self
    }

    pub fn with_panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.action_panic_policy = policy;
        self
    }

    pub fn with_timer_tick_granularity(mut self, granularity: Duration) -> Self {
        self.timer_tick_granularity = granularity;
        self
    }
}
