//! Timer scheduling (§4.F, §5 "Shared resources").
//!
//! A state may declare a timeout; on entry a one-shot timer is armed, and
//! on exit it is disarmed. Because a state can be entered, exited and
//! re-entered many times, an armed timer is tagged with the *entry
//! generation* at which it was armed, so a timer that fires after its
//! owning entry has already been disarmed (a race between the timer
//! thread and the consumer thread) is filtered out rather than
//! re-delivered against a configuration it no longer describes.

use crate::graph::VertexId;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Identifies one arming of a timeout: which vertex, and which entry of
/// that vertex (bumped every time the vertex is entered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub vertex: VertexId,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScheduledTimer {
    deadline: Instant,
    token: TimerToken,
}

// BinaryHeap is a max-heap; order by deadline ascending via Reverse.
impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.deadline.cmp(&self.deadline)
    }
}
impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of armed timers plus the set of tokens that are still live
/// (armed and not yet disarmed), so a popped, already-disarmed timer can
/// be dropped silently instead of producing a stale timeout event.
#[derive(Debug, Default)]
pub struct TimerScheduler {
    heap: BinaryHeap<Reverse<ScheduledTimer>>,
    live: std::collections::HashSet<TimerToken>,
    generations: std::collections::HashMap<VertexId, u64>,
}

impl TimerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a new timer for `vertex`, bumping its entry generation, and
    /// returns the token identifying this arming.
    pub fn arm(&mut self, vertex: VertexId, timeout: Duration, now: Instant) -> TimerToken {
        let generation = self.generations.entry(vertex).or_insert(0);
        *generation += 1;
        let token = TimerToken {
            vertex,
            generation: *generation,
        };
        self.live.insert(token);
        self.heap.push(Reverse(ScheduledTimer {
            deadline: now + timeout,
            token,
        }));
        token
    }

    /// Disarms every live timer for `vertex` (there is at most one at a
    /// time in practice, but this is robust to re-entrant arm/disarm).
    pub fn disarm(&mut self, vertex: VertexId) {
        self.live.retain(|tok| tok.vertex != vertex);
    }

    pub fn is_live(&self, token: TimerToken) -> bool {
        self.live.contains(&token)
    }

    /// The duration until the next armed timer is due, or `None` if no
    /// timer is armed. Used by the event loop to bound its wait.
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        self.heap
            .peek()
            .map(|Reverse(t)| t.deadline.saturating_duration_since(now))
    }

    /// Pops every timer whose deadline has passed off the heap, discarding
    /// any whose token is no longer live, and returns the tokens that
    /// actually fired. Does *not* remove fired tokens from `live` — a
    /// one-shot timer is already off the heap and cannot re-fire once
    /// popped, and the selector still needs `is_live` to hold for the
    /// dispatch this token is about to drive; `disarm` on state exit
    /// remains the sole remover of a live entry.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<TimerToken> {
        let mut fired = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let Reverse(scheduled) = self.heap.pop().unwrap();
            if self.live.contains(&scheduled.token) {
                fired.push(scheduled.token);
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disarmed_timer_does_not_fire() {
        let mut sched = TimerScheduler::new();
        let v = VertexId(1);
        sched.arm(v, Duration::from_millis(0), Instant::now());
        sched.disarm(v);
        let fired = sched.pop_expired(Instant::now());
        assert!(fired.is_empty());
    }

    #[test]
    fn fired_token_stays_live_until_disarmed() {
        let mut sched = TimerScheduler::new();
        let v = VertexId(1);
        let token = sched.arm(v, Duration::from_millis(0), Instant::now());
        let fired = sched.pop_expired(Instant::now());
        assert_eq!(fired, vec![token]);
        // The selector checks `is_live` for the same dispatch that
        // `pop_expired` just produced; it must still see the token as live.
        assert!(sched.is_live(token));
        sched.disarm(v);
        assert!(!sched.is_live(token));
    }

    #[test]
    fn reentry_bumps_generation_and_stale_token_is_filtered() {
        let mut sched = TimerScheduler::new();
        let v = VertexId(1);
        let first = sched.arm(v, Duration::from_millis(0), Instant::now());
        sched.disarm(v);
        let second = sched.arm(v, Duration::from_millis(0), Instant::now());
        assert_ne!(first.generation, second.generation);
        let fired = sched.pop_expired(Instant::now());
        assert_eq!(fired, vec![second]);
    }
}
