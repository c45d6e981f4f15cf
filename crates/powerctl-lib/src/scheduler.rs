//! Single-threaded timer queue with first-class cancellation.
//!
//! The engine owns one [`Scheduler`] for every delayed action: setting
//! debounce timers and profile-apply batches. Time is always passed in by
//! the caller, so the queue itself never sleeps and tests can drive it with
//! a virtual clock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Handle to a scheduled task. Cancelling it guarantees the task is never
/// returned by [`Scheduler::pop_due`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Entry<T> {
    task: T,
    token: CancelToken,
}

/// Pending tasks ordered by deadline, ties broken by scheduling order.
pub struct Scheduler<T> {
    entries: BTreeMap<(Instant, u64), Entry<T>>,
    seq: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            seq: 0,
        }
    }

    /// Queue `task` to become due at `at`.
    pub fn schedule(&mut self, at: Instant, task: T) -> CancelToken {
        let token = CancelToken::new();
        self.seq += 1;
        self.entries.insert(
            (at, self.seq),
            Entry {
                task,
                token: token.clone(),
            },
        );
        token
    }

    pub fn schedule_after(&mut self, now: Instant, delay: Duration, task: T) -> CancelToken {
        self.schedule(now + delay, task)
    }

    /// Remove and return the earliest task due at or before `now`.
    /// Cancelled tasks are discarded on the way.
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        loop {
            let (&key, _) = self.entries.first_key_value()?;
            if key.0 > now {
                return None;
            }
            let entry = self.entries.remove(&key)?;
            if entry.token.is_cancelled() {
                continue;
            }
            return Some(entry.task);
        }
    }

    /// Deadline of the earliest live task.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.purge_cancelled();
        self.entries.first_key_value().map(|(key, _)| key.0)
    }

    /// Number of live (not cancelled) tasks.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|e| !e.token.is_cancelled())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_cancelled(&mut self) {
        self.entries.retain(|_, e| !e.token.is_cancelled());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn nothing_due_before_deadline() {
        let t0 = Instant::now();
        let mut s = Scheduler::new();
        s.schedule_after(t0, ms(100), "a");
        assert_eq!(s.pop_due(t0 + ms(99)), None);
        assert_eq!(s.pop_due(t0 + ms(100)), Some("a"));
        assert_eq!(s.pop_due(t0 + ms(200)), None);
    }

    #[test]
    fn due_tasks_come_out_in_deadline_order() {
        let t0 = Instant::now();
        let mut s = Scheduler::new();
        s.schedule_after(t0, ms(300), 3);
        s.schedule_after(t0, ms(100), 1);
        s.schedule_after(t0, ms(200), 2);

        let now = t0 + ms(500);
        let order: Vec<_> = std::iter::from_fn(|| s.pop_due(now)).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn same_deadline_keeps_scheduling_order() {
        let t0 = Instant::now();
        let mut s = Scheduler::new();
        s.schedule(t0, "first");
        s.schedule(t0, "second");
        assert_eq!(s.pop_due(t0), Some("first"));
        assert_eq!(s.pop_due(t0), Some("second"));
    }

    #[test]
    fn cancelled_task_never_fires() {
        let t0 = Instant::now();
        let mut s = Scheduler::new();
        let token = s.schedule_after(t0, ms(10), "stale");
        s.schedule_after(t0, ms(20), "fresh");
        token.cancel();

        assert!(token.is_cancelled());
        assert_eq!(s.len(), 1);
        assert_eq!(s.pop_due(t0 + ms(50)), Some("fresh"));
        assert!(s.is_empty());
    }

    #[test]
    fn next_deadline_skips_cancelled() {
        let t0 = Instant::now();
        let mut s = Scheduler::new();
        let early = s.schedule_after(t0, ms(10), ());
        s.schedule_after(t0, ms(40), ());
        early.cancel();
        assert_eq!(s.next_deadline(), Some(t0 + ms(40)));
    }

    #[test]
    fn empty_scheduler_has_no_deadline() {
        let mut s: Scheduler<()> = Scheduler::default();
        assert_eq!(s.next_deadline(), None);
        assert_eq!(s.pop_due(Instant::now()), None);
    }

    #[test]
    fn token_clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
    }
}
