//! Timed-event queue
//!
//! Alarms are absolute tick deadlines kept in one ascending queue. The
//! clock tick pops and applies every due alarm in deadline order. Because
//! alarms fire inside the kernel critical section, the callback set is
//! closed and non-blocking: wake a thread or signal a semaphore.

use std::collections::VecDeque;

use strand_core::ThreadId;

use crate::semaphore::SemId;

/// What to do when an alarm's deadline is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AlarmAction {
    /// Make a blocked thread runnable again
    Wake(ThreadId),
    /// V a semaphore (no-op if the semaphore was destroyed since)
    Signal(SemId),
}

/// Opaque handle returned by alarm registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmId(u64);

struct AlarmEntry {
    id: u64,
    deadline: u64,
    action: AlarmAction,
}

/// Deadline-ordered pending alarms
///
/// Ties are broken by insertion order: an alarm registered later with the
/// same deadline fires later.
pub(crate) struct AlarmQueue {
    pending: VecDeque<AlarmEntry>,
    next_id: u64,
}

impl AlarmQueue {
    pub(crate) fn new() -> Self {
        AlarmQueue {
            pending: VecDeque::new(),
            next_id: 1,
        }
    }

    /// Register an alarm `delay_ms` from now.
    ///
    /// The delay is quantized up to the next tick boundary: zero delay, or
    /// a delay that is not an exact multiple of the tick period, rounds up.
    /// An alarm never fires early.
    pub(crate) fn register(
        &mut self,
        now_tick: u64,
        delay_ms: u64,
        tick_ms: u64,
        action: AlarmAction,
    ) -> AlarmId {
        let dt = if delay_ms == 0 {
            1
        } else {
            delay_ms.div_ceil(tick_ms)
        };
        let deadline = now_tick + dt;
        let id = self.next_id;
        self.next_id += 1;

        let pos = self
            .pending
            .iter()
            .position(|e| e.deadline > deadline)
            .unwrap_or(self.pending.len());
        self.pending.insert(pos, AlarmEntry { id, deadline, action });
        AlarmId(id)
    }

    /// Remove a pending alarm.
    ///
    /// Returns whether the alarm had already fired (or was never known),
    /// so callers can avoid acting on a stale handle.
    pub(crate) fn cancel(&mut self, id: AlarmId) -> bool {
        match self.pending.iter().position(|e| e.id == id.0) {
            Some(pos) => {
                self.pending.remove(pos);
                false
            }
            None => true,
        }
    }

    /// Pop every alarm with `deadline <= now_tick`, in deadline order
    pub(crate) fn fire_due(&mut self, now_tick: u64) -> Vec<AlarmAction> {
        let mut due = Vec::new();
        while let Some(front) = self.pending.front() {
            if front.deadline > now_tick {
                break;
            }
            due.push(self.pending.pop_front().unwrap().action);
        }
        due
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: u64 = 10;

    fn wake(n: u32) -> AlarmAction {
        AlarmAction::Wake(ThreadId::new(n))
    }

    #[test]
    fn test_round_up_quantization() {
        let mut q = AlarmQueue::new();
        // Exact multiple: fires at now + delay/tick, not later
        q.register(100, 30, TICK, wake(1));
        assert!(q.fire_due(102).is_empty());
        assert_eq!(q.fire_due(103).len(), 1);

        // Not a multiple: rounds up to the next boundary
        q.register(100, 31, TICK, wake(2));
        assert!(q.fire_due(103).is_empty());
        assert_eq!(q.fire_due(104).len(), 1);

        // Zero delay: next tick, never the current one
        q.register(100, 0, TICK, wake(3));
        assert!(q.fire_due(100).is_empty());
        assert_eq!(q.fire_due(101).len(), 1);
    }

    #[test]
    fn test_fire_in_deadline_order() {
        let mut q = AlarmQueue::new();
        q.register(0, 30, TICK, wake(3));
        q.register(0, 10, TICK, wake(1));
        q.register(0, 20, TICK, wake(2));
        let due = q.fire_due(10);
        assert_eq!(due, vec![wake(1), wake(2), wake(3)]);
    }

    #[test]
    fn test_equal_deadlines_stable() {
        let mut q = AlarmQueue::new();
        q.register(0, 10, TICK, wake(1));
        q.register(0, 10, TICK, wake(2));
        q.register(0, 10, TICK, wake(3));
        assert_eq!(q.fire_due(1), vec![wake(1), wake(2), wake(3)]);
    }

    #[test]
    fn test_cancel_reports_fired() {
        let mut q = AlarmQueue::new();
        let a = q.register(0, 10, TICK, wake(1));
        let b = q.register(0, 50, TICK, wake(2));

        // Still pending: cancelled, not fired
        assert!(!q.cancel(b));
        assert_eq!(q.pending_len(), 1);

        // Fire the first, then cancel its stale handle
        assert_eq!(q.fire_due(1).len(), 1);
        assert!(q.cancel(a));
    }

    #[test]
    fn test_fire_due_pops_everything_due() {
        let mut q = AlarmQueue::new();
        for i in 1..=5 {
            q.register(0, i * 10, TICK, wake(i as u32));
        }
        assert_eq!(q.fire_due(3).len(), 3);
        assert_eq!(q.pending_len(), 2);
    }
}
