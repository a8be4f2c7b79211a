//! Thread lifecycle states

use core::fmt;

/// State of a runtime thread
///
/// Lifecycle: `Created → Ready → Running → {Ready | Blocked | Finished}`.
/// A `Blocked` thread returns to `Ready` when a semaphore signal or an
/// alarm wakes it. `Finished` is terminal; the control block is reclaimed
/// by the cleanup thread, never by the thread itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Just created, not yet enqueued
    Created = 0,

    /// In a feedback queue, waiting for a turn
    Ready = 1,

    /// Currently holding the execution stream
    Running = 2,

    /// Off the ready structure, waiting on a semaphore or alarm
    Blocked = 3,

    /// Entry procedure returned, awaiting cleanup
    Finished = 4,
}

impl ThreadState {
    /// Check if this state allows the thread to be dequeued and run
    #[inline]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, ThreadState::Ready)
    }

    /// Check if this thread has terminated
    #[inline]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, ThreadState::Finished)
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThreadState::Created => "created",
            ThreadState::Ready => "ready",
            ThreadState::Running => "running",
            ThreadState::Blocked => "blocked",
            ThreadState::Finished => "finished",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(ThreadState::Ready.is_runnable());
        assert!(!ThreadState::Running.is_runnable());
        assert!(!ThreadState::Blocked.is_runnable());

        assert!(ThreadState::Finished.is_terminated());
        assert!(!ThreadState::Running.is_terminated());
    }
}
