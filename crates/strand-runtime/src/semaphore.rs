//! Counting semaphores
//!
//! The semaphore is the sole blocking/waking mechanism in the runtime:
//! sleeping threads, the cleanup thread and the transport layer all park on
//! semaphores. Wait queues are strictly FIFO; a signal either wakes the
//! longest-waiting thread or increments the count, and never blocks, which
//! makes it safe to call from the clock tick and from packet delivery.
//!
//! Semaphore state lives in a kernel-resident slab. Public [`Semaphore`]
//! handles carry a slot index plus a generation, so a handle (or a stale
//! alarm) that outlives `destroy` becomes a harmless no-op instead of
//! touching a recycled slot.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use strand_core::{RtError, RtResult, ThreadId};

use crate::alarm::AlarmId;
use crate::runtime::{self, Handle, RtInner};

/// Index + generation of a kernel semaphore slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SemId {
    pub(crate) idx: u32,
    pub(crate) gen: u32,
}

/// Outcome of the non-blocking half of a P operation
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// Count was positive; decremented and acquired
    Acquired,
    /// Caller was appended to the wait queue and must switch out
    MustBlock,
    /// Handle refers to a destroyed slot
    Stale,
}

/// Outcome of a V operation
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SignalOutcome {
    /// Longest-waiting thread dequeued; caller makes it runnable
    WakeThread(ThreadId),
    /// No waiters; count incremented
    Incremented,
    /// Handle refers to a destroyed slot
    Stale,
}

struct SemSlot {
    gen: u32,
    live: bool,
    count: u32,
    waiters: VecDeque<ThreadId>,
}

/// Slab of semaphore slots with generation-checked handles
///
/// Invariant: `count > 0` implies the wait queue is empty.
pub(crate) struct SemTable {
    slots: Vec<SemSlot>,
    free: Vec<u32>,
}

impl SemTable {
    pub(crate) fn new() -> Self {
        SemTable {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn create(&mut self, initial: u32) -> SemId {
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.gen = slot.gen.wrapping_add(1);
            slot.live = true;
            slot.count = initial;
            SemId { idx, gen: slot.gen }
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(SemSlot {
                gen: 1,
                live: true,
                count: initial,
                waiters: VecDeque::new(),
            });
            SemId { idx, gen: 1 }
        }
    }

    fn slot_mut(&mut self, id: SemId) -> Option<&mut SemSlot> {
        let slot = self.slots.get_mut(id.idx as usize)?;
        if slot.live && slot.gen == id.gen {
            Some(slot)
        } else {
            None
        }
    }

    pub(crate) fn wait_acquire(&mut self, id: SemId, me: ThreadId) -> WaitOutcome {
        let Some(slot) = self.slot_mut(id) else {
            return WaitOutcome::Stale;
        };
        if slot.count > 0 {
            slot.count -= 1;
            WaitOutcome::Acquired
        } else {
            slot.waiters.push_back(me);
            WaitOutcome::MustBlock
        }
    }

    pub(crate) fn signal(&mut self, id: SemId) -> SignalOutcome {
        let Some(slot) = self.slot_mut(id) else {
            return SignalOutcome::Stale;
        };
        match slot.waiters.pop_front() {
            Some(tid) => SignalOutcome::WakeThread(tid),
            None => {
                slot.count += 1;
                SignalOutcome::Incremented
            }
        }
    }

    /// Free a slot. Fails if any thread is still enqueued on it.
    pub(crate) fn destroy(&mut self, id: SemId) -> RtResult<()> {
        let idx = id.idx;
        let Some(slot) = self.slot_mut(id) else {
            return Err(RtError::InvalidState);
        };
        if !slot.waiters.is_empty() {
            return Err(RtError::SemaphoreBusy);
        }
        slot.live = false;
        slot.count = 0;
        self.free.push(idx);
        Ok(())
    }
}

/// A counting semaphore handle
///
/// Cloneable; all clones address the same kernel slot. `destroy` retires
/// the slot for every clone at once.
pub struct Semaphore {
    rt: Arc<RtInner>,
    id: SemId,
}

impl Semaphore {
    /// Create a semaphore on the current thread's runtime
    pub fn new(initial: u32) -> RtResult<Semaphore> {
        let rt = crate::tls::current_rt().ok_or(RtError::NotRuntimeThread)?;
        Ok(Self::create(rt, initial))
    }

    /// Create a semaphore on an explicit runtime handle
    pub fn with_handle(handle: &Handle, initial: u32) -> Semaphore {
        Self::create(Arc::clone(&handle.inner), initial)
    }

    fn create(rt: Arc<RtInner>, initial: u32) -> Semaphore {
        let id = rt.kernel.lock().unwrap().sems.create(initial);
        Semaphore { rt, id }
    }

    /// P: decrement, or enqueue the calling thread and switch out until
    /// a matching signal wakes it.
    ///
    /// # Panics
    ///
    /// Panics when called from outside a runtime thread, or on a destroyed
    /// semaphore; both are programming errors, not runtime conditions.
    pub fn wait(&self) {
        runtime::sem_wait(&self.rt, self.id);
    }

    /// V: wake the longest-waiting thread, or increment the count.
    ///
    /// Never blocks. Safe to call from interrupt contexts (clock tick,
    /// packet delivery) and from any OS thread holding a handle.
    pub fn signal(&self) {
        runtime::sem_signal(&self.rt, self.id);
    }

    /// Arm an alarm that signals this semaphore after `delay_ms`.
    ///
    /// The returned handle can be cancelled via [`Handle::cancel_alarm`] or
    /// [`crate::cancel_alarm`]. A fire after `destroy` is a no-op.
    pub fn signal_after(&self, delay_ms: u64) -> AlarmId {
        runtime::sem_signal_after(&self.rt, self.id, delay_ms)
    }

    /// Retire the semaphore. Only valid with an empty wait queue.
    pub fn destroy(&self) -> RtResult<()> {
        self.rt.kernel.lock().unwrap().sems.destroy(self.id)
    }
}

impl Clone for Semaphore {
    fn clone(&self) -> Self {
        Semaphore {
            rt: Arc::clone(&self.rt),
            id: self.id,
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Semaphore({}/{})", self.id.idx, self.id.gen)
    }
}
