//! Runtime bootstrap, context switching and the public thread API
//!
//! A `Runtime` hosts one instance of the whole system: kernel state, the
//! idle context, the clock thread and every runtime thread. Each runtime
//! thread is a host OS thread gated by a private parker; exactly one is
//! unparked at a time, so thread code executes as a single logical stream.
//!
//! Switching is always the same three steps, in this order: record the
//! target as current (under the kernel lock), drop the lock, unpark the
//! target, park yourself. The parker's wake token makes the unpark safe
//! even if the target has not reached its park yet.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use strand_core::{kdebug, kerror, ktrace, RtError, RtResult, ThreadId, ThreadState};

use crate::alarm::{AlarmAction, AlarmId};
use crate::clock::ClockThread;
use crate::config::RuntimeConfig;
use crate::kernel::{Kernel, SwitchTarget};
use crate::parking::Parker;
use crate::semaphore::{SemId, Semaphore, WaitOutcome};
use crate::tls;

/// Shared state behind every handle to one runtime instance
pub(crate) struct RtInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) kernel: Mutex<Kernel>,
    /// Parker of the bootstrap OS thread acting as the idle context
    pub(crate) idle_parker: Parker,
    /// Set by the tick when the running thread should yield at its next
    /// safe point
    pub(crate) preempt_pending: AtomicBool,
    /// Set once all user threads finished; retires the cleanup thread
    pub(crate) shutdown: AtomicBool,
    started: AtomicBool,
}

/// One instance of the thread system
pub struct Runtime {
    inner: Arc<RtInner>,
}

/// Cloneable reference to a runtime, usable from any OS thread
#[derive(Clone)]
pub struct Handle {
    pub(crate) inner: Arc<RtInner>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> RtResult<Runtime> {
        config.validate()?;
        let kernel = Kernel::new(config.cycle_quantum);
        Ok(Runtime {
            inner: Arc::new(RtInner {
                config,
                kernel: Mutex::new(kernel),
                idle_parker: Parker::new(),
                preempt_pending: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                started: AtomicBool::new(false),
            }),
        })
    }

    pub fn handle(&self) -> Handle {
        Handle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Bootstrap the system with `entry` as the first thread and run until
    /// every user thread has finished.
    ///
    /// The calling OS thread becomes the idle context for the duration.
    /// Threads that block forever keep the system alive forever, exactly
    /// like the kernel they model.
    pub fn run<F>(&self, entry: F) -> RtResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let rt = &self.inner;
        if rt.started.swap(true, Ordering::SeqCst) {
            return Err(RtError::AlreadyStarted);
        }

        {
            let mut k = rt.kernel.lock().unwrap();
            let sem = k.sems.create(0);
            k.cleanup_sem = Some(sem);
        }

        spawn_inner(rt, Box::new(entry), false)?;
        let cleanup_rt = Arc::clone(rt);
        spawn_inner(rt, Box::new(move || cleanup_main(cleanup_rt)), true)?;

        let clock = ClockThread::start(Arc::clone(rt));
        self.idle_loop();
        clock.shutdown();
        self.retire_and_join();
        Ok(())
    }

    /// Idle context: dispatch ready threads, park when someone is running
    /// or everything is blocked, leave once all user threads finished.
    fn idle_loop(&self) {
        let rt = &self.inner;
        let park_timeout = Duration::from_millis(rt.config.park_timeout_ms);
        loop {
            let mut k = rt.kernel.lock().unwrap();
            if k.live_user == 0 {
                return;
            }
            if k.current.is_none() && !k.ready.is_empty() {
                let target = k.reschedule(false, true);
                drop(k);
                if let SwitchTarget::Thread(tid, parker) = target {
                    ktrace!("idle context dispatching thread {}", tid);
                    parker.unpark();
                }
                continue;
            }
            drop(k);
            rt.idle_parker.park(Some(park_timeout));
        }
    }

    /// Wake the cleanup thread one last time, dispatch until every thread
    /// has finished, then reclaim the stragglers' host threads.
    fn retire_and_join(&self) {
        let rt = &self.inner;
        rt.shutdown.store(true, Ordering::SeqCst);
        let cleanup_sem = rt
            .kernel
            .lock()
            .unwrap()
            .cleanup_sem
            .expect("runtime not bootstrapped");
        sem_signal(rt, cleanup_sem);

        let park_timeout = Duration::from_millis(rt.config.park_timeout_ms);
        let handles = loop {
            let mut k = rt.kernel.lock().unwrap();
            if k.current.is_none() && !k.ready.is_empty() {
                let target = k.reschedule(false, true);
                drop(k);
                if let SwitchTarget::Thread(_, parker) = target {
                    parker.unpark();
                }
                continue;
            }
            let all_done = k.current.is_none()
                && k.threads.values().all(|t| t.state == ThreadState::Finished);
            if all_done {
                break k
                    .threads
                    .drain()
                    .filter_map(|(_, mut t)| t.join.take())
                    .collect::<Vec<_>>();
            }
            drop(k);
            rt.idle_parker.park(Some(park_timeout));
        };
        for h in handles {
            let _ = h.join();
        }
    }
}

impl Handle {
    /// Spawn a new thread on this runtime
    pub fn spawn<F>(&self, f: F) -> RtResult<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        spawn_inner(&self.inner, Box::new(f), false)
    }

    /// Create a semaphore on this runtime
    pub fn semaphore(&self, initial: u32) -> Semaphore {
        Semaphore::with_handle(self, initial)
    }

    /// Cancel a pending alarm; returns whether it had already fired
    pub fn cancel_alarm(&self, id: AlarmId) -> bool {
        self.inner.kernel.lock().unwrap().alarms.cancel(id)
    }

    /// Advance the clock by one tick.
    ///
    /// The built-in clock thread calls this once per period; embedding
    /// environments with their own time source may drive it directly.
    pub fn tick(&self) {
        tick_inner(&self.inner);
    }
}

// ============================================================================
// Free functions: the API thread code uses on itself
// ============================================================================

/// Spawn a new thread on the current runtime
pub fn spawn<F>(f: F) -> RtResult<ThreadId>
where
    F: FnOnce() + Send + 'static,
{
    let rt = tls::current_rt().ok_or(RtError::NotRuntimeThread)?;
    spawn_inner(&rt, Box::new(f), false)
}

/// Id of the calling runtime thread
pub fn current_thread_id() -> Option<ThreadId> {
    tls::current_tid()
}

/// Voluntarily give up the execution stream.
///
/// Re-enqueues the caller at its current feedback level. A no-op when
/// nothing else is runnable. Outside a runtime thread this degrades to an
/// OS-level yield.
pub fn yield_now() {
    let Some(rt) = tls::current_rt() else {
        thread::yield_now();
        return;
    };
    let Some(me) = tls::current_tid() else {
        thread::yield_now();
        return;
    };
    rt.preempt_pending.store(false, Ordering::Relaxed);
    let k = rt.kernel.lock().unwrap();
    if k.ready.is_empty() {
        return;
    }
    do_yield(&rt, k, me, true);
}

/// Safe point for CPU-bound loops.
///
/// Cheap when no preemption is pending. When the tick has requested a
/// reschedule, switches out like a yield, without charging a second turn.
pub fn preempt_point() {
    let Some(rt) = tls::current_rt() else {
        return;
    };
    if !rt.preempt_pending.load(Ordering::Relaxed) {
        return;
    }
    let Some(me) = tls::current_tid() else {
        return;
    };
    rt.preempt_pending.store(false, Ordering::Relaxed);
    let k = rt.kernel.lock().unwrap();
    if k.ready.is_empty() {
        return;
    }
    do_yield(&rt, k, me, false);
}

/// Block the calling thread for at least `delay_ms` milliseconds.
///
/// Registers an alarm whose only job is to wake the caller, then switches
/// out; no semaphore is involved because the alarm is the single wake
/// source. The delay is quantized up to the next tick, never down.
pub fn sleep_with_timeout(delay_ms: u64) {
    let Some(rt) = tls::current_rt() else {
        thread::sleep(Duration::from_millis(delay_ms));
        return;
    };
    let Some(me) = tls::current_tid() else {
        thread::sleep(Duration::from_millis(delay_ms));
        return;
    };
    let mut k = rt.kernel.lock().unwrap();
    let now = k.ticks;
    k.alarms
        .register(now, delay_ms, rt.config.tick_ms, AlarmAction::Wake(me));
    switch_out_blocked(&rt, k);
}

/// Cancel a pending alarm on the current runtime; returns whether it had
/// already fired
pub fn cancel_alarm(id: AlarmId) -> bool {
    match tls::current_rt() {
        Some(rt) => rt.kernel.lock().unwrap().alarms.cancel(id),
        None => true,
    }
}

// ============================================================================
// Internal: switching and the semaphore slow paths
// ============================================================================

fn do_yield(rt: &Arc<RtInner>, mut k: MutexGuard<'_, Kernel>, me: ThreadId, charge: bool) {
    let my_parker = Arc::clone(&k.threads[&me].parker);
    match k.reschedule(true, charge) {
        SwitchTarget::Stay => {}
        SwitchTarget::Thread(_, parker) => {
            drop(k);
            parker.unpark();
            my_parker.park(None);
        }
        SwitchTarget::Idle => unreachable!("yield with ready work cannot go idle"),
    }
}

/// Mark the current thread blocked and hand the stream to the next thread
/// (or the idle context). Returns once the thread is woken and dispatched
/// again. The caller has already queued the thread wherever it will be
/// woken from, under this same lock acquisition.
pub(crate) fn switch_out_blocked(rt: &Arc<RtInner>, mut k: MutexGuard<'_, Kernel>) {
    let me = k.current.expect("blocking outside a scheduled thread");
    let my_parker = {
        let tcb = k
            .threads
            .get_mut(&me)
            .expect("current thread not registered");
        tcb.state = ThreadState::Blocked;
        Arc::clone(&tcb.parker)
    };
    let target = k.reschedule(false, true);
    drop(k);
    match target {
        SwitchTarget::Thread(_, parker) => parker.unpark(),
        SwitchTarget::Idle => rt.idle_parker.unpark(),
        SwitchTarget::Stay => unreachable!("blocked thread cannot stay current"),
    }
    my_parker.park(None);
}

pub(crate) fn sem_wait(rt: &Arc<RtInner>, id: SemId) {
    let me = tls::current_tid().expect("semaphore wait outside a runtime thread");
    let mut k = rt.kernel.lock().unwrap();
    match k.sems.wait_acquire(id, me) {
        WaitOutcome::Acquired => {}
        WaitOutcome::MustBlock => switch_out_blocked(rt, k),
        WaitOutcome::Stale => panic!("wait on a destroyed semaphore"),
    }
}

pub(crate) fn sem_signal(rt: &Arc<RtInner>, id: SemId) {
    let mut k = rt.kernel.lock().unwrap();
    let wake_idle = k.signal_sem(id);
    drop(k);
    if wake_idle {
        rt.idle_parker.unpark();
    }
}

pub(crate) fn sem_signal_after(rt: &Arc<RtInner>, id: SemId, delay_ms: u64) -> AlarmId {
    let mut k = rt.kernel.lock().unwrap();
    let now = k.ticks;
    k.alarms
        .register(now, delay_ms, rt.config.tick_ms, AlarmAction::Signal(id))
}

// ============================================================================
// Internal: thread lifecycle
// ============================================================================

pub(crate) fn spawn_inner(
    rt: &Arc<RtInner>,
    f: Box<dyn FnOnce() + Send>,
    system: bool,
) -> RtResult<ThreadId> {
    let parker = Arc::new(Parker::new());
    let tid = {
        let mut k = rt.kernel.lock().unwrap();
        if k.threads.len() >= rt.config.max_threads {
            return Err(RtError::ThreadLimit);
        }
        let tid = k.alloc_tid();
        k.insert_thread(tid, Arc::clone(&parker), system);
        tid
    };

    let rt2 = Arc::clone(rt);
    let p2 = Arc::clone(&parker);
    let spawned = thread::Builder::new()
        .name(format!("strand-{}", tid))
        .stack_size(rt.config.stack_size)
        .spawn(move || thread_main(rt2, tid, p2, f));

    let handle = match spawned {
        Ok(h) => h,
        Err(_) => {
            let mut k = rt.kernel.lock().unwrap();
            if let Some(tcb) = k.threads.remove(&tid) {
                if !tcb.system {
                    k.live_user -= 1;
                }
            }
            return Err(RtError::SpawnFailed);
        }
    };

    let mut k = rt.kernel.lock().unwrap();
    if let Some(tcb) = k.threads.get_mut(&tid) {
        tcb.join = Some(handle);
    }
    let wake_idle = k.make_ready(tid);
    drop(k);
    if wake_idle {
        rt.idle_parker.unpark();
    }
    Ok(tid)
}

fn thread_main(rt: Arc<RtInner>, tid: ThreadId, parker: Arc<Parker>, f: Box<dyn FnOnce() + Send>) {
    tls::set_context(&rt, tid);
    // Created threads sit here until their first dispatch
    parker.park(None);

    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        kerror!("thread {} panicked; retiring it", tid);
    }

    exit_current(&rt, tid);
    tls::clear_context();
    // Host thread exits here; the cleanup thread joins it
}

/// Exit epilogue: post self to the finished list, signal the cleanup
/// semaphore, relinquish the stream permanently. Never parks — the host
/// thread returns and exits, and its storage is reclaimed by join.
fn exit_current(rt: &Arc<RtInner>, tid: ThreadId) {
    let mut k = rt.kernel.lock().unwrap();
    debug_assert_eq!(k.current, Some(tid), "exiting thread is not current");
    let system = {
        let tcb = k
            .threads
            .get_mut(&tid)
            .expect("exiting thread not registered");
        tcb.state = ThreadState::Finished;
        tcb.system
    };
    if !system {
        k.live_user -= 1;
    }
    k.finished.push_back(tid);
    let cleanup_sem = k.cleanup_sem.expect("cleanup semaphore missing");
    let mut wake_idle = k.signal_sem(cleanup_sem);
    let target = k.reschedule(false, true);
    drop(k);
    match target {
        SwitchTarget::Thread(_, parker) => parker.unpark(),
        SwitchTarget::Idle => wake_idle = true,
        SwitchTarget::Stay => unreachable!("exiting thread cannot stay current"),
    }
    if wake_idle {
        rt.idle_parker.unpark();
    }
}

/// Body of the cleanup thread.
///
/// A finished thread cannot reclaim the stack it is executing on, so
/// reclamation is delegated here: wake on the cleanup semaphore, drain the
/// finished list, join each host thread.
fn cleanup_main(rt: Arc<RtInner>) {
    let cleanup_sem = rt
        .kernel
        .lock()
        .unwrap()
        .cleanup_sem
        .expect("cleanup semaphore missing");
    loop {
        sem_wait(&rt, cleanup_sem);
        if rt.shutdown.load(Ordering::Acquire) {
            break;
        }

        let handles = {
            let mut k = rt.kernel.lock().unwrap();
            let mut handles = Vec::new();
            while let Some(tid) = k.finished.pop_front() {
                if let Some(mut tcb) = k.threads.remove(&tid) {
                    kdebug!("reclaiming thread {}", tcb.id);
                    if let Some(h) = tcb.join.take() {
                        handles.push(h);
                    }
                }
            }
            handles
        };
        for h in handles {
            let _ = h.join();
        }
        yield_now();
    }
    // Falls out of the loop on shutdown; the idle context reclaims us
}

/// One clock tick: advance time, fire due alarms, charge the running
/// thread's quantum and request a reschedule at its next safe point.
///
/// Runs entirely inside the kernel critical section; alarm actions are
/// restricted to waking threads and signalling semaphores, so nothing here
/// can block.
pub(crate) fn tick_inner(rt: &Arc<RtInner>) {
    let mut k = rt.kernel.lock().unwrap();
    k.ticks += 1;
    let now = k.ticks;

    let mut wake_idle = false;
    for action in k.alarms.fire_due(now) {
        match action {
            AlarmAction::Wake(tid) => wake_idle |= k.make_ready(tid),
            AlarmAction::Signal(id) => wake_idle |= k.signal_sem(id),
        }
    }

    if k.current.is_some() {
        if !k.ready.is_empty() {
            k.charge_current();
            rt.preempt_pending.store(true, Ordering::Relaxed);
        }
    } else if !k.ready.is_empty() {
        wake_idle = true;
    }

    drop(k);
    if wake_idle {
        rt.idle_parker.unpark();
    }
}
