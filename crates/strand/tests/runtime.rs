//! Scheduler, semaphore and alarm behavior, exercised end to end.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use strand::{
    cancel_alarm, preempt_point, sleep_with_timeout, spawn, yield_now, Runtime, RuntimeConfig,
    Semaphore,
};

fn fast_config() -> RuntimeConfig {
    RuntimeConfig::new().tick_ms(2).park_timeout_ms(10)
}

#[test]
fn run_returns_once_all_threads_finish() {
    let hits = Arc::new(AtomicU64::new(0));
    let rt = Runtime::new(fast_config()).unwrap();
    let h = Arc::clone(&hits);
    rt.run(move || {
        for _ in 0..3 {
            let h = Arc::clone(&h);
            spawn(move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        h.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[test]
fn semaphore_initial_count_permits_n_waits() {
    let woken = Arc::new(AtomicBool::new(false));
    let rt = Runtime::new(fast_config()).unwrap();
    let w = Arc::clone(&woken);
    rt.run(move || {
        let sem = Semaphore::new(2).unwrap();
        // Two waits against the initial count return immediately
        sem.wait();
        sem.wait();

        let sem2 = sem.clone();
        let w2 = Arc::clone(&w);
        spawn(move || {
            sem2.wait();
            w2.store(true, Ordering::SeqCst);
        })
        .unwrap();

        sleep_with_timeout(40);
        assert!(
            !w.load(Ordering::SeqCst),
            "third wait must block until a signal"
        );
        sem.signal();
    })
    .unwrap();
    assert!(woken.load(Ordering::SeqCst));
}

#[test]
fn semaphore_wakes_waiters_in_spawn_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let rt = Runtime::new(fast_config()).unwrap();
    let o = Arc::clone(&order);
    rt.run(move || {
        let sem = Semaphore::new(0).unwrap();
        for i in 0..5u32 {
            let sem = sem.clone();
            let order = Arc::clone(&o);
            spawn(move || {
                sem.wait();
                order.lock().unwrap().push(i);
            })
            .unwrap();
        }
        // Let every waiter reach the semaphore's queue
        sleep_with_timeout(50);
        for _ in 0..5 {
            sem.signal();
        }
    })
    .unwrap();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn sleep_never_wakes_early() {
    let elapsed = Arc::new(Mutex::new(Duration::ZERO));
    let rt = Runtime::new(RuntimeConfig::new().tick_ms(5).park_timeout_ms(10)).unwrap();
    let e = Arc::clone(&elapsed);
    rt.run(move || {
        let t0 = Instant::now();
        sleep_with_timeout(30);
        *e.lock().unwrap() = t0.elapsed();
    })
    .unwrap();
    // 30ms at a 5ms tick is 6 ticks; the worst case saves one tick of
    // registration skew, never more
    assert!(
        *elapsed.lock().unwrap() >= Duration::from_millis(25),
        "woke after {:?}",
        *elapsed.lock().unwrap()
    );
}

#[test]
fn alarm_signals_semaphore_after_delay() {
    let elapsed = Arc::new(Mutex::new(Duration::ZERO));
    let rt = Runtime::new(fast_config()).unwrap();
    let e = Arc::clone(&elapsed);
    rt.run(move || {
        let sem = Semaphore::new(0).unwrap();
        let t0 = Instant::now();
        sem.signal_after(30);
        sem.wait();
        *e.lock().unwrap() = t0.elapsed();
    })
    .unwrap();
    assert!(*elapsed.lock().unwrap() >= Duration::from_millis(25));
}

#[test]
fn alarm_cancel_reports_fired_state() {
    let rt = Runtime::new(fast_config()).unwrap();
    rt.run(|| {
        let sem = Semaphore::new(0).unwrap();

        let pending = sem.signal_after(10_000);
        assert!(!cancel_alarm(pending), "pending alarm cancels cleanly");

        let due = sem.signal_after(0);
        sleep_with_timeout(20);
        assert!(cancel_alarm(due), "stale handle reports already-fired");
        // Consume the token the fired alarm left behind
        sem.wait();
    })
    .unwrap();
}

#[test]
fn yielding_threads_interleave() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let rt = Runtime::new(fast_config()).unwrap();
    let l = Arc::clone(&log);
    rt.run(move || {
        for id in 0..2u32 {
            let log = Arc::clone(&l);
            spawn(move || {
                for _ in 0..5 {
                    log.lock().unwrap().push(id);
                    yield_now();
                }
            })
            .unwrap();
        }
    })
    .unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 10);
    // With both threads yielding every step, neither runs to completion
    // before the other starts
    let first_b = log.iter().position(|&id| id == 1).unwrap();
    let last_a = log.iter().rposition(|&id| id == 0).unwrap();
    assert!(first_b < last_a, "threads never interleaved: {:?}", *log);
}

#[test]
fn cpu_bound_threads_all_make_progress() {
    let counts: Arc<Vec<AtomicU64>> = Arc::new((0..4).map(|_| AtomicU64::new(0)).collect());
    let stop = Arc::new(AtomicBool::new(false));
    let rt = Runtime::new(fast_config()).unwrap();
    let c = Arc::clone(&counts);
    let s = Arc::clone(&stop);
    rt.run(move || {
        for i in 0..4usize {
            let counts = Arc::clone(&c);
            let stop = Arc::clone(&s);
            spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    counts[i].fetch_add(1, Ordering::Relaxed);
                    preempt_point();
                }
            })
            .unwrap();
        }
        sleep_with_timeout(100);
        s.store(true, Ordering::Relaxed);
    })
    .unwrap();

    for (i, c) in counts.iter().enumerate() {
        assert!(c.load(Ordering::Relaxed) > 0, "thread {} starved", i);
    }
}
