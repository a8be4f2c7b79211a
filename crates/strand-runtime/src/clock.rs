//! Built-in periodic clock
//!
//! One named thread driving the tick entry point at the configured period.
//! The tick itself lives in `runtime.rs` (`tick_inner`) and can also be
//! invoked directly by an embedding environment; this thread is just the
//! default driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use strand_core::kdebug;

use crate::runtime::{self, RtInner};

pub(crate) struct ClockThread {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl ClockThread {
    pub(crate) fn start(rt: Arc<RtInner>) -> ClockThread {
        let shutdown = Arc::new(AtomicBool::new(false));
        let sd = Arc::clone(&shutdown);
        let period = Duration::from_millis(rt.config.tick_ms);

        let handle = thread::Builder::new()
            .name("strand-clock".into())
            .spawn(move || {
                kdebug!("clock thread started, period {:?}", period);
                while !sd.load(Ordering::Relaxed) {
                    thread::sleep(period);
                    runtime::tick_inner(&rt);
                }
                kdebug!("clock thread exiting");
            })
            .expect("failed to spawn clock thread");

        ClockThread {
            handle: Some(handle),
            shutdown,
        }
    }

    /// Request shutdown and wait for the clock thread to exit
    pub(crate) fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
