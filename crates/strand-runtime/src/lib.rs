//! # strand-runtime
//!
//! The kernel of the strand system: a cooperatively-and-tick-preemptively
//! scheduled user-level thread package with counting semaphores and
//! tick-driven alarms.
//!
//! ## Architecture
//!
//! ```text
//!   Runtime::run(entry)                    ClockThread (interrupt ctx)
//!         │                                      │ tick()
//!         ▼                                      ▼
//!   idle context ──dispatch──► Mutex<Kernel> ◄── alarms / semaphores
//!                                   │
//!                     threads: OS thread + Parker each,
//!                     exactly one unparked at a time
//! ```
//!
//! - `config` - runtime configuration with env overrides
//! - `parking` - per-thread suspend/resume primitive
//! - `mlq` - multilevel feedback ready structure
//! - `alarm` - timed-event queue
//! - `semaphore` - counting semaphores (the sole blocking mechanism)
//! - `kernel` - thread registry and the scheduling decision
//! - `clock` - built-in periodic tick driver
//! - `runtime` - bootstrap, switching, public thread API

pub mod config;
mod parking;
mod mlq;
mod alarm;
mod semaphore;
mod kernel;
mod clock;
mod runtime;
mod tls;

// Re-exports for convenience
pub use alarm::AlarmId;
pub use config::RuntimeConfig;
pub use parking::Parker;
pub use runtime::{
    cancel_alarm, current_thread_id, preempt_point, sleep_with_timeout, spawn, yield_now, Handle,
    Runtime,
};
pub use semaphore::Semaphore;
