//! # strand
//!
//! A small operating-system-style runtime: user-level threads scheduled by
//! a multilevel feedback queue, counting semaphores and tick-driven alarms
//! as the only blocking primitives, and on top of them a reliable
//! stop-and-wait byte-stream transport over an unreliable, lossy packet
//! fabric.
//!
//! ## Quick Start
//!
//! ```ignore
//! use strand::{Runtime, RuntimeConfig, Semaphore, spawn};
//!
//! fn main() {
//!     let rt = Runtime::new(RuntimeConfig::from_env()).unwrap();
//!     rt.run(|| {
//!         let sem = Semaphore::new(0).unwrap();
//!         let sem2 = sem.clone();
//!         spawn(move || {
//!             println!("hello from a strand thread");
//!             sem2.signal();
//!         })
//!         .unwrap();
//!         sem.wait();
//!     })
//!     .unwrap();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                     User Code                          │
//! │   spawn / yield_now / Semaphore / StreamSocket         │
//! └────────────────────────────────────────────────────────┘
//!                │                         │
//!                ▼                         ▼
//! ┌──────────────────────────┐  ┌─────────────────────────┐
//! │      strand-runtime      │  │       strand-net        │
//! │ feedback queues, alarms, │◄─┤ port table, handshake,  │
//! │ semaphores, clock tick   │  │ stop-and-wait, backoff  │
//! └──────────────────────────┘  └─────────────────────────┘
//!                │                         │
//!                ▼                         ▼
//!      one OS thread + parker      lossy packet fabric
//!      per logical thread          with delivery threads
//! ```

// Re-export core types
pub use strand_core::{RtError, RtResult, ThreadId, ThreadState};

// Re-export kprint macros for debug logging
pub use strand_core::{kdebug, kerror, kinfo, ktrace, kwarn};
pub use strand_core::kprint::{init as init_logging, set_log_level, LogLevel};

// Re-export env utilities
pub use strand_core::{env_get, env_get_bool, env_get_opt};

// Re-export runtime types
pub use strand_runtime::{
    cancel_alarm, current_thread_id, preempt_point, sleep_with_timeout, spawn, yield_now, AlarmId,
    Handle, Runtime, RuntimeConfig, Semaphore,
};

// Re-export transport types
pub use strand_net::{
    DatagramReceiver, DatagramSender, Endpoint, Fabric, LossPolicy, NetAddr, NetConfig, NetError,
    NetResult, NetStack, StreamSocket,
};
