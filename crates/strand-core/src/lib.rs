//! # strand-core
//!
//! Core types for the strand user-level thread runtime.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! The scheduler, alarms and semaphores live in `strand-runtime`; the
//! packet fabric and transport sockets live in `strand-net`.
//!
//! ## Modules
//!
//! - `id` - thread identifier type
//! - `state` - thread lifecycle states
//! - `error` - runtime error types
//! - `kprint` - kernel-style debug printing macros
//! - `env` - environment variable utilities

pub mod id;
pub mod state;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::ThreadId;
pub use state::ThreadState;
pub use error::{RtError, RtResult};
pub use env::{env_get, env_get_bool, env_get_opt};

/// Constants shared by the runtime and transport crates
pub mod constants {
    /// Number of feedback-queue levels
    pub const NUM_LEVELS: usize = 4;

    /// Scheduling turns in one full feedback sweep
    pub const CYCLE_QUANTUM: u32 = 160;

    /// Default clock tick period in milliseconds
    pub const DEFAULT_TICK_MS: u64 = 10;

    /// First port of the ephemeral (connection-initiating) range
    pub const EPHEMERAL_PORT_START: u16 = 32768;

    /// Size of the port space (ports are u16)
    pub const PORT_SPACE: usize = 65536;

    /// Largest packet the fabric will carry, headers included
    pub const MAX_PACKET_SIZE: usize = 4096;
}
