//! Runtime configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_runtime::RuntimeConfig;
//!
//! // Defaults with env overrides
//! let config = RuntimeConfig::from_env();
//!
//! // Or customize programmatically
//! let config = RuntimeConfig::new().tick_ms(2).cycle_quantum(40);
//! ```

use strand_core::env::env_get;
use strand_core::{RtError, RtResult};

mod defaults {
    pub const TICK_MS: u64 = strand_core::constants::DEFAULT_TICK_MS;
    pub const CYCLE_QUANTUM: u32 = strand_core::constants::CYCLE_QUANTUM;
    pub const STACK_SIZE: usize = 256 * 1024;
    pub const MAX_THREADS: usize = 4096;
    pub const PARK_TIMEOUT_MS: u64 = 50;
}

/// Runtime configuration with builder pattern
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Clock tick period in milliseconds
    pub tick_ms: u64,
    /// Scheduling turns in one full feedback sweep
    pub cycle_quantum: u32,
    /// Host stack size per thread
    pub stack_size: usize,
    /// Maximum concurrent threads
    pub max_threads: usize,
    /// Idle context park timeout (lost-wakeup safety net)
    pub park_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeConfig {
    /// Compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `STRAND_TICK_MS` - clock tick period
    /// - `STRAND_CYCLE_QUANTUM` - turns per feedback sweep
    /// - `STRAND_STACK_SIZE` - host stack size per thread
    /// - `STRAND_MAX_THREADS` - thread limit
    /// - `STRAND_PARK_TIMEOUT_MS` - idle park timeout
    pub fn from_env() -> Self {
        Self {
            tick_ms: env_get("STRAND_TICK_MS", defaults::TICK_MS),
            cycle_quantum: env_get("STRAND_CYCLE_QUANTUM", defaults::CYCLE_QUANTUM),
            stack_size: env_get("STRAND_STACK_SIZE", defaults::STACK_SIZE),
            max_threads: env_get("STRAND_MAX_THREADS", defaults::MAX_THREADS),
            park_timeout_ms: env_get("STRAND_PARK_TIMEOUT_MS", defaults::PARK_TIMEOUT_MS),
        }
    }

    /// Explicit defaults, no env override. Useful for tests wanting full
    /// control.
    pub fn new() -> Self {
        Self {
            tick_ms: defaults::TICK_MS,
            cycle_quantum: defaults::CYCLE_QUANTUM,
            stack_size: defaults::STACK_SIZE,
            max_threads: defaults::MAX_THREADS,
            park_timeout_ms: defaults::PARK_TIMEOUT_MS,
        }
    }

    // Builder methods

    pub fn tick_ms(mut self, ms: u64) -> Self {
        self.tick_ms = ms;
        self
    }

    pub fn cycle_quantum(mut self, q: u32) -> Self {
        self.cycle_quantum = q;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }

    pub fn park_timeout_ms(mut self, ms: u64) -> Self {
        self.park_timeout_ms = ms;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> RtResult<()> {
        if self.tick_ms == 0 {
            return Err(RtError::InvalidConfig("tick_ms must be > 0"));
        }
        if self.cycle_quantum < 20 {
            // The sweep buckets (half/quarter/tenth) need room to differ
            return Err(RtError::InvalidConfig("cycle_quantum must be >= 20"));
        }
        if self.stack_size < 32 * 1024 {
            return Err(RtError::InvalidConfig("stack_size must be >= 32KB"));
        }
        if self.max_threads == 0 {
            return Err(RtError::InvalidConfig("max_threads must be > 0"));
        }
        Ok(())
    }
}
