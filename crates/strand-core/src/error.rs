//! Error types for the strand runtime

use core::fmt;

/// Result type for runtime operations
pub type RtResult<T> = Result<T, RtError>;

/// Errors that can occur in runtime operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtError {
    /// Operation requires a runtime thread but was called from outside one
    NotRuntimeThread,

    /// Thread or semaphore handle refers to a retired object
    InvalidState,

    /// Semaphore destroyed while threads were enqueued on it
    SemaphoreBusy,

    /// Runtime was already started
    AlreadyStarted,

    /// Thread limit reached
    ThreadLimit,

    /// Failed to spawn a host OS thread
    SpawnFailed,

    /// Configuration value out of range
    InvalidConfig(&'static str),
}

impl fmt::Display for RtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtError::NotRuntimeThread => write!(f, "not called from a runtime thread"),
            RtError::InvalidState => write!(f, "handle refers to a retired object"),
            RtError::SemaphoreBusy => write!(f, "semaphore has enqueued waiters"),
            RtError::AlreadyStarted => write!(f, "runtime already started"),
            RtError::ThreadLimit => write!(f, "thread limit reached"),
            RtError::SpawnFailed => write!(f, "failed to spawn host thread"),
            RtError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for RtError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", RtError::NotRuntimeThread),
            "not called from a runtime thread"
        );
        assert_eq!(
            format!("{}", RtError::InvalidConfig("tick_ms must be > 0")),
            "invalid config: tick_ms must be > 0"
        );
    }
}
