//! Serializer failures.

/// Errors reported by a task serializer.
///
/// `Closed` and `AlreadyClosed` are caller protocol violations. `Disconnected`
/// and `Panicked` mean a task panicked and took the consumer thread down; the
/// serializer cannot be used again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// A task was submitted after `close`.
    Closed,
    /// `close` was called twice.
    AlreadyClosed,
    /// The consumer thread is gone.
    Disconnected,
    /// The consumer thread panicked while running a task.
    Panicked,
    /// The consumer thread could not be started.
    Spawn(String),
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerError::Closed => write!(f, "task submitted to a closed serializer"),
            WorkerError::AlreadyClosed => write!(f, "serializer closed twice"),
            WorkerError::Disconnected => write!(f, "serializer consumer thread has terminated"),
            WorkerError::Panicked => write!(f, "serializer consumer thread panicked"),
            WorkerError::Spawn(msg) => write!(f, "failed to spawn serializer thread: {}", msg),
        }
    }
}

impl std::error::Error for WorkerError {}

impl WorkerError {
    /// Whether the error stems from caller misuse rather than a dead consumer.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, WorkerError::Closed | WorkerError::AlreadyClosed)
    }
}
