//! Error types for graph construction.
//!
//! Errors fall into three classes (see [`ErrorKind`]):
//! - protocol violations: caller misuse that would otherwise corrupt the graph
//!   silently (bad bracketing, forward id misuse, use after close)
//! - data errors: unrecognized configuration or output format
//! - unsupported operations: reading the interchange form back

use depgraph_types::{DependencyId, NodeId};
use depgraph_worker::WorkerError;

/// Coarse classification of a [`DepGraphError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ProtocolViolation,
    DataError,
    Unsupported,
}

/// Errors raised by trackers, builders and the build session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepGraphError {
    /// `Open` of a dependency id that already has a pending open.
    ForwardAlreadyOpen {
        id: DependencyId,
        /// Node holding the pending open
        pending: NodeId,
        /// Node that tried to open it again
        node: NodeId,
    },

    /// `Close` or `Drop` of a dependency id with no pending open.
    ForwardNotOpen {
        id: DependencyId,
        /// "close" or "drop"
        operation: &'static str,
        node: NodeId,
    },

    /// A begin/end notification that does not match the open brackets.
    BracketMismatch { message: String },

    /// A read/write notification with no open bracket to attribute it to.
    NoOpenNode { operation: &'static str },

    /// Observation list and node id list of different lengths.
    ObservationMismatch { observations: usize, nodes: usize },

    /// Tracker bookkeeping read before the tracker was closed.
    NotClosed { component: &'static str },

    /// A tracker or builder used after it was closed.
    AlreadyClosed { component: &'static str },

    /// `add_dependencies` after the reverse index was built.
    ReverseIndexBuilt,

    /// A node id the graph never allocated.
    UnknownNode(NodeId),

    /// A serializer failure (closed, disconnected, or panicked consumer).
    Worker(WorkerError),

    /// Unrecognized or malformed configuration.
    InvalidConfig(String),

    /// Unrecognized interchange/output format name.
    UnknownFormat(String),

    /// Operation not implemented.
    Unsupported(String),

    /// Failure encoding the interchange form.
    Encode(String),
}

impl DepGraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DepGraphError::InvalidConfig(_)
            | DepGraphError::UnknownFormat(_)
            | DepGraphError::Encode(_) => ErrorKind::DataError,
            DepGraphError::Unsupported(_) => ErrorKind::Unsupported,
            _ => ErrorKind::ProtocolViolation,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        self.kind() == ErrorKind::Unsupported
    }

    pub(crate) fn bracket(message: impl Into<String>) -> Self {
        DepGraphError::BracketMismatch {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DepGraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepGraphError::ForwardAlreadyOpen { id, pending, node } => write!(
                f,
                "forward dependency {} opened by {} while still pending from {}",
                id, node, pending
            ),
            DepGraphError::ForwardNotOpen {
                id,
                operation,
                node,
            } => write!(
                f,
                "forward dependency {} has no pending open ({} at {})",
                id, operation, node
            ),
            DepGraphError::BracketMismatch { message } => {
                write!(f, "command bracket mismatch: {}", message)
            }
            DepGraphError::NoOpenNode { operation } => {
                write!(f, "{} outside of any command bracket", operation)
            }
            DepGraphError::ObservationMismatch {
                observations,
                nodes,
            } => write!(
                f,
                "{} observations paired with {} node ids",
                observations, nodes
            ),
            DepGraphError::NotClosed { component } => {
                write!(f, "{} bookkeeping read before close", component)
            }
            DepGraphError::AlreadyClosed { component } => {
                write!(f, "{} used after close", component)
            }
            DepGraphError::ReverseIndexBuilt => write!(
                f,
                "reverse dependencies already built; graph no longer accepts dependencies"
            ),
            DepGraphError::UnknownNode(node) => write!(f, "unknown node {}", node),
            DepGraphError::Worker(err) => write!(f, "task serializer: {}", err),
            DepGraphError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            DepGraphError::UnknownFormat(name) => write!(f, "unknown output format: {}", name),
            DepGraphError::Unsupported(what) => write!(f, "unsupported: {}", what),
            DepGraphError::Encode(msg) => write!(f, "failed to encode graph: {}", msg),
        }
    }
}

impl std::error::Error for DepGraphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DepGraphError::Worker(err) => Some(err),
            _ => None,
        }
    }
}

impl From<WorkerError> for DepGraphError {
    fn from(err: WorkerError) -> Self {
        DepGraphError::Worker(err)
    }
}

pub type Result<T> = std::result::Result<T, DepGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DepGraphError::Unsupported("decode".into()).kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(
            DepGraphError::UnknownFormat("dot".into()).kind(),
            ErrorKind::DataError
        );
        assert_eq!(
            DepGraphError::Worker(WorkerError::Closed).kind(),
            ErrorKind::ProtocolViolation
        );
        assert_eq!(
            DepGraphError::ForwardNotOpen {
                id: DependencyId::from(1u64),
                operation: "close",
                node: NodeId(2),
            }
            .to_string(),
            "forward dependency 0x1 has no pending open (close at n2)"
        );
    }
}
