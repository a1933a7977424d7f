//! Graph and pipeline configuration.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use depgraph_worker::SerializerConfig;

use crate::error::{DepGraphError, Result};

/// Options controlling what the dependency graph retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub struct DependencyGraphConfig {
    /// Keep per-node access lists after their edges are recorded (default: true).
    ///
    /// Set to false to bound memory on long traces; edges and node stats are
    /// kept either way.
    pub save_node_accesses: bool,

    /// Synthesize root nodes for the initial-state commands (default: false).
    pub include_initial_commands: bool,

    /// Retain and expose the reverse dependency index (default: false).
    pub reverse_dependencies: bool,
}

impl Default for DependencyGraphConfig {
    fn default() -> Self {
        Self {
            save_node_accesses: true,
            include_initial_commands: false,
            reverse_dependencies: false,
        }
    }
}

impl DependencyGraphConfig {
    /// Parse a JSON object of options. Unrecognized options are rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DepGraphError::InvalidConfig(e.to_string()))
    }

    pub fn with_reverse_dependencies(mut self, enabled: bool) -> Self {
        self.reverse_dependencies = enabled;
        self
    }

    pub fn with_initial_commands(mut self, enabled: bool) -> Self {
        self.include_initial_commands = enabled;
        self
    }

    pub fn with_saved_accesses(mut self, enabled: bool) -> Self {
        self.save_node_accesses = enabled;
        self
    }
}

/// Where tracker and builder bookkeeping runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// On the caller's thread.
    Synchronous,
    /// On one dedicated serializer thread per tracker and per builder.
    Asynchronous,
}

/// Selects the execution mode and serializer sizing of a build session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub struct PipelineConfig {
    pub mode: ExecutionMode,
    /// Pending tasks per serializer before submission blocks.
    pub buffer_size: usize,
    /// Tasks per tracker handoff; 1 selects immediate handoff.
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Asynchronous,
            buffer_size: 1024,
            batch_size: 64,
        }
    }
}

impl PipelineConfig {
    pub fn synchronous() -> Self {
        Self {
            mode: ExecutionMode::Synchronous,
            ..Self::default()
        }
    }

    pub fn asynchronous(buffer_size: usize, batch_size: usize) -> Self {
        Self {
            mode: ExecutionMode::Asynchronous,
            buffer_size,
            batch_size,
        }
    }

    pub fn is_async(&self) -> bool {
        self.mode == ExecutionMode::Asynchronous
    }

    /// Serializer sizing for the access trackers.
    pub fn tracker_serializer(&self) -> SerializerConfig {
        SerializerConfig::batched(self.buffer_size, self.batch_size)
    }

    /// Serializer sizing for the graph builder, which always hands off
    /// immediately.
    pub fn builder_serializer(&self) -> SerializerConfig {
        SerializerConfig::immediate(self.buffer_size)
    }
}

/// Encoding of the interchange form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterchangeFormat {
    Json,
    JsonPretty,
}

impl FromStr for InterchangeFormat {
    type Err = DepGraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(InterchangeFormat::Json),
            "json-pretty" | "pretty" => Ok(InterchangeFormat::JsonPretty),
            _ => Err(DepGraphError::UnknownFormat(s.to_string())),
        }
    }
}
