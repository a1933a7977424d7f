//! Dependency graph construction over traced command streams.
//!
//! This crate provides:
//! - Access trackers: [`FragmentWatcher`] (object fragments), [`MemoryWatcher`]
//!   (byte ranges of memory pools) and [`ForwardWatcher`] (open/close
//!   handshakes), each turning read/write notifications into resolved edges
//! - Asynchronous wrappers running any tracker or builder on its own task
//!   serializer ([`AsyncTracker`])
//! - [`DependencyGraphBuilder`] and the [`DependencyGraph`] it produces
//! - [`BuildSession`], which drives all of the above from one notification
//!   stream
//! - The JSON interchange form ([`interchange`])

pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod forward;
pub mod fragment;
pub mod graph;
pub mod interchange;
pub mod interval;
pub mod memory;
pub mod pipeline;
pub mod session;

mod brackets;

pub use builder::{DependencyGraphBuilder, GraphBuilder};
pub use config::{DependencyGraphConfig, ExecutionMode, InterchangeFormat, PipelineConfig};
pub use context::{CmdContext, CmdRef, Command, NamedCommand};
pub use error::{DepGraphError, ErrorKind, Result};
pub use forward::{ForwardAccesses, ForwardTracker, ForwardWatcher};
pub use fragment::{FragmentAccesses, FragmentTracker, FragmentWatcher, RefFrag};
pub use graph::{DependencyGraph, NodeAccesses, NodeStats, ReverseIndexState};
pub use interchange::GraphMessage;
pub use interval::IntervalMap;
pub use memory::{MemoryAccesses, MemoryTracker, MemoryWatcher};
pub use pipeline::{
    AsyncForwardWatcher, AsyncFragmentWatcher, AsyncGraphBuilder, AsyncMemoryWatcher,
    AsyncTracker,
};
pub use session::BuildSession;
