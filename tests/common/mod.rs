#![allow(dead_code)]
//! Shared fixtures for the integration tests.
//!
//! - `scripted_trace`: a deterministic trace touching every tracker, with
//!   sub-commands, observations and forward handshakes
//! - `edges`: a graph's edge set as `(source, sink)` pairs
//! - `pipelines`: every execution mode worth comparing

use std::collections::BTreeSet;
use std::convert::Infallible;

use trace_depgraph::depgraph_core::{CmdRef, NamedCommand};
use trace_depgraph::depgraph_types::{Fragment, NodeId, Observation, PoolId, RefId};
use trace_depgraph::{DependencyGraph, PipelineConfig, TraceEvent};

pub fn field(name: &str) -> Fragment {
    Fragment::field("Image", name)
}

pub fn cmd(name: &str) -> CmdRef {
    NamedCommand::new(name).into_ref()
}

pub fn pipelines() -> Vec<(&'static str, PipelineConfig)> {
    vec![
        ("sync", PipelineConfig::synchronous()),
        ("immediate", PipelineConfig::asynchronous(64, 1)),
        ("batched", PipelineConfig::asynchronous(64, 8)),
        // Queue smaller than a command's notifications: producers block.
        ("tiny-queue", PipelineConfig::asynchronous(2, 2)),
    ]
}

/// Every edge of `graph` as `(source, sink)`: `sink` depends on `source`.
pub fn edges(graph: &DependencyGraph) -> BTreeSet<(NodeId, NodeId)> {
    let mut edges = BTreeSet::new();
    graph
        .for_each_dependency(|source, sink| {
            edges.insert((source, sink));
            Ok::<(), Infallible>(())
        })
        .unwrap_or_else(|never: Infallible| match never {});
    edges
}

pub fn scripted_trace(commands: u64) -> Vec<TraceEvent> {
    let mut events = vec![TraceEvent::InitialCmd {
        name: "vkCreateImage".into(),
    }];
    for i in 0..commands {
        events.push(TraceEvent::BeginCmd {
            cmd_id: i,
            name: format!("cmd{}", i),
        });

        let object = RefId(i % 5);
        events.push(match i % 3 {
            0 => TraceEvent::WriteFrag {
                owner: object,
                fragment: field("layout"),
                old: None,
                new: Some(RefId(100 + i)),
                track: true,
            },
            1 => TraceEvent::ReadFrag {
                owner: object,
                fragment: field("layout"),
                value: None,
                track: false,
            },
            _ => TraceEvent::WriteFrag {
                owner: object,
                fragment: Fragment::Complete,
                old: None,
                new: None,
                track: false,
            },
        });
        if i >= 3 {
            events.push(TraceEvent::ReadFrag {
                owner: RefId(100 + i - 3),
                fragment: Fragment::array_index(i % 2),
                value: None,
                track: false,
            });
        }

        let start = (i * 24) % 256;
        events.push(if i % 2 == 0 {
            TraceEvent::WriteMemory {
                pool: PoolId(0),
                start,
                end: start + 32,
            }
        } else {
            TraceEvent::ReadMemory {
                pool: PoolId(0),
                start: start / 2,
                end: start / 2 + 64,
            }
        });

        if i % 5 == 0 {
            events.push(TraceEvent::BeginSubCmd { path: vec![0] });
            events.push(TraceEvent::WriteObservations {
                observations: vec![Observation::new(PoolId(1), i * 8, 16)],
            });
            events.push(TraceEvent::BeginSubCmd { path: vec![0, 1] });
            events.push(TraceEvent::ReadMemory {
                pool: PoolId(1),
                start: 0,
                end: 1024,
            });
            events.push(TraceEvent::EndSubCmd);
            events.push(TraceEvent::EndSubCmd);
        }

        match i % 4 {
            0 => events.push(TraceEvent::OpenForward { id: i.into() }),
            3 if (i / 4) % 2 == 0 => events.push(TraceEvent::CloseForward { id: (i - 3).into() }),
            3 => events.push(TraceEvent::DropForward { id: (i - 3).into() }),
            _ => {}
        }

        events.push(TraceEvent::EndCmd);
    }
    events
}
