//! depgraph: build a dependency graph from a recorded command trace
//!
//! Reads JSON-lines trace events (see `trace_depgraph::replay`), replays them
//! through the access trackers and writes the graph's interchange form.
//!
//! ## Example Usage
//!
//! ```bash
//! # Build with the default asynchronous pipeline, print compact JSON
//! depgraph --input trace.jsonl
//!
//! # Synchronous build with reverse edges, pretty output to a file
//! depgraph --input trace.jsonl --sync --reverse --format json-pretty --output graph.json
//!
//! # Read from stdin, larger tracker batches, debug logging
//! cat trace.jsonl | depgraph --input - --batch-size 256 -vv
//! ```

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use trace_depgraph::{
    build_graph, parse_events, DependencyGraphConfig, InterchangeFormat, PipelineConfig,
};

#[derive(Parser)]
#[command(
    name = "depgraph",
    author,
    version,
    about = "Build a dependency graph from a recorded command trace"
)]
struct Cli {
    /// Trace events, one JSON object per line ("-" reads stdin)
    #[arg(long, short)]
    input: PathBuf,

    /// Write the graph here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Output format: json or json-pretty
    #[arg(long, default_value = "json")]
    format: String,

    /// Graph options as a JSON file; the flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run trackers and builder on the calling thread
    #[arg(long)]
    sync: bool,

    /// Pending tasks per serializer before submission blocks
    #[arg(long, default_value_t = 1024)]
    buffer_size: usize,

    /// Tasks per tracker handoff (1 hands off every task immediately)
    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    /// Build the reverse dependency index and include it in the output
    #[arg(long)]
    reverse: bool,

    /// Drop per-node access lists once their edges are recorded
    #[arg(long)]
    discard_accesses: bool,

    /// Give initial-state commands their own root nodes
    #[arg(long)]
    initial_commands: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(long, short, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn graph_config(&self) -> Result<DependencyGraphConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                DependencyGraphConfig::from_json(&json)
                    .with_context(|| format!("invalid graph options in {}", path.display()))?
            }
            None => DependencyGraphConfig::default(),
        };
        if self.reverse {
            config.reverse_dependencies = true;
        }
        if self.discard_accesses {
            config.save_node_accesses = false;
        }
        if self.initial_commands {
            config.include_initial_commands = true;
        }
        Ok(config)
    }

    fn pipeline(&self) -> PipelineConfig {
        if self.sync {
            PipelineConfig::synchronous()
        } else {
            PipelineConfig::asynchronous(self.buffer_size, self.batch_size)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let format: InterchangeFormat = cli.format.parse()?;
    let config = cli.graph_config()?;

    let reader: Box<dyn Read> = if cli.input.as_os_str() == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(
            File::open(&cli.input)
                .with_context(|| format!("failed to open {}", cli.input.display()))?,
        )
    };
    let events = parse_events(BufReader::new(reader))?;

    let graph = build_graph(events, config, cli.pipeline())?;
    let encoded = trace_depgraph::depgraph_core::interchange::encode(&graph, format)?;

    match &cli.output {
        Some(path) => std::fs::write(path, encoded.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(encoded.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}
