use anyhow::{Context, Result};
use clap::Parser;
use flowgraph::{
    api_source::BlockchainInfoSource,
    config::{Args, Config, LedgerKind},
    data_sources::{FrameLedger, LedgerSource},
    graph_utils::*,
    sqlite_source::SqliteLedger,
    summary::*,
    traversal::*,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn open_ledger(config: &Config) -> Result<Box<dyn LedgerSource>> {
    let ledger = &config.ledger;
    let source: Box<dyn LedgerSource> = match ledger.kind {
        LedgerKind::Sqlite => Box::new(
            SqliteLedger::open(&ledger.path)
                .with_context(|| format!("Failed to open database {}", ledger.path.display()))?,
        ),
        LedgerKind::Frames => Box::new(
            FrameLedger::from_csv_dir(&ledger.path)
                .with_context(|| format!("Failed to load frames from {}", ledger.path.display()))?,
        ),
        LedgerKind::Api => Box::new(
            BlockchainInfoSource::new(ledger.api_base.clone())
                .context("Failed to initialize API client")?,
        ),
    };
    Ok(source)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting flowgraph");
    let config = Config::load(Args::parse())?;
    info!("Target: {}", config.target);
    if config.options.max_depth == 0 {
        warn!("Max depth is 0, the traversal is unbounded. Consider --max-transactions.")
    }

    let ledger = open_ledger(&config)?;
    info!("Building transfer graph");
    let report = build_transfer_graph(ledger.as_ref(), &config.target, &config.options)?;
    let graph = &report.graph;

    info!("Graph built successfully");
    info!(
        "Graph has {} nodes and {} edges",
        graph.node_count(),
        graph.edge_count()
    );
    for (tx_hash, status) in report.visited.failed() {
        warn!("Transaction {} was skipped: {:?}", tx_hash, status);
    }

    let outputs = &config.outputs;
    save_graphml(graph, &outputs.graphml)?;
    if let Some(path) = &outputs.html {
        save_html(graph, path)?;
    }
    if let Some(path) = &outputs.dot {
        save_dot(graph, path)?;
    }

    if outputs.table {
        print!("{}", edge_table(graph));
    }
    if outputs.summary {
        let summary = TransferSummary::from_transfer_graph(graph).with_summary_table();
        print!("{}", summary);
    }
    if outputs.loops {
        let closed_loops = find_closed_loops(graph);
        info!("Found {} closed loops", closed_loops.len());
        for (i, closed_loop) in closed_loops.iter().enumerate() {
            let summary = TransferSummary::from_transfer_graph(closed_loop).with_summary_table();
            print!("Closed loop {}:\n{}", i + 1, summary);
        }
    }

    Ok(())
}
