//! Index command - index sources and print a summary

use std::collections::BTreeMap;

use anyhow::Result;
use clap::Args;
use cxgraph_core::{GraphStats, IndexSummary};
use serde::Serialize;

use super::{Session, SourceArgs};
use crate::GlobalOptions;

/// Arguments for the index command
#[derive(Args, Debug)]
pub struct IndexArgs {
    #[command(flatten)]
    pub sources: SourceArgs,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Machine-readable summary of one run.
#[derive(Debug, Serialize)]
struct IndexReport {
    indexed: usize,
    up_to_date: usize,
    failed: usize,
    nodes_added: usize,
    nodes: usize,
    references: usize,
    by_category: BTreeMap<&'static str, usize>,
    errors: Vec<FailedFile>,
}

#[derive(Debug, Serialize)]
struct FailedFile {
    file: String,
    error: String,
}

impl IndexReport {
    fn new(summary: &IndexSummary, stats: &GraphStats) -> Self {
        Self {
            indexed: summary.indexed(),
            up_to_date: summary.up_to_date(),
            failed: summary.failed(),
            nodes_added: summary.nodes_added(),
            nodes: stats.nodes,
            references: stats.references,
            by_category: stats
                .by_category
                .iter()
                .map(|(category, count)| (category.as_str(), *count))
                .collect(),
            errors: summary
                .errors()
                .map(|(file, err)| FailedFile {
                    file: file.display().to_string(),
                    error: err.to_string(),
                })
                .collect(),
        }
    }
}

/// Execute the index command
pub fn execute(args: IndexArgs, session: &Session, global: &GlobalOptions) -> Result<()> {
    let (indexer, summary) = session.index(&args.sources, global.quiet || args.json)?;
    let stats = indexer.graph().read().stats();
    let report = IndexReport::new(&summary, &stats);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Index Summary");
    println!("=============");
    println!("Files indexed:    {}", report.indexed);
    println!("Files up to date: {}", report.up_to_date);
    println!("Files failed:     {}", report.failed);
    println!("Total nodes:      {}", report.nodes);
    println!("References:       {}", report.references);

    if !report.by_category.is_empty() {
        println!("\nNodes by category:");
        for (category, count) in &report.by_category {
            println!("  {}: {}", category, count);
        }
    }

    Ok(())
}
