//! Query commands - symbols, references and outlines over a fresh index

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use cxgraph_core::{canonical_path, Category, Location, NodeIndex, SymbolGraph};

use super::{Session, SourceArgs};
use crate::GlobalOptions;

/// Arguments for the symbols command
#[derive(Args, Debug)]
pub struct SymbolsArgs {
    #[command(flatten)]
    pub sources: SourceArgs,

    /// Symbol name (unqualified spelling)
    #[arg(long, short = 'n')]
    pub name: String,

    /// Include reference sites, not just declarations
    #[arg(long)]
    pub with_references: bool,
}

/// Arguments for the refs command
#[derive(Args, Debug)]
pub struct RefsArgs {
    #[command(flatten)]
    pub sources: SourceArgs,

    /// Position of a declaration or a use site, as FILE:LINE:COL
    #[arg(long, value_name = "FILE:LINE:COL")]
    pub at: Location,
}

/// Arguments for the outline command
#[derive(Args, Debug)]
pub struct OutlineArgs {
    #[command(flatten)]
    pub sources: SourceArgs,

    /// File whose declarations are listed
    #[arg(long, short = 'f')]
    pub file: PathBuf,
}

/// Execute the symbols command
pub fn execute_symbols(
    args: SymbolsArgs,
    session: &Session,
    global: &GlobalOptions,
) -> Result<()> {
    let (indexer, _) = session.index(&args.sources, global.quiet)?;
    let graph = indexer.graph().read();

    let mut matches: Vec<NodeIndex> = graph
        .find_by_name(&args.name)
        .into_iter()
        .filter(|&idx| {
            args.with_references
                || graph
                    .node(idx)
                    .is_some_and(|node| !node.category.is_reference())
        })
        .collect();
    matches.sort_by_key(|&idx| graph.node(idx).and_then(|node| node.location.clone()));

    if matches.is_empty() {
        anyhow::bail!("No symbol named '{}'", args.name);
    }
    for idx in matches {
        println!("{}", describe(&graph, idx));
    }
    Ok(())
}

/// Execute the refs command
pub fn execute_refs(args: RefsArgs, session: &Session, global: &GlobalOptions) -> Result<()> {
    let (indexer, _) = session.index(&args.sources, global.quiet)?;
    let graph = indexer.graph().read();

    let target = target_for(&graph, &args.at)?;
    println!("{}", describe(&graph, target));
    for location in references(&graph, target) {
        println!("  {}", location);
    }
    Ok(())
}

/// Execute the outline command
pub fn execute_outline(
    args: OutlineArgs,
    session: &Session,
    global: &GlobalOptions,
) -> Result<()> {
    let (indexer, _) = session.index(&args.sources, global.quiet)?;
    let graph = indexer.graph().read();

    let nodes = graph.outline(&args.file);
    if nodes.is_empty() {
        anyhow::bail!(
            "No declarations in {}",
            canonical_path(&args.file).display()
        );
    }
    for (depth, idx) in nested(&graph, &nodes) {
        println!("{}{}", "  ".repeat(depth), describe(&graph, idx));
    }
    Ok(())
}

/// The declaration a position names: the node there, or the target of the
/// reference there.
fn target_for(graph: &SymbolGraph, at: &Location) -> Result<NodeIndex> {
    let idx = graph
        .node_at(at)
        .with_context(|| format!("Nothing indexed at {}", at))?;
    let is_reference = graph
        .node(idx)
        .is_some_and(|node| node.category.is_reference());
    if !is_reference {
        return Ok(idx);
    }
    graph
        .target_of(idx)
        .with_context(|| format!("Reference at {} is unresolved", at))
}

/// Locations of every reference to `target`, sorted. A method definition
/// also collects the references bound to its in-class declaration.
fn references(graph: &SymbolGraph, target: NodeIndex) -> Vec<Location> {
    let mut targets = vec![target];
    if let Some(decl) = graph.linked_declaration(target) {
        targets.push(decl);
    }
    let mut locations: Vec<Location> = targets
        .into_iter()
        .flat_map(|t| graph.references_to(t))
        .filter_map(|r| graph.node(r).and_then(|node| node.location.clone()))
        .collect();
    locations.sort();
    locations.dedup();
    locations
}

/// Pair each outline node with its nesting depth among the other nodes of
/// the same outline.
fn nested(graph: &SymbolGraph, nodes: &[NodeIndex]) -> Vec<(usize, NodeIndex)> {
    let members: HashSet<NodeIndex> = nodes.iter().copied().collect();
    nodes
        .iter()
        .map(|&idx| {
            let mut depth = 0;
            let mut current = graph.parent(idx);
            while let Some(parent) = current {
                if members.contains(&parent) {
                    depth += 1;
                }
                current = graph.parent(parent);
            }
            (depth, idx)
        })
        .collect()
}

fn describe(graph: &SymbolGraph, idx: NodeIndex) -> String {
    let Some(node) = graph.node(idx) else {
        return String::from("?");
    };
    let location = node
        .location
        .as_ref()
        .map(|l| l.to_string())
        .unwrap_or_default();
    let name = if node.display_name.is_empty() {
        &node.name
    } else {
        &node.display_name
    };
    match node.category {
        Category::Reference => format!("{} ({}) {}", name, node.kind.as_str(), location),
        category => format!("{} {} {}", category, name, location),
    }
}
