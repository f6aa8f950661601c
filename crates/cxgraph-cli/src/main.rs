//! cxgraph CLI - cross-referenced symbol graphs for C and C++
//!
//! Indexes a source tree with the tree-sitter frontend and answers questions
//! about the resulting graph. The graph lives for one invocation, so every
//! query command indexes its inputs first.
//!
//! # Usage
//!
//! ```bash
//! # Index a tree and print statistics
//! cxgraph index src -I include -D NDEBUG
//!
//! # Find every node named `parse`
//! cxgraph symbols src --name parse
//!
//! # References to the symbol declared (or used) at a position
//! cxgraph refs src --at src/lexer.h:12:7
//!
//! # Declarations in one file, nested
//! cxgraph outline src --file src/lexer.cpp
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;
mod progress;

/// cxgraph - Cross-referenced symbol graphs for C and C++
#[derive(Parser, Debug)]
#[command(name = "cxgraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalOptions {
    /// Path to configuration file (replaces the workspace config)
    #[arg(long, short = 'c', global = true, env = "CXGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

impl GlobalOptions {
    /// Log filter directive; the flags win over the configured level.
    fn log_directive(&self, configured: &str) -> String {
        if self.quiet {
            "error".to_string()
        } else if self.verbose {
            "debug".to_string()
        } else {
            configured.to_string()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index sources and print a summary
    Index(commands::index::IndexArgs),

    /// Find symbols by name
    Symbols(commands::query::SymbolsArgs),

    /// List references to a symbol
    Refs(commands::query::RefsArgs),

    /// Show the declarations of one file
    Outline(commands::query::OutlineArgs),
}

impl Commands {
    fn sources(&self) -> &commands::SourceArgs {
        match self {
            Commands::Index(args) => &args.sources,
            Commands::Symbols(args) => &args.sources,
            Commands::Refs(args) => &args.sources,
            Commands::Outline(args) => &args.sources,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let workspace = std::env::current_dir().context("Failed to get current directory")?;
    let config = commands::load_config(&cli.global, cli.command.sources(), &workspace)?;

    let filter = EnvFilter::try_new(cli.global.log_directive(&config.logging.level))
        .with_context(|| format!("Invalid log level '{}'", config.logging.level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let session = commands::Session::new(config, workspace);
    match cli.command {
        Commands::Index(args) => commands::index::execute(args, &session, &cli.global),
        Commands::Symbols(args) => commands::query::execute_symbols(args, &session, &cli.global),
        Commands::Refs(args) => commands::query::execute_refs(args, &session, &cli.global),
        Commands::Outline(args) => commands::query::execute_outline(args, &session, &cli.global),
    }
}
