//! CLI command implementations
//!
//! Every command indexes its inputs through a [`Session`] before doing its
//! own work, so the options shared by all of them live in [`SourceArgs`].

pub mod index;
pub mod query;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use cxgraph_config::{ConfigLoader, ConfigOverrides, CxGraphConfig};
use cxgraph_core::{
    canonical_path, collect_sources, CompileArgs, DiscoveryConfig, IndexSummary, Indexer,
    IndexerConfig, PreambleConfig, SourceJob, SourceLanguage, TreeSitterFrontend,
};
use tracing::debug;

use crate::progress;
use crate::GlobalOptions;

/// Inputs and compiler options shared by every command
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Files or directories to index
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// Add an include directory (repeatable)
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    pub include: Vec<PathBuf>,

    /// Define a macro, NAME or NAME=VALUE (repeatable)
    #[arg(short = 'D', long = "define", value_name = "DEF")]
    pub define: Vec<String>,

    /// Do not build or use precompiled preambles
    #[arg(long, env = "CXGRAPH_NO_PREAMBLE")]
    pub no_preamble: bool,

    /// Dump the cursor tree of files ending with NAME ("1" dumps all)
    #[arg(long, value_name = "NAME", env = "CXGRAPH_DUMP")]
    pub dump_tree: Option<String>,

    /// Worker threads (0 = one per CPU)
    #[arg(long, short = 'j', value_name = "N")]
    pub jobs: Option<usize>,
}

impl SourceArgs {
    /// Convert the command-line options to config overrides
    pub fn to_config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            parallelism: self.jobs,
            no_preamble: self.no_preamble,
            dump_tree: self.dump_tree.clone(),
            include_paths: self.include.clone(),
            defines: self.define.clone(),
            ..Default::default()
        }
    }
}

/// Load configuration (global → workspace or `--config` file → flags).
pub fn load_config(
    global: &GlobalOptions,
    sources: &SourceArgs,
    workspace: &Path,
) -> Result<CxGraphConfig> {
    let loader = ConfigLoader::new();
    let overrides = sources.to_config_overrides();

    if let Some(ref config_path) = global.config {
        return loader
            .load_with_file(config_path, Some(&overrides))
            .with_context(|| format!("Failed to load config file {}", config_path.display()));
    }

    loader
        .load(workspace, Some(&overrides))
        .context("Failed to load configuration")
}

/// Loaded configuration plus the directory relative paths resolve against.
pub struct Session {
    config: CxGraphConfig,
    workspace: PathBuf,
}

impl Session {
    pub fn new(config: CxGraphConfig, workspace: PathBuf) -> Self {
        Self { config, workspace }
    }

    /// Core indexer settings derived from the configuration.
    pub fn indexer_config(&self) -> Result<IndexerConfig> {
        let language: SourceLanguage = self
            .config
            .preamble
            .language
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        Ok(IndexerConfig {
            parallelism: self.config.analysis.parallelism,
            preamble: PreambleConfig {
                enabled: self.config.preamble.enabled,
                language,
                directory: self.config.preamble_dir(&self.workspace),
                build_after: self.config.preamble.build_after,
            },
            dump_tree: self.config.diagnostics.dump_tree.clone(),
        })
    }

    /// Compiler options for one file.
    pub fn compile_args(&self, file: &Path) -> CompileArgs {
        let mut args = CompileArgs::for_file(file);
        args.include_paths = self.config.include_paths(&self.workspace);
        args.defines = self.config.analysis.defines.clone();
        args.extra = self.config.analysis.extra_args.clone();
        args
    }

    /// Discover the sources under `paths` and pair them with their options.
    pub fn jobs(&self, paths: &[PathBuf]) -> Result<Vec<SourceJob>> {
        let discovery = DiscoveryConfig {
            exclude_patterns: self.config.analysis.exclude_patterns.clone(),
            ..Default::default()
        };
        let files = collect_sources(paths, &discovery).context("Failed to collect sources")?;
        Ok(files
            .into_iter()
            .map(|file| {
                let file = canonical_path(&file);
                let args = self.compile_args(&file);
                SourceJob::new(file, args)
            })
            .collect())
    }

    /// Index the sources named by `sources` with the tree-sitter frontend.
    pub fn index(
        &self,
        sources: &SourceArgs,
        quiet: bool,
    ) -> Result<(Indexer<TreeSitterFrontend>, IndexSummary)> {
        let jobs = self.jobs(&sources.paths)?;
        if jobs.is_empty() {
            anyhow::bail!("No C or C++ sources found");
        }
        debug!("Indexing {} files", jobs.len());

        let indexer = Indexer::new(TreeSitterFrontend::new(), self.indexer_config()?)
            .context("Failed to create indexer")?;

        let pb = progress::spinner(&format!("Indexing {} files...", jobs.len()), quiet);
        let summary = indexer.index_files(&jobs);
        let message = format!(
            "Indexed {} files ({} nodes)",
            summary.indexed(),
            summary.nodes_added()
        );
        if summary.failed() > 0 {
            let message = format!("{}, {} failed", message, summary.failed());
            progress::finish_spinner_warn(pb, &message);
        } else {
            progress::finish_spinner(pb, &message);
        }

        for (file, err) in summary.errors() {
            print_warning(&format!("{}: {}", file.display(), err));
        }

        Ok((indexer, summary))
    }
}

/// Print a warning message to stderr.
pub fn print_warning(message: &str) {
    eprintln!("warning: {}", message);
}
