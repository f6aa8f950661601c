//! Parse Task Orchestrator
//!
//! One [`ParseTask`] per file: parse (with a preamble when one is ready,
//! without otherwise), rebuild the cursor tree, then build and resolve the
//! file's part of the graph while holding the graph's write lock. The
//! [`Indexer`] runs tasks on a rayon pool and keeps a registry of what was
//! indexed with which options, so unchanged files are not parsed again.
//!
//! ## Usage
//!
//! ```ignore
//! use cxgraph_core::{CompileArgs, Indexer, IndexerConfig, SourceJob, TreeSitterFrontend};
//!
//! let indexer = Indexer::new(TreeSitterFrontend::new(), IndexerConfig::default())?;
//! let path = Path::new("src/main.cpp");
//! let summary = indexer.index_files(&[SourceJob::new(path, CompileArgs::for_file(path))]);
//! println!("{} nodes", indexer.graph().read().node_count());
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::builder::{BuildStats, SymbolGraphBuilder};
use crate::compile_args::CompileArgs;
use crate::cursor_tree::{CursorTree, TreeError};
use crate::frontend::{Frontend, TranslationUnit, PREAMBLE_FLAG};
use crate::graph::SharedGraph;
use crate::location::{canonical_path, Canonicalizer};
use crate::preamble::{PreambleConfig, PreambleCoordinator, PreambleEntry, PreambleError};
use crate::resolver::{ReferenceResolver, ResolveStats};

// ============================================================================
// Errors
// ============================================================================

/// Reasons a file could not be indexed. All of them are file-scoped.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Structural inconsistency in {file}: {source}")]
    StructuralInconsistency {
        file: PathBuf,
        #[source]
        source: TreeError,
    },

    #[error("Failed to parse {file}: {command_line}")]
    ParseFailure { file: PathBuf, command_line: String },

    #[error("File changed during indexing: {0}")]
    ChangedDuringIndex(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create worker pool: {0}")]
    ThreadPool(String),
}

impl IndexError {
    /// Races are transient; everything else means the file is broken.
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexError::ChangedDuringIndex(_))
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the indexer.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Worker threads (0 = one per CPU)
    pub parallelism: usize,
    /// Preamble settings
    pub preamble: PreambleConfig,
    /// Dump the reconstructed cursor tree of files whose path ends with this
    /// value (`"1"` dumps every file)
    pub dump_tree: Option<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            preamble: PreambleConfig::default(),
            dump_tree: None,
        }
    }
}

impl IndexerConfig {
    fn wants_dump(&self, file: &Path) -> bool {
        match self.dump_tree.as_deref() {
            None | Some("") => false,
            Some("1") => true,
            Some(name) => file.to_string_lossy().ends_with(name),
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// Parse strategy, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attempt {
    WithPreamble,
    WithoutPreamble,
}

impl Attempt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Attempt::WithPreamble => "with preamble",
            Attempt::WithoutPreamble => "without preamble",
        }
    }
}

/// Result of a successfully indexed file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub file: PathBuf,
    pub attempt: Attempt,
    /// Graph nodes this file added.
    pub nodes_added: usize,
    pub build: BuildStats,
    pub resolve: ResolveStats,
    /// Every header the file pulled in.
    pub dependencies: Vec<PathBuf>,
    /// Modification time observed before parsing.
    pub modified: Option<SystemTime>,
    pub duration: Duration,
}

/// Indexes one file into the shared graph.
pub struct ParseTask<'a, F: Frontend> {
    pub frontend: &'a F,
    pub graph: &'a SharedGraph,
    pub preambles: &'a PreambleCoordinator,
    pub file: PathBuf,
    pub args: CompileArgs,
    pub dump_tree: bool,
}

impl<'a, F: Frontend> ParseTask<'a, F> {
    pub fn run(&self) -> Result<FileReport, IndexError> {
        let started = Instant::now();
        let options = self.args.options();
        let entry = if self.preambles.applies_to(self.args.language) {
            self.preambles.get(&options)
        } else {
            None
        };

        for attempt in [Attempt::WithPreamble, Attempt::WithoutPreamble] {
            let mut argv = options.clone();
            if attempt == Attempt::WithPreamble {
                let Some(preamble) = entry.as_ref().and_then(|e| e.built_path()) else {
                    continue;
                };
                argv.push(PREAMBLE_FLAG.to_string());
                argv.push(preamble.display().to_string());
            }

            let modified = self.modified()?;
            let parse_started = Instant::now();
            let unit = match self.frontend.parse(&self.file, &argv) {
                Ok(unit) => unit,
                Err(e) => {
                    warn!(
                        "Parse failed {}: {} ({})",
                        attempt.as_str(),
                        self.args.command_line(&argv, &self.file),
                        e
                    );
                    continue;
                }
            };
            if self.modified()? != modified {
                warn!("{} changed while it was parsed", self.file.display());
                return Err(IndexError::ChangedDuringIndex(self.file.clone()));
            }
            debug!(
                "Parsed {} {} in {:?}",
                self.file.display(),
                attempt.as_str(),
                parse_started.elapsed()
            );

            let dependencies = self.record_inclusions(&unit, entry.as_deref());
            let mut report = self.index_unit(&unit, attempt)?;
            report.dependencies = dependencies;
            report.modified = modified;
            report.duration = started.elapsed();
            return Ok(report);
        }

        Err(IndexError::ParseFailure {
            file: self.file.clone(),
            command_line: self.args.command_line(&options, &self.file),
        })
    }

    fn modified(&self) -> Result<Option<SystemTime>, IndexError> {
        let metadata = std::fs::metadata(&self.file).map_err(|source| IndexError::Io {
            path: self.file.clone(),
            source,
        })?;
        Ok(metadata.modified().ok())
    }

    /// Feed the unit's headers to a collecting preamble entry and build it
    /// once enough parses have contributed. Returns every header.
    fn record_inclusions(&self, unit: &F::Unit, entry: Option<&PreambleEntry>) -> Vec<PathBuf> {
        let inclusions = unit.inclusions();
        let all: Vec<PathBuf> = inclusions.iter().map(|i| i.path.clone()).collect();

        if let Some(entry) = entry.filter(|e| e.is_collecting()) {
            let direct = inclusions
                .iter()
                .filter(|i| i.depth == 1)
                .map(|i| i.path.clone());
            entry.add(direct, all.iter().cloned());
            if self.preambles.ready_to_build(entry) {
                let outcome = entry.ensure_built(|inputs, args, output| {
                    self.frontend.build_preamble(inputs, args, output)
                });
                if let Err(PreambleError::BuildFailed { message, .. }) = outcome {
                    debug!("Continuing without preamble: {}", message);
                }
            }
        }
        all
    }

    fn index_unit(&self, unit: &F::Unit, attempt: Attempt) -> Result<FileReport, IndexError> {
        let mut canon = Canonicalizer::new();
        let tree = CursorTree::reconstruct(unit, &mut canon).map_err(|source| {
            IndexError::StructuralInconsistency {
                file: self.file.clone(),
                source,
            }
        })?;
        if self.dump_tree {
            info!("Cursor tree for {}:\n{}", self.file.display(), tree.dump(unit));
        }

        let mut graph = self.graph.write();
        let before = graph.node_count();
        let (pending, build) =
            SymbolGraphBuilder::new(unit, &tree, &mut *graph, &mut canon).build();
        let resolve =
            ReferenceResolver::new(unit, &tree, &mut *graph, &mut canon).resolve_pending(pending);
        let total = graph.node_count();
        drop(graph);

        let nodes_added = total - before;
        info!(
            "Indexed {}: {} nodes added ({} total)",
            self.file.display(),
            nodes_added,
            total
        );
        Ok(FileReport {
            file: self.file.clone(),
            attempt,
            nodes_added,
            build,
            resolve,
            dependencies: Vec::new(),
            modified: None,
            duration: Duration::ZERO,
        })
    }
}

// ============================================================================
// Indexer
// ============================================================================

/// One file to index with its options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceJob {
    pub file: PathBuf,
    pub args: CompileArgs,
}

impl SourceJob {
    pub fn new(file: impl Into<PathBuf>, args: CompileArgs) -> Self {
        Self {
            file: file.into(),
            args,
        }
    }
}

/// What happened to one file.
#[derive(Debug)]
pub enum FileOutcome {
    Indexed(FileReport),
    /// Same modification time and options as the last successful index.
    UpToDate,
    Failed(IndexError),
}

/// Outcome of indexing a batch of files.
#[derive(Debug, Default)]
pub struct IndexSummary {
    pub outcomes: Vec<(PathBuf, FileOutcome)>,
}

impl IndexSummary {
    pub fn indexed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Indexed(_)))
    }

    pub fn up_to_date(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::UpToDate))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed(_)))
    }

    pub fn nodes_added(&self) -> usize {
        self.outcomes
            .iter()
            .map(|(_, o)| match o {
                FileOutcome::Indexed(report) => report.nodes_added,
                _ => 0,
            })
            .sum()
    }

    pub fn outcome(&self, file: &Path) -> Option<&FileOutcome> {
        self.outcomes
            .iter()
            .find(|(f, _)| f == file)
            .map(|(_, o)| o)
    }

    pub fn errors(&self) -> impl Iterator<Item = (&Path, &IndexError)> {
        self.outcomes.iter().filter_map(|(f, o)| match o {
            FileOutcome::Failed(e) => Some((f.as_path(), e)),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

#[derive(Debug, Clone)]
struct FileRecord {
    modified: Option<SystemTime>,
    options: Vec<String>,
    dependencies: Vec<PathBuf>,
}

/// Indexes files in parallel into one shared graph.
pub struct Indexer<F: Frontend> {
    frontend: F,
    graph: SharedGraph,
    preambles: PreambleCoordinator,
    pool: rayon::ThreadPool,
    registry: Mutex<HashMap<PathBuf, FileRecord>>,
    config: IndexerConfig,
}

impl<F: Frontend> Indexer<F> {
    pub fn new(frontend: F, config: IndexerConfig) -> Result<Self, IndexError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallelism)
            .thread_name(|i| format!("cxgraph-index-{}", i))
            .build()
            .map_err(|e| IndexError::ThreadPool(e.to_string()))?;
        info!(
            "Indexer ready: {} workers, preambles {}",
            pool.current_num_threads(),
            if config.preamble.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        Ok(Self {
            frontend,
            graph: SharedGraph::new(),
            preambles: PreambleCoordinator::new(config.preamble.clone()),
            pool,
            registry: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn frontend(&self) -> &F {
        &self.frontend
    }

    pub fn preambles(&self) -> &PreambleCoordinator {
        &self.preambles
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Index `jobs`, skipping files that are up to date.
    pub fn index_files(&self, jobs: &[SourceJob]) -> IndexSummary {
        self.run_jobs(jobs, false)
    }

    /// Index `jobs` even if they are up to date.
    pub fn reindex_files(&self, jobs: &[SourceJob]) -> IndexSummary {
        self.run_jobs(jobs, true)
    }

    /// Index a single file on the calling thread.
    pub fn index_file(&self, job: &SourceJob) -> FileOutcome {
        self.run_job(job, false)
    }

    /// Build every preamble that has collected headers but was not built yet.
    pub fn build_preambles(&self) -> Vec<(PathBuf, Result<PathBuf, PreambleError>)> {
        self.preambles
            .entries()
            .into_iter()
            .filter(|entry| entry.is_collecting() && entry.contributions() > 0)
            .map(|entry| {
                let outcome = entry
                    .ensure_built(|inputs, args, output| {
                        self.frontend.build_preamble(inputs, args, output)
                    })
                    .clone();
                (entry.path().to_path_buf(), outcome)
            })
            .collect()
    }

    /// Headers `file` pulled in when it was last indexed.
    pub fn dependencies(&self, file: &Path) -> Vec<PathBuf> {
        self.registry
            .lock()
            .get(&canonical_path(file))
            .map(|r| r.dependencies.clone())
            .unwrap_or_default()
    }

    /// Drop the graph and forget every indexed file.
    pub fn reset(&self) {
        self.graph.write().clear();
        self.registry.lock().clear();
    }

    fn run_jobs(&self, jobs: &[SourceJob], force: bool) -> IndexSummary {
        let started = Instant::now();
        let outcomes: Vec<(PathBuf, FileOutcome)> = self.pool.install(|| {
            jobs.par_iter()
                .map(|job| (job.file.clone(), self.run_job(job, force)))
                .collect()
        });
        let summary = IndexSummary { outcomes };
        info!(
            "Indexed {} files in {:?}: {} up to date, {} failed, {} nodes added",
            summary.indexed(),
            started.elapsed(),
            summary.up_to_date(),
            summary.failed(),
            summary.nodes_added()
        );
        summary
    }

    fn run_job(&self, job: &SourceJob, force: bool) -> FileOutcome {
        let key = canonical_path(&job.file);
        let options = job.args.options();

        if !force && self.is_up_to_date(&key, &job.file, &options) {
            debug!("{} is up to date", job.file.display());
            return FileOutcome::UpToDate;
        }

        let task = ParseTask {
            frontend: &self.frontend,
            graph: &self.graph,
            preambles: &self.preambles,
            file: job.file.clone(),
            args: job.args.clone(),
            dump_tree: self.config.wants_dump(&job.file),
        };
        match task.run() {
            Ok(report) => {
                self.registry.lock().insert(
                    key,
                    FileRecord {
                        modified: report.modified,
                        options,
                        dependencies: report.dependencies.clone(),
                    },
                );
                FileOutcome::Indexed(report)
            }
            Err(e) => {
                if !e.is_transient() {
                    warn!("Skipping {}: {}", job.file.display(), e);
                }
                FileOutcome::Failed(e)
            }
        }
    }

    fn is_up_to_date(&self, key: &Path, file: &Path, options: &[String]) -> bool {
        let registry = self.registry.lock();
        let Some(record) = registry.get(key) else {
            return false;
        };
        let modified = std::fs::metadata(file).and_then(|m| m.modified()).ok();
        record.modified.is_some() && record.modified == modified && record.options == options
    }
}
