//! Precompiled-Preamble Coordinator
//!
//! Files compiled with identical options mostly include the same headers.
//! The coordinator collects those headers per option set and, once enough
//! parses have contributed, builds one preamble artifact that later parses
//! of the same option set reuse.
//!
//! Thread-safe via interior mutability: the entry table sits behind a
//! `parking_lot::Mutex` held only for lookup and insertion, and each entry
//! guards its own header bookkeeping. A build runs at most once per entry;
//! callers that arrive while it runs wait on that entry only and then see
//! the same outcome.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexSet;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compile_args::SourceLanguage;
use crate::frontend::{FrontendError, PreambleInputs};

/// Extension of preamble artifacts.
const PREAMBLE_EXTENSION: &str = "pch";

/// Default number of contributing parses before a build is attempted.
pub const DEFAULT_BUILD_AFTER: usize = 2;

/// Preamble settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreambleConfig {
    /// Globally enables the subsystem.
    pub enabled: bool,
    /// Only files of this language use preambles.
    pub language: SourceLanguage,
    /// Where artifacts are written.
    pub directory: PathBuf,
    /// Successful parses that must contribute headers before a build.
    pub build_after: usize,
}

impl Default for PreambleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: SourceLanguage::Cxx,
            directory: std::env::temp_dir().join("cxgraph-preambles"),
            build_after: DEFAULT_BUILD_AFTER,
        }
    }
}

impl PreambleConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Failed preamble build. Shared by every caller of the same entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreambleError {
    #[error("no headers collected for preamble {0}")]
    NoHeaders(PathBuf),

    #[error("preamble build failed for {path}: {message}")]
    BuildFailed { path: PathBuf, message: String },
}

// ============================================================================
// Entry
// ============================================================================

#[derive(Debug, Default)]
struct HeaderState {
    direct: IndexSet<PathBuf>,
    all: IndexSet<PathBuf>,
    contributions: usize,
}

/// Preamble bookkeeping for one option set.
#[derive(Debug)]
pub struct PreambleEntry {
    options: Vec<String>,
    path: PathBuf,
    headers: Mutex<HeaderState>,
    outcome: OnceCell<Result<PathBuf, PreambleError>>,
}

impl PreambleEntry {
    fn new(options: Vec<String>, path: PathBuf) -> Self {
        Self {
            options,
            path,
            headers: Mutex::new(HeaderState::default()),
            outcome: OnceCell::new(),
        }
    }

    /// Option set this entry belongs to.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Artifact location, whether built or not.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the headers of one successful parse.
    ///
    /// Ignored once a build has started. Returns the number of contributing
    /// parses so far.
    pub fn add<D, A>(&self, direct: D, all: A) -> usize
    where
        D: IntoIterator<Item = PathBuf>,
        A: IntoIterator<Item = PathBuf>,
    {
        let mut state = self.headers.lock();
        if self.outcome.get().is_some() {
            return state.contributions;
        }
        state.direct.extend(direct);
        state.all.extend(all);
        state.contributions += 1;
        state.contributions
    }

    pub fn contributions(&self) -> usize {
        self.headers.lock().contributions
    }

    /// Snapshot of the collected headers.
    pub fn inputs(&self) -> PreambleInputs {
        let state = self.headers.lock();
        PreambleInputs {
            direct: state.direct.iter().cloned().collect(),
            all: state.all.iter().cloned().collect(),
        }
    }

    /// True while headers are still being collected.
    pub fn is_collecting(&self) -> bool {
        self.outcome.get().is_none()
    }

    /// Finished build outcome, without waiting for one in progress.
    pub fn outcome(&self) -> Option<&Result<PathBuf, PreambleError>> {
        self.outcome.get()
    }

    /// Path of a successfully built artifact that still exists on disk.
    pub fn built_path(&self) -> Option<&Path> {
        match self.outcome.get() {
            Some(Ok(path)) if path.exists() => Some(path.as_path()),
            _ => None,
        }
    }

    /// Build the artifact with `build` unless that already happened.
    ///
    /// Concurrent callers block until the single build finishes and all
    /// observe its result.
    pub fn ensure_built<F>(&self, build: F) -> &Result<PathBuf, PreambleError>
    where
        F: FnOnce(&PreambleInputs, &[String], &Path) -> Result<(), FrontendError>,
    {
        self.outcome.get_or_init(|| {
            let inputs = self.inputs();
            if inputs.all.is_empty() && inputs.direct.is_empty() {
                debug!("Skipping preamble {}: no headers", self.path.display());
                return Err(PreambleError::NoHeaders(self.path.clone()));
            }
            info!(
                "Building preamble {} from {} headers ({} direct)",
                self.path.display(),
                inputs.all.len(),
                inputs.direct.len()
            );
            match build(&inputs, &self.options, &self.path) {
                Ok(()) => Ok(self.path.clone()),
                Err(e) => {
                    warn!("Preamble build failed: {}", e);
                    Err(PreambleError::BuildFailed {
                        path: self.path.clone(),
                        message: e.to_string(),
                    })
                }
            }
        })
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Per-option-set preamble registry.
#[derive(Debug)]
pub struct PreambleCoordinator {
    config: PreambleConfig,
    entries: Mutex<HashMap<Vec<String>, Arc<PreambleEntry>>>,
}

impl PreambleCoordinator {
    pub fn new(config: PreambleConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PreambleConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Whether files of `language` use preambles at all.
    pub fn applies_to(&self, language: SourceLanguage) -> bool {
        self.config.enabled && self.config.language == language
    }

    /// Entry for `options`, created on first request. `None` when disabled.
    pub fn get(&self, options: &[String]) -> Option<Arc<PreambleEntry>> {
        if !self.config.enabled {
            return None;
        }
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(options) {
            return Some(Arc::clone(entry));
        }
        let path = self.artifact_path(options);
        debug!("New preamble entry {}", path.display());
        let entry = Arc::new(PreambleEntry::new(options.to_vec(), path));
        entries.insert(options.to_vec(), Arc::clone(&entry));
        Some(entry)
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<Arc<PreambleEntry>> {
        self.entries.lock().values().cloned().collect()
    }

    /// Whether `entry` has collected enough parses to be built.
    pub fn ready_to_build(&self, entry: &PreambleEntry) -> bool {
        entry.is_collecting() && entry.contributions() >= self.config.build_after.max(1)
    }

    fn artifact_path(&self, options: &[String]) -> PathBuf {
        let mut hasher = Sha256::new();
        for option in options {
            hasher.update(option.as_bytes());
            hasher.update([0u8]);
        }
        let digest = format!("{:x}", hasher.finalize());
        self.config
            .directory
            .join(format!("{}.{}", &digest[..16], PREAMBLE_EXTENSION))
    }
}
