//! Source Discovery
//!
//! Finds the C and C++ files to index under a set of input paths. Directories
//! are walked with `ignore::WalkBuilder`, so `.gitignore` and
//! `.cxgraphignore` files are honored; explicit files are taken as given.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use thiserror::Error;
use tracing::{debug, info};

use crate::compile_args::SourceLanguage;

/// Errors during source discovery
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Input path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("Invalid exclude pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Configuration for source discovery
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Glob patterns (relative to the walked directory) to skip
    pub exclude_patterns: Vec<String>,
    /// Also return headers, not just files compiled on their own
    pub include_headers: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: vec![
                "**/.git/**".to_string(),
                "**/build/**".to_string(),
                "**/target/**".to_string(),
                "**/.cxgraph/**".to_string(),
            ],
            include_headers: false,
        }
    }
}

/// Collect source files from `inputs`, sorted and deduplicated.
pub fn collect_sources(
    inputs: &[PathBuf],
    config: &DiscoveryConfig,
) -> Result<Vec<PathBuf>, DiscoveryError> {
    let glob_set = build_exclude_glob_set(&config.exclude_patterns)?;
    let mut files = Vec::new();

    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
        } else if input.is_dir() {
            walk_directory(input, config, &glob_set, &mut files);
        } else {
            return Err(DiscoveryError::NotFound(input.clone()));
        }
    }

    files.sort();
    files.dedup();
    info!("Discovered {} source files", files.len());
    Ok(files)
}

fn walk_directory(
    directory: &Path,
    config: &DiscoveryConfig,
    glob_set: &globset::GlobSet,
    files: &mut Vec<PathBuf>,
) {
    let walker = WalkBuilder::new(directory)
        .follow_links(false)
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .add_custom_ignore_filename(".cxgraphignore")
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Error walking directory: {}", e);
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let path = entry.path();
        if !is_candidate(path, config.include_headers) {
            continue;
        }

        let rel_path = path
            .strip_prefix(directory)
            .unwrap_or(path)
            .to_string_lossy();
        if glob_set.is_match(rel_path.as_ref()) {
            continue;
        }

        files.push(path.to_path_buf());
    }
}

fn is_candidate(path: &Path, include_headers: bool) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_lowercase();
    if include_headers {
        SourceLanguage::from_extension(&ext).is_some()
    } else {
        SourceLanguage::source_extensions().contains(&ext.as_str())
    }
}

fn build_exclude_glob_set(patterns: &[String]) -> Result<globset::GlobSet, DiscoveryError> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::Glob::new(pattern).map_err(|e| DiscoveryError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| DiscoveryError::InvalidPattern {
        pattern: patterns.join(", "),
        message: e.to_string(),
    })
}
