//! cxgraph Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.cxgraph/config.toml`
//! - Local config: `.cxgraph/config.toml` (in workspace)
//! - CLI and environment overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → overrides.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Languages accepted by `preamble.language`.
const PREAMBLE_LANGUAGES: &[&str] = &["c", "c++", "cpp", "cxx"];

/// Root configuration for cxgraph.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CxGraphConfig {
    /// Source discovery and compiler options
    pub analysis: AnalysisConfig,

    /// Precompiled preamble settings
    pub preamble: PreambleSettings,

    /// Debugging aids
    pub diagnostics: DiagnosticsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Analysis configuration.
///
/// # Example TOML
///
/// ```toml
/// [analysis]
/// parallelism = 8
/// include_paths = ["include", "/opt/sdk/include"]
/// defines = ["NDEBUG", "VERSION=3"]
/// extra_args = ["-std=c++17"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Parallelism level (0 = auto-detect)
    pub parallelism: usize,

    /// Directories passed as `-I`
    pub include_paths: Vec<PathBuf>,

    /// Macros passed as `-D`
    pub defines: Vec<String>,

    /// Glob patterns excluded from discovery
    pub exclude_patterns: Vec<String>,

    /// Options appended verbatim after includes and defines
    pub extra_args: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            include_paths: Vec::new(),
            defines: Vec::new(),
            exclude_patterns: vec![
                "**/.git/**".to_string(),
                "**/build/**".to_string(),
                "**/target/**".to_string(),
                "**/.cxgraph/**".to_string(),
            ],
            extra_args: Vec::new(),
        }
    }
}

/// Precompiled preamble settings.
///
/// # Example TOML
///
/// ```toml
/// [preamble]
/// enabled = true
/// language = "c++"
/// directory = ".cxgraph/preambles"
/// build_after = 2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreambleSettings {
    /// Build and use preambles at all
    pub enabled: bool,

    /// Only files of this language use preambles (`c` or `c++`)
    pub language: String,

    /// Artifact directory, relative paths resolve against the workspace
    pub directory: PathBuf,

    /// Successful parses that contribute headers before a build
    pub build_after: usize,
}

impl Default for PreambleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            language: "c++".to_string(),
            directory: PathBuf::from(".cxgraph/preambles"),
            build_after: 2,
        }
    }
}

/// Diagnostics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Dump the cursor tree of files ending with this name (`"1"` = all)
    pub dump_tree: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// CLI overrides for configuration values.
///
/// Used to apply command-line arguments and environment variables over
/// file-based config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level
    pub log_level: Option<String>,

    /// Override parallelism
    pub parallelism: Option<usize>,

    /// Disable preambles
    pub no_preamble: bool,

    /// Override the tree dump selector
    pub dump_tree: Option<String>,

    /// Extra include directories (appended)
    pub include_paths: Vec<PathBuf>,

    /// Extra macro definitions (appended)
    pub defines: Vec<String>,
}

impl CxGraphConfig {
    /// Apply CLI overrides to this configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }

        if let Some(parallelism) = overrides.parallelism {
            self.analysis.parallelism = parallelism;
        }

        if overrides.no_preamble {
            self.preamble.enabled = false;
        }

        if let Some(ref dump) = overrides.dump_tree {
            self.diagnostics.dump_tree = Some(dump.clone());
        }

        extend_unique(&mut self.analysis.include_paths, &overrides.include_paths);
        extend_unique(&mut self.analysis.defines, &overrides.defines);
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let language = self.preamble.language.to_lowercase();
        if !PREAMBLE_LANGUAGES.contains(&language.as_str()) {
            return Err(ConfigError::invalid_value(
                "preamble.language",
                format!("unknown language '{}' (expected c or c++)", self.preamble.language),
            ));
        }
        if self.preamble.build_after == 0 {
            return Err(ConfigError::invalid_value(
                "preamble.build_after",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Get the effective preamble directory for a workspace.
    pub fn preamble_dir(&self, workspace_root: &Path) -> PathBuf {
        if self.preamble.directory.is_absolute() {
            self.preamble.directory.clone()
        } else {
            workspace_root.join(&self.preamble.directory)
        }
    }

    /// Include paths with relative entries resolved against the workspace.
    pub fn include_paths(&self, workspace_root: &Path) -> Vec<PathBuf> {
        self.analysis
            .include_paths
            .iter()
            .map(|dir| {
                if dir.is_absolute() {
                    dir.clone()
                } else {
                    workspace_root.join(dir)
                }
            })
            .collect()
    }
}

/// Append the entries of `extra` not already in `target`, keeping order.
pub(crate) fn extend_unique<T: PartialEq + Clone>(target: &mut Vec<T>, extra: &[T]) {
    for item in extra {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}
