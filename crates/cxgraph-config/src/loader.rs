//! Layered settings loading.
//!
//! Settings come from up to three layers, later ones winning:
//! 1. User file: `~/.cxgraph/config.toml`
//! 2. Project file: `.cxgraph/config.toml` under the workspace, or a file
//!    named with `--config`
//! 3. Command-line flags
//!
//! The merged result is validated before it is returned.

use crate::error::ConfigError;
use crate::{
    extend_unique, AnalysisConfig, ConfigOverrides, CxGraphConfig, DiagnosticsConfig,
    LoggingConfig, PreambleSettings,
};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Directory holding cxgraph settings, both in the home and the workspace.
const SETTINGS_DIR: &str = ".cxgraph";

const SETTINGS_FILE: &str = "config.toml";

/// Reads and merges the settings layers.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// `~/.cxgraph`, if a home directory is known
    user_dir: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            user_dir: dirs::home_dir().map(|home| home.join(SETTINGS_DIR)),
        }
    }

    /// Loader reading user settings from `user_dir` instead of the home directory.
    pub fn with_global_dir(user_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_dir: Some(user_dir.into()),
        }
    }

    /// Path of the project settings file for `workspace_root`.
    pub fn local_config_path(workspace_root: &Path) -> PathBuf {
        workspace_root.join(SETTINGS_DIR).join(SETTINGS_FILE)
    }

    /// User, then workspace, then `overrides`. Missing files are skipped.
    pub fn load(
        &self,
        workspace_root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<CxGraphConfig, ConfigError> {
        let project = read_if_present(&Self::local_config_path(workspace_root))?;
        self.resolve(project, overrides)
    }

    /// Like [`load`](Self::load) with `config_file` in place of the workspace
    /// file. A missing `config_file` is an error.
    pub fn load_with_file(
        &self,
        config_file: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<CxGraphConfig, ConfigError> {
        debug!("Loading settings from {:?}", config_file);
        let project = read_settings(config_file)?;
        self.resolve(Some(project), overrides)
    }

    fn resolve(
        &self,
        project: Option<CxGraphConfig>,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<CxGraphConfig, ConfigError> {
        let user = match &self.user_dir {
            Some(dir) => read_if_present(&dir.join(SETTINGS_FILE))?,
            None => {
                debug!("No home directory, skipping user settings");
                None
            }
        };

        let mut config = [user, project]
            .into_iter()
            .flatten()
            .fold(CxGraphConfig::default(), merge_configs);
        if let Some(overrides) = overrides {
            config.apply_overrides(overrides);
        }
        config.validate()?;
        Ok(config)
    }
}

fn read_if_present(path: &Path) -> Result<Option<CxGraphConfig>, ConfigError> {
    if !path.exists() {
        trace!("No settings at {:?}", path);
        return Ok(None);
    }
    debug!("Loading settings from {:?}", path);
    read_settings(path).map(Some)
}

fn read_settings(path: &Path) -> Result<CxGraphConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

/// `overlay` when it differs from the default, else `base`.
fn pick<T: PartialEq>(base: T, overlay: T, default: &T) -> T {
    if overlay != *default {
        overlay
    } else {
        base
    }
}

/// Merge two layers, `overlay` on top. Scalar keys follow [`pick`], so a
/// partial file only changes what it mentions; list keys accumulate.
fn merge_configs(base: CxGraphConfig, overlay: CxGraphConfig) -> CxGraphConfig {
    CxGraphConfig {
        analysis: merge_analysis(base.analysis, overlay.analysis),
        preamble: merge_preamble(base.preamble, overlay.preamble),
        diagnostics: DiagnosticsConfig {
            dump_tree: overlay.diagnostics.dump_tree.or(base.diagnostics.dump_tree),
        },
        logging: LoggingConfig {
            level: pick(
                base.logging.level,
                overlay.logging.level,
                &LoggingConfig::default().level,
            ),
        },
    }
}

fn merge_analysis(base: AnalysisConfig, overlay: AnalysisConfig) -> AnalysisConfig {
    let mut merged = base;
    merged.parallelism = pick(merged.parallelism, overlay.parallelism, &0);
    extend_unique(&mut merged.include_paths, &overlay.include_paths);
    extend_unique(&mut merged.defines, &overlay.defines);
    extend_unique(&mut merged.exclude_patterns, &overlay.exclude_patterns);
    extend_unique(&mut merged.extra_args, &overlay.extra_args);
    merged
}

fn merge_preamble(base: PreambleSettings, overlay: PreambleSettings) -> PreambleSettings {
    let defaults = PreambleSettings::default();
    PreambleSettings {
        // Disabling anywhere sticks
        enabled: base.enabled && overlay.enabled,
        language: pick(base.language, overlay.language, &defaults.language),
        directory: pick(base.directory, overlay.directory, &defaults.directory),
        build_after: pick(base.build_after, overlay.build_after, &defaults.build_after),
    }
}
