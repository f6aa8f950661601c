//! Location Identity
//!
//! A `Location` is the canonical identity of a source position: an absolute,
//! symlink-resolved path plus a 1-based line and column. Locations are the
//! primary key of the symbol graph, so two cursors that name the same entity
//! through different spellings of the same file must map to the same value.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::frontend::SourcePosition;

// ============================================================================
// Location
// ============================================================================

/// Canonical `(path, line, column)` triple.
///
/// Ordering is lexicographic over path, then line, then column, which keeps
/// sibling lists and dumps stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    path: Arc<Path>,
    line: u32,
    column: u32,
}

impl Location {
    /// Build a location from an already canonical path.
    pub fn new(path: impl Into<Arc<Path>>, line: u32, column: u32) -> Self {
        Self {
            path: path.into(),
            line,
            column,
        }
    }

    /// Canonicalize `path` and build a location from it.
    ///
    /// Total: files that cannot be resolved by the file system are normalized
    /// lexically against the current directory instead.
    pub fn canonicalize(path: &Path, line: u32, column: u32) -> Self {
        Self::new(canonical_path(path), line, column)
    }

    /// Location of a parser position, or `None` when it does not exist
    /// (no file, or line 0).
    pub fn from_position(position: &SourcePosition) -> Option<Self> {
        let file = position.file.as_deref()?;
        if position.line == 0 {
            return None;
        }
        Some(Self::canonicalize(file, position.line, position.column))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    /// True if this location lies in `file` (compared canonically).
    pub fn is_in(&self, file: &Path) -> bool {
        *self.path == *canonical_path(file)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path.display(), self.line, self.column)
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Error parsing a `path:line:column` string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocationParseError {
    #[error("expected <path>:<line>:<column>, got '{0}'")]
    Malformed(String),

    #[error("invalid line or column in '{0}'")]
    InvalidNumber(String),
}

impl FromStr for Location {
    type Err = LocationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, ':');
        let (column, line, path) = match (parts.next(), parts.next(), parts.next()) {
            (Some(c), Some(l), Some(p)) if !p.is_empty() => (c, l, p),
            _ => return Err(LocationParseError::Malformed(s.to_string())),
        };
        let line: u32 = line
            .parse()
            .map_err(|_| LocationParseError::InvalidNumber(s.to_string()))?;
        let column: u32 = column
            .parse()
            .map_err(|_| LocationParseError::InvalidNumber(s.to_string()))?;
        Ok(Self::canonicalize(Path::new(path), line, column))
    }
}

// ============================================================================
// Path canonicalization
// ============================================================================

/// Resolve `path` to its canonical absolute form.
///
/// Uses the file system when the path exists and falls back to lexical
/// normalization (`.` and `..` removed, made absolute) otherwise.
pub fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    normalize_lexically(&absolute)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Memoizing canonicalizer for the cursors of one translation unit.
///
/// Units mention the same handful of files thousands of times; the memo only
/// saves file-system round trips and never changes the resulting location.
#[derive(Debug, Default)]
pub struct Canonicalizer {
    paths: HashMap<PathBuf, Arc<Path>>,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn location(&mut self, position: &SourcePosition) -> Option<Location> {
        let file = position.file.as_ref()?;
        if position.line == 0 {
            return None;
        }
        let path = self
            .paths
            .entry(file.clone())
            .or_insert_with(|| Arc::from(canonical_path(file)))
            .clone();
        Some(Location::new(path, position.line, position.column))
    }
}
