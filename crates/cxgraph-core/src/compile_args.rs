//! Source languages and compiler options.
//!
//! The ordered option list produced by [`CompileArgs::options`] is what a
//! parse is invoked with, and it doubles as the preamble key: two files share
//! a preamble only when their option lists are identical.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

// ============================================================================
// Source Language
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceLanguage {
    C,
    #[serde(rename = "c++")]
    Cxx,
}

impl SourceLanguage {
    /// Name used with `-x`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLanguage::C => "c",
            SourceLanguage::Cxx => "c++",
        }
    }

    /// Compiler driver name shown in reconstructed command lines.
    pub fn compiler(&self) -> &'static str {
        match self {
            SourceLanguage::C => "clang",
            SourceLanguage::Cxx => "clang++",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        get_extension_map()
            .get(ext.to_lowercase().as_str())
            .copied()
    }

    /// Detect language from file path. Headers count as C.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn all_extensions() -> &'static [&'static str] {
        &["c", "h", "cpp", "cc", "cxx", "c++", "hpp", "hh", "hxx", "h++"]
    }

    /// Extensions of files that are compiled on their own.
    pub fn source_extensions() -> &'static [&'static str] {
        &["c", "cpp", "cc", "cxx", "c++"]
    }
}

impl fmt::Display for SourceLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "c" => Ok(SourceLanguage::C),
            "c++" | "cpp" | "cxx" => Ok(SourceLanguage::Cxx),
            other => Err(format!("unknown language '{}' (expected c or c++)", other)),
        }
    }
}

static EXTENSION_MAP: OnceLock<HashMap<&'static str, SourceLanguage>> = OnceLock::new();

fn get_extension_map() -> &'static HashMap<&'static str, SourceLanguage> {
    EXTENSION_MAP.get_or_init(|| {
        let mut map = HashMap::new();
        // C
        map.insert("c", SourceLanguage::C);
        map.insert("h", SourceLanguage::C);
        // C++
        for ext in ["cpp", "cc", "cxx", "c++", "hpp", "hh", "hxx", "h++"] {
            map.insert(ext, SourceLanguage::Cxx);
        }
        map
    })
}

// ============================================================================
// Compile Arguments
// ============================================================================

/// Compiler options for one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompileArgs {
    pub language: SourceLanguage,
    pub include_paths: Vec<PathBuf>,
    pub defines: Vec<String>,
    pub extra: Vec<String>,
}

impl CompileArgs {
    pub fn new(language: SourceLanguage) -> Self {
        Self {
            language,
            include_paths: Vec::new(),
            defines: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Options for `file`, with the language taken from its extension
    /// (C++ when unknown).
    pub fn for_file(file: &Path) -> Self {
        Self::new(SourceLanguage::from_path(file).unwrap_or(SourceLanguage::Cxx))
    }

    pub fn with_include_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_paths.push(dir.into());
        self
    }

    pub fn with_define(mut self, define: impl Into<String>) -> Self {
        self.defines.push(define.into());
        self
    }

    pub fn with_extra(mut self, arg: impl Into<String>) -> Self {
        self.extra.push(arg.into());
        self
    }

    /// Ordered option list passed to the frontend.
    pub fn options(&self) -> Vec<String> {
        let mut options = vec!["-x".to_string(), self.language.as_str().to_string()];
        options.extend(
            self.include_paths
                .iter()
                .map(|dir| format!("-I{}", dir.display())),
        );
        options.extend(self.defines.iter().map(|d| format!("-D{}", d)));
        options.extend(self.extra.iter().cloned());
        options
    }

    /// Human-readable invocation, logged when a parse fails.
    pub fn command_line(&self, options: &[String], file: &Path) -> String {
        let mut line = String::from(self.language.compiler());
        for option in options {
            line.push(' ');
            line.push_str(option);
        }
        line.push(' ');
        line.push_str(&file.display().to_string());
        line
    }
}
