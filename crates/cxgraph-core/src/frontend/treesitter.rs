//! Tree-sitter frontend
//!
//! Parses C with `tree-sitter-c` and C++ with `tree-sitter-cpp`, then lowers
//! the syntax tree into an [`ArenaUnit`]. Understands the options produced by
//! [`CompileArgs`](crate::CompileArgs):
//!
//! - `-x c|c++` selects the grammar (the file extension decides otherwise)
//! - `-I<dir>` / `-I <dir>` adds an include directory
//! - `-include-pch <manifest>` names a preamble built by
//!   [`TreeSitterFrontend::build_preamble`]
//!
//! A preamble here is a JSON manifest listing the headers it covers. Building
//! one parses those headers into the frontend's header cache; parsing with
//! one verifies the manifest and warms the cache from it. Cached header trees
//! are reused as long as the file's modification time is unchanged. A parse
//! without a preamble reads every header afresh and leaves the cache alone.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use tree_sitter::{Language, Parser, Tree};

use super::arena::ArenaUnit;
use super::lower;
use super::{Frontend, FrontendError, PreambleInputs, TranslationUnit, PREAMBLE_FLAG};
use crate::compile_args::SourceLanguage;
use crate::location::canonical_path;

/// A parsed file and the text its tree points into.
pub struct ParsedSource {
    pub path: PathBuf,
    pub text: String,
    pub tree: Tree,
    pub modified: Option<SystemTime>,
}

impl std::fmt::Debug for ParsedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedSource")
            .field("path", &self.path)
            .field("bytes", &self.text.len())
            .field("modified", &self.modified)
            .finish()
    }
}

/// Contents of a preamble artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PreambleManifest {
    language: SourceLanguage,
    options: Vec<String>,
    headers: Vec<PathBuf>,
}

/// Options this frontend acts on. Everything else is ignored.
#[derive(Debug, Default, PartialEq, Eq)]
struct ParseOptions {
    language: Option<SourceLanguage>,
    include_dirs: Vec<PathBuf>,
    preamble: Option<PathBuf>,
}

impl ParseOptions {
    fn from_args(args: &[String]) -> Self {
        let mut options = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-x" => options.language = iter.next().and_then(|v| v.parse().ok()),
                "-I" => {
                    if let Some(dir) = iter.next() {
                        options.include_dirs.push(PathBuf::from(dir));
                    }
                }
                PREAMBLE_FLAG => options.preamble = iter.next().map(PathBuf::from),
                other => {
                    if let Some(dir) = other.strip_prefix("-I") {
                        options.include_dirs.push(PathBuf::from(dir));
                    }
                }
            }
        }
        options
    }
}

fn tree_sitter_language(language: SourceLanguage) -> Language {
    match language {
        SourceLanguage::C => tree_sitter_c::LANGUAGE.into(),
        SourceLanguage::Cxx => tree_sitter_cpp::LANGUAGE.into(),
    }
}

fn parse_source(path: &Path, language: SourceLanguage) -> Result<ParsedSource, FrontendError> {
    let text = fs::read_to_string(path)?;
    // Positions are 32-bit; a smaller file keeps every line and column in range.
    if u32::try_from(text.len()).is_err() {
        return Err(FrontendError::parse(path, "file too large to index"));
    }
    let modified = fs::metadata(path)?.modified().ok();

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_language(language))
        .map_err(|e| FrontendError::parse(path, e.to_string()))?;
    let tree = parser
        .parse(&text, None)
        .ok_or_else(|| FrontendError::parse(path, "tree-sitter produced no tree"))?;
    if tree.root_node().has_error() {
        debug!("{} has syntax errors, indexing what parsed", path.display());
    }

    Ok(ParsedSource {
        path: path.to_path_buf(),
        text,
        tree,
        modified,
    })
}

/// Frontend backed by tree-sitter grammars.
#[derive(Default)]
pub struct TreeSitterFrontend {
    headers: DashMap<(PathBuf, SourceLanguage), Arc<ParsedSource>>,
}

impl TreeSitterFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of header trees currently cached.
    pub fn cached_headers(&self) -> usize {
        self.headers.len()
    }

    /// Parsed header, from the cache while its modification time holds.
    fn header(
        &self,
        path: &Path,
        language: SourceLanguage,
    ) -> Result<Arc<ParsedSource>, FrontendError> {
        let key = (path.to_path_buf(), language);
        let modified = fs::metadata(path)?.modified().ok();
        if let Some(cached) = self.headers.get(&key) {
            if modified.is_some() && cached.modified == modified {
                return Ok(Arc::clone(cached.value()));
            }
        }
        let parsed = Arc::new(parse_source(path, language)?);
        self.headers.insert(key, Arc::clone(&parsed));
        Ok(parsed)
    }

    /// Verify a preamble manifest and warm the header cache from it.
    fn load_preamble(&self, path: &Path, language: SourceLanguage) -> Result<usize, FrontendError> {
        let bytes = fs::read(path).map_err(|e| FrontendError::preamble(path, e.to_string()))?;
        let manifest: PreambleManifest = serde_json::from_slice(&bytes)
            .map_err(|e| FrontendError::preamble(path, e.to_string()))?;
        if manifest.language != language {
            return Err(FrontendError::preamble(
                path,
                format!("built for {}, not {}", manifest.language, language),
            ));
        }
        let warmed = manifest
            .headers
            .iter()
            .filter(|header| self.header(header, language).is_ok())
            .count();
        Ok(warmed)
    }
}

impl Frontend for TreeSitterFrontend {
    type Unit = ArenaUnit;

    fn parse(&self, file: &Path, args: &[String]) -> Result<ArenaUnit, FrontendError> {
        let options = ParseOptions::from_args(args);
        let language = options
            .language
            .or_else(|| SourceLanguage::from_path(file))
            .ok_or_else(|| FrontendError::Unsupported(file.to_path_buf()))?;

        if let Some(preamble) = &options.preamble {
            let warmed = self.load_preamble(preamble, language)?;
            debug!("Preamble {} covers {} headers", preamble.display(), warmed);
        }

        // Header trees are only shared through a preamble.
        let shared = options.preamble.is_some();
        let main = parse_source(&canonical_path(file), language)?;
        let load = |path: &Path| {
            if shared {
                self.header(path, language)
            } else {
                parse_source(path, language).map(Arc::new)
            }
        };
        let unit = lower::lower(&main, &options.include_dirs, &load);
        debug!(
            "Lowered {} into {} cursors ({} headers)",
            file.display(),
            unit.len(),
            unit.inclusions().len()
        );
        Ok(unit)
    }

    fn build_preamble(
        &self,
        inputs: &PreambleInputs,
        args: &[String],
        output: &Path,
    ) -> Result<(), FrontendError> {
        let language = ParseOptions::from_args(args)
            .language
            .unwrap_or(SourceLanguage::Cxx);

        let mut headers = Vec::new();
        for header in &inputs.all {
            match self.header(header, language) {
                Ok(_) => headers.push(header.clone()),
                Err(e) => warn!("Leaving {} out of preamble: {}", header.display(), e),
            }
        }
        if headers.is_empty() {
            return Err(FrontendError::preamble(
                output,
                "none of the collected headers could be parsed",
            ));
        }

        let manifest = PreambleManifest {
            language,
            options: args.to_vec(),
            headers,
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| FrontendError::preamble(output, e.to_string()))?;
        if let Some(dir) = output.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(output, json)?;
        Ok(())
    }
}
