//! Common test utilities for integration tests.
//!
//! Provides a temporary source tree with canonical paths, shorthands for
//! building scripted units, and graph invariant checks shared across the
//! integration test files.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use cxgraph_core::{
    canonical_path, ArenaUnit, BuildStats, Canonicalizer, CompileArgs, CursorData, CursorId,
    CursorKind, CursorTree, Frontend, Indexer, IndexerConfig, Location, PreambleConfig,
    ReferenceResolver, ResolveStats, SourceJob, SourceLanguage, SourcePosition, SymbolGraph,
    SymbolGraphBuilder,
};
use tempfile::TempDir;

// ============================================================================
// Source tree fixture
// ============================================================================

/// A temporary directory whose paths are already canonical, so locations
/// computed by the indexer compare equal to the ones built in tests.
pub struct Fixture {
    _dir: TempDir,
    root: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let root = canonical_path(dir.path());
        Self { _dir: dir, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Write `content` to `name` (creating parent directories).
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn at(&self, name: &str, line: u32, column: u32) -> SourcePosition {
        SourcePosition::new(self.path(name), line, column)
    }

    pub fn loc(&self, name: &str, line: u32, column: u32) -> Location {
        Location::new(self.path(name), line, column)
    }

    pub fn job(&self, name: &str) -> SourceJob {
        let path = self.path(name);
        let args = CompileArgs::for_file(&path);
        SourceJob::new(path, args)
    }

    /// Preamble settings writing artifacts under the fixture.
    pub fn preamble(&self, language: SourceLanguage, build_after: usize) -> PreambleConfig {
        PreambleConfig {
            enabled: true,
            language,
            directory: self.path("pch"),
            build_after,
        }
    }

    pub fn indexer<F: Frontend>(&self, frontend: F, preamble: PreambleConfig) -> Indexer<F> {
        let config = IndexerConfig {
            parallelism: 4,
            preamble,
            dump_tree: None,
        };
        Indexer::new(frontend, config).expect("Failed to create indexer")
    }
}

// ============================================================================
// Scripted units
// ============================================================================

/// Shorthand for a cursor that is not a definition.
pub fn cursor(kind: CursorKind, name: &str, position: SourcePosition) -> CursorData {
    CursorData::new(kind, name, position)
}

/// Shorthand for a defining cursor.
pub fn defining(kind: CursorKind, name: &str, position: SourcePosition) -> CursorData {
    CursorData::new(kind, name, position).with_definition(true)
}

/// A detached copy of `id` with the same kind and position but a different
/// handle, as a frontend with unreliable cursor equality would report it.
pub fn twin(unit: &mut ArenaUnit, id: CursorId) -> CursorId {
    let original = unit.get(id);
    let copy = CursorData::new(
        original.kind,
        original.spelling.clone(),
        original.position.clone(),
    );
    unit.push_detached(copy)
}

/// Run the build and resolve passes for `unit` directly on `graph`.
pub fn index_unit(unit: &ArenaUnit, graph: &mut SymbolGraph) -> (BuildStats, ResolveStats) {
    let mut canon = Canonicalizer::new();
    let tree = CursorTree::reconstruct(unit, &mut canon).expect("Failed to rebuild tree");
    let (pending, build) = SymbolGraphBuilder::new(unit, &tree, graph, &mut canon).build();
    let resolve = ReferenceResolver::new(unit, &tree, graph, &mut canon).resolve_pending(pending);
    (build, resolve)
}

// ============================================================================
// Graph invariants
// ============================================================================

/// Every location is held by exactly one node and the location index agrees.
pub fn assert_unique_locations(graph: &SymbolGraph) {
    let mut seen = HashSet::new();
    for (idx, node) in graph.iter() {
        let Some(location) = &node.location else {
            continue;
        };
        assert!(
            seen.insert(location.clone()),
            "two nodes at {}",
            location
        );
        assert_eq!(
            graph.node_at(location),
            Some(idx),
            "location index disagrees for {}",
            location
        );
    }
}

/// Declaration targeted by the reference stored at `location`.
pub fn target_at(graph: &SymbolGraph, location: &Location) -> Option<Location> {
    let reference = graph.node_at(location)?;
    let target = graph.target_of(reference)?;
    graph.node(target)?.location.clone()
}
