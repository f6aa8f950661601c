//! cxgraph Core - cross-referenced symbol graphs for C and C++
//!
//! This crate provides the indexing pipeline:
//! - Canonical source locations that identify every symbol and use site
//! - Reconstruction of a parser's cursor tree from its child visitation
//! - A location-keyed symbol graph with declarations and references
//! - Deferred reference resolution with method declaration linking
//! - Precompiled-preamble coordination per compiler option set
//! - Parallel, per-file parse tasks over a shared graph
//!
//! The parser is a plug-in behind the [`Frontend`] trait; a tree-sitter
//! backed implementation is included.

pub mod builder;
pub mod compile_args;
pub mod cursor_tree;
pub mod discovery;
pub mod frontend;
pub mod graph;
pub mod location;
pub mod orchestrator;
pub mod preamble;
pub mod resolver;

// Re-exports for convenience
pub use builder::{BuildStats, PendingReferences, SymbolGraphBuilder};
pub use compile_args::{CompileArgs, SourceLanguage};
pub use cursor_tree::{CursorNode, CursorNodeId, CursorTree, TreeError};
pub use graph::{
    Category, DuplicateLocation, EdgeKind, GraphNode, GraphStats, SharedGraph, SymbolGraph,
};
pub use location::{canonical_path, Canonicalizer, Location, LocationParseError};
pub use petgraph::stable_graph::NodeIndex;
pub use resolver::{ReferenceResolver, ResolveStats};

// Frontend re-exports
pub use frontend::arena::{ArenaUnit, CursorData, CursorId};
pub use frontend::treesitter::TreeSitterFrontend;
#[cfg(any(test, feature = "test-support"))]
pub use frontend::scripted::{FailureMode, ParseCall, ScriptedFrontend};
pub use frontend::{
    ChildVisit, CursorKind, Frontend, FrontendError, Inclusion, PreambleInputs, SourcePosition,
    TranslationUnit, PREAMBLE_FLAG,
};

// Preamble re-exports
pub use preamble::{PreambleConfig, PreambleCoordinator, PreambleEntry, PreambleError};

// Orchestrator re-exports
pub use orchestrator::{
    Attempt, FileOutcome, FileReport, IndexError, IndexSummary, Indexer, IndexerConfig,
    ParseTask, SourceJob,
};

// Discovery re-exports
pub use discovery::{collect_sources, DiscoveryConfig, DiscoveryError};
