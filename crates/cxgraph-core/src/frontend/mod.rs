//! Parser Boundary
//!
//! The indexer never talks to a C/C++ parser directly. Everything it needs
//! from one is expressed by two traits:
//!
//! - [`Frontend`] parses a file with a list of compiler options into a
//!   [`TranslationUnit`] and builds preamble artifacts.
//! - [`TranslationUnit`] exposes the parsed unit as cursors: a pre-order
//!   child visitor plus per-cursor queries (kind, spelling, position,
//!   semantic parent, referenced entity, definition).
//!
//! Two implementations ship with the crate: [`treesitter::TreeSitterFrontend`]
//! for real sources and, with the `test-support` feature,
//! `scripted::ScriptedFrontend` for hand-built units.

pub mod arena;
mod lower;
#[cfg(any(test, feature = "test-support"))]
pub mod scripted;
pub mod treesitter;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Option (followed by the artifact path) that hands a preamble to a parse.
pub const PREAMBLE_FLAG: &str = "-include-pch";

// ============================================================================
// Cursor kinds
// ============================================================================

/// Cursor kinds reported by a frontend.
///
/// Mirrors the subset of a C/C++ front end's cursor taxonomy the indexer
/// distinguishes; anything else is reported as [`CursorKind::Unexposed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CursorKind {
    TranslationUnit,
    Namespace,
    ClassDecl,
    StructDecl,
    UnionDecl,
    EnumDecl,
    EnumConstantDecl,
    FunctionDecl,
    CxxMethod,
    Constructor,
    Destructor,
    FieldDecl,
    VarDecl,
    ParmDecl,
    TypedefDecl,
    ClassTemplate,
    FunctionTemplate,
    TemplateTypeParameter,
    NonTypeTemplateParameter,
    MacroDefinition,
    MacroExpansion,
    InclusionDirective,
    TypeRef,
    TemplateRef,
    NamespaceRef,
    MemberRef,
    DeclRefExpr,
    MemberRefExpr,
    CallExpr,
    CompoundStmt,
    Unexposed,
}

impl CursorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorKind::TranslationUnit => "TranslationUnit",
            CursorKind::Namespace => "Namespace",
            CursorKind::ClassDecl => "ClassDecl",
            CursorKind::StructDecl => "StructDecl",
            CursorKind::UnionDecl => "UnionDecl",
            CursorKind::EnumDecl => "EnumDecl",
            CursorKind::EnumConstantDecl => "EnumConstantDecl",
            CursorKind::FunctionDecl => "FunctionDecl",
            CursorKind::CxxMethod => "CXXMethod",
            CursorKind::Constructor => "Constructor",
            CursorKind::Destructor => "Destructor",
            CursorKind::FieldDecl => "FieldDecl",
            CursorKind::VarDecl => "VarDecl",
            CursorKind::ParmDecl => "ParmDecl",
            CursorKind::TypedefDecl => "TypedefDecl",
            CursorKind::ClassTemplate => "ClassTemplate",
            CursorKind::FunctionTemplate => "FunctionTemplate",
            CursorKind::TemplateTypeParameter => "TemplateTypeParameter",
            CursorKind::NonTypeTemplateParameter => "NonTypeTemplateParameter",
            CursorKind::MacroDefinition => "MacroDefinition",
            CursorKind::MacroExpansion => "MacroExpansion",
            CursorKind::InclusionDirective => "InclusionDirective",
            CursorKind::TypeRef => "TypeRef",
            CursorKind::TemplateRef => "TemplateRef",
            CursorKind::NamespaceRef => "NamespaceRef",
            CursorKind::MemberRef => "MemberRef",
            CursorKind::DeclRefExpr => "DeclRefExpr",
            CursorKind::MemberRefExpr => "MemberRefExpr",
            CursorKind::CallExpr => "CallExpr",
            CursorKind::CompoundStmt => "CompoundStmt",
            CursorKind::Unexposed => "Unexposed",
        }
    }

    /// Class-like declarations, which are definitions only when they carry a body.
    pub fn is_record(&self) -> bool {
        matches!(
            self,
            CursorKind::ClassDecl
                | CursorKind::StructDecl
                | CursorKind::UnionDecl
                | CursorKind::ClassTemplate
        )
    }

    pub fn is_method(&self) -> bool {
        matches!(
            self,
            CursorKind::CxxMethod | CursorKind::Constructor | CursorKind::Destructor
        )
    }

    /// Cursors whose meaning is "this names an entity declared elsewhere".
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            CursorKind::TypeRef
                | CursorKind::TemplateRef
                | CursorKind::NamespaceRef
                | CursorKind::MemberRef
                | CursorKind::DeclRefExpr
                | CursorKind::MemberRefExpr
                | CursorKind::MacroExpansion
        )
    }
}

impl fmt::Display for CursorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visitor verdict for [`TranslationUnit::visit_children`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildVisit {
    /// Stop the whole traversal.
    Break,
    /// Skip this cursor's children and go on with its next sibling.
    Continue,
    /// Descend into this cursor's children.
    Recurse,
}

/// Raw position reported by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcePosition {
    /// `None` for cursors that do not originate from a file.
    pub file: Option<PathBuf>,
    /// 1-based; 0 means unknown.
    pub line: u32,
    /// 1-based byte column.
    pub column: u32,
}

impl SourcePosition {
    pub fn new(file: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        Self {
            file: Some(file.into()),
            line,
            column,
        }
    }

    /// A position that is not associated with any file.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn exists(&self) -> bool {
        self.file.is_some() && self.line > 0
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file.display(), self.line, self.column),
            None => f.write_str("<no file>"),
        }
    }
}

/// A header pulled into a unit. Depth 1 is a direct include of the main file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Inclusion {
    pub path: PathBuf,
    pub depth: usize,
}

/// Headers handed to [`Frontend::build_preamble`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreambleInputs {
    /// Headers included directly by some main file.
    pub direct: Vec<PathBuf>,
    /// Every header seen at any depth.
    pub all: Vec<PathBuf>,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors reported by a frontend.
#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("failed to parse {file}: {message}")]
    Parse { file: PathBuf, message: String },

    #[error("failed to build preamble {output}: {message}")]
    Preamble { output: PathBuf, message: String },

    #[error("unsupported source file: {0}")]
    Unsupported(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrontendError {
    pub fn parse(file: &Path, message: impl Into<String>) -> Self {
        FrontendError::Parse {
            file: file.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn preamble(output: &Path, message: impl Into<String>) -> Self {
        FrontendError::Preamble {
            output: output.to_path_buf(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// A parsed translation unit.
///
/// Dropping the unit releases it; cursors must not outlive it, which the
/// borrow on `&self` in every query enforces for callers holding the unit.
pub trait TranslationUnit {
    /// Opaque cursor handle. Handle equality is not meaningful to the indexer.
    type Cursor: Copy + fmt::Debug;

    /// The unit-level cursor.
    fn root(&self) -> Self::Cursor;

    /// Invoke `visitor(cursor, reported_parent)` over the descendants of
    /// `parent` in pre-order, honoring the returned [`ChildVisit`].
    fn visit_children(
        &self,
        parent: Self::Cursor,
        visitor: &mut dyn FnMut(Self::Cursor, Self::Cursor) -> ChildVisit,
    );

    /// Every header this unit pulled in, with inclusion depth.
    fn inclusions(&self) -> Vec<Inclusion>;

    fn kind(&self, cursor: Self::Cursor) -> CursorKind;
    fn spelling(&self, cursor: Self::Cursor) -> String;
    fn display_name(&self, cursor: Self::Cursor) -> String;
    fn position(&self, cursor: Self::Cursor) -> SourcePosition;
    fn is_definition(&self, cursor: Self::Cursor) -> bool;
    fn semantic_parent(&self, cursor: Self::Cursor) -> Option<Self::Cursor>;
    fn referenced(&self, cursor: Self::Cursor) -> Option<Self::Cursor>;
    fn definition(&self, cursor: Self::Cursor) -> Option<Self::Cursor>;
}

/// A C/C++ parser.
pub trait Frontend: Send + Sync {
    type Unit: TranslationUnit;

    /// Parse `file` with compiler options `args`.
    fn parse(&self, file: &Path, args: &[String]) -> Result<Self::Unit, FrontendError>;

    /// Build a preamble artifact for `inputs` at `output`.
    fn build_preamble(
        &self,
        inputs: &PreambleInputs,
        args: &[String],
        output: &Path,
    ) -> Result<(), FrontendError>;
}
