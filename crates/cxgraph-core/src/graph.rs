//! Symbol Graph
//!
//! The persistent, cross-referenced result of indexing. Every node sits at a
//! unique [`Location`]; declarations own their members through `Contains`
//! edges and every use site is a `Reference` node owned by the declaration
//! it names, so "find references" is a child listing and "go to definition"
//! is a parent lookup.
//!
//! Nodes are never removed one by one. The graph only grows while files are
//! indexed and is torn down as a whole with [`SymbolGraph::clear`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use thiserror::Error;

use crate::frontend::CursorKind;
use crate::location::canonical_path;
use crate::location::Location;

// ============================================================================
// Categories
// ============================================================================

/// Classification of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Root,
    Namespace,
    Class,
    Struct,
    Union,
    Enum,
    Enumerator,
    Function,
    MethodDeclaration,
    MethodDefinition,
    Field,
    Variable,
    Parameter,
    Typedef,
    ClassTemplate,
    FunctionTemplate,
    MacroDefinition,
    Reference,
    /// Cursors that never become nodes (statements, calls, the unit itself).
    Invalid,
}

impl Category {
    /// Category of a cursor. Forward declarations of records are references
    /// to the record's definition.
    pub fn from_cursor(kind: CursorKind, is_definition: bool) -> Self {
        match kind {
            CursorKind::Namespace => Category::Namespace,
            CursorKind::ClassDecl if is_definition => Category::Class,
            CursorKind::StructDecl if is_definition => Category::Struct,
            CursorKind::UnionDecl if is_definition => Category::Union,
            CursorKind::ClassTemplate if is_definition => Category::ClassTemplate,
            CursorKind::ClassDecl
            | CursorKind::StructDecl
            | CursorKind::UnionDecl
            | CursorKind::ClassTemplate => Category::Reference,
            CursorKind::EnumDecl => Category::Enum,
            CursorKind::EnumConstantDecl => Category::Enumerator,
            CursorKind::FunctionDecl => Category::Function,
            CursorKind::FunctionTemplate => Category::FunctionTemplate,
            CursorKind::CxxMethod | CursorKind::Constructor | CursorKind::Destructor => {
                if is_definition {
                    Category::MethodDefinition
                } else {
                    Category::MethodDeclaration
                }
            }
            CursorKind::FieldDecl => Category::Field,
            CursorKind::VarDecl => Category::Variable,
            CursorKind::ParmDecl => Category::Parameter,
            CursorKind::TypedefDecl => Category::Typedef,
            CursorKind::MacroDefinition => Category::MacroDefinition,
            CursorKind::TypeRef
            | CursorKind::TemplateRef
            | CursorKind::NamespaceRef
            | CursorKind::MemberRef
            | CursorKind::DeclRefExpr
            | CursorKind::MemberRefExpr
            | CursorKind::MacroExpansion => Category::Reference,
            CursorKind::TranslationUnit
            | CursorKind::TemplateTypeParameter
            | CursorKind::NonTypeTemplateParameter
            | CursorKind::InclusionDirective
            | CursorKind::CallExpr
            | CursorKind::CompoundStmt
            | CursorKind::Unexposed => Category::Invalid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Root => "root",
            Category::Namespace => "namespace",
            Category::Class => "class",
            Category::Struct => "struct",
            Category::Union => "union",
            Category::Enum => "enum",
            Category::Enumerator => "enumerator",
            Category::Function => "function",
            Category::MethodDeclaration => "method_declaration",
            Category::MethodDefinition => "method_definition",
            Category::Field => "field",
            Category::Variable => "variable",
            Category::Parameter => "parameter",
            Category::Typedef => "typedef",
            Category::ClassTemplate => "class_template",
            Category::FunctionTemplate => "function_template",
            Category::MacroDefinition => "macro_definition",
            Category::Reference => "reference",
            Category::Invalid => "invalid",
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Category::Reference)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Nodes and Edges
// ============================================================================

/// Relationship between two graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// Parent owns child.
    Contains,
    /// Method definition to its in-class declaration. Non-owning.
    Declaration,
}

/// A declaration, definition or reference site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub category: Category,
    /// Cursor kind the node was created from.
    pub kind: CursorKind,
    pub name: String,
    pub display_name: String,
    /// `None` only for the root.
    pub location: Option<Location>,
}

impl GraphNode {
    pub fn new(
        category: Category,
        kind: CursorKind,
        name: impl Into<String>,
        display_name: impl Into<String>,
        location: Location,
    ) -> Self {
        Self {
            category,
            kind,
            name: name.into(),
            display_name: display_name.into(),
            location: Some(location),
        }
    }

    fn root() -> Self {
        Self {
            category: Category::Root,
            kind: CursorKind::TranslationUnit,
            name: String::new(),
            display_name: String::new(),
            location: None,
        }
    }
}

/// A node already occupies the location. Inserting is a no-op.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("a node already exists at {location}")]
pub struct DuplicateLocation {
    pub location: Location,
    pub existing: NodeIndex,
}

/// Counts per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub references: usize,
    pub by_category: BTreeMap<Category, usize>,
}

// ============================================================================
// SymbolGraph
// ============================================================================

/// Location-keyed symbol graph on top of petgraph's `StableGraph`.
#[derive(Debug, Clone)]
pub struct SymbolGraph {
    graph: StableGraph<GraphNode, EdgeKind, petgraph::Directed>,
    root: NodeIndex,
    by_location: HashMap<Location, NodeIndex>,
    by_name: HashMap<String, Vec<NodeIndex>>,
}

impl Default for SymbolGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolGraph {
    pub fn new() -> Self {
        let mut graph = StableGraph::new();
        let root = graph.add_node(GraphNode::root());
        Self {
            graph,
            root,
            by_location: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    /// The synthetic root every top-level declaration hangs off.
    pub fn root(&self) -> NodeIndex {
        self.root
    }

    // ------------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------------

    /// Add `node` as a child of `parent`.
    ///
    /// Fails with [`DuplicateLocation`] when a node already lives at the
    /// location; the graph is left untouched in that case. Nodes without a
    /// location are attached but not indexed.
    pub fn insert(
        &mut self,
        parent: NodeIndex,
        node: GraphNode,
    ) -> Result<NodeIndex, DuplicateLocation> {
        let location = node.location.clone();
        if let Some(location) = &location {
            if let Some(&existing) = self.by_location.get(location) {
                return Err(DuplicateLocation {
                    location: location.clone(),
                    existing,
                });
            }
        }

        let name = node.name.clone();
        let idx = self.graph.add_node(node);
        self.graph.add_edge(parent, idx, EdgeKind::Contains);
        if let Some(location) = location {
            self.by_location.insert(location, idx);
        }
        if !name.is_empty() {
            self.by_name.entry(name).or_default().push(idx);
        }
        Ok(idx)
    }

    /// Drop every node except the root.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    pub fn node(&self, idx: NodeIndex) -> Option<&GraphNode> {
        self.graph.node_weight(idx)
    }

    pub fn node_at(&self, location: &Location) -> Option<NodeIndex> {
        self.by_location.get(location).copied()
    }

    pub fn contains_location(&self, location: &Location) -> bool {
        self.by_location.contains_key(location)
    }

    /// Nodes (declarations and references) spelled `name`.
    pub fn find_by_name(&self, name: &str) -> Vec<NodeIndex> {
        self.by_name.get(name).cloned().unwrap_or_default()
    }

    /// Number of nodes, the root included.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &GraphNode)> {
        self.graph
            .node_indices()
            .filter_map(move |idx| self.graph.node_weight(idx).map(|n| (idx, n)))
    }

    // ------------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------------

    /// Owned children, ordered by location.
    pub fn children(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut children: Vec<NodeIndex> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|edge| *edge.weight() == EdgeKind::Contains)
            .map(|edge| edge.target())
            .collect();
        children.sort_by(|a, b| self.graph[*a].location.cmp(&self.graph[*b].location));
        children
    }

    pub fn parent(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .find(|edge| *edge.weight() == EdgeKind::Contains)
            .map(|edge| edge.source())
    }

    /// Reference sites naming `idx`.
    pub fn references_to(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.children(idx)
            .into_iter()
            .filter(|child| self.graph[*child].category.is_reference())
            .collect()
    }

    /// Declaration named by the reference `idx`.
    pub fn target_of(&self, idx: NodeIndex) -> Option<NodeIndex> {
        let node = self.node(idx)?;
        if !node.category.is_reference() {
            return None;
        }
        self.parent(idx)
    }

    /// Declarations and definitions located in `file`, ordered by location.
    pub fn outline(&self, file: &Path) -> Vec<NodeIndex> {
        let file = canonical_path(file);
        let mut nodes: Vec<(Location, NodeIndex)> = self
            .by_location
            .iter()
            .filter(|(loc, idx)| {
                loc.path() == file.as_path() && !self.graph[**idx].category.is_reference()
            })
            .map(|(loc, idx)| (loc.clone(), *idx))
            .collect();
        nodes.sort();
        nodes.into_iter().map(|(_, idx)| idx).collect()
    }

    // ------------------------------------------------------------------------
    // Method declaration links
    // ------------------------------------------------------------------------

    /// Existing declaration link of a method definition.
    pub fn linked_declaration(&self, def: NodeIndex) -> Option<NodeIndex> {
        self.graph
            .edges_directed(def, Direction::Outgoing)
            .find(|edge| *edge.weight() == EdgeKind::Declaration)
            .map(|edge| edge.target())
    }

    /// Declaration matching the method definition `def`, linking the two on
    /// first success.
    ///
    /// The declaration is the sibling method declaration with the same
    /// display name (the same name when display names are unavailable).
    pub fn method_declaration(&mut self, def: NodeIndex) -> Option<NodeIndex> {
        if let Some(existing) = self.linked_declaration(def) {
            return Some(existing);
        }
        let def_node = self.node(def)?;
        if def_node.category != Category::MethodDefinition {
            return None;
        }
        let parent = self.parent(def)?;

        let candidates: Vec<NodeIndex> = self
            .children(parent)
            .into_iter()
            .filter(|&c| {
                let n = &self.graph[c];
                n.category == Category::MethodDeclaration && n.name == def_node.name
            })
            .collect();
        let decl = candidates
            .iter()
            .copied()
            .find(|&c| self.graph[c].display_name == def_node.display_name)
            .or_else(|| (candidates.len() == 1).then(|| candidates[0]))?;

        self.graph.add_edge(def, decl, EdgeKind::Declaration);
        Some(decl)
    }

    // ------------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------------

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats::default();
        for node in self.graph.node_weights() {
            if node.category == Category::Root {
                continue;
            }
            stats.nodes += 1;
            if node.category.is_reference() {
                stats.references += 1;
            }
            *stats.by_category.entry(node.category).or_default() += 1;
        }
        stats
    }
}

// ============================================================================
// Shared handle
// ============================================================================

/// The graph shared between parse tasks and readers.
///
/// Parse tasks hold the write lock for the build and resolve passes of one
/// file, so readers only ever see whole files.
#[derive(Debug, Clone, Default)]
pub struct SharedGraph {
    inner: Arc<RwLock<SymbolGraph>>,
}

impl SharedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, SymbolGraph> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, SymbolGraph> {
        self.inner.write()
    }
}
