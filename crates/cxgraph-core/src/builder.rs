//! Symbol Graph Builder
//!
//! Walks a reconstructed [`CursorTree`] and creates graph nodes for every
//! declaration it has not seen before. Use sites are not resolved here:
//! the declaration they name may appear later in the same file, so they are
//! collected into [`PendingReferences`] and handed to the
//! [`ReferenceResolver`](crate::resolver::ReferenceResolver) once the whole
//! file has been built.
//!
//! Macro expansions are the one exception. Their definitions are siblings at
//! unit level and already built by the time the expansion is reached, so a
//! matching expansion is attached immediately.

use indexmap::map::Entry;
use indexmap::IndexMap;
use petgraph::stable_graph::NodeIndex;
use tracing::debug;

use crate::cursor_tree::{CursorNodeId, CursorTree};
use crate::frontend::{CursorKind, TranslationUnit};
use crate::graph::{Category, GraphNode, SymbolGraph};
use crate::location::{Canonicalizer, Location};

// ============================================================================
// Pending references
// ============================================================================

/// Use sites awaiting resolution, keyed by their own location.
///
/// Insertion-ordered; the first cursor recorded for a location wins.
#[derive(Debug, Default, Clone)]
pub struct PendingReferences {
    entries: IndexMap<Location, CursorNodeId>,
}

impl PendingReferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `node` at `location` unless something is already recorded there.
    /// Returns `true` if the entry was added.
    pub fn insert(&mut self, location: Location, node: CursorNodeId) -> bool {
        match self.entries.entry(location) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(node);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, location: &Location) -> Option<CursorNodeId> {
        self.entries.get(location).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Location, CursorNodeId)> {
        self.entries.iter().map(|(loc, id)| (loc, *id))
    }
}

impl IntoIterator for PendingReferences {
    type Item = (Location, CursorNodeId);
    type IntoIter = indexmap::map::IntoIter<Location, CursorNodeId>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Counters for one build pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Declaration nodes created.
    pub declarations: usize,
    /// Macro expansions attached directly to their definition.
    pub macro_references: usize,
    /// Declarations skipped because their location was already indexed.
    pub duplicates: usize,
    /// Declarations placed under their semantic parent instead of the
    /// lexical one.
    pub reparented: usize,
}

// ============================================================================
// Builder
// ============================================================================

/// Build pass over one file's cursor tree.
pub struct SymbolGraphBuilder<'a, U: TranslationUnit> {
    unit: &'a U,
    tree: &'a CursorTree<U::Cursor>,
    graph: &'a mut SymbolGraph,
    canon: &'a mut Canonicalizer,
    pending: PendingReferences,
    stats: BuildStats,
}

impl<'a, U: TranslationUnit> SymbolGraphBuilder<'a, U> {
    pub fn new(
        unit: &'a U,
        tree: &'a CursorTree<U::Cursor>,
        graph: &'a mut SymbolGraph,
        canon: &'a mut Canonicalizer,
    ) -> Self {
        Self {
            unit,
            tree,
            graph,
            canon,
            pending: PendingReferences::new(),
            stats: BuildStats::default(),
        }
    }

    /// Build from the tree root under the graph root.
    pub fn build(mut self) -> (PendingReferences, BuildStats) {
        let root = self.graph.root();
        self.visit(root, self.tree.root());
        debug!(
            "Built {} declarations, {} pending references ({} duplicates)",
            self.stats.declarations,
            self.pending.len(),
            self.stats.duplicates
        );
        (self.pending, self.stats)
    }

    fn visit(&mut self, graph_parent: NodeIndex, id: CursorNodeId) {
        let tree = self.tree;
        let node = tree.node(id);
        let cursor = node.cursor;

        if node.kind == CursorKind::MacroExpansion {
            if let Some(location) = &node.location {
                if self.graph.contains_location(location) {
                    return;
                }
                if self.attach_macro_expansion(id, location.clone()) {
                    return;
                }
            }
        }

        let category = Category::from_cursor(node.kind, self.unit.is_definition(cursor));

        if category == Category::Reference {
            if let Some(location) = &node.location {
                if !self.graph.contains_location(location) {
                    self.pending.insert(location.clone(), id);
                }
            }
            return;
        }

        let mut parent = graph_parent;
        if category != Category::Invalid && node.parent.is_some() {
            if let Some(location) = &node.location {
                if self.graph.contains_location(location) {
                    self.stats.duplicates += 1;
                    return;
                }
                let owner = self.semantic_owner(id).unwrap_or(graph_parent);
                if owner != graph_parent {
                    self.stats.reparented += 1;
                }
                let created = GraphNode::new(
                    category,
                    node.kind,
                    self.unit.spelling(cursor),
                    self.unit.display_name(cursor),
                    location.clone(),
                );
                match self.graph.insert(owner, created) {
                    Ok(idx) => {
                        self.stats.declarations += 1;
                        parent = idx;
                    }
                    Err(dup) => {
                        self.stats.duplicates += 1;
                        debug!("{}", dup);
                        return;
                    }
                }
            }
        }

        for &child in tree.children(id) {
            self.visit(parent, child);
        }
    }

    /// Attach a macro expansion under a sibling macro definition with the
    /// same name. Returns `false` when no such sibling is indexed.
    fn attach_macro_expansion(&mut self, id: CursorNodeId, location: Location) -> bool {
        let tree = self.tree;
        let cursor = tree.node(id).cursor;
        let Some(parent) = tree.parent(id) else {
            return false;
        };
        let name = self.unit.spelling(cursor);

        let definition = tree.children(parent).iter().find_map(|&sibling| {
            let node = tree.node(sibling);
            if node.kind != CursorKind::MacroDefinition
                || self.unit.spelling(node.cursor) != name
            {
                return None;
            }
            node.location
                .as_ref()
                .and_then(|loc| self.graph.node_at(loc))
        });
        let Some(definition) = definition else {
            return false;
        };

        let reference = GraphNode::new(
            Category::Reference,
            CursorKind::MacroExpansion,
            name,
            self.unit.display_name(cursor),
            location,
        );
        match self.graph.insert(definition, reference) {
            Ok(_) => self.stats.macro_references += 1,
            Err(dup) => debug!("{}", dup),
        }
        true
    }

    /// Graph node of the cursor's semantic parent, when that differs from
    /// its lexical parent in the tree and is already indexed.
    fn semantic_owner(&mut self, id: CursorNodeId) -> Option<NodeIndex> {
        let tree = self.tree;
        let node = tree.node(id);
        let semantic = self.unit.semantic_parent(node.cursor)?;
        let lexical = tree.node(node.parent?);

        let semantic_kind = self.unit.kind(semantic);
        let semantic_location = self.canon.location(&self.unit.position(semantic));
        if semantic_kind == lexical.kind && semantic_location == lexical.location {
            return None;
        }
        self.graph.node_at(semantic_location.as_ref()?)
    }
}
