//! Reference Resolver
//!
//! Second pass over a file: attaches every pending use site to the graph
//! node of the declaration it names. Runs after the build pass, so a use
//! that precedes its declaration in the file still resolves.
//!
//! Besides the pending set, each resolved site sweeps its own scratch
//! children. Nested reference sites (a type reference inside a template
//! reference, say) are never queued by the build pass because it does not
//! descend into reference subtrees; the sweep is what attaches them.

use tracing::{debug, warn};

use crate::builder::PendingReferences;
use crate::cursor_tree::{CursorNodeId, CursorTree};
use crate::frontend::{CursorKind, TranslationUnit};
use crate::graph::{Category, GraphNode, SymbolGraph};
use crate::location::{Canonicalizer, Location};

/// Counters for one resolve pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Reference nodes created.
    pub created: usize,
    /// Sites whose location was already indexed when reached.
    pub already_present: usize,
    /// Sites for which the frontend could not name a referenced cursor.
    pub unresolved: usize,
    /// Identifier expressions whose target kind is not tracked.
    pub filtered: usize,
    /// Targets that are not in the graph (system headers and the like).
    pub missing_target: usize,
    /// References moved from a method definition to its declaration.
    pub redirected: usize,
}

/// Resolve pass over one file's cursor tree.
pub struct ReferenceResolver<'a, U: TranslationUnit> {
    unit: &'a U,
    tree: &'a CursorTree<U::Cursor>,
    graph: &'a mut SymbolGraph,
    canon: &'a mut Canonicalizer,
    stats: ResolveStats,
}

impl<'a, U: TranslationUnit> ReferenceResolver<'a, U> {
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
            stats: ResolveStats::default(),
        }
    }

    /// Resolve every pending entry in insertion order.
    pub fn resolve_pending(mut self, pending: PendingReferences) -> ResolveStats {
        for (location, node) in pending {
            self.resolve(node, Some(&location));
        }
        debug!(
            "Resolved {} references ({} unresolved, {} missing targets, {} filtered)",
            self.stats.created,
            self.stats.unresolved,
            self.stats.missing_target,
            self.stats.filtered
        );
        self.stats
    }

    /// Resolve the site `id` stored under `key`, then sweep its children.
    pub fn resolve(&mut self, id: CursorNodeId, key: Option<&Location>) {
        let tree = self.tree;
        let node = tree.node(id);
        let cursor = node.cursor;

        if let Some(key) = key {
            if let Some(existing) = self.graph.node_at(key) {
                self.stats.already_present += 1;
                if let Some(n) = self.graph.node(existing) {
                    warn!(
                        "Reference {} '{}' at {} already indexed as {} '{}'",
                        node.kind,
                        self.unit.spelling(cursor),
                        key,
                        n.category,
                        n.name
                    );
                }
                return;
            }
        }

        let category = Category::from_cursor(node.kind, self.unit.is_definition(cursor));
        if let (Some(key), false) = (key, category == Category::Invalid) {
            if !self.attach(id, key) {
                return;
            }
        }

        for &child in tree.children(id) {
            let location = tree.node(child).location.clone();
            self.resolve(child, location.as_ref());
        }
    }

    /// Steps three to eight: find the target and create the reference node.
    /// Returns `false` when the site was dropped.
    fn attach(&mut self, id: CursorNodeId, key: &Location) -> bool {
        let tree = self.tree;
        let node = tree.node(id);
        let cursor = node.cursor;
        let kind = node.kind;

        let mut referenced = self.unit.referenced(cursor);
        if matches!(kind, CursorKind::ClassDecl | CursorKind::StructDecl) {
            let self_referential = match referenced {
                None => true,
                Some(r) => {
                    self.unit.kind(r) == kind
                        && self.canon.location(&self.unit.position(r)).as_ref() == Some(key)
                }
            };
            if self_referential {
                referenced = self.unit.definition(cursor).or(referenced);
            }
        }

        let Some(target) = referenced else {
            self.stats.unresolved += 1;
            if !matches!(
                kind,
                CursorKind::MacroExpansion | CursorKind::ClassDecl | CursorKind::StructDecl
            ) {
                let parent = node
                    .parent
                    .map(|p| tree.node(p).kind.to_string())
                    .unwrap_or_default();
                warn!(
                    "No referenced cursor for {} '{}' at {} (child of {})",
                    kind,
                    self.unit.spelling(cursor),
                    key,
                    parent
                );
            }
            return false;
        };

        let target_kind = self.unit.kind(target);
        if kind == CursorKind::DeclRefExpr {
            match target_kind {
                CursorKind::ParmDecl
                | CursorKind::VarDecl
                | CursorKind::FieldDecl
                | CursorKind::CxxMethod
                | CursorKind::EnumConstantDecl
                | CursorKind::FunctionDecl => {}
                CursorKind::NonTypeTemplateParameter => {
                    self.stats.filtered += 1;
                    return false;
                }
                other => {
                    self.stats.filtered += 1;
                    debug!(
                        "Dropping {} '{}' at {} referring to {}",
                        kind,
                        self.unit.spelling(cursor),
                        key,
                        other
                    );
                    return false;
                }
            }
        }

        let target_node = self
            .canon
            .location(&self.unit.position(target))
            .and_then(|loc| self.graph.node_at(&loc));
        let Some(mut target_node) = target_node else {
            self.stats.missing_target += 1;
            return false;
        };

        let is_definition = self
            .graph
            .node(target_node)
            .map(|n| n.category == Category::MethodDefinition)
            .unwrap_or(false);
        if is_definition {
            if let Some(decl) = self.graph.method_declaration(target_node) {
                self.stats.redirected += 1;
                target_node = decl;
            }
        }

        let reference = GraphNode::new(
            Category::Reference,
            kind,
            self.unit.spelling(cursor),
            self.unit.display_name(cursor),
            key.clone(),
        );
        match self.graph.insert(target_node, reference) {
            Ok(_) => self.stats.created += 1,
            Err(dup) => {
                self.stats.already_present += 1;
                warn!("{}", dup);
            }
        }
        true
    }
}
