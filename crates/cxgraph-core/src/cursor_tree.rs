//! Tree Reconstruction
//!
//! Frontends hand out cursors one at a time, in pre-order, together with the
//! parent they claim each cursor has. Cursor handles cannot be compared for
//! identity, so the tree is rebuilt here from that flat sequence using a
//! stack of open ancestors and the `(kind, canonical location)` key as the
//! notion of "same cursor".
//!
//! The resulting [`CursorTree`] is scratch data: it lives as long as the
//! translation unit it was built from and is discarded after the graph
//! build.

use std::fmt::Write as _;

use thiserror::Error;
use tracing::warn;

use crate::frontend::{ChildVisit, CursorKind, TranslationUnit};
use crate::location::{Canonicalizer, Location};

/// Index of a node inside a [`CursorTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CursorNodeId(usize);

impl CursorNodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Scratch node wrapping one frontend cursor.
#[derive(Debug, Clone)]
pub struct CursorNode<C> {
    pub cursor: C,
    pub kind: CursorKind,
    /// `None` when the cursor has a file but no usable line.
    pub location: Option<Location>,
    pub parent: Option<CursorNodeId>,
    pub children: Vec<CursorNodeId>,
}

impl<C> CursorNode<C> {
    fn matches(&self, kind: CursorKind, location: &Option<Location>) -> bool {
        self.kind == kind && self.location == *location
    }
}

/// The frontend reported a parent that is neither the previous cursor nor
/// any open ancestor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error(
        "structural inconsistency: cursor {cursor} reports parent {parent}, last visited was {last}"
    )]
    StructuralInconsistency {
        cursor: String,
        parent: String,
        last: String,
    },
}

/// Arena tree of cursors rebuilt from a pre-order visit.
#[derive(Debug, Clone)]
pub struct CursorTree<C> {
    nodes: Vec<CursorNode<C>>,
}

impl<C: Copy + std::fmt::Debug> CursorTree<C> {
    /// Rebuild the cursor tree of `unit`.
    ///
    /// Cursors without a file are skipped along with their subtrees.
    pub fn reconstruct<U>(unit: &U, canon: &mut Canonicalizer) -> Result<Self, TreeError>
    where
        U: TranslationUnit<Cursor = C>,
    {
        let root = unit.root();
        let mut tree = CursorTree {
            nodes: vec![CursorNode {
                cursor: root,
                kind: unit.kind(root),
                location: canon.location(&unit.position(root)),
                parent: None,
                children: Vec::new(),
            }],
        };

        let mut stack: Vec<CursorNodeId> = vec![CursorNodeId(0)];
        let mut last: Option<CursorNodeId> = None;
        let mut failure: Option<TreeError> = None;

        unit.visit_children(root, &mut |cursor, parent| {
            let position = unit.position(cursor);
            if position.file.is_none() {
                return ChildVisit::Continue;
            }

            let parent_kind = unit.kind(parent);
            let parent_location = canon.location(&unit.position(parent));

            match last {
                Some(last_id) if tree.nodes[last_id.0].matches(parent_kind, &parent_location) => {
                    stack.push(last_id);
                }
                _ => {
                    // Rescan: close ancestors until the reported parent is on top.
                    while let Some(&top) = stack.last() {
                        if tree.nodes[top.0].matches(parent_kind, &parent_location) {
                            break;
                        }
                        stack.pop();
                    }
                }
            }

            let Some(&top) = stack.last() else {
                let error = TreeError::StructuralInconsistency {
                    cursor: describe(unit, cursor),
                    parent: describe(unit, parent),
                    last: last
                        .map(|id| describe(unit, tree.nodes[id.0].cursor))
                        .unwrap_or_else(|| "<none>".to_string()),
                };
                warn!("{}", error);
                failure = Some(error);
                return ChildVisit::Break;
            };

            let id = CursorNodeId(tree.nodes.len());
            tree.nodes.push(CursorNode {
                cursor,
                kind: unit.kind(cursor),
                location: canon.location(&position),
                parent: Some(top),
                children: Vec::new(),
            });
            tree.nodes[top.0].children.push(id);
            last = Some(id);
            if is_leaf_reference(unit.kind(cursor)) {
                ChildVisit::Continue
            } else {
                ChildVisit::Recurse
            }
        });

        match failure {
            Some(error) => Err(error),
            None => Ok(tree),
        }
    }

    pub fn root(&self) -> CursorNodeId {
        CursorNodeId(0)
    }

    pub fn node(&self, id: CursorNodeId) -> &CursorNode<C> {
        &self.nodes[id.0]
    }

    pub fn children(&self, id: CursorNodeId) -> &[CursorNodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: CursorNodeId) -> Option<CursorNodeId> {
        self.nodes[id.0].parent
    }

    /// Number of nodes, the unit-level node included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pre-order iteration over node ids (the root first).
    pub fn iter(&self) -> impl Iterator<Item = CursorNodeId> + '_ {
        let mut pending = vec![self.root()];
        std::iter::from_fn(move || {
            let id = pending.pop()?;
            pending.extend(self.nodes[id.0].children.iter().rev().copied());
            Some(id)
        })
    }

    /// Indented dump of the tree for diagnostics.
    pub fn dump<U>(&self, unit: &U) -> String
    where
        U: TranslationUnit<Cursor = C>,
    {
        let mut out = String::new();
        self.dump_node(unit, self.root(), 0, &mut out);
        out
    }

    fn dump_node<U>(&self, unit: &U, id: CursorNodeId, depth: usize, out: &mut String)
    where
        U: TranslationUnit<Cursor = C>,
    {
        let node = self.node(id);
        let location = node
            .location
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<no location>".to_string());
        let _ = write!(
            out,
            "{:indent$}{} {} {}",
            "",
            node.kind,
            unit.spelling(node.cursor),
            location,
            indent = depth * 2
        );
        if unit.is_definition(node.cursor) {
            out.push_str(" [definition]");
        }
        if let Some(semantic) = unit.semantic_parent(node.cursor) {
            let _ = write!(out, " (semantic parent: {})", describe(unit, semantic));
        }
        out.push('\n');
        for &child in self.children(id) {
            self.dump_node(unit, child, depth + 1, out);
        }
    }
}

/// Cursors whose substructure is never indexed: use sites, and enumerators
/// (their initializer expressions are not descended into).
fn is_leaf_reference(kind: CursorKind) -> bool {
    matches!(
        kind,
        CursorKind::EnumConstantDecl | CursorKind::DeclRefExpr | CursorKind::MemberRefExpr
    )
}

/// `Kind spelling @ position`, for diagnostics.
fn describe<U: TranslationUnit>(unit: &U, cursor: U::Cursor) -> String {
    format!(
        "{} '{}' @ {}",
        unit.kind(cursor),
        unit.spelling(cursor),
        unit.position(cursor)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::arena::{ArenaUnit, CursorData};
    use crate::frontend::SourcePosition;

    fn data(kind: CursorKind, name: &str, line: u32) -> CursorData {
        CursorData::new(kind, name, SourcePosition::new("/t/x.cpp", line, 1))
    }

    #[test]
    fn test_rebuilds_nested_structure() {
        let mut unit = ArenaUnit::new("/t/x.cpp");
        let root = unit.root_id();
        let ns = unit.push(root, data(CursorKind::Namespace, "ns", 1));
        let class = unit.push(ns, data(CursorKind::ClassDecl, "C", 2));
        unit.push(class, data(CursorKind::FieldDecl, "a", 3));
        unit.push(ns, data(CursorKind::FunctionDecl, "f", 5));
        unit.push(root, data(CursorKind::VarDecl, "g", 9));

        let tree = CursorTree::reconstruct(&unit, &mut Canonicalizer::new()).unwrap();
        assert_eq!(tree.len(), 6);

        let top: Vec<CursorKind> = tree
            .children(tree.root())
            .iter()
            .map(|&id| tree.node(id).kind)
            .collect();
        assert_eq!(top, vec![CursorKind::Namespace, CursorKind::VarDecl]);

        let ns_id = tree.children(tree.root())[0];
        let ns_children: Vec<CursorKind> = tree
            .children(ns_id)
            .iter()
            .map(|&id| tree.node(id).kind)
            .collect();
        assert_eq!(ns_children, vec![CursorKind::ClassDecl, CursorKind::FunctionDecl]);
        assert_eq!(tree.children(tree.children(ns_id)[0]).len(), 1);
    }

    #[test]
    fn test_skips_cursors_without_file() {
        let mut unit = ArenaUnit::new("/t/x.cpp");
        let root = unit.root_id();
        let builtin = unit.push(
            root,
            CursorData::new(CursorKind::TypedefDecl, "__builtin_va_list", SourcePosition::none()),
        );
        unit.push(builtin, data(CursorKind::TypeRef, "inner", 1));
        unit.push(root, data(CursorKind::VarDecl, "g", 2));

        let tree = CursorTree::reconstruct(&unit, &mut Canonicalizer::new()).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.node(tree.children(tree.root())[0]).kind, CursorKind::VarDecl);
    }

    #[test]
    fn test_unknown_parent_is_structural_inconsistency() {
        let mut unit = ArenaUnit::new("/t/x.cpp");
        let root = unit.root_id();
        let stray = unit.push_detached(data(CursorKind::ClassDecl, "Stray", 40));
        let a = unit.push(root, data(CursorKind::VarDecl, "a", 1));
        unit.set_reported_parent(a, stray);

        let err = CursorTree::reconstruct(&unit, &mut Canonicalizer::new()).unwrap_err();
        let TreeError::StructuralInconsistency { cursor, parent, .. } = err;
        assert!(cursor.contains("VarDecl 'a'"));
        assert!(parent.contains("ClassDecl 'Stray'"));
    }

    #[test]
    fn test_does_not_descend_into_reference_expressions() {
        let mut unit = ArenaUnit::new("/t/x.cpp");
        let root = unit.root_id();
        let f = unit.push(root, data(CursorKind::FunctionDecl, "f", 1));
        let r = unit.push(f, data(CursorKind::DeclRefExpr, "g", 2));
        unit.push(r, data(CursorKind::Unexposed, "implicit", 2));
        unit.push(f, data(CursorKind::VarDecl, "v", 3));

        let tree = CursorTree::reconstruct(&unit, &mut Canonicalizer::new()).unwrap();
        assert_eq!(tree.len(), 4);
        let f_id = tree.children(tree.root())[0];
        let r_id = tree.children(f_id)[0];
        assert!(tree.children(r_id).is_empty());
        assert_eq!(tree.node(tree.children(f_id)[1]).kind, CursorKind::VarDecl);
    }

    #[test]
    fn test_iter_is_pre_order() {
        let mut unit = ArenaUnit::new("/t/x.cpp");
        let root = unit.root_id();
        let f = unit.push(root, data(CursorKind::FunctionDecl, "f", 1));
        unit.push(f, data(CursorKind::ParmDecl, "p", 1));
        unit.push(root, data(CursorKind::VarDecl, "g", 4));

        let tree = CursorTree::reconstruct(&unit, &mut Canonicalizer::new()).unwrap();
        let kinds: Vec<CursorKind> = tree.iter().map(|id| tree.node(id).kind).collect();
        assert_eq!(
            kinds,
            vec![
                CursorKind::TranslationUnit,
                CursorKind::FunctionDecl,
                CursorKind::ParmDecl,
                CursorKind::VarDecl
            ]
        );
    }

    #[test]
    fn test_dump_mentions_every_node() {
        let mut unit = ArenaUnit::new("/t/x.cpp");
        let root = unit.root_id();
        let f = unit.push(root, data(CursorKind::FunctionDecl, "f", 1).with_definition(true));
        unit.push(f, data(CursorKind::ParmDecl, "p", 1));

        let tree = CursorTree::reconstruct(&unit, &mut Canonicalizer::new()).unwrap();
        let dump = tree.dump(&unit);
        assert!(dump.contains("FunctionDecl f"));
        assert!(dump.contains("[definition]"));
        assert!(dump.contains("    ParmDecl p"));
    }
}
