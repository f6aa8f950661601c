//! Arena-backed translation unit shared by the bundled frontends.
//!
//! Cursors live in a flat vector and are addressed by [`CursorId`]. The
//! lexical tree is encoded through `parent`/`children`; semantic links
//! (`semantic_parent`, `referenced`, `definition`) are plain ids and may
//! point at cursors that are not part of the visited tree at all.

use std::path::{Path, PathBuf};

use super::{ChildVisit, CursorKind, Inclusion, SourcePosition, TranslationUnit};

/// Handle to a cursor inside an [`ArenaUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CursorId(usize);

impl CursorId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Everything the unit knows about one cursor.
#[derive(Debug, Clone)]
pub struct CursorData {
    pub kind: CursorKind,
    pub spelling: String,
    pub display_name: Option<String>,
    pub position: SourcePosition,
    pub is_definition: bool,
    pub parent: Option<CursorId>,
    /// Parent passed to visitors instead of `parent`, for frontends that
    /// report parents inconsistently with the pre-order they emit.
    pub reported_parent: Option<CursorId>,
    pub children: Vec<CursorId>,
    pub semantic_parent: Option<CursorId>,
    pub referenced: Option<CursorId>,
    pub definition: Option<CursorId>,
}

impl CursorData {
    pub fn new(kind: CursorKind, spelling: impl Into<String>, position: SourcePosition) -> Self {
        Self {
            kind,
            spelling: spelling.into(),
            display_name: None,
            position,
            is_definition: false,
            parent: None,
            reported_parent: None,
            children: Vec::new(),
            semantic_parent: None,
            referenced: None,
            definition: None,
        }
    }

    pub fn with_definition(mut self, is_definition: bool) -> Self {
        self.is_definition = is_definition;
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

/// A translation unit stored as a cursor arena.
#[derive(Debug, Clone)]
pub struct ArenaUnit {
    main_file: PathBuf,
    cursors: Vec<CursorData>,
    inclusions: Vec<Inclusion>,
}

impl ArenaUnit {
    /// Create a unit for `main_file` holding only the unit-level cursor.
    pub fn new(main_file: impl Into<PathBuf>) -> Self {
        let main_file = main_file.into();
        let root = CursorData::new(
            CursorKind::TranslationUnit,
            main_file.display().to_string(),
            SourcePosition::none(),
        );
        Self {
            main_file,
            cursors: vec![root],
            inclusions: Vec::new(),
        }
    }

    pub fn root_id(&self) -> CursorId {
        CursorId(0)
    }

    pub fn main_file(&self) -> &Path {
        &self.main_file
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Append `data` as the last child of `parent`.
    pub fn push(&mut self, parent: CursorId, mut data: CursorData) -> CursorId {
        let id = CursorId(self.cursors.len());
        data.parent = Some(parent);
        self.cursors.push(data);
        self.cursors[parent.index()].children.push(id);
        id
    }

    /// Add a cursor that is not part of the visited tree.
    pub fn push_detached(&mut self, data: CursorData) -> CursorId {
        let id = CursorId(self.cursors.len());
        self.cursors.push(data);
        id
    }

    pub fn get(&self, id: CursorId) -> &CursorData {
        &self.cursors[id.index()]
    }

    pub fn get_mut(&mut self, id: CursorId) -> &mut CursorData {
        &mut self.cursors[id.index()]
    }

    pub fn ids(&self) -> impl Iterator<Item = CursorId> {
        (0..self.cursors.len()).map(CursorId)
    }

    pub fn add_inclusion(&mut self, path: impl Into<PathBuf>, depth: usize) {
        self.inclusions.push(Inclusion {
            path: path.into(),
            depth,
        });
    }

    pub fn set_referenced(&mut self, id: CursorId, target: CursorId) {
        self.get_mut(id).referenced = Some(target);
    }

    pub fn set_semantic_parent(&mut self, id: CursorId, parent: CursorId) {
        self.get_mut(id).semantic_parent = Some(parent);
    }

    pub fn set_definition(&mut self, id: CursorId, definition: CursorId) {
        self.get_mut(id).definition = Some(definition);
    }

    pub fn set_reported_parent(&mut self, id: CursorId, parent: CursorId) {
        self.get_mut(id).reported_parent = Some(parent);
    }

    /// Pre-order walk; returns `false` once a visitor asked to break.
    fn walk(
        &self,
        parent: CursorId,
        visitor: &mut dyn FnMut(CursorId, CursorId) -> ChildVisit,
    ) -> bool {
        for &child in &self.get(parent).children {
            let reported = self.get(child).reported_parent.unwrap_or(parent);
            match visitor(child, reported) {
                ChildVisit::Break => return false,
                ChildVisit::Continue => {}
                ChildVisit::Recurse => {
                    if !self.walk(child, visitor) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

impl TranslationUnit for ArenaUnit {
    type Cursor = CursorId;

    fn root(&self) -> CursorId {
        self.root_id()
    }

    fn visit_children(
        &self,
        parent: CursorId,
        visitor: &mut dyn FnMut(CursorId, CursorId) -> ChildVisit,
    ) {
        self.walk(parent, visitor);
    }

    fn inclusions(&self) -> Vec<Inclusion> {
        self.inclusions.clone()
    }

    fn kind(&self, cursor: CursorId) -> CursorKind {
        self.get(cursor).kind
    }

    fn spelling(&self, cursor: CursorId) -> String {
        self.get(cursor).spelling.clone()
    }

    fn display_name(&self, cursor: CursorId) -> String {
        let data = self.get(cursor);
        data.display_name
            .clone()
            .unwrap_or_else(|| data.spelling.clone())
    }

    fn position(&self, cursor: CursorId) -> SourcePosition {
        self.get(cursor).position.clone()
    }

    fn is_definition(&self, cursor: CursorId) -> bool {
        self.get(cursor).is_definition
    }

    fn semantic_parent(&self, cursor: CursorId) -> Option<CursorId> {
        let data = self.get(cursor);
        data.semantic_parent.or(data.parent)
    }

    fn referenced(&self, cursor: CursorId) -> Option<CursorId> {
        self.get(cursor).referenced
    }

    fn definition(&self, cursor: CursorId) -> Option<CursorId> {
        let data = self.get(cursor);
        match data.definition {
            Some(def) => Some(def),
            None if data.is_definition => Some(cursor),
            None => None,
        }
    }
}
