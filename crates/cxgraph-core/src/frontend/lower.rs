//! Lowering of tree-sitter syntax trees into cursor arenas.
//!
//! The main file is walked item by item. `#include` directives are expanded
//! in place (each header once per unit), macro expansions are emitted as
//! unit-level cursors after the item that contains them, and every name use
//! becomes a reference cursor. Names are bound only after the whole unit has
//! been lowered, so members used before their declaration inside a class
//! body still resolve. Uses that cannot be bound are downgraded to
//! [`CursorKind::Unexposed`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use tree_sitter::Node;

use super::arena::{ArenaUnit, CursorData, CursorId};
use super::treesitter::ParsedSource;
use super::{CursorKind, FrontendError, SourcePosition};
use crate::location::canonical_path;

/// Loads (and caches) a header by canonical path.
pub(super) type HeaderLoader<'a> =
    dyn Fn(&Path) -> Result<Arc<ParsedSource>, FrontendError> + 'a;

type ScopeId = usize;

const GLOBAL: ScopeId = 0;

/// Guard against typedef cycles when chasing a value's record type.
const MAX_ALIAS_DEPTH: usize = 8;

#[derive(Debug, Default)]
struct Scope {
    parent: Option<ScopeId>,
    names: HashMap<String, CursorId>,
    /// Set for the member scope of a class, struct or union.
    record: Option<String>,
}

#[derive(Debug, Clone)]
enum Binding {
    /// Looked up through the enclosing scopes.
    Lexical,
    /// Looked up inside the scope the qualifier names; empty means global.
    Qualified(Vec<String>),
    /// Member of the value produced by the base cursor.
    Member(Option<CursorId>),
}

#[derive(Debug)]
struct Site {
    cursor: CursorId,
    name: String,
    scope: ScopeId,
    binding: Binding,
}

/// Where the declared type of a value (or the target of a typedef) is found.
#[derive(Debug, Clone)]
enum TypeHint {
    Named(String, ScopeId),
    Cursor(CursorId),
}

/// Shape of a declarator once pointer, reference and init wrappers are
/// peeled off.
struct Declarator<'t> {
    name: Node<'t>,
    /// The function declarator when this declares a function.
    function: Option<Node<'t>>,
    value: Option<Node<'t>>,
    /// Array bound expressions.
    sizes: Vec<Node<'t>>,
}

/// Pieces of a function declaration or definition.
struct Callable<'t> {
    declarator: Node<'t>,
    name: Node<'t>,
    return_type: Option<Node<'t>>,
    body: Option<Node<'t>>,
    initializers: Option<Node<'t>>,
    template: Option<Node<'t>>,
}

/// Lowering position: the file being read and the cursor/scope items land in.
#[derive(Clone, Copy)]
struct Here<'s> {
    path: &'s Path,
    text: &'s [u8],
    depth: usize,
    parent: CursorId,
    scope: ScopeId,
}

impl<'s> Here<'s> {
    fn under(self, parent: CursorId) -> Self {
        Self { parent, ..self }
    }

    fn within(self, parent: CursorId, scope: ScopeId) -> Self {
        Self {
            parent,
            scope,
            ..self
        }
    }

    fn text(&self, node: Node<'_>) -> &'s str {
        node.utf8_text(self.text).unwrap_or("")
    }

    fn position(&self, node: Node<'_>) -> SourcePosition {
        let point = node.start_position();
        SourcePosition::new(self.path, one_based(point.row), one_based(point.column))
    }
}

/// Sources are size-checked on read, so the fallback is never taken.
fn one_based(offset: usize) -> u32 {
    u32::try_from(offset + 1).unwrap_or(u32::MAX)
}

/// Lower `main` (and every header it reaches) into a cursor arena.
pub(super) fn lower<'a>(
    main: &ParsedSource,
    include_dirs: &'a [PathBuf],
    load: &'a HeaderLoader<'a>,
) -> ArenaUnit {
    let mut lowerer = Lowerer {
        unit: ArenaUnit::new(&main.path),
        include_dirs,
        load,
        included: HashSet::from([canonical_path(&main.path)]),
        scopes: vec![Scope::default()],
        scope_of: HashMap::new(),
        macros: HashMap::new(),
        expansions: Vec::new(),
        sites: Vec::new(),
        forwards: Vec::new(),
        types: HashMap::new(),
    };
    let here = Here {
        path: &main.path,
        text: main.text.as_bytes(),
        depth: 0,
        parent: lowerer.unit.root_id(),
        scope: GLOBAL,
    };
    lowerer.lower_items(main.tree.root_node(), here);
    lowerer.flush_expansions();
    lowerer.bind();
    lowerer.unit
}

struct Lowerer<'a> {
    unit: ArenaUnit,
    include_dirs: &'a [PathBuf],
    load: &'a HeaderLoader<'a>,
    included: HashSet<PathBuf>,
    scopes: Vec<Scope>,
    /// Member scope of each record and namespace cursor.
    scope_of: HashMap<CursorId, ScopeId>,
    macros: HashMap<String, CursorId>,
    expansions: Vec<(SourcePosition, String, CursorId)>,
    sites: Vec<Site>,
    forwards: Vec<(CursorId, String, ScopeId)>,
    types: HashMap<CursorId, TypeHint>,
}

impl<'a> Lowerer<'a> {
    // ========================================================================
    // Items
    // ========================================================================

    fn lower_items(&mut self, node: Node<'_>, here: Here<'_>) {
        let root = self.unit.root_id();
        for child in named_children(node) {
            self.lower_item(child, here);
            if here.parent == root {
                self.flush_expansions();
            }
        }
    }

    fn lower_item(&mut self, node: Node<'_>, here: Here<'_>) {
        match node.kind() {
            "preproc_include" => self.lower_include(node, here),
            "preproc_def" | "preproc_function_def" => self.lower_macro(node, here),
            "preproc_call" => self.lower_directive(node, here),
            "preproc_ifdef" | "preproc_if" | "preproc_else" | "preproc_elif"
            | "preproc_elifdef" | "declaration_list" => self.lower_items(node, here),
            "linkage_specification" => {
                if let Some(body) = node.child_by_field_name("body") {
                    if body.kind() == "declaration_list" {
                        self.lower_items(body, here);
                    } else {
                        self.lower_item(body, here);
                    }
                }
            }
            "namespace_definition" => self.lower_namespace(node, here),
            "class_specifier" | "struct_specifier" | "union_specifier" => {
                self.lower_record(node, here, None, true);
            }
            "enum_specifier" => {
                self.lower_enum(node, here);
            }
            "function_definition" => self.lower_function_definition(node, here, None),
            "declaration" | "field_declaration" => self.lower_declaration(node, here, None),
            "type_definition" => self.lower_typedef(node, here),
            "alias_declaration" => self.lower_alias(node, here),
            "template_declaration" => self.lower_template(node, here),
            _ => {}
        }
    }

    fn lower_include(&mut self, node: Node<'_>, here: Here<'_>) {
        let Some(path_node) = node.child_by_field_name("path") else {
            return;
        };
        let quoted = path_node.kind() == "string_literal";
        let spelled = here
            .text(path_node)
            .trim_matches(|c| c == '"' || c == '<' || c == '>');
        self.unit.push(
            here.parent,
            CursorData::new(CursorKind::InclusionDirective, spelled, here.position(node)),
        );

        let Some(header) = self.find_header(spelled, quoted, here.path) else {
            debug!("Header '{}' not found from {}", spelled, here.path.display());
            return;
        };
        if !self.included.insert(header.clone()) {
            return;
        }
        self.unit.add_inclusion(&header, here.depth + 1);

        let source = match (self.load)(&header) {
            Ok(source) => source,
            Err(e) => {
                debug!("Skipping header {}: {}", header.display(), e);
                return;
            }
        };
        let nested = Here {
            path: &source.path,
            text: source.text.as_bytes(),
            depth: here.depth + 1,
            parent: here.parent,
            scope: here.scope,
        };
        self.lower_items(source.tree.root_node(), nested);
    }

    fn find_header(&self, spelled: &str, quoted: bool, from: &Path) -> Option<PathBuf> {
        let local = if quoted {
            from.parent().map(|dir| dir.join(spelled))
        } else {
            None
        };
        local
            .into_iter()
            .chain(self.include_dirs.iter().map(|dir| dir.join(spelled)))
            .find(|candidate| candidate.is_file())
            .map(|candidate| canonical_path(&candidate))
    }

    fn lower_macro(&mut self, node: Node<'_>, here: Here<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let spelling = here.text(name);
        let id = self.unit.push(
            here.parent,
            CursorData::new(CursorKind::MacroDefinition, spelling, here.position(name))
                .with_definition(true),
        );
        self.macros.insert(spelling.to_string(), id);
    }

    fn lower_directive(&mut self, node: Node<'_>, here: Here<'_>) {
        let directive = node
            .child_by_field_name("directive")
            .map(|d| here.text(d))
            .unwrap_or("");
        if directive == "#undef" {
            if let Some(argument) = node.child_by_field_name("argument") {
                self.macros.remove(here.text(argument).trim());
            }
        }
    }

    fn lower_namespace(&mut self, node: Node<'_>, here: Here<'_>) {
        let name_node = node.child_by_field_name("name");
        let name = name_node.map(|n| here.text(n)).unwrap_or("");
        let id = self.push(
            here,
            CursorKind::Namespace,
            name,
            name_node.unwrap_or(node),
            true,
        );

        // Reopened namespaces share one scope.
        let reopened = self.scopes[here.scope]
            .names
            .get(name)
            .filter(|&&existing| self.unit.get(existing).kind == CursorKind::Namespace)
            .and_then(|existing| self.scope_of.get(existing))
            .copied();
        let scope = match reopened {
            Some(scope) if !name.is_empty() => scope,
            _ => self.new_scope(here.scope, None),
        };
        self.scope_of.insert(id, scope);
        self.declare(here.scope, name, id);

        if let Some(body) = node.child_by_field_name("body") {
            self.lower_items(body, here.within(id, scope));
        }
    }

    /// Lower a class, struct or union specifier.
    ///
    /// Without a body the specifier is a forward declaration when it stands
    /// alone and a type reference otherwise.
    fn lower_record(
        &mut self,
        node: Node<'_>,
        here: Here<'_>,
        template: Option<Node<'_>>,
        standalone: bool,
    ) -> Option<CursorId> {
        let name_node = node.child_by_field_name("name").map(name_token);
        let body = node.child_by_field_name("body");
        let name = name_node.map(|n| here.text(n)).unwrap_or("");
        let kind = if template.is_some() {
            CursorKind::ClassTemplate
        } else {
            match node.kind() {
                "struct_specifier" => CursorKind::StructDecl,
                "union_specifier" => CursorKind::UnionDecl,
                _ => CursorKind::ClassDecl,
            }
        };

        let Some(body) = body else {
            let name_node = name_node?;
            if !standalone {
                self.type_reference(name_node, here);
                return None;
            }
            let id = self.push(here, kind, name, name_node, false);
            self.declare(here.scope, name, id);
            self.forwards.push((id, name.to_string(), here.scope));
            return Some(id);
        };

        let id = self.push(here, kind, name, name_node.unwrap_or(node), true);
        self.declare(here.scope, name, id);
        let scope = self.new_scope(here.scope, Some(name.to_string()));
        self.scope_of.insert(id, scope);
        let inner = here.within(id, scope);

        if let Some(params) = template {
            self.lower_template_parameters(params, inner);
        }
        for clause in named_children(node).filter(|c| c.kind() == "base_class_clause") {
            for base in named_children(clause) {
                self.lower_type(base, inner);
            }
        }
        self.lower_items(body, inner);
        Some(id)
    }

    fn lower_enum(&mut self, node: Node<'_>, here: Here<'_>) -> Option<CursorId> {
        let name_node = node.child_by_field_name("name").map(name_token);
        let Some(body) = node.child_by_field_name("body") else {
            if let Some(name_node) = name_node {
                self.type_reference(name_node, here);
            }
            return None;
        };
        let name = name_node.map(|n| here.text(n)).unwrap_or("");
        let id = self.push(here, CursorKind::EnumDecl, name, name_node.unwrap_or(node), true);
        self.declare(here.scope, name, id);

        for enumerator in named_children(body).filter(|c| c.kind() == "enumerator") {
            let Some(constant) = enumerator.child_by_field_name("name") else {
                continue;
            };
            let spelling = here.text(constant);
            let constant_id =
                self.push(here.under(id), CursorKind::EnumConstantDecl, spelling, constant, true);
            self.declare(here.scope, spelling, constant_id);
            if let Some(value) = enumerator.child_by_field_name("value") {
                self.lower_expr(value, here.under(constant_id));
            }
        }
        Some(id)
    }

    fn lower_declaration(&mut self, node: Node<'_>, here: Here<'_>, template: Option<Node<'_>>) {
        let ty = node.child_by_field_name("type");
        let declarators: Vec<Node<'_>> = field_children(node, "declarator");

        // Records and enums defined here are lowered once, ahead of the
        // names declared with them.
        let mut defined = None;
        if let Some(ty) = ty {
            let has_body = ty.child_by_field_name("body").is_some();
            if declarators.is_empty() || has_body {
                defined = match ty.kind() {
                    "class_specifier" | "struct_specifier" | "union_specifier" => {
                        self.lower_record(ty, here, template, declarators.is_empty())
                    }
                    "enum_specifier" => self.lower_enum(ty, here),
                    _ => None,
                };
            }
        }

        let in_record = self.scopes[here.scope].record.is_some();
        let is_extern = has_specifier(node, here, "extern");
        let is_static = has_specifier(node, here, "static");
        let hint = match defined {
            Some(id) => Some(TypeHint::Cursor(id)),
            None => ty.and_then(|t| type_hint(t, here)),
        };

        let mut last = None;
        for declarator in declarators {
            let Some(shape) = unwrap_declarator(declarator) else {
                continue;
            };
            if let Some(function) = shape.function {
                self.lower_callable(
                    Callable {
                        declarator: function,
                        name: shape.name,
                        return_type: ty.filter(|_| defined.is_none()),
                        body: None,
                        initializers: None,
                        template,
                    },
                    here,
                );
                continue;
            }

            let kind = if node.kind() == "field_declaration" && in_record && !is_static {
                CursorKind::FieldDecl
            } else {
                CursorKind::VarDecl
            };
            let name = here.text(name_token(shape.name));
            let id = self.push(here, kind, name, name_token(shape.name), !is_extern);
            self.declare(here.scope, name, id);
            if let Some(hint) = &hint {
                self.types.insert(id, hint.clone());
            }
            if defined.is_none() {
                if let Some(ty) = ty {
                    self.lower_type(ty, here.under(id));
                }
            }
            for size in shape.sizes {
                self.lower_expr(size, here.under(id));
            }
            if let Some(value) = shape.value {
                self.lower_expr(value, here.under(id));
            }
            last = Some(id);
        }

        if let (Some(id), Some(value)) = (last, node.child_by_field_name("default_value")) {
            self.lower_expr(value, here.under(id));
        }
    }

    fn lower_function_definition(
        &mut self,
        node: Node<'_>,
        here: Here<'_>,
        template: Option<Node<'_>>,
    ) {
        let Some(shape) = node
            .child_by_field_name("declarator")
            .and_then(unwrap_declarator)
        else {
            return;
        };
        let Some(function) = shape.function else {
            return;
        };
        let initializers = named_children(node).find(|c| c.kind() == "field_initializer_list");
        self.lower_callable(
            Callable {
                declarator: function,
                name: shape.name,
                return_type: node.child_by_field_name("type"),
                body: node.child_by_field_name("body"),
                initializers,
                template,
            },
            here,
        );
    }

    fn lower_callable(&mut self, callable: Callable<'_>, here: Here<'_>) -> CursorId {
        let (qualifier, name_node) = split_qualified(callable.name);
        let name = here.text(name_token(name_node));
        let path: Vec<String> = qualifier
            .iter()
            .map(|q| here.text(name_token(*q)).to_string())
            .collect();
        let owner = if path.is_empty() {
            None
        } else {
            self.resolve_owner(here.scope, &path)
        };
        let owner_record = owner.filter(|&o| self.unit.get(o).kind.is_record());
        let record_name = match owner_record {
            Some(o) => Some(self.unit.get(o).spelling.clone()),
            None => self.scopes[here.scope].record.clone(),
        };
        let owner_is_template =
            owner_record.is_some_and(|o| self.unit.get(o).kind == CursorKind::ClassTemplate);

        let kind = if callable.template.is_some() && !owner_is_template {
            CursorKind::FunctionTemplate
        } else if record_name.is_some() && name_node.kind() == "destructor_name" {
            CursorKind::Destructor
        } else if record_name.as_deref() == Some(name) {
            CursorKind::Constructor
        } else if record_name.is_some() {
            CursorKind::CxxMethod
        } else {
            CursorKind::FunctionDecl
        };

        let params = callable.declarator.child_by_field_name("parameters");
        let display = format!(
            "{}({})",
            name,
            params
                .map(|p| parameter_types(p, here).join(", "))
                .unwrap_or_default()
        );
        let id = self.unit.push(
            here.parent,
            CursorData::new(kind, name, here.position(name_token(name_node)))
                .with_definition(callable.body.is_some())
                .with_display_name(display),
        );

        let owner_scope = owner.and_then(|o| self.scope_of.get(&o).copied());
        if let Some(owner) = owner {
            self.unit.set_semantic_parent(id, owner);
        }
        self.declare(owner_scope.unwrap_or(here.scope), name, id);

        let scope = self.new_scope(owner_scope.unwrap_or(here.scope), None);
        let inner = here.within(id, scope);
        if let Some(template) = callable.template {
            self.lower_template_parameters(template, inner);
        }
        if let Some(ty) = callable.return_type {
            self.lower_type(ty, inner);
        }
        if !qualifier.is_empty() {
            self.lower_qualifier(&qualifier, inner);
        }
        if let Some(params) = params {
            self.lower_parameters(params, inner);
        }
        if let Some(initializers) = callable.initializers {
            self.lower_initializers(initializers, inner);
        }
        if let Some(body) = callable.body {
            self.lower_block(body, inner);
        }
        id
    }

    fn lower_parameters(&mut self, params: Node<'_>, here: Here<'_>) {
        for param in named_children(params) {
            if !matches!(
                param.kind(),
                "parameter_declaration"
                    | "optional_parameter_declaration"
                    | "variadic_parameter_declaration"
            ) {
                continue;
            }
            let ty = param.child_by_field_name("type");
            let shape = param
                .child_by_field_name("declarator")
                .and_then(unwrap_declarator);
            let Some(shape) = shape else {
                if let Some(ty) = ty {
                    self.lower_type(ty, here);
                }
                continue;
            };

            let name = here.text(shape.name);
            let id = self.push(here, CursorKind::ParmDecl, name, shape.name, true);
            self.declare(here.scope, name, id);
            if let Some(hint) = ty.and_then(|t| type_hint(t, here)) {
                self.types.insert(id, hint);
            }
            if let Some(ty) = ty {
                self.lower_type(ty, here.under(id));
            }
            if let Some(value) = param.child_by_field_name("default_value") {
                self.lower_expr(value, here.under(id));
            }
        }
    }

    fn lower_initializers(&mut self, list: Node<'_>, here: Here<'_>) {
        for initializer in named_children(list) {
            for part in named_children(initializer) {
                match part.kind() {
                    "field_identifier" => {
                        let name = here.text(part);
                        let id = self.push(here, CursorKind::MemberRef, name, part, false);
                        self.site(id, name, here.scope, Binding::Lexical);
                    }
                    "type_identifier" | "qualified_identifier" | "template_type" => {
                        self.lower_type(part, here)
                    }
                    _ => {
                        self.lower_expr(part, here);
                    }
                }
            }
        }
    }

    fn lower_typedef(&mut self, node: Node<'_>, here: Here<'_>) {
        let ty = node.child_by_field_name("type");
        let defined = match ty {
            Some(ty) if ty.child_by_field_name("body").is_some() => match ty.kind() {
                "class_specifier" | "struct_specifier" | "union_specifier" => {
                    self.lower_record(ty, here, None, false)
                }
                "enum_specifier" => self.lower_enum(ty, here),
                _ => None,
            },
            _ => None,
        };
        let hint = match defined {
            Some(id) => Some(TypeHint::Cursor(id)),
            None => ty.and_then(|t| type_hint(t, here)),
        };

        for declarator in field_children(node, "declarator") {
            let Some(shape) = unwrap_declarator(declarator) else {
                continue;
            };
            let name = here.text(shape.name);
            let id = self.push(here, CursorKind::TypedefDecl, name, shape.name, true);
            self.declare(here.scope, name, id);
            if let Some(hint) = &hint {
                self.types.insert(id, hint.clone());
            }
            if let (None, Some(ty)) = (defined, ty) {
                self.lower_type(ty, here.under(id));
            }
        }
    }

    fn lower_alias(&mut self, node: Node<'_>, here: Here<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = here.text(name_node);
        let id = self.push(here, CursorKind::TypedefDecl, name, name_node, true);
        self.declare(here.scope, name, id);
        if let Some(ty) = node.child_by_field_name("type") {
            if let Some(hint) = ty.child_by_field_name("type").and_then(|t| type_hint(t, here)) {
                self.types.insert(id, hint);
            }
            self.lower_type(ty, here.under(id));
        }
    }

    fn lower_template(&mut self, node: Node<'_>, here: Here<'_>) {
        let params = node.child_by_field_name("parameters");
        let Some(item) = named_children(node)
            .filter(|c| c.kind() != "template_parameter_list")
            .last()
        else {
            return;
        };
        match item.kind() {
            "class_specifier" | "struct_specifier" | "union_specifier" => {
                self.lower_record(item, here, params, true);
            }
            "function_definition" => self.lower_function_definition(item, here, params),
            "declaration" | "field_declaration" => self.lower_declaration(item, here, params),
            _ => self.lower_item(item, here),
        }
    }

    fn lower_template_parameters(&mut self, params: Node<'_>, here: Here<'_>) {
        for param in named_children(params) {
            match param.kind() {
                "type_parameter_declaration" | "variadic_type_parameter_declaration" => {
                    if let Some(name) = named_children(param).find(|c| c.kind() == "type_identifier")
                    {
                        let spelling = here.text(name);
                        let id =
                            self.push(here, CursorKind::TemplateTypeParameter, spelling, name, true);
                        self.declare(here.scope, spelling, id);
                    }
                }
                "optional_type_parameter_declaration" => {
                    if let Some(name) = param.child_by_field_name("name") {
                        let spelling = here.text(name);
                        let id =
                            self.push(here, CursorKind::TemplateTypeParameter, spelling, name, true);
                        self.declare(here.scope, spelling, id);
                        if let Some(default) = param.child_by_field_name("default_type") {
                            self.lower_type(default, here.under(id));
                        }
                    }
                }
                "parameter_declaration"
                | "optional_parameter_declaration"
                | "variadic_parameter_declaration" => {
                    let Some(shape) = param
                        .child_by_field_name("declarator")
                        .and_then(unwrap_declarator)
                    else {
                        continue;
                    };
                    let spelling = here.text(shape.name);
                    let id = self.push(
                        here,
                        CursorKind::NonTypeTemplateParameter,
                        spelling,
                        shape.name,
                        true,
                    );
                    self.declare(here.scope, spelling, id);
                    if let Some(ty) = param.child_by_field_name("type") {
                        self.lower_type(ty, here.under(id));
                    }
                }
                _ => {}
            }
        }
    }

    // ========================================================================
    // Types
    // ========================================================================

    fn lower_type(&mut self, node: Node<'_>, here: Here<'_>) {
        match node.kind() {
            "type_identifier" => self.type_reference(node, here),
            "qualified_identifier" => {
                self.qualified_reference(node, here, CursorKind::TypeRef);
            }
            "template_type" => self.template_reference(node, here),
            "class_specifier" | "struct_specifier" | "union_specifier" => {
                self.lower_record(node, here, None, false);
            }
            "enum_specifier" => {
                self.lower_enum(node, here);
            }
            "type_descriptor" => {
                if let Some(ty) = node.child_by_field_name("type") {
                    self.lower_type(ty, here);
                }
            }
            "primitive_type" | "sized_type_specifier" | "auto" | "placeholder_type_specifier"
            | "type_qualifier" => {}
            _ => {
                for child in named_children(node) {
                    self.lower_type(child, here);
                }
            }
        }
    }

    fn type_reference(&mut self, node: Node<'_>, here: Here<'_>) {
        let name = here.text(node);
        if self.expand_macro(name, node, here) {
            return;
        }
        let id = self.push(here, CursorKind::TypeRef, name, node, false);
        self.site(id, name, here.scope, Binding::Lexical);
    }

    fn template_reference(&mut self, node: Node<'_>, here: Here<'_>) {
        if let Some(name) = node.child_by_field_name("name") {
            let spelling = here.text(name);
            let id = self.push(here, CursorKind::TemplateRef, spelling, name, false);
            self.site(id, spelling, here.scope, Binding::Lexical);
        }
        if let Some(arguments) = node.child_by_field_name("arguments") {
            self.lower_template_arguments(arguments, here);
        }
    }

    fn lower_template_arguments(&mut self, arguments: Node<'_>, here: Here<'_>) {
        for argument in named_children(arguments) {
            if argument.kind() == "type_descriptor" {
                self.lower_type(argument, here);
            } else {
                self.lower_expr(argument, here);
            }
        }
    }

    /// Emit references for the scope components of a qualified name.
    fn lower_qualifier(&mut self, qualifier: &[Node<'_>], here: Here<'_>) -> Vec<String> {
        let mut path: Vec<String> = Vec::new();
        for &component in qualifier {
            let token = name_token(component);
            let name = here.text(token);
            let kind = match component.kind() {
                "namespace_identifier" => CursorKind::NamespaceRef,
                "template_type" => CursorKind::TemplateRef,
                _ => CursorKind::TypeRef,
            };
            let id = self.push(here, kind, name, token, false);
            let binding = if path.is_empty() {
                Binding::Lexical
            } else {
                Binding::Qualified(path.clone())
            };
            self.site(id, name, here.scope, binding);
            if let Some(arguments) = component.child_by_field_name("arguments") {
                self.lower_template_arguments(arguments, here);
            }
            path.push(name.to_string());
        }
        path
    }

    fn qualified_reference(
        &mut self,
        node: Node<'_>,
        here: Here<'_>,
        kind: CursorKind,
    ) -> Option<CursorId> {
        let (qualifier, name_node) = split_qualified(node);
        let path = self.lower_qualifier(&qualifier, here);
        let token = name_token(name_node);
        let name = here.text(token);
        if name.is_empty() {
            return None;
        }
        let id = self.push(here, kind, name, token, false);
        self.site(id, name, here.scope, Binding::Qualified(path));
        if let Some(arguments) = name_node.child_by_field_name("arguments") {
            self.lower_template_arguments(arguments, here);
        }
        Some(id)
    }

    // ========================================================================
    // Statements and expressions
    // ========================================================================

    fn lower_block(&mut self, node: Node<'_>, here: Here<'_>) {
        let id = self.push(here, CursorKind::CompoundStmt, "", node, false);
        let scope = self.new_scope(here.scope, None);
        let inner = here.within(id, scope);
        for child in named_children(node) {
            self.lower_expr(child, inner);
        }
    }

    /// Lower a statement or expression. Returns the cursor naming the value
    /// the expression produces, when there is one.
    fn lower_expr(&mut self, node: Node<'_>, here: Here<'_>) -> Option<CursorId> {
        match node.kind() {
            "identifier" => {
                let name = here.text(node);
                if self.expand_macro(name, node, here) {
                    return None;
                }
                let id = self.push(here, CursorKind::DeclRefExpr, name, node, false);
                self.site(id, name, here.scope, Binding::Lexical);
                Some(id)
            }
            "qualified_identifier" => self.qualified_reference(node, here, CursorKind::DeclRefExpr),
            "field_expression" => {
                let field = name_token(node.child_by_field_name("field")?);
                let name = here.text(field);
                // Member references are leaves; the base goes in front as a sibling.
                let argument = node.child_by_field_name("argument");
                let base = argument.and_then(|a| self.lower_expr(a, here));
                let id = self.push(here, CursorKind::MemberRefExpr, name, field, false);
                let binding = match argument {
                    Some(a) if a.kind() == "this" => Binding::Lexical,
                    _ => Binding::Member(base),
                };
                self.site(id, name, here.scope, binding);
                Some(id)
            }
            "call_expression" => {
                let function = node.child_by_field_name("function")?;
                let callee = here.text(callee_token(function));
                let id = self.push(here, CursorKind::CallExpr, callee, function, false);
                self.lower_expr(function, here.under(id));
                if let Some(arguments) = node.child_by_field_name("arguments") {
                    self.lower_expr(arguments, here.under(id));
                }
                None
            }
            "template_function" => {
                let value = node
                    .child_by_field_name("name")
                    .and_then(|n| self.lower_expr(n, here));
                if let Some(arguments) = node.child_by_field_name("arguments") {
                    self.lower_template_arguments(arguments, here);
                }
                value
            }
            "parenthesized_expression" => {
                let mut value = None;
                for child in named_children(node) {
                    value = self.lower_expr(child, here);
                }
                value
            }
            "pointer_expression" | "subscript_expression" => {
                let value = node
                    .child_by_field_name("argument")
                    .and_then(|a| self.lower_expr(a, here));
                for index in field_children(node, "indices") {
                    self.lower_expr(index, here);
                }
                if let Some(index) = node.child_by_field_name("index") {
                    self.lower_expr(index, here);
                }
                value
            }
            "for_range_loop" => {
                self.lower_range_loop(node, here);
                None
            }
            "lambda_expression" => {
                if let Some(body) = node.child_by_field_name("body") {
                    self.lower_block(body, here);
                }
                None
            }
            "compound_statement" => {
                self.lower_block(node, here);
                None
            }
            "declaration" => {
                self.lower_declaration(node, here, None);
                None
            }
            "type_descriptor" | "type_identifier" | "template_type" => {
                self.lower_type(node, here);
                None
            }
            "this" | "string_literal" | "raw_string_literal" | "concatenated_string"
            | "number_literal" | "char_literal" | "true" | "false" | "null" | "nullptr"
            | "comment" | "field_identifier" | "statement_identifier" | "primitive_type" => None,
            _ => {
                for child in named_children(node) {
                    self.lower_expr(child, here);
                }
                None
            }
        }
    }

    fn lower_range_loop(&mut self, node: Node<'_>, here: Here<'_>) {
        let ty = node.child_by_field_name("type");
        if let Some(shape) = node
            .child_by_field_name("declarator")
            .and_then(unwrap_declarator)
        {
            let name = here.text(shape.name);
            let id = self.push(here, CursorKind::VarDecl, name, shape.name, true);
            self.declare(here.scope, name, id);
            if let Some(hint) = ty.and_then(|t| type_hint(t, here)) {
                self.types.insert(id, hint);
            }
            if let Some(ty) = ty {
                self.lower_type(ty, here.under(id));
            }
        }
        if let Some(range) = node.child_by_field_name("right") {
            self.lower_expr(range, here);
        }
        if let Some(body) = node.child_by_field_name("body") {
            self.lower_expr(body, here);
        }
    }

    fn expand_macro(&mut self, name: &str, node: Node<'_>, here: Here<'_>) -> bool {
        let Some(&definition) = self.macros.get(name) else {
            return false;
        };
        self.expansions
            .push((here.position(node), name.to_string(), definition));
        true
    }

    /// Emit buffered macro expansions as unit-level cursors.
    fn flush_expansions(&mut self) {
        let root = self.unit.root_id();
        for (position, name, definition) in std::mem::take(&mut self.expansions) {
            let id = self
                .unit
                .push(root, CursorData::new(CursorKind::MacroExpansion, name, position));
            self.unit.set_referenced(id, definition);
        }
    }

    // ========================================================================
    // Scopes and binding
    // ========================================================================

    fn push(
        &mut self,
        here: Here<'_>,
        kind: CursorKind,
        spelling: &str,
        at: Node<'_>,
        is_definition: bool,
    ) -> CursorId {
        self.unit.push(
            here.parent,
            CursorData::new(kind, spelling, here.position(at)).with_definition(is_definition),
        )
    }

    fn site(&mut self, cursor: CursorId, name: &str, scope: ScopeId, binding: Binding) {
        self.sites.push(Site {
            cursor,
            name: name.to_string(),
            scope,
            binding,
        });
    }

    fn new_scope(&mut self, parent: ScopeId, record: Option<String>) -> ScopeId {
        self.scopes.push(Scope {
            parent: Some(parent),
            names: HashMap::new(),
            record,
        });
        self.scopes.len() - 1
    }

    /// Bind `name` in `scope`. The first declaration wins, except that a
    /// record definition replaces a forward declaration.
    fn declare(&mut self, scope: ScopeId, name: &str, id: CursorId) {
        if name.is_empty() {
            return;
        }
        let replace = match self.scopes[scope].names.get(name) {
            None => true,
            Some(&existing) => {
                let old = self.unit.get(existing);
                let new = self.unit.get(id);
                old.kind.is_record() && !old.is_definition && new.is_definition
            }
        };
        if replace {
            self.scopes[scope].names.insert(name.to_string(), id);
        }
    }

    fn lookup(&self, scope: ScopeId, name: &str) -> Option<CursorId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(&found) = self.scopes[id].names.get(name) {
                return Some(found);
            }
            current = self.scopes[id].parent;
        }
        None
    }

    /// Record or namespace named by `path`, looked up from `scope`.
    fn resolve_owner(&self, scope: ScopeId, path: &[String]) -> Option<CursorId> {
        let (first, rest) = path.split_first()?;
        let mut owner = self.lookup(scope, first)?;
        for component in rest {
            let inner = *self.scope_of.get(&owner)?;
            owner = *self.scopes[inner].names.get(component)?;
        }
        Some(owner)
    }

    fn qualified_scope(&self, scope: ScopeId, path: &[String]) -> Option<ScopeId> {
        if path.is_empty() {
            return Some(GLOBAL);
        }
        let owner = self.resolve_owner(scope, path)?;
        self.scope_of.get(&owner).copied()
    }

    /// Member scope of the record a value (or typedef) has as its type.
    fn record_scope(&self, value: CursorId) -> Option<ScopeId> {
        let mut hint = self.types.get(&value)?.clone();
        for _ in 0..MAX_ALIAS_DEPTH {
            let cursor = match &hint {
                TypeHint::Named(name, scope) => self.lookup(*scope, name)?,
                TypeHint::Cursor(cursor) => *cursor,
            };
            if self.unit.get(cursor).kind.is_record() {
                return self.scope_of.get(&cursor).copied();
            }
            hint = self.types.get(&cursor)?.clone();
        }
        None
    }

    fn member(&self, base: Option<CursorId>, name: &str) -> Option<CursorId> {
        let typed = base
            .and_then(|b| self.unit.get(b).referenced)
            .and_then(|target| self.record_scope(target))
            .and_then(|scope| self.scopes[scope].names.get(name).copied());
        // Without a known base type, any record member of that name.
        typed.or_else(|| {
            self.scopes
                .iter()
                .filter(|s| s.record.is_some())
                .find_map(|s| s.names.get(name).copied())
        })
    }

    /// Bind every recorded use site, then link forward declarations.
    fn bind(&mut self) {
        let sites = std::mem::take(&mut self.sites);
        let mut unbound = 0usize;
        for site in sites {
            let target = match &site.binding {
                Binding::Lexical => self.lookup(site.scope, &site.name),
                Binding::Qualified(path) => self
                    .qualified_scope(site.scope, path)
                    .and_then(|scope| self.scopes[scope].names.get(&site.name).copied()),
                Binding::Member(base) => self.member(*base, &site.name),
            };
            match target {
                Some(target) => {
                    self.unit.set_referenced(site.cursor, target);
                    // The grammar spells every `X::` scope as a namespace.
                    if self.unit.get(site.cursor).kind == CursorKind::NamespaceRef
                        && self.unit.get(target).kind.is_record()
                    {
                        self.unit.get_mut(site.cursor).kind = CursorKind::TypeRef;
                    }
                }
                None => {
                    unbound += 1;
                    self.unit.get_mut(site.cursor).kind = CursorKind::Unexposed;
                }
            }
        }

        for (forward, name, scope) in std::mem::take(&mut self.forwards) {
            let definition = self.lookup(scope, &name).filter(|&d| {
                let data = self.unit.get(d);
                data.kind.is_record() && data.is_definition
            });
            if let Some(definition) = definition {
                self.unit.set_definition(forward, definition);
            }
            // Class and struct forwards are followed through their definition;
            // other record forwards name themselves.
            let kind = self.unit.get(forward).kind;
            if !matches!(kind, CursorKind::ClassDecl | CursorKind::StructDecl) {
                self.unit
                    .set_referenced(forward, definition.unwrap_or(forward));
            }
        }
        if unbound > 0 {
            debug!(
                "{}: {} names could not be bound",
                self.unit.main_file().display(),
                unbound
            );
        }
    }
}

// ============================================================================
// Syntax helpers
// ============================================================================

fn named_children<'t>(node: Node<'t>) -> impl Iterator<Item = Node<'t>> {
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    children.into_iter()
}

fn field_children<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

fn first_named(node: Node<'_>) -> Option<Node<'_>> {
    named_children(node).next()
}

/// Token carrying the name of a possibly qualified or templated name.
fn name_token(node: Node<'_>) -> Node<'_> {
    match node.kind() {
        "qualified_identifier" | "template_type" | "template_function" | "template_method" => node
            .child_by_field_name("name")
            .map(name_token)
            .unwrap_or(node),
        _ => node,
    }
}

/// Token naming the function a call expression invokes.
fn callee_token(node: Node<'_>) -> Node<'_> {
    match node.kind() {
        "field_expression" => node
            .child_by_field_name("field")
            .map(name_token)
            .unwrap_or(node),
        "parenthesized_expression" => first_named(node).map(callee_token).unwrap_or(node),
        _ => name_token(node),
    }
}

/// Split `a::b::c` into its scope components and final name.
fn split_qualified(node: Node<'_>) -> (Vec<Node<'_>>, Node<'_>) {
    let mut qualifier = Vec::new();
    let mut current = node;
    while current.kind() == "qualified_identifier" {
        if let Some(scope) = current.child_by_field_name("scope") {
            qualifier.push(scope);
        }
        match current.child_by_field_name("name") {
            Some(name) => current = name,
            None => break,
        }
    }
    (qualifier, current)
}

fn is_name(kind: &str) -> bool {
    matches!(
        kind,
        "identifier"
            | "field_identifier"
            | "type_identifier"
            | "qualified_identifier"
            | "destructor_name"
            | "operator_name"
            | "template_function"
            | "template_method"
    )
}

fn unwrap_declarator(node: Node<'_>) -> Option<Declarator<'_>> {
    let mut current = node;
    let mut function = None;
    let mut value = None;
    let mut sizes = Vec::new();
    loop {
        match current.kind() {
            "init_declarator" => {
                value = current.child_by_field_name("value");
                current = current.child_by_field_name("declarator")?;
            }
            "pointer_declarator" => {
                current = current.child_by_field_name("declarator")?;
            }
            "array_declarator" => {
                sizes.extend(current.child_by_field_name("size"));
                current = current.child_by_field_name("declarator")?;
            }
            "reference_declarator" | "parenthesized_declarator" | "attributed_declarator" => {
                current = first_named(current)?;
            }
            "function_declarator" => {
                let inner = current.child_by_field_name("declarator")?;
                if function.is_none() && is_name(inner.kind()) {
                    function = Some(current);
                }
                current = inner;
            }
            kind if is_name(kind) => {
                return Some(Declarator {
                    name: current,
                    function,
                    value,
                    sizes,
                })
            }
            _ => return None,
        }
    }
}

/// Pointer and reference markers of a (possibly abstract) declarator.
fn declarator_suffix(node: Option<Node<'_>>) -> String {
    let mut suffix = String::new();
    let mut current = node;
    while let Some(node) = current {
        let kind = node.kind();
        if kind.contains("pointer_declarator") {
            suffix.push('*');
        } else if kind.contains("reference_declarator") {
            suffix.push('&');
        } else if kind.contains("array_declarator") {
            suffix.push_str("[]");
        }
        current = node
            .child_by_field_name("declarator")
            .or_else(|| first_named(node).filter(|c| c.kind().ends_with("declarator")));
    }
    suffix
}

/// Spelled parameter types, used for display names such as `m(int, const C&)`.
fn parameter_types(params: Node<'_>, here: Here<'_>) -> Vec<String> {
    let mut types = Vec::new();
    for param in named_children(params) {
        match param.kind() {
            "variadic_parameter" => types.push("...".to_string()),
            "parameter_declaration"
            | "optional_parameter_declaration"
            | "variadic_parameter_declaration" => {
                let Some(ty) = param.child_by_field_name("type") else {
                    continue;
                };
                let mut spelled = String::new();
                if named_children(param).any(|c| c.kind() == "type_qualifier") {
                    spelled.push_str("const ");
                }
                spelled.push_str(here.text(ty));
                let suffix = declarator_suffix(param.child_by_field_name("declarator"));
                if !suffix.is_empty() {
                    spelled.push(' ');
                    spelled.push_str(&suffix);
                }
                types.push(spelled);
            }
            _ => {}
        }
    }
    if types.len() == 1 && types[0] == "void" {
        types.clear();
    }
    types
}

fn type_hint(ty: Node<'_>, here: Here<'_>) -> Option<TypeHint> {
    let name = match ty.kind() {
        "type_identifier" => here.text(ty),
        "qualified_identifier" | "template_type" => here.text(name_token(ty)),
        "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier" => {
            here.text(name_token(ty.child_by_field_name("name")?))
        }
        _ => return None,
    };
    Some(TypeHint::Named(name.to_string(), here.scope))
}

fn has_specifier(node: Node<'_>, here: Here<'_>, keyword: &str) -> bool {
    named_children(node)
        .any(|c| c.kind() == "storage_class_specifier" && here.text(c) == keyword)
}
