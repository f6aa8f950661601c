//! End-to-end indexing scenarios over scripted translation units.
//!
//! Each scenario registers hand-built units with a `ScriptedFrontend`, runs
//! them through the `Indexer` and inspects the shared graph:
//! - Macro expansions attached to definitions in another file
//! - Forward-declared records collapsing onto their definition
//! - Method references landing on the in-class declaration, in any file order
//! - Use-before-declaration within one file
//! - Location uniqueness and re-indexing without graph growth
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package cxgraph-core --test indexing_scenarios
//! ```

mod common;

use std::fs::File;
use std::time::{Duration, SystemTime};

use common::{assert_unique_locations, cursor, defining, target_at, Fixture};
use cxgraph_core::{
    ArenaUnit, Category, CompileArgs, CursorId, CursorKind, FileOutcome, PreambleConfig,
    ScriptedFrontend, SourceJob,
};
use pretty_assertions::assert_eq;

// ============================================================================
// Test Helpers
// ============================================================================

/// `b.c` includes `a.h` (which defines `FOO` on line 3) and expands `FOO`
/// on line 10.
fn macro_unit(fixture: &Fixture) -> ArenaUnit {
    fixture.write("a.h", "\n\n#define FOO 42\n");
    let file = fixture.write("b.c", "#include \"a.h\"\n");
    let mut unit = ArenaUnit::new(&file);
    let root = unit.root_id();
    unit.add_inclusion(fixture.path("a.h"), 1);
    unit.push(root, cursor(CursorKind::InclusionDirective, "a.h", fixture.at("b.c", 1, 1)));
    unit.push(root, defining(CursorKind::MacroDefinition, "FOO", fixture.at("a.h", 3, 9)));
    let main = unit.push(root, defining(CursorKind::FunctionDecl, "main", fixture.at("b.c", 8, 5)));
    unit.push(main, cursor(CursorKind::CompoundStmt, "", fixture.at("b.c", 8, 16)));
    unit.push(root, cursor(CursorKind::MacroExpansion, "FOO", fixture.at("b.c", 10, 12)));
    unit
}

/// `y.c` uses class `C`, forward-declared at `x.h:5` and defined at `x.h:20`.
fn forward_unit(fixture: &Fixture) -> ArenaUnit {
    fixture.write("x.h", "class C;\n");
    let file = fixture.write("y.c", "#include \"x.h\"\n");
    let mut unit = ArenaUnit::new(&file);
    let root = unit.root_id();
    unit.add_inclusion(fixture.path("x.h"), 1);
    let forward = unit.push(root, cursor(CursorKind::ClassDecl, "C", fixture.at("x.h", 5, 7)));
    let definition = unit.push(root, defining(CursorKind::ClassDecl, "C", fixture.at("x.h", 20, 7)));
    unit.push(definition, cursor(CursorKind::FieldDecl, "n", fixture.at("x.h", 21, 9)));
    unit.set_definition(forward, definition);

    let var = unit.push(root, defining(CursorKind::VarDecl, "c", fixture.at("y.c", 7, 3)));
    let use_site = unit.push(var, cursor(CursorKind::TypeRef, "C", fixture.at("y.c", 7, 1)));
    unit.set_referenced(use_site, definition);
    unit
}

/// Class `C` from `c.h` with method `m` declared on line 8.
fn method_header(fixture: &Fixture, unit: &mut ArenaUnit) -> (CursorId, CursorId) {
    let root = unit.root_id();
    unit.add_inclusion(fixture.path("c.h"), 1);
    let class = unit.push(root, defining(CursorKind::ClassDecl, "C", fixture.at("c.h", 3, 7)));
    let declaration = unit.push(
        class,
        cursor(CursorKind::CxxMethod, "m", fixture.at("c.h", 8, 10)).with_display_name("m()"),
    );
    (class, declaration)
}

/// `c.cpp` calls `C::m` on line 2 and defines it out of line on line 4. The
/// call names the definition.
fn definition_unit(fixture: &Fixture) -> ArenaUnit {
    fixture.write("c.h", "class C {\n};\n");
    let file = fixture.write("c.cpp", "#include \"c.h\"\n");
    let mut unit = ArenaUnit::new(&file);
    let (class, _) = method_header(fixture, &mut unit);
    let root = unit.root_id();

    let helper = unit.push(root, defining(CursorKind::FunctionDecl, "helper", fixture.at("c.cpp", 2, 6)));
    let body = unit.push(helper, cursor(CursorKind::CompoundStmt, "", fixture.at("c.cpp", 2, 19)));
    let call = unit.push(body, cursor(CursorKind::CallExpr, "m", fixture.at("c.cpp", 2, 21)));
    let member = unit.push(call, cursor(CursorKind::MemberRefExpr, "m", fixture.at("c.cpp", 2, 23)));

    let definition = unit.push(
        root,
        defining(CursorKind::CxxMethod, "m", fixture.at("c.cpp", 4, 9)).with_display_name("m()"),
    );
    unit.set_semantic_parent(definition, class);
    let type_ref = unit.push(definition, cursor(CursorKind::TypeRef, "C", fixture.at("c.cpp", 4, 6)));
    unit.set_referenced(type_ref, class);
    unit.push(definition, cursor(CursorKind::CompoundStmt, "", fixture.at("c.cpp", 4, 13)));

    unit.set_referenced(member, definition);
    unit
}

/// `d.cpp` calls `m` on line 1 through the declaration.
fn caller_unit(fixture: &Fixture) -> ArenaUnit {
    fixture.write("c.h", "class C {\n};\n");
    let file = fixture.write("d.cpp", "void use(C &c) { c.m(); }\n");
    let mut unit = ArenaUnit::new(&file);
    let (_, declaration) = method_header(fixture, &mut unit);
    let root = unit.root_id();

    let function = unit.push(root, defining(CursorKind::FunctionDecl, "use", fixture.at("d.cpp", 1, 6)));
    let body = unit.push(function, cursor(CursorKind::CompoundStmt, "", fixture.at("d.cpp", 1, 16)));
    let call = unit.push(body, cursor(CursorKind::CallExpr, "m", fixture.at("d.cpp", 1, 18)));
    let member = unit.push(call, cursor(CursorKind::MemberRefExpr, "m", fixture.at("d.cpp", 1, 20)));
    unit.set_referenced(member, declaration);
    unit
}

fn scripted(units: Vec<ArenaUnit>) -> ScriptedFrontend {
    units
        .into_iter()
        .fold(ScriptedFrontend::new(), |frontend, unit| frontend.with_unit(unit))
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_macro_expansion_attaches_to_header_definition() {
    let fixture = Fixture::new();
    let indexer = fixture.indexer(scripted(vec![macro_unit(&fixture)]), PreambleConfig::disabled());

    let summary = indexer.index_files(&[fixture.job("b.c")]);
    assert_eq!(summary.indexed(), 1);

    let graph = indexer.graph().read();
    let definition = graph.node_at(&fixture.loc("a.h", 3, 9)).unwrap();
    assert_eq!(graph.node(definition).unwrap().category, Category::MacroDefinition);

    let expansion = graph.node_at(&fixture.loc("b.c", 10, 12)).unwrap();
    assert_eq!(graph.node(expansion).unwrap().category, Category::Reference);
    assert_eq!(graph.parent(expansion), Some(definition));
    assert_eq!(graph.references_to(definition), vec![expansion]);
}

#[test]
fn test_forward_declared_class_resolves_to_definition() {
    let fixture = Fixture::new();
    let indexer = fixture.indexer(scripted(vec![forward_unit(&fixture)]), PreambleConfig::disabled());
    indexer.index_files(&[fixture.job("y.c")]);

    let graph = indexer.graph().read();
    let definition = fixture.loc("x.h", 20, 7);
    assert_eq!(target_at(&graph, &fixture.loc("y.c", 7, 1)), Some(definition.clone()));

    // The forward declaration itself hangs off the definition.
    assert_eq!(target_at(&graph, &fixture.loc("x.h", 5, 7)), Some(definition.clone()));
    let def_idx = graph.node_at(&definition).unwrap();
    assert_eq!(graph.node(def_idx).unwrap().category, Category::Class);
    assert_eq!(graph.references_to(def_idx).len(), 2);
}

#[test]
fn test_method_references_land_on_declaration_in_either_order() {
    for order in [["c.cpp", "d.cpp"], ["d.cpp", "c.cpp"]] {
        let fixture = Fixture::new();
        let frontend = scripted(vec![definition_unit(&fixture), caller_unit(&fixture)]);
        let indexer = fixture.indexer(frontend, PreambleConfig::disabled());

        for name in order {
            let outcome = indexer.index_file(&fixture.job(name));
            assert!(matches!(outcome, FileOutcome::Indexed(_)), "{:?}", order);
        }

        let graph = indexer.graph().read();
        let declaration = fixture.loc("c.h", 8, 10);
        assert_eq!(
            target_at(&graph, &fixture.loc("d.cpp", 1, 20)),
            Some(declaration.clone()),
            "{:?}",
            order
        );
        assert_eq!(
            target_at(&graph, &fixture.loc("c.cpp", 2, 23)),
            Some(declaration.clone()),
            "{:?}",
            order
        );

        let class = graph.node_at(&fixture.loc("c.h", 3, 7)).unwrap();
        let definition = graph.node_at(&fixture.loc("c.cpp", 4, 9)).unwrap();
        let decl_idx = graph.node_at(&declaration).unwrap();
        assert_eq!(graph.parent(definition), Some(class));
        assert_eq!(graph.linked_declaration(definition), Some(decl_idx));
        assert_eq!(
            graph.node(definition).unwrap().category,
            Category::MethodDefinition
        );
        assert_unique_locations(&graph);
    }
}

#[test]
fn test_use_before_declaration_resolves() {
    let fixture = Fixture::new();
    let file = fixture.write("e.c", "void user(void) { later(); }\nvoid later(void) {}\n");
    let mut unit = ArenaUnit::new(&file);
    let root = unit.root_id();
    let user = unit.push(root, defining(CursorKind::FunctionDecl, "user", fixture.at("e.c", 1, 6)));
    let body = unit.push(user, cursor(CursorKind::CompoundStmt, "", fixture.at("e.c", 1, 17)));
    let call = unit.push(body, cursor(CursorKind::CallExpr, "later", fixture.at("e.c", 1, 19)));
    let use_site = unit.push(call, cursor(CursorKind::DeclRefExpr, "later", fixture.at("e.c", 1, 19)));
    let later = unit.push(root, defining(CursorKind::FunctionDecl, "later", fixture.at("e.c", 2, 6)));
    unit.set_referenced(use_site, later);

    let indexer = fixture.indexer(scripted(vec![unit]), PreambleConfig::disabled());
    let outcome = indexer.index_file(&fixture.job("e.c"));
    let FileOutcome::Indexed(report) = outcome else {
        panic!("e.c was not indexed: {:?}", outcome);
    };
    assert_eq!(report.build.declarations, 2);
    assert_eq!(report.resolve.created, 1);

    let graph = indexer.graph().read();
    assert_eq!(
        target_at(&graph, &fixture.loc("e.c", 1, 19)),
        Some(fixture.loc("e.c", 2, 6))
    );
}

#[test]
fn test_nested_references_are_swept() {
    let fixture = Fixture::new();
    let file = fixture.write("t.cpp", "template <class T> struct Box {};\nstruct Item {};\nBox<Item> b;\n");
    let mut unit = ArenaUnit::new(&file);
    let root = unit.root_id();
    let template = unit.push(root, defining(CursorKind::ClassTemplate, "Box", fixture.at("t.cpp", 1, 27)));
    let item = unit.push(root, defining(CursorKind::StructDecl, "Item", fixture.at("t.cpp", 2, 8)));
    let var = unit.push(root, defining(CursorKind::VarDecl, "b", fixture.at("t.cpp", 3, 11)));
    let template_ref = unit.push(var, cursor(CursorKind::TemplateRef, "Box", fixture.at("t.cpp", 3, 1)));
    let type_ref = unit.push(template_ref, cursor(CursorKind::TypeRef, "Item", fixture.at("t.cpp", 3, 5)));
    unit.set_referenced(template_ref, template);
    unit.set_referenced(type_ref, item);

    let indexer = fixture.indexer(scripted(vec![unit]), PreambleConfig::disabled());
    indexer.index_file(&fixture.job("t.cpp"));

    let graph = indexer.graph().read();
    assert_eq!(
        target_at(&graph, &fixture.loc("t.cpp", 3, 1)),
        Some(fixture.loc("t.cpp", 1, 27))
    );
    assert_eq!(
        target_at(&graph, &fixture.loc("t.cpp", 3, 5)),
        Some(fixture.loc("t.cpp", 2, 8))
    );
}

// ============================================================================
// Invariants
// ============================================================================

#[test]
fn test_parallel_index_keeps_locations_unique() {
    let fixture = Fixture::new();
    let frontend = scripted(vec![
        macro_unit(&fixture),
        forward_unit(&fixture),
        definition_unit(&fixture),
        caller_unit(&fixture),
    ]);
    let indexer = fixture.indexer(frontend, PreambleConfig::disabled());
    let jobs: Vec<SourceJob> = ["b.c", "y.c", "c.cpp", "d.cpp"]
        .iter()
        .map(|name| fixture.job(name))
        .collect();

    let summary = indexer.index_files(&jobs);
    assert_eq!(summary.indexed(), 4);
    assert_eq!(summary.failed(), 0);

    let graph = indexer.graph().read();
    assert_unique_locations(&graph);
    // One class from c.h shared by c.cpp and d.cpp, one from x.h.
    let classes: Vec<_> = graph
        .find_by_name("C")
        .into_iter()
        .filter(|&idx| graph.node(idx).unwrap().category == Category::Class)
        .collect();
    assert_eq!(classes.len(), 2);
}

#[test]
fn test_reindex_does_not_grow_graph() {
    let fixture = Fixture::new();
    let frontend = scripted(vec![definition_unit(&fixture), caller_unit(&fixture)]);
    let indexer = fixture.indexer(frontend, PreambleConfig::disabled());
    let jobs = [fixture.job("c.cpp"), fixture.job("d.cpp")];

    let first = indexer.index_files(&jobs);
    assert_eq!(first.indexed(), 2);
    let count = indexer.graph().read().node_count();

    // Unchanged file and options: not parsed again.
    let second = indexer.index_files(&jobs);
    assert_eq!(second.up_to_date(), 2);
    assert_eq!(indexer.frontend().parse_count(), 2);

    // Forced, new options, and a touched file: parsed again, nothing added.
    let forced = indexer.reindex_files(&jobs);
    assert_eq!(forced.indexed(), 2);
    assert_eq!(forced.nodes_added(), 0);

    let path = fixture.path("c.cpp");
    let changed_options = SourceJob::new(
        &path,
        CompileArgs::for_file(&path).with_define("EXTRA=1"),
    );
    assert!(matches!(indexer.index_file(&changed_options), FileOutcome::Indexed(_)));

    File::options()
        .write(true)
        .open(fixture.path("d.cpp"))
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();
    let touched = indexer.index_files(&[fixture.job("d.cpp")]);
    assert_eq!(touched.indexed(), 1);
    assert_eq!(touched.nodes_added(), 0);

    let graph = indexer.graph().read();
    assert_eq!(graph.node_count(), count);
    assert_unique_locations(&graph);
}

#[test]
fn test_query_surface() {
    let fixture = Fixture::new();
    let frontend = scripted(vec![definition_unit(&fixture), caller_unit(&fixture)]);
    let indexer = fixture.indexer(frontend, PreambleConfig::disabled());
    indexer.index_files(&[fixture.job("c.cpp"), fixture.job("d.cpp")]);

    let graph = indexer.graph().read();
    let categories: Vec<Category> = graph
        .outline(&fixture.path("c.h"))
        .into_iter()
        .map(|idx| graph.node(idx).unwrap().category)
        .collect();
    assert_eq!(categories, vec![Category::Class, Category::MethodDeclaration]);

    let named_m = graph.find_by_name("m");
    assert_eq!(named_m.len(), 4);

    let declaration = graph.node_at(&fixture.loc("c.h", 8, 10)).unwrap();
    assert_eq!(graph.references_to(declaration).len(), 2);
    assert_eq!(indexer.dependencies(&fixture.path("d.cpp")), vec![fixture.path("c.h")]);
}
