//! End-to-end scenarios and boundary-behavior properties, exercised against
//! hand-built `scip::types::Index` fixtures and a real on-disk store, the way
//! the donor's own test suite drives `builder.py`/`queries.py` end to end.

use std::io::Write;

use protobuf::{EnumOrUnknown, Message};
use rusqlite::Connection;
use scip::types::{symbol_information::Kind, Document, Index, Metadata, Occurrence, SymbolInformation, SymbolRole};
use tempfile::TempDir;

use scip_atlas::{build, facade, query, verify, BuilderConfig, QueryConfig};

fn def_symbol(name: &str, display: &str, kind: Kind) -> SymbolInformation {
    let mut sym = SymbolInformation::new();
    sym.symbol = name.to_string();
    sym.display_name = display.to_string();
    sym.kind = EnumOrUnknown::new(kind);
    sym
}

fn def_occurrence(symbol: &str, range: [i32; 4]) -> Occurrence {
    let mut occ = Occurrence::new();
    occ.symbol = symbol.to_string();
    occ.range = range.to_vec();
    occ.symbol_roles = SymbolRole::Definition as i32;
    occ
}

fn call_occurrence(symbol: &str, range: [i32; 4], enclosing: [i32; 4]) -> Occurrence {
    let mut occ = Occurrence::new();
    occ.symbol = symbol.to_string();
    occ.range = range.to_vec();
    occ.symbol_roles = SymbolRole::ReadAccess as i32;
    occ.enclosing_range = enclosing.to_vec();
    occ
}

fn write_index_to_store(index: &Index) -> (TempDir, std::path::PathBuf, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let scip_path = dir.path().join("index.scip");
    let db_path = dir.path().join("store.db");
    let mut file = std::fs::File::create(&scip_path).unwrap();
    file.write_all(&index.write_to_bytes().unwrap()).unwrap();
    build(&scip_path, &db_path, &BuilderConfig::default()).unwrap();
    (dir, scip_path, db_path)
}

/// S1-S3: a one-file `example` repository with `UserService#authenticate()`
/// calling `Logger#log()`.
fn example_repository() -> Index {
    let mut index = Index::new();
    index.metadata = protobuf::MessageField::some(Metadata::new());

    let class_sym = "python test `example`/UserService#";
    let method_sym = "python test `example`/UserService#authenticate().";
    let logger_sym = "python test `example`/Logger#log().";

    let mut doc = Document::new();
    doc.relative_path = "src/example.py".to_string();
    doc.language = "python".to_string();
    doc.symbols.push(def_symbol(class_sym, "UserService", Kind::Class));
    doc.symbols.push(def_symbol(method_sym, "authenticate", Kind::Method));
    // authenticate's definition range doubles as the enclosing range callers
    // inside its body are attributed to.
    doc.occurrences.push(def_occurrence(class_sym, [0, 6, 0, 17]));
    doc.occurrences.push(def_occurrence(method_sym, [2, 4, 4, 0]));
    doc.occurrences
        .push(call_occurrence(logger_sym, [3, 8, 3, 11], [2, 4, 4, 0]));
    index.documents.push(doc);

    let mut logger_doc = Document::new();
    logger_doc.relative_path = "src/logger.py".to_string();
    logger_doc.language = "python".to_string();
    logger_doc.symbols.push(def_symbol(logger_sym, "log", Kind::Method));
    logger_doc.occurrences.push(def_occurrence(logger_sym, [0, 8, 0, 11]));
    index.documents.push(logger_doc);

    index
}

#[test]
fn s1_find_definition_on_a_class_name_returns_the_class_row() {
    let (_dir, _scip, db_path) = write_index_to_store(&example_repository());
    let conn = Connection::open(&db_path).unwrap();

    let rows = query::find_definition(&conn, "UserService", true).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].symbol_name, "python test `example`/UserService#");
    assert_eq!(rows[0].file_path, "src/example.py");
    assert_eq!(rows[0].line, 0);
    assert_eq!(rows[0].column, 6);
    assert_eq!(rows[0].kind.as_deref(), Some("Class"));
}

#[test]
fn s2_find_definition_on_a_method_name_locates_its_file_and_line() {
    let (_dir, _scip, db_path) = write_index_to_store(&example_repository());
    let conn = Connection::open(&db_path).unwrap();

    let rows = query::find_definition(&conn, "authenticate", true).unwrap();
    assert!(rows.iter().any(|r| r.symbol_name.contains("authenticate")
        && r.file_path == "src/example.py"
        && r.line == 2));
}

#[test]
fn s3_dependencies_of_authenticate_include_the_logger_call() {
    let (_dir, _scip, db_path) = write_index_to_store(&example_repository());
    let conn = Connection::open(&db_path).unwrap();

    let authenticate_id = facade::symbol_id_for_name(&conn, "python test `example`/UserService#authenticate().")
        .unwrap()
        .expect("authenticate must resolve to a symbol id");

    let deps = query::get_dependencies(&conn, authenticate_id, 1, true).unwrap();
    assert!(deps.iter().any(|d| {
        d.symbol_name.contains("Logger")
            && matches!(d.relationship.as_str(), "calls" | "import" | "reference")
    }));
}

/// S4: a three-symbol chain `methodA -> methodB -> methodC`.
#[test]
fn s4_trace_call_chain_follows_a_three_symbol_chain() {
    let mut index = Index::new();
    index.metadata = protobuf::MessageField::some(Metadata::new());

    let a = "python test `test`/Service#methodA().";
    let b = "python test `test`/Service#methodB().";
    let c = "python test `test`/Service#methodC().";

    let mut doc = Document::new();
    doc.relative_path = "test.py".to_string();
    doc.language = "python".to_string();
    doc.symbols.push(def_symbol(a, "methodA", Kind::Method));
    doc.symbols.push(def_symbol(b, "methodB", Kind::Method));
    doc.symbols.push(def_symbol(c, "methodC", Kind::Method));

    doc.occurrences.push(def_occurrence(a, [0, 4, 2, 0]));
    doc.occurrences.push(def_occurrence(b, [2, 4, 4, 0]));
    doc.occurrences.push(def_occurrence(c, [4, 4, 6, 0]));
    // methodA's body calls methodB; methodB's body calls methodC.
    doc.occurrences.push(call_occurrence(b, [1, 4, 1, 11], [0, 4, 2, 0]));
    doc.occurrences.push(call_occurrence(c, [3, 4, 3, 11], [2, 4, 4, 0]));
    index.documents.push(doc);

    let (_dir, _scip, db_path) = write_index_to_store(&index);
    let conn = Connection::open(&db_path).unwrap();

    let chains = facade::trace_call_chain(&conn, a, c, 5, 100, &QueryConfig::default(), true).unwrap();
    assert_eq!(chains.len(), 1);
    assert_eq!(chains[0].length, 2);
    assert_eq!(chains[0].path, vec![a.to_string(), b.to_string(), c.to_string()]);
}

/// S5: an unreachable pair returns an empty list, not an error.
#[test]
fn s5_trace_call_chain_between_unreachable_symbols_is_empty() {
    let mut index = Index::new();
    index.metadata = protobuf::MessageField::some(Metadata::new());

    let unreachable_a = "python test `iso`/UnreachableA().";
    let unreachable_b = "python test `iso`/UnreachableB().";

    let mut doc = Document::new();
    doc.relative_path = "iso.py".to_string();
    doc.language = "python".to_string();
    doc.symbols.push(def_symbol(unreachable_a, "UnreachableA", Kind::Function));
    doc.symbols.push(def_symbol(unreachable_b, "UnreachableB", Kind::Function));
    doc.occurrences.push(def_occurrence(unreachable_a, [0, 4, 0, 16]));
    doc.occurrences.push(def_occurrence(unreachable_b, [2, 4, 2, 16]));
    index.documents.push(doc);

    let (_dir, _scip, db_path) = write_index_to_store(&index);
    let conn = Connection::open(&db_path).unwrap();

    let chains = facade::trace_call_chain(
        &conn,
        unreachable_a,
        unreachable_b,
        5,
        100,
        &QueryConfig::default(),
        true,
    )
    .unwrap();
    assert!(chains.is_empty());
}

/// S6: an `AbstractMethod` gets a synthetic `calls` edge to its `Impl` match.
#[test]
fn s6_synthetic_interface_to_impl_edge_is_materialized() {
    let mut index = Index::new();
    index.metadata = protobuf::MessageField::some(Metadata::new());

    let abstract_sym = "com/example/service/UserService#findById().";
    let impl_sym = "com/example/service/impl/UserServiceImpl#findById().";

    let mut doc = Document::new();
    doc.relative_path = "UserService.java".to_string();
    doc.language = "java".to_string();
    doc.symbols.push(def_symbol(abstract_sym, "findById", Kind::AbstractMethod));
    doc.occurrences.push(def_occurrence(abstract_sym, [0, 4, 0, 12]));
    index.documents.push(doc);

    let mut impl_doc = Document::new();
    impl_doc.relative_path = "impl/UserServiceImpl.java".to_string();
    impl_doc.language = "java".to_string();
    impl_doc.symbols.push(def_symbol(impl_sym, "findById", Kind::Method));
    impl_doc.occurrences.push(def_occurrence(impl_sym, [0, 4, 0, 12]));
    index.documents.push(impl_doc);

    let (_dir, _scip, db_path) = write_index_to_store(&index);
    let conn = Connection::open(&db_path).unwrap();

    let (occurrence_id, relationship): (Option<i64>, String) = conn
        .query_row(
            "SELECT cg.occurrence_id, cg.relationship \
             FROM call_graph cg \
             JOIN symbols s1 ON cg.caller_symbol_id = s1.id \
             JOIN symbols s2 ON cg.callee_symbol_id = s2.id \
             WHERE s1.name = ?1 AND s2.name = ?2",
            [abstract_sym, impl_sym],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();

    assert_eq!(occurrence_id, None);
    assert_eq!(relationship, "calls");
}

/// Property 9: when a name matches both a class and a method, only the
/// class rows survive.
#[test]
fn property_9_class_priority_filter() {
    let mut index = Index::new();
    index.metadata = protobuf::MessageField::some(Metadata::new());

    // "Widget" names both a class and an unrelated top-level function.
    let class_sym = "python test `p`/Widget#";
    let function_sym = "python test `p`/Widget().";

    let mut doc = Document::new();
    doc.relative_path = "widget.py".to_string();
    doc.language = "python".to_string();
    doc.symbols.push(def_symbol(class_sym, "Widget", Kind::Class));
    doc.symbols.push(def_symbol(function_sym, "Widget", Kind::Function));
    doc.occurrences.push(def_occurrence(class_sym, [0, 6, 0, 12]));
    doc.occurrences.push(def_occurrence(function_sym, [5, 4, 5, 10]));
    index.documents.push(doc);

    let (_dir, _scip, db_path) = write_index_to_store(&index);
    let conn = Connection::open(&db_path).unwrap();

    let rows = query::find_definition(&conn, "Widget", true).unwrap();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|r| r.kind.as_deref() == Some("Class")));
}

/// Property 10: depth=1 dependencies are a subset of depth=10 dependencies.
#[test]
fn property_10_shallow_dependencies_are_a_subset_of_deep_dependencies() {
    let mut index = Index::new();
    index.metadata = protobuf::MessageField::some(Metadata::new());

    let a = "python test `d`/Chain#a().";
    let b = "python test `d`/Chain#b().";
    let c = "python test `d`/Chain#c().";

    let mut doc = Document::new();
    doc.relative_path = "chain.py".to_string();
    doc.language = "python".to_string();
    doc.symbols.push(def_symbol(a, "a", Kind::Method));
    doc.symbols.push(def_symbol(b, "b", Kind::Method));
    doc.symbols.push(def_symbol(c, "c", Kind::Method));
    doc.occurrences.push(def_occurrence(a, [0, 4, 2, 0]));
    doc.occurrences.push(def_occurrence(b, [2, 4, 4, 0]));
    doc.occurrences.push(def_occurrence(c, [4, 4, 6, 0]));
    doc.occurrences.push(call_occurrence(b, [1, 4, 1, 5], [0, 4, 2, 0]));
    doc.occurrences.push(call_occurrence(c, [3, 4, 3, 5], [2, 4, 4, 0]));
    index.documents.push(doc);

    let (_dir, _scip, db_path) = write_index_to_store(&index);
    let conn = Connection::open(&db_path).unwrap();

    let a_id = facade::symbol_id_for_name(&conn, a).unwrap().unwrap();
    let shallow = query::get_dependencies(&conn, a_id, 1, true).unwrap();
    let deep = query::get_dependencies(&conn, a_id, 10, true).unwrap();

    let deep_names: std::collections::HashSet<_> = deep.iter().map(|d| d.symbol_name.clone()).collect();
    assert!(!shallow.is_empty());
    assert!(shallow.iter().all(|d| deep_names.contains(&d.symbol_name)));
    assert!(deep.len() >= shallow.len());
}

/// Property 11: traceCallChain never explores past depth 3, even when a
/// longer chain exists and a higher depth is requested.
#[test]
fn property_11_trace_call_chain_caps_at_depth_three() {
    let mut index = Index::new();
    index.metadata = protobuf::MessageField::some(Metadata::new());

    let names: Vec<String> = (0..6)
        .map(|i| format!("python test `d`/Chain#m{i}()."))
        .collect();

    let mut doc = Document::new();
    doc.relative_path = "long_chain.py".to_string();
    doc.language = "python".to_string();
    for (i, name) in names.iter().enumerate() {
        doc.symbols.push(def_symbol(name, &format!("m{i}"), Kind::Method));
        let line = (i * 2) as i32;
        doc.occurrences.push(def_occurrence(name, [line, 4, line + 2, 0]));
    }
    for i in 0..names.len() - 1 {
        let line = (i * 2 + 1) as i32;
        let enclosing_line = (i * 2) as i32;
        doc.occurrences.push(call_occurrence(
            &names[i + 1],
            [line, 4, line, 5],
            [enclosing_line, 4, enclosing_line + 2, 0],
        ));
    }
    index.documents.push(doc);

    let (_dir, _scip, db_path) = write_index_to_store(&index);
    let conn = Connection::open(&db_path).unwrap();

    let chains =
        facade::trace_call_chain(&conn, &names[0], &names[5], 10, 100, &QueryConfig::default(), true).unwrap();
    assert!(chains.is_empty(), "a chain of length 5 must not surface under the depth-3 cap");
}

/// Property 12: an empty repository index yields zero rows everywhere and a
/// passing verification.
#[test]
fn property_12_empty_repository_yields_zero_rows_and_passes_verification() {
    let mut index = Index::new();
    index.metadata = protobuf::MessageField::some(Metadata::new());

    let dir = TempDir::new().unwrap();
    let scip_path = dir.path().join("empty.scip");
    let db_path = dir.path().join("empty.db");
    let mut file = std::fs::File::create(&scip_path).unwrap();
    file.write_all(&index.write_to_bytes().unwrap()).unwrap();

    let stats = build(&scip_path, &db_path, &BuilderConfig::default()).unwrap();
    assert_eq!(stats.symbols, 0);
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.occurrences, 0);
    assert_eq!(stats.call_graph_edges, 0);

    let report = verify(&db_path, &scip_path).unwrap();
    assert!(report.passed);
    assert_eq!(report.total_errors, 0);
}

/// Property 7/8: building the same index twice yields identical counts, and
/// a freshly built store always verifies clean.
#[test]
fn property_7_and_8_rebuild_is_idempotent_and_passes_verification() {
    let index = example_repository();
    let dir = TempDir::new().unwrap();
    let scip_path = dir.path().join("index.scip");
    let db_path = dir.path().join("store.db");
    let mut file = std::fs::File::create(&scip_path).unwrap();
    file.write_all(&index.write_to_bytes().unwrap()).unwrap();

    let first = build(&scip_path, &db_path, &BuilderConfig::default()).unwrap();
    let report_one = verify(&db_path, &scip_path).unwrap();
    assert!(report_one.passed);

    let second = build(&scip_path, &db_path, &BuilderConfig::default()).unwrap();
    let report_two = verify(&db_path, &scip_path).unwrap();
    assert!(report_two.passed);

    assert_eq!(first.symbols, second.symbols);
    assert_eq!(first.documents, second.documents);
    assert_eq!(first.occurrences, second.occurrences);
    assert_eq!(first.symbol_references, second.symbol_references);
    assert_eq!(first.call_graph_edges, second.call_graph_edges);
}
