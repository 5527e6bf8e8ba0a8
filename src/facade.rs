//! Backend Facade (spec §4.6): name-based entry points over the Query
//! Engine's ID-based operations, plus class-to-methods expansion and
//! dedup/truncation of the results returned to a caller.
//!
//! No single donor file owns this surface (the spec's distillation folded
//! a thin wrapper layer the original callers implemented ad hoc into one
//! named component); it composes `query.rs` and `verify.rs` the way
//! `builder.py`/`queries.py` are composed by their own external callers.

use std::collections::HashSet;

use rusqlite::Connection;

use crate::config::QueryConfig;
use crate::error::{CoreError, Result};
use crate::query::{self, CallChain, DependencyEdge, ImpactedFile, Location};

/// Resolve a symbol name to every matching symbol id. A name that denotes a
/// class expands to the class id plus every method id nested under it
/// (`Name#method()` style), mirroring the CTEs in `get_dependencies_hybrid`.
fn resolve_symbol_ids(conn: &Connection, symbol_name: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM symbols WHERE name = ?1")?;
    let direct: Vec<i64> = stmt
        .query_map([symbol_name], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    if direct.is_empty() {
        return Ok(Vec::new());
    }

    let mut ids: HashSet<i64> = direct.into_iter().collect();
    if symbol_name.ends_with('#') {
        let like = format!("{symbol_name}%()%");
        let mut stmt = conn.prepare("SELECT id FROM symbols WHERE name LIKE ?1")?;
        let methods: Vec<i64> = stmt.query_map([like], |r| r.get(0))?.collect::<rusqlite::Result<_>>()?;
        ids.extend(methods);
    }

    Ok(ids.into_iter().collect())
}

fn dedup_locations(mut locations: Vec<Location>, limit: Option<usize>) -> Vec<Location> {
    let mut seen = HashSet::new();
    locations.retain(|loc| seen.insert((loc.symbol_name.clone(), loc.file_path.clone(), loc.line, loc.column)));
    if let Some(limit) = limit {
        locations.truncate(limit);
    }
    locations
}

/// `findDefinition`: name to `Location`s.
pub fn find_definition(conn: &Connection, symbol_name: &str, exact: bool, limit: Option<usize>) -> Result<Vec<Location>> {
    let locations = query::find_definition(conn, symbol_name, exact)?;
    Ok(dedup_locations(locations, limit))
}

/// `findReferences`: name to `Location`s.
pub fn find_references(
    conn: &Connection,
    symbol_name: &str,
    limit: i64,
    role_filter: Option<i32>,
    exact: bool,
) -> Result<Vec<Location>> {
    let locations = query::find_references(conn, symbol_name, limit, role_filter, exact)?;
    Ok(dedup_locations(locations, None))
}

fn dedup_edges(mut edges: Vec<DependencyEdge>) -> Vec<DependencyEdge> {
    let mut seen = HashSet::new();
    edges.retain(|e| seen.insert((e.symbol_name.clone(), e.file_path.clone(), e.line, e.column)));
    edges
}

/// `getDependencies`: name to ID resolution (with class-to-methods
/// expansion) dispatched across every matching id, deduplicated.
pub fn get_dependencies(
    conn: &Connection,
    symbol_name: &str,
    depth: i64,
    use_hybrid: bool,
) -> Result<Vec<DependencyEdge>> {
    let ids = resolve_symbol_ids(conn, symbol_name)?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut all = Vec::new();
    for id in ids {
        all.extend(query::get_dependencies(conn, id, depth, use_hybrid)?);
    }
    Ok(dedup_edges(all))
}

/// `getDependents`: same expansion/dedup shape as `getDependencies`.
pub fn get_dependents(
    conn: &Connection,
    symbol_name: &str,
    depth: i64,
    use_hybrid: bool,
) -> Result<Vec<DependencyEdge>> {
    let ids = resolve_symbol_ids(conn, symbol_name)?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut all = Vec::new();
    for id in ids {
        all.extend(query::get_dependents(conn, id, depth, use_hybrid)?);
    }
    Ok(dedup_edges(all))
}

/// `analyzeImpact`: convenience wrapper over `getDependents`, grouped by
/// file and ranked by how many distinct symbols each file contains.
pub fn analyze_impact(
    conn: &Connection,
    symbol_name: &str,
    depth: i64,
    use_hybrid: bool,
) -> Result<Vec<ImpactedFile>> {
    let ids = resolve_symbol_ids(conn, symbol_name)?;
    let Some(&id) = ids.first() else {
        return Ok(Vec::new());
    };
    query::analyze_impact(conn, id, depth, use_hybrid)
}

/// `traceCallChain`: resolves both endpoints by name, then dispatches the
/// cross product of matching ids through the Query Engine, deduplicating
/// chains by their path.
pub fn trace_call_chain(
    conn: &Connection,
    from_symbol_name: &str,
    to_symbol_name: &str,
    max_depth: i64,
    limit: i64,
    config: &QueryConfig,
    use_hybrid: bool,
) -> Result<Vec<CallChain>> {
    let from_ids = resolve_symbol_ids(conn, from_symbol_name)?;
    let to_ids = resolve_symbol_ids(conn, to_symbol_name)?;
    if from_ids.is_empty() || to_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut all = Vec::new();
    for &from_id in &from_ids {
        for &to_id in &to_ids {
            all.extend(query::trace_call_chain(
                conn, from_id, to_id, max_depth, limit, config, use_hybrid,
            )?);
        }
    }

    let mut seen = HashSet::new();
    all.retain(|chain| seen.insert(chain.path.join("|||")));
    all.sort_by_key(|c| c.length);
    if limit > 0 {
        all.truncate(limit as usize);
    }
    Ok(all)
}

/// Serialize any of this module's result types to the JSON string the
/// embedding application receives, matching the teacher's own
/// `serde_json::to_string`-at-the-boundary convention for command output.
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| CoreError::StorageError(e.into()))
}

/// Look up a single symbol's database id by its exact name, used by
/// callers that already have the ID-based Query Engine's output and want
/// to round-trip into another name-based call.
pub fn symbol_id_for_name(conn: &Connection, symbol_name: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM symbols WHERE name = ?1",
        [symbol_name],
        |r| r.get(0),
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(CoreError::from(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::create_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn resolve_symbol_ids_expands_class_to_its_methods() {
        let conn = setup();
        conn.execute("INSERT INTO symbols (id, name) VALUES (1, 'test/Foo#')", []).unwrap();
        conn.execute("INSERT INTO symbols (id, name) VALUES (2, 'test/Foo#bar().')", []).unwrap();
        conn.execute("INSERT INTO symbols (id, name) VALUES (3, 'test/Other#')", []).unwrap();

        let ids = resolve_symbol_ids(&conn, "test/Foo#").unwrap();
        let mut sorted = ids;
        sorted.sort();
        assert_eq!(sorted, vec![1, 2]);
    }

    #[test]
    fn missing_symbol_name_resolves_to_no_ids() {
        let conn = setup();
        let ids = resolve_symbol_ids(&conn, "nope").unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn to_json_serializes_a_location() {
        let loc = Location {
            symbol_name: "test/Foo#".to_string(),
            file_path: "a.py".to_string(),
            line: 3,
            column: 0,
            kind: Some("Class".to_string()),
            role: 1,
        };
        let json = to_json(&loc).unwrap();
        assert!(json.contains("\"symbol_name\":\"test/Foo#\""));
    }
}
