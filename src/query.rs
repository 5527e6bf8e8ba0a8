//! Query Engine (spec §4.4): findDefinition, findReferences,
//! getDependencies, getDependents, traceCallChain.
//!
//! Grounded in `queries.py`. `traceCallChain` prefers the `call_graph`
//! bidirectional-BFS recursive CTE when that table has rows, falling back
//! to a symbol-name-driven BFS over `getDependencies` otherwise (the donor's
//! pre-`call_graph` legacy path, kept per SPEC_FULL.md §10.5).

use std::collections::{HashSet, VecDeque};
use std::sync::mpsc;
use std::thread;

use rusqlite::{params, Connection};
use tracing::warn;

use crate::config::QueryConfig;
use crate::error::{CoreError, Result};

/// One hit from `findDefinition` or `findReferences`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Location {
    pub symbol_name: String,
    pub file_path: String,
    pub line: i32,
    pub column: i32,
    pub kind: Option<String>,
    pub role: i32,
}

/// One hit from `getDependencies`/`getDependents`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DependencyEdge {
    pub symbol_name: String,
    pub file_path: String,
    pub line: i32,
    pub column: i32,
    pub kind: Option<String>,
    pub depth: i64,
    pub relationship: String,
}

/// One path from `traceCallChain`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CallChain {
    pub path: Vec<String>,
    pub length: i64,
    pub has_cycle: bool,
}

fn is_full_scip_symbol(name: &str) -> bool {
    const SCHEMES: &[&str] = &[
        "python ", "java ", "typescript ", "go ", "rust ", "cpp ", "csharp ", "ruby ",
    ];
    SCHEMES.iter().any(|scheme| name.starts_with(scheme))
}

fn sanitize_fts_query(input: &str) -> String {
    input.replace('"', "\"\"")
}

/// `queries.py::find_definition`, with the two post-filters §4.4 adds on
/// top of the FTS/LIKE candidate set: drop parameter-definition noise
/// (symbol names containing the literal `().(`), and when a class
/// definition is present among a simple-name query's results, keep only
/// the class rows.
pub fn find_definition(conn: &Connection, symbol_name: &str, exact: bool) -> Result<Vec<Location>> {
    let safe = sanitize_fts_query(symbol_name);

    let rows = if !exact {
        find_by_like(conn, &format!("%{symbol_name}%"))?
    } else if is_full_scip_symbol(symbol_name) {
        find_exact_name(conn, symbol_name)?
    } else {
        let (fts_pattern, like_pattern) = if symbol_name.contains('#') {
            let base = symbol_name.strip_suffix("()").unwrap_or(symbol_name);
            (format!("\"/{safe}\""), format!("%/{base}()%"))
        } else {
            (format!("\"/{safe}#\""), format!("%/{symbol_name}#"))
        };
        find_fts(conn, &fts_pattern, &like_pattern)?
    };

    Ok(apply_definition_post_filters(rows))
}

fn apply_definition_post_filters(rows: Vec<Location>) -> Vec<Location> {
    let rows: Vec<Location> = rows
        .into_iter()
        .filter(|r| !r.symbol_name.contains("().("))
        .collect();

    let has_class = rows.iter().any(|r| r.kind.as_deref() == Some("Class"));
    if has_class {
        rows.into_iter().filter(|r| r.kind.as_deref() == Some("Class")).collect()
    } else {
        rows
    }
}

fn find_exact_name(conn: &Connection, name: &str) -> Result<Vec<Location>> {
    let mut stmt = conn.prepare(
        "SELECT s.name, d.relative_path, o.start_line, o.start_char, s.kind, o.role \
         FROM symbols s JOIN occurrences o ON o.symbol_id = s.id JOIN documents d ON o.document_id = d.id \
         WHERE s.name = ?1 AND (o.role & 1) = 1 ORDER BY d.relative_path, o.start_line",
    )?;
    let rows = stmt
        .query_map(params![name], location_mapper)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn find_fts(conn: &Connection, fts_pattern: &str, like_pattern: &str) -> Result<Vec<Location>> {
    let mut stmt = conn.prepare(
        "SELECT s.name, d.relative_path, o.start_line, o.start_char, s.kind, o.role \
         FROM symbols_fts fts JOIN symbols s ON fts.rowid = s.id \
         JOIN occurrences o ON o.symbol_id = s.id JOIN documents d ON o.document_id = d.id \
         WHERE fts.name MATCH ?1 AND s.name LIKE ?2 AND (o.role & 1) = 1 \
         ORDER BY d.relative_path, o.start_line",
    )?;
    let rows = stmt
        .query_map(params![fts_pattern, like_pattern], location_mapper)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn find_by_like(conn: &Connection, like_pattern: &str) -> Result<Vec<Location>> {
    let mut stmt = conn.prepare(
        "SELECT s.name, d.relative_path, o.start_line, o.start_char, s.kind, o.role \
         FROM symbols s JOIN occurrences o ON o.symbol_id = s.id JOIN documents d ON o.document_id = d.id \
         WHERE s.name LIKE ?1 AND (o.role & 1) = 1 ORDER BY d.relative_path, o.start_line",
    )?;
    let rows = stmt
        .query_map(params![like_pattern], location_mapper)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn location_mapper(row: &rusqlite::Row) -> rusqlite::Result<Location> {
    Ok(Location {
        symbol_name: row.get(0)?,
        file_path: row.get(1)?,
        line: row.get(2)?,
        column: row.get(3)?,
        kind: row.get(4)?,
        role: row.get(5)?,
    })
}

/// `queries.py::find_references`.
pub fn find_references(
    conn: &Connection,
    symbol_name: &str,
    limit: i64,
    role_filter: Option<i32>,
    exact: bool,
) -> Result<Vec<Location>> {
    let mut where_clause = "(o.role & 1) = 0".to_string();
    if let Some(role) = role_filter {
        where_clause.push_str(&format!(" AND (o.role & {role}) != 0"));
    }
    let limit_clause = if limit > 0 {
        format!(" LIMIT {limit}")
    } else {
        String::new()
    };

    if exact {
        let safe = sanitize_fts_query(symbol_name);
        let fts_pattern = format!("\"{safe}#\" OR \"{safe}()\" OR \"{safe}.\"");
        let sql = format!(
            "SELECT s.name, d.relative_path, o.start_line, o.start_char, s.kind, o.role \
             FROM symbols_fts fts JOIN symbols s ON fts.rowid = s.id \
             JOIN occurrences o ON o.symbol_id = s.id JOIN documents d ON o.document_id = d.id \
             WHERE fts.name MATCH ?1 AND {where_clause} \
             ORDER BY d.relative_path, o.start_line{limit_clause}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![fts_pattern], location_mapper)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    } else {
        let like_pattern = format!("%{symbol_name}%");
        let sql = format!(
            "SELECT s.name, d.relative_path, o.start_line, o.start_char, s.kind, o.role \
             FROM symbols s JOIN occurrences o ON o.symbol_id = s.id JOIN documents d ON o.document_id = d.id \
             WHERE s.name LIKE ?1 AND {where_clause}{limit_clause}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![like_pattern], location_mapper)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn validate_depth(depth: i64) -> Result<()> {
    if !(1..=10).contains(&depth) {
        return Err(CoreError::InvalidInput(format!(
            "depth must be between 1 and 10, got {depth}"
        )));
    }
    Ok(())
}

fn dependency_mapper(row: &rusqlite::Row) -> rusqlite::Result<DependencyEdge> {
    Ok(DependencyEdge {
        symbol_name: row.get(0)?,
        file_path: row.get(1)?,
        line: row.get(2)?,
        column: row.get(3)?,
        kind: row.get(4)?,
        depth: row.get(5)?,
        relationship: row.get(6)?,
    })
}

/// `queries.py::_get_dependencies_hybrid`: forward reachability over
/// `symbol_references` rooted at `symbol_id` and its nested members.
pub fn get_dependencies_hybrid(conn: &Connection, symbol_id: i64, depth: i64) -> Result<Vec<DependencyEdge>> {
    validate_depth(depth)?;
    let sql = "
        WITH RECURSIVE
        target_and_nested(symbol_id) AS (
            SELECT id FROM symbols WHERE id = ?1
            UNION
            SELECT s.id FROM symbols s, symbols t
            WHERE t.id = ?1
              AND (s.name LIKE t.name || '#%' OR s.name LIKE t.name || '.%')
        ),
        transitive_deps(symbol_id, depth, relationship_type) AS (
            SELECT sr.to_symbol_id, 1, sr.relationship_type
            FROM symbol_references sr
            WHERE sr.from_symbol_id IN (SELECT symbol_id FROM target_and_nested)
            UNION
            SELECT sr.to_symbol_id, td.depth + 1, sr.relationship_type
            FROM symbol_references sr
            JOIN transitive_deps td ON sr.from_symbol_id = td.symbol_id
            WHERE td.depth < ?2
        )
        SELECT DISTINCT s.name, d.relative_path, o.start_line, o.start_char, s.kind, td.depth, td.relationship_type
        FROM transitive_deps td
        JOIN symbols s ON s.id = td.symbol_id
        JOIN occurrences o ON o.symbol_id = s.id AND (o.role & 1) = 1
        JOIN documents d ON o.document_id = d.id
        WHERE (s.kind IS NULL OR s.kind NOT IN ('Local', 'Parameter')) AND s.name NOT LIKE 'local %'
        ORDER BY td.depth, s.name
    ";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![symbol_id, depth], dependency_mapper)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// `queries.py::get_dependencies` legacy (`call_graph`-based) mode.
pub fn get_dependencies_legacy(conn: &Connection, symbol_id: i64, depth: i64) -> Result<Vec<DependencyEdge>> {
    validate_depth(depth)?;
    if depth == 1 {
        let sql = "
            SELECT s.name, d.relative_path, o.start_line, o.start_char, s.kind, 1, cg.relationship
            FROM call_graph cg
            JOIN symbols s ON s.id = cg.callee_symbol_id
            JOIN occurrences o ON o.symbol_id = s.id AND (o.role & 1) = 1
            JOIN documents d ON o.document_id = d.id
            WHERE cg.caller_symbol_id = ?1
              AND (s.kind IS NULL OR s.kind NOT IN ('Local', 'Parameter')) AND s.name NOT LIKE 'local %'
        ";
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![symbol_id], dependency_mapper)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        return Ok(rows);
    }

    let sql = "
        WITH RECURSIVE transitive(symbol_id, depth, relationship) AS (
            SELECT callee_symbol_id, 1, relationship FROM call_graph WHERE caller_symbol_id = ?1
            UNION
            SELECT cg.callee_symbol_id, t.depth + 1, cg.relationship
            FROM call_graph cg JOIN transitive t ON cg.caller_symbol_id = t.symbol_id
            WHERE t.depth < ?2
        )
        SELECT DISTINCT s.name, d.relative_path, o.start_line, o.start_char, s.kind, t.depth, t.relationship
        FROM transitive t
        JOIN symbols s ON s.id = t.symbol_id
        JOIN occurrences o ON o.symbol_id = s.id AND (o.role & 1) = 1
        JOIN documents d ON o.document_id = d.id
        WHERE (s.kind IS NULL OR s.kind NOT IN ('Local', 'Parameter')) AND s.name NOT LIKE 'local %'
        ORDER BY t.depth, s.name
    ";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![symbol_id, depth], dependency_mapper)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn has_call_graph_data(conn: &Connection) -> rusqlite::Result<bool> {
    let table_exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'call_graph'",
        [],
        |r| r.get(0),
    )?;
    if table_exists == 0 {
        return Ok(false);
    }
    let has_rows: i64 = conn.query_row("SELECT COUNT(*) FROM call_graph LIMIT 1", [], |r| r.get(0))?;
    Ok(has_rows > 0)
}

/// `queries.py::get_dependencies`: hybrid mode when a `scip_file` was
/// supplied at the call site, `call_graph`-based mode otherwise.
pub fn get_dependencies(conn: &Connection, symbol_id: i64, depth: i64, use_hybrid: bool) -> Result<Vec<DependencyEdge>> {
    if use_hybrid {
        get_dependencies_hybrid(conn, symbol_id, depth)
    } else {
        get_dependencies_legacy(conn, symbol_id, depth)
    }
}

/// `queries.py::_get_dependents_hybrid`: reverse of `get_dependencies_hybrid`.
pub fn get_dependents_hybrid(conn: &Connection, symbol_id: i64, depth: i64) -> Result<Vec<DependencyEdge>> {
    validate_depth(depth)?;
    let sql = "
        WITH RECURSIVE
        target_and_nested(symbol_id) AS (
            SELECT id FROM symbols WHERE id = ?1
            UNION
            SELECT s.id FROM symbols s, symbols t
            WHERE t.id = ?1
              AND (s.name LIKE t.name || '#%' OR s.name LIKE t.name || '.%')
        ),
        transitive_deps(symbol_id, depth, relationship_type) AS (
            SELECT sr.from_symbol_id, 1, sr.relationship_type
            FROM symbol_references sr
            WHERE sr.to_symbol_id IN (SELECT symbol_id FROM target_and_nested)
            UNION
            SELECT sr.from_symbol_id, td.depth + 1, sr.relationship_type
            FROM symbol_references sr
            JOIN transitive_deps td ON sr.to_symbol_id = td.symbol_id
            WHERE td.depth < ?2
        )
        SELECT DISTINCT s.name, d.relative_path, o.start_line, o.start_char, s.kind, td.depth, td.relationship_type
        FROM transitive_deps td
        JOIN symbols s ON s.id = td.symbol_id
        JOIN occurrences o ON o.symbol_id = s.id AND (o.role & 1) = 1
        JOIN documents d ON o.document_id = d.id
        WHERE (s.kind IS NULL OR s.kind NOT IN ('Local', 'Parameter')) AND s.name NOT LIKE 'local %'
        ORDER BY td.depth, s.name
    ";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![symbol_id, depth], dependency_mapper)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// `queries.py::get_dependents` legacy mode.
pub fn get_dependents_legacy(conn: &Connection, symbol_id: i64, depth: i64) -> Result<Vec<DependencyEdge>> {
    validate_depth(depth)?;
    let sql = "
        WITH RECURSIVE transitive(symbol_id, depth, relationship) AS (
            SELECT caller_symbol_id, 1, relationship FROM call_graph WHERE callee_symbol_id = ?1
            UNION
            SELECT cg.caller_symbol_id, t.depth + 1, cg.relationship
            FROM call_graph cg JOIN transitive t ON cg.callee_symbol_id = t.symbol_id
            WHERE t.depth < ?2
        )
        SELECT DISTINCT s.name, d.relative_path, o.start_line, o.start_char, s.kind, t.depth, t.relationship
        FROM transitive t
        JOIN symbols s ON s.id = t.symbol_id
        JOIN occurrences o ON o.symbol_id = s.id AND (o.role & 1) = 1
        JOIN documents d ON o.document_id = d.id
        WHERE (s.kind IS NULL OR s.kind NOT IN ('Local', 'Parameter')) AND s.name NOT LIKE 'local %'
        ORDER BY t.depth, s.name
    ";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![symbol_id, depth], dependency_mapper)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get_dependents(conn: &Connection, symbol_id: i64, depth: i64, use_hybrid: bool) -> Result<Vec<DependencyEdge>> {
    if use_hybrid {
        get_dependents_hybrid(conn, symbol_id, depth)
    } else {
        get_dependents_legacy(conn, symbol_id, depth)
    }
}

/// Impact summary: callers of `symbol_id`, grouped by file.
/// `queries.py::analyze_impact`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ImpactedFile {
    pub file_path: String,
    pub symbol_count: usize,
    pub symbols: Vec<String>,
}

pub fn analyze_impact(conn: &Connection, symbol_id: i64, depth: i64, use_hybrid: bool) -> Result<Vec<ImpactedFile>> {
    let dependents = get_dependents(conn, symbol_id, depth, use_hybrid)?;

    let mut by_file: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
    for dep in dependents {
        by_file.entry(dep.file_path).or_default().push(dep.symbol_name);
    }

    let mut result: Vec<ImpactedFile> = by_file
        .into_iter()
        .map(|(file_path, symbols)| {
            let mut seen = HashSet::new();
            let unique: Vec<String> = symbols.into_iter().filter(|s| seen.insert(s.clone())).collect();
            ImpactedFile {
                file_path,
                symbol_count: unique.len(),
                symbols: unique,
            }
        })
        .collect();

    result.sort_by(|a, b| b.symbol_count.cmp(&a.symbol_count));
    Ok(result)
}

/// Bidirectional BFS over `symbol_references` via a single recursive CTE.
/// Mirrors `queries.py::trace_call_chain_v2` (single source/target pair).
fn trace_call_chain_v2(
    conn: &Connection,
    from_symbol_id: i64,
    to_symbol_id: i64,
    max_depth: i64,
    limit: i64,
) -> Result<Vec<CallChain>> {
    let max_depth = max_depth.min(3);
    let limit_clause = if limit > 0 { format!(" LIMIT {limit}") } else { String::new() };

    let sql = format!(
        "
        WITH RECURSIVE
        source_symbols(symbol_id) AS (
            SELECT ?1
            UNION
            SELECT s.id FROM symbols s, symbols s_src
            WHERE s_src.id = ?1 AND s_src.name LIKE '%#' AND s_src.name NOT LIKE '%()%'
              AND s.name LIKE s_src.name || '%' AND s.name LIKE '%()%'
        ),
        target_symbols(symbol_id) AS (
            SELECT ?2
            UNION
            SELECT s.id FROM symbols s, symbols s_tgt
            WHERE s_tgt.id = ?2 AND s_tgt.name LIKE '%#' AND s_tgt.name NOT LIKE '%()%'
              AND s.name LIKE s_tgt.name || '%' AND s.name LIKE '%()%'
        ),
        backward_reachable(symbol_id, depth) AS (
            SELECT symbol_id, 0 FROM target_symbols
            UNION
            SELECT sr.from_symbol_id, br.depth + 1
            FROM symbol_references sr
            JOIN backward_reachable br ON sr.to_symbol_id = br.symbol_id
            WHERE br.depth < ?3
        ),
        forward_paths(symbol_id, path_ids, path_symbols, depth, has_cycle) AS (
            SELECT ss.symbol_id, CAST(ss.symbol_id AS TEXT), s.name, 0, 0
            FROM source_symbols ss JOIN symbols s ON s.id = ss.symbol_id
            UNION ALL
            SELECT sr.to_symbol_id,
                   fp.path_ids || ',' || CAST(sr.to_symbol_id AS TEXT),
                   fp.path_symbols || '|||' || s2.name,
                   fp.depth + 1,
                   CASE WHEN instr(',' || fp.path_ids || ',', ',' || CAST(sr.to_symbol_id AS TEXT) || ',') > 0 THEN 1 ELSE 0 END
            FROM symbol_references sr
            JOIN forward_paths fp ON sr.from_symbol_id = fp.symbol_id
            JOIN symbols s2 ON s2.id = sr.to_symbol_id
            WHERE fp.depth < ?4
              AND fp.has_cycle = 0
              AND sr.to_symbol_id IN (SELECT symbol_id FROM backward_reachable)
        )
        SELECT DISTINCT path_symbols, path_ids, depth, has_cycle
        FROM forward_paths
        WHERE symbol_id IN (SELECT symbol_id FROM target_symbols)
        ORDER BY depth{limit_clause}
        "
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![from_symbol_id, to_symbol_id, max_depth, max_depth],
            |r| {
                let path_symbols: String = r.get(0)?;
                let depth: i64 = r.get(2)?;
                let has_cycle: i64 = r.get(3)?;
                Ok(CallChain {
                    path: path_symbols.split("|||").map(str::to_string).collect(),
                    length: depth,
                    has_cycle: has_cycle != 0,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Legacy symbol-name-driven BFS, used when `call_graph` has no rows yet.
/// Mirrors `queries.py::trace_call_chain`'s fallback branch. Uses
/// `get_dependencies` at each step, so it shares the hybrid/legacy split.
fn trace_call_chain_legacy(
    conn: &Connection,
    from_symbol_id: i64,
    to_symbol_id: i64,
    limit: i64,
    node_budget: usize,
    use_hybrid: bool,
) -> Result<Vec<CallChain>> {
    fn simple_name(name: &str) -> String {
        name.rsplit('/')
            .next()
            .unwrap_or(name)
            .trim_end_matches('#')
            .trim_end_matches('.')
            .trim_end_matches("()")
            .to_string()
    }

    let to_name: String = conn.query_row("SELECT name FROM symbols WHERE id = ?1", params![to_symbol_id], |r| r.get(0))?;
    let to_simple = simple_name(&to_name);

    let mut chains = Vec::new();
    let mut queue: VecDeque<(i64, Vec<i64>)> = VecDeque::new();
    queue.push_back((from_symbol_id, vec![from_symbol_id]));
    let mut explored = 0usize;
    let mut visited: HashSet<i64> = HashSet::new();
    visited.insert(from_symbol_id);

    while let Some((current_id, path)) = queue.pop_front() {
        if explored >= node_budget || chains.len() as i64 >= limit.max(1) {
            break;
        }
        explored += 1;

        let deps = get_dependencies(conn, current_id, 1, use_hybrid)?;
        for dep in deps {
            if matches!(dep.kind.as_deref(), Some("Parameter") | Some("Local")) || dep.symbol_name.starts_with("local ") {
                continue;
            }
            let dep_id: i64 = conn.query_row(
                "SELECT id FROM symbols WHERE name = ?1",
                params![dep.symbol_name],
                |r| r.get(0),
            )?;
            if visited.contains(&dep_id) {
                continue;
            }
            let dep_simple = simple_name(&dep.symbol_name);
            let mut new_path = path.clone();
            new_path.push(dep_id);

            if dep_simple == to_simple || to_simple.contains(&dep_simple) {
                let names: Result<Vec<String>> = new_path
                    .iter()
                    .map(|id| {
                        conn.query_row("SELECT name FROM symbols WHERE id = ?1", params![id], |r| r.get(0))
                            .map_err(CoreError::from)
                    })
                    .collect();
                let names = names?;
                chains.push(CallChain {
                    length: (new_path.len() - 1) as i64,
                    path: names,
                    has_cycle: false,
                });
                continue;
            }

            visited.insert(dep_id);
            queue.push_back((dep_id, new_path));
        }
    }

    chains.sort_by_key(|c| c.length);
    Ok(chains)
}

/// `queries.py::trace_call_chain`: auto-detects whether `call_graph` has
/// data and dispatches to the fast bidirectional-BFS path or the legacy
/// symbol-name BFS, honoring a wall-clock timeout either way.
pub fn trace_call_chain(
    conn: &Connection,
    from_symbol_id: i64,
    to_symbol_id: i64,
    max_depth: i64,
    limit: i64,
    config: &QueryConfig,
    use_hybrid: bool,
) -> Result<Vec<CallChain>> {
    if !(1..=config.max_allowed_depth).contains(&max_depth) {
        return Err(CoreError::InvalidInput(format!(
            "depth must be between 1 and {}, got {max_depth}",
            config.max_allowed_depth
        )));
    }
    if max_depth > config.max_trace_depth {
        warn!(
            requested = max_depth,
            cap = config.max_trace_depth,
            "traceCallChain depth capped"
        );
    }

    let has_data = has_call_graph_data(conn)?;
    let timeout = config.default_timeout;

    let result = if has_data {
        run_with_timeout(conn, timeout, || {
            trace_call_chain_v2(conn, from_symbol_id, to_symbol_id, config.max_trace_depth, limit)
        })
    } else {
        run_with_timeout(conn, timeout, || {
            trace_call_chain_legacy(
                conn,
                from_symbol_id,
                to_symbol_id,
                limit,
                config.legacy_bfs_node_budget,
                use_hybrid,
            )
        })
    };

    match result {
        Ok(chains) => Ok(chains),
        Err(CoreError::Timeout(msg)) => {
            warn!(%msg, "traceCallChain timed out");
            Ok(Vec::new())
        }
        Err(other) => Err(other),
    }
}

/// Runs the closure on the calling thread while a watchdog thread holds
/// `conn`'s interrupt handle; if the deadline passes before the closure
/// returns, the watchdog calls `sqlite3_interrupt` on the connection, which
/// aborts the currently-running statement (CTE or BFS query alike) and
/// surfaces as an `OperationInterrupted` rusqlite error. Mirrors the
/// "equivalent watchdog" the spec permits in place of a true async timeout.
fn run_with_timeout<T>(conn: &Connection, timeout: std::time::Duration, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let interrupt_handle = conn.get_interrupt_handle();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let watchdog = thread::spawn(move || {
        if done_rx.recv_timeout(timeout).is_err() {
            interrupt_handle.interrupt();
        }
    });

    let result = f();
    let _ = done_tx.send(());
    let _ = watchdog.join();

    match result {
        Err(CoreError::StorageError(e)) if is_interrupted(&e) => {
            Err(CoreError::Timeout(format!("query exceeded {timeout:?}")))
        }
        other => other,
    }
}

fn is_interrupted(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ffi::ErrorCode::OperationInterrupted
    )
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
    fn find_definition_requires_definition_role() {
        let conn = setup();
        conn.execute("INSERT INTO symbols (id, name, kind) VALUES (1, 'python test/Foo#', 'Class')", []).unwrap();
        conn.execute("INSERT INTO documents (id, relative_path) VALUES (1, 'a.py')", []).unwrap();
        conn.execute(
            "INSERT INTO occurrences (symbol_id, document_id, start_line, start_char, end_line, end_char, role) VALUES (1, 1, 3, 0, 3, 3, 1)",
            [],
        )
        .unwrap();
        crate::schema::rebuild_fts(&conn).unwrap();

        let results = find_definition(&conn, "python test/Foo#", true).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_path, "a.py");
    }

    #[test]
    fn depth_validation_rejects_out_of_range_values() {
        let conn = setup();
        let err = get_dependencies_hybrid(&conn, 1, 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
        let err = get_dependencies_hybrid(&conn, 1, 11).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
