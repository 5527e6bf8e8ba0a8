//! ETL Builder (spec §4.2, §4.4 state machine): turns a parsed SCIP index
//! into the populated relational store.
//!
//! Grounded in `builder.py::build` and its private helpers. Runs under the
//! bulk-insert pragma discipline the donor uses (`foreign_keys=OFF`,
//! `synchronous=OFF`, `journal_mode=MEMORY`), restored once the load and all
//! derived tables are built.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::config::BuilderConfig;
use crate::enclosing::EnclosingResolver;
use crate::model::{
    classify_role, external_symbol_display_name, is_local_symbol, DocumentRecord,
    OccurrenceRecord, Relationship, SymbolRecord,
};
use crate::reader::{self, ParsedIndex};

const EOF_LINE_MARKER: i32 = 999_999;

/// Row counts produced by a build, returned for logging and for the
/// Backend Facade's status reporting.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    pub symbols: usize,
    pub documents: usize,
    pub occurrences: usize,
    pub symbol_references: usize,
    pub call_graph_edges: usize,
}

/// The ETL's own state-machine stages, exposed for callers that want to
/// observe build progress (e.g. a progress bar).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Empty,
    SchemaCreated,
    SymbolsLoaded,
    DocumentsLoaded,
    OccurrencesLoaded,
    ReferencesBuilt,
    CallGraphBuilt,
    IndexesCreated,
    FtsSynchronized,
}

struct LoadedSymbols {
    map: HashMap<String, i64>,
    kind_by_id: HashMap<i64, Option<String>>,
    display_by_id: HashMap<i64, Option<String>>,
}

/// Build a fresh store at `db_path` from the SCIP index at `scip_path`,
/// replacing any existing file at `db_path`.
pub fn build(scip_path: &Path, db_path: &Path, config: &BuilderConfig) -> crate::error::Result<BuildStats> {
    if db_path.exists() {
        std::fs::remove_file(db_path).map_err(|e| crate::error::CoreError::StorageError(e.into()))?;
    }

    let parsed = reader::read(scip_path).map_err(|e| crate::error::CoreError::DecodeError {
        path: scip_path.display().to_string(),
        source: e,
    })?;

    info!(
        documents = parsed.documents.len(),
        symbols = parsed.symbols.len(),
        occurrences = parsed.occurrences.len(),
        "starting SCIP index build"
    );

    let mut conn = Connection::open(db_path)?;
    conn.execute_batch(
        "PRAGMA foreign_keys = OFF; PRAGMA synchronous = OFF; PRAGMA journal_mode = MEMORY;",
    )?;

    crate::schema::create_schema(&conn)?;
    debug!(stage = ?BuildStage::SchemaCreated, "schema created");

    let tx = conn.transaction()?;

    let loaded = insert_symbols(&tx, &parsed)?;
    debug!(stage = ?BuildStage::SymbolsLoaded, count = loaded.map.len(), "symbols loaded");

    let doc_ids = insert_documents(&tx, &parsed.documents)?;
    debug!(stage = ?BuildStage::DocumentsLoaded, count = doc_ids.len(), "documents loaded");

    let occurrence_count = insert_occurrences(&tx, &parsed.occurrences, &loaded.map, &doc_ids, config.batch_size)?;
    debug!(stage = ?BuildStage::OccurrencesLoaded, count = occurrence_count, "occurrences loaded");

    let occurrence_id_map = load_occurrence_id_map(&tx)?;

    let reference_count = build_symbol_references(
        &tx,
        &parsed.occurrences,
        &loaded.map,
        &loaded.kind_by_id,
        &doc_ids,
        &occurrence_id_map,
    )?;
    debug!(stage = ?BuildStage::ReferencesBuilt, count = reference_count, "symbol_references built");

    let call_graph_count = build_call_graph(
        &tx,
        &parsed.occurrences,
        &loaded.map,
        &loaded.kind_by_id,
        &loaded.display_by_id,
        &doc_ids,
        &occurrence_id_map,
    )?;
    debug!(stage = ?BuildStage::CallGraphBuilt, count = call_graph_count, "call_graph built");

    tx.commit()?;

    crate::schema::create_indexes(&conn)?;
    debug!(stage = ?BuildStage::IndexesCreated, "indexes created");

    crate::schema::rebuild_fts(&conn)?;
    debug!(stage = ?BuildStage::FtsSynchronized, "fts synchronized");

    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = FULL;")?;

    let stats = BuildStats {
        symbols: loaded.map.len(),
        documents: doc_ids.len(),
        occurrences: occurrence_count,
        symbol_references: reference_count,
        call_graph_edges: call_graph_count,
    };

    info!(
        symbols = stats.symbols,
        documents = stats.documents,
        occurrences = stats.occurrences,
        symbol_references = stats.symbol_references,
        call_graph_edges = stats.call_graph_edges,
        "build finished"
    );

    Ok(stats)
}

fn insert_symbols(conn: &Connection, parsed: &ParsedIndex) -> rusqlite::Result<LoadedSymbols> {
    let mut map = HashMap::with_capacity(parsed.symbols.len());
    let mut kind_by_id = HashMap::with_capacity(parsed.symbols.len());
    let mut display_by_id = HashMap::with_capacity(parsed.symbols.len());

    {
        let mut stmt = conn.prepare(
            "INSERT INTO symbols (name, display_name, kind, signature, documentation, package_id, enclosing_symbol_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL)",
        )?;
        for sym in &parsed.symbols {
            stmt.execute(params![
                sym.name,
                sym.display_name,
                sym.kind,
                sym.signature,
                sym.documentation
            ])?;
            let id = conn.last_insert_rowid();
            map.insert(sym.name.clone(), id);
            kind_by_id.insert(id, sym.kind.clone());
            display_by_id.insert(id, sym.display_name.clone());
        }
    }

    let known: HashSet<&str> = map.keys().map(|s| s.as_str()).collect();
    let mut external_names: Vec<&str> = Vec::new();
    let mut seen_external = HashSet::new();
    for occ in &parsed.occurrences {
        if !known.contains(occ.symbol_name.as_str()) && seen_external.insert(occ.symbol_name.as_str()) {
            external_names.push(occ.symbol_name.as_str());
        }
    }

    {
        let mut stmt = conn.prepare(
            "INSERT INTO symbols (name, display_name, kind, signature, documentation, package_id, enclosing_symbol_id) \
             VALUES (?1, ?2, NULL, NULL, NULL, NULL, NULL)",
        )?;
        for name in external_names {
            let display_name = external_symbol_display_name(name);
            stmt.execute(params![name, display_name])?;
            let id = conn.last_insert_rowid();
            map.insert(name.to_string(), id);
            kind_by_id.insert(id, None);
            display_by_id.insert(id, Some(display_name));
        }
    }

    Ok(LoadedSymbols {
        map,
        kind_by_id,
        display_by_id,
    })
}

fn insert_documents(conn: &Connection, documents: &[DocumentRecord]) -> rusqlite::Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(documents.len());
    let mut stmt = conn.prepare("INSERT INTO documents (relative_path, language) VALUES (?1, ?2)")?;
    for doc in documents {
        stmt.execute(params![doc.relative_path, doc.language])?;
        ids.push(conn.last_insert_rowid());
    }
    Ok(ids)
}

fn insert_occurrences(
    conn: &Connection,
    occurrences: &[OccurrenceRecord],
    symbol_map: &HashMap<String, i64>,
    doc_ids: &[i64],
    batch_size: usize,
) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO occurrences \
         (symbol_id, document_id, start_line, start_char, end_line, end_char, role, \
          enclosing_range_start_line, enclosing_range_start_char, enclosing_range_end_line, enclosing_range_end_char) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    let mut inserted = 0usize;
    for (batch_index, occ) in occurrences.iter().enumerate() {
        let Some(&symbol_id) = symbol_map.get(&occ.symbol_name) else {
            continue;
        };
        let Some(&document_id) = doc_ids.get(occ.document_index) else {
            continue;
        };
        let (esl, esc, eel, eec) = match occ.enclosing_range {
            Some(r) => (Some(r.start_line), Some(r.start_char), Some(r.end_line), Some(r.end_char)),
            None => (None, None, None, None),
        };
        stmt.execute(params![
            symbol_id,
            document_id,
            occ.range.start.0,
            occ.range.start.1,
            occ.range.end.0,
            occ.range.end.1,
            occ.role,
            esl,
            esc,
            eel,
            eec
        ])?;
        inserted += 1;
        if batch_index % batch_size == 0 {
            debug!(batch_index, "occurrence batch inserted");
        }
    }
    Ok(inserted)
}

/// Keyed by the occurrence's own (symbol_id, document_id, start_line,
/// start_char) — this is how both derived-table builders look up the
/// occurrence id of whichever reference they're currently processing.
type OccurrenceIdMap = HashMap<(i64, i64, i32, i32), i64>;

fn load_occurrence_id_map(conn: &Connection) -> rusqlite::Result<OccurrenceIdMap> {
    let mut stmt =
        conn.prepare("SELECT id, symbol_id, document_id, start_line, start_char FROM occurrences")?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, i64>(1)?,
            r.get::<_, i64>(2)?,
            r.get::<_, i32>(3)?,
            r.get::<_, i32>(4)?,
            r.get::<_, i64>(0)?,
        ))
    })?;
    let mut map = HashMap::new();
    for row in rows {
        let (symbol_id, document_id, start_line, start_char, occ_id) = row?;
        map.insert((symbol_id, document_id, start_line, start_char), occ_id);
    }
    Ok(map)
}

struct DefinitionRange {
    symbol_id: i64,
    symbol_name: String,
    start_line: i32,
    end_line: i32,
}

struct Definition {
    symbol_id: i64,
    symbol_name: String,
    line: i32,
}

/// Mirrors `builder.py::_compute_enclosing_ranges`: for definitions lacking
/// a protobuf enclosing range, derive one from the next definition in the
/// same document.
fn compute_enclosing_ranges(
    occurrences: &[OccurrenceRecord],
) -> HashMap<(usize, String), (i32, i32)> {
    let mut by_doc: HashMap<usize, Vec<(&str, i32)>> = HashMap::new();
    for occ in occurrences {
        if occ.is_definition() && occ.enclosing_range.is_none() {
            by_doc
                .entry(occ.document_index)
                .or_default()
                .push((occ.symbol_name.as_str(), occ.range.start.0));
        }
    }

    let mut result = HashMap::new();
    for (doc_index, mut defs) in by_doc {
        defs.sort_by_key(|(_, line)| *line);
        for i in 0..defs.len() {
            let (name, start) = defs[i];
            let end = if i + 1 < defs.len() {
                defs[i + 1].1 - 1
            } else {
                EOF_LINE_MARKER
            };
            result.insert((doc_index, name.to_string()), (start, end));
        }
    }
    result
}

fn occurrence_id_for(
    occurrence_id_map: &OccurrenceIdMap,
    symbol_id: i64,
    doc_id: i64,
    occ: &OccurrenceRecord,
) -> Option<i64> {
    occurrence_id_map
        .get(&(symbol_id, doc_id, occ.range.start.0, occ.range.start.1))
        .copied()
}

/// Mirrors `builder.py::_build_symbol_references`: a scope-range pass
/// followed by a proximity fallback for whatever the first pass didn't
/// cover. A definition is never eligible to become an edge's `from` when
/// its symbol name is a SCIP `local ` symbol or its kind is `Parameter` —
/// the same exclusion `enclosing.rs` applies to the call-graph path,
/// required by §8 property 5.
fn build_symbol_references(
    conn: &Connection,
    occurrences: &[OccurrenceRecord],
    symbol_map: &HashMap<String, i64>,
    kind_by_id: &HashMap<i64, Option<String>>,
    doc_ids: &[i64],
    occurrence_id_map: &OccurrenceIdMap,
) -> rusqlite::Result<usize> {
    let computed_ranges = compute_enclosing_ranges(occurrences);

    let mut by_doc: HashMap<usize, Vec<&OccurrenceRecord>> = HashMap::new();
    for occ in occurrences {
        by_doc.entry(occ.document_index).or_default().push(occ);
    }

    let is_excluded_caller = |symbol_id: i64, symbol_name: &str| {
        if is_local_symbol(symbol_name) {
            return true;
        }
        kind_by_id
            .get(&symbol_id)
            .and_then(|k| k.as_deref())
            .map(|k| k == "Parameter")
            .unwrap_or(false)
    };

    let mut edges: Vec<(i64, i64, Relationship, i64)> = Vec::new();
    let mut covered: HashSet<(String, i32, i32)> = HashSet::new();

    for (&doc_index, doc_occs) in &by_doc {
        let Some(&doc_id) = doc_ids.get(doc_index) else {
            continue;
        };

        let mut definitions_with_ranges: Vec<DefinitionRange> = Vec::new();
        let mut all_definitions: Vec<Definition> = Vec::new();

        for occ in doc_occs.iter() {
            if !occ.is_definition() {
                continue;
            }
            let Some(&symbol_id) = symbol_map.get(&occ.symbol_name) else {
                continue;
            };
            if is_excluded_caller(symbol_id, &occ.symbol_name) {
                continue;
            }
            all_definitions.push(Definition {
                symbol_id,
                symbol_name: occ.symbol_name.clone(),
                line: occ.range.start.0,
            });
            let range = occ
                .enclosing_range
                .map(|r| (r.start_line, r.end_line))
                .or_else(|| computed_ranges.get(&(doc_index, occ.symbol_name.clone())).copied());
            if let Some((start_line, end_line)) = range {
                definitions_with_ranges.push(DefinitionRange {
                    symbol_id,
                    symbol_name: occ.symbol_name.clone(),
                    start_line,
                    end_line,
                });
            }
        }
        all_definitions.sort_by_key(|d| d.line);

        // Pass 1: scope-range containment.
        for def in &definitions_with_ranges {
            for occ in doc_occs.iter() {
                if occ.is_definition() {
                    continue;
                }
                if occ.symbol_name == def.symbol_name || is_local_symbol(&occ.symbol_name) {
                    continue;
                }
                let line = occ.range.start.0;
                if line < def.start_line || line > def.end_line {
                    continue;
                }
                let Some(&to_symbol_id) = symbol_map.get(&occ.symbol_name) else {
                    continue;
                };
                let Some(occurrence_id) = occurrence_id_for(occurrence_id_map, to_symbol_id, doc_id, occ)
                else {
                    continue;
                };
                edges.push((def.symbol_id, to_symbol_id, classify_role(occ.role), occurrence_id));
                covered.insert((occ.symbol_name.clone(), occ.range.start.0, occ.range.start.1));
            }
        }

        // Pass 2: proximity fallback for anything pass 1 didn't cover.
        for occ in doc_occs.iter() {
            if occ.is_definition() || is_local_symbol(&occ.symbol_name) {
                continue;
            }
            let key = (occ.symbol_name.clone(), occ.range.start.0, occ.range.start.1);
            if covered.contains(&key) {
                continue;
            }
            let occ_line = occ.range.start.0;
            let mut nearest: Option<&Definition> = None;
            for def in &all_definitions {
                if def.line <= occ_line {
                    nearest = Some(def);
                } else {
                    break;
                }
            }
            let Some(nearest) = nearest else {
                continue;
            };
            if nearest.symbol_name == occ.symbol_name {
                continue;
            }
            let Some(&to_symbol_id) = symbol_map.get(&occ.symbol_name) else {
                continue;
            };
            let Some(occurrence_id) = occurrence_id_for(occurrence_id_map, to_symbol_id, doc_id, occ)
            else {
                continue;
            };
            edges.push((nearest.symbol_id, to_symbol_id, classify_role(occ.role), occurrence_id));
        }
    }

    let mut stmt = conn.prepare(
        "INSERT INTO symbol_references (from_symbol_id, to_symbol_id, relationship_type, occurrence_id) \
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (from_id, to_id, relationship, occ_id) in &edges {
        stmt.execute(params![from_id, to_id, relationship.as_str(), occ_id])?;
    }

    Ok(edges.len())
}

/// Mirrors `builder.py::_build_call_graph` plus `_add_interface_to_impl_edges`.
fn build_call_graph(
    conn: &Connection,
    occurrences: &[OccurrenceRecord],
    symbol_map: &HashMap<String, i64>,
    kind_by_id: &HashMap<i64, Option<String>>,
    display_by_id: &HashMap<i64, Option<String>>,
    doc_ids: &[i64],
    occurrence_id_map: &OccurrenceIdMap,
) -> rusqlite::Result<usize> {
    let mut resolver = EnclosingResolver::new();
    resolver.build(occurrences, symbol_map, kind_by_id);

    let mut edges: Vec<(i64, i64, Option<i64>, Relationship, Option<String>, Option<String>)> = Vec::new();

    for occ in occurrences {
        if occ.is_definition() {
            continue;
        }
        let Some(caller_id) = resolver.resolve(occ) else {
            continue;
        };
        let Some(&callee_id) = symbol_map.get(&occ.symbol_name) else {
            continue;
        };
        let Some(&doc_id) = doc_ids.get(occ.document_index) else {
            continue;
        };
        let occurrence_id = occurrence_id_for(occurrence_id_map, callee_id, doc_id, occ);
        let caller_display = display_by_id.get(&caller_id).cloned().flatten();
        let callee_display = display_by_id.get(&callee_id).cloned().flatten();
        edges.push((
            caller_id,
            callee_id,
            occurrence_id,
            classify_role(occ.role),
            caller_display,
            callee_display,
        ));
    }

    {
        let mut stmt = conn.prepare(
            "INSERT INTO call_graph \
             (caller_symbol_id, callee_symbol_id, occurrence_id, relationship, caller_display_name, callee_display_name) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (caller, callee, occ_id, rel, caller_name, callee_name) in &edges {
            stmt.execute(params![caller, callee, occ_id, rel.as_str(), caller_name, callee_name])?;
        }
    }

    let synthetic = add_interface_to_impl_edges(conn)?;

    Ok(edges.len() + synthetic)
}

/// Mirrors `builder.py::_add_interface_to_impl_edges`: synthesizes a
/// "calls" edge from every abstract method to the matching `Impl` method
/// whose name pattern suggests it implements that interface.
fn add_interface_to_impl_edges(conn: &Connection) -> rusqlite::Result<usize> {
    let interfaces: Vec<(i64, String, Option<String>)> = {
        let mut stmt = conn
            .prepare("SELECT id, name, display_name FROM symbols WHERE kind = 'AbstractMethod'")?;
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<_, _>>()?
    };

    let mut edges = Vec::new();
    for (interface_id, name, interface_display) in interfaces {
        let Some((prefix, method_sig)) = name.split_once('#') else {
            continue;
        };
        let class_part = prefix.rsplit(' ').next().unwrap_or(prefix);
        let interface_class = class_part.rsplit('/').next().unwrap_or(class_part);

        let impl_like = format!("%/impl/%Impl#{method_sig}");
        let class_like = format!("%{interface_class}Impl#%");

        let mut stmt = conn.prepare(
            "SELECT id, display_name FROM symbols WHERE kind = 'Method' AND name LIKE ?1 AND name LIKE ?2",
        )?;
        let matches: Vec<(i64, Option<String>)> = stmt
            .query_map(params![impl_like, class_like], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<_, _>>()?;

        for (impl_id, impl_display) in matches {
            edges.push((interface_id, impl_id, interface_display.clone(), impl_display));
        }
    }

    let mut stmt = conn.prepare(
        "INSERT INTO call_graph \
         (caller_symbol_id, callee_symbol_id, occurrence_id, relationship, caller_display_name, callee_display_name) \
         VALUES (?1, ?2, NULL, 'calls', ?3, ?4)",
    )?;
    for (caller, callee, caller_name, callee_name) in &edges {
        stmt.execute(params![caller, callee, caller_name, callee_name])?;
    }

    Ok(edges.len())
}
