//! Independent verification of a built store against its source SCIP index.
//!
//! Re-parses the `.scip` file separately from the builder and checks the
//! store for agreement: row counts, a content sample, every document's
//! presence, and call-graph referential integrity. Mirrors the donor's
//! `verify.py::SCIPDatabaseVerifier`.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::config::verify_limits::{
    MAX_CALL_GRAPH_SAMPLE_SIZE, MAX_OCCURRENCE_SAMPLE_SIZE, MAX_SYMBOL_SAMPLE_SIZE,
};
use crate::reader::{self, ParsedIndex};

/// Result of a full verification pass. Mirrors the donor's `VerificationResult`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub symbol_count_match: bool,
    pub occurrence_count_match: bool,
    pub documents_verified: bool,
    pub call_graph_fk_valid: bool,
    pub symbol_sample_verified: bool,
    pub occurrence_sample_verified: bool,
    pub call_graph_sample_verified: bool,
    pub errors: Vec<String>,
    pub total_errors: usize,
    pub symbols_sampled: usize,
    pub occurrences_sampled: usize,
    pub call_graph_edges_sampled: usize,
}

/// Pick `sample_size` indices out of `[0, total)`, evenly spread across the
/// range. Deterministic rather than randomized, so verification results are
/// reproducible; still representative of the whole range rather than just
/// its prefix.
fn systematic_sample(total: usize, sample_size: usize) -> Vec<usize> {
    if sample_size == 0 || total == 0 {
        return Vec::new();
    }
    let sample_size = sample_size.min(total);
    if sample_size == total {
        return (0..total).collect();
    }
    let stride = total as f64 / sample_size as f64;
    (0..sample_size)
        .map(|i| ((i as f64 * stride) as usize).min(total - 1))
        .collect()
}

/// Re-parse `scip_path` and compare it against the store at `db_path`.
pub fn verify(db_path: &Path, scip_path: &Path) -> anyhow::Result<VerificationResult> {
    let parsed = reader::read(scip_path)?;
    let conn = Connection::open(db_path)?;

    let mut errors = Vec::new();

    let (symbol_count_match, symbols_sampled, symbol_sample_verified) =
        verify_symbols(&conn, &parsed, &mut errors)?;
    let (occurrence_count_match, occurrences_sampled, occurrence_sample_verified) =
        verify_occurrences(&conn, &parsed, &mut errors)?;
    let documents_verified = verify_documents(&conn, &parsed, &mut errors)?;
    let (call_graph_fk_valid, call_graph_edges_sampled, call_graph_sample_verified) =
        verify_call_graph(&conn, &mut errors)?;

    let passed = symbol_count_match
        && symbol_sample_verified
        && occurrence_count_match
        && occurrence_sample_verified
        && documents_verified
        && call_graph_fk_valid
        && call_graph_sample_verified;

    Ok(VerificationResult {
        passed,
        symbol_count_match,
        occurrence_count_match,
        documents_verified,
        call_graph_fk_valid,
        symbol_sample_verified,
        occurrence_sample_verified,
        call_graph_sample_verified,
        total_errors: errors.len(),
        errors,
        symbols_sampled,
        occurrences_sampled,
        call_graph_edges_sampled,
    })
}

fn verify_symbols(
    conn: &Connection,
    parsed: &ParsedIndex,
    errors: &mut Vec<String>,
) -> anyhow::Result<(bool, usize, bool)> {
    let parsed_names: HashSet<&str> = parsed.symbols.iter().map(|s| s.name.as_str()).collect();
    let external_names: HashSet<&str> = parsed
        .occurrences
        .iter()
        .map(|o| o.symbol_name.as_str())
        .filter(|name| !parsed_names.contains(name))
        .collect();
    let expected_count = parsed.symbols.len() + external_names.len();

    let actual_count: i64 = conn.query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?;
    let count_match = actual_count as usize == expected_count;
    if !count_match {
        errors.push(format!(
            "symbol count mismatch: expected {expected_count}, found {actual_count}"
        ));
    }

    let sample_size = MAX_SYMBOL_SAMPLE_SIZE.min(expected_count);
    if sample_size == 0 || parsed.symbols.is_empty() {
        return Ok((count_match, 0, true));
    }

    let indices = systematic_sample(parsed.symbols.len(), sample_size.min(parsed.symbols.len()));
    let mut sample_ok = true;
    let mut sampled = 0usize;
    for idx in indices {
        let symbol = &parsed.symbols[idx];
        sampled += 1;
        let row: Option<Option<String>> = conn
            .query_row(
                "SELECT display_name FROM symbols WHERE name = ?1",
                [&symbol.name],
                |r| r.get(0),
            )
            .ok();
        match row {
            None => {
                sample_ok = false;
                errors.push(format!("symbol sample: '{}' missing from store", symbol.name));
            }
            Some(db_display) => {
                if let Some(expected_display) = &symbol.display_name {
                    if db_display.as_deref() != Some(expected_display.as_str()) {
                        sample_ok = false;
                        errors.push(format!(
                            "symbol sample: '{}' display_name mismatch: expected {:?}, found {:?}",
                            symbol.name, expected_display, db_display
                        ));
                    }
                }
            }
        }
    }

    Ok((count_match, sampled, sample_ok))
}

fn verify_occurrences(
    conn: &Connection,
    parsed: &ParsedIndex,
    errors: &mut Vec<String>,
) -> anyhow::Result<(bool, usize, bool)> {
    let expected_count = parsed.occurrences.len();
    let actual_count: i64 = conn.query_row("SELECT COUNT(*) FROM occurrences", [], |r| r.get(0))?;
    let count_match = actual_count as usize == expected_count;
    if !count_match {
        errors.push(format!(
            "occurrence count mismatch: expected {expected_count}, found {actual_count}"
        ));
    }

    let sample_size = MAX_OCCURRENCE_SAMPLE_SIZE.min(expected_count);
    if sample_size == 0 {
        return Ok((count_match, 0, true));
    }

    let indices = systematic_sample(expected_count, sample_size);
    let mut sample_ok = true;
    for &idx in &indices {
        let occ = &parsed.occurrences[idx];
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM occurrences o JOIN symbols s ON o.symbol_id = s.id \
             WHERE s.name = ?1 AND o.start_line = ?2 AND o.start_char = ?3 AND o.role = ?4",
            rusqlite::params![occ.symbol_name, occ.range.start.0, occ.range.start.1, occ.role],
            |r| r.get(0),
        )?;
        if count == 0 {
            sample_ok = false;
            errors.push(format!(
                "occurrence sample: no match for '{}' at {:?}",
                occ.symbol_name, occ.range.start
            ));
        }
    }

    Ok((count_match, indices.len(), sample_ok))
}

fn verify_documents(
    conn: &Connection,
    parsed: &ParsedIndex,
    errors: &mut Vec<String>,
) -> anyhow::Result<bool> {
    let mut stmt = conn.prepare("SELECT relative_path, language FROM documents")?;
    let db_docs: Vec<(String, Option<String>)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;
    let db_paths: HashSet<&str> = db_docs.iter().map(|(p, _)| p.as_str()).collect();

    let mut ok = true;
    for doc in &parsed.documents {
        match db_docs.iter().find(|(p, _)| p == &doc.relative_path) {
            None => {
                ok = false;
                errors.push(format!("document '{}' missing from store", doc.relative_path));
            }
            Some((_, lang)) => {
                if lang != &doc.language {
                    ok = false;
                    errors.push(format!(
                        "document '{}' language mismatch: expected {:?}, found {:?}",
                        doc.relative_path, doc.language, lang
                    ));
                }
            }
        }
    }

    let expected_paths: HashSet<&str> = parsed
        .documents
        .iter()
        .map(|d| d.relative_path.as_str())
        .collect();
    for unexpected in db_paths.difference(&expected_paths) {
        ok = false;
        errors.push(format!("unexpected document '{unexpected}' found in store"));
    }

    Ok(ok)
}

fn verify_call_graph(
    conn: &Connection,
    errors: &mut Vec<String>,
) -> anyhow::Result<(bool, usize, bool)> {
    let mut stmt = conn.prepare(
        "SELECT cg.id FROM call_graph cg \
         LEFT JOIN symbols s1 ON cg.caller_symbol_id = s1.id \
         LEFT JOIN symbols s2 ON cg.callee_symbol_id = s2.id \
         WHERE s1.id IS NULL OR s2.id IS NULL",
    )?;
    let dangling: Vec<i64> = stmt.query_map([], |r| r.get(0))?.collect::<Result<_, _>>()?;
    let fk_valid = dangling.is_empty();
    for id in &dangling {
        errors.push(format!("call_graph edge {id} references a missing symbol"));
    }

    let total_edges: i64 = conn.query_row("SELECT COUNT(*) FROM call_graph", [], |r| r.get(0))?;
    if total_edges == 0 {
        return Ok((fk_valid, 0, true));
    }

    let sample_size = MAX_CALL_GRAPH_SAMPLE_SIZE.min(total_edges as usize);
    let mut stmt = conn.prepare(
        "SELECT s1.name, s2.name FROM call_graph cg \
         JOIN symbols s1 ON cg.caller_symbol_id = s1.id \
         JOIN symbols s2 ON cg.callee_symbol_id = s2.id \
         ORDER BY RANDOM() LIMIT ?1",
    )?;
    let rows: Vec<(String, String)> = stmt
        .query_map([sample_size as i64], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;

    let mut sample_ok = true;
    for (caller, callee) in &rows {
        if caller.is_empty() || callee.is_empty() {
            sample_ok = false;
            errors.push("call_graph sample: empty caller or callee name".to_string());
        }
    }

    Ok((fk_valid, rows.len(), sample_ok))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn systematic_sample_covers_whole_range_when_requested() {
        let idx = systematic_sample(10, 10);
        assert_eq!(idx, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn systematic_sample_spreads_across_the_range() {
        let idx = systematic_sample(100, 5);
        assert_eq!(idx.len(), 5);
        assert!(idx.windows(2).all(|w| w[1] > w[0]));
        assert!(*idx.last().unwrap() < 100);
    }

    #[test]
    fn systematic_sample_empty_when_nothing_to_sample() {
        assert!(systematic_sample(0, 5).is_empty());
        assert!(systematic_sample(5, 0).is_empty());
    }
}
