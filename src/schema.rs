//! Schema DDL for the relational SCIP store.
//!
//! Table-for-table port of the donor's `schema.py`. The legacy
//! `symbol_relationships` table from that file is omitted: nothing in the
//! data model (spec §3) names it and no query operation reads it — only
//! `symbol_references` and `call_graph` are load-bearing derived tables.

use rusqlite::Connection;

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    display_name TEXT,
    kind TEXT,
    signature TEXT,
    documentation TEXT,
    package_id INTEGER,
    enclosing_symbol_id INTEGER
);

CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    relative_path TEXT NOT NULL,
    language TEXT
);

CREATE TABLE IF NOT EXISTS occurrences (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol_id INTEGER NOT NULL REFERENCES symbols(id),
    document_id INTEGER NOT NULL REFERENCES documents(id),
    start_line INTEGER NOT NULL,
    start_char INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    end_char INTEGER NOT NULL,
    role INTEGER,
    enclosing_range_start_line INTEGER,
    enclosing_range_start_char INTEGER,
    enclosing_range_end_line INTEGER,
    enclosing_range_end_char INTEGER,
    syntax_kind TEXT
);

CREATE TABLE IF NOT EXISTS call_graph (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    caller_symbol_id INTEGER NOT NULL REFERENCES symbols(id),
    callee_symbol_id INTEGER NOT NULL REFERENCES symbols(id),
    occurrence_id INTEGER REFERENCES occurrences(id),
    relationship TEXT,
    caller_display_name TEXT,
    callee_display_name TEXT
);

CREATE TABLE IF NOT EXISTS symbol_references (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_symbol_id INTEGER NOT NULL REFERENCES symbols(id),
    to_symbol_id INTEGER NOT NULL REFERENCES symbols(id),
    relationship_type TEXT NOT NULL,
    occurrence_id INTEGER NOT NULL REFERENCES occurrences(id)
);

CREATE VIRTUAL TABLE IF NOT EXISTS symbols_fts USING fts5(
    name, display_name, documentation,
    content=symbols, content_rowid=id
);
";

const CREATE_INDEXES: &str = "
CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
CREATE INDEX IF NOT EXISTS idx_symbols_display_name ON symbols(display_name);
CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);
CREATE INDEX IF NOT EXISTS idx_symbols_enclosing ON symbols(enclosing_symbol_id);
CREATE INDEX IF NOT EXISTS idx_occurrences_symbol ON occurrences(symbol_id);
CREATE INDEX IF NOT EXISTS idx_occurrences_document ON occurrences(document_id);
CREATE INDEX IF NOT EXISTS idx_occurrences_role ON occurrences(role);
CREATE INDEX IF NOT EXISTS idx_occurrences_location ON occurrences(start_line, start_char);
CREATE INDEX IF NOT EXISTS idx_call_graph_caller ON call_graph(caller_symbol_id);
CREATE INDEX IF NOT EXISTS idx_call_graph_callee ON call_graph(callee_symbol_id);
CREATE INDEX IF NOT EXISTS idx_call_graph_occurrence ON call_graph(occurrence_id);
CREATE INDEX IF NOT EXISTS idx_symbol_refs_from ON symbol_references(from_symbol_id);
CREATE INDEX IF NOT EXISTS idx_symbol_refs_to ON symbol_references(to_symbol_id);
CREATE INDEX IF NOT EXISTS idx_symbol_refs_type ON symbol_references(relationship_type);
CREATE INDEX IF NOT EXISTS idx_documents_path ON documents(relative_path);
CREATE INDEX IF NOT EXISTS idx_documents_language ON documents(language);
";

/// Create all tables and the FTS5 virtual table. Safe to call against an
/// existing, empty database file.
pub fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_TABLES)
}

/// Create all secondary indexes. Called once bulk insertion is finished so
/// inserts aren't paying index-maintenance cost during the load.
pub fn create_indexes(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_INDEXES)
}

/// Rebuild the FTS5 shadow tables after the `symbols` table's content has
/// been populated via direct INSERTs (content=symbols doesn't stay in sync
/// on its own without per-row triggers, which this store does not define).
pub fn rebuild_fts(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute("INSERT INTO symbols_fts(symbols_fts) VALUES('rebuild')", [])?;
    Ok(())
}
