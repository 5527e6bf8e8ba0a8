//! Protobuf Reader (spec §4.1): decodes a `.scip` file into the plain
//! record types the rest of the crate works with.
//!
//! Grounded in `builder.py::_parse_symbols`/`_parse_occurrences`/
//! `_extract_symbol_fields`/`_extract_occurrence_fields`. The `scip`/`protobuf`
//! crate calls mirror the teacher's `src/graph/export/scip.rs`, run in the
//! opposite direction (decoding an `Index`, not constructing one).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use protobuf::Message;
use scip::types::{symbol_information::Kind, Index};

use crate::model::{
    normalize_enclosing_range, normalize_range, DocumentRecord, OccurrenceRecord, SymbolRecord,
};

/// Everything the builder and verifier need from one `.scip` file.
pub struct ParsedIndex {
    pub documents: Vec<DocumentRecord>,
    /// External symbols first, then each document's own symbols, in
    /// document order — matching the ordering the builder depends on for
    /// external-symbol precedence.
    pub symbols: Vec<SymbolRecord>,
    pub occurrences: Vec<OccurrenceRecord>,
}

/// Parse the protobuf `Index` message at `path` and flatten it.
pub fn read(path: &Path) -> Result<ParsedIndex> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read SCIP file at {}", path.display()))?;
    let index = Index::parse_from_bytes(&bytes)
        .with_context(|| format!("failed to decode SCIP protobuf at {}", path.display()))?;

    let mut symbols = Vec::with_capacity(index.external_symbols.len());
    for sym in &index.external_symbols {
        symbols.push(extract_symbol(sym));
    }

    let mut documents = Vec::with_capacity(index.documents.len());
    let mut occurrences = Vec::new();

    for (doc_index, doc) in index.documents.iter().enumerate() {
        documents.push(DocumentRecord {
            relative_path: doc.relative_path.clone(),
            language: if doc.language.is_empty() {
                None
            } else {
                Some(doc.language.clone())
            },
        });

        for sym in &doc.symbols {
            symbols.push(extract_symbol(sym));
        }

        for occ in &doc.occurrences {
            occurrences.push(extract_occurrence(occ, doc_index));
        }
    }

    Ok(ParsedIndex {
        documents,
        symbols,
        occurrences,
    })
}

fn extract_symbol(sym: &scip::types::SymbolInformation) -> SymbolRecord {
    let kind = if sym.kind.enum_value_or_default() == Kind::UnspecifiedKind {
        None
    } else {
        sym.kind
            .enum_value()
            .ok()
            .map(|k| format!("{k:?}"))
    };
    let signature = if sym.signature_documentation.is_some() {
        let text = &sym.signature_documentation.text;
        if text.is_empty() {
            None
        } else {
            Some(text.clone())
        }
    } else {
        None
    };
    let documentation = sym.documentation.first().cloned();

    SymbolRecord {
        name: sym.symbol.clone(),
        display_name: if sym.display_name.is_empty() {
            None
        } else {
            Some(sym.display_name.clone())
        },
        kind,
        signature,
        documentation,
    }
}

fn extract_occurrence(occ: &scip::types::Occurrence, doc_index: usize) -> OccurrenceRecord {
    OccurrenceRecord {
        symbol_name: occ.symbol.clone(),
        document_index: doc_index,
        range: normalize_range(&occ.range),
        role: occ.symbol_roles,
        enclosing_range: normalize_enclosing_range(&occ.enclosing_range),
    }
}
