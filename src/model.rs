//! Plain record types shared by the reader, builder, and query engine.
//!
//! Nothing here touches SQLite or protobuf directly; it is the common
//! vocabulary the rest of the crate is built on.

use serde::Serialize;

/// SCIP `symbol_roles` bitmask bits.
pub mod role {
    pub const DEFINITION: i32 = 1;
    pub const IMPORT: i32 = 2;
    pub const WRITE_ACCESS: i32 = 4;
    pub const READ_ACCESS: i32 = 8;
    pub const GENERATED: i32 = 16;
    pub const TEST: i32 = 32;
}

/// A source position as `(line, column)`, both zero-indexed per SCIP convention.
pub type Position = (i32, i32);

/// A source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// Normalize a SCIP range array (2, 3, or 4 elements) into a `Range`.
///
/// Any other shape is degenerate: start is `(range[0] or 0, 0)`, end = start.
pub fn normalize_range(range: &[i32]) -> Range {
    match range.len() {
        2 => Range {
            start: (range[0], range[1]),
            end: (range[0], range[1]),
        },
        3 => Range {
            start: (range[0], range[1]),
            end: (range[0], range[2]),
        },
        n if n >= 4 => Range {
            start: (range[0], range[1]),
            end: (range[2], range[3]),
        },
        _ => {
            let line = range.first().copied().unwrap_or(0);
            Range {
                start: (line, 0),
                end: (line, 0),
            }
        }
    }
}

/// A 4-tuple enclosing range, stored verbatim when the protobuf supplies one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnclosingRange {
    pub start_line: i32,
    pub start_char: i32,
    pub end_line: i32,
    pub end_char: i32,
}

pub fn normalize_enclosing_range(range: &[i32]) -> Option<EnclosingRange> {
    if range.len() >= 4 {
        Some(EnclosingRange {
            start_line: range[0],
            start_char: range[1],
            end_line: range[2],
            end_char: range[3],
        })
    } else {
        None
    }
}

/// A parsed `SymbolInformation` record, before it has a database ID.
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub name: String,
    pub display_name: Option<String>,
    pub kind: Option<String>,
    pub signature: Option<String>,
    pub documentation: Option<String>,
}

/// A parsed `Occurrence`, tagged with the index of its owning document.
#[derive(Debug, Clone)]
pub struct OccurrenceRecord {
    pub symbol_name: String,
    pub document_index: usize,
    pub range: Range,
    pub role: i32,
    pub enclosing_range: Option<EnclosingRange>,
}

impl OccurrenceRecord {
    pub fn is_definition(&self) -> bool {
        self.role & role::DEFINITION != 0
    }
}

/// A parsed `Document` (without its occurrences/symbols, which are tracked
/// separately by index to mirror the protobuf's own shape).
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub relative_path: String,
    pub language: Option<String>,
}

/// The relationship tag attached to a derived edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
    Import,
    Write,
    Calls,
    Reference,
}

impl Relationship {
    pub fn as_str(self) -> &'static str {
        match self {
            Relationship::Import => "import",
            Relationship::Write => "write",
            Relationship::Calls => "calls",
            Relationship::Reference => "reference",
        }
    }
}

impl std::str::FromStr for Relationship {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "import" => Ok(Relationship::Import),
            "write" => Ok(Relationship::Write),
            "calls" => Ok(Relationship::Calls),
            "reference" => Ok(Relationship::Reference),
            _ => Err(()),
        }
    }
}

/// Classify an occurrence's relationship by the highest-priority role bit set.
///
/// Priority: ReadAccess > WriteAccess > Import > reference. ReadAccess is
/// checked first because SCIP frequently sets it together with Import.
pub fn classify_role(role_bits: i32) -> Relationship {
    if role_bits & role::READ_ACCESS != 0 {
        Relationship::Calls
    } else if role_bits & role::WRITE_ACCESS != 0 {
        Relationship::Write
    } else if role_bits & role::IMPORT != 0 {
        Relationship::Import
    } else {
        Relationship::Reference
    }
}

/// True for SCIP "local " symbols, which never act as an enclosing/caller symbol.
pub fn is_local_symbol(name: &str) -> bool {
    name.starts_with("local ")
}

/// Derive the display name the ETL synthesizes for an externally-referenced
/// symbol not present in the protobuf symbol table: the last `/`-separated
/// segment, with a trailing `#` or `.` stripped.
pub fn external_symbol_display_name(symbol_name: &str) -> String {
    let last_segment = symbol_name.rsplit('/').next().unwrap_or(symbol_name);
    last_segment
        .strip_suffix('#')
        .or_else(|| last_segment.strip_suffix('.'))
        .unwrap_or(last_segment)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_two_element_range() {
        let r = normalize_range(&[4, 6]);
        assert_eq!(r.start, (4, 6));
        assert_eq!(r.end, (4, 6));
    }

    #[test]
    fn normalizes_three_element_range() {
        let r = normalize_range(&[4, 6, 12]);
        assert_eq!(r.start, (4, 6));
        assert_eq!(r.end, (4, 12));
    }

    #[test]
    fn normalizes_four_element_range() {
        let r = normalize_range(&[4, 6, 5, 2]);
        assert_eq!(r.start, (4, 6));
        assert_eq!(r.end, (5, 2));
    }

    #[test]
    fn degenerate_range_falls_back_to_single_point() {
        let r = normalize_range(&[7]);
        assert_eq!(r.start, (7, 0));
        assert_eq!(r.end, (7, 0));

        let r = normalize_range(&[]);
        assert_eq!(r.start, (0, 0));
        assert_eq!(r.end, (0, 0));
    }

    #[test]
    fn classify_role_prefers_read_access_over_everything() {
        use role::*;
        assert_eq!(classify_role(READ_ACCESS | IMPORT), Relationship::Calls);
        assert_eq!(classify_role(WRITE_ACCESS), Relationship::Write);
        assert_eq!(classify_role(IMPORT), Relationship::Import);
        assert_eq!(classify_role(GENERATED), Relationship::Reference);
    }

    #[test]
    fn external_display_name_strips_trailing_delimiters() {
        assert_eq!(
            external_symbol_display_name("python stdlib/os/path#join()."),
            "join()"
        );
        assert_eq!(
            external_symbol_display_name("python stdlib/os/Path#"),
            "Path"
        );
        assert_eq!(external_symbol_display_name("bareword"), "bareword");
    }

    #[test]
    fn local_symbols_are_recognized() {
        assert!(is_local_symbol("local 5"));
        assert!(!is_local_symbol("python test/Foo#"));
    }
}
