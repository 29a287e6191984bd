//! Board schemes.
//!
//! Two representations travel in scheme files and in `WELCOME`:
//! - legacy: a whitespace-separated list of `row col` pairs
//! - typed: a scan format naming the columns of a cell stream and a link stream
//!
//! ```text
//! {"meta": {...},
//!  "scheme": {"scanfmt": "ROW COL [TC] \\ CI0 CI1 TL",
//!             "cells": "0 0 0 0 1 3 ...",
//!             "links": "0 1 2 ..."}}
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use super::cell::{CellId, Pos};
use super::graph::CellGraph;

/// Scheme parsing errors. All of them abort the build.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemeError {
    /// Scan format lacks the `\` separator.
    #[error("scan format {0:?} has no '\\' separator")]
    MissingSeparator(String),
    /// Scan format lacks a required column.
    #[error("scan format is missing required field {0}")]
    MissingField(&'static str),
    /// Token is not an integer in range.
    #[error("invalid token {0:?}")]
    BadToken(String),
    /// Stream length is not a multiple of its record width.
    #[error("{stream} stream has {len} values, not a multiple of {width}")]
    RecordLength {
        /// `cells` or `links`.
        stream: &'static str,
        /// Number of values.
        len: usize,
        /// Values per record.
        width: usize,
    },
    /// Legacy coordinate list with an odd number of values.
    #[error("legacy scheme has an odd number of coordinates ({0})")]
    OddCoordinates(usize),
    /// Link references a cell index that does not exist.
    #[error("cell index {index} out of range ({cells} cells)")]
    IndexOutOfRange {
        /// Offending index.
        index: usize,
        /// Number of cells.
        cells: usize,
    },
    /// Unknown `TC` value.
    #[error("unknown cell type {0}")]
    UnknownCellType(i64),
    /// Unknown `TL` value.
    #[error("unknown link type {0}")]
    UnknownLinkType(i64),
    /// Two typed records claim the same position.
    #[error("duplicate cell at {0:?}")]
    DuplicatePosition(Pos),
    /// Scheme file could not be read.
    #[error("cannot read scheme: {0}")]
    Io(String),
    /// Scheme file is not valid JSON.
    #[error("invalid scheme json: {0}")]
    Json(String),
}

// =============================================================================
// SCHEME FILE
// =============================================================================

/// Typed scheme streams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedScheme {
    /// Column layout, `cell fields \ link fields`.
    pub scanfmt: String,
    /// Cell stream.
    pub cells: String,
    /// Link stream.
    #[serde(default)]
    pub links: String,
}

/// Board topology in either representation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scheme {
    /// Scan-format streams.
    Typed(TypedScheme),
    /// `row col` pairs; adjacency is inferred.
    Legacy(String),
}

impl Scheme {
    /// Full `rows x cols` rectangle as a legacy scheme.
    pub fn rectangle(rows: i32, cols: i32) -> Self {
        let mut coords = Vec::new();
        for row in 0..rows {
            for col in 0..cols {
                coords.push(format!("{row} {col}"));
            }
        }
        Scheme::Legacy(coords.join(" "))
    }

    /// True for the typed representation.
    pub fn is_typed(&self) -> bool {
        matches!(self, Scheme::Typed(_))
    }
}

/// Scheme file on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemeFile {
    /// Free-form metadata (author, title, ...).
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
    /// The topology.
    pub scheme: Scheme,
}

impl SchemeFile {
    /// Wrap a scheme without metadata.
    pub fn new(scheme: Scheme) -> Self {
        Self {
            meta: serde_json::Map::new(),
            scheme,
        }
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, SchemeError> {
        serde_json::from_str(json).map_err(|e| SchemeError::Json(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, SchemeError> {
        serde_json::to_string_pretty(self).map_err(|e| SchemeError::Json(e.to_string()))
    }

    /// Read and parse a scheme file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemeError> {
        let text = std::fs::read_to_string(path).map_err(|e| SchemeError::Io(e.to_string()))?;
        Self::from_json(&text)
    }
}

// =============================================================================
// SCAN FORMAT
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CellField {
    Row,
    Col,
    Type,
    Skip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LinkField {
    Out,
    In,
    Type,
    Skip,
}

/// Direction(s) of a link record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkType {
    /// `CI0 -> CI1`.
    Out = 0,
    /// `CI1 -> CI0`.
    In = 1,
    /// Both directions.
    Both = 2,
}

impl LinkType {
    fn from_value(value: i64) -> Result<Self, SchemeError> {
        match value {
            0 => Ok(LinkType::Out),
            1 => Ok(LinkType::In),
            2 => Ok(LinkType::Both),
            other => Err(SchemeError::UnknownLinkType(other)),
        }
    }
}

/// One cell record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellRecord {
    /// Position.
    pub pos: Pos,
    /// Raw `TC` value, 0 when the column is absent.
    pub type_code: i64,
}

/// One link record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkRecord {
    /// `CI0`.
    pub first: usize,
    /// `CI1`.
    pub second: usize,
    /// `TL`, [`LinkType::Both`] when the column is absent.
    pub link_type: LinkType,
}

impl LinkRecord {
    /// Directed edges described by this record, as cell indices.
    pub fn edges(&self) -> Vec<(usize, usize)> {
        match self.link_type {
            LinkType::Out => vec![(self.first, self.second)],
            LinkType::In => vec![(self.second, self.first)],
            LinkType::Both => vec![(self.first, self.second), (self.second, self.first)],
        }
    }
}

/// Parsed `scanfmt`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanFormat {
    cell_fields: Vec<CellField>,
    link_fields: Vec<LinkField>,
}

fn strip_brackets(token: &str) -> &str {
    token.trim_matches(|c| c == '[' || c == ']')
}

fn tokens(stream: &str) -> Result<Vec<i64>, SchemeError> {
    stream
        .split_whitespace()
        .map(|t| t.parse::<i64>().map_err(|_| SchemeError::BadToken(t.to_string())))
        .collect()
}

fn to_i32(value: i64) -> Result<i32, SchemeError> {
    i32::try_from(value).map_err(|_| SchemeError::BadToken(value.to_string()))
}

fn to_index(value: i64) -> Result<usize, SchemeError> {
    usize::try_from(value).map_err(|_| SchemeError::BadToken(value.to_string()))
}

impl ScanFormat {
    /// Parse a scan format such as `ROW COL [TC] \ CI0 CI1 TL`.
    ///
    /// Unknown column names are skipped; `ROW COL CI0 CI1` are required.
    pub fn parse(fmt: &str) -> Result<Self, SchemeError> {
        let (cells, links) = fmt
            .split_once('\\')
            .ok_or_else(|| SchemeError::MissingSeparator(fmt.to_string()))?;

        let cell_fields: Vec<CellField> = cells
            .split_whitespace()
            .map(strip_brackets)
            .filter(|t| !t.is_empty())
            .map(|t| match t {
                "ROW" => CellField::Row,
                "COL" => CellField::Col,
                "TC" => CellField::Type,
                _ => CellField::Skip,
            })
            .collect();
        let link_fields: Vec<LinkField> = links
            .split_whitespace()
            .map(strip_brackets)
            .filter(|t| !t.is_empty())
            .map(|t| match t {
                "CI0" => LinkField::Out,
                "CI1" => LinkField::In,
                "TL" => LinkField::Type,
                _ => LinkField::Skip,
            })
            .collect();

        for (field, name) in [(CellField::Row, "ROW"), (CellField::Col, "COL")] {
            if !cell_fields.contains(&field) {
                return Err(SchemeError::MissingField(name));
            }
        }
        for (field, name) in [(LinkField::Out, "CI0"), (LinkField::In, "CI1")] {
            if !link_fields.contains(&field) {
                return Err(SchemeError::MissingField(name));
            }
        }

        Ok(Self { cell_fields, link_fields })
    }

    /// Decode the cell stream.
    pub fn cell_records(&self, stream: &str) -> Result<Vec<CellRecord>, SchemeError> {
        let values = tokens(stream)?;
        let width = self.cell_fields.len();
        if values.len() % width != 0 {
            return Err(SchemeError::RecordLength { stream: "cells", len: values.len(), width });
        }
        values
            .chunks(width)
            .map(|chunk| {
                let mut record = CellRecord { pos: (0, 0), type_code: 0 };
                for (field, value) in self.cell_fields.iter().zip(chunk) {
                    match field {
                        CellField::Row => record.pos.0 = to_i32(*value)?,
                        CellField::Col => record.pos.1 = to_i32(*value)?,
                        CellField::Type => record.type_code = *value,
                        CellField::Skip => {}
                    }
                }
                Ok(record)
            })
            .collect()
    }

    /// Decode the link stream.
    pub fn link_records(&self, stream: &str) -> Result<Vec<LinkRecord>, SchemeError> {
        let values = tokens(stream)?;
        let width = self.link_fields.len();
        if values.len() % width != 0 {
            return Err(SchemeError::RecordLength { stream: "links", len: values.len(), width });
        }
        values
            .chunks(width)
            .map(|chunk| {
                let mut record = LinkRecord { first: 0, second: 0, link_type: LinkType::Both };
                for (field, value) in self.link_fields.iter().zip(chunk) {
                    match field {
                        LinkField::Out => record.first = to_index(*value)?,
                        LinkField::In => record.second = to_index(*value)?,
                        LinkField::Type => record.link_type = LinkType::from_value(*value)?,
                        LinkField::Skip => {}
                    }
                }
                Ok(record)
            })
            .collect()
    }
}

/// Decode a legacy coordinate list. Duplicates are kept; the builder skips them.
pub fn legacy_positions(coords: &str) -> Result<Vec<Pos>, SchemeError> {
    let values = tokens(coords)?;
    if values.len() % 2 != 0 {
        return Err(SchemeError::OddCoordinates(values.len()));
    }
    values
        .chunks(2)
        .map(|pair| Ok((to_i32(pair[0])?, to_i32(pair[1])?)))
        .collect()
}

// =============================================================================
// SAVER
// =============================================================================

/// Scan format written by [`Saver::classic`].
pub const CLASSIC_SCANFMT: &str = "ROW COL \\ CI0 CI1 TL";
/// Scan format written by [`Saver::extended`].
pub const EXTENDED_SCANFMT: &str = "ROW COL TC \\ CI0 CI1 TL";

/// Serializes a graph back into a scheme.
pub struct Saver;

impl Saver {
    /// `row col` pairs in creation order. Links are not stored.
    pub fn legacy(graph: &CellGraph) -> Scheme {
        let coords: Vec<String> = graph
            .cells()
            .map(|(_, cell)| format!("{} {}", cell.pos.0, cell.pos.1))
            .collect();
        Scheme::Legacy(coords.join(" "))
    }

    /// Positions and links, variants dropped.
    pub fn classic(graph: &CellGraph) -> Scheme {
        Self::typed(graph, false)
    }

    /// Positions, variants and links.
    pub fn extended(graph: &CellGraph) -> Scheme {
        Self::typed(graph, true)
    }

    fn typed(graph: &CellGraph, with_types: bool) -> Scheme {
        let index: BTreeMap<CellId, usize> = graph.ids().enumerate().map(|(i, id)| (id, i)).collect();

        let mut cells = Vec::new();
        for (_, cell) in graph.cells() {
            cells.push(cell.pos.0.to_string());
            cells.push(cell.pos.1.to_string());
            if with_types {
                cells.push(cell.kind.code().to_string());
            }
        }

        let mut counts: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        for (a, b) in graph.edges() {
            if let (Some(a), Some(b)) = (index.get(&a), index.get(&b)) {
                *counts.entry((*a, *b)).or_default() += 1;
            }
        }

        let mut links = Vec::new();
        let mut push = |a: usize, b: usize, tl: u8| {
            links.push(format!("{a} {b} {tl}"));
        };
        for (&(a, b), &count) in &counts {
            if a == b {
                for _ in 0..count {
                    push(a, b, LinkType::Out as u8);
                }
            } else if a < b {
                let back = counts.get(&(b, a)).copied().unwrap_or(0);
                let both = count.min(back);
                for _ in 0..both {
                    push(a, b, LinkType::Both as u8);
                }
                for _ in both..count {
                    push(a, b, LinkType::Out as u8);
                }
                for _ in both..back {
                    push(b, a, LinkType::Out as u8);
                }
            } else if !counts.contains_key(&(b, a)) {
                for _ in 0..count {
                    push(a, b, LinkType::Out as u8);
                }
            }
        }

        Scheme::Typed(TypedScheme {
            scanfmt: (if with_types { EXTENDED_SCANFMT } else { CLASSIC_SCANFMT }).to_string(),
            cells: cells.join(" "),
            links: links.join(" "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::cell::CellKind;

    #[test]
    fn test_scanfmt_with_optional_type() {
        let fmt = ScanFormat::parse("ROW COL [TC] \\ CI0 CI1 TL").unwrap();
        let cells = fmt.cell_records("0 0 3 0 1 10").unwrap();
        assert_eq!(cells[0], CellRecord { pos: (0, 0), type_code: 3 });
        assert_eq!(cells[1], CellRecord { pos: (0, 1), type_code: 10 });

        let links = fmt.link_records("0 1 0 1 0 2").unwrap();
        assert_eq!(links[0].edges(), vec![(0, 1)]);
        assert_eq!(links[1].edges(), vec![(1, 0), (0, 1)]);
    }

    #[test]
    fn test_scanfmt_defaults_and_unknown_fields() {
        let fmt = ScanFormat::parse("COL ROW NOTE \\ CI1 CI0").unwrap();
        let cells = fmt.cell_records("5 2 99").unwrap();
        assert_eq!(cells[0], CellRecord { pos: (2, 5), type_code: 0 });
        let links = fmt.link_records("3 4").unwrap();
        assert_eq!(links[0], LinkRecord { first: 4, second: 3, link_type: LinkType::Both });
    }

    #[test]
    fn test_scanfmt_errors() {
        assert!(matches!(ScanFormat::parse("ROW COL CI0 CI1"), Err(SchemeError::MissingSeparator(_))));
        assert_eq!(ScanFormat::parse("ROW \\ CI0 CI1"), Err(SchemeError::MissingField("COL")));
        assert_eq!(ScanFormat::parse("ROW COL \\ CI0"), Err(SchemeError::MissingField("CI1")));

        let fmt = ScanFormat::parse(CLASSIC_SCANFMT).unwrap();
        assert_eq!(
            fmt.cell_records("0 0 1"),
            Err(SchemeError::RecordLength { stream: "cells", len: 3, width: 2 })
        );
        assert_eq!(fmt.link_records("0 1 7"), Err(SchemeError::UnknownLinkType(7)));
        assert_eq!(fmt.link_records("0 -1 2"), Err(SchemeError::BadToken("-1".into())));
        assert_eq!(fmt.cell_records("0 x"), Err(SchemeError::BadToken("x".into())));
    }

    #[test]
    fn test_legacy_positions() {
        assert_eq!(legacy_positions("0 0  0 1\n-1 4").unwrap(), vec![(0, 0), (0, 1), (-1, 4)]);
        assert_eq!(legacy_positions("0 0 1"), Err(SchemeError::OddCoordinates(3)));
    }

    #[test]
    fn test_scheme_file_json_shapes() {
        let typed = r#"{"meta": {"title": "ring"},
            "scheme": {"scanfmt": "ROW COL \\ CI0 CI1 TL", "cells": "0 0 0 1", "links": "0 1 2"}}"#;
        let file = SchemeFile::from_json(typed).unwrap();
        assert!(file.scheme.is_typed());
        assert_eq!(file.meta.get("title").and_then(|v| v.as_str()), Some("ring"));

        let legacy = r#"{"scheme": "0 0 0 1"}"#;
        let file = SchemeFile::from_json(legacy).unwrap();
        assert_eq!(file.scheme, Scheme::Legacy("0 0 0 1".into()));

        let back = SchemeFile::from_json(&file.to_json().unwrap()).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn test_extended_saver_folds_opposite_edges() {
        let mut graph = CellGraph::new();
        let a = graph.insert((0, 0), CellKind::Standard).unwrap();
        let b = graph.insert((0, 1), CellKind::Logic).unwrap();
        graph.link(a, b).unwrap();
        graph.link(b, a).unwrap();
        graph.link(a, b).unwrap();
        graph.link(b, b).unwrap();

        let Scheme::Typed(typed) = Saver::extended(&graph) else {
            panic!("extended saver must write a typed scheme");
        };
        assert_eq!(typed.scanfmt, EXTENDED_SCANFMT);
        assert_eq!(typed.cells, "0 0 0 0 1 10");
        assert_eq!(typed.links, "0 1 2 0 1 0 1 1 0");
    }

    #[test]
    fn test_classic_saver_drops_types() {
        let mut graph = CellGraph::new();
        graph.insert((3, 4), CellKind::Protected).unwrap();
        let Scheme::Typed(typed) = Saver::classic(&graph) else {
            panic!("classic saver must write a typed scheme");
        };
        assert_eq!(typed.scanfmt, CLASSIC_SCANFMT);
        assert_eq!(typed.cells, "3 4");
        assert_eq!(typed.links, "");
    }

    #[test]
    fn test_rectangle() {
        assert_eq!(Scheme::rectangle(2, 2), Scheme::Legacy("0 0 0 1 1 0 1 1".into()));
        assert_eq!(Saver::legacy(&CellGraph::new()), Scheme::Legacy(String::new()));
    }
}
