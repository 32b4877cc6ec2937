//! Tabular hierarchy parser
//!
//! Each row of the import file describes one path through the location tree as
//! repeating `(name, type, description)` column triplets, shallowest first:
//!
//! ```text
//! Building,Type,Description,Ward,Type,Description,Bed,Type,Description
//! Main Building,building,,ICU,ward,Intensive care,Bed 1,bed,
//! Main Building,building,,ICU,ward,Intensive care,Bed 2,bed,
//! ```
//!
//! Rows sharing a prefix merge into the same branch, so the example yields one
//! building with one ward holding two beds.

use crate::error::{FormatError, Result};
use crate::model::{Forest, ImportNode, LocationKind, NodeId};
use std::collections::BTreeSet;
use std::io::Read;

/// Columns per hierarchy level: name, type label, description.
pub const TRIPLET_WIDTH: usize = 3;

/// What merging a single row changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowMerge {
    /// Nodes created by this row (0 when the row repeats an existing path).
    pub created: usize,
    /// Non-empty type labels outside the vocabulary that fell back to `room`.
    pub unresolved_labels: Vec<String>,
}

impl Forest {
    /// Merge one row of cells into the forest.
    ///
    /// An empty name ends the row. A trailing partial triplet is ignored.
    pub fn merge_row<S: AsRef<str>>(&mut self, row: &[S]) -> RowMerge {
        let mut merge = RowMerge::default();
        merge_into(self, None, row, &mut merge);
        merge
    }
}

fn merge_into<S: AsRef<str>>(
    forest: &mut Forest,
    parent: Option<NodeId>,
    cells: &[S],
    merge: &mut RowMerge,
) {
    let [name, label, description, tail @ ..] = cells else {
        return;
    };
    let name = name.as_ref().trim();
    if name.is_empty() {
        return;
    }
    let tail_has_data = tail
        .first()
        .is_some_and(|cell| !cell.as_ref().trim().is_empty());

    let id = match forest.find_child(parent, name) {
        Some(existing) => existing,
        None => {
            let label = label.as_ref().trim();
            let kind = match LocationKind::from_label(label) {
                Some(kind) => kind,
                None => {
                    if !label.is_empty() {
                        merge.unresolved_labels.push(label.to_string());
                    }
                    LocationKind::default()
                }
            };
            let description = Some(description.as_ref().trim())
                .filter(|d| !d.is_empty())
                .map(str::to_string);

            merge.created += 1;
            forest.insert(parent, ImportNode::new(name, kind, description))
        }
    };

    if tail_has_data {
        merge_into(forest, Some(id), tail, merge);
    }
}

/// Fold already-split rows into a forest, in row order.
pub fn parse_rows<I, S>(rows: I) -> Forest
where
    I: IntoIterator<Item = Vec<S>>,
    S: AsRef<str>,
{
    let mut forest = Forest::new();
    for row in rows {
        forest.merge_row(&row);
    }
    forest
}

/// Parse a comma separated import file with a header row.
///
/// The header width is checked before any data row is read; every data row must
/// have the same width. Blank rows are skipped.
pub fn parse_csv<R: Read>(reader: R) -> Result<Forest> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let width = reader.headers().map_err(FormatError::from)?.len();
    if width < TRIPLET_WIDTH || width % TRIPLET_WIDTH != 0 {
        return Err(FormatError::HeaderWidth(width).into());
    }

    let mut forest = Forest::new();
    let mut unresolved = BTreeSet::new();
    let mut rows = 0usize;

    for record in reader.records() {
        let record = record.map_err(FormatError::from)?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() != width {
            return Err(FormatError::RowWidth {
                line: record.position().map(|p| p.line()).unwrap_or_default(),
                expected: width,
                found: record.len(),
            }
            .into());
        }

        let cells: Vec<&str> = record.iter().collect();
        let merge = forest.merge_row(&cells);
        unresolved.extend(merge.unresolved_labels);
        rows += 1;
    }

    for label in &unresolved {
        tracing::warn!(label = %label, "Unrecognized location type, defaulting to room");
    }
    tracing::info!(
        rows,
        locations = forest.len(),
        roots = forest.roots().len(),
        levels = width / TRIPLET_WIDTH,
        "Parsed location hierarchy"
    );

    Ok(forest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImportError;
    use locimport_models::LocationMode;

    const HEADER: &str = "Name,Type,Description,Name,Type,Description,Name,Type,Description";

    fn row(line: &str) -> Vec<String> {
        line.split(',').map(str::to_string).collect()
    }

    #[test]
    fn rows_sharing_a_prefix_merge_into_one_branch() {
        let forest = parse_rows([
            row("Main Building,building,desc1,ICU,ward,desc2,Bed 1,bed,descA"),
            row("Main Building,building,desc1,ICU,ward,desc2,Bed 2,bed,descB"),
        ]);

        assert_eq!(forest.len(), 4);
        assert_eq!(forest.roots().len(), 1);

        let building = forest.node(forest.roots()[0]);
        assert_eq!(building.name, "Main Building");
        assert_eq!(building.kind, LocationKind::Building);
        assert_eq!(building.mode, LocationMode::Kind);
        assert_eq!(building.children.len(), 1);

        let icu = forest.node(building.children[0]);
        assert_eq!(icu.kind, LocationKind::Ward);
        let beds: Vec<_> = icu.children.iter().map(|id| forest.node(*id)).collect();
        assert_eq!(beds.len(), 2);
        assert_eq!(beds[0].name, "Bed 1");
        assert_eq!(beds[1].name, "Bed 2");
        assert!(beds.iter().all(|b| b.mode == LocationMode::Instance));
        assert_eq!(beds[1].description.as_deref(), Some("descB"));
    }

    #[test]
    fn duplicate_row_creates_nothing() {
        let mut forest = Forest::new();
        let cells = ["Site A", "site", "", "Wing 1", "wing", ""];
        assert_eq!(forest.merge_row(&cells).created, 2);
        assert_eq!(forest.merge_row(&cells).created, 0);
        assert_eq!(forest.len(), 2);
    }

    #[test]
    fn first_occurrence_keeps_its_attributes() {
        let forest = parse_rows([
            row("Block A,building,first,,,"),
            row("Block A,wing,second,Room 1,room,"),
        ]);
        let block = forest.node(forest.roots()[0]);
        assert_eq!(block.kind, LocationKind::Building);
        assert_eq!(block.description.as_deref(), Some("first"));
        assert_eq!(block.children.len(), 1);
    }

    #[test]
    fn empty_name_terminates_the_row() {
        let mut forest = Forest::new();
        let merge = forest.merge_row(&row("Ward 7,ward,,,bed,orphan,Bed 9,bed,"));
        assert_eq!(merge.created, 1);
        assert!(forest.node(forest.roots()[0]).children.is_empty());

        let merge = forest.merge_row(&["", "ward", "", "Bed 1", "bed", ""]);
        assert_eq!(merge.created, 0);
        assert_eq!(forest.len(), 1);
    }

    #[test]
    fn unknown_label_falls_back_to_room() {
        let mut forest = Forest::new();
        let merge = forest.merge_row(&["Ward 7", "wrad", "", "Cupboard", "", ""]);
        assert_eq!(merge.created, 2);
        assert_eq!(merge.unresolved_labels, vec!["wrad".to_string()]);

        let ward = forest.node(forest.roots()[0]);
        assert_eq!(ward.kind, LocationKind::Room);
        assert_eq!(ward.mode, LocationMode::Kind);
        assert_eq!(forest.node(ward.children[0]).kind, LocationKind::Room);
    }

    #[test]
    fn empty_description_is_absent() {
        let forest = parse_rows([row("Road 1,ROAD,  ")]);
        let road = forest.node(forest.roots()[0]);
        assert_eq!(road.kind, LocationKind::Road);
        assert_eq!(road.description, None);
        assert_eq!(road.operational_status, "U");
        assert_eq!(road.availability_status, "available");
        assert!(road.server_id.is_none());
    }

    #[test]
    fn parse_csv_handles_quotes_and_blank_lines() {
        let input = format!(
            "{HEADER}\n\
             \"Main Building\",building,\"North, east side\",ICU,ward,,\"Bed 1\",bed,\n\
             \n\
             ,,,,,,,,\n\
             Main Building,building,,ICU,ward,,Bed 2,BED,\n\
             Annex,building,,,,,,,\n"
        );
        let forest = parse_csv(input.as_bytes()).unwrap();

        assert_eq!(forest.roots().len(), 2);
        let main = forest.node(forest.roots()[0]);
        assert_eq!(main.description.as_deref(), Some("North, east side"));
        let bed2 = forest.find_path(&["Main Building", "ICU", "Bed 2"]).unwrap();
        assert_eq!(forest.node(bed2).kind, LocationKind::Bed);
        assert_eq!(forest.len(), 5);
    }

    #[test]
    fn header_width_must_be_a_multiple_of_three() {
        for header in ["", "Name,Type", "Name,Type,Description,Name"] {
            let input = format!("{header}\nA,ward,,B\n");
            match parse_csv(input.as_bytes()) {
                Err(ImportError::Format(FormatError::HeaderWidth(_))) => {}
                other => panic!("expected header width error for {header:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn row_width_must_match_header() {
        let input = format!("{HEADER}\nA,building,,B,ward,,C,bed,\nA,building,,B,ward\n");
        match parse_csv(input.as_bytes()) {
            Err(ImportError::Format(FormatError::RowWidth {
                line,
                expected,
                found,
            })) => {
                assert_eq!(line, 3);
                assert_eq!(expected, 9);
                assert_eq!(found, 5);
            }
            other => panic!("expected row width error, got {other:?}"),
        }
    }
}
