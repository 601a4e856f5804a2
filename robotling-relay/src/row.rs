//! Row assembly: flatten, filter, expand, then check the row against the schema

use crate::expand::{expand, Cell, ExpandError};
use crate::flatten::flatten;
use crate::snapshot::Snapshot;
use crate::topics::{StatusTopic, TopicResolver, ROW_WIDTH};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How accepted fields are placed into columns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnMapping {
    /// Concatenate in the order fields appear in the snapshot
    #[default]
    Positional,
    /// Place each topic at its own schema columns regardless of snapshot order
    ByTopic,
}

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("schema mismatch: assembled {found} values, table has {expected} columns")]
    SchemaMismatch { expected: usize, found: usize },
    #[error("schema mismatch: topic `{0}` missing from snapshot")]
    MissingTopic(&'static str),
    #[error("schema mismatch: topic `{0}` reported more than once")]
    DuplicateTopic(&'static str),
    #[error("malformed value: {0}")]
    Expand(#[from] ExpandError),
}

impl AssembleError {
    pub fn is_schema_mismatch(&self) -> bool {
        !matches!(self, AssembleError::Expand(_))
    }
}

/// One fixed-width status record, always [`ROW_WIDTH`] cells long
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRow {
    cells: Vec<Cell>,
}

impl StatusRow {
    pub fn try_from_cells(cells: Vec<Cell>) -> Result<Self, AssembleError> {
        if cells.len() != ROW_WIDTH {
            return Err(AssembleError::SchemaMismatch {
                expected: ROW_WIDTH,
                found: cells.len(),
            });
        }
        Ok(Self { cells })
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
    }
}

#[derive(Debug, Clone)]
pub struct RowAssembler {
    resolver: TopicResolver,
    mapping: ColumnMapping,
}

impl RowAssembler {
    pub fn new(resolver: TopicResolver, mapping: ColumnMapping) -> Self {
        Self { resolver, mapping }
    }

    pub fn resolver(&self) -> &TopicResolver {
        &self.resolver
    }

    pub fn mapping(&self) -> ColumnMapping {
        self.mapping
    }

    pub fn assemble(&self, snapshot: &Snapshot) -> Result<StatusRow, AssembleError> {
        match self.mapping {
            ColumnMapping::Positional => self.assemble_positional(snapshot),
            ColumnMapping::ByTopic => self.assemble_by_topic(snapshot),
        }
    }

    /// Whitelisted leaves of the snapshot, in encounter order
    fn accepted<'a>(
        &'a self,
        snapshot: &'a Snapshot,
    ) -> impl Iterator<Item = (StatusTopic, &'a Snapshot)> + 'a {
        flatten(snapshot).filter_map(move |(path, value)| {
            let topic = self.resolver.resolve(&path);
            match self.resolver.lookup(&topic) {
                Some(status) => Some((status, value)),
                None => {
                    debug!(%topic, "topic not whitelisted, skipped");
                    None
                }
            }
        })
    }

    fn assemble_positional(&self, snapshot: &Snapshot) -> Result<StatusRow, AssembleError> {
        let mut cells = Vec::with_capacity(ROW_WIDTH);
        for (topic, value) in self.accepted(snapshot) {
            cells.extend(expand(topic, value)?);
        }
        StatusRow::try_from_cells(cells)
    }

    fn assemble_by_topic(&self, snapshot: &Snapshot) -> Result<StatusRow, AssembleError> {
        let mut slots: Vec<Option<Cell>> = vec![None; ROW_WIDTH];
        for (topic, value) in self.accepted(snapshot) {
            let first = topic.first_column();
            if slots[first].is_some() {
                return Err(AssembleError::DuplicateTopic(topic.suffix()));
            }
            for (offset, cell) in expand(topic, value)?.into_iter().enumerate() {
                slots[first + offset] = Some(cell);
            }
        }

        if let Some(missing) = StatusTopic::ALL
            .iter()
            .find(|t| slots[t.first_column()].is_none())
        {
            return Err(AssembleError::MissingTopic(missing.suffix()));
        }
        StatusRow::try_from_cells(slots.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "power": {"motor_load": "[5, 7]", "battery_V": 7.4},
        "sensor": {
            "compass": {"pitch_deg": 1.5, "heading_deg": 270, "roll_deg": -2.0},
            "distance_cm": "[10, 11, 12]",
            "photodiode": 0.3
        },
        "state": "RUN",
        "timestamp_s": 100,
        "debug": {"loop_ms": 12}
    }"#;

    fn assembler(mapping: ColumnMapping) -> RowAssembler {
        RowAssembler::new(TopicResolver::new("robotling_X"), mapping)
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.into())
    }

    fn expected_full_row() -> Vec<Cell> {
        vec![
            Cell::Integer(5),
            Cell::Integer(7),
            text("7.4"),
            text("1.5"),
            text("270"),
            text("-2.0"),
            Cell::Integer(10),
            Cell::Integer(11),
            Cell::Integer(12),
            text("RUN"),
            text("100"),
        ]
    }

    #[test]
    fn test_full_snapshot_assembles_in_schema_order() {
        let snap = Snapshot::parse(FULL).unwrap();
        for mapping in [ColumnMapping::Positional, ColumnMapping::ByTopic] {
            let row = assembler(mapping).assemble(&snap).unwrap();
            assert_eq!(row.cells(), expected_full_row().as_slice());
        }
    }

    #[test]
    fn test_missing_compass_is_schema_mismatch() {
        let snap = Snapshot::parse(
            r#"{"power":{"motor_load":"[5,7]","battery_V":7.4},"sensor":{"distance_cm":"[10,11,12]"},"state":"RUN","timestamp_s":100}"#,
        )
        .unwrap();
        let err = assembler(ColumnMapping::Positional).assemble(&snap).unwrap_err();
        assert!(matches!(err, AssembleError::SchemaMismatch { expected: 11, found: 8 }));
        let err = assembler(ColumnMapping::ByTopic).assemble(&snap).unwrap_err();
        assert!(matches!(err, AssembleError::MissingTopic("sensor/compass/pitch_deg")));
        assert!(err.is_schema_mismatch());
    }

    #[test]
    fn test_foreign_root_contributes_nothing() {
        let snap = Snapshot::parse(FULL).unwrap();
        // the whitelist follows the configured root, the snapshot itself carries no root
        let other = RowAssembler::new(TopicResolver::new("robotling_Y"), ColumnMapping::Positional);
        assert!(other.assemble(&snap).is_ok());
        let none = Snapshot::parse(r#"{"robotling_X": {"state": "RUN"}}"#).unwrap();
        let err = assembler(ColumnMapping::Positional).assemble(&none).unwrap_err();
        assert!(matches!(err, AssembleError::SchemaMismatch { found: 0, .. }));
    }

    #[test]
    fn test_reordered_snapshot_only_aligned_by_topic() {
        let snap = Snapshot::parse(
            r#"{
                "state": "RUN",
                "power": {"battery_V": 7.4, "motor_load": "[5, 7]"},
                "sensor": {
                    "distance_cm": "[10, 11, 12]",
                    "compass": {"pitch_deg": 1.5, "heading_deg": 270, "roll_deg": -2.0}
                },
                "timestamp_s": 100
            }"#,
        )
        .unwrap();

        let positional = assembler(ColumnMapping::Positional).assemble(&snap).unwrap();
        assert_eq!(positional.cells()[0], text("RUN"));
        assert_ne!(positional.cells(), expected_full_row().as_slice());

        let by_topic = assembler(ColumnMapping::ByTopic).assemble(&snap).unwrap();
        assert_eq!(by_topic.cells(), expected_full_row().as_slice());
    }

    #[test]
    fn test_duplicate_topic() {
        // a slash inside a key resolves to the same topic as the nested form
        let snap = Snapshot::parse(
            r#"{"power": {"motor_load": "[1, 2]"}, "power/motor_load": "[3, 4]"}"#,
        )
        .unwrap();
        let err = assembler(ColumnMapping::ByTopic).assemble(&snap).unwrap_err();
        assert!(matches!(err, AssembleError::DuplicateTopic("power/motor_load")));
    }

    #[test]
    fn test_malformed_list_aborts_row() {
        let snap = Snapshot::parse(&FULL.replace("[5, 7]", "[5]")).unwrap();
        let err = assembler(ColumnMapping::Positional).assemble(&snap).unwrap_err();
        assert!(matches!(err, AssembleError::Expand(ExpandError::Arity { .. })));
        assert!(!err.is_schema_mismatch());
    }

    #[test]
    fn test_row_length_invariant() {
        assert!(StatusRow::try_from_cells(vec![Cell::Null; 10]).is_err());
        assert!(StatusRow::try_from_cells(vec![Cell::Null; 12]).is_err());
        assert_eq!(StatusRow::try_from_cells(vec![Cell::Null; 11]).unwrap().cells().len(), 11);
    }
}
