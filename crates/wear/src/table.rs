//! The depth table produced by a batch: one column per worn image, one row
//! per tooth.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr, VariantNames};

/// Relative error under which a measurement agrees with its reference.
pub const REFERENCE_TOLERANCE_PERCENT: f64 = 5.0;

#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, VariantNames, IntoStaticStr,
    PartialEq, Eq, Default
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TableMode {
    /// Rows keyed by tooth index, with a leading `Tooth` column
    MultiTooth,
    /// A single row for one tooth across all images
    #[default]
    SingleTooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKey {
    Tooth(u32),
    Single,
}

/// A cell never holds a placeholder number: unmeasured stays unmeasured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", content = "depth_um", rename_all = "snake_case")]
pub enum Cell {
    Measured(f64),
    Unmeasured,
}

impl Cell {
    pub fn value(&self) -> Option<f64> {
        match self {
            Cell::Measured(v) => Some(*v),
            Cell::Unmeasured => None,
        }
    }

    /// One decimal, or an empty field.
    pub fn formatted(&self) -> String {
        match self {
            Cell::Measured(v) => format!("{v:.1}"),
            Cell::Unmeasured => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub key: RowKey,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTable {
    mode: TableMode,
    columns: Vec<String>,
    rows: Vec<TableRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub column: String,
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnComparison {
    pub column: String,
    pub measured: Option<f64>,
    pub reference: f64,
    pub error_um: Option<f64>,
    pub abs_percent_error: Option<f64>,
    pub within_tolerance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceComparison {
    pub columns: Vec<ColumnComparison>,
    /// Mean absolute error over the columns that were measured.
    pub mean_abs_error_um: Option<f64>,
}

impl ResultTable {
    /// Every cell starts unmeasured. `tooth_indices` is ignored in
    /// single-tooth mode.
    pub fn new(mode: TableMode, columns: Vec<String>, tooth_indices: &[u32]) -> Self {
        let mut keys: Vec<RowKey> = match mode {
            TableMode::SingleTooth => vec![RowKey::Single],
            TableMode::MultiTooth => tooth_indices.iter().map(|&t| RowKey::Tooth(t)).collect(),
        };
        keys.sort();
        keys.dedup();
        let rows = keys
            .into_iter()
            .map(|key| TableRow {
                key,
                cells: vec![Cell::Unmeasured; columns.len()],
            })
            .collect();
        Self {
            mode,
            columns,
            rows,
        }
    }

    pub fn mode(&self) -> TableMode {
        self.mode
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn row_key(&self, tooth_index: u32) -> RowKey {
        match self.mode {
            TableMode::SingleTooth => RowKey::Single,
            TableMode::MultiTooth => RowKey::Tooth(tooth_index),
        }
    }

    pub fn cell(&self, key: RowKey, column: &str) -> Option<Cell> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.cells[col])
    }

    /// Returns `false` when the row or column does not exist.
    pub(crate) fn set(&mut self, key: RowKey, column: &str, cell: Cell) -> bool {
        let Some(col) = self.columns.iter().position(|c| c == column) else {
            return false;
        };
        match self.rows.iter_mut().find(|r| r.key == key) {
            Some(row) => {
                row.cells[col] = cell;
                true
            }
            None => false,
        }
    }

    /// Column names, led by `Tooth` in multi-tooth mode.
    pub fn header(&self) -> Vec<String> {
        let lead = (self.mode == TableMode::MultiTooth).then(|| "Tooth".to_string());
        lead.into_iter().chain(self.columns.iter().cloned()).collect()
    }

    /// Formatted rows matching [`ResultTable::header`].
    pub fn records(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                let lead = match row.key {
                    RowKey::Tooth(t) => Some(t.to_string()),
                    RowKey::Single => None,
                };
                lead.into_iter()
                    .chain(row.cells.iter().map(Cell::formatted))
                    .collect()
            })
            .collect()
    }

    /// Statistics over the measured cells of each column; columns with no
    /// measurement are left out.
    pub fn column_stats(&self) -> Vec<ColumnStats> {
        self.columns
            .iter()
            .enumerate()
            .filter_map(|(col, name)| {
                let values: Vec<f64> = self
                    .rows
                    .iter()
                    .filter_map(|r| r.cells[col].value())
                    .collect();
                if values.is_empty() {
                    return None;
                }
                let count = values.len();
                let mean = values.iter().sum::<f64>() / count as f64;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Some(ColumnStats {
                    column: name.clone(),
                    count,
                    mean,
                    std_dev: variance.sqrt(),
                    min,
                    max,
                    range: max - min,
                })
            })
            .collect()
    }

    /// Compare one row against reference depths keyed by column name.
    pub fn compare_to_reference(
        &self,
        reference: &BTreeMap<String, f64>,
        key: RowKey,
    ) -> ReferenceComparison {
        let columns: Vec<ColumnComparison> = self
            .columns
            .iter()
            .filter_map(|name| {
                let reference = *reference.get(name)?;
                let measured = self.cell(key, name).and_then(|c| c.value());
                let error_um = measured.map(|m| m - reference);
                let abs_percent_error = error_um
                    .filter(|_| reference != 0.0)
                    .map(|e| (e / reference).abs() * 100.0);
                Some(ColumnComparison {
                    column: name.clone(),
                    measured,
                    reference,
                    error_um,
                    abs_percent_error,
                    within_tolerance: abs_percent_error
                        .is_some_and(|p| p <= REFERENCE_TOLERANCE_PERCENT),
                })
            })
            .collect();

        let errors: Vec<f64> = columns.iter().filter_map(|c| c.error_um).map(f64::abs).collect();
        let mean_abs_error_um =
            (!errors.is_empty()).then(|| errors.iter().sum::<f64>() / errors.len() as f64);
        ReferenceComparison {
            columns,
            mean_abs_error_um,
        }
    }
}
