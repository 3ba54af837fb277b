//! Rollup Hierarchies
//!
//! Builds the dimensional schema for a simulation: the leaf schema (every
//! fully specified combination of level values) and the level table (every
//! rollup node, with `(Open)` standing in for aggregated columns).
//!
//! Each dimension is grown independently as a tree from its all-wildcard root.
//! The cross-dimension tables are the Cartesian product of the per-dimension
//! row sets.

use crate::error::{Result, SimError};
use crate::labels::LabelSource;
use itertools::Itertools;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Wildcard value meaning "aggregate over this column"
pub const OPEN_VALUE: &str = "(Open)";

/// Largest level table a hierarchy may expand to
pub const MAX_LEVEL_ROWS: usize = 10_000_000;

/// One independent hierarchy axis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    /// Dimension name, used as the prefix of its level columns
    pub name: String,

    /// Number of levels below the root
    pub depth: usize,

    /// Children per node
    pub branching_factor: usize,
}

impl Dimension {
    pub fn new(name: impl Into<String>, depth: usize, branching_factor: usize) -> Self {
        Self {
            name: name.into(),
            depth,
            branching_factor,
        }
    }

    /// Level column names, outermost level first (`<name>_L1`, `<name>_L2`, ...)
    pub fn column_names(&self) -> Vec<String> {
        (1..=self.depth)
            .map(|level| format!("{}_L{}", self.name, level))
            .collect()
    }

    /// Nodes across all levels, excluding the root; `None` on overflow
    pub fn node_count(&self) -> Option<usize> {
        let mut total: usize = 0;
        let mut width: usize = 1;
        for _ in 0..self.depth {
            width = width.checked_mul(self.branching_factor)?;
            total = total.checked_add(width)?;
        }
        Some(total)
    }

    pub fn leaf_count(&self) -> Option<usize> {
        let depth = u32::try_from(self.depth).ok()?;
        self.branching_factor.checked_pow(depth)
    }
}

/// A single column value in a level-table row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelValue {
    Open,
    Node(String),
}

impl LevelValue {
    pub fn is_open(&self) -> bool {
        matches!(self, LevelValue::Open)
    }

    pub fn as_str(&self) -> &str {
        match self {
            LevelValue::Open => OPEN_VALUE,
            LevelValue::Node(label) => label,
        }
    }
}

impl fmt::Display for LevelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the level table (or, with no wildcards, of the leaf schema).
///
/// Values are stored in fixed column order: dimensions in declaration
/// order, levels outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LevelRow {
    values: Vec<LevelValue>,
}

impl LevelRow {
    pub fn new(values: Vec<LevelValue>) -> Self {
        Self { values }
    }

    /// The all-wildcard row of the given width
    pub fn open(width: usize) -> Self {
        Self {
            values: vec![LevelValue::Open; width],
        }
    }

    pub fn values(&self) -> &[LevelValue] {
        &self.values
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }

    pub fn wildcard_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_open()).count()
    }

    /// True for the fully open root ("Overall")
    pub fn is_overall(&self) -> bool {
        self.values.iter().all(LevelValue::is_open)
    }

    pub fn is_leaf(&self) -> bool {
        self.wildcard_count() == 0
    }

    fn with_value(&self, column: usize, value: LevelValue) -> Self {
        let mut values = self.values.clone();
        values[column] = value;
        Self { values }
    }

    fn concat<'a>(parts: impl IntoIterator<Item = &'a LevelRow>) -> Self {
        Self {
            values: parts
                .into_iter()
                .flat_map(|part| part.values.iter().cloned())
                .collect(),
        }
    }
}

/// Rows produced for a single dimension
#[derive(Debug, Clone, Default)]
struct DimensionRows {
    level_rows: Vec<LevelRow>,
    leaf_rows: Vec<LevelRow>,
}

/// Built hierarchy: dimensions plus their derived tables
#[derive(Debug, Clone)]
pub struct HierarchySpec {
    dimensions: Vec<Dimension>,
    columns: Vec<String>,
    leaf_rows: Vec<LevelRow>,
    level_rows: Vec<LevelRow>,
    leaf_frame: DataFrame,
}

impl HierarchySpec {
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// All level columns across dimensions, in row order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Level columns grouped per dimension
    pub fn dimension_columns(&self) -> Vec<Vec<String>> {
        self.dimensions.iter().map(Dimension::column_names).collect()
    }

    pub fn leaf_rows(&self) -> &[LevelRow] {
        &self.leaf_rows
    }

    pub fn level_rows(&self) -> &[LevelRow] {
        &self.level_rows
    }

    pub fn level_row(&self, index: usize) -> Option<&LevelRow> {
        self.level_rows.get(index)
    }

    /// Leaf schema as a frame with one string column per level column
    pub fn leaf_frame(&self) -> &DataFrame {
        &self.leaf_frame
    }

    /// Level table as a frame, wildcards rendered as `(Open)`
    pub fn level_frame(&self) -> Result<DataFrame> {
        rows_to_frame(&self.columns, &self.level_rows)
    }

    /// Level-table size implied by the dimensions alone; `None` on overflow
    pub fn expected_level_count(dimensions: &[Dimension]) -> Option<usize> {
        dimensions.iter().try_fold(1usize, |acc, d| {
            acc.checked_mul(d.node_count()?.checked_add(1)?)
        })
    }

    /// Leaf-schema size implied by the dimensions alone; `None` on overflow
    pub fn expected_leaf_count(dimensions: &[Dimension]) -> Option<usize> {
        dimensions
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(d.leaf_count()?))
    }
}

/// Builds hierarchy specs from dimension parameters
pub struct HierarchyBuilder;

impl HierarchyBuilder {
    pub fn build(
        &self,
        dimensions: &[Dimension],
        labels: &mut dyn LabelSource,
    ) -> Result<HierarchySpec> {
        Self::validate(dimensions)?;

        let mut level_sets = Vec::with_capacity(dimensions.len());
        let mut leaf_sets = Vec::with_capacity(dimensions.len());
        for dimension in dimensions {
            let rows = grow(LevelRow::open(dimension.depth), 0, dimension, labels);
            debug!(
                "Dimension {}: {} level rows, {} leaf rows",
                dimension.name,
                rows.level_rows.len(),
                rows.leaf_rows.len()
            );
            level_sets.push(rows.level_rows);
            leaf_sets.push(rows.leaf_rows);
        }

        let columns: Vec<String> = dimensions.iter().flat_map(Dimension::column_names).collect();
        let leaf_rows = cross(&leaf_sets);
        let level_rows = cross(&level_sets);
        let leaf_frame = rows_to_frame(&columns, &leaf_rows)?;

        debug!(
            "Built hierarchy with {} leaves and {} level rows",
            leaf_rows.len(),
            level_rows.len()
        );

        Ok(HierarchySpec {
            dimensions: dimensions.to_vec(),
            columns,
            leaf_rows,
            level_rows,
            leaf_frame,
        })
    }

    pub fn validate(dimensions: &[Dimension]) -> Result<()> {
        if dimensions.is_empty() {
            return Err(SimError::Generation(
                "at least one dimension is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for dimension in dimensions {
            if dimension.name.trim().is_empty() {
                return Err(SimError::Generation("dimension name is empty".to_string()));
            }
            if !names.insert(dimension.name.as_str()) {
                return Err(SimError::Generation(format!(
                    "duplicate dimension name: {}",
                    dimension.name
                )));
            }
            if dimension.depth == 0 {
                return Err(SimError::Generation(format!(
                    "dimension {} has depth 0",
                    dimension.name
                )));
            }
            if dimension.branching_factor == 0 {
                return Err(SimError::Generation(format!(
                    "dimension {} has branching factor 0",
                    dimension.name
                )));
            }
        }

        match HierarchySpec::expected_level_count(dimensions) {
            Some(rows) if rows <= MAX_LEVEL_ROWS => Ok(()),
            Some(rows) => Err(SimError::Generation(format!(
                "hierarchy expands to {} level rows; at most {} are supported",
                rows, MAX_LEVEL_ROWS
            ))),
            None => Err(SimError::Generation(
                "hierarchy size overflows the addressable row count".to_string(),
            )),
        }
    }
}

/// Grows the subtree under `row`, assigning labels to column `level`.
///
/// Returns every node visited (including `row` itself) and the depth-terminal
/// nodes, in pre-order.
fn grow(
    row: LevelRow,
    level: usize,
    dimension: &Dimension,
    labels: &mut dyn LabelSource,
) -> DimensionRows {
    let mut rows = DimensionRows {
        level_rows: vec![row.clone()],
        leaf_rows: Vec::new(),
    };

    for _ in 0..dimension.branching_factor {
        let child = row.with_value(level, LevelValue::Node(labels.next_label()));
        if level + 1 == dimension.depth {
            rows.level_rows.push(child.clone());
            rows.leaf_rows.push(child);
        } else {
            let subtree = grow(child, level + 1, dimension, labels);
            rows.level_rows.extend(subtree.level_rows);
            rows.leaf_rows.extend(subtree.leaf_rows);
        }
    }

    rows
}

/// Row-wise merge of every combination across dimensions; the first dimension varies slowest
fn cross(row_sets: &[Vec<LevelRow>]) -> Vec<LevelRow> {
    row_sets
        .iter()
        .map(|rows| rows.iter())
        .multi_cartesian_product()
        .map(LevelRow::concat)
        .collect()
}

fn rows_to_frame(columns: &[String], rows: &[LevelRow]) -> Result<DataFrame> {
    let series: Vec<Series> = columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let values: Vec<&str> = rows.iter().map(|row| row.values()[idx].as_str()).collect();
            Series::new(name.as_str(), values)
        })
        .collect();

    Ok(DataFrame::new(series)?)
}
