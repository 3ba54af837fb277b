//! Wildcard Matching
//!
//! A level-table row matches a leaf row when every column is either open or
//! equal to the leaf's value. The scalar form is used for single-row checks;
//! the mask form evaluates the same rule over the whole leaf frame at once.

use crate::error::Result;
use crate::hierarchy::{LevelRow, LevelValue};
use polars::prelude::*;

const MASK_COLUMN: &str = "__matched";

impl LevelRow {
    /// Per-column equality, with open columns matching anything
    pub fn matches(&self, leaf: &LevelRow) -> bool {
        self.width() == leaf.width()
            && self
                .values()
                .iter()
                .zip(leaf.values())
                .all(|(level, value)| match level {
                    LevelValue::Open => true,
                    LevelValue::Node(_) => level == value,
                })
    }
}

/// Boolean mask over the rows of `leaves`, true where `row` matches.
///
/// `columns` names the frame columns in the same order as the row's values.
pub fn match_mask(leaves: &DataFrame, columns: &[String], row: &LevelRow) -> Result<BooleanChunked> {
    let predicate = columns
        .iter()
        .zip(row.values())
        .filter_map(|(name, value)| match value {
            LevelValue::Open => None,
            LevelValue::Node(label) => Some(col(name.as_str()).eq(lit(label.as_str()))),
        })
        .reduce(|acc, expr| acc.and(expr));

    let Some(predicate) = predicate else {
        // Overall row: every leaf rolls up into it
        return Ok(BooleanChunked::full(MASK_COLUMN, true, leaves.height()));
    };

    let evaluated = leaves
        .clone()
        .lazy()
        .select([predicate.alias(MASK_COLUMN)])
        .collect()?;

    Ok(evaluated.column(MASK_COLUMN)?.bool()?.clone())
}

/// Indices of the leaf rows matched by `row`
pub fn matched_indices(leaves: &DataFrame, columns: &[String], row: &LevelRow) -> Result<Vec<usize>> {
    let mask = match_mask(leaves, columns, row)?;
    Ok(mask
        .into_iter()
        .enumerate()
        .filter_map(|(idx, hit)| (hit == Some(true)).then_some(idx))
        .collect())
}
