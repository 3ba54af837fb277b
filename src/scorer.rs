//! Attribution Scoring
//!
//! Reconciles a solver's attribution report against the injected ground
//! truth. Causes are matched by description string; a cause earns credit only
//! when the solver reports the same direction, and never more than the true
//! magnitude.

use crate::error::{Result, SimError};
use crate::hierarchy::{HierarchySpec, LevelRow, LevelValue};
use crate::injector::TrueImpacts;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

pub const OVERALL_DESCRIPTION: &str = "Overall";
pub const DEFAULT_DELIMITER: &str = ":: ";
pub const DESCRIPTION_COLUMN: &str = "Description";
pub const NET_IMPACT_COLUMN: &str = "Net Impact";

/// Canonical description of a level row: the non-wildcard values in column
/// order joined by `delimiter`, or `Overall` for the fully open row.
pub fn describe(row: &LevelRow, delimiter: &str) -> String {
    let parts: Vec<&str> = row
        .values()
        .iter()
        .filter(|value| !value.is_open())
        .map(LevelValue::as_str)
        .collect();

    if parts.is_empty() {
        OVERALL_DESCRIPTION.to_string()
    } else {
        parts.join(delimiter)
    }
}

/// Solver output aggregated by description
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolverReport {
    impacts: HashMap<String, f64>,
}

impl SolverReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a report from raw lines; repeated descriptions are summed
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut report = Self::new();
        for (description, impact) in lines {
            report.add(description, impact);
        }
        report
    }

    pub fn add(&mut self, description: impl Into<String>, impact: f64) {
        let description = description.into().trim().to_string();
        *self.impacts.entry(description).or_insert(0.0) += impact;
    }

    /// Net impact reported for `description`, zero when absent
    pub fn impact(&self, description: &str) -> f64 {
        self.impacts.get(description).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.impacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.impacts.is_empty()
    }

    /// Reads a solver output CSV with `Description` and `Net Impact` columns.
    ///
    /// Other columns are ignored; rows with a null description or impact are
    /// skipped.
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // Infer over every row: a long run of integer impacts must not pin the
        // column to an integer type before a decimal shows up
        let frame = LazyCsvReader::new(path)
            .with_has_header(true)
            .with_infer_schema_length(None)
            .finish()?
            .collect()?;

        let names = frame.get_column_names();
        for required in [DESCRIPTION_COLUMN, NET_IMPACT_COLUMN] {
            if !names.contains(&required) {
                return Err(SimError::Report(format!(
                    "{} is missing column {}",
                    path.display(),
                    required
                )));
            }
        }

        let aggregated = frame
            .lazy()
            .select([
                col(DESCRIPTION_COLUMN).cast(DataType::String),
                col(NET_IMPACT_COLUMN).strict_cast(DataType::Float64),
            ])
            .group_by([col(DESCRIPTION_COLUMN)])
            .agg([col(NET_IMPACT_COLUMN).sum()])
            .collect()
            .map_err(|e| {
                SimError::Report(format!(
                    "{} has a non-numeric {} value: {}",
                    path.display(),
                    NET_IMPACT_COLUMN,
                    e
                ))
            })?;

        let descriptions = aggregated.column(DESCRIPTION_COLUMN)?.str()?;
        let impacts = aggregated.column(NET_IMPACT_COLUMN)?.f64()?;

        let mut report = Self::new();
        for (description, impact) in descriptions.into_iter().zip(impacts.into_iter()) {
            if let (Some(description), Some(impact)) = (description, impact) {
                report.add(description, impact);
            }
        }

        debug!(
            "Loaded solver report {} with {} descriptions",
            path.display(),
            report.len()
        );
        Ok(report)
    }
}

/// One ground-truth cause as the solver would describe it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthEntry {
    #[serde(rename = "Description")]
    pub description: String,

    #[serde(rename = "Impact")]
    pub impact: f64,
}

/// Description-keyed ground truth for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundTruth {
    entries: Vec<TruthEntry>,
}

impl GroundTruth {
    pub fn new(entries: Vec<TruthEntry>) -> Self {
        Self { entries }
    }

    pub fn from_impacts(truth: &TrueImpacts, spec: &HierarchySpec, delimiter: &str) -> Result<Self> {
        let entries = truth
            .impacts()
            .iter()
            .map(|(&level_index, &impact)| {
                let row = spec.level_row(level_index).ok_or_else(|| {
                    SimError::Generation(format!("level index {} out of range", level_index))
                })?;
                Ok(TruthEntry {
                    description: describe(row, delimiter),
                    impact,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[TruthEntry] {
        &self.entries
    }

    pub fn total_abs_impact(&self) -> f64 {
        self.entries.iter().map(|e| e.impact.abs()).sum()
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let entries = reader
            .deserialize()
            .collect::<std::result::Result<Vec<TruthEntry>, csv::Error>>()?;
        Ok(Self { entries })
    }
}

impl TrueImpacts {
    /// Description-keyed view of the impacts, as the solver would report them
    pub fn ground_truth(&self, spec: &HierarchySpec, delimiter: &str) -> Result<GroundTruth> {
        GroundTruth::from_impacts(self, spec, delimiter)
    }
}

/// Credit for a single cause: the overlap of true and reported magnitude when
/// both are non-zero and point the same way, otherwise nothing.
pub fn captured_impact(true_impact: f64, reported_impact: f64) -> f64 {
    if true_impact != 0.0
        && reported_impact != 0.0
        && true_impact.signum() == reported_impact.signum()
    {
        true_impact.abs().min(reported_impact.abs())
    } else {
        0.0
    }
}

/// Recall-style accuracy of a solver report
pub struct AttributionScorer;

impl AttributionScorer {
    /// Share of the total true |impact| the report captured, in [0, 1].
    ///
    /// Extra causes in the report are not penalized. Returns 0 when no cause
    /// had any effect.
    pub fn score(&self, truth: &GroundTruth, report: &SolverReport) -> f64 {
        let total = truth.total_abs_impact();
        if total == 0.0 {
            return 0.0;
        }

        let captured: f64 = truth
            .entries()
            .iter()
            .map(|entry| captured_impact(entry.impact, report.impact(&entry.description)))
            .sum();

        (captured / total).clamp(0.0, 1.0)
    }
}
