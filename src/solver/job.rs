//! Solver Job Settings
//!
//! Typed form of the JSON settings file the solver reads. Field names on the
//! wire follow the solver's own conventions.

use crate::dataset::PeriodLayout;
use crate::error::{Result, SimError};
use crate::hierarchy::HierarchySpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Most hierarchies the solver's table can describe
pub const MAX_HIERARCHIES: usize = 5;

/// Most levels per hierarchy the solver's table can describe
pub const MAX_LEVELS: usize = 5;

pub const LEGACY_OUTPUT: &str = "Legacy";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverJob {
    #[serde(rename = "SelectedStartDateText")]
    pub start_date: String,

    #[serde(rename = "SelectedEndDateText")]
    pub end_date: String,

    #[serde(rename = "DateFieldName")]
    pub date_field: String,

    /// Restricts the analysis to a rollup; empty means the whole table
    #[serde(rename = "RollupSelection")]
    pub rollup_selection: String,

    #[serde(rename = "DataFieldName")]
    pub data_field: String,

    #[serde(rename = "dataUnits")]
    pub data_units: String,

    #[serde(rename = "CSVFilePath")]
    pub input_path: PathBuf,

    #[serde(rename = "HierLabels")]
    pub hierarchy_labels: Vec<String>,

    /// One row per hierarchy listing its level columns, padded to 5x5
    #[serde(rename = "FullHierTable")]
    pub hierarchy_table: Vec<Vec<String>>,

    #[serde(rename = "IsStaticAnalysis")]
    pub is_static_analysis: bool,

    #[serde(rename = "SolverMethodToUse")]
    pub method: String,

    #[serde(rename = "CSVOutputType")]
    pub output_type: String,

    #[serde(rename = "OutFilePath")]
    pub output_path: PathBuf,
}

impl SolverJob {
    pub fn new(
        spec: &HierarchySpec,
        layout: &PeriodLayout,
        method: &str,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let hierarchy_labels: Vec<String> = spec
            .dimensions()
            .iter()
            .map(|dimension| dimension.name.clone())
            .collect();

        let job = Self {
            start_date: layout.baseline_text(),
            end_date: layout.next_text(),
            date_field: layout.date_field.clone(),
            rollup_selection: String::new(),
            data_field: layout.measure_field.clone(),
            data_units: layout.measure_field.clone(),
            input_path: input_path.into(),
            hierarchy_labels,
            hierarchy_table: padded_table(&spec.dimension_columns())?,
            is_static_analysis: false,
            method: method.to_string(),
            output_type: LEGACY_OUTPUT.to_string(),
            output_path: output_path.into(),
        };
        job.validate()?;
        Ok(job)
    }

    /// Same job with another method
    pub fn with_method(&self, method: &str) -> Self {
        Self {
            method: method.to_string(),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.method.trim().is_empty() {
            return Err(SimError::Config("solver method is not set".to_string()));
        }
        if self.input_path.as_os_str().is_empty() || self.output_path.as_os_str().is_empty() {
            return Err(SimError::Config(
                "solver input and output paths must be set".to_string(),
            ));
        }
        if self.date_field.is_empty() || self.data_field.is_empty() {
            return Err(SimError::Config(
                "date and data field names must be set".to_string(),
            ));
        }
        if self.hierarchy_labels.is_empty() || self.hierarchy_labels.len() > MAX_HIERARCHIES {
            return Err(SimError::Config(format!(
                "solver accepts 1 to {} hierarchies, got {}",
                MAX_HIERARCHIES,
                self.hierarchy_labels.len()
            )));
        }
        if self.hierarchy_table.len() != MAX_HIERARCHIES
            || self.hierarchy_table.iter().any(|row| row.len() != MAX_LEVELS)
        {
            return Err(SimError::Config(format!(
                "hierarchy table must be {}x{}",
                MAX_HIERARCHIES, MAX_LEVELS
            )));
        }
        Ok(())
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        debug!("Wrote solver job ({}) to {}", self.method, path.display());
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let job: Self = serde_json::from_str(&content)?;
        job.validate()?;
        Ok(job)
    }
}

/// Pads per-hierarchy level column lists into the fixed-size table
fn padded_table(columns: &[Vec<String>]) -> Result<Vec<Vec<String>>> {
    if columns.len() > MAX_HIERARCHIES {
        return Err(SimError::Config(format!(
            "{} hierarchies exceed the solver limit of {}",
            columns.len(),
            MAX_HIERARCHIES
        )));
    }

    let mut table = Vec::with_capacity(MAX_HIERARCHIES);
    for levels in columns {
        if levels.len() > MAX_LEVELS {
            return Err(SimError::Config(format!(
                "hierarchy with {} levels exceeds the solver limit of {}",
                levels.len(),
                MAX_LEVELS
            )));
        }
        let mut row = levels.clone();
        row.resize(MAX_LEVELS, String::new());
        table.push(row);
    }
    table.resize(MAX_HIERARCHIES, vec![String::new(); MAX_LEVELS]);
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{Dimension, HierarchyBuilder};
    use crate::labels::RandomLabels;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn spec(dimensions: &[Dimension]) -> HierarchySpec {
        let mut rng = StdRng::seed_from_u64(11);
        let mut labels = RandomLabels::new(&mut rng);
        HierarchyBuilder.build(dimensions, &mut labels).unwrap()
    }

    #[test]
    fn test_job_uses_solver_key_names() {
        let spec = spec(&[Dimension::new("Region", 2, 2), Dimension::new("Product", 1, 2)]);
        let job = SolverJob::new(
            &spec,
            &PeriodLayout::default(),
            "GreedyTopDown",
            "/tmp/in.csv",
            "/tmp/out.csv",
        )
        .unwrap();

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["SelectedStartDateText"], "2019-01-01");
        assert_eq!(value["SelectedEndDateText"], "2020-01-01");
        assert_eq!(value["DataFieldName"], "Units");
        assert_eq!(value["RollupSelection"], "");
        assert_eq!(value["IsStaticAnalysis"], false);
        assert_eq!(value["CSVOutputType"], "Legacy");
        assert_eq!(value["SolverMethodToUse"], "GreedyTopDown");
        assert_eq!(value["HierLabels"], serde_json::json!(["Region", "Product"]));
        assert_eq!(value["FullHierTable"][0][1], "Region_L2");
        assert_eq!(value["FullHierTable"][1][0], "Product_L1");
        assert_eq!(value["FullHierTable"][1][1], "");
        assert_eq!(value["FullHierTable"][4][4], "");
    }

    #[test]
    fn test_table_is_always_five_by_five() {
        let table = padded_table(&[vec!["A_L1".to_string()]]).unwrap();
        assert_eq!(table.len(), MAX_HIERARCHIES);
        assert!(table.iter().all(|row| row.len() == MAX_LEVELS));
    }

    #[test]
    fn test_rejects_too_many_levels() {
        let spec = spec(&[Dimension::new("Deep", 6, 1)]);
        let result = SolverJob::new(&spec, &PeriodLayout::default(), "FPLP", "in.csv", "out.csv");
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn test_rejects_missing_method() {
        let spec = spec(&[Dimension::new("A", 1, 2)]);
        let result = SolverJob::new(&spec, &PeriodLayout::default(), " ", "in.csv", "out.csv");
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn test_json_file_reloads() {
        let spec = spec(&[Dimension::new("A", 2, 3)]);
        let job = SolverJob::new(&spec, &PeriodLayout::default(), "FPLP", "in.csv", "out.csv")
            .unwrap()
            .with_method("GreedyBottomUp");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        job.write_json(&path).unwrap();
        let loaded = SolverJob::load_json(&path).unwrap();
        assert_eq!(loaded.method, "GreedyBottomUp");
        assert_eq!(loaded, job);
    }
}
