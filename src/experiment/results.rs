//! Experiment results
//!
//! One row per (run, method); written as CSV and summarized per
//! configuration, cause count and method.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub configuration: String,
    pub dimensions: usize,
    pub leaves: usize,
    pub num_causes: usize,
    pub method: String,
    pub repetition: usize,
    pub run_seed: u64,
    pub accuracy: f64,
}

/// Mean accuracy for one (configuration, cause count, method) cell
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub configuration: String,
    pub num_causes: usize,
    pub method: String,
    pub runs: usize,
    pub mean_accuracy: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    records: Vec<ResultRecord>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ResultRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = ResultRecord>) {
        self.records.extend(records);
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        info!("Wrote {} result rows to {}", self.records.len(), path.display());
        Ok(())
    }

    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let records = reader
            .deserialize()
            .collect::<std::result::Result<Vec<ResultRecord>, csv::Error>>()?;
        Ok(Self { records })
    }

    pub fn summarize(&self) -> Vec<SummaryRow> {
        let mut cells: BTreeMap<(&str, usize, &str), (usize, f64)> = BTreeMap::new();
        for record in &self.records {
            let cell = cells
                .entry((record.configuration.as_str(), record.num_causes, record.method.as_str()))
                .or_insert((0, 0.0));
            cell.0 += 1;
            cell.1 += record.accuracy;
        }

        cells
            .into_iter()
            .map(|((configuration, num_causes, method), (runs, total))| SummaryRow {
                configuration: configuration.to_string(),
                num_causes,
                method: method.to_string(),
                runs,
                mean_accuracy: total / runs as f64,
            })
            .collect()
    }
}

/// Outcome of a full sweep
#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub master_seed: u64,
    pub total_runs: usize,
    pub failed_runs: usize,
    pub table: ResultTable,
}

impl fmt::Display for ExperimentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(80))?;
        writeln!(f, "EXPERIMENT SUMMARY")?;
        writeln!(f, "{}", "=".repeat(80))?;
        writeln!(f, "Master seed: {}", self.master_seed)?;
        writeln!(
            f,
            "Runs: {} completed, {} abandoned, {} planned",
            self.total_runs - self.failed_runs,
            self.failed_runs,
            self.total_runs
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "{:<20} {:>7} {:<22} {:>5} {:>9}",
            "configuration", "causes", "method", "runs", "accuracy"
        )?;
        for row in self.table.summarize() {
            writeln!(
                f,
                "{:<20} {:>7} {:<22} {:>5} {:>9.4}",
                row.configuration, row.num_causes, row.method, row.runs, row.mean_accuracy
            )?;
        }
        write!(f, "{}", "=".repeat(80))
    }
}
