//! Synthetic Period Data
//!
//! Generates the two-period measure over the leaf schema and lays it out in
//! the table shape the attribution solver reads.

use crate::error::{Result, SimError};
use crate::hierarchy::HierarchySpec;
use chrono::NaiveDate;
use polars::prelude::*;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Parameters of the baseline draw and the period-over-period noise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Mean of the baseline value per leaf
    pub start_mean: f64,

    /// Standard deviation of the baseline value per leaf
    pub start_sd: f64,

    /// Standard deviation of the relative noise between periods
    pub noise_sd: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            start_mean: 10_000.0,
            start_sd: 2_000.0,
            noise_sd: 0.001,
        }
    }
}

impl GenerationParams {
    pub fn validate(&self) -> Result<()> {
        if !self.start_mean.is_finite() {
            return Err(SimError::Generation("start_mean must be finite".to_string()));
        }
        for (name, value) in [("start_sd", self.start_sd), ("noise_sd", self.noise_sd)] {
            if !value.is_finite() || value < 0.0 {
                return Err(SimError::Generation(format!(
                    "{} must be a non-negative finite number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Where the periods sit in time and what the solver calls the fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodLayout {
    pub baseline_date: NaiveDate,
    pub next_date: NaiveDate,
    pub date_field: String,
    pub measure_field: String,
}

impl Default for PeriodLayout {
    fn default() -> Self {
        Self {
            baseline_date: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or_default(),
            next_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            date_field: "Date".to_string(),
            measure_field: "Units".to_string(),
        }
    }
}

impl PeriodLayout {
    pub const DATE_FORMAT: &'static str = "%Y-%m-%d";

    pub fn validate(&self) -> Result<()> {
        if self.baseline_date >= self.next_date {
            return Err(SimError::Config(format!(
                "baseline date {} must precede next date {}",
                self.baseline_date, self.next_date
            )));
        }
        if self.date_field.trim().is_empty() || self.measure_field.trim().is_empty() {
            return Err(SimError::Config(
                "date and measure field names must be set".to_string(),
            ));
        }
        if self.date_field == self.measure_field {
            return Err(SimError::Config(
                "date and measure fields must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn baseline_text(&self) -> String {
        self.baseline_date.format(Self::DATE_FORMAT).to_string()
    }

    pub fn next_text(&self) -> String {
        self.next_date.format(Self::DATE_FORMAT).to_string()
    }
}

/// Measure values per leaf for both periods, in leaf-schema order
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodDataset {
    pub baseline: Vec<f64>,
    pub next: Vec<f64>,
}

impl PeriodDataset {
    pub fn new(baseline: Vec<f64>, next: Vec<f64>) -> Result<Self> {
        if baseline.len() != next.len() {
            return Err(SimError::Generation(format!(
                "period lengths differ: {} baseline vs {} next",
                baseline.len(),
                next.len()
            )));
        }
        Ok(Self { baseline, next })
    }

    pub fn len(&self) -> usize {
        self.baseline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baseline.is_empty()
    }

    pub fn total_change(&self) -> f64 {
        self.next.iter().sum::<f64>() - self.baseline.iter().sum::<f64>()
    }

    pub fn is_non_negative(&self) -> bool {
        self.baseline.iter().chain(&self.next).all(|v| *v >= 0.0)
    }

    /// Stacks both periods into the solver input table.
    ///
    /// One row per leaf and period: the level columns, the date field and the
    /// measure field.
    pub fn to_solver_frame(&self, spec: &HierarchySpec, layout: &PeriodLayout) -> Result<DataFrame> {
        let leaves = spec.leaf_frame();
        if leaves.height() != self.len() {
            return Err(SimError::Generation(format!(
                "dataset has {} leaves but the hierarchy has {}",
                self.len(),
                leaves.height()
            )));
        }
        for field in [&layout.date_field, &layout.measure_field] {
            if spec.columns().contains(field) {
                return Err(SimError::Config(format!(
                    "field {} collides with a level column",
                    field
                )));
            }
        }

        let mut frame = leaves.vstack(leaves)?;

        let baseline_text = layout.baseline_text();
        let next_text = layout.next_text();
        let dates: Vec<&str> = std::iter::repeat(baseline_text.as_str())
            .take(self.len())
            .chain(std::iter::repeat(next_text.as_str()).take(self.len()))
            .collect();
        let values: Vec<f64> = self.baseline.iter().chain(&self.next).copied().collect();

        frame.with_column(Series::new(layout.date_field.as_str(), dates))?;
        frame.with_column(Series::new(layout.measure_field.as_str(), values))?;
        Ok(frame)
    }

    pub fn write_csv(
        &self,
        spec: &HierarchySpec,
        layout: &PeriodLayout,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        let mut frame = self.to_solver_frame(spec, layout)?;
        write_frame(&mut frame, path.as_ref())
    }
}

/// Writes a frame as CSV with a header row
pub fn write_frame(frame: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(frame)?;
    debug!("Wrote {} rows to {}", frame.height(), path.display());
    Ok(())
}

/// Draws baseline values and noisy next-period values
pub struct SyntheticDataGenerator {
    params: GenerationParams,
}

impl SyntheticDataGenerator {
    pub fn new(params: GenerationParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Baseline ~ Normal(start_mean, start_sd); next = baseline * (1 + Normal(0, noise_sd)).
    /// Both periods are clamped at zero.
    pub fn generate<R: Rng + ?Sized>(&self, spec: &HierarchySpec, rng: &mut R) -> Result<PeriodDataset> {
        let start = Normal::new(self.params.start_mean, self.params.start_sd)
            .map_err(|e| SimError::Generation(format!("invalid baseline distribution: {}", e)))?;
        let noise = Normal::new(0.0, self.params.noise_sd)
            .map_err(|e| SimError::Generation(format!("invalid noise distribution: {}", e)))?;

        let leaf_count = spec.leaf_rows().len();
        let baseline: Vec<f64> = (0..leaf_count)
            .map(|_| start.sample(rng).max(0.0))
            .collect();
        let next: Vec<f64> = baseline
            .iter()
            .map(|value| (value * (1.0 + noise.sample(rng))).max(0.0))
            .collect();

        PeriodDataset::new(baseline, next)
    }
}
