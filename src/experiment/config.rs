//! Experiment configuration
//!
//! Loaded from JSON; every tunable has a default so a partial file (or none
//! at all) is a valid experiment.

use crate::dataset::{GenerationParams, PeriodLayout};
use crate::error::{Result, SimError};
use crate::hierarchy::{Dimension, HierarchyBuilder};
use crate::injector::InjectionParams;
use crate::labels::RandomLabels;
use crate::scorer::DEFAULT_DELIMITER;
use crate::solver::job::{MAX_HIERARCHIES, MAX_LEVELS};
use crate::solver::retry::{check_wait_secs, secs_to_duration};
use crate::solver::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_METHODS: [&str; 4] = [
    "GreedyTopDown",
    "GreedyBottomUp",
    "FPLP",
    "FPIteratedRegression",
];

/// A named set of dimensions to build one hierarchy from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyConfig {
    pub name: String,
    pub dimensions: Vec<Dimension>,
}

impl HierarchyConfig {
    pub fn new(name: impl Into<String>, dimensions: Vec<Dimension>) -> Self {
        Self {
            name: name.into(),
            dimensions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Solver executable; the CLI and `ATTRIBUTION_SOLVER` can supply it instead
    pub executable: Option<PathBuf>,

    /// Arguments placed before the settings path
    pub args: Vec<String>,

    pub methods: Vec<String>,
    pub timeout_secs: f64,
    pub retry: RetryPolicy,

    /// Pause after an abandoned run
    pub cooldown_secs: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            executable: None,
            args: Vec::new(),
            methods: DEFAULT_METHODS.iter().map(|m| m.to_string()).collect(),
            timeout_secs: 200.0,
            retry: RetryPolicy::default(),
            cooldown_secs: 5.0,
        }
    }
}

impl SolverSettings {
    pub fn timeout(&self) -> Duration {
        secs_to_duration(self.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        secs_to_duration(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Master seed; drawn from entropy and logged when absent
    pub seed: Option<u64>,

    pub repetitions: usize,
    pub causes_per_run: Vec<usize>,
    pub configurations: Vec<HierarchyConfig>,
    pub label_length: usize,
    pub generation: GenerationParams,
    pub injection: InjectionParams,
    pub layout: PeriodLayout,
    pub delimiter: String,
    pub solver: SolverSettings,

    /// Results CSV
    pub output: PathBuf,

    /// Root for per-run scratch directories; the system temp dir otherwise
    pub workspace_dir: Option<PathBuf>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            seed: None,
            repetitions: 1,
            causes_per_run: vec![1, 3, 5],
            configurations: vec![
                HierarchyConfig::new(
                    "modes-2",
                    vec![Dimension::new("H1", 2, 2), Dimension::new("H2", 2, 2)],
                ),
                HierarchyConfig::new(
                    "modes-3",
                    vec![Dimension::new("H1", 2, 3), Dimension::new("H2", 2, 3)],
                ),
            ],
            label_length: RandomLabels::<rand::rngs::StdRng>::DEFAULT_LENGTH,
            generation: GenerationParams::default(),
            injection: InjectionParams::default(),
            layout: PeriodLayout::default(),
            delimiter: DEFAULT_DELIMITER.to_string(),
            solver: SolverSettings::default(),
            output: PathBuf::from("sim_results.csv"),
            workspace_dir: None,
        }
    }
}

impl ExperimentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SimError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            SimError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        info!(
            "Loaded experiment config from {} ({} configurations)",
            path.display(),
            config.configurations.len()
        );
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Runs per full sweep
    pub fn total_runs(&self) -> usize {
        self.repetitions * self.configurations.len() * self.causes_per_run.len()
    }

    pub fn configuration(&self, name: &str) -> Option<&HierarchyConfig> {
        self.configurations.iter().find(|c| c.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.repetitions == 0 {
            return Err(SimError::Config("repetitions must be at least 1".to_string()));
        }
        if self.causes_per_run.is_empty() {
            return Err(SimError::Config("causes_per_run is empty".to_string()));
        }
        if self.causes_per_run.contains(&0) {
            return Err(SimError::Config("cause counts must be positive".to_string()));
        }
        if self.configurations.is_empty() {
            return Err(SimError::Config("no hierarchy configurations".to_string()));
        }
        if self.delimiter.is_empty() {
            return Err(SimError::Config("description delimiter is empty".to_string()));
        }
        // labels are drawn from A-Z
        if self.delimiter.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(SimError::Config(format!(
                "description delimiter {:?} must not contain uppercase letters",
                self.delimiter
            )));
        }

        let mut names = HashSet::new();
        for configuration in &self.configurations {
            if !names.insert(configuration.name.as_str()) {
                return Err(SimError::Config(format!(
                    "duplicate configuration name {}",
                    configuration.name
                )));
            }
            HierarchyBuilder::validate(&configuration.dimensions)?;
            if configuration.dimensions.len() > MAX_HIERARCHIES {
                return Err(SimError::Config(format!(
                    "configuration {} has {} dimensions; the solver accepts {}",
                    configuration.name,
                    configuration.dimensions.len(),
                    MAX_HIERARCHIES
                )));
            }
            if let Some(deep) = configuration.dimensions.iter().find(|d| d.depth > MAX_LEVELS) {
                return Err(SimError::Config(format!(
                    "dimension {} in {} has depth {}; the solver accepts {}",
                    deep.name, configuration.name, deep.depth, MAX_LEVELS
                )));
            }
        }

        self.generation.validate()?;
        self.injection.validate()?;
        self.layout.validate()?;
        self.solver.retry.validate()?;

        if self.solver.methods.is_empty() || self.solver.methods.iter().any(|m| m.trim().is_empty()) {
            return Err(SimError::Config("solver methods must be non-empty".to_string()));
        }
        check_wait_secs("solver.timeout_secs", self.solver.timeout_secs)?;
        if self.solver.timeout_secs == 0.0 {
            return Err(SimError::Config("solver timeout must be positive".to_string()));
        }
        check_wait_secs("solver.cooldown_secs", self.solver.cooldown_secs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injector::ImpactPolicy;

    #[test]
    fn test_defaults_are_valid() {
        let config = ExperimentConfig::default();
        config.validate().unwrap();
        assert_eq!(config.total_runs(), 6);
        assert_eq!(config.solver.methods.len(), 4);
        assert_eq!(config.solver.timeout(), Duration::from_secs(200));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{
            "seed": 42,
            "causes_per_run": [2],
            "configurations": [
                {"name": "flat", "dimensions": [{"name": "A", "depth": 1, "branching_factor": 4}]}
            ],
            "injection": {"policy": "overwrite"},
            "solver": {"methods": ["FPLP"], "retry": {"max_attempts": 1}}
        }"#;
        let config: ExperimentConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.seed, Some(42));
        assert_eq!(config.repetitions, 1);
        assert_eq!(config.injection.policy, ImpactPolicy::Overwrite);
        assert_eq!(config.injection.effect_sd, 0.05);
        assert_eq!(config.solver.retry.max_attempts, 1);
        assert_eq!(config.solver.retry.initial_backoff_secs, 5.0);
        assert_eq!(config.delimiter, ":: ");
        assert_eq!(config.layout.measure_field, "Units");
    }

    #[test]
    fn test_rejects_duplicate_configuration_names() {
        let mut config = ExperimentConfig::default();
        config.configurations[1].name = config.configurations[0].name.clone();
        assert!(matches!(config.validate(), Err(SimError::Config(_))));
    }

    #[test]
    fn test_rejects_dimensions_beyond_solver_limits() {
        let mut config = ExperimentConfig::default();
        config.configurations = vec![HierarchyConfig::new(
            "deep",
            vec![Dimension::new("A", MAX_LEVELS + 1, 1)],
        )];
        assert!(config.validate().is_err());

        config.configurations = vec![HierarchyConfig::new(
            "wide",
            (0..=MAX_HIERARCHIES)
                .map(|i| Dimension::new(format!("D{}", i), 1, 2))
                .collect(),
        )];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_cause_count_and_empty_methods() {
        let mut config = ExperimentConfig::default();
        config.causes_per_run = vec![1, 0];
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.solver.methods.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_waits_too_long_for_a_duration() {
        let config: ExperimentConfig =
            serde_json::from_str(r#"{"solver": {"timeout_secs": 1e20}}"#).unwrap();
        assert!(matches!(config.validate(), Err(SimError::Config(_))));
        // the accessor saturates instead of panicking
        assert_eq!(config.solver.timeout(), Duration::MAX);

        let mut config = ExperimentConfig::default();
        config.solver.cooldown_secs = 1e19;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.solver.timeout_secs = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_delimiter_that_can_appear_in_labels() {
        let mut config = ExperimentConfig::default();
        config.delimiter = "X".to_string();
        assert!(matches!(config.validate(), Err(SimError::Config(_))));

        config.delimiter = " - ".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn test_load_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        let config = ExperimentConfig {
            seed: Some(7),
            repetitions: 2,
            ..ExperimentConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ExperimentConfig::load(&path).unwrap(), config);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ExperimentConfig::load(&path), Err(SimError::Config(_))));
    }
}
