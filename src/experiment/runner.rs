//! Experiment Runner
//!
//! Drives the sweep: repetition x configuration x cause count, every solver
//! method per run. Runs are independent and seeded from a master stream, so a
//! logged master seed reproduces the whole sweep and a run seed reproduces a
//! single run.

use super::config::{ExperimentConfig, HierarchyConfig};
use super::results::{ExperimentReport, ResultRecord, ResultTable};
use super::simulate_run;
use crate::dataset::SyntheticDataGenerator;
use crate::error::{Result, SimError};
use crate::hierarchy::{HierarchyBuilder, HierarchySpec};
use crate::injector::CausalEffectInjector;
use crate::labels::RandomLabels;
use crate::scorer::{AttributionScorer, SolverReport};
use crate::solver::{AttributionSolver, SolverError, SolverJob};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

pub const INPUT_FILE: &str = "input.csv";
pub const JOB_FILE: &str = "job.json";
pub const OUTPUT_FILE: &str = "output.csv";

/// One planned run of the sweep
#[derive(Debug, Clone, Copy)]
pub struct RunPlan<'a> {
    pub configuration: &'a HierarchyConfig,
    pub spec: &'a HierarchySpec,
    pub num_causes: usize,
    pub repetition: usize,
    pub seed: u64,
}

pub struct ExperimentRunner<S: AttributionSolver> {
    config: ExperimentConfig,
    solver: S,
    generator: SyntheticDataGenerator,
    injector: CausalEffectInjector,
}

impl<S: AttributionSolver> ExperimentRunner<S> {
    pub fn new(config: ExperimentConfig, solver: S) -> Result<Self> {
        config.validate()?;
        let generator = SyntheticDataGenerator::new(config.generation.clone())?;
        let injector = CausalEffectInjector::new(config.injection.clone())?;
        Ok(Self {
            config,
            solver,
            generator,
            injector,
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Builds one hierarchy per configuration from the master stream
    pub fn build_hierarchies(&self, master: &mut StdRng) -> Result<Vec<HierarchySpec>> {
        self.config
            .configurations
            .iter()
            .map(|configuration| {
                let mut labels = RandomLabels::with_length(&mut *master, self.config.label_length);
                let spec = HierarchyBuilder.build(&configuration.dimensions, &mut labels)?;
                info!(
                    "Configuration {}: {} leaves, {} level rows",
                    configuration.name,
                    spec.leaf_rows().len(),
                    spec.level_rows().len()
                );
                Ok(spec)
            })
            .collect()
    }

    /// Runs the full sweep.
    ///
    /// Solver failures abandon the run they occur in and the sweep goes on;
    /// any other error stops it, after the rows gathered so far are written
    /// to the configured output.
    pub async fn run(&self) -> Result<ExperimentReport> {
        let master_seed = self.config.seed.unwrap_or_else(rand::random);
        info!("Master seed {}", master_seed);
        let mut master = StdRng::seed_from_u64(master_seed);

        let hierarchies = self.build_hierarchies(&mut master)?;
        let total_runs = self.config.total_runs();
        let mut table = ResultTable::new();
        let mut failed_runs = 0;
        let mut run_number = 0;

        for repetition in 0..self.config.repetitions {
            for (configuration, spec) in self.config.configurations.iter().zip(&hierarchies) {
                for &num_causes in &self.config.causes_per_run {
                    run_number += 1;
                    let plan = RunPlan {
                        configuration,
                        spec,
                        num_causes,
                        repetition,
                        seed: master.gen(),
                    };
                    info!(
                        "Run {}/{}: configuration {}, {} causes, seed {}",
                        run_number, total_runs, configuration.name, num_causes, plan.seed
                    );

                    match self.run_once(&plan).await {
                        Ok(records) => table.extend(records),
                        Err(SimError::Solver(e)) => {
                            failed_runs += 1;
                            if e.is_retryable() {
                                warn!("Abandoning run {} ({}): {}", run_number, e.kind(), e);
                            } else {
                                error!("Abandoning run {} ({}): {}", run_number, e.kind(), e);
                            }
                            tokio::time::sleep(self.config.solver.cooldown()).await;
                        }
                        Err(e) => {
                            error!("Run {} failed, stopping the sweep: {}", run_number, e);
                            self.flush_partial(&table);
                            return Err(e);
                        }
                    }
                }
            }
        }

        info!(
            "Sweep finished: {} of {} runs completed, {} rows",
            total_runs - failed_runs,
            total_runs,
            table.len()
        );

        Ok(ExperimentReport {
            master_seed,
            total_runs,
            failed_runs,
            table,
        })
    }

    /// Simulates one run and scores every method against it.
    ///
    /// Either all methods produce a row or none do.
    pub async fn run_once(&self, plan: &RunPlan<'_>) -> Result<Vec<ResultRecord>> {
        let simulated = simulate_run(
            plan.spec,
            &self.generator,
            &self.injector,
            plan.num_causes,
            plan.seed,
            &self.config.delimiter,
        )?;

        let workspace = self.workspace()?;
        let input_path = workspace.path().join(INPUT_FILE);
        let settings_path = workspace.path().join(JOB_FILE);
        let output_path = workspace.path().join(OUTPUT_FILE);
        simulated
            .dataset
            .write_csv(plan.spec, &self.config.layout, &input_path)?;

        let mut records = Vec::with_capacity(self.config.solver.methods.len());
        for method in &self.config.solver.methods {
            let job = SolverJob::new(
                plan.spec,
                &self.config.layout,
                method,
                &input_path,
                &output_path,
            )?;
            job.write_json(&settings_path)?;

            let report = self.solve(&job, &settings_path).await?;
            let accuracy = AttributionScorer.score(&simulated.truth, &report);
            debug!(
                "{} scored {:.4} on {} causes ({} report lines)",
                method,
                accuracy,
                plan.num_causes,
                report.len()
            );

            records.push(ResultRecord {
                configuration: plan.configuration.name.clone(),
                dimensions: plan.configuration.dimensions.len(),
                leaves: plan.spec.leaf_rows().len(),
                num_causes: plan.num_causes,
                method: method.clone(),
                repetition: plan.repetition,
                run_seed: plan.seed,
                accuracy,
            });
        }

        Ok(records)
    }

    /// One method with retries: invoke, then require and parse the output
    async fn solve(
        &self,
        job: &SolverJob,
        settings_path: &Path,
    ) -> std::result::Result<SolverReport, SolverError> {
        let solver = &self.solver;
        self.config
            .solver
            .retry
            .run(move |attempt| async move {
                debug!("{} attempt {}", job.method, attempt);
                // stale output from a previous method or attempt must not be scored
                if job.output_path.exists() {
                    std::fs::remove_file(&job.output_path)
                        .map_err(|e| SolverError::MalformedOutput(e.to_string()))?;
                }

                solver.solve(job, settings_path).await?;

                if !job.output_path.exists() {
                    return Err(SolverError::MissingOutput(job.output_path.clone()));
                }
                SolverReport::load_csv(&job.output_path)
                    .map_err(|e| SolverError::MalformedOutput(e.to_string()))
            })
            .await
    }

    fn flush_partial(&self, table: &ResultTable) {
        if table.is_empty() {
            return;
        }
        match table.write_csv(&self.config.output) {
            Ok(()) => warn!(
                "Saved {} rows from the stopped sweep to {}",
                table.len(),
                self.config.output.display()
            ),
            Err(e) => error!("Failed to save {} rows from the stopped sweep: {}", table.len(), e),
        }
    }

    fn workspace(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("attribution-run-");
        let dir = match &self.config.workspace_dir {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}
