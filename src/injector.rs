//! Causal Effect Injection
//!
//! Picks hidden causes from the level table, perturbs the next-period values
//! of the leaves each cause rolls up, and records the realized impact per
//! cause as ground truth.

use crate::dataset::PeriodDataset;
use crate::error::{Result, SimError};
use crate::hierarchy::HierarchySpec;
use crate::matching::matched_indices;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// What happens when the same level row is drawn more than once in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactPolicy {
    /// Each draw is an independent cause; impacts add up in the row's slot
    #[default]
    Accumulate,

    /// The last draw's impact replaces earlier ones
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionParams {
    /// Standard deviation of the base effect (relative change) per cause
    pub effect_sd: f64,

    /// Per-leaf spread around the base effect, as a fraction of |base effect|
    pub effect_jitter_pct: f64,

    pub policy: ImpactPolicy,
}

impl Default for InjectionParams {
    fn default() -> Self {
        Self {
            effect_sd: 0.05,
            effect_jitter_pct: 0.1,
            policy: ImpactPolicy::Accumulate,
        }
    }
}

impl InjectionParams {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("effect_sd", self.effect_sd),
            ("effect_jitter_pct", self.effect_jitter_pct),
        ] {
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

/// One drawn cause and what it did to the data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cause {
    /// Row of the level table this cause sits on
    pub level_index: usize,

    /// Base relative effect drawn for the cause
    pub base_effect: f64,

    /// Number of leaves the cause touched
    pub matched_leaves: usize,

    /// Realized change after clipping at zero
    pub impact: f64,
}

/// Ground-truth impacts for one run, keyed by level-table row
#[derive(Debug, Clone, PartialEq)]
pub struct TrueImpacts {
    policy: ImpactPolicy,
    causes: Vec<Cause>,
    impacts: BTreeMap<usize, f64>,
}

impl TrueImpacts {
    pub fn new(policy: ImpactPolicy) -> Self {
        Self {
            policy,
            causes: Vec::new(),
            impacts: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, cause: Cause) {
        match self.policy {
            ImpactPolicy::Accumulate => {
                *self.impacts.entry(cause.level_index).or_insert(0.0) += cause.impact;
            }
            ImpactPolicy::Overwrite => {
                self.impacts.insert(cause.level_index, cause.impact);
            }
        }
        self.causes.push(cause);
    }

    pub fn policy(&self) -> ImpactPolicy {
        self.policy
    }

    /// Every draw, in draw order
    pub fn causes(&self) -> &[Cause] {
        &self.causes
    }

    /// One slot per distinct level row that was drawn
    pub fn impacts(&self) -> &BTreeMap<usize, f64> {
        &self.impacts
    }

    pub fn impact(&self, level_index: usize) -> f64 {
        self.impacts.get(&level_index).copied().unwrap_or(0.0)
    }

    pub fn total_abs_impact(&self) -> f64 {
        self.impacts.values().map(|v| v.abs()).sum()
    }
}

pub struct CausalEffectInjector {
    params: InjectionParams,
}

impl CausalEffectInjector {
    pub fn new(params: InjectionParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &InjectionParams {
        &self.params
    }

    /// Draws `num_causes` level rows (uniformly, with replacement) and applies
    /// each in draw order. Effects on shared leaves compose multiplicatively.
    pub fn inject<R: Rng + ?Sized>(
        &self,
        spec: &HierarchySpec,
        dataset: &mut PeriodDataset,
        num_causes: usize,
        rng: &mut R,
    ) -> Result<TrueImpacts> {
        let level_count = spec.level_rows().len();
        if level_count == 0 {
            return Err(SimError::Generation("level table is empty".to_string()));
        }

        let effect = Normal::new(0.0, self.params.effect_sd)
            .map_err(|e| SimError::Generation(format!("invalid effect distribution: {}", e)))?;

        let draws: Vec<usize> = (0..num_causes)
            .map(|_| rng.gen_range(0..level_count))
            .collect();

        let mut truth = TrueImpacts::new(self.params.policy);
        for level_index in draws {
            let base_effect = effect.sample(rng);
            let cause = self.apply_cause(spec, dataset, level_index, base_effect, rng)?;
            truth.record(cause);
        }

        debug!(
            "Injected {} causes over {} distinct rows, total |impact| {:.2}",
            truth.causes().len(),
            truth.impacts().len(),
            truth.total_abs_impact()
        );

        Ok(truth)
    }

    /// Applies one cause with a fixed base effect.
    ///
    /// Each matched leaf gets its own effect drawn from
    /// Normal(base, |base| * jitter); the new value is clipped at zero and the
    /// realized differences are summed.
    pub fn apply_cause<R: Rng + ?Sized>(
        &self,
        spec: &HierarchySpec,
        dataset: &mut PeriodDataset,
        level_index: usize,
        base_effect: f64,
        rng: &mut R,
    ) -> Result<Cause> {
        let row = spec.level_row(level_index).ok_or_else(|| {
            SimError::Generation(format!("level index {} out of range", level_index))
        })?;
        if dataset.len() != spec.leaf_rows().len() {
            return Err(SimError::Generation(format!(
                "dataset has {} leaves but the hierarchy has {}",
                dataset.len(),
                spec.leaf_rows().len()
            )));
        }

        let jitter = Normal::new(base_effect, base_effect.abs() * self.params.effect_jitter_pct)
            .map_err(|e| SimError::Generation(format!("invalid jitter distribution: {}", e)))?;

        let matched = matched_indices(spec.leaf_frame(), spec.columns(), row)?;
        let mut impact = 0.0;
        for &leaf in &matched {
            let effect = jitter.sample(rng);
            let old = dataset.next[leaf];
            let new = (old * (1.0 + effect)).max(0.0);
            dataset.next[leaf] = new;
            impact += new - old;
        }

        Ok(Cause {
            level_index,
            base_effect,
            matched_leaves: matched.len(),
            impact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{GenerationParams, SyntheticDataGenerator};
    use crate::hierarchy::{Dimension, HierarchyBuilder};
    use crate::labels::RandomLabels;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn build(dimensions: &[Dimension], seed: u64) -> HierarchySpec {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut labels = RandomLabels::new(&mut rng);
        HierarchyBuilder.build(dimensions, &mut labels).unwrap()
    }

    fn exact_injector(policy: ImpactPolicy) -> CausalEffectInjector {
        CausalEffectInjector::new(InjectionParams {
            effect_sd: 0.05,
            effect_jitter_pct: 0.0,
            policy,
        })
        .unwrap()
    }

    #[test]
    fn test_pinned_cause_on_child() {
        let spec = build(&[Dimension::new("A", 1, 2)], 1);
        let mut dataset = PeriodDataset::new(vec![1000.0; 2], vec![1000.0; 2]).unwrap();
        let injector = exact_injector(ImpactPolicy::Accumulate);
        let mut rng = StdRng::seed_from_u64(0);

        // level rows are root, first child, second child
        let cause = injector
            .apply_cause(&spec, &mut dataset, 1, 0.10, &mut rng)
            .unwrap();

        assert_eq!(cause.matched_leaves, 1);
        assert!((cause.impact - 100.0).abs() < 1e-9);
        assert!((dataset.next[0] - 1100.0).abs() < 1e-9);
        assert_eq!(dataset.next[1], 1000.0);
    }

    #[test]
    fn test_clipping_limits_realized_impact() {
        let spec = build(&[Dimension::new("A", 1, 3)], 2);
        let mut dataset = PeriodDataset::new(vec![50.0; 3], vec![50.0; 3]).unwrap();
        let injector = exact_injector(ImpactPolicy::Accumulate);
        let mut rng = StdRng::seed_from_u64(0);

        let cause = injector
            .apply_cause(&spec, &mut dataset, 0, -5.0, &mut rng)
            .unwrap();

        assert_eq!(cause.matched_leaves, 3);
        assert!((cause.impact + 150.0).abs() < 1e-9);
        assert!(dataset.next.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_zero_effect_cause_still_counts() {
        let spec = build(&[Dimension::new("A", 1, 2)], 3);
        let mut dataset = PeriodDataset::new(vec![10.0; 2], vec![10.0; 2]).unwrap();
        let injector = CausalEffectInjector::new(InjectionParams {
            effect_sd: 0.0,
            ..InjectionParams::default()
        })
        .unwrap();

        let truth = injector
            .inject(&spec, &mut dataset, 4, &mut StdRng::seed_from_u64(8))
            .unwrap();

        assert_eq!(truth.causes().len(), 4);
        assert_eq!(truth.total_abs_impact(), 0.0);
        assert_eq!(dataset.next, vec![10.0; 2]);
    }

    #[test]
    fn test_injection_never_drives_values_negative() {
        let spec = build(&[Dimension::new("A", 2, 3), Dimension::new("B", 1, 2)], 4);
        let generator = SyntheticDataGenerator::new(GenerationParams::default()).unwrap();
        let injector = CausalEffectInjector::new(InjectionParams {
            effect_sd: 3.0,
            effect_jitter_pct: 0.5,
            policy: ImpactPolicy::Accumulate,
        })
        .unwrap();

        let mut rng = StdRng::seed_from_u64(77);
        for _ in 0..10 {
            let mut dataset = generator.generate(&spec, &mut rng).unwrap();
            injector.inject(&spec, &mut dataset, 5, &mut rng).unwrap();
            assert!(dataset.is_non_negative());
        }
    }

    #[test]
    fn test_impacts_match_realized_change() {
        let spec = build(&[Dimension::new("A", 2, 2), Dimension::new("B", 2, 2)], 5);
        let generator = SyntheticDataGenerator::new(GenerationParams {
            noise_sd: 0.0,
            ..GenerationParams::default()
        })
        .unwrap();
        let injector = CausalEffectInjector::new(InjectionParams::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(12);

        let mut dataset = generator.generate(&spec, &mut rng).unwrap();
        let truth = injector.inject(&spec, &mut dataset, 5, &mut rng).unwrap();

        // with no noise, the whole period change is owed to the causes
        let recorded: f64 = truth.causes().iter().map(|c| c.impact).sum();
        assert!((recorded - dataset.total_change()).abs() < 1e-6);
    }

    fn double_draw(policy: ImpactPolicy, seed: u64) -> TrueImpacts {
        // depth 1, branching 1: the level table is just the root and one child
        let spec = build(&[Dimension::new("A", 1, 1)], 6);
        assert_eq!(spec.level_rows().len(), 2);

        let mut dataset = PeriodDataset::new(vec![1000.0], vec![1000.0]).unwrap();
        let injector = CausalEffectInjector::new(InjectionParams {
            policy,
            ..InjectionParams::default()
        })
        .unwrap();
        injector
            .inject(&spec, &mut dataset, 3, &mut StdRng::seed_from_u64(seed))
            .unwrap()
    }

    #[test]
    fn test_double_draw_accumulates() {
        let truth = double_draw(ImpactPolicy::Accumulate, 21);
        assert_eq!(truth.causes().len(), 3);
        assert!(truth.impacts().len() < truth.causes().len());

        for (&index, &impact) in truth.impacts() {
            let summed: f64 = truth
                .causes()
                .iter()
                .filter(|c| c.level_index == index)
                .map(|c| c.impact)
                .sum();
            assert!((impact - summed).abs() < 1e-9);
        }
        assert_eq!(truth, double_draw(ImpactPolicy::Accumulate, 21));
    }

    #[test]
    fn test_double_draw_overwrites() {
        let truth = double_draw(ImpactPolicy::Overwrite, 21);
        assert_eq!(truth.causes().len(), 3);

        for (&index, &impact) in truth.impacts() {
            let last = truth
                .causes()
                .iter()
                .rev()
                .find(|c| c.level_index == index)
                .map(|c| c.impact)
                .unwrap();
            assert_eq!(impact, last);
        }
        assert_eq!(truth, double_draw(ImpactPolicy::Overwrite, 21));
    }

    #[test]
    fn test_policies_draw_identical_causes() {
        let accumulate = double_draw(ImpactPolicy::Accumulate, 33);
        let overwrite = double_draw(ImpactPolicy::Overwrite, 33);
        assert_eq!(accumulate.causes(), overwrite.causes());
    }

    #[test]
    fn test_out_of_range_level_index() {
        let spec = build(&[Dimension::new("A", 1, 2)], 7);
        let mut dataset = PeriodDataset::new(vec![1.0; 2], vec![1.0; 2]).unwrap();
        let injector = exact_injector(ImpactPolicy::Accumulate);
        assert!(injector
            .apply_cause(&spec, &mut dataset, 99, 0.1, &mut StdRng::seed_from_u64(0))
            .is_err());
    }
}
