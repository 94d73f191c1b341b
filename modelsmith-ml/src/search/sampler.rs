//! Trial samplers.
//!
//! A sampler owns its RNG and receives the full trial history on every call,
//! so a fixed seed and history always produce the same proposal.

use super::space::{FamilySpace, ParamDistribution, SearchSpace};
use super::{Trial, TrialStatus};
use crate::error::{MlError, Result};
use crate::params::{HyperParams, ParamValue};
use crate::registry::Family;
use rand::Rng;
use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand_distr::StandardNormal;

pub use crate::config::TpeSettings;

/// Proposes the next (family, hyperparameters) pair.
pub trait Sampler: Send {
    fn name(&self) -> &'static str;

    /// Pick a family from `space` given all trials so far.
    fn sample_family(&mut self, space: &SearchSpace, history: &[Trial]) -> Result<Family>;

    /// Pick hyperparameters inside `space` given all trials so far.
    fn sample_params(&mut self, space: &FamilySpace, history: &[Trial]) -> HyperParams;
}

fn weighted_family(rng: &mut StdRng, space: &SearchSpace) -> Result<Family> {
    if space.is_empty() {
        return Err(MlError::config("search space has no families"));
    }
    let index = WeightedIndex::new(space.weights())
        .map_err(|e| MlError::config(format!("invalid family weights: {e}")))?;
    Ok(space.families()[index.sample(rng)].family)
}

fn random_params(rng: &mut StdRng, space: &FamilySpace) -> HyperParams {
    space
        .params
        .iter()
        .map(|spec| (spec.name.clone(), spec.distribution.sample(rng)))
        .collect()
}

/// Uniform sampling within each family's bounded ranges.
#[derive(Debug)]
pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Sampler for RandomSampler {
    fn name(&self) -> &'static str {
        "random"
    }

    fn sample_family(&mut self, space: &SearchSpace, _history: &[Trial]) -> Result<Family> {
        weighted_family(&mut self.rng, space)
    }

    fn sample_params(&mut self, space: &FamilySpace, _history: &[Trial]) -> HyperParams {
        random_params(&mut self.rng, space)
    }
}

/// Tree-structured Parzen estimator.
///
/// Trials are split at the `gamma` quantile of their scores into a good and a
/// bad set. Each value is drawn from the good-set density `l` by picking the
/// candidate with the highest `l(x) / g(x)`. Penalized and pruned trials
/// always count as bad.
#[derive(Debug)]
pub struct TpeSampler {
    rng: StdRng,
    settings: TpeSettings,
}

impl TpeSampler {
    pub fn new(seed: u64, settings: TpeSettings) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            settings,
        }
    }

    pub fn settings(&self) -> &TpeSettings {
        &self.settings
    }

    /// Split `trials` into (good, bad).
    fn split<'t>(&self, trials: &[&'t Trial]) -> (Vec<&'t Trial>, Vec<&'t Trial>) {
        let mut complete: Vec<&Trial> = trials
            .iter()
            .copied()
            .filter(|t| t.status == TrialStatus::Complete)
            .collect();
        complete.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.index.cmp(&b.index)));
        let n_good = if complete.is_empty() {
            0
        } else {
            ((complete.len() as f64 * self.settings.gamma).ceil() as usize).clamp(1, complete.len())
        };
        let good: Vec<&Trial> = complete[..n_good].to_vec();
        let bad: Vec<&Trial> = trials
            .iter()
            .copied()
            .filter(|t| !good.iter().any(|g| g.index == t.index))
            .collect();
        (good, bad)
    }

    /// Categorical TPE over `k` options with prior weights `prior`.
    /// `good`/`bad` hold the option index of each observation.
    fn categorical(&mut self, prior: &[f64], good: &[usize], bad: &[usize]) -> Option<usize> {
        let total_prior: f64 = prior.iter().sum();
        if total_prior <= 0.0 {
            return None;
        }
        let w = self.settings.prior_weight;
        let density = |obs: &[usize], k: usize| {
            if prior[k] <= 0.0 {
                return 0.0;
            }
            let count = obs.iter().filter(|&&o| o == k).count() as f64;
            (count + w * prior[k] / total_prior) / (obs.len() as f64 + w)
        };
        let l: Vec<f64> = (0..prior.len()).map(|k| density(good, k)).collect();
        let g: Vec<f64> = (0..prior.len()).map(|k| density(bad, k)).collect();
        let dist = WeightedIndex::new(&l).ok()?;

        let mut best: Option<(usize, f64)> = None;
        for _ in 0..self.settings.n_ei_candidates.max(1) {
            let k = dist.sample(&mut self.rng);
            let ratio = l[k] / g[k].max(f64::MIN_POSITIVE);
            if best.is_none_or(|(_, r)| ratio > r) {
                best = Some((k, ratio));
            }
        }
        best.map(|(k, _)| k)
    }

    /// Numeric TPE on `[low, high]` in internal coordinates.
    fn numeric(&mut self, low: f64, high: f64, good: &[f64], bad: &[f64]) -> f64 {
        if high <= low {
            return low;
        }
        let w = self.settings.prior_weight;
        let width = high - low;
        let bandwidth = |n: usize| (width * 0.2 * ((n + 1) as f64).powf(-0.2)).max(width * 0.01);
        let (bw_good, bw_bad) = (bandwidth(good.len()), bandwidth(bad.len()));

        let log_density = |x: f64, obs: &[f64], bw: f64| -> f64 {
            let uniform = w / width;
            let kernels: f64 = obs
                .iter()
                .map(|&m| {
                    let z = (x - m) / bw;
                    (-0.5 * z * z).exp() / (bw * (2.0 * std::f64::consts::PI).sqrt())
                })
                .sum();
            ((uniform + kernels) / (w + obs.len() as f64)).ln()
        };

        let n_components = good.len() as f64 + w;
        let mut best: Option<(f64, f64)> = None;
        for _ in 0..self.settings.n_ei_candidates.max(1) {
            let pick = if good.is_empty() { 0.0 } else { self.rng.gen_range(0.0..n_components) };
            let x = if pick < w || good.is_empty() {
                self.rng.gen_range(low..=high)
            } else {
                let center = good[((pick - w) as usize).min(good.len() - 1)];
                let z: f64 = self.rng.sample(StandardNormal);
                (center + z * bw_good).clamp(low, high)
            };
            let ratio = log_density(x, good, bw_good) - log_density(x, bad, bw_bad);
            if best.is_none_or(|(_, r)| ratio > r) {
                best = Some((x, ratio));
            }
        }
        best.map_or(low, |(x, _)| x)
    }
}

impl Sampler for TpeSampler {
    fn name(&self) -> &'static str {
        "tpe"
    }

    fn sample_family(&mut self, space: &SearchSpace, history: &[Trial]) -> Result<Family> {
        if history.len() < self.settings.n_startup_trials {
            return weighted_family(&mut self.rng, space);
        }
        let families: Vec<Family> = space.families().iter().map(|s| s.family).collect();
        let observed: Vec<&Trial> = history
            .iter()
            .filter(|t| families.contains(&t.family))
            .collect();
        let (good, bad) = self.split(&observed);
        let position = |t: &&Trial| families.iter().position(|f| *f == t.family);
        let good: Vec<usize> = good.iter().filter_map(position).collect();
        let bad: Vec<usize> = bad.iter().filter_map(position).collect();
        match self.categorical(space.weights(), &good, &bad) {
            Some(k) => Ok(families[k]),
            None => weighted_family(&mut self.rng, space),
        }
    }

    fn sample_params(&mut self, space: &FamilySpace, history: &[Trial]) -> HyperParams {
        let observed: Vec<&Trial> = history.iter().filter(|t| t.family == space.family).collect();
        let (good, bad) = self.split(&observed);
        if history.len() < self.settings.n_startup_trials || good.is_empty() {
            return random_params(&mut self.rng, space);
        }

        let mut params = HyperParams::new();
        for spec in &space.params {
            let dist = &spec.distribution;
            let value = match dist {
                ParamDistribution::Choice { values } => {
                    let index_of = |t: &&Trial| match t.params.get(&spec.name) {
                        Some(ParamValue::Text(v)) => values.iter().position(|c| c == v),
                        _ => None,
                    };
                    let good_idx: Vec<usize> = good.iter().filter_map(index_of).collect();
                    let bad_idx: Vec<usize> = bad.iter().filter_map(index_of).collect();
                    let prior = vec![1.0; values.len()];
                    match self.categorical(&prior, &good_idx, &bad_idx) {
                        Some(k) => ParamValue::Text(values[k].clone()),
                        None => dist.sample(&mut self.rng),
                    }
                }
                _ => {
                    let internal = |t: &&Trial| {
                        t.params
                            .get(&spec.name)
                            .and_then(|v| dist.to_internal(v))
                    };
                    let good_x: Vec<f64> = good.iter().filter_map(internal).collect();
                    let bad_x: Vec<f64> = bad.iter().filter_map(internal).collect();
                    let (low, high) = dist.internal_bounds().unwrap_or((0.0, 0.0));
                    let x = self.numeric(low, high, &good_x, &bad_x);
                    match dist.from_internal(x) {
                        Some(v) => v,
                        None => dist.sample(&mut self.rng),
                    }
                }
            };
            params.insert(spec.name.clone(), value);
        }
        params
    }
}
