// src/proposal.rs

//! # Adaptive Proposal State
//!
//! **Layer:** Sampler Core / Proposal Generation
//! **Status:** Normative — Strict Mathematical Execution Environment
//!
//! Each tempered chain owns one `ProposalState` holding its per-parameter
//! log-scales, a Welford-online running mean and covariance of the working-space
//! trajectory, a Cholesky factor of that covariance, and accept/attempt
//! counters. Three proposal strategies are supported:
//!
//! - **Univariate:** $\phi'_i = \phi_i + e^{\sigma_i} Z$, one coordinate at a
//!   time within a sweep.
//! - **Block isotropic:** $\phi' = \phi + e^{\bar\sigma} \mathbf{Z}$ with a
//!   single shared scale.
//! - **Block correlated:** $\phi' = \phi + e^{\bar\sigma} C \mathbf{Z}$ where
//!   $C$ is the Cholesky factor of the empirical covariance.
//!
//! Scales follow a Robbins–Monro recursion toward the classical acceptance
//! targets (0.44 univariate, 0.234 block); the covariance is refreshed into a
//! new Cholesky factor every $\max(5d, 20)$ recorded steps with a jitter of
//! $10^{-8}\,\mathrm{tr}(\Sigma)/d$ on the diagonal.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::rng::SubStream;

/// Initial proposal scale $e^{\sigma} = 0.1$ on every coordinate.
const INITIAL_SCALE: f64 = 0.1;

/// Classical optimal acceptance target for coordinate-wise random walks.
const TARGET_ACCEPT_UNIVARIATE: f64 = 0.44;

/// Classical optimal acceptance target for joint random walks.
const TARGET_ACCEPT_BLOCK: f64 = 0.234;

/// Robbins–Monro decay exponent $\gamma \in (0.5, 1]$.
const ADAPT_DECAY: f64 = 0.8;

/// Relative diagonal jitter applied before factorising the covariance.
const COVARIANCE_JITTER: f64 = 1e-8;

/// Proposal strategy selected per burn-in phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalMethod {
    /// One coordinate at a time, per-coordinate scales.
    Univariate,
    /// Joint spherical step under one shared scale.
    BlockIsotropic,
    /// Joint step shaped by the empirical covariance factor.
    BlockCorrelated,
}

/// Mutable proposal machinery of a single tempered chain.
#[derive(Debug, Clone)]
pub struct ProposalState {
    dim: usize,
    log_scales: Vec<f64>,
    block_log_scale: f64,
    adapt_counts: Vec<u64>,
    block_adapt_count: u64,
    accepted: Vec<u64>,
    attempted: Vec<u64>,
    block_accepted: u64,
    block_attempted: u64,
    mean: Array1<f64>,
    sq_dev: Array2<f64>,
    weight: usize,
    cholesky: Option<Array2<f64>>,
    updates_since_refresh: usize,
    factorisation_warned: bool,
}

impl ProposalState {
    /// Fresh state for a `dim`-dimensional chain.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            log_scales: vec![INITIAL_SCALE.ln(); dim],
            block_log_scale: INITIAL_SCALE.ln(),
            adapt_counts: vec![0; dim],
            block_adapt_count: 0,
            accepted: vec![0; dim],
            attempted: vec![0; dim],
            block_accepted: 0,
            block_attempted: 0,
            mean: Array1::zeros(dim),
            sq_dev: Array2::zeros((dim, dim)),
            weight: 0,
            cholesky: None,
            updates_since_refresh: 0,
            factorisation_warned: false,
        }
    }

    /// Restores every scale to its initial value (phase `bw_reset`).
    pub fn reset_scales(&mut self) {
        self.log_scales.fill(INITIAL_SCALE.ln());
        self.block_log_scale = INITIAL_SCALE.ln();
        self.adapt_counts.fill(0);
        self.block_adapt_count = 0;
    }

    /// Discards the running mean, covariance and factor (phase entry with
    /// covariance tracking newly enabled).
    pub fn reset_covariance(&mut self) {
        self.mean.fill(0.0);
        self.sq_dev.fill(0.0);
        self.weight = 0;
        self.cholesky = None;
        self.updates_since_refresh = 0;
        self.factorisation_warned = false;
    }

    /// Number of covariance updates between Cholesky refreshes.
    #[inline]
    fn refresh_interval(&self) -> usize {
        (5 * self.dim).max(20)
    }

    /// Proposes a single coordinate under the univariate strategy.
    #[inline]
    pub fn propose_univariate(&self, index: usize, phi: f64, rng: &mut SubStream) -> f64 {
        phi + self.log_scales[index].exp() * rng.standard_normal()
    }

    /// Proposes a joint step; the correlated strategy degrades to isotropic
    /// whenever no valid Cholesky factor is available.
    pub fn propose_block(
        &self,
        phi: &[f64],
        method: ProposalMethod,
        rng: &mut SubStream,
    ) -> Vec<f64> {
        let step = self.block_log_scale.exp();
        let z = rng.standard_normal_vec(self.dim);
        match method {
            ProposalMethod::BlockCorrelated => match &self.cholesky {
                Some(factor) => {
                    let mut proposed = phi.to_vec();
                    for (i, slot) in proposed.iter_mut().enumerate() {
                        let mut shaped = 0.0;
                        // Lower-triangular product: row i consumes z[0..=i].
                        for (j, &zj) in z.iter().enumerate().take(i + 1) {
                            shaped += factor[[i, j]] * zj;
                        }
                        *slot += step * shaped;
                    }
                    proposed
                }
                None => Self::isotropic_step(phi, step, &z),
            },
            _ => Self::isotropic_step(phi, step, &z),
        }
    }

    #[inline]
    fn isotropic_step(phi: &[f64], step: f64, z: &[f64]) -> Vec<f64> {
        phi.iter().zip(z.iter()).map(|(&p, &zi)| p + step * zi).collect()
    }

    /// Records the outcome of one univariate coordinate step and, while
    /// `adapting`, nudges that coordinate's log-scale toward the 0.44 target:
    /// $\sigma_i \leftarrow \sigma_i + (\alpha - \alpha^*) / n_i^{\gamma}$.
    pub fn record_univariate(&mut self, index: usize, accepted: bool, adapting: bool) {
        self.attempted[index] += 1;
        if accepted {
            self.accepted[index] += 1;
        }
        if adapting {
            self.adapt_counts[index] += 1;
            let alpha = if accepted { 1.0 } else { 0.0 };
            let gain = (self.adapt_counts[index] as f64).powf(-ADAPT_DECAY);
            self.log_scales[index] += (alpha - TARGET_ACCEPT_UNIVARIATE) * gain;
        }
    }

    /// Records the outcome of one joint step against the 0.234 target.
    pub fn record_block(&mut self, accepted: bool, adapting: bool) {
        self.block_attempted += 1;
        if accepted {
            self.block_accepted += 1;
        }
        if adapting {
            self.block_adapt_count += 1;
            let alpha = if accepted { 1.0 } else { 0.0 };
            let gain = (self.block_adapt_count as f64).powf(-ADAPT_DECAY);
            self.block_log_scale += (alpha - TARGET_ACCEPT_BLOCK) * gain;
        }
    }

    /// Welford-online update of the running mean and squared-deviation matrix
    /// with the post-step working-space position, followed by a periodic
    /// refresh of the Cholesky factor.
    pub fn update_covariance(&mut self, phi: &[f64]) {
        self.weight += 1;
        let n = self.weight as f64;
        let mut delta = Array1::zeros(self.dim);
        for i in 0..self.dim {
            delta[i] = phi[i] - self.mean[i];
            self.mean[i] += delta[i] / n;
        }
        for i in 0..self.dim {
            let post = phi[i] - self.mean[i];
            for j in 0..self.dim {
                self.sq_dev[[j, i]] += delta[j] * post;
            }
        }

        self.updates_since_refresh += 1;
        if self.updates_since_refresh >= self.refresh_interval() {
            self.updates_since_refresh = 0;
            self.refresh_cholesky();
        }
    }

    /// Unbiased empirical covariance $\Sigma = M_2 / (n - 1)$; zero until two
    /// positions have been absorbed.
    pub fn covariance(&self) -> Array2<f64> {
        if self.weight < 2 {
            return Array2::zeros((self.dim, self.dim));
        }
        &self.sq_dev / (self.weight as f64 - 1.0)
    }

    /// Factorises $\Sigma + \epsilon I$. A singular or fully degenerate
    /// covariance drops the factor: correlated proposals then fall back to
    /// isotropic steps instead of aborting the run.
    fn refresh_cholesky(&mut self) {
        if self.weight < 2 {
            return;
        }
        let mut sigma = self.covariance();
        let trace: f64 = sigma.diag().sum();
        if !(trace > 0.0) {
            self.drop_factor();
            return;
        }
        let jitter = COVARIANCE_JITTER * trace / self.dim as f64;
        for i in 0..self.dim {
            sigma[[i, i]] += jitter;
        }
        match cholesky_lower(&sigma) {
            Some(factor) => {
                self.cholesky = Some(factor);
                self.factorisation_warned = false;
            }
            None => self.drop_factor(),
        }
    }

    fn drop_factor(&mut self) {
        self.cholesky = None;
        if !self.factorisation_warned {
            self.factorisation_warned = true;
            log::warn!(
                "singular empirical covariance; correlated proposals fall back to isotropic"
            );
        }
    }

    /// True once a usable covariance factor exists.
    #[inline]
    pub fn has_cholesky(&self) -> bool {
        self.cholesky.is_some()
    }

    /// Per-coordinate empirical acceptance rates over all recorded univariate
    /// steps (0 where nothing was attempted).
    pub fn acceptance_rates(&self) -> Vec<f64> {
        self.accepted
            .iter()
            .zip(self.attempted.iter())
            .map(|(&a, &n)| if n == 0 { 0.0 } else { a as f64 / n as f64 })
            .collect()
    }

    /// Joint-step empirical acceptance rate.
    pub fn block_acceptance_rate(&self) -> f64 {
        if self.block_attempted == 0 {
            0.0
        } else {
            self.block_accepted as f64 / self.block_attempted as f64
        }
    }

    #[cfg(test)]
    pub(crate) fn log_scale(&self, index: usize) -> f64 {
        self.log_scales[index]
    }
}

/// Lower-triangular Cholesky factorisation of a symmetric matrix; `None` when
/// a pivot fails positivity, signalling a (numerically) singular input.
pub fn cholesky_lower(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    let n = matrix.nrows();
    let mut factor: Array2<f64> = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = matrix[[i, j]];
            for k in 0..j {
                sum -= factor[[i, k]] * factor[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                factor[[i, j]] = sum.sqrt();
            } else {
                factor[[i, j]] = sum / factor[[j, j]];
            }
        }
    }
    Some(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng;

    fn stream() -> SubStream {
        rng::update_stream(rng::master_seed(Some(99), 1), 0, 0)
    }

    #[test]
    fn welford_tracks_direct_mean_and_covariance() {
        let samples = [
            [1.0, 2.0],
            [2.0, 1.0],
            [4.0, 3.0],
            [0.5, -1.0],
            [3.5, 2.5],
        ];
        let mut state = ProposalState::new(2);
        for s in &samples {
            state.update_covariance(s);
        }

        let n = samples.len() as f64;
        let mean0: f64 = samples.iter().map(|s| s[0]).sum::<f64>() / n;
        let mean1: f64 = samples.iter().map(|s| s[1]).sum::<f64>() / n;
        let mut cov01 = 0.0;
        let mut var0 = 0.0;
        for s in &samples {
            var0 += (s[0] - mean0).powi(2);
            cov01 += (s[0] - mean0) * (s[1] - mean1);
        }
        var0 /= n - 1.0;
        cov01 /= n - 1.0;

        let sigma = state.covariance();
        assert!((state.mean[0] - mean0).abs() < 1e-12);
        assert!((state.mean[1] - mean1).abs() < 1e-12);
        assert!((sigma[[0, 0]] - var0).abs() < 1e-12);
        assert!((sigma[[0, 1]] - cov01).abs() < 1e-12);
        assert!((sigma[[1, 0]] - cov01).abs() < 1e-12);
    }

    #[test]
    fn cholesky_reconstructs_spd_matrix() {
        let sigma =
            Array2::from_shape_vec((2, 2), vec![4.0, 1.2, 1.2, 2.0]).unwrap();
        let factor = cholesky_lower(&sigma).expect("SPD input must factorise");
        let rebuilt = factor.dot(&factor.t());
        for i in 0..2 {
            for j in 0..2 {
                assert!((rebuilt[[i, j]] - sigma[[i, j]]).abs() < 1e-12);
            }
        }
        assert!(factor[[0, 1]].abs() < 1e-15, "factor must be lower triangular");
    }

    #[test]
    fn cholesky_refuses_singular_matrix() {
        // Rank-one outer product: strictly singular.
        let singular =
            Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 2.0, 4.0]).unwrap();
        assert!(cholesky_lower(&singular).is_none());
    }

    #[test]
    fn constant_acceptance_inflates_scale() {
        let mut state = ProposalState::new(1);
        let start = state.log_scale(0);
        for _ in 0..200 {
            state.record_univariate(0, true, true);
        }
        assert!(
            state.log_scale(0) > start,
            "all-accept feedback must grow the proposal scale"
        );

        let mut shrink = ProposalState::new(1);
        for _ in 0..200 {
            shrink.record_univariate(0, false, true);
        }
        assert!(shrink.log_scale(0) < start);
    }

    #[test]
    fn frozen_adaptation_leaves_scale_untouched(){
        let mut state = ProposalState::new(3);
        let before = state.log_scale(1);
        for _ in 0..50 {
            state.record_univariate(1, true, false);
        }
        assert_eq!(state.log_scale(1), before);
        assert!((state.acceptance_rates()[1] - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn correlated_proposal_falls_back_without_factor() {
        let state = ProposalState::new(2);
        assert!(!state.has_cholesky());
        let mut rng = stream();
        let proposed = state.propose_block(&[0.0, 0.0], ProposalMethod::BlockCorrelated, &mut rng);
        assert_eq!(proposed.len(), 2);
        assert!(proposed.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn degenerate_trajectory_never_yields_a_factor() {
        let mut state = ProposalState::new(2);
        for _ in 0..50 {
            state.update_covariance(&[1.0, -2.0]);
        }
        assert!(!state.has_cholesky());
    }

    #[test]
    fn factor_appears_after_refresh_interval() {
        let mut state = ProposalState::new(2);
        let mut rng = stream();
        // Feed enough scattered positions to cross the refresh threshold (20).
        for _ in 0..25 {
            let p = [rng.standard_normal() * 2.0, rng.standard_normal()];
            state.update_covariance(&p);
        }
        assert!(state.has_cholesky());
    }
}
