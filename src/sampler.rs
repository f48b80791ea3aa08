// src/sampler.rs

//! # Tempered Ensemble Driver
//!
//! **Layer:** Sampler Core / Orchestration
//! **Status:** Normative — Strict Mathematical Execution Environment
//!
//! The driver owns the ordered ensemble of particles across the β ladder and
//! runs the full iteration protocol: advance every rung by one Metropolis
//! sweep, attempt the adjacent swaps in fixed descending order, record the
//! requested rungs. Burn-in walks an explicit phase schedule whose flags gate
//! scale adaptation and covariance tracking; the sampling phase freezes every
//! adaptive quantity. Rung updates run data-parallel over rayon; determinism
//! is carried by the per-(iteration, rung) randomness sub-streams, not by the
//! schedule.
//!
//! Swap acceptance between rungs $r$ and $r-1$ uses the likelihood alone,
//! $s = (\beta_r - \beta_{r-1})(\ell_{r-1} - \ell_r)$: under the
//! power-posterior form $\pi(\theta)\,\ell(\theta)^\beta$ both rungs share the
//! prior and the transform, so those terms cancel exactly in an exchange.

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::diagnostics;
use crate::output::{ChainDiagnostics, ChainOutput, PhaseLabel, SwapAcceptance, TraceRecord};
use crate::particle::{exchange_state, Particle, SweepSettings};
use crate::proposal::ProposalMethod;
use crate::rng;
use crate::system::{ConfigError, System};
use crate::transform::DomainError;

/// Fatal failure classes of a run. Non-finite candidate densities are not
/// errors: the Metropolis test absorbs them as rejections.
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// The driver of one chain: the particle ensemble plus every running tally
/// the output object is later assembled from.
pub struct Sampler<'a, L, P> {
    system: &'a System,
    loglike: &'a L,
    logprior: &'a P,
    particles: Vec<Particle>,
    trace: Vec<TraceRecord>,
    swap_burnin: Vec<SwapAcceptance>,
    swap_sampling: Vec<SwapAcceptance>,
    sampled_loglike_sum: Vec<f64>,
    sampled_iterations: u64,
    iteration: usize,
}

impl<L, P> std::fmt::Debug for Sampler<'_, L, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("particles", &self.particles)
            .field("trace", &self.trace)
            .field("swap_burnin", &self.swap_burnin)
            .field("swap_sampling", &self.swap_sampling)
            .field("sampled_loglike_sum", &self.sampled_loglike_sum)
            .field("sampled_iterations", &self.sampled_iterations)
            .field("iteration", &self.iteration)
            .finish()
    }
}

impl<'a, L, P> Sampler<'a, L, P>
where
    L: Fn(&[f64], &[f64]) -> f64 + Sync,
    P: Fn(&[f64]) -> f64 + Sync,
{
    /// Builds the ensemble: one particle per rung, all starting from the
    /// validated initial state. The initial log-densities must be finite; a
    /// run cannot begin from a point the model assigns no mass to.
    pub fn new(system: &'a System, loglike: &'a L, logprior: &'a P) -> Result<Self, SamplerError> {
        let theta = system.init_theta().to_vec();
        let phi = system.init_phi()?;
        let initial_loglike = loglike(&theta, system.data());
        let initial_logprior = logprior(&theta);
        if !initial_loglike.is_finite() || !initial_logprior.is_finite() {
            return Err(SamplerError::Config(ConfigError::NonFiniteInitialDensity {
                loglike: initial_loglike,
                logprior: initial_logprior,
            }));
        }

        let particles = system
            .ladder()
            .iter()
            .map(|&beta| {
                Particle::new(
                    beta,
                    theta.clone(),
                    phi.clone(),
                    initial_loglike,
                    initial_logprior,
                )
            })
            .collect::<Vec<_>>();

        let pairs = system.ladder().len().saturating_sub(1);
        let rungs = system.ladder().len();
        Ok(Self {
            system,
            loglike,
            logprior,
            particles,
            trace: Vec::new(),
            swap_burnin: vec![SwapAcceptance::default(); pairs],
            swap_sampling: vec![SwapAcceptance::default(); pairs],
            sampled_loglike_sum: vec![0.0; rungs],
            sampled_iterations: 0,
            iteration: 0,
        })
    }

    /// Runs burn-in and sampling to completion. Returns `false` when the host
    /// cancelled at an iteration boundary; the trace accumulated so far stays
    /// valid either way.
    pub fn run(&mut self, cancel: Option<&AtomicBool>) -> bool {
        let system = self.system;
        let mut covariance_tracked = false;

        // 1. Burn-in: walk the phase schedule, applying reset rules at entry.
        for (index, phase) in system.phases().iter().enumerate() {
            if phase.bw_reset {
                for particle in &mut self.particles {
                    particle.reset_scales();
                }
            }
            if phase.cov_recalc && !covariance_tracked {
                for particle in &mut self.particles {
                    particle.reset_covariance();
                }
            }
            covariance_tracked = phase.cov_recalc;

            let settings = SweepSettings {
                method: phase.method,
                adapt_scales: phase.bw_update,
                track_covariance: phase.cov_recalc,
            };
            for _ in 0..phase.iterations {
                if cancelled(cancel) {
                    log::info!("cancellation observed during burn-in phase {index}");
                    return false;
                }
                self.advance(&settings, PhaseLabel::Burnin);
            }
            log::debug!(
                "burn-in phase {index} finished after {} iterations",
                phase.iterations
            );
        }

        // 2. Sampling: adaptation frozen, method inherited from the final
        //    burn-in phase.
        let settings = SweepSettings {
            method: system
                .phases()
                .last()
                .map_or(ProposalMethod::Univariate, |phase| phase.method),
            adapt_scales: false,
            track_covariance: false,
        };
        for _ in 0..system.samples() {
            if cancelled(cancel) {
                log::info!("cancellation observed during sampling");
                return false;
            }
            self.advance(&settings, PhaseLabel::Sampling);
        }
        true
    }

    /// One full iteration: update all rungs, swap, record.
    fn advance(&mut self, settings: &SweepSettings, label: PhaseLabel) {
        let system = self.system;
        let master = system.master_seed();
        let iteration = self.iteration;
        let loglike = self.loglike;
        let logprior = self.logprior;

        // 1. Every rung advances on its own randomness sub-stream; the
        //    schedule across threads cannot influence the draws.
        self.particles
            .par_iter_mut()
            .enumerate()
            .for_each(|(rung, particle)| {
                let mut stream = rng::update_stream(master, iteration, rung);
                particle.sweep(system, loglike, logprior, settings, &mut stream);
            });

        // 2. Adjacent swaps, descending from the cold end, serial by design.
        if system.coupling_enabled() {
            self.attempt_swaps(label);
        }

        // 3. Record in rung order.
        if system.record_all_rungs() {
            for rung in 0..self.particles.len() {
                self.record(rung, label);
            }
        } else {
            self.record(system.cold_rung(), label);
        }

        // 4. Rung-wise likelihood means feeding the evidence estimate.
        if label == PhaseLabel::Sampling {
            for (rung, particle) in self.particles.iter().enumerate() {
                self.sampled_loglike_sum[rung] += particle.loglike();
            }
            self.sampled_iterations += 1;
        }

        self.iteration += 1;
    }

    /// Attempts every adjacent exchange once, pair (r, r-1) for r = R..2. On
    /// acceptance only the sampled state crosses; β and the proposal state
    /// stay with their rung.
    fn attempt_swaps(&mut self, label: PhaseLabel) {
        let mut stream = rng::swap_stream(self.system.master_seed(), self.iteration);
        let counters = match label {
            PhaseLabel::Burnin => &mut self.swap_burnin,
            PhaseLabel::Sampling => &mut self.swap_sampling,
        };

        for upper in (1..self.particles.len()).rev() {
            let lower = upper - 1;
            let log_ratio = (self.particles[upper].beta() - self.particles[lower].beta())
                * (self.particles[lower].loglike() - self.particles[upper].loglike());

            counters[lower].attempted += 1;
            if stream.log_uniform() < log_ratio {
                counters[lower].accepted += 1;
                let (head, tail) = self.particles.split_at_mut(upper);
                exchange_state(&mut head[lower], &mut tail[0]);
            }
        }
    }

    fn record(&mut self, rung: usize, label: PhaseLabel) {
        let particle = &self.particles[rung];
        self.trace.push(TraceRecord {
            phase: label,
            iteration: self.iteration,
            rung,
            theta: particle.theta().to_vec(),
            logprior: particle.logprior(),
            loglikelihood: particle.loglike(),
        });
    }

    /// Consumes the driver into the output object, computing the diagnostics
    /// block from the accumulated tallies and the recorded trace.
    pub fn into_output(self, interrupted: bool) -> ChainOutput {
        let system = self.system;
        let dim = system.dim();
        let cold = system.cold_rung();

        let accept_rate_per_rung: Vec<Vec<f64>> = self
            .particles
            .iter()
            .map(|particle| particle.proposal().acceptance_rates())
            .collect();
        let block_accept_rate_per_rung: Vec<f64> = self
            .particles
            .iter()
            .map(|particle| particle.proposal().block_acceptance_rate())
            .collect();

        let mean_sampled_loglike: Vec<f64> = if self.sampled_iterations == 0 {
            Vec::new()
        } else {
            self.sampled_loglike_sum
                .iter()
                .map(|&sum| sum / self.sampled_iterations as f64)
                .collect()
        };
        let log_evidence =
            diagnostics::log_evidence_trapezoid(system.ladder(), &mean_sampled_loglike);

        let (ess, autocorrelation) = diagnostics::summarise_cold_trace(&self.trace, cold, dim);

        ChainOutput {
            chain: system.config().chain,
            interrupted,
            config: system.config().clone(),
            diagnostics: ChainDiagnostics {
                beta_ladder: system.ladder().to_vec(),
                swap_burnin: self.swap_burnin,
                swap_sampling: self.swap_sampling,
                accept_rate_per_rung,
                block_accept_rate_per_rung,
                ess,
                autocorrelation,
                mean_sampled_loglike,
                log_evidence,
            },
            trace: self.trace,
        }
    }
}

#[inline]
fn cancelled(flag: Option<&AtomicBool>) -> bool {
    flag.is_some_and(|f| f.load(Ordering::Relaxed))
}
