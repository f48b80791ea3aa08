// src/particle.rs

//! # Tempered Chain State and Metropolis Sweep
//!
//! **Layer:** Sampler Core / Chain Update
//! **Status:** Normative — Strict Mathematical Execution Environment
//!
//! A `Particle` is one chain of the tempered ensemble: its position in both
//! parameter spaces, the cached log-likelihood and log-prior at that position,
//! its inverse temperature $\beta$, and its private proposal machinery. One
//! sweep applies the Metropolis test with log-acceptance
//!
//! $$ r = \beta (\ell' - \ell) + (\pi' - \pi) + A $$
//!
//! where $A$ is the log-Jacobian adjustment of the reparameterisation. The
//! ratio is evaluated entirely in log space. A candidate with a non-finite
//! image, likelihood or prior is rejected on the spot with no state mutation,
//! so the cached values always satisfy $\phi = T(\theta)$,
//! $\ell = \mathrm{loglike}(\theta)$, $\pi = \mathrm{logprior}(\theta)$, all
//! finite.

use crate::proposal::{ProposalMethod, ProposalState};
use crate::rng::SubStream;
use crate::system::System;
use crate::transform;

/// Flags a sweep runs under, resolved per phase by the driver.
#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    /// Active proposal strategy.
    pub method: ProposalMethod,
    /// Robbins–Monro scale adaptation (burn-in phases with `bw_update`).
    pub adapt_scales: bool,
    /// Welford covariance tracking (burn-in phases with `cov_recalc`).
    pub track_covariance: bool,
}

/// One chain of the tempered ensemble.
#[derive(Debug, Clone)]
pub struct Particle {
    beta: f64,
    theta: Vec<f64>,
    phi: Vec<f64>,
    loglike: f64,
    logprior: f64,
    proposal: ProposalState,
    /// Candidate buffer kept equal to `theta` between proposals.
    scratch: Vec<f64>,
}

impl Particle {
    /// Assembles a chain at inverse temperature `beta` from the validated
    /// initial state and its already-evaluated log-densities.
    pub fn new(beta: f64, theta: Vec<f64>, phi: Vec<f64>, loglike: f64, logprior: f64) -> Self {
        let dim = theta.len();
        let scratch = theta.clone();
        Self {
            beta,
            theta,
            phi,
            loglike,
            logprior,
            proposal: ProposalState::new(dim),
            scratch,
        }
    }

    /// Inverse temperature of this rung.
    #[inline]
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Current position in the natural space.
    #[inline]
    pub fn theta(&self) -> &[f64] {
        &self.theta
    }

    /// Current position in the working space.
    #[inline]
    pub fn phi(&self) -> &[f64] {
        &self.phi
    }

    /// Cached log-likelihood at the current position.
    #[inline]
    pub fn loglike(&self) -> f64 {
        self.loglike
    }

    /// Cached log-prior at the current position.
    #[inline]
    pub fn logprior(&self) -> f64 {
        self.logprior
    }

    /// The chain's proposal machinery, read-only.
    #[inline]
    pub fn proposal(&self) -> &ProposalState {
        &self.proposal
    }

    /// Restores initial proposal scales (phase `bw_reset`).
    pub fn reset_scales(&mut self) {
        self.proposal.reset_scales();
    }

    /// Discards the running covariance (phase entry toggling `cov_recalc` on).
    pub fn reset_covariance(&mut self) {
        self.proposal.reset_covariance();
    }

    /// Advances the chain by one Metropolis sweep.
    pub fn sweep<L, P>(
        &mut self,
        system: &System,
        loglike: &L,
        logprior: &P,
        settings: &SweepSettings,
        rng: &mut SubStream,
    ) where
        L: Fn(&[f64], &[f64]) -> f64,
        P: Fn(&[f64]) -> f64,
    {
        match settings.method {
            ProposalMethod::Univariate => self.sweep_univariate(system, loglike, logprior, settings, rng),
            ProposalMethod::BlockIsotropic | ProposalMethod::BlockCorrelated => {
                self.sweep_block(system, loglike, logprior, settings, rng);
            }
        }
    }

    /// Coordinate-wise sweep: each parameter is proposed and tested in
    /// sequence, so later coordinates see earlier acceptances.
    fn sweep_univariate<L, P>(
        &mut self,
        system: &System,
        loglike: &L,
        logprior: &P,
        settings: &SweepSettings,
        rng: &mut SubStream,
    ) where
        L: Fn(&[f64], &[f64]) -> f64,
        P: Fn(&[f64]) -> f64,
    {
        self.scratch.copy_from_slice(&self.theta);
        let transforms = system.transforms();

        for index in 0..self.theta.len() {
            // Fixed two draws per coordinate keeps stream consumption
            // independent of the accept/reject path taken.
            let phi_candidate = self.proposal.propose_univariate(index, self.phi[index], rng);
            let log_u = rng.log_uniform();

            let transform = transforms[index];
            let theta_candidate = transform.theta_of(phi_candidate);

            let mut accepted = false;
            if transform.contains(theta_candidate) {
                self.scratch[index] = theta_candidate;
                let candidate_loglike = loglike(&self.scratch, system.data());
                let candidate_logprior = logprior(&self.scratch);

                if candidate_loglike.is_finite() && candidate_logprior.is_finite() {
                    let adjustment = transform.adjustment(self.theta[index], theta_candidate);
                    let log_ratio = self.beta * (candidate_loglike - self.loglike)
                        + (candidate_logprior - self.logprior)
                        + adjustment;

                    if log_u < log_ratio {
                        accepted = true;
                        self.theta[index] = theta_candidate;
                        self.phi[index] = phi_candidate;
                        self.loglike = candidate_loglike;
                        self.logprior = candidate_logprior;
                    }
                }
                if !accepted {
                    self.scratch[index] = self.theta[index];
                }
            }

            self.proposal.record_univariate(index, accepted, settings.adapt_scales);
            if settings.track_covariance {
                self.proposal.update_covariance(&self.phi);
            }
        }
    }

    /// Joint sweep: all coordinates move together under one shared scale and
    /// one accept decision; the adjustment is the per-coordinate sum.
    fn sweep_block<L, P>(
        &mut self,
        system: &System,
        loglike: &L,
        logprior: &P,
        settings: &SweepSettings,
        rng: &mut SubStream,
    ) where
        L: Fn(&[f64], &[f64]) -> f64,
        P: Fn(&[f64]) -> f64,
    {
        let phi_candidate = self.proposal.propose_block(&self.phi, settings.method, rng);
        let log_u = rng.log_uniform();

        let transforms = system.transforms();
        let theta_candidate = transform::to_theta(transforms, &phi_candidate);

        let mut accepted = false;
        let interior = theta_candidate
            .iter()
            .zip(transforms.iter())
            .all(|(&value, t)| t.contains(value));

        if interior {
            let candidate_loglike = loglike(&theta_candidate, system.data());
            let candidate_logprior = logprior(&theta_candidate);

            if candidate_loglike.is_finite() && candidate_logprior.is_finite() {
                let mut adjustment = 0.0;
                for (index, t) in transforms.iter().enumerate() {
                    adjustment += t.adjustment(self.theta[index], theta_candidate[index]);
                }
                let log_ratio = self.beta * (candidate_loglike - self.loglike)
                    + (candidate_logprior - self.logprior)
                    + adjustment;

                if log_u < log_ratio {
                    accepted = true;
                    self.theta.copy_from_slice(&theta_candidate);
                    self.phi.copy_from_slice(&phi_candidate);
                    self.loglike = candidate_loglike;
                    self.logprior = candidate_logprior;
                }
            }
        }

        self.proposal.record_block(accepted, settings.adapt_scales);
        if settings.track_covariance {
            self.proposal.update_covariance(&self.phi);
        }
    }
}

/// Exchanges the sampled state between two rungs after an accepted swap. The
/// inverse temperature and the proposal machinery stay with the rung, not the
/// state, so adaptation remains tuned to each rung's own target.
pub fn exchange_state(a: &mut Particle, b: &mut Particle) {
    std::mem::swap(&mut a.theta, &mut b.theta);
    std::mem::swap(&mut a.phi, &mut b.phi);
    std::mem::swap(&mut a.loglike, &mut b.loglike);
    std::mem::swap(&mut a.logprior, &mut b.logprior);
}
