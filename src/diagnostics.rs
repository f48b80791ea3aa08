// src/diagnostics.rs

//! # Convergence Diagnostics
//!
//! **Layer:** Statistical Inference / Post-Processing
//! **Status:** Normative — Strict Mathematical Execution Environment
//!
//! Summaries computed from recorded traces: per-parameter autocorrelation and
//! effective sample size of the cold chain, the Gelman–Rubin potential scale
//! reduction across independent chains, and the thermodynamic-integration
//! estimate of log model evidence over the β ladder. All kernels run over
//! plain slices and guard their singular inputs (constant series, empty
//! traces, a single chain) instead of emitting NaN.

use rayon::prelude::*;

use crate::output::{ChainOutput, PhaseLabel, TraceRecord};

/// Default truncation of reported autocorrelation functions.
pub const DEFAULT_MAX_LAG: usize = 50;

/// Lag-$k$ sample autocorrelations $\rho_0 \dots \rho_{K}$ with
/// $K = \min(\texttt{max\_lag}, N - 1)$:
///
/// $$ \rho_k = \frac{\sum_{t} (x_t - \bar x)(x_{t+k} - \bar x)}
///              {\sum_{t} (x_t - \bar x)^2} $$
///
/// A constant or near-empty series has no correlation structure to estimate;
/// it reports $\rho_0 = 1$ and zero elsewhere.
pub fn autocorrelation(series: &[f64], max_lag: usize) -> Vec<f64> {
    let n = series.len();
    if n == 0 {
        return Vec::new();
    }
    let truncation = max_lag.min(n - 1);
    let mean = series.iter().sum::<f64>() / n as f64;
    let c0: f64 = series.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n as f64;

    let mut rho = Vec::with_capacity(truncation + 1);
    rho.push(1.0);
    if c0 <= 0.0 {
        rho.resize(truncation + 1, 0.0);
        return rho;
    }
    for k in 1..=truncation {
        let ck: f64 = series[..n - k]
            .iter()
            .zip(series[k..].iter())
            .map(|(&a, &b)| (a - mean) * (b - mean))
            .sum::<f64>()
            / n as f64;
        rho.push(ck / c0);
    }
    rho
}

/// Effective sample size
/// $\mathrm{ESS} = N / (1 + 2 \sum_{k=1}^{K^*} \rho_k)$ with the truncation
/// $K^*$ chosen by Geyer's initial positive sequence rule: consecutive lag
/// pairs $\Gamma_m = \rho_{2m-1} + \rho_{2m}$ are accumulated while they stay
/// positive. The estimate is clamped into $(0, N]$.
pub fn effective_sample_size(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 4 {
        return n as f64;
    }
    let nf = n as f64;
    let mean = series.iter().sum::<f64>() / nf;
    let c0: f64 = series.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / nf;
    if c0 <= 0.0 {
        return nf;
    }

    let rho_at = |k: usize| -> f64 {
        let ck: f64 = series[..n - k]
            .iter()
            .zip(series[k..].iter())
            .map(|(&a, &b)| (a - mean) * (b - mean))
            .sum::<f64>()
            / nf;
        ck / c0
    };

    let mut tail = 0.0;
    let mut m = 1;
    loop {
        let (k1, k2) = (2 * m - 1, 2 * m);
        if k2 >= n {
            break;
        }
        let pair = rho_at(k1) + rho_at(k2);
        if pair <= 0.0 {
            break;
        }
        tail += pair;
        m += 1;
    }

    let tau = 1.0 + 2.0 * tail;
    (nf / tau).min(nf)
}

/// Gelman–Rubin potential scale reduction over $M \ge 2$ chains truncated to a
/// common length $N$:
///
/// $$ \hat R = \sqrt{\frac{N-1}{N} + \frac{1}{N}\,\frac{B}{W}} $$
///
/// with $B$ the between-chain and $W$ the within-chain variance. `None` when
/// fewer than two chains or fewer than two draws per chain are available.
pub fn potential_scale_reduction(chains: &[&[f64]]) -> Option<f64> {
    if chains.len() < 2 {
        return None;
    }
    let n = chains.iter().map(|c| c.len()).min()?;
    if n < 2 {
        return None;
    }
    let m = chains.len() as f64;
    let nf = n as f64;

    let means: Vec<f64> = chains
        .iter()
        .map(|c| c[..n].iter().sum::<f64>() / nf)
        .collect();
    let grand = means.iter().sum::<f64>() / m;

    let within: f64 = chains
        .iter()
        .zip(means.iter())
        .map(|(c, &mu)| c[..n].iter().map(|&x| (x - mu).powi(2)).sum::<f64>() / (nf - 1.0))
        .sum::<f64>()
        / m;
    // B / N in the classical notation.
    let between_over_n: f64 =
        means.iter().map(|&mu| (mu - grand).powi(2)).sum::<f64>() / (m - 1.0);

    if within <= 0.0 {
        // Degenerate chains: identical constants converge trivially.
        return Some(if between_over_n <= 0.0 { 1.0 } else { f64::INFINITY });
    }
    Some(((nf - 1.0) / nf + between_over_n / within).sqrt())
}

/// Per-parameter potential scale reduction across independent chain outputs,
/// computed on the cold sampling draws. `None` when fewer than two chains.
pub fn rhat_per_parameter(outputs: &[ChainOutput]) -> Option<Vec<f64>> {
    if outputs.len() < 2 {
        return None;
    }
    let dim = outputs[0].config.params.len();
    let draws: Vec<Vec<Vec<f64>>> = outputs
        .iter()
        .map(|output| (0..dim).map(|p| output.posterior_draws(p)).collect())
        .collect();

    let mut rhats = Vec::with_capacity(dim);
    for p in 0..dim {
        let series: Vec<&[f64]> = draws.iter().map(|chain| chain[p].as_slice()).collect();
        rhats.push(potential_scale_reduction(&series)?);
    }
    Some(rhats)
}

/// Trapezoid estimate of log model evidence from rung-wise mean sampled
/// log-likelihoods over the ladder:
/// $\ln Z \approx \sum_r \tfrac{1}{2}(\bar\ell_r + \bar\ell_{r-1})
/// (\beta_r - \beta_{r-1})$.
pub fn log_evidence_trapezoid(ladder: &[f64], mean_loglike: &[f64]) -> Option<f64> {
    if ladder.len() < 2 || ladder.len() != mean_loglike.len() {
        return None;
    }
    if mean_loglike.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let mut estimate = 0.0;
    for r in 1..ladder.len() {
        estimate += 0.5 * (mean_loglike[r] + mean_loglike[r - 1]) * (ladder[r] - ladder[r - 1]);
    }
    Some(estimate)
}

/// Extracts one parameter's series from the given rung's sampling records.
pub fn sampling_series(trace: &[TraceRecord], rung: usize, param: usize) -> Vec<f64> {
    trace
        .iter()
        .filter(|record| record.phase == PhaseLabel::Sampling && record.rung == rung)
        .map(|record| record.theta[param])
        .collect()
}

/// ESS and autocorrelation for every parameter of the cold sampling trace,
/// evaluated in parallel across parameters.
pub(crate) fn summarise_cold_trace(
    trace: &[TraceRecord],
    cold_rung: usize,
    dim: usize,
) -> (Vec<f64>, Vec<Vec<f64>>) {
    let per_param: Vec<(f64, Vec<f64>)> = (0..dim)
        .into_par_iter()
        .map(|p| {
            let series = sampling_series(trace, cold_rung, p);
            (
                effective_sample_size(&series),
                autocorrelation(&series, DEFAULT_MAX_LAG),
            )
        })
        .collect();
    per_param.into_iter().unzip()
}
