// src/output.rs

//! # Trace Records and the Output Object
//!
//! **Layer:** Results / Egress
//!
//! The run's sole artifact: an append-only trace of recorded states plus a
//! diagnostics block and the configuration echo for reproducibility. The
//! object serialises to JSON as a whole; the trace alone exports to CSV for
//! downstream tabular tooling.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::system::Config;

/// Which phase of the run produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseLabel {
    Burnin,
    Sampling,
}

impl PhaseLabel {
    /// Tag used in the CSV export.
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseLabel::Burnin => "burnin",
            PhaseLabel::Sampling => "sampling",
        }
    }
}

/// One recorded state of one rung at one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub phase: PhaseLabel,
    pub iteration: usize,
    pub rung: usize,
    pub theta: Vec<f64>,
    pub logprior: f64,
    pub loglikelihood: f64,
}

/// Accept/attempt tally of one adjacent rung pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapAcceptance {
    pub accepted: u64,
    pub attempted: u64,
}

impl SwapAcceptance {
    /// Empirical acceptance rate; zero before any attempt.
    #[inline]
    pub fn rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.accepted as f64 / self.attempted as f64
        }
    }
}

/// Convergence and coupling summaries of a completed (or interrupted) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDiagnostics {
    /// Inverse temperature per rung, non-decreasing, cold rung last.
    pub beta_ladder: Vec<f64>,
    /// Per adjacent pair, swap tallies accumulated during burn-in.
    pub swap_burnin: Vec<SwapAcceptance>,
    /// Per adjacent pair, swap tallies accumulated during sampling.
    pub swap_sampling: Vec<SwapAcceptance>,
    /// Per rung, per parameter univariate acceptance rates.
    pub accept_rate_per_rung: Vec<Vec<f64>>,
    /// Per rung joint-proposal acceptance rates.
    pub block_accept_rate_per_rung: Vec<f64>,
    /// Per parameter effective sample size of the cold sampling trace.
    pub ess: Vec<f64>,
    /// Per parameter autocorrelation function of the cold sampling trace.
    pub autocorrelation: Vec<Vec<f64>>,
    /// Per rung mean sampled log-likelihood (empty before any sampling record).
    pub mean_sampled_loglike: Vec<f64>,
    /// Thermodynamic-integration estimate of log model evidence; present only
    /// when a ladder with more than one rung sampled.
    pub log_evidence: Option<f64>,
}

/// Everything one chain returns to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainOutput {
    /// Chain identifier, echoed from the configuration.
    pub chain: u64,
    /// True when the host cancelled the run; the trace is the valid prefix.
    pub interrupted: bool,
    pub config: Config,
    pub diagnostics: ChainDiagnostics,
    pub trace: Vec<TraceRecord>,
}

impl ChainOutput {
    /// Index of the cold rung within the ladder.
    #[inline]
    pub fn cold_rung(&self) -> usize {
        self.diagnostics.beta_ladder.len() - 1
    }

    /// Posterior draws of one parameter: the cold-rung sampling-phase trace.
    pub fn posterior_draws(&self, param: usize) -> Vec<f64> {
        let cold = self.cold_rung();
        self.trace
            .iter()
            .filter(|record| record.phase == PhaseLabel::Sampling && record.rung == cold)
            .map(|record| record.theta[param])
            .collect()
    }

    /// Serialises the entire output object to a JSON string.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Writes the trace as CSV with one column per parameter.
    pub fn write_trace_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec![
            "phase".to_string(),
            "iteration".to_string(),
            "rung".to_string(),
        ];
        for spec in &self.config.params {
            header.push(spec.name.clone());
        }
        header.push("logprior".to_string());
        header.push("loglikelihood".to_string());
        writer.write_record(&header)?;

        let mut row = Vec::with_capacity(header.len());
        for record in &self.trace {
            row.clear();
            row.push(record.phase.as_str().to_string());
            row.push(record.iteration.to_string());
            row.push(record.rung.to_string());
            for &value in &record.theta {
                row.push(format!("{value:.17e}"));
            }
            row.push(format!("{:.17e}", record.logprior));
            row.push(format!("{:.17e}", record.loglikelihood));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{ParamSpec, PhaseSpec};

    fn fixture() -> ChainOutput {
        let config = Config {
            data: vec![1.0],
            params: vec![ParamSpec::bounded("mu", -1.0, 1.0, 0.0)],
            burnin: vec![PhaseSpec::adaptive_univariate(1)],
            samples: 2,
            rungs: 2,
            coupling_on: true,
            gti_pow: 1.0,
            chain: 9,
            seed: Some(1),
            record_all_rungs: false,
        };
        ChainOutput {
            chain: 9,
            interrupted: false,
            config,
            diagnostics: ChainDiagnostics {
                beta_ladder: vec![0.0, 1.0],
                swap_burnin: vec![SwapAcceptance {
                    accepted: 1,
                    attempted: 2,
                }],
                swap_sampling: vec![SwapAcceptance {
                    accepted: 2,
                    attempted: 2,
                }],
                accept_rate_per_rung: vec![vec![0.5], vec![0.4]],
                block_accept_rate_per_rung: vec![0.0, 0.0],
                ess: vec![2.0],
                autocorrelation: vec![vec![1.0, 0.0]],
                mean_sampled_loglike: vec![-3.0, -1.0],
                log_evidence: Some(-2.0),
            },
            trace: vec![
                TraceRecord {
                    phase: PhaseLabel::Burnin,
                    iteration: 0,
                    rung: 1,
                    theta: vec![0.1],
                    logprior: 0.0,
                    loglikelihood: -1.5,
                },
                TraceRecord {
                    phase: PhaseLabel::Sampling,
                    iteration: 1,
                    rung: 1,
                    theta: vec![0.2],
                    logprior: 0.0,
                    loglikelihood: -1.2,
                },
                TraceRecord {
                    phase: PhaseLabel::Sampling,
                    iteration: 2,
                    rung: 1,
                    theta: vec![0.3],
                    logprior: 0.0,
                    loglikelihood: -1.1,
                },
            ],
        }
    }

    #[test]
    fn posterior_draws_filter_cold_sampling_records() {
        let output = fixture();
        assert_eq!(output.posterior_draws(0), vec![0.2, 0.3]);
    }

    #[test]
    fn json_round_trip_preserves_swap_tallies() {
        let output = fixture();
        let text = output.to_json_string().expect("finite output must serialise");
        let back: ChainOutput = serde_json::from_str(&text).expect("round trip");
        assert_eq!(back.diagnostics.swap_burnin, output.diagnostics.swap_burnin);
        assert_eq!(back.trace.len(), output.trace.len());
        assert!((back.diagnostics.log_evidence.unwrap() + 2.0).abs() < 1e-15);
    }

    #[test]
    fn csv_export_carries_parameter_columns() {
        let output = fixture();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trace.csv");
        output.write_trace_csv(&path).expect("export must succeed");

        let text = std::fs::read_to_string(&path).expect("read back");
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "phase,iteration,rung,mu,logprior,loglikelihood"
        );
        assert_eq!(lines.count(), output.trace.len());
        assert!(text.contains("burnin"));
        assert!(text.contains("sampling"));
    }

    #[test]
    fn swap_rate_handles_empty_tallies() {
        assert_eq!(SwapAcceptance::default().rate(), 0.0);
        let some = SwapAcceptance {
            accepted: 3,
            attempted: 4,
        };
        assert!((some.rate() - 0.75).abs() < 1e-15);
    }
}
