// src/system.rs

//! # Run Description and Immutable Shared State
//!
//! **Layer:** Configuration / Model Ingress
//! **Status:** Normative — Strict Mathematical Execution Environment
//!
//! The host describes a run through [`Config`]: the observed dataset, the
//! parameter descriptors, the burn-in phase schedule, and the temperature
//! ladder controls. Validation promotes a `Config` into a [`System`], the
//! immutable block shared read-only by every tempered chain; nothing mutates a
//! `System` after construction, so chains may update in parallel against a
//! plain borrow.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::proposal::ProposalMethod;
use crate::rng;
use crate::transform::{self, BoundTransform};

/// Structural and numerical violations detected while loading a run
/// description. Every variant is fatal; no sampling iteration runs after one.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration Violation: at least one parameter must be declared")]
    EmptyParameters,

    #[error("Configuration Violation: duplicate parameter name '{0}'")]
    DuplicateParameterName(String),

    #[error(
        "Configuration Violation: parameter '{name}' has an empty support: min {min} >= max {max}"
    )]
    InvalidBounds { name: String, min: f64, max: f64 },

    #[error(
        "Configuration Violation: parameter '{name}' initial value {init} lies outside the open interval ({min}, {max})"
    )]
    InitOutsideBounds {
        name: String,
        init: f64,
        min: f64,
        max: f64,
    },

    #[error("Configuration Violation: observation {index} is not finite ({value})")]
    NonFiniteObservation { index: usize, value: f64 },

    #[error("Configuration Violation: burn-in phase {0} declares zero iterations")]
    EmptyPhase(usize),

    #[error("Configuration Violation: sample count must be positive")]
    EmptySampleCount,

    #[error("Configuration Violation: rung count must be at least 1, got {0}")]
    InvalidRungCount(usize),

    #[error("Configuration Violation: ladder exponent must be >= 1, got {0}")]
    InvalidLadderPower(f64),

    #[error(
        "Configuration Violation: initial state has non-finite log-density (log-likelihood {loglike}, log-prior {logprior})"
    )]
    NonFiniteInitialDensity { loglike: f64, logprior: f64 },

    #[error("Configuration Parsing Failure: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration I/O Failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Declaration of a single model parameter. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    /// Lower bound; negative infinity marks an unbounded side.
    #[serde(default = "neg_infinity")]
    pub min: f64,
    /// Upper bound; positive infinity marks an unbounded side.
    #[serde(default = "infinity")]
    pub max: f64,
    /// Starting value, strictly interior to any finite bound.
    pub init: f64,
}

fn neg_infinity() -> f64 {
    f64::NEG_INFINITY
}

fn infinity() -> f64 {
    f64::INFINITY
}

impl ParamSpec {
    /// Unbounded parameter.
    pub fn unbounded(name: &str, init: f64) -> Self {
        Self {
            name: name.to_string(),
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            init,
        }
    }

    /// Parameter with explicit bounds (either side may be infinite).
    pub fn bounded(name: &str, min: f64, max: f64, init: f64) -> Self {
        Self {
            name: name.to_string(),
            min,
            max,
            init,
        }
    }
}

/// One burn-in phase of the adaptation state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Number of iterations the phase runs for.
    pub iterations: usize,
    /// Proposal strategy active during the phase.
    pub method: ProposalMethod,
    /// Robbins–Monro scale adaptation on/off.
    #[serde(default)]
    pub bw_update: bool,
    /// Restore initial scales when the phase begins.
    #[serde(default)]
    pub bw_reset: bool,
    /// Welford covariance tracking on/off.
    #[serde(default)]
    pub cov_recalc: bool,
}

impl PhaseSpec {
    /// A plain adapting univariate phase, the most common schedule entry.
    pub fn adaptive_univariate(iterations: usize) -> Self {
        Self {
            iterations,
            method: ProposalMethod::Univariate,
            bw_update: true,
            bw_reset: false,
            cov_recalc: false,
        }
    }
}

/// Full run description supplied by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Ordered observations handed to the log-likelihood.
    #[serde(default)]
    pub data: Vec<f64>,
    /// Parameter declarations, one per model dimension.
    pub params: Vec<ParamSpec>,
    /// Burn-in schedule; may be empty for a non-adaptive run.
    #[serde(default)]
    pub burnin: Vec<PhaseSpec>,
    /// Number of sampling iterations recorded after burn-in.
    pub samples: usize,
    /// Number of tempered rungs; 1 disables coupling entirely.
    #[serde(default = "default_rungs")]
    pub rungs: usize,
    /// Master switch for swap attempts between adjacent rungs.
    #[serde(default = "default_true")]
    pub coupling_on: bool,
    /// Ladder concentration exponent $p \ge 1$ in
    /// $\beta_r = ((r-1)/(R-1))^p$; larger values crowd rungs near the prior.
    #[serde(default = "default_gti_pow", alias = "GTI_pow")]
    pub gti_pow: f64,
    /// Chain identifier mixed into the master seed.
    #[serde(default = "default_chain")]
    pub chain: u64,
    /// Optional explicit seed; absent means a fixed crate default.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Record every rung instead of only the cold one.
    #[serde(default)]
    pub record_all_rungs: bool,
}

fn default_rungs() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_gti_pow() -> f64 {
    1.0
}

fn default_chain() -> u64 {
    1
}

impl Config {
    /// Parses a TOML run description.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML run description from disk.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Validates the description and promotes it into an immutable [`System`].
    pub fn build(self) -> Result<System, ConfigError> {
        System::new(self)
    }
}

/// Immutable state shared by every particle of a run: the dataset, the
/// parameter descriptors with their derived transforms, the β ladder and the
/// validated schedule. Constructed once, borrowed everywhere.
#[derive(Debug, Clone)]
pub struct System {
    config: Config,
    transforms: Vec<BoundTransform>,
    ladder: Vec<f64>,
    init_theta: Vec<f64>,
    master_seed: u64,
}

impl System {
    fn new(config: Config) -> Result<Self, ConfigError> {
        // 1. Dimensionality and name uniqueness.
        if config.params.is_empty() {
            return Err(ConfigError::EmptyParameters);
        }
        let mut seen = AHashSet::with_capacity(config.params.len());
        for spec in &config.params {
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateParameterName(spec.name.clone()));
            }
        }

        // 2. Support and initial-value constraints per parameter.
        let mut transforms = Vec::with_capacity(config.params.len());
        let mut init_theta = Vec::with_capacity(config.params.len());
        for spec in &config.params {
            if !(spec.min < spec.max) {
                return Err(ConfigError::InvalidBounds {
                    name: spec.name.clone(),
                    min: spec.min,
                    max: spec.max,
                });
            }
            let transform = BoundTransform::from_bounds(spec.min, spec.max);
            if !transform.contains(spec.init) {
                return Err(ConfigError::InitOutsideBounds {
                    name: spec.name.clone(),
                    init: spec.init,
                    min: spec.min,
                    max: spec.max,
                });
            }
            transforms.push(transform);
            init_theta.push(spec.init);
        }

        // 3. Dataset finiteness.
        for (index, &value) in config.data.iter().enumerate() {
            if !value.is_finite() {
                return Err(ConfigError::NonFiniteObservation { index, value });
            }
        }

        // 4. Schedule and ladder controls.
        for (index, phase) in config.burnin.iter().enumerate() {
            if phase.iterations == 0 {
                return Err(ConfigError::EmptyPhase(index));
            }
        }
        if config.samples == 0 {
            return Err(ConfigError::EmptySampleCount);
        }
        if config.rungs == 0 {
            return Err(ConfigError::InvalidRungCount(config.rungs));
        }
        if !(config.gti_pow >= 1.0) {
            return Err(ConfigError::InvalidLadderPower(config.gti_pow));
        }

        let ladder = temperature_ladder(config.rungs, config.gti_pow);
        let master_seed = rng::master_seed(config.seed, config.chain);

        Ok(Self {
            config,
            transforms,
            ladder,
            init_theta,
            master_seed,
        })
    }

    /// Model dimension $d$.
    #[inline]
    pub fn dim(&self) -> usize {
        self.config.params.len()
    }

    /// Shared read-only dataset.
    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.config.data
    }

    /// Parameter declarations in declaration order.
    #[inline]
    pub fn params(&self) -> &[ParamSpec] {
        &self.config.params
    }

    /// Derived bound transforms, index-aligned with [`System::params`].
    #[inline]
    pub fn transforms(&self) -> &[BoundTransform] {
        &self.transforms
    }

    /// Inverse-temperature ladder, non-decreasing, ending at the cold rung.
    #[inline]
    pub fn ladder(&self) -> &[f64] {
        &self.ladder
    }

    /// Burn-in schedule.
    #[inline]
    pub fn phases(&self) -> &[PhaseSpec] {
        &self.config.burnin
    }

    /// Number of sampling iterations.
    #[inline]
    pub fn samples(&self) -> usize {
        self.config.samples
    }

    /// True when swap attempts run: coupling requested and more than one rung.
    #[inline]
    pub fn coupling_enabled(&self) -> bool {
        self.config.coupling_on && self.ladder.len() > 1
    }

    /// True when every rung is recorded instead of only the cold one.
    #[inline]
    pub fn record_all_rungs(&self) -> bool {
        self.config.record_all_rungs
    }

    /// Index of the cold (β = 1) rung.
    #[inline]
    pub fn cold_rung(&self) -> usize {
        self.ladder.len() - 1
    }

    /// Master seed of this chain's randomness sub-streams.
    #[inline]
    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Validated initial state in the natural space.
    #[inline]
    pub fn init_theta(&self) -> &[f64] {
        &self.init_theta
    }

    /// Initial state lifted onto the working space. Interior membership was
    /// established at construction, so a failure here reports arithmetic
    /// breakage in the transform layer rather than a bad description.
    pub fn init_phi(&self) -> Result<Vec<f64>, transform::DomainError> {
        transform::to_phi(&self.transforms, &self.init_theta)
    }

    /// The validated configuration, echoed into the output object.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Inverse-temperature ladder $\beta_r = ((r-1)/(R-1))^p$ for $r = 1 \dots R$:
/// $\beta_1 = 0$ samples the prior, $\beta_R = 1$ the posterior. A single-rung
/// ladder is the plain cold chain.
pub fn temperature_ladder(rungs: usize, power: f64) -> Vec<f64> {
    if rungs == 1 {
        return vec![1.0];
    }
    (0..rungs)
        .map(|r| (r as f64 / (rungs - 1) as f64).powf(power))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        Config {
            data: vec![0.5, 1.5],
            params: vec![ParamSpec::bounded("mu", -10.0, 10.0, 0.0)],
            burnin: vec![PhaseSpec::adaptive_univariate(100)],
            samples: 100,
            rungs: 1,
            coupling_on: true,
            gti_pow: 1.0,
            chain: 1,
            seed: Some(7),
            record_all_rungs: false,
        }
    }

    #[test]
    fn ladder_spans_prior_to_posterior() {
        let ladder = temperature_ladder(5, 1.0);
        assert_eq!(ladder.len(), 5);
        assert!(ladder[0].abs() < f64::EPSILON);
        assert!((ladder[4] - 1.0).abs() < f64::EPSILON);
        for pair in ladder.windows(2) {
            assert!(pair[0] <= pair[1], "ladder must be non-decreasing");
        }
    }

    #[test]
    fn ladder_exponent_concentrates_near_prior() {
        let flat = temperature_ladder(11, 1.0);
        let hot = temperature_ladder(11, 3.0);
        // With p = 3 every interior rung sits strictly below its p = 1 peer.
        for r in 1..10 {
            assert!(hot[r] < flat[r]);
        }
        assert_eq!(hot[0], 0.0);
        assert!((hot[10] - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn single_rung_ladder_is_cold() {
        assert_eq!(temperature_ladder(1, 3.0), vec![1.0]);
    }

    #[test]
    fn validation_rejects_inverted_bounds() {
        let mut config = minimal_config();
        config.params = vec![ParamSpec::bounded("mu", 5.0, 3.0, 4.0)];
        assert!(matches!(
            config.build(),
            Err(ConfigError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn validation_rejects_boundary_init() {
        let mut config = minimal_config();
        config.params = vec![ParamSpec::bounded("sigma", 0.0, 10.0, 0.0)];
        assert!(matches!(
            config.build(),
            Err(ConfigError::InitOutsideBounds { .. })
        ));
    }

    #[test]
    fn validation_rejects_duplicate_names() {
        let mut config = minimal_config();
        config.params = vec![
            ParamSpec::unbounded("x", 0.0),
            ParamSpec::unbounded("x", 1.0),
        ];
        assert!(matches!(
            config.build(),
            Err(ConfigError::DuplicateParameterName(_))
        ));
    }

    #[test]
    fn validation_rejects_degenerate_schedules() {
        let mut config = minimal_config();
        config.burnin[0].iterations = 0;
        assert!(matches!(config.build(), Err(ConfigError::EmptyPhase(0))));

        let mut config = minimal_config();
        config.samples = 0;
        assert!(matches!(config.build(), Err(ConfigError::EmptySampleCount)));

        let mut config = minimal_config();
        config.rungs = 0;
        assert!(matches!(
            config.build(),
            Err(ConfigError::InvalidRungCount(0))
        ));

        let mut config = minimal_config();
        config.gti_pow = 0.5;
        assert!(matches!(
            config.build(),
            Err(ConfigError::InvalidLadderPower(_))
        ));
    }

    #[test]
    fn validation_rejects_non_finite_observations() {
        let mut config = minimal_config();
        config.data = vec![1.0, f64::NAN];
        assert!(matches!(
            config.build(),
            Err(ConfigError::NonFiniteObservation { index: 1, .. })
        ));
    }

    #[test]
    fn toml_file_ingestion_reports_io_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.toml");
        std::fs::write(
            &path,
            "data = [0.5]\nsamples = 10\n\n[[params]]\nname = \"x\"\ninit = 0.0\n",
        )
        .expect("fixture write");

        let config = Config::from_toml_file(&path).expect("file must parse");
        assert_eq!(config.samples, 10);
        assert!(config.params[0].min.is_infinite());

        let missing = Config::from_toml_file(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));

        std::fs::write(&path, "samples = \"not a number\"").expect("fixture write");
        assert!(matches!(
            Config::from_toml_file(&path),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn toml_round_trip_with_ladder_alias() {
        let text = r#"
            data = [1.0, 2.0, 3.0]
            samples = 500
            rungs = 4
            GTI_pow = 2.0
            chain = 3

            [[params]]
            name = "mu"
            min = -10.0
            max = 10.0
            init = 0.0

            [[params]]
            name = "sigma"
            min = 0.0
            init = 1.0

            [[burnin]]
            iterations = 200
            method = "univariate"
            bw_update = true

            [[burnin]]
            iterations = 300
            method = "block_correlated"
            bw_update = true
            cov_recalc = true
        "#;
        let config = Config::from_toml_str(text).expect("valid TOML must parse");
        assert_eq!(config.gti_pow, 2.0);
        assert_eq!(config.chain, 3);
        assert!(config.params[1].max.is_infinite());

        let system = config.build().expect("valid config must promote");
        assert_eq!(system.dim(), 2);
        assert_eq!(system.ladder().len(), 4);
        assert!(system.coupling_enabled());
        assert_eq!(system.cold_rung(), 3);
    }
}
