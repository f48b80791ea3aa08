// src/transform.rs

//! # Bounded Parameter Reparameterisation
//!
//! **Layer:** Sampler Core / Change of Variables
//! **Status:** Normative — Strict Mathematical Execution Environment
//!
//! Every model parameter is lifted from its natural constrained space $\theta$
//! onto an unconstrained working space $\phi$ in which random-walk proposals are
//! generated. The mapping is classified by the finiteness of the declared bounds:
//!
//! | Bounds | $\phi = T(\theta)$ | $\theta = T^{-1}(\phi)$ |
//! |---|---|---|
//! | none | $\theta$ | $\phi$ |
//! | upper $U$ only | $\ln(U - \theta)$ | $U - e^{\phi}$ |
//! | lower $L$ only | $\ln(\theta - L)$ | $L + e^{\phi}$ |
//! | both | $\ln(\theta - L) - \ln(U - \theta)$ | $(U e^{\phi} + L)/(1 + e^{\phi})$ |
//!
//! A Metropolis test carried out in $\phi$ must add the log-Jacobian adjustment
//! $A = \sum_i \ln|d\theta'_i/d\phi'_i| - \ln|d\theta_i/d\phi_i|$ to stay in
//! detailed balance with the density declared on $\theta$.

use thiserror::Error;

/// Violations of the open support a transform is defined on.
///
/// A `DomainError` indicates a defect in host-supplied state or extreme
/// arithmetic upstream; it is fatal and never absorbed by the Metropolis test.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error(
        "Domain Violation: parameter {index} value {value} lies outside its open support"
    )]
    OutsideSupport { index: usize, value: f64 },
}

/// Bound classification of a single parameter, fixed at load time.
///
/// The variant is derived from which of the declared bounds are finite; the
/// dispatch below is exhaustive so a new bound configuration cannot be added
/// without extending every kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundTransform {
    /// $(-\infty, +\infty)$: the identity map.
    Unbounded,
    /// $(-\infty, U)$ with finite $U$.
    UpperBounded { upper: f64 },
    /// $(L, +\infty)$ with finite $L$.
    LowerBounded { lower: f64 },
    /// $(L, U)$ with both bounds finite: the scaled-logistic map.
    Interval { lower: f64, upper: f64 },
}

impl BoundTransform {
    /// Classifies a `(lower, upper)` pair; infinite entries mark an absent bound.
    #[inline]
    pub fn from_bounds(lower: f64, upper: f64) -> Self {
        match (lower.is_finite(), upper.is_finite()) {
            (false, false) => BoundTransform::Unbounded,
            (false, true) => BoundTransform::UpperBounded { upper },
            (true, false) => BoundTransform::LowerBounded { lower },
            (true, true) => BoundTransform::Interval { lower, upper },
        }
    }

    /// Tests membership in the open support. Finite bounds are strict: a value
    /// sitting exactly on a bound has no finite image in $\phi$.
    #[inline]
    pub fn contains(&self, theta: f64) -> bool {
        if !theta.is_finite() {
            return false;
        }
        match *self {
            BoundTransform::Unbounded => true,
            BoundTransform::UpperBounded { upper } => theta < upper,
            BoundTransform::LowerBounded { lower } => theta > lower,
            BoundTransform::Interval { lower, upper } => theta > lower && theta < upper,
        }
    }

    /// Forward map $\phi = T(\theta)$. The caller must have established
    /// membership via [`BoundTransform::contains`].
    #[inline]
    pub fn phi_of(&self, theta: f64) -> f64 {
        match *self {
            BoundTransform::Unbounded => theta,
            BoundTransform::UpperBounded { upper } => (upper - theta).ln(),
            BoundTransform::LowerBounded { lower } => (theta - lower).ln(),
            BoundTransform::Interval { lower, upper } => {
                (theta - lower).ln() - (upper - theta).ln()
            }
        }
    }

    /// Inverse map $\theta = T^{-1}(\phi)$, closed over the open support.
    ///
    /// The two-sided case is evaluated in the sign-split logistic form so that a
    /// large positive $\phi$ never exponentiates to overflow; the image then
    /// saturates at the bound itself, which the sweep rejects as non-interior.
    #[inline]
    pub fn theta_of(&self, phi: f64) -> f64 {
        match *self {
            BoundTransform::Unbounded => phi,
            BoundTransform::UpperBounded { upper } => upper - phi.exp(),
            BoundTransform::LowerBounded { lower } => lower + phi.exp(),
            BoundTransform::Interval { lower, upper } => {
                if phi >= 0.0 {
                    let e = (-phi).exp();
                    (upper + lower * e) / (1.0 + e)
                } else {
                    let e = phi.exp();
                    (upper * e + lower) / (1.0 + e)
                }
            }
        }
    }

    /// Variable part of $\ln|d\theta/d\phi|$ at `theta`.
    ///
    /// For the two-sided map the exact derivative carries an additional
    /// $-\ln(U - L)$ which is constant in `theta` and cancels in every
    /// adjustment difference, so it is omitted here.
    #[inline]
    pub fn log_scale(&self, theta: f64) -> f64 {
        match *self {
            BoundTransform::Unbounded => 0.0,
            BoundTransform::UpperBounded { upper } => (upper - theta).ln(),
            BoundTransform::LowerBounded { lower } => (theta - lower).ln(),
            BoundTransform::Interval { lower, upper } => {
                (upper - theta).ln() + (theta - lower).ln()
            }
        }
    }

    /// Per-coordinate log-Jacobian adjustment between a current and a proposed
    /// value: $\ln|d\theta'/d\phi'| - \ln|d\theta/d\phi|$.
    #[inline]
    pub fn adjustment(&self, theta: f64, theta_proposed: f64) -> f64 {
        self.log_scale(theta_proposed) - self.log_scale(theta)
    }
}

/// Lifts a full parameter vector onto the working space.
pub fn to_phi(transforms: &[BoundTransform], theta: &[f64]) -> Result<Vec<f64>, DomainError> {
    theta
        .iter()
        .zip(transforms.iter())
        .enumerate()
        .map(|(index, (&value, transform))| {
            if transform.contains(value) {
                Ok(transform.phi_of(value))
            } else {
                Err(DomainError::OutsideSupport { index, value })
            }
        })
        .collect()
}

/// Maps a working-space vector back to the natural space.
pub fn to_theta(transforms: &[BoundTransform], phi: &[f64]) -> Vec<f64> {
    phi.iter()
        .zip(transforms.iter())
        .map(|(&value, transform)| transform.theta_of(value))
        .collect()
}

/// Summed log-Jacobian adjustment $A$ for a joint move from `current` to
/// `proposed`. Both vectors must lie in the open support.
pub fn log_adjustment(
    transforms: &[BoundTransform],
    current: &[f64],
    proposed: &[f64],
) -> Result<f64, DomainError> {
    let mut total = 0.0;
    for (index, transform) in transforms.iter().enumerate() {
        if !transform.contains(current[index]) {
            return Err(DomainError::OutsideSupport {
                index,
                value: current[index],
            });
        }
        if !transform.contains(proposed[index]) {
            return Err(DomainError::OutsideSupport {
                index,
                value: proposed[index],
            });
        }
        total += transform.adjustment(current[index], proposed[index]);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-12;

    #[test]
    fn classification_follows_bound_finiteness() {
        assert_eq!(
            BoundTransform::from_bounds(f64::NEG_INFINITY, f64::INFINITY),
            BoundTransform::Unbounded
        );
        assert_eq!(
            BoundTransform::from_bounds(f64::NEG_INFINITY, 2.0),
            BoundTransform::UpperBounded { upper: 2.0 }
        );
        assert_eq!(
            BoundTransform::from_bounds(-1.0, f64::INFINITY),
            BoundTransform::LowerBounded { lower: -1.0 }
        );
        assert_eq!(
            BoundTransform::from_bounds(0.0, 10.0),
            BoundTransform::Interval {
                lower: 0.0,
                upper: 10.0
            }
        );
    }

    #[test]
    fn round_trip_identity_within_tolerance() {
        let cases = [
            (BoundTransform::Unbounded, vec![-3.5, 0.0, 7.25]),
            (
                BoundTransform::UpperBounded { upper: 4.0 },
                vec![-10.0, 0.0, 3.999],
            ),
            (
                BoundTransform::LowerBounded { lower: -2.0 },
                vec![-1.999, 0.5, 25.0],
            ),
            (
                BoundTransform::Interval {
                    lower: -1.0,
                    upper: 1.0,
                },
                vec![-0.999, 0.0, 0.731],
            ),
        ];
        for (transform, points) in &cases {
            for &theta in points {
                let phi = transform.phi_of(theta);
                let back = transform.theta_of(phi);
                assert!(
                    (back - theta).abs() < 1e-9,
                    "round trip drifted: {theta} -> {phi} -> {back}"
                );
            }
        }
    }

    #[test]
    fn interval_inverse_saturates_without_overflow() {
        let transform = BoundTransform::Interval {
            lower: 2.0,
            upper: 5.0,
        };
        let high = transform.theta_of(800.0);
        let low = transform.theta_of(-800.0);
        assert!(high.is_finite() && high <= 5.0);
        assert!(low.is_finite() && low >= 2.0);
    }

    #[test]
    fn adjustment_matches_closed_forms() {
        // Upper bound: A = ln(U - t') - ln(U - t).
        let upper = BoundTransform::UpperBounded { upper: 3.0 };
        let expected = (3.0f64 - 1.0).ln() - (3.0f64 - 2.0).ln();
        assert!((upper.adjustment(2.0, 1.0) - expected).abs() < TOL);

        // Two-sided: A = ln(U - t') + ln(t' - L) - ln(U - t) - ln(t - L).
        let both = BoundTransform::Interval {
            lower: 0.0,
            upper: 10.0,
        };
        let expected =
            (10.0f64 - 7.0).ln() + 7.0f64.ln() - (10.0f64 - 4.0).ln() - 4.0f64.ln();
        assert!((both.adjustment(4.0, 7.0) - expected).abs() < TOL);

        // Identity map contributes nothing.
        assert_eq!(BoundTransform::Unbounded.adjustment(-5.0, 12.0), 0.0);
    }

    #[test]
    fn vector_lift_rejects_exterior_values() {
        let transforms = vec![
            BoundTransform::Unbounded,
            BoundTransform::Interval {
                lower: 0.0,
                upper: 1.0,
            },
        ];
        let err = to_phi(&transforms, &[0.0, 1.5]).unwrap_err();
        assert_eq!(
            err,
            DomainError::OutsideSupport {
                index: 1,
                value: 1.5
            }
        );
        // Boundary values are exterior: the image would be infinite.
        assert!(to_phi(&transforms, &[0.0, 1.0]).is_err());
        assert!(to_phi(&transforms, &[0.0, 0.5]).is_ok());
    }

    #[test]
    fn joint_adjustment_sums_per_coordinate_terms() {
        let transforms = vec![
            BoundTransform::LowerBounded { lower: 0.0 },
            BoundTransform::Unbounded,
        ];
        let a = log_adjustment(&transforms, &[1.0, -4.0], &[2.0, 9.0]).unwrap();
        assert!((a - (2.0f64.ln() - 1.0f64.ln())).abs() < TOL);
    }
}
