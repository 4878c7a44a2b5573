//! Deterministic power iteration.
//!
//! The start vector depends only on the operator dimension, never on the input
//! values, wall-clock or process state, so identical inputs give bit-identical
//! estimates. Convergence is declared when the Rayleigh quotient changes by at
//! most `TOLERANCE` relative to its magnitude; `MAX_ITERATIONS` caps the loop.

/// Relative change of the Rayleigh quotient that counts as converged.
pub const TOLERANCE: f64 = 1e-9;

/// Hard iteration cap.
pub const MAX_ITERATIONS: usize = 1000;

/// A symmetric linear operator applied matrix-free.
pub trait SymmetricOperator {
    fn dim(&self) -> usize;
    /// `out = A * v`. `out` has length `dim()` and is overwritten.
    fn apply(&self, v: &[f64], out: &mut [f64]);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerEstimate {
    /// Rayleigh-quotient estimate of the dominant eigenvalue. May be NaN when
    /// the operator produced non-finite values; callers clamp.
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Fixed, strictly positive start vector of unit length.
///
/// Entries are `1 + frac(sqrt(i + 1))`: irregular enough not to be orthogonal to
/// structured eigenvectors, positive so it always overlaps a Perron vector.
pub fn start_vector(dim: usize) -> Vec<f64> {
    let mut v: Vec<f64> = (0..dim)
        .map(|i| 1.0 + ((i as f64) + 1.0).sqrt().fract())
        .collect();
    let n = norm2(&v);
    if n > 0.0 {
        for x in v.iter_mut() {
            *x /= n;
        }
    }
    v
}

/// Estimate the eigenvalue of largest magnitude of `op`.
pub fn dominant_eigenvalue<O: SymmetricOperator + ?Sized>(op: &O) -> PowerEstimate {
    let n = op.dim();
    if n == 0 {
        return PowerEstimate {
            value: 0.0,
            iterations: 0,
            converged: true,
        };
    }

    let mut v = start_vector(n);
    let mut w = vec![0.0; n];
    let mut previous = f64::NAN;

    for it in 1..=MAX_ITERATIONS {
        op.apply(&v, &mut w);
        let rayleigh = dot(&v, &w);
        let norm = norm2(&w);

        if !norm.is_finite() || !rayleigh.is_finite() {
            return PowerEstimate {
                value: f64::NAN,
                iterations: it,
                converged: false,
            };
        }
        if norm == 0.0 {
            // v landed in the null space: every eigenvalue it touches is zero.
            return PowerEstimate {
                value: 0.0,
                iterations: it,
                converged: true,
            };
        }

        for (vi, wi) in v.iter_mut().zip(w.iter()) {
            *vi = wi / norm;
        }

        if previous.is_finite()
            && (rayleigh - previous).abs() <= TOLERANCE * rayleigh.abs().max(f64::MIN_POSITIVE)
        {
            return PowerEstimate {
                value: rayleigh,
                iterations: it,
                converged: true,
            };
        }
        previous = rayleigh;
    }

    PowerEstimate {
        value: previous,
        iterations: MAX_ITERATIONS,
        converged: false,
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub(crate) fn norm2(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}
