//! Context feature matrix and its covariance operator.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use super::power::{self, SymmetricOperator};
use crate::text::Context;

/// Signed feature hash of a token: `(index, ±1.0)`.
pub fn token_hash(token: &str, dim: usize) -> (usize, f64) {
    let digest = Sha256::digest(token.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let raw = u64::from_be_bytes(head);
    let index = (raw % dim as u64) as usize;
    let sign = if raw >> 63 == 1 { -1.0 } else { 1.0 };
    (index, sign)
}

/// Token positions within `window` of any term occurrence, minus the term itself.
fn window_positions(ctx: &Context, term_len: usize, window: usize) -> BTreeSet<usize> {
    let inside_term = |pos: usize| {
        ctx.occurrences
            .iter()
            .any(|&start| pos >= start && pos < start + term_len)
    };
    let mut out = BTreeSet::new();
    for &start in &ctx.occurrences {
        let lo = start.saturating_sub(window);
        let hi = (start + term_len + window).min(ctx.tokens.len());
        for pos in lo..hi {
            if !inside_term(pos) {
                out.insert(pos);
            }
        }
    }
    out
}

/// One L2-normalized row per context. Unanchored contexts, and anchored ones
/// with nothing around the term, give a zero row.
pub fn feature_row(ctx: &Context, term_len: usize, window: usize, dim: usize) -> Vec<f64> {
    let mut row = vec![0.0; dim];
    if dim == 0 {
        return row;
    }
    for pos in window_positions(ctx, term_len, window) {
        let (idx, sign) = token_hash(&ctx.tokens[pos], dim);
        row[idx] += sign;
    }
    let n = power::norm2(&row);
    if n > 0.0 {
        for x in row.iter_mut() {
            *x /= n;
        }
    }
    row
}

/// Mean-centered feature rows; applies `Xcᵀ (Xc v) / (n - 1)` without
/// materializing the covariance.
#[derive(Debug, Clone)]
pub struct CovarianceOperator {
    rows: Vec<Vec<f64>>,
    dim: usize,
}

impl CovarianceOperator {
    /// Rows are sorted into a canonical order first, so every floating-point
    /// sum below runs in the same order whatever order the contexts came in.
    pub fn new(mut rows: Vec<Vec<f64>>, dim: usize) -> Self {
        rows.sort_by(|a, b| {
            a.iter()
                .zip(b.iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let n = rows.len();
        if n > 0 {
            let mut mean = vec![0.0; dim];
            for row in &rows {
                for (m, x) in mean.iter_mut().zip(row.iter()) {
                    *m += x;
                }
            }
            for m in mean.iter_mut() {
                *m /= n as f64;
            }
            for row in rows.iter_mut() {
                for (x, m) in row.iter_mut().zip(mean.iter()) {
                    *x -= m;
                }
            }
        }
        Self { rows, dim }
    }

    /// Total variance, i.e. the covariance trace.
    pub fn trace(&self) -> f64 {
        let n = self.rows.len();
        if n < 2 {
            return 0.0;
        }
        let ss: f64 = self.rows.iter().map(|r| power::dot(r, r)).sum();
        ss / (n as f64 - 1.0)
    }
}

impl SymmetricOperator for CovarianceOperator {
    fn dim(&self) -> usize {
        self.dim
    }

    fn apply(&self, v: &[f64], out: &mut [f64]) {
        out.iter_mut().for_each(|o| *o = 0.0);
        let n = self.rows.len();
        if n < 2 {
            return;
        }
        let denom = n as f64 - 1.0;
        for row in &self.rows {
            let proj = power::dot(row, v);
            for (o, x) in out.iter_mut().zip(row.iter()) {
                *o += x * proj;
            }
        }
        for o in out.iter_mut() {
            *o /= denom;
        }
    }
}
