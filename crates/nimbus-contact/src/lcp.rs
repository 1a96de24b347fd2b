//! Boxed LCP for contact impulses.
//!
//! ```text
//! w = Q f − b
//! normal rows:   f ≥ 0,            w ≥ 0,   f·w = 0
//! friction rows: |f| ≤ μ f_normal, w opposes f when |f| = μ f_normal,
//!                w = 0 otherwise
//! ```
//!
//! Projected Gauss-Seidel gives an approximate solution and a classification
//! of every row. Standardization then re-solves the clamping rows exactly,
//! with upper-bound rows expressed through their normals, so that the final
//! impulses are a smooth function of `Q` and `b` on the current active set.

use crate::{ConstraintKind, ContactConstraint};
use nimbus_math::{DMat, DVec, pseudo_inverse};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Relative tolerance of the standardized-solution checks.
const STANDARDIZE_TOL: f64 = 1e-9;

/// Projected Gauss-Seidel settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PgsSettings {
    pub iterations: usize,
    /// Stop once no impulse moves by more than this in a sweep.
    pub tolerance: f64,
    /// Constraint force mixing added to the diagonal.
    pub cfm: f64,
}

impl Default for PgsSettings {
    fn default() -> Self {
        Self {
            iterations: 500,
            tolerance: 1e-14,
            cfm: 0.0,
        }
    }
}

/// Role of one constraint row in a solution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstraintClass {
    /// Strictly inside its bounds (or a positive normal impulse).
    Clamping,
    /// Friction saturated at `sign · μ · f_normal`.
    UpperBound { sign: f64 },
    /// Zero impulse: an opening normal or the friction of one.
    Separating,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxedLcp {
    pub q: DMat,
    pub b: DVec,
    /// Friction coefficient of each row (unused for normal rows).
    pub mu: DVec,
    /// Normal row bounding each friction row; `None` for normal rows.
    pub findex: Vec<Option<usize>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LcpSolution {
    pub impulses: DVec,
    pub classes: Vec<ConstraintClass>,
    /// Whether the exact re-solve on the PGS active set passed its checks.
    /// When it did not, `impulses` are the PGS impulses.
    pub standardized: bool,
    pub iterations: usize,
}

impl LcpSolution {
    pub fn clamping(&self) -> Vec<usize> {
        self.indices_where(|c| c == ConstraintClass::Clamping)
    }

    pub fn upper_bound(&self) -> Vec<usize> {
        self.indices_where(|c| matches!(c, ConstraintClass::UpperBound { .. }))
    }

    pub fn num_clamping(&self) -> usize {
        self.clamping().len()
    }

    pub fn num_upper_bound(&self) -> usize {
        self.upper_bound().len()
    }

    fn indices_where(&self, pred: impl Fn(ConstraintClass) -> bool) -> Vec<usize> {
        self.classes
            .iter()
            .enumerate()
            .filter(|(_, c)| pred(**c))
            .map(|(i, _)| i)
            .collect()
    }
}

impl BoxedLcp {
    pub fn new(q: DMat, b: DVec, mu: DVec, findex: Vec<Option<usize>>) -> Self {
        assert_eq!(q.nrows(), b.len());
        assert_eq!(mu.len(), b.len());
        assert_eq!(findex.len(), b.len());
        Self { q, b, mu, findex }
    }

    /// LCP over `constraints`, whose friction rows must index normals in the
    /// same list.
    pub fn from_constraints(q: DMat, b: DVec, constraints: &[ContactConstraint]) -> Self {
        let mu = DVec::from_iterator(constraints.len(), constraints.iter().map(|c| c.friction));
        let findex = constraints
            .iter()
            .map(|c| match c.kind {
                ConstraintKind::Normal => None,
                ConstraintKind::Friction { normal } => Some(normal),
            })
            .collect();
        Self::new(q, b, mu, findex)
    }

    pub fn len(&self) -> usize {
        self.b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }

    /// PGS followed by standardization.
    pub fn solve(&self, settings: &PgsSettings, warm_start: Option<&DVec>) -> LcpSolution {
        let (pgs, iterations) = self.solve_pgs(settings, warm_start);
        let classes = self.classify(&pgs);
        match self.standardize(&classes) {
            Some(impulses) => LcpSolution {
                impulses,
                classes,
                standardized: true,
                iterations,
            },
            None => {
                warn!(rows = self.len(), "LCP standardization failed, keeping PGS impulses");
                LcpSolution {
                    impulses: pgs,
                    classes,
                    standardized: false,
                    iterations,
                }
            }
        }
    }

    /// Projected Gauss-Seidel. Returns the impulses and the sweeps used.
    pub fn solve_pgs(&self, settings: &PgsSettings, warm_start: Option<&DVec>) -> (DVec, usize) {
        let n = self.len();
        let mut f = match warm_start {
            Some(w) if w.len() == n => w.clone(),
            _ => DVec::zeros(n),
        };
        let mut sweeps = 0;
        while sweeps < settings.iterations {
            sweeps += 1;
            let mut max_delta = 0.0_f64;
            for i in 0..n {
                let diag = self.q[(i, i)] + settings.cfm;
                if diag <= 0.0 {
                    continue;
                }
                let residual = self.b[i] - self.q.row(i).dot(&f.transpose());
                let unclamped = f[i] + residual / diag;
                let (lo, hi) = self.bounds(i, &f);
                let next = unclamped.clamp(lo, hi);
                max_delta = max_delta.max((next - f[i]).abs());
                f[i] = next;
            }
            if max_delta <= settings.tolerance {
                break;
            }
        }
        debug!(rows = n, sweeps, "PGS finished");
        (f, sweeps)
    }

    fn bounds(&self, i: usize, f: &DVec) -> (f64, f64) {
        match self.findex[i] {
            None => (0.0, f64::INFINITY),
            Some(normal) => {
                let bound = self.mu[i] * f[normal].max(0.0);
                (-bound, bound)
            }
        }
    }

    /// Classify each row of a solution.
    pub fn classify(&self, f: &DVec) -> Vec<ConstraintClass> {
        (0..self.len())
            .map(|i| match self.findex[i] {
                None if f[i] > 0.0 => ConstraintClass::Clamping,
                None => ConstraintClass::Separating,
                Some(normal) if f[normal] <= 0.0 => ConstraintClass::Separating,
                Some(normal) => {
                    if f[i].abs() >= self.mu[i] * f[normal] {
                        ConstraintClass::UpperBound { sign: f[i].signum() }
                    } else {
                        ConstraintClass::Clamping
                    }
                }
            })
            .collect()
    }

    /// Map from clamping impulses to upper-bound impulses: row `u` has
    /// `sign · μ` in the column of its (clamping) normal.
    pub fn upper_bound_map(&self, classes: &[ConstraintClass]) -> DMat {
        let clamping: Vec<usize> = (0..self.len()).filter(|&i| classes[i] == ConstraintClass::Clamping).collect();
        let upper: Vec<(usize, f64)> = classes
            .iter()
            .enumerate()
            .filter_map(|(i, c)| match c {
                ConstraintClass::UpperBound { sign } => Some((i, *sign)),
                _ => None,
            })
            .collect();
        let mut e = DMat::zeros(upper.len(), clamping.len());
        for (row, &(i, sign)) in upper.iter().enumerate() {
            if let Some(normal) = self.findex[i] {
                if let Some(col) = clamping.iter().position(|&c| c == normal) {
                    e[(row, col)] = sign * self.mu[i];
                }
            }
        }
        e
    }

    /// Exact impulses on the active set of `classes`, or `None` if they
    /// violate the LCP conditions.
    pub fn standardize(&self, classes: &[ConstraintClass]) -> Option<DVec> {
        let n = self.len();
        let clamping: Vec<usize> = (0..n).filter(|&i| classes[i] == ConstraintClass::Clamping).collect();
        let upper: Vec<usize> = (0..n)
            .filter(|&i| matches!(classes[i], ConstraintClass::UpperBound { .. }))
            .collect();
        let e = self.upper_bound_map(classes);

        let q_cc = self.q.select_rows(&clamping).select_columns(&clamping);
        let q_cu = self.q.select_rows(&clamping).select_columns(&upper);
        let q_c = q_cc + q_cu * &e;
        let b_c = self.b.select_rows(&clamping);
        let f_c = pseudo_inverse(&q_c) * b_c;
        let f_u = &e * &f_c;

        let mut f = DVec::zeros(n);
        for (k, &i) in clamping.iter().enumerate() {
            f[i] = f_c[k];
        }
        for (k, &i) in upper.iter().enumerate() {
            f[i] = f_u[k];
        }

        self.satisfies(&f, classes).then_some(f)
    }

    fn satisfies(&self, f: &DVec, classes: &[ConstraintClass]) -> bool {
        let tol = STANDARDIZE_TOL * self.b.amax().max(1.0);
        let w = &self.q * f - &self.b;
        (0..self.len()).all(|i| match (classes[i], self.findex[i]) {
            (ConstraintClass::Clamping, None) => f[i] >= -tol && w[i].abs() <= tol,
            (ConstraintClass::Clamping, Some(normal)) => {
                f[i].abs() <= self.mu[i] * f[normal] + tol && w[i].abs() <= tol
            }
            (ConstraintClass::UpperBound { sign }, _) => sign * w[i] <= tol,
            (ConstraintClass::Separating, None) => w[i] >= -tol,
            (ConstraintClass::Separating, Some(_)) => true,
        })
    }
}
