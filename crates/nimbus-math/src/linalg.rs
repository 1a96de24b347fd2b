//! Dense linear-algebra helpers shared by the LCP standardization and the
//! differentiation layer.

use crate::{DMat, DVec};

/// Moore-Penrose pseudo-inverse via SVD.
///
/// Singular values below `max(rows, cols) · σ_max · ε` are treated as zero,
/// which makes this a rank-revealing least-squares solve for the
/// rank-deficient constraint systems produced by redundant contacts.
/// Empty matrices map to an empty (transposed-shape) result.
pub fn pseudo_inverse(m: &DMat) -> DMat {
    let (rows, cols) = m.shape();
    if rows == 0 || cols == 0 {
        return DMat::zeros(cols, rows);
    }
    let svd = m.clone().svd(true, true);
    let sigma_max = svd.singular_values.max();
    let tol = rows.max(cols) as f64 * sigma_max * f64::EPSILON;
    svd.pseudo_inverse(tol)
        .unwrap_or_else(|_| DMat::zeros(cols, rows))
}

/// Default step for [`central_difference`].
pub const CENTRAL_STEP: f64 = 5e-7;

/// Central-difference Jacobian of `eval` at `x0`, one column per entry of
/// `x0`, with step `h`.
pub fn central_difference(x0: &DVec, h: f64, mut eval: impl FnMut(&DVec) -> DVec) -> DMat {
    if x0.is_empty() {
        return DMat::zeros(eval(x0).len(), 0);
    }
    let columns: Vec<DVec> = (0..x0.len())
        .map(|i| central_column(x0, i, h, &mut eval))
        .collect();
    DMat::from_columns(&columns)
}

/// One column of [`central_difference`]: `(f(x + h·e_i) − f(x − h·e_i)) / 2h`.
pub fn central_column(x0: &DVec, i: usize, h: f64, eval: &mut impl FnMut(&DVec) -> DVec) -> DVec {
    let mut plus = x0.clone();
    plus[i] += h;
    let mut minus = x0.clone();
    minus[i] -= h;
    (eval(&plus) - eval(&minus)) / (2.0 * h)
}

/// Squared Frobenius norm of `I − Q·Q⁺`.
///
/// `Q·Q⁺` is the orthogonal projector onto the range of `Q`, so this equals
/// the number of directions `Q` fails to span (up to roundoff), independent
/// of the scale of `Q`.
pub fn rank_deficiency(q: &DMat, q_pinv: &DMat) -> f64 {
    let n = q.nrows();
    let residual = DMat::identity(n, n) - q * q_pinv;
    residual.norm_squared()
}

/// Largest absolute entry, `0` for an empty matrix.
pub fn max_abs(m: &DMat) -> f64 {
    if m.is_empty() { 0.0 } else { m.amax() }
}

/// Rebuild an `n×n` matrix from its column-stacked vectorization.
pub fn unvec_columns(v: &DVec, n: usize) -> DMat {
    assert_eq!(v.len(), n * n, "vectorized matrix has wrong length");
    DMat::from_column_slice(n, n, v.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pinv_of_invertible_is_inverse() {
        let m = DMat::from_row_slice(2, 2, &[4.0, 1.0, 2.0, 3.0]);
        let inv = pseudo_inverse(&m);
        assert_relative_eq!(&m * &inv, DMat::identity(2, 2), epsilon = 1e-12);
        assert!(rank_deficiency(&m, &inv) < 1e-20);
    }

    #[test]
    fn rank_deficiency_counts_missing_directions() {
        // Two identical contact rows: rank 1 out of 2.
        let m = DMat::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let inv = pseudo_inverse(&m);
        assert_relative_eq!(rank_deficiency(&m, &inv), 1.0, epsilon = 1e-10);
        // Scaling does not change the measure.
        let big = &m * 1e6;
        assert_relative_eq!(rank_deficiency(&big, &pseudo_inverse(&big)), 1.0, epsilon = 1e-8);
    }

    #[test]
    fn central_difference_of_quadratic_is_exact() {
        // f(x) = (x0², x0·x1): central differences are exact for quadratics.
        let x0 = DVec::from_vec(vec![1.5, -2.0]);
        let jac = central_difference(&x0, 1e-3, |x| DVec::from_vec(vec![x[0] * x[0], x[0] * x[1]]));
        let expected = DMat::from_row_slice(2, 2, &[3.0, 0.0, -2.0, 1.5]);
        assert_relative_eq!(jac, expected, epsilon = 1e-9);
    }

    #[test]
    fn central_difference_of_empty_input_keeps_output_rows() {
        let jac = central_difference(&DVec::zeros(0), CENTRAL_STEP, |_| DVec::zeros(3));
        assert_eq!(jac.shape(), (3, 0));
    }

    #[test]
    fn unvec_is_column_major() {
        let v = DVec::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let m = unvec_columns(&v, 2);
        assert_eq!(m[(1, 0)], 2.0);
        assert_eq!(m[(0, 1)], 3.0);
    }
}
