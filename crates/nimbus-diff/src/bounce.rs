//! Linear map of incoming velocity through elastic contacts.

use nimbus_math::{DMat, DVec, pseudo_inverse, unvec_columns};

/// The matrix `B` closest to the identity (Frobenius norm) with
/// `aᵢᵀ·B·aᵢ = −eᵢ·|aᵢ|²` for every bouncing column `aᵢ`.
///
/// With one bouncing constraint this is `I − (1 + e)·a·aᵀ/|a|²`: velocity
/// along `a` is reflected and scaled by `e`, orthogonal velocity passes
/// through. Without bouncing constraints it is the identity.
pub fn bounce_approximation(bouncing: &DMat, restitution: &DVec) -> DMat {
    let n = bouncing.nrows();
    let nb = bouncing.ncols();
    assert_eq!(restitution.len(), nb, "one restitution per bouncing column");
    let identity = DMat::identity(n, n);
    if nb == 0 {
        return identity;
    }

    // Column i of W is vec(aᵢ·aᵢᵀ), so Wᵀ·vec(X) = (aᵢᵀ·X·aᵢ)ᵢ.
    let mut w = DMat::zeros(n * n, nb);
    let mut target = DVec::zeros(nb);
    for i in 0..nb {
        let a = bouncing.column(i);
        let outer = a * a.transpose();
        w.set_column(i, &DVec::from_column_slice(outer.as_slice()));
        target[i] = restitution[i] * a.norm_squared();
    }
    let vec_identity = DVec::from_column_slice(identity.as_slice());
    let correction = pseudo_inverse(&w.transpose()) * (target + w.transpose() * &vec_identity);
    unvec_columns(&(vec_identity - correction), n)
}
