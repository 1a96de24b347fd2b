//! Box-constraint clipping of loss gradients.

use nimbus_math::DVec;
use nimbus_model::DofLimits;

/// Zero the gradient entries that would push a value sitting exactly on a
/// bound further past it under gradient descent.
pub fn clip_to_limits(gradient: &mut DVec, value: &DVec, limits: &DofLimits) {
    assert_eq!(gradient.len(), value.len(), "gradient and value have different lengths");
    assert_eq!(value.len(), limits.lower.len(), "limits have wrong length");
    for i in 0..gradient.len() {
        let at_lower = value[i] == limits.lower[i] && gradient[i] > 0.0;
        let at_upper = value[i] == limits.upper[i] && gradient[i] < 0.0;
        if at_lower || at_upper {
            gradient[i] = 0.0;
        }
    }
}
