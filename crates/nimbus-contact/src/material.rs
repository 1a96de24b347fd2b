//! Contact material properties.

use serde::{Deserialize, Serialize};

/// Material properties of a contact pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactMaterial {
    /// Coulomb friction coefficient (0 disables tangential constraints).
    pub friction: f64,
    /// Coefficient of restitution (0 = inelastic, 1 = elastic).
    pub restitution: f64,
}

impl Default for ContactMaterial {
    fn default() -> Self {
        Self {
            friction: 0.0,
            restitution: 0.0,
        }
    }
}

impl ContactMaterial {
    pub fn new(friction: f64, restitution: f64) -> Self {
        Self {
            friction,
            restitution,
        }
    }

    pub fn bouncy() -> Self {
        Self::new(0.0, 0.8)
    }

    pub fn sticky() -> Self {
        Self::new(1.0, 0.0)
    }

    /// Material of a contact between two surfaces: the larger friction and
    /// the smaller restitution win.
    pub fn combine(&self, other: &ContactMaterial) -> ContactMaterial {
        ContactMaterial {
            friction: self.friction.max(other.friction),
            restitution: self.restitution.min(other.restitution),
        }
    }
}
