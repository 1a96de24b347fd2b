//! Differentiation options.

use serde::{Deserialize, Serialize};

/// Numerical differencing scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Differencing {
    /// Central differences.
    #[default]
    Central,
    /// Ridders extrapolation over shrinking central differences.
    Ridders,
}

/// How a [`Snapshot`](crate::Snapshot) sources and checks its Jacobians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Take every Jacobian from finite differences of the full step instead
    /// of the analytic engine.
    pub use_fd_override: bool,
    /// Compare every analytic Jacobian against finite differences and stop
    /// the process on a mismatch.
    pub slow_debug_results_against_fd: bool,
    /// Largest absolute element difference accepted by the check.
    pub tolerance: f64,
    /// Scheme for full-step finite differences (override and check).
    pub oracle: Differencing,
    /// Scheme for the mass-matrix and bias-force derivatives used inside
    /// the analytic engine.
    pub tree: Differencing,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            use_fd_override: false,
            slow_debug_results_against_fd: false,
            tolerance: 1e-5,
            oracle: Differencing::Ridders,
            tree: Differencing::Central,
        }
    }
}

impl DiffConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Analytic Jacobians cross-checked against the oracle.
    pub fn validating() -> Self {
        Self {
            slow_debug_results_against_fd: true,
            ..Default::default()
        }
    }
}
