//! World configuration, loadable from JSON.

use crate::{Result, WorldError};
use nimbus_contact::{Ground, PgsSettings};
use nimbus_math::{GRAVITY, Vec3};
use serde::{Deserialize, Serialize};

/// Simulation parameters of a [`World`](crate::World).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Time step (s).
    pub dt: f64,
    pub gravity: [f64; 3],
    /// Points closer than this to a surface generate contacts.
    pub contact_margin: f64,
    /// `None` disables the ground.
    pub ground: Option<Ground>,
    pub pgs: PgsSettings,
    /// Fraction of penetration removed per step when penetration
    /// correction is on.
    pub erp: f64,
    /// Penetration tolerated without correction.
    pub slop: f64,
    /// Diagonal regularization used when constraint force mixing is on.
    pub cfm: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            dt: 0.01,
            gravity: [0.0, 0.0, -GRAVITY],
            contact_margin: 1e-3,
            ground: Some(Ground::default()),
            pgs: PgsSettings::default(),
            erp: 0.2,
            slop: 1e-4,
            cfm: 1e-8,
        }
    }
}

impl WorldConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: WorldConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dt.is_nan() || self.dt <= 0.0 {
            return Err(WorldError::InvalidConfig(format!("dt must be positive, got {}", self.dt)));
        }
        if self.contact_margin < 0.0 {
            return Err(WorldError::InvalidConfig(format!(
                "contact_margin must be non-negative, got {}",
                self.contact_margin
            )));
        }
        if !(0.0..=1.0).contains(&self.erp) {
            return Err(WorldError::InvalidConfig(format!("erp must lie in [0, 1], got {}", self.erp)));
        }
        if self.cfm < 0.0 || self.slop < 0.0 {
            return Err(WorldError::InvalidConfig("cfm and slop must be non-negative".into()));
        }
        if self.pgs.iterations == 0 {
            return Err(WorldError::InvalidConfig("pgs.iterations must be at least 1".into()));
        }
        Ok(())
    }

    pub fn gravity_vector(&self) -> Vec3 {
        Vec3::from(self.gravity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config = WorldConfig::from_json(r#"{ "dt": 0.005, "ground": null }"#).unwrap();
        assert_eq!(config.dt, 0.005);
        assert!(config.ground.is_none());
        assert_eq!(config.contact_margin, WorldConfig::default().contact_margin);
    }

    #[test]
    fn json_round_trip() {
        let config = WorldConfig {
            erp: 0.5,
            ..Default::default()
        };
        let back = WorldConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            WorldConfig::from_json(r#"{ "dt": 0.0 }"#),
            Err(WorldError::InvalidConfig(_))
        ));
        assert!(matches!(WorldConfig::from_json("{ dt: 1 }"), Err(WorldError::Json(_))));
    }
}
