//! Serializable trajectories.

use crate::Rollout;
use nimbus_diff::WorldSpaceMap;
use nimbus_math::DMat;
use nimbus_world::World;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Representation name of joint-space poses and velocities.
pub const JOINT_SPACE: &str = "joints";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Matrix `{name}` holds {len} values for a {rows}x{cols} shape")]
    Shape {
        name: String,
        rows: usize,
        cols: usize,
        len: usize,
    },

    #[error("Representation `{0}` has poses but no velocities, or the reverse")]
    Unpaired(String),
}

/// A dense matrix in column-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRecord {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl MatrixRecord {
    pub fn to_matrix(&self) -> DMat {
        DMat::from_column_slice(self.rows, self.cols, &self.data)
    }

    fn columns(&self, start: usize, len: usize) -> MatrixRecord {
        MatrixRecord::from(&self.to_matrix().columns(start, len).into_owned())
    }

    fn check(&self, name: &str) -> Result<(), RecordError> {
        if self.rows * self.cols == self.data.len() {
            return Ok(());
        }
        Err(RecordError::Shape {
            name: name.to_string(),
            rows: self.rows,
            cols: self.cols,
            len: self.data.len(),
        })
    }
}

impl From<&DMat> for MatrixRecord {
    fn from(m: &DMat) -> Self {
        Self {
            rows: m.nrows(),
            cols: m.ncols(),
            data: m.as_slice().to_vec(),
        }
    }
}

/// A trajectory as plain data: poses and velocities in joint space and in
/// any number of world-space representations, one column per state, plus
/// the applied forces (one column per step), the body masses and free-form
/// metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub poses: BTreeMap<String, MatrixRecord>,
    pub vels: BTreeMap<String, MatrixRecord>,
    pub forces: MatrixRecord,
    pub masses: Vec<f64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, MatrixRecord>,
}

impl TrajectoryRecord {
    pub(crate) fn from_rollout(rollout: &Rollout, world: &World, maps: &[(&str, &WorldSpaceMap)]) -> Self {
        let poses = rollout.poses();
        let vels = rollout.vels();
        let mut pose_map = BTreeMap::from([(JOINT_SPACE.to_string(), MatrixRecord::from(&poses))]);
        let mut vel_map = BTreeMap::from([(JOINT_SPACE.to_string(), MatrixRecord::from(&vels))]);
        for (name, map) in maps {
            pose_map.insert(name.to_string(), MatrixRecord::from(&map.convert_positions(world, &poses)));
            vel_map.insert(name.to_string(), MatrixRecord::from(&map.convert_velocities(world, &poses, &vels)));
        }
        Self {
            poses: pose_map,
            vels: vel_map,
            forces: MatrixRecord::from(&rollout.forces()),
            masses: rollout
                .initial_state()
                .map(|s| s.masses.iter().copied().collect())
                .unwrap_or_default(),
            metadata: rollout
                .metadata_map()
                .iter()
                .map(|(k, v)| (k.clone(), MatrixRecord::from(v)))
                .collect(),
        }
    }

    pub fn num_steps(&self) -> usize {
        self.forces.cols
    }

    pub fn poses(&self, representation: &str) -> Option<DMat> {
        self.poses.get(representation).map(MatrixRecord::to_matrix)
    }

    pub fn vels(&self, representation: &str) -> Option<DMat> {
        self.vels.get(representation).map(MatrixRecord::to_matrix)
    }

    pub fn forces(&self) -> DMat {
        self.forces.to_matrix()
    }

    pub fn metadata(&self, key: &str) -> Option<DMat> {
        self.metadata.get(key).map(MatrixRecord::to_matrix)
    }

    /// The `len` steps starting at step `start`: `len + 1` states and `len`
    /// forces. Metadata is kept whole.
    ///
    /// Panics if the range runs past the end of the record.
    pub fn slice(&self, start: usize, len: usize) -> TrajectoryRecord {
        assert!(
            start + len <= self.num_steps(),
            "slice {start}..{} of a {}-step record",
            start + len,
            self.num_steps()
        );
        let states = |m: &BTreeMap<String, MatrixRecord>| -> BTreeMap<String, MatrixRecord> {
            m.iter()
                .map(|(k, v)| (k.clone(), v.columns(start, len + 1)))
                .collect()
        };
        TrajectoryRecord {
            poses: states(&self.poses),
            vels: states(&self.vels),
            forces: self.forces.columns(start, len),
            masses: self.masses.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and check that every matrix holds as many values as its shape
    /// says and that poses and velocities name the same representations.
    pub fn from_json(json: &str) -> Result<Self, RecordError> {
        let record: TrajectoryRecord = serde_json::from_str(json)?;
        record.validate()?;
        Ok(record)
    }

    fn validate(&self) -> Result<(), RecordError> {
        for name in self.poses.keys().chain(self.vels.keys()) {
            if !(self.poses.contains_key(name) && self.vels.contains_key(name)) {
                return Err(RecordError::Unpaired(name.clone()));
            }
        }
        self.forces.check("forces")?;
        for (name, m) in self.poses.iter().chain(&self.vels).chain(&self.metadata) {
            m.check(name)?;
        }
        Ok(())
    }
}
