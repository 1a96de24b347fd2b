//! A skeleton: one kinematic tree with its state.

use nimbus_contact::ContactMaterial;
use nimbus_model::{Model, State};

#[derive(Debug, Clone)]
pub struct Skeleton {
    pub model: Model,
    pub state: State,
    /// Surface material of every body in the skeleton.
    pub material: ContactMaterial,
}

impl Skeleton {
    pub fn new(model: Model, material: ContactMaterial) -> Self {
        let state = model.default_state();
        Self {
            model,
            state,
            material,
        }
    }

    pub fn name(&self) -> &str {
        &self.model.name
    }

    pub fn ndofs(&self) -> usize {
        self.model.ndof
    }

    pub fn nbodies(&self) -> usize {
        self.model.nbodies()
    }
}
