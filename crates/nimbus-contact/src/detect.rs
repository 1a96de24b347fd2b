//! Contact detection between body-fixed points and level platforms.

use crate::{Anchor, ContactMaterial};
use nimbus_math::Vec3;
use nimbus_model::Model;
use nimbus_rigid::Kinematics;
use serde::{Deserialize, Serialize};

/// Points further than this below a body platform pass under it instead of
/// touching it.
const PLATFORM_THICKNESS: f64 = 0.1;

/// The static ground: an infinite level platform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ground {
    pub height: f64,
    pub material: ContactMaterial,
}

impl Default for Ground {
    fn default() -> Self {
        Self {
            height: 0.0,
            material: ContactMaterial::default(),
        }
    }
}

/// Geometry of one skeleton at the configuration being tested.
#[derive(Debug, Clone, Copy)]
pub struct SkeletonGeometry<'a> {
    /// World index of the skeleton.
    pub index: usize,
    pub model: &'a Model,
    pub kin: &'a Kinematics,
    pub material: ContactMaterial,
}

/// A detected contact.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    /// The body-fixed contact point.
    pub point: Anchor,
    /// Platform anchor the point rests on; `None` for the ground.
    pub surface: Option<Anchor>,
    pub world_point: Vec3,
    /// Signed height of the point above the surface (negative = penetrating).
    pub gap: f64,
    pub material: ContactMaterial,
}

impl Contact {
    pub fn depth(&self) -> f64 {
        (-self.gap).max(0.0)
    }

    /// Skeletons this contact couples (one for ground contacts).
    pub fn skeletons(&self) -> (usize, Option<usize>) {
        (self.point.skeleton, self.surface.map(|s| s.skeleton))
    }
}

/// Find all contacts whose gap is below `margin`.
///
/// Output order is deterministic: points in skeleton/body/point order, each
/// tested against the ground first and then against every platform in
/// skeleton/body order.
pub fn detect_contacts(skeletons: &[SkeletonGeometry], ground: Option<&Ground>, margin: f64) -> Vec<Contact> {
    let platforms: Vec<(Anchor, Vec3, [f64; 2], ContactMaterial)> = skeletons
        .iter()
        .flat_map(|sk| {
            sk.model.bodies.iter().enumerate().filter_map(move |(b, body)| {
                body.platform.map(|platform| {
                    let anchor = Anchor {
                        skeleton: sk.index,
                        body: b,
                        local: platform.anchor,
                    };
                    (anchor, sk.kin.point_world(b, &platform.anchor), platform.half_extents, sk.material)
                })
            })
        })
        .collect();

    let mut contacts = Vec::new();
    for sk in skeletons {
        for (b, body) in sk.model.bodies.iter().enumerate() {
            for local in &body.contact_points {
                let point = Anchor {
                    skeleton: sk.index,
                    body: b,
                    local: *local,
                };
                let p = sk.kin.point_world(b, local);

                if let Some(ground) = ground {
                    let gap = p.z - ground.height;
                    if gap < margin {
                        contacts.push(Contact {
                            point,
                            surface: None,
                            world_point: p,
                            gap,
                            material: sk.material.combine(&ground.material),
                        });
                    }
                }

                for (anchor, s, half, material) in &platforms {
                    if anchor.skeleton == sk.index && anchor.body == b {
                        continue;
                    }
                    let inside = (p.x - s.x).abs() <= half[0] && (p.y - s.y).abs() <= half[1];
                    let gap = p.z - s.z;
                    if inside && gap < margin && gap > -PLATFORM_THICKNESS {
                        contacts.push(Contact {
                            point,
                            surface: Some(*anchor),
                            world_point: p,
                            gap,
                            material: sk.material.combine(material),
                        });
                    }
                }
            }
        }
    }
    contacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_math::{DVec, SpatialInertia};
    use nimbus_model::ModelBuilder;
    use nimbus_rigid::forward_kinematics;

    fn ball(height: f64) -> (Model, Kinematics) {
        let model = ModelBuilder::new("ball")
            .add_translating_body("ball", -1, Vec3::zeros(), SpatialInertia::point_mass(1.0, Vec3::zeros()))
            .contact_points(&[Vec3::zeros()])
            .build()
            .unwrap();
        let kin = forward_kinematics(&model, &DVec::from_vec(vec![0.0, 0.0, height]));
        (model, kin)
    }

    #[test]
    fn ground_contact_within_margin() {
        let (model, kin) = ball(0.0005);
        let geo = [SkeletonGeometry {
            index: 0,
            model: &model,
            kin: &kin,
            material: ContactMaterial::default(),
        }];
        let contacts = detect_contacts(&geo, Some(&Ground::default()), 1e-3);
        assert_eq!(contacts.len(), 1);
        assert!(contacts[0].surface.is_none());
        assert!((contacts[0].gap - 0.0005).abs() < 1e-15);
    }

    #[test]
    fn no_contact_above_margin() {
        let (model, kin) = ball(0.5);
        let geo = [SkeletonGeometry {
            index: 0,
            model: &model,
            kin: &kin,
            material: ContactMaterial::default(),
        }];
        assert!(detect_contacts(&geo, Some(&Ground::default()), 1e-3).is_empty());
    }

    #[test]
    fn point_rests_on_platform_of_other_skeleton() {
        let (upper, upper_kin) = ball(1.0);
        let lower = ModelBuilder::new("table")
            .add_translating_body("table", -1, Vec3::zeros(), SpatialInertia::point_mass(2.0, Vec3::zeros()))
            .platform(Vec3::zeros(), [0.5, 0.5])
            .build()
            .unwrap();
        let lower_kin = forward_kinematics(&lower, &DVec::from_vec(vec![0.1, 0.0, 1.0]));
        let geo = [
            SkeletonGeometry { index: 0, model: &upper, kin: &upper_kin, material: ContactMaterial::default() },
            SkeletonGeometry { index: 1, model: &lower, kin: &lower_kin, material: ContactMaterial::default() },
        ];
        let contacts = detect_contacts(&geo, None, 1e-3);
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].skeletons(), (0, Some(1)));
    }
}
