//! 6D spatial algebra (Featherstone, "Rigid Body Dynamics Algorithms").
//!
//! Motion vectors are `[ω; v]`, force vectors are `[τ; f]`.

use crate::{Mat3, Mat6, Vec3, Vec6, axis_angle, skew};

/// A spatial motion or force vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialVec {
    /// `[angular; linear]`.
    pub data: Vec6,
}

impl SpatialVec {
    #[inline]
    pub fn new(angular: Vec3, linear: Vec3) -> Self {
        Self {
            data: Vec6::new(
                angular.x, angular.y, angular.z, linear.x, linear.y, linear.z,
            ),
        }
    }

    #[inline]
    pub fn zero() -> Self {
        Self {
            data: Vec6::zeros(),
        }
    }

    #[inline]
    pub fn angular(&self) -> Vec3 {
        self.data.fixed_rows::<3>(0).into_owned()
    }

    #[inline]
    pub fn linear(&self) -> Vec3 {
        self.data.fixed_rows::<3>(3).into_owned()
    }

    /// Motion cross product `self ×ₘ other`.
    pub fn cross_motion(&self, other: &SpatialVec) -> SpatialVec {
        let (w, v) = (self.angular(), self.linear());
        let (w2, v2) = (other.angular(), other.linear());
        SpatialVec::new(w.cross(&w2), w.cross(&v2) + v.cross(&w2))
    }

    /// Force cross product `self ×f other`.
    pub fn cross_force(&self, other: &SpatialVec) -> SpatialVec {
        let (w, v) = (self.angular(), self.linear());
        let (n, f) = (other.angular(), other.linear());
        SpatialVec::new(w.cross(&n) + v.cross(&f), w.cross(&f))
    }

    #[inline]
    pub fn dot(&self, other: &SpatialVec) -> f64 {
        self.data.dot(&other.data)
    }
}

impl std::ops::Add for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn add(self, rhs: SpatialVec) -> SpatialVec {
        SpatialVec {
            data: self.data + rhs.data,
        }
    }
}

impl std::ops::Sub for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn sub(self, rhs: SpatialVec) -> SpatialVec {
        SpatialVec {
            data: self.data - rhs.data,
        }
    }
}

impl std::ops::Mul<f64> for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn mul(self, rhs: f64) -> SpatialVec {
        SpatialVec {
            data: self.data * rhs,
        }
    }
}

/// 6x6 spatial matrix (inertias and composite inertias).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialMat {
    pub data: Mat6,
}

impl SpatialMat {
    #[inline]
    pub fn from_mat6(data: Mat6) -> Self {
        Self { data }
    }

    #[inline]
    pub fn mul_vec(&self, v: &SpatialVec) -> SpatialVec {
        SpatialVec {
            data: self.data * v.data,
        }
    }

    /// Congruence `Xᵀ · self · X` with a motion transform, used to move a
    /// composite inertia from a child frame into its parent frame.
    pub fn congruence(&self, xform: &SpatialTransform) -> SpatialMat {
        let x = xform.to_motion_matrix();
        SpatialMat {
            data: x.transpose() * self.data * x,
        }
    }
}

impl std::ops::Add for SpatialMat {
    type Output = SpatialMat;
    #[inline]
    fn add(self, rhs: SpatialMat) -> SpatialMat {
        SpatialMat {
            data: self.data + rhs.data,
        }
    }
}

/// Plücker transform from frame A to frame B.
///
/// `rot` maps A coordinates to B coordinates and `pos` is the origin of B
/// expressed in A. For a body's world transform this means the body origin
/// in world coordinates is `pos` and a body-fixed vector `r` has world
/// coordinates `rotᵀ r`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialTransform {
    pub rot: Mat3,
    pub pos: Vec3,
}

impl SpatialTransform {
    pub fn new(rot: Mat3, pos: Vec3) -> Self {
        Self { rot, pos }
    }

    pub fn identity() -> Self {
        Self::new(Mat3::identity(), Vec3::zeros())
    }

    pub fn translation(pos: Vec3) -> Self {
        Self::new(Mat3::identity(), pos)
    }

    /// Frame B rotated by `angle` (right-handed) about `axis` of frame A.
    pub fn rotation(axis: &Vec3, angle: f64) -> Self {
        Self::new(axis_angle(&axis.normalize(), angle).transpose(), Vec3::zeros())
    }

    /// 6x6 motion transform `[E 0; -E[p]× E]`.
    pub fn to_motion_matrix(&self) -> Mat6 {
        let e = self.rot;
        let mut m = Mat6::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&e);
        m.fixed_view_mut::<3, 3>(3, 0)
            .copy_from(&(-e * skew(&self.pos)));
        m.fixed_view_mut::<3, 3>(3, 3).copy_from(&e);
        m
    }

    /// Transform a motion vector from A into B.
    pub fn apply_motion(&self, v: &SpatialVec) -> SpatialVec {
        let w = v.angular();
        SpatialVec::new(self.rot * w, self.rot * (v.linear() - self.pos.cross(&w)))
    }

    /// Transform a force vector from B back into A.
    pub fn inv_apply_force(&self, f: &SpatialVec) -> SpatialVec {
        let rt = self.rot.transpose();
        let force = rt * f.linear();
        SpatialVec::new(rt * f.angular() + self.pos.cross(&force), force)
    }

    /// `self ∘ other`: first `other` (A→B), then `self` (B→C).
    pub fn compose(&self, other: &SpatialTransform) -> SpatialTransform {
        SpatialTransform {
            rot: self.rot * other.rot,
            pos: other.pos + other.rot.transpose() * self.pos,
        }
    }

    /// Coordinates in A of a point given in B coordinates.
    #[inline]
    pub fn point_to_parent(&self, p: &Vec3) -> Vec3 {
        self.pos + self.rot.transpose() * p
    }

    /// Coordinates in A of a free vector given in B coordinates.
    #[inline]
    pub fn vector_to_parent(&self, v: &Vec3) -> Vec3 {
        self.rot.transpose() * v
    }
}

/// Rigid-body inertia: mass, center of mass (body frame) and rotational
/// inertia about the center of mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialInertia {
    pub mass: f64,
    pub com: Vec3,
    pub inertia: Mat3,
}

impl SpatialInertia {
    pub fn new(mass: f64, com: Vec3, inertia: Mat3) -> Self {
        Self { mass, com, inertia }
    }

    pub fn point_mass(mass: f64, com: Vec3) -> Self {
        Self::new(mass, com, Mat3::zeros())
    }

    /// Solid box with full side lengths `size`, centered on the body origin.
    pub fn cuboid(mass: f64, size: Vec3) -> Self {
        let (x2, y2, z2) = (size.x * size.x, size.y * size.y, size.z * size.z);
        let k = mass / 12.0;
        Self::new(
            mass,
            Vec3::zeros(),
            Mat3::from_diagonal(&Vec3::new(k * (y2 + z2), k * (x2 + z2), k * (x2 + y2))),
        )
    }

    /// Same geometry with a different mass. The rotational inertia about the
    /// center of mass is kept as is.
    pub fn with_mass(&self, mass: f64) -> Self {
        Self { mass, ..*self }
    }

    /// 6x6 inertia about the body origin:
    ///
    /// ```text
    /// | I + m[c]×[c]×ᵀ   m[c]× |
    /// | m[c]×ᵀ           m·1   |
    /// ```
    pub fn to_matrix(&self) -> SpatialMat {
        let cx = skew(&self.com);
        let m = self.mass;
        let mut mat = Mat6::zeros();
        mat.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(self.inertia + cx * cx.transpose() * m));
        mat.fixed_view_mut::<3, 3>(0, 3).copy_from(&(cx * m));
        mat.fixed_view_mut::<3, 3>(3, 0)
            .copy_from(&(cx.transpose() * m));
        mat.fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&(Mat3::identity() * m));
        SpatialMat::from_mat6(mat)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_vec3() -> impl Strategy<Value = Vec3> {
        (-5.0..5.0_f64, -5.0..5.0_f64, -5.0..5.0_f64).prop_map(|(x, y, z)| Vec3::new(x, y, z))
    }

    fn arb_transform() -> impl Strategy<Value = SpatialTransform> {
        (arb_vec3(), -3.0..3.0_f64, arb_vec3()).prop_filter_map(
            "degenerate axis",
            |(axis, angle, pos)| {
                (axis.norm() > 0.1).then(|| SpatialTransform::new(
                    axis_angle(&axis.normalize(), angle),
                    pos,
                ))
            },
        )
    }

    proptest! {
        #[test]
        fn apply_motion_matches_matrix(xf in arb_transform(), w in arb_vec3(), v in arb_vec3()) {
            let sv = SpatialVec::new(w, v);
            let direct = xf.apply_motion(&sv);
            let via_matrix = xf.to_motion_matrix() * sv.data;
            prop_assert!((direct.data - via_matrix).amax() < 1e-9);
        }

        #[test]
        fn force_and_motion_are_dual(xf in arb_transform(), m in arb_vec3(), f in arb_vec3(), w in arb_vec3(), v in arb_vec3()) {
            // Power is frame independent: (X v)·f_B == v·(X⁻¹* f_B).
            let motion = SpatialVec::new(w, v);
            let force = SpatialVec::new(m, f);
            let lhs = xf.apply_motion(&motion).dot(&force);
            let rhs = motion.dot(&xf.inv_apply_force(&force));
            prop_assert!((lhs - rhs).abs() < 1e-8);
        }

        #[test]
        fn inertia_matrix_is_symmetric(mass in 0.1..10.0_f64, com in arb_vec3()) {
            let si = SpatialInertia::new(mass, com, Mat3::identity());
            let m = si.to_matrix().data;
            prop_assert!((m - m.transpose()).amax() < 1e-12);
        }
    }
}
