use std::f32::consts::PI;

use bevy::prelude::*;

/// Affine map from one portal's side to its linked partner's side.
///
/// Built as `linked * flip * this⁻¹`, where `flip` is a half turn around the shared up axis: going
/// "through" a portal means leaving the linked portal by its front, which faces back toward the
/// traveler. Two composed transfers cancel out, so `b_to_a` is the inverse of `a_to_b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferTransform {
    matrix: Mat4,
    rotation: Quat,
    scale: f32,
}

impl Default for TransferTransform {
    fn default() -> Self {
        TransferTransform::IDENTITY
    }
}

impl TransferTransform {
    pub const IDENTITY: TransferTransform = TransferTransform {
        matrix: Mat4::IDENTITY,
        rotation: Quat::IDENTITY,
        scale: 1.,
    };

    /// Transfer from the portal at `from` to the portal at `to`. Both transforms are expected to
    /// carry a uniform scale.
    pub fn between(from: &Transform, to: &Transform) -> TransferTransform {
        let flip = Quat::from_rotation_y(PI);
        TransferTransform {
            matrix: to.compute_matrix()
                * Mat4::from_quat(flip)
                * from.compute_matrix().inverse(),
            rotation: (to.rotation * flip * from.rotation.inverse()).normalize(),
            scale: to.scale.x / from.scale.x,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    /// Linear size ratio between the destination and the source side.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Mass ratio for bodies of constant density.
    pub fn volume_scale(&self) -> f32 {
        self.scale * self.scale * self.scale
    }

    pub fn transfer_point(&self, point: Vec3) -> Vec3 {
        self.matrix.transform_point3(point)
    }

    /// Rotates and scales a vector, e.g. a linear velocity or an offset.
    pub fn transfer_vector(&self, vector: Vec3) -> Vec3 {
        self.matrix.transform_vector3(vector)
    }

    /// Rotates a direction, keeping its length.
    pub fn transfer_direction(&self, direction: Vec3) -> Vec3 {
        self.rotation * direction
    }

    pub fn transfer_rotation(&self, rotation: Quat) -> Quat {
        (self.rotation * rotation).normalize()
    }

    /// Re-express a full pose on the other side, scale included.
    pub fn transfer_transform(&self, transform: &Transform) -> Transform {
        Transform {
            translation: self.transfer_point(transform.translation),
            rotation: self.transfer_rotation(transform.rotation),
            scale: transform.scale * self.scale,
        }
    }

    pub fn inverse(&self) -> TransferTransform {
        TransferTransform {
            matrix: self.matrix.inverse(),
            rotation: self.rotation.inverse(),
            scale: 1. / self.scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use super::*;

    fn portal_a() -> Transform {
        Transform::from_xyz(0., 1., 0.)
    }

    fn portal_b() -> Transform {
        Transform::from_xyz(10., 1., 0.).with_rotation(Quat::from_rotation_y(FRAC_PI_2))
    }

    #[test]
    fn round_trip_is_identity() {
        let a = portal_a();
        let b = Transform::from_xyz(-3., 4., 7.)
            .with_rotation(Quat::from_euler(EulerRot::YXZ, 0.3, 1.1, -0.4))
            .with_scale(Vec3::splat(2.5));
        let a_to_b = TransferTransform::between(&a, &b);
        let b_to_a = TransferTransform::between(&b, &a);
        for point in [Vec3::ZERO, Vec3::new(1., -2., 3.), Vec3::new(-7.5, 0.25, 12.)] {
            let back = b_to_a.transfer_point(a_to_b.transfer_point(point));
            assert!(back.abs_diff_eq(point, 1e-3), "{} != {}", back, point);
        }
        assert!(b_to_a.matrix().abs_diff_eq(a_to_b.inverse().matrix(), 1e-4));
    }

    #[test]
    fn front_of_source_maps_behind_destination() {
        let a_to_b = TransferTransform::between(&portal_a(), &portal_b());
        // Just behind portal A, i.e. crossed.
        let crossed = a_to_b.transfer_point(Vec3::new(0., 1., -0.1));
        assert!(crossed.abs_diff_eq(Vec3::new(10.1, 1., 0.), 1e-4), "{}", crossed);
        // Walking into A (toward -Z) means walking out of B along its front (+X here).
        let dir = a_to_b.transfer_direction(Vec3::NEG_Z);
        assert!(dir.abs_diff_eq(Vec3::X, 1e-4), "{}", dir);
    }

    #[test]
    fn scale_is_carried_by_vectors_only() {
        let b = portal_b().with_scale(Vec3::splat(2.));
        let a_to_b = TransferTransform::between(&portal_a(), &b);
        assert_eq!(a_to_b.scale(), 2.);
        assert_eq!(a_to_b.volume_scale(), 8.);
        assert!((a_to_b.transfer_vector(Vec3::NEG_Z).length() - 2.).abs() < 1e-4);
        assert!((a_to_b.transfer_direction(Vec3::NEG_Z).length() - 1.).abs() < 1e-4);
    }
}
