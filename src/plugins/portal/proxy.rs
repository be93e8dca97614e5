//! Collision proxies as seen by the portal engine.

use bevy::prelude::*;
use bevy_rapier3d::prelude::Collider;

/// Convex shapes the engine knows how to test against portal planes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProxyShape {
    Ball { radius: f32 },
    Cuboid { half_extents: Vec3 },
    /// Capsule aligned with the local Y axis.
    Capsule { half_height: f32, radius: f32 },
}

/// Closed range of a shape's projection on an axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub min: f32,
    pub max: f32,
}

impl Interval {
    pub fn new(center: f32, half_width: f32) -> Interval {
        Interval {
            min: center - half_width,
            max: center + half_width,
        }
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.min <= other.max && other.min <= self.max
    }

    /// Whether the range strictly contains `value`.
    pub fn straddles(&self, value: f32) -> bool {
        self.min < value && value < self.max
    }
}

impl ProxyShape {
    pub fn collider(&self) -> Collider {
        match *self {
            ProxyShape::Ball { radius } => Collider::ball(radius),
            ProxyShape::Cuboid { half_extents } => {
                Collider::cuboid(half_extents.x, half_extents.y, half_extents.z)
            }
            ProxyShape::Capsule {
                half_height,
                radius,
            } => Collider::capsule_y(half_height, radius),
        }
    }

    /// Projection of the shape, posed at `transform`, on the unit world axis `axis`.
    ///
    /// Computed from the shape's support function, so the result is exact for every variant.
    pub fn interval(&self, transform: &Transform, axis: Vec3) -> Interval {
        let center = transform.translation.dot(axis);
        let scale = transform.scale.abs();
        let extent = match *self {
            ProxyShape::Ball { radius } => radius * scale.max_element(),
            ProxyShape::Cuboid { half_extents } => {
                let half = half_extents * scale;
                (transform.rotation * Vec3::X).dot(axis).abs() * half.x
                    + (transform.rotation * Vec3::Y).dot(axis).abs() * half.y
                    + (transform.rotation * Vec3::Z).dot(axis).abs() * half.z
            }
            ProxyShape::Capsule {
                half_height,
                radius,
            } => {
                (transform.rotation * Vec3::Y).dot(axis).abs() * half_height * scale.y
                    + radius * scale.x.max(scale.z)
            }
        };
        Interval::new(center, extent)
    }
}

/// What a collision proxy stands for under the portal topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    /// A genuine collider of the simulation.
    Real,
    /// Mirror of `source`, placed behind `attached_portal` while `source` crosses its partner.
    Ghost { source: Entity, attached_portal: Entity },
    /// Mirror of a collider merely near a portal, blocking passage through `plane`.
    Obstacle { source: Entity, plane: Entity },
    /// Solid frame geometry around the opening of `portal`.
    Frame { portal: Entity },
}

impl ProxyKind {
    pub fn is_real(&self) -> bool {
        matches!(self, ProxyKind::Real)
    }

    /// The real collider this proxy mirrors, if any.
    pub fn source(&self) -> Option<Entity> {
        match *self {
            ProxyKind::Ghost { source, .. } | ProxyKind::Obstacle { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Component)]
/// Marks a collider as known to the portal engine. Real proxies get their rapier collider
/// generated from `shape` when they don't have one yet.
pub struct PortalProxy {
    pub shape: ProxyShape,
    pub kind: ProxyKind,
}

impl PortalProxy {
    pub fn real(shape: ProxyShape) -> PortalProxy {
        PortalProxy {
            shape,
            kind: ProxyKind::Real,
        }
    }
}
