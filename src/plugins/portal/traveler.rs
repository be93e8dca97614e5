use bevy::{prelude::*, utils::HashMap};

use super::transfer::TransferTransform;

#[derive(Debug, Clone, Component)]
/// Makes a rigid body able to cross portals.
pub struct Traveler {
    /// Local point whose crossing of a portal plane decides the instant of the transfer.
    pub pivot_offset: Vec3,
    /// Render layer the far-side clones are drawn on.
    pub clone_layer: u8,
    /// Mesh entities sliced at the portal plane and cloned on the far side.
    pub renderers: Vec<Entity>,
    /// Re-level the body after each transfer.
    pub keep_upright: bool,
}

impl Default for Traveler {
    fn default() -> Self {
        Traveler {
            pivot_offset: Vec3::ZERO,
            clone_layer: 2,
            renderers: Vec::new(),
            keep_upright: false,
        }
    }
}

/// Physical state of a rigid body as the engine sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub transform: Transform,
    pub linvel: Vec3,
    pub angvel: Vec3,
    pub mass: f32,
    pub kinematic: bool,
}

impl BodyState {
    pub fn dynamic(transform: Transform, mass: f32) -> BodyState {
        BodyState {
            transform,
            linvel: Vec3::ZERO,
            angvel: Vec3::ZERO,
            mass,
            kinematic: false,
        }
    }

    /// This body as it appears on the other side of `transfer`.
    pub fn mirrored(&self, transfer: &TransferTransform) -> BodyState {
        let mut mirror = *self;
        mirror.transform = transfer.transfer_transform(&self.transform);
        mirror.mass *= transfer.volume_scale();
        if !self.kinematic {
            mirror.linvel = transfer.transfer_vector(self.linvel);
            mirror.angvel = transfer.transfer_direction(self.angvel);
        }
        mirror
    }
}

/// Re-express a body through `transfer`: pose, scale, mass and velocities.
///
/// Mass follows the volume ratio, linear velocity is rotated and scaled, angular velocity is
/// only rotated.
pub fn pass_through(body: &mut BodyState, transfer: &TransferTransform, keep_upright: bool) {
    body.transform = transfer.transfer_transform(&body.transform);
    body.mass *= transfer.volume_scale();
    body.linvel = transfer.transfer_vector(body.linvel);
    body.angvel = transfer.transfer_direction(body.angvel);
    if keep_upright {
        snap_upright(&mut body.transform);
    }
}

/// Bring the body's up axis back to world `Y`, keeping its heading.
pub fn snap_upright(transform: &mut Transform) {
    if transform.up().abs_diff_eq(Vec3::Y, 0.001) {
        return;
    }
    let forward = transform.forward();
    let heading = Vec3::new(forward.x, 0., forward.z);
    if heading.length() > 0.001 {
        transform.look_at(transform.translation + heading, Vec3::Y);
    } else {
        let up = transform.up();
        let heading = Vec3::new(up.x, 0., up.z) * -forward.y.signum();
        if heading.length() > 0.001 {
            transform.look_at(transform.translation + heading, Vec3::Y);
        } else {
            transform.rotation = Quat::IDENTITY;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Sent right before the body is moved.
    Leaving,
    /// Sent right after the body was moved.
    Arrived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Notification that a traveler crossed from one portal to its partner.
pub struct PortalTransferEvent {
    pub traveler: Entity,
    pub from: Entity,
    pub to: Entity,
    pub phase: TransferPhase,
}

/// A registered traveler and its detection state.
#[derive(Debug, Clone)]
pub struct TravelerState {
    pub pivot_offset: Vec3,
    pub clone_layer: u8,
    pub renderers: Vec<Entity>,
    pub keep_upright: bool,
    /// The one portal currently straddled, nearest first.
    pub penetrating_portal: Option<Entity>,
    /// Portals the traveler overlaps but hasn't crossed, with the distance of its closest proxy.
    pub candidate_portals: HashMap<Entity, f32>,
    pub(crate) last_pivot: Option<Vec3>,
}

impl TravelerState {
    pub fn new(traveler: &Traveler) -> TravelerState {
        TravelerState {
            pivot_offset: traveler.pivot_offset,
            clone_layer: traveler.clone_layer,
            renderers: traveler.renderers.clone(),
            keep_upright: traveler.keep_upright,
            penetrating_portal: None,
            candidate_portals: HashMap::default(),
            last_pivot: None,
        }
    }

    pub fn pivot(&self, body: &Transform) -> Vec3 {
        body.compute_matrix().transform_point3(self.pivot_offset)
    }
}

/// Slicing data for the renderers of a traveler straddling a portal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceContribution {
    pub portal: Entity,
    /// Clip plane for the original meshes, keeping the side in front of the portal.
    pub original_plane: Vec4,
    /// Clip plane for the clones, keeping the side in front of the linked portal.
    pub clone_plane: Vec4,
    pub transfer: TransferTransform,
    pub clone_layer: u8,
}

/// Plane value that clips nothing.
pub const NEUTRAL_SLICE_PLANE: Vec4 = Vec4::ZERO;
