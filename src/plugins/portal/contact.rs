//! Contact routing: which contacts between real bodies, ghosts and portal frames are meaningful.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bevy::{prelude::*, utils::HashMap};
use bevy_rapier3d::prelude::*;

use super::proxy::ProxyKind;

/// Per-tick routing tables, rebuilt from scratch after detection.
#[derive(Debug, Default, Clone)]
pub struct ContactRouting {
    planes: HashMap<Entity, Vec4>,
    linked: HashMap<Entity, Entity>,
    kinds: HashMap<Entity, ProxyKind>,
    owners: HashMap<Entity, Entity>,
    obstacle_of: HashMap<Entity, Entity>,
    penetrating_of: HashMap<Entity, Entity>,
}

fn signed_distance(plane: Vec4, point: Vec3) -> f32 {
    plane.truncate().dot(point) + plane.w
}

impl ContactRouting {
    pub fn add_plane(&mut self, portal: Entity, plane: Vec4, linked: Option<Entity>) {
        self.planes.insert(portal, plane);
        if let Some(linked) = linked {
            self.linked.insert(portal, linked);
        }
    }

    pub fn add_kind(&mut self, collider: Entity, kind: ProxyKind) {
        if !kind.is_real() {
            self.kinds.insert(collider, kind);
        }
    }

    /// Record the rigid body a real collider belongs to.
    pub fn set_owner(&mut self, collider: Entity, body: Entity) {
        self.owners.insert(collider, body);
    }

    pub fn route_obstacle(&mut self, collider: Entity, portal: Entity) {
        self.obstacle_of.insert(collider, portal);
    }

    pub fn route_penetrating(&mut self, collider: Entity, portal: Entity) {
        self.penetrating_of.insert(collider, portal);
    }

    pub fn obstacle_plane(&self, collider: Entity) -> Option<Entity> {
        self.obstacle_of.get(&collider).copied()
    }

    pub fn penetrating_plane(&self, collider: Entity) -> Option<Entity> {
        self.penetrating_of.get(&collider).copied()
    }

    pub fn kind(&self, collider: Entity) -> ProxyKind {
        self.kinds.get(&collider).copied().unwrap_or(ProxyKind::Real)
    }

    /// Whether any rule can apply to contacts involving `collider`.
    pub fn is_routed(&self, collider: Entity) -> bool {
        self.obstacle_of.contains_key(&collider)
            || self.penetrating_of.contains_key(&collider)
            || self.kinds.contains_key(&collider)
    }

    /// The real body behind a collider, following ghosts back to their source.
    fn owner(&self, collider: Entity) -> Entity {
        let real = self.kind(collider).source().unwrap_or(collider);
        self.owners.get(&real).copied().unwrap_or(real)
    }

    fn mirrors_each_other(&self, a: Entity, b: Entity) -> bool {
        let is_mirror = |collider: Entity| self.kind(collider).source().is_some();
        (is_mirror(a) || is_mirror(b)) && self.owner(a) == self.owner(b)
    }

    fn side(&self, portal: Entity, point: Vec3) -> f32 {
        self.planes
            .get(&portal)
            .map(|plane| signed_distance(*plane, point))
            .unwrap_or(0.)
    }

    fn obstacle_contact(&self, plane: Entity, other: Entity, point: Vec3) -> bool {
        let related = self.obstacle_plane(other) == Some(plane)
            || self.penetrating_plane(other) == Some(plane);
        related && self.side(plane, point) <= 0.
    }

    fn is_frame_of(&self, collider: Entity, portal: Entity) -> bool {
        match self.kind(collider) {
            ProxyKind::Frame { portal: frame_portal } => {
                frame_portal == portal || self.linked.get(&portal) == Some(&frame_portal)
            }
            _ => false,
        }
    }

    /// Whether a contact point between `a` and `b` should be kept by the solver.
    pub fn is_collision_valid(&self, a: Entity, b: Entity, point: Vec3) -> bool {
        if self.mirrors_each_other(a, b) {
            return false;
        }

        if let Some(plane) = self.obstacle_plane(a) {
            return self.obstacle_contact(plane, b, point);
        }
        if let Some(plane) = self.obstacle_plane(b) {
            return self.obstacle_contact(plane, a, point);
        }

        let planes = [self.penetrating_plane(a), self.penetrating_plane(b)];
        match planes {
            [None, None] => true,
            [Some(plane_a), Some(plane_b)] if plane_a == plane_b => true,
            _ => {
                let frame_hit = (planes[0].is_some_and(|plane| self.is_frame_of(b, plane)))
                    || (planes[1].is_some_and(|plane| self.is_frame_of(a, plane)));
                frame_hit
                    || planes
                        .iter()
                        .flatten()
                        .all(|plane| self.side(*plane, point) >= 0.)
            }
        }
    }

    /// Whether a ray hitting `collider` at `point` hit something real.
    pub fn is_raycast_hit_valid(&self, collider: Entity, point: Vec3) -> bool {
        if self.obstacle_plane(collider).is_some() {
            return false;
        }
        match self.penetrating_plane(collider) {
            Some(plane) => self.side(plane, point) >= 0.,
            None => true,
        }
    }
}

/// Routing tables shared between the engine and the physics hook.
#[derive(Debug, Clone, Default, Resource)]
pub struct SharedRouting(Arc<RwLock<ContactRouting>>);

impl SharedRouting {
    pub fn read(&self) -> RwLockReadGuard<'_, ContactRouting> {
        self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ContactRouting> {
        self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Rapier hook dropping contact points the routing tables reject.
pub struct PortalContactHook {
    pub routing: SharedRouting,
}

impl PhysicsHooksWithQuery<NoUserData> for PortalContactHook {
    fn modify_solver_contacts(
        &self,
        mut context: ContactModificationContextView,
        _user_data: &Query<NoUserData>,
    ) {
        let (a, b) = (context.collider1(), context.collider2());
        let routing = self.routing.read();
        if !routing.is_routed(a) && !routing.is_routed(b) {
            return;
        }
        context.raw.solver_contacts.retain(|contact| {
            let point = Vec3::new(contact.point.x, contact.point.y, contact.point.z);
            routing.is_collision_valid(a, b, point)
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalRayHit {
    pub entity: Entity,
    pub toi: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

/// Cast a ray and return the nearest hit that isn't a ghost artifact.
pub fn cast_portal_ray(
    rapier: &RapierContext,
    routing: &ContactRouting,
    origin: Vec3,
    direction: Vec3,
    max_toi: f32,
    filter: QueryFilter,
) -> Option<PortalRayHit> {
    let mut best: Option<PortalRayHit> = None;
    rapier.intersections_with_ray(origin, direction, max_toi, true, filter, |entity, hit| {
        let closer = best.map_or(true, |best| hit.toi < best.toi);
        if closer && routing.is_raycast_hit_valid(entity, hit.point) {
            best = Some(PortalRayHit {
                entity,
                toi: hit.toi,
                point: hit.point,
                normal: hit.normal,
            });
        }
        true
    });
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ids {
        portal_a: Entity,
        portal_b: Entity,
        body: Entity,
        body_collider: Entity,
        ghost: Entity,
        other: Entity,
        obstacle: Entity,
        frame_a: Entity,
        wall: Entity,
    }

    fn ids() -> Ids {
        Ids {
            portal_a: Entity::from_raw(1),
            portal_b: Entity::from_raw(2),
            body: Entity::from_raw(10),
            body_collider: Entity::from_raw(11),
            ghost: Entity::from_raw(12),
            other: Entity::from_raw(20),
            obstacle: Entity::from_raw(30),
            frame_a: Entity::from_raw(40),
            wall: Entity::from_raw(50),
        }
    }

    /// Portal A faces +Z at the origin, portal B faces +X at x = 10.
    fn routing() -> ContactRouting {
        let ids = ids();
        let mut routing = ContactRouting::default();
        routing.add_plane(ids.portal_a, Vec4::new(0., 0., 1., 0.), Some(ids.portal_b));
        routing.add_plane(ids.portal_b, Vec4::new(1., 0., 0., -10.), Some(ids.portal_a));
        routing.set_owner(ids.body_collider, ids.body);
        routing.route_penetrating(ids.body_collider, ids.portal_a);
        routing.add_kind(
            ids.ghost,
            ProxyKind::Ghost {
                source: ids.body_collider,
                attached_portal: ids.portal_b,
            },
        );
        routing.route_penetrating(ids.ghost, ids.portal_b);
        routing.add_kind(
            ids.obstacle,
            ProxyKind::Obstacle {
                source: ids.other,
                plane: ids.portal_b,
            },
        );
        routing.route_obstacle(ids.obstacle, ids.portal_b);
        routing.add_kind(ids.frame_a, ProxyKind::Frame { portal: ids.portal_a });
        routing
    }

    #[test]
    fn body_never_touches_its_own_ghost() {
        let routing = routing();
        let ids = ids();
        for point in [Vec3::ZERO, Vec3::new(10., 0., 0.), Vec3::new(11., 0., 5.)] {
            assert!(!routing.is_collision_valid(ids.body_collider, ids.ghost, point));
            assert!(!routing.is_collision_valid(ids.ghost, ids.body_collider, point));
            assert!(!routing.is_collision_valid(ids.ghost, ids.body, point));
        }
    }

    #[test]
    fn penetrating_body_ignores_what_lies_behind_the_plane() {
        let routing = routing();
        let ids = ids();
        assert!(!routing.is_collision_valid(ids.body_collider, ids.wall, Vec3::new(0., 0., -0.2)));
        assert!(routing.is_collision_valid(ids.body_collider, ids.wall, Vec3::new(0., 0., 0.2)));
        assert!(routing.is_collision_valid(ids.wall, ids.body_collider, Vec3::new(0., 0., 0.2)));
    }

    #[test]
    fn frames_always_block() {
        let routing = routing();
        let ids = ids();
        assert!(routing.is_collision_valid(ids.body_collider, ids.frame_a, Vec3::new(0., 0., -0.2)));
        // The ghost crosses B, whose partner owns the frame.
        assert!(routing.is_collision_valid(ids.frame_a, ids.ghost, Vec3::new(9.8, 0., 0.)));
    }

    #[test]
    fn obstacles_only_block_their_own_plane_behind_it() {
        let routing = routing();
        let ids = ids();
        // Behind B the obstacle blocks the ghost crossing B.
        assert!(routing.is_collision_valid(ids.obstacle, ids.ghost, Vec3::new(9.5, 0., 0.)));
        // In front of B the two stand-ins don't double-block.
        assert!(!routing.is_collision_valid(ids.ghost, ids.obstacle, Vec3::new(10.5, 0., 0.)));
        // Unrelated bodies never touch an obstacle.
        assert!(!routing.is_collision_valid(ids.obstacle, ids.wall, Vec3::new(9.5, 0., 0.)));
    }

    #[test]
    fn bodies_crossing_the_same_plane_collide_normally() {
        let mut routing = routing();
        let ids = ids();
        routing.route_penetrating(ids.other, ids.portal_a);
        assert!(routing.is_collision_valid(ids.body_collider, ids.other, Vec3::new(0., 0., -0.5)));
    }

    #[test]
    fn unrouted_pairs_are_kept() {
        let routing = routing();
        let ids = ids();
        assert!(routing.is_collision_valid(ids.wall, ids.other, Vec3::new(0., 0., -3.)));
    }

    #[test]
    fn raycast_validity() {
        let routing = routing();
        let ids = ids();
        assert!(!routing.is_raycast_hit_valid(ids.obstacle, Vec3::new(9., 0., 0.)));
        assert!(routing.is_raycast_hit_valid(ids.body_collider, Vec3::new(0., 0., 0.3)));
        assert!(!routing.is_raycast_hit_valid(ids.body_collider, Vec3::new(0., 0., -0.3)));
        assert!(routing.is_raycast_hit_valid(ids.wall, Vec3::new(0., 0., -0.3)));
    }
}
