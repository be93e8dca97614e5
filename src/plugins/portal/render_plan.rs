//! Enumerates the virtual viewpoints needed to draw nested portal views.

use bevy::{math::Vec4Swizzles, prelude::*, render::camera::PerspectiveProjection};

use super::{config::MAX_RECURSION_LIMIT, context::PortalContext, portal::PortalState};

/// The camera the portal views are composited for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewpoint {
    pub transform: Transform,
    pub fov: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
}

impl Viewpoint {
    pub fn from_perspective(transform: &GlobalTransform, projection: &PerspectiveProjection) -> Viewpoint {
        Viewpoint {
            transform: transform.compute_transform(),
            fov: projection.fov,
            aspect_ratio: projection.aspect_ratio,
            near: projection.near,
            far: projection.far,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.transform.translation
    }

    /// Finite perspective with `[0, 1]` depth, used for culling.
    pub fn culling_projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect_ratio, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.culling_projection() * self.transform.compute_matrix().inverse()
    }

    /// World space corners of the near plane.
    pub fn near_plane_corners(&self) -> [Vec3; 4] {
        let half_height = (self.fov * 0.5).tan() * self.near;
        let half_width = half_height * self.aspect_ratio;
        let matrix = self.transform.compute_matrix();
        [
            Vec3::new(-half_width, -half_height, -self.near),
            Vec3::new(half_width, -half_height, -self.near),
            Vec3::new(half_width, half_height, -self.near),
            Vec3::new(-half_width, half_height, -self.near),
        ]
        .map(|corner| matrix.transform_point3(corner))
    }
}

/// Oblique near plane projection, with Bevy's reversed infinite depth.
///
/// `clip_plane` is in camera space and must have the camera on its negative side.
pub fn oblique_projection(fov: f32, aspect_ratio: f32, near: f32, clip_plane: Vec4) -> Mat4 {
    // Math adapted from https://www.terathon.com/lengyel/Lengyel-Oblique.pdf
    let proj_mat = Mat4::perspective_infinite_reverse_rh(fov, aspect_ratio, near);
    let c = clip_plane;
    let m4 = proj_mat.row(3);
    let qp = Vec4::new(c.x.signum(), c.y.signum(), 0., 1.);
    let q = proj_mat.inverse() * qp;
    let c_dot_q = c.dot(q);
    if c.w >= 0. || c_dot_q <= f32::EPSILON {
        return proj_mat;
    }
    let a = m4.dot(q) / c_dot_q;
    let new_m3 = m4 - a * c;

    let mut oblique_proj_mat = proj_mat;
    oblique_proj_mat.x_axis.z = new_m3.x;
    oblique_proj_mat.y_axis.z = new_m3.y;
    oblique_proj_mat.z_axis.z = new_m3.z;
    oblique_proj_mat.w_axis.z = new_m3.w;
    oblique_proj_mat
}

/// World plane expressed in the space of a camera placed at `camera`, normalized.
pub fn plane_to_camera_space(camera: &Transform, plane: Vec4) -> Vec4 {
    // Inverse transpose of the view matrix is the transpose of the camera matrix.
    let local = camera.compute_matrix().transpose() * plane;
    let len = local.xyz().length();
    if len > f32::EPSILON {
        local / len
    } else {
        local
    }
}

fn plane_distance(plane: Vec4, point: Vec3) -> f32 {
    plane.xyz().dot(point) + plane.w
}

/// Whether any part of the quad can be inside the frustum of `view_projection`.
fn frustum_may_contain(view_projection: &Mat4, corners: &[Vec3; 4]) -> bool {
    let clip = corners.map(|corner| *view_projection * corner.extend(1.));
    let all_outside = |outside: fn(&Vec4) -> bool| clip.iter().all(outside);
    !(all_outside(|c| c.x < -c.w)
        || all_outside(|c| c.x > c.w)
        || all_outside(|c| c.y < -c.w)
        || all_outside(|c| c.y > c.w)
        || all_outside(|c| c.z < 0.)
        || all_outside(|c| c.z > c.w))
}

/// Upper bound on the views planned for one viewpoint.
pub const MAX_PLANNED_VIEWS: usize = 32;

const CHAIN_SEED: u64 = 0xcbf2_9ce4_8422_2325;
const CHAIN_PRIME: u64 = 0x0000_0100_0000_01b3;

/// The render target a view draws into: the surface of `portal` reached through one chain of
/// portals. A portal seen through two different portals gets two targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewTarget {
    pub portal: Entity,
    pub depth: u8,
    /// Hash of the portals between the primary viewpoint and `portal`, `portal` included.
    pub chain: u64,
}

impl ViewTarget {
    /// Target of `portal` seen from the view drawing into `parent`, or from the primary viewpoint.
    pub fn new(parent: Option<ViewTarget>, portal: Entity) -> ViewTarget {
        let (depth, chain) = parent.map_or((1, CHAIN_SEED), |parent| (parent.depth + 1, parent.chain));
        ViewTarget {
            portal,
            depth,
            chain: (chain ^ portal.to_bits()).wrapping_mul(CHAIN_PRIME),
        }
    }
}

/// One virtual camera of the plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualView {
    /// Portal whose surface shows this view.
    pub portal: Entity,
    /// Partner of `portal`, the virtual camera looks out of it.
    pub exit: Entity,
    /// 1 for portals seen by the primary viewpoint.
    pub depth: u8,
    /// View the surface of `portal` is visible in, `None` for the primary viewpoint.
    pub parent: Option<ViewTarget>,
    pub transform: Transform,
    pub fov: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
    /// World space plane of the exit, everything on its negative side is clipped.
    pub clip_plane: Vec4,
    /// Culling view-projection, without the oblique near plane.
    pub culling: Mat4,
    /// Projection the virtual camera renders with.
    pub projection: Mat4,
    pub oblique: bool,
    /// The primary viewpoint is inside the detection volume of `portal`.
    pub penetrating: bool,
    /// Portals visible in this view get the end cap instead of a nested view.
    pub end_cap: bool,
}

impl VirtualView {
    pub fn target(&self) -> ViewTarget {
        ViewTarget::new(self.parent, self.portal)
    }

    fn as_viewpoint(&self) -> Viewpoint {
        Viewpoint {
            transform: self.transform,
            fov: self.fov,
            aspect_ratio: self.aspect_ratio,
            near: self.near,
            far: self.far,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    target: ViewTarget,
    parent: Option<ViewTarget>,
    from: Viewpoint,
}

/// Depth-first, depth-bounded sequence of [`VirtualView`]s. Parents come before their children.
pub struct RenderPlanner<'a> {
    ctx: &'a PortalContext,
    limit: u8,
    penetrating: Option<Entity>,
    stack: Vec<Pending>,
    planned: usize,
}

impl<'a> RenderPlanner<'a> {
    pub fn new(ctx: &'a PortalContext, viewpoint: Viewpoint, penetrating: Option<Entity>) -> RenderPlanner<'a> {
        let limit = ctx.settings().recursion_limit.min(MAX_RECURSION_LIMIT);
        let mut planner = RenderPlanner {
            ctx,
            limit,
            penetrating,
            stack: Vec::new(),
            planned: 0,
        };
        if limit > 0 {
            planner.push_visible(&viewpoint, None, None, MAX_PLANNED_VIEWS);
        }
        planner
    }

    pub fn recursion_limit(&self) -> u8 {
        self.limit
    }

    /// Queue the `room` nearest portals visible from `from`, nearest popped first.
    fn push_visible(&mut self, from: &Viewpoint, clip_plane: Option<Vec4>, parent: Option<ViewTarget>, room: usize) {
        let depth = parent.map_or(1, |parent| parent.depth + 1);
        let view_projection = from.view_projection();
        let position = from.position();
        let mut visible: Vec<(f32, Entity)> = self
            .ctx
            .workable_portals()
            .into_iter()
            .filter(|portal| Some(*portal) != parent.and_then(|p| self.ctx.linked_portal(p.portal)))
            .filter_map(|portal| self.ctx.portal(portal).map(|state| (portal, state)))
            .filter(|(portal, state)| {
                let forced = depth == 1 && self.penetrating == Some(*portal);
                forced || is_visible(state, position, &view_projection, clip_plane)
            })
            .map(|(portal, state)| (state.transform.translation.distance(position), portal))
            .collect();
        visible.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
        if visible.len() > room {
            trace!("Skipping {} portal views past the view budget", visible.len() - room);
            visible.drain(..visible.len() - room);
        }
        self.stack.extend(visible.into_iter().map(|(_, portal)| Pending {
            target: ViewTarget::new(parent, portal),
            parent,
            from: *from,
        }));
    }

    fn plan(&self, pending: &Pending) -> Option<VirtualView> {
        let settings = self.ctx.settings();
        let portal = pending.target.portal;
        let depth = pending.target.depth;
        let transfer = self.ctx.transfer(portal)?;
        let exit = self.ctx.linked_portal(portal)?;
        let exit_state = self.ctx.portal(exit)?;
        let from = &pending.from;

        let transform = transfer.transfer_transform(&from.transform);
        // Pushed slightly in front of the exit so its own surface is clipped.
        let clip_plane = exit_state.get_plane(settings.clip_plane_offset);

        // Pull the near plane up to the closest corner of the opening.
        let view = transform.compute_matrix().inverse();
        let closest = exit_state
            .opening_corners()
            .iter()
            .map(|corner| -view.transform_point3(*corner).z)
            .fold(f32::INFINITY, f32::min);
        let near = if closest.is_finite() {
            closest.max(settings.min_near).min(from.far * 0.5)
        } else {
            settings.min_near
        };
        let far = from.far * transfer.scale();

        let camera_plane = plane_to_camera_space(&transform, clip_plane);
        let wants_oblique = exit_state.overrides.oblique_projection
            && self
                .ctx
                .portal(portal)
                .map_or(true, |state| state.overrides.oblique_projection);
        let oblique = wants_oblique && camera_plane.w < 0.;
        let projection = if oblique {
            oblique_projection(from.fov, from.aspect_ratio, settings.min_near, camera_plane)
        } else {
            Mat4::perspective_infinite_reverse_rh(from.fov, from.aspect_ratio, near)
        };
        let culling = Mat4::perspective_rh(from.fov, from.aspect_ratio, near, far) * view;

        Some(VirtualView {
            portal,
            exit,
            depth,
            parent: pending.parent,
            transform,
            fov: from.fov,
            aspect_ratio: from.aspect_ratio,
            near,
            far,
            clip_plane,
            culling,
            projection,
            oblique,
            penetrating: depth == 1 && self.penetrating == Some(portal),
            end_cap: depth >= self.limit,
        })
    }
}

fn is_visible(state: &PortalState, position: Vec3, view_projection: &Mat4, clip_plane: Option<Vec4>) -> bool {
    if state.signed_distance(position) <= 0. {
        return false;
    }
    let corners = state.opening_corners();
    let beyond_clip = clip_plane.map_or(true, |plane| {
        corners.iter().any(|corner| plane_distance(plane, *corner) > 0.)
    });
    beyond_clip && frustum_may_contain(view_projection, &corners)
}

impl<'a> Iterator for RenderPlanner<'a> {
    type Item = VirtualView;

    fn next(&mut self) -> Option<VirtualView> {
        while let Some(pending) = self.stack.pop() {
            let mut view = match self.plan(&pending) {
                Some(view) => view,
                None => continue,
            };
            self.planned += 1;
            let room = MAX_PLANNED_VIEWS.saturating_sub(self.planned + self.stack.len());
            if view.end_cap || room == 0 {
                view.end_cap = true;
            } else {
                self.push_visible(&view.as_viewpoint(), Some(view.clip_plane), Some(pending.target), room);
            }
            return Some(view);
        }
        None
    }
}

/// The portal whose opening the viewpoint's near plane is inside, if any.
pub fn find_penetrating_portal(ctx: &PortalContext, viewpoint: &Viewpoint) -> Option<Entity> {
    let position = viewpoint.position();
    let corners = viewpoint.near_plane_corners();
    let reach = corners
        .iter()
        .map(|corner| corner.distance(position))
        .fold(0., f32::max);
    ctx.workable_portals()
        .into_iter()
        .filter_map(|portal| ctx.portal(portal).map(|state| (portal, state)))
        .filter(|(_, state)| state.contains_point_in_detection_zone(position))
        .filter_map(|(portal, state)| {
            let distance = state.signed_distance(position);
            let offset = position - state.transform.translation;
            let half = state.opening_half_extents();
            let within = offset.dot(state.right()).abs() <= half.x + reach
                && offset.dot(state.up()).abs() <= half.y + reach;
            (distance >= 0. && distance <= reach && within).then_some((distance, portal))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, portal)| portal)
}

#[cfg(test)]
mod tests {
    use std::{
        f32::consts::{FRAC_PI_4, PI},
        sync::Arc,
    };

    use bevy::utils::HashSet;

    use super::*;
    use crate::plugins::portal::{
        config::{PortalConfig, PortalSettings},
        portal::Portal,
    };

    /// Portal A at the origin facing +Z and portal B at z = 10 facing back at it.
    fn facing_pair(recursion_limit: u8) -> (PortalContext, Entity, Entity) {
        let mut ctx = PortalContext::new(PortalSettings {
            recursion_limit,
            ..default()
        });
        let config = Arc::new(PortalConfig::rectangular(1., 1.5));
        let a = Entity::from_raw(1);
        let b = Entity::from_raw(2);
        ctx.register_portal(a, &Portal::new(config.clone()), Transform::IDENTITY);
        ctx.register_portal(
            b,
            &Portal::new(config),
            Transform::from_xyz(0., 0., 10.).with_rotation(Quat::from_rotation_y(PI)),
        );
        assert!(ctx.link_portal(a, Some(b)));
        (ctx, a, b)
    }

    fn viewpoint(transform: Transform) -> Viewpoint {
        Viewpoint {
            transform,
            fov: FRAC_PI_4,
            aspect_ratio: 16. / 9.,
            near: 0.1,
            far: 100.,
        }
    }

    #[test]
    fn zero_recursion_plans_nothing() {
        let (ctx, _, _) = facing_pair(0);
        let planner = RenderPlanner::new(&ctx, viewpoint(Transform::from_xyz(0., 0., 5.)), None);
        assert_eq!(planner.count(), 0);
    }

    #[test]
    fn single_level_view_sits_behind_the_partner() {
        let (ctx, a, b) = facing_pair(1);
        let views: Vec<VirtualView> =
            RenderPlanner::new(&ctx, viewpoint(Transform::from_xyz(0., 0., 5.)), None).collect();

        assert_eq!(views.len(), 1);
        let view = views[0];
        assert_eq!(view.portal, a);
        assert_eq!(view.exit, b);
        assert_eq!(view.depth, 1);
        assert_eq!(view.parent, None);
        assert!(view.end_cap);
        assert!(view.oblique);
        assert!(view.transform.translation.abs_diff_eq(Vec3::new(0., 0., 15.), 1e-4));
        assert!((view.transform.forward() - Vec3::NEG_Z).length() < 1e-4);
        assert!((view.near - 5.).abs() < 1e-3);
    }

    #[test]
    fn facing_portals_nest_down_to_the_limit() {
        let (ctx, a, _) = facing_pair(3);
        let views: Vec<VirtualView> =
            RenderPlanner::new(&ctx, viewpoint(Transform::from_xyz(0., 0., 5.)), None).collect();

        let depths: Vec<u8> = views.iter().map(|view| view.depth).collect();
        assert_eq!(depths, vec![1, 2, 3]);
        assert!(views.iter().all(|view| view.portal == a));
        assert_eq!(views[1].parent, Some(views[0].target()));
        assert_eq!(views[2].parent, Some(views[1].target()));
        assert_eq!(
            views.iter().map(|view| view.end_cap).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert!(views[1].transform.translation.abs_diff_eq(Vec3::new(0., 0., 25.), 1e-3));
    }

    #[test]
    fn a_portal_seen_through_two_portals_gets_two_views() {
        let mut ctx = PortalContext::new(PortalSettings {
            recursion_limit: 2,
            ..default()
        });
        let config = Arc::new(PortalConfig::rectangular(1., 1.5));
        let [a, b, c, d] = [1, 2, 3, 4].map(Entity::from_raw);
        ctx.register_portal(a, &Portal::new(config.clone()), Transform::from_xyz(-3., 0., 0.));
        ctx.register_portal(b, &Portal::new(config.clone()), Transform::from_xyz(3., 0., 0.));
        let facing_back = Quat::from_rotation_y(PI);
        ctx.register_portal(
            c,
            &Portal::new(config.clone()),
            Transform::from_xyz(0., 0., 6.).with_rotation(facing_back),
        );
        ctx.register_portal(
            d,
            &Portal::new(config),
            Transform::from_xyz(0., 0., -20.).with_rotation(facing_back),
        );
        assert!(ctx.link_portal(a, Some(b)));
        assert!(ctx.link_portal(c, Some(d)));

        // Both A and B lead to a virtual camera at (0, 0, -8) looking at C.
        let views: Vec<VirtualView> =
            RenderPlanner::new(&ctx, viewpoint(Transform::from_xyz(0., 0., 8.)), None).collect();
        assert_eq!(views.len(), 4);
        let targets: HashSet<ViewTarget> = views.iter().map(VirtualView::target).collect();
        assert_eq!(targets.len(), 4);

        let through_c: Vec<&VirtualView> = views.iter().filter(|view| view.portal == c).collect();
        assert_eq!(through_c.len(), 2);
        assert!(through_c.iter().all(|view| view.depth == 2 && view.exit == d));
        let parents: HashSet<Entity> = through_c
            .iter()
            .filter_map(|view| view.parent)
            .map(|parent| parent.portal)
            .collect();
        assert_eq!(parents, [a, b].into_iter().collect());
        assert_ne!(through_c[0].target(), through_c[1].target());
    }

    #[test]
    fn targets_identify_the_whole_chain() {
        let [a, b, c] = [1, 2, 3].map(Entity::from_raw);
        let via_a = ViewTarget::new(Some(ViewTarget::new(None, a)), c);
        let via_b = ViewTarget::new(Some(ViewTarget::new(None, b)), c);
        assert_eq!(via_a.depth, 2);
        assert_eq!(via_a.portal, via_b.portal);
        assert_ne!(via_a, via_b);
        assert_eq!(via_a, ViewTarget::new(Some(ViewTarget::new(None, a)), c));
    }

    #[test]
    fn only_portals_inside_the_frustum_are_planned() {
        let (ctx, _, b) = facing_pair(3);
        let towards_b = Transform::from_xyz(0., 0., 5.).looking_at(Vec3::new(0., 0., 10.), Vec3::Y);
        let views: Vec<VirtualView> = RenderPlanner::new(&ctx, viewpoint(towards_b), None).collect();
        assert_eq!(views.len(), 3);
        assert!(views.iter().all(|view| view.portal == b));

        let sideways = Transform::from_xyz(0., 0., 5.).looking_at(Vec3::new(10., 0., 5.), Vec3::Y);
        assert_eq!(RenderPlanner::new(&ctx, viewpoint(sideways), None).count(), 0);
    }

    #[test]
    fn unlinked_portals_are_never_planned() {
        let (mut ctx, a, _) = facing_pair(2);
        ctx.link_portal(a, None);
        let planner = RenderPlanner::new(&ctx, viewpoint(Transform::from_xyz(0., 0., 5.)), None);
        assert_eq!(planner.count(), 0);
    }

    #[test]
    fn fronto_parallel_oblique_plane_matches_the_regular_near_plane() {
        let plane = Vec4::new(0., 0., -1., -2.);
        let oblique = oblique_projection(FRAC_PI_4, 1.5, 0.05, plane);
        let regular = Mat4::perspective_infinite_reverse_rh(FRAC_PI_4, 1.5, 2.);
        assert!(oblique.abs_diff_eq(regular, 1e-5));
    }

    #[test]
    fn oblique_plane_maps_to_the_near_depth() {
        // Tilted plane through (0, 0, -3), facing away from the camera.
        let normal = Vec3::new(0.3, 0., -1.).normalize();
        let plane = normal.extend(-normal.dot(Vec3::new(0., 0., -3.)));
        let projection = oblique_projection(FRAC_PI_4, 1.5, 0.05, plane);

        let on_plane = projection * Vec4::new(0., 0., -3., 1.);
        assert!((on_plane.z / on_plane.w - 1.).abs() < 1e-4);
        let beyond = projection * Vec4::new(0., 0., -6., 1.);
        let depth = beyond.z / beyond.w;
        assert!(depth > 0. && depth < 1.);
    }

    #[test]
    fn viewpoint_grazing_a_portal_penetrates_it() {
        let (ctx, a, _) = facing_pair(2);
        let close = viewpoint(Transform::from_xyz(0.2, 0.5, 0.03));
        assert_eq!(find_penetrating_portal(&ctx, &close), Some(a));
        let far = viewpoint(Transform::from_xyz(0., 0., 3.));
        assert_eq!(find_penetrating_portal(&ctx, &far), None);
        let behind = viewpoint(Transform::from_xyz(0., 0., -0.03));
        assert_eq!(find_penetrating_portal(&ctx, &behind), None);
    }

    #[test]
    fn penetrated_portal_is_planned_even_out_of_view() {
        let (ctx, a, _) = facing_pair(1);
        let away = Transform::from_xyz(0., 0., 0.03).looking_at(Vec3::new(0., 0., 5.), Vec3::Y);
        let views: Vec<VirtualView> = RenderPlanner::new(&ctx, viewpoint(away), Some(a)).collect();
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|view| view.penetrating == (view.portal == a)));
        assert!(views.iter().any(|view| view.portal == a));
    }
}
