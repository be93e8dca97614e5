use std::{fmt, sync::Arc};

use bevy::prelude::*;

use super::{
    config::PortalConfig,
    material::{ClosedPortalMaterial, PortalMaterial},
    proxy::{Interval, ProxyShape},
};

const SCALE_EPSILON: f32 = 1e-4;

/// Per-instance tweaks layered over the shared [`PortalConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct PortalOverrides {
    /// Replaces the end cap built from the config's color.
    pub end_material: Option<Handle<ClosedPortalMaterial>>,
    /// Template of the material showing views through this portal. Its texture is replaced by the
    /// target of each view.
    pub view_material: Option<PortalMaterial>,
    /// Multiplier on the detection zone, at least 1 on each axis.
    pub detection_zone_scale: Vec3,
    pub oblique_projection: bool,
}

impl Default for PortalOverrides {
    fn default() -> Self {
        PortalOverrides {
            end_material: None,
            view_material: None,
            detection_zone_scale: Vec3::ONE,
            oblique_projection: true,
        }
    }
}

/// How the surface of a portal looks when nothing is rendered through it.
#[derive(Debug, Clone, PartialEq)]
pub enum EndCap {
    Material(Handle<ClosedPortalMaterial>),
    Color(Color),
}

impl PortalOverrides {
    pub fn end_cap(&self, config: Option<&PortalConfig>) -> Option<EndCap> {
        match &self.end_material {
            Some(material) => Some(EndCap::Material(material.clone())),
            None => config.map(|config| EndCap::Color(config.end_cap.color)),
        }
    }

    /// The material showing the view rendered into `target`.
    pub fn material_for_view(&self, target: Handle<Image>) -> PortalMaterial {
        PortalMaterial {
            texture: target,
            ..self.view_material.clone().unwrap_or_default()
        }
    }
}

#[derive(Debug, Clone, Component)]
/// A placed portal. Adding the component registers the portal with the [`PortalContext`],
/// removing it (or clearing `enabled`) deregisters it.
///
/// [`PortalContext`]: super::context::PortalContext
pub struct Portal {
    pub config: Option<Arc<PortalConfig>>,
    pub overrides: PortalOverrides,
    pub enabled: bool,
}

impl Portal {
    pub fn new(config: Arc<PortalConfig>) -> Portal {
        Portal {
            config: Some(config),
            overrides: PortalOverrides::default(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Component)]
/// One-shot request to link the portal on this entity, consumed once both portals are registered.
pub struct PortalLinkRequest(pub Option<Entity>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The other portal is not (or no longer) registered.
    UnknownPortal(Entity),
    SelfLink,
    MissingConfig(Entity),
    ConfigMismatch,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::UnknownPortal(entity) => write!(f, "portal {:?} does not exist", entity),
            LinkError::SelfLink => write!(f, "a portal cannot be linked to itself"),
            LinkError::MissingConfig(entity) => write!(f, "portal {:?} has no config", entity),
            LinkError::ConfigMismatch => write!(f, "portals reference different configs"),
        }
    }
}

impl std::error::Error for LinkError {}

/// Reason a portal is inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotWorkable {
    UnknownPortal,
    MissingConfig,
    InvalidPlane,
    Disabled,
    BadScale,
    Unlinked,
    SelfLinked,
    OneSidedLink,
    ConfigMismatch,
    Partner(PartnerFault),
}

/// Local fault found on the linked partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerFault {
    Missing,
    Disabled,
    BadScale,
}

impl fmt::Display for NotWorkable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotWorkable::UnknownPortal => write!(f, "portal is not registered"),
            NotWorkable::MissingConfig => write!(f, "portal has no config"),
            NotWorkable::InvalidPlane => write!(f, "portal config has an invalid plane"),
            NotWorkable::Disabled => write!(f, "portal is disabled"),
            NotWorkable::BadScale => write!(f, "portal scale is not strictly positive and uniform"),
            NotWorkable::Unlinked => write!(f, "portal is not linked"),
            NotWorkable::SelfLinked => write!(f, "portal is linked to itself"),
            NotWorkable::OneSidedLink => write!(f, "linked portal does not link back"),
            NotWorkable::ConfigMismatch => write!(f, "linked portal uses another config"),
            NotWorkable::Partner(PartnerFault::Missing) => write!(f, "linked portal is gone"),
            NotWorkable::Partner(PartnerFault::Disabled) => write!(f, "linked portal is disabled"),
            NotWorkable::Partner(PartnerFault::BadScale) => {
                write!(f, "linked portal scale is not strictly positive and uniform")
            }
        }
    }
}

impl std::error::Error for NotWorkable {}

/// A registered portal as tracked by the engine, with its per-tick detection state.
#[derive(Debug, Clone)]
pub struct PortalState {
    pub config: Option<Arc<PortalConfig>>,
    pub overrides: PortalOverrides,
    pub transform: Transform,
    pub enabled: bool,
    pub(crate) linked: Option<Entity>,
    /// Proxies overlapping the detection volume and not crossing the plane. Rebuilt every tick.
    pub detection_zone_colliders: Vec<Entity>,
    /// Proxies crossing the plane. Rebuilt every tick.
    pub penetrating_colliders: Vec<Entity>,
}

impl PortalState {
    pub fn new(portal: &Portal, transform: Transform) -> PortalState {
        PortalState {
            config: portal.config.clone(),
            overrides: portal.overrides.clone(),
            transform,
            enabled: portal.enabled,
            linked: None,
            detection_zone_colliders: Vec::new(),
            penetrating_colliders: Vec::new(),
        }
    }

    pub fn linked_portal(&self) -> Option<Entity> {
        self.linked
    }

    /// Faults that don't depend on the linked partner.
    pub fn local_fault(&self) -> Option<NotWorkable> {
        let config = match &self.config {
            Some(config) => config,
            None => return Some(NotWorkable::MissingConfig),
        };
        if !config.plane.is_valid() {
            return Some(NotWorkable::InvalidPlane);
        }
        if !self.enabled {
            return Some(NotWorkable::Disabled);
        }
        if !self.has_uniform_positive_scale() {
            return Some(NotWorkable::BadScale);
        }
        None
    }

    pub fn has_uniform_positive_scale(&self) -> bool {
        let scale = self.transform.scale;
        scale.is_finite()
            && scale.x > 0.
            && (scale - Vec3::splat(scale.x)).abs().max_element() <= SCALE_EPSILON * scale.x
    }

    pub fn shares_config(&self, other: &PortalState) -> bool {
        match (&self.config, &other.config) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn right(&self) -> Vec3 {
        self.transform.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.transform.rotation * Vec3::Y
    }

    /// Front-facing plane normal. Travelers approach from this side.
    pub fn normal(&self) -> Vec3 {
        self.transform.rotation * Vec3::Z
    }

    /// The portal plane as `(normal, d)`, pushed `z_offset` local units along the normal.
    pub fn get_plane(&self, z_offset: f32) -> Vec4 {
        let normal = self.normal();
        let origin = self.transform.translation + normal * z_offset * self.transform.scale.z;
        normal.extend(-normal.dot(origin))
    }

    /// Positive in front of the portal, negative once crossed.
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        (point - self.transform.translation).dot(self.normal())
    }

    pub fn opening_half_extents(&self) -> Vec2 {
        self.config
            .as_ref()
            .map(|config| config.plane.half_extents * self.transform.scale.truncate())
            .unwrap_or(Vec2::ZERO)
    }

    pub fn detection_half_extents(&self) -> Vec3 {
        let zone_scale = self.overrides.detection_zone_scale.max(Vec3::ONE);
        self.config
            .as_ref()
            .map(|config| config.detection_zone.half_extents * zone_scale * self.transform.scale)
            .unwrap_or(Vec3::ZERO)
    }

    /// World space corners of the opening, counter-clockwise seen from the front.
    pub fn opening_corners(&self) -> [Vec3; 4] {
        let half = self.opening_half_extents();
        let center = self.transform.translation;
        let right = self.right() * half.x;
        let up = self.up() * half.y;
        [
            center - right - up,
            center + right - up,
            center + right + up,
            center - right + up,
        ]
    }

    fn axis_intervals(&self, half_extents: Vec3) -> [(Vec3, Interval); 3] {
        let center = self.transform.translation;
        let (right, up, normal) = (self.right(), self.up(), self.normal());
        [
            (right, Interval::new(center.dot(right), half_extents.x)),
            (up, Interval::new(center.dot(up), half_extents.y)),
            (normal, Interval::new(center.dot(normal), half_extents.z)),
        ]
    }

    /// Whether the shape overlaps the detection box, tested on the portal's three axes.
    pub fn overlaps_detection_zone(&self, shape: &ProxyShape, transform: &Transform) -> bool {
        self.axis_intervals(self.detection_half_extents())
            .iter()
            .all(|(axis, zone)| shape.interval(transform, *axis).overlaps(zone))
    }

    /// Whether the shape straddles the plane within the bounds of the opening.
    pub fn is_penetrating(&self, shape: &ProxyShape, transform: &Transform) -> bool {
        let half = self.opening_half_extents();
        if half == Vec2::ZERO {
            return false;
        }
        let [(right, across), (up, along), (normal, _)] = self.axis_intervals(half.extend(0.));
        shape.interval(transform, right).overlaps(&across)
            && shape.interval(transform, up).overlaps(&along)
            && shape
                .interval(transform, normal)
                .straddles(self.transform.translation.dot(normal))
    }

    /// Where the segment `from -> to` enters the opening from the front, if it does.
    pub fn segment_hits_opening(&self, from: Vec3, to: Vec3) -> Option<Vec3> {
        let d_from = self.signed_distance(from);
        let d_to = self.signed_distance(to);
        if d_from < 0. || d_to >= 0. {
            return None;
        }
        let t = d_from / (d_from - d_to);
        let hit = from.lerp(to, t);
        let offset = hit - self.transform.translation;
        let half = self.opening_half_extents();
        (offset.dot(self.right()).abs() <= half.x && offset.dot(self.up()).abs() <= half.y)
            .then_some(hit)
    }

    pub fn contains_point_in_detection_zone(&self, point: Vec3) -> bool {
        let offset = point - self.transform.translation;
        let half = self.detection_half_extents();
        offset.dot(self.right()).abs() <= half.x
            && offset.dot(self.up()).abs() <= half.y
            && offset.dot(self.normal()).abs() <= half.z
    }

    pub(crate) fn clear_detection(&mut self) {
        self.detection_zone_colliders.clear();
        self.penetrating_colliders.clear();
    }
}

#[cfg(test)]
mod tests {
    use bevy::asset::HandleId;

    use super::*;

    fn state() -> PortalState {
        PortalState::new(
            &Portal::new(Arc::new(PortalConfig::rectangular(1., 1.))),
            Transform::from_xyz(0., 1., 0.),
        )
    }

    #[test]
    fn overrides_pick_the_surface_materials() {
        let config = PortalConfig::rectangular(1., 1.);
        let mut overrides = PortalOverrides::default();
        assert_eq!(
            overrides.end_cap(Some(&config)),
            Some(EndCap::Color(config.end_cap.color))
        );
        assert_eq!(overrides.end_cap(None), None);

        let target = Handle::<Image>::weak(HandleId::random::<Image>());
        let plain = overrides.material_for_view(target.clone());
        assert_eq!(plain.texture, target);
        assert_eq!(plain.tint, Color::WHITE);

        let end = Handle::<ClosedPortalMaterial>::weak(HandleId::random::<ClosedPortalMaterial>());
        overrides.end_material = Some(end.clone());
        overrides.view_material = Some(PortalMaterial {
            tint: Color::ORANGE,
            ..default()
        });
        assert_eq!(overrides.end_cap(Some(&config)), Some(EndCap::Material(end)));
        let tinted = overrides.material_for_view(target.clone());
        assert_eq!(tinted.texture, target);
        assert_eq!(tinted.tint, Color::ORANGE);
    }

    #[test]
    fn scale_must_be_uniform_and_positive() {
        let mut portal = state();
        assert_eq!(portal.local_fault(), None);
        portal.transform.scale = Vec3::new(1., 1., 2.);
        assert_eq!(portal.local_fault(), Some(NotWorkable::BadScale));
        portal.transform.scale = Vec3::splat(-1.);
        assert_eq!(portal.local_fault(), Some(NotWorkable::BadScale));
        portal.transform.scale = Vec3::ZERO;
        assert_eq!(portal.local_fault(), Some(NotWorkable::BadScale));
    }

    #[test]
    fn missing_config_is_reported_first() {
        let mut portal = state();
        portal.config = None;
        portal.enabled = false;
        assert_eq!(portal.local_fault(), Some(NotWorkable::MissingConfig));
    }

    #[test]
    fn plane_offset_moves_along_normal() {
        let portal = state();
        let plane = portal.get_plane(0.5);
        assert_eq!(plane, Vec4::new(0., 0., 1., -0.5));
        assert!(portal.signed_distance(Vec3::new(0., 1., 2.)) > 0.);
    }

    #[test]
    fn penetration_needs_straddling_inside_opening() {
        let portal = state();
        let ball = ProxyShape::Ball { radius: 0.3 };
        assert!(portal.is_penetrating(&ball, &Transform::from_xyz(0., 1., 0.1)));
        assert!(!portal.is_penetrating(&ball, &Transform::from_xyz(0., 1., 0.5)));
        // Straddles the infinite plane but outside the opening.
        assert!(!portal.is_penetrating(&ball, &Transform::from_xyz(3., 1., 0.)));
        assert!(portal.overlaps_detection_zone(&ball, &Transform::from_xyz(0., 1., 0.5)));
        assert!(!portal.overlaps_detection_zone(&ball, &Transform::from_xyz(0., 1., 3.)));
    }

    #[test]
    fn detection_zone_scale_override_is_at_least_one() {
        let mut portal = state();
        let base = portal.detection_half_extents();
        portal.overrides.detection_zone_scale = Vec3::new(0.5, 2., 1.);
        let scaled = portal.detection_half_extents();
        assert_eq!(scaled.x, base.x);
        assert_eq!(scaled.y, base.y * 2.);
    }

    #[test]
    fn segment_through_opening() {
        let portal = state();
        let hit = portal.segment_hits_opening(Vec3::new(0., 1., 1.), Vec3::new(0., 1., -1.));
        assert!(hit.unwrap().abs_diff_eq(Vec3::new(0., 1., 0.), 1e-5));
        assert!(portal
            .segment_hits_opening(Vec3::new(0., 1., -1.), Vec3::new(0., 1., 1.))
            .is_none());
        assert!(portal
            .segment_hits_opening(Vec3::new(5., 1., 1.), Vec3::new(5., 1., -1.))
            .is_none());
    }
}
