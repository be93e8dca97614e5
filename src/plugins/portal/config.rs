//! Shared portal geometry and engine-wide settings.

use std::{fmt, path::Path};

use bevy::prelude::*;
use serde::Deserialize;

use super::proxy::ProxyShape;

/// Maximum nested portal-through-portal view depth accepted by the render planner.
pub const MAX_RECURSION_LIMIT: u8 = 7;

/// The flat opening of a portal, in portal local space. The plane is `z = 0`, `+Z` is the front.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneGeometry {
    pub half_extents: Vec2,
}

impl PlaneGeometry {
    pub fn is_valid(&self) -> bool {
        self.half_extents.is_finite() && self.half_extents.x > 0. && self.half_extents.y > 0.
    }
}

/// One piece of the solid frame around the opening, expressed in portal local space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePiece {
    pub shape: ProxyShape,
    pub local: Transform,
}

/// Box volume centered on the portal plane, inside which bodies are tracked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionZone {
    pub half_extents: Vec3,
}

/// Appearance of a portal surface when no view is rendered through it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndCapAppearance {
    pub color: Color,
}

impl Default for EndCapAppearance {
    fn default() -> Self {
        EndCapAppearance {
            color: Color::rgb(0.1, 0.1, 0.15),
        }
    }
}

/// Box drawn behind the portal plane when the viewer's near plane is already inside the portal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenetratingViewGeometry {
    pub half_extents: Vec3,
}

/// Immutable geometry bundle shared by any number of portal instances.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalConfig {
    pub plane: PlaneGeometry,
    pub frame: Vec<FramePiece>,
    pub detection_zone: DetectionZone,
    pub end_cap: EndCapAppearance,
    pub penetrating_view: Option<PenetratingViewGeometry>,
}

impl PortalConfig {
    /// A rectangular opening with a thin box frame, a detection zone reaching one unit on each
    /// side of the plane and an inside-view box as deep as the detection zone.
    pub fn rectangular(half_width: f32, half_height: f32) -> PortalConfig {
        const FRAME_THICKNESS: f32 = 0.1;
        const FRAME_DEPTH: f32 = 0.2;
        const ZONE_MARGIN: f32 = 0.5;
        const ZONE_DEPTH: f32 = 1.0;

        let side = ProxyShape::Cuboid {
            half_extents: Vec3::new(FRAME_THICKNESS, half_height + 2. * FRAME_THICKNESS, FRAME_DEPTH),
        };
        let cap = ProxyShape::Cuboid {
            half_extents: Vec3::new(half_width, FRAME_THICKNESS, FRAME_DEPTH),
        };
        let frame = vec![
            FramePiece {
                shape: side,
                local: Transform::from_xyz(-(half_width + FRAME_THICKNESS), 0., 0.),
            },
            FramePiece {
                shape: side,
                local: Transform::from_xyz(half_width + FRAME_THICKNESS, 0., 0.),
            },
            FramePiece {
                shape: cap,
                local: Transform::from_xyz(0., half_height + FRAME_THICKNESS, 0.),
            },
            FramePiece {
                shape: cap,
                local: Transform::from_xyz(0., -(half_height + FRAME_THICKNESS), 0.),
            },
        ];

        PortalConfig {
            plane: PlaneGeometry {
                half_extents: Vec2::new(half_width, half_height),
            },
            frame,
            detection_zone: DetectionZone {
                half_extents: Vec3::new(half_width + ZONE_MARGIN, half_height + ZONE_MARGIN, ZONE_DEPTH),
            },
            end_cap: EndCapAppearance::default(),
            penetrating_view: Some(PenetratingViewGeometry {
                half_extents: Vec3::new(half_width, half_height, ZONE_DEPTH),
            }),
        }
    }
}

#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(err) => write!(f, "could not read portal settings: {}", err),
            SettingsError::Parse(err) => write!(f, "malformed portal settings: {}", err),
        }
    }
}

impl std::error::Error for SettingsError {}

/// Engine-wide tuning, read from `assets/portal_settings.json` when present.
#[derive(Debug, Clone, PartialEq, Deserialize, Resource)]
#[serde(default)]
pub struct PortalSettings {
    pub recursion_limit: u8,
    pub ghost_expiration_secs: f32,
    pub max_overlaps_per_portal: usize,
    pub max_ghosts: usize,
    pub physics_dt: f32,
    pub physics_substeps: usize,
    pub clip_plane_offset: f32,
    pub min_near: f32,
    pub render_target_size: [u32; 2],
    pub clone_render_layer: u8,
}

impl Default for PortalSettings {
    fn default() -> Self {
        PortalSettings {
            recursion_limit: 2,
            ghost_expiration_secs: 10.,
            max_overlaps_per_portal: 32,
            max_ghosts: 256,
            physics_dt: 1. / 60.,
            physics_substeps: 4,
            clip_plane_offset: 0.01,
            min_near: 0.05,
            render_target_size: [1280, 720],
            clone_render_layer: 2,
        }
    }
}

impl PortalSettings {
    pub fn from_json_str(json: &str) -> Result<PortalSettings, SettingsError> {
        let mut settings: PortalSettings = serde_json::from_str(json).map_err(SettingsError::Parse)?;
        settings.recursion_limit = settings.recursion_limit.min(MAX_RECURSION_LIMIT);
        Ok(settings)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<PortalSettings, SettingsError> {
        let json = std::fs::read_to_string(path).map_err(SettingsError::Io)?;
        PortalSettings::from_json_str(&json)
    }

    /// Load the settings file, falling back to the defaults when it is missing or malformed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> PortalSettings {
        match PortalSettings::load(path.as_ref()) {
            Ok(settings) => settings,
            Err(err) => {
                warn!("{}, using default portal settings", err);
                PortalSettings::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_keep_defaults() {
        let settings =
            PortalSettings::from_json_str(r#"{ "recursion_limit": 4, "ghost_expiration_secs": 2.5 }"#)
                .unwrap();
        assert_eq!(settings.recursion_limit, 4);
        assert_eq!(settings.ghost_expiration_secs, 2.5);
        assert_eq!(settings.max_overlaps_per_portal, 32);
    }

    #[test]
    fn recursion_limit_is_capped() {
        let settings = PortalSettings::from_json_str(r#"{ "recursion_limit": 42 }"#).unwrap();
        assert_eq!(settings.recursion_limit, MAX_RECURSION_LIMIT);
    }

    #[test]
    fn malformed_settings_are_an_error() {
        assert!(matches!(
            PortalSettings::from_json_str("{ recursion_limit: }"),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn rectangular_config_is_valid() {
        let config = PortalConfig::rectangular(1., 1.5);
        assert!(config.plane.is_valid());
        assert_eq!(config.frame.len(), 4);
        assert!(config.detection_zone.half_extents.z > 0.);
    }
}
