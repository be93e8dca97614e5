use std::f32::consts::FRAC_PI_4;

use bevy::{prelude::*, render::camera::CameraProjection};

use super::render_plan::VirtualView;

/// Camera projection of a portal virtual camera. Carries the matrix planned for the view, oblique
/// near plane included.
#[derive(Debug, Component, Clone, Reflect)]
#[reflect(Component)]
pub struct PortalCameraProjection {
    pub projection: Mat4,
    pub far: f32,
}

impl Default for PortalCameraProjection {
    fn default() -> Self {
        PortalCameraProjection {
            projection: Mat4::perspective_infinite_reverse_rh(FRAC_PI_4, 16. / 9., 0.1),
            far: 1000.,
        }
    }
}

impl From<&VirtualView> for PortalCameraProjection {
    fn from(view: &VirtualView) -> Self {
        PortalCameraProjection {
            projection: view.projection,
            far: view.far,
        }
    }
}

impl CameraProjection for PortalCameraProjection {
    fn get_projection_matrix(&self) -> Mat4 {
        self.projection
    }

    // The planned matrix uses the primary viewpoint's aspect ratio, which the screen space
    // sampling of the portal surface expects.
    fn update(&mut self, _width: f32, _height: f32) {}

    fn far(&self) -> f32 {
        self.far
    }
}

#[cfg(test)]
mod tests {
    use std::{f32::consts::PI, sync::Arc};

    use super::*;
    use crate::plugins::portal::{
        config::{PortalConfig, PortalSettings},
        context::PortalContext,
        portal::Portal,
        render_plan::{RenderPlanner, Viewpoint},
    };

    #[test]
    fn cameras_use_the_planned_matrix() {
        let mut ctx = PortalContext::new(PortalSettings {
            recursion_limit: 1,
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
        let viewpoint = Viewpoint {
            transform: Transform::from_xyz(0.5, 0.2, 5.),
            fov: FRAC_PI_4,
            aspect_ratio: 16. / 9.,
            near: 0.1,
            far: 100.,
        };

        let view = RenderPlanner::new(&ctx, viewpoint, None).next().unwrap();
        assert!(view.oblique);
        let mut projection = PortalCameraProjection::from(&view);
        projection.update(512., 512.);
        assert_eq!(projection.get_projection_matrix(), view.projection);
        assert_eq!(projection.far(), view.far);
    }
}
