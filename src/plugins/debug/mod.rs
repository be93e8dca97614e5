pub mod draw;

use bevy::{prelude::*, render::camera::Projection};
use bevy_prototype_debug_lines::{DebugLines, DebugLinesPlugin};

use super::portal::{
    context::PortalContext,
    render_plan::{find_penetrating_portal, RenderPlanner, Viewpoint},
    PrimaryViewpoint,
};

#[derive(Debug)]
/// Development overlay drawing portal openings, detection zones and planned views.
pub struct PortalDebugPlugin;

/// F3 toggles the portal overlay, F4 the planned view frusta.
#[derive(Debug, Clone, Resource)]
pub struct PortalDebugSettings {
    pub draw_portals: bool,
    pub draw_views: bool,
}

impl Default for PortalDebugSettings {
    fn default() -> Self {
        PortalDebugSettings {
            draw_portals: true,
            draw_views: false,
        }
    }
}

impl Plugin for PortalDebugPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugin(DebugLinesPlugin::default())
            .init_resource::<PortalDebugSettings>()
            .add_system(toggle_overlay)
            .add_system(draw_portals.after(toggle_overlay))
            .add_system(draw_views.after(toggle_overlay));
    }
}

fn toggle_overlay(keys: Res<Input<KeyCode>>, mut settings: ResMut<PortalDebugSettings>) {
    if keys.just_pressed(KeyCode::F3) {
        settings.draw_portals = !settings.draw_portals;
    }
    if keys.just_pressed(KeyCode::F4) {
        settings.draw_views = !settings.draw_views;
    }
}

fn draw_portals(ctx: Res<PortalContext>, settings: Res<PortalDebugSettings>, mut lines: ResMut<DebugLines>) {
    if !settings.draw_portals {
        return;
    }
    for (entity, portal) in ctx.portals() {
        let color = if ctx.is_workable(entity) { Color::GREEN } else { Color::RED };
        draw::draw_loop(&portal.opening_corners(), color, &mut lines);
        let center = portal.transform.translation;
        lines.line_colored(center, center + portal.normal() * 0.5, 0., Color::CYAN);

        let zone = if portal.penetrating_colliders.is_empty() { Color::GRAY } else { Color::ORANGE };
        draw::draw_box(&portal.transform, portal.detection_half_extents(), zone, &mut lines);
    }
}

fn draw_views(
    ctx: Res<PortalContext>,
    settings: Res<PortalDebugSettings>,
    viewpoints: Query<(&GlobalTransform, &Projection), With<PrimaryViewpoint>>,
    mut lines: ResMut<DebugLines>,
) {
    if !settings.draw_views {
        return;
    }
    let viewpoint = match viewpoints.get_single() {
        Ok((transform, Projection::Perspective(perspective))) => Viewpoint::from_perspective(transform, perspective),
        _ => return,
    };
    let penetrating = find_penetrating_portal(&ctx, &viewpoint);
    for view in RenderPlanner::new(&ctx, viewpoint, penetrating) {
        draw::draw_frustum(view.culling, &mut lines);
    }
}
