use bevy::prelude::*;
use bevy_rapier3d::prelude::{Group, RapierConfiguration, TimestepMode};

use super::portal::config::PortalSettings;

pub const WALLS_GROUP: Group = Group::GROUP_1;
pub const PROPS_GROUP: Group = Group::GROUP_2;
pub const PORTAL_GROUP: Group = Group::GROUP_3;
pub const GHOST_GROUP: Group = Group::GROUP_4;
pub const RAYCAST_GROUP: Group = Group::GROUP_5;
pub const GROUND_GROUP: Group = Group::GROUP_6;
pub const ALL_GROUPS: Group = Group::ALL;

pub struct PhysicsPlugin;

impl Plugin for PhysicsPlugin {
    fn build(&self, app: &mut App) {
        app.add_startup_system(configure_rapier)
            .add_system(reconfigure_rapier);
    }
}

fn timestep(settings: &PortalSettings) -> TimestepMode {
    // Extra CCD substeps because them portals can go fast
    TimestepMode::Fixed {
        dt: settings.physics_dt,
        substeps: settings.physics_substeps.max(1),
    }
}

fn configure_rapier(settings: Res<PortalSettings>, mut config: ResMut<RapierConfiguration>) {
    config.timestep_mode = timestep(&settings);
}

fn reconfigure_rapier(settings: Res<PortalSettings>, mut config: ResMut<RapierConfiguration>) {
    if settings.is_changed() && !settings.is_added() {
        info!("Physics timestep set to {}s", settings.physics_dt);
        config.timestep_mode = timestep(&settings);
    }
}
