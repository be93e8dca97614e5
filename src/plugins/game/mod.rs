use std::{
    f32::consts::{FRAC_PI_2, FRAC_PI_4},
    sync::Arc,
};

use crate::{
    plugins::{
        physics::PhysicsPlugin,
        portal::{
            PortalConfig, PortalOrchestrator, PortalPlugin, PortalTransferEvent, PrimaryViewpoint, ProxyShape,
            traveler::TransferPhase,
        },
        render::{RenderPlugin, SliceMaterial},
    },
    util::scenes::{make_test_arena, spawn_portal_pair, spawn_prop},
};

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

const ARENA_SIZE: f32 = 20.;
const ARENA_HEIGHT: f32 = 5.;
const PORTAL_HEIGHT: f32 = 1.7;

#[derive(Debug)]
/// Demo plugin: an arena with two linked portals and props thrown through them.
pub struct GamePlugin;

impl Plugin for GamePlugin {
    fn build(&self, app: &mut App) {
        app.add_plugin(RapierPhysicsPlugin::<NoUserData>::default())
            .add_plugin(PhysicsPlugin)
            .add_plugin(RenderPlugin)
            .add_plugin(PortalPlugin);

        #[cfg(feature = "devel")]
        {
            app.add_plugin(super::debug::PortalDebugPlugin);
        }

        app.add_startup_system(setup)
            .add_system(throw_props)
            .add_system(log_transfers);
    }
}

/// Perform demo initialization
fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    make_test_arena(&mut commands, &mut meshes, &mut materials, ARENA_SIZE, ARENA_HEIGHT);

    // Light
    commands.spawn(DirectionalLightBundle {
        directional_light: DirectionalLight {
            color: Color::ANTIQUE_WHITE,
            illuminance: 20_000.,
            shadows_enabled: true,
            ..default()
        },
        transform: Transform {
            translation: Vec3::Y * 5.,
            rotation: Quat::from_euler(EulerRot::YXZ, FRAC_PI_4, -FRAC_PI_4, 0.),
            scale: Vec3::ONE,
        },
        ..default()
    });

    // Portals face each other across the arena
    let config = Arc::new(PortalConfig::rectangular(1., 1.5));
    spawn_portal_pair(
        &mut commands,
        config,
        Transform::from_xyz(-ARENA_SIZE / 4., PORTAL_HEIGHT, 0.).with_rotation(Quat::from_rotation_y(FRAC_PI_2)),
        Transform::from_xyz(ARENA_SIZE / 4., PORTAL_HEIGHT, 0.).with_rotation(Quat::from_rotation_y(-FRAC_PI_2)),
    );
    commands.spawn((PortalOrchestrator, Name::from("Portal orchestrator")));

    commands.spawn((
        Camera3dBundle {
            transform: Transform::from_xyz(0., 4., 9.).looking_at(Vec3::new(0., PORTAL_HEIGHT, 0.), Vec3::Y),
            ..default()
        },
        PrimaryViewpoint,
    ));
}

/// Space throws a prop at the left portal.
fn throw_props(
    mut commands: Commands,
    keys: Res<Input<KeyCode>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<SliceMaterial>>,
    mut thrown: Local<u32>,
) {
    if !keys.just_pressed(KeyCode::Space) {
        return;
    }
    let shape = match *thrown % 3 {
        0 => ProxyShape::Ball { radius: 0.3 },
        1 => ProxyShape::Cuboid {
            half_extents: Vec3::splat(0.25),
        },
        _ => ProxyShape::Capsule {
            half_height: 0.3,
            radius: 0.2,
        },
    };
    let color = Color::hsl((*thrown * 47 % 360) as f32, 0.8, 0.5);
    *thrown += 1;
    spawn_prop(
        &mut commands,
        &mut meshes,
        &mut materials,
        shape,
        color,
        Transform::from_xyz(0., PORTAL_HEIGHT + 0.5, 0.),
        Vec3::new(-6., 2., 0.),
    );
}

fn log_transfers(mut events: EventReader<PortalTransferEvent>) {
    for event in events.iter().filter(|event| event.phase == TransferPhase::Arrived) {
        info!("{:?} went through {:?} and came out of {:?}", event.traveler, event.from, event.to);
    }
}
