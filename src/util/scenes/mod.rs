use std::{f32::consts::FRAC_PI_2, sync::Arc};

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::plugins::{
    physics::*,
    portal::{Portal, PortalConfig, PortalLinkRequest, PortalProxy, ProxyShape, Traveler},
    render::SliceMaterial,
};

/// Setup a test room in a square flat arena format of specified size.
/// A floor, a ceiling and 4 walls, with physics colliders. Returns the floor.
pub fn make_test_arena(
    commands: &mut Commands,
    meshes: &mut Assets<Mesh>,
    materials: &mut Assets<StandardMaterial>,
    length: f32,
    height: f32,
) -> Entity {
    const WALL_THICKNESS: f32 = 1.;

    let wall_colors = [Color::MAROON, Color::DARK_GREEN, Color::MIDNIGHT_BLUE, Color::ANTIQUE_WHITE];
    let half_len = length / 2.;
    let slab_half = half_len * 1.1;
    let wall_mesh = meshes.add(shape::Box::new(length, height, WALL_THICKNESS).into());
    let slab_mesh = meshes.add(shape::Box::new(slab_half * 2., WALL_THICKNESS, slab_half * 2.).into());
    let slab_material = materials.add(StandardMaterial::from(Color::DARK_GRAY));
    let slab_collider = Collider::cuboid(slab_half, WALL_THICKNESS / 2., slab_half);

    let mut ground = commands.spawn((
        PbrBundle {
            mesh: slab_mesh.clone(),
            material: slab_material.clone(),
            transform: Transform::from_xyz(0., -WALL_THICKNESS / 2., 0.),
            ..default()
        },
        Name::from("Ground"),
        RigidBody::Fixed,
        slab_collider.clone(),
        CollisionGroups::new(GROUND_GROUP, ALL_GROUPS),
    ));

    ground.with_children(|parent| {
        for (i, color) in wall_colors.into_iter().enumerate() {
            let mut transform = Transform::from_xyz(0., height / 2., -(half_len + WALL_THICKNESS / 2.));
            transform.rotate_around(
                Vec3::new(0., height / 2., 0.),
                Quat::from_axis_angle(Vec3::Y, i as f32 * FRAC_PI_2),
            );
            parent.spawn((
                PbrBundle {
                    mesh: wall_mesh.clone(),
                    material: materials.add(StandardMaterial::from(color)),
                    transform,
                    ..default()
                },
                Name::from(format!("Wall_{}", i)),
                RigidBody::Fixed,
                Collider::cuboid(half_len, height / 2., WALL_THICKNESS / 2.),
                CollisionGroups::new(WALLS_GROUP, ALL_GROUPS),
            ));
        }
        parent.spawn((
            PbrBundle {
                mesh: slab_mesh,
                material: slab_material,
                transform: Transform::from_translation(Vec3::Y * (height + WALL_THICKNESS)),
                ..default()
            },
            Name::from("Ceiling"),
            RigidBody::Fixed,
            slab_collider,
            CollisionGroups::new(GROUND_GROUP, ALL_GROUPS),
        ));
    });
    ground.id()
}

/// Spawn two portals sharing `config` and ask for them to be linked.
pub fn spawn_portal_pair(
    commands: &mut Commands,
    config: Arc<PortalConfig>,
    a: Transform,
    b: Transform,
) -> (Entity, Entity) {
    let mut spawn = |name: &str, transform: Transform| {
        commands
            .spawn((
                SpatialBundle::from_transform(transform),
                Portal::new(config.clone()),
                Name::from(name),
            ))
            .id()
    };
    let portal_a = spawn("Portal_A", a);
    let portal_b = spawn("Portal_B", b);
    commands.entity(portal_a).insert(PortalLinkRequest(Some(portal_b)));
    info!("Spawned portals {:?} and {:?}", portal_a, portal_b);
    (portal_a, portal_b)
}

/// Spawn a dynamic prop able to travel through portals, sliced by the portal plane it straddles.
pub fn spawn_prop(
    commands: &mut Commands,
    meshes: &mut Assets<Mesh>,
    materials: &mut Assets<SliceMaterial>,
    shape: ProxyShape,
    color: Color,
    transform: Transform,
    linvel: Vec3,
) -> Entity {
    let mesh = match shape {
        ProxyShape::Ball { radius } => shape::Icosphere {
            radius,
            subdivisions: 3,
        }
        .into(),
        ProxyShape::Cuboid { half_extents } => shape::Box::new(half_extents.x * 2., half_extents.y * 2., half_extents.z * 2.).into(),
        ProxyShape::Capsule { half_height, radius } => shape::Capsule {
            radius,
            depth: half_height * 2.,
            ..default()
        }
        .into(),
    };
    let prop = commands
        .spawn((
            MaterialMeshBundle {
                mesh: meshes.add(mesh),
                // One material per prop, slicing is per renderer.
                material: materials.add(SliceMaterial::new(color)),
                transform,
                ..default()
            },
            RigidBody::Dynamic,
            PortalProxy::real(shape),
            CollisionGroups::new(PROPS_GROUP, ALL_GROUPS),
            Velocity::linear(linvel),
            ReadMassProperties::default(),
            Ccd::enabled(),
            Name::from("Prop"),
        ))
        .id();
    commands.entity(prop).insert(Traveler {
        renderers: vec![prop],
        ..default()
    });
    prop
}
