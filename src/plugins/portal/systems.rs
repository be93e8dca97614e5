//! Systems copying ECS state into the [`PortalContext`] and applying its results back.

use std::marker::PhantomData;

use bevy::{
    ecs::system::SystemParam,
    prelude::*,
    render::{camera::Projection, view::RenderLayers},
    utils::{HashMap, HashSet},
};
use bevy_rapier3d::prelude::*;

use crate::plugins::{physics::*, render::SliceMaterial};

use super::{
    backend::{render_tick, CameraRigBackend, PortalRig, PrimaryViewpoint, PRIMARY_SURFACE_LAYER},
    config::PortalSettings,
    contact::{cast_portal_ray, PortalRayHit},
    context::{PortalContext, ProxyState},
    ghost::{GhostData, GhostKey, GhostRole, GhostSlot},
    material::{ClosedPortalMaterial, PortalMaterial},
    portal::{Portal, PortalLinkRequest},
    proxy::{PortalProxy, ProxyKind},
    render_plan::Viewpoint,
    traveler::{BodyState, PortalTransferEvent, Traveler, NEUTRAL_SLICE_PLANE},
};

/// Claims the coordinator role of the portal engine. Only the first one drives the ticks.
#[derive(Debug, Default, Clone, Copy, Component)]
pub struct PortalOrchestrator;

/// Mirror proxy or body managed by the ghost pool.
#[derive(Debug, Clone, Copy, Component)]
pub struct PortalGhost {
    pub key: GhostKey,
    pub active: bool,
}

/// Far-side duplicate of a traveler's mesh.
#[derive(Debug, Clone, Copy, Component)]
pub struct TravelerClone {
    pub source: Entity,
}

#[derive(Debug, Default, Resource)]
pub struct TravelerClones {
    clones: HashMap<Entity, (Entity, Handle<SliceMaterial>)>,
}

pub fn claim_orchestrators(
    mut ctx: ResMut<PortalContext>,
    orchestrators: Query<Entity, With<PortalOrchestrator>>,
    added: Query<Entity, Added<PortalOrchestrator>>,
    removed: RemovedComponents<PortalOrchestrator>,
) {
    for entity in removed.iter() {
        ctx.release_coordinator(entity);
    }
    if ctx.coordinator().is_none() {
        if let Some(first) = orchestrators.iter().min() {
            ctx.claim_coordinator(first);
        }
    }
    for entity in &added {
        if ctx.coordinator() != Some(entity) {
            warn!(
                "Portal orchestrator {:?} stays inactive, {:?} already coordinates",
                entity,
                ctx.coordinator()
            );
        }
    }
}

pub fn sync_settings(settings: Res<PortalSettings>, mut ctx: ResMut<PortalContext>) {
    if settings.is_changed() {
        ctx.set_settings(settings.clone());
    }
}

/// Spawn the frame colliders of newly placed portals.
pub fn spawn_portal_frames(mut commands: Commands, portals: Query<(Entity, &Portal), Added<Portal>>) {
    for (entity, portal) in &portals {
        let config = match &portal.config {
            Some(config) => config,
            None => continue,
        };
        for piece in &config.frame {
            let frame = commands
                .spawn((
                    TransformBundle::from_transform(piece.local),
                    piece.shape.collider(),
                    PortalProxy {
                        shape: piece.shape,
                        kind: ProxyKind::Frame { portal: entity },
                    },
                    CollisionGroups::new(PORTAL_GROUP, ALL_GROUPS),
                ))
                .id();
            commands.entity(entity).add_child(frame);
        }
    }
}

pub fn sync_portals(
    mut commands: Commands,
    mut ctx: ResMut<PortalContext>,
    mut rig: ResMut<PortalRig>,
    portals: Query<(Entity, &Portal, &GlobalTransform), Or<(Changed<Portal>, Changed<GlobalTransform>)>>,
    requests: Query<(Entity, &PortalLinkRequest)>,
    removed: RemovedComponents<Portal>,
    mut workable: Local<HashMap<Entity, bool>>,
) {
    for entity in removed.iter() {
        ctx.remove_portal(entity);
        rig.forget_portal(&mut commands, entity);
        workable.remove(&entity);
    }
    for (entity, portal, transform) in &portals {
        ctx.register_portal(entity, portal, transform.compute_transform());
    }
    for (entity, request) in &requests {
        ctx.link_portal(entity, request.0);
        commands.entity(entity).remove::<PortalLinkRequest>();
    }

    let registered: Vec<Entity> = ctx.portals().map(|(entity, _)| entity).collect();
    for entity in registered {
        let result = ctx.validate(entity);
        let was_workable = workable.insert(entity, result.is_ok());
        match result {
            Err(reason) if was_workable != Some(false) => {
                warn!("Portal {:?} is not workable: {}", entity, reason)
            }
            Ok(linked) if was_workable != Some(true) => {
                info!("Portal {:?} is workable, linked to {:?}", entity, linked)
            }
            _ => {}
        }
    }
}

/// Give new proxies a collider and route their contacts through the portal hook.
pub fn prepare_proxies(
    mut commands: Commands,
    proxies: Query<(Entity, &PortalProxy, Option<&Collider>), Added<PortalProxy>>,
) {
    for (entity, proxy, collider) in &proxies {
        let mut entity_commands = commands.entity(entity);
        if collider.is_none() {
            entity_commands.insert(proxy.shape.collider());
        }
        entity_commands.insert(ActiveHooks::MODIFY_SOLVER_CONTACTS);
    }
}

pub fn sync_bodies(
    mut ctx: ResMut<PortalContext>,
    bodies: Query<
        (Entity, &RigidBody, &Transform, Option<&Velocity>, Option<&ReadMassProperties>),
        Without<PortalGhost>,
    >,
    travelers: Query<(Entity, &Traveler), Changed<Traveler>>,
    removed_bodies: RemovedComponents<RigidBody>,
    removed_travelers: RemovedComponents<Traveler>,
) {
    for entity in removed_travelers.iter() {
        ctx.remove_traveler(entity);
    }
    for entity in removed_bodies.iter() {
        ctx.remove_body(entity);
    }
    for (entity, traveler) in &travelers {
        ctx.register_traveler(entity, traveler);
    }
    for (entity, body, transform, velocity, mass) in &bodies {
        let kinematic = match body {
            RigidBody::Fixed => {
                ctx.remove_body(entity);
                continue;
            }
            RigidBody::Dynamic => false,
            _ => true,
        };
        let velocity = velocity.copied().unwrap_or_default();
        ctx.set_body(
            entity,
            BodyState {
                transform: *transform,
                linvel: velocity.linvel,
                angvel: velocity.angvel,
                mass: mass.map_or(1., |mass| mass.0.mass),
                kinematic,
            },
        );
    }
}

pub fn sync_proxies(
    mut ctx: ResMut<PortalContext>,
    proxies: Query<(Entity, &PortalProxy, &GlobalTransform, Option<&Parent>), Without<PortalGhost>>,
    bodies: Query<(&RigidBody, &GlobalTransform)>,
    removed: RemovedComponents<PortalProxy>,
) {
    for entity in removed.iter() {
        ctx.remove_proxy(entity);
    }
    let moving = |entity: Entity| {
        bodies
            .get(entity)
            .ok()
            .filter(|(body, _)| !matches!(body, RigidBody::Fixed))
            .map(|(_, global)| (entity, global))
    };
    for (entity, proxy, global, parent) in &proxies {
        let body = moving(entity).or_else(|| parent.and_then(|parent| moving(parent.get())));
        let state = match (proxy.kind, body) {
            (ProxyKind::Real, Some((body, body_global))) => {
                let local = Transform::from_matrix(
                    body_global.compute_matrix().inverse() * global.compute_matrix(),
                );
                let body_transform = ctx
                    .body(body)
                    .map(|state| state.transform)
                    .unwrap_or_else(|| body_global.compute_transform());
                ProxyState::attached(proxy.shape, body, local, &body_transform)
            }
            (kind, _) => ProxyState::fixed(proxy.shape, kind, global.compute_transform()),
        };
        ctx.set_proxy(entity, state);
    }
}

fn ghost_groups(active: bool) -> CollisionGroups {
    CollisionGroups::new(GHOST_GROUP, if active { ALL_GROUPS } else { Group::NONE })
}

fn spawn_ghost(commands: &mut Commands, slot: &GhostSlot) {
    let ghost = PortalGhost {
        key: slot.key,
        active: slot.active,
    };
    match slot.data {
        GhostData::Body(body) => {
            let rigid_body = if body.kinematic {
                RigidBody::KinematicPositionBased
            } else {
                RigidBody::Dynamic
            };
            commands.entity(slot.entity).insert((
                rigid_body,
                TransformBundle::from_transform(body.transform),
                Velocity {
                    linvel: body.linvel,
                    angvel: body.angvel,
                },
                // Gravity already acts on the source.
                GravityScale(0.),
                ghost,
            ));
        }
        GhostData::Collider {
            shape,
            transform,
            kind,
            body,
            local,
            mass,
        } => {
            let pose = if body.is_some() { local } else { transform };
            let mut entity = commands.entity(slot.entity);
            entity.insert((
                TransformBundle::from_transform(pose),
                shape.collider(),
                PortalProxy { shape, kind },
                ghost_groups(slot.active),
                ActiveHooks::MODIFY_SOLVER_CONTACTS,
                ghost,
            ));
            if let Some(mass) = mass {
                entity.insert(ColliderMassProperties::Mass(mass));
            }
            if let Some(body) = body {
                commands.entity(body).add_child(slot.entity);
            }
        }
    }
}

fn update_ghost(
    slot: &GhostSlot,
    transform: &mut Transform,
    velocity: Option<Mut<Velocity>>,
    ghost: &mut PortalGhost,
    groups: Option<Mut<CollisionGroups>>,
) {
    let pose = match slot.data {
        GhostData::Body(body) => {
            if let Some(mut velocity) = velocity {
                velocity.linvel = body.linvel;
                velocity.angvel = body.angvel;
            }
            body.transform
        }
        GhostData::Collider {
            transform, body, local, ..
        } => {
            if body.is_some() {
                local
            } else {
                transform
            }
        }
    };
    if *transform != pose {
        *transform = pose;
    }
    if ghost.active != slot.active {
        ghost.active = slot.active;
        if let Some(mut groups) = groups {
            *groups = ghost_groups(slot.active);
        }
    }
}

/// Run the portal physics tick and mirror the ghost pool into the world.
pub fn run_physics_tick(
    mut commands: Commands,
    mut ctx: ResMut<PortalContext>,
    mut events: EventWriter<PortalTransferEvent>,
    mut ghosts: Query<
        (
            Entity,
            &mut Transform,
            Option<&mut Velocity>,
            &mut PortalGhost,
            Option<&mut CollisionGroups>,
        ),
        Without<Traveler>,
    >,
) {
    if ctx.coordinator().is_none() {
        return;
    }
    // Whatever the solver did to a mirror body since its last reset was done to its source.
    for (entity, _, velocity, ghost, _) in &ghosts {
        if let (Some(velocity), GhostRole::Body) = (velocity, ghost.key.role) {
            if ctx.apply_ghost_response(entity, velocity.linvel, velocity.angvel) {
                trace!("Mirror body {:?} pushed {:?}", entity, ghost.key.source);
            }
        }
    }
    let dt = ctx.settings().physics_dt;
    let report = ctx.physics_tick(dt, &mut || commands.spawn_empty().id());
    trace!("Portal tick: {:?}", report);
    events.send_batch(ctx.drain_events());

    let created: HashSet<Entity> = ctx.ghosts_mut().drain_created().into_iter().collect();
    for slot in ctx.ghosts().iter() {
        if created.contains(&slot.entity) {
            spawn_ghost(&mut commands, slot);
        } else if let Ok((_, mut transform, velocity, mut ghost, groups)) = ghosts.get_mut(slot.entity) {
            update_ghost(slot, &mut transform, velocity, &mut ghost, groups);
        }
    }
    for entity in ctx.ghosts_mut().drain_released() {
        if let Some(entity) = commands.get_entity(entity) {
            entity.despawn_recursive();
        }
    }
}

fn rescale_mass_properties(properties: &mut MassProperties, scale: f32) {
    properties.mass *= scale.powi(3);
    properties.principal_inertia *= scale.powi(5);
    properties.local_center_of_mass *= scale;
}

/// Resize explicit extra mass for a body whose linear size changed by `scale`.
pub fn rescale_additional_mass(mass: &mut AdditionalMassProperties, scale: f32) {
    match mass {
        AdditionalMassProperties::Mass(mass) => *mass *= scale.powi(3),
        AdditionalMassProperties::MassProperties(properties) => {
            rescale_mass_properties(properties, scale)
        }
    }
}

/// Resize an explicit collider mass. Density based masses follow the collider scale on their own.
pub fn rescale_collider_mass(mass: &mut ColliderMassProperties, scale: f32) {
    match mass {
        ColliderMassProperties::Density(_) => {}
        ColliderMassProperties::Mass(mass) => *mass *= scale.powi(3),
        ColliderMassProperties::MassProperties(properties) => {
            rescale_mass_properties(properties, scale)
        }
    }
}

/// Apply the poses, velocities and masses decided by the tick to the simulated bodies.
#[allow(clippy::type_complexity)]
pub fn write_back_bodies(
    ctx: Res<PortalContext>,
    mut bodies: Query<
        (
            Entity,
            &mut Transform,
            Option<&mut Velocity>,
            Option<&ReadMassProperties>,
            Option<&mut AdditionalMassProperties>,
            Option<&mut ColliderMassProperties>,
        ),
        (With<RigidBody>, Without<PortalGhost>),
    >,
) {
    for (entity, mut transform, velocity, read_mass, additional_mass, collider_mass) in &mut bodies {
        let body = match ctx.body(entity) {
            Some(body) => body,
            None => continue,
        };
        if *transform != body.transform {
            *transform = body.transform;
        }
        if let Some(mut velocity) = velocity {
            if velocity.linvel != body.linvel || velocity.angvel != body.angvel {
                velocity.linvel = body.linvel;
                velocity.angvel = body.angvel;
            }
        }

        let simulated_mass = match read_mass {
            Some(read_mass) if read_mass.0.mass > 0. => read_mass.0.mass,
            _ => continue,
        };
        let ratio = body.mass / simulated_mass;
        if (ratio - 1.).abs() <= 1e-3 {
            continue;
        }
        let scale = ratio.cbrt();
        debug!("Rescaling the mass of {:?} by {}", entity, ratio);
        if let Some(mut mass) = additional_mass {
            rescale_additional_mass(&mut mass, scale);
        }
        if let Some(mut mass) = collider_mass {
            rescale_collider_mass(&mut mass, scale);
        }
    }
}

fn set_slice_plane(materials: &mut Assets<SliceMaterial>, handle: &Handle<SliceMaterial>, plane: Vec4) {
    let stale = materials
        .get(handle)
        .map_or(false, |material| material.slice_plane != plane);
    if let Some(material) = materials.get_mut(handle).filter(|_| stale) {
        material.slice_plane = plane;
    }
}

/// Slice the meshes of travelers straddling a portal and draw their far-side clones.
pub fn slice_travelers(
    mut commands: Commands,
    ctx: Res<PortalContext>,
    mut clones: ResMut<TravelerClones>,
    mut materials: ResMut<Assets<SliceMaterial>>,
    renderers: Query<
        (&Handle<SliceMaterial>, &Handle<Mesh>, &Transform, Option<&Parent>),
        Without<TravelerClone>,
    >,
    mut clone_poses: Query<(&mut Transform, &mut Visibility), With<TravelerClone>>,
) {
    clones.clones.retain(|renderer, (clone, _)| {
        let alive = renderers.get(*renderer).is_ok();
        if !alive {
            if let Some(clone) = commands.get_entity(*clone) {
                clone.despawn_recursive();
            }
        }
        alive
    });

    for (traveler, state) in ctx.travelers() {
        let slice = ctx.slice_contribution(traveler);
        for renderer in &state.renderers {
            let (material, mesh, local, parent) = match renderers.get(*renderer) {
                Ok(renderer) => renderer,
                Err(_) => continue,
            };
            let slice = match slice {
                Some(slice) => slice,
                None => {
                    set_slice_plane(&mut materials, material, NEUTRAL_SLICE_PLANE);
                    if let Some((clone, _)) = clones.clones.get(renderer) {
                        if let Ok((_, mut visibility)) = clone_poses.get_mut(*clone) {
                            if visibility.is_visible {
                                visibility.is_visible = false;
                            }
                        }
                    }
                    continue;
                }
            };

            set_slice_plane(&mut materials, material, slice.original_plane);
            let body = ctx.body(traveler).map_or(Transform::IDENTITY, |body| body.transform);
            let world = if *renderer == traveler {
                body
            } else if parent.map(Parent::get) == Some(traveler) {
                body.mul_transform(*local)
            } else {
                *local
            };
            let pose = slice.transfer.transfer_transform(&world);
            match clones.clones.get(renderer) {
                Some((clone, clone_material)) => {
                    set_slice_plane(&mut materials, clone_material, slice.clone_plane);
                    if let Ok((mut transform, mut visibility)) = clone_poses.get_mut(*clone) {
                        *transform = pose;
                        if !visibility.is_visible {
                            visibility.is_visible = true;
                        }
                    }
                }
                None => {
                    let base_color = materials
                        .get(material)
                        .map_or(Color::WHITE, |material| material.base_color);
                    let clone_material = materials.add(SliceMaterial {
                        base_color,
                        slice_plane: slice.clone_plane,
                    });
                    let clone = commands
                        .spawn((
                            MaterialMeshBundle {
                                mesh: mesh.clone(),
                                material: clone_material.clone(),
                                transform: pose,
                                ..default()
                            },
                            RenderLayers::layer(slice.clone_layer),
                            TravelerClone { source: *renderer },
                        ))
                        .id();
                    debug!("Spawned clone {:?} of {:?}", clone, renderer);
                    clones.clones.insert(*renderer, (clone, clone_material));
                }
            }
        }
    }
}

/// Let the primary viewpoint see the outermost portal surfaces and traveler clones.
pub fn prepare_primary_viewpoint(
    mut commands: Commands,
    settings: Res<PortalSettings>,
    viewpoints: Query<Entity, Added<PrimaryViewpoint>>,
) {
    for entity in &viewpoints {
        commands.entity(entity).insert(
            RenderLayers::layer(0)
                .with(PRIMARY_SURFACE_LAYER)
                .with(settings.clone_render_layer),
        );
    }
}

#[allow(clippy::too_many_arguments)]
pub fn render_portals(
    mut commands: Commands,
    ctx: Res<PortalContext>,
    mut rig: ResMut<PortalRig>,
    mut images: ResMut<Assets<Image>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<PortalMaterial>>,
    mut closed_materials: ResMut<Assets<ClosedPortalMaterial>>,
    viewpoints: Query<(&Transform, &Projection), With<PrimaryViewpoint>>,
) {
    if ctx.coordinator().is_none() {
        return;
    }
    // Transform propagation hasn't run yet this frame.
    let viewpoint = match viewpoints.get_single() {
        Ok((transform, Projection::Perspective(perspective))) => {
            Viewpoint::from_perspective(&GlobalTransform::from(*transform), perspective)
        }
        _ => return,
    };
    let mut backend = CameraRigBackend {
        commands: &mut commands,
        rig: &mut rig,
        images: &mut images,
        meshes: &mut meshes,
        materials: &mut materials,
        closed_materials: &mut closed_materials,
        clone_layer: ctx.settings().clone_render_layer,
    };
    render_tick(&ctx, &viewpoint, &mut backend);
}

/// Ray casts that ignore ghost proxies and hits behind a crossed portal plane.
#[derive(SystemParam)]
pub struct PortalRaycast<'w, 's> {
    rapier: Res<'w, RapierContext>,
    ctx: Res<'w, PortalContext>,
    #[system_param(ignore)]
    marker: PhantomData<&'s ()>,
}

impl<'w, 's> PortalRaycast<'w, 's> {
    pub fn cast(&self, origin: Vec3, direction: Vec3, max_toi: f32, filter: QueryFilter) -> Option<PortalRayHit> {
        let routing = self.ctx.routing().read();
        cast_portal_ray(&self.rapier, &routing, origin, direction, max_toi, filter)
    }
}

#[cfg(test)]
mod tests {
    use bevy::ecs::system::CommandQueue;

    use super::*;
    use crate::plugins::portal::proxy::ProxyShape;

    fn slot(entity: Entity, role: GhostRole, data: GhostData) -> GhostSlot {
        GhostSlot {
            key: GhostKey {
                source: Entity::from_raw(1),
                portal: Entity::from_raw(2),
                role,
            },
            entity,
            data,
            last_touched_tick: 1,
            last_touched_secs: 0.,
            active: true,
        }
    }

    fn spawn(world: &mut World, slot: &GhostSlot) {
        let mut queue = CommandQueue::default();
        let mut commands = Commands::new(&mut queue, world);
        spawn_ghost(&mut commands, slot);
        queue.apply(world);
    }

    fn mass_properties(mass: f32) -> MassProperties {
        MassProperties {
            local_center_of_mass: Vec3::new(0., 0.5, 0.),
            mass,
            principal_inertia_local_frame: Quat::IDENTITY,
            principal_inertia: Vec3::ONE,
        }
    }

    #[test]
    fn mirror_bodies_are_simulated_with_mirrored_motion() {
        let mut world = World::new();
        let entity = world.spawn_empty().id();
        let mut mirror = BodyState::dynamic(Transform::from_xyz(9.9, 0., 0.), 2.);
        mirror.linvel = Vec3::new(5., 0., 0.);
        mirror.angvel = Vec3::Z;
        spawn(&mut world, &slot(entity, GhostRole::Body, GhostData::Body(mirror)));

        let ghost = world.entity(entity);
        assert!(matches!(ghost.get::<RigidBody>(), Some(RigidBody::Dynamic)));
        assert_eq!(ghost.get::<GravityScale>().map(|scale| scale.0), Some(0.));
        let velocity = ghost.get::<Velocity>().unwrap();
        assert_eq!(velocity.linvel, Vec3::new(5., 0., 0.));
        assert_eq!(velocity.angvel, Vec3::Z);
        assert_eq!(ghost.get::<Transform>().unwrap().translation, Vec3::new(9.9, 0., 0.));
    }

    #[test]
    fn kinematic_sources_get_kinematic_mirrors() {
        let mut world = World::new();
        let entity = world.spawn_empty().id();
        let mut mirror = BodyState::dynamic(Transform::IDENTITY, 1.);
        mirror.kinematic = true;
        spawn(&mut world, &slot(entity, GhostRole::Body, GhostData::Body(mirror)));
        assert!(matches!(
            world.entity(entity).get::<RigidBody>(),
            Some(RigidBody::KinematicPositionBased)
        ));
    }

    #[test]
    fn mirror_colliders_carry_their_mass_share() {
        let mut world = World::new();
        let body = world.spawn_empty().id();
        let entity = world.spawn_empty().id();
        let data = GhostData::Collider {
            shape: ProxyShape::Ball { radius: 0.25 },
            transform: Transform::from_xyz(9.9, 0., 0.),
            kind: ProxyKind::Ghost {
                source: Entity::from_raw(1),
                attached_portal: Entity::from_raw(2),
            },
            body: Some(body),
            local: Transform::IDENTITY,
            mass: Some(0.5),
        };
        spawn(&mut world, &slot(entity, GhostRole::Collider, data));

        let ghost = world.entity(entity);
        assert!(matches!(
            ghost.get::<ColliderMassProperties>(),
            Some(ColliderMassProperties::Mass(mass)) if *mass == 0.5
        ));
        assert_eq!(ghost.get::<Parent>().map(Parent::get), Some(body));
        assert_eq!(ghost.get::<Transform>(), Some(&Transform::IDENTITY));
    }

    #[test]
    fn explicit_masses_follow_the_size_change() {
        let mut additional = AdditionalMassProperties::Mass(1.5);
        rescale_additional_mass(&mut additional, 2.);
        assert!(matches!(additional, AdditionalMassProperties::Mass(mass) if (mass - 12.).abs() < 1e-5));

        let mut collider = ColliderMassProperties::MassProperties(mass_properties(1.));
        rescale_collider_mass(&mut collider, 2.);
        match collider {
            ColliderMassProperties::MassProperties(properties) => {
                assert!((properties.mass - 8.).abs() < 1e-5);
                assert!(properties.principal_inertia.abs_diff_eq(Vec3::splat(32.), 1e-4));
                assert!(properties.local_center_of_mass.abs_diff_eq(Vec3::new(0., 1., 0.), 1e-5));
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut density = ColliderMassProperties::Density(3.);
        rescale_collider_mass(&mut density, 2.);
        assert!(matches!(density, ColliderMassProperties::Density(density) if density == 3.));
    }

    #[test]
    fn transferred_bodies_are_written_back_with_their_new_mass() {
        let mut world = World::new();
        let entity = world
            .spawn((
                RigidBody::Dynamic,
                Transform::IDENTITY,
                Velocity::default(),
                ReadMassProperties(mass_properties(1.)),
                ColliderMassProperties::Mass(1.),
            ))
            .id();
        let mut ctx = PortalContext::default();
        let mut state = BodyState::dynamic(Transform::from_xyz(10.1, 0., 0.), 8.);
        state.linvel = Vec3::new(5., 0., 0.);
        ctx.set_body(entity, state);
        world.insert_resource(ctx);

        let mut stage = SystemStage::single(write_back_bodies);
        stage.run(&mut world);

        let body = world.entity(entity);
        assert_eq!(body.get::<Transform>().unwrap().translation, Vec3::new(10.1, 0., 0.));
        assert_eq!(body.get::<Velocity>().unwrap().linvel, Vec3::new(5., 0., 0.));
        assert!(matches!(
            body.get::<ColliderMassProperties>(),
            Some(ColliderMassProperties::Mass(mass)) if (*mass - 8.).abs() < 1e-3
        ));
    }
}
