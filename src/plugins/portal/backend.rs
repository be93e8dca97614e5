//! Drawing planned views: the backend seam and the Bevy camera rig behind it.

use bevy::{
    prelude::*,
    render::{
        camera::{Projection, RenderTarget},
        render_resource::{Extent3d, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages},
        view::RenderLayers,
    },
    utils::{HashMap, HashSet},
};

use super::{
    camera_projection::PortalCameraProjection,
    context::PortalContext,
    material::{ClosedPortalMaterial, ClosedPortalUniform, PortalMaterial},
    portal::EndCap,
    render_plan::{find_penetrating_portal, RenderPlanner, ViewTarget, Viewpoint, VirtualView},
};

/// Layer of the portal surfaces the primary viewpoint sees.
pub const PRIMARY_SURFACE_LAYER: u8 = 8;
/// Layer seen by views that nest no further. Only end caps are drawn on it.
pub const END_CAP_LAYER: u8 = 31;

/// Render layers on which a view's camera sees the surfaces nested inside it, one per view.
#[derive(Debug)]
pub struct LayerPool {
    assigned: HashMap<ViewTarget, u8>,
    free: Vec<u8>,
}

impl Default for LayerPool {
    fn default() -> Self {
        LayerPool {
            assigned: HashMap::default(),
            free: (PRIMARY_SURFACE_LAYER + 1..END_CAP_LAYER).rev().collect(),
        }
    }
}

impl LayerPool {
    /// The layer nested surfaces of `target` go on. `None` once every layer is taken.
    pub fn assign(&mut self, target: ViewTarget) -> Option<u8> {
        if let Some(layer) = self.assigned.get(&target) {
            return Some(*layer);
        }
        let layer = self.free.pop()?;
        self.assigned.insert(target, layer);
        Some(layer)
    }

    pub fn get(&self, target: &ViewTarget) -> Option<u8> {
        self.assigned.get(target).copied()
    }

    /// Layer the surface of a view nested in `parent` is drawn on.
    pub fn surface_layer(&self, parent: Option<ViewTarget>) -> Option<u8> {
        match parent {
            Some(parent) => self.get(&parent),
            None => Some(PRIMARY_SURFACE_LAYER),
        }
    }

    /// Give back the layers of targets outside `used`.
    pub fn retain(&mut self, used: &HashSet<ViewTarget>) {
        let free = &mut self.free;
        self.assigned.retain(|target, layer| {
            let keep = used.contains(target);
            if !keep {
                free.push(*layer);
            }
            keep
        });
    }

    pub fn layers_in_use(&self) -> impl Iterator<Item = u8> + '_ {
        self.assigned.values().copied()
    }
}

/// Host capability drawing virtual views into targets.
pub trait RenderBackend {
    /// Render `view` into the target of `view.target()`.
    fn render_view(&mut self, ctx: &PortalContext, view: &VirtualView);

    /// Show the target of `view` on the surface of `view.portal`.
    fn composite(&mut self, ctx: &PortalContext, view: &VirtualView);

    /// Draw the inside-view geometry of a portal the viewpoint is inside of.
    fn draw_penetrating(&mut self, ctx: &PortalContext, view: &VirtualView);

    /// Release what the frame didn't use. Surfaces without a rendered target show the end cap.
    fn release(&mut self, ctx: &PortalContext, used: &[ViewTarget]);
}

/// Plan, render and composite the portal views of one viewpoint. Returns the number of views.
pub fn render_tick<B: RenderBackend>(ctx: &PortalContext, viewpoint: &Viewpoint, backend: &mut B) -> usize {
    let penetrating = find_penetrating_portal(ctx, viewpoint);
    let views: Vec<VirtualView> = RenderPlanner::new(ctx, *viewpoint, penetrating).collect();

    for view in &views {
        backend.render_view(ctx, view);
        if view.penetrating {
            backend.draw_penetrating(ctx, view);
        }
    }
    // Deepest first so outer surfaces show their nested views.
    let mut order: Vec<&VirtualView> = views.iter().collect();
    order.sort_by(|a, b| b.depth.cmp(&a.depth));
    for view in order {
        backend.composite(ctx, view);
    }

    let used: Vec<ViewTarget> = views.iter().map(VirtualView::target).collect();
    backend.release(ctx, &used);
    trace!("Rendered {} portal views", views.len());
    views.len()
}

/// Camera drawing one planned view.
#[derive(Debug, Clone, Copy, Component)]
pub struct PortalCamera {
    pub target: ViewTarget,
}

/// Marks the camera portal views are planned for.
#[derive(Debug, Default, Clone, Copy, Component)]
pub struct PrimaryViewpoint;

#[derive(Debug)]
struct RigCamera {
    entity: Entity,
    image: Handle<Image>,
    material: Handle<PortalMaterial>,
    layer: u8,
}

/// Surfaces of one portal on one render layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SurfaceKey {
    layer: u8,
    portal: Entity,
}

#[derive(Debug, Default)]
struct RigSurfaces {
    open: Option<Entity>,
    closed: Option<Entity>,
}

/// Cameras, targets and surface quads owned by [`CameraRigBackend`].
#[derive(Debug, Default, Resource)]
pub struct PortalRig {
    cameras: HashMap<ViewTarget, RigCamera>,
    layers: LayerPool,
    surfaces: HashMap<SurfaceKey, RigSurfaces>,
    inside: HashMap<Entity, Entity>,
    quads: HashMap<Entity, Handle<Mesh>>,
    end_caps: HashMap<Entity, Handle<ClosedPortalMaterial>>,
    view_materials: HashMap<Entity, Handle<PortalMaterial>>,
    active: HashSet<ViewTarget>,
    composited: HashSet<SurfaceKey>,
    inside_drawn: HashSet<Entity>,
    shown: HashMap<Entity, bool>,
}

impl PortalRig {
    /// Drop everything built for a portal that went away.
    pub fn forget_portal(&mut self, commands: &mut Commands, portal: Entity) {
        let cameras: Vec<ViewTarget> = self.cameras.keys().filter(|t| t.portal == portal).copied().collect();
        for target in cameras {
            if let Some(camera) = self.cameras.remove(&target) {
                if let Some(mut entity) = commands.get_entity(camera.entity) {
                    entity.despawn();
                }
            }
        }
        let keys: Vec<SurfaceKey> = self.surfaces.keys().filter(|key| key.portal == portal).copied().collect();
        let mut entities: Vec<Entity> = keys
            .iter()
            .filter_map(|key| self.surfaces.remove(key))
            .flat_map(|surfaces| [surfaces.open, surfaces.closed])
            .flatten()
            .collect();
        entities.extend(self.inside.remove(&portal));
        for entity in entities {
            self.shown.remove(&entity);
            self.view_materials.remove(&entity);
            if let Some(entity) = commands.get_entity(entity) {
                entity.despawn_recursive();
            }
        }
        self.quads.remove(&portal);
        self.end_caps.remove(&portal);
        self.active.retain(|target| target.portal != portal);
        self.inside_drawn.remove(&portal);
    }
}

/// [`RenderBackend`] turning planned views into Bevy cameras rendering into images.
pub struct CameraRigBackend<'a, 'w, 's> {
    pub commands: &'a mut Commands<'w, 's>,
    pub rig: &'a mut PortalRig,
    pub images: &'a mut Assets<Image>,
    pub meshes: &'a mut Assets<Mesh>,
    pub materials: &'a mut Assets<PortalMaterial>,
    pub closed_materials: &'a mut Assets<ClosedPortalMaterial>,
    pub clone_layer: u8,
}

fn target_image(size: [u32; 2]) -> Image {
    let tex_size = Extent3d {
        width: size[0].max(1),
        height: size[1].max(1),
        ..default()
    };
    let mut image = Image {
        texture_descriptor: TextureDescriptor {
            label: None,
            size: tex_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Bgra8UnormSrgb,
            usage: TextureUsages::TEXTURE_BINDING
                | TextureUsages::COPY_DST
                | TextureUsages::RENDER_ATTACHMENT,
        },
        ..default()
    };
    image.resize(tex_size);
    image
}

/// Deeper views render first.
fn camera_priority(depth: u8) -> isize {
    -1 - depth as isize
}

impl<'a, 'w, 's> CameraRigBackend<'a, 'w, 's> {
    fn view_material(ctx: &PortalContext, portal: Entity, image: Handle<Image>) -> PortalMaterial {
        match ctx.portal(portal) {
            Some(state) => state.overrides.material_for_view(image),
            None => PortalMaterial {
                texture: image,
                ..default()
            },
        }
    }

    fn camera_layers(&self, layer: u8) -> RenderLayers {
        RenderLayers::layer(0).with(layer).with(self.clone_layer)
    }

    fn ensure_camera(&mut self, ctx: &PortalContext, target: ViewTarget, layer: u8) -> Entity {
        if let Some(camera) = self.rig.cameras.get(&target) {
            return camera.entity;
        }
        let image = self.images.add(target_image(ctx.settings().render_target_size));
        let material = self
            .materials
            .add(Self::view_material(ctx, target.portal, image.clone()));
        let layers = self.camera_layers(layer);
        let entity = self
            .commands
            .spawn((
                Camera3dBundle {
                    camera: Camera {
                        priority: camera_priority(target.depth),
                        target: RenderTarget::Image(image.clone()),
                        ..default()
                    },
                    ..default()
                },
                PortalCameraProjection::default(),
                PortalCamera { target },
                layers,
            ))
            .remove::<Projection>()
            .id();
        debug!("Created portal camera {:?} for {:?}", entity, target);
        self.rig.cameras.insert(
            target,
            RigCamera {
                entity,
                image,
                material,
                layer,
            },
        );
        entity
    }

    fn quad(&mut self, ctx: &PortalContext, portal: Entity) -> Option<Handle<Mesh>> {
        if let Some(mesh) = self.rig.quads.get(&portal) {
            return Some(mesh.clone());
        }
        let config = ctx.portal(portal)?.config.clone()?;
        let mesh = self.meshes.add(
            shape::Quad {
                size: config.plane.half_extents * 2.,
                flip: false,
            }
            .into(),
        );
        self.rig.quads.insert(portal, mesh.clone());
        Some(mesh)
    }

    fn end_cap(&mut self, ctx: &PortalContext, portal: Entity) -> Option<Handle<ClosedPortalMaterial>> {
        let state = ctx.portal(portal)?;
        match state.overrides.end_cap(state.config.as_deref())? {
            EndCap::Material(material) => Some(material),
            EndCap::Color(color) => {
                if let Some(material) = self.rig.end_caps.get(&portal) {
                    return Some(material.clone());
                }
                let material = self.closed_materials.add(ClosedPortalMaterial {
                    uniform: ClosedPortalUniform { color },
                });
                self.rig.end_caps.insert(portal, material.clone());
                Some(material)
            }
        }
    }

    /// Spawn a hidden surface as a child of `portal`.
    fn spawn_surface<M: Material>(
        &mut self,
        portal: Entity,
        mesh: Handle<Mesh>,
        material: Handle<M>,
        layer: u8,
        transform: Transform,
    ) -> Option<Entity> {
        self.commands.get_entity(portal)?;
        let entity = self
            .commands
            .spawn((
                MaterialMeshBundle {
                    mesh,
                    material,
                    transform,
                    visibility: Visibility { is_visible: false },
                    ..default()
                },
                RenderLayers::layer(layer),
            ))
            .id();
        self.commands.entity(portal).add_child(entity);
        self.rig.shown.insert(entity, false);
        Some(entity)
    }

    /// Point a surface at the material of the view it currently shows.
    fn show_material(&mut self, entity: Entity, material: Handle<PortalMaterial>) {
        if self.rig.view_materials.get(&entity) == Some(&material) {
            return;
        }
        if let Some(mut commands) = self.commands.get_entity(entity) {
            commands.insert(material.clone());
        }
        self.rig.view_materials.insert(entity, material);
    }

    fn open_surface(&mut self, ctx: &PortalContext, key: SurfaceKey, material: Handle<PortalMaterial>) -> Option<Entity> {
        let entity = match self.rig.surfaces.get(&key).and_then(|surfaces| surfaces.open) {
            Some(entity) => entity,
            None => {
                let mesh = self.quad(ctx, key.portal)?;
                let entity = self.spawn_surface(key.portal, mesh, material.clone(), key.layer, Transform::IDENTITY)?;
                self.rig.surfaces.entry(key).or_default().open = Some(entity);
                self.rig.view_materials.insert(entity, material.clone());
                entity
            }
        };
        self.show_material(entity, material);
        Some(entity)
    }

    fn closed_surface(&mut self, ctx: &PortalContext, key: SurfaceKey) -> Option<Entity> {
        if let Some(entity) = self.rig.surfaces.get(&key).and_then(|surfaces| surfaces.closed) {
            return Some(entity);
        }
        let mesh = self.quad(ctx, key.portal)?;
        let material = self.end_cap(ctx, key.portal)?;
        let entity = self.spawn_surface(key.portal, mesh, material, key.layer, Transform::IDENTITY)?;
        self.rig.surfaces.entry(key).or_default().closed = Some(entity);
        Some(entity)
    }

    fn inside_surface(&mut self, ctx: &PortalContext, portal: Entity, material: Handle<PortalMaterial>) -> Option<Entity> {
        let entity = match self.rig.inside.get(&portal) {
            Some(entity) => *entity,
            None => {
                let geometry = ctx.portal(portal)?.config.as_ref()?.penetrating_view?;
                let half = geometry.half_extents;
                let mesh = self.meshes.add(shape::Box::new(half.x * 2., half.y * 2., half.z).into());
                // The box extends behind the opening.
                let transform = Transform::from_xyz(0., 0., -half.z * 0.5);
                let entity = self.spawn_surface(portal, mesh, material.clone(), PRIMARY_SURFACE_LAYER, transform)?;
                self.rig.inside.insert(portal, entity);
                self.rig.view_materials.insert(entity, material.clone());
                entity
            }
        };
        self.show_material(entity, material);
        Some(entity)
    }

    fn set_visible(&mut self, entity: Option<Entity>, is_visible: bool) {
        let entity = match entity {
            Some(entity) => entity,
            None => return,
        };
        if self.rig.shown.insert(entity, is_visible) == Some(is_visible) {
            return;
        }
        if let Some(mut entity) = self.commands.get_entity(entity) {
            entity.insert(Visibility { is_visible });
        }
    }
}

impl<'a, 'w, 's> RenderBackend for CameraRigBackend<'a, 'w, 's> {
    fn render_view(&mut self, ctx: &PortalContext, view: &VirtualView) {
        let target = view.target();
        let layer = if view.end_cap {
            END_CAP_LAYER
        } else {
            self.rig.layers.assign(target).unwrap_or_else(|| {
                trace!("No surface layer left for {:?}", target);
                END_CAP_LAYER
            })
        };
        let camera = self.ensure_camera(ctx, target, layer);
        let (image, relayer) = match self.rig.cameras.get_mut(&target) {
            Some(camera) => {
                let relayer = camera.layer != layer;
                camera.layer = layer;
                (camera.image.clone(), relayer)
            }
            None => return,
        };
        let layers = self.camera_layers(layer);
        let mut entity = self.commands.entity(camera);
        entity.insert((
            view.transform,
            PortalCameraProjection::from(view),
            Camera {
                priority: camera_priority(view.depth),
                is_active: true,
                target: RenderTarget::Image(image),
                ..default()
            },
        ));
        if relayer {
            entity.insert(layers);
        }
        self.rig.active.insert(target);
    }

    fn composite(&mut self, ctx: &PortalContext, view: &VirtualView) {
        let layer = match self.rig.layers.surface_layer(view.parent) {
            Some(layer) => layer,
            None => return,
        };
        let (handle, image) = match self.rig.cameras.get(&view.target()) {
            Some(camera) => (camera.material.clone(), camera.image.clone()),
            None => return,
        };
        let wanted = Self::view_material(ctx, view.portal, image);
        let stale = self.materials.get(&handle).map_or(false, |material| *material != wanted);
        if let Some(material) = self.materials.get_mut(&handle).filter(|_| stale) {
            *material = wanted;
        }

        let key = SurfaceKey {
            layer,
            portal: view.portal,
        };
        let open = self.open_surface(ctx, key, handle);
        let closed = self.rig.surfaces.get(&key).and_then(|surfaces| surfaces.closed);
        self.set_visible(open, true);
        self.set_visible(closed, false);
        self.rig.composited.insert(key);
    }

    fn draw_penetrating(&mut self, ctx: &PortalContext, view: &VirtualView) {
        let material = match self.rig.cameras.get(&view.target()) {
            Some(camera) => camera.material.clone(),
            None => return,
        };
        let inside = self.inside_surface(ctx, view.portal, material);
        self.set_visible(inside, true);
        self.rig.inside_drawn.insert(view.portal);
    }

    fn release(&mut self, ctx: &PortalContext, used: &[ViewTarget]) {
        let used: HashSet<ViewTarget> = used.iter().copied().collect();

        let idle: Vec<ViewTarget> = self.rig.active.difference(&used).copied().collect();
        for target in idle {
            self.rig.active.remove(&target);
            if let Some(camera) = self.rig.cameras.get(&target) {
                if let Some(mut entity) = self.commands.get_entity(camera.entity) {
                    entity.insert(Camera {
                        priority: camera_priority(target.depth),
                        is_active: false,
                        target: RenderTarget::Image(camera.image.clone()),
                        ..default()
                    });
                }
            }
        }
        self.rig.layers.retain(&used);

        let composited = std::mem::take(&mut self.rig.composited);
        let stale_open: Vec<Option<Entity>> = self
            .rig
            .surfaces
            .iter()
            .filter(|(key, _)| !composited.contains(*key))
            .map(|(_, surfaces)| surfaces.open)
            .collect();
        for entity in stale_open {
            self.set_visible(entity, false);
        }

        // Every layer a camera sees shows the end cap on portals without a view there.
        let mut layers: Vec<u8> = self.rig.layers.layers_in_use().collect();
        layers.extend([PRIMARY_SURFACE_LAYER, END_CAP_LAYER]);
        let portals: Vec<Entity> = ctx.portals().map(|(portal, _)| portal).collect();
        let mut capped = HashSet::default();
        for layer in layers {
            for portal in &portals {
                let key = SurfaceKey {
                    layer,
                    portal: *portal,
                };
                if composited.contains(&key) {
                    continue;
                }
                let closed = self.closed_surface(ctx, key);
                self.set_visible(closed, true);
                capped.insert(key);
            }
        }
        let stale_closed: Vec<Option<Entity>> = self
            .rig
            .surfaces
            .iter()
            .filter(|(key, _)| !capped.contains(*key))
            .map(|(_, surfaces)| surfaces.closed)
            .collect();
        for entity in stale_closed {
            self.set_visible(entity, false);
        }

        let inside_drawn = std::mem::take(&mut self.rig.inside_drawn);
        let stale_inside: Vec<Entity> = self
            .rig
            .inside
            .iter()
            .filter(|(portal, _)| !inside_drawn.contains(*portal))
            .map(|(_, entity)| *entity)
            .collect();
        for entity in stale_inside {
            self.set_visible(Some(entity), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        f32::consts::{FRAC_PI_4, PI},
        sync::Arc,
    };

    use super::*;
    use crate::plugins::portal::{
        config::{PortalConfig, PortalSettings},
        portal::Portal,
    };

    #[derive(Debug, PartialEq)]
    enum Call {
        Render(ViewTarget),
        Composite(ViewTarget),
        Penetrating(ViewTarget),
        Release(usize),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
    }

    impl RenderBackend for Recorder {
        fn render_view(&mut self, _: &PortalContext, view: &VirtualView) {
            self.calls.push(Call::Render(view.target()));
        }

        fn composite(&mut self, _: &PortalContext, view: &VirtualView) {
            self.calls.push(Call::Composite(view.target()));
        }

        fn draw_penetrating(&mut self, _: &PortalContext, view: &VirtualView) {
            self.calls.push(Call::Penetrating(view.target()));
        }

        fn release(&mut self, _: &PortalContext, used: &[ViewTarget]) {
            self.calls.push(Call::Release(used.len()));
        }
    }

    fn context(recursion_limit: u8) -> (PortalContext, Entity) {
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
        ctx.link_portal(a, Some(b));
        (ctx, a)
    }

    fn viewpoint(z: f32) -> Viewpoint {
        Viewpoint {
            transform: Transform::from_xyz(0., 0., z),
            fov: FRAC_PI_4,
            aspect_ratio: 16. / 9.,
            near: 0.1,
            far: 100.,
        }
    }

    #[test]
    fn views_render_outer_first_and_composite_deepest_first() {
        let (ctx, a) = context(2);
        let mut recorder = Recorder::default();
        assert_eq!(render_tick(&ctx, &viewpoint(5.), &mut recorder), 2);

        let outer = ViewTarget::new(None, a);
        let inner = ViewTarget::new(Some(outer), a);
        assert_eq!(
            recorder.calls,
            vec![
                Call::Render(outer),
                Call::Render(inner),
                Call::Composite(inner),
                Call::Composite(outer),
                Call::Release(2),
            ]
        );
    }

    #[test]
    fn viewpoint_inside_a_portal_draws_its_inside_view() {
        let (ctx, a) = context(1);
        let mut recorder = Recorder::default();
        render_tick(&ctx, &viewpoint(0.03), &mut recorder);
        assert!(recorder
            .calls
            .contains(&Call::Penetrating(ViewTarget::new(None, a))));
    }

    #[test]
    fn zero_recursion_only_releases() {
        let (ctx, _) = context(0);
        let mut recorder = Recorder::default();
        assert_eq!(render_tick(&ctx, &viewpoint(5.), &mut recorder), 0);
        assert_eq!(recorder.calls, vec![Call::Release(0)]);
    }

    #[test]
    fn oversized_recursion_limits_are_capped() {
        let (mut ctx, _) = context(255);
        let mut recorder = Recorder::default();
        let limit = crate::plugins::portal::config::MAX_RECURSION_LIMIT as usize;
        assert_eq!(render_tick(&ctx, &viewpoint(5.), &mut recorder), limit);

        ctx.set_settings(PortalSettings {
            recursion_limit: u8::MAX,
            ..default()
        });
        assert_eq!(ctx.settings().recursion_limit as usize, limit);
        let mut recorder = Recorder::default();
        assert_eq!(render_tick(&ctx, &viewpoint(5.), &mut recorder), limit);
        assert_eq!(recorder.calls.last(), Some(&Call::Release(limit)));
    }

    #[test]
    fn each_view_gets_its_own_layer() {
        let [a, b] = [1, 2].map(Entity::from_raw);
        let via_a = ViewTarget::new(None, a);
        let via_b = ViewTarget::new(None, b);
        let nested = ViewTarget::new(Some(via_a), b);

        let mut pool = LayerPool::default();
        let layer_a = pool.assign(via_a).unwrap();
        let layer_b = pool.assign(via_b).unwrap();
        assert_ne!(layer_a, layer_b);
        assert_eq!(pool.assign(via_a), Some(layer_a));
        assert_eq!(pool.surface_layer(None), Some(PRIMARY_SURFACE_LAYER));
        assert_eq!(pool.surface_layer(Some(via_a)), Some(layer_a));
        assert_eq!(pool.surface_layer(Some(nested)), None);

        pool.retain(&[via_b].into_iter().collect());
        assert_eq!(pool.get(&via_a), None);
        assert_eq!(pool.layers_in_use().collect::<Vec<_>>(), vec![layer_b]);
        assert_eq!(pool.assign(nested), Some(layer_a));
    }

    #[test]
    fn layer_pool_stays_clear_of_scene_and_end_cap_layers() {
        let mut pool = LayerPool::default();
        let mut layers = Vec::new();
        while let Some(layer) = pool.assign(ViewTarget::new(None, Entity::from_raw(layers.len() as u32))) {
            layers.push(layer);
        }
        assert_eq!(layers.len(), (END_CAP_LAYER - PRIMARY_SURFACE_LAYER - 1) as usize);
        assert!(layers
            .iter()
            .all(|layer| *layer > PRIMARY_SURFACE_LAYER && *layer < END_CAP_LAYER));
        // RenderLayers holds 32 layers.
        assert!(END_CAP_LAYER < 32);
    }
}
