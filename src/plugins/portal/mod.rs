//! Seamless portals: linked openings bodies travel through and cameras see through.
//!
//! Add [`PortalPlugin`] after `RapierPhysicsPlugin`, spawn [`Portal`]s and link them with
//! [`PortalLinkRequest`]. Bodies carrying a [`Traveler`] and [`PortalProxy`] colliders cross
//! portals; the camera marked [`PrimaryViewpoint`] sees through them. Nothing ticks until an entity
//! holds the [`PortalOrchestrator`] component.

use bevy::{
    prelude::*,
    render::{camera::CameraProjectionPlugin, view::VisibilitySystems},
    transform::TransformSystem,
};
use bevy_rapier3d::prelude::*;

pub mod backend;
pub mod camera_projection;
pub mod config;
pub mod contact;
pub mod context;
pub mod ghost;
pub mod material;
pub mod portal;
pub mod proxy;
pub mod render_plan;
pub mod systems;
pub mod transfer;
pub mod traveler;

pub use backend::{PortalRig, PrimaryViewpoint};
pub use config::{PortalConfig, PortalSettings};
pub use context::PortalContext;
pub use portal::{Portal, PortalLinkRequest, PortalOverrides};
pub use proxy::{PortalProxy, ProxyShape};
pub use systems::{PortalOrchestrator, PortalRaycast};
pub use traveler::{PortalTransferEvent, Traveler};

use camera_projection::PortalCameraProjection;
use contact::PortalContactHook;
use material::{ClosedPortalMaterial, PortalMaterial};
use systems::*;

pub const SETTINGS_PATH: &str = "assets/portal_settings.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StageLabel)]
pub enum PortalStage {
    /// Detection, transfers and ghosts, right after rapier wrote its results back.
    Tick,
    /// Virtual camera placement, before transforms propagate.
    Render,
}

#[derive(Debug, Default)]
pub struct PortalPlugin;

impl Plugin for PortalPlugin {
    fn build(&self, app: &mut App) {
        let settings = PortalSettings::load_or_default(SETTINGS_PATH);
        let ctx = PortalContext::new(settings.clone());
        let hook = PortalContactHook {
            routing: ctx.routing().clone(),
        };

        app.insert_resource(settings)
            .insert_resource(ctx)
            .insert_resource(PhysicsHooksWithQueryResource::<NoUserData>(Box::new(hook)))
            .init_resource::<PortalRig>()
            .init_resource::<TravelerClones>()
            .add_event::<PortalTransferEvent>()
            .register_type::<PortalCameraProjection>()
            .register_type::<PortalMaterial>()
            .add_plugin(MaterialPlugin::<PortalMaterial>::default())
            .add_plugin(MaterialPlugin::<ClosedPortalMaterial>::default())
            .add_plugin(CameraProjectionPlugin::<PortalCameraProjection>::default())
            .add_stage_after(PhysicsStages::Writeback, PortalStage::Tick, SystemStage::parallel())
            .add_stage_after(PortalStage::Tick, PortalStage::Render, SystemStage::parallel())
            .add_system_set_to_stage(
                PortalStage::Tick,
                SystemSet::new()
                    .with_system(claim_orchestrators)
                    .with_system(sync_settings)
                    .with_system(spawn_portal_frames)
                    .with_system(prepare_proxies)
                    .with_system(sync_portals.after(claim_orchestrators).after(sync_settings))
                    .with_system(sync_bodies.after(sync_portals))
                    .with_system(sync_proxies.after(sync_bodies))
                    .with_system(run_physics_tick.after(sync_proxies))
                    .with_system(write_back_bodies.after(run_physics_tick))
                    .with_system(slice_travelers.after(run_physics_tick)),
            )
            .add_system_set_to_stage(
                PortalStage::Render,
                SystemSet::new()
                    .with_system(prepare_primary_viewpoint)
                    .with_system(render_portals),
            )
            .add_system_to_stage(
                CoreStage::PostUpdate,
                bevy::render::view::update_frusta::<PortalCameraProjection>
                    .after(TransformSystem::TransformPropagate)
                    .before(VisibilitySystems::CheckVisibility),
            );
    }
}
