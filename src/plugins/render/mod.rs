//! Rendering extras, like general purpose shaders.

use bevy::{
    prelude::*,
    reflect::{Reflect, TypeUuid},
    render::render_resource::{AsBindGroup, ShaderRef},
};

use super::portal::traveler::NEUTRAL_SLICE_PLANE;

pub struct RenderPlugin;

impl Plugin for RenderPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<SliceMaterial>()
            .add_plugin(MaterialPlugin::<SliceMaterial>::default());
    }
}

#[derive(AsBindGroup, Debug, Clone, TypeUuid, Reflect)]
#[uuid = "bac0548a-d97a-4d30-a275-18a4f0d1fc9f"]
/// Flat shaded material discarding everything on the negative side of `slice_plane`.
/// Travelers straddling a portal use it to cut their meshes at the portal plane.
pub struct SliceMaterial {
    #[uniform(0)]
    pub base_color: Color,
    /// World space plane `(normal, d)`, all zeros to keep the whole mesh.
    #[uniform(1)]
    pub slice_plane: Vec4,
}

impl SliceMaterial {
    pub fn new(base_color: Color) -> SliceMaterial {
        SliceMaterial {
            base_color,
            slice_plane: NEUTRAL_SLICE_PLANE,
        }
    }
}

impl Material for SliceMaterial {
    fn fragment_shader() -> ShaderRef {
        "shaders/slice.wgsl".into()
    }
}
