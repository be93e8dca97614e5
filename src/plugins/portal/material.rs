use bevy::{
    prelude::*,
    reflect::TypeUuid,
    render::render_resource::{AsBindGroup, ShaderRef, ShaderType},
};

/// Shows the image rendered by a virtual camera, sampled in screen space.
#[derive(AsBindGroup, Debug, Clone, PartialEq, TypeUuid, Reflect)]
#[uuid = "04901b22-de12-43a9-8e2e-79d333201b93"]
pub struct PortalMaterial {
    #[texture(0)]
    #[sampler(1)]
    pub texture: Handle<Image>,
    #[uniform(2)]
    pub tint: Color,
}

impl Default for PortalMaterial {
    fn default() -> Self {
        PortalMaterial {
            texture: Handle::default(),
            tint: Color::WHITE,
        }
    }
}

impl Material for PortalMaterial {
    fn fragment_shader() -> ShaderRef {
        "shaders/portal_open.wgsl".into()
    }

    fn specialize(
        _pipeline: &bevy::pbr::MaterialPipeline<Self>,
        descriptor: &mut bevy::render::render_resource::RenderPipelineDescriptor,
        _layout: &bevy::render::mesh::MeshVertexBufferLayout,
        _key: bevy::pbr::MaterialPipelineKey<Self>,
    ) -> Result<(), bevy::render::render_resource::SpecializedMeshPipelineError> {
        // The inside-view box is seen from within.
        descriptor.primitive.cull_mode = None;
        Ok(())
    }
}

/// The end cap drawn on portals that are not workable or past the recursion limit.
#[derive(AsBindGroup, Debug, Clone, TypeUuid, Reflect)]
#[uuid = "3373a227-c84e-4da6-bc1d-c7927ff75ef9"]
pub struct ClosedPortalMaterial {
    #[uniform(0)]
    pub uniform: ClosedPortalUniform,
}

impl Material for ClosedPortalMaterial {
    fn fragment_shader() -> ShaderRef {
        "shaders/portal_closed.wgsl".into()
    }
}

#[derive(Debug, Clone, ShaderType, Reflect)]
pub struct ClosedPortalUniform {
    pub color: Color,
}
