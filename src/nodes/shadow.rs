//! Cascaded shadow map pass with a self-owned depth atlas.

use std::any::Any;
use std::ops::Range;

use glam::Mat4;
use log::debug;
use serde::Deserialize;

use crate::nodes::{MAX_SHADOW_CASCADE_COUNT, SHADOW_SHADER, frame_target, loaded_shader};
use crate::render_graph::{
    ClearValues, ConfigError, DeviceError, DrawCommand, ExecuteContext, GpuDevice, NodeContext,
    NodeSetup, RenderNode, RenderPassBegin, ResourceType, Result, SelfOwnedAttachments,
    ShaderHandle, SourceOrigin, TextureDesc, TextureHandle, TextureKind, deserialize_config,
};

pub const TYPE_NAME: &str = "shadow";

/// Configuration for [`ShadowPass`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Edge length of each cascade layer in texels. Independent of the window size.
    pub resolution: u32,
    /// Cascades rendered per frame, at most [`MAX_SHADOW_CASCADE_COUNT`].
    pub cascade_count: u32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            resolution: 1024,
            cascade_count: MAX_SHADOW_CASCADE_COUNT as u32,
        }
    }
}

impl ShadowConfig {
    fn validate(&self, node: &str) -> Result<(), ConfigError> {
        if self.resolution == 0 {
            return Err(ConfigError::InvalidValue {
                node: node.to_string(),
                field: "resolution",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.cascade_count == 0 || self.cascade_count as usize > MAX_SHADOW_CASCADE_COUNT {
            return Err(ConfigError::InvalidValue {
                node: node.to_string(),
                field: "cascade_count",
                reason: format!("must be between 1 and {}", MAX_SHADOW_CASCADE_COUNT),
            });
        }
        Ok(())
    }
}

/// Geometry that casts shadows this frame.
#[derive(Clone, Debug, PartialEq)]
pub struct ShadowCaster {
    pub vertices: Range<u32>,
    pub indices: Option<Range<u32>>,
    pub transform: Mat4,
}

/// Renders shadow casters into a layered depth texture, one layer per cascade.
///
/// The depth array is created by the pass itself, lazily, the first time the graph
/// asks for it through [`SelfOwnedAttachments`]. It always has
/// [`MAX_SHADOW_CASCADE_COUNT`] layers at the configured resolution and is never
/// regenerated on resize.
///
/// # Sources
///
/// - `depthbuffer`: the depth array (self-owned)
/// - `cascade_count`: number of cascades actually rendered
///
/// # Example
///
/// ```ignore
/// let shadow = graph.pass_mut::<ShadowPass>("shadow").unwrap();
/// shadow.set_cascades(&light_view_projections);
/// shadow.submit(ShadowCaster { vertices: 0..36, indices: None, transform });
/// ```
#[derive(Debug)]
pub struct ShadowPass {
    name: String,
    pub config: ShadowConfig,
    shader: Option<ShaderHandle>,
    textures: Vec<Option<TextureHandle>>,
    cascades: [Mat4; MAX_SHADOW_CASCADE_COUNT],
    casters: Vec<ShadowCaster>,
}

impl ShadowPass {
    pub fn new(name: &str, config: ShadowConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            shader: None,
            textures: Vec::new(),
            cascades: [Mat4::IDENTITY; MAX_SHADOW_CASCADE_COUNT],
            casters: Vec::new(),
        }
    }

    /// Sets the light view-projection of each cascade, nearest first. Extra
    /// matrices beyond [`MAX_SHADOW_CASCADE_COUNT`] are ignored.
    pub fn set_cascades(&mut self, view_projections: &[Mat4]) {
        for (slot, matrix) in self.cascades.iter_mut().zip(view_projections) {
            *slot = *matrix;
        }
    }

    /// Queues a caster for the next frame.
    pub fn submit(&mut self, caster: ShadowCaster) {
        self.casters.push(caster);
    }

    pub fn cascade_count(&self) -> u32 {
        self.config.cascade_count
    }
}

pub fn create(setup: &mut NodeSetup, config: &str) -> Result<Box<dyn RenderNode>> {
    let config: ShadowConfig = deserialize_config(config)?;
    config.validate(setup.name())?;
    setup
        .add_source("depthbuffer", ResourceType::DepthStencil, SourceOrigin::SelfOwned)?
        .add_number_source(
            "cascade_count",
            SourceOrigin::SelfOwned,
            u64::from(config.cascade_count),
        )?
        .add_attachment("depthbuffer");
    Ok(Box::new(ShadowPass::new(setup.name(), config)))
}

impl SelfOwnedAttachments for ShadowPass {
    fn attachment_texture_get(
        &mut self,
        device: &mut dyn GpuDevice,
        resource_type: ResourceType,
        frame_slot: usize,
    ) -> Result<TextureHandle> {
        if resource_type != ResourceType::DepthStencil {
            return Err(DeviceError::TextureCreation {
                label: self.name.clone(),
                reason: format!("shadow pass owns no {:?} attachment", resource_type),
            }
            .into());
        }
        if self.textures.len() <= frame_slot {
            self.textures.resize(frame_slot + 1, None);
        }
        if let Some(texture) = self.textures[frame_slot] {
            return Ok(texture);
        }

        let texture = device.create_texture(&TextureDesc {
            label: format!("{} cascades {}", self.name, frame_slot),
            kind: TextureKind::Depth,
            width: self.config.resolution,
            height: self.config.resolution,
            layers: MAX_SHADOW_CASCADE_COUNT as u32,
        })?;
        debug!(
            "Created {}x{} shadow atlas for '{}' frame {}",
            self.config.resolution, self.config.resolution, self.name, frame_slot
        );
        self.textures[frame_slot] = Some(texture);
        Ok(texture)
    }
}

impl RenderNode for ShadowPass {
    fn load_resources(&mut self, ctx: &mut NodeContext) -> Result<()> {
        self.shader = Some(ctx.device.acquire_shader(SHADOW_SHADER)?);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext) -> Result<()> {
        let shader = loaded_shader(self.shader)?;
        let target = frame_target(ctx)?;

        for layer in 0..self.config.cascade_count {
            let view_projection = self.cascades[layer as usize];
            ctx.device.begin_render(&RenderPassBegin {
                target,
                layer,
                clear: ClearValues {
                    color: None,
                    depth: Some(1.0),
                },
            })?;
            for caster in &self.casters {
                let mut draw = DrawCommand::new(shader, caster.vertices.clone())
                    .with_transform(view_projection * caster.transform);
                draw.indices = caster.indices.clone();
                draw.instance_id = layer;
                ctx.device.draw(&draw)?;
            }
            ctx.device.end_render()?;
        }
        self.casters.clear();
        Ok(())
    }

    fn destroy(&mut self, device: &mut dyn GpuDevice) {
        if let Some(shader) = self.shader.take() {
            device.release_shader(shader);
        }
        for texture in self.textures.drain(..).flatten() {
            device.destroy_texture(texture);
        }
    }

    fn self_owned_attachments(&mut self) -> Option<&mut dyn SelfOwnedAttachments> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::{HeadlessDevice, RenderGraphError};

    #[test]
    fn rejects_too_many_cascades() {
        let mut setup = NodeSetup::new("shadow");
        let err = create(&mut setup, r#"{ "cascade_count": 9 }"#).err().unwrap();
        assert!(matches!(
            err,
            RenderGraphError::Config(ConfigError::InvalidValue { field: "cascade_count", .. })
        ));
    }

    #[test]
    fn atlas_is_created_once_per_slot() {
        let mut device = HeadlessDevice::new(1920, 1080);
        let mut pass = ShadowPass::new("shadow", ShadowConfig::default());
        let first = pass
            .attachment_texture_get(&mut device, ResourceType::DepthStencil, 1)
            .unwrap();
        let again = pass
            .attachment_texture_get(&mut device, ResourceType::DepthStencil, 1)
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(device.live_texture_count(), 1);

        let desc = device.texture_desc(first).unwrap();
        assert_eq!((desc.width, desc.height), (1024, 1024));
        assert_eq!(desc.layers, MAX_SHADOW_CASCADE_COUNT as u32);

        pass.destroy(&mut device);
        assert_eq!(device.live_texture_count(), 0);
    }

    #[test]
    fn only_depth_is_self_owned() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut pass = ShadowPass::new("shadow", ShadowConfig::default());
        assert!(
            pass.attachment_texture_get(&mut device, ResourceType::Texture, 0)
                .is_err()
        );
    }
}
