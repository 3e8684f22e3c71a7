//! Full-screen sky gradient.

use std::any::Any;

use serde::Deserialize;

use crate::nodes::{SKYBOX_SHADER, frame_target, loaded_shader};
use crate::render_graph::{
    ClearValues, DrawCommand, ExecuteContext, GpuDevice, NodeContext, NodeSetup, RenderNode,
    RenderPassBegin, ResourceType, Result, ShaderHandle, SourceOrigin, deserialize_config,
};

pub const TYPE_NAME: &str = "skybox";

/// Configuration for [`SkyboxPass`].
///
/// ```json
/// { "clear_color": [0.0, 0.0, 0.0, 1.0], "sky_color": [0.35, 0.55, 0.85, 1.0] }
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SkyboxConfig {
    /// Color the target is cleared to first. `None` loads the existing contents.
    pub clear_color: Option<[f32; 4]>,
    /// Zenith color; the shader fades it toward the horizon.
    pub sky_color: [f32; 4],
}

impl Default for SkyboxConfig {
    fn default() -> Self {
        Self {
            clear_color: Some([0.0, 0.0, 0.0, 1.0]),
            sky_color: [0.35, 0.55, 0.85, 1.0],
        }
    }
}

/// Clears the color buffer and draws a procedural sky as a full-screen triangle.
///
/// Passes its `colorbuffer` sink through as its `colorbuffer` source, so later passes
/// draw on top of the sky.
#[derive(Debug)]
pub struct SkyboxPass {
    pub config: SkyboxConfig,
    shader: Option<ShaderHandle>,
}

impl SkyboxPass {
    pub fn new(config: SkyboxConfig) -> Self {
        Self {
            config,
            shader: None,
        }
    }

    pub fn set_sky_color(&mut self, color: [f32; 4]) {
        self.config.sky_color = color;
    }
}

pub fn create(setup: &mut NodeSetup, config: &str) -> Result<Box<dyn RenderNode>> {
    let config: SkyboxConfig = deserialize_config(config)?;
    setup
        .add_typed_sink("colorbuffer", ResourceType::Texture)?
        .add_source("colorbuffer", ResourceType::Texture, SourceOrigin::OtherPass)?
        .add_attachment("colorbuffer");
    Ok(Box::new(SkyboxPass::new(config)))
}

impl RenderNode for SkyboxPass {
    fn load_resources(&mut self, ctx: &mut NodeContext) -> Result<()> {
        self.shader = Some(ctx.device.acquire_shader(SKYBOX_SHADER)?);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext) -> Result<()> {
        let shader = loaded_shader(self.shader)?;
        let target = frame_target(ctx)?;

        ctx.device.begin_render(&RenderPassBegin {
            target,
            layer: 0,
            clear: ClearValues {
                color: self.config.clear_color,
                depth: None,
            },
        })?;
        ctx.device
            .draw(&DrawCommand::new(shader, 0..3).with_color(self.config.sky_color))?;
        ctx.device.end_render()?;
        Ok(())
    }

    fn destroy(&mut self, device: &mut dyn GpuDevice) {
        if let Some(shader) = self.shader.take() {
            device.release_shader(shader);
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
