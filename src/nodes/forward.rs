//! Forward geometry pass.

use std::any::Any;
use std::ops::Range;

use glam::Mat4;
use serde::Deserialize;

use crate::nodes::{FORWARD_SHADER, frame_target, loaded_shader};
use crate::render_graph::{
    ClearValues, DrawCommand, ExecuteContext, GpuDevice, NodeContext, NodeSetup, RenderNode,
    RenderPassBegin, ResourceType, Result, ShaderHandle, SourceOrigin, deserialize_config,
};

pub const TYPE_NAME: &str = "forward";

const SHADOWMAP_SINK: usize = 2;

/// Configuration for [`ForwardPass`].
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Declare a `shadowmap` sink and sample it while shading.
    pub shadows: bool,
    /// Clear depth before drawing. Disable to keep depth written by earlier passes.
    pub clear_depth: bool,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            shadows: true,
            clear_depth: true,
        }
    }
}

/// Camera matrices for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewData {
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for ViewData {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

impl ViewData {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// A mesh draw queued for the next frame.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshDraw {
    pub vertices: Range<u32>,
    pub indices: Option<Range<u32>>,
    pub transform: Mat4,
    pub color: [f32; 4],
}

impl MeshDraw {
    pub fn new(vertices: Range<u32>, transform: Mat4) -> Self {
        Self {
            vertices,
            indices: None,
            transform,
            color: [1.0; 4],
        }
    }

    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }
}

/// Draws queued meshes on top of the incoming color buffer.
///
/// Geometry is immediate-mode: the application submits [`MeshDraw`]s each frame
/// through [`RenderGraph::pass_mut`](crate::render_graph::RenderGraph::pass_mut), and
/// the queue is emptied once the frame executes.
///
/// # Sinks
///
/// - `colorbuffer`, `depthbuffer`: passed through as sources of the same name
/// - `shadowmap`: depth array sampled for shadowing (only with `shadows: true`)
#[derive(Debug)]
pub struct ForwardPass {
    pub config: ForwardConfig,
    view: ViewData,
    shader: Option<ShaderHandle>,
    draws: Vec<MeshDraw>,
}

impl ForwardPass {
    pub fn new(config: ForwardConfig) -> Self {
        Self {
            config,
            view: ViewData::default(),
            shader: None,
            draws: Vec::new(),
        }
    }

    pub fn set_view(&mut self, view: ViewData) {
        self.view = view;
    }

    pub fn view(&self) -> &ViewData {
        &self.view
    }

    pub fn submit(&mut self, draw: MeshDraw) {
        self.draws.push(draw);
    }

    /// Number of draws queued for the next frame.
    pub fn queued(&self) -> usize {
        self.draws.len()
    }
}

pub fn create(setup: &mut NodeSetup, config: &str) -> Result<Box<dyn RenderNode>> {
    let config: ForwardConfig = deserialize_config(config)?;
    setup
        .add_typed_sink("colorbuffer", ResourceType::Texture)?
        .add_typed_sink("depthbuffer", ResourceType::DepthStencil)?;
    if config.shadows {
        setup.add_typed_sink("shadowmap", ResourceType::DepthStencil)?;
    }
    setup
        .add_source("colorbuffer", ResourceType::Texture, SourceOrigin::OtherPass)?
        .add_source("depthbuffer", ResourceType::DepthStencil, SourceOrigin::OtherPass)?
        .add_attachment("colorbuffer")
        .add_attachment("depthbuffer");
    Ok(Box::new(ForwardPass::new(config)))
}

impl RenderNode for ForwardPass {
    fn load_resources(&mut self, ctx: &mut NodeContext) -> Result<()> {
        self.shader = Some(ctx.device.acquire_shader(FORWARD_SHADER)?);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext) -> Result<()> {
        let shader = loaded_shader(self.shader)?;
        let target = frame_target(ctx)?;
        let shadowmap = if self.config.shadows {
            ctx.sink_texture(SHADOWMAP_SINK)
        } else {
            None
        };

        let frame = ctx.frame;
        let view_projection = self.view.view_projection();
        let transforms = frame
            .allocator()
            .alloc_slice_fill_iter(self.draws.iter().map(|d| view_projection * d.transform));

        ctx.device.begin_render(&RenderPassBegin {
            target,
            layer: 0,
            clear: ClearValues {
                color: None,
                depth: self.config.clear_depth.then_some(1.0),
            },
        })?;
        for (draw, transform) in self.draws.drain(..).zip(transforms.iter()) {
            let mut command = DrawCommand::new(shader, draw.vertices)
                .with_transform(*transform)
                .with_color(draw.color);
            command.indices = draw.indices;
            command.texture = shadowmap;
            ctx.device.draw(&command)?;
        }
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
