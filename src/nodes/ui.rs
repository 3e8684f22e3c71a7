//! Screen-space UI pass fed by a render-data buffer.
//!
//! Widget code never touches the graph. It fills a [`UiRenderData`] with
//! [`RenderDataItem`]s (pixel-space transforms, vertex ranges into the shared UI
//! geometry, an optional texture and clip mask) and hands it to the pass:
//!
//! ```ignore
//! let mut data = UiRenderData::new();
//! data.push(RenderDataItem::quad(button_id, Mat4::from_scale_rotation_translation(..)));
//! graph.pass_mut::<StandardUiPass>("ui").unwrap().submit(data);
//! ```

use std::any::Any;
use std::ops::Range;

use glam::Mat4;
use serde::Deserialize;

use crate::nodes::{UI_SHADER, frame_target, loaded_shader};
use crate::render_graph::{
    ClearValues, DrawCommand, ExecuteContext, GpuDevice, NodeContext, NodeSetup, RenderNode,
    RenderPassBegin, ResourceType, Result, ShaderHandle, SourceOrigin, TextureHandle,
    deserialize_config,
};

pub const TYPE_NAME: &str = "standard_ui";

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Clear before drawing. `None` (the default) draws over the scene.
    pub clear_color: Option<[f32; 4]>,
}

/// One widget draw.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderDataItem {
    /// Identifies the widget that produced the item, for picking.
    pub instance_id: u32,
    /// Texture to sample instead of the UI atlas.
    pub texture_override: Option<TextureHandle>,
    pub vertices: Range<u32>,
    pub indices: Option<Range<u32>>,
    /// Pixel-space transform; the pass applies the screen projection.
    pub transform: Mat4,
    pub color: [f32; 4],
    /// Scissor mask; items outside it are clipped.
    pub clip_mask: Option<u32>,
}

impl RenderDataItem {
    /// A unit quad (two triangles) scaled and placed by `transform`.
    pub fn quad(instance_id: u32, transform: Mat4) -> Self {
        Self {
            instance_id,
            texture_override: None,
            vertices: 0..6,
            indices: None,
            transform,
            color: [1.0; 4],
            clip_mask: None,
        }
    }

    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }

    pub fn with_texture(mut self, texture: TextureHandle) -> Self {
        self.texture_override = Some(texture);
        self
    }

    pub fn with_clip_mask(mut self, mask: u32) -> Self {
        self.clip_mask = Some(mask);
        self
    }
}

/// Draw data submitted by the UI layer, in back-to-front order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UiRenderData {
    items: Vec<RenderDataItem>,
}

impl UiRenderData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: RenderDataItem) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[RenderDataItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Draws the submitted [`UiRenderData`] over the incoming color buffer.
#[derive(Debug)]
pub struct StandardUiPass {
    pub config: UiConfig,
    shader: Option<ShaderHandle>,
    data: UiRenderData,
}

impl StandardUiPass {
    pub fn new(config: UiConfig) -> Self {
        Self {
            config,
            shader: None,
            data: UiRenderData::new(),
        }
    }

    /// Replaces the data drawn on the next frame.
    pub fn submit(&mut self, data: UiRenderData) {
        self.data = data;
    }

    pub fn render_data_mut(&mut self) -> &mut UiRenderData {
        &mut self.data
    }
}

pub fn create(setup: &mut NodeSetup, config: &str) -> Result<Box<dyn RenderNode>> {
    let config: UiConfig = deserialize_config(config)?;
    setup
        .add_typed_sink("colorbuffer", ResourceType::Texture)?
        .add_source("colorbuffer", ResourceType::Texture, SourceOrigin::OtherPass)?
        .add_attachment("colorbuffer");
    Ok(Box::new(StandardUiPass::new(config)))
}

/// Maps pixel coordinates (origin top-left, y down) to clip space.
fn screen_projection(width: u32, height: u32) -> Mat4 {
    Mat4::orthographic_rh(0.0, width as f32, height as f32, 0.0, -1.0, 1.0)
}

impl RenderNode for StandardUiPass {
    fn load_resources(&mut self, ctx: &mut NodeContext) -> Result<()> {
        self.shader = Some(ctx.device.acquire_shader(UI_SHADER)?);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext) -> Result<()> {
        let shader = loaded_shader(self.shader)?;
        let target = frame_target(ctx)?;
        if self.data.is_empty() && self.config.clear_color.is_none() {
            return Ok(());
        }
        let projection = ctx
            .render_target
            .map(|t| screen_projection(t.width, t.height))
            .unwrap_or(Mat4::IDENTITY);

        ctx.device.begin_render(&RenderPassBegin {
            target,
            layer: 0,
            clear: ClearValues {
                color: self.config.clear_color,
                depth: None,
            },
        })?;
        for item in self.data.items.drain(..) {
            let mut command = DrawCommand::new(shader, item.vertices)
                .with_transform(projection * item.transform)
                .with_color(item.color);
            command.indices = item.indices;
            command.instance_id = item.instance_id;
            command.texture = item.texture_override;
            command.clip_mask = item.clip_mask;
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
