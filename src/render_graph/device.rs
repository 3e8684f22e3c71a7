//! The GPU primitives the render graph and its passes are built on.
//!
//! The graph never talks to a graphics API directly. Texture creation, render target
//! assembly, shader lookup and draw submission all go through [`GpuDevice`], which is
//! implemented by [`WgpuDevice`](crate::WgpuDevice) for real rendering and by
//! [`HeadlessDevice`](crate::render_graph::HeadlessDevice) for tests and tooling.

use std::ops::Range;

use glam::Mat4;

use crate::render_graph::error::DeviceError;
use crate::render_graph::{ResourceType, TextureHandle};

/// Opaque handle to a device-side render target (an attachment set).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderTargetHandle(pub u32);

/// Opaque handle to an acquired shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u32);

/// Pixel layout of a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Color,
    Depth,
}

impl TextureKind {
    pub fn for_resource(resource_type: ResourceType) -> Option<Self> {
        match resource_type {
            ResourceType::Texture => Some(TextureKind::Color),
            ResourceType::DepthStencil => Some(TextureKind::Depth),
            ResourceType::Number => None,
        }
    }
}

/// Description of a texture to create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    /// Array layers; shadow cascades live in one layered texture.
    pub layers: u32,
}

/// Attachments and extent of a render target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderTargetDesc {
    pub attachments: Vec<TextureHandle>,
    pub width: u32,
    pub height: u32,
}

/// Clear values applied when a render pass begins. `None` loads existing contents.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClearValues {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
}

/// Parameters for [`GpuDevice::begin_render`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderPassBegin {
    pub target: RenderTargetHandle,
    /// Array layer of layered attachments to render into.
    pub layer: u32,
    pub clear: ClearValues,
}

/// A single draw inside an open render pass.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCommand {
    pub shader: ShaderHandle,
    pub vertices: Range<u32>,
    pub indices: Option<Range<u32>>,
    pub instance_id: u32,
    pub transform: Mat4,
    pub color: [f32; 4],
    pub texture: Option<TextureHandle>,
    /// Scissor mask identifier; `None` draws unclipped.
    pub clip_mask: Option<u32>,
}

impl DrawCommand {
    pub fn new(shader: ShaderHandle, vertices: Range<u32>) -> Self {
        Self {
            shader,
            vertices,
            indices: None,
            instance_id: 0,
            transform: Mat4::IDENTITY,
            color: [1.0; 4],
            texture: None,
            clip_mask: None,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }
}

/// Opaque GPU primitives consumed by the render graph and its passes.
///
/// Calls are made from a single thread in a fixed order: `begin_frame`, then any
/// number of `begin_render` / `draw` / `end_render` sequences, then `end_frame`.
/// Resizing happens strictly between frames.
pub trait GpuDevice {
    /// How many frames are in flight; sources hold one texture per slot.
    fn buffered_frame_count(&self) -> usize;

    /// The slot of the frame currently being recorded.
    fn current_frame_slot(&self) -> usize;

    /// Current window size in pixels.
    fn window_size(&self) -> (u32, u32);

    /// Recreates window-sized resources. Zero-sized dimensions are ignored.
    fn resize_window(&mut self, width: u32, height: u32);

    /// The window's color or depth/stencil buffer for `frame_slot`.
    fn window_attachment(
        &mut self,
        resource_type: ResourceType,
        frame_slot: usize,
    ) -> Result<TextureHandle, DeviceError>;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, DeviceError>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc>;

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDesc,
    ) -> Result<RenderTargetHandle, DeviceError>;

    fn destroy_render_target(&mut self, target: RenderTargetHandle);

    fn acquire_shader(&mut self, name: &str) -> Result<ShaderHandle, DeviceError>;

    fn release_shader(&mut self, shader: ShaderHandle);

    fn begin_frame(&mut self) -> Result<(), DeviceError>;

    fn end_frame(&mut self) -> Result<(), DeviceError>;

    /// Discards everything recorded since `begin_frame`; nothing is presented.
    fn abort_frame(&mut self);

    fn begin_render(&mut self, begin: &RenderPassBegin) -> Result<(), DeviceError>;

    fn draw(&mut self, draw: &DrawCommand) -> Result<(), DeviceError>;

    fn end_render(&mut self) -> Result<(), DeviceError>;
}
