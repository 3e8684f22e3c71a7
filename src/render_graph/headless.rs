//! A CPU-only [`GpuDevice`] that tracks resources and records commands.

use std::collections::{HashMap, HashSet};

use crate::render_graph::device::{
    ClearValues, DrawCommand, GpuDevice, RenderPassBegin, RenderTargetDesc, RenderTargetHandle,
    ShaderHandle, TextureDesc, TextureKind,
};
use crate::render_graph::error::DeviceError;
use crate::render_graph::{ResourceType, TextureHandle};

/// A command recorded by [`HeadlessDevice`].
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCommand {
    BeginFrame { slot: usize },
    BeginRender {
        target: RenderTargetHandle,
        layer: u32,
        clear: ClearValues,
    },
    Draw(DrawCommand),
    EndRender,
    EndFrame { slot: usize },
    AbortFrame { slot: usize },
}

/// A device with no GPU behind it.
///
/// Window buffers keep the same handles across resizes; only their recorded
/// dimensions change. Every live texture, render target, and shader acquisition is
/// tracked so tests can check that the graph releases what it creates.
#[derive(Debug)]
pub struct HeadlessDevice {
    width: u32,
    height: u32,
    frame_count: usize,
    frame_slot: usize,
    next_id: u32,
    window_color: Vec<TextureHandle>,
    window_depth: Vec<TextureHandle>,
    textures: HashMap<TextureHandle, TextureDesc>,
    render_targets: HashMap<RenderTargetHandle, RenderTargetDesc>,
    registered_shaders: HashSet<String>,
    shaders: HashMap<ShaderHandle, String>,
    open_pass: bool,
    commands: Vec<DeviceCommand>,
}

impl HeadlessDevice {
    /// Creates a device with three buffered frames and every built-in shader registered.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_frame_count(width, height, 3)
    }

    pub fn with_frame_count(width: u32, height: u32, frame_count: usize) -> Self {
        let mut device = Self {
            width,
            height,
            frame_count: frame_count.max(1),
            frame_slot: 0,
            next_id: 1,
            window_color: Vec::new(),
            window_depth: Vec::new(),
            textures: HashMap::new(),
            render_targets: HashMap::new(),
            registered_shaders: crate::nodes::BUILTIN_SHADERS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            shaders: HashMap::new(),
            open_pass: false,
            commands: Vec::new(),
        };
        for slot in 0..device.frame_count {
            let color = device.insert_texture(window_desc(TextureKind::Color, slot, width, height));
            let depth = device.insert_texture(window_desc(TextureKind::Depth, slot, width, height));
            device.window_color.push(color);
            device.window_depth.push(depth);
        }
        device
    }

    pub fn register_shader(&mut self, name: &str) {
        self.registered_shaders.insert(name.to_string());
    }

    pub fn unregister_shader(&mut self, name: &str) {
        self.registered_shaders.remove(name);
    }

    /// Textures created through [`GpuDevice::create_texture`] and not yet destroyed.
    pub fn live_texture_count(&self) -> usize {
        self.textures.len() - self.window_color.len() - self.window_depth.len()
    }

    pub fn live_render_target_count(&self) -> usize {
        self.render_targets.len()
    }

    pub fn live_shader_count(&self) -> usize {
        self.shaders.len()
    }

    pub fn render_target_desc(&self, target: RenderTargetHandle) -> Option<&RenderTargetDesc> {
        self.render_targets.get(&target)
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    fn insert_texture(&mut self, desc: TextureDesc) -> TextureHandle {
        let handle = TextureHandle(self.next_id);
        self.next_id += 1;
        self.textures.insert(handle, desc);
        handle
    }

    fn check_slot(&self, slot: usize) -> Result<(), DeviceError> {
        if slot < self.frame_count {
            Ok(())
        } else {
            Err(DeviceError::FrameSlotOutOfRange {
                slot,
                count: self.frame_count,
            })
        }
    }
}

fn window_desc(kind: TextureKind, slot: usize, width: u32, height: u32) -> TextureDesc {
    let label = match kind {
        TextureKind::Color => format!("window color {}", slot),
        TextureKind::Depth => format!("window depth {}", slot),
    };
    TextureDesc {
        label,
        kind,
        width,
        height,
        layers: 1,
    }
}

impl GpuDevice for HeadlessDevice {
    fn buffered_frame_count(&self) -> usize {
        self.frame_count
    }

    fn current_frame_slot(&self) -> usize {
        self.frame_slot
    }

    fn window_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize_window(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.width = width;
        self.height = height;
        for handle in self.window_color.iter().chain(self.window_depth.iter()) {
            if let Some(desc) = self.textures.get_mut(handle) {
                desc.width = width;
                desc.height = height;
            }
        }
    }

    fn window_attachment(
        &mut self,
        resource_type: ResourceType,
        frame_slot: usize,
    ) -> Result<TextureHandle, DeviceError> {
        self.check_slot(frame_slot)?;
        match resource_type {
            ResourceType::Texture => Ok(self.window_color[frame_slot]),
            ResourceType::DepthStencil => Ok(self.window_depth[frame_slot]),
            ResourceType::Number => Err(DeviceError::NoWindowAttachment(resource_type)),
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, DeviceError> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(DeviceError::TextureCreation {
                label: desc.label.clone(),
                reason: "zero-sized extent".to_string(),
            });
        }
        Ok(self.insert_texture(desc.clone()))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.window_color.contains(&texture) || self.window_depth.contains(&texture) {
            return;
        }
        self.textures.remove(&texture);
    }

    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(&texture).cloned()
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDesc,
    ) -> Result<RenderTargetHandle, DeviceError> {
        if desc.attachments.is_empty() {
            return Err(DeviceError::InvalidRenderTarget);
        }
        for attachment in &desc.attachments {
            let texture = self
                .textures
                .get(attachment)
                .ok_or(DeviceError::UnknownTexture(*attachment))?;
            if texture.width != desc.width || texture.height != desc.height {
                return Err(DeviceError::InvalidRenderTarget);
            }
        }
        let handle = RenderTargetHandle(self.next_id);
        self.next_id += 1;
        self.render_targets.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        self.render_targets.remove(&target);
    }

    fn acquire_shader(&mut self, name: &str) -> Result<ShaderHandle, DeviceError> {
        if !self.registered_shaders.contains(name) {
            return Err(DeviceError::ShaderNotFound(name.to_string()));
        }
        let handle = ShaderHandle(self.next_id);
        self.next_id += 1;
        self.shaders.insert(handle, name.to_string());
        Ok(handle)
    }

    fn release_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader);
    }

    fn begin_frame(&mut self) -> Result<(), DeviceError> {
        self.commands.push(DeviceCommand::BeginFrame {
            slot: self.frame_slot,
        });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), DeviceError> {
        if self.open_pass {
            return Err(DeviceError::RenderPassAlreadyOpen);
        }
        self.commands.push(DeviceCommand::EndFrame {
            slot: self.frame_slot,
        });
        self.frame_slot = (self.frame_slot + 1) % self.frame_count;
        Ok(())
    }

    fn abort_frame(&mut self) {
        self.open_pass = false;
        self.commands.push(DeviceCommand::AbortFrame {
            slot: self.frame_slot,
        });
    }

    fn begin_render(&mut self, begin: &RenderPassBegin) -> Result<(), DeviceError> {
        if self.open_pass {
            return Err(DeviceError::RenderPassAlreadyOpen);
        }
        if !self.render_targets.contains_key(&begin.target) {
            return Err(DeviceError::UnknownRenderTarget);
        }
        self.open_pass = true;
        self.commands.push(DeviceCommand::BeginRender {
            target: begin.target,
            layer: begin.layer,
            clear: begin.clear,
        });
        Ok(())
    }

    fn draw(&mut self, draw: &DrawCommand) -> Result<(), DeviceError> {
        if !self.open_pass {
            return Err(DeviceError::NoRenderPass);
        }
        if !self.shaders.contains_key(&draw.shader) {
            return Err(DeviceError::UnknownShader);
        }
        self.commands.push(DeviceCommand::Draw(draw.clone()));
        Ok(())
    }

    fn end_render(&mut self) -> Result<(), DeviceError> {
        if !self.open_pass {
            return Err(DeviceError::NoRenderPass);
        }
        self.open_pass = false;
        self.commands.push(DeviceCommand::EndRender);
        Ok(())
    }
}
