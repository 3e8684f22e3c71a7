//! [`GpuDevice`] on top of wgpu.
//!
//! Handles map onto wgpu objects held here. The window's color buffer is the
//! surface texture acquired in `begin_frame`, so every window color handle resolves
//! to whatever surface image is current; window depth buffers are real textures
//! recreated on resize under the same handles.
//!
//! Draws carry no vertex buffers. The built-in shaders generate their geometry from
//! the vertex index and read a per-draw uniform block (transform, color, instance)
//! from one buffer bound with dynamic offsets.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use log::{debug, warn};

use crate::gpu::GpuContext;
use crate::nodes::{FORWARD_SHADER, SHADOW_SHADER, SKYBOX_SHADER, UI_SHADER};
use crate::render_graph::{
    DeviceError, DrawCommand, GpuDevice, RenderPassBegin, RenderTargetDesc, RenderTargetHandle,
    ResourceType, ShaderHandle, TextureDesc, TextureHandle, TextureKind,
};

/// Frames the graph keeps per-slot resources for.
pub const FRAMES_IN_FLIGHT: usize = 3;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const UNIFORM_STRIDE: u64 = 256;
const MAX_DRAWS_PER_FRAME: u32 = 4096;

/// Per-draw uniform block shared by every built-in shader.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DrawUniforms {
    transform: [[f32; 4]; 4],
    color: [f32; 4],
    params: [u32; 4],
}

fn builtin_shader_source(name: &str) -> Option<&'static str> {
    match name {
        SKYBOX_SHADER => Some(include_str!("shaders/skybox.wgsl")),
        SHADOW_SHADER => Some(include_str!("shaders/shadow.wgsl")),
        FORWARD_SHADER => Some(include_str!("shaders/forward.wgsl")),
        UI_SHADER => Some(include_str!("shaders/ui.wgsl")),
        _ => None,
    }
}

enum Backing {
    /// The current surface image.
    Surface,
    Owned(wgpu::Texture),
}

struct DeviceTexture {
    desc: TextureDesc,
    backing: Backing,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    shader: String,
    color_format: Option<wgpu::TextureFormat>,
    depth: bool,
}

struct OpenPass {
    pass: wgpu::RenderPass<'static>,
    color_format: Option<wgpu::TextureFormat>,
    depth: bool,
}

/// A frame being recorded. `pass` is declared first so it drops before the encoder.
struct FrameInFlight {
    pass: Option<OpenPass>,
    encoder: wgpu::CommandEncoder,
    surface_texture: wgpu::SurfaceTexture,
    draw_count: u32,
}

/// The real-rendering [`GpuDevice`].
///
/// # Example
///
/// ```ignore
/// let gpu = GpuContext::new(window.clone())?;
/// let mut device = WgpuDevice::new(gpu);
/// graph.finalize(&mut device)?;
/// ```
pub struct WgpuDevice {
    gpu: GpuContext,
    frame_slot: usize,
    next_id: u32,
    textures: HashMap<TextureHandle, DeviceTexture>,
    window_color: Vec<TextureHandle>,
    window_depth: Vec<TextureHandle>,
    render_targets: HashMap<RenderTargetHandle, RenderTargetDesc>,
    shaders: HashMap<ShaderHandle, String>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    frame: Option<FrameInFlight>,
}

impl WgpuDevice {
    pub fn new(gpu: GpuContext) -> Self {
        let bind_group_layout =
            gpu.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Draw Bind Group Layout"),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: wgpu::BufferSize::new(
                                std::mem::size_of::<DrawUniforms>() as u64,
                            ),
                        },
                        count: None,
                    }],
                });

        let uniform_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Draw Uniforms"),
            size: UNIFORM_STRIDE * u64::from(MAX_DRAWS_PER_FRAME),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Draw Bind Group"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &uniform_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniforms>() as u64),
                }),
            }],
        });

        let pipeline_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Draw Pipeline Layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let mut device = Self {
            gpu,
            frame_slot: 0,
            next_id: 1,
            textures: HashMap::new(),
            window_color: Vec::new(),
            window_depth: Vec::new(),
            render_targets: HashMap::new(),
            shaders: HashMap::new(),
            pipelines: HashMap::new(),
            pipeline_layout,
            uniform_buffer,
            bind_group,
            frame: None,
        };

        let (width, height) = (device.gpu.width(), device.gpu.height());
        for slot in 0..FRAMES_IN_FLIGHT {
            let color = device.next_handle();
            device.textures.insert(
                TextureHandle(color),
                DeviceTexture {
                    desc: window_desc(TextureKind::Color, slot, width, height),
                    backing: Backing::Surface,
                },
            );
            device.window_color.push(TextureHandle(color));

            let desc = window_desc(TextureKind::Depth, slot, width, height);
            let depth = device.next_handle();
            let texture = device.allocate(&desc);
            device.textures.insert(
                TextureHandle(depth),
                DeviceTexture {
                    desc,
                    backing: Backing::Owned(texture),
                },
            );
            device.window_depth.push(TextureHandle(depth));
        }
        device
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    fn next_handle(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn format_for(&self, kind: TextureKind) -> wgpu::TextureFormat {
        match kind {
            TextureKind::Color => self.gpu.config.format,
            TextureKind::Depth => DEPTH_FORMAT,
        }
    }

    fn allocate(&self, desc: &TextureDesc) -> wgpu::Texture {
        self.gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.format_for(desc.kind),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        })
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

/// A single-layer view for rendering into `layer`.
fn layer_view(texture: &wgpu::Texture, layer: u32) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: None,
        dimension: Some(wgpu::TextureViewDimension::D2),
        base_array_layer: layer,
        array_layer_count: Some(1),
        ..Default::default()
    })
}

fn build_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    source: &str,
    key: &PipelineKey,
) -> wgpu::RenderPipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&key.shader),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let targets: Vec<Option<wgpu::ColorTargetState>> = key
        .color_format
        .map(|format| wgpu::ColorTargetState {
            format,
            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
            write_mask: wgpu::ColorWrites::ALL,
        })
        .into_iter()
        .map(Some)
        .collect();

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&key.shader),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: (!targets.is_empty()).then(|| wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs"),
            targets: &targets,
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: key.depth.then(|| wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

impl GpuDevice for WgpuDevice {
    fn buffered_frame_count(&self) -> usize {
        FRAMES_IN_FLIGHT
    }

    fn current_frame_slot(&self) -> usize {
        self.frame_slot
    }

    fn window_size(&self) -> (u32, u32) {
        (self.gpu.width(), self.gpu.height())
    }

    fn resize_window(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.gpu.resize(width, height);

        for handle in self.window_color.clone() {
            if let Some(texture) = self.textures.get_mut(&handle) {
                texture.desc.width = width;
                texture.desc.height = height;
            }
        }
        for (slot, handle) in self.window_depth.clone().into_iter().enumerate() {
            let desc = window_desc(TextureKind::Depth, slot, width, height);
            let texture = self.allocate(&desc);
            let old = self.textures.insert(
                handle,
                DeviceTexture {
                    desc,
                    backing: Backing::Owned(texture),
                },
            );
            if let Some(DeviceTexture {
                backing: Backing::Owned(old),
                ..
            }) = old
            {
                old.destroy();
            }
        }
        debug!("Window buffers recreated at {}x{}", width, height);
    }

    fn window_attachment(
        &mut self,
        resource_type: ResourceType,
        frame_slot: usize,
    ) -> Result<TextureHandle, DeviceError> {
        let handles = match resource_type {
            ResourceType::Texture => &self.window_color,
            ResourceType::DepthStencil => &self.window_depth,
            ResourceType::Number => return Err(DeviceError::NoWindowAttachment(resource_type)),
        };
        handles
            .get(frame_slot)
            .copied()
            .ok_or(DeviceError::FrameSlotOutOfRange {
                slot: frame_slot,
                count: FRAMES_IN_FLIGHT,
            })
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, DeviceError> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(DeviceError::TextureCreation {
                label: desc.label.clone(),
                reason: "zero-sized extent".to_string(),
            });
        }
        let texture = self.allocate(desc);
        let handle = TextureHandle(self.next_handle());
        self.textures.insert(
            handle,
            DeviceTexture {
                desc: desc.clone(),
                backing: Backing::Owned(texture),
            },
        );
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.window_color.contains(&texture) || self.window_depth.contains(&texture) {
            return;
        }
        if let Some(DeviceTexture {
            backing: Backing::Owned(texture),
            ..
        }) = self.textures.remove(&texture)
        {
            texture.destroy();
        }
    }

    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(&texture).map(|t| t.desc.clone())
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDesc,
    ) -> Result<RenderTargetHandle, DeviceError> {
        if desc.attachments.is_empty() {
            return Err(DeviceError::InvalidRenderTarget);
        }
        let mut colors = 0;
        for attachment in &desc.attachments {
            let texture = self
                .textures
                .get(attachment)
                .ok_or(DeviceError::UnknownTexture(*attachment))?;
            if texture.desc.width != desc.width || texture.desc.height != desc.height {
                return Err(DeviceError::InvalidRenderTarget);
            }
            if texture.desc.kind == TextureKind::Color {
                colors += 1;
            }
        }
        if colors > 1 {
            return Err(DeviceError::Unsupported("more than one color attachment"));
        }
        let handle = RenderTargetHandle(self.next_handle());
        self.render_targets.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        self.render_targets.remove(&target);
    }

    fn acquire_shader(&mut self, name: &str) -> Result<ShaderHandle, DeviceError> {
        if builtin_shader_source(name).is_none() {
            return Err(DeviceError::ShaderNotFound(name.to_string()));
        }
        let handle = ShaderHandle(self.next_handle());
        self.shaders.insert(handle, name.to_string());
        Ok(handle)
    }

    fn release_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader);
    }

    fn begin_frame(&mut self) -> Result<(), DeviceError> {
        if self.frame.is_some() {
            warn!("begin_frame called with a frame in flight; discarding it");
            self.frame = None;
        }
        let surface_texture = match self.gpu.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(e @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                self.gpu.reconfigure();
                return Err(DeviceError::Surface(e.to_string()));
            }
            Err(e) => return Err(DeviceError::Surface(e.to_string())),
        };
        let encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        self.frame = Some(FrameInFlight {
            pass: None,
            encoder,
            surface_texture,
            draw_count: 0,
        });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), DeviceError> {
        let frame = self.frame.take().ok_or(DeviceError::NoFrame)?;
        if frame.pass.is_some() {
            return Err(DeviceError::RenderPassAlreadyOpen);
        }
        self.gpu.queue.submit(std::iter::once(frame.encoder.finish()));
        frame.surface_texture.present();
        self.frame_slot = (self.frame_slot + 1) % FRAMES_IN_FLIGHT;
        Ok(())
    }

    fn abort_frame(&mut self) {
        self.frame = None;
    }

    fn begin_render(&mut self, begin: &RenderPassBegin) -> Result<(), DeviceError> {
        let frame = self.frame.as_mut().ok_or(DeviceError::NoFrame)?;
        if frame.pass.is_some() {
            return Err(DeviceError::RenderPassAlreadyOpen);
        }
        let desc = self
            .render_targets
            .get(&begin.target)
            .ok_or(DeviceError::UnknownRenderTarget)?;

        let mut color: Option<(wgpu::TextureView, wgpu::TextureFormat)> = None;
        let mut depth: Option<wgpu::TextureView> = None;
        for handle in &desc.attachments {
            let texture = self
                .textures
                .get(handle)
                .ok_or(DeviceError::UnknownTexture(*handle))?;
            match (&texture.backing, texture.desc.kind) {
                (Backing::Surface, _) => {
                    let view = frame
                        .surface_texture
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default());
                    color = Some((view, self.gpu.config.format));
                }
                (Backing::Owned(owned), TextureKind::Color) => {
                    color = Some((layer_view(owned, begin.layer), self.gpu.config.format));
                }
                (Backing::Owned(owned), TextureKind::Depth) => {
                    depth = Some(layer_view(owned, begin.layer));
                }
            }
        }

        let color_load = match begin.clear.color {
            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: f64::from(r),
                g: f64::from(g),
                b: f64::from(b),
                a: f64::from(a),
            }),
            None => wgpu::LoadOp::Load,
        };
        let depth_load = match begin.clear.depth {
            Some(value) => wgpu::LoadOp::Clear(value),
            None => wgpu::LoadOp::Load,
        };

        let color_format = color.as_ref().map(|(_, format)| *format);
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color
            .as_ref()
            .map(|(view, _)| wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })
            .into_iter()
            .map(Some)
            .collect();

        let pass = frame
            .encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Kiln Render Pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: depth_load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            })
            .forget_lifetime();

        frame.pass = Some(OpenPass {
            pass,
            color_format,
            depth: depth.is_some(),
        });
        Ok(())
    }

    fn draw(&mut self, draw: &DrawCommand) -> Result<(), DeviceError> {
        let frame = self.frame.as_mut().ok_or(DeviceError::NoFrame)?;
        let open = frame.pass.as_mut().ok_or(DeviceError::NoRenderPass)?;
        if draw.indices.is_some() {
            return Err(DeviceError::Unsupported("indexed draws need bound index buffers"));
        }
        if frame.draw_count >= MAX_DRAWS_PER_FRAME {
            return Err(DeviceError::TooManyDraws {
                limit: MAX_DRAWS_PER_FRAME,
            });
        }
        let shader = self
            .shaders
            .get(&draw.shader)
            .ok_or(DeviceError::UnknownShader)?;

        let key = PipelineKey {
            shader: shader.clone(),
            color_format: open.color_format,
            depth: open.depth,
        };
        let pipeline = match self.pipelines.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let source = builtin_shader_source(&entry.key().shader)
                    .ok_or_else(|| DeviceError::ShaderNotFound(entry.key().shader.clone()))?;
                let pipeline =
                    build_pipeline(&self.gpu.device, &self.pipeline_layout, source, entry.key());
                debug!("Built pipeline for {:?}", entry.key());
                entry.insert(pipeline)
            }
        };

        let uniforms = DrawUniforms {
            transform: draw.transform.to_cols_array_2d(),
            color: draw.color,
            params: [draw.instance_id, draw.clip_mask.unwrap_or(0), 0, 0],
        };
        let offset = u64::from(frame.draw_count) * UNIFORM_STRIDE;
        self.gpu
            .queue
            .write_buffer(&self.uniform_buffer, offset, bytemuck::bytes_of(&uniforms));
        frame.draw_count += 1;

        open.pass.set_pipeline(pipeline);
        open.pass.set_bind_group(0, &self.bind_group, &[offset as u32]);
        open.pass.draw(draw.vertices.clone(), 0..1);
        Ok(())
    }

    fn end_render(&mut self) -> Result<(), DeviceError> {
        let frame = self.frame.as_mut().ok_or(DeviceError::NoFrame)?;
        frame.pass.take().ok_or(DeviceError::NoRenderPass)?;
        Ok(())
    }
}
