use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use kiln::nodes::{
    ForwardPass, MeshDraw, RenderDataItem, ShadowCaster, ShadowPass, StandardUiPass, UiRenderData,
};
use kiln::{
    Camera, ErrorKind, FrameData, GpuContext, GraphConfig, Mat4, NodeFactoryRegistry, Quat,
    RenderGraph, RenderGraphError, Vec3, WgpuDevice,
};

const DEMO_GRAPH: &str = r#"{
  "name": "demo",
  "nodes": [
    { "name": "frame_begin", "type": "frame_begin" },
    { "name": "shadow", "type": "shadow", "config": { "resolution": 1024, "cascade_count": 2 } },
    { "name": "skybox", "type": "skybox",
      "config": { "clear_color": [0.0, 0.0, 0.0, 1.0], "sky_color": [0.3, 0.5, 0.9, 1.0] },
      "links": [ { "sink": "colorbuffer", "source_node": "frame_begin", "source": "colorbuffer" } ] },
    { "name": "forward", "type": "forward",
      "links": [
        { "sink": "colorbuffer", "source_node": "skybox", "source": "colorbuffer" },
        { "sink": "depthbuffer", "source_node": "frame_begin", "source": "depthbuffer" },
        { "sink": "shadowmap", "source_node": "shadow", "source": "depthbuffer" } ] },
    { "name": "ui", "type": "standard_ui",
      "links": [ { "sink": "colorbuffer", "source_node": "forward", "source": "colorbuffer" } ] },
    { "name": "frame_end", "type": "frame_end",
      "links": [ { "sink": "colorbuffer", "source_node": "ui", "source": "colorbuffer" } ] }
  ]
}"#;

struct Renderer {
    window: Arc<Window>,
    device: WgpuDevice,
    graph: RenderGraph,
}

struct App {
    registry: NodeFactoryRegistry,
    renderer: Option<Renderer>,
    camera: Camera,
    frame: FrameData,
    last_frame: Instant,
}

impl Default for App {
    fn default() -> Self {
        Self {
            registry: NodeFactoryRegistry::with_builtin_nodes(),
            renderer: None,
            camera: Camera::new().at(0.0, 2.5, 6.0).looking_at(0.0, 0.0, 0.0),
            frame: FrameData::new(),
            last_frame: Instant::now(),
        }
    }
}

fn build_renderer(
    event_loop: &ActiveEventLoop,
    registry: &NodeFactoryRegistry,
) -> Result<Renderer, Box<dyn std::error::Error>> {
    let window = Arc::new(event_loop.create_window(Window::default_attributes().with_title("kiln"))?);
    let gpu = GpuContext::new(window.clone())?;
    let mut device = WgpuDevice::new(gpu);

    let config = GraphConfig::from_json(DEMO_GRAPH)?;
    let mut graph = RenderGraph::from_config(&config, registry)?;
    if let Err(e) = graph
        .finalize(&mut device)
        .and_then(|()| graph.load_resources(&mut device))
    {
        graph.destroy(&mut device);
        return Err(e.into());
    }
    Ok(Renderer {
        window,
        device,
        graph,
    })
}

/// Pushes this frame's scene into the passes that draw it.
fn submit_scene(graph: &mut RenderGraph, camera: &Camera, aspect: f32, elapsed: f32) {
    let spin = Quat::from_rotation_y(elapsed * 0.6);
    let cubes = [
        (Mat4::from_scale(Vec3::new(8.0, 0.2, 8.0)), [0.55, 0.55, 0.5, 1.0]),
        (
            Mat4::from_rotation_translation(spin, Vec3::new(-1.2, 0.6, 0.0)),
            [0.85, 0.3, 0.25, 1.0],
        ),
        (
            Mat4::from_rotation_translation(spin.inverse(), Vec3::new(1.2, 0.6, 0.0)),
            [0.25, 0.55, 0.85, 1.0],
        ),
    ];

    if let Some(shadow) = graph.pass_mut::<ShadowPass>("shadow") {
        let light = Mat4::orthographic_rh(-6.0, 6.0, -6.0, 6.0, 0.1, 30.0)
            * Mat4::look_at_rh(Vec3::new(4.0, 10.0, 3.0), Vec3::ZERO, Vec3::Y);
        shadow.set_cascades(&[light, light]);
        for (transform, _) in &cubes {
            shadow.submit(ShadowCaster {
                vertices: 0..36,
                indices: None,
                transform: *transform,
            });
        }
    }

    if let Some(forward) = graph.pass_mut::<ForwardPass>("forward") {
        forward.set_view(camera.view_data(aspect));
        for (transform, color) in cubes {
            forward.submit(MeshDraw::new(0..36, transform).with_color(color));
        }
    }

    if let Some(ui) = graph.pass_mut::<StandardUiPass>("ui") {
        let mut data = UiRenderData::new();
        data.push(
            RenderDataItem::quad(
                1,
                Mat4::from_scale_rotation_translation(
                    Vec3::new(220.0, 36.0, 1.0),
                    Quat::IDENTITY,
                    Vec3::new(16.0, 16.0, 0.0),
                ),
            )
            .with_color([0.05, 0.05, 0.08, 0.75]),
        );
        ui.submit(data);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() {
            return;
        }
        match build_renderer(event_loop, &self.registry) {
            Ok(renderer) => {
                info!("Render graph ready");
                renderer.window.request_redraw();
                self.renderer = Some(renderer);
            }
            Err(e) => {
                error!("Failed to start renderer: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                renderer.graph.destroy(&mut renderer.device);
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Err(e) = renderer
                    .graph
                    .on_resize(&mut renderer.device, size.width, size.height)
                {
                    error!("Resize failed: {}", e);
                    renderer.graph.destroy(&mut renderer.device);
                    event_loop.exit();
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = now.duration_since(self.last_frame).as_secs_f32();
                self.last_frame = now;
                self.frame.advance(dt);

                let (width, height) = renderer.graph.window_size();
                let aspect = width as f32 / height.max(1) as f32;
                submit_scene(
                    &mut renderer.graph,
                    &self.camera,
                    aspect,
                    self.frame.elapsed(),
                );

                match renderer.graph.execute_frame(&mut renderer.device, &self.frame) {
                    Ok(()) => {}
                    Err(e @ RenderGraphError::Execution { .. }) => {
                        warn!("Skipping frame {}: {}", self.frame.frame_number(), e);
                    }
                    Err(e) if e.kind() == ErrorKind::ResourceAcquisition => {
                        warn!("Frame {} not rendered: {}", self.frame.frame_number(), e);
                    }
                    Err(e) => {
                        error!("Render graph unusable: {}", e);
                        renderer.graph.destroy(&mut renderer.device);
                        event_loop.exit();
                        return;
                    }
                }
                renderer.window.request_redraw();
            }
            _ => {}
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::default();
    event_loop.run_app(&mut app)?;
    Ok(())
}
