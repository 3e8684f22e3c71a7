//! # Kiln
//!
//! **A declarative, reconfigurable render graph for wgpu.**
//!
//! A frame is described as an ordered list of passes connected by named, typed
//! ports. Passes are created by name through a factory registry, wired together by
//! name (in code or from JSON), and linked once into direct handles before the
//! first frame runs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kiln::render_graph::{FrameData, HeadlessDevice, NodeFactoryRegistry, RenderGraph};
//!
//! # fn main() -> kiln::render_graph::Result<()> {
//! let registry = NodeFactoryRegistry::with_builtin_nodes();
//! let mut device = HeadlessDevice::new(1280, 720);
//!
//! let mut graph = RenderGraph::with_window_buffers("main");
//! graph.create_node(&registry, "frame_begin", "frame_begin", "")?;
//! graph.create_node(&registry, "skybox", "skybox", r#"{ "sky_color": [0.3, 0.5, 0.9, 1.0] }"#)?;
//! graph.create_node(&registry, "frame_end", "frame_end", "")?;
//! graph.set_sink_linkage("skybox", "colorbuffer", Some("frame_begin"), "colorbuffer")?;
//! graph.set_sink_linkage("frame_end", "colorbuffer", Some("skybox"), "colorbuffer")?;
//!
//! graph.finalize(&mut device)?;
//! graph.load_resources(&mut device)?;
//!
//! let mut frame = FrameData::new();
//! frame.advance(1.0 / 60.0);
//! graph.execute_frame(&mut device, &frame)?;
//!
//! graph.on_resize(&mut device, 1920, 1080)?;
//! graph.destroy(&mut device);
//! # Ok(())
//! # }
//! ```
//!
//! ## Philosophy
//!
//! - **Names at build time, handles at run time**: every lookup happens in `finalize`.
//! - **Passes own their contract**: a pass declares its ports, the graph wires them.
//! - **The GPU is a seam**: passes talk to a [`GpuDevice`](render_graph::GpuDevice), so
//!   the whole graph runs headless in tests.

mod camera;
mod gpu;
pub mod nodes;
pub mod render_graph;
mod wgpu_device;

pub use camera::Camera;
pub use gpu::GpuContext;
pub use render_graph::{
    DeviceError, ErrorKind, FrameData, GraphConfig, GraphState, GpuDevice, HeadlessDevice,
    NodeFactoryRegistry, RenderGraph, RenderGraphError, RenderNode,
};
pub use wgpu_device::{FRAMES_IN_FLIGHT, WgpuDevice};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
