//! Declarative render graph with named, typed resource ports.
//!
//! A graph is an ordered list of passes ("nodes"). Each node declares sinks it reads
//! and sources it produces; sinks are bound to sources by name, and
//! [`RenderGraph::finalize`] turns those names into handles once, before any frame
//! runs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │ frame_begin │───▶│   skybox    │───▶│ standard_ui │───▶│  frame_end  │
//! │ color/depth │    │ color(pass) │    │ color(pass) │    │ (backbuffer │
//! │  (window)   │    │             │    │             │    │  consumer)  │
//! └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘
//!                                              ▲
//!                    ┌─────────────┐           │
//!                    │   shadow    │ ──────────┘ (self-owned depth array)
//!                    └─────────────┘
//! ```
//!
//! Sources come in three origins:
//!
//! - [`SourceOrigin::Global`]: the window's color or depth buffer
//! - [`SourceOrigin::SelfOwned`]: a texture the pass creates itself (a shadow atlas)
//! - [`SourceOrigin::OtherPass`]: whatever the node's same-named sink is bound to
//!
//! # Lifecycle
//!
//! [`finalize`](RenderGraph::finalize) → [`load_resources`](RenderGraph::load_resources)
//! → [`execute_frame`](RenderGraph::execute_frame) every frame, with
//! [`on_resize`](RenderGraph::on_resize) between frames as needed, and finally
//! [`destroy`](RenderGraph::destroy).

mod config;
mod device;
mod error;
mod factory;
mod frame;
mod graph;
mod headless;
mod link;
mod node;
mod render_node;
mod render_target;
mod resource;

pub use config::{GraphConfig, LinkConfig, NodeConfig, SourceConfig, deserialize_config};
pub use device::{
    ClearValues, DrawCommand, GpuDevice, RenderPassBegin, RenderTargetDesc, RenderTargetHandle,
    ShaderHandle, TextureDesc, TextureKind,
};
pub use error::{ConfigError, DeviceError, ErrorKind, LinkError, RenderGraphError, Result};
pub use factory::{NodeFactoryFn, NodeFactoryRegistry};
pub use frame::FrameData;
pub use graph::{GraphState, RenderGraph};
pub use headless::{DeviceCommand, HeadlessDevice};
pub use node::{Node, NodeSetup};
pub use render_node::{ExecuteContext, NodeContext, RenderNode, SelfOwnedAttachments};
pub use render_target::{AttachmentConfig, RenderTarget};
pub use resource::{
    ResourceType, Sink, SinkValue, Source, SourceHandle, SourceOrigin, SourceOwner, SourceRef,
    TextureHandle,
};
