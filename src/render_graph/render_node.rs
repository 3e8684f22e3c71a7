//! The lifecycle contract every pass implements.

use std::any::Any;

use bumpalo::Bump;

use crate::render_graph::device::GpuDevice;
use crate::render_graph::error::Result;
use crate::render_graph::{FrameData, RenderTarget, ResourceType, Sink, Source, TextureHandle};

/// Context passed to [`RenderNode::initialize`] and [`RenderNode::load_resources`].
pub struct NodeContext<'a> {
    pub device: &'a mut dyn GpuDevice,
    /// Name of the node being initialized or loaded.
    pub name: &'a str,
    /// The node's sinks, already bound and resolved.
    pub sinks: &'a [Sink],
    /// The node's own sources.
    pub sources: &'a [Source],
    pub window_size: (u32, u32),
}

/// Context passed to [`RenderNode::execute`] once per frame.
///
/// Everything here is resolved ahead of time: sinks carry copies of their bound
/// source values and render targets are indexed by frame slot, so executing a pass
/// never performs a name lookup.
pub struct ExecuteContext<'a> {
    pub device: &'a mut dyn GpuDevice,
    pub frame: &'a FrameData,
    pub name: &'a str,
    pub frame_slot: usize,
    /// Render target for this frame slot, if the node declared attachments.
    pub render_target: Option<&'a RenderTarget>,
    pub sinks: &'a [Sink],
}

impl ExecuteContext<'_> {
    /// Scratch memory valid until the end of the frame.
    pub fn allocator(&self) -> &Bump {
        self.frame.allocator()
    }

    /// Texture bound to sink `index` for the current frame slot.
    pub fn sink_texture(&self, index: usize) -> Option<TextureHandle> {
        self.sinks.get(index)?.texture(self.frame_slot)
    }

    /// Scalar bound to sink `index`.
    pub fn sink_number(&self, index: usize) -> Option<u64> {
        self.sinks.get(index).map(|sink| sink.value.number)
    }
}

/// A unit of GPU work in a [`RenderGraph`](crate::render_graph::RenderGraph).
///
/// Instances are produced by a factory registered in a
/// [`NodeFactoryRegistry`](crate::render_graph::NodeFactoryRegistry). The graph drives
/// the lifecycle in a fixed order:
///
/// 1. `initialize` once, during finalize, in declaration order
/// 2. `load_resources` once, after finalize
/// 3. `execute` every frame while the node is enabled
/// 4. `destroy` exactly once, when the graph is destroyed
pub trait RenderNode: Any {
    fn initialize(&mut self, _ctx: &mut NodeContext) -> Result<()> {
        Ok(())
    }

    /// Acquires shaders, default textures, and CPU-side buffers.
    fn load_resources(&mut self, _ctx: &mut NodeContext) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext) -> Result<()>;

    /// Releases everything the node acquired. Called exactly once.
    fn destroy(&mut self, _device: &mut dyn GpuDevice) {}

    /// Accessor for nodes that declare [`SelfOwned`](crate::render_graph::SourceOrigin::SelfOwned)
    /// sources. Declaring such a source without providing this fails finalize.
    fn self_owned_attachments(&mut self) -> Option<&mut dyn SelfOwnedAttachments> {
        None
    }

    /// Typed access for pushing per-frame data from the application.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Texture accessor for passes that own the textures behind their sources.
pub trait SelfOwnedAttachments {
    /// Returns (creating if needed) the texture for `frame_slot`.
    fn attachment_texture_get(
        &mut self,
        device: &mut dyn GpuDevice,
        resource_type: ResourceType,
        frame_slot: usize,
    ) -> Result<TextureHandle>;

    /// Recreates the owned textures for a new window size. Passes with a fixed
    /// resolution keep the default, which does nothing.
    fn attachment_textures_regenerate(
        &mut self,
        _device: &mut dyn GpuDevice,
        _width: u32,
        _height: u32,
    ) -> Result<()> {
        Ok(())
    }
}
