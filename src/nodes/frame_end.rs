//! Tail of every graph: the consumer of the backbuffer chain.

use std::any::Any;

use crate::render_graph::{ExecuteContext, NodeSetup, RenderNode, ResourceType, Result};

pub const TYPE_NAME: &str = "frame_end";

/// Consumes the final color buffer. Presentation itself happens in
/// [`GpuDevice::end_frame`](crate::render_graph::GpuDevice::end_frame).
#[derive(Debug, Default)]
pub struct FrameEndPass;

pub fn create(setup: &mut NodeSetup, _config: &str) -> Result<Box<dyn RenderNode>> {
    setup.add_typed_sink("colorbuffer", ResourceType::Texture)?;
    Ok(Box::new(FrameEndPass))
}

impl RenderNode for FrameEndPass {
    fn execute(&mut self, _ctx: &mut ExecuteContext) -> Result<()> {
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
