//! Head of every graph: publishes the window's buffers.

use std::any::Any;

use crate::render_graph::{ExecuteContext, NodeSetup, RenderNode, ResourceType, Result, SourceOrigin};

pub const TYPE_NAME: &str = "frame_begin";

/// Publishes the window's `colorbuffer` and `depthbuffer` as sources. Does no GPU work.
#[derive(Debug, Default)]
pub struct FrameBeginPass;

pub fn create(setup: &mut NodeSetup, _config: &str) -> Result<Box<dyn RenderNode>> {
    setup
        .add_source("colorbuffer", ResourceType::Texture, SourceOrigin::Global)?
        .add_source("depthbuffer", ResourceType::DepthStencil, SourceOrigin::Global)?;
    Ok(Box::new(FrameBeginPass))
}

impl RenderNode for FrameBeginPass {
    fn execute(&mut self, _ctx: &mut ExecuteContext) -> Result<()> {
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
