//! Graph-owned node records and the setup surface factories populate.

use crate::render_graph::error::{LinkError, Result};
use crate::render_graph::render_target::{AttachmentConfig, RenderTarget};
use crate::render_graph::resource::{Sink, Source, find_sink, find_source};
use crate::render_graph::{RenderNode, ResourceType, SourceOrigin};

/// Declarations a factory makes while constructing a pass.
///
/// The graph hands one of these to the factory, then moves the declared ports into
/// the new [`Node`]. The factory never sees the graph itself.
#[derive(Debug)]
pub struct NodeSetup {
    name: String,
    pub(crate) sources: Vec<Source>,
    pub(crate) sinks: Vec<Sink>,
    pub(crate) attachments: Vec<AttachmentConfig>,
}

impl NodeSetup {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sources: Vec::new(),
            sinks: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// Name of the node being created.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares an output port.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique among this node's sources
    /// * `resource_type` - What the port carries
    /// * `origin` - Where its value comes from; an [`SourceOrigin::OtherPass`] source
    ///   needs a sink of the same name
    pub fn add_source(
        &mut self,
        name: &str,
        resource_type: ResourceType,
        origin: SourceOrigin,
    ) -> Result<&mut Self> {
        push_source(&self.name, &mut self.sources, Source::new(name, resource_type, origin))?;
        Ok(self)
    }

    /// Declares a scalar output carrying `value`.
    pub fn add_number_source(
        &mut self,
        name: &str,
        origin: SourceOrigin,
        value: u64,
    ) -> Result<&mut Self> {
        push_source(&self.name, &mut self.sources, Source::number(name, origin, value))?;
        Ok(self)
    }

    /// Declares an untyped input port that adopts its bound source's type.
    pub fn add_sink(&mut self, name: &str) -> Result<&mut Self> {
        push_sink(&self.name, &mut self.sinks, Sink::new(name))?;
        Ok(self)
    }

    /// Declares an input port that rejects sources of any other type at finalize.
    pub fn add_typed_sink(&mut self, name: &str, resource_type: ResourceType) -> Result<&mut Self> {
        push_sink(&self.name, &mut self.sinks, Sink::typed(name, resource_type))?;
        Ok(self)
    }

    /// Appends a render target attachment backed by the node source `source`.
    pub fn add_attachment(&mut self, source: &str) -> &mut Self {
        self.attachments.push(AttachmentConfig::new(source));
        self
    }
}

pub(crate) fn push_source(owner: &str, sources: &mut Vec<Source>, source: Source) -> Result<()> {
    if find_source(sources, &source.name).is_some() {
        return Err(LinkError::DuplicateSourceName {
            owner: owner.to_string(),
            source_name: source.name,
        }
        .into());
    }
    sources.push(source);
    Ok(())
}

pub(crate) fn push_sink(owner: &str, sinks: &mut Vec<Sink>, sink: Sink) -> Result<()> {
    if find_sink(sinks, &sink.name).is_some() {
        return Err(LinkError::DuplicateSinkName {
            node: owner.to_string(),
            sink: sink.name,
        }
        .into());
    }
    sinks.push(sink);
    Ok(())
}

/// One pass in the graph: its ports, its render targets, and its behavior.
pub struct Node {
    pub(crate) name: String,
    pub(crate) type_name: String,
    pub(crate) index: u32,
    pub(crate) sources: Vec<Source>,
    pub(crate) sinks: Vec<Sink>,
    pub(crate) attachments: Vec<AttachmentConfig>,
    pub(crate) render_targets: Vec<RenderTarget>,
    pub(crate) enabled: bool,
    pub(crate) pass: Box<dyn RenderNode>,
}

impl Node {
    pub(crate) fn new(
        setup: NodeSetup,
        type_name: &str,
        index: u32,
        pass: Box<dyn RenderNode>,
    ) -> Self {
        Self {
            name: setup.name,
            type_name: type_name.to_string(),
            index,
            sources: setup.sources,
            sinks: setup.sinks,
            attachments: setup.attachments,
            render_targets: Vec::new(),
            enabled: true,
            pass,
        }
    }

    /// Unique name within the graph.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The factory type this node was created from.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Position in declaration (and execution) order.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Outputs, in declaration order.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Inputs, in declaration order. Bound after finalize.
    pub fn sinks(&self) -> &[Sink] {
        &self.sinks
    }

    /// Looks up one of this node's sources by name.
    pub fn source(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Looks up one of this node's sinks by name.
    pub fn sink(&self, name: &str) -> Option<&Sink> {
        self.sinks.iter().find(|s| s.name == name)
    }

    pub fn attachments(&self) -> &[AttachmentConfig] {
        &self.attachments
    }

    /// One render target per buffered frame, empty until finalize.
    pub fn render_targets(&self) -> &[RenderTarget] {
        &self.render_targets
    }

    /// Whether the node executes this frame.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn has_self_owned_textures(&self) -> bool {
        self.sources
            .iter()
            .any(|s| s.origin == SourceOrigin::SelfOwned && s.resource_type.is_texture())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("index", &self.index)
            .field("sources", &self.sources)
            .field("sinks", &self.sinks)
            .field("render_targets", &self.render_targets)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
