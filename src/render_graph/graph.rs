//! The render graph: construction surface and per-frame driver.

use log::{debug, error, info, warn};

use crate::render_graph::device::GpuDevice;
use crate::render_graph::error::{LinkError, RenderGraphError, Result};
use crate::render_graph::node::{Node, NodeSetup, push_sink, push_source};
use crate::render_graph::render_target::{build_render_targets, destroy_render_targets};
use crate::render_graph::resource::{
    Sink, Source, SourceHandle, SourceOwner, SourceRef, find_sink, find_source,
};
use crate::render_graph::{
    ExecuteContext, FrameData, NodeContext, NodeFactoryRegistry, RenderNode, ResourceType,
    SourceOrigin,
};

/// Lifecycle state of a [`RenderGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphState {
    /// Nodes and links may be added.
    Building,
    /// Linked, initialized, and render targets built.
    Finalized,
    /// Resources loaded; frames may be executed.
    Loaded,
    /// `finalize` or `load_resources` failed. Only `destroy` is valid.
    Failed,
    Destroyed,
}

/// A declarative pipeline of passes connected by named sources and sinks.
///
/// Nodes execute in the order they were created. The graph does not sort them; a
/// sink may only read from a global source or from a node declared before its own,
/// which [`finalize`](Self::finalize) verifies.
///
/// # Example
///
/// ```ignore
/// let registry = NodeFactoryRegistry::with_builtin_nodes();
/// let mut graph = RenderGraph::with_window_buffers("main");
/// graph.create_node(&registry, "frame_begin", "frame_begin", "")?;
/// graph.create_node(&registry, "skybox", "skybox", r#"{ "clear_color": [0.0, 0.0, 0.2, 1.0] }"#)?;
/// graph.create_node(&registry, "frame_end", "frame_end", "")?;
/// graph.set_sink_linkage("skybox", "colorbuffer", Some("frame_begin"), "colorbuffer")?;
/// graph.set_sink_linkage("frame_end", "colorbuffer", Some("skybox"), "colorbuffer")?;
///
/// graph.finalize(&mut device)?;
/// graph.load_resources(&mut device)?;
///
/// loop {
///     frame.advance(dt);
///     graph.execute_frame(&mut device, &frame)?;
/// }
/// ```
pub struct RenderGraph {
    pub(crate) name: String,
    pub(crate) global_sources: Vec<Source>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) state: GraphState,
    pub(crate) window_size: (u32, u32),
    pub(crate) backbuffer: Option<SourceHandle>,
}

impl RenderGraph {
    /// Creates an empty graph with no global sources.
    ///
    /// Most graphs want [`with_window_buffers`](Self::with_window_buffers) instead, so
    /// sinks can bind the window's buffers without a `frame_begin` node.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            global_sources: Vec::new(),
            nodes: Vec::new(),
            state: GraphState::Building,
            window_size: (0, 0),
            backbuffer: None,
        }
    }

    /// A graph with the window's `colorbuffer` and `depthbuffer` as global sources.
    pub fn with_window_buffers(name: &str) -> Self {
        let mut graph = Self::new(name);
        graph.global_sources = vec![
            Source::new("colorbuffer", ResourceType::Texture, SourceOrigin::Global),
            Source::new("depthbuffer", ResourceType::DepthStencil, SourceOrigin::Global),
        ];
        graph
    }

    /// The name the graph was created with; used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the graph is in its lifecycle.
    pub fn state(&self) -> GraphState {
        self.state
    }

    /// Every node, in declaration (and execution) order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Looks up a node by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Sources owned by the graph rather than by a node.
    pub fn global_sources(&self) -> &[Source] {
        &self.global_sources
    }

    /// The window size render targets were last built for.
    pub fn window_size(&self) -> (u32, u32) {
        self.window_size
    }

    /// Resolves a handle produced by linking. Returns `None` once the graph is
    /// destroyed.
    pub fn source(&self, handle: SourceHandle) -> Option<&Source> {
        let sources = match handle.owner {
            SourceOwner::Global => &self.global_sources,
            SourceOwner::Node(index) => &self.nodes.get(index as usize)?.sources,
        };
        sources.get(handle.index as usize)
    }

    /// The source at the end of the chain that reaches the screen, found by finalize.
    pub fn backbuffer(&self) -> Option<(SourceHandle, &Source)> {
        let handle = self.backbuffer?;
        self.source(handle).map(|source| (handle, source))
    }

    /// Name of the node or graph owning the source behind `handle`.
    pub fn source_owner_name(&self, handle: SourceHandle) -> Option<&str> {
        match handle.owner {
            SourceOwner::Global => Some(&self.name),
            SourceOwner::Node(index) => self.nodes.get(index as usize).map(|n| n.name.as_str()),
        }
    }

    /// Typed mutable access to a pass, for pushing per-frame data before
    /// [`execute_frame`](Self::execute_frame).
    pub fn pass_mut<T: RenderNode>(&mut self, node_name: &str) -> Option<&mut T> {
        let node = self.nodes.iter_mut().find(|n| n.name == node_name)?;
        node.pass.as_any_mut().downcast_mut::<T>()
    }

    /// Sets whether `node_name` executes on subsequent frames.
    pub fn set_node_enabled(&mut self, node_name: &str, enabled: bool) -> Result<()> {
        let index = self.node_index(node_name)?;
        self.nodes[index].enabled = enabled;
        Ok(())
    }

    /// Declares a source on the graph itself, bindable by passing `None` as the
    /// source node to [`set_sink_linkage`](Self::set_sink_linkage).
    ///
    /// # Errors
    ///
    /// Fails with [`LinkError::DuplicateSourceName`] if the name is taken, or with
    /// [`RenderGraphError::AlreadyFinalized`] after finalize.
    pub fn add_global_source(
        &mut self,
        name: &str,
        resource_type: ResourceType,
        origin: SourceOrigin,
    ) -> Result<()> {
        self.ensure_building()?;
        push_source(
            &self.name,
            &mut self.global_sources,
            Source::new(name, resource_type, origin),
        )
        .inspect_err(|e| error!("{}", e))
    }

    /// Instantiates a node through the factory registered for `type_name`.
    ///
    /// # Arguments
    ///
    /// * `registry` - Factories to instantiate from
    /// * `name` - Unique node name, used by links and [`pass_mut`](Self::pass_mut)
    /// * `type_name` - Registered pass type, e.g. `"shadow"`
    /// * `config` - Pass configuration handed to the factory as-is (JSON for the
    ///   built-in passes, empty for defaults)
    ///
    /// # Example
    ///
    /// ```ignore
    /// graph.create_node(&registry, "shadow", "shadow", r#"{ "resolution": 2048 }"#)?;
    /// ```
    pub fn create_node(
        &mut self,
        registry: &NodeFactoryRegistry,
        name: &str,
        type_name: &str,
        config: &str,
    ) -> Result<&Node> {
        self.ensure_building()?;
        if self.node(name).is_some() {
            error!("Graph '{}' already has a node named '{}'", self.name, name);
            return Err(LinkError::DuplicateNodeName(name.to_string()).into());
        }

        let mut setup = NodeSetup::new(name);
        let pass = registry
            .instantiate(type_name, &mut setup, config)
            .inspect_err(|e| error!("Failed to create node '{}': {}", name, e))?;

        let index = self.nodes.len() as u32;
        debug!(
            "Created node '{}' ({}) at index {} with {} sources, {} sinks",
            name,
            type_name,
            index,
            setup.sources.len(),
            setup.sinks.len()
        );
        self.nodes.push(Node::new(setup, type_name, index, pass));
        Ok(&self.nodes[index as usize])
    }

    /// Adds a source to an existing node, beyond what its factory declared.
    pub fn add_source(
        &mut self,
        node_name: &str,
        source_name: &str,
        resource_type: ResourceType,
        origin: SourceOrigin,
    ) -> Result<()> {
        self.ensure_building()?;
        let index = self.node_index(node_name)?;
        let node = &mut self.nodes[index];
        push_source(
            &node.name,
            &mut node.sources,
            Source::new(source_name, resource_type, origin),
        )
        .inspect_err(|e| error!("{}", e))
    }

    /// Adds an untyped sink to an existing node. It adopts the type of whatever
    /// source it is bound to.
    pub fn add_sink(&mut self, node_name: &str, sink_name: &str) -> Result<()> {
        self.push_node_sink(node_name, Sink::new(sink_name))
    }

    /// Adds a sink that only accepts sources of `resource_type`.
    pub fn add_typed_sink(
        &mut self,
        node_name: &str,
        sink_name: &str,
        resource_type: ResourceType,
    ) -> Result<()> {
        self.push_node_sink(node_name, Sink::typed(sink_name, resource_type))
    }

    fn push_node_sink(&mut self, node_name: &str, sink: Sink) -> Result<()> {
        self.ensure_building()?;
        let index = self.node_index(node_name)?;
        let node = &mut self.nodes[index];
        push_sink(&node.name, &mut node.sinks, sink).inspect_err(|e| error!("{}", e))
    }

    /// Binds `node_name.sink_name` to `source_node.source_name`, or to the global
    /// source `source_name` when `source_node` is `None`.
    pub fn set_sink_linkage(
        &mut self,
        node_name: &str,
        sink_name: &str,
        source_node: Option<&str>,
        source_name: &str,
    ) -> Result<()> {
        self.ensure_building()?;
        let node_index = self.node_index(node_name)?;
        let sink_index = find_sink(&self.nodes[node_index].sinks, sink_name).ok_or_else(|| {
            error!("Node '{}' has no sink named '{}'", node_name, sink_name);
            LinkError::UnknownSink {
                node: node_name.to_string(),
                sink: sink_name.to_string(),
            }
        })?;

        let source_ref = SourceRef {
            node: source_node.map(str::to_string),
            source: source_name.to_string(),
        };
        let handle = self.resolve_source_ref(&source_ref)?;

        let sink = &mut self.nodes[node_index].sinks[sink_index];
        sink.configured_source = Some(source_ref);
        sink.bound_source = Some(handle);
        Ok(())
    }

    pub(crate) fn resolve_source_ref(&self, source_ref: &SourceRef) -> Result<SourceHandle> {
        let (owner, sources, owner_name) = match &source_ref.node {
            Some(node_name) => {
                let index = self.node_index(node_name)?;
                (
                    SourceOwner::Node(index as u32),
                    &self.nodes[index].sources,
                    node_name.as_str(),
                )
            }
            None => (SourceOwner::Global, &self.global_sources, self.name.as_str()),
        };
        let index = find_source(sources, &source_ref.source).ok_or_else(|| {
            error!("'{}' has no source named '{}'", owner_name, source_ref.source);
            LinkError::UnknownSource {
                owner: owner_name.to_string(),
                source_name: source_ref.source.clone(),
            }
        })?;
        Ok(SourceHandle {
            owner,
            index: index as u32,
        })
    }

    pub(crate) fn node_index(&self, name: &str) -> Result<usize> {
        self.nodes.iter().position(|n| n.name == name).ok_or_else(|| {
            error!("Graph '{}' has no node named '{}'", self.name, name);
            LinkError::UnknownNode(name.to_string()).into()
        })
    }

    fn ensure_building(&self) -> Result<()> {
        match self.state {
            GraphState::Building => Ok(()),
            GraphState::Destroyed => Err(RenderGraphError::Destroyed(self.name.clone())),
            _ => Err(RenderGraphError::AlreadyFinalized(self.name.clone())),
        }
    }

    fn ensure_state(&self, expected: GraphState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            return Ok(());
        }
        if self.state == GraphState::Destroyed {
            return Err(RenderGraphError::Destroyed(self.name.clone()));
        }
        error!(
            "Graph '{}' cannot {} in state {:?}",
            self.name, operation, self.state
        );
        Err(RenderGraphError::NotReady {
            graph: self.name.clone(),
            operation,
        })
    }

    /// Brings every node's runtime resources online, in declaration order.
    ///
    /// Self-owned attachment textures are fetched again first, since a pass may only
    /// be able to produce them once it has been initialized.
    pub fn load_resources(&mut self, device: &mut dyn GpuDevice) -> Result<()> {
        self.ensure_state(GraphState::Finalized, "load resources")?;
        match self.load_nodes(device) {
            Ok(()) => {
                self.state = GraphState::Loaded;
                info!("Render graph '{}' loaded {} nodes", self.name, self.nodes.len());
                Ok(())
            }
            Err(e) => {
                self.state = GraphState::Failed;
                Err(e)
            }
        }
    }

    fn load_nodes(&mut self, device: &mut dyn GpuDevice) -> Result<()> {
        let mut textures_changed = false;

        for index in 0..self.nodes.len() {
            if self.nodes[index].has_self_owned_textures() {
                textures_changed |= self.fetch_self_owned_textures(index, device)?;
                self.propagate_values();
            }

            let Node {
                name,
                sources,
                sinks,
                pass,
                ..
            } = &mut self.nodes[index];
            let mut ctx = NodeContext {
                device: &mut *device,
                name: name.as_str(),
                sinks: sinks.as_slice(),
                sources: sources.as_slice(),
                window_size: self.window_size,
            };
            pass.load_resources(&mut ctx).map_err(|e| {
                error!("Node '{}' failed to load resources: {}", name, e);
                RenderGraphError::acquisition(name, e)
            })?;
        }

        if textures_changed {
            debug!("Self-owned textures changed during load; rebuilding render targets");
            self.rebuild_render_targets(device)?;
        }
        Ok(())
    }

    /// Runs every enabled node's `execute` in declaration order.
    ///
    /// The first failure aborts the frame: later nodes do not run, nothing is
    /// presented, and the error is returned for the caller to decide whether to skip
    /// the frame or shut down.
    ///
    /// A frame that cannot be finished (a pass left its render pass open) is aborted
    /// the same way and reported as an execution failure of the last node that ran,
    /// or of the graph itself when no node ran.
    pub fn execute_frame(&mut self, device: &mut dyn GpuDevice, frame: &FrameData) -> Result<()> {
        self.ensure_state(GraphState::Loaded, "execute a frame")?;
        device.begin_frame()?;

        let frame_slot = device.current_frame_slot();
        let mut last_executed: Option<usize> = None;
        for (index, node) in self.nodes.iter_mut().enumerate() {
            if !node.enabled {
                continue;
            }
            last_executed = Some(index);
            let result = {
                let mut ctx = ExecuteContext {
                    device: &mut *device,
                    frame,
                    name: &node.name,
                    frame_slot,
                    render_target: node.render_targets.get(frame_slot),
                    sinks: &node.sinks,
                };
                node.pass.execute(&mut ctx)
            };
            if let Err(e) = result {
                error!("Node '{}' failed to execute: {}", node.name, e);
                device.abort_frame();
                return Err(RenderGraphError::execution(&node.name, e));
            }
        }

        if let Err(e) = device.end_frame() {
            let culprit = last_executed.map_or(self.name.as_str(), |i| self.nodes[i].name.as_str());
            error!("Failed to end frame after '{}': {}", culprit, e);
            device.abort_frame();
            return Err(RenderGraphError::execution(culprit, e.into()));
        }
        Ok(())
    }

    /// Regenerates window-derived and self-owned attachments and every node's render
    /// targets for a new window size.
    ///
    /// Must be called between frames. Zero-sized dimensions (a minimized window) are
    /// ignored.
    pub fn on_resize(&mut self, device: &mut dyn GpuDevice, width: u32, height: u32) -> Result<()> {
        if self.state == GraphState::Destroyed {
            return Err(RenderGraphError::Destroyed(self.name.clone()));
        }
        if width == 0 || height == 0 {
            debug!("Ignoring zero-sized resize of '{}'", self.name);
            return Ok(());
        }

        device.resize_window(width, height);
        self.window_size = (width, height);

        match self.state {
            GraphState::Finalized | GraphState::Loaded => {}
            _ => return Ok(()),
        }

        self.fetch_global_textures(device)?;
        for index in 0..self.nodes.len() {
            if !self.nodes[index].has_self_owned_textures() {
                continue;
            }
            let node = &mut self.nodes[index];
            if let Some(accessor) = node.pass.self_owned_attachments() {
                accessor
                    .attachment_textures_regenerate(device, width, height)
                    .map_err(|e| {
                        error!("Node '{}' failed to regenerate attachments: {}", node.name, e);
                        RenderGraphError::acquisition(&node.name, e)
                    })?;
            }
            self.fetch_self_owned_textures(index, device)?;
        }
        self.propagate_values();
        self.rebuild_render_targets(device)?;

        info!("Render graph '{}' resized to {}x{}", self.name, width, height);
        Ok(())
    }

    /// Destroys every node's render targets, then the node itself, in order.
    ///
    /// Destroying an already destroyed graph does nothing.
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        if self.state == GraphState::Destroyed {
            debug!("Render graph '{}' already destroyed", self.name);
            return;
        }

        for node in self.nodes.iter_mut() {
            destroy_render_targets(device, &mut node.render_targets);
            node.pass.destroy(device);
        }
        self.nodes.clear();
        self.global_sources.clear();
        self.backbuffer = None;
        self.state = GraphState::Destroyed;
        info!("Render graph '{}' destroyed", self.name);
    }

    pub(crate) fn rebuild_render_targets(&mut self, device: &mut dyn GpuDevice) -> Result<()> {
        for node in self.nodes.iter_mut() {
            destroy_render_targets(device, &mut node.render_targets);
            node.render_targets = build_render_targets(
                device,
                &node.name,
                &node.sources,
                &node.attachments,
                self.window_size,
            )
            .inspect_err(|e| error!("Failed to build render targets for '{}': {}", node.name, e))?;
        }
        Ok(())
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        if self.state != GraphState::Destroyed && !self.nodes.is_empty() {
            warn!(
                "Render graph '{}' dropped without destroy(); GPU resources were not released",
                self.name
            );
        }
    }
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("global_sources", &self.global_sources)
            .field("nodes", &self.nodes)
            .field("window_size", &self.window_size)
            .finish()
    }
}
