//! Finalize: resolve names into handles and bring every node to its initialized state.
//!
//! Linking runs once per graph configuration. After it succeeds every sink holds a
//! [`SourceHandle`] to a source of matching type owned by the graph or by an earlier
//! node, every window-derived or self-owned source has one texture per buffered
//! frame, and every node has been initialized and given its render targets.

use log::{debug, error, info};

use crate::render_graph::device::GpuDevice;
use crate::render_graph::error::{LinkError, RenderGraphError, Result};
use crate::render_graph::graph::{GraphState, RenderGraph};
use crate::render_graph::node::Node;
use crate::render_graph::resource::{SinkValue, Source, SourceHandle, SourceOwner, find_sink};
use crate::render_graph::{NodeContext, ResourceType, SourceOrigin};

impl RenderGraph {
    /// Links, validates, and initializes the graph.
    ///
    /// Steps, in order:
    /// 1. resolve every sink's configured source name into a handle, checking type
    ///    and declaration order
    /// 2. fetch the window textures behind every global-origin source
    /// 3. find the source that terminates the chain reaching the screen
    /// 4. fetch self-owned textures through each pass's attachment accessor
    /// 5. initialize every node in declaration order
    /// 6. build every node's render targets at the window size
    ///
    /// Any failure aborts finalize and leaves the graph unusable; it has to be
    /// destroyed and rebuilt.
    pub fn finalize(&mut self, device: &mut dyn GpuDevice) -> Result<()> {
        match self.state {
            GraphState::Building => {}
            GraphState::Destroyed => return Err(RenderGraphError::Destroyed(self.name.clone())),
            _ => return Err(RenderGraphError::AlreadyFinalized(self.name.clone())),
        }

        self.window_size = device.window_size();
        match self.finalize_steps(device) {
            Ok(()) => {
                self.state = GraphState::Finalized;
                info!(
                    "Render graph '{}' finalized: {} nodes, {} global sources",
                    self.name,
                    self.nodes.len(),
                    self.global_sources.len()
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to finalize render graph '{}': {}", self.name, e);
                self.state = GraphState::Failed;
                Err(e)
            }
        }
    }

    fn finalize_steps(&mut self, device: &mut dyn GpuDevice) -> Result<()> {
        self.link_sinks()?;
        self.check_pass_through_sources()?;
        self.fetch_global_textures(device)?;
        self.mark_backbuffer()?;

        for index in 0..self.nodes.len() {
            if self.nodes[index].has_self_owned_textures() {
                self.fetch_self_owned_textures(index, device)?;
            }
        }
        self.propagate_values();

        for node in self.nodes.iter_mut() {
            let Node {
                name,
                sources,
                sinks,
                pass,
                ..
            } = node;
            let mut ctx = NodeContext {
                device: &mut *device,
                name: name.as_str(),
                sinks: sinks.as_slice(),
                sources: sources.as_slice(),
                window_size: self.window_size,
            };
            pass.initialize(&mut ctx).map_err(|e| {
                error!("Node '{}' failed to initialize: {}", name, e);
                RenderGraphError::acquisition(name, e)
            })?;
        }

        self.rebuild_render_targets(device)
    }

    /// Recomputes every sink's handle from its configured names.
    fn link_sinks(&mut self) -> Result<()> {
        for source in self.global_sources.iter_mut() {
            source.reset_link_state();
        }
        for node in self.nodes.iter_mut() {
            for source in node.sources.iter_mut() {
                source.reset_link_state();
            }
        }

        let mut bindings = Vec::new();
        for (node_index, node) in self.nodes.iter().enumerate() {
            for (sink_index, sink) in node.sinks.iter().enumerate() {
                let Some(source_ref) = &sink.configured_source else {
                    error!("Sink '{}.{}' is not linked", node.name, sink.name);
                    return Err(LinkError::UnlinkedSink {
                        node: node.name.clone(),
                        sink: sink.name.clone(),
                    }
                    .into());
                };
                let handle = self.resolve_source_ref(source_ref)?;

                if let SourceOwner::Node(producer) = handle.owner {
                    if producer as usize >= node_index {
                        error!(
                            "Sink '{}.{}' reads from node '{}', declared at or after it",
                            node.name, sink.name, self.nodes[producer as usize].name
                        );
                        return Err(LinkError::OrderViolation {
                            node: node.name.clone(),
                            sink: sink.name.clone(),
                            producer: self.nodes[producer as usize].name.clone(),
                        }
                        .into());
                    }
                }

                let source = self.source(handle).ok_or_else(|| LinkError::UnknownSource {
                    owner: self.source_owner_name(handle).unwrap_or_default().to_string(),
                    source_name: source_ref.source.clone(),
                })?;
                if let Some(expected) = sink.resource_type {
                    if expected != source.resource_type {
                        error!(
                            "Sink '{}.{}' expects {:?}, bound to '{}' of type {:?}",
                            node.name, sink.name, expected, source.name, source.resource_type
                        );
                        return Err(LinkError::TypeMismatch {
                            node: node.name.clone(),
                            sink: sink.name.clone(),
                            source_name: source.name.clone(),
                            expected,
                            found: source.resource_type,
                        }
                        .into());
                    }
                }

                bindings.push((node_index, sink_index, handle, source.resource_type));
            }
        }

        for (node_index, sink_index, handle, resource_type) in bindings {
            let sink = &mut self.nodes[node_index].sinks[sink_index];
            sink.bound_source = Some(handle);
            sink.resource_type = Some(resource_type);
            if let Some(source) = self.source_mut(handle) {
                source.is_bound = true;
            }
        }
        Ok(())
    }

    /// Every pass-through source needs a sink of the same name to pass through.
    fn check_pass_through_sources(&self) -> Result<()> {
        for node in &self.nodes {
            for source in &node.sources {
                if source.origin != SourceOrigin::OtherPass {
                    continue;
                }
                let passes_through = find_sink(&node.sinks, &source.name)
                    .and_then(|index| node.sinks[index].resource_type)
                    == Some(source.resource_type);
                if !passes_through {
                    error!(
                        "Pass-through source '{}.{}' has no matching sink",
                        node.name, source.name
                    );
                    return Err(LinkError::UnresolvedPassThrough {
                        node: node.name.clone(),
                        source_name: source.name.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Fills every global-origin texture source with the window's buffers.
    pub(crate) fn fetch_global_textures(&mut self, device: &mut dyn GpuDevice) -> Result<()> {
        let frame_count = device.buffered_frame_count();
        let sources = self
            .global_sources
            .iter_mut()
            .chain(self.nodes.iter_mut().flat_map(|n| n.sources.iter_mut()));
        for source in sources {
            if source.origin != SourceOrigin::Global || !source.resource_type.is_texture() {
                continue;
            }
            source.textures.clear();
            for slot in 0..frame_count {
                let texture = device
                    .window_attachment(source.resource_type, slot)
                    .inspect_err(|e| error!("Failed to fetch window buffer '{}': {}", source.name, e))?;
                source.textures.push(texture);
            }
        }
        Ok(())
    }

    /// Refreshes node `index`'s self-owned textures through its accessor. Returns
    /// whether any texture handle changed.
    pub(crate) fn fetch_self_owned_textures(
        &mut self,
        index: usize,
        device: &mut dyn GpuDevice,
    ) -> Result<bool> {
        let frame_count = device.buffered_frame_count();
        let node = &mut self.nodes[index];

        let Some(accessor) = node.pass.self_owned_attachments() else {
            let source_name = node
                .sources
                .iter()
                .find(|s| s.origin == SourceOrigin::SelfOwned && s.resource_type.is_texture())
                .map(|s| s.name.clone())
                .unwrap_or_default();
            error!(
                "Node '{}' declares self-owned source '{}' without an attachment accessor",
                node.name, source_name
            );
            return Err(LinkError::MissingAccessor {
                node: node.name.clone(),
                source_name,
            }
            .into());
        };

        let mut changed = false;
        for source in node.sources.iter_mut() {
            if source.origin != SourceOrigin::SelfOwned || !source.resource_type.is_texture() {
                continue;
            }
            let mut textures = Vec::with_capacity(frame_count);
            for slot in 0..frame_count {
                let texture = accessor
                    .attachment_texture_get(device, source.resource_type, slot)
                    .map_err(|e| {
                        error!(
                            "Node '{}' failed to provide '{}' for frame {}: {}",
                            node.name, source.name, slot, e
                        );
                        RenderGraphError::acquisition(&node.name, e)
                    })?;
                textures.push(texture);
            }
            changed |= textures != source.textures;
            source.textures = textures;
        }
        if changed {
            debug!("Node '{}' self-owned textures updated", node.name);
        }
        Ok(changed)
    }

    /// Copies every bound source's value into its sink and through pass-through
    /// sources. Nodes are visited in declaration order, which linking guarantees is
    /// producer-before-consumer.
    pub(crate) fn propagate_values(&mut self) {
        for node_index in 0..self.nodes.len() {
            for sink_index in 0..self.nodes[node_index].sinks.len() {
                let value = self.nodes[node_index].sinks[sink_index]
                    .bound_source
                    .and_then(|handle| self.source(handle))
                    .map(|source| SinkValue {
                        textures: source.textures.clone(),
                        number: source.number,
                    })
                    .unwrap_or_default();
                self.nodes[node_index].sinks[sink_index].value = value;
            }

            let node = &mut self.nodes[node_index];
            for source in node.sources.iter_mut() {
                if source.origin != SourceOrigin::OtherPass {
                    continue;
                }
                if let Some(sink) = node.sinks.iter().find(|s| s.name == source.name) {
                    source.textures = sink.value.textures.clone();
                    source.number = sink.value.number;
                }
            }
        }
    }

    /// Finds the deepest consumed source derived from the window's color buffer.
    ///
    /// The chain starts at every global-origin color source and follows pass-through
    /// sources whose same-named sink is bound to a chain member. The last chain member
    /// some sink is bound to is the backbuffer.
    fn mark_backbuffer(&mut self) -> Result<()> {
        let mut chain: Vec<SourceHandle> = Vec::new();
        let is_window_color = |origin: SourceOrigin, resource_type: ResourceType| {
            origin == SourceOrigin::Global && resource_type == ResourceType::Texture
        };

        for (index, source) in self.global_sources.iter().enumerate() {
            if is_window_color(source.origin, source.resource_type) {
                chain.push(SourceHandle {
                    owner: SourceOwner::Global,
                    index: index as u32,
                });
            }
        }
        for (node_index, node) in self.nodes.iter().enumerate() {
            for (source_index, source) in node.sources.iter().enumerate() {
                let derived = match source.origin {
                    SourceOrigin::Global => source.resource_type == ResourceType::Texture,
                    SourceOrigin::OtherPass => find_sink(&node.sinks, &source.name)
                        .and_then(|i| node.sinks[i].bound_source)
                        .is_some_and(|bound| chain.contains(&bound)),
                    SourceOrigin::SelfOwned => false,
                };
                if derived {
                    chain.push(SourceHandle {
                        owner: SourceOwner::Node(node_index as u32),
                        index: source_index as u32,
                    });
                }
            }
        }

        let terminal = chain
            .iter()
            .rev()
            .copied()
            .find(|handle| self.source(*handle).is_some_and(|s| s.is_bound));
        let Some(terminal) = terminal else {
            error!("Render graph '{}' has no backbuffer consumer", self.name);
            return Err(LinkError::NoBackbufferConsumer.into());
        };

        if let Some(source) = self.source_mut(terminal) {
            source.is_backbuffer = true;
            debug!(
                "Backbuffer for '{}' is '{}.{}'",
                self.name,
                self.source_owner_name(terminal).unwrap_or_default(),
                self.source(terminal).map(|s| s.name.as_str()).unwrap_or_default()
            );
        }
        self.backbuffer = Some(terminal);
        Ok(())
    }

    fn source_mut(&mut self, handle: SourceHandle) -> Option<&mut Source> {
        let sources = match handle.owner {
            SourceOwner::Global => &mut self.global_sources,
            SourceOwner::Node(index) => &mut self.nodes.get_mut(index as usize)?.sources,
        };
        sources.get_mut(handle.index as usize)
    }
}
