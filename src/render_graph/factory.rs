//! Registry mapping configuration type names to pass constructors.

use std::collections::HashMap;

use log::{debug, error};

use crate::render_graph::error::{LinkError, Result};
use crate::render_graph::{NodeSetup, RenderNode};

/// Constructor for a pass type.
///
/// Receives the [`NodeSetup`] to declare sources, sinks, and attachments on, plus the
/// node's opaque configuration string.
pub type NodeFactoryFn = dyn Fn(&mut NodeSetup, &str) -> Result<Box<dyn RenderNode>>;

/// Maps type names such as `"shadow"` or `"standard_ui"` to constructors.
///
/// Owned by whoever owns the rendering subsystem and passed explicitly to
/// [`RenderGraph::create_node`](crate::render_graph::RenderGraph::create_node), so new
/// pass types can be added without the graph knowing their concrete types.
#[derive(Default)]
pub struct NodeFactoryRegistry {
    factories: HashMap<String, Box<NodeFactoryFn>>,
}

impl NodeFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every pass in [`crate::nodes`] registered.
    pub fn with_builtin_nodes() -> Self {
        let mut registry = Self::new();
        crate::nodes::register_builtin_nodes(&mut registry);
        registry
    }

    /// Registers `factory` under `type_name`. Fails if the name is taken.
    pub fn register<F>(&mut self, type_name: &str, factory: F) -> Result<()>
    where
        F: Fn(&mut NodeSetup, &str) -> Result<Box<dyn RenderNode>> + 'static,
    {
        if self.factories.contains_key(type_name) {
            error!("Node type '{}' is already registered", type_name);
            return Err(LinkError::DuplicateNodeType(type_name.to_string()).into());
        }
        debug!("Registered node type '{}'", type_name);
        self.factories
            .insert(type_name.to_string(), Box::new(factory));
        Ok(())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Runs the factory registered for `type_name`.
    pub fn instantiate(
        &self,
        type_name: &str,
        setup: &mut NodeSetup,
        config: &str,
    ) -> Result<Box<dyn RenderNode>> {
        let factory = self.factories.get(type_name).ok_or_else(|| {
            error!("No factory registered for node type '{}'", type_name);
            LinkError::UnknownNodeType(type_name.to_string())
        })?;
        factory(setup, config)
    }
}
