//! Serialized graph descriptions and the pass configuration parser.
//!
//! ```json
//! {
//!   "name": "forward_graph",
//!   "nodes": [
//!     { "name": "frame_begin", "type": "frame_begin" },
//!     { "name": "skybox", "type": "skybox",
//!       "config": { "clear_color": [0.0, 0.0, 0.2, 1.0] },
//!       "links": [ { "sink": "colorbuffer", "source_node": "frame_begin", "source": "colorbuffer" } ] },
//!     { "name": "frame_end", "type": "frame_end",
//!       "links": [ { "sink": "colorbuffer", "source_node": "skybox", "source": "colorbuffer" } ] }
//!   ]
//! }
//! ```

use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::render_graph::error::{ConfigError, Result};
use crate::render_graph::{NodeFactoryRegistry, RenderGraph, ResourceType, SourceOrigin};

/// A global source declared on the graph itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub origin: SourceOrigin,
}

/// Binding of one of a node's sinks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub sink: String,
    /// Producing node, or `None` for a global source.
    #[serde(default)]
    pub source_node: Option<String>,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Pass-specific configuration, handed to the factory as a JSON string.
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub name: String,
    #[serde(default = "default_global_sources")]
    pub global_sources: Vec<SourceConfig>,
    pub nodes: Vec<NodeConfig>,
}

fn default_global_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            name: "colorbuffer".to_string(),
            resource_type: ResourceType::Texture,
            origin: SourceOrigin::Global,
        },
        SourceConfig {
            name: "depthbuffer".to_string(),
            resource_type: ResourceType::DepthStencil,
            origin: SourceOrigin::Global,
        },
    ]
}

impl GraphConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| {
            error!("Failed to parse render graph configuration: {}", e);
            ConfigError::from(e)
        })
    }
}

impl NodeConfig {
    /// The pass configuration as the string its factory receives.
    pub fn config_string(&self) -> String {
        match &self.config {
            serde_json::Value::Null => String::new(),
            value => value.to_string(),
        }
    }
}

/// Parses a pass's opaque configuration string. An empty string yields the default.
pub fn deserialize_config<T>(config: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    if config.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(config).map_err(|e| {
        error!("Failed to parse pass configuration: {}", e);
        ConfigError::from(e)
    })
}

impl RenderGraph {
    /// Builds an unfinalized graph from a description.
    ///
    /// Every node is created before any link is applied, so a link naming a node
    /// declared later is reported by [`finalize`](Self::finalize) as an order
    /// violation rather than as an unknown node.
    pub fn from_config(config: &GraphConfig, registry: &NodeFactoryRegistry) -> Result<Self> {
        let mut graph = RenderGraph::new(&config.name);
        for source in &config.global_sources {
            graph.add_global_source(&source.name, source.resource_type, source.origin)?;
        }
        for node in &config.nodes {
            graph.create_node(registry, &node.name, &node.type_name, &node.config_string())?;
        }
        for node in &config.nodes {
            for link in &node.links {
                let declared = graph
                    .node(&node.name)
                    .is_some_and(|n| n.sink(&link.sink).is_some());
                if !declared {
                    error!(
                        "Link on node '{}' names undeclared sink '{}'",
                        node.name, link.sink
                    );
                    return Err(ConfigError::UndeclaredLinkSink {
                        node: node.name.clone(),
                        sink: link.sink.clone(),
                    }
                    .into());
                }
                graph.set_sink_linkage(
                    &node.name,
                    &link.sink,
                    link.source_node.as_deref(),
                    &link.source,
                )?;
            }
        }
        debug!(
            "Built render graph '{}' from configuration ({} nodes)",
            config.name,
            config.nodes.len()
        );
        Ok(graph)
    }
}
