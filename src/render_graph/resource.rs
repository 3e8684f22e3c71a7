//! Typed resource ports: the sources a node produces and the sinks it consumes.
//!
//! Sinks never own the source they are bound to. A binding is a [`SourceHandle`], an
//! index pair into the graph's global source table or into another node's source
//! array, so the node table can be rebuilt without leaving dangling references.

use serde::{Deserialize, Serialize};

/// Opaque handle to a GPU texture owned by a [`GpuDevice`](crate::render_graph::GpuDevice).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

/// What kind of value a port carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// A color texture.
    Texture,
    /// A depth/stencil texture.
    DepthStencil,
    /// A scalar value.
    Number,
}

impl ResourceType {
    pub fn is_texture(self) -> bool {
        matches!(self, ResourceType::Texture | ResourceType::DepthStencil)
    }
}

/// Where a source's value comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    /// Fetched from the platform window (color or depth/stencil buffer).
    Global,
    /// Created and owned by the producing pass through its attachment accessor.
    SelfOwned,
    /// Passed through from the node's sink of the same name.
    #[serde(alias = "other")]
    OtherPass,
}

/// Which table a [`SourceHandle`] indexes into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceOwner {
    Global,
    Node(u32),
}

/// Non-owning reference to a source, valid for the graph that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceHandle {
    pub owner: SourceOwner,
    pub index: u32,
}

/// A named, typed output port.
#[derive(Clone, Debug)]
pub struct Source {
    pub name: String,
    pub resource_type: ResourceType,
    pub origin: SourceOrigin,
    /// One texture per buffered frame slot, filled during linking or loading.
    pub textures: Vec<TextureHandle>,
    /// Scalar value for [`ResourceType::Number`] sources.
    pub number: u64,
    /// Set once some sink has been bound to this source.
    pub is_bound: bool,
    /// Set on the single source that terminates the chain reaching the screen.
    pub is_backbuffer: bool,
}

impl Source {
    pub fn new(name: impl Into<String>, resource_type: ResourceType, origin: SourceOrigin) -> Self {
        Self {
            name: name.into(),
            resource_type,
            origin,
            textures: Vec::new(),
            number: 0,
            is_bound: false,
            is_backbuffer: false,
        }
    }

    /// A scalar source carrying `value`.
    pub fn number(name: impl Into<String>, origin: SourceOrigin, value: u64) -> Self {
        Self {
            number: value,
            ..Self::new(name, ResourceType::Number, origin)
        }
    }

    /// The texture for `frame_slot`, if this source has been resolved.
    pub fn texture(&self, frame_slot: usize) -> Option<TextureHandle> {
        self.textures.get(frame_slot).copied()
    }

    pub(crate) fn reset_link_state(&mut self) {
        self.is_bound = false;
        self.is_backbuffer = false;
    }
}

/// The value a sink resolved to, copied out of its source so passes never chase
/// handles while executing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SinkValue {
    pub textures: Vec<TextureHandle>,
    pub number: u64,
}

/// The configured target of a sink: a node's source, or a global source when `node`
/// is `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceRef {
    pub node: Option<String>,
    pub source: String,
}

/// A named input port.
#[derive(Clone, Debug)]
pub struct Sink {
    pub name: String,
    /// Expected type, or `None` to adopt the bound source's type.
    pub resource_type: Option<ResourceType>,
    pub configured_source: Option<SourceRef>,
    pub bound_source: Option<SourceHandle>,
    pub value: SinkValue,
}

impl Sink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: None,
            configured_source: None,
            bound_source: None,
            value: SinkValue::default(),
        }
    }

    pub fn typed(name: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            resource_type: Some(resource_type),
            ..Self::new(name)
        }
    }

    /// The resolved texture for `frame_slot`.
    pub fn texture(&self, frame_slot: usize) -> Option<TextureHandle> {
        self.value.textures.get(frame_slot).copied()
    }
}

pub(crate) fn find_source(sources: &[Source], name: &str) -> Option<usize> {
    sources.iter().position(|s| s.name == name)
}

pub(crate) fn find_sink(sinks: &[Sink], name: &str) -> Option<usize> {
    sinks.iter().position(|s| s.name == name)
}
