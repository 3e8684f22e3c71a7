//! Error types for graph construction, linking, resource loading, and execution.

use thiserror::Error;

use crate::render_graph::{ResourceType, TextureHandle};

/// Coarse classification of a [`RenderGraphError`].
///
/// Callers use this to choose a recovery policy: configuration and link errors require
/// rebuilding the graph, resource acquisition errors prevent the graph from coming
/// online, and execution errors only affect the frame in which they occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Link,
    ResourceAcquisition,
    Execution,
}

/// Malformed or missing pass/graph configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("node '{node}': invalid value for '{field}': {reason}")]
    InvalidValue {
        node: String,
        field: &'static str,
        reason: String,
    },
    #[error("link on node '{node}' names sink '{sink}', which the node does not declare")]
    UndeclaredLinkSink { node: String, sink: String },
}

/// Failures while resolving names into handles.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("no factory registered for node type '{0}'")]
    UnknownNodeType(String),
    #[error("a factory for node type '{0}' is already registered")]
    DuplicateNodeType(String),
    #[error("graph already contains a node named '{0}'")]
    DuplicateNodeName(String),
    #[error("'{owner}' already has a source named '{source_name}'")]
    DuplicateSourceName { owner: String, source_name: String },
    #[error("node '{node}' already has a sink named '{sink}'")]
    DuplicateSinkName { node: String, sink: String },
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    #[error("node '{node}' has no sink named '{sink}'")]
    UnknownSink { node: String, sink: String },
    #[error("'{owner}' has no source named '{source_name}'")]
    UnknownSource { owner: String, source_name: String },
    #[error("sink '{node}.{sink}' was never linked to a source")]
    UnlinkedSink { node: String, sink: String },
    #[error("sink '{node}.{sink}' expects {expected:?} but '{source_name}' is {found:?}")]
    TypeMismatch {
        node: String,
        sink: String,
        source_name: String,
        expected: ResourceType,
        found: ResourceType,
    },
    #[error("no node consumes the backbuffer color chain")]
    NoBackbufferConsumer,
    #[error("node '{node}' declares self-owned source '{source_name}' but provides no attachment accessor")]
    MissingAccessor { node: String, source_name: String },
    #[error("sink '{node}.{sink}' reads from '{producer}', which is not declared before it")]
    OrderViolation {
        node: String,
        sink: String,
        producer: String,
    },
    #[error("pass-through source '{node}.{source_name}' has no sink with the same name")]
    UnresolvedPassThrough { node: String, source_name: String },
    #[error("node '{node}' has no render target attachment source named '{source_name}'")]
    UnknownAttachmentSource { node: String, source_name: String },
}

/// Failures reported by a [`GpuDevice`](crate::render_graph::GpuDevice).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("window has no {0:?} attachment")]
    NoWindowAttachment(ResourceType),
    #[error("frame slot {slot} out of range ({count} buffered frames)")]
    FrameSlotOutOfRange { slot: usize, count: usize },
    #[error("failed to create texture '{label}': {reason}")]
    TextureCreation { label: String, reason: String },
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureHandle),
    #[error("render target attachments disagree on size or are empty")]
    InvalidRenderTarget,
    #[error("unknown render target")]
    UnknownRenderTarget,
    #[error("shader '{0}' is not registered")]
    ShaderNotFound(String),
    #[error("unknown shader")]
    UnknownShader,
    #[error("begin_render called while a render pass is already open")]
    RenderPassAlreadyOpen,
    #[error("no render pass is open")]
    NoRenderPass,
    #[error("no frame is being recorded")]
    NoFrame,
    #[error("more than {limit} draws in one frame")]
    TooManyDraws { limit: u32 },
    #[error("unsupported draw: {0}")]
    Unsupported(&'static str),
    #[error("surface error: {0}")]
    Surface(String),
}

/// The error type returned by every [`RenderGraph`](crate::render_graph::RenderGraph)
/// operation.
#[derive(Debug, Error)]
pub enum RenderGraphError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("node '{node}' failed to acquire resources")]
    ResourceAcquisition {
        node: String,
        #[source]
        source: Box<RenderGraphError>,
    },
    #[error("node '{node}' failed to execute")]
    Execution {
        node: String,
        #[source]
        source: Box<RenderGraphError>,
    },
    #[error("graph '{graph}' is not ready for {operation}")]
    NotReady {
        graph: String,
        operation: &'static str,
    },
    #[error("graph '{0}' has already been finalized")]
    AlreadyFinalized(String),
    #[error("graph '{0}' has been destroyed")]
    Destroyed(String),
}

impl RenderGraphError {
    /// Maps this error onto the recovery taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderGraphError::Config(_) => ErrorKind::Config,
            RenderGraphError::Link(_)
            | RenderGraphError::NotReady { .. }
            | RenderGraphError::AlreadyFinalized(_)
            | RenderGraphError::Destroyed(_) => ErrorKind::Link,
            RenderGraphError::Device(_) | RenderGraphError::ResourceAcquisition { .. } => {
                ErrorKind::ResourceAcquisition
            }
            RenderGraphError::Execution { .. } => ErrorKind::Execution,
        }
    }

    pub(crate) fn acquisition(node: &str, source: RenderGraphError) -> Self {
        RenderGraphError::ResourceAcquisition {
            node: node.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn execution(node: &str, source: RenderGraphError) -> Self {
        RenderGraphError::Execution {
            node: node.to_string(),
            source: Box::new(source),
        }
    }
}

pub type Result<T, E = RenderGraphError> = std::result::Result<T, E>;
