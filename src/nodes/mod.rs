//! Built-in passes.
//!
//! Each pass module exposes a `TYPE_NAME` and a `create` factory with the
//! [`NodeFactoryFn`](crate::render_graph::NodeFactoryFn) signature, so they can be
//! registered individually or all at once through [`register_builtin_nodes`].
//!
//! | Type | Sinks | Sources |
//! |---|---|---|
//! | `frame_begin` | | `colorbuffer`, `depthbuffer` (window) |
//! | `skybox` | `colorbuffer` | `colorbuffer` (pass-through) |
//! | `shadow` | | `depthbuffer` (self-owned array), `cascade_count` |
//! | `forward` | `colorbuffer`, `depthbuffer`, `shadowmap` | `colorbuffer`, `depthbuffer` (pass-through) |
//! | `standard_ui` | `colorbuffer` | `colorbuffer` (pass-through) |
//! | `frame_end` | `colorbuffer` | |

pub mod forward;
pub mod frame_begin;
pub mod frame_end;
pub mod shadow;
pub mod skybox;
pub mod ui;

use log::warn;

use crate::render_graph::{
    DeviceError, ExecuteContext, NodeFactoryRegistry, NodeSetup, RenderNode,
    RenderTargetHandle, Result, ShaderHandle,
};

pub use forward::{ForwardConfig, ForwardPass, MeshDraw, ViewData};
pub use frame_begin::FrameBeginPass;
pub use frame_end::FrameEndPass;
pub use shadow::{ShadowCaster, ShadowConfig, ShadowPass};
pub use skybox::{SkyboxConfig, SkyboxPass};
pub use ui::{RenderDataItem, StandardUiPass, UiConfig, UiRenderData};

/// Upper bound on shadow cascades; the shadow atlas always has this many layers.
pub const MAX_SHADOW_CASCADE_COUNT: usize = 4;

pub const SKYBOX_SHADER: &str = "builtin.skybox";
pub const SHADOW_SHADER: &str = "builtin.shadow";
pub const FORWARD_SHADER: &str = "builtin.forward";
pub const UI_SHADER: &str = "builtin.ui";

/// Shader names the built-in passes acquire during `load_resources`.
pub const BUILTIN_SHADERS: &[&str] = &[SKYBOX_SHADER, SHADOW_SHADER, FORWARD_SHADER, UI_SHADER];

type BuiltinFactory = fn(&mut NodeSetup, &str) -> Result<Box<dyn RenderNode>>;

const BUILTIN_NODES: &[(&str, BuiltinFactory)] = &[
    (frame_begin::TYPE_NAME, frame_begin::create),
    (skybox::TYPE_NAME, skybox::create),
    (shadow::TYPE_NAME, shadow::create),
    (forward::TYPE_NAME, forward::create),
    (ui::TYPE_NAME, ui::create),
    (frame_end::TYPE_NAME, frame_end::create),
];

/// Registers every built-in pass. Types already present in `registry` are kept.
pub fn register_builtin_nodes(registry: &mut NodeFactoryRegistry) {
    for (type_name, factory) in BUILTIN_NODES {
        if let Err(e) = registry.register(type_name, *factory) {
            warn!("Keeping existing factory for '{}': {}", type_name, e);
        }
    }
}

/// The node's render target for the frame being executed.
fn frame_target(ctx: &ExecuteContext) -> Result<RenderTargetHandle> {
    ctx.render_target
        .map(|target| target.handle)
        .ok_or_else(|| DeviceError::UnknownRenderTarget.into())
}

/// A shader acquired in `load_resources`.
fn loaded_shader(shader: Option<ShaderHandle>) -> Result<ShaderHandle> {
    shader.ok_or_else(|| DeviceError::UnknownShader.into())
}
