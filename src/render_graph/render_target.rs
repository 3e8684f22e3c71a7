//! Render targets: the concrete attachment sets a pass renders into.
//!
//! A node declares its attachments by naming its own sources. The textures behind
//! those sources come from the window, from another pass, or from the node itself,
//! and the targets are rebuilt whenever those textures change.

use log::debug;

use crate::render_graph::device::{GpuDevice, RenderTargetDesc, RenderTargetHandle};
use crate::render_graph::error::{DeviceError, LinkError, Result};
use crate::render_graph::resource::{Source, SourceOrigin, TextureHandle, find_source};

/// One attachment of a node's render target, backed by the named node source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentConfig {
    pub source: String,
}

impl AttachmentConfig {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// The attachments a pass renders into for one buffered frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderTarget {
    pub handle: RenderTargetHandle,
    pub attachments: Vec<TextureHandle>,
    pub width: u32,
    pub height: u32,
}

impl RenderTarget {
    /// The device-independent description of this target.
    pub fn desc(&self) -> RenderTargetDesc {
        RenderTargetDesc {
            attachments: self.attachments.clone(),
            width: self.width,
            height: self.height,
        }
    }
}

/// Builds one render target per buffered frame for a node.
///
/// Targets take the window size unless attachment 0 is self-owned, in which case
/// the pass's own texture extent wins (a shadow map keeps its resolution no matter
/// how the window is sized).
pub(crate) fn build_render_targets(
    device: &mut dyn GpuDevice,
    node_name: &str,
    sources: &[Source],
    attachments: &[AttachmentConfig],
    window_size: (u32, u32),
) -> Result<Vec<RenderTarget>> {
    if attachments.is_empty() {
        return Ok(Vec::new());
    }

    let resolved: Vec<&Source> = attachments
        .iter()
        .map(|attachment| {
            find_source(sources, &attachment.source)
                .map(|index| &sources[index])
                .filter(|source| source.resource_type.is_texture())
                .ok_or_else(|| LinkError::UnknownAttachmentSource {
                    node: node_name.to_string(),
                    source_name: attachment.source.clone(),
                })
        })
        .collect::<std::result::Result<_, _>>()?;

    let self_sized = resolved[0].origin == SourceOrigin::SelfOwned;
    let mut targets = Vec::with_capacity(device.buffered_frame_count());

    for slot in 0..device.buffered_frame_count() {
        let textures = resolved
            .iter()
            .map(|source| {
                source
                    .texture(slot)
                    .ok_or(DeviceError::FrameSlotOutOfRange {
                        slot,
                        count: source.textures.len(),
                    })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let (width, height) = if self_sized {
            let desc = device
                .texture_desc(textures[0])
                .ok_or(DeviceError::UnknownTexture(textures[0]))?;
            (desc.width, desc.height)
        } else {
            window_size
        };

        let desc = RenderTargetDesc {
            attachments: textures,
            width,
            height,
        };
        let handle = match device.create_render_target(&desc) {
            Ok(handle) => handle,
            Err(e) => {
                destroy_render_targets(device, &mut targets);
                return Err(e.into());
            }
        };
        targets.push(RenderTarget {
            handle,
            attachments: desc.attachments,
            width,
            height,
        });
    }

    debug!(
        "Built {} render targets for '{}' at {}x{}",
        targets.len(),
        node_name,
        targets[0].width,
        targets[0].height
    );
    Ok(targets)
}

/// Releases every target in `targets`, leaving it empty.
pub(crate) fn destroy_render_targets(device: &mut dyn GpuDevice, targets: &mut Vec<RenderTarget>) {
    for target in targets.drain(..) {
        device.destroy_render_target(target.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::device::{TextureDesc, TextureKind};
    use crate::render_graph::{HeadlessDevice, ResourceType};

    fn window_source(device: &mut HeadlessDevice) -> Source {
        let mut source = Source::new("colorbuffer", ResourceType::Texture, SourceOrigin::Global);
        for slot in 0..device.buffered_frame_count() {
            source
                .textures
                .push(device.window_attachment(ResourceType::Texture, slot).unwrap());
        }
        source
    }

    #[test]
    fn window_sourced_targets_take_window_size() {
        let mut device = HeadlessDevice::new(1280, 720);
        let sources = vec![window_source(&mut device)];
        let targets = build_render_targets(
            &mut device,
            "skybox",
            &sources,
            &[AttachmentConfig::new("colorbuffer")],
            (1280, 720),
        )
        .unwrap();
        assert_eq!(targets.len(), 3);
        assert!(targets.iter().all(|t| (t.width, t.height) == (1280, 720)));
        assert_eq!(device.live_render_target_count(), 3);
    }

    #[test]
    fn self_owned_targets_keep_texture_size() {
        let mut device = HeadlessDevice::new(1280, 720);
        let mut source = Source::new("depthbuffer", ResourceType::DepthStencil, SourceOrigin::SelfOwned);
        for slot in 0..3 {
            let texture = device
                .create_texture(&TextureDesc {
                    label: format!("shadow {}", slot),
                    kind: TextureKind::Depth,
                    width: 1024,
                    height: 1024,
                    layers: 4,
                })
                .unwrap();
            source.textures.push(texture);
        }
        let mut targets = build_render_targets(
            &mut device,
            "shadow",
            &[source],
            &[AttachmentConfig::new("depthbuffer")],
            (1280, 720),
        )
        .unwrap();
        assert!(targets.iter().all(|t| (t.width, t.height) == (1024, 1024)));

        destroy_render_targets(&mut device, &mut targets);
        assert!(targets.is_empty());
        assert_eq!(device.live_render_target_count(), 0);
    }

    #[test]
    fn unknown_attachment_source_is_a_link_error() {
        let mut device = HeadlessDevice::new(64, 64);
        let err = build_render_targets(
            &mut device,
            "skybox",
            &[],
            &[AttachmentConfig::new("colorbuffer")],
            (64, 64),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::render_graph::RenderGraphError::Link(LinkError::UnknownAttachmentSource { .. })
        ));
    }
}
