use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use glam::Mat4;
use kiln::nodes::{
    ForwardPass, MAX_SHADOW_CASCADE_COUNT, MeshDraw, RenderDataItem, StandardUiPass, UiRenderData,
};
use kiln::render_graph::{
    ClearValues, DeviceCommand, DeviceError, ErrorKind, ExecuteContext, FrameData, GpuDevice,
    GraphConfig, GraphState, HeadlessDevice, LinkError, NodeContext, NodeFactoryRegistry,
    NodeSetup, RenderGraph, RenderGraphError, RenderNode, RenderPassBegin, ResourceType, Result,
    SelfOwnedAttachments, SourceOrigin, SourceOwner, TextureDesc, TextureHandle, TextureKind,
};

type EventLog = Rc<RefCell<Vec<String>>>;

/// Passes its `colorbuffer` through and records lifecycle calls. Fails to execute
/// when configured with `"fail"`.
struct Recorder {
    name: String,
    log: EventLog,
    fail: bool,
}

impl RenderNode for Recorder {
    fn initialize(&mut self, _ctx: &mut NodeContext) -> Result<()> {
        self.log.borrow_mut().push(format!("init:{}", self.name));
        Ok(())
    }

    fn execute(&mut self, _ctx: &mut ExecuteContext) -> Result<()> {
        self.log.borrow_mut().push(format!("exec:{}", self.name));
        if self.fail {
            return Err(DeviceError::Unsupported("recorder failure").into());
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Declares a self-owned texture but never provides it.
struct Orphan;

impl RenderNode for Orphan {
    fn execute(&mut self, _ctx: &mut ExecuteContext) -> Result<()> {
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Opens a render pass on its target and never closes it.
struct LeavesPassOpen;

impl RenderNode for LeavesPassOpen {
    fn execute(&mut self, ctx: &mut ExecuteContext) -> Result<()> {
        let target = ctx
            .render_target
            .map(|t| t.handle)
            .ok_or(DeviceError::UnknownRenderTarget)?;
        ctx.device.begin_render(&RenderPassBegin {
            target,
            layer: 0,
            clear: ClearValues::default(),
        })?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Owns a window-sized color texture per frame slot, recreated on resize.
#[derive(Default)]
struct Offscreen {
    textures: Vec<Option<TextureHandle>>,
    size: Option<(u32, u32)>,
}

impl SelfOwnedAttachments for Offscreen {
    fn attachment_texture_get(
        &mut self,
        device: &mut dyn GpuDevice,
        _resource_type: ResourceType,
        frame_slot: usize,
    ) -> Result<TextureHandle> {
        if self.textures.len() <= frame_slot {
            self.textures.resize(frame_slot + 1, None);
        }
        if let Some(texture) = self.textures[frame_slot] {
            return Ok(texture);
        }
        let (width, height) = self.size.unwrap_or_else(|| device.window_size());
        let texture = device.create_texture(&TextureDesc {
            label: format!("offscreen {}", frame_slot),
            kind: TextureKind::Color,
            width,
            height,
            layers: 1,
        })?;
        self.textures[frame_slot] = Some(texture);
        Ok(texture)
    }

    fn attachment_textures_regenerate(
        &mut self,
        device: &mut dyn GpuDevice,
        width: u32,
        height: u32,
    ) -> Result<()> {
        for texture in self.textures.drain(..).flatten() {
            device.destroy_texture(texture);
        }
        self.size = Some((width, height));
        Ok(())
    }
}

impl RenderNode for Offscreen {
    fn execute(&mut self, _ctx: &mut ExecuteContext) -> Result<()> {
        Ok(())
    }

    fn destroy(&mut self, device: &mut dyn GpuDevice) {
        for texture in self.textures.drain(..).flatten() {
            device.destroy_texture(texture);
        }
    }

    fn self_owned_attachments(&mut self) -> Option<&mut dyn SelfOwnedAttachments> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn registry_with_test_nodes(log: &EventLog) -> NodeFactoryRegistry {
    let mut registry = NodeFactoryRegistry::with_builtin_nodes();

    let recorder_log = Rc::clone(log);
    registry
        .register("recorder", move |setup: &mut NodeSetup, config: &str| {
            setup.add_sink("colorbuffer")?.add_source(
                "colorbuffer",
                ResourceType::Texture,
                SourceOrigin::OtherPass,
            )?;
            let recorder: Box<dyn RenderNode> = Box::new(Recorder {
                name: setup.name().to_string(),
                log: Rc::clone(&recorder_log),
                fail: config == "fail",
            });
            Ok(recorder)
        })
        .unwrap();

    let watcher_log = Rc::clone(log);
    registry
        .register("watcher", move |setup: &mut NodeSetup, _config: &str| {
            let watcher: Box<dyn RenderNode> = Box::new(Recorder {
                name: setup.name().to_string(),
                log: Rc::clone(&watcher_log),
                fail: false,
            });
            Ok(watcher)
        })
        .unwrap();

    registry
        .register("orphan", |setup: &mut NodeSetup, _config: &str| {
            setup.add_source("atlas", ResourceType::Texture, SourceOrigin::SelfOwned)?;
            let orphan: Box<dyn RenderNode> = Box::new(Orphan);
            Ok(orphan)
        })
        .unwrap();

    registry
        .register("leaves_pass_open", |setup: &mut NodeSetup, _config: &str| {
            setup
                .add_typed_sink("colorbuffer", ResourceType::Texture)?
                .add_source("colorbuffer", ResourceType::Texture, SourceOrigin::OtherPass)?
                .add_attachment("colorbuffer");
            let node: Box<dyn RenderNode> = Box::new(LeavesPassOpen);
            Ok(node)
        })
        .unwrap();

    registry
        .register("offscreen", |setup: &mut NodeSetup, _config: &str| {
            setup
                .add_source("colorbuffer", ResourceType::Texture, SourceOrigin::SelfOwned)?
                .add_attachment("colorbuffer");
            let node: Box<dyn RenderNode> = Box::new(Offscreen::default());
            Ok(node)
        })
        .unwrap();

    registry
}

/// frame_begin -> skybox -> frame_end
fn skybox_graph(registry: &NodeFactoryRegistry) -> RenderGraph {
    let mut graph = RenderGraph::with_window_buffers("main");
    graph
        .create_node(registry, "frame_begin", "frame_begin", "")
        .unwrap();
    graph.create_node(registry, "skybox", "skybox", "").unwrap();
    graph.create_node(registry, "frame_end", "frame_end", "").unwrap();
    graph
        .set_sink_linkage("skybox", "colorbuffer", Some("frame_begin"), "colorbuffer")
        .unwrap();
    graph
        .set_sink_linkage("frame_end", "colorbuffer", Some("skybox"), "colorbuffer")
        .unwrap();
    graph
}

/// frame_begin, shadow, skybox, forward, ui, frame_end
fn forward_graph(registry: &NodeFactoryRegistry) -> RenderGraph {
    let mut graph = RenderGraph::with_window_buffers("forward");
    for (name, type_name) in [
        ("frame_begin", "frame_begin"),
        ("shadow", "shadow"),
        ("skybox", "skybox"),
        ("forward", "forward"),
        ("ui", "standard_ui"),
        ("frame_end", "frame_end"),
    ] {
        graph.create_node(registry, name, type_name, "").unwrap();
    }
    let links = [
        ("skybox", "colorbuffer", "frame_begin", "colorbuffer"),
        ("forward", "colorbuffer", "skybox", "colorbuffer"),
        ("forward", "depthbuffer", "frame_begin", "depthbuffer"),
        ("forward", "shadowmap", "shadow", "depthbuffer"),
        ("ui", "colorbuffer", "forward", "colorbuffer"),
        ("frame_end", "colorbuffer", "ui", "colorbuffer"),
    ];
    for (node, sink, source_node, source) in links {
        graph
            .set_sink_linkage(node, sink, Some(source_node), source)
            .unwrap();
    }
    graph
}

fn first_frame() -> FrameData {
    let mut frame = FrameData::new();
    frame.advance(1.0 / 60.0);
    frame
}

#[test]
fn skybox_chain_links_and_feeds_backbuffer() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut device = HeadlessDevice::new(800, 600);
    let mut graph = skybox_graph(&registry);

    graph.finalize(&mut device).unwrap();
    assert_eq!(graph.state(), GraphState::Finalized);

    for node in graph.nodes() {
        for sink in node.sinks() {
            assert!(sink.bound_source.is_some(), "{}.{} unbound", node.name(), sink.name);
        }
    }

    let (handle, source) = graph.backbuffer().unwrap();
    assert_eq!(handle.owner, SourceOwner::Node(1));
    assert_eq!(graph.source_owner_name(handle), Some("skybox"));
    assert_eq!(source.name, "colorbuffer");
    assert!(source.is_backbuffer);

    let skybox = graph.node("skybox").unwrap();
    assert_eq!(skybox.render_targets().len(), device.buffered_frame_count());
    assert!(
        skybox
            .render_targets()
            .iter()
            .all(|t| (t.width, t.height) == (800, 600))
    );

    graph.destroy(&mut device);
}

#[test]
fn missing_backbuffer_consumer_initializes_nothing() {
    let log = EventLog::default();
    let registry = registry_with_test_nodes(&log);
    let mut device = HeadlessDevice::new(800, 600);

    let mut graph = RenderGraph::with_window_buffers("headless");
    graph
        .create_node(&registry, "frame_begin", "frame_begin", "")
        .unwrap();
    graph.create_node(&registry, "watcher", "watcher", "").unwrap();
    graph.create_node(&registry, "shadow", "shadow", "").unwrap();

    let err = graph.finalize(&mut device).unwrap_err();
    assert!(matches!(
        err,
        RenderGraphError::Link(LinkError::NoBackbufferConsumer)
    ));
    assert_eq!(err.kind(), ErrorKind::Link);
    assert_eq!(graph.state(), GraphState::Failed);
    assert!(log.borrow().is_empty());
    assert!(graph.nodes().iter().all(|n| n.render_targets().is_empty()));
    assert_eq!(device.live_render_target_count(), 0);
    assert_eq!(device.live_texture_count(), 0);

    graph.destroy(&mut device);
}

#[test]
fn duplicate_names_are_rejected() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut graph = skybox_graph(&registry);

    let err = graph
        .create_node(&registry, "skybox", "skybox", "")
        .unwrap_err();
    assert!(matches!(
        err,
        RenderGraphError::Link(LinkError::DuplicateNodeName(name)) if name == "skybox"
    ));

    let err = graph
        .add_source("skybox", "colorbuffer", ResourceType::Texture, SourceOrigin::SelfOwned)
        .unwrap_err();
    assert!(matches!(
        err,
        RenderGraphError::Link(LinkError::DuplicateSourceName { .. })
    ));

    let err = graph.add_sink("frame_end", "colorbuffer").unwrap_err();
    assert!(matches!(
        err,
        RenderGraphError::Link(LinkError::DuplicateSinkName { .. })
    ));

    let err = graph
        .add_global_source("colorbuffer", ResourceType::Texture, SourceOrigin::Global)
        .unwrap_err();
    assert!(matches!(
        err,
        RenderGraphError::Link(LinkError::DuplicateSourceName { .. })
    ));
}

#[test]
fn unknown_node_type_is_rejected() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut graph = RenderGraph::new("g");
    let err = graph
        .create_node(&registry, "bloom", "bloom", "")
        .unwrap_err();
    assert!(matches!(
        err,
        RenderGraphError::Link(LinkError::UnknownNodeType(name)) if name == "bloom"
    ));
    assert!(graph.nodes().is_empty());
}

#[test]
fn resize_rebuilds_window_sized_targets_idempotently() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut device = HeadlessDevice::new(800, 600);
    let mut graph = skybox_graph(&registry);
    graph.finalize(&mut device).unwrap();
    graph.load_resources(&mut device).unwrap();

    graph.on_resize(&mut device, 1920, 1080).unwrap();
    let first: Vec<_> = graph
        .node("skybox")
        .unwrap()
        .render_targets()
        .iter()
        .map(|t| t.desc())
        .collect();
    assert!(first.iter().all(|d| (d.width, d.height) == (1920, 1080)));

    graph.on_resize(&mut device, 1920, 1080).unwrap();
    let second: Vec<_> = graph
        .node("skybox")
        .unwrap()
        .render_targets()
        .iter()
        .map(|t| t.desc())
        .collect();
    assert_eq!(first, second);
    assert_eq!(device.live_render_target_count(), device.buffered_frame_count());

    graph.on_resize(&mut device, 0, 0).unwrap();
    assert_eq!(graph.window_size(), (1920, 1080));

    graph.destroy(&mut device);
}

#[test]
fn shadow_atlas_keeps_its_resolution() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut device = HeadlessDevice::new(800, 600);
    let mut graph = skybox_graph(&registry);
    graph
        .create_node(&registry, "shadow", "shadow", r#"{ "resolution": 1024 }"#)
        .unwrap();
    graph.finalize(&mut device).unwrap();

    let atlas_sizes = |graph: &RenderGraph, device: &HeadlessDevice| -> Vec<(u32, u32, u32)> {
        graph
            .node("shadow")
            .unwrap()
            .source("depthbuffer")
            .unwrap()
            .textures
            .iter()
            .map(|t| {
                let desc = device.texture_desc(*t).unwrap();
                (desc.width, desc.height, desc.layers)
            })
            .collect()
    };

    let before = atlas_sizes(&graph, &device);
    assert_eq!(before.len(), device.buffered_frame_count());
    assert!(
        before
            .iter()
            .all(|s| *s == (1024, 1024, MAX_SHADOW_CASCADE_COUNT as u32))
    );
    let textures_before: Vec<TextureHandle> = graph
        .node("shadow")
        .unwrap()
        .source("depthbuffer")
        .unwrap()
        .textures
        .clone();

    graph.on_resize(&mut device, 1920, 1080).unwrap();

    let shadow = graph.node("shadow").unwrap();
    assert_eq!(shadow.source("depthbuffer").unwrap().textures, textures_before);
    assert!(
        shadow
            .render_targets()
            .iter()
            .all(|t| (t.width, t.height) == (1024, 1024))
    );
    assert_eq!(shadow.source("cascade_count").unwrap().number, 4);
    assert_eq!(atlas_sizes(&graph, &device), before);

    graph.destroy(&mut device);
    assert_eq!(device.live_texture_count(), 0);
}

#[test]
fn execute_failure_skips_remaining_nodes() {
    let log = EventLog::default();
    let registry = registry_with_test_nodes(&log);
    let mut device = HeadlessDevice::new(320, 240);

    let mut graph = RenderGraph::with_window_buffers("abc");
    graph.create_node(&registry, "A", "recorder", "").unwrap();
    graph.create_node(&registry, "B", "recorder", "fail").unwrap();
    graph.create_node(&registry, "C", "recorder", "").unwrap();
    graph.create_node(&registry, "end", "frame_end", "").unwrap();
    graph
        .set_sink_linkage("A", "colorbuffer", None, "colorbuffer")
        .unwrap();
    graph
        .set_sink_linkage("B", "colorbuffer", Some("A"), "colorbuffer")
        .unwrap();
    graph
        .set_sink_linkage("C", "colorbuffer", Some("B"), "colorbuffer")
        .unwrap();
    graph
        .set_sink_linkage("end", "colorbuffer", Some("C"), "colorbuffer")
        .unwrap();

    graph.finalize(&mut device).unwrap();
    graph.load_resources(&mut device).unwrap();
    assert_eq!(*log.borrow(), ["init:A", "init:B", "init:C"]);
    log.borrow_mut().clear();

    let err = graph.execute_frame(&mut device, &first_frame()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert!(matches!(&err, RenderGraphError::Execution { node, .. } if node == "B"));
    assert_eq!(*log.borrow(), ["exec:A", "exec:B"]);
    assert_eq!(
        device.take_commands(),
        vec![
            DeviceCommand::BeginFrame { slot: 0 },
            DeviceCommand::AbortFrame { slot: 0 },
        ]
    );

    assert_eq!(graph.state(), GraphState::Loaded);
    graph.destroy(&mut device);
}

#[test]
fn disabled_node_does_not_execute() {
    let log = EventLog::default();
    let registry = registry_with_test_nodes(&log);
    let mut device = HeadlessDevice::new(320, 240);

    let mut graph = RenderGraph::with_window_buffers("toggle");
    graph.create_node(&registry, "A", "recorder", "fail").unwrap();
    graph.create_node(&registry, "end", "frame_end", "").unwrap();
    graph
        .set_sink_linkage("A", "colorbuffer", None, "colorbuffer")
        .unwrap();
    graph
        .set_sink_linkage("end", "colorbuffer", Some("A"), "colorbuffer")
        .unwrap();
    graph.finalize(&mut device).unwrap();
    graph.load_resources(&mut device).unwrap();

    graph.set_node_enabled("A", false).unwrap();
    graph.execute_frame(&mut device, &first_frame()).unwrap();
    assert!(!log.borrow().iter().any(|e| e.starts_with("exec:")));
    assert_eq!(device.current_frame_slot(), 1);

    graph.destroy(&mut device);
}

#[test]
fn destroy_twice_is_a_no_op() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut device = HeadlessDevice::new(800, 600);
    let mut graph = forward_graph(&registry);
    graph.finalize(&mut device).unwrap();
    graph.load_resources(&mut device).unwrap();
    assert!(device.live_shader_count() > 0);

    graph.destroy(&mut device);
    assert_eq!(graph.state(), GraphState::Destroyed);
    assert_eq!(device.live_render_target_count(), 0);
    assert_eq!(device.live_texture_count(), 0);
    assert_eq!(device.live_shader_count(), 0);

    graph.destroy(&mut device);
    assert_eq!(graph.state(), GraphState::Destroyed);

    let err = graph
        .execute_frame(&mut device, &first_frame())
        .unwrap_err();
    assert!(matches!(err, RenderGraphError::Destroyed(_)));
}

#[test]
fn sink_reading_a_later_node_is_an_order_violation() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut device = HeadlessDevice::new(800, 600);

    let mut graph = RenderGraph::with_window_buffers("order");
    graph
        .create_node(&registry, "frame_begin", "frame_begin", "")
        .unwrap();
    graph.create_node(&registry, "early", "skybox", "").unwrap();
    graph.create_node(&registry, "late", "skybox", "").unwrap();
    graph.create_node(&registry, "frame_end", "frame_end", "").unwrap();
    graph
        .set_sink_linkage("early", "colorbuffer", Some("late"), "colorbuffer")
        .unwrap();
    graph
        .set_sink_linkage("late", "colorbuffer", Some("frame_begin"), "colorbuffer")
        .unwrap();
    graph
        .set_sink_linkage("frame_end", "colorbuffer", Some("early"), "colorbuffer")
        .unwrap();

    let err = graph.finalize(&mut device).unwrap_err();
    assert!(matches!(
        err,
        RenderGraphError::Link(LinkError::OrderViolation { node, producer, .. })
            if node == "early" && producer == "late"
    ));
}

#[test]
fn typed_sink_rejects_mismatched_source() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut device = HeadlessDevice::new(800, 600);
    let mut graph = forward_graph(&registry);
    graph
        .set_sink_linkage("forward", "depthbuffer", Some("frame_begin"), "colorbuffer")
        .unwrap();

    let err = graph.finalize(&mut device).unwrap_err();
    assert!(matches!(
        err,
        RenderGraphError::Link(LinkError::TypeMismatch {
            expected: ResourceType::DepthStencil,
            found: ResourceType::Texture,
            ..
        })
    ));
}

#[test]
fn unlinked_sink_fails_finalize() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut device = HeadlessDevice::new(800, 600);

    let mut graph = RenderGraph::with_window_buffers("unlinked");
    graph
        .create_node(&registry, "frame_begin", "frame_begin", "")
        .unwrap();
    graph.create_node(&registry, "frame_end", "frame_end", "").unwrap();

    let err = graph.finalize(&mut device).unwrap_err();
    assert!(matches!(
        err,
        RenderGraphError::Link(LinkError::UnlinkedSink { node, sink })
            if node == "frame_end" && sink == "colorbuffer"
    ));
}

#[test]
fn linking_to_missing_source_fails_immediately() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut graph = skybox_graph(&registry);
    let err = graph
        .set_sink_linkage("frame_end", "colorbuffer", Some("skybox"), "normals")
        .unwrap_err();
    assert!(matches!(
        err,
        RenderGraphError::Link(LinkError::UnknownSource { .. })
    ));
    let err = graph
        .set_sink_linkage("frame_end", "colorbuffer", Some("bloom"), "colorbuffer")
        .unwrap_err();
    assert!(matches!(err, RenderGraphError::Link(LinkError::UnknownNode(_))));
}

#[test]
fn self_owned_source_without_accessor_fails() {
    let log = EventLog::default();
    let registry = registry_with_test_nodes(&log);
    let mut device = HeadlessDevice::new(800, 600);
    let mut graph = skybox_graph(&registry);
    graph.create_node(&registry, "orphan", "orphan", "").unwrap();

    let err = graph.finalize(&mut device).unwrap_err();
    assert!(matches!(
        err,
        RenderGraphError::Link(LinkError::MissingAccessor { node, source_name })
            if node == "orphan" && source_name == "atlas"
    ));
}

#[test]
fn missing_shader_fails_load_resources() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut device = HeadlessDevice::new(800, 600);
    device.unregister_shader("builtin.skybox");
    let mut graph = skybox_graph(&registry);
    graph.finalize(&mut device).unwrap();

    let err = graph.load_resources(&mut device).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceAcquisition);
    assert!(matches!(
        &err,
        RenderGraphError::ResourceAcquisition { node, .. } if node == "skybox"
    ));
    assert_eq!(graph.state(), GraphState::Failed);

    let err = graph
        .execute_frame(&mut device, &first_frame())
        .unwrap_err();
    assert!(matches!(err, RenderGraphError::NotReady { .. }));
    graph.destroy(&mut device);
}

#[test]
fn construction_after_finalize_is_rejected() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut device = HeadlessDevice::new(800, 600);
    let mut graph = skybox_graph(&registry);
    graph.finalize(&mut device).unwrap();

    let err = graph
        .create_node(&registry, "extra", "skybox", "")
        .unwrap_err();
    assert!(matches!(err, RenderGraphError::AlreadyFinalized(_)));
    let err = graph.finalize(&mut device).unwrap_err();
    assert!(matches!(err, RenderGraphError::AlreadyFinalized(_)));
    graph.destroy(&mut device);
}

#[test]
fn skybox_frame_records_one_pass() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut device = HeadlessDevice::new(800, 600);
    let mut graph = skybox_graph(&registry);
    graph.finalize(&mut device).unwrap();
    graph.load_resources(&mut device).unwrap();

    graph.execute_frame(&mut device, &first_frame()).unwrap();
    let commands = device.take_commands();
    assert_eq!(commands.first(), Some(&DeviceCommand::BeginFrame { slot: 0 }));
    assert_eq!(commands.last(), Some(&DeviceCommand::EndFrame { slot: 0 }));
    let target = graph.node("skybox").unwrap().render_targets()[0].handle;
    assert!(commands.iter().any(|c| matches!(
        c,
        DeviceCommand::BeginRender { target: t, layer: 0, clear } if *t == target && clear.color.is_some()
    )));
    assert_eq!(
        commands
            .iter()
            .filter(|c| matches!(c, DeviceCommand::Draw(_)))
            .count(),
        1
    );

    graph.execute_frame(&mut device, &first_frame()).unwrap();
    let commands = device.take_commands();
    let target = graph.node("skybox").unwrap().render_targets()[1].handle;
    assert!(commands.iter().any(
        |c| matches!(c, DeviceCommand::BeginRender { target: t, .. } if *t == target)
    ));

    graph.destroy(&mut device);
}

#[test]
fn pushed_geometry_and_ui_reach_the_device() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut device = HeadlessDevice::new(800, 600);
    let mut graph = forward_graph(&registry);
    graph.finalize(&mut device).unwrap();
    graph.load_resources(&mut device).unwrap();
    let (_, backbuffer) = graph.backbuffer().unwrap();
    assert_eq!(backbuffer.name, "colorbuffer");

    let transform = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
    let forward = graph.pass_mut::<ForwardPass>("forward").unwrap();
    forward.submit(MeshDraw::new(0..36, transform).with_color([1.0, 0.0, 0.0, 1.0]));
    assert_eq!(forward.queued(), 1);

    let mut ui = UiRenderData::new();
    ui.push(
        RenderDataItem::quad(42, Mat4::IDENTITY)
            .with_clip_mask(3)
            .with_texture(TextureHandle(99)),
    );
    graph.pass_mut::<StandardUiPass>("ui").unwrap().submit(ui);
    assert!(graph.pass_mut::<ForwardPass>("ui").is_none());

    graph.execute_frame(&mut device, &first_frame()).unwrap();
    let draws: Vec<_> = device
        .take_commands()
        .into_iter()
        .filter_map(|c| match c {
            DeviceCommand::Draw(draw) => Some(draw),
            _ => None,
        })
        .collect();

    let shadow_atlas = graph
        .node("shadow")
        .unwrap()
        .source("depthbuffer")
        .unwrap()
        .texture(0);
    let mesh = draws
        .iter()
        .find(|d| d.color == [1.0, 0.0, 0.0, 1.0])
        .unwrap();
    assert_eq!(mesh.transform, transform);
    assert_eq!(mesh.vertices, 0..36);
    assert_eq!(mesh.texture, shadow_atlas);

    let widget = draws.iter().find(|d| d.instance_id == 42).unwrap();
    assert_eq!(widget.clip_mask, Some(3));
    assert_eq!(widget.texture, Some(TextureHandle(99)));

    assert_eq!(graph.pass_mut::<ForwardPass>("forward").unwrap().queued(), 0);
    graph.destroy(&mut device);
}

#[test]
fn graph_builds_from_json() {
    let config = GraphConfig::from_json(
        r#"{
          "name": "from_json",
          "nodes": [
            { "name": "frame_begin", "type": "frame_begin" },
            { "name": "sky", "type": "skybox", "config": { "clear_color": [0, 0, 0.2, 1] },
              "links": [ { "sink": "colorbuffer", "source_node": "frame_begin", "source": "colorbuffer" } ] },
            { "name": "frame_end", "type": "frame_end",
              "links": [ { "sink": "colorbuffer", "source_node": "sky", "source": "colorbuffer" } ] }
          ]
        }"#,
    )
    .unwrap();
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut device = HeadlessDevice::new(640, 480);

    let mut graph = RenderGraph::from_config(&config, &registry).unwrap();
    assert_eq!(graph.global_sources().len(), 2);
    graph.finalize(&mut device).unwrap();
    let (handle, _) = graph.backbuffer().unwrap();
    assert_eq!(graph.source_owner_name(handle), Some("sky"));
    graph.destroy(&mut device);
}

#[test]
fn bad_pass_config_is_a_config_error() {
    let registry = NodeFactoryRegistry::with_builtin_nodes();
    let mut graph = RenderGraph::with_window_buffers("cfg");
    let err = graph
        .create_node(&registry, "shadow", "shadow", r#"{ "resolution": "big" }"#)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    let err = graph
        .create_node(&registry, "shadow", "shadow", r#"{ "resolution": 0 }"#)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(graph.nodes().is_empty());
}

#[test]
fn unfinished_frame_is_aborted_and_later_frames_recover() {
    let log = EventLog::default();
    let registry = registry_with_test_nodes(&log);
    let mut device = HeadlessDevice::new(320, 240);

    let mut graph = RenderGraph::with_window_buffers("unfinished");
    graph
        .create_node(&registry, "frame_begin", "frame_begin", "")
        .unwrap();
    graph.create_node(&registry, "sky", "skybox", "").unwrap();
    graph
        .create_node(&registry, "open", "leaves_pass_open", "")
        .unwrap();
    graph.create_node(&registry, "frame_end", "frame_end", "").unwrap();
    graph
        .set_sink_linkage("sky", "colorbuffer", Some("frame_begin"), "colorbuffer")
        .unwrap();
    graph
        .set_sink_linkage("open", "colorbuffer", Some("sky"), "colorbuffer")
        .unwrap();
    graph
        .set_sink_linkage("frame_end", "colorbuffer", Some("open"), "colorbuffer")
        .unwrap();
    graph.finalize(&mut device).unwrap();
    graph.load_resources(&mut device).unwrap();

    let err = graph
        .execute_frame(&mut device, &first_frame())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert!(matches!(
        &err,
        RenderGraphError::Execution { node, .. } if node == "frame_end"
    ));
    let commands = device.take_commands();
    assert_eq!(commands.last(), Some(&DeviceCommand::AbortFrame { slot: 0 }));
    assert!(
        !commands
            .iter()
            .any(|c| matches!(c, DeviceCommand::EndFrame { .. }))
    );

    graph.set_node_enabled("open", false).unwrap();
    graph.execute_frame(&mut device, &first_frame()).unwrap();
    assert_eq!(
        device.take_commands().last(),
        Some(&DeviceCommand::EndFrame { slot: 0 })
    );
    assert_eq!(device.current_frame_slot(), 1);

    graph.destroy(&mut device);
}

#[test]
fn window_sized_self_owned_textures_follow_resize() {
    let log = EventLog::default();
    let registry = registry_with_test_nodes(&log);
    let mut device = HeadlessDevice::new(800, 600);

    let mut graph = RenderGraph::with_window_buffers("offscreen");
    graph
        .create_node(&registry, "frame_begin", "frame_begin", "")
        .unwrap();
    graph.create_node(&registry, "off", "offscreen", "").unwrap();
    graph.create_node(&registry, "post", "skybox", "").unwrap();
    graph.create_node(&registry, "frame_end", "frame_end", "").unwrap();
    graph
        .set_sink_linkage("post", "colorbuffer", Some("off"), "colorbuffer")
        .unwrap();
    graph
        .set_sink_linkage("frame_end", "colorbuffer", Some("frame_begin"), "colorbuffer")
        .unwrap();
    graph.finalize(&mut device).unwrap();

    let before: Vec<TextureHandle> = graph
        .node("off")
        .unwrap()
        .source("colorbuffer")
        .unwrap()
        .textures
        .clone();
    assert_eq!(before.len(), device.buffered_frame_count());
    assert_eq!(device.live_texture_count(), before.len());

    graph.on_resize(&mut device, 1920, 1080).unwrap();

    let after = &graph.node("off").unwrap().source("colorbuffer").unwrap().textures;
    assert_eq!(after.len(), before.len());
    assert!(after.iter().all(|t| !before.contains(t)));
    assert!(before.iter().all(|t| device.texture_desc(*t).is_none()));
    assert_eq!(
        &graph.node("post").unwrap().sink("colorbuffer").unwrap().value.textures,
        after
    );
    assert_eq!(
        &graph.node("post").unwrap().source("colorbuffer").unwrap().textures,
        after
    );
    for name in ["off", "post"] {
        assert!(
            graph
                .node(name)
                .unwrap()
                .render_targets()
                .iter()
                .all(|t| (t.width, t.height) == (1920, 1080)),
            "{} not resized",
            name
        );
    }
    assert_eq!(device.live_texture_count(), before.len());

    graph.destroy(&mut device);
    assert_eq!(device.live_texture_count(), 0);
}
