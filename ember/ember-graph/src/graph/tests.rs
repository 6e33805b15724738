use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ember_rhi::null::{NullCommandBuffer, RecordedCommand};
use ember_rhi::{
    CommandPoolInfo, Device, DeviceInfo, Format, ImageInfo, ImageUsage, LoadOp, QueueInfo,
    QueueType, ResourceState, RhiError,
};

use super::*;

fn device() -> Arc<dyn Device> {
    ember_rhi::create_device(&DeviceInfo::default()).unwrap()
}

fn swapchain_image(device: &Arc<dyn Device>, width: u32, height: u32) -> Arc<dyn Image> {
    device
        .create_image(&ImageInfo {
            width,
            height,
            format: Format::B8G8R8A8Srgb,
            usage: ImageUsage::COLOR_ATTACHMENT,
            ..Default::default()
        })
        .unwrap()
}

fn color_info(width: u32, height: u32) -> ImageInfo {
    ImageInfo {
        width,
        height,
        format: Format::R16G16B16A16Sfloat,
        ..Default::default()
    }
}

fn backbuffer_info() -> ImageInfo {
    ImageInfo {
        format: Format::B8G8R8A8Srgb,
        ..Default::default()
    }
}

/// Two passes: a G-buffer writer and a deferred reader driving the backbuffer.
fn build_deferred(device: &Arc<dyn Device>) -> RenderGraph {
    let mut graph = RenderGraph::new(Arc::clone(device));
    {
        let mut gbuffer = graph.add_pass("gbuffer");
        gbuffer.add_color_output("position", color_info(1400, 900));
        gbuffer.add_color_output("normal", color_info(1400, 900));
        gbuffer.add_color_output("albedo-spec", color_info(1400, 900));
        gbuffer.add_depth_stencil_output(
            "depth",
            ImageInfo {
                width: 1400,
                height: 900,
                format: Format::D32Sfloat,
                ..Default::default()
            },
        );
    }
    {
        let mut lighting = graph.add_pass("lighting");
        lighting.add_texture_input("position");
        lighting.add_texture_input("normal");
        lighting.add_texture_input("albedo-spec");
        lighting.add_color_output("back", backbuffer_info());
    }
    graph.set_backbuffer_source("back");
    graph.set_swapchain_dimensions(1400, 900);
    graph
}

#[test]
fn deferred_graph_compiles_transients_and_barriers() {
    let device = device();
    let mut graph = build_deferred(&device);
    graph.build().unwrap();

    // Three color transients plus depth; the backbuffer owns no storage.
    assert_eq!(graph.physical_image_count(), 4);
    assert!(graph.physical_image("back").is_none());
    for name in ["position", "normal", "albedo-spec"] {
        let info = graph.image_info(name).unwrap();
        assert_eq!(
            info.usage,
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED
        );
    }

    // First use discards; the consumer sees the producer's state exactly.
    let gbuffer = graph.barriers_for_pass("gbuffer").unwrap();
    assert_eq!(gbuffer.len(), 4);
    for barrier in gbuffer.iter().take(3) {
        assert_eq!(barrier.old_state, ResourceState::Undefined);
        assert_eq!(barrier.new_state, ResourceState::ColorAttachment);
    }
    assert_eq!(gbuffer[3].new_state, ResourceState::DepthStencilWrite);

    let lighting = graph.barriers_for_pass("lighting").unwrap();
    let reads: Vec<_> = lighting
        .iter()
        .filter(|b| b.new_state == ResourceState::ShaderReadOnly)
        .collect();
    assert_eq!(reads.len(), 3);
    for read in reads {
        assert_eq!(read.old_state, ResourceState::ColorAttachment);
    }
}

#[test]
fn producer_orders_before_consumer_regardless_of_declaration() {
    let device = device();
    let mut graph = RenderGraph::new(Arc::clone(&device));
    {
        let mut late = graph.add_pass("compose");
        late.add_texture_input("scene");
        late.add_color_output("back", backbuffer_info());
    }
    {
        let mut early = graph.add_pass("scene");
        early.add_color_output("scene", color_info(64, 64));
    }
    graph.set_backbuffer_source("back");
    graph.set_swapchain_dimensions(64, 64);
    graph.build().unwrap();
    assert_eq!(graph.pass_order(), vec!["scene", "compose"]);
}

#[test]
fn independent_passes_keep_declaration_order() {
    let device = device();
    let mut graph = RenderGraph::new(Arc::clone(&device));
    for name in ["a", "b", "c"] {
        let mut pass = graph.add_pass(name);
        pass.add_color_output(&format!("{name}-target"), color_info(32, 32));
    }
    graph.build().unwrap();
    assert_eq!(graph.pass_order(), vec!["a", "b", "c"]);
}

#[test]
fn cyclic_declaration_fails_without_partial_state() {
    let device = device();
    let mut graph = RenderGraph::new(Arc::clone(&device));
    {
        let mut a = graph.add_pass("a");
        a.add_texture_input("x");
        a.add_color_output("y", color_info(32, 32));
    }
    {
        let mut b = graph.add_pass("b");
        b.add_color_output("x", color_info(32, 32));
        b.add_texture_input("y");
    }
    let err = graph.build().unwrap_err();
    assert!(matches!(err, RhiError::CyclicGraph(_)));
    assert_eq!(graph.physical_image_count(), 0);
    assert_eq!(graph.pass_cache_len(), 0);
    assert_eq!(device.live_allocations(), 0);
}

#[test]
fn barrier_coverage_is_exactly_one_per_usage() {
    let device = device();
    let mut graph = build_deferred(&device);
    graph.build().unwrap();

    for (pass, uses) in [
        (
            "gbuffer",
            vec![
                ("position", ResourceState::ColorAttachment),
                ("normal", ResourceState::ColorAttachment),
                ("albedo-spec", ResourceState::ColorAttachment),
                ("depth", ResourceState::DepthStencilWrite),
            ],
        ),
        (
            "lighting",
            vec![
                ("position", ResourceState::ShaderReadOnly),
                ("normal", ResourceState::ShaderReadOnly),
                ("albedo-spec", ResourceState::ShaderReadOnly),
                ("back", ResourceState::ColorAttachment),
            ],
        ),
    ] {
        let barriers = graph.barriers_for_pass(pass).unwrap();
        for (image, required) in uses {
            let index = graph.image_index(image).unwrap();
            let matching: Vec<_> = barriers
                .iter()
                .filter(|b| b.image_index == index)
                .collect();
            assert_eq!(matching.len(), 1, "pass {pass} image {image}");
            assert_eq!(matching[0].new_state, required, "pass {pass} image {image}");
        }
    }
}

#[test]
fn rebuild_is_idempotent() {
    let device = device();
    let destroys = Arc::new(AtomicU32::new(0));
    let creates = Arc::new(AtomicU32::new(0));
    let mut graph = build_deferred(&device);
    {
        let creates = Arc::clone(&creates);
        let destroys = Arc::clone(&destroys);
        let mut pass = graph.add_pass("counters");
        pass.add_color_output("counter-target", color_info(16, 16));
        pass.set_create_callback(Box::new(move |_ctx| {
            creates.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }));
        pass.set_destroy_callback(Box::new(move |_device, _data| {
            destroys.fetch_add(1, Ordering::Relaxed);
        }));
    }
    graph.build().unwrap();
    let images_first = graph.physical_image_count();
    let cache_first = graph.pass_cache_len();
    assert_eq!(creates.load(Ordering::Relaxed), 1);
    assert_eq!(destroys.load(Ordering::Relaxed), 0);

    graph.build().unwrap();
    assert_eq!(graph.physical_image_count(), images_first);
    assert_eq!(graph.pass_cache_len(), cache_first);
    assert_eq!(creates.load(Ordering::Relaxed), 2);
    assert_eq!(destroys.load(Ordering::Relaxed), 1);
}

#[test]
fn resize_recreates_transients_and_keeps_stale_cache_entries() {
    let device = device();
    let mut graph = RenderGraph::new(Arc::clone(&device));
    {
        let mut pass = graph.add_pass("main");
        // Extent omitted: transients follow the swapchain dimensions.
        pass.add_color_output(
            "scene",
            ImageInfo {
                format: Format::R8G8B8A8Unorm,
                ..Default::default()
            },
        );
    }
    graph.set_swapchain_dimensions(1400, 900);
    graph.build().unwrap();
    let before = graph.physical_image("scene").unwrap();
    assert_eq!(before.info().width, 1400);
    assert_eq!(graph.pass_cache_len(), 1);

    graph.set_swapchain_dimensions(800, 600);
    graph.build().unwrap();
    let after = graph.physical_image("scene").unwrap();
    assert_eq!((after.info().width, after.info().height), (800, 600));
    assert!(!Arc::ptr_eq(&before, &after));
    // The old-extent entry stays cached, unused.
    assert_eq!(graph.pass_cache_len(), 2);
}

#[test]
fn backbuffer_rewiring_changes_only_the_backbuffer_slot() {
    let device = device();
    let mut graph = build_deferred(&device);
    graph.build().unwrap();

    let frame_a = swapchain_image(&device, 1400, 900);
    let frame_b = swapchain_image(&device, 1400, 900);

    graph.setup_attachments(Arc::clone(&frame_a)).unwrap();
    let lighting_a = graph
        .begin_info_for_pass("lighting")
        .unwrap()
        .color_attachments[0]
        .image
        .as_ref()
        .unwrap()
        .id();
    let gbuffer_a: Vec<_> = graph
        .begin_info_for_pass("gbuffer")
        .unwrap()
        .color_attachments
        .iter()
        .map(|a| a.image.as_ref().unwrap().id())
        .collect();

    graph.setup_attachments(Arc::clone(&frame_b)).unwrap();
    let lighting_b = graph
        .begin_info_for_pass("lighting")
        .unwrap()
        .color_attachments[0]
        .image
        .as_ref()
        .unwrap()
        .id();
    let gbuffer_b: Vec<_> = graph
        .begin_info_for_pass("gbuffer")
        .unwrap()
        .color_attachments
        .iter()
        .map(|a| a.image.as_ref().unwrap().id())
        .collect();

    assert_eq!(lighting_a, frame_a.id());
    assert_eq!(lighting_b, frame_b.id());
    assert_ne!(lighting_a, lighting_b);
    assert_eq!(gbuffer_a, gbuffer_b);
}

#[test]
fn rewritten_image_loads_previous_contents() {
    let device = device();
    let mut graph = RenderGraph::new(Arc::clone(&device));
    {
        let mut first = graph.add_pass("first");
        first.add_color_output("accum", color_info(64, 64));
        first.set_color_clear_fn(Box::new(|_, _| Some([0.0, 0.0, 0.0, 1.0])));
    }
    {
        let mut second = graph.add_pass("second");
        second.add_color_output("accum", color_info(64, 64));
    }
    graph.build().unwrap();
    let first = graph.begin_info_for_pass("first").unwrap();
    assert_eq!(first.color_attachments[0].load_op, LoadOp::Clear);
    let second = graph.begin_info_for_pass("second").unwrap();
    assert_eq!(second.color_attachments[0].load_op, LoadOp::Load);
}

/// One-pass clear-and-draw graph replayed over ten frames, checking the
/// recorded command stream and the final present transition.
#[test]
fn triangle_graph_replays_cleanly_over_frames() {
    let device = device();
    let executes = Arc::new(AtomicU32::new(0));
    let mut graph = RenderGraph::new(Arc::clone(&device));
    {
        let executes = Arc::clone(&executes);
        let mut pass = graph.add_pass("main");
        pass.add_color_output("back", backbuffer_info());
        pass.set_color_clear_fn(Box::new(|index, _| {
            (index == 0).then_some([0.1, 0.2, 0.3, 1.0])
        }));
        pass.set_execute_callback(Box::new(move |_cmd, _data| {
            executes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }));
    }
    graph.set_backbuffer_source("back");
    graph.set_swapchain_dimensions(640, 480);
    graph.build().unwrap();

    let queue = device
        .create_queue(&QueueInfo {
            queue_type: QueueType::Graphics,
        })
        .unwrap();
    let pool = device
        .create_command_pool(&CommandPoolInfo { queue: &*queue })
        .unwrap();
    let mut cmd = device.create_command_buffer(&*pool).unwrap();
    let frames = [
        swapchain_image(&device, 640, 480),
        swapchain_image(&device, 640, 480),
    ];

    for frame in 0..10u32 {
        let image = &frames[(frame % 2) as usize];
        graph.setup_attachments(Arc::clone(image)).unwrap();
        cmd.begin().unwrap();
        graph.execute(cmd.as_mut()).unwrap();
        cmd.end().unwrap();
        device.immediate_submit(&*queue, &*cmd).unwrap();

        let recorded = cmd
            .as_any()
            .downcast_ref::<NullCommandBuffer>()
            .unwrap()
            .commands();
        assert!(matches!(
            recorded[0],
            RecordedCommand::Barrier { ref images, .. }
                if images == &vec![(image.id(), ResourceState::Undefined, ResourceState::ColorAttachment)]
        ));
        assert!(matches!(
            recorded[1],
            RecordedCommand::BeginRenderPass { ref load_ops, .. } if load_ops == &vec![LoadOp::Clear]
        ));
        assert!(matches!(
            recorded.last().unwrap(),
            RecordedCommand::Barrier { images, .. }
                if images == &vec![(image.id(), ResourceState::ColorAttachment, ResourceState::Present)]
        ));
        assert_eq!(image.resource_state(), ResourceState::Present);
        // The next frame's first barrier discards, so replay stays valid.
        image.set_resource_state(ResourceState::Undefined);
    }
    assert_eq!(executes.load(Ordering::Relaxed), 10);
}

#[test]
fn create_callback_sees_render_pass_and_transients() {
    let device = device();
    let mut graph = build_deferred(&device);
    let saw = Arc::new(AtomicU32::new(0));
    {
        let saw = Arc::clone(&saw);
        let mut pass = graph.add_pass("probe");
        pass.add_texture_input("position");
        pass.add_color_output("probe-target", color_info(128, 128));
        pass.set_create_callback(Box::new(move |ctx| {
            assert_eq!(ctx.render_pass.info().color_attachments.len(), 1);
            assert!(ctx.resources.image("position").is_some());
            assert!(ctx.resources.image("back").is_none());
            assert_eq!(ctx.swapchain_width, 1400);
            saw.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }));
    }
    graph.build().unwrap();
    assert_eq!(saw.load(Ordering::Relaxed), 1);
}

#[test]
fn consumed_but_never_produced_image_is_rejected() {
    let device = device();
    let mut graph = RenderGraph::new(Arc::clone(&device));
    {
        let mut pass = graph.add_pass("reader");
        pass.add_texture_input("ghost");
        pass.add_color_output("out", color_info(8, 8));
    }
    let err = graph.build().unwrap_err();
    assert!(matches!(err, RhiError::InvalidArgument(_)));
}

#[test]
fn shutdown_releases_physical_images() {
    let device = device();
    let mut graph = build_deferred(&device);
    graph.build().unwrap();
    assert!(device.live_allocations() > 0);
    graph.shutdown();
    assert_eq!(device.live_allocations(), 0);
    assert_eq!(graph.pass_cache_len(), 0);
}
