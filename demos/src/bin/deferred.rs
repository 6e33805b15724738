//! G-buffer + deferred lighting over the render graph: one pass writes
//! position/normal/albedo-spec plus depth, a second reads all three as
//! texture inputs and shades into the backbuffer.
//!
//! Runs headless on the null backend by default and prints the compiled
//! schedule. Pass `--api vulkan` to open a window and drive real hardware;
//! that path loads SPIR-V from EMBER_SHADER_DIR (default "shaders"):
//! gbuffer.vert.spv, gbuffer.frag.spv, lighting.vert.spv, lighting.frag.spv.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use ember_app::{run_app, AppConfig, FrameDriver, WindowInfo, FRAME_COUNT};
use ember_graph::{BufferUploadJob, PassCreateContext, RenderGraph, ResourceLoader};
use ember_rhi::{
    BindingReflection, BufferInfo, BufferUsage, CommandBuffer, CompareOp, DepthState,
    DescriptorKind, DescriptorSet, DescriptorWrite, Device, DeviceInfo, Format, ImageBinding,
    ImageInfo, Pipeline, PipelineInfo, PrimitiveTopology, QueueInfo, QueueType, RasterizerState,
    RendererApi, ResourceState, RhiResult, SamplerBinding, SamplerInfo, ShaderInfo,
    ShaderModuleInfo, ShaderReflection, ShaderStages, SwapchainInfo, VertexAttribute,
    VertexBinding, VertexFormat, VertexInputRate, VertexLayout,
};

const WIDTH: u32 = 1400;
const HEIGHT: u32 = 900;

const GBUFFER_FORMAT: Format = Format::R16G16B16A16Sfloat;

fn gbuffer_image(format: Format) -> ImageInfo {
    ImageInfo {
        format,
        ..Default::default()
    }
}

struct GBufferPassData {
    pipeline: Option<Arc<dyn Pipeline>>,
    vertex_buffer: Option<Arc<dyn ember_rhi::Buffer>>,
    vertex_count: u32,
}

struct LightingPassData {
    swapchain_format: Format,
    pipeline: Option<Arc<dyn Pipeline>>,
    descriptor_set: Option<Box<dyn DescriptorSet>>,
}

/// Bytecode is opaque to the runtime; the null backend accepts any nonempty
/// word-aligned blob, hardware needs the real SPIR-V files.
fn shader_module(name: &str, bindings: Vec<BindingReflection>) -> ShaderModuleInfo {
    let dir = std::env::var("EMBER_SHADER_DIR").unwrap_or_else(|_| "shaders".to_string());
    let bytecode =
        std::fs::read(format!("{dir}/{name}.spv")).unwrap_or_else(|_| vec![0u8; 16]);
    ShaderModuleInfo {
        bytecode,
        entry_point: "main".to_string(),
        reflection: ShaderReflection {
            bindings,
            push_constants: vec![],
        },
    }
}

fn gbuffer_create(ctx: &mut PassCreateContext) -> RhiResult<()> {
    let data = ctx.user_data.downcast_mut::<GBufferPassData>().unwrap();
    let shader = ctx.device.create_shader(&ShaderInfo {
        vertex: Some(shader_module("gbuffer.vert", vec![])),
        fragment: Some(shader_module("gbuffer.frag", vec![])),
        compute: None,
    })?;
    let layout = ctx.device.create_descriptor_set_layout(&*shader)?;
    let pipeline = ctx.device.create_graphics_pipeline(&PipelineInfo {
        shader: &*shader,
        descriptor_set_layout: &*layout,
        vertex_layout: VertexLayout {
            bindings: vec![VertexBinding {
                binding: 0,
                stride: 24,
                input_rate: VertexInputRate::Vertex,
            }],
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    binding: 0,
                    format: VertexFormat::Float32x3,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    binding: 0,
                    format: VertexFormat::Float32x3,
                    offset: 12,
                },
            ],
        },
        topology: PrimitiveTopology::TriangleList,
        rasterizer: RasterizerState::default(),
        depth_state: DepthState {
            depth_test: true,
            depth_write: true,
            compare_op: CompareOp::Less,
        },
        blend_state: None,
        sample_count: 1,
        color_attachment_formats: vec![GBUFFER_FORMAT; 3],
        depth_stencil_format: Some(Format::D32Sfloat),
        render_pass: Some(ctx.render_pass),
    })?;
    data.pipeline = Some(pipeline);
    Ok(())
}

fn gbuffer_execute(cmd: &mut dyn CommandBuffer, user_data: &mut dyn Any) -> RhiResult<()> {
    let data = user_data.downcast_mut::<GBufferPassData>().unwrap();
    cmd.set_viewport(0.0, 0.0, WIDTH as f32, HEIGHT as f32, 0.0, 1.0)?;
    cmd.set_scissor(0, 0, WIDTH, HEIGHT)?;
    cmd.bind_pipeline(data.pipeline.as_ref().unwrap().as_ref())?;
    cmd.bind_vertex_buffer(data.vertex_buffer.as_ref().unwrap().as_ref(), 0)?;
    cmd.draw(data.vertex_count, 1, 0, 0)
}

fn lighting_create(ctx: &mut PassCreateContext) -> RhiResult<()> {
    let data = ctx.user_data.downcast_mut::<LightingPassData>().unwrap();
    let shader = ctx.device.create_shader(&ShaderInfo {
        vertex: Some(shader_module("lighting.vert", vec![])),
        fragment: Some(shader_module(
            "lighting.frag",
            vec![
                BindingReflection {
                    name: "u_sampler".to_string(),
                    set: 0,
                    binding: 0,
                    kind: DescriptorKind::Sampler,
                    array_count: 1,
                    stages: ShaderStages::FRAGMENT,
                },
                BindingReflection {
                    name: "u_position".to_string(),
                    set: 0,
                    binding: 1,
                    kind: DescriptorKind::SampledImage,
                    array_count: 1,
                    stages: ShaderStages::FRAGMENT,
                },
                BindingReflection {
                    name: "u_normal".to_string(),
                    set: 0,
                    binding: 2,
                    kind: DescriptorKind::SampledImage,
                    array_count: 1,
                    stages: ShaderStages::FRAGMENT,
                },
                BindingReflection {
                    name: "u_albedo_spec".to_string(),
                    set: 0,
                    binding: 3,
                    kind: DescriptorKind::SampledImage,
                    array_count: 1,
                    stages: ShaderStages::FRAGMENT,
                },
            ],
        )),
        compute: None,
    })?;
    let layout = ctx.device.create_descriptor_set_layout(&*shader)?;
    let pipeline = ctx.device.create_graphics_pipeline(&PipelineInfo {
        shader: &*shader,
        descriptor_set_layout: &*layout,
        vertex_layout: VertexLayout::default(),
        topology: PrimitiveTopology::TriangleList,
        rasterizer: RasterizerState::default(),
        depth_state: DepthState::default(),
        blend_state: None,
        sample_count: 1,
        color_attachment_formats: vec![data.swapchain_format],
        depth_stencil_format: None,
        render_pass: Some(ctx.render_pass),
    })?;

    let sampler = ctx.device.create_sampler(&SamplerInfo::default())?;
    let position = ctx.resources.image("position").unwrap();
    let normal = ctx.resources.image("normal").unwrap();
    let albedo_spec = ctx.resources.image("albedo-spec").unwrap();
    let mut set = ctx.device.create_descriptor_set(&*layout, 0)?;
    ctx.device.update_descriptor_set(
        set.as_mut(),
        &[
            DescriptorWrite {
                descriptor_name: "u_sampler",
                buffers: &[],
                images: &[],
                samplers: &[SamplerBinding {
                    sampler: &*sampler,
                }],
            },
            DescriptorWrite {
                descriptor_name: "u_position",
                buffers: &[],
                images: &[ImageBinding {
                    image: &*position,
                    state: ResourceState::ShaderReadOnly,
                }],
                samplers: &[],
            },
            DescriptorWrite {
                descriptor_name: "u_normal",
                buffers: &[],
                images: &[ImageBinding {
                    image: &*normal,
                    state: ResourceState::ShaderReadOnly,
                }],
                samplers: &[],
            },
            DescriptorWrite {
                descriptor_name: "u_albedo_spec",
                buffers: &[],
                images: &[ImageBinding {
                    image: &*albedo_spec,
                    state: ResourceState::ShaderReadOnly,
                }],
                samplers: &[],
            },
        ],
    )?;

    data.pipeline = Some(pipeline);
    data.descriptor_set = Some(set);
    Ok(())
}

fn lighting_execute(cmd: &mut dyn CommandBuffer, user_data: &mut dyn Any) -> RhiResult<()> {
    let data = user_data.downcast_mut::<LightingPassData>().unwrap();
    let pipeline = data.pipeline.as_ref().unwrap();
    cmd.set_viewport(0.0, 0.0, WIDTH as f32, HEIGHT as f32, 0.0, 1.0)?;
    cmd.set_scissor(0, 0, WIDTH, HEIGHT)?;
    cmd.bind_pipeline(pipeline.as_ref())?;
    cmd.bind_descriptor_set(0, data.descriptor_set.as_ref().unwrap().as_ref(), pipeline.as_ref())?;
    // Fullscreen triangle; positions derived from the vertex index.
    cmd.draw(3, 1, 0, 0)
}

fn register_gbuffer_pass(graph: &mut RenderGraph, vertex_buffer: Arc<dyn ember_rhi::Buffer>) {
    let mut pass = graph.add_pass("gbuffer");
    pass.add_color_output("position", gbuffer_image(GBUFFER_FORMAT));
    pass.add_color_output("normal", gbuffer_image(GBUFFER_FORMAT));
    pass.add_color_output("albedo-spec", gbuffer_image(GBUFFER_FORMAT));
    pass.add_depth_stencil_output(
        "depth",
        ImageInfo {
            format: Format::D32Sfloat,
            ..Default::default()
        },
    );
    pass.set_user_data(Box::new(GBufferPassData {
        pipeline: None,
        vertex_buffer: Some(vertex_buffer),
        vertex_count: 36,
    }));
    pass.set_create_callback(Box::new(gbuffer_create));
    pass.set_execute_callback(Box::new(gbuffer_execute));
    pass.set_color_clear_fn(Box::new(|_, _| Some([0.0, 0.0, 0.0, 0.0])));
    pass.set_depth_stencil_clear_fn(Box::new(|_| {
        Some(ember_rhi::DepthStencilClearValue {
            depth: 1.0,
            stencil: 0,
        })
    }));
}

fn register_lighting_pass(graph: &mut RenderGraph, swapchain_format: Format) {
    let mut pass = graph.add_pass("lighting");
    pass.add_texture_input("position");
    pass.add_texture_input("normal");
    pass.add_texture_input("albedo-spec");
    pass.add_color_output(
        "back",
        ImageInfo {
            format: swapchain_format,
            ..Default::default()
        },
    );
    pass.set_user_data(Box::new(LightingPassData {
        swapchain_format,
        pipeline: None,
        descriptor_set: None,
    }));
    pass.set_create_callback(Box::new(lighting_create));
    pass.set_execute_callback(Box::new(lighting_execute));
    pass.set_color_clear_fn(Box::new(|index, _| (index == 0).then_some([0.0; 4])));
}

/// A unit cube: position + normal per vertex, 36 vertices.
fn cube_vertices() -> Vec<f32> {
    let mut vertices = Vec::with_capacity(36 * 6);
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, -1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
    ];
    for (normal, u, v) in faces {
        let corner = |a: f32, b: f32| {
            [
                normal[0] * 0.5 + u[0] * a + v[0] * b,
                normal[1] * 0.5 + u[1] * a + v[1] * b,
                normal[2] * 0.5 + u[2] * a + v[2] * b,
            ]
        };
        let quad = [
            corner(-0.5, -0.5),
            corner(0.5, -0.5),
            corner(0.5, 0.5),
            corner(-0.5, -0.5),
            corner(0.5, 0.5),
            corner(-0.5, 0.5),
        ];
        for position in quad {
            vertices.extend_from_slice(&position);
            vertices.extend_from_slice(&normal);
        }
    }
    vertices
}

/// Geometry goes up through the staging loader, batched.
fn upload_cube(device: &Arc<dyn Device>) -> RhiResult<Arc<dyn ember_rhi::Buffer>> {
    let vertices = cube_vertices();
    let vertex_buffer = device.create_buffer(&BufferInfo {
        label: Some("cube vertices"),
        size: (vertices.len() * 4) as u64,
        usage: BufferUsage::VERTEX | BufferUsage::TRANSFER_DST,
        ..Default::default()
    })?;
    let mut loader = ResourceLoader::new(Arc::clone(device), 1 << 20)?;
    loader.begin_upload_batch();
    loader.upload_buffer(&BufferUploadJob {
        dst: vertex_buffer.as_ref(),
        dst_offset: 0,
        data: bytemuck::cast_slice(&vertices),
    })?;
    loader.end_upload_batch()?;
    loader.wait_idle()?;
    Ok(vertex_buffer)
}

fn build_graph(
    device: &Arc<dyn Device>,
    swapchain_format: Format,
    swapchain_extent: (u32, u32),
) -> RhiResult<RenderGraph> {
    let vertex_buffer = upload_cube(device)?;
    let mut graph = RenderGraph::new(Arc::clone(device));
    register_gbuffer_pass(&mut graph, vertex_buffer);
    register_lighting_pass(&mut graph, swapchain_format);
    graph.set_backbuffer_source("back");
    graph.set_swapchain_dimensions(swapchain_extent.0, swapchain_extent.1);
    graph.build()?;
    Ok(graph)
}

fn run_headless() -> RhiResult<()> {
    let device = ember_rhi::create_device(&DeviceInfo::default())?;
    let queue = device.create_queue(&QueueInfo {
        queue_type: QueueType::Graphics,
    })?;
    let mut swapchain = device.create_swapchain(&SwapchainInfo {
        width: WIDTH,
        height: HEIGHT,
        format: Format::B8G8R8A8Srgb,
        min_image_count: FRAME_COUNT as u32,
        vsync: true,
        queue: &*queue,
    })?;

    let mut graph = build_graph(&device, swapchain.format(), swapchain.extent())?;

    println!("pass order: {:?}", graph.pass_order());
    for pass in ["gbuffer", "lighting"] {
        let barriers = graph.barriers_for_pass(pass).unwrap();
        println!("{pass}: {} barrier(s)", barriers.len());
        for barrier in barriers {
            println!(
                "  image #{}: {:?} -> {:?}",
                barrier.image_index, barrier.old_state, barrier.new_state
            );
        }
    }

    let mut frames = FrameDriver::new(Arc::clone(&device), Arc::clone(&queue))?;
    for _ in 0..4 {
        let image_index = frames.begin_frame(swapchain.as_mut())?;
        graph.setup_attachments(swapchain.image(image_index))?;
        graph.execute(frames.command_buffer())?;
        frames.end_frame(swapchain.as_ref())?;
    }
    device.wait_idle()?;
    println!("deferred: 4 frames recorded and presented");
    Ok(())
}

fn run_windowed(api: RendererApi) -> RhiResult<()> {
    let graph = Rc::new(RefCell::new(None::<RenderGraph>));
    let init_graph = Rc::clone(&graph);
    let update_graph = Rc::clone(&graph);
    let resize_graph = Rc::clone(&graph);
    let shutdown_graph = Rc::clone(&graph);
    run_app(AppConfig {
        window_info: WindowInfo {
            title: "ember deferred".to_string(),
            width: WIDTH,
            height: HEIGHT,
            renderer_api: api,
            ..Default::default()
        },
        log_level: log::LevelFilter::Info,
        on_init: Some(Box::new(move |ctx| {
            let format = ctx.swapchain.format();
            let extent = ctx.swapchain.extent();
            *init_graph.borrow_mut() = Some(build_graph(&ctx.device, format, extent)?);
            Ok(())
        })),
        on_update: Some(Box::new(move |ctx, _delta_time| {
            let mut graph = update_graph.borrow_mut();
            let Some(graph) = graph.as_mut() else {
                return Ok(());
            };
            let image_index = ctx.frames.begin_frame(ctx.swapchain.as_mut())?;
            graph.setup_attachments(ctx.swapchain.image(image_index))?;
            graph.execute(ctx.frames.command_buffer())?;
            ctx.frames.end_frame(ctx.swapchain.as_ref())
        })),
        on_resize: Some(Box::new(move |_ctx, width, height| {
            let mut graph = resize_graph.borrow_mut();
            let Some(graph) = graph.as_mut() else {
                return Ok(());
            };
            graph.set_swapchain_dimensions(width, height);
            graph.build()
        })),
        on_shutdown: Some(Box::new(move |_ctx| {
            if let Some(graph) = shutdown_graph.borrow_mut().as_mut() {
                graph.shutdown();
            }
        })),
    })
}

fn main() {
    let api = std::env::args()
        .skip_while(|a| a != "--api")
        .nth(1)
        .unwrap_or_else(|| "null".to_string());
    let result = match api.as_str() {
        "vulkan" => run_windowed(RendererApi::Vulkan),
        _ => {
            env_logger::Builder::new()
                .filter_level(log::LevelFilter::Info)
                .init();
            run_headless()
        }
    };
    if let Err(error) = result {
        eprintln!("deferred failed: {error}");
        std::process::exit(1);
    }
}
