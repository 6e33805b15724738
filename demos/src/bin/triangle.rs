//! One-pass triangle: a single color output bound to the backbuffer, cleared
//! to (0.1, 0.2, 0.3, 1.0), with a three-vertex draw on top.
//!
//! Runs headless on the null backend by default, ten frames. Pass
//! `--api vulkan` to open a window and drive real hardware; that path loads
//! SPIR-V from EMBER_SHADER_DIR (default "shaders"): triangle.vert.spv and
//! triangle.frag.spv.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use ember_app::{run_app, AppConfig, FrameDriver, WindowInfo, FRAME_COUNT};
use ember_graph::{PassCreateContext, RenderGraph};
use ember_rhi::{
    BufferInfo, BufferUsage, CommandBuffer, DepthState, DeviceInfo, Format, ImageInfo,
    MemoryDomain, Pipeline, PipelineInfo, PrimitiveTopology, QueueInfo, QueueType, RasterizerState,
    RendererApi, RhiResult, ShaderInfo, ShaderModuleInfo, SwapchainInfo, VertexAttribute,
    VertexBinding, VertexFormat, VertexInputRate, VertexLayout,
};

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Vertex {
    position: [f32; 3],
}

const VERTICES: [Vertex; 3] = [
    Vertex {
        position: [0.0, -0.5, 0.0],
    },
    Vertex {
        position: [0.5, 0.5, 0.0],
    },
    Vertex {
        position: [-0.5, 0.5, 0.0],
    },
];

struct MainPassData {
    swapchain_format: Format,
    width: u32,
    height: u32,
    vertex_spirv: Vec<u8>,
    fragment_spirv: Vec<u8>,
    pipeline: Option<Arc<dyn Pipeline>>,
    vertex_buffer: Option<Arc<dyn ember_rhi::Buffer>>,
}

fn main_pass_create(ctx: &mut PassCreateContext) -> RhiResult<()> {
    let swapchain_width = ctx.swapchain_width;
    let swapchain_height = ctx.swapchain_height;
    let data = ctx.user_data.downcast_mut::<MainPassData>().unwrap();
    // Rebuilds re-enter here with the post-resize extent.
    data.width = swapchain_width;
    data.height = swapchain_height;
    let shader = ctx.device.create_shader(&ShaderInfo {
        vertex: Some(ShaderModuleInfo {
            bytecode: data.vertex_spirv.clone(),
            entry_point: "main".to_string(),
            reflection: Default::default(),
        }),
        fragment: Some(ShaderModuleInfo {
            bytecode: data.fragment_spirv.clone(),
            entry_point: "main".to_string(),
            reflection: Default::default(),
        }),
        compute: None,
    })?;
    let layout = ctx.device.create_descriptor_set_layout(&*shader)?;
    let pipeline = ctx.device.create_graphics_pipeline(&PipelineInfo {
        shader: &*shader,
        descriptor_set_layout: &*layout,
        vertex_layout: VertexLayout {
            bindings: vec![VertexBinding {
                binding: 0,
                stride: std::mem::size_of::<Vertex>() as u32,
                input_rate: VertexInputRate::Vertex,
            }],
            attributes: vec![VertexAttribute {
                location: 0,
                binding: 0,
                format: VertexFormat::Float32x3,
                offset: 0,
            }],
        },
        topology: PrimitiveTopology::TriangleList,
        rasterizer: RasterizerState::default(),
        depth_state: DepthState::default(),
        blend_state: None,
        sample_count: 1,
        color_attachment_formats: vec![data.swapchain_format],
        depth_stencil_format: None,
        render_pass: Some(ctx.render_pass),
    })?;
    data.pipeline = Some(pipeline);

    let vertex_buffer = ctx.device.create_buffer(&BufferInfo {
        label: Some("triangle vertices"),
        size: std::mem::size_of_val(&VERTICES) as u64,
        usage: BufferUsage::VERTEX,
        memory_domain: MemoryDomain::Upload,
    })?;
    {
        let mut mapping = ember_rhi::map_buffer(vertex_buffer.as_ref())?;
        mapping
            .bytes_mut()
            .copy_from_slice(bytemuck::cast_slice(&VERTICES));
    }
    data.vertex_buffer = Some(vertex_buffer);
    Ok(())
}

fn main_pass_execute(cmd: &mut dyn CommandBuffer, user_data: &mut dyn Any) -> RhiResult<()> {
    let data = user_data.downcast_mut::<MainPassData>().unwrap();
    let pipeline = data.pipeline.as_ref().unwrap();
    cmd.set_viewport(0.0, 0.0, data.width as f32, data.height as f32, 0.0, 1.0)?;
    cmd.set_scissor(0, 0, data.width, data.height)?;
    cmd.bind_pipeline(pipeline.as_ref())?;
    cmd.bind_vertex_buffer(data.vertex_buffer.as_ref().unwrap().as_ref(), 0)?;
    cmd.draw(3, 1, 0, 0)
}

fn register_main_pass(graph: &mut RenderGraph, format: Format, width: u32, height: u32) {
    let (vertex_spirv, fragment_spirv) = load_shaders();
    let mut pass = graph.add_pass("main");
    pass.add_color_output(
        "back",
        ImageInfo {
            format,
            ..Default::default()
        },
    );
    pass.set_user_data(Box::new(MainPassData {
        swapchain_format: format,
        width,
        height,
        vertex_spirv,
        fragment_spirv,
        pipeline: None,
        vertex_buffer: None,
    }));
    pass.set_create_callback(Box::new(main_pass_create));
    pass.set_execute_callback(Box::new(main_pass_execute));
    pass.set_color_clear_fn(Box::new(|index, _| {
        (index == 0).then_some([0.1, 0.2, 0.3, 1.0])
    }));
}

/// Bytecode is opaque to the runtime; the null backend accepts any nonempty
/// word-aligned blob, hardware needs the real SPIR-V files.
fn load_shaders() -> (Vec<u8>, Vec<u8>) {
    let dir = std::env::var("EMBER_SHADER_DIR").unwrap_or_else(|_| "shaders".to_string());
    let vert = std::fs::read(format!("{dir}/triangle.vert.spv"));
    let frag = std::fs::read(format!("{dir}/triangle.frag.spv"));
    match (vert, frag) {
        (Ok(vert), Ok(frag)) => (vert, frag),
        _ => (vec![0u8; 16], vec![0u8; 16]),
    }
}

fn run_headless() -> RhiResult<()> {
    let device = ember_rhi::create_device(&DeviceInfo::default())?;
    let queue = device.create_queue(&QueueInfo {
        queue_type: QueueType::Graphics,
    })?;
    let mut swapchain = device.create_swapchain(&SwapchainInfo {
        width: 1400,
        height: 900,
        format: Format::B8G8R8A8Srgb,
        min_image_count: FRAME_COUNT as u32,
        vsync: true,
        queue: &*queue,
    })?;

    let mut graph = RenderGraph::new(Arc::clone(&device));
    let (width, height) = swapchain.extent();
    register_main_pass(&mut graph, swapchain.format(), width, height);
    graph.set_backbuffer_source("back");
    graph.set_swapchain_dimensions(width, height);
    graph.build()?;

    let mut frames = FrameDriver::new(Arc::clone(&device), Arc::clone(&queue))?;
    for _ in 0..10 {
        let image_index = frames.begin_frame(swapchain.as_mut())?;
        graph.setup_attachments(swapchain.image(image_index))?;
        graph.execute(frames.command_buffer())?;
        frames.end_frame(swapchain.as_ref())?;
    }
    device.wait_idle()?;
    println!("triangle: 10 frames recorded and presented");
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
            title: "ember triangle".to_string(),
            width: 1400,
            height: 900,
            renderer_api: api,
            ..Default::default()
        },
        log_level: log::LevelFilter::Info,
        on_init: Some(Box::new(move |ctx| {
            let mut g = RenderGraph::new(Arc::clone(&ctx.device));
            let (width, height) = ctx.swapchain.extent();
            register_main_pass(&mut g, ctx.swapchain.format(), width, height);
            g.set_backbuffer_source("back");
            g.set_swapchain_dimensions(width, height);
            g.build()?;
            *init_graph.borrow_mut() = Some(g);
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
        eprintln!("triangle failed: {error}");
        std::process::exit(1);
    }
}
