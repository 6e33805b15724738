//! Compute-then-blit: a compute pass writes a 1024x1024 general-layout image,
//! which is then blitted onto the swapchain image and presented. No render
//! graph involved; this drives the command vocabulary directly.
//!
//! Runs headless on the null backend by default. Pass `--api vulkan` to open
//! a window and drive real hardware; that path loads SPIR-V from
//! EMBER_SHADER_DIR (default "shaders"): fill_gradient.comp.spv.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use ember_app::{run_app, AppConfig, FrameDriver, WindowInfo, FRAME_COUNT};
use ember_rhi::{
    BindingReflection, CommandBuffer, ComputePipelineInfo, DescriptorKind, DescriptorSet,
    DescriptorWrite, Device, DeviceInfo, Filter, Format, Image, ImageBarrier, ImageBinding,
    ImageInfo, ImageUsage, Pipeline, PushConstantRange, QueueInfo, QueueType, RendererApi,
    ResourceState, RhiResult, ShaderInfo, ShaderModuleInfo, ShaderReflection, ShaderStages,
    SwapchainInfo,
};

const EXTENT: u32 = 1024;
const WORKGROUP: u32 = 16;

struct ComputeState {
    pipeline: Arc<dyn Pipeline>,
    descriptor_set: Box<dyn DescriptorSet>,
    target: Arc<dyn Image>,
    frame: u32,
}

/// Bytecode is opaque to the runtime; the null backend accepts any nonempty
/// word-aligned blob, hardware needs the real SPIR-V file.
fn load_shader() -> Vec<u8> {
    let dir = std::env::var("EMBER_SHADER_DIR").unwrap_or_else(|_| "shaders".to_string());
    std::fs::read(format!("{dir}/fill_gradient.comp.spv")).unwrap_or_else(|_| vec![0u8; 16])
}

fn create_compute_state(device: &Arc<dyn Device>) -> RhiResult<ComputeState> {
    let shader = device.create_shader(&ShaderInfo {
        compute: Some(ShaderModuleInfo {
            bytecode: load_shader(),
            entry_point: "main".to_string(),
            reflection: ShaderReflection {
                bindings: vec![BindingReflection {
                    name: "u_output_image".to_string(),
                    set: 0,
                    binding: 0,
                    kind: DescriptorKind::StorageImage,
                    array_count: 1,
                    stages: ShaderStages::COMPUTE,
                }],
                push_constants: vec![PushConstantRange {
                    offset: 0,
                    size: 8,
                    stages: ShaderStages::COMPUTE,
                }],
            },
        }),
        ..Default::default()
    })?;
    let layout = device.create_descriptor_set_layout(&*shader)?;
    let pipeline = device.create_compute_pipeline(&ComputePipelineInfo {
        shader: &*shader,
        descriptor_set_layout: &*layout,
    })?;

    let target = device.create_image(&ImageInfo {
        label: Some("compute target"),
        width: EXTENT,
        height: EXTENT,
        format: Format::R8G8B8A8Unorm,
        usage: ImageUsage::STORAGE | ImageUsage::TRANSFER_SRC,
        ..Default::default()
    })?;

    let mut descriptor_set = device.create_descriptor_set(&*layout, 0)?;
    device.update_descriptor_set(
        descriptor_set.as_mut(),
        &[DescriptorWrite {
            descriptor_name: "u_output_image",
            buffers: &[],
            images: &[ImageBinding {
                image: &*target,
                state: ResourceState::General,
            }],
            samplers: &[],
        }],
    )?;

    Ok(ComputeState {
        pipeline,
        descriptor_set,
        target,
        frame: 0,
    })
}

/// One frame: dispatch into the general-layout target, blit it onto the
/// acquired swapchain image, and leave the swapchain image presentable.
fn record_frame(
    cmd: &mut dyn CommandBuffer,
    state: &mut ComputeState,
    backbuffer: &dyn Image,
) -> RhiResult<()> {
    cmd.barrier(
        &[],
        &[],
        &[ImageBarrier {
            image: &*state.target,
            old_state: ResourceState::Undefined,
            new_state: ResourceState::General,
            src_queue: None,
            dst_queue: None,
            subresource: None,
        }],
    )?;
    cmd.bind_pipeline(state.pipeline.as_ref())?;
    cmd.bind_descriptor_set(0, state.descriptor_set.as_ref(), state.pipeline.as_ref())?;
    cmd.push_constants(state.pipeline.as_ref(), 0, &state.frame.to_le_bytes())?;
    cmd.dispatch(EXTENT / WORKGROUP, EXTENT / WORKGROUP, 1)?;

    cmd.blit_image(
        &*state.target,
        ResourceState::General,
        backbuffer,
        ResourceState::Undefined,
        Filter::Linear,
    )?;
    cmd.barrier(
        &[],
        &[],
        &[ImageBarrier {
            image: backbuffer,
            old_state: ResourceState::TransferDst,
            new_state: ResourceState::Present,
            src_queue: None,
            dst_queue: None,
            subresource: None,
        }],
    )?;
    state.frame += 1;
    Ok(())
}

fn run_headless() -> RhiResult<()> {
    let device = ember_rhi::create_device(&DeviceInfo::default())?;
    let queue = device.create_queue(&QueueInfo {
        queue_type: QueueType::Graphics,
    })?;
    let mut swapchain = device.create_swapchain(&SwapchainInfo {
        width: EXTENT,
        height: EXTENT,
        format: Format::B8G8R8A8Srgb,
        min_image_count: FRAME_COUNT as u32,
        vsync: true,
        queue: &*queue,
    })?;

    let mut state = create_compute_state(&device)?;
    let mut frames = FrameDriver::new(Arc::clone(&device), Arc::clone(&queue))?;
    for _ in 0..4 {
        let image_index = frames.begin_frame(swapchain.as_mut())?;
        let backbuffer = swapchain.image(image_index);
        record_frame(frames.command_buffer(), &mut state, backbuffer.as_ref())?;
        frames.end_frame(swapchain.as_ref())?;

        let (width, height) = swapchain.extent();
        assert_eq!(backbuffer.info().width, width);
        assert_eq!(backbuffer.info().height, height);
    }
    device.wait_idle()?;
    println!("compute_blit: 4 frames dispatched, blitted and presented");
    Ok(())
}

fn run_windowed(api: RendererApi) -> RhiResult<()> {
    let state = Rc::new(RefCell::new(None::<ComputeState>));
    let init_state = Rc::clone(&state);
    let update_state = Rc::clone(&state);
    run_app(AppConfig {
        window_info: WindowInfo {
            title: "ember compute blit".to_string(),
            width: EXTENT,
            height: EXTENT,
            renderer_api: api,
            ..Default::default()
        },
        log_level: log::LevelFilter::Info,
        on_init: Some(Box::new(move |ctx| {
            *init_state.borrow_mut() = Some(create_compute_state(&ctx.device)?);
            Ok(())
        })),
        on_update: Some(Box::new(move |ctx, _delta_time| {
            let mut state = update_state.borrow_mut();
            let Some(state) = state.as_mut() else {
                return Ok(());
            };
            let image_index = ctx.frames.begin_frame(ctx.swapchain.as_mut())?;
            let backbuffer = ctx.swapchain.image(image_index);
            record_frame(ctx.frames.command_buffer(), state, backbuffer.as_ref())?;
            ctx.frames.end_frame(ctx.swapchain.as_ref())
        })),
        on_resize: None,
        on_shutdown: None,
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
        eprintln!("compute_blit failed: {error}");
        std::process::exit(1);
    }
}
