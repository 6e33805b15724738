//! Metal backend for the Ember RHI (macOS only).
//!
//! Metal has no render-pass objects and encodes through per-scope encoders,
//! so this backend is the dynamic-rendering-style lowering: the `RenderPass`
//! handle carries the framebuffer signature, `begin_render_pass` builds an
//! `MTLRenderPassDescriptor` and opens a render encoder, and barriers reduce
//! to state bookkeeping (the driver tracks hazards for tracked resources on
//! a single queue). Descriptor sets emulate the bind model: a set stores its
//! resolved buffer/texture/sampler bindings and replays them into the active
//! encoder slot-by-slot.

use std::any::Any;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use metal::foreign_types::ForeignType;

use crate::reflection::{resolve_writes, BindingReflection, DescriptorKind, ShaderReflection};
use crate::{
    AddressMode, Buffer, BufferBarrier, BufferInfo, CommandBuffer, CommandBufferState, CommandPool,
    CommandPoolInfo, CommandStateCell, ComputePipelineInfo, DescriptorSet, DescriptorSetLayout,
    DescriptorWrite, Device, DeviceInfo, Fence, Filter, Format, Image, ImageBarrier, ImageInfo,
    IndexType, LoadOp, MemoryBarrier, MemoryDomain, Pipeline, PipelineInfo, PipelineKind,
    PrimitiveTopology, Queue, QueueInfo, QueuePresentInfo, QueueSubmitInfo, QueueType, RendererApi,
    RenderPass, RenderPassBeginInfo, RenderPassInfo, ResourceId, ResourceState, RhiError,
    RhiResult, Sampler, SamplerInfo, Semaphore, Shader, ShaderInfo, ShaderStages, StateCell,
    Swapchain, SwapchainInfo,
};

fn format_to_mtl(format: Format) -> metal::MTLPixelFormat {
    match format {
        Format::Undefined => metal::MTLPixelFormat::Invalid,
        Format::R8G8B8A8Unorm => metal::MTLPixelFormat::RGBA8Unorm,
        Format::R8G8B8A8Srgb => metal::MTLPixelFormat::RGBA8Unorm_sRGB,
        Format::B8G8R8A8Unorm => metal::MTLPixelFormat::BGRA8Unorm,
        Format::B8G8R8A8Srgb => metal::MTLPixelFormat::BGRA8Unorm_sRGB,
        Format::R16G16B16A16Sfloat => metal::MTLPixelFormat::RGBA16Float,
        Format::R32G32B32A32Sfloat => metal::MTLPixelFormat::RGBA32Float,
        Format::R32Sfloat => metal::MTLPixelFormat::R32Float,
        Format::D32Sfloat => metal::MTLPixelFormat::Depth32Float,
        Format::D24UnormS8Uint => metal::MTLPixelFormat::Depth24Unorm_Stencil8,
    }
}

pub struct MetalDevice {
    pub(crate) device: metal::Device,
    pub(crate) queue: metal::CommandQueue,
    layer: Option<metal::MetalLayer>,
    next_id: AtomicU64,
    allocations: Arc<AtomicI64>,
}

unsafe impl Send for MetalDevice {}
unsafe impl Sync for MetalDevice {}

impl MetalDevice {
    pub fn create(info: &DeviceInfo) -> RhiResult<Arc<dyn Device>> {
        let device = metal::Device::system_default()
            .ok_or_else(|| RhiError::Backend("no Metal device found".into()))?;
        let queue = device.new_command_queue();

        let layer = match &info.surface {
            Some(handles) => Some(attach_layer(&device, handles)?),
            None => None,
        };

        log::info!("created metal device: {}", device.name());
        Ok(Arc::new(MetalDevice {
            device,
            queue,
            layer,
            next_id: AtomicU64::new(1),
            allocations: Arc::new(AtomicI64::new(0)),
        }))
    }

    fn next_id(&self) -> ResourceId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Install a CAMetalLayer on the AppKit view behind the window handle.
fn attach_layer(
    device: &metal::Device,
    handles: &crate::SurfaceHandles,
) -> RhiResult<metal::MetalLayer> {
    let raw_window_handle::RawWindowHandle::AppKit(handle) = handles.window else {
        return Err(RhiError::invalid_argument(
            "metal backend requires an AppKit window handle",
        ));
    };
    let layer = metal::MetalLayer::new();
    layer.set_device(device);
    layer.set_pixel_format(metal::MTLPixelFormat::BGRA8Unorm_sRGB);
    layer.set_presents_with_transaction(false);
    unsafe {
        let view = handle.ns_view.as_ptr() as *mut objc::runtime::Object;
        let _: () = objc::msg_send![view, setWantsLayer: true];
        let _: () = objc::msg_send![view, setLayer: layer.as_ptr()];
    }
    Ok(layer)
}

impl std::fmt::Debug for MetalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalDevice").finish_non_exhaustive()
    }
}

impl Device for MetalDevice {
    fn api(&self) -> RendererApi {
        RendererApi::Metal
    }

    fn create_queue(&self, info: &QueueInfo) -> RhiResult<Arc<dyn Queue>> {
        if info.queue_type != QueueType::Graphics {
            return Err(RhiError::invalid_argument(
                "the runtime instantiates a single graphics queue",
            ));
        }
        Ok(Arc::new(MetalQueue {
            queue: self.queue.clone(),
        }))
    }

    fn create_command_pool(&self, _info: &CommandPoolInfo) -> RhiResult<Box<dyn CommandPool>> {
        Ok(Box::new(MetalCommandPool))
    }

    fn create_command_buffer(&self, _pool: &dyn CommandPool) -> RhiResult<Box<dyn CommandBuffer>> {
        Ok(Box::new(MetalCommandBuffer {
            queue: self.queue.clone(),
            cmd: None,
            render_encoder: None,
            pass_color_formats: None,
            bound_graphics: None,
            bound_index: None,
            graphics_push_constants: Vec::new(),
            pending_compute: PendingCompute::default(),
            state: CommandStateCell::new(),
        }))
    }

    fn create_swapchain(&self, info: &SwapchainInfo) -> RhiResult<Box<dyn Swapchain>> {
        let layer = self
            .layer
            .as_ref()
            .ok_or_else(|| RhiError::invalid_argument("device was created without a surface"))?;
        layer.set_drawable_size(metal::CGSize::new(info.width as f64, info.height as f64));
        layer.set_pixel_format(format_to_mtl(info.format));
        let image_count = info.min_image_count.max(2);
        Ok(Box::new(MetalSwapchain {
            layer: layer.clone(),
            slots: (0..image_count).map(|_| None).collect(),
            next_acquire: 0,
            extent: (info.width, info.height),
            format: info.format,
            queue: self.queue.clone(),
            next_image_id: AtomicU64::new(1 << 32),
        }))
    }

    fn create_buffer(&self, info: &BufferInfo) -> RhiResult<Arc<dyn Buffer>> {
        if info.size == 0 {
            return Err(RhiError::invalid_argument("buffer size must be nonzero"));
        }
        let options = match info.memory_domain {
            MemoryDomain::DeviceLocal => metal::MTLResourceOptions::StorageModePrivate,
            MemoryDomain::Upload | MemoryDomain::Readback => {
                metal::MTLResourceOptions::StorageModeShared
            }
        };
        let buffer = self.device.new_buffer(info.size, options);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MetalBuffer {
            buffer,
            info: info.clone(),
            state: StateCell::new(ResourceState::Undefined),
            id: self.next_id(),
            allocations: Arc::clone(&self.allocations),
        }))
    }

    fn create_image(&self, info: &ImageInfo) -> RhiResult<Arc<dyn Image>> {
        if info.width == 0 || info.height == 0 {
            return Err(RhiError::invalid_argument("image extent must be nonzero"));
        }
        if info.format == Format::Undefined {
            return Err(RhiError::invalid_argument("image format must be specified"));
        }
        if info.mip_levels == 0 || info.layer_count == 0 {
            return Err(RhiError::invalid_argument(
                "image mip_levels and layer_count must be nonzero",
            ));
        }
        let descriptor = metal::TextureDescriptor::new();
        descriptor.set_width(info.width as u64);
        descriptor.set_height(info.height as u64);
        descriptor.set_pixel_format(format_to_mtl(info.format));
        descriptor.set_mipmap_level_count(info.mip_levels as u64);
        descriptor.set_sample_count(info.sample_count.max(1) as u64);
        descriptor.set_storage_mode(metal::MTLStorageMode::Private);
        if info.layer_count == 6 {
            descriptor.set_texture_type(metal::MTLTextureType::Cube);
        } else if info.layer_count > 1 {
            descriptor.set_texture_type(metal::MTLTextureType::D2Array);
            descriptor.set_array_length(info.layer_count as u64);
        }
        let mut usage = metal::MTLTextureUsage::empty();
        if info.usage.contains(crate::ImageUsage::SAMPLED) {
            usage |= metal::MTLTextureUsage::ShaderRead;
        }
        if info.usage.contains(crate::ImageUsage::STORAGE) {
            usage |= metal::MTLTextureUsage::ShaderRead | metal::MTLTextureUsage::ShaderWrite;
        }
        if info
            .usage
            .intersects(crate::ImageUsage::COLOR_ATTACHMENT | crate::ImageUsage::DEPTH_STENCIL_ATTACHMENT)
        {
            usage |= metal::MTLTextureUsage::RenderTarget;
        }
        descriptor.set_usage(usage);
        let texture = self.device.new_texture(&descriptor);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MetalImage {
            texture,
            info: info.clone(),
            state: StateCell::new(ResourceState::Undefined),
            id: self.next_id(),
            allocations: Arc::clone(&self.allocations),
        }))
    }

    fn create_sampler(&self, info: &SamplerInfo) -> RhiResult<Arc<dyn Sampler>> {
        fn address(mode: AddressMode) -> metal::MTLSamplerAddressMode {
            match mode {
                AddressMode::Repeat => metal::MTLSamplerAddressMode::Repeat,
                AddressMode::MirroredRepeat => metal::MTLSamplerAddressMode::MirrorRepeat,
                AddressMode::ClampToEdge => metal::MTLSamplerAddressMode::ClampToEdge,
                AddressMode::ClampToBorder => metal::MTLSamplerAddressMode::ClampToBorderColor,
            }
        }
        fn filter(filter: Filter) -> metal::MTLSamplerMinMagFilter {
            match filter {
                Filter::Nearest => metal::MTLSamplerMinMagFilter::Nearest,
                Filter::Linear => metal::MTLSamplerMinMagFilter::Linear,
            }
        }
        let descriptor = metal::SamplerDescriptor::new();
        descriptor.set_min_filter(filter(info.min_filter));
        descriptor.set_mag_filter(filter(info.mag_filter));
        descriptor.set_mip_filter(match info.mipmap_mode {
            Filter::Nearest => metal::MTLSamplerMipFilter::Nearest,
            Filter::Linear => metal::MTLSamplerMipFilter::Linear,
        });
        descriptor.set_address_mode_s(address(info.address_mode_u));
        descriptor.set_address_mode_t(address(info.address_mode_v));
        descriptor.set_address_mode_r(address(info.address_mode_w));
        descriptor.set_lod_min_clamp(info.min_lod);
        descriptor.set_lod_max_clamp(info.max_lod);
        let sampler = self.device.new_sampler(&descriptor);
        Ok(Arc::new(MetalSampler { sampler }))
    }

    fn create_shader(&self, info: &ShaderInfo) -> RhiResult<Arc<dyn Shader>> {
        if info.vertex.is_none() && info.compute.is_none() {
            return Err(RhiError::invalid_argument(
                "shader requires a vertex or compute stage",
            ));
        }
        let mut reflection = ShaderReflection::default();
        let mut functions = Vec::new();
        for (module, stage) in [
            (&info.vertex, ShaderStages::VERTEX),
            (&info.fragment, ShaderStages::FRAGMENT),
            (&info.compute, ShaderStages::COMPUTE),
        ] {
            let Some(module) = module else { continue };
            reflection.merge(&module.reflection)?;
            let library = self
                .device
                .new_library_with_data(&module.bytecode)
                .map_err(RhiError::Backend)?;
            let function = library
                .get_function(&module.entry_point, None)
                .map_err(|e| RhiError::Backend(e.to_string()))?;
            functions.push((stage, function));
        }
        Ok(Arc::new(MetalShader {
            functions,
            stages: info.stages(),
            reflection,
        }))
    }

    fn create_descriptor_set_layout(
        &self,
        shader: &dyn Shader,
    ) -> RhiResult<Arc<dyn DescriptorSetLayout>> {
        Ok(Arc::new(MetalDescriptorSetLayout {
            bindings: shader.reflection().bindings.clone(),
        }))
    }

    fn create_descriptor_set(
        &self,
        layout: &dyn DescriptorSetLayout,
        set_index: u32,
    ) -> RhiResult<Box<dyn DescriptorSet>> {
        Ok(Box::new(MetalDescriptorSet {
            set_index,
            bindings: layout.bindings().to_vec(),
            entries: Mutex::new(Vec::new()),
        }))
    }

    fn update_descriptor_set(
        &self,
        set: &mut dyn DescriptorSet,
        writes: &[DescriptorWrite],
    ) -> RhiResult<()> {
        let set = set
            .as_any()
            .downcast_ref::<MetalDescriptorSet>()
            .ok_or_else(|| RhiError::invalid_argument("descriptor set is not a Metal set"))?;
        let resolved = resolve_writes(&set.bindings, set.set_index, writes)?;
        let mut entries = set.entries.lock().unwrap();
        for (write, resolved) in writes.iter().zip(&resolved) {
            entries.retain(|entry: &SetEntry| entry.slot != resolved.binding);
            match resolved.kind {
                kind if kind.is_buffer() => {
                    for binding in write.buffers {
                        let buffer = binding
                            .buffer
                            .as_any()
                            .downcast_ref::<MetalBuffer>()
                            .ok_or_else(|| {
                                RhiError::invalid_argument("buffer is not a Metal buffer")
                            })?;
                        entries.push(SetEntry {
                            slot: resolved.binding,
                            payload: SetPayload::Buffer(buffer.buffer.clone(), binding.offset),
                        });
                    }
                }
                DescriptorKind::Sampler => {
                    for binding in write.samplers {
                        let sampler = binding
                            .sampler
                            .as_any()
                            .downcast_ref::<MetalSampler>()
                            .ok_or_else(|| {
                                RhiError::invalid_argument("sampler is not a Metal sampler")
                            })?;
                        entries.push(SetEntry {
                            slot: resolved.binding,
                            payload: SetPayload::Sampler(sampler.sampler.clone()),
                        });
                    }
                }
                _ => {
                    for binding in write.images {
                        let texture = metal_texture(binding.image)?;
                        entries.push(SetEntry {
                            slot: resolved.binding,
                            payload: SetPayload::Texture(texture),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn create_graphics_pipeline(&self, info: &PipelineInfo) -> RhiResult<Arc<dyn Pipeline>> {
        let shader = info
            .shader
            .as_any()
            .downcast_ref::<MetalShader>()
            .ok_or_else(|| RhiError::invalid_argument("shader is not a Metal shader"))?;
        if let Some(render_pass) = info.render_pass {
            let pass_formats: Vec<Format> = render_pass
                .info()
                .color_attachments
                .iter()
                .map(|a| a.format)
                .collect();
            if pass_formats != info.color_attachment_formats {
                return Err(RhiError::invalid_argument(
                    "pipeline color attachment formats do not match the render pass",
                ));
            }
        }
        let descriptor = metal::RenderPipelineDescriptor::new();
        for (stage, function) in &shader.functions {
            match *stage {
                ShaderStages::VERTEX => descriptor.set_vertex_function(Some(function)),
                ShaderStages::FRAGMENT => descriptor.set_fragment_function(Some(function)),
                _ => {}
            }
        }
        for (i, format) in info.color_attachment_formats.iter().enumerate() {
            let attachment = descriptor
                .color_attachments()
                .object_at(i as u64)
                .ok_or_else(|| RhiError::invalid_argument("too many color attachments"))?;
            attachment.set_pixel_format(format_to_mtl(*format));
            if let Some(blend) = &info.blend_state {
                attachment.set_blending_enabled(true);
                attachment.set_source_rgb_blend_factor(blend_factor(blend.color.src_factor));
                attachment.set_destination_rgb_blend_factor(blend_factor(blend.color.dst_factor));
                attachment.set_source_alpha_blend_factor(blend_factor(blend.alpha.src_factor));
                attachment
                    .set_destination_alpha_blend_factor(blend_factor(blend.alpha.dst_factor));
            }
        }
        if let Some(depth_format) = info.depth_stencil_format {
            descriptor.set_depth_attachment_pixel_format(format_to_mtl(depth_format));
        }
        descriptor.set_raster_sample_count(info.sample_count.max(1) as u64);
        let pipeline = self
            .device
            .new_render_pipeline_state(&descriptor)
            .map_err(RhiError::Backend)?;

        let depth_stencil = if info.depth_state.depth_test || info.depth_state.depth_write {
            let depth_descriptor = metal::DepthStencilDescriptor::new();
            depth_descriptor.set_depth_compare_function(compare_fn(info.depth_state.compare_op));
            depth_descriptor.set_depth_write_enabled(info.depth_state.depth_write);
            Some(self.device.new_depth_stencil_state(&depth_descriptor))
        } else {
            None
        };

        Ok(Arc::new(MetalPipeline {
            render: Some(pipeline),
            compute: None,
            depth_stencil,
            topology: info.topology,
            push_size: info.shader.reflection().push_constant_size(),
            kind: PipelineKind::Graphics,
            color_formats: info.color_attachment_formats.clone(),
        }))
    }

    fn create_compute_pipeline(&self, info: &ComputePipelineInfo) -> RhiResult<Arc<dyn Pipeline>> {
        let shader = info
            .shader
            .as_any()
            .downcast_ref::<MetalShader>()
            .ok_or_else(|| RhiError::invalid_argument("shader is not a Metal shader"))?;
        let function = shader
            .functions
            .iter()
            .find(|(stage, _)| *stage == ShaderStages::COMPUTE)
            .map(|(_, f)| f)
            .ok_or_else(|| RhiError::invalid_argument("shader has no compute stage"))?;
        let pipeline = self
            .device
            .new_compute_pipeline_state_with_function(function)
            .map_err(RhiError::Backend)?;
        Ok(Arc::new(MetalPipeline {
            render: None,
            compute: Some(pipeline),
            depth_stencil: None,
            topology: PrimitiveTopology::TriangleList,
            push_size: info.shader.reflection().push_constant_size(),
            kind: PipelineKind::Compute,
            color_formats: Vec::new(),
        }))
    }

    fn create_render_pass(&self, info: &RenderPassInfo) -> RhiResult<Arc<dyn RenderPass>> {
        Ok(Arc::new(MetalRenderPass { info: info.clone() }))
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<Box<dyn Fence>> {
        let event = self.device.new_shared_event();
        let initial = if signaled { 1 } else { 0 };
        event.set_signaled_value(initial);
        Ok(Box::new(MetalFence {
            event,
            target: AtomicU64::new(initial),
        }))
    }

    fn create_semaphore(&self) -> RhiResult<Box<dyn Semaphore>> {
        // Single in-order queue; ordering holds by construction.
        Ok(Box::new(MetalSemaphore))
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let cmd = self.queue.new_command_buffer();
        cmd.commit();
        cmd.wait_until_completed();
        Ok(())
    }

    fn live_allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed).max(0) as u64
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn blend_factor(factor: crate::BlendFactor) -> metal::MTLBlendFactor {
    match factor {
        crate::BlendFactor::One => metal::MTLBlendFactor::One,
        crate::BlendFactor::Zero => metal::MTLBlendFactor::Zero,
        crate::BlendFactor::SrcAlpha => metal::MTLBlendFactor::SourceAlpha,
        crate::BlendFactor::OneMinusSrcAlpha => metal::MTLBlendFactor::OneMinusSourceAlpha,
        crate::BlendFactor::DstAlpha => metal::MTLBlendFactor::DestinationAlpha,
        crate::BlendFactor::OneMinusDstAlpha => metal::MTLBlendFactor::OneMinusDestinationAlpha,
    }
}

fn compare_fn(op: crate::CompareOp) -> metal::MTLCompareFunction {
    match op {
        crate::CompareOp::Never => metal::MTLCompareFunction::Never,
        crate::CompareOp::Less => metal::MTLCompareFunction::Less,
        crate::CompareOp::Equal => metal::MTLCompareFunction::Equal,
        crate::CompareOp::LessOrEqual => metal::MTLCompareFunction::LessEqual,
        crate::CompareOp::Greater => metal::MTLCompareFunction::Greater,
        crate::CompareOp::NotEqual => metal::MTLCompareFunction::NotEqual,
        crate::CompareOp::GreaterOrEqual => metal::MTLCompareFunction::GreaterEqual,
        crate::CompareOp::Always => metal::MTLCompareFunction::Always,
    }
}

fn metal_texture(image: &dyn Image) -> RhiResult<metal::Texture> {
    if let Some(image) = image.as_any().downcast_ref::<MetalImage>() {
        return Ok(image.texture.clone());
    }
    if let Some(image) = image.as_any().downcast_ref::<MetalSwapchainImage>() {
        return Ok(image.texture.clone());
    }
    Err(RhiError::invalid_argument(
        "image does not belong to the Metal backend",
    ))
}

pub struct MetalBuffer {
    pub(crate) buffer: metal::Buffer,
    info: BufferInfo,
    state: StateCell,
    id: ResourceId,
    allocations: Arc<AtomicI64>,
}

unsafe impl Send for MetalBuffer {}
unsafe impl Sync for MetalBuffer {}

impl Drop for MetalBuffer {
    fn drop(&mut self) {
        self.allocations.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for MetalBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalBuffer")
            .field("id", &self.id)
            .field("size", &self.info.size)
            .finish()
    }
}

impl Buffer for MetalBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn info(&self) -> &BufferInfo {
        &self.info
    }

    fn resource_state(&self) -> ResourceState {
        self.state.get()
    }

    fn set_resource_state(&self, state: ResourceState) {
        self.state.set(state);
    }

    fn map(&self) -> RhiResult<*mut u8> {
        if self.info.memory_domain == MemoryDomain::DeviceLocal {
            return Err(RhiError::invalid_argument(
                "device-local buffers cannot be mapped",
            ));
        }
        Ok(self.buffer.contents().cast::<u8>())
    }

    fn unmap(&self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MetalImage {
    pub(crate) texture: metal::Texture,
    info: ImageInfo,
    state: StateCell,
    id: ResourceId,
    allocations: Arc<AtomicI64>,
}

unsafe impl Send for MetalImage {}
unsafe impl Sync for MetalImage {}

impl Drop for MetalImage {
    fn drop(&mut self) {
        self.allocations.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for MetalImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalImage")
            .field("id", &self.id)
            .field("extent", &(self.info.width, self.info.height))
            .finish()
    }
}

impl Image for MetalImage {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn info(&self) -> &ImageInfo {
        &self.info
    }

    fn resource_state(&self) -> ResourceState {
        self.state.get()
    }

    fn set_resource_state(&self, state: ResourceState) {
        self.state.set(state);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MetalSampler {
    pub(crate) sampler: metal::SamplerState,
}

unsafe impl Send for MetalSampler {}
unsafe impl Sync for MetalSampler {}

impl std::fmt::Debug for MetalSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalSampler").finish()
    }
}

impl Sampler for MetalSampler {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MetalShader {
    functions: Vec<(ShaderStages, metal::Function)>,
    stages: ShaderStages,
    reflection: ShaderReflection,
}

unsafe impl Send for MetalShader {}
unsafe impl Sync for MetalShader {}

impl std::fmt::Debug for MetalShader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalShader")
            .field("stages", &self.stages)
            .finish()
    }
}

impl Shader for MetalShader {
    fn stages(&self) -> ShaderStages {
        self.stages
    }

    fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MetalDescriptorSetLayout {
    bindings: Vec<BindingReflection>,
}

impl std::fmt::Debug for MetalDescriptorSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalDescriptorSetLayout")
            .field("binding_count", &self.bindings.len())
            .finish()
    }
}

impl DescriptorSetLayout for MetalDescriptorSetLayout {
    fn bindings(&self) -> &[BindingReflection] {
        &self.bindings
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

enum SetPayload {
    Buffer(metal::Buffer, u64),
    Texture(metal::Texture),
    Sampler(metal::SamplerState),
}

struct SetEntry {
    slot: u32,
    payload: SetPayload,
}

pub struct MetalDescriptorSet {
    set_index: u32,
    bindings: Vec<BindingReflection>,
    entries: Mutex<Vec<SetEntry>>,
}

unsafe impl Send for MetalDescriptorSet {}
unsafe impl Sync for MetalDescriptorSet {}

impl std::fmt::Debug for MetalDescriptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalDescriptorSet")
            .field("set_index", &self.set_index)
            .finish()
    }
}

impl DescriptorSet for MetalDescriptorSet {
    fn set_index(&self) -> u32 {
        self.set_index
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MetalPipeline {
    render: Option<metal::RenderPipelineState>,
    compute: Option<metal::ComputePipelineState>,
    depth_stencil: Option<metal::DepthStencilState>,
    topology: PrimitiveTopology,
    push_size: u32,
    kind: PipelineKind,
    color_formats: Vec<Format>,
}

unsafe impl Send for MetalPipeline {}
unsafe impl Sync for MetalPipeline {}

impl std::fmt::Debug for MetalPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalPipeline")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Pipeline for MetalPipeline {
    fn kind(&self) -> PipelineKind {
        self.kind
    }

    fn color_formats(&self) -> &[Format] {
        &self.color_formats
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MetalRenderPass {
    info: RenderPassInfo,
}

impl std::fmt::Debug for MetalRenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalRenderPass")
            .field("color_attachments", &self.info.color_attachments.len())
            .finish()
    }
}

impl RenderPass for MetalRenderPass {
    fn info(&self) -> &RenderPassInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MetalFence {
    event: metal::SharedEvent,
    target: AtomicU64,
}

unsafe impl Send for MetalFence {}
unsafe impl Sync for MetalFence {}

impl std::fmt::Debug for MetalFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalFence").finish()
    }
}

impl Fence for MetalFence {
    fn wait(&self) -> RhiResult<()> {
        let target = self.target.load(Ordering::Relaxed);
        while self.event.signaled_value() < target {
            std::thread::yield_now();
        }
        Ok(())
    }

    fn reset(&self) -> RhiResult<()> {
        // Monotonic event values; nothing to clear.
        Ok(())
    }

    fn is_signaled(&self) -> bool {
        self.event.signaled_value() >= self.target.load(Ordering::Relaxed)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct MetalSemaphore;

impl Semaphore for MetalSemaphore {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct MetalCommandPool;

impl CommandPool for MetalCommandPool {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct PendingCompute {
    pipeline: Option<metal::ComputePipelineState>,
    sets: Vec<(u32, Vec<(u32, OwnedPayload)>)>,
    push_constants: Vec<u8>,
}

enum OwnedPayload {
    Buffer(metal::Buffer, u64),
    Texture(metal::Texture),
    Sampler(metal::SamplerState),
}

pub struct MetalCommandBuffer {
    queue: metal::CommandQueue,
    cmd: Option<metal::CommandBuffer>,
    render_encoder: Option<metal::RenderCommandEncoder>,
    pass_color_formats: Option<Vec<Format>>,
    bound_graphics: Option<(metal::RenderPipelineState, PrimitiveTopology, u32)>,
    bound_index: Option<(metal::Buffer, u64, IndexType)>,
    /// Accumulated graphics push-constant bytes; replayed whole on update.
    graphics_push_constants: Vec<u8>,
    pending_compute: PendingCompute,
    pub(crate) state: CommandStateCell,
}

unsafe impl Send for MetalCommandBuffer {}
unsafe impl Sync for MetalCommandBuffer {}

impl std::fmt::Debug for MetalCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalCommandBuffer")
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl MetalCommandBuffer {
    fn require_recording(&self) -> RhiResult<()> {
        if self.state.get() != CommandBufferState::Recording {
            return Err(RhiError::invalid_state("command buffer is not recording"));
        }
        Ok(())
    }

    fn require_outside_render_pass(&self) -> RhiResult<()> {
        self.require_recording()?;
        if self.render_encoder.is_some() {
            return Err(RhiError::invalid_state(
                "operation is not allowed inside a render pass",
            ));
        }
        Ok(())
    }

    fn encoder(&self) -> RhiResult<&metal::RenderCommandEncoder> {
        self.render_encoder
            .as_ref()
            .ok_or_else(|| RhiError::invalid_state("operation requires an active render pass"))
    }

    fn raw(&self) -> RhiResult<&metal::CommandBuffer> {
        self.cmd
            .as_ref()
            .ok_or_else(|| RhiError::invalid_state("command buffer is not recording"))
    }
}

impl CommandBuffer for MetalCommandBuffer {
    fn state(&self) -> CommandBufferState {
        self.state.get()
    }

    fn begin(&mut self) -> RhiResult<()> {
        if self.state.get() == CommandBufferState::Recording {
            return Err(RhiError::invalid_state("command buffer already recording"));
        }
        self.cmd = Some(self.queue.new_command_buffer().to_owned());
        self.render_encoder = None;
        self.pass_color_formats = None;
        self.bound_graphics = None;
        self.bound_index = None;
        self.graphics_push_constants.clear();
        self.pending_compute = PendingCompute::default();
        self.state.set(CommandBufferState::Recording);
        Ok(())
    }

    fn end(&mut self) -> RhiResult<()> {
        self.require_recording()?;
        if self.render_encoder.is_some() {
            return Err(RhiError::invalid_state(
                "cannot end a command buffer inside a render pass",
            ));
        }
        self.state.set(CommandBufferState::Executable);
        Ok(())
    }

    fn begin_render_pass(&mut self, info: &RenderPassBeginInfo) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        let descriptor = metal::RenderPassDescriptor::new();
        for (i, binding) in info.color_attachments.iter().enumerate() {
            let image = binding.image.as_ref().ok_or_else(|| {
                RhiError::invalid_argument("render pass color attachment has no bound image")
            })?;
            let attachment = descriptor
                .color_attachments()
                .object_at(i as u64)
                .ok_or_else(|| RhiError::invalid_argument("too many color attachments"))?;
            attachment.set_texture(Some(&metal_texture(image.as_ref())?));
            attachment.set_load_action(match binding.load_op {
                LoadOp::Load => metal::MTLLoadAction::Load,
                LoadOp::Clear => metal::MTLLoadAction::Clear,
                LoadOp::DontCare => metal::MTLLoadAction::DontCare,
            });
            attachment.set_store_action(metal::MTLStoreAction::Store);
            let [r, g, b, a] = binding.clear_value;
            attachment.set_clear_color(metal::MTLClearColor::new(
                r as f64, g as f64, b as f64, a as f64,
            ));
        }
        if let Some(depth) = &info.depth_stencil {
            let image = depth.image.as_ref().ok_or_else(|| {
                RhiError::invalid_argument("render pass depth attachment has no bound image")
            })?;
            let attachment = descriptor.depth_attachment().unwrap();
            attachment.set_texture(Some(&metal_texture(image.as_ref())?));
            attachment.set_load_action(match depth.load_op {
                LoadOp::Load => metal::MTLLoadAction::Load,
                LoadOp::Clear => metal::MTLLoadAction::Clear,
                LoadOp::DontCare => metal::MTLLoadAction::DontCare,
            });
            attachment.set_store_action(metal::MTLStoreAction::Store);
            attachment.set_clear_depth(depth.clear_value.depth as f64);
        }
        let encoder = self.raw()?.new_render_command_encoder(descriptor).to_owned();
        self.render_encoder = Some(encoder);
        self.pass_color_formats = Some(
            info.render_pass
                .info()
                .color_attachments
                .iter()
                .map(|a| a.format)
                .collect(),
        );
        Ok(())
    }

    fn end_render_pass(&mut self) -> RhiResult<()> {
        let encoder = self
            .render_encoder
            .take()
            .ok_or_else(|| RhiError::invalid_state("operation requires an active render pass"))?;
        encoder.end_encoding();
        self.pass_color_formats = None;
        self.bound_graphics = None;
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &dyn Pipeline) -> RhiResult<()> {
        self.require_recording()?;
        let metal = pipeline
            .as_any()
            .downcast_ref::<MetalPipeline>()
            .ok_or_else(|| RhiError::invalid_argument("pipeline is not a Metal pipeline"))?;
        match pipeline.kind() {
            PipelineKind::Graphics => {
                if let Some(pass_formats) = &self.pass_color_formats {
                    if pass_formats.as_slice() != pipeline.color_formats() {
                        return Err(RhiError::invalid_argument(
                            "pipeline color formats do not match the active render pass",
                        ));
                    }
                }
                let encoder = self.encoder()?;
                let render = metal.render.as_ref().unwrap();
                encoder.set_render_pipeline_state(render);
                if let Some(depth_stencil) = &metal.depth_stencil {
                    encoder.set_depth_stencil_state(depth_stencil);
                }
                self.bound_graphics = Some((render.clone(), metal.topology, metal.push_size));
            }
            PipelineKind::Compute => {
                if self.render_encoder.is_some() {
                    return Err(RhiError::invalid_state(
                        "compute pipelines cannot be bound inside a render pass",
                    ));
                }
                self.pending_compute.pipeline = metal.compute.clone();
            }
        }
        Ok(())
    }

    fn bind_descriptor_set(
        &mut self,
        set_index: u32,
        set: &dyn DescriptorSet,
        pipeline: &dyn Pipeline,
    ) -> RhiResult<()> {
        self.require_recording()?;
        let metal_set = set
            .as_any()
            .downcast_ref::<MetalDescriptorSet>()
            .ok_or_else(|| RhiError::invalid_argument("descriptor set is not a Metal set"))?;
        let entries = metal_set.entries.lock().unwrap();
        match pipeline.kind() {
            PipelineKind::Graphics => {
                let encoder = self.encoder()?;
                for entry in entries.iter() {
                    let slot = entry.slot as u64;
                    match &entry.payload {
                        SetPayload::Buffer(buffer, offset) => {
                            encoder.set_vertex_buffer(slot, Some(buffer), *offset);
                            encoder.set_fragment_buffer(slot, Some(buffer), *offset);
                        }
                        SetPayload::Texture(texture) => {
                            encoder.set_fragment_texture(slot, Some(texture));
                        }
                        SetPayload::Sampler(sampler) => {
                            encoder.set_fragment_sampler_state(slot, Some(sampler));
                        }
                    }
                }
            }
            PipelineKind::Compute => {
                let owned: Vec<(u32, OwnedPayload)> = entries
                    .iter()
                    .map(|entry| {
                        let payload = match &entry.payload {
                            SetPayload::Buffer(buffer, offset) => {
                                OwnedPayload::Buffer(buffer.clone(), *offset)
                            }
                            SetPayload::Texture(texture) => OwnedPayload::Texture(texture.clone()),
                            SetPayload::Sampler(sampler) => OwnedPayload::Sampler(sampler.clone()),
                        };
                        (entry.slot, payload)
                    })
                    .collect();
                self.pending_compute.sets.retain(|(i, _)| *i != set_index);
                self.pending_compute.sets.push((set_index, owned));
            }
        }
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, buffer: &dyn Buffer, offset: u64) -> RhiResult<()> {
        let metal = buffer
            .as_any()
            .downcast_ref::<MetalBuffer>()
            .ok_or_else(|| RhiError::invalid_argument("buffer is not a Metal buffer"))?;
        // Vertex data rides the dedicated slot 30, clear of bind-model slots.
        self.encoder()?
            .set_vertex_buffer(30, Some(&metal.buffer), offset);
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        buffer: &dyn Buffer,
        offset: u64,
        index_type: IndexType,
    ) -> RhiResult<()> {
        self.require_recording()?;
        let metal = buffer
            .as_any()
            .downcast_ref::<MetalBuffer>()
            .ok_or_else(|| RhiError::invalid_argument("buffer is not a Metal buffer"))?;
        // Metal takes the index buffer at draw time; remember it here.
        self.bound_index = Some((metal.buffer.clone(), offset, index_type));
        Ok(())
    }

    fn set_viewport(
        &mut self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        min_depth: f32,
        max_depth: f32,
    ) -> RhiResult<()> {
        self.encoder()?.set_viewport(metal::MTLViewport {
            originX: x as f64,
            originY: y as f64,
            width: width as f64,
            height: height as f64,
            znear: min_depth as f64,
            zfar: max_depth as f64,
        });
        Ok(())
    }

    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) -> RhiResult<()> {
        self.encoder()?.set_scissor_rect(metal::MTLScissorRect {
            x: x as u64,
            y: y as u64,
            width: width as u64,
            height: height as u64,
        });
        Ok(())
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        _first_instance: u32,
    ) -> RhiResult<()> {
        let Some((_, topology, _)) = &self.bound_graphics else {
            return Err(RhiError::invalid_state("draw without a graphics pipeline"));
        };
        let primitive = match topology {
            PrimitiveTopology::TriangleList => metal::MTLPrimitiveType::Triangle,
            PrimitiveTopology::TriangleStrip => metal::MTLPrimitiveType::TriangleStrip,
            PrimitiveTopology::LineList => metal::MTLPrimitiveType::Line,
            PrimitiveTopology::PointList => metal::MTLPrimitiveType::Point,
        };
        self.encoder()?.draw_primitives_instanced(
            primitive,
            first_vertex as u64,
            vertex_count as u64,
            instance_count as u64,
        );
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        _first_instance: u32,
    ) -> RhiResult<()> {
        let Some((_, topology, _)) = &self.bound_graphics else {
            return Err(RhiError::invalid_state("draw without a graphics pipeline"));
        };
        let primitive = match topology {
            PrimitiveTopology::TriangleList => metal::MTLPrimitiveType::Triangle,
            PrimitiveTopology::TriangleStrip => metal::MTLPrimitiveType::TriangleStrip,
            PrimitiveTopology::LineList => metal::MTLPrimitiveType::Line,
            PrimitiveTopology::PointList => metal::MTLPrimitiveType::Point,
        };
        let (index_buffer, base_offset, index_type) = self
            .bound_index
            .as_ref()
            .ok_or_else(|| RhiError::invalid_state("draw_indexed without an index buffer"))?;
        let (mtl_type, index_size) = match index_type {
            IndexType::Uint16 => (metal::MTLIndexType::UInt16, 2u64),
            IndexType::Uint32 => (metal::MTLIndexType::UInt32, 4u64),
        };
        self.encoder()?.draw_indexed_primitives_instanced_base_instance(
            primitive,
            index_count as u64,
            mtl_type,
            index_buffer,
            base_offset + first_index as u64 * index_size,
            instance_count as u64,
            vertex_offset as i64,
            0,
        );
        Ok(())
    }

    fn dispatch(&mut self, group_x: u32, group_y: u32, group_z: u32) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        let pipeline = self
            .pending_compute
            .pipeline
            .clone()
            .ok_or_else(|| RhiError::invalid_state("dispatch without a compute pipeline"))?;
        let encoder = self.raw()?.new_compute_command_encoder().to_owned();
        encoder.set_compute_pipeline_state(&pipeline);
        for (_, entries) in &self.pending_compute.sets {
            for (slot, payload) in entries {
                let slot = *slot as u64;
                match payload {
                    OwnedPayload::Buffer(buffer, offset) => {
                        encoder.set_buffer(slot, Some(buffer), *offset)
                    }
                    OwnedPayload::Texture(texture) => encoder.set_texture(slot, Some(texture)),
                    OwnedPayload::Sampler(sampler) => {
                        encoder.set_sampler_state(slot, Some(sampler))
                    }
                }
            }
        }
        if !self.pending_compute.push_constants.is_empty() {
            encoder.set_bytes(
                31,
                self.pending_compute.push_constants.len() as u64,
                self.pending_compute.push_constants.as_ptr().cast(),
            );
        }
        let threads_per_group = metal::MTLSize::new(1, 1, 1);
        encoder.dispatch_thread_groups(
            metal::MTLSize::new(group_x as u64, group_y as u64, group_z as u64),
            threads_per_group,
        );
        encoder.end_encoding();
        Ok(())
    }

    fn blit_image(
        &mut self,
        src: &dyn Image,
        _src_state: ResourceState,
        dst: &dyn Image,
        _dst_state: ResourceState,
        _filter: Filter,
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        let src_texture = metal_texture(src)?;
        let dst_texture = metal_texture(dst)?;
        let encoder = self.raw()?.new_blit_command_encoder().to_owned();
        encoder.copy_from_texture(
            &src_texture,
            0,
            0,
            metal::MTLOrigin { x: 0, y: 0, z: 0 },
            metal::MTLSize::new(
                src.info().width as u64,
                src.info().height as u64,
                1,
            ),
            &dst_texture,
            0,
            0,
            metal::MTLOrigin { x: 0, y: 0, z: 0 },
        );
        encoder.end_encoding();
        src.set_resource_state(ResourceState::TransferSrc);
        dst.set_resource_state(ResourceState::TransferDst);
        Ok(())
    }

    fn blit_image_region(
        &mut self,
        src: &dyn Image,
        src_mip: u32,
        src_extent: (u32, u32),
        dst: &dyn Image,
        dst_mip: u32,
        _dst_extent: (u32, u32),
        _filter: Filter,
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        let src_texture = metal_texture(src)?;
        let dst_texture = metal_texture(dst)?;
        let encoder = self.raw()?.new_blit_command_encoder().to_owned();
        encoder.copy_from_texture(
            &src_texture,
            0,
            src_mip as u64,
            metal::MTLOrigin { x: 0, y: 0, z: 0 },
            metal::MTLSize::new(src_extent.0 as u64, src_extent.1 as u64, 1),
            &dst_texture,
            0,
            dst_mip as u64,
            metal::MTLOrigin { x: 0, y: 0, z: 0 },
        );
        encoder.end_encoding();
        Ok(())
    }

    fn barrier(
        &mut self,
        buffer_barriers: &[BufferBarrier],
        _memory_barriers: &[MemoryBarrier],
        image_barriers: &[ImageBarrier],
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        // Hazards are tracked by the driver on one queue; the contract
        // reduces to state bookkeeping.
        for barrier in image_barriers {
            barrier.image.set_resource_state(barrier.new_state);
        }
        for barrier in buffer_barriers {
            if !barrier.new_state.valid_for_buffer() {
                return Err(RhiError::invalid_argument(format!(
                    "state {:?} is not valid for buffers",
                    barrier.new_state
                )));
            }
            barrier.buffer.set_resource_state(barrier.new_state);
        }
        Ok(())
    }

    fn push_constants(
        &mut self,
        pipeline: &dyn Pipeline,
        offset: u32,
        data: &[u8],
    ) -> RhiResult<()> {
        self.require_recording()?;
        let metal = pipeline
            .as_any()
            .downcast_ref::<MetalPipeline>()
            .ok_or_else(|| RhiError::invalid_argument("pipeline is not a Metal pipeline"))?;
        if offset + data.len() as u32 > metal.push_size {
            return Err(RhiError::invalid_argument(
                "push constant range exceeds the pipeline's declared size",
            ));
        }
        match pipeline.kind() {
            PipelineKind::Graphics => {
                // set_*_bytes replaces the whole slot, so partial updates
                // accumulate into one buffer and the full range is re-sent.
                let start = offset as usize;
                let end = start + data.len();
                if self.graphics_push_constants.len() < metal.push_size as usize {
                    self.graphics_push_constants.resize(metal.push_size as usize, 0);
                }
                self.graphics_push_constants[start..end].copy_from_slice(data);
                let encoder = self.encoder()?;
                // Push constants ride the dedicated slot 31 for both stages.
                encoder.set_vertex_bytes(
                    31,
                    self.graphics_push_constants.len() as u64,
                    self.graphics_push_constants.as_ptr().cast(),
                );
                encoder.set_fragment_bytes(
                    31,
                    self.graphics_push_constants.len() as u64,
                    self.graphics_push_constants.as_ptr().cast(),
                );
            }
            PipelineKind::Compute => {
                let start = offset as usize;
                let end = start + data.len();
                if self.pending_compute.push_constants.len() < end {
                    self.pending_compute.push_constants.resize(end, 0);
                }
                self.pending_compute.push_constants[start..end].copy_from_slice(data);
            }
        }
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Buffer,
        dst_offset: u64,
        size: u64,
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        if src_offset + size > src.info().size || dst_offset + size > dst.info().size {
            return Err(RhiError::invalid_argument("buffer copy out of bounds"));
        }
        let src = src
            .as_any()
            .downcast_ref::<MetalBuffer>()
            .ok_or_else(|| RhiError::invalid_argument("source is not a Metal buffer"))?;
        let dst = dst
            .as_any()
            .downcast_ref::<MetalBuffer>()
            .ok_or_else(|| RhiError::invalid_argument("destination is not a Metal buffer"))?;
        let encoder = self.raw()?.new_blit_command_encoder().to_owned();
        encoder.copy_from_buffer(&src.buffer, src_offset, &dst.buffer, dst_offset, size);
        encoder.end_encoding();
        Ok(())
    }

    fn copy_buffer_to_image(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Image,
        mip_level: u32,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        let src = src
            .as_any()
            .downcast_ref::<MetalBuffer>()
            .ok_or_else(|| RhiError::invalid_argument("source is not a Metal buffer"))?;
        let dst_texture = metal_texture(dst)?;
        let block = dst.info().format.block_size().max(1) as u64;
        let encoder = self.raw()?.new_blit_command_encoder().to_owned();
        encoder.copy_from_buffer_to_texture(
            &src.buffer,
            src_offset,
            width as u64 * block,
            width as u64 * height as u64 * block,
            metal::MTLSize::new(width as u64, height as u64, 1),
            &dst_texture,
            0,
            mip_level as u64,
            metal::MTLOrigin { x: 0, y: 0, z: 0 },
            metal::MTLBlitOption::empty(),
        );
        encoder.end_encoding();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MetalQueue {
    queue: metal::CommandQueue,
}

unsafe impl Send for MetalQueue {}
unsafe impl Sync for MetalQueue {}

impl std::fmt::Debug for MetalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalQueue").finish()
    }
}

impl Queue for MetalQueue {
    fn queue_type(&self) -> QueueType {
        QueueType::Graphics
    }

    fn submit(&self, info: &QueueSubmitInfo) -> RhiResult<()> {
        for cmd in info.command_buffers {
            let cmd = cmd
                .as_any()
                .downcast_ref::<MetalCommandBuffer>()
                .ok_or_else(|| {
                    RhiError::invalid_argument("command buffer is not a Metal buffer")
                })?;
            if cmd.state.get() != CommandBufferState::Executable {
                return Err(RhiError::invalid_state(
                    "submitted command buffer is not executable",
                ));
            }
            let raw = cmd
                .cmd
                .as_ref()
                .ok_or_else(|| RhiError::invalid_state("command buffer was never begun"))?;
            if let Some(fence) = info.signal_fence {
                if let Some(fence) = fence.as_any().downcast_ref::<MetalFence>() {
                    let value = fence.target.fetch_add(1, Ordering::Relaxed) + 1;
                    raw.encode_signal_event(&fence.event, value);
                }
            }
            raw.commit();
            cmd.state.set(CommandBufferState::Pending);
        }
        Ok(())
    }

    fn present(&self, info: &QueuePresentInfo) -> RhiResult<()> {
        let swapchain = info
            .swapchain
            .as_any()
            .downcast_ref::<MetalSwapchain>()
            .ok_or_else(|| RhiError::invalid_argument("swapchain is not a Metal swapchain"))?;
        swapchain.present(info.image_index)
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let cmd = self.queue.new_command_buffer();
        cmd.commit();
        cmd.wait_until_completed();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MetalSwapchainImage {
    pub(crate) texture: metal::Texture,
    drawable: metal::MetalDrawable,
    info: ImageInfo,
    state: StateCell,
    id: ResourceId,
}

unsafe impl Send for MetalSwapchainImage {}
unsafe impl Sync for MetalSwapchainImage {}

impl std::fmt::Debug for MetalSwapchainImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalSwapchainImage")
            .field("id", &self.id)
            .finish()
    }
}

impl Image for MetalSwapchainImage {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn info(&self) -> &ImageInfo {
        &self.info
    }

    fn resource_state(&self) -> ResourceState {
        self.state.get()
    }

    fn set_resource_state(&self, state: ResourceState) {
        self.state.set(state);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MetalSwapchain {
    layer: metal::MetalLayer,
    /// One slot per in-flight image; refilled with a fresh drawable at
    /// acquire.
    slots: Vec<Option<Arc<MetalSwapchainImage>>>,
    next_acquire: u32,
    extent: (u32, u32),
    format: Format,
    queue: metal::CommandQueue,
    next_image_id: AtomicU64,
}

unsafe impl Send for MetalSwapchain {}
unsafe impl Sync for MetalSwapchain {}

impl std::fmt::Debug for MetalSwapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalSwapchain")
            .field("extent", &self.extent)
            .field("image_count", &self.slots.len())
            .finish()
    }
}

impl MetalSwapchain {
    fn present(&self, image_index: u32) -> RhiResult<()> {
        let slot = self
            .slots
            .get(image_index as usize)
            .and_then(|s| s.as_ref())
            .ok_or_else(|| RhiError::invalid_argument("present image index out of range"))?;
        let cmd = self.queue.new_command_buffer();
        cmd.present_drawable(&slot.drawable);
        cmd.commit();
        Ok(())
    }
}

impl Swapchain for MetalSwapchain {
    fn image_count(&self) -> u32 {
        self.slots.len() as u32
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn format(&self) -> Format {
        self.format
    }

    fn image(&self, index: u32) -> Arc<dyn Image> {
        self.slots[index as usize]
            .as_ref()
            .map(|image| Arc::clone(image) as Arc<dyn Image>)
            .expect("image index was never acquired")
    }

    fn acquire_next_image(&mut self, _signal_semaphore: &dyn Semaphore) -> RhiResult<u32> {
        let drawable = self
            .layer
            .next_drawable()
            .ok_or(RhiError::SwapchainOutOfDate)?
            .to_owned();
        let index = self.next_acquire;
        self.next_acquire = (self.next_acquire + 1) % self.slots.len() as u32;
        self.slots[index as usize] = Some(Arc::new(MetalSwapchainImage {
            texture: drawable.texture().to_owned(),
            drawable,
            info: ImageInfo {
                label: Some("swapchain image"),
                width: self.extent.0,
                height: self.extent.1,
                format: self.format,
                usage: crate::ImageUsage::COLOR_ATTACHMENT | crate::ImageUsage::TRANSFER_DST,
                ..Default::default()
            },
            state: StateCell::new(ResourceState::Undefined),
            id: self.next_image_id.fetch_add(1, Ordering::Relaxed),
        }));
        Ok(index)
    }

    fn resize(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let cmd = self.queue.new_command_buffer();
        cmd.commit();
        cmd.wait_until_completed();
        self.layer
            .set_drawable_size(metal::CGSize::new(width as f64, height as f64));
        self.extent = (width, height);
        for slot in &mut self.slots {
            *slot = None;
        }
        self.next_acquire = 0;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
