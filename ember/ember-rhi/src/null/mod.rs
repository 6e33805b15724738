//! Headless backend: no hardware API behind it.
//!
//! Commands are recorded into an inspectable log and their host-visible
//! effects (buffer copies, resource-state transitions) are applied when the
//! queue "executes" a submission, so the render graph, resource loader and
//! frame driver can be exercised without a GPU. Recording validation is
//! stricter than the hardware backends: a barrier whose `old_state` neither
//! discards nor matches the tracked state fails with `InvalidState`, which is
//! what the graph compiler's tests lean on.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::reflection::{resolve_writes, BindingReflection, ShaderReflection};
use crate::{
    Buffer, BufferBarrier, BufferInfo, CommandBuffer, CommandBufferState, CommandPool,
    CommandPoolInfo, CommandStateCell, ComputePipelineInfo, DescriptorSet, DescriptorSetLayout,
    DescriptorWrite, Device, DeviceInfo, Fence, Filter, Format, Image, ImageBarrier, ImageInfo,
    IndexType, LoadOp, MemoryBarrier, MemoryDomain, Pipeline, PipelineInfo, PipelineKind, Queue,
    QueueInfo, QueuePresentInfo, QueueSubmitInfo, QueueType, RendererApi, RenderPass,
    RenderPassBeginInfo, RenderPassInfo, ResourceId, ResourceState, RhiError, RhiResult, Sampler,
    SamplerInfo, Semaphore, Shader, ShaderInfo, ShaderStages, StateCell, Swapchain, SwapchainInfo,
};

/// Keeps the device-wide allocation counter honest; decrements on drop.
#[derive(Debug)]
struct AllocationGuard(Arc<AtomicI64>);

impl AllocationGuard {
    fn new(counter: &Arc<AtomicI64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        AllocationGuard(Arc::clone(counter))
    }
}

impl Drop for AllocationGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct NullDevice {
    next_id: AtomicU64,
    allocations: Arc<AtomicI64>,
}

impl NullDevice {
    pub fn create(_info: &DeviceInfo) -> Arc<dyn Device> {
        log::info!("created null device");
        Arc::new(NullDevice {
            next_id: AtomicU64::new(1),
            allocations: Arc::new(AtomicI64::new(0)),
        })
    }

    fn next_id(&self) -> ResourceId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn make_image(&self, info: &ImageInfo) -> Arc<NullImage> {
        Arc::new(NullImage {
            id: self.next_id(),
            info: info.clone(),
            state: StateCell::new(ResourceState::Undefined),
            _alloc: AllocationGuard::new(&self.allocations),
        })
    }
}

impl Device for NullDevice {
    fn api(&self) -> RendererApi {
        RendererApi::Null
    }

    fn create_queue(&self, info: &QueueInfo) -> RhiResult<Arc<dyn Queue>> {
        Ok(Arc::new(NullQueue {
            queue_type: info.queue_type,
        }))
    }

    fn create_command_pool(&self, _info: &CommandPoolInfo) -> RhiResult<Box<dyn CommandPool>> {
        Ok(Box::new(NullCommandPool))
    }

    fn create_command_buffer(&self, _pool: &dyn CommandPool) -> RhiResult<Box<dyn CommandBuffer>> {
        Ok(Box::new(NullCommandBuffer {
            state: CommandStateCell::new(),
            in_render_pass: false,
            pass_color_formats: None,
            bound_pipeline: None,
            push_constant_size: 0,
            log: Mutex::new(Vec::new()),
            copies: Mutex::new(Vec::new()),
        }))
    }

    fn create_swapchain(&self, info: &SwapchainInfo) -> RhiResult<Box<dyn Swapchain>> {
        if info.width == 0 || info.height == 0 {
            return Err(RhiError::invalid_argument("swapchain extent must be nonzero"));
        }
        let image_count = info.min_image_count.max(1);
        let images = (0..image_count)
            .map(|_| {
                self.make_image(&ImageInfo {
                    label: Some("swapchain image"),
                    width: info.width,
                    height: info.height,
                    format: info.format,
                    usage: swapchain_image_usage(),
                    ..Default::default()
                })
            })
            .collect();
        Ok(Box::new(NullSwapchain {
            // High base keeps rebuilt swapchain image ids disjoint from device ids.
            device_next_id: AtomicU64::new(1 << 32),
            alloc_counter: Arc::clone(&self.allocations),
            extent: (info.width, info.height),
            format: info.format,
            images,
            next_acquire: AtomicU32::new(0),
            out_of_date: AtomicBool::new(false),
        }))
    }

    fn create_buffer(&self, info: &BufferInfo) -> RhiResult<Arc<dyn Buffer>> {
        if info.size == 0 {
            return Err(RhiError::invalid_argument("buffer size must be nonzero"));
        }
        Ok(Arc::new(NullBuffer {
            id: self.next_id(),
            info: info.clone(),
            state: StateCell::new(ResourceState::Undefined),
            data: Arc::new(BufferData::new(info.size as usize)),
            _alloc: AllocationGuard::new(&self.allocations),
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
        Ok(self.make_image(info))
    }

    fn create_sampler(&self, _info: &SamplerInfo) -> RhiResult<Arc<dyn Sampler>> {
        Ok(Arc::new(NullSampler))
    }

    fn create_shader(&self, info: &ShaderInfo) -> RhiResult<Arc<dyn Shader>> {
        let mut reflection = ShaderReflection::default();
        for module in [&info.vertex, &info.fragment, &info.compute]
            .into_iter()
            .flatten()
        {
            reflection.merge(&module.reflection)?;
        }
        Ok(Arc::new(NullShader {
            stages: info.stages(),
            reflection,
        }))
    }

    fn create_descriptor_set_layout(
        &self,
        shader: &dyn Shader,
    ) -> RhiResult<Arc<dyn DescriptorSetLayout>> {
        Ok(Arc::new(NullDescriptorSetLayout {
            bindings: shader.reflection().bindings.clone(),
        }))
    }

    fn create_descriptor_set(
        &self,
        layout: &dyn DescriptorSetLayout,
        set_index: u32,
    ) -> RhiResult<Box<dyn DescriptorSet>> {
        Ok(Box::new(NullDescriptorSet {
            set_index,
            bindings: layout.bindings().to_vec(),
            applied: Mutex::new(Vec::new()),
        }))
    }

    fn update_descriptor_set(
        &self,
        set: &mut dyn DescriptorSet,
        writes: &[DescriptorWrite],
    ) -> RhiResult<()> {
        let set = set
            .as_any()
            .downcast_ref::<NullDescriptorSet>()
            .ok_or_else(|| RhiError::invalid_argument("descriptor set is not a null set"))?;
        let resolved = resolve_writes(&set.bindings, set.set_index, writes)?;
        set.applied
            .lock()
            .unwrap()
            .extend(resolved.iter().map(|r| (r.binding, r.count)));
        Ok(())
    }

    fn create_graphics_pipeline(&self, info: &PipelineInfo) -> RhiResult<Arc<dyn Pipeline>> {
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
        Ok(Arc::new(NullPipeline {
            kind: PipelineKind::Graphics,
            color_formats: info.color_attachment_formats.clone(),
            push_constant_size: info.shader.reflection().push_constant_size(),
        }))
    }

    fn create_compute_pipeline(&self, info: &ComputePipelineInfo) -> RhiResult<Arc<dyn Pipeline>> {
        if !info.shader.stages().contains(ShaderStages::COMPUTE) {
            return Err(RhiError::invalid_argument(
                "compute pipeline requires a compute stage",
            ));
        }
        Ok(Arc::new(NullPipeline {
            kind: PipelineKind::Compute,
            color_formats: Vec::new(),
            push_constant_size: info.shader.reflection().push_constant_size(),
        }))
    }

    fn create_render_pass(&self, info: &RenderPassInfo) -> RhiResult<Arc<dyn RenderPass>> {
        Ok(Arc::new(NullRenderPass { info: info.clone() }))
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<Box<dyn Fence>> {
        Ok(Box::new(NullFence {
            signaled: AtomicBool::new(signaled),
        }))
    }

    fn create_semaphore(&self) -> RhiResult<Box<dyn Semaphore>> {
        Ok(Box::new(NullSemaphore))
    }

    fn wait_idle(&self) -> RhiResult<()> {
        Ok(())
    }

    fn live_allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed).max(0) as u64
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// Swapchain images are always attachment + blit targets.
fn swapchain_image_usage() -> crate::ImageUsage {
    crate::ImageUsage::COLOR_ATTACHMENT
        | crate::ImageUsage::TRANSFER_DST
        | crate::ImageUsage::TRANSFER_SRC
}

/// Byte storage shared between a buffer and the copy ops recorded against it.
#[derive(Debug)]
pub(crate) struct BufferData {
    bytes: std::cell::UnsafeCell<Box<[u8]>>,
}

// Single-threaded cooperative scheduling per the runtime contract; the cell
// is only touched from the owning thread.
unsafe impl Send for BufferData {}
unsafe impl Sync for BufferData {}

impl BufferData {
    fn new(size: usize) -> Self {
        BufferData {
            bytes: std::cell::UnsafeCell::new(vec![0u8; size].into_boxed_slice()),
        }
    }

    fn ptr(&self) -> *mut u8 {
        unsafe { (*self.bytes.get()).as_mut_ptr() }
    }

    fn len(&self) -> usize {
        unsafe { (&*self.bytes.get()).len() }
    }
}

#[derive(Debug)]
pub struct NullBuffer {
    id: ResourceId,
    info: BufferInfo,
    state: StateCell,
    data: Arc<BufferData>,
    _alloc: AllocationGuard,
}

impl Buffer for NullBuffer {
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
        Ok(self.data.ptr())
    }

    fn unmap(&self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct NullImage {
    id: ResourceId,
    info: ImageInfo,
    state: StateCell,
    _alloc: AllocationGuard,
}

impl Image for NullImage {
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

#[derive(Debug)]
pub struct NullSampler;

impl Sampler for NullSampler {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct NullShader {
    stages: ShaderStages,
    reflection: ShaderReflection,
}

impl Shader for NullShader {
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

#[derive(Debug)]
pub struct NullDescriptorSetLayout {
    bindings: Vec<BindingReflection>,
}

impl DescriptorSetLayout for NullDescriptorSetLayout {
    fn bindings(&self) -> &[BindingReflection] {
        &self.bindings
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct NullDescriptorSet {
    set_index: u32,
    bindings: Vec<BindingReflection>,
    applied: Mutex<Vec<(u32, u32)>>,
}

impl NullDescriptorSet {
    /// Number of writes that actually landed in the set.
    pub fn applied_write_count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }
}

impl DescriptorSet for NullDescriptorSet {
    fn set_index(&self) -> u32 {
        self.set_index
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct NullPipeline {
    kind: PipelineKind,
    color_formats: Vec<Format>,
    push_constant_size: u32,
}

impl Pipeline for NullPipeline {
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

#[derive(Debug)]
pub struct NullRenderPass {
    info: RenderPassInfo,
}

impl RenderPass for NullRenderPass {
    fn info(&self) -> &RenderPassInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct NullFence {
    signaled: AtomicBool,
}

impl Fence for NullFence {
    fn wait(&self) -> RhiResult<()> {
        // Submissions retire synchronously here; an unsignaled wait can only
        // mean the caller skipped the submit that should have signaled it.
        if self.signaled.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(RhiError::invalid_state(
                "waiting on a fence no submission will signal",
            ))
        }
    }

    fn reset(&self) -> RhiResult<()> {
        self.signaled.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Relaxed)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct NullSemaphore;

impl Semaphore for NullSemaphore {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct NullCommandPool;

impl CommandPool for NullCommandPool {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Inspectable trace of everything recorded into a [`NullCommandBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Barrier {
        images: Vec<(ResourceId, ResourceState, ResourceState)>,
        buffers: Vec<(ResourceId, ResourceState, ResourceState)>,
    },
    BeginRenderPass {
        attachments: Vec<ResourceId>,
        load_ops: Vec<LoadOp>,
    },
    EndRenderPass,
    BindPipeline(PipelineKind),
    BindDescriptorSet(u32),
    BindVertexBuffer(ResourceId),
    BindIndexBuffer(ResourceId, IndexType),
    SetViewport,
    SetScissor,
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    Dispatch(u32, u32, u32),
    Blit {
        src: ResourceId,
        dst: ResourceId,
    },
    PushConstants {
        offset: u32,
        size: u32,
    },
    CopyBuffer {
        src: ResourceId,
        dst: ResourceId,
        size: u64,
    },
    CopyBufferToImage {
        src: ResourceId,
        dst: ResourceId,
        mip_level: u32,
    },
}

struct CopyOp {
    src: Arc<BufferData>,
    src_offset: u64,
    dst: Arc<BufferData>,
    dst_offset: u64,
    size: u64,
}

pub struct NullCommandBuffer {
    state: CommandStateCell,
    in_render_pass: bool,
    pass_color_formats: Option<Vec<Format>>,
    bound_pipeline: Option<PipelineKind>,
    push_constant_size: u32,
    log: Mutex<Vec<RecordedCommand>>,
    copies: Mutex<Vec<CopyOp>>,
}

impl std::fmt::Debug for NullCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullCommandBuffer")
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl NullCommandBuffer {
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.log.lock().unwrap().clone()
    }

    fn require_recording(&self) -> RhiResult<()> {
        if self.state.get() != CommandBufferState::Recording {
            return Err(RhiError::invalid_state("command buffer is not recording"));
        }
        Ok(())
    }

    fn require_outside_render_pass(&self) -> RhiResult<()> {
        self.require_recording()?;
        if self.in_render_pass {
            return Err(RhiError::invalid_state(
                "operation is not allowed inside a render pass",
            ));
        }
        Ok(())
    }

    fn require_inside_render_pass(&self) -> RhiResult<()> {
        self.require_recording()?;
        if !self.in_render_pass {
            return Err(RhiError::invalid_state(
                "operation requires an active render pass",
            ));
        }
        Ok(())
    }

    fn push(&self, command: RecordedCommand) {
        self.log.lock().unwrap().push(command);
    }

    fn check_transition(
        current: ResourceState,
        old_state: ResourceState,
        what: &str,
    ) -> RhiResult<()> {
        if old_state != ResourceState::Undefined && old_state != current {
            return Err(RhiError::invalid_state(format!(
                "{what} barrier old state {old_state:?} does not match tracked state {current:?}"
            )));
        }
        Ok(())
    }
}

impl CommandBuffer for NullCommandBuffer {
    fn state(&self) -> CommandBufferState {
        self.state.get()
    }

    fn begin(&mut self) -> RhiResult<()> {
        if self.state.get() == CommandBufferState::Recording {
            return Err(RhiError::invalid_state("command buffer already recording"));
        }
        self.state.set(CommandBufferState::Recording);
        self.in_render_pass = false;
        self.pass_color_formats = None;
        self.bound_pipeline = None;
        self.push_constant_size = 0;
        self.log.lock().unwrap().clear();
        self.copies.lock().unwrap().clear();
        Ok(())
    }

    fn end(&mut self) -> RhiResult<()> {
        self.require_recording()?;
        if self.in_render_pass {
            return Err(RhiError::invalid_state(
                "cannot end a command buffer inside a render pass",
            ));
        }
        self.state.set(CommandBufferState::Executable);
        Ok(())
    }

    fn begin_render_pass(&mut self, info: &RenderPassBeginInfo) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        let mut attachments = Vec::with_capacity(info.color_attachments.len());
        let mut load_ops = Vec::with_capacity(info.color_attachments.len());
        for binding in &info.color_attachments {
            let image = binding.image.as_ref().ok_or_else(|| {
                RhiError::invalid_argument("render pass color attachment has no bound image")
            })?;
            attachments.push(image.id());
            load_ops.push(binding.load_op);
        }
        if let Some(depth) = &info.depth_stencil {
            let image = depth.image.as_ref().ok_or_else(|| {
                RhiError::invalid_argument("render pass depth attachment has no bound image")
            })?;
            attachments.push(image.id());
            load_ops.push(depth.load_op);
        }
        self.in_render_pass = true;
        self.pass_color_formats = Some(
            info.render_pass
                .info()
                .color_attachments
                .iter()
                .map(|a| a.format)
                .collect(),
        );
        self.push(RecordedCommand::BeginRenderPass {
            attachments,
            load_ops,
        });
        Ok(())
    }

    fn end_render_pass(&mut self) -> RhiResult<()> {
        self.require_inside_render_pass()?;
        self.in_render_pass = false;
        self.pass_color_formats = None;
        self.push(RecordedCommand::EndRenderPass);
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &dyn Pipeline) -> RhiResult<()> {
        self.require_recording()?;
        match pipeline.kind() {
            PipelineKind::Graphics => {
                if let Some(pass_formats) = &self.pass_color_formats {
                    if pass_formats.as_slice() != pipeline.color_formats() {
                        return Err(RhiError::invalid_argument(
                            "pipeline color formats do not match the active render pass",
                        ));
                    }
                }
            }
            PipelineKind::Compute => {
                if self.in_render_pass {
                    return Err(RhiError::invalid_state(
                        "compute pipelines cannot be bound inside a render pass",
                    ));
                }
            }
        }
        self.bound_pipeline = Some(pipeline.kind());
        self.push_constant_size = pipeline
            .as_any()
            .downcast_ref::<NullPipeline>()
            .map(|p| p.push_constant_size)
            .unwrap_or(0);
        self.push(RecordedCommand::BindPipeline(pipeline.kind()));
        Ok(())
    }

    fn bind_descriptor_set(
        &mut self,
        set_index: u32,
        _set: &dyn DescriptorSet,
        _pipeline: &dyn Pipeline,
    ) -> RhiResult<()> {
        self.require_recording()?;
        self.push(RecordedCommand::BindDescriptorSet(set_index));
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, buffer: &dyn Buffer, _offset: u64) -> RhiResult<()> {
        self.require_recording()?;
        self.push(RecordedCommand::BindVertexBuffer(buffer.id()));
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        buffer: &dyn Buffer,
        _offset: u64,
        index_type: IndexType,
    ) -> RhiResult<()> {
        self.require_recording()?;
        self.push(RecordedCommand::BindIndexBuffer(buffer.id(), index_type));
        Ok(())
    }

    fn set_viewport(
        &mut self,
        _x: f32,
        _y: f32,
        _width: f32,
        _height: f32,
        _min_depth: f32,
        _max_depth: f32,
    ) -> RhiResult<()> {
        self.require_recording()?;
        self.push(RecordedCommand::SetViewport);
        Ok(())
    }

    fn set_scissor(&mut self, _x: i32, _y: i32, _width: u32, _height: u32) -> RhiResult<()> {
        self.require_recording()?;
        self.push(RecordedCommand::SetScissor);
        Ok(())
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) -> RhiResult<()> {
        self.require_inside_render_pass()?;
        if self.bound_pipeline != Some(PipelineKind::Graphics) {
            return Err(RhiError::invalid_state("draw without a graphics pipeline"));
        }
        self.push(RecordedCommand::Draw {
            vertex_count,
            instance_count,
        });
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) -> RhiResult<()> {
        self.require_inside_render_pass()?;
        if self.bound_pipeline != Some(PipelineKind::Graphics) {
            return Err(RhiError::invalid_state("draw without a graphics pipeline"));
        }
        self.push(RecordedCommand::DrawIndexed {
            index_count,
            instance_count,
        });
        Ok(())
    }

    fn dispatch(&mut self, group_x: u32, group_y: u32, group_z: u32) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        if self.bound_pipeline != Some(PipelineKind::Compute) {
            return Err(RhiError::invalid_state("dispatch without a compute pipeline"));
        }
        self.push(RecordedCommand::Dispatch(group_x, group_y, group_z));
        Ok(())
    }

    fn blit_image(
        &mut self,
        src: &dyn Image,
        src_state: ResourceState,
        dst: &dyn Image,
        dst_state: ResourceState,
        _filter: Filter,
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        Self::check_transition(src.resource_state(), src_state, "blit source")?;
        Self::check_transition(dst.resource_state(), dst_state, "blit destination")?;
        src.set_resource_state(ResourceState::TransferSrc);
        dst.set_resource_state(ResourceState::TransferDst);
        self.push(RecordedCommand::Blit {
            src: src.id(),
            dst: dst.id(),
        });
        Ok(())
    }

    fn blit_image_region(
        &mut self,
        src: &dyn Image,
        _src_mip: u32,
        _src_extent: (u32, u32),
        dst: &dyn Image,
        _dst_mip: u32,
        _dst_extent: (u32, u32),
        _filter: Filter,
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        self.push(RecordedCommand::Blit {
            src: src.id(),
            dst: dst.id(),
        });
        Ok(())
    }

    fn barrier(
        &mut self,
        buffer_barriers: &[BufferBarrier],
        _memory_barriers: &[MemoryBarrier],
        image_barriers: &[ImageBarrier],
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        let mut images = Vec::with_capacity(image_barriers.len());
        for barrier in image_barriers {
            Self::check_transition(barrier.image.resource_state(), barrier.old_state, "image")?;
            barrier.image.set_resource_state(barrier.new_state);
            images.push((barrier.image.id(), barrier.old_state, barrier.new_state));
        }
        let mut buffers = Vec::with_capacity(buffer_barriers.len());
        for barrier in buffer_barriers {
            if !barrier.new_state.valid_for_buffer() {
                return Err(RhiError::invalid_argument(format!(
                    "state {:?} is not valid for buffers",
                    barrier.new_state
                )));
            }
            Self::check_transition(barrier.buffer.resource_state(), barrier.old_state, "buffer")?;
            barrier.buffer.set_resource_state(barrier.new_state);
            buffers.push((barrier.buffer.id(), barrier.old_state, barrier.new_state));
        }
        self.push(RecordedCommand::Barrier { images, buffers });
        Ok(())
    }

    fn push_constants(
        &mut self,
        _pipeline: &dyn Pipeline,
        offset: u32,
        data: &[u8],
    ) -> RhiResult<()> {
        self.require_recording()?;
        if self.push_constant_size > 0 && offset + data.len() as u32 > self.push_constant_size {
            return Err(RhiError::invalid_argument(
                "push constant range exceeds the pipeline's declared size",
            ));
        }
        self.push(RecordedCommand::PushConstants {
            offset,
            size: data.len() as u32,
        });
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
        let src_null = src
            .as_any()
            .downcast_ref::<NullBuffer>()
            .ok_or_else(|| RhiError::invalid_argument("source is not a null buffer"))?;
        let dst_null = dst
            .as_any()
            .downcast_ref::<NullBuffer>()
            .ok_or_else(|| RhiError::invalid_argument("destination is not a null buffer"))?;
        self.copies.lock().unwrap().push(CopyOp {
            src: Arc::clone(&src_null.data),
            src_offset,
            dst: Arc::clone(&dst_null.data),
            dst_offset,
            size,
        });
        self.push(RecordedCommand::CopyBuffer {
            src: src.id(),
            dst: dst.id(),
            size,
        });
        Ok(())
    }

    fn copy_buffer_to_image(
        &mut self,
        src: &dyn Buffer,
        _src_offset: u64,
        dst: &dyn Image,
        mip_level: u32,
        _width: u32,
        _height: u32,
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        if dst.resource_state() != ResourceState::TransferDst {
            return Err(RhiError::invalid_state(
                "image must be in TransferDst before a buffer-to-image copy",
            ));
        }
        self.push(RecordedCommand::CopyBufferToImage {
            src: src.id(),
            dst: dst.id(),
            mip_level,
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct NullQueue {
    queue_type: QueueType,
}

impl Queue for NullQueue {
    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn submit(&self, info: &QueueSubmitInfo) -> RhiResult<()> {
        for cmd in info.command_buffers {
            let null_cmd = cmd
                .as_any()
                .downcast_ref::<NullCommandBuffer>()
                .ok_or_else(|| RhiError::invalid_argument("command buffer is not a null buffer"))?;
            if null_cmd.state() != CommandBufferState::Executable {
                return Err(RhiError::invalid_state(
                    "submitted command buffer is not executable",
                ));
            }
            for op in null_cmd.copies.lock().unwrap().drain(..) {
                let size = op.size as usize;
                let src_off = op.src_offset as usize;
                let dst_off = op.dst_offset as usize;
                debug_assert!(src_off + size <= op.src.len());
                debug_assert!(dst_off + size <= op.dst.len());
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        op.src.ptr().add(src_off),
                        op.dst.ptr().add(dst_off),
                        size,
                    );
                }
            }
            null_cmd.state.set(CommandBufferState::Pending);
        }
        if let Some(fence) = info.signal_fence {
            if let Some(fence) = fence.as_any().downcast_ref::<NullFence>() {
                fence.signaled.store(true, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn present(&self, info: &QueuePresentInfo) -> RhiResult<()> {
        let swapchain = info
            .swapchain
            .as_any()
            .downcast_ref::<NullSwapchain>()
            .ok_or_else(|| RhiError::invalid_argument("swapchain is not a null swapchain"))?;
        if swapchain.out_of_date.load(Ordering::Relaxed) {
            return Err(RhiError::SwapchainOutOfDate);
        }
        if info.image_index >= swapchain.images.len() as u32 {
            return Err(RhiError::invalid_argument("present image index out of range"));
        }
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct NullSwapchain {
    device_next_id: AtomicU64,
    alloc_counter: Arc<AtomicI64>,
    extent: (u32, u32),
    format: Format,
    images: Vec<Arc<NullImage>>,
    next_acquire: AtomicU32,
    out_of_date: AtomicBool,
}

impl std::fmt::Debug for NullSwapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullSwapchain")
            .field("extent", &self.extent)
            .field("image_count", &self.images.len())
            .finish()
    }
}

impl NullSwapchain {
    /// Test hook: make the next acquire/present report `SwapchainOutOfDate`.
    pub fn simulate_out_of_date(&self) {
        self.out_of_date.store(true, Ordering::Relaxed);
    }

    fn make_image(&self, width: u32, height: u32) -> Arc<NullImage> {
        Arc::new(NullImage {
            id: self.device_next_id.fetch_add(1, Ordering::Relaxed),
            info: ImageInfo {
                label: Some("swapchain image"),
                width,
                height,
                format: self.format,
                usage: swapchain_image_usage(),
                ..Default::default()
            },
            state: StateCell::new(ResourceState::Undefined),
            _alloc: AllocationGuard::new(&self.alloc_counter),
        })
    }
}

impl Swapchain for NullSwapchain {
    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn format(&self) -> Format {
        self.format
    }

    fn image(&self, index: u32) -> Arc<dyn Image> {
        Arc::clone(&self.images[index as usize]) as Arc<dyn Image>
    }

    fn acquire_next_image(&mut self, _signal_semaphore: &dyn Semaphore) -> RhiResult<u32> {
        if self.out_of_date.load(Ordering::Relaxed) {
            return Err(RhiError::SwapchainOutOfDate);
        }
        let count = self.images.len() as u32;
        let index = self.next_acquire.load(Ordering::Relaxed) % count;
        self.next_acquire.store((index + 1) % count, Ordering::Relaxed);
        Ok(index)
    }

    fn resize(&mut self, width: u32, height: u32) -> RhiResult<()> {
        if width == 0 || height == 0 {
            return Err(RhiError::invalid_argument("swapchain extent must be nonzero"));
        }
        self.extent = (width, height);
        let count = self.images.len();
        self.images = (0..count).map(|_| self.make_image(width, height)).collect();
        self.next_acquire.store(0, Ordering::Relaxed);
        self.out_of_date.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::DescriptorKind;
    use crate::{BufferUsage, ShaderModuleInfo};

    fn device() -> Arc<dyn Device> {
        NullDevice::create(&DeviceInfo::default())
    }

    fn recording_cmd(device: &Arc<dyn Device>) -> Box<dyn CommandBuffer> {
        let queue = device
            .create_queue(&QueueInfo {
                queue_type: QueueType::Graphics,
            })
            .unwrap();
        let pool = device
            .create_command_pool(&CommandPoolInfo { queue: &*queue })
            .unwrap();
        let mut cmd = device.create_command_buffer(&*pool).unwrap();
        cmd.begin().unwrap();
        cmd
    }

    #[test]
    fn zero_size_buffer_is_rejected() {
        let device = device();
        let err = device
            .create_buffer(&BufferInfo {
                size: 0,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidArgument(_)));
    }

    #[test]
    fn images_start_undefined() {
        let device = device();
        let image = device
            .create_image(&ImageInfo {
                width: 4,
                height: 4,
                format: Format::R8G8B8A8Unorm,
                usage: crate::ImageUsage::SAMPLED,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(image.resource_state(), ResourceState::Undefined);
    }

    #[test]
    fn barrier_outside_pass_only() {
        let device = device();
        let image = device
            .create_image(&ImageInfo {
                width: 4,
                height: 4,
                format: Format::R8G8B8A8Unorm,
                usage: crate::ImageUsage::COLOR_ATTACHMENT,
                ..Default::default()
            })
            .unwrap();
        let render_pass = device
            .create_render_pass(&RenderPassInfo {
                width: 4,
                height: 4,
                color_attachments: vec![crate::AttachmentInfo {
                    format: Format::R8G8B8A8Unorm,
                    sample_count: 1,
                    load_op: LoadOp::Clear,
                    initial_state: ResourceState::ColorAttachment,
                }],
                depth_stencil: None,
            })
            .unwrap();
        let mut cmd = recording_cmd(&device);
        cmd.barrier(
            &[],
            &[],
            &[ImageBarrier {
                image: &*image,
                old_state: ResourceState::Undefined,
                new_state: ResourceState::ColorAttachment,
                src_queue: None,
                dst_queue: None,
                subresource: None,
            }],
        )
        .unwrap();
        cmd.begin_render_pass(&RenderPassBeginInfo {
            render_pass,
            width: 4,
            height: 4,
            color_attachments: vec![crate::ColorAttachmentBinding {
                image: Some(Arc::clone(&image)),
                load_op: LoadOp::Clear,
                state: ResourceState::ColorAttachment,
                clear_value: [0.0; 4],
            }],
            depth_stencil: None,
        })
        .unwrap();
        let err = cmd
            .barrier(
                &[],
                &[],
                &[ImageBarrier {
                    image: &*image,
                    old_state: ResourceState::ColorAttachment,
                    new_state: ResourceState::ShaderReadOnly,
                    src_queue: None,
                    dst_queue: None,
                    subresource: None,
                }],
            )
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidState(_)));
    }

    #[test]
    fn draw_requires_pipeline_and_pass() {
        let device = device();
        let mut cmd = recording_cmd(&device);
        let err = cmd.draw(3, 1, 0, 0).unwrap_err();
        assert!(matches!(err, RhiError::InvalidState(_)));
    }

    #[test]
    fn identical_state_transition_is_permitted() {
        let device = device();
        let image = device
            .create_image(&ImageInfo {
                width: 4,
                height: 4,
                format: Format::R8G8B8A8Unorm,
                usage: crate::ImageUsage::SAMPLED | crate::ImageUsage::TRANSFER_DST,
                ..Default::default()
            })
            .unwrap();
        image.set_resource_state(ResourceState::ShaderReadOnly);
        let mut cmd = recording_cmd(&device);
        cmd.barrier(
            &[],
            &[],
            &[ImageBarrier {
                image: &*image,
                old_state: ResourceState::ShaderReadOnly,
                new_state: ResourceState::ShaderReadOnly,
                src_queue: None,
                dst_queue: None,
                subresource: None,
            }],
        )
        .unwrap();
        assert_eq!(image.resource_state(), ResourceState::ShaderReadOnly);
    }

    #[test]
    fn state_chain_leaves_no_allocations() {
        let device = device();
        assert_eq!(device.live_allocations(), 0);
        {
            let image = device
                .create_image(&ImageInfo {
                    width: 8,
                    height: 8,
                    format: Format::R8G8B8A8Unorm,
                    usage: crate::ImageUsage::STORAGE
                        | crate::ImageUsage::SAMPLED
                        | crate::ImageUsage::TRANSFER_SRC,
                    ..Default::default()
                })
                .unwrap();
            let mut cmd = recording_cmd(&device);
            for (old, new) in [
                (ResourceState::Undefined, ResourceState::General),
                (ResourceState::General, ResourceState::ShaderReadOnly),
                (ResourceState::ShaderReadOnly, ResourceState::TransferSrc),
                (ResourceState::TransferSrc, ResourceState::ShaderReadOnly),
            ] {
                cmd.barrier(
                    &[],
                    &[],
                    &[ImageBarrier {
                        image: &*image,
                        old_state: old,
                        new_state: new,
                        src_queue: None,
                        dst_queue: None,
                        subresource: None,
                    }],
                )
                .unwrap();
            }
            assert_eq!(device.live_allocations(), 1);
        }
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn unknown_descriptor_name_leaves_set_unmodified() {
        let device = device();
        let shader = device
            .create_shader(&ShaderInfo {
                vertex: Some(ShaderModuleInfo {
                    bytecode: vec![0; 8],
                    entry_point: "main".into(),
                    reflection: ShaderReflection {
                        bindings: vec![BindingReflection {
                            name: "ubo".into(),
                            set: 0,
                            binding: 0,
                            kind: DescriptorKind::UniformBuffer,
                            array_count: 1,
                            stages: ShaderStages::VERTEX,
                        }],
                        push_constants: vec![],
                    },
                }),
                ..Default::default()
            })
            .unwrap();
        let layout = device.create_descriptor_set_layout(&*shader).unwrap();
        let mut set = device.create_descriptor_set(&*layout, 0).unwrap();
        let buffer = device
            .create_buffer(&BufferInfo {
                size: 64,
                usage: BufferUsage::UNIFORM,
                memory_domain: MemoryDomain::Upload,
                ..Default::default()
            })
            .unwrap();
        let err = device
            .update_descriptor_set(
                set.as_mut(),
                &[
                    DescriptorWrite {
                        descriptor_name: "ubo",
                        buffers: &[crate::BufferBinding {
                            buffer: &*buffer,
                            offset: 0,
                            range: 0,
                        }],
                        images: &[],
                        samplers: &[],
                    },
                    DescriptorWrite {
                        descriptor_name: "missing",
                        buffers: &[],
                        images: &[],
                        samplers: &[],
                    },
                ],
            )
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidArgument(_)));
        let null_set = set.as_any().downcast_ref::<NullDescriptorSet>().unwrap();
        assert_eq!(null_set.applied_write_count(), 0);
    }

    #[test]
    fn pipeline_formats_must_match_the_render_pass() {
        let device = device();
        let shader = device
            .create_shader(&ShaderInfo {
                vertex: Some(ShaderModuleInfo {
                    bytecode: vec![0; 8],
                    entry_point: "main".into(),
                    reflection: ShaderReflection::default(),
                }),
                ..Default::default()
            })
            .unwrap();
        let layout = device.create_descriptor_set_layout(&*shader).unwrap();
        let render_pass = device
            .create_render_pass(&RenderPassInfo {
                width: 64,
                height: 64,
                color_attachments: vec![crate::AttachmentInfo {
                    format: Format::B8G8R8A8Srgb,
                    sample_count: 1,
                    load_op: LoadOp::Clear,
                    initial_state: ResourceState::ColorAttachment,
                }],
                depth_stencil: None,
            })
            .unwrap();
        let err = device
            .create_graphics_pipeline(&crate::PipelineInfo {
                shader: &*shader,
                descriptor_set_layout: &*layout,
                vertex_layout: Default::default(),
                topology: Default::default(),
                rasterizer: Default::default(),
                depth_state: Default::default(),
                blend_state: None,
                sample_count: 1,
                color_attachment_formats: vec![Format::R8G8B8A8Unorm],
                depth_stencil_format: None,
                render_pass: Some(&*render_pass),
            })
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidArgument(_)));
    }

    #[test]
    fn upload_then_copy_back_round_trips() {
        let device = device();
        let queue = device
            .create_queue(&QueueInfo {
                queue_type: QueueType::Graphics,
            })
            .unwrap();
        let src = device
            .create_buffer(&BufferInfo {
                size: 64,
                usage: BufferUsage::TRANSFER_SRC,
                memory_domain: MemoryDomain::Upload,
                ..Default::default()
            })
            .unwrap();
        let dst = device
            .create_buffer(&BufferInfo {
                size: 64,
                usage: BufferUsage::TRANSFER_DST | BufferUsage::TRANSFER_SRC,
                ..Default::default()
            })
            .unwrap();
        let readback = device
            .create_buffer(&BufferInfo {
                size: 64,
                usage: BufferUsage::TRANSFER_DST,
                memory_domain: MemoryDomain::Readback,
                ..Default::default()
            })
            .unwrap();
        let payload: Vec<u8> = (0..64u8).collect();
        {
            let mut mapping = crate::map_buffer(&*src).unwrap();
            mapping.bytes_mut().copy_from_slice(&payload);
        }
        let pool = device
            .create_command_pool(&CommandPoolInfo { queue: &*queue })
            .unwrap();
        let mut cmd = device.create_command_buffer(&*pool).unwrap();
        cmd.begin().unwrap();
        cmd.copy_buffer(&*src, 0, &*dst, 0, 64).unwrap();
        cmd.copy_buffer(&*dst, 0, &*readback, 0, 64).unwrap();
        cmd.end().unwrap();
        device.immediate_submit(&*queue, &*cmd).unwrap();
        let mapping = crate::map_buffer(&*readback).unwrap();
        assert_eq!(mapping.bytes(), payload.as_slice());
    }
}
