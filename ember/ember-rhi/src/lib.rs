//! Ember RHI: backend-agnostic rendering hardware interface.
//! Defines the traits and types required to abstract over Vulkan, D3D12 and Metal,
//! plus a headless Null backend used by tests and tooling.

use std::any::Any;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

mod error;
pub mod reflection;

pub use error::{RhiError, RhiResult};
pub use reflection::{
    BindingReflection, DescriptorKind, PushConstantRange, ShaderReflection,
};

pub mod null;

#[cfg(feature = "vulkan")]
pub mod vulkan;

#[cfg(all(feature = "d3d12", target_os = "windows"))]
pub mod d3d12;

#[cfg(all(feature = "metal", target_os = "macos"))]
pub mod metal;

/// Unique identifier for a GPU resource.
pub type ResourceId = u64;

/// Hardware API implementing the device. Fixed for the lifetime of a Device;
/// switching requires tearing down and reinitializing the whole chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RendererApi {
    Vulkan,
    D3d12,
    Metal,
    /// Headless backend: no GPU, command effects applied host-side.
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

/// Pixel/attachment formats used across the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Undefined,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    B8G8R8A8Unorm,
    B8G8R8A8Srgb,
    R16G16B16A16Sfloat,
    R32G32B32A32Sfloat,
    R32Sfloat,
    D32Sfloat,
    D24UnormS8Uint,
}

impl Format {
    pub fn is_depth(self) -> bool {
        matches!(self, Format::D32Sfloat | Format::D24UnormS8Uint)
    }

    /// Bytes per pixel for transfer sizing. Depth formats are not uploadable.
    pub fn block_size(self) -> u32 {
        match self {
            Format::Undefined => 0,
            Format::R8G8B8A8Unorm
            | Format::R8G8B8A8Srgb
            | Format::B8G8R8A8Unorm
            | Format::B8G8R8A8Srgb
            | Format::R32Sfloat
            | Format::D32Sfloat
            | Format::D24UnormS8Uint => 4,
            Format::R16G16B16A16Sfloat => 8,
            Format::R32G32B32A32Sfloat => 16,
        }
    }
}

/// Logical usage class of an image or buffer; the input to the barrier system.
/// Backends translate states into native layouts, pipeline stages and access
/// masks. Transitioning out of `Undefined` discards contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ResourceState {
    Undefined = 0,
    General,
    ColorAttachment,
    DepthStencilWrite,
    DepthStencilReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    Present,
}

impl ResourceState {
    fn from_u32(v: u32) -> ResourceState {
        match v {
            0 => ResourceState::Undefined,
            1 => ResourceState::General,
            2 => ResourceState::ColorAttachment,
            3 => ResourceState::DepthStencilWrite,
            4 => ResourceState::DepthStencilReadOnly,
            5 => ResourceState::ShaderReadOnly,
            6 => ResourceState::TransferSrc,
            7 => ResourceState::TransferDst,
            _ => ResourceState::Present,
        }
    }

    /// Buffers only take the transfer/shader subset of states.
    pub fn valid_for_buffer(self) -> bool {
        matches!(
            self,
            ResourceState::Undefined
                | ResourceState::General
                | ResourceState::ShaderReadOnly
                | ResourceState::TransferSrc
                | ResourceState::TransferDst
        )
    }
}

/// Interior-mutable holder for a resource's logical state. Barriers are the
/// only writers outside of resource creation.
#[derive(Debug)]
pub struct StateCell(AtomicU32);

impl StateCell {
    pub fn new(state: ResourceState) -> Self {
        StateCell(AtomicU32::new(state as u32))
    }

    pub fn get(&self) -> ResourceState {
        ResourceState::from_u32(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, state: ResourceState) {
        self.0.store(state as u32, Ordering::Relaxed);
    }
}

/// Recording lifecycle of a command buffer. A submit consumes an `Executable`
/// buffer and leaves it `Pending` until the associated fence signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandBufferState {
    Initial = 0,
    Recording,
    Executable,
    Pending,
}

/// Interior-mutable command buffer state; submission flips Executable to
/// Pending through a shared reference.
#[derive(Debug)]
pub struct CommandStateCell(AtomicU32);

impl CommandStateCell {
    pub fn new() -> Self {
        CommandStateCell(AtomicU32::new(CommandBufferState::Initial as u32))
    }

    pub fn get(&self) -> CommandBufferState {
        match self.0.load(Ordering::Relaxed) {
            0 => CommandBufferState::Initial,
            1 => CommandBufferState::Recording,
            2 => CommandBufferState::Executable,
            _ => CommandBufferState::Pending,
        }
    }

    pub fn set(&self, state: CommandBufferState) {
        self.0.store(state as u32, Ordering::Relaxed);
    }
}

impl Default for CommandStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a buffer's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryDomain {
    /// GPU-only; uploads go through a staging buffer.
    #[default]
    DeviceLocal,
    /// Host-visible, device-readable; safe to memcpy into each frame.
    Upload,
    /// Host-visible, device-writable; readback path.
    Readback,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const INDIRECT = 1 << 4;
        const TRANSFER_SRC = 1 << 5;
        const TRANSFER_DST = 1 << 6;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImageUsage: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const COLOR_ATTACHMENT = 1 << 2;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

#[derive(Debug, Clone)]
pub struct BufferInfo {
    pub label: Option<&'static str>,
    pub size: u64,
    pub usage: BufferUsage,
    pub memory_domain: MemoryDomain,
}

impl Default for BufferInfo {
    fn default() -> Self {
        Self {
            label: None,
            size: 0,
            usage: BufferUsage::empty(),
            memory_domain: MemoryDomain::DeviceLocal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub label: Option<&'static str>,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: Format,
    pub layer_count: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub usage: ImageUsage,
}

impl Default for ImageInfo {
    fn default() -> Self {
        Self {
            label: None,
            width: 0,
            height: 0,
            depth: 1,
            format: Format::Undefined,
            layer_count: 1,
            mip_levels: 1,
            sample_count: 1,
            usage: ImageUsage::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone)]
pub struct SamplerInfo {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_mode: Filter,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerInfo {
    fn default() -> Self {
        Self {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mipmap_mode: Filter::Linear,
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            address_mode_w: AddressMode::Repeat,
            min_lod: 0.0,
            max_lod: 1000.0,
        }
    }
}

/// One compiled shader stage: opaque bytecode plus the reflection table the
/// offline pipeline emitted for it. The runtime never parses bytecode.
#[derive(Debug, Clone, Default)]
pub struct ShaderModuleInfo {
    pub bytecode: Vec<u8>,
    pub entry_point: String,
    pub reflection: ShaderReflection,
}

#[derive(Debug, Clone, Default)]
pub struct ShaderInfo {
    pub vertex: Option<ShaderModuleInfo>,
    pub fragment: Option<ShaderModuleInfo>,
    pub compute: Option<ShaderModuleInfo>,
}

impl ShaderInfo {
    pub fn stages(&self) -> ShaderStages {
        let mut stages = ShaderStages::empty();
        if self.vertex.is_some() {
            stages |= ShaderStages::VERTEX;
        }
        if self.fragment.is_some() {
            stages |= ShaderStages::FRAGMENT;
        }
        if self.compute.is_some() {
            stages |= ShaderStages::COMPUTE;
        }
        stages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    #[default]
    Float32x3,
    Float32x4,
    Uint32,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Float32 | VertexFormat::Uint32 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

#[derive(Debug, Clone, Default)]
pub struct VertexLayout {
    pub bindings: Vec<VertexBinding>,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
}

#[derive(Debug, Clone, Default)]
pub struct RasterizerState {
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub polygon_mode: PolygonMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Debug, Clone)]
pub struct DepthState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare_op: CompareOp,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            compare_op: CompareOp::Always,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum BlendFactor {
    One,
    Zero,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy)]
pub enum BlendOp {
    Add,
    Subtract,
}

#[derive(Debug, Clone, Copy)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOp,
}

#[derive(Debug, Clone, Copy)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// Graphics pipeline description. `color_attachment_formats` must equal,
/// positionally, the color formats of the render pass the pipeline is used
/// in. When `render_pass` is supplied the backend ties the pipeline to that
/// framebuffer signature; otherwise it derives a compatible one from the
/// format lists.
pub struct PipelineInfo<'a> {
    pub shader: &'a dyn Shader,
    pub descriptor_set_layout: &'a dyn DescriptorSetLayout,
    pub vertex_layout: VertexLayout,
    pub topology: PrimitiveTopology,
    pub rasterizer: RasterizerState,
    pub depth_state: DepthState,
    pub blend_state: Option<BlendState>,
    pub sample_count: u32,
    pub color_attachment_formats: Vec<Format>,
    pub depth_stencil_format: Option<Format>,
    pub render_pass: Option<&'a dyn RenderPass>,
}

pub struct ComputePipelineInfo<'a> {
    pub shader: &'a dyn Shader,
    pub descriptor_set_layout: &'a dyn DescriptorSetLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    Load,
    Clear,
    #[default]
    DontCare,
}

/// One attachment slot in a render pass signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentInfo {
    pub format: Format,
    pub sample_count: u32,
    pub load_op: LoadOp,
    /// Resource state the attachment is expected to be in on entry.
    pub initial_state: ResourceState,
}

/// Structural signature of a render pass: the pass-cache fingerprint hashes
/// exactly these fields. Width/height are included so resize invalidates
/// cached entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RenderPassInfo {
    pub width: u32,
    pub height: u32,
    pub color_attachments: Vec<AttachmentInfo>,
    pub depth_stencil: Option<AttachmentInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthStencilClearValue {
    pub depth: f32,
    pub stencil: u32,
}

/// Per-frame binding of a color attachment. `image` is `None` only for the
/// backbuffer slot before `setup_attachments` injects the acquired image.
#[derive(Clone)]
pub struct ColorAttachmentBinding {
    pub image: Option<Arc<dyn Image>>,
    pub load_op: LoadOp,
    pub state: ResourceState,
    pub clear_value: [f32; 4],
}

#[derive(Clone)]
pub struct DepthStencilBinding {
    pub image: Option<Arc<dyn Image>>,
    pub load_op: LoadOp,
    pub state: ResourceState,
    pub clear_value: DepthStencilClearValue,
}

/// Everything a backend needs to begin one render pass instance.
#[derive(Clone)]
pub struct RenderPassBeginInfo {
    pub render_pass: Arc<dyn RenderPass>,
    pub width: u32,
    pub height: u32,
    pub color_attachments: Vec<ColorAttachmentBinding>,
    pub depth_stencil: Option<DepthStencilBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

/// Image state transition. `old_state == Undefined` discards contents; any
/// other old state preserves them. Same-state transitions are permitted and
/// elided by the backend. Queue ownership transfers only when the two queue
/// fields differ.
pub struct ImageBarrier<'a> {
    pub image: &'a dyn Image,
    pub old_state: ResourceState,
    pub new_state: ResourceState,
    pub src_queue: Option<&'a dyn Queue>,
    pub dst_queue: Option<&'a dyn Queue>,
    pub subresource: Option<SubresourceRange>,
}

pub struct BufferBarrier<'a> {
    pub buffer: &'a dyn Buffer,
    pub old_state: ResourceState,
    pub new_state: ResourceState,
    pub src_queue: Option<&'a dyn Queue>,
    pub dst_queue: Option<&'a dyn Queue>,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryBarrier {
    pub old_state: ResourceState,
    pub new_state: ResourceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Uint16,
    Uint32,
}

/// Descriptor update addressed by reflected binding name, not slot.
pub struct DescriptorWrite<'a> {
    pub descriptor_name: &'a str,
    pub buffers: &'a [BufferBinding<'a>],
    pub images: &'a [ImageBinding<'a>],
    pub samplers: &'a [SamplerBinding<'a>],
}

pub struct BufferBinding<'a> {
    pub buffer: &'a dyn Buffer,
    pub offset: u64,
    /// 0 means "whole buffer from offset".
    pub range: u64,
}

pub struct ImageBinding<'a> {
    pub image: &'a dyn Image,
    pub state: ResourceState,
}

pub struct SamplerBinding<'a> {
    pub sampler: &'a dyn Sampler,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueInfo {
    pub queue_type: QueueType,
}

pub struct CommandPoolInfo<'a> {
    pub queue: &'a dyn Queue,
}

pub struct SwapchainInfo<'a> {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub min_image_count: u32,
    pub vsync: bool,
    pub queue: &'a dyn Queue,
}

pub struct QueueSubmitInfo<'a> {
    pub wait_semaphores: &'a [&'a dyn Semaphore],
    pub command_buffers: &'a [&'a dyn CommandBuffer],
    pub signal_semaphores: &'a [&'a dyn Semaphore],
    pub signal_fence: Option<&'a dyn Fence>,
}

pub struct QueuePresentInfo<'a> {
    pub wait_semaphores: &'a [&'a dyn Semaphore],
    pub swapchain: &'a dyn Swapchain,
    pub image_index: u32,
}

/// Raw surface handles forwarded from the windowing layer.
#[derive(Clone, Copy)]
pub struct SurfaceHandles {
    pub window: raw_window_handle::RawWindowHandle,
    pub display: raw_window_handle::RawDisplayHandle,
}

pub struct DeviceInfo {
    pub api: RendererApi,
    pub surface: Option<SurfaceHandles>,
    pub enable_validation: bool,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            api: RendererApi::Null,
            surface: None,
            enable_validation: false,
        }
    }
}

/// Process-wide GPU handle. Created after backend selection, destroyed last;
/// exclusively owns allocators, queues and all derived native handles.
pub trait Device: Send + Sync + Debug {
    fn api(&self) -> RendererApi;

    fn create_queue(&self, info: &QueueInfo) -> RhiResult<Arc<dyn Queue>>;
    fn create_command_pool(&self, info: &CommandPoolInfo) -> RhiResult<Box<dyn CommandPool>>;
    fn create_command_buffer(&self, pool: &dyn CommandPool) -> RhiResult<Box<dyn CommandBuffer>>;
    fn create_swapchain(&self, info: &SwapchainInfo) -> RhiResult<Box<dyn Swapchain>>;

    fn create_buffer(&self, info: &BufferInfo) -> RhiResult<Arc<dyn Buffer>>;
    fn create_image(&self, info: &ImageInfo) -> RhiResult<Arc<dyn Image>>;
    fn create_sampler(&self, info: &SamplerInfo) -> RhiResult<Arc<dyn Sampler>>;
    fn create_shader(&self, info: &ShaderInfo) -> RhiResult<Arc<dyn Shader>>;

    /// Derive a descriptor set layout from shader reflection. Deterministic
    /// for equal shader bytecode.
    fn create_descriptor_set_layout(
        &self,
        shader: &dyn Shader,
    ) -> RhiResult<Arc<dyn DescriptorSetLayout>>;
    fn create_descriptor_set(
        &self,
        layout: &dyn DescriptorSetLayout,
        set_index: u32,
    ) -> RhiResult<Box<dyn DescriptorSet>>;
    /// Batched, name-addressed descriptor update. An unknown name fails with
    /// `InvalidArgument` and leaves the set unmodified.
    fn update_descriptor_set(
        &self,
        set: &mut dyn DescriptorSet,
        writes: &[DescriptorWrite],
    ) -> RhiResult<()>;

    fn create_graphics_pipeline(&self, info: &PipelineInfo) -> RhiResult<Arc<dyn Pipeline>>;
    fn create_compute_pipeline(&self, info: &ComputePipelineInfo) -> RhiResult<Arc<dyn Pipeline>>;
    fn create_render_pass(&self, info: &RenderPassInfo) -> RhiResult<Arc<dyn RenderPass>>;

    fn create_fence(&self, signaled: bool) -> RhiResult<Box<dyn Fence>>;
    fn create_semaphore(&self) -> RhiResult<Box<dyn Semaphore>>;

    /// Blocks indefinitely until all fences signal.
    fn wait_for_fences(&self, fences: &[&dyn Fence]) -> RhiResult<()> {
        for fence in fences {
            fence.wait()?;
        }
        Ok(())
    }

    fn reset_fences(&self, fences: &[&dyn Fence]) -> RhiResult<()> {
        for fence in fences {
            fence.reset()?;
        }
        Ok(())
    }

    /// Submit one command buffer and block until it retires.
    fn immediate_submit(&self, queue: &dyn Queue, cmd: &dyn CommandBuffer) -> RhiResult<()> {
        queue.submit(&QueueSubmitInfo {
            wait_semaphores: &[],
            command_buffers: &[cmd],
            signal_semaphores: &[],
            signal_fence: None,
        })?;
        queue.wait_idle()
    }

    fn wait_idle(&self) -> RhiResult<()>;

    /// Number of device allocations (buffers + images) currently alive.
    fn live_allocations(&self) -> u64;

    fn as_any(&self) -> &dyn Any;
}

/// Capability-tagged submission endpoint. The runtime instantiates a single
/// graphics queue.
pub trait Queue: Send + Sync + Debug {
    fn queue_type(&self) -> QueueType;
    fn submit(&self, info: &QueueSubmitInfo) -> RhiResult<()>;
    fn present(&self, info: &QueuePresentInfo) -> RhiResult<()>;
    fn wait_idle(&self) -> RhiResult<()>;
    fn as_any(&self) -> &dyn Any;
}

pub trait CommandPool: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Backend-neutral command recording. Operations outside their legal scope
/// (draw without a pipeline, barrier inside a render pass, ...) fail with
/// `InvalidState` and abort the recording.
pub trait CommandBuffer: Send + Sync + Debug {
    fn state(&self) -> CommandBufferState;

    fn begin(&mut self) -> RhiResult<()>;
    fn end(&mut self) -> RhiResult<()>;

    fn begin_render_pass(&mut self, info: &RenderPassBeginInfo) -> RhiResult<()>;
    fn end_render_pass(&mut self) -> RhiResult<()>;

    fn bind_pipeline(&mut self, pipeline: &dyn Pipeline) -> RhiResult<()>;
    fn bind_descriptor_set(
        &mut self,
        set_index: u32,
        set: &dyn DescriptorSet,
        pipeline: &dyn Pipeline,
    ) -> RhiResult<()>;
    fn bind_vertex_buffer(&mut self, buffer: &dyn Buffer, offset: u64) -> RhiResult<()>;
    fn bind_index_buffer(
        &mut self,
        buffer: &dyn Buffer,
        offset: u64,
        index_type: IndexType,
    ) -> RhiResult<()>;

    fn set_viewport(
        &mut self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        min_depth: f32,
        max_depth: f32,
    ) -> RhiResult<()>;
    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) -> RhiResult<()>;

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> RhiResult<()>;
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> RhiResult<()>;

    /// Outside render pass only.
    fn dispatch(&mut self, group_x: u32, group_y: u32, group_z: u32) -> RhiResult<()>;

    /// Image-to-image copy with optional scaling. On return `src` is in
    /// `TransferSrc` and `dst` in `TransferDst`.
    fn blit_image(
        &mut self,
        src: &dyn Image,
        src_state: ResourceState,
        dst: &dyn Image,
        dst_state: ResourceState,
        filter: Filter,
    ) -> RhiResult<()>;

    /// Single-mip blit between levels whose states the caller already
    /// manages; used by mipmap generation.
    fn blit_image_region(
        &mut self,
        src: &dyn Image,
        src_mip: u32,
        src_extent: (u32, u32),
        dst: &dyn Image,
        dst_mip: u32,
        dst_extent: (u32, u32),
        filter: Filter,
    ) -> RhiResult<()>;

    /// Outside render pass only.
    fn barrier(
        &mut self,
        buffer_barriers: &[BufferBarrier],
        memory_barriers: &[MemoryBarrier],
        image_barriers: &[ImageBarrier],
    ) -> RhiResult<()>;

    fn push_constants(
        &mut self,
        pipeline: &dyn Pipeline,
        offset: u32,
        data: &[u8],
    ) -> RhiResult<()>;

    fn copy_buffer(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Buffer,
        dst_offset: u64,
        size: u64,
    ) -> RhiResult<()>;
    fn copy_buffer_to_image(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Image,
        mip_level: u32,
        width: u32,
        height: u32,
    ) -> RhiResult<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Contiguous device memory. Host-visible domains support scoped map/unmap;
/// see [`map_buffer`].
pub trait Buffer: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn info(&self) -> &BufferInfo;
    fn resource_state(&self) -> ResourceState;
    fn set_resource_state(&self, state: ResourceState);

    /// Pin a CPU pointer to the allocation. Fails for device-local buffers.
    fn map(&self) -> RhiResult<*mut u8>;
    fn unmap(&self);

    fn as_any(&self) -> &dyn Any;
}

/// Scoped mapping of a host-visible buffer; unmaps on drop.
pub struct BufferMapping<'a> {
    buffer: &'a dyn Buffer,
    ptr: *mut u8,
    len: usize,
}

impl<'a> BufferMapping<'a> {
    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for BufferMapping<'_> {
    fn drop(&mut self) {
        self.buffer.unmap();
    }
}

pub fn map_buffer(buffer: &dyn Buffer) -> RhiResult<BufferMapping<'_>> {
    let ptr = buffer.map()?;
    Ok(BufferMapping {
        buffer,
        ptr,
        len: buffer.info().size as usize,
    })
}

/// 2D or cube texture carrying a logical resource state for the barrier
/// system. Created in `Undefined`; the first barrier moves it to its
/// first-use state.
pub trait Image: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn info(&self) -> &ImageInfo;
    fn resource_state(&self) -> ResourceState;
    fn set_resource_state(&self, state: ResourceState);
    fn as_any(&self) -> &dyn Any;
}

pub trait Sampler: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Immutable compiled bytecode plus merged reflection metadata.
pub trait Shader: Send + Sync + Debug {
    fn stages(&self) -> ShaderStages;
    fn reflection(&self) -> &ShaderReflection;
    fn as_any(&self) -> &dyn Any;
}

pub trait DescriptorSetLayout: Send + Sync + Debug {
    fn bindings(&self) -> &[BindingReflection];
    fn as_any(&self) -> &dyn Any;
}

pub trait DescriptorSet: Send + Sync + Debug {
    fn set_index(&self) -> u32;
    fn as_any(&self) -> &dyn Any;
}

/// Precompiled state object. Graphics pipelines expose their color formats so
/// render-pass compatibility is checkable at bind time.
pub trait Pipeline: Send + Sync + Debug {
    fn kind(&self) -> PipelineKind;
    fn color_formats(&self) -> &[Format];
    fn as_any(&self) -> &dyn Any;
}

/// Backend object describing a framebuffer signature.
pub trait RenderPass: Send + Sync + Debug {
    fn info(&self) -> &RenderPassInfo;
    fn as_any(&self) -> &dyn Any;
}

pub trait Fence: Send + Sync + Debug {
    /// Blocks indefinitely by contract; no timed variant exists in the core.
    fn wait(&self) -> RhiResult<()>;
    fn reset(&self) -> RhiResult<()>;
    fn is_signaled(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

pub trait Semaphore: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Ordered sequence of presentable images; invalidated and rebuilt on resize.
pub trait Swapchain: Send + Sync + Debug {
    fn image_count(&self) -> u32;
    fn extent(&self) -> (u32, u32);
    fn format(&self) -> Format;
    fn image(&self, index: u32) -> Arc<dyn Image>;

    /// Acquire the next presentable image, signaling `signal_semaphore` when
    /// it is ready. May report `SwapchainOutOfDate`, which is a rebuild
    /// signal rather than an error.
    fn acquire_next_image(&mut self, signal_semaphore: &dyn Semaphore) -> RhiResult<u32>;

    /// Blocks until the owning queue is idle, then rebuilds all images in
    /// place at the new extent.
    fn resize(&mut self, width: u32, height: u32) -> RhiResult<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Create the device for the requested API. The Null backend is always
/// available; hardware backends depend on compile-time features and the host
/// platform.
pub fn create_device(info: &DeviceInfo) -> RhiResult<Arc<dyn Device>> {
    match info.api {
        RendererApi::Null => Ok(null::NullDevice::create(info)),
        #[cfg(feature = "vulkan")]
        RendererApi::Vulkan => vulkan::VulkanDevice::create(info),
        #[cfg(all(feature = "d3d12", target_os = "windows"))]
        RendererApi::D3d12 => d3d12::D3d12Device::create(info),
        #[cfg(all(feature = "metal", target_os = "macos"))]
        RendererApi::Metal => metal::MetalDevice::create(info),
        #[allow(unreachable_patterns)]
        other => Err(RhiError::invalid_argument(format!(
            "renderer api {other:?} is not available in this build"
        ))),
    }
}
