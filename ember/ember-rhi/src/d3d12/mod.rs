//! Direct3D 12 backend for the Ember RHI (Windows only).
//!
//! The descriptor model maps reflection sets onto root-signature descriptor
//! tables: one CBV/SRV/UAV table and one sampler table per set index. Render
//! "passes" have no native object; the `RenderPass` handle carries the
//! framebuffer signature and `begin_render_pass` lowers it to
//! `OMSetRenderTargets` plus clears.

mod command;
mod resources;
mod swapchain;

use std::any::Any;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_12_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::{
    Buffer, BufferInfo, CommandBuffer, CommandPool, CommandPoolInfo, ComputePipelineInfo,
    DescriptorSet, DescriptorSetLayout, DescriptorWrite, Device, DeviceInfo, Fence, Format, Image,
    ImageInfo, Pipeline, PipelineInfo, Queue, QueueInfo, QueueType, RendererApi, RenderPass,
    RenderPassInfo, ResourceId, ResourceState, RhiError, RhiResult, Sampler, SamplerInfo,
    Semaphore, Shader, ShaderInfo, Swapchain, SwapchainInfo,
};

pub use command::{D3d12CommandBuffer, D3d12CommandPool};
pub use resources::{
    D3d12Buffer, D3d12DescriptorSet, D3d12DescriptorSetLayout, D3d12Image, D3d12Pipeline,
    D3d12RenderPass, D3d12Sampler, D3d12Shader,
};
pub use swapchain::D3d12Swapchain;

pub(crate) fn win_err(error: windows::core::Error) -> RhiError {
    match error.code() {
        E_OUTOFMEMORY => RhiError::OutOfDeviceMemory,
        DXGI_ERROR_DEVICE_REMOVED | DXGI_ERROR_DEVICE_RESET => RhiError::DeviceLost,
        _ => RhiError::Backend(error.to_string()),
    }
}

use windows::Win32::Foundation::E_OUTOFMEMORY;

pub(crate) fn format_to_dxgi(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Undefined => DXGI_FORMAT_UNKNOWN,
        Format::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::R8G8B8A8Srgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::B8G8R8A8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::B8G8R8A8Srgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        Format::R16G16B16A16Sfloat => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::R32G32B32A32Sfloat => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::R32Sfloat => DXGI_FORMAT_R32_FLOAT,
        Format::D32Sfloat => DXGI_FORMAT_D32_FLOAT,
        Format::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
    }
}

pub(crate) fn state_to_d3d12(state: ResourceState, is_depth: bool) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Undefined => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::General => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ResourceState::ColorAttachment => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::DepthStencilWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::DepthStencilReadOnly => D3D12_RESOURCE_STATE_DEPTH_READ,
        ResourceState::ShaderReadOnly => {
            if is_depth {
                D3D12_RESOURCE_STATE_DEPTH_READ | D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE
            } else {
                D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE
                    | D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE
            }
        }
        ResourceState::TransferSrc => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::TransferDst => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
    }
}

/// Shader-visible heap sizes for the device-wide descriptor arena.
const VIEW_HEAP_CAPACITY: u32 = 64 * 1024;
const SAMPLER_HEAP_CAPACITY: u32 = 1024;
const RTV_HEAP_CAPACITY: u32 = 1024;
const DSV_HEAP_CAPACITY: u32 = 256;

/// Bump allocator over one descriptor heap; descriptors are never freed,
/// matching the monotonic lifetime of sets and attachments in the runtime.
pub(crate) struct DescriptorArena {
    pub heap: ID3D12DescriptorHeap,
    pub cpu_start: D3D12_CPU_DESCRIPTOR_HANDLE,
    pub gpu_start: D3D12_GPU_DESCRIPTOR_HANDLE,
    pub stride: u32,
    pub capacity: u32,
    pub next: AtomicU64,
}

impl DescriptorArena {
    fn new(
        device: &ID3D12Device,
        kind: D3D12_DESCRIPTOR_HEAP_TYPE,
        capacity: u32,
        shader_visible: bool,
    ) -> RhiResult<Self> {
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: kind,
            NumDescriptors: capacity,
            Flags: if shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 0,
        };
        let heap: ID3D12DescriptorHeap =
            unsafe { device.CreateDescriptorHeap(&desc) }.map_err(win_err)?;
        let cpu_start = unsafe { heap.GetCPUDescriptorHandleForHeapStart() };
        let gpu_start = if shader_visible {
            unsafe { heap.GetGPUDescriptorHandleForHeapStart() }
        } else {
            D3D12_GPU_DESCRIPTOR_HANDLE { ptr: 0 }
        };
        let stride = unsafe { device.GetDescriptorHandleIncrementSize(kind) };
        Ok(DescriptorArena {
            heap,
            cpu_start,
            gpu_start,
            stride,
            capacity,
            next: AtomicU64::new(0),
        })
    }

    pub(crate) fn allocate(&self, count: u32) -> RhiResult<u32> {
        let base = self.next.fetch_add(count as u64, Ordering::Relaxed);
        if base + count as u64 > self.capacity as u64 {
            return Err(RhiError::OutOfDeviceMemory);
        }
        Ok(base as u32)
    }

    pub(crate) fn cpu_at(&self, index: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.cpu_start.ptr + (index as usize * self.stride as usize),
        }
    }

    pub(crate) fn gpu_at(&self, index: u32) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: self.gpu_start.ptr + (index as u64 * self.stride as u64),
        }
    }
}

pub struct D3d12Device {
    pub(crate) device: ID3D12Device,
    pub(crate) factory: IDXGIFactory4,
    pub(crate) queue: ID3D12CommandQueue,
    pub(crate) idle_fence: ID3D12Fence,
    pub(crate) idle_value: AtomicU64,
    pub(crate) view_arena: Arc<DescriptorArena>,
    pub(crate) sampler_arena: Arc<DescriptorArena>,
    pub(crate) rtv_arena: Arc<DescriptorArena>,
    pub(crate) dsv_arena: Arc<DescriptorArena>,
    pub(crate) hwnd: Option<isize>,
    next_id: AtomicU64,
    allocations: Arc<AtomicI64>,
}

// COM pointers are reference counted and the runtime is single-threaded
// cooperative per the scheduling contract.
unsafe impl Send for D3d12Device {}
unsafe impl Sync for D3d12Device {}

impl D3d12Device {
    pub fn create(info: &DeviceInfo) -> RhiResult<Arc<dyn Device>> {
        if info.enable_validation {
            unsafe {
                let mut debug: Option<ID3D12Debug> = None;
                if D3D12GetDebugInterface(&mut debug).is_ok() {
                    if let Some(debug) = debug {
                        debug.EnableDebugLayer();
                    }
                }
            }
        }
        let factory: IDXGIFactory4 =
            unsafe { CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0)) }.map_err(win_err)?;
        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(None, D3D_FEATURE_LEVEL_12_0, &mut device) }
            .map_err(win_err)?;
        let device = device.ok_or(RhiError::DeviceLost)?;

        let queue_desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            ..Default::default()
        };
        let queue: ID3D12CommandQueue =
            unsafe { device.CreateCommandQueue(&queue_desc) }.map_err(win_err)?;
        let idle_fence: ID3D12Fence =
            unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }.map_err(win_err)?;

        let view_arena = Arc::new(DescriptorArena::new(
            &device,
            D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
            VIEW_HEAP_CAPACITY,
            true,
        )?);
        let sampler_arena = Arc::new(DescriptorArena::new(
            &device,
            D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
            SAMPLER_HEAP_CAPACITY,
            true,
        )?);
        let rtv_arena = Arc::new(DescriptorArena::new(
            &device,
            D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
            RTV_HEAP_CAPACITY,
            false,
        )?);
        let dsv_arena = Arc::new(DescriptorArena::new(
            &device,
            D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
            DSV_HEAP_CAPACITY,
            false,
        )?);

        let hwnd = info.surface.as_ref().and_then(|s| match s.window {
            raw_window_handle::RawWindowHandle::Win32(handle) => Some(handle.hwnd.get()),
            _ => None,
        });

        log::info!("created d3d12 device");
        Ok(Arc::new(D3d12Device {
            device,
            factory,
            queue,
            idle_fence,
            idle_value: AtomicU64::new(0),
            view_arena,
            sampler_arena,
            rtv_arena,
            dsv_arena,
            hwnd,
            next_id: AtomicU64::new(1),
            allocations: Arc::new(AtomicI64::new(0)),
        }))
    }

    pub(crate) fn next_id(&self) -> ResourceId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn allocation_counter(&self) -> &Arc<AtomicI64> {
        &self.allocations
    }

    pub(crate) fn signal_and_wait(&self) -> RhiResult<()> {
        use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};
        let value = self.idle_value.fetch_add(1, Ordering::Relaxed) + 1;
        unsafe {
            self.queue
                .Signal(&self.idle_fence, value)
                .map_err(win_err)?;
            if self.idle_fence.GetCompletedValue() < value {
                let event = CreateEventW(None, false, false, None).map_err(win_err)?;
                self.idle_fence
                    .SetEventOnCompletion(value, event)
                    .map_err(win_err)?;
                WaitForSingleObject(event, INFINITE);
                let _ = windows::Win32::Foundation::CloseHandle(event);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for D3d12Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12Device").finish_non_exhaustive()
    }
}

impl Device for D3d12Device {
    fn api(&self) -> RendererApi {
        RendererApi::D3d12
    }

    fn create_queue(&self, info: &QueueInfo) -> RhiResult<Arc<dyn Queue>> {
        if info.queue_type != QueueType::Graphics {
            return Err(RhiError::invalid_argument(
                "the runtime instantiates a single graphics queue",
            ));
        }
        Ok(Arc::new(command::D3d12Queue::new(self)))
    }

    fn create_command_pool(&self, _info: &CommandPoolInfo) -> RhiResult<Box<dyn CommandPool>> {
        command::create_command_pool(self)
    }

    fn create_command_buffer(&self, pool: &dyn CommandPool) -> RhiResult<Box<dyn CommandBuffer>> {
        command::create_command_buffer(self, pool)
    }

    fn create_swapchain(&self, info: &SwapchainInfo) -> RhiResult<Box<dyn Swapchain>> {
        swapchain::create_swapchain(self, info)
    }

    fn create_buffer(&self, info: &BufferInfo) -> RhiResult<Arc<dyn Buffer>> {
        resources::create_buffer(self, info)
    }

    fn create_image(&self, info: &ImageInfo) -> RhiResult<Arc<dyn Image>> {
        resources::create_image(self, info)
    }

    fn create_sampler(&self, info: &SamplerInfo) -> RhiResult<Arc<dyn Sampler>> {
        resources::create_sampler(self, info)
    }

    fn create_shader(&self, info: &ShaderInfo) -> RhiResult<Arc<dyn Shader>> {
        resources::create_shader(info)
    }

    fn create_descriptor_set_layout(
        &self,
        shader: &dyn Shader,
    ) -> RhiResult<Arc<dyn DescriptorSetLayout>> {
        resources::create_descriptor_set_layout(self, shader.reflection())
    }

    fn create_descriptor_set(
        &self,
        layout: &dyn DescriptorSetLayout,
        set_index: u32,
    ) -> RhiResult<Box<dyn DescriptorSet>> {
        resources::create_descriptor_set(self, layout, set_index)
    }

    fn update_descriptor_set(
        &self,
        set: &mut dyn DescriptorSet,
        writes: &[DescriptorWrite],
    ) -> RhiResult<()> {
        resources::update_descriptor_set(self, set, writes)
    }

    fn create_graphics_pipeline(&self, info: &PipelineInfo) -> RhiResult<Arc<dyn Pipeline>> {
        resources::create_graphics_pipeline(self, info)
    }

    fn create_compute_pipeline(&self, info: &ComputePipelineInfo) -> RhiResult<Arc<dyn Pipeline>> {
        resources::create_compute_pipeline(self, info)
    }

    fn create_render_pass(&self, info: &RenderPassInfo) -> RhiResult<Arc<dyn RenderPass>> {
        Ok(Arc::new(D3d12RenderPass { info: info.clone() }))
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<Box<dyn Fence>> {
        command::create_fence(self, signaled)
    }

    fn create_semaphore(&self) -> RhiResult<Box<dyn Semaphore>> {
        // Queue submissions execute in order on one queue; binary semaphores
        // have no native counterpart and are satisfied by that ordering.
        Ok(Box::new(command::D3d12Semaphore))
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.signal_and_wait()
    }

    fn live_allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed).max(0) as u64
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
