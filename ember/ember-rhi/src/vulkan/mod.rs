//! Vulkan backend for the Ember RHI.
//! Implements Device, Buffer, Image, Shader, Pipeline, CommandBuffer, Queue,
//! Swapchain and the synchronization primitives over ash.

mod buffer;
mod command;
mod descriptor;
mod image;
mod memory;
mod pipeline;
mod queue;
mod render_pass;
mod sampler;
mod shader;
mod swapchain;

use std::any::Any;
use std::collections::HashMap;
use std::ffi::CString;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;

use crate::{
    Buffer, BufferInfo, CommandBuffer, CommandPool, CommandPoolInfo, ComputePipelineInfo,
    DescriptorSet, DescriptorSetLayout, DescriptorWrite, Device, DeviceInfo, Fence, Filter, Format,
    Image, ImageInfo, LoadOp, MemoryDomain, Pipeline, PipelineInfo, Queue, QueueInfo, QueueType,
    RendererApi, RenderPass, RenderPassInfo, ResourceId, ResourceState, RhiError, RhiResult,
    Sampler, SamplerInfo, Semaphore, Shader, ShaderInfo, Swapchain, SwapchainInfo,
};

pub use buffer::VulkanBuffer;
pub use command::VulkanCommandBuffer;
pub use descriptor::{VulkanDescriptorSet, VulkanDescriptorSetLayout};
pub use image::VulkanImage;
pub use pipeline::VulkanPipeline;
pub use queue::VulkanQueue;
pub use render_pass::VulkanRenderPass;
pub use sampler::VulkanSampler;
pub use shader::VulkanShader;
pub use swapchain::{VulkanSwapchain, VulkanSwapchainImage};

/// Translate an ash error into the shared taxonomy.
pub(crate) fn vk_err(result: vk::Result) -> RhiError {
    match result {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            RhiError::OutOfDeviceMemory
        }
        vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR => {
            RhiError::SwapchainOutOfDate
        }
        other => RhiError::Backend(format!("{other:?}")),
    }
}

pub(crate) fn format_to_vk(format: Format) -> vk::Format {
    match format {
        Format::Undefined => vk::Format::UNDEFINED,
        Format::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::R8G8B8A8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::B8G8R8A8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::R16G16B16A16Sfloat => vk::Format::R16G16B16A16_SFLOAT,
        Format::R32G32B32A32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
        Format::R32Sfloat => vk::Format::R32_SFLOAT,
        Format::D32Sfloat => vk::Format::D32_SFLOAT,
        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub(crate) fn format_from_vk(format: vk::Format) -> Format {
    match format {
        vk::Format::R8G8B8A8_UNORM => Format::R8G8B8A8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::R8G8B8A8Srgb,
        vk::Format::B8G8R8A8_UNORM => Format::B8G8R8A8Unorm,
        vk::Format::B8G8R8A8_SRGB => Format::B8G8R8A8Srgb,
        vk::Format::R16G16B16A16_SFLOAT => Format::R16G16B16A16Sfloat,
        vk::Format::R32G32B32A32_SFLOAT => Format::R32G32B32A32Sfloat,
        vk::Format::R32_SFLOAT => Format::R32Sfloat,
        vk::Format::D32_SFLOAT => Format::D32Sfloat,
        vk::Format::D24_UNORM_S8_UINT => Format::D24UnormS8Uint,
        _ => Format::Undefined,
    }
}

pub(crate) fn aspect_for_format(format: Format) -> vk::ImageAspectFlags {
    if format == Format::D24UnormS8Uint {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Image layout a logical state lowers to.
pub(crate) fn state_to_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Undefined => vk::ImageLayout::UNDEFINED,
        ResourceState::General => vk::ImageLayout::GENERAL,
        ResourceState::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthStencilWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::DepthStencilReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceState::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Access mask covering everything a state may touch. The barrier contract is
/// expressed in states; the backend picks masks that over-approximate safely.
pub(crate) fn state_to_access(state: ResourceState) -> vk::AccessFlags {
    match state {
        ResourceState::Undefined | ResourceState::Present => vk::AccessFlags::empty(),
        ResourceState::General => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        ResourceState::ColorAttachment => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        ResourceState::DepthStencilWrite => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        ResourceState::DepthStencilReadOnly => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ResourceState::ShaderReadOnly => vk::AccessFlags::SHADER_READ,
        ResourceState::TransferSrc => vk::AccessFlags::TRANSFER_READ,
        ResourceState::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
    }
}

pub(crate) fn state_to_stage(state: ResourceState, src: bool) -> vk::PipelineStageFlags {
    match state {
        ResourceState::Undefined => {
            if src {
                vk::PipelineStageFlags::TOP_OF_PIPE
            } else {
                vk::PipelineStageFlags::ALL_COMMANDS
            }
        }
        ResourceState::Present => {
            if src {
                vk::PipelineStageFlags::TOP_OF_PIPE
            } else {
                vk::PipelineStageFlags::BOTTOM_OF_PIPE
            }
        }
        ResourceState::General => {
            vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER
        }
        ResourceState::ColorAttachment => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ResourceState::DepthStencilWrite | ResourceState::DepthStencilReadOnly => {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        }
        ResourceState::ShaderReadOnly => {
            vk::PipelineStageFlags::VERTEX_SHADER
                | vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COMPUTE_SHADER
        }
        ResourceState::TransferSrc | ResourceState::TransferDst => vk::PipelineStageFlags::TRANSFER,
    }
}

pub(crate) fn load_op_to_vk(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub(crate) fn filter_to_vk(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

pub(crate) fn sample_count_to_vk(count: u32) -> vk::SampleCountFlags {
    match count {
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

/// Returns validation layer names to enable if validation is requested
/// (feature or EMBER_VALIDATION=1 env var).
#[cfg(feature = "validation")]
fn validation_layer_names(entry: &ash::Entry) -> Vec<CString> {
    let disable = std::env::var("EMBER_VALIDATION")
        .is_ok_and(|v| v == "0" || v.eq_ignore_ascii_case("false"));
    if disable {
        return vec![];
    }
    let layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(l) => l,
        Err(_) => return vec![],
    };
    const KHRONOS: &str = "VK_LAYER_KHRONOS_validation";
    for prop in &layers {
        let name = unsafe { std::ffi::CStr::from_ptr(prop.layer_name.as_ptr()).to_string_lossy() };
        if name == KHRONOS {
            return vec![CString::new(KHRONOS).unwrap()];
        }
    }
    vec![]
}

#[cfg(not(feature = "validation"))]
fn validation_layer_names(_entry: &ash::Entry) -> Vec<CString> {
    if std::env::var("EMBER_VALIDATION").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")) {
        log::warn!("EMBER_VALIDATION=1 set but ember-rhi built without the 'validation' feature");
    }
    vec![]
}

/// Key for caching VkFramebuffer by render pass, extent and attachment views.
#[derive(Hash, Eq, PartialEq, Clone)]
pub(crate) struct FramebufferKey {
    pub render_pass: u64,
    pub width: u32,
    pub height: u32,
    pub attachment_views: Vec<u64>,
}

pub(crate) struct SurfaceState {
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    pub swapchain_loader: ash::khr::swapchain::Device,
}

pub struct VulkanDevice {
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    queue: vk::Queue,
    queue_family_index: u32,
    descriptor_pool: vk::DescriptorPool,
    surface_state: Option<SurfaceState>,
    next_id: AtomicU64,
    allocations: Arc<AtomicI64>,
    /// Cached VkFramebuffer by (render pass, extent, image views) so replaying
    /// the compiled graph does not create framebuffers per frame.
    framebuffer_cache: Arc<Mutex<HashMap<FramebufferKey, vk::Framebuffer>>>,
}

impl VulkanDevice {
    pub fn create(info: &DeviceInfo) -> RhiResult<Arc<dyn Device>> {
        let entry = unsafe { ash::Entry::load().map_err(|e| RhiError::Backend(e.to_string()))? };
        let app_name = CString::new("ember").unwrap();
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_2)
            .application_name(&app_name)
            .engine_name(&app_name);

        let mut extension_ptrs: Vec<*const i8> = Vec::new();
        if let Some(surface) = &info.surface {
            let required = ash_window::enumerate_required_extensions(surface.display)
                .map_err(vk_err)?;
            extension_ptrs.extend_from_slice(required);
        }

        let layer_names = if info.enable_validation {
            validation_layer_names(&entry)
        } else {
            vec![]
        };
        let layer_ptrs: Vec<*const i8> = layer_names.iter().map(|c| c.as_ptr()).collect();

        let instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);
        let instance = unsafe {
            entry
                .create_instance(&instance_create_info, None)
                .map_err(|e| RhiError::Backend(format!("create_instance: {e:?}")))?
        };

        let surface = match &info.surface {
            Some(handles) => Some(unsafe {
                ash_window::create_surface(&entry, &instance, handles.display, handles.window, None)
                    .map_err(vk_err)?
            }),
            None => None,
        };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let physical_devices = unsafe { instance.enumerate_physical_devices().map_err(vk_err)? };
        let physical_device = physical_devices
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::Backend("no Vulkan physical device found".into()))?;

        let queue_family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let queue_family_index = queue_family_properties
            .iter()
            .enumerate()
            .find(|(i, p)| {
                let graphics = p.queue_flags.contains(vk::QueueFlags::GRAPHICS);
                let present = match surface {
                    Some(s) => unsafe {
                        surface_loader
                            .get_physical_device_surface_support(physical_device, *i as u32, s)
                            .unwrap_or(false)
                    },
                    None => true,
                };
                graphics && present
            })
            .map(|(i, _)| i as u32)
            .ok_or_else(|| {
                RhiError::Backend("no queue family with graphics and present support".into())
            })?;

        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities);
        let swapchain_ext = ash::khr::swapchain::NAME.as_ptr();
        let device_extensions: Vec<*const i8> = if surface.is_some() {
            vec![swapchain_ext]
        } else {
            vec![]
        };
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&device_extensions);
        let device_raw = unsafe {
            instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(vk_err)?
        };
        let queue = unsafe { device_raw.get_device_queue(queue_family_index, 0) };
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device_raw);

        let descriptor_pool = descriptor::create_device_pool(&device_raw)?;

        log::info!(
            "created vulkan device (queue family {queue_family_index}, validation layers: {})",
            layer_names.len()
        );

        Ok(Arc::new(VulkanDevice {
            entry,
            instance,
            physical_device,
            device: Arc::new(device_raw),
            queue,
            queue_family_index,
            descriptor_pool,
            surface_state: surface.map(|surface| SurfaceState {
                surface,
                surface_loader,
                swapchain_loader,
            }),
            next_id: AtomicU64::new(1),
            allocations: Arc::new(AtomicI64::new(0)),
            framebuffer_cache: Arc::new(Mutex::new(HashMap::new())),
        }))
    }

    pub(crate) fn next_id(&self) -> ResourceId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub(crate) fn raw_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    pub(crate) fn allocation_counter(&self) -> &Arc<AtomicI64> {
        &self.allocations
    }

    pub(crate) fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        unsafe {
            self.instance
                .get_physical_device_memory_properties(self.physical_device)
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        if let Ok(mut cache) = self.framebuffer_cache.lock() {
            for (_, fb) in cache.drain() {
                unsafe {
                    self.device.destroy_framebuffer(fb, None);
                }
            }
        }
        unsafe {
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
        }
        if let Some(state) = &self.surface_state {
            unsafe {
                state.surface_loader.destroy_surface(state.surface, None);
            }
        }
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("queue_family_index", &self.queue_family_index)
            .finish_non_exhaustive()
    }
}

impl Device for VulkanDevice {
    fn api(&self) -> RendererApi {
        RendererApi::Vulkan
    }

    fn create_queue(&self, info: &QueueInfo) -> RhiResult<Arc<dyn Queue>> {
        if info.queue_type != QueueType::Graphics {
            return Err(RhiError::invalid_argument(
                "the runtime instantiates a single graphics queue",
            ));
        }
        Ok(Arc::new(VulkanQueue::new(
            Arc::clone(&self.device),
            self.queue,
            self.queue_family_index,
            info.queue_type,
        )))
    }

    fn create_command_pool(&self, _info: &CommandPoolInfo) -> RhiResult<Box<dyn CommandPool>> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe {
            self.device
                .create_command_pool(&create_info, None)
                .map_err(vk_err)?
        };
        Ok(Box::new(command::VulkanCommandPool {
            device: Arc::clone(&self.device),
            pool,
        }))
    }

    fn create_command_buffer(&self, pool: &dyn CommandPool) -> RhiResult<Box<dyn CommandBuffer>> {
        let vk_pool = pool
            .as_any()
            .downcast_ref::<command::VulkanCommandPool>()
            .ok_or_else(|| RhiError::invalid_argument("pool is not a Vulkan command pool"))?;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(vk_pool.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(vk_err)?
        };
        Ok(Box::new(VulkanCommandBuffer::new(
            Arc::clone(&self.device),
            buffers[0],
            Arc::clone(&self.framebuffer_cache),
        )))
    }

    fn create_swapchain(&self, info: &SwapchainInfo) -> RhiResult<Box<dyn Swapchain>> {
        let state = self
            .surface_state
            .as_ref()
            .ok_or_else(|| RhiError::invalid_argument("device was created without a surface"))?;
        let swapchain = VulkanSwapchain::create(
            Arc::clone(&self.device),
            self.physical_device,
            state,
            self.queue,
            info,
        )?;
        Ok(Box::new(swapchain))
    }

    fn create_buffer(&self, info: &BufferInfo) -> RhiResult<Arc<dyn Buffer>> {
        let buffer = buffer::create_buffer(self, info)?;
        Ok(Arc::new(buffer))
    }

    fn create_image(&self, info: &ImageInfo) -> RhiResult<Arc<dyn Image>> {
        let image = image::create_image(self, info)?;
        Ok(Arc::new(image))
    }

    fn create_sampler(&self, info: &SamplerInfo) -> RhiResult<Arc<dyn Sampler>> {
        let sampler = sampler::create_sampler(Arc::clone(&self.device), info)?;
        Ok(Arc::new(sampler))
    }

    fn create_shader(&self, info: &ShaderInfo) -> RhiResult<Arc<dyn Shader>> {
        let shader = shader::create_shader(Arc::clone(&self.device), info)?;
        Ok(Arc::new(shader))
    }

    fn create_descriptor_set_layout(
        &self,
        shader: &dyn Shader,
    ) -> RhiResult<Arc<dyn DescriptorSetLayout>> {
        let layout = descriptor::create_set_layout(Arc::clone(&self.device), shader.reflection())?;
        Ok(Arc::new(layout))
    }

    fn create_descriptor_set(
        &self,
        layout: &dyn DescriptorSetLayout,
        set_index: u32,
    ) -> RhiResult<Box<dyn DescriptorSet>> {
        let vk_layout = layout
            .as_any()
            .downcast_ref::<VulkanDescriptorSetLayout>()
            .ok_or_else(|| {
                RhiError::invalid_argument("layout is not a Vulkan descriptor set layout")
            })?;
        let set =
            descriptor::allocate_set(&self.device, self.descriptor_pool, vk_layout, set_index)?;
        Ok(Box::new(set))
    }

    fn update_descriptor_set(
        &self,
        set: &mut dyn DescriptorSet,
        writes: &[DescriptorWrite],
    ) -> RhiResult<()> {
        descriptor::update_set(&self.device, set, writes)
    }

    fn create_graphics_pipeline(&self, info: &PipelineInfo) -> RhiResult<Arc<dyn Pipeline>> {
        let pipeline = pipeline::create_graphics_pipeline(Arc::clone(&self.device), info)?;
        Ok(Arc::new(pipeline))
    }

    fn create_compute_pipeline(&self, info: &ComputePipelineInfo) -> RhiResult<Arc<dyn Pipeline>> {
        let pipeline = pipeline::create_compute_pipeline(Arc::clone(&self.device), info)?;
        Ok(Arc::new(pipeline))
    }

    fn create_render_pass(&self, info: &RenderPassInfo) -> RhiResult<Arc<dyn RenderPass>> {
        let render_pass = render_pass::create_render_pass(Arc::clone(&self.device), info)?;
        Ok(Arc::new(render_pass))
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<Box<dyn Fence>> {
        let create_info = vk::FenceCreateInfo::default().flags(if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        });
        let fence = unsafe { self.device.create_fence(&create_info, None).map_err(vk_err)? };
        Ok(Box::new(queue::VulkanFence {
            device: Arc::clone(&self.device),
            fence,
        }))
    }

    fn create_semaphore(&self) -> RhiResult<Box<dyn Semaphore>> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe {
            self.device
                .create_semaphore(&create_info, None)
                .map_err(vk_err)?
        };
        Ok(Box::new(queue::VulkanSemaphore {
            device: Arc::clone(&self.device),
            semaphore,
        }))
    }

    fn wait_for_fences(&self, fences: &[&dyn crate::Fence]) -> RhiResult<()> {
        let vk_fences: Vec<vk::Fence> = fences
            .iter()
            .filter_map(|f| {
                f.as_any()
                    .downcast_ref::<queue::VulkanFence>()
                    .map(|vf| vf.fence)
            })
            .collect();
        if vk_fences.is_empty() {
            return Ok(());
        }
        unsafe {
            self.device
                .wait_for_fences(&vk_fences, true, u64::MAX)
                .map_err(vk_err)
        }
    }

    fn reset_fences(&self, fences: &[&dyn crate::Fence]) -> RhiResult<()> {
        let vk_fences: Vec<vk::Fence> = fences
            .iter()
            .filter_map(|f| {
                f.as_any()
                    .downcast_ref::<queue::VulkanFence>()
                    .map(|vf| vf.fence)
            })
            .collect();
        if vk_fences.is_empty() {
            return Ok(());
        }
        unsafe { self.device.reset_fences(&vk_fences).map_err(vk_err) }
    }

    fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle().map_err(vk_err) }
    }

    fn live_allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed).max(0) as u64
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Map a memory domain to the property flags used for type selection.
pub(crate) fn memory_domain_flags(domain: MemoryDomain) -> vk::MemoryPropertyFlags {
    match domain {
        MemoryDomain::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        MemoryDomain::Upload | MemoryDomain::Readback => {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        }
    }
}
