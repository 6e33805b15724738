//! Vulkan buffer: VkBuffer plus its own device memory binding.

use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use ash::vk;

use crate::{
    Buffer, BufferInfo, BufferUsage, MemoryDomain, ResourceId, ResourceState, RhiError, RhiResult,
    StateCell,
};

use super::{memory, memory_domain_flags, vk_err, VulkanDevice};

fn buffer_usage_to_vk(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

pub(crate) fn create_buffer(device: &VulkanDevice, info: &BufferInfo) -> RhiResult<VulkanBuffer> {
    if info.size == 0 {
        return Err(RhiError::invalid_argument("buffer size must be nonzero"));
    }
    let raw = device.raw();
    let create_info = vk::BufferCreateInfo::default()
        .size(info.size)
        .usage(buffer_usage_to_vk(info.usage))
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe { raw.create_buffer(&create_info, None).map_err(vk_err)? };
    let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };
    let props = device.memory_properties();
    let memory = match memory::allocate(
        raw,
        &props,
        requirements,
        memory_domain_flags(info.memory_domain),
    ) {
        Ok(memory) => memory,
        Err(err) => {
            unsafe { raw.destroy_buffer(buffer, None) };
            return Err(err);
        }
    };
    unsafe {
        raw.bind_buffer_memory(buffer, memory, 0).map_err(vk_err)?;
    }
    device.allocation_counter().fetch_add(1, Ordering::Relaxed);
    Ok(VulkanBuffer {
        device: device.raw_arc(),
        buffer,
        memory,
        info: info.clone(),
        state: StateCell::new(ResourceState::Undefined),
        id: device.next_id(),
        allocations: Arc::clone(device.allocation_counter()),
    })
}

pub struct VulkanBuffer {
    pub(crate) device: Arc<ash::Device>,
    pub(crate) buffer: vk::Buffer,
    pub(crate) memory: vk::DeviceMemory,
    info: BufferInfo,
    state: StateCell,
    id: ResourceId,
    allocations: Arc<AtomicI64>,
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        self.allocations.fetch_sub(1, Ordering::Relaxed);
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

impl std::fmt::Debug for VulkanBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBuffer")
            .field("id", &self.id)
            .field("size", &self.info.size)
            .finish()
    }
}

impl Buffer for VulkanBuffer {
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
        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .map_err(vk_err)?
        };
        Ok(ptr.cast::<u8>())
    }

    fn unmap(&self) {
        unsafe {
            self.device.unmap_memory(self.memory);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
