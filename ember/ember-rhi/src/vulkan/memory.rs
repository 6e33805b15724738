//! Memory-type selection and allocation helpers shared by buffers and images.

use ash::vk;

use crate::{RhiError, RhiResult};

use super::vk_err;

/// Pick a memory type satisfying `type_bits` and `flags`, falling back to any
/// suitable type when the preferred flags are unavailable.
pub(crate) fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count)
        .find(|i| {
            let suitable = (type_bits & (1 << i)) != 0;
            suitable && props.memory_types[*i as usize].property_flags.contains(flags)
        })
        .or_else(|| (0..props.memory_type_count).find(|i| (type_bits & (1 << i)) != 0))
}

pub(crate) fn allocate(
    device: &ash::Device,
    props: &vk::PhysicalDeviceMemoryProperties,
    requirements: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> RhiResult<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(props, requirements.memory_type_bits, flags)
        .ok_or(RhiError::OutOfDeviceMemory)?;
    let allocate_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);
    unsafe { device.allocate_memory(&allocate_info, None).map_err(vk_err) }
}
