//! Vulkan descriptor set layouts, the device-wide pool, and name-resolved
//! descriptor writes.

use std::any::Any;
use std::sync::Arc;

use ash::vk;

use crate::reflection::{resolve_writes, BindingReflection, DescriptorKind, ShaderReflection};
use crate::{
    DescriptorSet, DescriptorSetLayout, DescriptorWrite, ResourceState, RhiError, RhiResult,
    ShaderStages,
};

use super::{state_to_layout, vk_err};

pub(crate) fn descriptor_kind_to_vk(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

fn shader_stages_to_vk(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

const POOL_SETS: u32 = 1024;
const POOL_DESCRIPTORS_PER_TYPE: u32 = 4096;

/// One pool for the whole device; sets are never individually freed, matching
/// the monotonic lifetime of pipelines and passes in the runtime.
pub(crate) fn create_device_pool(device: &ash::Device) -> RhiResult<vk::DescriptorPool> {
    let kinds = [
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::DescriptorType::STORAGE_BUFFER,
        vk::DescriptorType::SAMPLED_IMAGE,
        vk::DescriptorType::STORAGE_IMAGE,
        vk::DescriptorType::SAMPLER,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    ];
    let pool_sizes: Vec<vk::DescriptorPoolSize> = kinds
        .iter()
        .map(|ty| {
            vk::DescriptorPoolSize::default()
                .ty(*ty)
                .descriptor_count(POOL_DESCRIPTORS_PER_TYPE)
        })
        .collect();
    let create_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(POOL_SETS)
        .pool_sizes(&pool_sizes);
    unsafe { device.create_descriptor_pool(&create_info, None).map_err(vk_err) }
}

/// Layout derived from shader reflection: one VkDescriptorSetLayout per set
/// index the reflection mentions, plus the binding table the resolver uses.
pub struct VulkanDescriptorSetLayout {
    device: Arc<ash::Device>,
    bindings: Vec<BindingReflection>,
    /// Indexed by set number; sparse sets get an empty layout.
    pub(crate) vk_layouts: Vec<vk::DescriptorSetLayout>,
}

pub(crate) fn create_set_layout(
    device: Arc<ash::Device>,
    reflection: &ShaderReflection,
) -> RhiResult<VulkanDescriptorSetLayout> {
    let max_set = reflection.bindings.iter().map(|b| b.set).max().unwrap_or(0);
    let mut vk_layouts = Vec::with_capacity(max_set as usize + 1);
    for set in 0..=max_set {
        let set_bindings: Vec<vk::DescriptorSetLayoutBinding> = reflection
            .bindings
            .iter()
            .filter(|b| b.set == set)
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(descriptor_kind_to_vk(b.kind))
                    .descriptor_count(b.array_count)
                    .stage_flags(shader_stages_to_vk(b.stages))
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&set_bindings);
        let layout = unsafe {
            device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(vk_err)?
        };
        vk_layouts.push(layout);
    }
    Ok(VulkanDescriptorSetLayout {
        device,
        bindings: reflection.bindings.clone(),
        vk_layouts,
    })
}

impl Drop for VulkanDescriptorSetLayout {
    fn drop(&mut self) {
        for layout in &self.vk_layouts {
            unsafe {
                self.device.destroy_descriptor_set_layout(*layout, None);
            }
        }
    }
}

impl std::fmt::Debug for VulkanDescriptorSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDescriptorSetLayout")
            .field("binding_count", &self.bindings.len())
            .finish()
    }
}

impl DescriptorSetLayout for VulkanDescriptorSetLayout {
    fn bindings(&self) -> &[BindingReflection] {
        &self.bindings
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct VulkanDescriptorSet {
    pub(crate) set: vk::DescriptorSet,
    set_index: u32,
    bindings: Vec<BindingReflection>,
}

pub(crate) fn allocate_set(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    layout: &VulkanDescriptorSetLayout,
    set_index: u32,
) -> RhiResult<VulkanDescriptorSet> {
    let vk_layout = layout
        .vk_layouts
        .get(set_index as usize)
        .copied()
        .ok_or_else(|| {
            RhiError::invalid_argument(format!("layout has no set index {set_index}"))
        })?;
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(std::slice::from_ref(&vk_layout));
    let sets = unsafe { device.allocate_descriptor_sets(&alloc_info).map_err(vk_err)? };
    Ok(VulkanDescriptorSet {
        set: sets[0],
        set_index,
        bindings: layout.bindings.clone(),
    })
}

impl std::fmt::Debug for VulkanDescriptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDescriptorSet")
            .field("set_index", &self.set_index)
            .finish()
    }
}

impl DescriptorSet for VulkanDescriptorSet {
    fn set_index(&self) -> u32 {
        self.set_index
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Batched name-addressed update. The whole batch resolves before the first
/// native write, so an ill-formed write leaves the set unmodified.
pub(crate) fn update_set(
    device: &ash::Device,
    set: &dyn DescriptorSet,
    writes: &[DescriptorWrite],
) -> RhiResult<()> {
    let vk_set = set
        .as_any()
        .downcast_ref::<VulkanDescriptorSet>()
        .ok_or_else(|| RhiError::invalid_argument("descriptor set is not a Vulkan set"))?;
    let resolved = resolve_writes(&vk_set.bindings, vk_set.set_index, writes)?;

    let mut buffer_infos: Vec<Vec<vk::DescriptorBufferInfo>> = Vec::new();
    let mut image_infos: Vec<Vec<vk::DescriptorImageInfo>> = Vec::new();
    for (write, resolved) in writes.iter().zip(&resolved) {
        match resolved.kind {
            DescriptorKind::UniformBuffer | DescriptorKind::StorageBuffer => {
                let infos = write
                    .buffers
                    .iter()
                    .map(|binding| {
                        let buffer = binding
                            .buffer
                            .as_any()
                            .downcast_ref::<super::VulkanBuffer>()
                            .ok_or_else(|| {
                                RhiError::invalid_argument("buffer is not a Vulkan buffer")
                            })?;
                        let range = if binding.range > 0 {
                            binding.range
                        } else {
                            binding.buffer.info().size - binding.offset
                        };
                        Ok(vk::DescriptorBufferInfo::default()
                            .buffer(buffer.buffer)
                            .offset(binding.offset)
                            .range(range))
                    })
                    .collect::<RhiResult<Vec<_>>>()?;
                buffer_infos.push(infos);
                image_infos.push(Vec::new());
            }
            DescriptorKind::Sampler => {
                let infos = write
                    .samplers
                    .iter()
                    .map(|binding| {
                        let sampler = binding
                            .sampler
                            .as_any()
                            .downcast_ref::<super::VulkanSampler>()
                            .ok_or_else(|| {
                                RhiError::invalid_argument("sampler is not a Vulkan sampler")
                            })?;
                        Ok(vk::DescriptorImageInfo::default().sampler(sampler.sampler))
                    })
                    .collect::<RhiResult<Vec<_>>>()?;
                buffer_infos.push(Vec::new());
                image_infos.push(infos);
            }
            DescriptorKind::CombinedImageSampler => {
                let infos = write
                    .images
                    .iter()
                    .zip(write.samplers.iter())
                    .map(|(image_binding, sampler_binding)| {
                        let (_, view) = super::image::raw_image_handles(image_binding.image)?;
                        let sampler = sampler_binding
                            .sampler
                            .as_any()
                            .downcast_ref::<super::VulkanSampler>()
                            .ok_or_else(|| {
                                RhiError::invalid_argument("sampler is not a Vulkan sampler")
                            })?;
                        Ok(vk::DescriptorImageInfo::default()
                            .image_view(view)
                            .image_layout(state_to_layout(image_binding.state))
                            .sampler(sampler.sampler))
                    })
                    .collect::<RhiResult<Vec<_>>>()?;
                buffer_infos.push(Vec::new());
                image_infos.push(infos);
            }
            DescriptorKind::SampledImage | DescriptorKind::StorageImage => {
                let infos = write
                    .images
                    .iter()
                    .map(|binding| {
                        let (_, view) = super::image::raw_image_handles(binding.image)?;
                        let layout = if resolved.kind == DescriptorKind::StorageImage {
                            state_to_layout(ResourceState::General)
                        } else {
                            state_to_layout(binding.state)
                        };
                        Ok(vk::DescriptorImageInfo::default()
                            .image_view(view)
                            .image_layout(layout))
                    })
                    .collect::<RhiResult<Vec<_>>>()?;
                buffer_infos.push(Vec::new());
                image_infos.push(infos);
            }
        }
    }

    let vk_writes: Vec<vk::WriteDescriptorSet> = resolved
        .iter()
        .enumerate()
        .map(|(i, resolved)| {
            let mut write = vk::WriteDescriptorSet::default()
                .dst_set(vk_set.set)
                .dst_binding(resolved.binding)
                .dst_array_element(0)
                .descriptor_type(descriptor_kind_to_vk(resolved.kind));
            if !buffer_infos[i].is_empty() {
                write = write.buffer_info(&buffer_infos[i]);
            }
            if !image_infos[i].is_empty() {
                write = write.image_info(&image_infos[i]);
            }
            write
        })
        .collect();

    unsafe {
        device.update_descriptor_sets(&vk_writes, &[]);
    }
    Ok(())
}
