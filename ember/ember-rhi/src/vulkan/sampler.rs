//! Vulkan sampler.

use std::any::Any;
use std::sync::Arc;

use ash::vk;

use crate::{AddressMode, Filter, RhiResult, Sampler, SamplerInfo};

use super::{filter_to_vk, vk_err};

fn address_mode_to_vk(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub(crate) fn create_sampler(
    device: Arc<ash::Device>,
    info: &SamplerInfo,
) -> RhiResult<VulkanSampler> {
    let mipmap_mode = match info.mipmap_mode {
        Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
        Filter::Linear => vk::SamplerMipmapMode::LINEAR,
    };
    let create_info = vk::SamplerCreateInfo::default()
        .mag_filter(filter_to_vk(info.mag_filter))
        .min_filter(filter_to_vk(info.min_filter))
        .mipmap_mode(mipmap_mode)
        .address_mode_u(address_mode_to_vk(info.address_mode_u))
        .address_mode_v(address_mode_to_vk(info.address_mode_v))
        .address_mode_w(address_mode_to_vk(info.address_mode_w))
        .min_lod(info.min_lod)
        .max_lod(info.max_lod);
    let sampler = unsafe { device.create_sampler(&create_info, None).map_err(vk_err)? };
    Ok(VulkanSampler { device, sampler })
}

pub struct VulkanSampler {
    device: Arc<ash::Device>,
    pub(crate) sampler: vk::Sampler,
}

impl Drop for VulkanSampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

impl std::fmt::Debug for VulkanSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSampler").finish()
    }
}

impl Sampler for VulkanSampler {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
