//! Vulkan image: VkImage, memory and the default full-range view.

use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use ash::vk;

use crate::{
    Format, Image, ImageInfo, ImageUsage, ResourceId, ResourceState, RhiError, RhiResult, StateCell,
};

use super::{aspect_for_format, format_to_vk, memory, sample_count_to_vk, vk_err, VulkanDevice};

fn image_usage_to_vk(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(ImageUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(ImageUsage::COLOR_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(ImageUsage::TRANSFER_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::TRANSFER_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    flags
}

pub(crate) fn create_image(device: &VulkanDevice, info: &ImageInfo) -> RhiResult<VulkanImage> {
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
    let raw = device.raw();

    // Six layers is the cube convention; anything else is a plain 2D array.
    let flags = if info.layer_count == 6 {
        vk::ImageCreateFlags::CUBE_COMPATIBLE
    } else {
        vk::ImageCreateFlags::empty()
    };

    let create_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format_to_vk(info.format))
        .extent(vk::Extent3D {
            width: info.width,
            height: info.height,
            depth: info.depth.max(1),
        })
        .mip_levels(info.mip_levels)
        .array_layers(info.layer_count)
        .samples(sample_count_to_vk(info.sample_count))
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(image_usage_to_vk(info.usage))
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .flags(flags);

    let image = unsafe { raw.create_image(&create_info, None).map_err(vk_err)? };
    let requirements = unsafe { raw.get_image_memory_requirements(image) };
    let props = device.memory_properties();
    let memory = match memory::allocate(
        raw,
        &props,
        requirements,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    ) {
        Ok(memory) => memory,
        Err(err) => {
            unsafe { raw.destroy_image(image, None) };
            return Err(err);
        }
    };
    unsafe {
        raw.bind_image_memory(image, memory, 0).map_err(vk_err)?;
    }

    let view_type = match info.layer_count {
        1 => vk::ImageViewType::TYPE_2D,
        6 => vk::ImageViewType::CUBE,
        _ => vk::ImageViewType::TYPE_2D_ARRAY,
    };
    let view_create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(format_to_vk(info.format))
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_for_format(info.format))
                .base_mip_level(0)
                .level_count(info.mip_levels)
                .base_array_layer(0)
                .layer_count(info.layer_count),
        );
    let view = unsafe { raw.create_image_view(&view_create_info, None).map_err(vk_err)? };

    device.allocation_counter().fetch_add(1, Ordering::Relaxed);
    Ok(VulkanImage {
        device: device.raw_arc(),
        image,
        memory,
        view,
        info: info.clone(),
        state: StateCell::new(ResourceState::Undefined),
        id: device.next_id(),
        allocations: Arc::clone(device.allocation_counter()),
    })
}

pub struct VulkanImage {
    pub(crate) device: Arc<ash::Device>,
    pub(crate) image: vk::Image,
    pub(crate) memory: vk::DeviceMemory,
    pub(crate) view: vk::ImageView,
    info: ImageInfo,
    state: StateCell,
    id: ResourceId,
    allocations: Arc<AtomicI64>,
}

impl Drop for VulkanImage {
    fn drop(&mut self) {
        self.allocations.fetch_sub(1, Ordering::Relaxed);
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

impl std::fmt::Debug for VulkanImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanImage")
            .field("id", &self.id)
            .field("extent", &(self.info.width, self.info.height))
            .field("format", &self.info.format)
            .finish()
    }
}

impl Image for VulkanImage {
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

/// Returns the VkImage and view for either an owned image or a swapchain
/// image. Used when building framebuffers, barriers and blits.
pub(crate) fn raw_image_handles(image: &dyn Image) -> RhiResult<(vk::Image, vk::ImageView)> {
    if let Some(owned) = image.as_any().downcast_ref::<VulkanImage>() {
        return Ok((owned.image, owned.view));
    }
    if let Some(swapchain) = image
        .as_any()
        .downcast_ref::<super::swapchain::VulkanSwapchainImage>()
    {
        return Ok((swapchain.image(), swapchain.view()));
    }
    Err(RhiError::invalid_argument(
        "image does not belong to the Vulkan backend",
    ))
}
