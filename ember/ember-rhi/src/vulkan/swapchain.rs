//! Vulkan swapchain and its presentable images.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;

use crate::{
    Format, Image, ImageInfo, ImageUsage, ResourceId, ResourceState, RhiError, RhiResult,
    Semaphore, StateCell, Swapchain, SwapchainInfo,
};

use super::queue::VulkanSemaphore;
use super::{format_from_vk, format_to_vk, vk_err, SurfaceState};

/// Swapchain image wrapper. Owns its view but not the VkImage (the swapchain
/// does); dropping it after a resize only releases the view.
pub struct VulkanSwapchainImage {
    device: Arc<ash::Device>,
    image: vk::Image,
    view: vk::ImageView,
    info: ImageInfo,
    state: StateCell,
    id: ResourceId,
}

impl VulkanSwapchainImage {
    pub(crate) fn image(&self) -> vk::Image {
        self.image
    }

    pub(crate) fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for VulkanSwapchainImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

impl std::fmt::Debug for VulkanSwapchainImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSwapchainImage")
            .field("id", &self.id)
            .field("extent", &(self.info.width, self.info.height))
            .finish()
    }
}

impl Image for VulkanSwapchainImage {
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

pub struct VulkanSwapchain {
    device: Arc<ash::Device>,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    queue: vk::Queue,
    swapchain: vk::SwapchainKHR,
    images: Vec<Arc<VulkanSwapchainImage>>,
    extent: (u32, u32),
    format: Format,
    vsync: bool,
    min_image_count: u32,
    next_image_id: AtomicU64,
}

impl VulkanSwapchain {
    pub(crate) fn create(
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        state: &SurfaceState,
        queue: vk::Queue,
        info: &SwapchainInfo,
    ) -> RhiResult<Self> {
        let mut swapchain = VulkanSwapchain {
            device,
            physical_device,
            surface: state.surface,
            surface_loader: state.surface_loader.clone(),
            swapchain_loader: state.swapchain_loader.clone(),
            queue,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            extent: (info.width, info.height),
            format: info.format,
            vsync: info.vsync,
            min_image_count: info.min_image_count,
            // Swapchain image ids live in their own band so rebuilt images
            // never collide with device-created resources.
            next_image_id: AtomicU64::new(1 << 32),
        };
        swapchain.build(info.width, info.height)?;
        Ok(swapchain)
    }

    pub(crate) fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub(crate) fn loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    fn build(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                .map_err(vk_err)?
        };
        let extent = vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        };
        let mut image_count = self.min_image_count.max(caps.min_image_count);
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }

        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
                .map_err(vk_err)?
        };
        let requested = format_to_vk(self.format);
        let surface_format = formats
            .iter()
            .copied()
            .find(|f| f.format == requested)
            .or_else(|| formats.first().copied())
            .ok_or_else(|| RhiError::Backend("surface reports no formats".into()))?;

        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                .map_err(vk_err)?
        };
        let present_mode = if self.vsync {
            vk::PresentModeKHR::FIFO
        } else {
            present_modes
                .iter()
                .copied()
                .find(|m| *m == vk::PresentModeKHR::MAILBOX)
                .or_else(|| {
                    present_modes
                        .iter()
                        .copied()
                        .find(|m| *m == vk::PresentModeKHR::IMMEDIATE)
                })
                .unwrap_or(vk::PresentModeKHR::FIFO)
        };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        let swapchain = unsafe {
            self.swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(vk_err)?
        };

        self.images.clear();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader.destroy_swapchain(old_swapchain, None);
            }
        }
        self.swapchain = swapchain;
        self.format = format_from_vk(surface_format.format);
        self.extent = (extent.width, extent.height);

        let vk_images = unsafe {
            self.swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(vk_err)?
        };
        let mut images = Vec::with_capacity(vk_images.len());
        for image in vk_images {
            let view_create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );
            let view = unsafe {
                self.device
                    .create_image_view(&view_create_info, None)
                    .map_err(vk_err)?
            };
            images.push(Arc::new(VulkanSwapchainImage {
                device: Arc::clone(&self.device),
                image,
                view,
                info: ImageInfo {
                    label: Some("swapchain image"),
                    width: extent.width,
                    height: extent.height,
                    format: self.format,
                    usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_DST,
                    ..Default::default()
                },
                state: StateCell::new(ResourceState::Undefined),
                id: self.next_image_id.fetch_add(1, Ordering::Relaxed),
            }));
        }
        self.images = images;
        log::debug!(
            "swapchain built: {}x{} x{} images",
            extent.width,
            extent.height,
            self.images.len()
        );
        Ok(())
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        self.images.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
            }
        }
    }
}

impl std::fmt::Debug for VulkanSwapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSwapchain")
            .field("extent", &self.extent)
            .field("image_count", &self.images.len())
            .finish()
    }
}

impl Swapchain for VulkanSwapchain {
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

    fn acquire_next_image(&mut self, signal_semaphore: &dyn Semaphore) -> RhiResult<u32> {
        let semaphore = signal_semaphore
            .as_any()
            .downcast_ref::<VulkanSemaphore>()
            .map(|s| s.semaphore)
            .unwrap_or(vk::Semaphore::null());
        let (index, _suboptimal) = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
                .map_err(vk_err)?
        };
        Ok(index)
    }

    fn resize(&mut self, width: u32, height: u32) -> RhiResult<()> {
        unsafe {
            self.device.queue_wait_idle(self.queue).map_err(vk_err)?;
        }
        self.build(width, height)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
