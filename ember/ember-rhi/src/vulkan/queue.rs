//! Vulkan queue, fence and semaphore.

use std::any::Any;
use std::sync::Arc;

use ash::vk;

use crate::{
    CommandBufferState, Fence, Queue, QueuePresentInfo, QueueSubmitInfo, QueueType, RhiError,
    RhiResult, Semaphore,
};

use super::command::VulkanCommandBuffer;
use super::swapchain::VulkanSwapchain;
use super::vk_err;

pub struct VulkanQueue {
    device: Arc<ash::Device>,
    pub(crate) queue: vk::Queue,
    #[allow(dead_code)]
    pub(crate) family_index: u32,
    queue_type: QueueType,
}

impl VulkanQueue {
    pub(crate) fn new(
        device: Arc<ash::Device>,
        queue: vk::Queue,
        family_index: u32,
        queue_type: QueueType,
    ) -> Self {
        Self {
            device,
            queue,
            family_index,
            queue_type,
        }
    }
}

impl std::fmt::Debug for VulkanQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanQueue")
            .field("queue_type", &self.queue_type)
            .finish()
    }
}

impl Queue for VulkanQueue {
    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn submit(&self, info: &QueueSubmitInfo) -> RhiResult<()> {
        let mut vk_buffers = Vec::with_capacity(info.command_buffers.len());
        for cmd in info.command_buffers {
            let vk_cmd = cmd
                .as_any()
                .downcast_ref::<VulkanCommandBuffer>()
                .ok_or_else(|| {
                    RhiError::invalid_argument("command buffer is not a Vulkan buffer")
                })?;
            if vk_cmd.state.get() != CommandBufferState::Executable {
                return Err(RhiError::invalid_state(
                    "submitted command buffer is not executable",
                ));
            }
            vk_buffers.push(vk_cmd.cmd);
        }
        if vk_buffers.is_empty() {
            return Ok(());
        }

        let wait_semaphores: Vec<vk::Semaphore> = info
            .wait_semaphores
            .iter()
            .filter_map(|s| {
                s.as_any()
                    .downcast_ref::<VulkanSemaphore>()
                    .map(|vs| vs.semaphore)
            })
            .collect();
        let signal_semaphores: Vec<vk::Semaphore> = info
            .signal_semaphores
            .iter()
            .filter_map(|s| {
                s.as_any()
                    .downcast_ref::<VulkanSemaphore>()
                    .map(|vs| vs.semaphore)
            })
            .collect();
        let fence = info
            .signal_fence
            .and_then(|f| f.as_any().downcast_ref::<VulkanFence>().map(|vf| vf.fence))
            .unwrap_or(vk::Fence::null());

        // Wait at color attachment output so the swapchain image is ready
        // before the pass writes to it.
        let wait_stages =
            vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&vk_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], fence)
                .map_err(vk_err)?;
        }
        for cmd in info.command_buffers {
            if let Some(vk_cmd) = cmd.as_any().downcast_ref::<VulkanCommandBuffer>() {
                vk_cmd.state.set(CommandBufferState::Pending);
            }
        }
        Ok(())
    }

    fn present(&self, info: &QueuePresentInfo) -> RhiResult<()> {
        let swapchain = info
            .swapchain
            .as_any()
            .downcast_ref::<VulkanSwapchain>()
            .ok_or_else(|| RhiError::invalid_argument("swapchain is not a Vulkan swapchain"))?;
        let wait_semaphores: Vec<vk::Semaphore> = info
            .wait_semaphores
            .iter()
            .filter_map(|s| {
                s.as_any()
                    .downcast_ref::<VulkanSemaphore>()
                    .map(|vs| vs.semaphore)
            })
            .collect();
        let image_indices = [info.image_index];
        let swapchains = [swapchain.handle()];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe {
            swapchain
                .loader()
                .queue_present(self.queue, &present_info)
                .map_err(vk_err)?;
        }
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.queue_wait_idle(self.queue).map_err(vk_err) }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct VulkanFence {
    pub(crate) device: Arc<ash::Device>,
    pub(crate) fence: vk::Fence,
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

impl std::fmt::Debug for VulkanFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanFence").finish()
    }
}

impl Fence for VulkanFence {
    fn wait(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .map_err(vk_err)
        }
    }

    fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]).map_err(vk_err) }
    }

    fn is_signaled(&self) -> bool {
        unsafe { self.device.get_fence_status(self.fence).unwrap_or(false) }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct VulkanSemaphore {
    pub(crate) device: Arc<ash::Device>,
    pub(crate) semaphore: vk::Semaphore,
}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

impl std::fmt::Debug for VulkanSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSemaphore").finish()
    }
}

impl Semaphore for VulkanSemaphore {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
