//! Per-frame driver: index rotation, fence discipline, acquire, submit and
//! present over a fixed set of in-flight frame slots.

use std::sync::Arc;

use ember_rhi::{
    CommandBuffer, CommandPool, CommandPoolInfo, Device, Fence, Queue, QueuePresentInfo,
    QueueSubmitInfo, RhiResult, Semaphore, Swapchain,
};

/// Frames in flight. Frame i may not re-record until frame i - FRAME_COUNT
/// has signaled its fence.
pub const FRAME_COUNT: usize = 2;

struct FrameSlot {
    present_semaphore: Box<dyn Semaphore>,
    render_semaphore: Box<dyn Semaphore>,
    render_fence: Box<dyn Fence>,
    _pool: Box<dyn CommandPool>,
    cmd: Box<dyn CommandBuffer>,
    cmd_recorded: bool,
}

pub struct FrameDriver {
    device: Arc<dyn Device>,
    queue: Arc<dyn Queue>,
    slots: Vec<FrameSlot>,
    frame_index: usize,
    image_index: u32,
}

impl FrameDriver {
    pub fn new(device: Arc<dyn Device>, queue: Arc<dyn Queue>) -> RhiResult<Self> {
        let mut slots = Vec::with_capacity(FRAME_COUNT);
        for _ in 0..FRAME_COUNT {
            let pool = device.create_command_pool(&CommandPoolInfo { queue: &*queue })?;
            let cmd = device.create_command_buffer(&*pool)?;
            slots.push(FrameSlot {
                present_semaphore: device.create_semaphore()?,
                render_semaphore: device.create_semaphore()?,
                // Signaled so the first wait on each slot passes.
                render_fence: device.create_fence(true)?,
                _pool: pool,
                cmd,
                cmd_recorded: false,
            });
        }
        Ok(FrameDriver {
            device,
            queue,
            slots,
            frame_index: 0,
            image_index: 0,
        })
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Swapchain image index acquired by the current frame.
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Gate on the slot's fence, acquire the next swapchain image, and open
    /// the slot's command buffer for recording. Returns the acquired image
    /// index. `SwapchainOutOfDate` from the acquire propagates untouched; it
    /// is a rebuild signal, not an error.
    pub fn begin_frame(&mut self, swapchain: &mut dyn Swapchain) -> RhiResult<u32> {
        let slot = &mut self.slots[self.frame_index];
        if !slot.cmd_recorded {
            self.device.wait_for_fences(&[slot.render_fence.as_ref()])?;
            self.device.reset_fences(&[slot.render_fence.as_ref()])?;
            slot.cmd_recorded = true;
        }
        self.image_index = swapchain.acquire_next_image(slot.present_semaphore.as_ref())?;
        slot.cmd.begin()?;
        Ok(self.image_index)
    }

    /// The current frame's command buffer, recording between `begin_frame`
    /// and `end_frame`.
    pub fn command_buffer(&mut self) -> &mut dyn CommandBuffer {
        self.slots[self.frame_index].cmd.as_mut()
    }

    /// Close the command buffer, submit it (waiting on the acquire semaphore,
    /// signaling the render semaphore and the slot fence), present, and
    /// advance to the next slot.
    pub fn end_frame(&mut self, swapchain: &dyn Swapchain) -> RhiResult<()> {
        let slot = &mut self.slots[self.frame_index];
        slot.cmd.end()?;
        self.queue.submit(&QueueSubmitInfo {
            wait_semaphores: &[slot.present_semaphore.as_ref()],
            command_buffers: &[slot.cmd.as_ref()],
            signal_semaphores: &[slot.render_semaphore.as_ref()],
            signal_fence: Some(slot.render_fence.as_ref()),
        })?;
        self.queue.present(&QueuePresentInfo {
            wait_semaphores: &[slot.render_semaphore.as_ref()],
            swapchain,
            image_index: self.image_index,
        })?;
        slot.cmd_recorded = false;
        self.frame_index = (self.frame_index + 1) % FRAME_COUNT;
        Ok(())
    }

    /// Drain the queue; used before resize and teardown.
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.queue.wait_idle()
    }
}

impl std::fmt::Debug for FrameDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDriver")
            .field("frame_index", &self.frame_index)
            .field("image_index", &self.image_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_rhi::null::NullSwapchain;
    use ember_rhi::{DeviceInfo, Format, QueueInfo, QueueType, RhiError, SwapchainInfo};

    fn setup() -> (Arc<dyn Device>, Arc<dyn Queue>, Box<dyn Swapchain>) {
        let device = ember_rhi::create_device(&DeviceInfo::default()).unwrap();
        let queue = device
            .create_queue(&QueueInfo {
                queue_type: QueueType::Graphics,
            })
            .unwrap();
        let swapchain = device
            .create_swapchain(&SwapchainInfo {
                width: 640,
                height: 480,
                format: Format::B8G8R8A8Srgb,
                min_image_count: FRAME_COUNT as u32,
                vsync: true,
                queue: &*queue,
            })
            .unwrap();
        (device, queue, swapchain)
    }

    #[test]
    fn slots_rotate_evenly_with_fences_between() {
        let (device, queue, mut swapchain) = setup();
        let mut driver = FrameDriver::new(device, queue).unwrap();
        let mut entries = [0u32; FRAME_COUNT];
        for _ in 0..10 {
            let slot = driver.frame_index();
            entries[slot] += 1;
            driver.begin_frame(swapchain.as_mut()).unwrap();
            driver.end_frame(swapchain.as_ref()).unwrap();
        }
        assert_eq!(entries, [5, 5]);
    }

    #[test]
    fn acquire_cycles_swapchain_images() {
        let (device, queue, mut swapchain) = setup();
        let mut driver = FrameDriver::new(device, queue).unwrap();
        let mut seen = Vec::new();
        for _ in 0..4 {
            let acquired = driver.begin_frame(swapchain.as_mut()).unwrap();
            seen.push(acquired);
            driver.end_frame(swapchain.as_ref()).unwrap();
        }
        assert_eq!(seen, vec![0, 1, 0, 1]);
    }

    #[test]
    fn out_of_date_surfaces_from_acquire() {
        let (device, queue, mut swapchain) = setup();
        let mut driver = FrameDriver::new(device, queue).unwrap();
        swapchain
            .as_any()
            .downcast_ref::<NullSwapchain>()
            .unwrap()
            .simulate_out_of_date();
        let err = driver.begin_frame(swapchain.as_mut()).unwrap_err();
        assert!(matches!(err, RhiError::SwapchainOutOfDate));

        // Resize recovers and the next frame proceeds.
        swapchain.resize(320, 240).unwrap();
        driver.begin_frame(swapchain.as_mut()).unwrap();
        driver.end_frame(swapchain.as_ref()).unwrap();
    }
}
