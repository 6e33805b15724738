//! Staging-ring resource loader.
//!
//! Uploads stage bytes into one host-visible ring buffer sized at creation,
//! then record copies on an internal command buffer. Outside a batch every
//! upload submits and waits immediately; `begin_upload_batch` /
//! `end_upload_batch` coalesce several uploads into one submission. Batching
//! is an optimization only: results are byte-identical either way.

use std::sync::Arc;

use ember_rhi::{
    map_buffer, Buffer, BufferInfo, BufferUsage, CommandBuffer, CommandPool, CommandPoolInfo,
    Device, Fence, Filter, Image, ImageBarrier, MemoryDomain, Queue, QueueInfo, QueueSubmitInfo,
    QueueType, ResourceState, RhiError, RhiResult, SubresourceRange,
};

pub struct BufferUploadJob<'a> {
    pub dst: &'a dyn Buffer,
    pub dst_offset: u64,
    pub data: &'a [u8],
}

pub struct ImageUploadJob<'a> {
    pub dst: &'a dyn Image,
    pub width: u32,
    pub height: u32,
    pub mip_level: u32,
    pub data: &'a [u8],
}

pub struct GenerateMipmapsJob<'a> {
    pub image: &'a dyn Image,
    pub final_state: ResourceState,
}

pub struct ResourceLoader {
    device: Arc<dyn Device>,
    queue: Arc<dyn Queue>,
    staging: Arc<dyn Buffer>,
    capacity: u64,
    head: u64,
    _pool: Box<dyn CommandPool>,
    cmd: Box<dyn CommandBuffer>,
    fence: Box<dyn Fence>,
    cmd_open: bool,
    batch_open: bool,
}

impl ResourceLoader {
    /// Create the loader with a staging ring of `staging_bytes`.
    pub fn new(device: Arc<dyn Device>, staging_bytes: u64) -> RhiResult<Self> {
        if staging_bytes == 0 {
            return Err(RhiError::invalid_argument(
                "staging ring size must be nonzero",
            ));
        }
        let queue = device.create_queue(&QueueInfo {
            queue_type: QueueType::Graphics,
        })?;
        let staging = device.create_buffer(&BufferInfo {
            label: Some("loader staging ring"),
            size: staging_bytes,
            usage: BufferUsage::TRANSFER_SRC,
            memory_domain: MemoryDomain::Upload,
        })?;
        let pool = device.create_command_pool(&CommandPoolInfo { queue: &*queue })?;
        let cmd = device.create_command_buffer(&*pool)?;
        let fence = device.create_fence(false)?;
        log::info!("resource loader ready ({staging_bytes} byte staging ring)");
        Ok(ResourceLoader {
            device,
            queue,
            staging,
            capacity: staging_bytes,
            head: 0,
            _pool: pool,
            cmd,
            fence,
            cmd_open: false,
            batch_open: false,
        })
    }

    fn ensure_recording(&mut self) -> RhiResult<()> {
        if !self.cmd_open {
            self.cmd.begin()?;
            self.cmd_open = true;
        }
        Ok(())
    }

    /// Submit the open command buffer and wait for it to retire; the whole
    /// ring is free again afterwards.
    fn flush(&mut self) -> RhiResult<()> {
        if !self.cmd_open {
            return Ok(());
        }
        self.cmd.end()?;
        self.queue.submit(&QueueSubmitInfo {
            wait_semaphores: &[],
            command_buffers: &[self.cmd.as_ref()],
            signal_semaphores: &[],
            signal_fence: Some(self.fence.as_ref()),
        })?;
        self.fence.wait()?;
        self.fence.reset()?;
        self.cmd_open = false;
        self.head = 0;
        Ok(())
    }

    /// Reserve `size` bytes in the ring, flushing pending work when the ring
    /// wraps. Fails with `StagingOverflow` when the request can never fit.
    fn reserve(&mut self, size: u64) -> RhiResult<u64> {
        if size > self.capacity {
            return Err(RhiError::StagingOverflow {
                requested: size,
                capacity: self.capacity,
            });
        }
        if self.head + size > self.capacity {
            self.flush()?;
            self.ensure_recording()?;
        }
        let offset = self.head;
        self.head += size;
        Ok(offset)
    }

    fn stage(&mut self, data: &[u8]) -> RhiResult<u64> {
        let offset = self.reserve(data.len() as u64)?;
        let mut mapping = map_buffer(self.staging.as_ref())?;
        mapping.bytes_mut()[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        Ok(offset)
    }

    /// Stage `data` and record a copy into `dst` at `dst_offset`.
    pub fn upload_buffer(&mut self, job: &BufferUploadJob) -> RhiResult<()> {
        if job.data.is_empty() {
            return Ok(());
        }
        if job.dst_offset + job.data.len() as u64 > job.dst.info().size {
            return Err(RhiError::invalid_argument(
                "buffer upload exceeds destination size",
            ));
        }
        self.ensure_recording()?;
        let staging_offset = self.stage(job.data)?;
        self.cmd.copy_buffer(
            self.staging.as_ref(),
            staging_offset,
            job.dst,
            job.dst_offset,
            job.data.len() as u64,
        )?;
        if !self.batch_open {
            self.flush()?;
        }
        Ok(())
    }

    /// Stage pixels and copy them into one mip of `dst`, transitioning the
    /// level through `TransferDst` and leaving it `ShaderReadOnly`.
    pub fn upload_image(&mut self, job: &ImageUploadJob) -> RhiResult<()> {
        if job.data.is_empty() {
            return Ok(());
        }
        self.ensure_recording()?;
        let staging_offset = self.stage(job.data)?;
        let mip_range = SubresourceRange {
            base_mip: job.mip_level,
            mip_count: 1,
            base_layer: 0,
            layer_count: job.dst.info().layer_count,
        };
        self.cmd.barrier(
            &[],
            &[],
            &[ImageBarrier {
                image: job.dst,
                old_state: ResourceState::Undefined,
                new_state: ResourceState::TransferDst,
                src_queue: None,
                dst_queue: None,
                subresource: Some(mip_range),
            }],
        )?;
        self.cmd.copy_buffer_to_image(
            self.staging.as_ref(),
            staging_offset,
            job.dst,
            job.mip_level,
            job.width,
            job.height,
        )?;
        self.cmd.barrier(
            &[],
            &[],
            &[ImageBarrier {
                image: job.dst,
                old_state: ResourceState::TransferDst,
                new_state: ResourceState::ShaderReadOnly,
                src_queue: None,
                dst_queue: None,
                subresource: Some(mip_range),
            }],
        )?;
        if !self.batch_open {
            self.flush()?;
        }
        Ok(())
    }

    /// Fill the mip chain by blitting level i into level i+1 with halved
    /// extents, leaving the whole image in `final_state`.
    pub fn generate_mipmaps(&mut self, job: &GenerateMipmapsJob) -> RhiResult<()> {
        let info = job.image.info().clone();
        if info.mip_levels < 2 {
            // Nothing to generate; still honor the requested final state.
            self.ensure_recording()?;
            self.cmd.barrier(
                &[],
                &[],
                &[ImageBarrier {
                    image: job.image,
                    old_state: job.image.resource_state(),
                    new_state: job.final_state,
                    src_queue: None,
                    dst_queue: None,
                    subresource: None,
                }],
            )?;
            if !self.batch_open {
                self.flush()?;
            }
            return Ok(());
        }
        self.ensure_recording()?;

        let layer_count = info.layer_count;
        let mip_range = |mip: u32| SubresourceRange {
            base_mip: mip,
            mip_count: 1,
            base_layer: 0,
            layer_count,
        };

        // Level 0 was written by upload_image and sits in ShaderReadOnly.
        self.cmd.barrier(
            &[],
            &[],
            &[ImageBarrier {
                image: job.image,
                old_state: job.image.resource_state(),
                new_state: ResourceState::TransferSrc,
                src_queue: None,
                dst_queue: None,
                subresource: Some(mip_range(0)),
            }],
        )?;

        let mut src_extent = (info.width.max(1), info.height.max(1));
        for mip in 1..info.mip_levels {
            let dst_extent = (src_extent.0.max(2) / 2, src_extent.1.max(2) / 2);
            self.cmd.barrier(
                &[],
                &[],
                &[ImageBarrier {
                    image: job.image,
                    old_state: ResourceState::Undefined,
                    new_state: ResourceState::TransferDst,
                    src_queue: None,
                    dst_queue: None,
                    subresource: Some(mip_range(mip)),
                }],
            )?;
            self.cmd.blit_image_region(
                job.image,
                mip - 1,
                src_extent,
                job.image,
                mip,
                dst_extent,
                Filter::Linear,
            )?;
            // The level just written becomes the source of the next blit.
            self.cmd.barrier(
                &[],
                &[],
                &[ImageBarrier {
                    image: job.image,
                    old_state: ResourceState::TransferDst,
                    new_state: ResourceState::TransferSrc,
                    src_queue: None,
                    dst_queue: None,
                    subresource: Some(mip_range(mip)),
                }],
            )?;
            src_extent = dst_extent;
        }

        // Every level is TransferSrc now; move the whole chain at once.
        self.cmd.barrier(
            &[],
            &[],
            &[ImageBarrier {
                image: job.image,
                old_state: ResourceState::TransferSrc,
                new_state: job.final_state,
                src_queue: None,
                dst_queue: None,
                subresource: None,
            }],
        )?;
        if !self.batch_open {
            self.flush()?;
        }
        Ok(())
    }

    /// Start coalescing uploads into one submission.
    pub fn begin_upload_batch(&mut self) {
        self.batch_open = true;
    }

    /// Submit everything recorded since `begin_upload_batch` and wait.
    pub fn end_upload_batch(&mut self) -> RhiResult<()> {
        self.batch_open = false;
        self.flush()
    }

    /// Block until all outstanding uploads have completed.
    pub fn wait_idle(&mut self) -> RhiResult<()> {
        self.flush()?;
        self.queue.wait_idle()
    }

    /// Flush outstanding work and drop the staging resources.
    pub fn shutdown(mut self) -> RhiResult<()> {
        self.wait_idle()
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }
}

impl std::fmt::Debug for ResourceLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLoader")
            .field("capacity", &self.capacity)
            .field("head", &self.head)
            .field("batch_open", &self.batch_open)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_rhi::{DeviceInfo, Format, ImageInfo, ImageUsage};

    fn loader(staging: u64) -> ResourceLoader {
        let device = ember_rhi::create_device(&DeviceInfo::default()).unwrap();
        ResourceLoader::new(device, staging).unwrap()
    }

    fn readback(loader: &ResourceLoader, buffer: &dyn Buffer, len: usize) -> Vec<u8> {
        let device = loader.device();
        let queue = device
            .create_queue(&QueueInfo {
                queue_type: QueueType::Graphics,
            })
            .unwrap();
        let staging = device
            .create_buffer(&BufferInfo {
                size: len as u64,
                usage: BufferUsage::TRANSFER_DST,
                memory_domain: MemoryDomain::Readback,
                ..Default::default()
            })
            .unwrap();
        let pool = device
            .create_command_pool(&CommandPoolInfo { queue: &*queue })
            .unwrap();
        let mut cmd = device.create_command_buffer(&*pool).unwrap();
        cmd.begin().unwrap();
        cmd.copy_buffer(buffer, 0, &*staging, 0, len as u64).unwrap();
        cmd.end().unwrap();
        device.immediate_submit(&*queue, &*cmd).unwrap();
        let mapping = map_buffer(&*staging).unwrap();
        mapping.bytes().to_vec()
    }

    #[test]
    fn upload_round_trips_bytes() {
        let mut loader = loader(1024);
        let dst = loader
            .device()
            .create_buffer(&BufferInfo {
                size: 256,
                usage: BufferUsage::TRANSFER_DST | BufferUsage::TRANSFER_SRC,
                ..Default::default()
            })
            .unwrap();
        let payload: Vec<u8> = (0..=255).collect();
        loader
            .upload_buffer(&BufferUploadJob {
                dst: &*dst,
                dst_offset: 0,
                data: &payload,
            })
            .unwrap();
        assert_eq!(readback(&loader, &*dst, 256), payload);
    }

    #[test]
    fn oversized_upload_is_staging_overflow() {
        let mut loader = loader(64);
        let dst = loader
            .device()
            .create_buffer(&BufferInfo {
                size: 256,
                usage: BufferUsage::TRANSFER_DST,
                ..Default::default()
            })
            .unwrap();
        let payload = vec![7u8; 128];
        let err = loader
            .upload_buffer(&BufferUploadJob {
                dst: &*dst,
                dst_offset: 0,
                data: &payload,
            })
            .unwrap_err();
        assert!(matches!(err, RhiError::StagingOverflow { .. }));
    }

    #[test]
    fn batched_and_unbatched_uploads_match() {
        for batched in [false, true] {
            let mut loader = loader(4096);
            let dst = loader
                .device()
                .create_buffer(&BufferInfo {
                    size: 96,
                    usage: BufferUsage::TRANSFER_DST | BufferUsage::TRANSFER_SRC,
                    ..Default::default()
                })
                .unwrap();
            if batched {
                loader.begin_upload_batch();
            }
            for chunk in 0..3u8 {
                let payload = vec![chunk + 1; 32];
                loader
                    .upload_buffer(&BufferUploadJob {
                        dst: &*dst,
                        dst_offset: chunk as u64 * 32,
                        data: &payload,
                    })
                    .unwrap();
            }
            if batched {
                loader.end_upload_batch().unwrap();
            }
            let bytes = readback(&loader, &*dst, 96);
            let mut expected = vec![1u8; 32];
            expected.extend(vec![2u8; 32]);
            expected.extend(vec![3u8; 32]);
            assert_eq!(bytes, expected);
        }
    }

    #[test]
    fn ring_wrap_flushes_and_reuses() {
        let mut loader = loader(64);
        let dst = loader
            .device()
            .create_buffer(&BufferInfo {
                size: 192,
                usage: BufferUsage::TRANSFER_DST | BufferUsage::TRANSFER_SRC,
                ..Default::default()
            })
            .unwrap();
        loader.begin_upload_batch();
        for chunk in 0..4u8 {
            let payload = vec![chunk + 10; 48];
            loader
                .upload_buffer(&BufferUploadJob {
                    dst: &*dst,
                    dst_offset: chunk as u64 * 48,
                    data: &payload,
                })
                .unwrap();
        }
        loader.end_upload_batch().unwrap();
        let bytes = readback(&loader, &*dst, 192);
        assert_eq!(&bytes[0..48], vec![10u8; 48].as_slice());
        assert_eq!(&bytes[144..192], vec![13u8; 48].as_slice());
    }

    #[test]
    fn image_upload_leaves_shader_read_only() {
        let mut loader = loader(1 << 16);
        let image = loader
            .device()
            .create_image(&ImageInfo {
                width: 16,
                height: 16,
                format: Format::R8G8B8A8Unorm,
                usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
                ..Default::default()
            })
            .unwrap();
        let pixels = vec![0xffu8; 16 * 16 * 4];
        loader
            .upload_image(&ImageUploadJob {
                dst: &*image,
                width: 16,
                height: 16,
                mip_level: 0,
                data: &pixels,
            })
            .unwrap();
        assert_eq!(image.resource_state(), ResourceState::ShaderReadOnly);
    }

    #[test]
    fn mip_generation_leaves_final_state() {
        let mut loader = loader(1 << 16);
        let image = loader
            .device()
            .create_image(&ImageInfo {
                width: 32,
                height: 32,
                mip_levels: 6,
                format: Format::R8G8B8A8Unorm,
                usage: ImageUsage::SAMPLED
                    | ImageUsage::TRANSFER_DST
                    | ImageUsage::TRANSFER_SRC,
                ..Default::default()
            })
            .unwrap();
        let pixels = vec![0x80u8; 32 * 32 * 4];
        loader
            .upload_image(&ImageUploadJob {
                dst: &*image,
                width: 32,
                height: 32,
                mip_level: 0,
                data: &pixels,
            })
            .unwrap();
        loader
            .generate_mipmaps(&GenerateMipmapsJob {
                image: &*image,
                final_state: ResourceState::ShaderReadOnly,
            })
            .unwrap();
        loader.wait_idle().unwrap();
        assert_eq!(image.resource_state(), ResourceState::ShaderReadOnly);
    }

    #[test]
    fn ring_grows_back_after_wait_idle() {
        let mut loader = loader(64);
        let dst = loader
            .device()
            .create_buffer(&BufferInfo {
                size: 64,
                usage: BufferUsage::TRANSFER_DST,
                ..Default::default()
            })
            .unwrap();
        for _ in 0..4 {
            loader
                .upload_buffer(&BufferUploadJob {
                    dst: &*dst,
                    dst_offset: 0,
                    data: &[1u8; 64],
                })
                .unwrap();
        }
        loader.wait_idle().unwrap();
    }
}
