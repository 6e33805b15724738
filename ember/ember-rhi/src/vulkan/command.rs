//! Vulkan command recording: the full backend-neutral vocabulary on one
//! VkCommandBuffer, with the state machine enforced host-side.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ash::vk;
use ash::vk::Handle;

use crate::{
    Buffer, BufferBarrier, CommandBuffer, CommandBufferState, CommandPool, CommandStateCell,
    DescriptorSet, Filter, Format, Image, ImageBarrier, IndexType, MemoryBarrier, Pipeline,
    PipelineKind, RenderPass, RenderPassBeginInfo, ResourceState, RhiError, RhiResult,
};

use super::descriptor::VulkanDescriptorSet;
use super::image::raw_image_handles;
use super::pipeline::VulkanPipeline;
use super::render_pass::VulkanRenderPass;
use super::{
    aspect_for_format, filter_to_vk, state_to_access, state_to_layout, state_to_stage, vk_err,
    FramebufferKey, VulkanBuffer,
};

pub struct VulkanCommandPool {
    pub(crate) device: Arc<ash::Device>,
    pub(crate) pool: vk::CommandPool,
}

impl Drop for VulkanCommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

impl std::fmt::Debug for VulkanCommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanCommandPool").finish()
    }
}

impl CommandPool for VulkanCommandPool {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct VulkanCommandBuffer {
    device: Arc<ash::Device>,
    pub(crate) cmd: vk::CommandBuffer,
    pub(crate) state: CommandStateCell,
    in_render_pass: bool,
    pass_color_formats: Option<Vec<Format>>,
    bound_pipeline: Option<PipelineKind>,
    framebuffer_cache: Arc<Mutex<HashMap<FramebufferKey, vk::Framebuffer>>>,
}

impl VulkanCommandBuffer {
    pub(crate) fn new(
        device: Arc<ash::Device>,
        cmd: vk::CommandBuffer,
        framebuffer_cache: Arc<Mutex<HashMap<FramebufferKey, vk::Framebuffer>>>,
    ) -> Self {
        Self {
            device,
            cmd,
            state: CommandStateCell::new(),
            in_render_pass: false,
            pass_color_formats: None,
            bound_pipeline: None,
            framebuffer_cache,
        }
    }

    fn require_recording(&self) -> RhiResult<()> {
        if self.state.get() != CommandBufferState::Recording {
            return Err(RhiError::invalid_state("command buffer is not recording"));
        }
        Ok(())
    }

    fn require_outside_render_pass(&self) -> RhiResult<()> {
        self.require_recording()?;
        if self.in_render_pass {
            return Err(RhiError::invalid_state(
                "operation is not allowed inside a render pass",
            ));
        }
        Ok(())
    }

    fn require_inside_render_pass(&self) -> RhiResult<()> {
        self.require_recording()?;
        if !self.in_render_pass {
            return Err(RhiError::invalid_state(
                "operation requires an active render pass",
            ));
        }
        Ok(())
    }

    fn framebuffer_for(
        &self,
        render_pass: &VulkanRenderPass,
        info: &RenderPassBeginInfo,
    ) -> RhiResult<(vk::Framebuffer, Vec<vk::ClearValue>)> {
        let mut views = Vec::new();
        let mut clear_values = Vec::new();
        for binding in &info.color_attachments {
            let image = binding.image.as_ref().ok_or_else(|| {
                RhiError::invalid_argument("render pass color attachment has no bound image")
            })?;
            let (_, view) = raw_image_handles(image.as_ref())?;
            views.push(view);
            clear_values.push(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: binding.clear_value,
                },
            });
        }
        if let Some(depth) = &info.depth_stencil {
            let image = depth.image.as_ref().ok_or_else(|| {
                RhiError::invalid_argument("render pass depth attachment has no bound image")
            })?;
            let (_, view) = raw_image_handles(image.as_ref())?;
            views.push(view);
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: depth.clear_value.depth,
                    stencil: depth.clear_value.stencil,
                },
            });
        }

        let key = FramebufferKey {
            render_pass: render_pass.render_pass.as_raw(),
            width: info.width,
            height: info.height,
            attachment_views: views.iter().map(|v| v.as_raw()).collect(),
        };
        let mut cache = self
            .framebuffer_cache
            .lock()
            .map_err(|_| RhiError::Backend("framebuffer cache poisoned".into()))?;
        let framebuffer = match cache.get(&key) {
            Some(framebuffer) => *framebuffer,
            None => {
                let create_info = vk::FramebufferCreateInfo::default()
                    .render_pass(render_pass.render_pass)
                    .attachments(&views)
                    .width(info.width)
                    .height(info.height)
                    .layers(1);
                let framebuffer = unsafe {
                    self.device
                        .create_framebuffer(&create_info, None)
                        .map_err(vk_err)?
                };
                cache.insert(key, framebuffer);
                framebuffer
            }
        };
        Ok((framebuffer, clear_values))
    }

    fn image_barrier_to_vk<'a>(
        &self,
        barrier: &'a ImageBarrier<'a>,
    ) -> RhiResult<vk::ImageMemoryBarrier<'a>> {
        let (image, _) = raw_image_handles(barrier.image)?;
        let info = barrier.image.info();
        let range = match barrier.subresource {
            Some(range) => vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_for_format(info.format))
                .base_mip_level(range.base_mip)
                .level_count(range.mip_count)
                .base_array_layer(range.base_layer)
                .layer_count(range.layer_count),
            None => vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_for_format(info.format))
                .base_mip_level(0)
                .level_count(info.mip_levels)
                .base_array_layer(0)
                .layer_count(info.layer_count),
        };
        Ok(vk::ImageMemoryBarrier::default()
            .src_access_mask(state_to_access(barrier.old_state))
            .dst_access_mask(state_to_access(barrier.new_state))
            .old_layout(state_to_layout(barrier.old_state))
            .new_layout(state_to_layout(barrier.new_state))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range))
    }
}

impl std::fmt::Debug for VulkanCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanCommandBuffer")
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl CommandBuffer for VulkanCommandBuffer {
    fn state(&self) -> CommandBufferState {
        self.state.get()
    }

    fn begin(&mut self) -> RhiResult<()> {
        if self.state.get() == CommandBufferState::Recording {
            return Err(RhiError::invalid_state("command buffer already recording"));
        }
        let begin_info = vk::CommandBufferBeginInfo::default();
        unsafe {
            self.device
                .begin_command_buffer(self.cmd, &begin_info)
                .map_err(vk_err)?;
        }
        self.state.set(CommandBufferState::Recording);
        self.in_render_pass = false;
        self.pass_color_formats = None;
        self.bound_pipeline = None;
        Ok(())
    }

    fn end(&mut self) -> RhiResult<()> {
        self.require_recording()?;
        if self.in_render_pass {
            return Err(RhiError::invalid_state(
                "cannot end a command buffer inside a render pass",
            ));
        }
        unsafe {
            self.device.end_command_buffer(self.cmd).map_err(vk_err)?;
        }
        self.state.set(CommandBufferState::Executable);
        Ok(())
    }

    fn begin_render_pass(&mut self, info: &RenderPassBeginInfo) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        let render_pass = info
            .render_pass
            .as_any()
            .downcast_ref::<VulkanRenderPass>()
            .ok_or_else(|| RhiError::invalid_argument("render pass is not a Vulkan pass"))?;
        let (framebuffer, clear_values) = self.framebuffer_for(render_pass, info)?;
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: info.width,
                    height: info.height,
                },
            })
            .clear_values(&clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(self.cmd, &begin_info, vk::SubpassContents::INLINE);
        }
        self.in_render_pass = true;
        self.pass_color_formats = Some(
            render_pass
                .info()
                .color_attachments
                .iter()
                .map(|a| a.format)
                .collect(),
        );
        Ok(())
    }

    fn end_render_pass(&mut self) -> RhiResult<()> {
        self.require_inside_render_pass()?;
        unsafe {
            self.device.cmd_end_render_pass(self.cmd);
        }
        self.in_render_pass = false;
        self.pass_color_formats = None;
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &dyn Pipeline) -> RhiResult<()> {
        self.require_recording()?;
        let vk_pipeline = pipeline
            .as_any()
            .downcast_ref::<VulkanPipeline>()
            .ok_or_else(|| RhiError::invalid_argument("pipeline is not a Vulkan pipeline"))?;
        match pipeline.kind() {
            PipelineKind::Graphics => {
                if let Some(pass_formats) = &self.pass_color_formats {
                    if pass_formats.as_slice() != pipeline.color_formats() {
                        return Err(RhiError::invalid_argument(
                            "pipeline color formats do not match the active render pass",
                        ));
                    }
                }
            }
            PipelineKind::Compute => {
                if self.in_render_pass {
                    return Err(RhiError::invalid_state(
                        "compute pipelines cannot be bound inside a render pass",
                    ));
                }
            }
        }
        unsafe {
            self.device
                .cmd_bind_pipeline(self.cmd, vk_pipeline.bind_point(), vk_pipeline.pipeline);
        }
        self.bound_pipeline = Some(pipeline.kind());
        Ok(())
    }

    fn bind_descriptor_set(
        &mut self,
        set_index: u32,
        set: &dyn DescriptorSet,
        pipeline: &dyn Pipeline,
    ) -> RhiResult<()> {
        self.require_recording()?;
        let vk_pipeline = pipeline
            .as_any()
            .downcast_ref::<VulkanPipeline>()
            .ok_or_else(|| RhiError::invalid_argument("pipeline is not a Vulkan pipeline"))?;
        let vk_set = set
            .as_any()
            .downcast_ref::<VulkanDescriptorSet>()
            .ok_or_else(|| RhiError::invalid_argument("descriptor set is not a Vulkan set"))?;
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk_pipeline.bind_point(),
                vk_pipeline.layout,
                set_index,
                &[vk_set.set],
                &[],
            );
        }
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, buffer: &dyn Buffer, offset: u64) -> RhiResult<()> {
        self.require_recording()?;
        let vk_buffer = buffer
            .as_any()
            .downcast_ref::<VulkanBuffer>()
            .ok_or_else(|| RhiError::invalid_argument("buffer is not a Vulkan buffer"))?;
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.cmd, 0, &[vk_buffer.buffer], &[offset]);
        }
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        buffer: &dyn Buffer,
        offset: u64,
        index_type: IndexType,
    ) -> RhiResult<()> {
        self.require_recording()?;
        let vk_buffer = buffer
            .as_any()
            .downcast_ref::<VulkanBuffer>()
            .ok_or_else(|| RhiError::invalid_argument("buffer is not a Vulkan buffer"))?;
        let vk_index_type = match index_type {
            IndexType::Uint16 => vk::IndexType::UINT16,
            IndexType::Uint32 => vk::IndexType::UINT32,
        };
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.cmd, vk_buffer.buffer, offset, vk_index_type);
        }
        Ok(())
    }

    fn set_viewport(
        &mut self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        min_depth: f32,
        max_depth: f32,
    ) -> RhiResult<()> {
        self.require_recording()?;
        let viewport = vk::Viewport::default()
            .x(x)
            .y(y)
            .width(width)
            .height(height)
            .min_depth(min_depth)
            .max_depth(max_depth);
        unsafe {
            self.device.cmd_set_viewport(self.cmd, 0, &[viewport]);
        }
        Ok(())
    }

    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) -> RhiResult<()> {
        self.require_recording()?;
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x, y },
            extent: vk::Extent2D { width, height },
        };
        unsafe {
            self.device.cmd_set_scissor(self.cmd, 0, &[scissor]);
        }
        Ok(())
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> RhiResult<()> {
        self.require_inside_render_pass()?;
        if self.bound_pipeline != Some(PipelineKind::Graphics) {
            return Err(RhiError::invalid_state("draw without a graphics pipeline"));
        }
        unsafe {
            self.device.cmd_draw(
                self.cmd,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> RhiResult<()> {
        self.require_inside_render_pass()?;
        if self.bound_pipeline != Some(PipelineKind::Graphics) {
            return Err(RhiError::invalid_state("draw without a graphics pipeline"));
        }
        unsafe {
            self.device.cmd_draw_indexed(
                self.cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
        Ok(())
    }

    fn dispatch(&mut self, group_x: u32, group_y: u32, group_z: u32) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        if self.bound_pipeline != Some(PipelineKind::Compute) {
            return Err(RhiError::invalid_state("dispatch without a compute pipeline"));
        }
        unsafe {
            self.device.cmd_dispatch(self.cmd, group_x, group_y, group_z);
        }
        Ok(())
    }

    fn blit_image(
        &mut self,
        src: &dyn Image,
        src_state: ResourceState,
        dst: &dyn Image,
        dst_state: ResourceState,
        filter: Filter,
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        // Move both images into transfer states first; the blit itself is
        // expressed in fixed layouts.
        self.barrier(
            &[],
            &[],
            &[
                ImageBarrier {
                    image: src,
                    old_state: src_state,
                    new_state: ResourceState::TransferSrc,
                    src_queue: None,
                    dst_queue: None,
                    subresource: None,
                },
                ImageBarrier {
                    image: dst,
                    old_state: dst_state,
                    new_state: ResourceState::TransferDst,
                    src_queue: None,
                    dst_queue: None,
                    subresource: None,
                },
            ],
        )?;
        let (src_image, _) = raw_image_handles(src)?;
        let (dst_image, _) = raw_image_handles(dst)?;
        let src_info = src.info();
        let dst_info = dst.info();
        let region = vk::ImageBlit::default()
            .src_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(aspect_for_format(src_info.format))
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: src_info.width as i32,
                    y: src_info.height as i32,
                    z: 1,
                },
            ])
            .dst_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(aspect_for_format(dst_info.format))
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: dst_info.width as i32,
                    y: dst_info.height as i32,
                    z: 1,
                },
            ]);
        unsafe {
            self.device.cmd_blit_image(
                self.cmd,
                src_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                filter_to_vk(filter),
            );
        }
        Ok(())
    }

    fn blit_image_region(
        &mut self,
        src: &dyn Image,
        src_mip: u32,
        src_extent: (u32, u32),
        dst: &dyn Image,
        dst_mip: u32,
        dst_extent: (u32, u32),
        filter: Filter,
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        let (src_image, _) = raw_image_handles(src)?;
        let (dst_image, _) = raw_image_handles(dst)?;
        let region = vk::ImageBlit::default()
            .src_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(aspect_for_format(src.info().format))
                    .mip_level(src_mip)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: src_extent.0.max(1) as i32,
                    y: src_extent.1.max(1) as i32,
                    z: 1,
                },
            ])
            .dst_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(aspect_for_format(dst.info().format))
                    .mip_level(dst_mip)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: dst_extent.0.max(1) as i32,
                    y: dst_extent.1.max(1) as i32,
                    z: 1,
                },
            ]);
        unsafe {
            self.device.cmd_blit_image(
                self.cmd,
                src_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                filter_to_vk(filter),
            );
        }
        Ok(())
    }

    fn barrier(
        &mut self,
        buffer_barriers: &[BufferBarrier],
        memory_barriers: &[MemoryBarrier],
        image_barriers: &[ImageBarrier],
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;

        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();

        let mut vk_image_barriers = Vec::new();
        for barrier in image_barriers {
            // Same-state transitions are permitted by contract and elided.
            if barrier.old_state == barrier.new_state {
                barrier.image.set_resource_state(barrier.new_state);
                continue;
            }
            vk_image_barriers.push(self.image_barrier_to_vk(barrier)?);
            src_stage |= state_to_stage(barrier.old_state, true);
            dst_stage |= state_to_stage(barrier.new_state, false);
            barrier.image.set_resource_state(barrier.new_state);
        }

        let mut vk_buffer_barriers = Vec::new();
        for barrier in buffer_barriers {
            if !barrier.new_state.valid_for_buffer() {
                return Err(RhiError::invalid_argument(format!(
                    "state {:?} is not valid for buffers",
                    barrier.new_state
                )));
            }
            if barrier.old_state == barrier.new_state {
                barrier.buffer.set_resource_state(barrier.new_state);
                continue;
            }
            let vk_buffer = barrier
                .buffer
                .as_any()
                .downcast_ref::<VulkanBuffer>()
                .ok_or_else(|| RhiError::invalid_argument("buffer is not a Vulkan buffer"))?;
            vk_buffer_barriers.push(
                vk::BufferMemoryBarrier::default()
                    .src_access_mask(state_to_access(barrier.old_state))
                    .dst_access_mask(state_to_access(barrier.new_state))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(vk_buffer.buffer)
                    .offset(0)
                    .size(vk::WHOLE_SIZE),
            );
            src_stage |= state_to_stage(barrier.old_state, true);
            dst_stage |= state_to_stage(barrier.new_state, false);
            barrier.buffer.set_resource_state(barrier.new_state);
        }

        let vk_memory_barriers: Vec<vk::MemoryBarrier> = memory_barriers
            .iter()
            .map(|barrier| {
                src_stage |= state_to_stage(barrier.old_state, true);
                dst_stage |= state_to_stage(barrier.new_state, false);
                vk::MemoryBarrier::default()
                    .src_access_mask(state_to_access(barrier.old_state))
                    .dst_access_mask(state_to_access(barrier.new_state))
            })
            .collect();

        if vk_image_barriers.is_empty()
            && vk_buffer_barriers.is_empty()
            && vk_memory_barriers.is_empty()
        {
            return Ok(());
        }
        if src_stage.is_empty() {
            src_stage = vk::PipelineStageFlags::TOP_OF_PIPE;
        }
        if dst_stage.is_empty() {
            dst_stage = vk::PipelineStageFlags::BOTTOM_OF_PIPE;
        }

        unsafe {
            self.device.cmd_pipeline_barrier(
                self.cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &vk_memory_barriers,
                &vk_buffer_barriers,
                &vk_image_barriers,
            );
        }
        Ok(())
    }

    fn push_constants(
        &mut self,
        pipeline: &dyn Pipeline,
        offset: u32,
        data: &[u8],
    ) -> RhiResult<()> {
        self.require_recording()?;
        let vk_pipeline = pipeline
            .as_any()
            .downcast_ref::<VulkanPipeline>()
            .ok_or_else(|| RhiError::invalid_argument("pipeline is not a Vulkan pipeline"))?;
        if offset + data.len() as u32 > vk_pipeline.push_size {
            return Err(RhiError::invalid_argument(
                "push constant range exceeds the pipeline's declared size",
            ));
        }
        unsafe {
            self.device.cmd_push_constants(
                self.cmd,
                vk_pipeline.layout,
                vk_pipeline.push_stages,
                offset,
                data,
            );
        }
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Buffer,
        dst_offset: u64,
        size: u64,
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        if src_offset + size > src.info().size || dst_offset + size > dst.info().size {
            return Err(RhiError::invalid_argument("buffer copy out of bounds"));
        }
        let vk_src = src
            .as_any()
            .downcast_ref::<VulkanBuffer>()
            .ok_or_else(|| RhiError::invalid_argument("source is not a Vulkan buffer"))?;
        let vk_dst = dst
            .as_any()
            .downcast_ref::<VulkanBuffer>()
            .ok_or_else(|| RhiError::invalid_argument("destination is not a Vulkan buffer"))?;
        let region = vk::BufferCopy::default()
            .src_offset(src_offset)
            .dst_offset(dst_offset)
            .size(size);
        unsafe {
            self.device
                .cmd_copy_buffer(self.cmd, vk_src.buffer, vk_dst.buffer, &[region]);
        }
        Ok(())
    }

    fn copy_buffer_to_image(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Image,
        mip_level: u32,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        let vk_src = src
            .as_any()
            .downcast_ref::<VulkanBuffer>()
            .ok_or_else(|| RhiError::invalid_argument("source is not a Vulkan buffer"))?;
        let (dst_image, _) = raw_image_handles(dst)?;
        let region = vk::BufferImageCopy::default()
            .buffer_offset(src_offset)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(aspect_for_format(dst.info().format))
                    .mip_level(mip_level)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.cmd,
                vk_src.buffer,
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
