//! D3D12 command recording, queue submission and synchronization.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use windows::core::Interface;
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::Graphics::Direct3D::{
    D3D_PRIMITIVE_TOPOLOGY_LINELIST, D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
    D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST, D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};

use crate::{
    Buffer, BufferBarrier, CommandBuffer, CommandBufferState, CommandPool, CommandStateCell,
    DescriptorSet, Fence, Filter, Format, Image, ImageBarrier, IndexType, MemoryBarrier, Pipeline,
    PipelineKind, PrimitiveTopology, Queue, QueuePresentInfo, QueueSubmitInfo, QueueType,
    RenderPassBeginInfo, ResourceState, RhiError, RhiResult, Semaphore,
};

use super::resources::{D3d12Buffer, D3d12DescriptorSet, D3d12Image, D3d12Pipeline};
use super::swapchain::D3d12Swapchain;
use super::{state_to_d3d12, win_err, D3d12Device};

pub struct D3d12CommandPool {
    pub(crate) allocator: ID3D12CommandAllocator,
}

unsafe impl Send for D3d12CommandPool {}
unsafe impl Sync for D3d12CommandPool {}

impl std::fmt::Debug for D3d12CommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12CommandPool").finish()
    }
}

impl CommandPool for D3d12CommandPool {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn create_command_pool(device: &D3d12Device) -> RhiResult<Box<dyn CommandPool>> {
    let allocator: ID3D12CommandAllocator = unsafe {
        device
            .device
            .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
            .map_err(win_err)?
    };
    Ok(Box::new(D3d12CommandPool { allocator }))
}

pub(crate) fn create_command_buffer(
    device: &D3d12Device,
    pool: &dyn CommandPool,
) -> RhiResult<Box<dyn CommandBuffer>> {
    let pool = pool
        .as_any()
        .downcast_ref::<D3d12CommandPool>()
        .ok_or_else(|| RhiError::invalid_argument("pool is not a D3D12 command pool"))?;
    let list: ID3D12GraphicsCommandList = unsafe {
        device
            .device
            .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &pool.allocator, None)
            .map_err(win_err)?
    };
    // Command lists are created open; park it closed to match Initial.
    unsafe { list.Close().map_err(win_err)? };
    Ok(Box::new(D3d12CommandBuffer {
        list,
        allocator: pool.allocator.clone(),
        view_arena: Arc::clone(&device.view_arena),
        sampler_arena: Arc::clone(&device.sampler_arena),
        rtv_arena: Arc::clone(&device.rtv_arena),
        dsv_arena: Arc::clone(&device.dsv_arena),
        state: CommandStateCell::new(),
        in_render_pass: false,
        pass_color_formats: None,
        bound_pipeline: None,
        vertex_stride: 0,
    }))
}

pub struct D3d12CommandBuffer {
    pub(crate) list: ID3D12GraphicsCommandList,
    allocator: ID3D12CommandAllocator,
    view_arena: Arc<super::DescriptorArena>,
    sampler_arena: Arc<super::DescriptorArena>,
    rtv_arena: Arc<super::DescriptorArena>,
    dsv_arena: Arc<super::DescriptorArena>,
    pub(crate) state: CommandStateCell,
    in_render_pass: bool,
    pass_color_formats: Option<Vec<Format>>,
    bound_pipeline: Option<PipelineKind>,
    vertex_stride: u32,
}

unsafe impl Send for D3d12CommandBuffer {}
unsafe impl Sync for D3d12CommandBuffer {}

impl std::fmt::Debug for D3d12CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12CommandBuffer")
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl D3d12CommandBuffer {
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

    fn transition(
        &self,
        resource: &ID3D12Resource,
        old_state: ResourceState,
        new_state: ResourceState,
        is_depth: bool,
    ) {
        let before = state_to_d3d12(old_state, is_depth);
        let after = state_to_d3d12(new_state, is_depth);
        if before == after {
            return;
        }
        let barrier = D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: std::mem::ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                    pResource: unsafe { std::mem::transmute_copy(resource) },
                    Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                    StateBefore: before,
                    StateAfter: after,
                }),
            },
        };
        unsafe {
            self.list.ResourceBarrier(&[barrier]);
        }
    }
}

fn image_resource<'a>(image: &'a dyn Image) -> RhiResult<&'a ID3D12Resource> {
    if let Some(image) = image.as_any().downcast_ref::<D3d12Image>() {
        return Ok(&image.resource);
    }
    if let Some(image) = image
        .as_any()
        .downcast_ref::<super::swapchain::D3d12SwapchainImage>()
    {
        return Ok(&image.resource);
    }
    Err(RhiError::invalid_argument(
        "image does not belong to the D3D12 backend",
    ))
}

fn image_rtv(image: &dyn Image, arena: &super::DescriptorArena) -> RhiResult<D3D12_CPU_DESCRIPTOR_HANDLE> {
    if let Some(image) = image.as_any().downcast_ref::<D3d12Image>() {
        let index = image
            .rtv_index
            .ok_or_else(|| RhiError::invalid_argument("image is not a color attachment"))?;
        return Ok(arena.cpu_at(index));
    }
    if let Some(image) = image
        .as_any()
        .downcast_ref::<super::swapchain::D3d12SwapchainImage>()
    {
        return Ok(arena.cpu_at(image.rtv_index));
    }
    Err(RhiError::invalid_argument(
        "image does not belong to the D3D12 backend",
    ))
}

impl CommandBuffer for D3d12CommandBuffer {
    fn state(&self) -> CommandBufferState {
        self.state.get()
    }

    fn begin(&mut self) -> RhiResult<()> {
        if self.state.get() == CommandBufferState::Recording {
            return Err(RhiError::invalid_state("command buffer already recording"));
        }
        unsafe {
            self.allocator.Reset().map_err(win_err)?;
            self.list.Reset(&self.allocator, None).map_err(win_err)?;
            let heaps = [
                Some(self.view_arena.heap.clone()),
                Some(self.sampler_arena.heap.clone()),
            ];
            self.list.SetDescriptorHeaps(&heaps);
        }
        self.state.set(CommandBufferState::Recording);
        self.in_render_pass = false;
        self.pass_color_formats = None;
        self.bound_pipeline = None;
        self.vertex_stride = 0;
        Ok(())
    }

    fn end(&mut self) -> RhiResult<()> {
        self.require_recording()?;
        if self.in_render_pass {
            return Err(RhiError::invalid_state(
                "cannot end a command buffer inside a render pass",
            ));
        }
        unsafe { self.list.Close().map_err(win_err)? };
        self.state.set(CommandBufferState::Executable);
        Ok(())
    }

    fn begin_render_pass(&mut self, info: &RenderPassBeginInfo) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        let mut rtvs = Vec::with_capacity(info.color_attachments.len());
        for binding in &info.color_attachments {
            let image = binding.image.as_ref().ok_or_else(|| {
                RhiError::invalid_argument("render pass color attachment has no bound image")
            })?;
            let rtv = image_rtv(image.as_ref(), &self.rtv_arena)?;
            if binding.load_op == crate::LoadOp::Clear {
                unsafe {
                    self.list.ClearRenderTargetView(rtv, &binding.clear_value, None);
                }
            }
            rtvs.push(rtv);
        }
        let dsv = match &info.depth_stencil {
            Some(depth) => {
                let image = depth.image.as_ref().ok_or_else(|| {
                    RhiError::invalid_argument("render pass depth attachment has no bound image")
                })?;
                let image = image
                    .as_any()
                    .downcast_ref::<D3d12Image>()
                    .ok_or_else(|| RhiError::invalid_argument("depth image is not a D3D12 image"))?;
                let index = image.dsv_index.ok_or_else(|| {
                    RhiError::invalid_argument("image is not a depth attachment")
                })?;
                let dsv = self.dsv_arena.cpu_at(index);
                if depth.load_op == crate::LoadOp::Clear {
                    unsafe {
                        self.list.ClearDepthStencilView(
                            dsv,
                            D3D12_CLEAR_FLAG_DEPTH,
                            depth.clear_value.depth,
                            depth.clear_value.stencil as u8,
                            &[],
                        );
                    }
                }
                Some(dsv)
            }
            None => None,
        };
        unsafe {
            self.list.OMSetRenderTargets(
                rtvs.len() as u32,
                Some(rtvs.as_ptr()),
                false,
                dsv.as_ref().map(|d| d as *const _),
            );
        }
        self.in_render_pass = true;
        self.pass_color_formats = Some(
            info.render_pass
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
        self.in_render_pass = false;
        self.pass_color_formats = None;
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &dyn Pipeline) -> RhiResult<()> {
        self.require_recording()?;
        let d3d12 = pipeline
            .as_any()
            .downcast_ref::<D3d12Pipeline>()
            .ok_or_else(|| RhiError::invalid_argument("pipeline is not a D3D12 pipeline"))?;
        match pipeline.kind() {
            PipelineKind::Graphics => {
                if let Some(pass_formats) = &self.pass_color_formats {
                    if pass_formats.as_slice() != pipeline.color_formats() {
                        return Err(RhiError::invalid_argument(
                            "pipeline color formats do not match the active render pass",
                        ));
                    }
                }
                unsafe {
                    self.list.SetGraphicsRootSignature(&d3d12.root_signature);
                    self.list.SetPipelineState(&d3d12.pipeline);
                    self.list.IASetPrimitiveTopology(match d3d12.topology {
                        PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
                        PrimitiveTopology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
                        PrimitiveTopology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
                        PrimitiveTopology::PointList => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
                    });
                }
            }
            PipelineKind::Compute => {
                if self.in_render_pass {
                    return Err(RhiError::invalid_state(
                        "compute pipelines cannot be bound inside a render pass",
                    ));
                }
                unsafe {
                    self.list.SetComputeRootSignature(&d3d12.root_signature);
                    self.list.SetPipelineState(&d3d12.pipeline);
                }
            }
        }
        self.bound_pipeline = Some(pipeline.kind());
        self.vertex_stride = d3d12.vertex_stride;
        Ok(())
    }

    fn bind_descriptor_set(
        &mut self,
        set_index: u32,
        set: &dyn DescriptorSet,
        pipeline: &dyn Pipeline,
    ) -> RhiResult<()> {
        self.require_recording()?;
        let d3d12_pipeline = pipeline
            .as_any()
            .downcast_ref::<D3d12Pipeline>()
            .ok_or_else(|| RhiError::invalid_argument("pipeline is not a D3D12 pipeline"))?;
        let d3d12_set = set
            .as_any()
            .downcast_ref::<D3d12DescriptorSet>()
            .ok_or_else(|| RhiError::invalid_argument("descriptor set is not a D3D12 set"))?;
        let (view_param, sampler_param) = d3d12_pipeline
            .tables
            .get(set_index as usize)
            .copied()
            .ok_or_else(|| RhiError::invalid_argument("set index exceeds the root signature"))?;
        unsafe {
            if let (Some(param), Some(base)) = (view_param, d3d12_set.view_base) {
                let handle = self.view_arena.gpu_at(base);
                match d3d12_pipeline.kind() {
                    PipelineKind::Graphics => {
                        self.list.SetGraphicsRootDescriptorTable(param, handle)
                    }
                    PipelineKind::Compute => {
                        self.list.SetComputeRootDescriptorTable(param, handle)
                    }
                }
            }
            if let (Some(param), Some(base)) = (sampler_param, d3d12_set.sampler_base) {
                let handle = self.sampler_arena.gpu_at(base);
                match d3d12_pipeline.kind() {
                    PipelineKind::Graphics => {
                        self.list.SetGraphicsRootDescriptorTable(param, handle)
                    }
                    PipelineKind::Compute => {
                        self.list.SetComputeRootDescriptorTable(param, handle)
                    }
                }
            }
        }
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, buffer: &dyn Buffer, offset: u64) -> RhiResult<()> {
        self.require_recording()?;
        let d3d12 = buffer
            .as_any()
            .downcast_ref::<D3d12Buffer>()
            .ok_or_else(|| RhiError::invalid_argument("buffer is not a D3D12 buffer"))?;
        let view = D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: unsafe { d3d12.resource.GetGPUVirtualAddress() } + offset,
            SizeInBytes: (buffer.info().size - offset) as u32,
            StrideInBytes: self.vertex_stride,
        };
        unsafe {
            self.list.IASetVertexBuffers(0, Some(&[view]));
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
        let d3d12 = buffer
            .as_any()
            .downcast_ref::<D3d12Buffer>()
            .ok_or_else(|| RhiError::invalid_argument("buffer is not a D3D12 buffer"))?;
        let view = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: unsafe { d3d12.resource.GetGPUVirtualAddress() } + offset,
            SizeInBytes: (buffer.info().size - offset) as u32,
            Format: match index_type {
                IndexType::Uint16 => windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_R16_UINT,
                IndexType::Uint32 => windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_R32_UINT,
            },
        };
        unsafe {
            self.list.IASetIndexBuffer(Some(&view));
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
        let viewport = D3D12_VIEWPORT {
            TopLeftX: x,
            TopLeftY: y,
            Width: width,
            Height: height,
            MinDepth: min_depth,
            MaxDepth: max_depth,
        };
        unsafe {
            self.list.RSSetViewports(&[viewport]);
        }
        Ok(())
    }

    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) -> RhiResult<()> {
        self.require_recording()?;
        let rect = windows::Win32::Foundation::RECT {
            left: x,
            top: y,
            right: x + width as i32,
            bottom: y + height as i32,
        };
        unsafe {
            self.list.RSSetScissorRects(&[rect]);
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
            self.list
                .DrawInstanced(vertex_count, instance_count, first_vertex, first_instance);
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
            self.list.DrawIndexedInstanced(
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
            self.list.Dispatch(group_x, group_y, group_z);
        }
        Ok(())
    }

    fn blit_image(
        &mut self,
        src: &dyn Image,
        src_state: ResourceState,
        dst: &dyn Image,
        dst_state: ResourceState,
        _filter: Filter,
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        // Transition to transfer states, then copy the top subresource.
        // CopyTextureRegion does not scale; matching extents are assumed, as
        // with a full-surface blit.
        let src_resource = image_resource(src)?;
        let dst_resource = image_resource(dst)?;
        self.transition(src_resource, src_state, ResourceState::TransferSrc, false);
        self.transition(dst_resource, dst_state, ResourceState::TransferDst, false);
        src.set_resource_state(ResourceState::TransferSrc);
        dst.set_resource_state(ResourceState::TransferDst);
        let src_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(src_resource) },
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: 0 },
        };
        let dst_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(dst_resource) },
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: 0 },
        };
        unsafe {
            self.list
                .CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
        }
        Ok(())
    }

    fn blit_image_region(
        &mut self,
        src: &dyn Image,
        src_mip: u32,
        _src_extent: (u32, u32),
        dst: &dyn Image,
        dst_mip: u32,
        _dst_extent: (u32, u32),
        _filter: Filter,
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        let src_resource = image_resource(src)?;
        let dst_resource = image_resource(dst)?;
        let src_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(src_resource) },
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                SubresourceIndex: src_mip,
            },
        };
        let dst_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(dst_resource) },
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                SubresourceIndex: dst_mip,
            },
        };
        unsafe {
            self.list
                .CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
        }
        Ok(())
    }

    fn barrier(
        &mut self,
        buffer_barriers: &[BufferBarrier],
        _memory_barriers: &[MemoryBarrier],
        image_barriers: &[ImageBarrier],
    ) -> RhiResult<()> {
        self.require_outside_render_pass()?;
        for barrier in image_barriers {
            let resource = image_resource(barrier.image)?;
            let is_depth = barrier.image.info().format.is_depth();
            self.transition(resource, barrier.old_state, barrier.new_state, is_depth);
            barrier.image.set_resource_state(barrier.new_state);
        }
        for barrier in buffer_barriers {
            if !barrier.new_state.valid_for_buffer() {
                return Err(RhiError::invalid_argument(format!(
                    "state {:?} is not valid for buffers",
                    barrier.new_state
                )));
            }
            let buffer = barrier
                .buffer
                .as_any()
                .downcast_ref::<D3d12Buffer>()
                .ok_or_else(|| RhiError::invalid_argument("buffer is not a D3D12 buffer"))?;
            self.transition(&buffer.resource, barrier.old_state, barrier.new_state, false);
            barrier.buffer.set_resource_state(barrier.new_state);
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
        let d3d12 = pipeline
            .as_any()
            .downcast_ref::<D3d12Pipeline>()
            .ok_or_else(|| RhiError::invalid_argument("pipeline is not a D3D12 pipeline"))?;
        if offset + data.len() as u32 > d3d12.push_size {
            return Err(RhiError::invalid_argument(
                "push constant range exceeds the pipeline's declared size",
            ));
        }
        let param = d3d12.push_constant_param.ok_or_else(|| {
            RhiError::invalid_argument("pipeline declares no push constants")
        })?;
        unsafe {
            match d3d12.kind() {
                PipelineKind::Graphics => self.list.SetGraphicsRoot32BitConstants(
                    param,
                    (data.len() as u32).div_ceil(4),
                    data.as_ptr().cast(),
                    offset / 4,
                ),
                PipelineKind::Compute => self.list.SetComputeRoot32BitConstants(
                    param,
                    (data.len() as u32).div_ceil(4),
                    data.as_ptr().cast(),
                    offset / 4,
                ),
            }
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
        let src = src
            .as_any()
            .downcast_ref::<D3d12Buffer>()
            .ok_or_else(|| RhiError::invalid_argument("source is not a D3D12 buffer"))?;
        let dst = dst
            .as_any()
            .downcast_ref::<D3d12Buffer>()
            .ok_or_else(|| RhiError::invalid_argument("destination is not a D3D12 buffer"))?;
        unsafe {
            self.list
                .CopyBufferRegion(&dst.resource, dst_offset, &src.resource, src_offset, size);
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
        let src = src
            .as_any()
            .downcast_ref::<D3d12Buffer>()
            .ok_or_else(|| RhiError::invalid_argument("source is not a D3D12 buffer"))?;
        let dst_resource = image_resource(dst)?;
        let block = dst.info().format.block_size().max(1);
        let src_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(&src.resource) },
            Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                    Offset: src_offset,
                    Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                        Format: super::format_to_dxgi(dst.info().format),
                        Width: width,
                        Height: height,
                        Depth: 1,
                        RowPitch: (width * block)
                            .next_multiple_of(D3D12_TEXTURE_DATA_PITCH_ALIGNMENT),
                    },
                },
            },
        };
        let dst_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(dst_resource) },
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                SubresourceIndex: mip_level,
            },
        };
        unsafe {
            self.list
                .CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct D3d12Queue {
    queue: ID3D12CommandQueue,
    fence: ID3D12Fence,
    next_value: AtomicU64,
}

unsafe impl Send for D3d12Queue {}
unsafe impl Sync for D3d12Queue {}

impl D3d12Queue {
    pub(crate) fn new(device: &D3d12Device) -> Self {
        let fence: ID3D12Fence = unsafe {
            device
                .device
                .CreateFence(0, D3D12_FENCE_FLAG_NONE)
                .expect("queue fence")
        };
        D3d12Queue {
            queue: device.queue.clone(),
            fence,
            next_value: AtomicU64::new(1),
        }
    }

    fn wait_value(&self, value: u64) -> RhiResult<()> {
        unsafe {
            if self.fence.GetCompletedValue() < value {
                let event = CreateEventW(None, false, false, None).map_err(win_err)?;
                self.fence
                    .SetEventOnCompletion(value, event)
                    .map_err(win_err)?;
                WaitForSingleObject(event, INFINITE);
                let _ = CloseHandle(event);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for D3d12Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12Queue").finish()
    }
}

impl Queue for D3d12Queue {
    fn queue_type(&self) -> QueueType {
        QueueType::Graphics
    }

    fn submit(&self, info: &QueueSubmitInfo) -> RhiResult<()> {
        let mut lists = Vec::with_capacity(info.command_buffers.len());
        for cmd in info.command_buffers {
            let cmd = cmd
                .as_any()
                .downcast_ref::<D3d12CommandBuffer>()
                .ok_or_else(|| RhiError::invalid_argument("command buffer is not a D3D12 list"))?;
            if cmd.state.get() != CommandBufferState::Executable {
                return Err(RhiError::invalid_state(
                    "submitted command buffer is not executable",
                ));
            }
            lists.push(Some(cmd.list.cast::<ID3D12CommandList>().map_err(win_err)?));
        }
        unsafe {
            self.queue.ExecuteCommandLists(&lists);
        }
        for cmd in info.command_buffers {
            if let Some(cmd) = cmd.as_any().downcast_ref::<D3d12CommandBuffer>() {
                cmd.state.set(CommandBufferState::Pending);
            }
        }
        if let Some(fence) = info.signal_fence {
            if let Some(fence) = fence.as_any().downcast_ref::<D3d12Fence>() {
                let value = fence.next_value.fetch_add(1, Ordering::Relaxed) + 1;
                unsafe {
                    self.queue.Signal(&fence.fence, value).map_err(win_err)?;
                }
                fence.pending_value.store(value, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn present(&self, info: &QueuePresentInfo) -> RhiResult<()> {
        let swapchain = info
            .swapchain
            .as_any()
            .downcast_ref::<D3d12Swapchain>()
            .ok_or_else(|| RhiError::invalid_argument("swapchain is not a D3D12 swapchain"))?;
        swapchain.present()
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let value = self.next_value.fetch_add(1, Ordering::Relaxed);
        unsafe {
            self.queue.Signal(&self.fence, value).map_err(win_err)?;
        }
        self.wait_value(value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct D3d12Fence {
    pub(crate) fence: ID3D12Fence,
    pub(crate) next_value: AtomicU64,
    pub(crate) pending_value: AtomicU64,
}

unsafe impl Send for D3d12Fence {}
unsafe impl Sync for D3d12Fence {}

pub(crate) fn create_fence(device: &D3d12Device, signaled: bool) -> RhiResult<Box<dyn Fence>> {
    let initial = if signaled { 1 } else { 0 };
    let fence: ID3D12Fence = unsafe {
        device
            .device
            .CreateFence(initial, D3D12_FENCE_FLAG_NONE)
            .map_err(win_err)?
    };
    Ok(Box::new(D3d12Fence {
        fence,
        next_value: AtomicU64::new(initial),
        pending_value: AtomicU64::new(initial),
    }))
}

impl std::fmt::Debug for D3d12Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12Fence").finish()
    }
}

impl Fence for D3d12Fence {
    fn wait(&self) -> RhiResult<()> {
        let value = self.pending_value.load(Ordering::Relaxed);
        unsafe {
            if self.fence.GetCompletedValue() < value {
                let event = CreateEventW(None, false, false, None).map_err(win_err)?;
                self.fence
                    .SetEventOnCompletion(value, event)
                    .map_err(win_err)?;
                WaitForSingleObject(event, INFINITE);
                let _ = CloseHandle(event);
            }
        }
        Ok(())
    }

    fn reset(&self) -> RhiResult<()> {
        // Monotonic fence values; nothing to clear.
        Ok(())
    }

    fn is_signaled(&self) -> bool {
        let value = self.pending_value.load(Ordering::Relaxed);
        unsafe { self.fence.GetCompletedValue() >= value }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Single in-order queue: GPU-GPU ordering holds by construction.
#[derive(Debug)]
pub struct D3d12Semaphore;

impl Semaphore for D3d12Semaphore {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
