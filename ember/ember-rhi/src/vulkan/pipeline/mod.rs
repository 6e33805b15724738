mod compute;
mod graphics;

pub(crate) use compute::create_compute_pipeline;
pub(crate) use graphics::create_graphics_pipeline;

use std::any::Any;
use std::sync::Arc;

use ash::vk;

use crate::reflection::ShaderReflection;
use crate::{Format, Pipeline, PipelineKind, RhiResult};

use super::{descriptor::VulkanDescriptorSetLayout, vk_err};

/// Pipeline layout derived from the descriptor set layouts plus one merged
/// push-constant range from reflection.
pub(crate) fn create_pipeline_layout(
    device: &ash::Device,
    set_layout: &VulkanDescriptorSetLayout,
    reflection: &ShaderReflection,
) -> RhiResult<(vk::PipelineLayout, vk::ShaderStageFlags, u32)> {
    let push_size = reflection.push_constant_size();
    let mut push_stages = vk::ShaderStageFlags::empty();
    for range in &reflection.push_constants {
        if range.stages.contains(crate::ShaderStages::VERTEX) {
            push_stages |= vk::ShaderStageFlags::VERTEX;
        }
        if range.stages.contains(crate::ShaderStages::FRAGMENT) {
            push_stages |= vk::ShaderStageFlags::FRAGMENT;
        }
        if range.stages.contains(crate::ShaderStages::COMPUTE) {
            push_stages |= vk::ShaderStageFlags::COMPUTE;
        }
    }
    let push_range = vk::PushConstantRange::default()
        .stage_flags(push_stages)
        .offset(0)
        .size(push_size);
    let mut create_info =
        vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layout.vk_layouts);
    if push_size > 0 {
        create_info = create_info.push_constant_ranges(std::slice::from_ref(&push_range));
    }
    let layout = unsafe {
        device
            .create_pipeline_layout(&create_info, None)
            .map_err(vk_err)?
    };
    Ok((layout, push_stages, push_size))
}

pub struct VulkanPipeline {
    pub(crate) device: Arc<ash::Device>,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) push_stages: vk::ShaderStageFlags,
    pub(crate) push_size: u32,
    kind: PipelineKind,
    color_formats: Vec<Format>,
    /// Compatible render pass created only when the caller supplied none.
    pub(crate) owned_render_pass: vk::RenderPass,
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
            if self.owned_render_pass != vk::RenderPass::null() {
                self.device.destroy_render_pass(self.owned_render_pass, None);
            }
        }
    }
}

impl std::fmt::Debug for VulkanPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanPipeline")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl VulkanPipeline {
    pub(crate) fn new(
        device: Arc<ash::Device>,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        push_stages: vk::ShaderStageFlags,
        push_size: u32,
        kind: PipelineKind,
        color_formats: Vec<Format>,
        owned_render_pass: vk::RenderPass,
    ) -> Self {
        Self {
            device,
            pipeline,
            layout,
            push_stages,
            push_size,
            kind,
            color_formats,
            owned_render_pass,
        }
    }

    pub(crate) fn bind_point(&self) -> vk::PipelineBindPoint {
        match self.kind {
            PipelineKind::Graphics => vk::PipelineBindPoint::GRAPHICS,
            PipelineKind::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }
}

impl Pipeline for VulkanPipeline {
    fn kind(&self) -> PipelineKind {
        self.kind
    }

    fn color_formats(&self) -> &[Format] {
        &self.color_formats
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
