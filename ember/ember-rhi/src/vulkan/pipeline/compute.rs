//! Vulkan compute pipeline creation.

use std::sync::Arc;

use ash::vk;

use crate::{ComputePipelineInfo, PipelineKind, RhiError, RhiResult, ShaderStages};

use super::super::descriptor::VulkanDescriptorSetLayout;
use super::super::shader::VulkanShader;
use super::super::vk_err;
use super::{create_pipeline_layout, VulkanPipeline};

pub(crate) fn create_compute_pipeline(
    device: Arc<ash::Device>,
    info: &ComputePipelineInfo,
) -> RhiResult<VulkanPipeline> {
    if !info.shader.stages().contains(ShaderStages::COMPUTE) {
        return Err(RhiError::invalid_argument(
            "compute pipeline requires a compute stage",
        ));
    }
    let shader = info
        .shader
        .as_any()
        .downcast_ref::<VulkanShader>()
        .ok_or_else(|| RhiError::invalid_argument("shader is not a Vulkan shader"))?;
    let set_layout = info
        .descriptor_set_layout
        .as_any()
        .downcast_ref::<VulkanDescriptorSetLayout>()
        .ok_or_else(|| {
            RhiError::invalid_argument("layout is not a Vulkan descriptor set layout")
        })?;
    let stage = shader
        .modules
        .iter()
        .find(|m| m.stage == vk::ShaderStageFlags::COMPUTE)
        .ok_or_else(|| RhiError::invalid_argument("shader has no compute module"))?;

    let (pipeline_layout, push_stages, push_size) =
        create_pipeline_layout(&device, set_layout, info.shader.reflection())?;

    let stage_info = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(stage.module)
        .name(&stage.entry_point);
    let create_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage_info)
        .layout(pipeline_layout);

    let pipelines = unsafe {
        device
            .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
            .map_err(|(_partial, result)| {
                unsafe { device.destroy_pipeline_layout(pipeline_layout, None) };
                vk_err(result)
            })?
    };

    Ok(VulkanPipeline::new(
        Arc::clone(&device),
        pipelines[0],
        pipeline_layout,
        push_stages,
        push_size,
        PipelineKind::Compute,
        Vec::new(),
        vk::RenderPass::null(),
    ))
}
