//! Vulkan graphics pipeline creation.

use std::sync::Arc;

use ash::vk;

use crate::{
    AttachmentInfo, BlendOp, CompareOp, CullMode, Format, FrontFace, LoadOp, PipelineInfo,
    PipelineKind, PolygonMode, PrimitiveTopology, RenderPass, RenderPassInfo, ResourceState,
    RhiError, RhiResult, VertexFormat, VertexInputRate,
};

use super::super::descriptor::VulkanDescriptorSetLayout;
use super::super::render_pass::{create_raw_render_pass, VulkanRenderPass};
use super::super::shader::VulkanShader;
use super::super::{sample_count_to_vk, vk_err};
use super::{create_pipeline_layout, VulkanPipeline};

pub(crate) fn create_graphics_pipeline(
    device: Arc<ash::Device>,
    info: &PipelineInfo,
) -> RhiResult<VulkanPipeline> {
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

    // Tie the pipeline to the caller's render pass when given; otherwise
    // synthesize a compatible pass from the declared format lists.
    let (render_pass, owned_render_pass) = match info.render_pass {
        Some(render_pass) => {
            let vk_pass = render_pass
                .as_any()
                .downcast_ref::<VulkanRenderPass>()
                .ok_or_else(|| RhiError::invalid_argument("render pass is not a Vulkan pass"))?;
            let pass_formats: Vec<Format> = vk_pass
                .info()
                .color_attachments
                .iter()
                .map(|a| a.format)
                .collect();
            if pass_formats != info.color_attachment_formats {
                return Err(RhiError::invalid_argument(
                    "pipeline color attachment formats do not match the render pass",
                ));
            }
            (vk_pass.render_pass, vk::RenderPass::null())
        }
        None => {
            let compatible = RenderPassInfo {
                width: 0,
                height: 0,
                color_attachments: info
                    .color_attachment_formats
                    .iter()
                    .map(|format| AttachmentInfo {
                        format: *format,
                        sample_count: info.sample_count,
                        load_op: LoadOp::DontCare,
                        initial_state: ResourceState::ColorAttachment,
                    })
                    .collect(),
                depth_stencil: info.depth_stencil_format.map(|format| AttachmentInfo {
                    format,
                    sample_count: info.sample_count,
                    load_op: LoadOp::DontCare,
                    initial_state: ResourceState::DepthStencilWrite,
                }),
            };
            let pass = create_raw_render_pass(&device, &compatible)?;
            (pass, pass)
        }
    };

    let destroy_owned = |device: &ash::Device| {
        if owned_render_pass != vk::RenderPass::null() {
            unsafe { device.destroy_render_pass(owned_render_pass, None) };
        }
    };

    let (pipeline_layout, push_stages, push_size) =
        match create_pipeline_layout(&device, set_layout, info.shader.reflection()) {
            Ok(result) => result,
            Err(err) => {
                destroy_owned(&device);
                return Err(err);
            }
        };

    let stages: Vec<vk::PipelineShaderStageCreateInfo> = shader
        .modules
        .iter()
        .filter(|m| m.stage != vk::ShaderStageFlags::COMPUTE)
        .map(|m| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(m.stage)
                .module(m.module)
                .name(&m.entry_point)
        })
        .collect();

    let binding_descriptions: Vec<vk::VertexInputBindingDescription> = info
        .vertex_layout
        .bindings
        .iter()
        .map(|b| {
            vk::VertexInputBindingDescription::default()
                .binding(b.binding)
                .stride(b.stride)
                .input_rate(match b.input_rate {
                    VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
                    VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
                })
        })
        .collect();
    let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = info
        .vertex_layout
        .attributes
        .iter()
        .map(|a| {
            vk::VertexInputAttributeDescription::default()
                .location(a.location)
                .binding(a.binding)
                .format(vertex_format_to_vk(a.format))
                .offset(a.offset)
        })
        .collect();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(topology_to_vk(info.topology))
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(polygon_mode_to_vk(info.rasterizer.polygon_mode))
        .line_width(1.0)
        .cull_mode(cull_mode_to_vk(info.rasterizer.cull_mode))
        .front_face(front_face_to_vk(info.rasterizer.front_face))
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(sample_count_to_vk(info.sample_count));

    let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = info
        .color_attachment_formats
        .iter()
        .map(|_| match &info.blend_state {
            None => vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(false)
                .color_write_mask(vk::ColorComponentFlags::RGBA),
            Some(blend) => vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(blend_factor_to_vk(blend.color.src_factor))
                .dst_color_blend_factor(blend_factor_to_vk(blend.color.dst_factor))
                .color_blend_op(blend_op_to_vk(blend.color.operation))
                .src_alpha_blend_factor(blend_factor_to_vk(blend.alpha.src_factor))
                .dst_alpha_blend_factor(blend_factor_to_vk(blend.alpha.dst_factor))
                .alpha_blend_op(blend_op_to_vk(blend.alpha.operation))
                .color_write_mask(vk::ColorComponentFlags::RGBA),
        })
        .collect();
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let depth_stencil = if info.depth_state.depth_test || info.depth_state.depth_write {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(info.depth_state.depth_test)
            .depth_write_enable(info.depth_state.depth_write)
            .depth_compare_op(compare_op_to_vk(info.depth_state.compare_op))
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
    } else {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .stencil_test_enable(false)
    };

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blend)
        .depth_stencil_state(&depth_stencil)
        .dynamic_state(&dynamic_state)
        .layout(pipeline_layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_partial, result)| {
                destroy_owned(&device);
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
        PipelineKind::Graphics,
        info.color_attachment_formats.clone(),
        owned_render_pass,
    ))
}

fn vertex_format_to_vk(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32 => vk::Format::R32_SFLOAT,
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Uint32 => vk::Format::R32_UINT,
    }
}

fn topology_to_vk(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
    }
}

fn polygon_mode_to_vk(mode: PolygonMode) -> vk::PolygonMode {
    match mode {
        PolygonMode::Fill => vk::PolygonMode::FILL,
        PolygonMode::Line => vk::PolygonMode::LINE,
    }
}

fn cull_mode_to_vk(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::Front => vk::CullModeFlags::FRONT,
    }
}

fn front_face_to_vk(face: FrontFace) -> vk::FrontFace {
    match face {
        FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
    }
}

fn blend_factor_to_vk(factor: crate::BlendFactor) -> vk::BlendFactor {
    match factor {
        crate::BlendFactor::One => vk::BlendFactor::ONE,
        crate::BlendFactor::Zero => vk::BlendFactor::ZERO,
        crate::BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        crate::BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        crate::BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        crate::BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

fn blend_op_to_vk(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
    }
}

fn compare_op_to_vk(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}
