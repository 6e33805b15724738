//! Vulkan shader: one VkShaderModule per stage plus the merged reflection.

use std::any::Any;
use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use crate::reflection::ShaderReflection;
use crate::{RhiError, RhiResult, Shader, ShaderInfo, ShaderModuleInfo, ShaderStages};

use super::vk_err;

pub(crate) struct StageModule {
    pub module: vk::ShaderModule,
    pub entry_point: CString,
    pub stage: vk::ShaderStageFlags,
}

pub(crate) fn create_shader(device: Arc<ash::Device>, info: &ShaderInfo) -> RhiResult<VulkanShader> {
    if info.vertex.is_none() && info.compute.is_none() {
        return Err(RhiError::invalid_argument(
            "shader requires a vertex or compute stage",
        ));
    }
    let mut reflection = ShaderReflection::default();
    let mut modules = Vec::new();
    let stage_list: [(&Option<ShaderModuleInfo>, vk::ShaderStageFlags); 3] = [
        (&info.vertex, vk::ShaderStageFlags::VERTEX),
        (&info.fragment, vk::ShaderStageFlags::FRAGMENT),
        (&info.compute, vk::ShaderStageFlags::COMPUTE),
    ];
    for (stage_info, stage) in stage_list {
        let Some(stage_info) = stage_info else {
            continue;
        };
        reflection.merge(&stage_info.reflection)?;
        modules.push(StageModule {
            module: create_shader_module(&device, &stage_info.bytecode)?,
            entry_point: CString::new(stage_info.entry_point.as_str())
                .map_err(|_| RhiError::invalid_argument("entry point contains a NUL byte"))?,
            stage,
        });
    }
    Ok(VulkanShader {
        device,
        modules,
        stages: info.stages(),
        reflection,
    })
}

fn create_shader_module(device: &ash::Device, bytecode: &[u8]) -> RhiResult<vk::ShaderModule> {
    if bytecode.is_empty() || bytecode.len() % 4 != 0 {
        return Err(RhiError::invalid_argument(
            "SPIR-V bytecode must be nonempty and 4-byte aligned",
        ));
    }
    let code_u32: Vec<u32> = bytecode
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let create_info = vk::ShaderModuleCreateInfo::default().code(&code_u32);
    unsafe { device.create_shader_module(&create_info, None).map_err(vk_err) }
}

pub struct VulkanShader {
    device: Arc<ash::Device>,
    pub(crate) modules: Vec<StageModule>,
    stages: ShaderStages,
    reflection: ShaderReflection,
}

impl Drop for VulkanShader {
    fn drop(&mut self) {
        for stage in &self.modules {
            unsafe {
                self.device.destroy_shader_module(stage.module, None);
            }
        }
    }
}

impl std::fmt::Debug for VulkanShader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanShader")
            .field("stages", &self.stages)
            .finish()
    }
}

impl Shader for VulkanShader {
    fn stages(&self) -> ShaderStages {
        self.stages
    }

    fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
