//! Shader reflection metadata and the name-to-slot descriptor resolver.
//!
//! Descriptor writes are addressed by the binding name the offline shader
//! pipeline reflected, never by raw slot numbers. Every backend funnels its
//! `update_descriptor_set` through [`resolve_writes`] so validation behaves
//! identically across APIs: resolution happens for the whole batch before a
//! single native write is emitted, which keeps the set unmodified when any
//! write in the batch is ill-formed.

use crate::{DescriptorWrite, RhiError, RhiResult, ShaderStages};

/// Kind of resource a binding expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    StorageBuffer,
    SampledImage,
    StorageImage,
    Sampler,
    CombinedImageSampler,
}

impl DescriptorKind {
    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            DescriptorKind::UniformBuffer | DescriptorKind::StorageBuffer
        )
    }

    pub fn is_image(self) -> bool {
        matches!(
            self,
            DescriptorKind::SampledImage
                | DescriptorKind::StorageImage
                | DescriptorKind::CombinedImageSampler
        )
    }

    pub fn is_sampler(self) -> bool {
        matches!(
            self,
            DescriptorKind::Sampler | DescriptorKind::CombinedImageSampler
        )
    }
}

/// One reflected binding: name, set/binding slots, kind and array count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingReflection {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    pub kind: DescriptorKind,
    pub array_count: u32,
    pub stages: ShaderStages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    pub offset: u32,
    pub size: u32,
    pub stages: ShaderStages,
}

/// Reflection table for one shader stage, or the merged table of a whole
/// shader after [`ShaderReflection::merge`].
#[derive(Debug, Clone, Default)]
pub struct ShaderReflection {
    pub bindings: Vec<BindingReflection>,
    pub push_constants: Vec<PushConstantRange>,
}

impl ShaderReflection {
    /// Merge another stage's table into this one. Bindings with the same name
    /// must agree on slot and kind; their stage masks are OR-ed together.
    pub fn merge(&mut self, other: &ShaderReflection) -> RhiResult<()> {
        for binding in &other.bindings {
            match self.bindings.iter_mut().find(|b| b.name == binding.name) {
                Some(existing) => {
                    if existing.set != binding.set
                        || existing.binding != binding.binding
                        || existing.kind != binding.kind
                    {
                        return Err(RhiError::invalid_argument(format!(
                            "binding '{}' reflected inconsistently across stages",
                            binding.name
                        )));
                    }
                    existing.stages |= binding.stages;
                    existing.array_count = existing.array_count.max(binding.array_count);
                }
                None => self.bindings.push(binding.clone()),
            }
        }
        for range in &other.push_constants {
            match self
                .push_constants
                .iter_mut()
                .find(|r| r.offset == range.offset && r.size == range.size)
            {
                Some(existing) => existing.stages |= range.stages,
                None => self.push_constants.push(*range),
            }
        }
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&BindingReflection> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// Total push-constant byte size, for pipeline layout creation.
    pub fn push_constant_size(&self) -> u32 {
        self.push_constants
            .iter()
            .map(|r| r.offset + r.size)
            .max()
            .unwrap_or(0)
    }
}

/// A descriptor write resolved against a layout's reflection table.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedWrite {
    pub set: u32,
    pub binding: u32,
    pub kind: DescriptorKind,
    pub count: u32,
}

/// Resolve a whole batch of writes against `bindings`. Fails with
/// `InvalidArgument` (leaving the set untouched, since the caller has not
/// emitted anything yet) when a name is unknown, the payload does not match
/// the binding's kind, or the payload exceeds the binding's array count.
pub fn resolve_writes(
    bindings: &[BindingReflection],
    set_index: u32,
    writes: &[DescriptorWrite],
) -> RhiResult<Vec<ResolvedWrite>> {
    let mut resolved = Vec::with_capacity(writes.len());
    for write in writes {
        let binding = bindings
            .iter()
            .find(|b| b.name == write.descriptor_name)
            .ok_or_else(|| {
                RhiError::invalid_argument(format!(
                    "unknown descriptor name '{}'",
                    write.descriptor_name
                ))
            })?;
        if binding.set != set_index {
            return Err(RhiError::invalid_argument(format!(
                "descriptor '{}' belongs to set {}, not set {}",
                write.descriptor_name, binding.set, set_index
            )));
        }
        let count = match binding.kind {
            k if k.is_buffer() => {
                if !write.images.is_empty() || !write.samplers.is_empty() {
                    return Err(kind_mismatch(write.descriptor_name, k));
                }
                write.buffers.len()
            }
            DescriptorKind::Sampler => {
                if !write.buffers.is_empty() || !write.images.is_empty() {
                    return Err(kind_mismatch(write.descriptor_name, binding.kind));
                }
                write.samplers.len()
            }
            DescriptorKind::CombinedImageSampler => {
                if !write.buffers.is_empty()
                    || write.images.is_empty()
                    || write.images.len() != write.samplers.len()
                {
                    return Err(kind_mismatch(write.descriptor_name, binding.kind));
                }
                write.images.len()
            }
            k => {
                if !write.buffers.is_empty() || !write.samplers.is_empty() {
                    return Err(kind_mismatch(write.descriptor_name, k));
                }
                write.images.len()
            }
        };
        if count == 0 {
            return Err(RhiError::invalid_argument(format!(
                "descriptor write '{}' carries no descriptors",
                write.descriptor_name
            )));
        }
        if count as u32 > binding.array_count {
            return Err(RhiError::invalid_argument(format!(
                "descriptor write '{}' supplies {} elements but the binding holds {}",
                write.descriptor_name, count, binding.array_count
            )));
        }
        resolved.push(ResolvedWrite {
            set: binding.set,
            binding: binding.binding,
            kind: binding.kind,
            count: count as u32,
        });
    }
    Ok(resolved)
}

fn kind_mismatch(name: &str, kind: DescriptorKind) -> RhiError {
    RhiError::invalid_argument(format!(
        "descriptor write '{name}' does not match binding kind {kind:?}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> Vec<BindingReflection> {
        vec![
            BindingReflection {
                name: "ubo".to_string(),
                set: 0,
                binding: 0,
                kind: DescriptorKind::UniformBuffer,
                array_count: 1,
                stages: ShaderStages::VERTEX,
            },
            BindingReflection {
                name: "u_textures".to_string(),
                set: 0,
                binding: 1,
                kind: DescriptorKind::SampledImage,
                array_count: 4,
                stages: ShaderStages::FRAGMENT,
            },
        ]
    }

    #[test]
    fn unknown_name_is_invalid_argument() {
        let writes = [DescriptorWrite {
            descriptor_name: "nope",
            buffers: &[],
            images: &[],
            samplers: &[],
        }];
        let err = resolve_writes(&bindings(), 0, &writes).unwrap_err();
        assert!(matches!(err, RhiError::InvalidArgument(_)));
    }

    #[test]
    fn merge_unions_stages() {
        let mut vs = ShaderReflection {
            bindings: vec![BindingReflection {
                name: "ubo".to_string(),
                set: 0,
                binding: 0,
                kind: DescriptorKind::UniformBuffer,
                array_count: 1,
                stages: ShaderStages::VERTEX,
            }],
            push_constants: vec![],
        };
        let fs = ShaderReflection {
            bindings: vec![BindingReflection {
                name: "ubo".to_string(),
                set: 0,
                binding: 0,
                kind: DescriptorKind::UniformBuffer,
                array_count: 1,
                stages: ShaderStages::FRAGMENT,
            }],
            push_constants: vec![],
        };
        vs.merge(&fs).unwrap();
        assert_eq!(vs.bindings.len(), 1);
        assert_eq!(
            vs.bindings[0].stages,
            ShaderStages::VERTEX | ShaderStages::FRAGMENT
        );
    }

    #[test]
    fn merge_rejects_conflicting_slots() {
        let mut vs = ShaderReflection {
            bindings: vec![BindingReflection {
                name: "ubo".to_string(),
                set: 0,
                binding: 0,
                kind: DescriptorKind::UniformBuffer,
                array_count: 1,
                stages: ShaderStages::VERTEX,
            }],
            push_constants: vec![],
        };
        let fs = ShaderReflection {
            bindings: vec![BindingReflection {
                name: "ubo".to_string(),
                set: 1,
                binding: 0,
                kind: DescriptorKind::UniformBuffer,
                array_count: 1,
                stages: ShaderStages::FRAGMENT,
            }],
            push_constants: vec![],
        };
        assert!(vs.merge(&fs).is_err());
    }
}
