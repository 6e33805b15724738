//! D3D12 resources: committed buffers and images, samplers, shaders,
//! reflection-derived root signatures and descriptor tables, pipelines.

use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::reflection::{resolve_writes, BindingReflection, DescriptorKind, ShaderReflection};
use crate::{
    AddressMode, Buffer, BufferInfo, CompareOp, ComputePipelineInfo, DescriptorSet,
    DescriptorSetLayout, DescriptorWrite, Filter, Format, Image, ImageInfo, MemoryDomain, Pipeline,
    PipelineInfo, PipelineKind, PrimitiveTopology, RenderPass, RenderPassInfo, ResourceId,
    ResourceState, RhiError, RhiResult, Sampler, SamplerInfo, Shader, ShaderInfo, ShaderStages,
    StateCell, VertexFormat, VertexInputRate,
};

use super::{format_to_dxgi, win_err, D3d12Device, DescriptorArena};

pub struct D3d12Buffer {
    pub(crate) resource: ID3D12Resource,
    info: BufferInfo,
    state: StateCell,
    id: ResourceId,
    allocations: Arc<AtomicI64>,
}

unsafe impl Send for D3d12Buffer {}
unsafe impl Sync for D3d12Buffer {}

pub(crate) fn create_buffer(device: &D3d12Device, info: &BufferInfo) -> RhiResult<Arc<dyn Buffer>> {
    if info.size == 0 {
        return Err(RhiError::invalid_argument("buffer size must be nonzero"));
    }
    let heap_type = match info.memory_domain {
        MemoryDomain::DeviceLocal => D3D12_HEAP_TYPE_DEFAULT,
        MemoryDomain::Upload => D3D12_HEAP_TYPE_UPLOAD,
        MemoryDomain::Readback => D3D12_HEAP_TYPE_READBACK,
    };
    let heap_props = D3D12_HEAP_PROPERTIES {
        Type: heap_type,
        ..Default::default()
    };
    let desc = D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Width: info.size,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DXGI_FORMAT_UNKNOWN,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        Flags: if info.usage.contains(crate::BufferUsage::STORAGE) {
            D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS
        } else {
            D3D12_RESOURCE_FLAG_NONE
        },
        ..Default::default()
    };
    let initial_state = match info.memory_domain {
        MemoryDomain::Upload => D3D12_RESOURCE_STATE_GENERIC_READ,
        MemoryDomain::Readback => D3D12_RESOURCE_STATE_COPY_DEST,
        MemoryDomain::DeviceLocal => D3D12_RESOURCE_STATE_COMMON,
    };
    let mut resource: Option<ID3D12Resource> = None;
    unsafe {
        device
            .device
            .CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &desc,
                initial_state,
                None,
                &mut resource,
            )
            .map_err(win_err)?;
    }
    let resource = resource.ok_or(RhiError::OutOfDeviceMemory)?;
    device.allocation_counter().fetch_add(1, Ordering::Relaxed);
    Ok(Arc::new(D3d12Buffer {
        resource,
        info: info.clone(),
        state: StateCell::new(ResourceState::Undefined),
        id: device.next_id(),
        allocations: Arc::clone(device.allocation_counter()),
    }))
}

impl Drop for D3d12Buffer {
    fn drop(&mut self) {
        self.allocations.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for D3d12Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12Buffer")
            .field("id", &self.id)
            .field("size", &self.info.size)
            .finish()
    }
}

impl Buffer for D3d12Buffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn info(&self) -> &BufferInfo {
        &self.info
    }

    fn resource_state(&self) -> ResourceState {
        self.state.get()
    }

    fn set_resource_state(&self, state: ResourceState) {
        self.state.set(state);
    }

    fn map(&self) -> RhiResult<*mut u8> {
        if self.info.memory_domain == MemoryDomain::DeviceLocal {
            return Err(RhiError::invalid_argument(
                "device-local buffers cannot be mapped",
            ));
        }
        let mut ptr = std::ptr::null_mut();
        unsafe {
            self.resource.Map(0, None, Some(&mut ptr)).map_err(win_err)?;
        }
        Ok(ptr.cast::<u8>())
    }

    fn unmap(&self) {
        unsafe {
            self.resource.Unmap(0, None);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct D3d12Image {
    pub(crate) resource: ID3D12Resource,
    info: ImageInfo,
    state: StateCell,
    id: ResourceId,
    /// RTV or DSV slot in the device arena, allocated for attachment usage.
    pub(crate) rtv_index: Option<u32>,
    pub(crate) dsv_index: Option<u32>,
    allocations: Arc<AtomicI64>,
}

unsafe impl Send for D3d12Image {}
unsafe impl Sync for D3d12Image {}

pub(crate) fn create_image(device: &D3d12Device, info: &ImageInfo) -> RhiResult<Arc<dyn Image>> {
    if info.width == 0 || info.height == 0 {
        return Err(RhiError::invalid_argument("image extent must be nonzero"));
    }
    if info.format == Format::Undefined {
        return Err(RhiError::invalid_argument("image format must be specified"));
    }
    if info.mip_levels == 0 || info.layer_count == 0 {
        return Err(RhiError::invalid_argument(
            "image mip_levels and layer_count must be nonzero",
        ));
    }
    let is_depth = info.format.is_depth();
    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if info.usage.contains(crate::ImageUsage::COLOR_ATTACHMENT) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
    }
    if info.usage.contains(crate::ImageUsage::DEPTH_STENCIL_ATTACHMENT) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
    }
    if info.usage.contains(crate::ImageUsage::STORAGE) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }
    let desc = D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
        Width: info.width as u64,
        Height: info.height,
        DepthOrArraySize: info.layer_count as u16,
        MipLevels: info.mip_levels as u16,
        Format: format_to_dxgi(info.format),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: info.sample_count.max(1),
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
        Flags: flags,
        ..Default::default()
    };
    let heap_props = D3D12_HEAP_PROPERTIES {
        Type: D3D12_HEAP_TYPE_DEFAULT,
        ..Default::default()
    };
    let clear_value = D3D12_CLEAR_VALUE {
        Format: format_to_dxgi(info.format),
        Anonymous: if is_depth {
            D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                    Depth: 1.0,
                    Stencil: 0,
                },
            }
        } else {
            D3D12_CLEAR_VALUE_0 {
                Color: [0.0, 0.0, 0.0, 1.0],
            }
        },
    };
    let wants_clear = info
        .usage
        .intersects(crate::ImageUsage::COLOR_ATTACHMENT | crate::ImageUsage::DEPTH_STENCIL_ATTACHMENT);
    let mut resource: Option<ID3D12Resource> = None;
    unsafe {
        device
            .device
            .CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &desc,
                D3D12_RESOURCE_STATE_COMMON,
                wants_clear.then_some(&clear_value as *const _),
                &mut resource,
            )
            .map_err(win_err)?;
    }
    let resource = resource.ok_or(RhiError::OutOfDeviceMemory)?;

    let rtv_index = if info.usage.contains(crate::ImageUsage::COLOR_ATTACHMENT) {
        let index = device.rtv_arena.allocate(1)?;
        unsafe {
            device
                .device
                .CreateRenderTargetView(&resource, None, device.rtv_arena.cpu_at(index));
        }
        Some(index)
    } else {
        None
    };
    let dsv_index = if info.usage.contains(crate::ImageUsage::DEPTH_STENCIL_ATTACHMENT) {
        let index = device.dsv_arena.allocate(1)?;
        unsafe {
            device
                .device
                .CreateDepthStencilView(&resource, None, device.dsv_arena.cpu_at(index));
        }
        Some(index)
    } else {
        None
    };

    device.allocation_counter().fetch_add(1, Ordering::Relaxed);
    Ok(Arc::new(D3d12Image {
        resource,
        info: info.clone(),
        state: StateCell::new(ResourceState::Undefined),
        id: device.next_id(),
        rtv_index,
        dsv_index,
        allocations: Arc::clone(device.allocation_counter()),
    }))
}

impl Drop for D3d12Image {
    fn drop(&mut self) {
        self.allocations.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for D3d12Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12Image")
            .field("id", &self.id)
            .field("extent", &(self.info.width, self.info.height))
            .finish()
    }
}

impl Image for D3d12Image {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn info(&self) -> &ImageInfo {
        &self.info
    }

    fn resource_state(&self) -> ResourceState {
        self.state.get()
    }

    fn set_resource_state(&self, state: ResourceState) {
        self.state.set(state);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct D3d12Sampler {
    /// Slot in the shader-visible sampler arena; copied into sets on update.
    pub(crate) sampler_index: u32,
}

impl std::fmt::Debug for D3d12Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12Sampler").finish()
    }
}

pub(crate) fn create_sampler(
    device: &D3d12Device,
    info: &SamplerInfo,
) -> RhiResult<Arc<dyn Sampler>> {
    fn address(mode: AddressMode) -> D3D12_TEXTURE_ADDRESS_MODE {
        match mode {
            AddressMode::Repeat => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
            AddressMode::MirroredRepeat => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
            AddressMode::ClampToEdge => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
            AddressMode::ClampToBorder => D3D12_TEXTURE_ADDRESS_MODE_BORDER,
        }
    }
    let filter = match (info.min_filter, info.mag_filter, info.mipmap_mode) {
        (Filter::Nearest, Filter::Nearest, Filter::Nearest) => D3D12_FILTER_MIN_MAG_MIP_POINT,
        (Filter::Linear, Filter::Linear, Filter::Linear) => D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        _ => D3D12_FILTER_MIN_MAG_LINEAR_MIP_POINT,
    };
    let desc = D3D12_SAMPLER_DESC {
        Filter: filter,
        AddressU: address(info.address_mode_u),
        AddressV: address(info.address_mode_v),
        AddressW: address(info.address_mode_w),
        MinLOD: info.min_lod,
        MaxLOD: info.max_lod,
        ..Default::default()
    };
    let index = device.sampler_arena.allocate(1)?;
    unsafe {
        device
            .device
            .CreateSampler(&desc, device.sampler_arena.cpu_at(index));
    }
    Ok(Arc::new(D3d12Sampler {
        sampler_index: index,
    }))
}

impl Sampler for D3d12Sampler {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct D3d12Shader {
    pub(crate) vertex: Option<Vec<u8>>,
    pub(crate) fragment: Option<Vec<u8>>,
    pub(crate) compute: Option<Vec<u8>>,
    stages: ShaderStages,
    reflection: ShaderReflection,
}

impl std::fmt::Debug for D3d12Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12Shader")
            .field("stages", &self.stages)
            .finish()
    }
}

pub(crate) fn create_shader(info: &ShaderInfo) -> RhiResult<Arc<dyn Shader>> {
    if info.vertex.is_none() && info.compute.is_none() {
        return Err(RhiError::invalid_argument(
            "shader requires a vertex or compute stage",
        ));
    }
    let mut reflection = ShaderReflection::default();
    for module in [&info.vertex, &info.fragment, &info.compute]
        .into_iter()
        .flatten()
    {
        reflection.merge(&module.reflection)?;
    }
    Ok(Arc::new(D3d12Shader {
        vertex: info.vertex.as_ref().map(|m| m.bytecode.clone()),
        fragment: info.fragment.as_ref().map(|m| m.bytecode.clone()),
        compute: info.compute.as_ref().map(|m| m.bytecode.clone()),
        stages: info.stages(),
        reflection,
    }))
}

impl Shader for D3d12Shader {
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

/// Per-set table layout inside the root signature: one CBV/SRV/UAV table and
/// one sampler table per set index, in set order, followed by one
/// root-constants parameter when the shader declares push constants.
pub(crate) struct SetTables {
    pub view_param: Option<u32>,
    pub sampler_param: Option<u32>,
    /// Offset of each binding inside the set's view block, by binding name.
    pub view_offsets: Vec<(String, u32)>,
    pub sampler_offsets: Vec<(String, u32)>,
    pub view_count: u32,
    pub sampler_count: u32,
}

pub struct D3d12DescriptorSetLayout {
    pub(crate) root_signature: ID3D12RootSignature,
    pub(crate) tables: Vec<SetTables>,
    pub(crate) push_constant_param: Option<u32>,
    bindings: Vec<BindingReflection>,
}

unsafe impl Send for D3d12DescriptorSetLayout {}
unsafe impl Sync for D3d12DescriptorSetLayout {}

impl std::fmt::Debug for D3d12DescriptorSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12DescriptorSetLayout")
            .field("binding_count", &self.bindings.len())
            .finish()
    }
}

pub(crate) fn create_descriptor_set_layout(
    device: &D3d12Device,
    reflection: &ShaderReflection,
) -> RhiResult<Arc<dyn DescriptorSetLayout>> {
    let max_set = reflection.bindings.iter().map(|b| b.set).max().unwrap_or(0);
    let mut tables = Vec::new();
    let mut params: Vec<D3D12_ROOT_PARAMETER> = Vec::new();
    // Range arrays must outlive the serialize call.
    let mut range_storage: Vec<Vec<D3D12_DESCRIPTOR_RANGE>> = Vec::new();

    for set in 0..=max_set {
        let mut view_ranges = Vec::new();
        let mut sampler_ranges = Vec::new();
        let mut view_offsets = Vec::new();
        let mut sampler_offsets = Vec::new();
        let mut view_count = 0u32;
        let mut sampler_count = 0u32;
        let mut set_bindings: Vec<&BindingReflection> =
            reflection.bindings.iter().filter(|b| b.set == set).collect();
        set_bindings.sort_by_key(|b| b.binding);
        for binding in set_bindings {
            let range_type = match binding.kind {
                DescriptorKind::UniformBuffer => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
                DescriptorKind::StorageBuffer | DescriptorKind::StorageImage => {
                    D3D12_DESCRIPTOR_RANGE_TYPE_UAV
                }
                DescriptorKind::SampledImage | DescriptorKind::CombinedImageSampler => {
                    D3D12_DESCRIPTOR_RANGE_TYPE_SRV
                }
                DescriptorKind::Sampler => D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
            };
            if range_type == D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER {
                sampler_ranges.push(D3D12_DESCRIPTOR_RANGE {
                    RangeType: range_type,
                    NumDescriptors: binding.array_count,
                    BaseShaderRegister: binding.binding,
                    RegisterSpace: set,
                    OffsetInDescriptorsFromTableStart: sampler_count,
                });
                sampler_offsets.push((binding.name.clone(), sampler_count));
                sampler_count += binding.array_count;
            } else {
                view_ranges.push(D3D12_DESCRIPTOR_RANGE {
                    RangeType: range_type,
                    NumDescriptors: binding.array_count,
                    BaseShaderRegister: binding.binding,
                    RegisterSpace: set,
                    OffsetInDescriptorsFromTableStart: view_count,
                });
                view_offsets.push((binding.name.clone(), view_count));
                view_count += binding.array_count;
            }
        }

        let view_param = if !view_ranges.is_empty() {
            range_storage.push(view_ranges);
            let ranges = range_storage.last().unwrap();
            params.push(D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                        NumDescriptorRanges: ranges.len() as u32,
                        pDescriptorRanges: ranges.as_ptr(),
                    },
                },
                ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
            });
            Some(params.len() as u32 - 1)
        } else {
            None
        };
        let sampler_param = if !sampler_ranges.is_empty() {
            range_storage.push(sampler_ranges);
            let ranges = range_storage.last().unwrap();
            params.push(D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                        NumDescriptorRanges: ranges.len() as u32,
                        pDescriptorRanges: ranges.as_ptr(),
                    },
                },
                ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
            });
            Some(params.len() as u32 - 1)
        } else {
            None
        };
        tables.push(SetTables {
            view_param,
            sampler_param,
            view_offsets,
            sampler_offsets,
            view_count,
            sampler_count,
        });
    }

    let push_size = reflection.push_constant_size();
    let push_constant_param = if push_size > 0 {
        params.push(D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                Constants: D3D12_ROOT_CONSTANTS {
                    ShaderRegister: 0,
                    RegisterSpace: 999,
                    Num32BitValues: push_size.div_ceil(4),
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        });
        Some(params.len() as u32 - 1)
    } else {
        None
    };

    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: params.len() as u32,
        pParameters: params.as_ptr(),
        NumStaticSamplers: 0,
        pStaticSamplers: std::ptr::null(),
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
    };
    let mut blob = None;
    unsafe {
        D3D12SerializeRootSignature(&desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut blob, None)
            .map_err(win_err)?;
    }
    let blob = blob.ok_or_else(|| RhiError::Backend("root signature serialization".into()))?;
    let root_signature: ID3D12RootSignature = unsafe {
        let bytes = std::slice::from_raw_parts(
            blob.GetBufferPointer().cast::<u8>(),
            blob.GetBufferSize(),
        );
        device.device.CreateRootSignature(0, bytes).map_err(win_err)?
    };

    Ok(Arc::new(D3d12DescriptorSetLayout {
        root_signature,
        tables,
        push_constant_param,
        bindings: reflection.bindings.clone(),
    }))
}

impl DescriptorSetLayout for D3d12DescriptorSetLayout {
    fn bindings(&self) -> &[BindingReflection] {
        &self.bindings
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct D3d12DescriptorSet {
    set_index: u32,
    bindings: Vec<BindingReflection>,
    pub(crate) view_base: Option<u32>,
    pub(crate) sampler_base: Option<u32>,
    view_offsets: Vec<(String, u32)>,
    sampler_offsets: Vec<(String, u32)>,
}

impl std::fmt::Debug for D3d12DescriptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12DescriptorSet")
            .field("set_index", &self.set_index)
            .finish()
    }
}

pub(crate) fn create_descriptor_set(
    device: &D3d12Device,
    layout: &dyn DescriptorSetLayout,
    set_index: u32,
) -> RhiResult<Box<dyn DescriptorSet>> {
    let layout = layout
        .as_any()
        .downcast_ref::<D3d12DescriptorSetLayout>()
        .ok_or_else(|| RhiError::invalid_argument("layout is not a D3D12 layout"))?;
    let tables = layout
        .tables
        .get(set_index as usize)
        .ok_or_else(|| RhiError::invalid_argument(format!("layout has no set index {set_index}")))?;
    let view_base = if tables.view_count > 0 {
        Some(device.view_arena.allocate(tables.view_count)?)
    } else {
        None
    };
    let sampler_base = if tables.sampler_count > 0 {
        Some(device.sampler_arena.allocate(tables.sampler_count)?)
    } else {
        None
    };
    Ok(Box::new(D3d12DescriptorSet {
        set_index,
        bindings: layout.bindings.clone(),
        view_base,
        sampler_base,
        view_offsets: tables.view_offsets.clone(),
        sampler_offsets: tables.sampler_offsets.clone(),
    }))
}

impl DescriptorSet for D3d12DescriptorSet {
    fn set_index(&self) -> u32 {
        self.set_index
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn update_descriptor_set(
    device: &D3d12Device,
    set: &mut dyn DescriptorSet,
    writes: &[DescriptorWrite],
) -> RhiResult<()> {
    let set = set
        .as_any()
        .downcast_ref::<D3d12DescriptorSet>()
        .ok_or_else(|| RhiError::invalid_argument("descriptor set is not a D3D12 set"))?;
    let resolved = resolve_writes(&set.bindings, set.set_index, writes)?;

    for (write, resolved) in writes.iter().zip(&resolved) {
        match resolved.kind {
            DescriptorKind::Sampler => {
                let base = set
                    .sampler_base
                    .ok_or_else(|| RhiError::invalid_argument("set holds no samplers"))?;
                let offset = table_offset(&set.sampler_offsets, write.descriptor_name)?;
                for (i, binding) in write.samplers.iter().enumerate() {
                    let sampler = binding
                        .sampler
                        .as_any()
                        .downcast_ref::<D3d12Sampler>()
                        .ok_or_else(|| {
                            RhiError::invalid_argument("sampler is not a D3D12 sampler")
                        })?;
                    copy_descriptor(
                        device,
                        &device.sampler_arena,
                        base + offset + i as u32,
                        sampler.sampler_index,
                        D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
                    );
                }
            }
            kind => {
                let base = set
                    .view_base
                    .ok_or_else(|| RhiError::invalid_argument("set holds no views"))?;
                let offset = table_offset(&set.view_offsets, write.descriptor_name)?;
                if kind.is_buffer() {
                    for (i, binding) in write.buffers.iter().enumerate() {
                        let buffer = binding
                            .buffer
                            .as_any()
                            .downcast_ref::<D3d12Buffer>()
                            .ok_or_else(|| {
                                RhiError::invalid_argument("buffer is not a D3D12 buffer")
                            })?;
                        write_buffer_view(
                            device,
                            base + offset + i as u32,
                            kind,
                            buffer,
                            binding.offset,
                            binding.range,
                        )?;
                    }
                } else {
                    for (i, binding) in write.images.iter().enumerate() {
                        let image = binding
                            .image
                            .as_any()
                            .downcast_ref::<D3d12Image>()
                            .ok_or_else(|| {
                                RhiError::invalid_argument("image is not a D3D12 image")
                            })?;
                        write_image_view(device, base + offset + i as u32, kind, image);
                    }
                }
            }
        }
    }
    Ok(())
}

fn table_offset(offsets: &[(String, u32)], name: &str) -> RhiResult<u32> {
    offsets
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, offset)| *offset)
        .ok_or_else(|| RhiError::invalid_argument(format!("unknown descriptor name '{name}'")))
}

fn copy_descriptor(
    device: &D3d12Device,
    arena: &DescriptorArena,
    dst_index: u32,
    src_index: u32,
    kind: D3D12_DESCRIPTOR_HEAP_TYPE,
) {
    unsafe {
        device.device.CopyDescriptorsSimple(
            1,
            arena.cpu_at(dst_index),
            arena.cpu_at(src_index),
            kind,
        );
    }
}

fn write_buffer_view(
    device: &D3d12Device,
    index: u32,
    kind: DescriptorKind,
    buffer: &D3d12Buffer,
    offset: u64,
    range: u64,
) -> RhiResult<()> {
    let size = if range > 0 {
        range
    } else {
        buffer.info.size - offset
    };
    match kind {
        DescriptorKind::UniformBuffer => {
            let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
                BufferLocation: unsafe { buffer.resource.GetGPUVirtualAddress() } + offset,
                SizeInBytes: (size as u32).next_multiple_of(256),
            };
            unsafe {
                device
                    .device
                    .CreateConstantBufferView(Some(&desc), device.view_arena.cpu_at(index));
            }
        }
        DescriptorKind::StorageBuffer => {
            let desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                Format: DXGI_FORMAT_R32_TYPELESS,
                ViewDimension: D3D12_UAV_DIMENSION_BUFFER,
                Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                    Buffer: D3D12_BUFFER_UAV {
                        FirstElement: offset / 4,
                        NumElements: (size / 4) as u32,
                        StructureByteStride: 0,
                        CounterOffsetInBytes: 0,
                        Flags: D3D12_BUFFER_UAV_FLAG_RAW,
                    },
                },
            };
            unsafe {
                device.device.CreateUnorderedAccessView(
                    &buffer.resource,
                    None,
                    Some(&desc),
                    device.view_arena.cpu_at(index),
                );
            }
        }
        _ => return Err(RhiError::invalid_argument("buffer bound to image binding")),
    }
    Ok(())
}

fn write_image_view(device: &D3d12Device, index: u32, kind: DescriptorKind, image: &D3d12Image) {
    match kind {
        DescriptorKind::StorageImage => unsafe {
            device.device.CreateUnorderedAccessView(
                &image.resource,
                None,
                None,
                device.view_arena.cpu_at(index),
            );
        },
        _ => unsafe {
            device.device.CreateShaderResourceView(
                &image.resource,
                None,
                device.view_arena.cpu_at(index),
            );
        },
    }
}

pub struct D3d12RenderPass {
    pub(crate) info: RenderPassInfo,
}

impl std::fmt::Debug for D3d12RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12RenderPass")
            .field("color_attachments", &self.info.color_attachments.len())
            .finish()
    }
}

impl RenderPass for D3d12RenderPass {
    fn info(&self) -> &RenderPassInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct D3d12Pipeline {
    pub(crate) pipeline: ID3D12PipelineState,
    pub(crate) root_signature: ID3D12RootSignature,
    pub(crate) tables: Vec<(Option<u32>, Option<u32>)>,
    pub(crate) push_constant_param: Option<u32>,
    pub(crate) push_size: u32,
    pub(crate) topology: PrimitiveTopology,
    /// Stride of vertex binding 0; vertex buffer views need it at bind time.
    pub(crate) vertex_stride: u32,
    kind: PipelineKind,
    color_formats: Vec<Format>,
}

unsafe impl Send for D3d12Pipeline {}
unsafe impl Sync for D3d12Pipeline {}

impl std::fmt::Debug for D3d12Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12Pipeline")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Pipeline for D3d12Pipeline {
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

fn vertex_format_to_dxgi(format: VertexFormat) -> DXGI_FORMAT {
    match format {
        VertexFormat::Float32 => DXGI_FORMAT_R32_FLOAT,
        VertexFormat::Float32x2 => DXGI_FORMAT_R32G32_FLOAT,
        VertexFormat::Float32x3 => DXGI_FORMAT_R32G32B32_FLOAT,
        VertexFormat::Float32x4 => DXGI_FORMAT_R32G32B32A32_FLOAT,
        VertexFormat::Uint32 => DXGI_FORMAT_R32_UINT,
    }
}

fn compare_op_to_d3d12(op: CompareOp) -> D3D12_COMPARISON_FUNC {
    match op {
        CompareOp::Never => D3D12_COMPARISON_FUNC_NEVER,
        CompareOp::Less => D3D12_COMPARISON_FUNC_LESS,
        CompareOp::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        CompareOp::LessOrEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        CompareOp::Greater => D3D12_COMPARISON_FUNC_GREATER,
        CompareOp::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
        CompareOp::GreaterOrEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        CompareOp::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

pub(crate) fn create_graphics_pipeline(
    device: &D3d12Device,
    info: &PipelineInfo,
) -> RhiResult<Arc<dyn Pipeline>> {
    let shader = info
        .shader
        .as_any()
        .downcast_ref::<D3d12Shader>()
        .ok_or_else(|| RhiError::invalid_argument("shader is not a D3D12 shader"))?;
    let layout = info
        .descriptor_set_layout
        .as_any()
        .downcast_ref::<D3d12DescriptorSetLayout>()
        .ok_or_else(|| RhiError::invalid_argument("layout is not a D3D12 layout"))?;
    if let Some(render_pass) = info.render_pass {
        let pass_formats: Vec<Format> = render_pass
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
    }
    let vertex = shader
        .vertex
        .as_ref()
        .ok_or_else(|| RhiError::invalid_argument("graphics pipeline requires a vertex stage"))?;

    let semantic = windows::core::s!("ATTRIBUTE");
    let input_elements: Vec<D3D12_INPUT_ELEMENT_DESC> = info
        .vertex_layout
        .attributes
        .iter()
        .map(|attribute| D3D12_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR(semantic.as_ptr()),
            SemanticIndex: attribute.location,
            Format: vertex_format_to_dxgi(attribute.format),
            InputSlot: attribute.binding,
            AlignedByteOffset: attribute.offset,
            InputSlotClass: match info
                .vertex_layout
                .bindings
                .iter()
                .find(|b| b.binding == attribute.binding)
                .map(|b| b.input_rate)
            {
                Some(VertexInputRate::Instance) => D3D12_INPUT_CLASSIFICATION_PER_INSTANCE_DATA,
                _ => D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            },
            InstanceDataStepRate: 0,
        })
        .collect();

    let mut desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
        pRootSignature: unsafe { std::mem::transmute_copy(&layout.root_signature) },
        VS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: vertex.as_ptr().cast(),
            BytecodeLength: vertex.len(),
        },
        SampleMask: u32::MAX,
        RasterizerState: D3D12_RASTERIZER_DESC {
            FillMode: match info.rasterizer.polygon_mode {
                crate::PolygonMode::Fill => D3D12_FILL_MODE_SOLID,
                crate::PolygonMode::Line => D3D12_FILL_MODE_WIREFRAME,
            },
            CullMode: match info.rasterizer.cull_mode {
                crate::CullMode::None => D3D12_CULL_MODE_NONE,
                crate::CullMode::Back => D3D12_CULL_MODE_BACK,
                crate::CullMode::Front => D3D12_CULL_MODE_FRONT,
            },
            FrontCounterClockwise: (info.rasterizer.front_face
                == crate::FrontFace::CounterClockwise)
                .into(),
            DepthClipEnable: true.into(),
            ..Default::default()
        },
        DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
            DepthEnable: info.depth_state.depth_test.into(),
            DepthWriteMask: if info.depth_state.depth_write {
                D3D12_DEPTH_WRITE_MASK_ALL
            } else {
                D3D12_DEPTH_WRITE_MASK_ZERO
            },
            DepthFunc: compare_op_to_d3d12(info.depth_state.compare_op),
            ..Default::default()
        },
        InputLayout: D3D12_INPUT_LAYOUT_DESC {
            pInputElementDescs: input_elements.as_ptr(),
            NumElements: input_elements.len() as u32,
        },
        PrimitiveTopologyType: match info.topology {
            PrimitiveTopology::TriangleList | PrimitiveTopology::TriangleStrip => {
                D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE
            }
            PrimitiveTopology::LineList => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
            PrimitiveTopology::PointList => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        },
        NumRenderTargets: info.color_attachment_formats.len() as u32,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: info.sample_count.max(1),
            Quality: 0,
        },
        DSVFormat: info
            .depth_stencil_format
            .map(format_to_dxgi)
            .unwrap_or(DXGI_FORMAT_UNKNOWN),
        ..Default::default()
    };
    if let Some(fragment) = shader.fragment.as_ref() {
        desc.PS = D3D12_SHADER_BYTECODE {
            pShaderBytecode: fragment.as_ptr().cast(),
            BytecodeLength: fragment.len(),
        };
    }
    for (i, format) in info.color_attachment_formats.iter().enumerate() {
        desc.RTVFormats[i] = format_to_dxgi(*format);
        desc.BlendState.RenderTarget[i].RenderTargetWriteMask = 0x0f;
        if let Some(blend) = &info.blend_state {
            let target = &mut desc.BlendState.RenderTarget[i];
            target.BlendEnable = true.into();
            target.SrcBlend = blend_factor_to_d3d12(blend.color.src_factor);
            target.DestBlend = blend_factor_to_d3d12(blend.color.dst_factor);
            target.BlendOp = blend_op_to_d3d12(blend.color.operation);
            target.SrcBlendAlpha = blend_factor_to_d3d12(blend.alpha.src_factor);
            target.DestBlendAlpha = blend_factor_to_d3d12(blend.alpha.dst_factor);
            target.BlendOpAlpha = blend_op_to_d3d12(blend.alpha.operation);
        }
    }

    let pipeline: ID3D12PipelineState =
        unsafe { device.device.CreateGraphicsPipelineState(&desc) }.map_err(win_err)?;
    Ok(Arc::new(D3d12Pipeline {
        pipeline,
        root_signature: layout.root_signature.clone(),
        tables: layout
            .tables
            .iter()
            .map(|t| (t.view_param, t.sampler_param))
            .collect(),
        push_constant_param: layout.push_constant_param,
        push_size: info.shader.reflection().push_constant_size(),
        topology: info.topology,
        vertex_stride: info
            .vertex_layout
            .bindings
            .first()
            .map(|b| b.stride)
            .unwrap_or(0),
        kind: PipelineKind::Graphics,
        color_formats: info.color_attachment_formats.clone(),
    }))
}

fn blend_factor_to_d3d12(factor: crate::BlendFactor) -> D3D12_BLEND {
    match factor {
        crate::BlendFactor::One => D3D12_BLEND_ONE,
        crate::BlendFactor::Zero => D3D12_BLEND_ZERO,
        crate::BlendFactor::SrcAlpha => D3D12_BLEND_SRC_ALPHA,
        crate::BlendFactor::OneMinusSrcAlpha => D3D12_BLEND_INV_SRC_ALPHA,
        crate::BlendFactor::DstAlpha => D3D12_BLEND_DEST_ALPHA,
        crate::BlendFactor::OneMinusDstAlpha => D3D12_BLEND_INV_DEST_ALPHA,
    }
}

fn blend_op_to_d3d12(op: crate::BlendOp) -> D3D12_BLEND_OP {
    match op {
        crate::BlendOp::Add => D3D12_BLEND_OP_ADD,
        crate::BlendOp::Subtract => D3D12_BLEND_OP_SUBTRACT,
    }
}

pub(crate) fn create_compute_pipeline(
    device: &D3d12Device,
    info: &ComputePipelineInfo,
) -> RhiResult<Arc<dyn Pipeline>> {
    let shader = info
        .shader
        .as_any()
        .downcast_ref::<D3d12Shader>()
        .ok_or_else(|| RhiError::invalid_argument("shader is not a D3D12 shader"))?;
    let layout = info
        .descriptor_set_layout
        .as_any()
        .downcast_ref::<D3d12DescriptorSetLayout>()
        .ok_or_else(|| RhiError::invalid_argument("layout is not a D3D12 layout"))?;
    let compute = shader
        .compute
        .as_ref()
        .ok_or_else(|| RhiError::invalid_argument("compute pipeline requires a compute stage"))?;
    let desc = D3D12_COMPUTE_PIPELINE_STATE_DESC {
        pRootSignature: unsafe { std::mem::transmute_copy(&layout.root_signature) },
        CS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: compute.as_ptr().cast(),
            BytecodeLength: compute.len(),
        },
        ..Default::default()
    };
    let pipeline: ID3D12PipelineState =
        unsafe { device.device.CreateComputePipelineState(&desc) }.map_err(win_err)?;
    Ok(Arc::new(D3d12Pipeline {
        pipeline,
        root_signature: layout.root_signature.clone(),
        tables: layout
            .tables
            .iter()
            .map(|t| (t.view_param, t.sampler_param))
            .collect(),
        push_constant_param: layout.push_constant_param,
        push_size: info.shader.reflection().push_constant_size(),
        topology: PrimitiveTopology::TriangleList,
        vertex_stride: 0,
        kind: PipelineKind::Compute,
        color_formats: Vec::new(),
    }))
}
