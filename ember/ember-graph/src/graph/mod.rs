//! The render graph: a declarative DAG of passes compiled into a linear
//! schedule of image barriers, transient attachments and cached render
//! passes, replayed each frame against one command buffer.
//!
//! Passes, logical images and physical images live in three flat vectors;
//! every cross-reference is a small index, never an owning reference. Names
//! resolve through flat string maps. Compilation (`build`) runs once after
//! declaration and again whenever the swapchain extent changes; per-frame
//! work is limited to rewiring the backbuffer attachment
//! (`setup_attachments`) and replaying the precomputed schedule (`execute`).

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use ember_rhi::{
    AttachmentInfo, ColorAttachmentBinding, CommandBuffer, DepthStencilBinding,
    DepthStencilClearValue, Device, Image, ImageBarrier, ImageInfo, ImageUsage, LoadOp, RenderPass,
    RenderPassBeginInfo, RenderPassInfo, ResourceState, RhiError, RhiResult,
};

use crate::pass_cache::PassCache;

pub type PassCreateFn = Box<dyn FnMut(&mut PassCreateContext<'_>) -> RhiResult<()>>;
pub type PassExecuteFn = Box<dyn FnMut(&mut dyn CommandBuffer, &mut dyn Any) -> RhiResult<()>>;
pub type PassDestroyFn = Box<dyn FnMut(&dyn Device, &mut dyn Any)>;
pub type ColorClearFn = Box<dyn Fn(u32, &dyn Any) -> Option<[f32; 4]>>;
pub type DepthStencilClearFn = Box<dyn Fn(&dyn Any) -> Option<DepthStencilClearValue>>;

/// Logical image node: a name, a creation descriptor and its index in the
/// physical image table. Usage flags are the union of every use across the
/// passes that reference it.
struct GraphImage {
    name: String,
    info: ImageInfo,
    /// Usage bits the declarations carried, kept separate so rebuilds can
    /// recompute the per-pass union without losing them.
    declared_usage: ImageUsage,
    has_info: bool,
}

struct GraphPass {
    name: String,
    color_outputs: Vec<usize>,
    depth_stencil_output: Option<usize>,
    texture_inputs: Vec<usize>,
    user_data: Box<dyn Any>,
    create_cb: Option<PassCreateFn>,
    execute_cb: Option<PassExecuteFn>,
    destroy_cb: Option<PassDestroyFn>,
    color_clear_cb: Option<ColorClearFn>,
    depth_stencil_clear_cb: Option<DepthStencilClearFn>,
}

/// One scheduled barrier: issued immediately before its pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierRecord {
    pub image_index: usize,
    pub old_state: ResourceState,
    pub new_state: ResourceState,
}

struct CompiledPass {
    pass_index: usize,
    begin_info: RenderPassBeginInfo,
    /// Graph-image index behind each color attachment slot; used to rewire
    /// the backbuffer attachment each frame.
    color_image_indices: Vec<usize>,
    barriers: Vec<BarrierRecord>,
}

/// Read-only view of the graph's image tables handed to create callbacks so
/// they can write descriptors referencing transient attachments.
pub struct GraphResources<'a> {
    images: &'a [GraphImage],
    name_to_index: &'a HashMap<String, usize>,
    physical: &'a [Option<Arc<dyn Image>>],
}

impl GraphResources<'_> {
    /// Physical image bound to a named graph image. `None` for unknown names
    /// and for the backbuffer source (whose identity is per-frame).
    pub fn image(&self, name: &str) -> Option<Arc<dyn Image>> {
        let index = *self.name_to_index.get(name)?;
        self.physical.get(index)?.clone()
    }

    pub fn image_info(&self, name: &str) -> Option<&ImageInfo> {
        let index = *self.name_to_index.get(name)?;
        Some(&self.images[index].info)
    }
}

/// Context handed to a pass's create callback after compilation. The render
/// pass is the freshly built (cached) object, so pipelines created here are
/// tied to the right framebuffer signature.
pub struct PassCreateContext<'a> {
    pub device: &'a dyn Device,
    pub render_pass: &'a dyn RenderPass,
    pub resources: GraphResources<'a>,
    pub user_data: &'a mut dyn Any,
    pub swapchain_width: u32,
    pub swapchain_height: u32,
}

pub struct RenderGraph {
    device: Arc<dyn Device>,
    passes: Vec<GraphPass>,
    pass_name_to_index: HashMap<String, usize>,
    images: Vec<GraphImage>,
    image_name_to_index: HashMap<String, usize>,
    physical_images: Vec<Option<Arc<dyn Image>>>,
    backbuffer_source: Option<usize>,
    swapchain_extent: (u32, u32),
    compiled: Vec<CompiledPass>,
    pass_cache: PassCache,
    backbuffer: Option<Arc<dyn Image>>,
    built: bool,
}

impl RenderGraph {
    pub fn new(device: Arc<dyn Device>) -> Self {
        RenderGraph {
            device,
            passes: Vec::new(),
            pass_name_to_index: HashMap::new(),
            images: Vec::new(),
            image_name_to_index: HashMap::new(),
            physical_images: Vec::new(),
            backbuffer_source: None,
            swapchain_extent: (0, 0),
            compiled: Vec::new(),
            pass_cache: PassCache::new(),
            backbuffer: None,
            built: false,
        }
    }

    /// Register a pass. Default callbacks are no-ops and the clear queries
    /// report "no clear".
    pub fn add_pass(&mut self, name: &str) -> PassBuilder<'_> {
        let index = self.passes.len();
        self.pass_name_to_index.insert(name.to_string(), index);
        self.passes.push(GraphPass {
            name: name.to_string(),
            color_outputs: Vec::new(),
            depth_stencil_output: None,
            texture_inputs: Vec::new(),
            user_data: Box::new(()),
            create_cb: None,
            execute_cb: None,
            destroy_cb: None,
            color_clear_cb: None,
            depth_stencil_clear_cb: None,
        });
        PassBuilder { graph: self, index }
    }

    /// Mark the named graph image as the final presentable target; its
    /// physical identity is the swapchain image injected each frame.
    pub fn set_backbuffer_source(&mut self, name: &str) {
        let index = self.get_or_create_image(name);
        self.backbuffer_source = Some(index);
    }

    /// Canonical extent used for transient images whose descriptors omit
    /// width/height.
    pub fn set_swapchain_dimensions(&mut self, width: u32, height: u32) {
        self.swapchain_extent = (width, height);
    }

    fn get_or_create_image(&mut self, name: &str) -> usize {
        if let Some(&index) = self.image_name_to_index.get(name) {
            return index;
        }
        let index = self.images.len();
        self.image_name_to_index.insert(name.to_string(), index);
        self.images.push(GraphImage {
            name: name.to_string(),
            info: ImageInfo::default(),
            declared_usage: ImageUsage::empty(),
            has_info: false,
        });
        self.physical_images.push(None);
        index
    }

    /// Stable topological order over producer -> consumer edges derived from
    /// texture inputs. Fails with `CyclicGraph` before any state is touched.
    fn topological_order(&self) -> RhiResult<Vec<usize>> {
        let pass_count = self.passes.len();
        let mut producers: Vec<Vec<usize>> = vec![Vec::new(); self.images.len()];
        for (pass_index, pass) in self.passes.iter().enumerate() {
            for &image in pass
                .color_outputs
                .iter()
                .chain(pass.depth_stencil_output.iter())
            {
                producers[image].push(pass_index);
            }
        }

        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); pass_count];
        let mut indegree = vec![0usize; pass_count];
        for (consumer, pass) in self.passes.iter().enumerate() {
            for &image in &pass.texture_inputs {
                for &producer in &producers[image] {
                    edges[producer].push(consumer);
                    indegree[consumer] += 1;
                }
            }
        }

        // Kahn's algorithm, always picking the lowest declaration index so
        // independent passes keep declaration order.
        let mut order = Vec::with_capacity(pass_count);
        let mut done = vec![false; pass_count];
        while order.len() < pass_count {
            let next = (0..pass_count).find(|&i| !done[i] && indegree[i] == 0);
            let Some(next) = next else {
                let stuck: Vec<&str> = (0..pass_count)
                    .filter(|&i| !done[i])
                    .map(|i| self.passes[i].name.as_str())
                    .collect();
                return Err(RhiError::CyclicGraph(stuck.join(", ")));
            };
            done[next] = true;
            order.push(next);
            for &consumer in &edges[next] {
                indegree[consumer] -= 1;
            }
        }
        Ok(order)
    }

    fn teardown_passes(&mut self) {
        for pass in &mut self.passes {
            if let Some(destroy) = pass.destroy_cb.as_mut() {
                destroy(self.device.as_ref(), pass.user_data.as_mut());
            }
        }
        for slot in &mut self.physical_images {
            *slot = None;
        }
        self.compiled.clear();
        self.backbuffer = None;
    }

    /// Compile the graph: order passes, allocate transient images, synthesize
    /// begin infos and barrier lists, warm the pass cache, then run the user
    /// create callbacks in pass order.
    pub fn build(&mut self) -> RhiResult<()> {
        let order = self.topological_order()?;

        if self.built {
            log::debug!("rebuilding render graph ({} passes)", self.passes.len());
            self.teardown_passes();
        }

        // Accumulated usage: the OR of every use across referencing passes,
        // on top of whatever the declarations carried.
        for image in &mut self.images {
            image.info.usage = image.declared_usage;
        }
        for pass in &self.passes {
            for &index in &pass.color_outputs {
                self.images[index].info.usage |= ImageUsage::COLOR_ATTACHMENT;
            }
            if let Some(index) = pass.depth_stencil_output {
                self.images[index].info.usage |= ImageUsage::DEPTH_STENCIL_ATTACHMENT;
            }
            for &index in &pass.texture_inputs {
                self.images[index].info.usage |= ImageUsage::SAMPLED;
            }
        }

        // Physical allocation for everything except the backbuffer source.
        for index in 0..self.images.len() {
            if Some(index) == self.backbuffer_source {
                continue;
            }
            if self.images[index].info.usage.is_empty() {
                continue;
            }
            if !self.images[index].has_info {
                return Err(RhiError::invalid_argument(format!(
                    "graph image '{}' is consumed but never declared by a producer",
                    self.images[index].name
                )));
            }
            // Substitute the canonical extent only into the allocation; the
            // declared descriptor keeps its zero so the next rebuild follows
            // the swapchain again.
            let mut info = self.images[index].info.clone();
            if info.width == 0 || info.height == 0 {
                if self.swapchain_extent.0 == 0 {
                    return Err(RhiError::invalid_argument(format!(
                        "graph image '{}' needs swapchain dimensions, which were never set",
                        self.images[index].name
                    )));
                }
                info.width = self.swapchain_extent.0;
                info.height = self.swapchain_extent.1;
            }
            let physical = self.device.create_image(&info)?;
            self.physical_images[index] = Some(physical);
        }

        // Begin-info and barrier synthesis, tracking each image's last
        // observed state across the frame to compute old states exactly.
        let mut last_state: HashMap<usize, ResourceState> = HashMap::new();
        let mut written: Vec<bool> = vec![false; self.images.len()];
        let mut compiled = Vec::with_capacity(order.len());
        for &pass_index in &order {
            let pass = &self.passes[pass_index];
            let mut barriers = Vec::new();
            let mut color_attachments = Vec::new();
            let mut color_image_indices = Vec::new();
            let mut attachment_infos = Vec::new();

            for (slot, &image_index) in pass.color_outputs.iter().enumerate() {
                let old = last_state
                    .get(&image_index)
                    .copied()
                    .unwrap_or(ResourceState::Undefined);
                barriers.push(BarrierRecord {
                    image_index,
                    old_state: old,
                    new_state: ResourceState::ColorAttachment,
                });
                last_state.insert(image_index, ResourceState::ColorAttachment);

                let clear = pass
                    .color_clear_cb
                    .as_ref()
                    .and_then(|cb| cb(slot as u32, pass.user_data.as_ref()));
                // A re-written image keeps its contents; a first write that
                // is not cleared starts undefined.
                let load_op = match (&clear, written[image_index]) {
                    (Some(_), _) => LoadOp::Clear,
                    (None, true) => LoadOp::Load,
                    (None, false) => LoadOp::DontCare,
                };
                written[image_index] = true;

                let format = self.attachment_format(image_index)?;
                let sample_count = self.images[image_index].info.sample_count.max(1);
                attachment_infos.push(AttachmentInfo {
                    format,
                    sample_count,
                    load_op,
                    initial_state: ResourceState::ColorAttachment,
                });
                color_attachments.push(ColorAttachmentBinding {
                    image: self.physical_images[image_index].clone(),
                    load_op,
                    state: ResourceState::ColorAttachment,
                    clear_value: clear.unwrap_or([0.0; 4]),
                });
                color_image_indices.push(image_index);
            }

            let mut depth_attachment_info = None;
            let depth_stencil = match pass.depth_stencil_output {
                Some(image_index) => {
                    let old = last_state
                        .get(&image_index)
                        .copied()
                        .unwrap_or(ResourceState::Undefined);
                    barriers.push(BarrierRecord {
                        image_index,
                        old_state: old,
                        new_state: ResourceState::DepthStencilWrite,
                    });
                    last_state.insert(image_index, ResourceState::DepthStencilWrite);

                    let clear = pass
                        .depth_stencil_clear_cb
                        .as_ref()
                        .and_then(|cb| cb(pass.user_data.as_ref()));
                    let load_op = match (&clear, written[image_index]) {
                        (Some(_), _) => LoadOp::Clear,
                        (None, true) => LoadOp::Load,
                        (None, false) => LoadOp::DontCare,
                    };
                    written[image_index] = true;

                    depth_attachment_info = Some(AttachmentInfo {
                        format: self.attachment_format(image_index)?,
                        sample_count: self.images[image_index].info.sample_count.max(1),
                        load_op,
                        initial_state: ResourceState::DepthStencilWrite,
                    });
                    Some(DepthStencilBinding {
                        image: self.physical_images[image_index].clone(),
                        load_op,
                        state: ResourceState::DepthStencilWrite,
                        clear_value: clear
                            .unwrap_or(DepthStencilClearValue {
                                depth: 1.0,
                                stencil: 0,
                            }),
                    })
                }
                None => None,
            };

            for &image_index in &pass.texture_inputs {
                let old = last_state
                    .get(&image_index)
                    .copied()
                    .unwrap_or(ResourceState::Undefined);
                barriers.push(BarrierRecord {
                    image_index,
                    old_state: old,
                    new_state: ResourceState::ShaderReadOnly,
                });
                last_state.insert(image_index, ResourceState::ShaderReadOnly);
            }

            let (width, height) = self.pass_extent(pass)?;
            let pass_info = RenderPassInfo {
                width,
                height,
                color_attachments: attachment_infos,
                depth_stencil: depth_attachment_info,
            };
            let render_pass = self.pass_cache.get_or_create(self.device.as_ref(), &pass_info)?;

            log::trace!(
                "pass '{}': {} barrier(s), {} color attachment(s), {}x{}",
                pass.name,
                barriers.len(),
                color_attachments.len(),
                width,
                height
            );

            compiled.push(CompiledPass {
                pass_index,
                begin_info: RenderPassBeginInfo {
                    render_pass,
                    width,
                    height,
                    color_attachments,
                    depth_stencil,
                },
                color_image_indices,
                barriers,
            });
        }

        self.compiled = compiled;
        self.built = true;

        // User create callbacks, in pass order.
        for compiled in &self.compiled {
            let pass = &mut self.passes[compiled.pass_index];
            if let Some(create) = pass.create_cb.as_mut() {
                let mut ctx = PassCreateContext {
                    device: self.device.as_ref(),
                    render_pass: compiled.begin_info.render_pass.as_ref(),
                    resources: GraphResources {
                        images: &self.images,
                        name_to_index: &self.image_name_to_index,
                        physical: &self.physical_images,
                    },
                    user_data: pass.user_data.as_mut(),
                    swapchain_width: self.swapchain_extent.0,
                    swapchain_height: self.swapchain_extent.1,
                };
                create(&mut ctx)?;
            }
        }

        log::info!(
            "render graph built: {} passes, {} physical images, {} cached render passes",
            self.compiled.len(),
            self.physical_images.iter().filter(|i| i.is_some()).count(),
            self.pass_cache.len()
        );
        Ok(())
    }

    fn attachment_format(&self, image_index: usize) -> RhiResult<ember_rhi::Format> {
        let info = &self.images[image_index].info;
        if info.format == ember_rhi::Format::Undefined {
            return Err(RhiError::invalid_argument(format!(
                "graph image '{}' has no declared format",
                self.images[image_index].name
            )));
        }
        Ok(info.format)
    }

    /// A pass's framebuffer extent comes from its first attachment; the
    /// backbuffer source follows the swapchain.
    fn pass_extent(&self, pass: &GraphPass) -> RhiResult<(u32, u32)> {
        let first = pass
            .color_outputs
            .first()
            .copied()
            .or(pass.depth_stencil_output)
            .ok_or_else(|| {
                RhiError::invalid_argument(format!("pass '{}' declares no outputs", pass.name))
            })?;
        if Some(first) == self.backbuffer_source {
            if self.swapchain_extent.0 == 0 {
                return Err(RhiError::invalid_argument(
                    "swapchain dimensions were never set",
                ));
            }
            return Ok(self.swapchain_extent);
        }
        let physical = self.physical_images[first].as_ref().ok_or_else(|| {
            RhiError::invalid_state("pass extent queried before physical allocation")
        })?;
        let info = physical.info();
        Ok((info.width, info.height))
    }

    /// Per-frame binding of the acquired swapchain image. Only attachments
    /// whose graph image is the backbuffer source are touched.
    pub fn setup_attachments(&mut self, image: Arc<dyn Image>) -> RhiResult<()> {
        if !self.built {
            return Err(RhiError::invalid_state("graph has not been built"));
        }
        let Some(backbuffer_index) = self.backbuffer_source else {
            return Err(RhiError::invalid_state("no backbuffer source is set"));
        };
        for compiled in &mut self.compiled {
            for (slot, &image_index) in compiled.color_image_indices.iter().enumerate() {
                if image_index == backbuffer_index {
                    compiled.begin_info.color_attachments[slot].image = Some(Arc::clone(&image));
                }
            }
        }
        self.backbuffer = Some(image);
        Ok(())
    }

    /// Replay the compiled schedule: per pass, its barrier batch, the render
    /// pass scope, and the user execute callback; after the last pass, the
    /// backbuffer transitions to `Present`.
    pub fn execute(&mut self, cmd: &mut dyn CommandBuffer) -> RhiResult<()> {
        if !self.built {
            return Err(RhiError::invalid_state("graph has not been built"));
        }
        for compiled_index in 0..self.compiled.len() {
            {
                let compiled = &self.compiled[compiled_index];
                let mut image_barriers = Vec::with_capacity(compiled.barriers.len());
                for record in &compiled.barriers {
                    let image = self.resolve_image(record.image_index)?;
                    image_barriers.push(ImageBarrier {
                        image,
                        old_state: record.old_state,
                        new_state: record.new_state,
                        src_queue: None,
                        dst_queue: None,
                        subresource: None,
                    });
                }
                cmd.barrier(&[], &[], &image_barriers)?;
                cmd.begin_render_pass(&compiled.begin_info)?;
            }
            let pass_index = self.compiled[compiled_index].pass_index;
            let pass = &mut self.passes[pass_index];
            if let Some(execute) = pass.execute_cb.as_mut() {
                execute(cmd, pass.user_data.as_mut())?;
            }
            cmd.end_render_pass()?;
        }

        if self.backbuffer_source.is_some() {
            let backbuffer = self
                .backbuffer
                .as_ref()
                .ok_or_else(|| RhiError::invalid_state("setup_attachments was not called"))?;
            cmd.barrier(
                &[],
                &[],
                &[ImageBarrier {
                    image: backbuffer.as_ref(),
                    old_state: ResourceState::ColorAttachment,
                    new_state: ResourceState::Present,
                    src_queue: None,
                    dst_queue: None,
                    subresource: None,
                }],
            )?;
        }
        Ok(())
    }

    fn resolve_image(&self, image_index: usize) -> RhiResult<&dyn Image> {
        if Some(image_index) == self.backbuffer_source {
            return self
                .backbuffer
                .as_deref()
                .ok_or_else(|| RhiError::invalid_state("setup_attachments was not called"));
        }
        self.physical_images[image_index]
            .as_deref()
            .ok_or_else(|| RhiError::invalid_state("graph image has no physical backing"))
    }

    /// Tear down everything: destroy callbacks, physical images, cache.
    pub fn shutdown(&mut self) {
        self.teardown_passes();
        self.pass_cache.clear();
        self.built = false;
    }

    // Introspection used by clients and tests.

    pub fn pass_order(&self) -> Vec<&str> {
        self.compiled
            .iter()
            .map(|c| self.passes[c.pass_index].name.as_str())
            .collect()
    }

    pub fn barriers_for_pass(&self, name: &str) -> Option<&[BarrierRecord]> {
        let &index = self.pass_name_to_index.get(name)?;
        self.compiled
            .iter()
            .find(|c| c.pass_index == index)
            .map(|c| c.barriers.as_slice())
    }

    pub fn begin_info_for_pass(&self, name: &str) -> Option<&RenderPassBeginInfo> {
        let &index = self.pass_name_to_index.get(name)?;
        self.compiled
            .iter()
            .find(|c| c.pass_index == index)
            .map(|c| &c.begin_info)
    }

    pub fn image_index(&self, name: &str) -> Option<usize> {
        self.image_name_to_index.get(name).copied()
    }

    pub fn image_info(&self, name: &str) -> Option<&ImageInfo> {
        let &index = self.image_name_to_index.get(name)?;
        Some(&self.images[index].info)
    }

    pub fn physical_image(&self, name: &str) -> Option<Arc<dyn Image>> {
        let &index = self.image_name_to_index.get(name)?;
        self.physical_images.get(index)?.clone()
    }

    pub fn physical_image_count(&self) -> usize {
        self.physical_images.iter().filter(|i| i.is_some()).count()
    }

    pub fn pass_cache_len(&self) -> usize {
        self.pass_cache.len()
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        if self.built {
            self.teardown_passes();
        }
    }
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("passes", &self.passes.len())
            .field("images", &self.images.len())
            .field("built", &self.built)
            .finish()
    }
}

/// Builder handle returned by [`RenderGraph::add_pass`].
pub struct PassBuilder<'g> {
    graph: &'g mut RenderGraph,
    index: usize,
}

impl PassBuilder<'_> {
    /// Name a color attachment. A new name allocates a graph image; a known
    /// name reuses it and extends its accumulated usage.
    pub fn add_color_output(&mut self, name: &str, info: ImageInfo) -> &mut Self {
        let image = self.graph.get_or_create_image(name);
        let slot = &mut self.graph.images[image];
        slot.declared_usage |= info.usage;
        if info.format != ember_rhi::Format::Undefined || !slot.has_info {
            slot.info = info;
        }
        slot.has_info = true;
        self.graph.passes[self.index].color_outputs.push(image);
        self
    }

    pub fn add_depth_stencil_output(&mut self, name: &str, info: ImageInfo) -> &mut Self {
        let image = self.graph.get_or_create_image(name);
        let slot = &mut self.graph.images[image];
        slot.declared_usage |= info.usage;
        slot.info = info;
        slot.has_info = true;
        self.graph.passes[self.index].depth_stencil_output = Some(image);
        self
    }

    /// Declare a read-only sampled use, ordering this pass after the image's
    /// producers.
    pub fn add_texture_input(&mut self, name: &str) -> &mut Self {
        let image = self.graph.get_or_create_image(name);
        self.graph.passes[self.index].texture_inputs.push(image);
        self
    }

    pub fn set_user_data(&mut self, data: Box<dyn Any>) -> &mut Self {
        self.graph.passes[self.index].user_data = data;
        self
    }

    pub fn set_create_callback(&mut self, callback: PassCreateFn) -> &mut Self {
        self.graph.passes[self.index].create_cb = Some(callback);
        self
    }

    pub fn set_execute_callback(&mut self, callback: PassExecuteFn) -> &mut Self {
        self.graph.passes[self.index].execute_cb = Some(callback);
        self
    }

    pub fn set_destroy_callback(&mut self, callback: PassDestroyFn) -> &mut Self {
        self.graph.passes[self.index].destroy_cb = Some(callback);
        self
    }

    pub fn set_color_clear_fn(&mut self, callback: ColorClearFn) -> &mut Self {
        self.graph.passes[self.index].color_clear_cb = Some(callback);
        self
    }

    pub fn set_depth_stencil_clear_fn(&mut self, callback: DepthStencilClearFn) -> &mut Self {
        self.graph.passes[self.index].depth_stencil_clear_cb = Some(callback);
        self
    }
}

#[cfg(test)]
mod tests;
