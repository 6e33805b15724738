//! Content-addressed cache of render pass objects.
//!
//! The key is the structural fingerprint of a [`RenderPassInfo`]: attachment
//! count, per-attachment format/sample-count/load-op/expected-state, the
//! depth-stencil tuple and the framebuffer extent. Hashing goes through
//! `FxHasher`; structural equality is the map key's `Eq`, so a hash collision
//! can never alias two different signatures. At most one render pass exists
//! per fingerprint for the device's lifetime, and the cache only grows.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use fxhash::FxHasher;

use ember_rhi::{Device, RenderPass, RenderPassInfo, RhiResult};

#[derive(Default)]
pub struct PassCache {
    passes: HashMap<RenderPassInfo, Arc<dyn RenderPass>, BuildHasherDefault<FxHasher>>,
}

impl PassCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached render pass for this fingerprint, creating it on
    /// the first lookup.
    pub fn get_or_create(
        &mut self,
        device: &dyn Device,
        info: &RenderPassInfo,
    ) -> RhiResult<Arc<dyn RenderPass>> {
        if let Some(pass) = self.passes.get(info) {
            return Ok(Arc::clone(pass));
        }
        log::debug!(
            "pass cache miss: {} color attachment(s) at {}x{}",
            info.color_attachments.len(),
            info.width,
            info.height
        );
        let pass = device.create_render_pass(info)?;
        self.passes.insert(info.clone(), Arc::clone(&pass));
        Ok(pass)
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn clear(&mut self) {
        self.passes.clear();
    }
}

impl std::fmt::Debug for PassCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassCache")
            .field("entries", &self.passes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_rhi::{
        AttachmentInfo, DeviceInfo, Format, LoadOp, ResourceState,
    };

    fn info(width: u32) -> RenderPassInfo {
        RenderPassInfo {
            width,
            height: 256,
            color_attachments: vec![AttachmentInfo {
                format: Format::B8G8R8A8Srgb,
                sample_count: 1,
                load_op: LoadOp::Clear,
                initial_state: ResourceState::ColorAttachment,
            }],
            depth_stencil: None,
        }
    }

    #[test]
    fn equal_fingerprints_share_one_pass() {
        let device = ember_rhi::create_device(&DeviceInfo::default()).unwrap();
        let mut cache = PassCache::new();
        let a = cache.get_or_create(device.as_ref(), &info(512)).unwrap();
        let b = cache.get_or_create(device.as_ref(), &info(512)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn extent_is_part_of_the_fingerprint() {
        let device = ember_rhi::create_device(&DeviceInfo::default()).unwrap();
        let mut cache = PassCache::new();
        let a = cache.get_or_create(device.as_ref(), &info(512)).unwrap();
        let b = cache.get_or_create(device.as_ref(), &info(1024)).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }
}
