//! Ember render graph: declarative per-frame GPU work compiled into a linear
//! schedule of barriers, transient attachments and cached render passes.

pub mod graph;
pub mod loader;
pub mod pass_cache;

pub use graph::{
    BarrierRecord, GraphResources, PassBuilder, PassCreateContext, RenderGraph,
};
pub use loader::{BufferUploadJob, GenerateMipmapsJob, ImageUploadJob, ResourceLoader};
pub use pass_cache::PassCache;
