//! BSP world renderer.
//!
//! Per-frame visibility determination and render submission for large
//! spatially-partitioned levels: potentially-visible-set resolution from the
//! camera leaf, BSP tree descent with frustum culling, per-surface draw
//! submission with composite sort keys, and a declared multi-pass render
//! graph (skybox, main scene, indirect effects, color grading,
//! anti-aliasing) over an opaque graphics device.

pub mod color_grading;
pub mod debug;
pub mod gfx;
pub mod graph;
pub mod materials;
pub mod props;
pub mod render_inst;
pub mod scene;
pub mod skybox;
pub mod surfaces;
pub mod view;
pub mod vis;
pub mod world;

#[cfg(test)]
pub(crate) mod test_support;

pub use scene::{FrameInput, RenderObjectKind, SceneError, SceneRenderer};
pub use view::{Camera, SceneView};
pub use world::{WorldData, WorldError};
