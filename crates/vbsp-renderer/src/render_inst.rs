//! Draw instances, sort keys, and per-view instance lists.
//!
//! Submission happens during culling; nothing reaches the device until the
//! lists are sorted and replayed onto a pass encoder. A template stack
//! carries shared state (geometry bindings, cull mode, scene uniforms) so
//! individual draws only record what differs.

use vbsp_common::math::Mat4;

use crate::gfx::{BufferId, InputLayoutId, PassEncoder, ProgramId, SamplerId, TextureId};

// ============================================================
// Sort keys
// ============================================================

/// Coarse draw layers, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RenderLayer {
    /// Skybox and other depth-independent backdrops.
    Background = 0,
    /// Opaque world and model geometry.
    Opaque = 1,
    /// Blended geometry, drawn back-to-front.
    Translucent = 2,
    /// Screen-space overlays drawn last.
    Overlay = 3,
}

/// Composite draw ordering value. Plain ascending `u64` comparison yields:
/// layer, then program tie-break (so draws sharing GPU state batch
/// together), then the per-layer depth convention.
///
/// Bit layout: `[63:56] layer | [55:40] program | [39:16] depth | [15:0] 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct SortKey(pub u64);

const DEPTH_BITS: u32 = 24;
const DEPTH_MASK: u64 = ((1 << DEPTH_BITS) - 1) << 16;

/// Farthest representable view-space depth; deeper draws saturate.
pub const SORT_KEY_MAX_DEPTH: f32 = 65536.0;

pub fn make_sort_key(layer: RenderLayer, program: Option<ProgramId>) -> SortKey {
    let program_bits = program.map(|p| (p.0 as u64) & 0xFFFF).unwrap_or(0);
    SortKey(((layer as u64) << 56) | (program_bits << 40))
}

pub fn sort_key_layer(key: SortKey) -> RenderLayer {
    match key.0 >> 56 {
        0 => RenderLayer::Background,
        1 => RenderLayer::Opaque,
        2 => RenderLayer::Translucent,
        _ => RenderLayer::Overlay,
    }
}

/// Write the depth field of a key, after layer and program are fixed.
///
/// Translucent draws store inverted depth so ascending key order walks
/// back-to-front. Opaque and background draws keep a zero depth field:
/// opaque ordering within a bucket is not required for correctness and the
/// background layer is depth-independent.
pub fn set_sort_key_depth(key: SortKey, depth: f32) -> SortKey {
    let layer = sort_key_layer(key);
    if layer != RenderLayer::Translucent {
        return key;
    }

    let max = (1u64 << DEPTH_BITS) - 1;
    let quantized = ((depth.clamp(0.0, SORT_KEY_MAX_DEPTH) / SORT_KEY_MAX_DEPTH) * max as f32) as u64;
    let inverted = max - quantized;
    SortKey((key.0 & !DEPTH_MASK) | (inverted << 16))
}

// ============================================================
// Draw instances
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
}

/// Samplers that cannot be bound at submission time because their texture
/// does not exist yet (it is resolved from a render target mid-graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LateBindingTexture {
    FramebufferColor,
    FramebufferDepth,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextureBinding {
    pub texture: Option<TextureId>,
    pub sampler: Option<SamplerId>,
    pub late: Option<LateBindingTexture>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryBinding {
    pub input_layout: Option<InputLayoutId>,
    pub vertex_buffer: Option<BufferId>,
    pub index_buffer: Option<BufferId>,
}

/// One submitted draw. Ephemeral: built during culling, owned by exactly one
/// view list, destroyed when the view resets at end of frame.
#[derive(Debug, Clone, Default)]
pub struct DrawInstance {
    pub sort_key: SortKey,
    pub program: Option<ProgramId>,
    pub geometry: GeometryBinding,
    pub cull_mode: CullMode,
    pub start_index: u32,
    pub index_count: u32,
    /// Non-indexed vertex count, for fullscreen-triangle style draws.
    pub vertex_count: u32,
    pub textures: Vec<TextureBinding>,
    /// Per-draw uniform payload; layout is defined by the bound program.
    pub uniforms: Vec<f32>,
}

impl DrawInstance {
    pub fn draw_indexes(&mut self, index_count: u32, start_index: u32) {
        self.index_count = index_count;
        self.start_index = start_index;
        self.vertex_count = 0;
    }

    pub fn draw_primitives(&mut self, vertex_count: u32) {
        self.vertex_count = vertex_count;
        self.index_count = 0;
    }

    pub fn push_matrix(&mut self, m: &Mat4) {
        self.uniforms.extend_from_slice(m);
    }
}

// ============================================================
// Instance lists
// ============================================================

/// An ordered list of draws for one view and one pass. Sorted by key just
/// before replay onto a pass encoder.
#[derive(Default)]
pub struct RenderInstList {
    insts: Vec<DrawInstance>,
}

impl RenderInstList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, inst: DrawInstance) {
        self.insts.push(inst);
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn reset(&mut self) {
        self.insts.clear();
    }

    /// Bind a texture into every draw that declared the given late slot.
    /// Called once the resolved framebuffer copy exists.
    pub fn resolve_late_sampler_binding(
        &mut self,
        slot: LateBindingTexture,
        texture: TextureId,
        sampler: SamplerId,
    ) {
        for inst in &mut self.insts {
            for binding in &mut inst.textures {
                if binding.late == Some(slot) {
                    binding.texture = Some(texture);
                    binding.sampler = Some(sampler);
                }
            }
        }
    }

    /// Sort by key and replay onto the encoder.
    pub fn draw_on_pass(&mut self, encoder: &mut dyn PassEncoder) {
        self.insts.sort_by_key(|i| i.sort_key);
        for inst in &self.insts {
            encoder.draw(inst);
        }
    }

    #[cfg(test)]
    pub fn insts(&self) -> &[DrawInstance] {
        &self.insts
    }
}

// ============================================================
// Template stack
// ============================================================

/// Hands out draw instances pre-filled from a stack of templates. A pushed
/// template carries the state every draw below it shares (scene uniforms,
/// geometry bindings, cull mode) until popped.
#[derive(Default)]
pub struct RenderInstManager {
    templates: Vec<DrawInstance>,
}

impl RenderInstManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a template inheriting the current top. Mutate it through
    /// `template_mut` before creating draws.
    pub fn push_template(&mut self) {
        let top = self.templates.last().cloned().unwrap_or_default();
        self.templates.push(top);
    }

    pub fn pop_template(&mut self) {
        self.templates.pop();
    }

    pub fn template_mut(&mut self) -> &mut DrawInstance {
        if self.templates.is_empty() {
            self.templates.push(DrawInstance::default());
        }
        self.templates.last_mut().expect("template stack")
    }

    /// A fresh draw instance inheriting the current template state.
    pub fn new_render_inst(&self) -> DrawInstance {
        self.templates.last().cloned().unwrap_or_default()
    }
}
