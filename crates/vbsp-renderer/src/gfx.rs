//! Graphics device contract.
//!
//! The renderer core never talks to a GPU API directly; it drives an opaque
//! device through creation, upload, pass and destruction entry points. Handles
//! are plain ids; the core never inspects backend internals. Resource
//! exhaustion surfaces as `GfxError` and is propagated unmodified; recovery
//! policy belongs to the backend or host.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

use crate::render_inst::DrawInstance;

#[derive(Debug, Error)]
pub enum GfxError {
    #[error("out of device memory creating {0}")]
    OutOfMemory(&'static str),
    #[error("backend error: {0}")]
    Backend(String),
}

// ============================================================
// Opaque handles
// ============================================================

macro_rules! gfx_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);
    };
}

gfx_id!(BufferId);
gfx_id!(TextureId);
gfx_id!(SamplerId);
gfx_id!(ProgramId);
gfx_id!(InputLayoutId);

// ============================================================
// Resource descriptors
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureDimension {
    D2,
    D3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// 8-bit RGBA, sRGB encoded. Render-target capable.
    Rgba8Srgb,
    /// 8-bit RGBA, linear. Render-target capable.
    Rgba8,
    /// 32-bit float depth.
    Depth32Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUsage {
    Sampled,
    RenderTarget,
}

#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub dimension: TextureDimension,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub num_levels: u32,
    pub usage: TextureUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexFilter {
    Point,
    Bilinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    Clamp,
    Repeat,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub min_filter: TexFilter,
    pub mag_filter: TexFilter,
    pub wrap: WrapMode,
}

/// Shader program sources. Compilation is entirely the backend's business.
#[derive(Debug, Clone)]
pub struct ProgramDesc {
    pub name: String,
    pub vert: String,
    pub frag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    F32x2,
    F32x3,
    F32x4,
}

#[derive(Debug, Clone, Copy)]
pub struct VertexAttribute {
    pub location: u32,
    pub byte_offset: u32,
    pub format: VertexFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

#[derive(Debug, Clone)]
pub struct InputLayoutDesc {
    pub attributes: Vec<VertexAttribute>,
    pub byte_stride: u32,
    pub index_format: IndexFormat,
}

// ============================================================
// Render passes
// ============================================================

#[derive(Debug, Clone, Copy)]
pub struct ColorAttachment {
    pub texture: TextureId,
    /// `Some` clears on load, `None` preserves prior contents.
    pub clear: Option<[f32; 4]>,
}

#[derive(Debug, Clone, Copy)]
pub struct DepthAttachment {
    pub texture: TextureId,
    pub clear: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct RenderPassDesc {
    pub name: String,
    pub color: Option<ColorAttachment>,
    pub depth: Option<DepthAttachment>,
}

/// Records draws inside one begun pass. Dropped to end the pass.
pub trait PassEncoder {
    fn draw(&mut self, draw: &DrawInstance);
}

// ============================================================
// Device
// ============================================================

/// The backend contract. Every method is callable from the render thread
/// only; upload and creation may be called during loading as well.
pub trait Device {
    fn create_buffer(&self, usage: BufferUsage, data: &[u8]) -> Result<BufferId, GfxError>;
    fn destroy_buffer(&self, buffer: BufferId);

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId, GfxError>;
    fn upload_texture(&self, texture: TextureId, level: u32, data: &[u8]) -> Result<(), GfxError>;
    fn destroy_texture(&self, texture: TextureId);

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerId, GfxError>;
    fn create_program(&self, desc: &ProgramDesc) -> Result<ProgramId, GfxError>;
    fn create_input_layout(&self, desc: &InputLayoutDesc) -> Result<InputLayoutId, GfxError>;

    /// Copy the full contents of one texture into another of identical shape.
    fn copy_texture(&self, src: TextureId, dst: TextureId) -> Result<(), GfxError>;

    fn begin_pass<'a>(&'a self, desc: &RenderPassDesc) -> Result<Box<dyn PassEncoder + 'a>, GfxError>;
}

// ============================================================
// Null device
// ============================================================

/// One draw observed by the null device.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub pass: String,
    pub sort_key: u64,
    pub index_count: u32,
    pub vertex_count: u32,
}

/// A backend that allocates ids and records activity without a GPU.
/// Used for headless runs and tests.
#[derive(Default)]
pub struct NullDevice {
    next_id: AtomicU32,
    pub draws: Mutex<Vec<DrawRecord>>,
    pub passes: Mutex<Vec<String>>,
    pub copies: Mutex<Vec<(TextureId, TextureId)>>,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Draw records for one named pass, in submission order.
    pub fn draws_in_pass(&self, pass: &str) -> Vec<DrawRecord> {
        self.draws
            .lock()
            .iter()
            .filter(|d| d.pass == pass)
            .cloned()
            .collect()
    }
}

struct NullPassEncoder<'a> {
    device: &'a NullDevice,
    pass: String,
}

impl PassEncoder for NullPassEncoder<'_> {
    fn draw(&mut self, draw: &DrawInstance) {
        self.device.draws.lock().push(DrawRecord {
            pass: self.pass.clone(),
            sort_key: draw.sort_key.0,
            index_count: draw.index_count,
            vertex_count: draw.vertex_count,
        });
    }
}

impl Device for NullDevice {
    fn create_buffer(&self, _usage: BufferUsage, _data: &[u8]) -> Result<BufferId, GfxError> {
        Ok(BufferId(self.next()))
    }

    fn destroy_buffer(&self, _buffer: BufferId) {}

    fn create_texture(&self, _desc: &TextureDesc) -> Result<TextureId, GfxError> {
        Ok(TextureId(self.next()))
    }

    fn upload_texture(&self, _texture: TextureId, _level: u32, _data: &[u8]) -> Result<(), GfxError> {
        Ok(())
    }

    fn destroy_texture(&self, _texture: TextureId) {}

    fn create_sampler(&self, _desc: &SamplerDesc) -> Result<SamplerId, GfxError> {
        Ok(SamplerId(self.next()))
    }

    fn create_program(&self, _desc: &ProgramDesc) -> Result<ProgramId, GfxError> {
        Ok(ProgramId(self.next()))
    }

    fn create_input_layout(&self, _desc: &InputLayoutDesc) -> Result<InputLayoutId, GfxError> {
        Ok(InputLayoutId(self.next()))
    }

    fn copy_texture(&self, src: TextureId, dst: TextureId) -> Result<(), GfxError> {
        self.copies.lock().push((src, dst));
        Ok(())
    }

    fn begin_pass<'a>(&'a self, desc: &RenderPassDesc) -> Result<Box<dyn PassEncoder + 'a>, GfxError> {
        self.passes.lock().push(desc.name.clone());
        Ok(Box::new(NullPassEncoder {
            device: self,
            pass: desc.name.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_device_ids_are_unique() {
        let dev = NullDevice::new();
        let a = dev.create_buffer(BufferUsage::Vertex, &[]).unwrap();
        let b = dev.create_buffer(BufferUsage::Index, &[]).unwrap();
        assert_ne!(a, b);
        let t = dev
            .create_texture(&TextureDesc {
                dimension: TextureDimension::D2,
                format: Format::Rgba8,
                width: 4,
                height: 4,
                depth: 1,
                num_levels: 1,
                usage: TextureUsage::Sampled,
            })
            .unwrap();
        assert_ne!(t.0, b.0);
    }

    #[test]
    fn test_null_device_records_passes_and_copies() {
        let dev = NullDevice::new();
        let src = TextureId(100);
        let dst = TextureId(101);
        dev.copy_texture(src, dst).unwrap();
        {
            let _enc = dev
                .begin_pass(&RenderPassDesc {
                    name: "Main".into(),
                    color: None,
                    depth: None,
                })
                .unwrap();
        }
        assert_eq!(dev.copies.lock().as_slice(), &[(src, dst)]);
        assert_eq!(dev.passes.lock().as_slice(), &["Main".to_string()]);
    }
}
