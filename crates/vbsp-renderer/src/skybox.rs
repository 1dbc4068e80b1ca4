//! Far-plane skybox: a six-face cube drawn on the background layer.
//!
//! One material per face, requested concurrently; nothing draws until every
//! face's material has finished loading, so the box never appears with
//! missing sides.

use bytemuck::{Pod, Zeroable};

use vbsp_common::math::MAT4_IDENTITY;

use crate::gfx::{
    BufferId, BufferUsage, GfxError, IndexFormat, InputLayoutDesc, InputLayoutId, VertexAttribute,
    VertexFormat,
};
use crate::materials::{render_inst_list_for_view, MaterialHandle, RenderContext};
use crate::render_inst::{make_sort_key, RenderInstManager, RenderLayer};
use crate::view::SceneView;

/// Half-extent of the sky cube, placed just inside the far plane along the
/// diagonal.
const SKY_SIDE: f32 = 30000.0 * 0.57735026; // 30000 * sqrt(1/3)

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SkyVertex {
    pos: [f32; 3],
    uv: [f32; 2],
}

/// Sky textures tile edge-to-edge; clamp half a texel in from the border so
/// bilinear filtering cannot bleed across faces.
fn seam_clamp(v: f32) -> f32 {
    v.clamp(1.0 / 512.0, 511.0 / 512.0)
}

/// Face suffixes in build order, matching the face vertex tables below.
const FACE_SUFFIXES: [&str; 6] = ["rt", "lf", "bk", "ft", "up", "dn"];

fn build_sky_geometry() -> (Vec<SkyVertex>, Vec<u16>) {
    let mut vertices = Vec::with_capacity(6 * 4);
    let mut indices = Vec::with_capacity(6 * 6);
    const S: f32 = SKY_SIDE;

    // Each face: a corner position as a function of (u, v) in {-1, 1}.
    let faces: [fn(f32, f32) -> [f32; 3]; 6] = [
        |u, v| [-u * S, -S, v * S], // rt (-Y)
        |u, v| [u * S, S, v * S],   // lf (+Y)
        |u, v| [-S, u * S, v * S],  // bk (-X)
        |u, v| [S, -u * S, v * S],  // ft (+X)
        |u, v| [v * S, u * S, S],   // up (+Z)
        |u, v| [-v * S, u * S, -S], // dn (-Z)
    ];

    for face in faces {
        let base = vertices.len() as u16;
        for (u, v) in [(-1.0, -1.0), (-1.0, 1.0), (1.0, 1.0), (1.0, -1.0)] {
            vertices.push(SkyVertex {
                pos: face(u, v),
                uv: [
                    seam_clamp(u * 0.5 + 0.5),
                    seam_clamp(1.0 - (v * 0.5 + 0.5)),
                ],
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    (vertices, indices)
}

pub struct SkyboxRenderer {
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    input_layout: InputLayoutId,
    materials: Vec<MaterialHandle>,
}

impl SkyboxRenderer {
    pub fn new(ctx: &RenderContext, skyname: &str) -> Result<Self, GfxError> {
        let (vertices, indices) = build_sky_geometry();

        let device = &ctx.device;
        let vertex_buffer =
            device.create_buffer(BufferUsage::Vertex, bytemuck::cast_slice(&vertices))?;
        let index_buffer =
            device.create_buffer(BufferUsage::Index, bytemuck::cast_slice(&indices))?;
        let input_layout = device.create_input_layout(&InputLayoutDesc {
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    byte_offset: 0,
                    format: VertexFormat::F32x3,
                },
                VertexAttribute {
                    location: 1,
                    byte_offset: 12,
                    format: VertexFormat::F32x2,
                },
            ],
            byte_stride: 20,
            index_format: IndexFormat::U16,
        })?;

        let materials = FACE_SUFFIXES
            .iter()
            .map(|suffix| {
                ctx.material_cache
                    .create_material_instance(&format!("skybox/{skyname}{suffix}"))
            })
            .collect();

        Ok(Self {
            vertex_buffer,
            index_buffer,
            input_layout,
            materials,
        })
    }

    pub fn prepare_to_render(
        &self,
        ctx: &RenderContext,
        rim: &mut RenderInstManager,
        view: &mut SceneView,
    ) {
        // All-or-nothing readiness.
        for material in &self.materials {
            match material.instance() {
                Some(instance) if instance.is_loaded() => {}
                _ => return,
            }
        }

        rim.push_template();
        {
            let template = rim.template_mut();
            template.geometry.input_layout = Some(self.input_layout);
            template.geometry.vertex_buffer = Some(self.vertex_buffer);
            template.geometry.index_buffer = Some(self.index_buffer);
            template.uniforms.clear();
            template.push_matrix(&view.clip_from_world);
        }

        for (i, material) in self.materials.iter().enumerate() {
            let Some(instance) = material.instance() else {
                continue;
            };
            if !instance.is_visible(ctx) {
                continue;
            }
            let mut draw = rim.new_render_inst();
            instance.bind_to_draw(&mut draw, &MAT4_IDENTITY, 0);
            // The skybox always sorts into the background layer, whatever
            // the material claims.
            draw.program = instance.program();
            draw.sort_key = make_sort_key(RenderLayer::Background, instance.program());
            draw.draw_indexes(6, i as u32 * 6);
            render_inst_list_for_view(&**instance, view).submit(draw);
        }

        rim.pop_template();
    }

    pub fn destroy(&self, ctx: &RenderContext) {
        ctx.device.destroy_buffer(self.vertex_buffer);
        ctx.device.destroy_buffer(self.index_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_inst::sort_key_layer;
    use crate::test_support::{test_context, test_context_with_loader, wide_camera_at, TestMaterialLoader};
    use std::sync::Arc;
    use std::time::Duration;

    fn sky_view() -> SceneView {
        let mut view = SceneView::new();
        view.setup_from_camera(&wide_camera_at([0.0; 3]), None);
        view
    }

    #[test]
    fn test_geometry_shape() {
        let (vertices, indices) = build_sky_geometry();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        // Every position sits on the cube surface.
        for v in &vertices {
            assert!(v.pos.iter().any(|c| (c.abs() - SKY_SIDE).abs() < 1e-3));
            // UVs stay inside the seam clamp.
            assert!(v.uv[0] >= 1.0 / 512.0 && v.uv[0] <= 511.0 / 512.0);
        }
    }

    #[test]
    fn test_nothing_draws_until_all_faces_ready() {
        let (_dev, ctx) = test_context();
        let skybox = SkyboxRenderer::new(&ctx, "sky_day01").unwrap();
        let mut rim = RenderInstManager::new();
        let mut view = sky_view();

        // Materials were just requested; nothing can be ready yet.
        skybox.prepare_to_render(&ctx, &mut rim, &mut view);
        assert!(view.main_list.is_empty());

        // Settle all six faces, then all six draw on the background layer.
        for _ in 0..2000 {
            ctx.material_cache.process_completed(&*ctx.device);
            if skybox.materials.iter().all(|m| !m.is_pending()) {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        skybox.prepare_to_render(&ctx, &mut rim, &mut view);
        assert_eq!(view.main_list.len(), 6);
        for inst in view.main_list.insts() {
            assert_eq!(sort_key_layer(inst.sort_key), RenderLayer::Background);
        }
    }

    #[test]
    fn test_one_failed_face_blocks_the_box() {
        let loader = Arc::new(TestMaterialLoader::default());
        loader.fail("skybox/sky_day01up");
        let (_dev, ctx) = test_context_with_loader(loader);

        let skybox = SkyboxRenderer::new(&ctx, "sky_day01").unwrap();
        for _ in 0..2000 {
            ctx.material_cache.process_completed(&*ctx.device);
            if skybox.materials.iter().all(|m| !m.is_pending()) {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let mut rim = RenderInstManager::new();
        let mut view = sky_view();
        skybox.prepare_to_render(&ctx, &mut rim, &mut view);
        assert!(view.main_list.is_empty());
    }
}
