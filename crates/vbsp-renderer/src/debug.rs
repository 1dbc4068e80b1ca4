//! Debug visualization of precomputed ambient lighting samples: a small
//! cube per sample, each face flat-shaded with that face's ambient color.

use bytemuck::{Pod, Zeroable};

use vbsp_common::math::{mat4_from_translation, mat4_multiply, Vec3};

use crate::gfx::{
    BufferId, BufferUsage, GfxError, IndexFormat, InputLayoutDesc, InputLayoutId, ProgramDesc,
    ProgramId, VertexAttribute, VertexFormat,
};
use crate::render_inst::{make_sort_key, RenderInstManager, RenderLayer};
use crate::view::SceneView;
use crate::world::AmbientSample;

const CUBE_SCALE: f32 = 15.0;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CubeVertex {
    // xyz position, w = face index selecting the ambient color.
    pos: [f32; 4],
}

const VERT_SOURCE: &str = r#"
layout(std140) uniform ub_ObjectParams {
    Mat4x4 u_ProjectionViewModel;
    vec4 u_AmbientCube[6];
};

layout(location = 0) in vec4 a_Position;
out vec3 v_Color;

void main() {
    gl_Position = Mul(u_ProjectionViewModel, vec4(a_Position.xyz, 1.0));
    v_Color = u_AmbientCube[int(a_Position.w)].rgb;
}
"#;

const FRAG_SOURCE: &str = r#"
in vec3 v_Color;

void main() {
    gl_FragColor = vec4(v_Color, 1.0);
}
"#;

pub struct DebugCube {
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    input_layout: InputLayoutId,
    program: ProgramId,
}

impl DebugCube {
    pub fn new(device: &dyn crate::gfx::Device) -> Result<Self, GfxError> {
        let mut vertices = Vec::with_capacity(24);
        // Four corners per face; face order matches the ambient cube layout
        // (-X, +X, -Y, +Y, -Z, +Z).
        for (face, corners) in [
            [[-1.0, -1.0, -1.0], [-1.0, -1.0, 1.0], [-1.0, 1.0, -1.0], [-1.0, 1.0, 1.0]],
            [[1.0, -1.0, -1.0], [1.0, 1.0, -1.0], [1.0, -1.0, 1.0], [1.0, 1.0, 1.0]],
            [[-1.0, -1.0, -1.0], [1.0, -1.0, -1.0], [-1.0, -1.0, 1.0], [1.0, -1.0, 1.0]],
            [[-1.0, 1.0, -1.0], [-1.0, 1.0, 1.0], [1.0, 1.0, -1.0], [1.0, 1.0, 1.0]],
            [[-1.0, -1.0, -1.0], [-1.0, 1.0, -1.0], [1.0, -1.0, -1.0], [1.0, 1.0, -1.0]],
            [[-1.0, -1.0, 1.0], [1.0, -1.0, 1.0], [-1.0, 1.0, 1.0], [1.0, 1.0, 1.0]],
        ]
        .iter()
        .enumerate()
        {
            for c in corners {
                vertices.push(CubeVertex {
                    pos: [c[0], c[1], c[2], face as f32],
                });
            }
        }

        let mut indices = Vec::with_capacity(36);
        for face in 0..6u16 {
            let base = face * 4;
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 1, base + 3, base + 2]);
        }

        let vertex_buffer =
            device.create_buffer(BufferUsage::Vertex, bytemuck::cast_slice(&vertices))?;
        let index_buffer =
            device.create_buffer(BufferUsage::Index, bytemuck::cast_slice(&indices))?;
        let input_layout = device.create_input_layout(&InputLayoutDesc {
            attributes: vec![VertexAttribute {
                location: 0,
                byte_offset: 0,
                format: VertexFormat::F32x4,
            }],
            byte_stride: 16,
            index_format: IndexFormat::U16,
        })?;
        let program = device.create_program(&ProgramDesc {
            name: "debug_cube".to_string(),
            vert: VERT_SOURCE.to_string(),
            frag: FRAG_SOURCE.to_string(),
        })?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            input_layout,
            program,
        })
    }

    pub fn prepare_to_render(
        &self,
        rim: &RenderInstManager,
        view: &mut SceneView,
        position: &Vec3,
        sample: &AmbientSample,
    ) {
        let mut draw = rim.new_render_inst();
        draw.geometry.input_layout = Some(self.input_layout);
        draw.geometry.vertex_buffer = Some(self.vertex_buffer);
        draw.geometry.index_buffer = Some(self.index_buffer);
        draw.program = Some(self.program);
        draw.sort_key = make_sort_key(RenderLayer::Overlay, Some(self.program));

        let mut model = mat4_from_translation(position);
        model[0] = CUBE_SCALE;
        model[5] = CUBE_SCALE;
        model[10] = CUBE_SCALE;

        draw.uniforms.clear();
        draw.push_matrix(&mat4_multiply(&view.clip_from_world, &model));
        for color in &sample.ambient_cube {
            draw.uniforms.extend_from_slice(&[color[0], color[1], color[2], 1.0]);
        }

        draw.draw_indexes(36, 0);
        view.main_list.submit(draw);
    }

    pub fn destroy(&self, device: &dyn crate::gfx::Device) {
        device.destroy_buffer(self.vertex_buffer);
        device.destroy_buffer(self.index_buffer);
    }
}
