//! Top-level scene renderer: owns the views, the PVS scratch, the per-world
//! renderers, and the frame's render graph.
//!
//! Frame shape: drain finished material loads, set up the views, run
//! movement, submit skybox/world/entity/prop draws into the per-view lists,
//! then execute the declared pass sequence (skybox, main scene, indirect
//! framebuffer-reading effects, color grading, anti-aliasing) and reset
//! the views.

use std::sync::Arc;

use bitflags::bitflags;
use log::info;
use thiserror::Error;

use vbsp_common::bitset::BitSet;
use vbsp_common::math::{mat4_from_translation, Mat4, Vec3};

use crate::color_grading::ColorCorrection;
use crate::debug::DebugCube;
use crate::gfx::{
    BufferId, BufferUsage, Format, GfxError, IndexFormat, InputLayoutDesc, ProgramDesc, ProgramId,
    SamplerDesc, SamplerId, TexFilter, TextureId, VertexAttribute, VertexFormat, WrapMode,
};
use crate::graph::{GraphBuilder, RenderPass, RenderTargetDesc};
use crate::materials::RenderContext;
use crate::props::{DetailPropLeafRenderer, StaticPropRenderer};
use crate::render_inst::{
    DrawInstance, GeometryBinding, LateBindingTexture, RenderInstManager, TextureBinding,
};
use crate::skybox::SkyboxRenderer;
use crate::surfaces::ModelRenderer;
use crate::view::{Camera, SceneView};
use crate::vis::compute_pvs;
use crate::world::{WorldData, WorldError};

#[derive(Debug, Error)]
pub enum SceneError {
    #[error(transparent)]
    World(#[from] WorldError),
    #[error(transparent)]
    Gfx(#[from] GfxError),
}

bitflags! {
    /// Which draw sources a view wants submitted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RenderObjectKind: u32 {
        const WORLD_SPAWN  = 1 << 0;
        const ENTITIES     = 1 << 1;
        const STATIC_PROPS = 1 << 2;
        const DETAIL_PROPS = 1 << 3;
        const DEBUG_CUBES  = 1 << 4;
    }
}

/// World anchor for the 3-D skybox: the main camera is re-expressed
/// relative to this transform so the sky room renders around it.
pub struct SkyCamera {
    pub model_matrix: Mat4,
}

/// Host input for one frame.
pub struct FrameInput {
    pub camera: Camera,
    pub time_seconds: f64,
    pub width: u32,
    pub height: u32,
    /// Backbuffer the finished frame resolves into.
    pub onscreen_texture: TextureId,
}

// ============================================================
// Per-world renderer
// ============================================================

/// Renders one loaded world: its models, props, and debug overlays, all
/// sharing one vertex/index buffer pair bound through the template.
pub struct BspRenderer {
    world: Arc<WorldData>,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    geometry: GeometryBinding,
    pub models: Vec<ModelRenderer>,
    pub static_props: Vec<StaticPropRenderer>,
    pub detail_props: Vec<DetailPropLeafRenderer>,
    pub sky_camera: Option<SkyCamera>,
    debug_cube: DebugCube,
}

impl BspRenderer {
    pub fn new(ctx: &RenderContext, world: Arc<WorldData>) -> Result<Self, SceneError> {
        world.validate()?;

        let device = &ctx.device;
        let vertex_buffer = device.create_buffer(BufferUsage::Vertex, &world.vertex_data)?;
        let index_buffer = device.create_buffer(BufferUsage::Index, &world.index_data)?;
        let input_layout = device.create_input_layout(&InputLayoutDesc {
            // position, normal, tangent, texcoord
            attributes: vec![
                VertexAttribute { location: 0, byte_offset: 0, format: VertexFormat::F32x3 },
                VertexAttribute { location: 1, byte_offset: 12, format: VertexFormat::F32x4 },
                VertexAttribute { location: 2, byte_offset: 28, format: VertexFormat::F32x4 },
                VertexAttribute { location: 3, byte_offset: 44, format: VertexFormat::F32x4 },
            ],
            byte_stride: 60,
            index_format: IndexFormat::U32,
        })?;

        let geometry = GeometryBinding {
            input_layout: Some(input_layout),
            vertex_buffer: Some(vertex_buffer),
            index_buffer: Some(index_buffer),
        };

        let models = (0..world.models.len())
            .map(|i| {
                let mut model = ModelRenderer::new(ctx, &world, i);
                // Non-world-spawn models are invisible until an entity
                // lifts them into the world.
                model.visible = i == 0;
                model
            })
            .collect();

        let debug_cube = DebugCube::new(&**device)?;

        info!(
            "world: {} nodes, {} leaves, {} surfaces, {} models, {} clusters",
            world.nodes.len(),
            world.leaves.len(),
            world.surfaces.len(),
            world.models.len(),
            world.visibility.num_clusters(),
        );

        Ok(Self {
            world,
            vertex_buffer,
            index_buffer,
            geometry,
            models,
            static_props: Vec::new(),
            detail_props: Vec::new(),
            sky_camera: None,
            debug_cube,
        })
    }

    pub fn world(&self) -> &Arc<WorldData> {
        &self.world
    }

    pub fn movement(&mut self, ctx: &RenderContext) {
        for model in &mut self.models {
            model.movement(&self.world, ctx);
        }
        for prop in &mut self.static_props {
            prop.movement(ctx);
        }
    }

    /// Submit this world's draws for one view, filtered by `kinds`. The PVS
    /// must already reflect the view's camera (all-ones when lookup failed).
    #[allow(clippy::too_many_arguments)]
    pub fn prepare_to_render_view(
        &self,
        ctx: &RenderContext,
        rim: &mut RenderInstManager,
        view: &mut SceneView,
        pvs: &BitSet,
        kinds: RenderObjectKind,
        live_surfaces: &mut BitSet,
        live_leaves: &mut BitSet,
    ) {
        rim.push_template();
        {
            let template = rim.template_mut();
            template.geometry = self.geometry;
            template.uniforms.clear();
            template.push_matrix(&view.clip_from_world);
        }

        if kinds.contains(RenderObjectKind::WORLD_SPAWN) {
            if let Some(world_spawn) = self.models.first() {
                world_spawn.prepare_to_render_world(
                    &self.world,
                    ctx,
                    rim,
                    view,
                    pvs,
                    live_surfaces,
                );
            }
        }

        if kinds.contains(RenderObjectKind::ENTITIES) {
            for model in self.models.iter().skip(1) {
                model.prepare_to_render_model(&self.world, ctx, rim, view);
            }
        }

        if kinds.contains(RenderObjectKind::STATIC_PROPS) {
            for prop in &self.static_props {
                prop.prepare_to_render(&self.world, ctx, rim, view, pvs);
            }
        }

        if kinds.contains(RenderObjectKind::DETAIL_PROPS) {
            live_leaves.clear();
            if let Some(world_spawn) = self.models.first() {
                world_spawn.gather_surfaces(
                    &self.world,
                    None,
                    Some(&mut *live_leaves),
                    Some(pvs),
                    view,
                );
            }
            for detail in &self.detail_props {
                if live_leaves.get(detail.leaf as usize) {
                    detail.prepare_to_render(ctx, rim, view);
                }
            }
        }

        if kinds.contains(RenderObjectKind::DEBUG_CUBES) {
            for leaf_index in live_leaves.iter_ones() {
                let leaf = &self.world.leaves[leaf_index];
                if !leaf.debug {
                    continue;
                }
                for sample in &leaf.ambient_samples {
                    self.debug_cube.prepare_to_render(rim, view, &sample.pos, sample);
                }
            }
        }

        rim.pop_template();
    }

    pub fn destroy(&self, ctx: &RenderContext) {
        ctx.device.destroy_buffer(self.vertex_buffer);
        ctx.device.destroy_buffer(self.index_buffer);
        self.debug_cube.destroy(&*ctx.device);
    }
}

// ============================================================
// Frame scratch
// ============================================================

/// Caller-owned scratch reused every frame, never reallocated in steady
/// state. Single writer, sequential readers, enforced by call order.
#[derive(Default)]
struct FrameScratch {
    pvs: BitSet,
    live_surfaces: BitSet,
    live_leaves: BitSet,
}

impl FrameScratch {
    fn ensure_world(&mut self, world: &WorldData) {
        if self.pvs.len() < world.visibility.num_clusters() {
            self.pvs = BitSet::new(world.visibility.num_clusters());
        }
        if self.live_surfaces.len() < world.surfaces.len() {
            self.live_surfaces = BitSet::new(world.surfaces.len());
        }
        if self.live_leaves.len() < world.leaves.len() {
            self.live_leaves = BitSet::new(world.leaves.len());
        }
    }
}

fn calc_pvs(world: &WorldData, pvs: &mut BitSet, camera_pos: &Vec3, enabled: bool) -> bool {
    if !enabled {
        return false;
    }
    compute_pvs(world, pvs, camera_pos)
}

// ============================================================
// Fullscreen programs
// ============================================================

const POST_VERT: &str = r#"
out vec2 v_TexCoord;

void main() {
    // Fullscreen triangle from gl_VertexID.
    v_TexCoord = vec2((gl_VertexID << 1) & 2, gl_VertexID & 2);
    gl_Position = vec4(v_TexCoord * 2.0 - 1.0, 1.0, 1.0);
}
"#;

const POST_FRAG: &str = r#"
precision mediump float; precision lowp sampler3D;
uniform sampler2D u_FramebufferColor;
uniform sampler3D u_ColorCorrectTexture;
in vec2 v_TexCoord;

void main() {
    vec4 t_Color = texture(u_FramebufferColor, v_TexCoord);
    t_Color.rgb = pow(t_Color.rgb, vec3(1.0 / 2.2));

    vec3 t_Size = vec3(textureSize(u_ColorCorrectTexture, 0));
    vec3 t_TexCoord = t_Color.rgb * ((t_Size - 1.0) / t_Size) + (0.5 / t_Size);
    t_Color.rgb = texture(u_ColorCorrectTexture, t_TexCoord).rgb;

    gl_FragColor = t_Color;
}
"#;

const AA_FRAG: &str = r#"
precision mediump float;
uniform sampler2D u_FramebufferColor;
in vec2 v_TexCoord;

void main() {
    // FXAA-style luma edge blend.
    vec2 t_Texel = 1.0 / vec2(textureSize(u_FramebufferColor, 0));
    vec3 t_C  = texture(u_FramebufferColor, v_TexCoord).rgb;
    vec3 t_N  = texture(u_FramebufferColor, v_TexCoord + vec2(0.0, -t_Texel.y)).rgb;
    vec3 t_S  = texture(u_FramebufferColor, v_TexCoord + vec2(0.0,  t_Texel.y)).rgb;
    vec3 t_E  = texture(u_FramebufferColor, v_TexCoord + vec2( t_Texel.x, 0.0)).rgb;
    vec3 t_W  = texture(u_FramebufferColor, v_TexCoord + vec2(-t_Texel.x, 0.0)).rgb;
    gl_FragColor = vec4((t_C * 4.0 + t_N + t_S + t_E + t_W) / 8.0, 1.0);
}
"#;

// ============================================================
// Scene renderer
// ============================================================

pub struct SceneRenderer {
    pub ctx: RenderContext,
    pub skybox: Option<SkyboxRenderer>,
    pub bsp_renderers: Vec<BspRenderer>,

    pub main_view: SceneView,
    pub skybox_view: SceneView,

    // Debug & settings.
    pub draw_skybox_2d: bool,
    pub draw_skybox_3d: bool,
    pub draw_world: bool,
    pub pvs_enabled: bool,

    pub color_correction: ColorCorrection,

    rim: RenderInstManager,
    scratch: FrameScratch,

    linear_sampler: SamplerId,
    point_sampler: SamplerId,
    post_program: ProgramId,
    aa_program: ProgramId,
}

impl SceneRenderer {
    pub fn new(ctx: RenderContext) -> Result<Self, GfxError> {
        let device = &ctx.device;

        let linear_sampler = device.create_sampler(&SamplerDesc {
            min_filter: TexFilter::Bilinear,
            mag_filter: TexFilter::Bilinear,
            wrap: WrapMode::Clamp,
        })?;
        let point_sampler = device.create_sampler(&SamplerDesc {
            min_filter: TexFilter::Point,
            mag_filter: TexFilter::Point,
            wrap: WrapMode::Clamp,
        })?;

        let post_program = device.create_program(&ProgramDesc {
            name: "fullscreen_post".to_string(),
            vert: POST_VERT.to_string(),
            frag: POST_FRAG.to_string(),
        })?;
        let aa_program = device.create_program(&ProgramDesc {
            name: "antialias".to_string(),
            vert: POST_VERT.to_string(),
            frag: AA_FRAG.to_string(),
        })?;

        let color_correction = ColorCorrection::new(&**device)?;

        Ok(Self {
            ctx,
            skybox: None,
            bsp_renderers: Vec::new(),
            main_view: SceneView::new(),
            skybox_view: SceneView::new(),
            draw_skybox_2d: true,
            draw_skybox_3d: true,
            draw_world: true,
            pvs_enabled: true,
            color_correction,
            rim: RenderInstManager::new(),
            scratch: FrameScratch::default(),
            linear_sampler,
            point_sampler,
            post_program,
            aa_program,
        })
    }

    /// Load a world into the scene. Validation failures are fatal here and
    /// never reach per-frame code.
    pub fn add_bsp(&mut self, world: Arc<WorldData>) -> Result<usize, SceneError> {
        self.scratch.ensure_world(&world);
        let renderer = BspRenderer::new(&self.ctx, world)?;
        self.bsp_renderers.push(renderer);
        Ok(self.bsp_renderers.len() - 1)
    }

    pub fn set_skybox(&mut self, skyname: &str) -> Result<(), GfxError> {
        if let Some(old) = self.skybox.take() {
            old.destroy(&self.ctx);
        }
        self.skybox = Some(SkyboxRenderer::new(&self.ctx, skyname)?);
        Ok(())
    }

    fn prepare_to_render(&mut self, frame: &FrameInput) {
        self.main_view.setup_from_camera(&frame.camera, None);

        // Position the 2-D skybox around the main camera.
        let sky_anchor = mat4_from_translation(&self.main_view.camera_pos);
        self.skybox_view.setup_from_camera(&frame.camera, Some(&sky_anchor));

        for bsp in &mut self.bsp_renderers {
            bsp.movement(&self.ctx);
        }

        self.rim.push_template();

        if self.draw_skybox_2d {
            if let Some(skybox) = &self.skybox {
                skybox.prepare_to_render(&self.ctx, &mut self.rim, &mut self.skybox_view);
            }
        }

        if self.draw_skybox_3d {
            for i in 0..self.bsp_renderers.len() {
                let Some(sky_matrix) = self.bsp_renderers[i]
                    .sky_camera
                    .as_ref()
                    .map(|sky| sky.model_matrix)
                else {
                    continue;
                };

                // Draw the sky room by placing the view inside it. When its
                // PVS lookup fails the room is in a useless spot; skip it.
                self.skybox_view.setup_from_camera(&frame.camera, Some(&sky_matrix));
                let bsp = &self.bsp_renderers[i];
                let scratch = &mut self.scratch;
                if !calc_pvs(
                    bsp.world(),
                    &mut scratch.pvs,
                    &self.skybox_view.camera_pos,
                    self.pvs_enabled,
                ) {
                    continue;
                }
                bsp.prepare_to_render_view(
                    &self.ctx,
                    &mut self.rim,
                    &mut self.skybox_view,
                    &scratch.pvs,
                    RenderObjectKind::WORLD_SPAWN | RenderObjectKind::STATIC_PROPS,
                    &mut scratch.live_surfaces,
                    &mut scratch.live_leaves,
                );
            }
        }

        if self.draw_world {
            for bsp in &self.bsp_renderers {
                let scratch = &mut self.scratch;
                if !calc_pvs(
                    bsp.world(),
                    &mut scratch.pvs,
                    &self.main_view.camera_pos,
                    self.pvs_enabled,
                ) {
                    // No valid PVS: everything is visible.
                    scratch.pvs.fill(true);
                }

                bsp.prepare_to_render_view(
                    &self.ctx,
                    &mut self.rim,
                    &mut self.main_view,
                    &scratch.pvs,
                    RenderObjectKind::all(),
                    &mut scratch.live_surfaces,
                    &mut scratch.live_leaves,
                );
            }
        }

        self.rim.pop_template();
    }

    fn reset_views(&mut self) {
        self.main_view.reset();
        self.skybox_view.reset();
    }

    /// Render one frame: cull, submit, and execute the pass graph.
    pub fn render(&mut self, frame: &FrameInput) -> Result<(), GfxError> {
        self.ctx.global_delta_time = frame.time_seconds - self.ctx.global_time;
        self.ctx.global_time = frame.time_seconds;

        // Drain material loads that finished since last frame; geometry
        // whose materials are still in flight simply stays invisible.
        self.ctx.material_cache.process_completed(&*self.ctx.device);

        self.prepare_to_render(frame);
        self.color_correction.prepare_to_render(&*self.ctx.device)?;

        let mut builder = GraphBuilder::new();

        let main_color = builder.create_render_target(RenderTargetDesc {
            name: "Main Color (sRGB)".to_string(),
            format: Format::Rgba8Srgb,
            width: frame.width,
            height: frame.height,
            clear_color: Some([0.0, 0.0, 0.0, 1.0]),
            clear_depth: None,
        });
        let depth_desc = |name: &str| RenderTargetDesc {
            name: name.to_string(),
            format: Format::Depth32Float,
            width: frame.width,
            height: frame.height,
            clear_color: None,
            clear_depth: Some(1.0),
        };

        // (a) Skybox: color plus its own depth, so sky geometry never
        // occludes the scene.
        {
            let sky_depth = builder.create_render_target(depth_desc("Skybox Depth"));
            let mut pass = RenderPass::new("Skybox");
            pass.attach_color(main_color);
            pass.attach_depth(sky_depth);
            let mut list = std::mem::take(&mut self.skybox_view.main_list);
            pass.set_exec(Box::new(move |encoder, _scope| {
                list.draw_on_pass(encoder);
            }));
            builder.push_pass(pass);
        }

        // (b) Main scene: same color target, fresh depth.
        let main_depth = builder.create_render_target(depth_desc("Main Depth"));
        {
            let mut pass = RenderPass::new("Main");
            pass.attach_color(main_color);
            pass.attach_depth(main_depth);
            let mut list = std::mem::take(&mut self.main_view.main_list);
            pass.set_exec(Box::new(move |encoder, _scope| {
                list.draw_on_pass(encoder);
            }));
            builder.push_pass(pass);
        }

        // (c) Indirect: effects that sample the just-rendered color/depth.
        // They read resolved snapshots, never the live attachments.
        {
            let mut pass = RenderPass::new("Indirect");
            pass.attach_color(main_color);
            pass.attach_depth(main_depth);
            let color_resolve = pass.attach_resolve(main_color);
            let depth_resolve = pass.attach_resolve(main_depth);
            let mut list = std::mem::take(&mut self.main_view.indirect_list);
            let linear = self.linear_sampler;
            let point = self.point_sampler;
            pass.set_exec(Box::new(move |encoder, scope| {
                list.resolve_late_sampler_binding(
                    LateBindingTexture::FramebufferColor,
                    scope.resolve_texture(color_resolve),
                    linear,
                );
                list.resolve_late_sampler_binding(
                    LateBindingTexture::FramebufferDepth,
                    scope.resolve_texture(depth_resolve),
                    point,
                );
                list.draw_on_pass(encoder);
            }));
            builder.push_pass(pass);
        }

        // (d) Fullscreen color grading into the gamma target.
        let gamma_color = builder.create_render_target(RenderTargetDesc {
            name: "Main Color (Gamma)".to_string(),
            format: Format::Rgba8,
            width: frame.width,
            height: frame.height,
            clear_color: None,
            clear_depth: None,
        });
        {
            let mut pass = RenderPass::new("Color Correction");
            pass.attach_color(gamma_color);
            let color_resolve = pass.attach_resolve(main_color);
            let program = self.post_program;
            let linear = self.linear_sampler;
            let (lut_texture, lut_sampler) = self.color_correction.texture_mapping();
            pass.set_exec(Box::new(move |encoder, scope| {
                let mut draw = DrawInstance::default();
                draw.program = Some(program);
                draw.textures.push(TextureBinding {
                    texture: Some(scope.resolve_texture(color_resolve)),
                    sampler: Some(linear),
                    late: None,
                });
                draw.textures.push(TextureBinding {
                    texture: Some(lut_texture),
                    sampler: Some(lut_sampler),
                    late: None,
                });
                draw.draw_primitives(3);
                encoder.draw(&draw);
            }));
            builder.push_pass(pass);
        }

        // (e) Anti-aliasing into the final target, resolved to the
        // backbuffer.
        let aa_color = builder.create_render_target(RenderTargetDesc {
            name: "AA Color".to_string(),
            format: Format::Rgba8,
            width: frame.width,
            height: frame.height,
            clear_color: None,
            clear_depth: None,
        });
        {
            let mut pass = RenderPass::new("Antialiasing");
            pass.attach_color(aa_color);
            let gamma_resolve = pass.attach_resolve(gamma_color);
            let program = self.aa_program;
            let linear = self.linear_sampler;
            pass.set_exec(Box::new(move |encoder, scope| {
                let mut draw = DrawInstance::default();
                draw.program = Some(program);
                draw.textures.push(TextureBinding {
                    texture: Some(scope.resolve_texture(gamma_resolve)),
                    sampler: Some(linear),
                    late: None,
                });
                draw.draw_primitives(3);
                encoder.draw(&draw);
            }));
            builder.push_pass(pass);
        }
        builder.resolve_to_external(aa_color, frame.onscreen_texture);

        let result = builder.execute(&*self.ctx.device);
        self.reset_views();
        result
    }

    pub fn destroy(&mut self) {
        for bsp in &self.bsp_renderers {
            bsp.destroy(&self.ctx);
        }
        self.bsp_renderers.clear();
        if let Some(skybox) = self.skybox.take() {
            skybox.destroy(&self.ctx);
        }
        self.color_correction.destroy(&*self.ctx.device);
    }
}
