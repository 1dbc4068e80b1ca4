//! Per-surface and per-model render submission.
//!
//! The world-spawn model runs the two-phase scheme: displacement surfaces
//! are tested directly against the PVS (their geometry drapes across leaf
//! boundaries, so tree gating would be wrong), then a BSP descent gathers
//! the live surface set for everything else. Brush-entity models skip the
//! tree entirely and submit every surface as a flat batch.

use std::collections::{BTreeSet, HashMap};

use vbsp_common::bitset::BitSet;
use vbsp_common::math::{mat4_transform_point, view_space_depth, Mat4, MAT4_IDENTITY};

use crate::materials::{render_inst_list_for_view, MaterialHandle, RenderContext};
use crate::render_inst::{make_sort_key, set_sort_key_depth, RenderInstManager};
use crate::view::SceneView;
use crate::world::{WorldData, CLUSTER_INVALID};

// ============================================================
// Surface renderer
// ============================================================

/// Wraps one immutable surface with its mutable per-frame state: a host
/// visibility toggle and the asynchronously-resolved material.
pub struct SurfaceRenderer {
    /// Settable externally, e.g. by scripted entities hiding geometry.
    pub visible: bool,
    surface_index: u32,
    material: Option<MaterialHandle>,
    /// For displacement surfaces: the clusters whose leaves intersect the
    /// surface bounds. Tested directly against the PVS.
    pub cluster_set: Vec<u16>,
}

impl SurfaceRenderer {
    fn new(surface_index: u32) -> Self {
        Self {
            visible: true,
            surface_index,
            material: None,
            cluster_set: Vec::new(),
        }
    }

    pub fn surface_index(&self) -> u32 {
        self.surface_index
    }

    pub fn bind_material(&mut self, material: MaterialHandle) {
        self.material = Some(material);
    }

    pub fn movement(&mut self, ctx: &RenderContext) {
        if !self.visible {
            return;
        }
        if let Some(material) = &self.material {
            if let Some(mut instance) = material.instance() {
                instance.movement(ctx);
            }
        }
    }

    /// Cull and, if alive, submit one draw for this surface.
    ///
    /// `pvs` is only passed for the displacement pre-pass; tree-gathered
    /// surfaces were already visibility-tested per leaf.
    pub fn prepare_to_render(
        &self,
        world: &WorldData,
        ctx: &RenderContext,
        rim: &RenderInstManager,
        view: &mut SceneView,
        model_matrix: &Mat4,
        pvs: Option<&BitSet>,
    ) {
        if !self.visible {
            return;
        }
        // Not-yet-resolved material: contribute nothing, retry next frame.
        let Some(material) = &self.material else {
            return;
        };
        let Some(instance) = material.instance() else {
            return;
        };
        if !instance.is_loaded() || !instance.is_visible(ctx) {
            return;
        }

        if let Some(pvs) = pvs {
            // Union semantics: one visible cluster keeps the surface alive.
            if !self.cluster_set.iter().any(|&c| pvs.get(c as usize)) {
                return;
            }
        }

        let surface = &world.surfaces[self.surface_index as usize];
        if let Some(bbox) = &surface.bbox {
            if !view.frustum.contains(&bbox.transform(model_matrix)) {
                return;
            }
        }

        let mut draw = rim.new_render_inst();
        draw.program = instance.program();
        draw.sort_key = make_sort_key(instance.layer(), instance.program());
        instance.bind_to_draw(&mut draw, model_matrix, surface.lightmap_page_index);
        draw.draw_indexes(surface.index_count, surface.start_index);

        if let Some(center) = &surface.center {
            let world_center = mat4_transform_point(model_matrix, center);
            let depth = view_space_depth(&view.view_from_world, &world_center);
            draw.sort_key = set_sort_key_depth(draw.sort_key, depth);
        }

        render_inst_list_for_view(&**instance, view).submit(draw);
    }
}

// ============================================================
// Model renderer
// ============================================================

/// Renders one BSP model: the world spawn through tree descent, brush
/// entities as flat batches under entity control.
pub struct ModelRenderer {
    pub visible: bool,
    pub model_matrix: Mat4,
    model_index: usize,
    surfaces: Vec<SurfaceRenderer>,
    /// World surface index -> position in `surfaces`.
    surface_slots: HashMap<u32, usize>,
    displacement_surfaces: Vec<usize>,
    materials: HashMap<String, MaterialHandle>,
    materials_bound: bool,
}

impl ModelRenderer {
    pub fn new(ctx: &RenderContext, world: &WorldData, model_index: usize) -> Self {
        let model = &world.models[model_index];

        let mut surfaces = Vec::with_capacity(model.surfaces.len());
        let mut surface_slots = HashMap::with_capacity(model.surfaces.len());
        let mut displacement_surfaces = Vec::new();

        for &surface_index in &model.surfaces {
            let mut renderer = SurfaceRenderer::new(surface_index);
            let surface = &world.surfaces[surface_index as usize];
            if surface.is_displacement {
                if let Some(bbox) = &surface.bbox {
                    world.mark_cluster_set(&mut renderer.cluster_set, bbox);
                }
                displacement_surfaces.push(surfaces.len());
            }
            surface_slots.insert(surface_index, surfaces.len());
            surfaces.push(renderer);
        }

        // Request every distinct material concurrently; assignment happens
        // once all of them have settled (see poll_materials).
        let names: BTreeSet<&str> = model
            .surfaces
            .iter()
            .map(|&i| world.surfaces[i as usize].tex_name.as_str())
            .collect();
        let materials = names
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    ctx.material_cache.create_material_instance(name),
                )
            })
            .collect();

        Self {
            visible: true,
            model_matrix: MAT4_IDENTITY,
            model_index,
            surfaces,
            surface_slots,
            displacement_surfaces,
            materials,
            materials_bound: false,
        }
    }

    pub fn model_index(&self) -> usize {
        self.model_index
    }

    pub fn surface_renderer_mut(&mut self, surface_index: u32) -> Option<&mut SurfaceRenderer> {
        let slot = *self.surface_slots.get(&surface_index)?;
        Some(&mut self.surfaces[slot])
    }

    pub fn materials_bound(&self) -> bool {
        self.materials_bound
    }

    /// Assign material handles onto surfaces once every requested material
    /// has settled. Surfaces whose material failed stay unbound and never
    /// draw.
    fn poll_materials(&mut self, world: &WorldData) {
        if self.materials_bound {
            return;
        }
        if self.materials.values().any(|h| h.is_pending()) {
            return;
        }

        for renderer in &mut self.surfaces {
            let name = &world.surfaces[renderer.surface_index as usize].tex_name;
            if let Some(handle) = self.materials.get(name) {
                if !handle.is_failed() {
                    renderer.bind_material(handle.clone());
                }
            }
        }
        self.materials_bound = true;
    }

    /// Per-frame tick: material readiness polling and parameter animation.
    /// Polling is not gated on visibility, so hidden models are ready the
    /// moment an entity lifts them into the world.
    pub fn movement(&mut self, world: &WorldData, ctx: &RenderContext) {
        self.poll_materials(world);
        if !self.visible {
            return;
        }
        for surface in &mut self.surfaces {
            surface.movement(ctx);
        }
    }

    /// Descend the tree from this model's head node, intersecting node and
    /// leaf bounds (transformed by the model matrix) with the frustum and
    /// gating leaves by the PVS. Live leaves and surfaces accumulate into
    /// the caller-owned sets; a surface reachable from several leaves lands
    /// in the set once.
    pub fn gather_surfaces(
        &self,
        world: &WorldData,
        mut live_surfaces: Option<&mut BitSet>,
        mut live_leaves: Option<&mut BitSet>,
        pvs: Option<&BitSet>,
        view: &SceneView,
    ) {
        let headnode = world.models[self.model_index].headnode;
        self.gather_node(
            world,
            &mut live_surfaces,
            &mut live_leaves,
            pvs,
            view,
            headnode,
        );
    }

    fn gather_node(
        &self,
        world: &WorldData,
        live_surfaces: &mut Option<&mut BitSet>,
        live_leaves: &mut Option<&mut BitSet>,
        pvs: Option<&BitSet>,
        view: &SceneView,
        nodeid: i32,
    ) {
        if nodeid >= 0 {
            let node = &world.nodes[nodeid as usize];

            if !view.frustum.contains(&node.bbox.transform(&self.model_matrix)) {
                return;
            }

            self.gather_node(world, live_surfaces, live_leaves, pvs, view, node.children[0]);
            self.gather_node(world, live_surfaces, live_leaves, pvs, view, node.children[1]);
        } else {
            let leafnum = (-nodeid - 1) as usize;
            let leaf = &world.leaves[leafnum];

            // The sentinel cluster must never reject; leaves with real
            // clusters are gated by the PVS bit.
            if let Some(pvs) = pvs {
                if leaf.cluster != CLUSTER_INVALID && !pvs.get(leaf.cluster as usize) {
                    return;
                }
            }

            if !view.frustum.contains(&leaf.bbox.transform(&self.model_matrix)) {
                return;
            }

            if let Some(leaves) = live_leaves.as_deref_mut() {
                leaves.set(leafnum, true);
            }
            if let Some(surfaces) = live_surfaces.as_deref_mut() {
                for &surface in &leaf.surfaces {
                    surfaces.set(surface as usize, true);
                }
            }
        }
    }

    fn prepare_to_render_common(&self, world: &WorldData, view: &SceneView) -> bool {
        if !self.visible {
            return false;
        }
        let bbox = world.models[self.model_index].bbox.transform(&self.model_matrix);
        view.frustum.contains(&bbox)
    }

    /// Brush-entity path: no tree descent, every surface tested and
    /// submitted directly as one rigid batch.
    pub fn prepare_to_render_model(
        &self,
        world: &WorldData,
        ctx: &RenderContext,
        rim: &RenderInstManager,
        view: &mut SceneView,
    ) {
        if !self.prepare_to_render_common(world, view) {
            return;
        }

        for surface in &self.surfaces {
            surface.prepare_to_render(world, ctx, rim, view, &self.model_matrix, None);
        }
    }

    /// World-spawn path: displacement pre-pass, tree-gathered live set,
    /// then overlays unioned in unconditionally.
    pub fn prepare_to_render_world(
        &self,
        world: &WorldData,
        ctx: &RenderContext,
        rim: &RenderInstManager,
        view: &mut SceneView,
        pvs: &BitSet,
        live_surfaces: &mut BitSet,
    ) {
        if !self.prepare_to_render_common(world, view) {
            return;
        }

        for &slot in &self.displacement_surfaces {
            self.surfaces[slot].prepare_to_render(
                world,
                ctx,
                rim,
                view,
                &self.model_matrix,
                Some(pvs),
            );
        }

        live_surfaces.clear();
        self.gather_surfaces(world, Some(&mut *live_surfaces), None, Some(pvs), view);
        for &overlay in &world.overlays {
            live_surfaces.set(overlay as usize, true);
        }

        for surface_index in live_surfaces.iter_ones() {
            let Some(&slot) = self.surface_slots.get(&(surface_index as u32)) else {
                continue;
            };
            // Displacement surfaces were already submitted by the pre-pass.
            if world.surfaces[surface_index].is_displacement {
                continue;
            }
            self.surfaces[slot].prepare_to_render(world, ctx, rim, view, &self.model_matrix, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        pump_model, ready_surface_renderer, test_context, test_world, wide_camera_at,
    };
    use crate::view::SceneView;

    fn view_at(pos: [f32; 3]) -> SceneView {
        let mut view = SceneView::new();
        view.setup_from_camera(&wide_camera_at(pos), None);
        view
    }

    #[test]
    fn test_gather_respects_pvs_and_is_idempotent() {
        let world = test_world();
        let (_dev, ctx) = test_context();
        let model = ModelRenderer::new(&ctx, &world, 0);
        let view = view_at([50.0, 50.0, 50.0]);

        // PVS(5) = {5, 9}: surfaces in clusters 5 and 9 become candidates,
        // cluster 12 is never gathered regardless of the frustum.
        let mut pvs = BitSet::new(16);
        pvs.set(5, true);
        pvs.set(9, true);

        let mut live = BitSet::new(world.surfaces.len());
        model.gather_surfaces(&world, Some(&mut live), None, Some(&pvs), &view);
        let first: Vec<usize> = live.iter_ones().collect();
        assert_eq!(first, vec![0, 1]);

        // Clear and rebuild reproduces the same set as a single call.
        live.clear();
        model.gather_surfaces(&world, Some(&mut live), None, Some(&pvs), &view);
        let second: Vec<usize> = live.iter_ones().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_gather_all_visible_includes_cluster_12() {
        let world = test_world();
        let (_dev, ctx) = test_context();
        let model = ModelRenderer::new(&ctx, &world, 0);
        let view = view_at([50.0, 50.0, 50.0]);

        // The all-visible fallback must not cull anything on PVS grounds.
        let mut pvs = BitSet::new(16);
        pvs.fill(true);

        let mut live = BitSet::new(world.surfaces.len());
        model.gather_surfaces(&world, Some(&mut live), None, Some(&pvs), &view);
        let gathered: Vec<usize> = live.iter_ones().collect();
        assert_eq!(gathered, vec![0, 1, 2]);
    }

    #[test]
    fn test_gather_collects_live_leaves() {
        let world = test_world();
        let (_dev, ctx) = test_context();
        let model = ModelRenderer::new(&ctx, &world, 0);
        let view = view_at([50.0, 50.0, 50.0]);

        let mut pvs = BitSet::new(16);
        pvs.set(5, true);
        pvs.set(9, true);

        let mut leaves = BitSet::new(world.leaves.len());
        model.gather_surfaces(&world, None, Some(&mut leaves), Some(&pvs), &view);
        let live: Vec<usize> = leaves.iter_ones().collect();
        assert_eq!(live, vec![0, 1]);
    }

    #[test]
    fn test_displacement_cluster_set_union_semantics() {
        let world = test_world();
        let (_dev, ctx) = test_context();
        let mut renderer = SurfaceRenderer::new(4);
        renderer.cluster_set = vec![3, 4];
        ready_surface_renderer(&ctx, &mut renderer, "nature/blendrock");

        let rim = RenderInstManager::new();
        let mut view = view_at([50.0, 50.0, 50.0]);

        // Only bit 3 set: one matching cluster suffices.
        let mut pvs = BitSet::new(16);
        pvs.set(3, true);
        renderer.prepare_to_render(&world, &ctx, &rim, &mut view, &MAT4_IDENTITY, Some(&pvs));
        assert_eq!(view.main_list.len(), 1);

        // Neither cluster visible: skipped.
        let mut pvs = BitSet::new(16);
        pvs.set(7, true);
        renderer.prepare_to_render(&world, &ctx, &rim, &mut view, &MAT4_IDENTITY, Some(&pvs));
        assert_eq!(view.main_list.len(), 1);
    }

    #[test]
    fn test_surface_not_ready_contributes_nothing() {
        let world = test_world();
        let (_dev, ctx) = test_context();
        let renderer = SurfaceRenderer::new(0);

        let rim = RenderInstManager::new();
        let mut view = view_at([50.0, 50.0, 50.0]);
        // No material bound at all.
        renderer.prepare_to_render(&world, &ctx, &rim, &mut view, &MAT4_IDENTITY, None);
        assert!(view.main_list.is_empty());
    }

    #[test]
    fn test_hidden_surface_contributes_nothing() {
        let world = test_world();
        let (_dev, ctx) = test_context();
        let mut renderer = SurfaceRenderer::new(0);
        ready_surface_renderer(&ctx, &mut renderer, "brick/wall01");
        renderer.visible = false;

        let rim = RenderInstManager::new();
        let mut view = view_at([50.0, 50.0, 50.0]);
        renderer.prepare_to_render(&world, &ctx, &rim, &mut view, &MAT4_IDENTITY, None);
        assert!(view.main_list.is_empty());
    }

    #[test]
    fn test_world_spawn_submits_pvs_surfaces_only() {
        let world = test_world();
        let (_dev, ctx) = test_context();
        let mut model = ModelRenderer::new(&ctx, &world, 0);
        pump_model(&ctx, &world, &mut model);

        let mut view = view_at([50.0, 50.0, 50.0]);
        let rim = RenderInstManager::new();

        let mut pvs = BitSet::new(16);
        pvs.set(5, true);
        pvs.set(9, true);

        let mut live = BitSet::new(world.surfaces.len());
        model.prepare_to_render_world(&world, &ctx, &rim, &mut view, &pvs, &mut live);

        // Surfaces 0 and 1 via the tree. The displacement surface (4) spans
        // clusters {5, 9} and is submitted by the pre-pass. Surface 2 is in
        // cluster 12 and must not appear.
        assert_eq!(view.main_list.len(), 3);
    }

    #[test]
    fn test_overlay_surfaces_always_unioned() {
        let mut world = test_world();
        // Declare the cluster-12 surface as an overlay: drawn regardless of
        // tree reachability.
        world.overlays.push(2);

        let (_dev, ctx) = test_context();
        let mut model = ModelRenderer::new(&ctx, &world, 0);
        pump_model(&ctx, &world, &mut model);

        let mut view = view_at([50.0, 50.0, 50.0]);
        let rim = RenderInstManager::new();
        let mut pvs = BitSet::new(16);
        pvs.set(5, true);

        let mut live = BitSet::new(world.surfaces.len());
        model.prepare_to_render_world(&world, &ctx, &rim, &mut view, &pvs, &mut live);
        assert!(live.get(2));
    }

    #[test]
    fn test_hidden_brush_model_contributes_zero_draws() {
        let world = test_world();
        let (_dev, ctx) = test_context();
        let mut model = ModelRenderer::new(&ctx, &world, 1);
        pump_model(&ctx, &world, &mut model);
        model.visible = false;

        let mut view = view_at([50.0, 50.0, 50.0]);
        let rim = RenderInstManager::new();
        model.prepare_to_render_model(&world, &ctx, &rim, &mut view);
        assert!(view.main_list.is_empty());
        assert!(view.indirect_list.is_empty());
    }

    #[test]
    fn test_brush_model_submits_without_tree() {
        let world = test_world();
        let (_dev, ctx) = test_context();
        let mut model = ModelRenderer::new(&ctx, &world, 1);
        pump_model(&ctx, &world, &mut model);

        let mut view = view_at([50.0, 50.0, 50.0]);
        let rim = RenderInstManager::new();
        model.prepare_to_render_model(&world, &ctx, &rim, &mut view);
        assert_eq!(view.main_list.len() + view.indirect_list.len(), 1);
    }

    #[test]
    fn test_materials_poll_until_settled() {
        let world = test_world();
        let (_dev, ctx) = test_context();
        let mut model = ModelRenderer::new(&ctx, &world, 0);
        // Nothing can be bound before the cache drains.
        assert!(!model.materials_bound());

        pump_model(&ctx, &world, &mut model);
        assert!(model.materials_bound());
    }
}
