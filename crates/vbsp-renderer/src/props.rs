//! Static and detail prop visibility.
//!
//! Prop meshes come from outside this core (the model cache is an external
//! collaborator); what lives here is their visibility and submission. Static
//! props cull by the clusters of the leaves they occupy plus a frustum test.
//! Detail props are bound to a single leaf and drawn only when that leaf is
//! in the frame's live leaf set, which the caller computes via the world
//! model's tree descent.

use vbsp_common::bitset::BitSet;
use vbsp_common::math::{
    mat4_from_translation, mat4_transform_point, view_space_depth, Aabb, Mat4, Vec3,
};

use crate::materials::{render_inst_list_for_view, MaterialHandle, RenderContext};
use crate::render_inst::{make_sort_key, set_sort_key_depth, GeometryBinding, RenderInstManager};
use crate::view::SceneView;
use crate::world::{WorldData, CLUSTER_INVALID};

/// Externally-supplied mesh for a prop: a geometry binding plus the
/// material shading it.
pub struct PropGeometry {
    pub geometry: GeometryBinding,
    pub start_index: u32,
    pub index_count: u32,
    pub material: MaterialHandle,
}

impl PropGeometry {
    /// Material gate and submission shared by both prop kinds.
    fn submit(
        &self,
        ctx: &RenderContext,
        rim: &RenderInstManager,
        view: &mut SceneView,
        model_matrix: &Mat4,
        depth_anchor: Option<&Vec3>,
    ) {
        let Some(instance) = self.material.instance() else {
            return;
        };
        if !instance.is_loaded() || !instance.is_visible(ctx) {
            return;
        }

        let mut draw = rim.new_render_inst();
        draw.geometry = self.geometry;
        draw.program = instance.program();
        draw.sort_key = make_sort_key(instance.layer(), instance.program());
        instance.bind_to_draw(&mut draw, model_matrix, 0);
        draw.draw_indexes(self.index_count, self.start_index);

        if let Some(anchor) = depth_anchor {
            let world_pos = mat4_transform_point(model_matrix, anchor);
            let depth = view_space_depth(&view.view_from_world, &world_pos);
            draw.sort_key = set_sort_key_depth(draw.sort_key, depth);
        }

        render_inst_list_for_view(&**instance, view).submit(draw);
    }
}

// ============================================================
// Static props
// ============================================================

/// A placed static prop: world-space bounds, origin, and the leaves its
/// volume occupies (precomputed by the compiler, used for PVS culling).
pub struct StaticProp {
    pub origin: Vec3,
    pub bbox: Aabb,
    pub leaf_list: Vec<u32>,
    pub mesh: PropGeometry,
}

pub struct StaticPropRenderer {
    pub visible: bool,
    model_matrix: Mat4,
    prop: StaticProp,
}

impl StaticPropRenderer {
    pub fn new(prop: StaticProp) -> Self {
        Self {
            visible: true,
            model_matrix: mat4_from_translation(&prop.origin),
            prop,
        }
    }

    pub fn movement(&mut self, ctx: &RenderContext) {
        if !self.visible {
            return;
        }
        if let Some(mut instance) = self.prop.mesh.material.instance() {
            instance.movement(ctx);
        }
    }

    pub fn prepare_to_render(
        &self,
        world: &WorldData,
        ctx: &RenderContext,
        rim: &RenderInstManager,
        view: &mut SceneView,
        pvs: &BitSet,
    ) {
        if !self.visible {
            return;
        }

        // Visible if any occupied leaf's cluster is in the PVS; sentinel
        // leaves never reject.
        let cluster_visible = self.prop.leaf_list.iter().any(|&leaf| {
            let cluster = world.leaves[leaf as usize].cluster;
            cluster == CLUSTER_INVALID || pvs.get(cluster as usize)
        });
        if !cluster_visible {
            return;
        }

        if !view.frustum.contains(&self.prop.bbox) {
            return;
        }

        self.prop
            .mesh
            .submit(ctx, rim, view, &self.model_matrix, Some(&[0.0, 0.0, 0.0]));
    }
}

// ============================================================
// Detail props
// ============================================================

/// All detail objects of a single leaf, batched into one mesh at load.
/// Submission is gated entirely by the live leaf set.
pub struct DetailPropLeafRenderer {
    pub leaf: u32,
    mesh: PropGeometry,
    model_matrix: Mat4,
}

impl DetailPropLeafRenderer {
    pub fn new(leaf: u32, mesh: PropGeometry) -> Self {
        Self {
            leaf,
            mesh,
            model_matrix: vbsp_common::math::MAT4_IDENTITY,
        }
    }

    pub fn prepare_to_render(
        &self,
        ctx: &RenderContext,
        rim: &RenderInstManager,
        view: &mut SceneView,
    ) {
        self.mesh.submit(ctx, rim, view, &self.model_matrix, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pump_material, test_context, test_world, wide_camera_at};

    fn ready_mesh(ctx: &RenderContext, name: &str) -> PropGeometry {
        let material = ctx.material_cache.create_material_instance(name);
        pump_material(&ctx.material_cache, &*ctx.device, &material);
        PropGeometry {
            geometry: GeometryBinding::default(),
            start_index: 0,
            index_count: 36,
            material,
        }
    }

    fn view_at(pos: Vec3) -> SceneView {
        let mut view = SceneView::new();
        view.setup_from_camera(&wide_camera_at(pos), None);
        view
    }

    #[test]
    fn test_static_prop_culled_by_pvs() {
        let world = test_world();
        let (_dev, ctx) = test_context();

        // Prop in leaf 2 (cluster 12), ahead of the camera.
        let prop = StaticPropRenderer::new(StaticProp {
            origin: [250.0, 50.0, 50.0],
            bbox: Aabb::new([240.0, 40.0, 40.0], [260.0, 60.0, 60.0]),
            leaf_list: vec![2],
            mesh: ready_mesh(&ctx, "props/barrel01"),
        });

        let rim = RenderInstManager::new();
        let mut view = view_at([50.0, 50.0, 50.0]);

        let mut pvs = BitSet::new(16);
        pvs.set(5, true);
        pvs.set(9, true);
        prop.prepare_to_render(&world, &ctx, &rim, &mut view, &pvs);
        assert!(view.main_list.is_empty());

        pvs.set(12, true);
        prop.prepare_to_render(&world, &ctx, &rim, &mut view, &pvs);
        assert_eq!(view.main_list.len(), 1);
    }

    #[test]
    fn test_static_prop_culled_by_frustum() {
        let world = test_world();
        let (_dev, ctx) = test_context();

        let prop = StaticPropRenderer::new(StaticProp {
            origin: [50.0, 50.0, 50.0],
            bbox: Aabb::new([40.0, 40.0, 40.0], [60.0, 60.0, 60.0]),
            leaf_list: vec![0],
            mesh: ready_mesh(&ctx, "props/barrel01"),
        });

        let rim = RenderInstManager::new();
        // Camera far past the prop, looking further along +X.
        let mut view = view_at([500.0, 50.0, 50.0]);

        let mut pvs = BitSet::new(16);
        pvs.fill(true);
        prop.prepare_to_render(&world, &ctx, &rim, &mut view, &pvs);
        assert!(view.main_list.is_empty());
    }

    #[test]
    fn test_hidden_static_prop_skipped() {
        let world = test_world();
        let (_dev, ctx) = test_context();

        let mut prop = StaticPropRenderer::new(StaticProp {
            origin: [250.0, 50.0, 50.0],
            bbox: Aabb::new([240.0, 40.0, 40.0], [260.0, 60.0, 60.0]),
            leaf_list: vec![2],
            mesh: ready_mesh(&ctx, "props/barrel01"),
        });
        prop.visible = false;

        let rim = RenderInstManager::new();
        let mut view = view_at([50.0, 50.0, 50.0]);
        let mut pvs = BitSet::new(16);
        pvs.fill(true);
        prop.prepare_to_render(&world, &ctx, &rim, &mut view, &pvs);
        assert!(view.main_list.is_empty());
    }

    #[test]
    fn test_detail_prop_submits_when_asked() {
        let (_dev, ctx) = test_context();
        let detail = DetailPropLeafRenderer::new(1, ready_mesh(&ctx, "detail/grass"));

        let rim = RenderInstManager::new();
        let mut view = view_at([50.0, 50.0, 50.0]);
        detail.prepare_to_render(&ctx, &rim, &mut view);
        assert_eq!(view.main_list.len(), 1);
    }
}
