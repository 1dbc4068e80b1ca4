//! Shared fixtures for unit tests: a small synthetic world, a synchronous
//! test material stack, and camera helpers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use vbsp_common::bitset::BitSet;
use vbsp_common::math::{
    mat4_from_translation, mat4_perspective, mat4_transform_point, Aabb, Mat4, Plane, Vec3,
};

use crate::gfx::{Device, NullDevice, ProgramId};
use crate::materials::{
    MaterialCache, MaterialError, MaterialHandle, MaterialInstance, MaterialLoader, RenderContext,
};
use crate::render_inst::{DrawInstance, RenderLayer};
use crate::surfaces::{ModelRenderer, SurfaceRenderer};
use crate::view::{Camera, VIEW_SPACE_FROM_WORLD_SPACE};
use crate::vis::VisibilityTable;
use crate::world::{
    AmbientSample, BspLeaf, BspModel, BspNode, BspSurface, WorldData, CLUSTER_INVALID,
};

/// Three slabs along +X in clusters 5, 9, 12, plus a far slab with the
/// sentinel cluster. Model 0 is the world spawn (surfaces 0-2 in the leaves,
/// surface 4 a displacement spanning the 5/9 boundary); model 1 is a small
/// brush entity with surface 3.
///
/// ```text
///   x:   0 ...... 100 ...... 200 ...... 300 ...... 400
///        [leaf 0]  [leaf 1]   [leaf 2]   [leaf 3]
///        cluster 5 cluster 9  cluster 12 (sentinel)
/// ```
///
/// Visibility: every cluster sees itself; cluster 5 additionally sees 9
/// (deliberately asymmetric).
pub fn test_world() -> WorldData {
    let slab = |x0: f32, x1: f32| Aabb::new([x0, 0.0, 0.0], [x1, 100.0, 100.0]);

    let nodes = vec![
        BspNode {
            plane: Plane::new([1.0, 0.0, 0.0], 100.0),
            bbox: slab(0.0, 400.0),
            children: [1, -1],
        },
        BspNode {
            plane: Plane::new([1.0, 0.0, 0.0], 200.0),
            bbox: slab(100.0, 400.0),
            children: [2, -2],
        },
        BspNode {
            plane: Plane::new([1.0, 0.0, 0.0], 300.0),
            bbox: slab(200.0, 400.0),
            children: [-4, -3],
        },
    ];

    let leaf = |x0: f32, x1: f32, cluster: u16, surfaces: Vec<u32>| BspLeaf {
        bbox: slab(x0, x1),
        cluster,
        surfaces,
        ambient_samples: vec![AmbientSample {
            pos: [(x0 + x1) * 0.5, 50.0, 50.0],
            ambient_cube: [[0.5, 0.5, 0.5]; 6],
        }],
        debug: false,
    };

    let leaves = vec![
        leaf(0.0, 100.0, 5, vec![0]),
        leaf(100.0, 200.0, 9, vec![1]),
        leaf(200.0, 300.0, 12, vec![2]),
        leaf(300.0, 400.0, CLUSTER_INVALID, vec![]),
    ];

    let wall = |name: &str, x0: f32, x1: f32, start_index: u32| BspSurface {
        tex_name: name.to_string(),
        start_index,
        index_count: 6,
        bbox: Some(Aabb::new([x0, 20.0, 20.0], [x1, 80.0, 80.0])),
        center: Some([(x0 + x1) * 0.5, 50.0, 50.0]),
        is_displacement: false,
        lightmap_page_index: 0,
    };

    let surfaces = vec![
        wall("brick/wall01", 10.0, 90.0, 0),
        wall("brick/wall01", 110.0, 190.0, 6),
        wall("metal/floor02", 210.0, 290.0, 12),
        wall("glass/window01", 40.0, 60.0, 18),
        BspSurface {
            tex_name: "nature/blendrock".to_string(),
            start_index: 24,
            index_count: 6,
            bbox: Some(Aabb::new([90.0, 40.0, 40.0], [110.0, 60.0, 60.0])),
            center: Some([100.0, 50.0, 50.0]),
            is_displacement: true,
            lightmap_page_index: 0,
        },
    ];

    let models = vec![
        BspModel {
            bbox: slab(0.0, 400.0),
            headnode: 0,
            surfaces: vec![0, 1, 2, 4],
        },
        BspModel {
            bbox: Aabb::new([40.0, 20.0, 20.0], [60.0, 80.0, 80.0]),
            headnode: -1,
            surfaces: vec![3],
        },
    ];

    // 16 clusters, every cluster sees itself, cluster 5 also sees 9.
    let num_clusters = 16;
    let mut rows = Vec::with_capacity(num_clusters);
    for c in 0..num_clusters {
        let mut row = BitSet::new(num_clusters);
        row.set(c, true);
        if c == 5 {
            row.set(9, true);
        }
        rows.push(row);
    }

    let index_data: Vec<u8> = (0u32..30).flat_map(|i| i.to_le_bytes()).collect();

    let world = WorldData {
        nodes,
        leaves,
        surfaces,
        models,
        overlays: Vec::new(),
        visibility: VisibilityTable::from_rows(num_clusters, rows).expect("rows sized"),
        vertex_data: vec![0u8; 64],
        index_data,
    };
    world.validate().expect("test world is well-formed");
    world
}

// ============================================================
// Test materials
// ============================================================

pub struct TestMaterial {
    layer: RenderLayer,
    program: ProgramId,
    indirect: bool,
    loaded: bool,
}

impl MaterialInstance for TestMaterial {
    fn init(&mut self, _device: &dyn Device) -> Result<(), MaterialError> {
        self.loaded = true;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn is_visible(&self, _ctx: &RenderContext) -> bool {
        true
    }

    fn layer(&self) -> RenderLayer {
        self.layer
    }

    fn program(&self) -> Option<ProgramId> {
        Some(self.program)
    }

    fn wants_indirect(&self) -> bool {
        self.indirect
    }

    fn bind_to_draw(&self, draw: &mut DrawInstance, model_matrix: &Mat4, _lightmap_page: u32) {
        draw.push_matrix(model_matrix);
    }
}

/// Synchronous loader with per-name failure and layer overrides. Loads
/// still flow through the cache's background workers and drain queue.
#[derive(Default)]
pub struct TestMaterialLoader {
    failures: Mutex<HashSet<String>>,
    layers: Mutex<HashMap<String, RenderLayer>>,
    indirect: Mutex<HashSet<String>>,
}

impl TestMaterialLoader {
    pub fn fail(&self, name: &str) {
        self.failures.lock().insert(name.to_string());
    }

    pub fn set_layer(&self, name: &str, layer: RenderLayer) {
        self.layers.lock().insert(name.to_string(), layer);
    }

    pub fn set_indirect(&self, name: &str) {
        self.indirect.lock().insert(name.to_string());
    }
}

fn program_for_name(name: &str) -> ProgramId {
    // Stable per-name id so batching tests are deterministic.
    let mut hash: u32 = 2166136261;
    for b in name.bytes() {
        hash = (hash ^ b as u32).wrapping_mul(16777619);
    }
    ProgramId(hash % 0x1000)
}

impl MaterialLoader for TestMaterialLoader {
    fn load(&self, name: &str) -> Result<Box<dyn MaterialInstance>, MaterialError> {
        if self.failures.lock().contains(name) {
            return Err(MaterialError::NotFound(name.to_string()));
        }
        let layer = self
            .layers
            .lock()
            .get(name)
            .copied()
            .unwrap_or(RenderLayer::Opaque);
        Ok(Box::new(TestMaterial {
            layer,
            program: program_for_name(name),
            indirect: self.indirect.lock().contains(name),
            loaded: false,
        }))
    }
}

// ============================================================
// Helpers
// ============================================================

pub fn test_context() -> (Arc<NullDevice>, RenderContext) {
    test_context_with_loader(Arc::new(TestMaterialLoader::default()))
}

pub fn test_context_with_loader(
    loader: Arc<TestMaterialLoader>,
) -> (Arc<NullDevice>, RenderContext) {
    let device = Arc::new(NullDevice::new());
    let ctx = RenderContext::new(device.clone(), loader);
    (device, ctx)
}

/// Drive the cache until one handle settles. Loads run on background
/// workers, so this spins briefly.
pub fn pump_material(cache: &MaterialCache, device: &dyn Device, handle: &MaterialHandle) {
    for _ in 0..2000 {
        cache.process_completed(device);
        if !handle.is_pending() {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("material {} never settled", handle.name());
}

/// Drive a model renderer until its materials are bound.
pub fn pump_model(ctx: &RenderContext, world: &WorldData, model: &mut ModelRenderer) {
    for _ in 0..2000 {
        ctx.material_cache.process_completed(&*ctx.device);
        model.movement(world, ctx);
        if model.materials_bound() {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("model materials never settled");
}

/// Bind a ready material onto a standalone surface renderer.
pub fn ready_surface_renderer(ctx: &RenderContext, renderer: &mut SurfaceRenderer, name: &str) {
    let handle = ctx.material_cache.create_material_instance(name);
    pump_material(&ctx.material_cache, &*ctx.device, &handle);
    assert!(!handle.is_failed(), "material {name} failed in test setup");
    renderer.bind_material(handle);
}

/// A camera at `pos` looking down +X (world forward) with a wide cone.
pub fn wide_camera_at(pos: Vec3) -> Camera {
    let pv = mat4_transform_point(&VIEW_SPACE_FROM_WORLD_SPACE, &pos);
    Camera {
        view_matrix: mat4_from_translation(&[-pv[0], -pv[1], -pv[2]]),
        projection_matrix: mat4_perspective(120.0, 1.0, 1.0, 100_000.0),
    }
}
