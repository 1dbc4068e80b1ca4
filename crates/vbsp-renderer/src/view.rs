//! Per-frame camera state: the matrix pipeline, the view frustum, and the
//! draw lists every submission lands in.

use vbsp_common::math::{
    box_on_plane_side, mat4_invert_rigid, mat4_multiply, mat4_translation, Aabb, Mat4, Plane,
    Vec3, MAT4_IDENTITY, SIDE_BACK,
};

use crate::render_inst::RenderInstList;

/// Basis change from world convention (+X forward, +Y left, +Z up) to the
/// renderer's view convention (-Z forward, +X right, +Y up). Column-major.
pub const VIEW_SPACE_FROM_WORLD_SPACE: Mat4 = [
    0.0, 0.0, -1.0, 0.0,
    -1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// Camera input from the host: a view matrix in renderer convention and a
/// projection matrix.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
}

// ============================================================
// Frustum
// ============================================================

/// Six inward-facing half-spaces in world space.
#[derive(Debug, Clone)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Default for Frustum {
    fn default() -> Self {
        // Degenerate all-accepting frustum until the first update.
        Self {
            planes: [Plane::new([0.0, 0.0, 1.0], f32::MIN); 6],
        }
    }
}

impl Frustum {
    /// Rebuild the planes from a clip-from-world matrix (row combinations
    /// of the combined matrix, normalized; the sign bits are recomputed for
    /// the fast AABB rejection test).
    pub fn update_clip_frustum(&mut self, clip_from_world: &Mat4) {
        let m = clip_from_world;
        let row = |i: usize, j: usize| m[j * 4 + i];

        // (left, right, bottom, top, near, far)
        let rows: [[f32; 4]; 6] = [
            [row(3, 0) + row(0, 0), row(3, 1) + row(0, 1), row(3, 2) + row(0, 2), row(3, 3) + row(0, 3)],
            [row(3, 0) - row(0, 0), row(3, 1) - row(0, 1), row(3, 2) - row(0, 2), row(3, 3) - row(0, 3)],
            [row(3, 0) + row(1, 0), row(3, 1) + row(1, 1), row(3, 2) + row(1, 2), row(3, 3) + row(1, 3)],
            [row(3, 0) - row(1, 0), row(3, 1) - row(1, 1), row(3, 2) - row(1, 2), row(3, 3) - row(1, 3)],
            [row(3, 0) + row(2, 0), row(3, 1) + row(2, 1), row(3, 2) + row(2, 2), row(3, 3) + row(2, 3)],
            [row(3, 0) - row(2, 0), row(3, 1) - row(2, 1), row(3, 2) - row(2, 2), row(3, 3) - row(2, 3)],
        ];

        for (plane, r) in self.planes.iter_mut().zip(rows.iter()) {
            let len = (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
            let inv = if len > 0.0 { 1.0 / len } else { 0.0 };
            // a*x + b*y + c*z + d >= 0 inside, rewritten as n.p >= dist.
            *plane = Plane::new([r[0] * inv, r[1] * inv, r[2] * inv], -r[3] * inv);
        }
    }

    /// False only when the box is fully outside at least one plane.
    pub fn contains(&self, aabb: &Aabb) -> bool {
        self.planes
            .iter()
            .all(|p| box_on_plane_side(&aabb.mins, &aabb.maxs, p) != SIDE_BACK)
    }

    pub fn contains_point(&self, p: &Vec3) -> bool {
        self.planes.iter().all(|plane| plane.distance(p) >= 0.0)
    }
}

// ============================================================
// Scene view
// ============================================================

/// One logical camera for one frame: matrices, frustum, and the two draw
/// lists (primary pass and indirect/refraction pass). Rebuilt every frame;
/// the lists are reset after GPU submission.
pub struct SceneView {
    pub view_from_world: Mat4,
    pub world_from_view: Mat4,
    pub clip_from_view: Mat4,
    pub clip_from_world: Mat4,

    /// Camera position in world space.
    pub camera_pos: Vec3,

    /// Frustum in world space.
    pub frustum: Frustum,

    pub main_list: RenderInstList,
    pub indirect_list: RenderInstList,
}

impl Default for SceneView {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneView {
    pub fn new() -> Self {
        Self {
            view_from_world: MAT4_IDENTITY,
            world_from_view: MAT4_IDENTITY,
            clip_from_view: MAT4_IDENTITY,
            clip_from_world: MAT4_IDENTITY,
            camera_pos: [0.0; 3],
            frustum: Frustum::default(),
            main_list: RenderInstList::new(),
            indirect_list: RenderInstList::new(),
        }
    }

    /// Derive all per-frame state from a camera. Must run exactly once per
    /// view per frame, before any culling query against this view.
    ///
    /// `extra_transform` is applied in world space, for views anchored to a
    /// moving reference (the sky camera).
    pub fn setup_from_camera(&mut self, camera: &Camera, extra_transform: Option<&Mat4>) {
        self.view_from_world =
            mat4_multiply(&camera.view_matrix, &VIEW_SPACE_FROM_WORLD_SPACE);
        if let Some(extra) = extra_transform {
            self.view_from_world = mat4_multiply(&self.view_from_world, extra);
        }
        self.world_from_view = mat4_invert_rigid(&self.view_from_world);
        self.clip_from_view = camera.projection_matrix;
        self.clip_from_world = mat4_multiply(&self.clip_from_view, &self.view_from_world);
        self.camera_pos = mat4_translation(&self.world_from_view);
        self.frustum.update_clip_frustum(&self.clip_from_world);
    }

    /// Drop this frame's draws. Called after the render graph has executed.
    pub fn reset(&mut self) {
        self.main_list.reset();
        self.indirect_list.reset();
    }
}
