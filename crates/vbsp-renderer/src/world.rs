//! Immutable world data: the BSP tree, leaves, surfaces, models, and the
//! cluster visibility table.
//!
//! The world is loaded once, validated once, and shared read-only by every
//! renderer. Per-frame traversal assumes validation already rejected
//! malformed references, so the hot paths never re-check.

use thiserror::Error;

use vbsp_common::math::{Aabb, Plane, Vec3};

use crate::vis::VisibilityTable;

/// Leaf cluster id meaning "no visibility data". A camera inside such a leaf
/// forces the all-visible fallback; during traversal the sentinel must never
/// cause a rejection.
pub const CLUSTER_INVALID: u16 = 0xFFFF;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("node {node} references out-of-range child {child}")]
    BadNodeChild { node: usize, child: i32 },
    #[error("node {0} is reachable twice; tree is cyclic or shared")]
    NodeRevisited(usize),
    #[error("leaf {leaf} references out-of-range surface {surface}")]
    BadLeafSurface { leaf: usize, surface: u32 },
    #[error("leaf {leaf} has out-of-range cluster {cluster}")]
    BadCluster { leaf: usize, cluster: u16 },
    #[error("model {model} references out-of-range head node {node}")]
    BadModelHead { model: usize, node: i32 },
    #[error("model {model} references out-of-range surface {surface}")]
    BadModelSurface { model: usize, surface: u32 },
    #[error("surface {surface} index range exceeds index buffer")]
    BadSurfaceRange { surface: usize },
    #[error("overlay references out-of-range surface {0}")]
    BadOverlay(u32),
    #[error("visibility row {cluster} has wrong length {len}, expected {expected}")]
    BadVisibilityRow {
        cluster: usize,
        len: usize,
        expected: usize,
    },
}

/// Precomputed ambient lighting probe inside a leaf: a position and one
/// color per axis-aligned cube face.
#[derive(Debug, Clone)]
pub struct AmbientSample {
    pub pos: Vec3,
    pub ambient_cube: [[f32; 3]; 6],
}

/// Internal tree node: a split plane, a bounding box, and two children.
/// A child `>= 0` is a node index; a child `< 0` encodes leaf `-child - 1`.
#[derive(Debug, Clone)]
pub struct BspNode {
    pub plane: Plane,
    pub bbox: Aabb,
    pub children: [i32; 2],
}

/// Convex terminal volume. Surfaces are indices into the world surface
/// table; a surface may be listed by several leaves.
#[derive(Debug, Clone)]
pub struct BspLeaf {
    pub bbox: Aabb,
    pub cluster: u16,
    pub surfaces: Vec<u32>,
    pub ambient_samples: Vec<AmbientSample>,
    /// Debug overlay toggle, settable at runtime from a picker/console.
    pub debug: bool,
}

/// One drawable surface: a range of the shared index buffer plus the
/// material that shades it.
#[derive(Debug, Clone)]
pub struct BspSurface {
    pub tex_name: String,
    pub start_index: u32,
    pub index_count: u32,
    pub bbox: Option<Aabb>,
    pub center: Option<Vec3>,
    /// Displacement geometry spans leaf boundaries and is visibility-tested
    /// against its precomputed cluster set instead of through the tree.
    pub is_displacement: bool,
    pub lightmap_page_index: u32,
}

/// A named subset of surfaces hung off a tree node. Model 0 is the world
/// spawn, traversed through the BSP; the rest are brush entities rendered
/// as flat surface batches.
#[derive(Debug, Clone)]
pub struct BspModel {
    pub bbox: Aabb,
    pub headnode: i32,
    pub surfaces: Vec<u32>,
}

pub struct WorldData {
    pub nodes: Vec<BspNode>,
    pub leaves: Vec<BspLeaf>,
    pub surfaces: Vec<BspSurface>,
    pub models: Vec<BspModel>,
    /// Decal overlay surfaces, always drawn when the world model is,
    /// regardless of tree reachability.
    pub overlays: Vec<u32>,
    pub visibility: VisibilityTable,
    /// Interleaved vertex data for the shared vertex buffer.
    pub vertex_data: Vec<u8>,
    /// u32 index data for the shared index buffer.
    pub index_data: Vec<u8>,
}

impl WorldData {
    /// Reject malformed world data. Called once at load; traversal relies
    /// on every reference being in range afterwards.
    pub fn validate(&self) -> Result<(), WorldError> {
        let num_indices = (self.index_data.len() / 4) as u64;

        for (i, node) in self.nodes.iter().enumerate() {
            for &child in &node.children {
                if !self.child_in_range(child) {
                    return Err(WorldError::BadNodeChild { node: i, child });
                }
            }
        }

        // Each node must be reachable at most once across all model trees.
        let mut visited = vec![false; self.nodes.len()];
        for (m, model) in self.models.iter().enumerate() {
            if !self.child_in_range(model.headnode) {
                return Err(WorldError::BadModelHead {
                    model: m,
                    node: model.headnode,
                });
            }
            self.walk_once(model.headnode, &mut visited)?;

            for &surface in &model.surfaces {
                if surface as usize >= self.surfaces.len() {
                    return Err(WorldError::BadModelSurface { model: m, surface });
                }
            }
        }

        for (i, leaf) in self.leaves.iter().enumerate() {
            if leaf.cluster != CLUSTER_INVALID
                && leaf.cluster as usize >= self.visibility.num_clusters()
            {
                return Err(WorldError::BadCluster {
                    leaf: i,
                    cluster: leaf.cluster,
                });
            }
            for &surface in &leaf.surfaces {
                if surface as usize >= self.surfaces.len() {
                    return Err(WorldError::BadLeafSurface { leaf: i, surface });
                }
            }
        }

        for (i, surface) in self.surfaces.iter().enumerate() {
            if surface.start_index as u64 + surface.index_count as u64 > num_indices {
                return Err(WorldError::BadSurfaceRange { surface: i });
            }
        }

        for &overlay in &self.overlays {
            if overlay as usize >= self.surfaces.len() {
                return Err(WorldError::BadOverlay(overlay));
            }
        }

        Ok(())
    }

    fn child_in_range(&self, child: i32) -> bool {
        if child >= 0 {
            (child as usize) < self.nodes.len()
        } else {
            ((-child - 1) as usize) < self.leaves.len()
        }
    }

    fn walk_once(&self, nodeid: i32, visited: &mut [bool]) -> Result<(), WorldError> {
        if nodeid < 0 {
            return Ok(());
        }
        let idx = nodeid as usize;
        if visited[idx] {
            return Err(WorldError::NodeRevisited(idx));
        }
        visited[idx] = true;
        let node = &self.nodes[idx];
        self.walk_once(node.children[0], visited)?;
        self.walk_once(node.children[1], visited)
    }

    /// Descend the tree from the root to the leaf containing `p`. Returns
    /// the leaf index, or `None` only when the world has no tree at all; a
    /// point outside the level still lands in some leaf because the tree's
    /// bounding volume is world-spanning.
    pub fn find_leaf_for_point(&self, p: &Vec3) -> Option<usize> {
        if self.nodes.is_empty() {
            return None;
        }

        let mut nodeid: i32 = 0;
        loop {
            if nodeid < 0 {
                return Some((-nodeid - 1) as usize);
            }
            let node = &self.nodes[nodeid as usize];
            let side = if node.plane.distance(p) >= 0.0 { 0 } else { 1 };
            nodeid = node.children[side];
        }
    }

    /// Collect the clusters of every leaf whose bounds intersect `aabb`.
    /// Used to precompute the cluster set of a displacement surface.
    pub fn mark_cluster_set(&self, dst: &mut Vec<u16>, aabb: &Aabb) {
        if self.nodes.is_empty() {
            return;
        }
        self.mark_cluster_set_node(dst, aabb, 0);
    }

    fn mark_cluster_set_node(&self, dst: &mut Vec<u16>, aabb: &Aabb, nodeid: i32) {
        if nodeid < 0 {
            let leaf = &self.leaves[(-nodeid - 1) as usize];
            if leaf.cluster != CLUSTER_INVALID
                && leaf.bbox.intersects(aabb)
                && !dst.contains(&leaf.cluster)
            {
                dst.push(leaf.cluster);
            }
            return;
        }

        let node = &self.nodes[nodeid as usize];
        if !node.bbox.intersects(aabb) {
            return;
        }
        self.mark_cluster_set_node(dst, aabb, node.children[0]);
        self.mark_cluster_set_node(dst, aabb, node.children[1]);
    }
}
