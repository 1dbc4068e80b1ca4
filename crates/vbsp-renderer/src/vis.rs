//! Cluster-to-cluster visibility.
//!
//! The PVS answers "can any sight line exist between these two regions,
//! regardless of camera orientation". It is precomputed, coarse, and
//! orientation-independent; frustum culling is the separate, tighter,
//! orientation-dependent test applied afterwards. Both must pass for a
//! surface to draw.

use log::debug;

use vbsp_common::bitset::BitSet;
use vbsp_common::math::Vec3;

use crate::world::{WorldData, WorldError, CLUSTER_INVALID};

/// Per-cluster visibility rows, decompressed at load into dense bitsets.
pub struct VisibilityTable {
    num_clusters: usize,
    rows: Vec<BitSet>,
}

impl VisibilityTable {
    /// A table with no visibility information at all (every lookup fails,
    /// so callers fall back to all-visible).
    pub fn empty() -> Self {
        Self {
            num_clusters: 0,
            rows: Vec::new(),
        }
    }

    /// Build from already-dense rows. Each row must be sized to the cluster
    /// count.
    pub fn from_rows(num_clusters: usize, rows: Vec<BitSet>) -> Result<Self, WorldError> {
        for (cluster, row) in rows.iter().enumerate() {
            if row.len() != num_clusters {
                return Err(WorldError::BadVisibilityRow {
                    cluster,
                    len: row.len(),
                    expected: num_clusters,
                });
            }
        }
        Ok(Self { num_clusters, rows })
    }

    /// Build from run-length-compressed rows: literal bytes are copied, a
    /// zero byte is followed by a count of zero bytes.
    pub fn from_compressed(num_clusters: usize, rows: &[Vec<u8>]) -> Result<Self, WorldError> {
        let row_bytes = num_clusters.div_ceil(8);
        let mut dense = Vec::with_capacity(rows.len());
        for (cluster, row) in rows.iter().enumerate() {
            let bytes = decompress_vis_row(row, row_bytes).ok_or(WorldError::BadVisibilityRow {
                cluster,
                len: row.len(),
                expected: row_bytes,
            })?;
            dense.push(bitset_from_vis_bytes(&bytes, num_clusters));
        }
        Self::from_rows(num_clusters, dense)
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn row(&self, cluster: u16) -> Option<&BitSet> {
        self.rows.get(cluster as usize)
    }
}

/// Expand one RLE row to exactly `row_bytes` bytes. `None` if the stream
/// runs short or overshoots.
fn decompress_vis_row(input: &[u8], row_bytes: usize) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(row_bytes);
    let mut i = 0;
    while out.len() < row_bytes {
        let b = *input.get(i)?;
        i += 1;
        if b != 0 {
            out.push(b);
            continue;
        }
        // run of zeros
        let count = *input.get(i)? as usize;
        i += 1;
        if count == 0 || out.len() + count > row_bytes {
            return None;
        }
        out.resize(out.len() + count, 0);
    }
    Some(out)
}

fn bitset_from_vis_bytes(bytes: &[u8], num_clusters: usize) -> BitSet {
    let mut set = BitSet::new(num_clusters);
    for cluster in 0..num_clusters {
        if bytes[cluster >> 3] & (1 << (cluster & 7)) != 0 {
            set.set(cluster, true);
        }
    }
    set
}

/// Resolve the potentially-visible set for a camera position.
///
/// On success the scratch bitset is cleared and the camera cluster's row is
/// OR'd in; it is then the single source of truth for "can this cluster's
/// geometry possibly be seen" for the rest of the frame. On failure the
/// scratch is left untouched and the caller must treat everything as visible
/// (fill all-ones) rather than cull.
pub fn compute_pvs(world: &WorldData, out: &mut BitSet, camera_pos: &Vec3) -> bool {
    let Some(leaf_index) = world.find_leaf_for_point(camera_pos) else {
        debug!("camera at {camera_pos:?} is outside the world tree; assuming all visible");
        return false;
    };

    let cluster = world.leaves[leaf_index].cluster;
    if cluster == CLUSTER_INVALID {
        debug!("camera leaf {leaf_index} has no cluster; assuming all visible");
        return false;
    }

    let Some(row) = world.visibility.row(cluster) else {
        debug!("no visibility row for cluster {cluster}; assuming all visible");
        return false;
    };

    out.clear();
    out.or(row);
    true
}
