// math.rs: shared vector/matrix/plane math
//
// Conventions: Vec3 is a plain [f32; 3]; Mat4 is a column-major [f32; 16].
// World space is +X forward, +Z up; view space is -Z forward, +Y up.

/// 3-component vector.
pub type Vec3 = [f32; 3];

/// Column-major 4x4 matrix.
pub type Mat4 = [f32; 16];

pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn vector_length(v: &Vec3) -> f32 {
    dot_product(v, v).sqrt()
}

pub fn vector_scale(v: &Vec3, s: f32) -> Vec3 {
    [v[0] * s, v[1] * s, v[2] * s]
}

pub fn vector_sub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

// ============================================================
// Mat4
// ============================================================

pub const MAT4_IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// Multiply two column-major 4x4 matrices: result = a * b.
pub fn mat4_multiply(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut result = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            let mut sum = 0.0;
            for k in 0..4 {
                sum += a[k * 4 + row] * b[col * 4 + k];
            }
            result[col * 4 + row] = sum;
        }
    }
    result
}

pub fn mat4_from_translation(t: &Vec3) -> Mat4 {
    let mut m = MAT4_IDENTITY;
    m[12] = t[0];
    m[13] = t[1];
    m[14] = t[2];
    m
}

/// Extract the translation column.
pub fn mat4_translation(m: &Mat4) -> Vec3 {
    [m[12], m[13], m[14]]
}

/// Transform a point (w = 1) by a matrix, dropping w.
pub fn mat4_transform_point(m: &Mat4, p: &Vec3) -> Vec3 {
    [
        m[0] * p[0] + m[4] * p[1] + m[8] * p[2] + m[12],
        m[1] * p[0] + m[5] * p[1] + m[9] * p[2] + m[13],
        m[2] * p[0] + m[6] * p[1] + m[10] * p[2] + m[14],
    ]
}

/// Invert a rigid transform (orthonormal upper 3x3 plus translation).
pub fn mat4_invert_rigid(m: &Mat4) -> Mat4 {
    // Transposed rotation block.
    let mut out = [0.0f32; 16];
    out[0] = m[0];
    out[1] = m[4];
    out[2] = m[8];
    out[4] = m[1];
    out[5] = m[5];
    out[6] = m[9];
    out[8] = m[2];
    out[9] = m[6];
    out[10] = m[10];
    out[15] = 1.0;

    // -R^T * t
    out[12] = -(m[0] * m[12] + m[1] * m[13] + m[2] * m[14]);
    out[13] = -(m[4] * m[12] + m[5] * m[13] + m[6] * m[14]);
    out[14] = -(m[8] * m[12] + m[9] * m[13] + m[10] * m[14]);
    out
}

/// Symmetric perspective projection (right-handed, -Z forward, clip z in [-1, 1]).
pub fn mat4_perspective(fov_y_deg: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let top = near * (fov_y_deg * 0.5).to_radians().tan();
    let right = top * aspect;

    let a = near / right;
    let b = near / top;
    let c = -(far + near) / (far - near);
    let d = -(2.0 * far * near) / (far - near);

    [
        a,   0.0, 0.0,  0.0,
        0.0, b,   0.0,  0.0,
        0.0, 0.0, c,   -1.0,
        0.0, 0.0, d,    0.0,
    ]
}

/// Signed distance along the view forward axis from the view origin to a
/// world-space point. Positive in front of the camera.
pub fn view_space_depth(view_from_world: &Mat4, p: &Vec3) -> f32 {
    // View space looks down -Z; negate the transformed z.
    -(view_from_world[2] * p[0]
        + view_from_world[6] * p[1]
        + view_from_world[10] * p[2]
        + view_from_world[14])
}

// ============================================================
// Planes
// ============================================================

/// Axial plane kinds for the fast distance path; `PLANE_ANY` is general.
pub const PLANE_X: u8 = 0;
pub const PLANE_Y: u8 = 1;
pub const PLANE_Z: u8 = 2;
pub const PLANE_ANY: u8 = 3;

/// A half-space boundary. `signbits` caches the signs of the normal
/// components so `box_on_plane_side` can pick the near/far AABB corners
/// without branching per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub dist: f32,
    pub kind: u8,
    pub signbits: u8,
}

impl Plane {
    pub fn new(normal: Vec3, dist: f32) -> Self {
        let kind = if normal[0] == 1.0 {
            PLANE_X
        } else if normal[1] == 1.0 {
            PLANE_Y
        } else if normal[2] == 1.0 {
            PLANE_Z
        } else {
            PLANE_ANY
        };
        Self {
            normal,
            dist,
            kind,
            signbits: signbits_for_normal(&normal),
        }
    }

    /// Signed distance from a point to the plane.
    pub fn distance(&self, p: &Vec3) -> f32 {
        match self.kind {
            PLANE_X => p[0] - self.dist,
            PLANE_Y => p[1] - self.dist,
            PLANE_Z => p[2] - self.dist,
            _ => dot_product(p, &self.normal) - self.dist,
        }
    }
}

pub fn signbits_for_normal(normal: &Vec3) -> u8 {
    let mut bits = 0u8;
    for j in 0..3 {
        if normal[j] < 0.0 {
            bits |= 1 << j;
        }
    }
    bits
}

pub const SIDE_FRONT: i32 = 1;
pub const SIDE_BACK: i32 = 2;
pub const SIDE_CROSS: i32 = 3;

/// Classify an AABB against a plane: 1 = fully front, 2 = fully back,
/// 3 = straddling.
pub fn box_on_plane_side(emins: &Vec3, emaxs: &Vec3, p: &Plane) -> i32 {
    // fast axial cases
    if (p.kind as usize) < 3 {
        let t = p.kind as usize;
        if p.dist <= emins[t] {
            return SIDE_FRONT;
        }
        if p.dist >= emaxs[t] {
            return SIDE_BACK;
        }
        return SIDE_CROSS;
    }

    // general case: signbits select the corner nearest/farthest along the normal
    let (dist1, dist2) = match p.signbits {
        0 => (
            p.normal[0] * emaxs[0] + p.normal[1] * emaxs[1] + p.normal[2] * emaxs[2],
            p.normal[0] * emins[0] + p.normal[1] * emins[1] + p.normal[2] * emins[2],
        ),
        1 => (
            p.normal[0] * emins[0] + p.normal[1] * emaxs[1] + p.normal[2] * emaxs[2],
            p.normal[0] * emaxs[0] + p.normal[1] * emins[1] + p.normal[2] * emins[2],
        ),
        2 => (
            p.normal[0] * emaxs[0] + p.normal[1] * emins[1] + p.normal[2] * emaxs[2],
            p.normal[0] * emins[0] + p.normal[1] * emaxs[1] + p.normal[2] * emins[2],
        ),
        3 => (
            p.normal[0] * emins[0] + p.normal[1] * emins[1] + p.normal[2] * emaxs[2],
            p.normal[0] * emaxs[0] + p.normal[1] * emaxs[1] + p.normal[2] * emins[2],
        ),
        4 => (
            p.normal[0] * emaxs[0] + p.normal[1] * emaxs[1] + p.normal[2] * emins[2],
            p.normal[0] * emins[0] + p.normal[1] * emins[1] + p.normal[2] * emaxs[2],
        ),
        5 => (
            p.normal[0] * emins[0] + p.normal[1] * emaxs[1] + p.normal[2] * emins[2],
            p.normal[0] * emaxs[0] + p.normal[1] * emins[1] + p.normal[2] * emaxs[2],
        ),
        6 => (
            p.normal[0] * emaxs[0] + p.normal[1] * emins[1] + p.normal[2] * emins[2],
            p.normal[0] * emins[0] + p.normal[1] * emaxs[1] + p.normal[2] * emaxs[2],
        ),
        7 => (
            p.normal[0] * emins[0] + p.normal[1] * emins[1] + p.normal[2] * emins[2],
            p.normal[0] * emaxs[0] + p.normal[1] * emaxs[1] + p.normal[2] * emaxs[2],
        ),
        _ => (0.0, 0.0),
    };

    let mut sides = 0;
    if dist1 >= p.dist {
        sides = SIDE_FRONT;
    }
    if dist2 < p.dist {
        sides |= SIDE_BACK;
    }
    sides
}

// ============================================================
// AABB
// ============================================================

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub mins: Vec3,
    pub maxs: Vec3,
}

impl Aabb {
    pub fn new(mins: Vec3, maxs: Vec3) -> Self {
        Self { mins, maxs }
    }

    pub fn center(&self) -> Vec3 {
        [
            (self.mins[0] + self.maxs[0]) * 0.5,
            (self.mins[1] + self.maxs[1]) * 0.5,
            (self.mins[2] + self.maxs[2]) * 0.5,
        ]
    }

    pub fn contains_point(&self, p: &Vec3) -> bool {
        (0..3).all(|i| p[i] >= self.mins[i] && p[i] <= self.maxs[i])
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        (0..3).all(|i| self.mins[i] <= other.maxs[i] && self.maxs[i] >= other.mins[i])
    }

    /// Transform by a matrix, producing the AABB of the transformed box.
    /// Uses the center/extent form so no corner loop is needed.
    pub fn transform(&self, m: &Mat4) -> Aabb {
        let center = self.center();
        let extent = [
            (self.maxs[0] - self.mins[0]) * 0.5,
            (self.maxs[1] - self.mins[1]) * 0.5,
            (self.maxs[2] - self.mins[2]) * 0.5,
        ];

        let new_center = mat4_transform_point(m, &center);
        let mut new_extent = [0.0f32; 3];
        for row in 0..3 {
            new_extent[row] = m[row].abs() * extent[0]
                + m[4 + row].abs() * extent[1]
                + m[8 + row].abs() * extent[2];
        }

        Aabb {
            mins: [
                new_center[0] - new_extent[0],
                new_center[1] - new_extent[1],
                new_center[2] - new_extent[2],
            ],
            maxs: [
                new_center[0] + new_extent[0],
                new_center[1] + new_extent[1],
                new_center[2] + new_extent[2],
            ],
        }
    }
}

// ============================================================
// Tests
// ============================================================
