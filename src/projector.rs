//! Geometric projection: from a projection bin to the voxels its line of
//! response (LOR) crosses, with intersection-length weights.
//!
//! The algorithm is centred around two key simplifications:
//!
//! 1. Express the voxel size in terms of the components of the LOR's direction
//!    vector. This allows trivial calculation of how far we must move along the
//!    LOR before reaching a voxel boundary, in any dimension.
//!
//! 2. Exploit symmetry to simplify dealing with directions: flip axes so that
//!    the direction of the LOR has non-negative components. The algorithm can
//!    then assume that all progress is in the positive direction. Any voxel
//!    indices calculated by the algorithm must be flipped back to the original
//!    coordinate system.

use std::sync::Arc;

use crate::image::ImageGeometry;
use crate::projdata::{Bin, SharedProjDataInfo};
use crate::system_matrix::SystemMatrixRow;

/// Maps projection bins to sparse system matrix rows. Implementations must be
/// shareable across the worker threads that evaluate subsets in parallel.
pub trait Projector: Send + Sync {
    /// Fill `row` with the voxels coupled to `bin` and their weights. The row
    /// is cleared first; an empty result means the LOR missed the image.
    fn system_matrix_row(&self, bin: &Bin, row: &mut SystemMatrixRow);

    /// A reusable row buffer with enough capacity for any single LOR.
    fn buffers(&self) -> SystemMatrixRow;
}

/// Ray-tracing projector for parallel-beam sinogram geometry.
///
/// View `v` is the projection angle `phi = pi * v / num_views`; the
/// tangential position sets the signed perpendicular offset of the LOR from
/// the scanner axis; the axial position selects the image slice. Oblique
/// segments are handled by single-slice rebinning: their LORs are traced in
/// the plane of their axial position.
pub struct RayTracing {
    info: SharedProjDataInfo,
    geometry: ImageGeometry,
    tangential_spacing: f32,
}

impl RayTracing {
    pub fn new(info: SharedProjDataInfo, geometry: ImageGeometry, tangential_spacing: f32) -> Self {
        if tangential_spacing <= 0.0 {
            panic!("RayTracing: tangential spacing must be positive, got {tangential_spacing}");
        }
        Self { info, geometry, tangential_spacing }
    }

    pub fn into_shared(self) -> Arc<dyn Projector> {
        Arc::new(self)
    }

    /// Endpoints of the LOR for `bin`, placed just outside the image volume.
    fn bin_to_lor(&self, bin: &Bin) -> ([f32; 3], [f32; 3]) {
        let phi = std::f32::consts::PI * (bin.view_num - self.info.min_view_num()) as f32
            / self.info.num_views() as f32;
        let s = bin.tangential_pos_num as f32 * self.tangential_spacing;

        // u: radial unit vector, d: LOR direction (perpendicular to u)
        let (sin_phi, cos_phi) = phi.sin_cos();
        let u = [cos_phi, sin_phi];
        let d = [-sin_phi, cos_phi];

        let num_axial = self.info.num_axial_poss(bin.segment_num) as f32;
        let full_z = self.geometry.full_size[2];
        let z = (bin.axial_pos_num as f32 + 0.5) * full_z / num_axial - full_z / 2.0;

        let half = self.geometry.half_width();
        let reach = 2.0 * (half[0] * half[0] + half[1] * half[1]).sqrt();

        let p1 = [s * u[0] - reach * d[0], s * u[1] - reach * d[1], z];
        let p2 = [s * u[0] + reach * d[0], s * u[1] + reach * d[1], z];
        (p1, p2)
    }
}

impl Projector for RayTracing {
    fn system_matrix_row(&self, bin: &Bin, row: &mut SystemMatrixRow) {
        row.clear();
        let (p1, p2) = self.bin_to_lor(bin);
        if let Some(hit) = lor_fov_hit(p1, p2, &self.geometry) {
            trace_row(row, hit);
        }
    }

    fn buffers(&self) -> SystemMatrixRow {
        let [nx, ny, nz] = self.geometry.n;
        let max_number_of_coupled_voxels_possible = nx + ny + nz - 2;
        SystemMatrixRow::with_capacity(max_number_of_coupled_voxels_possible)
    }
}

/// Data needed by `trace_row`: the state of the marching algorithm at the
/// point where the LOR enters the image volume.
pub struct FovHit {
    /// Distance along the LOR to the next voxel boundary, per dimension.
    pub next_boundary: [f32; 3],
    /// Voxel size expressed in LOR distance units: how far we must move along
    /// the LOR to cross one voxel in the given dimension. Infinite for any
    /// axis parallel to the LOR.
    pub voxel_size: [f32; 3],
    /// Flat index of the voxel at the entry point.
    pub index: i32,
    /// Flat-index increment when crossing a boundary in the given dimension.
    pub delta_index: [i32; 3],
    /// Number of boundary crossings left before leaving the volume, per
    /// dimension.
    pub remaining: [i32; 3],
}

/// Floating-point subtractions which should give zero usually miss very
/// slightly: if this error is negative, the subsequent floor picks the wrong
/// voxel. Anything this close to zero is treated as exactly zero.
const EPS: f32 = 1e-5;

/// Analyse the point where the LOR from `p1` to `p2` enters the image
/// volume. `None` if it misses.
pub fn lor_fov_hit(p1: [f32; 3], p2: [f32; 3], geometry: &ImageGeometry) -> Option<FovHit> {
    let half = geometry.half_width();
    let voxel_size = geometry.voxel_size();
    let n = geometry.n;

    // Flip axes so that the direction has non-negative components, remembering
    // which axes were flipped so that indices can be flipped back later.
    let mut p1 = p1;
    let mut p2 = p2;
    let mut flipped = [false; 3];
    for axis in 0..3 {
        if p2[axis] < p1[axis] {
            p1[axis] = -p1[axis];
            p2[axis] = -p2[axis];
            flipped[axis] = true;
        }
    }

    let length = {
        let d = [p2[0] - p1[0], p2[1] - p1[1], p2[2] - p1[2]];
        (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
    };
    if length == 0.0 {
        return None;
    }
    let direction = [(p2[0] - p1[0]) / length, (p2[1] - p1[1]) / length, (p2[2] - p1[2]) / length];

    // Clip the LOR against the box: find the distances along the LOR at which
    // it enters and leaves each slab.
    let mut t_in: f32 = 0.0;
    let mut t_out: f32 = length;
    for axis in 0..3 {
        if direction[axis] == 0.0 {
            if p1[axis] < -half[axis] || p1[axis] > half[axis] {
                return None;
            }
        } else {
            t_in = t_in.max((-half[axis] - p1[axis]) / direction[axis]);
            t_out = t_out.min((half[axis] - p1[axis]) / direction[axis]);
        }
    }
    if t_in >= t_out {
        return None;
    }

    let entry = [
        p1[0] + direction[0] * t_in,
        p1[1] + direction[1] * t_in,
        p1[2] + direction[2] * t_in,
    ];

    // Express the entry point in voxel coordinates: floor(position) = voxel
    // index relative to the flipped frame.
    let mut entry_voxel = [0.0f32; 3];
    for axis in 0..3 {
        let x = (entry[axis] + half[axis]) / voxel_size[axis];
        entry_voxel[axis] = if x.abs() < EPS { 0.0 } else { x };
    }

    let mut index3_flipped = [0usize; 3];
    for axis in 0..3 {
        index3_flipped[axis] = (entry_voxel[axis].floor() as usize).min(n[axis] - 1);
    }

    // Voxel size in LOR distance units, and distance to the first boundary.
    let mut voxel_size_along = [f32::INFINITY; 3];
    let mut next_boundary = [f32::INFINITY; 3];
    for axis in 0..3 {
        if direction[axis] > 0.0 {
            voxel_size_along[axis] = voxel_size[axis] / direction[axis];
            let frac_done = entry_voxel[axis] - entry_voxel[axis].floor();
            next_boundary[axis] = (1.0 - frac_done) * voxel_size_along[axis];
        }
    }

    // Flip indices back to the original frame; strides follow the x-fastest
    // flat layout.
    let strides = [1i32, n[0] as i32, (n[0] * n[1]) as i32];
    let mut index = 0i32;
    let mut delta_index = [0i32; 3];
    let mut remaining = [0i32; 3];
    for axis in 0..3 {
        let i = if flipped[axis] { n[axis] - 1 - index3_flipped[axis] } else { index3_flipped[axis] };
        index += i as i32 * strides[axis];
        delta_index[axis] = if flipped[axis] { -strides[axis] } else { strides[axis] };
        remaining[axis] = (n[axis] - index3_flipped[axis]) as i32;
    }

    Some(FovHit { next_boundary, voxel_size: voxel_size_along, index, delta_index, remaining })
}

/// For a single LOR, place the weights and indices of the coupled voxels in
/// the `row` parameter. Using an output parameter rather than a return value,
/// because this function is called in the inner loop, and allocating the
/// vector of results repeatedly had a noticeable impact on performance.
#[inline]
pub fn trace_row(row: &mut SystemMatrixRow, hit: FovHit) {
    let FovHit { mut next_boundary, voxel_size, mut index, delta_index, mut remaining } = hit;

    // How far we have moved since entering the volume
    let mut here = 0.0;

    loop {
        // Which voxel boundary will be hit next, and its position
        let (dimension, boundary_position) = argmin(&next_boundary);

        // The weight is the length of LOR in this voxel
        let weight = boundary_position - here;

        // Store the index and weight of the voxel we have just crossed
        if weight > 0.0 {
            row.push(index as usize, weight);
        }

        // Move along LOR until it leaves this voxel
        here = boundary_position;

        // Find the next boundary in this dimension
        next_boundary[dimension] += voxel_size[dimension];

        // Move index across the boundary we are crossing
        index += delta_index[dimension];
        remaining[dimension] -= 1;

        // If we have traversed the whole volume, we're finished
        if remaining[dimension] == 0 {
            break;
        }
    }
}

fn argmin(v: &[f32; 3]) -> (usize, f32) {
    let mut dimension = 0;
    for axis in 1..3 {
        if v[axis] < v[dimension] {
            dimension = axis;
        }
    }
    (dimension, v[dimension])
}

// ------------------------------ TESTS ------------------------------
