//! Voxel images: geometry plus a flat `Vec<f32>` of voxel values.

use serde::Deserialize;

pub type Index3 = [usize; 3];
pub type Index1 = usize;

/// Geometry of a voxel grid: number of voxels and physical extent per axis,
/// centred on the origin.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct ImageGeometry {
    pub n: Index3,
    pub full_size: [f32; 3],
}

impl ImageGeometry {
    pub fn new(full_size: [f32; 3], n: Index3) -> Self {
        for axis in 0..3 {
            if n[axis] == 0 || full_size[axis] <= 0.0 {
                panic!("ImageGeometry: axis {axis} must have positive size and at least one voxel");
            }
        }
        Self { n, full_size }
    }

    pub fn voxel_size(&self) -> [f32; 3] {
        [
            self.full_size[0] / self.n[0] as f32,
            self.full_size[1] / self.n[1] as f32,
            self.full_size[2] / self.n[2] as f32,
        ]
    }

    /// Physical position of the centre of voxel `i`.
    pub fn voxel_centre(&self, i: Index3) -> [f32; 3] {
        let size = self.voxel_size();
        let mut centre = [0.0; 3];
        for axis in 0..3 {
            centre[axis] = (i[axis] as f32 + 0.5) * size[axis] - self.full_size[axis] / 2.0;
        }
        centre
    }

    pub fn half_width(&self) -> [f32; 3] {
        [self.full_size[0] / 2.0, self.full_size[1] / 2.0, self.full_size[2] / 2.0]
    }

    pub fn n_voxels(&self) -> usize { self.n[0] * self.n[1] * self.n[2] }
}

/// Convert 3-dimensional voxel indices to 1-dimensional ones, x-fastest.
pub fn index3_to_1([ix, iy, iz]: Index3, [nx, ny, _nz]: Index3) -> Index1 {
    ix + (iy + iz * ny) * nx
}

/// Convert 1-dimensional voxel indices to 3-dimensional ones, x-fastest.
pub fn index1_to_3(i: Index1, [nx, ny, _nz]: Index3) -> Index3 {
    let z = i / (nx * ny);
    let r = i % (nx * ny);
    let y = r / nx;
    let x = r % nx;
    [x, y, z]
}

#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub geometry: ImageGeometry,
    pub data: Vec<f32>,
}

impl core::ops::Index<Index1> for Image {
    type Output = f32;
    fn index(&self, i: Index1) -> &Self::Output { &self.data[i] }
}

impl core::ops::IndexMut<Index1> for Image {
    fn index_mut(&mut self, i: Index1) -> &mut Self::Output { &mut self.data[i] }
}

impl core::ops::Index<Index3> for Image {
    type Output = f32;
    fn index(&self, i3: Index3) -> &Self::Output {
        &self.data[index3_to_1(i3, self.geometry.n)]
    }
}

impl core::ops::IndexMut<Index3> for Image {
    fn index_mut(&mut self, i3: Index3) -> &mut Self::Output {
        &mut self.data[index3_to_1(i3, self.geometry.n)]
    }
}

impl Image {
    pub fn new(geometry: ImageGeometry, data: Vec<f32>) -> Self {
        if data.len() != geometry.n_voxels() {
            panic!(
                "Image: data length {} does not match geometry with {} voxels",
                data.len(),
                geometry.n_voxels()
            );
        }
        Self { geometry, data }
    }

    pub fn ones(geometry: ImageGeometry) -> Self {
        let data = vec![1.0; geometry.n_voxels()];
        Self { geometry, data }
    }

    pub fn zeros(geometry: ImageGeometry) -> Self {
        let data = vec![0.0; geometry.n_voxels()];
        Self { geometry, data }
    }

    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    pub fn multiply_elementwise(&mut self, other: &Image) {
        assert_eq!(self.geometry, other.geometry);
        self.data.iter_mut().zip(&other.data).for_each(|(v, &o)| *v *= o);
    }

    /// Replace every value below `floor` by `floor`. Keeps later divisions
    /// and logarithms well defined.
    pub fn threshold_min_to_small_positive(&mut self, floor: f32) {
        self.data.iter_mut().for_each(|v| {
            if *v < floor {
                *v = floor;
            }
        });
    }

    pub fn clamp_values(&mut self, lo: f32, hi: f32) {
        self.data.iter_mut().for_each(|v| *v = v.clamp(lo, hi));
    }

    pub fn min_value(&self) -> f32 {
        self.data.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn max_value(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().map(|&v| v as f64).sum()
    }
}

// ------------------------------ TESTS ------------------------------

#[cfg(test)]
mod test_index {
    use super::*;
    use rstest::rstest;

    // Testing index3_to_1
    #[rstest(/**/ i3     , n        , expect,
             case([0,0,0], [5, 5, 5],  0),
             case([1,0,0], [5, 5, 5],  1),
             case([0,1,0], [5, 5, 5],  5),
             case([0,0,1], [5, 5, 5], 25),
             case([1,1,1], [5, 5, 5], 31),
             case([2,3,4], [3, 4, 5], 2 + 3*3 + 4*12),
    )]
    fn test_index3_to_1(i3: Index3, n: Index3, expect: Index1) {
        assert_eq!(index3_to_1(i3, n), expect);
    }

    use proptest::prelude::*;
    proptest! {
        #[test]
        fn roundtrip_index3_to_1_to_3(
            x in 0..19_usize,
            y in 0..11_usize,
            z in 0..23_usize,
        ) {
            let n = [19, 11, 23];
            let i3 = [x, y, z];
            let i1 = index3_to_1(i3, n);
            assert_eq!(index1_to_3(i1, n), i3);
        }
    }
}

#[cfg(test)]
mod test_image {
    use super::*;
    use float_eq::assert_float_eq;

    fn geometry() -> ImageGeometry {
        ImageGeometry::new([10.0, 10.0, 10.0], [4, 4, 4])
    }

    #[test]
    fn voxel_centres_are_symmetric_about_the_origin() {
        let g = geometry();
        let lo = g.voxel_centre([0, 0, 0]);
        let hi = g.voxel_centre([3, 3, 3]);
        for axis in 0..3 {
            assert_float_eq!(lo[axis], -hi[axis], ulps <= 2);
        }
        assert_float_eq!(g.voxel_size()[0], 2.5, ulps <= 2);
    }

    #[test]
    fn threshold_raises_only_small_values() {
        let g = ImageGeometry::new([1.0, 1.0, 1.0], [2, 2, 1]);
        let mut image = Image::new(g, vec![0.0, -3.0, 1e-7, 0.5]);
        image.threshold_min_to_small_positive(1e-6);
        assert_eq!(image.data, vec![1e-6, 1e-6, 1e-6, 0.5]);
    }

    #[test]
    fn three_dimensional_indexing_matches_flat_indexing() {
        let g = geometry();
        let mut image = Image::zeros(g);
        image[[1, 2, 3]] = 7.0;
        assert_eq!(image[index3_to_1([1, 2, 3], g.n)], 7.0);
    }

    #[test]
    #[should_panic]
    fn wrong_data_length_is_rejected() {
        Image::new(geometry(), vec![0.0; 3]);
    }
}
