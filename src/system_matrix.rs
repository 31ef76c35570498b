//! Sparse system matrix rows and the projection primitives built on them.
//!
//! One row corresponds to one projection bin: the voxels the bin's line of
//! response intersects, each with its intersection weight.

use crate::image::Image;

#[derive(Clone, Debug, Default)]
pub struct SystemMatrixRow(pub Vec<(usize, f32)>);

impl SystemMatrixRow {
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub fn clear(&mut self) { self.0.clear() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn push(&mut self, voxel_index: usize, weight: f32) {
        self.0.push((voxel_index, weight));
    }
    pub fn iter(&self) -> impl Iterator<Item = &(usize, f32)> + '_ {
        self.0.iter()
    }
}

/// Inner product of one row with the image: the modelled value of one bin.
pub fn forward_project(row: &SystemMatrixRow, image: &Image) -> f32 {
    let mut value = 0.0;
    for &(voxel_index, weight) in row.iter() {
        value += weight * image[voxel_index];
    }
    value
}

/// Smear `value` back along one row into `data` (a flat voxel buffer).
pub fn back_project(data: &mut [f32], row: &SystemMatrixRow, value: f32) {
    for &(voxel_index, weight) in row.iter() {
        data[voxel_index] += weight * value;
    }
}

#[cfg(test)]
mod test_system_matrix {
    use super::*;
    use crate::image::{Image, ImageGeometry};
    use float_eq::assert_float_eq;

    #[test]
    fn forward_and_back_projection_are_adjoint_on_one_row() {
        let geometry = ImageGeometry::new([2.0, 2.0, 2.0], [2, 2, 2]);
        let image = Image::new(geometry, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let mut row = SystemMatrixRow::with_capacity(3);
        row.push(0, 0.5);
        row.push(3, 1.5);
        row.push(7, 2.0);

        // <A x, y> == <x, A^T y> with y a single bin of value 3
        let projected = forward_project(&row, &image);
        assert_float_eq!(projected, 0.5 + 6.0 + 16.0, ulps <= 2);

        let mut back = vec![0.0; 8];
        back_project(&mut back, &row, 3.0);
        let lhs = projected * 3.0;
        let rhs: f32 = back.iter().zip(&image.data).map(|(b, x)| b * x).sum();
        assert_float_eq!(lhs, rhs, ulps <= 4);
    }

    #[test]
    fn rows_are_reusable_after_clear() {
        let mut row = SystemMatrixRow::default();
        row.push(1, 1.0);
        row.clear();
        assert!(row.is_empty());
    }
}
