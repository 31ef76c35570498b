//! Image-space filters applied between updates and between full iterations.

use crate::image::Image;

pub trait ImageFilter: Send + Sync {
    fn apply(&self, image: &mut Image);
}

/// Raises every voxel below the floor to the floor. Chained after any
/// smoothing filter so that the multiplicative update never sees zeros.
pub struct ThresholdToSmallPositive {
    floor: f32,
}

impl ThresholdToSmallPositive {
    pub fn new(floor: f32) -> Self {
        if floor <= 0.0 {
            panic!("ThresholdToSmallPositive: floor must be positive, got {floor}");
        }
        Self { floor }
    }
}

impl Default for ThresholdToSmallPositive {
    fn default() -> Self {
        Self::new(1e-6)
    }
}

impl ImageFilter for ThresholdToSmallPositive {
    fn apply(&self, image: &mut Image) {
        image.threshold_min_to_small_positive(self.floor);
    }
}

pub struct ChainedFilter {
    filters: Vec<Box<dyn ImageFilter>>,
}

impl ChainedFilter {
    pub fn new(filters: Vec<Box<dyn ImageFilter>>) -> Self {
        Self { filters }
    }
}

impl ImageFilter for ChainedFilter {
    fn apply(&self, image: &mut Image) {
        for filter in &self.filters {
            filter.apply(image);
        }
    }
}

/// Separable Gaussian smoothing, specified by its full width at half maximum
/// in physical units per axis. A zero width on an axis leaves it untouched.
pub struct GaussianFilter {
    fwhm: [f32; 3],
}

const FWHM_TO_SIGMA: f32 = 2.354_82; // 2 sqrt(2 ln 2)

impl GaussianFilter {
    pub fn new(fwhm: [f32; 3]) -> Self {
        for axis in 0..3 {
            if fwhm[axis] < 0.0 {
                panic!("GaussianFilter: fwhm on axis {axis} must be non-negative, got {}", fwhm[axis]);
            }
        }
        Self { fwhm }
    }

    pub fn isotropic(fwhm: f32) -> Self {
        Self::new([fwhm; 3])
    }

    /// Normalized kernel truncated at three sigma, in units of voxels along
    /// `axis`. Empty when this axis is not smoothed.
    fn kernel(&self, axis: usize, voxel_size: f32) -> Vec<f32> {
        if self.fwhm[axis] == 0.0 {
            return vec![];
        }
        let sigma = self.fwhm[axis] / FWHM_TO_SIGMA / voxel_size;
        let half = (3.0 * sigma).ceil() as i32;
        let mut kernel: Vec<f32> = (-half..=half)
            .map(|i| {
                let y = i as f32 / sigma;
                (-0.5 * y * y).exp()
            })
            .collect();
        let total: f32 = kernel.iter().sum();
        kernel.iter_mut().for_each(|w| *w /= total);
        kernel
    }
}

impl ImageFilter for GaussianFilter {
    fn apply(&self, image: &mut Image) {
        let n = image.geometry.n;
        let voxel_size = image.geometry.voxel_size();
        let strides = [1usize, n[0], n[0] * n[1]];
        for axis in 0..3 {
            let kernel = self.kernel(axis, voxel_size[axis]);
            if kernel.is_empty() {
                continue;
            }
            convolve_along_axis(&mut image.data, n, strides, axis, &kernel);
        }
    }
}

/// 1D convolution of the flat voxel buffer along one axis, with zero padding
/// at the edges.
fn convolve_along_axis(
    data: &mut Vec<f32>,
    n: [usize; 3],
    strides: [usize; 3],
    axis: usize,
    kernel: &[f32],
) {
    let half = (kernel.len() / 2) as i32;
    let mut smoothed = vec![0.0f32; data.len()];
    for iz in 0..n[2] {
        for iy in 0..n[1] {
            for ix in 0..n[0] {
                let i3 = [ix, iy, iz];
                let flat = ix * strides[0] + iy * strides[1] + iz * strides[2];
                let mut value = 0.0;
                for (k, &w) in kernel.iter().enumerate() {
                    let j = i3[axis] as i32 + k as i32 - half;
                    if j < 0 || j as usize >= n[axis] {
                        continue;
                    }
                    let neighbour = flat + (j as usize) * strides[axis] - i3[axis] * strides[axis];
                    value += w * data[neighbour];
                }
                smoothed[flat] = value;
            }
        }
    }
    *data = smoothed;
}

// ------------------------------ TESTS ------------------------------
