//! The Poisson log-likelihood objective and its subset machinery.
//!
//! Subsets partition the projection data by view: subset `s` owns the views
//! with `view_num % num_subsets == s`, in every segment and timing position.
//! The gradient computations run over one subset at a time, which is what
//! makes ordered-subsets updates cheap.

use std::error::Error;
use std::sync::Arc;

use rayon::prelude::*;

use crate::image::{Image, ImageGeometry};
use crate::projdata::{Bin, ProjDataFromStream, SharedProjDataInfo, Viewgram};
use crate::projector::Projector;
use crate::system_matrix::{back_project, forward_project};

/// Smoothing penalty on the image. Only the gradient is needed by the update
/// formula.
pub trait Prior: Send + Sync {
    /// Write the penalty gradient at `estimate` into `gradient`.
    fn compute_gradient(&self, gradient: &mut Image, estimate: &Image);

    /// True when the penalty weight is zero, so the gradient never needs to
    /// be evaluated.
    fn is_zero(&self) -> bool;
}

/// Quadratic difference penalty over the 6-connected voxel neighbourhood:
/// `weight/2 * sum over neighbour pairs of (x_j - x_k)^2`.
pub struct QuadraticPrior {
    weight: f32,
}

impl QuadraticPrior {
    pub fn new(weight: f32) -> Self {
        if weight < 0.0 {
            panic!("QuadraticPrior: weight must be non-negative, got {weight}");
        }
        Self { weight }
    }
}

impl Prior for QuadraticPrior {
    fn compute_gradient(&self, gradient: &mut Image, estimate: &Image) {
        assert_eq!(gradient.geometry, estimate.geometry);
        let [nx, ny, nz] = estimate.geometry.n;
        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..nx {
                    let here = estimate[[ix, iy, iz]];
                    let mut g = 0.0;
                    if ix > 0      { g += here - estimate[[ix - 1, iy, iz]]; }
                    if ix + 1 < nx { g += here - estimate[[ix + 1, iy, iz]]; }
                    if iy > 0      { g += here - estimate[[ix, iy - 1, iz]]; }
                    if iy + 1 < ny { g += here - estimate[[ix, iy + 1, iz]]; }
                    if iz > 0      { g += here - estimate[[ix, iy, iz - 1]]; }
                    if iz + 1 < nz { g += here - estimate[[ix, iy, iz + 1]]; }
                    gradient[[ix, iy, iz]] = self.weight * g;
                }
            }
        }
    }

    fn is_zero(&self) -> bool {
        self.weight == 0.0
    }
}

/// The interface the update engine drives. `set_up` must be called before
/// any of the gradient or sensitivity accessors.
pub trait ObjectiveFunction {
    fn set_up(&mut self) -> Result<(), Box<dyn Error>>;

    /// Backprojection of `measured / modelled` over one subset of the data:
    /// the numerator of the multiplicative update. The penalty is NOT
    /// included and the sensitivity is NOT subtracted.
    fn compute_sub_gradient_without_penalty_plus_sensitivity(
        &self,
        gradient: &mut Image,
        current_estimate: &Image,
        subset_num: usize,
    );

    /// Backprojection of ones over one subset: `sens_j = sum_i a_ij`.
    fn subset_sensitivity(&self, subset_num: usize) -> &Image;

    fn num_subsets(&self) -> usize;

    fn prior(&self) -> Option<&dyn Prior>;

    fn prior_is_zero(&self) -> bool {
        self.prior().map_or(true, |p| p.is_zero())
    }

    /// True when every subset sees a comparable share of the total
    /// sensitivity. Unbalanced subsets make the ordered-subsets update
    /// oscillate.
    fn subsets_are_approximately_balanced(&self) -> bool;
}

/// Relative deviation of a subset's sensitivity total from the mean above
/// which the subsets are declared unbalanced.
const BALANCE_TOLERANCE: f64 = 0.1;

pub struct PoissonLogLikelihood {
    proj_data: Arc<ProjDataFromStream>,
    projector: Arc<dyn Projector>,
    prior: Option<Box<dyn Prior>>,
    num_subsets: usize,
    geometry: ImageGeometry,
    // one per subset, filled in by set_up
    subset_sensitivities: Vec<Image>,
}

impl PoissonLogLikelihood {
    pub fn new(
        proj_data: Arc<ProjDataFromStream>,
        projector: Arc<dyn Projector>,
        prior: Option<Box<dyn Prior>>,
        num_subsets: usize,
        geometry: ImageGeometry,
    ) -> Self {
        if num_subsets == 0 {
            panic!("PoissonLogLikelihood: need at least one subset");
        }
        if num_subsets > proj_data.info().num_views() {
            panic!(
                "PoissonLogLikelihood: {} subsets but only {} views",
                num_subsets,
                proj_data.info().num_views()
            );
        }
        Self { proj_data, projector, prior, num_subsets, geometry, subset_sensitivities: vec![] }
    }

    fn info(&self) -> &SharedProjDataInfo {
        self.proj_data.info()
    }

    /// All bins of one subset, grouped so that each group can be projected
    /// independently on its own thread.
    fn subset_bins(&self, subset_num: usize) -> Vec<Vec<Bin>> {
        let info = self.info();
        let mut groups = vec![];
        for timing_pos_num in info.tof_pos_nums() {
            for segment_num in info.segment_nums() {
                for view_num in subset_views(info, self.num_subsets, subset_num) {
                    let bins = itertools::iproduct!(info.axial_pos_nums(segment_num), info.tangential_pos_nums())
                        .map(|(axial_pos_num, tangential_pos_num)| {
                            Bin::new(segment_num, view_num, axial_pos_num, tangential_pos_num, timing_pos_num)
                        })
                        .collect();
                    groups.push(bins);
                }
            }
        }
        groups
    }

    fn compute_subset_sensitivity(&self, subset_num: usize) -> Image {
        let groups = self.subset_bins(subset_num);

        // Closure preparing the state needed by `fold`: will be called by
        // `fold` at the start of every thread that is launched.
        let initial_thread_state = || (vec![0.0f32; self.geometry.n_voxels()], self.projector.buffers());

        let data = groups
            .par_iter()
            .fold(initial_thread_state, |state, bins| {
                let (mut sensitivity, mut row) = state;
                for bin in bins {
                    self.projector.system_matrix_row(bin, &mut row);
                    back_project(&mut sensitivity, &row, 1.0);
                }
                (sensitivity, row)
            })
            // Keep only the sensitivity (ignore the row buffer) and sum the
            // contributions calculated on each thread
            .map(|state| state.0)
            .reduce(
                || vec![0.0f32; self.geometry.n_voxels()],
                |l, r| l.iter().zip(r.iter()).map(|(l, r)| l + r).collect(),
            );
        Image::new(self.geometry, data)
    }
}

fn subset_views(
    info: &SharedProjDataInfo,
    num_subsets: usize,
    subset_num: usize,
) -> impl Iterator<Item = i32> + '_ {
    assert!(subset_num < num_subsets);
    info.view_nums()
        .filter(move |&v| (v - info.min_view_num()) as usize % num_subsets == subset_num)
}

impl ObjectiveFunction for PoissonLogLikelihood {
    fn set_up(&mut self) -> Result<(), Box<dyn Error>> {
        self.subset_sensitivities =
            (0..self.num_subsets).map(|s| self.compute_subset_sensitivity(s)).collect();
        Ok(())
    }

    fn compute_sub_gradient_without_penalty_plus_sensitivity(
        &self,
        gradient: &mut Image,
        current_estimate: &Image,
        subset_num: usize,
    ) {
        assert!(!self.subset_sensitivities.is_empty(), "set_up must be called first");
        assert_eq!(gradient.geometry, self.geometry);
        assert_eq!(current_estimate.geometry, self.geometry);

        let info = self.info().clone();

        // The stream is read serially (access is serialized on its lock
        // anyway); the projection work is what dominates and runs in the
        // parallel fold below.
        let mut viewgrams: Vec<Viewgram> = vec![];
        for timing_pos_num in info.tof_pos_nums() {
            for segment_num in info.segment_nums() {
                for view_num in subset_views(&info, self.num_subsets, subset_num) {
                    viewgrams.push(self.proj_data.get_viewgram(view_num, segment_num, timing_pos_num, false));
                }
            }
        }

        let initial_thread_state = || (vec![0.0f32; self.geometry.n_voxels()], self.projector.buffers());

        let backprojection = viewgrams
            .par_iter()
            .fold(initial_thread_state, |state, viewgram| {
                let (mut backprojection, mut row) = state;
                let (segment_num, view_num, timing_pos_num) =
                    (viewgram.segment_num(), viewgram.view_num(), viewgram.timing_pos_num());
                for (ai, axial_pos_num) in info.axial_pos_nums(segment_num).enumerate() {
                    for (ti, tangential_pos_num) in info.tangential_pos_nums().enumerate() {
                        let measured = viewgram.data[[ai, ti]];
                        if measured <= 0.0 {
                            continue;
                        }
                        let bin = Bin::new(segment_num, view_num, axial_pos_num, tangential_pos_num, timing_pos_num);
                        self.projector.system_matrix_row(&bin, &mut row);
                        let modelled = forward_project(&row, current_estimate);
                        // a zero model with non-zero data has no usable
                        // gradient contribution
                        if modelled <= 0.0 {
                            continue;
                        }
                        back_project(&mut backprojection, &row, measured / modelled);
                    }
                }
                (backprojection, row)
            })
            .map(|state| state.0)
            .reduce(
                || vec![0.0f32; self.geometry.n_voxels()],
                |l, r| l.iter().zip(r.iter()).map(|(l, r)| l + r).collect(),
            );

        gradient.data.copy_from_slice(&backprojection);
    }

    fn subset_sensitivity(&self, subset_num: usize) -> &Image {
        assert!(!self.subset_sensitivities.is_empty(), "set_up must be called first");
        &self.subset_sensitivities[subset_num]
    }

    fn num_subsets(&self) -> usize {
        self.num_subsets
    }

    fn prior(&self) -> Option<&dyn Prior> {
        self.prior.as_deref()
    }

    fn subsets_are_approximately_balanced(&self) -> bool {
        assert!(!self.subset_sensitivities.is_empty(), "set_up must be called first");
        if self.num_subsets == 1 {
            return true;
        }
        let totals: Vec<f64> = self.subset_sensitivities.iter().map(|s| s.sum()).collect();
        let mean = totals.iter().sum::<f64>() / totals.len() as f64;
        if mean <= 0.0 {
            return false;
        }
        totals.iter().all(|t| (t - mean).abs() / mean <= BALANCE_TOLERANCE)
    }
}

// ------------------------------ TESTS ------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::projdata::{shared_stream, AxisOrder, ByteOrder, NumericType, ProjDataInfo};
    use crate::projector::RayTracing;
    use float_eq::assert_float_eq;
    use std::io::Cursor;

    fn small_setup(num_views: usize, num_subsets: usize) -> PoissonLogLikelihood {
        let info = Arc::new(ProjDataInfo::single_segment(1, num_views, 5));
        let total = info.total_num_bins() * 4;
        let stream = shared_stream(Cursor::new(vec![0u8; total]));
        let proj_data = Arc::new(ProjDataFromStream::with_ascending_segments(
            info.clone(), stream, 0, AxisOrder::ViewMajor, NumericType::Float32, ByteOrder::Little, 1.0));
        let geometry = ImageGeometry::new([10.0, 10.0, 2.0], [5, 5, 1]);
        let projector = RayTracing::new(info, geometry, 2.0).into_shared();
        PoissonLogLikelihood::new(proj_data, projector, None, num_subsets, geometry)
    }

    #[test]
    fn subset_views_partition_all_views() {
        let objective = small_setup(8, 3);
        let info = objective.info().clone();
        let mut seen: Vec<i32> = (0..3).flat_map(|s| subset_views(&info, 3, s).collect::<Vec<_>>()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<i32>>());
    }

    #[test]
    fn subset_sensitivities_sum_to_the_full_sensitivity() {
        let mut split = small_setup(8, 4);
        split.set_up().unwrap();
        let mut whole = small_setup(8, 1);
        whole.set_up().unwrap();

        let mut summed = vec![0.0f32; 25];
        for s in 0..4 {
            for (acc, &v) in summed.iter_mut().zip(&split.subset_sensitivity(s).data) {
                *acc += v;
            }
        }
        for (&a, &b) in summed.iter().zip(&whole.subset_sensitivity(0).data) {
            assert_float_eq!(a, b, rel <= 1e-5);
        }
    }

    #[test]
    fn evenly_divided_views_are_balanced() {
        let mut objective = small_setup(8, 4);
        objective.set_up().unwrap();
        assert!(objective.subsets_are_approximately_balanced());
    }

    #[test]
    fn gradient_of_a_perfect_model_is_the_sensitivity() {
        // measured data generated by forward-projecting the estimate itself:
        // measured / modelled == 1 for every bin, so the backprojection of
        // the ratios equals the backprojection of ones
        let mut objective = small_setup(4, 1);
        let estimate = Image::ones(objective.geometry);

        let info = objective.info().clone();
        let mut row = objective.projector.buffers();
        for view_num in info.view_nums() {
            for tangential_pos_num in info.tangential_pos_nums() {
                let bin = Bin::new(0, view_num, 0, tangential_pos_num, 0);
                objective.projector.system_matrix_row(&bin, &mut row);
                objective.proj_data.set_bin_value(&bin, forward_project(&row, &estimate));
            }
        }

        objective.set_up().unwrap();
        let mut gradient = Image::zeros(objective.geometry);
        objective.compute_sub_gradient_without_penalty_plus_sensitivity(&mut gradient, &estimate, 0);
        for (&g, &s) in gradient.data.iter().zip(&objective.subset_sensitivity(0).data) {
            assert_float_eq!(g, s, rel <= 1e-4);
        }
    }

    #[test]
    fn quadratic_prior_gradient_vanishes_on_a_flat_image() {
        let geometry = ImageGeometry::new([4.0, 4.0, 4.0], [4, 4, 4]);
        let flat = Image::ones(geometry);
        let mut gradient = Image::zeros(geometry);
        QuadraticPrior::new(2.0).compute_gradient(&mut gradient, &flat);
        assert!(gradient.data.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn quadratic_prior_pulls_a_spike_down_and_its_neighbours_up() {
        let geometry = ImageGeometry::new([3.0, 3.0, 3.0], [3, 3, 3]);
        let mut image = Image::zeros(geometry);
        image[[1, 1, 1]] = 1.0;
        let mut gradient = Image::zeros(geometry);
        QuadraticPrior::new(1.0).compute_gradient(&mut gradient, &image);
        // spike: 6 neighbours all lower
        assert_float_eq!(gradient[[1, 1, 1]], 6.0, ulps <= 2);
        // face neighbour of the spike
        assert_float_eq!(gradient[[0, 1, 1]], -1.0, ulps <= 2);
        // corner voxel, not adjacent to the spike
        assert_float_eq!(gradient[[0, 0, 0]], 0.0, abs <= 0.0);
    }
}
