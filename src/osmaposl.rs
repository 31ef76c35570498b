//! Ordered-subsets maximum a posteriori update engine (OSMAPOSL), with plain
//! OSEM as the prior-less special case.
//!
//! Each subiteration works on one subset, round-robin over the subsets. The
//! multiplicative update is
//!
//! ```text
//! x <- x * backproject_subset(y / forward(x)) / denominator
//! ```
//!
//! where the denominator is the subset sensitivity, corrected by the penalty
//! gradient under one of two MAP models.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::filter::{ChainedFilter, ImageFilter, ThresholdToSmallPositive};
use crate::image::Image;
use crate::io::raw;
use crate::objective::ObjectiveFunction;

/// How the penalty gradient enters the update denominator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapModel {
    /// `denominator = prior_gradient / num_subsets + sensitivity`, clamped
    /// to within a factor 10 of the sensitivity.
    Additive,
    /// `denominator = clamp(prior_gradient + 1, 0.1, 10) * sensitivity`.
    Multiplicative,
}

impl FromStr for MapModel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "additive" => Ok(MapModel::Additive),
            "multiplicative" => Ok(MapModel::Multiplicative),
            _ => Err(format!("MAP model must be `additive` or `multiplicative`, got `{s}`")),
        }
    }
}

impl fmt::Display for MapModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapModel::Additive => write!(f, "additive"),
            MapModel::Multiplicative => write!(f, "multiplicative"),
        }
    }
}

/// Denominator values at or below this are treated as singular.
const SMALL_NUM: f32 = 1e-6;

#[derive(Clone, Debug)]
pub struct OsmaposlParameters {
    pub num_subsets: usize,
    pub num_subiterations: usize,
    pub enforce_initial_positivity: bool,
    /// Update-image values are clamped into this range from the second
    /// subiteration onward.
    pub minimum_relative_change: f32,
    pub maximum_relative_change: f32,
    /// Write the update image every this many subiterations; 0 disables.
    pub write_update_image: usize,
    /// Apply the inter-update filter to the current estimate every this many
    /// subiterations; 0 disables.
    pub inter_update_filter_interval: usize,
    /// Apply the inter-iteration filter every this many full iterations
    /// (of `num_subsets` subiterations each); 0 disables.
    pub inter_iteration_filter_interval: usize,
    pub map_model: MapModel,
    pub output_filename_prefix: String,
    pub disable_output: bool,
}

impl Default for OsmaposlParameters {
    fn default() -> Self {
        Self {
            num_subsets: 1,
            num_subiterations: 1,
            enforce_initial_positivity: true,
            minimum_relative_change: 0.0,
            maximum_relative_change: f32::INFINITY,
            write_update_image: 0,
            inter_update_filter_interval: 0,
            inter_iteration_filter_interval: 0,
            map_model: MapModel::Additive,
            output_filename_prefix: "recon".into(),
            disable_output: false,
        }
    }
}

pub struct Osmaposl {
    objective: Box<dyn ObjectiveFunction>,
    params: OsmaposlParameters,
    inter_update_filter: Option<Box<dyn ImageFilter>>,
    inter_iteration_filter: Option<Box<dyn ImageFilter>>,
    subiteration_num: usize,
    set_up_done: bool,
}

impl Osmaposl {
    pub fn new(
        objective: Box<dyn ObjectiveFunction>,
        params: OsmaposlParameters,
        inter_update_filter: Option<Box<dyn ImageFilter>>,
        inter_iteration_filter: Option<Box<dyn ImageFilter>>,
    ) -> Self {
        Self {
            objective,
            params,
            inter_update_filter,
            inter_iteration_filter,
            subiteration_num: 0,
            set_up_done: false,
        }
    }

    /// Name of the algorithm the current parameters select, built up from
    /// its ingredients: `IUF-` (inter-update filtering), `OS` (subsets),
    /// `EM` or `MAPOSL` (penalty), `S` (inter-iteration smoothing).
    pub fn method_info(&self) -> String {
        let mut s = String::new();
        if self.params.inter_update_filter_interval > 0 {
            s.push_str("IUF-");
        }
        if self.params.num_subsets > 1 {
            s.push_str("OS");
        }
        if self.objective.prior_is_zero() {
            s.push_str("EM");
        } else {
            s.push_str("MAPOSL");
        }
        if self.params.inter_iteration_filter_interval > 0 {
            s.push_str("S");
        }
        s
    }

    pub fn subiteration_num(&self) -> usize {
        self.subiteration_num
    }

    /// Prepare the objective and the initial estimate. Must be called once
    /// before `update_estimate` or `reconstruct`.
    pub fn set_up(&mut self, initial_estimate: &mut Image) -> Result<(), Box<dyn Error>> {
        if self.params.num_subiterations == 0 {
            return Err("number of subiterations must be at least 1".into());
        }
        if self.params.num_subsets != self.objective.num_subsets() {
            return Err(format!(
                "parameters ask for {} subsets but the objective function was built with {}",
                self.params.num_subsets,
                self.objective.num_subsets()
            )
            .into());
        }
        if self.params.minimum_relative_change > self.params.maximum_relative_change {
            return Err("minimum relative change exceeds maximum relative change".into());
        }

        self.objective.set_up()?;
        if !self.objective.subsets_are_approximately_balanced() {
            return Err(format!(
                "the {} subsets are not approximately balanced; choose a subset count that \
                 divides the number of views",
                self.params.num_subsets
            )
            .into());
        }

        if self.params.enforce_initial_positivity {
            initial_estimate.threshold_min_to_small_positive(SMALL_NUM);
        }

        // any smoothing must not reintroduce zeros into the estimate
        if let Some(filter) = self.inter_update_filter.take() {
            self.inter_update_filter = Some(Box::new(ChainedFilter::new(vec![
                filter,
                Box::new(ThresholdToSmallPositive::default()),
            ])));
        }
        if let Some(filter) = self.inter_iteration_filter.take() {
            self.inter_iteration_filter = Some(Box::new(ChainedFilter::new(vec![
                filter,
                Box::new(ThresholdToSmallPositive::default()),
            ])));
        }

        self.subiteration_num = 0;
        self.set_up_done = true;
        Ok(())
    }

    /// One subiteration: apply the multiplicative update for the next subset
    /// to `estimate` in place.
    pub fn update_estimate(&mut self, estimate: &mut Image) {
        assert!(self.set_up_done, "set_up must be called before update_estimate");
        self.subiteration_num += 1;
        let subset_num = (self.subiteration_num - 1) % self.params.num_subsets;

        let mut numerator = Image::zeros(estimate.geometry);
        self.objective
            .compute_sub_gradient_without_penalty_plus_sensitivity(&mut numerator, estimate, subset_num);
        let sensitivity = self.objective.subset_sensitivity(subset_num);

        let mut update = Image::zeros(estimate.geometry);
        let count = if self.objective.prior_is_zero() {
            divide_with_threshold(&mut update, &numerator, &sensitivity.data, 0.0)
        } else {
            let prior = self.objective.prior().unwrap();
            let mut prior_gradient = Image::zeros(estimate.geometry);
            prior.compute_gradient(&mut prior_gradient, estimate);
            let denominator: Vec<f32> = match self.params.map_model {
                MapModel::Additive => prior_gradient
                    .data
                    .iter()
                    .zip(&sensitivity.data)
                    .map(|(&g, &s)| {
                        let d = g / self.params.num_subsets as f32 + s;
                        // keep the denominator within a factor 10 of the
                        // sensitivity, whatever the penalty does
                        d.clamp(s / 10.0, s * 10.0)
                    })
                    .collect(),
                MapModel::Multiplicative => prior_gradient
                    .data
                    .iter()
                    .zip(&sensitivity.data)
                    .map(|(&g, &s)| (g + 1.0).clamp(0.1, 10.0) * s)
                    .collect(),
            };
            divide_with_threshold(&mut update, &numerator, &denominator, SMALL_NUM)
        };
        if count > 0 {
            println!("Number of (near) singularities masked in update: {count}");
        }

        // filter the estimate only after the gradient has been evaluated at
        // its unfiltered values
        if self.params.inter_update_filter_interval > 0
            && self.subiteration_num % self.params.inter_update_filter_interval == 0
        {
            if let Some(filter) = &self.inter_update_filter {
                println!("Applying inter-update filter");
                filter.apply(estimate);
            }
        }

        if self.params.write_update_image > 0
            && !self.params.disable_output
            && self.subiteration_num % self.params.write_update_image == 0
        {
            let path = PathBuf::from(format!(
                "{}_update_{}.raw",
                self.params.output_filename_prefix, self.subiteration_num
            ));
            if let Err(e) = raw::write_image(&update, &path) {
                eprintln!("Failed to write update image {}: {e}", path.display());
            }
        }

        // the first update may legitimately be very large (e.g. starting
        // from a uniform image), so start clamping at the second one
        if self.subiteration_num != 1 {
            let (old_min, old_max) = (update.min_value(), update.max_value());
            let (new_min, new_max) =
                (self.params.minimum_relative_change, self.params.maximum_relative_change);
            println!(
                "Update image old min,max: {old_min}, {old_max}, new min,max: {}, {}",
                old_min.min(new_min),
                old_max.max(new_max)
            );
            update.clamp_values(new_min, new_max);
        }

        estimate.multiply_elementwise(&update);
    }

    /// Run all subiterations, with inter-iteration filtering at full
    /// iteration boundaries.
    pub fn reconstruct(&mut self, estimate: &mut Image) {
        assert!(self.set_up_done, "set_up must be called before reconstruct");
        let method = self.method_info();
        for _ in 0..self.params.num_subiterations {
            self.update_estimate(estimate);
            println!(
                "{method} subiteration {:3} of {:3} done",
                self.subiteration_num, self.params.num_subiterations
            );
            let subiterations_per_iteration =
                self.params.num_subsets * self.params.inter_iteration_filter_interval;
            if subiterations_per_iteration > 0 && self.subiteration_num % subiterations_per_iteration == 0 {
                if let Some(filter) = &self.inter_iteration_filter {
                    println!("Applying inter-iteration filter");
                    filter.apply(estimate);
                }
            }
        }
    }
}

/// `update = numerator / denominator`, masking (near-)singular denominators
/// to zero. Returns how many values were masked.
fn divide_with_threshold(
    update: &mut Image,
    numerator: &Image,
    denominator: &[f32],
    small_num: f32,
) -> usize {
    assert_eq!(numerator.len(), denominator.len());
    let mut count = 0;
    for ((u, &n), &d) in update.data.iter_mut().zip(&numerator.data).zip(denominator) {
        if d <= small_num {
            *u = 0.0;
            count += 1;
        } else {
            *u = n / d;
        }
    }
    count
}

// ------------------------------ TESTS ------------------------------
