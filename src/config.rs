//! Configuration file parser for the reconstruction CLI.

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{de, Deserialize, Deserializer};

use crate::image::ImageGeometry;
use crate::osmaposl::{MapModel, OsmaposlParameters};
use crate::projdata::{AxisOrder, ByteOrder, NumericType, ProjDataInfo, SharedProjDataInfo};

/// Parse a field written as a string in the TOML source (e.g.
/// `storage_order = "view-major"`) via the target type's `FromStr`.
fn deserialize_from_str<'d, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'d>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    String::deserialize(deserializer)?
        .parse::<T>()
        .map_err(de::Error::custom)
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub input: Input,
    pub image: ImageConfig,
    pub reconstruction: Reconstruction,
    pub prior: Option<Prior>,
}

/// Where the measured projection data lives and how it is laid out.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Input {
    #[serde(default = "mandatory")]
    pub data_file: PathBuf,

    /// Byte offset of the first bin within the file
    #[serde(default)]
    pub data_offset: u64,

    #[serde(default = "mandatory")]
    pub min_segment: i32,

    /// Axial positions per segment, from `min_segment` upward
    #[serde(default = "mandatory")]
    pub axial_counts: Vec<usize>,

    #[serde(default = "mandatory")]
    pub views: usize,

    #[serde(default = "mandatory")]
    pub tangential: usize,

    #[serde(default = "default_tof_bins")]
    pub tof_bins: usize,

    /// Physical order of the segments in the file; ascending when omitted
    pub segment_sequence: Option<Vec<i32>>,

    #[serde(default = "default_storage_order")]
    #[serde(deserialize_with = "deserialize_from_str")]
    pub storage_order: AxisOrder,

    #[serde(default = "default_data_type")]
    #[serde(deserialize_with = "deserialize_from_str")]
    pub data_type: NumericType,

    #[serde(default = "default_byte_order")]
    #[serde(deserialize_with = "deserialize_from_str")]
    pub byte_order: ByteOrder,

    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,

    /// Radial distance between adjacent tangential positions
    #[serde(default = "mandatory")]
    pub tangential_spacing: f32,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    #[serde(default = "mandatory")]
    pub nvoxels: [usize; 3],

    #[serde(default = "mandatory")]
    pub fov_size: [f32; 3],

    /// Starting estimate, raw f32 voxels; uniform ones when omitted
    pub initial_image: Option<PathBuf>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Reconstruction {
    #[serde(default = "mandatory")]
    pub subiterations: usize,

    #[serde(default = "default_subsets")]
    pub subsets: usize,

    #[serde(default = "default_true")]
    pub enforce_initial_positivity: bool,

    #[serde(default)]
    pub minimum_relative_change: f32,

    #[serde(default = "default_maximum_relative_change")]
    pub maximum_relative_change: f32,

    #[serde(default)]
    pub write_update_image: usize,

    #[serde(default)]
    pub inter_update_filter_interval: usize,

    /// FWHM per axis of the Gaussian inter-update filter
    pub inter_update_filter_fwhm: Option<[f32; 3]>,

    #[serde(default)]
    pub inter_iteration_filter_interval: usize,

    pub inter_iteration_filter_fwhm: Option<[f32; 3]>,

    #[serde(default = "default_map_model")]
    #[serde(deserialize_with = "deserialize_from_str")]
    pub map_model: MapModel,

    #[serde(default = "default_output_prefix")]
    pub output_filename_prefix: String,

    #[serde(default)]
    pub disable_output: bool,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Prior {
    #[serde(default = "mandatory")]
    pub weight: f32,
}

fn default_tof_bins() -> usize { 1 }
fn default_storage_order() -> AxisOrder { AxisOrder::ViewMajor }
fn default_data_type() -> NumericType { NumericType::Float32 }
fn default_byte_order() -> ByteOrder { ByteOrder::native() }
fn default_scale_factor() -> f32 { 1.0 }
fn default_subsets() -> usize { 1 }
fn default_true() -> bool { true }
fn default_maximum_relative_change() -> f32 { f32::INFINITY }
fn default_map_model() -> MapModel { MapModel::Additive }
fn default_output_prefix() -> String { "recon".into() }

impl Config {
    pub fn proj_data_info(&self) -> SharedProjDataInfo {
        Arc::new(ProjDataInfo::new(
            self.input.min_segment,
            self.input.axial_counts.clone(),
            self.input.views,
            self.input.tangential,
            self.input.tof_bins,
        ))
    }

    pub fn image_geometry(&self) -> ImageGeometry {
        ImageGeometry::new(self.image.fov_size, self.image.nvoxels)
    }

    pub fn osmaposl_parameters(&self) -> OsmaposlParameters {
        let r = &self.reconstruction;
        OsmaposlParameters {
            num_subsets: r.subsets,
            num_subiterations: r.subiterations,
            enforce_initial_positivity: r.enforce_initial_positivity,
            minimum_relative_change: r.minimum_relative_change,
            maximum_relative_change: r.maximum_relative_change,
            write_update_image: r.write_update_image,
            inter_update_filter_interval: r.inter_update_filter_interval,
            inter_iteration_filter_interval: r.inter_iteration_filter_interval,
            map_model: r.map_model,
            output_filename_prefix: r.output_filename_prefix.clone(),
            disable_output: r.disable_output,
        }
    }
}

pub fn read_config_file(path: PathBuf) -> Config {
    let config: String = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Couldn't read config file `{path:?}`: {e}"));
    toml::from_str(&config)
        .unwrap_or_else(|e| panic!("Couldn't parse config file `{path:?}`: {e}"))
}

// Hack to allow mandatory fields to be missing during testing.
#[cfg(not(test))]
fn mandatory<T>() -> T { panic!("MISSING MANDATORY FIELD. TODO: which one?") }
#[cfg(test)]
fn mandatory<T: Default>() -> T { T::default() }
