// ----------------------------------- CLI -----------------------------------
use clap::Parser;

use std::error::Error;
use std::fs::File;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use tomorec::config::read_config_file;
use tomorec::filter::{GaussianFilter, ImageFilter};
use tomorec::image::Image;
use tomorec::io::raw;
use tomorec::objective::{PoissonLogLikelihood, Prior, QuadraticPrior};
use tomorec::osmaposl::Osmaposl;
use tomorec::projdata::{shared_stream, ProjDataFromStream};
use tomorec::projector::RayTracing;
use tomorec::utils::timing::Progress;

#[derive(clap::Parser, Debug, Clone)]
#[command(name = "osmaposl", about = "Ordered-subsets MAP reconstruction of sinogram data")]
pub struct Cli {
    /// Configuration file describing input data, image and reconstruction
    #[arg(short, long, default_value = "osmaposl-config.toml")]
    pub config: PathBuf,

    /// Override the number of subiterations given in the config file
    #[arg(short = 'i', long)]
    pub subiterations: Option<usize>,

    /// Override the number of subsets given in the config file
    #[arg(short = 's', long)]
    pub subsets: Option<usize>,

    /// Override the output filename prefix given in the config file
    #[arg(short, long)]
    pub out_prefix: Option<String>,

    /// Maximum number of rayon threads
    #[arg(short = 'j', long, default_value = "4")]
    pub num_threads: usize,
}

// --------------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    let config = read_config_file(args.config);

    // Set the maximum number of threads used by rayon for parallel iteration
    match rayon::ThreadPoolBuilder::new().num_threads(args.num_threads).build_global() {
        Err(e) => println!("{e}"),
        Ok(_) => println!("Using up to {} threads.", args.num_threads),
    }

    let mut progress = Progress::new();

    // Projection data geometry and the shared stream it lives in
    let info = config.proj_data_info();
    let stream = shared_stream(File::open(&config.input.data_file)?);
    let segment_sequence = config
        .input
        .segment_sequence
        .clone()
        .unwrap_or_else(|| info.segment_nums().collect());
    let proj_data = Arc::new(ProjDataFromStream::new(
        info.clone(),
        stream,
        config.input.data_offset,
        segment_sequence,
        config.input.storage_order,
        config.input.data_type,
        config.input.byte_order,
        config.input.scale_factor,
    ));

    let geometry = config.image_geometry();
    let projector = RayTracing::new(info, geometry, config.input.tangential_spacing).into_shared();
    let prior: Option<Box<dyn Prior>> = config
        .prior
        .as_ref()
        .map(|p| Box::new(QuadraticPrior::new(p.weight)) as Box<dyn Prior>);

    let mut params = config.osmaposl_parameters();
    if let Some(subiterations) = args.subiterations { params.num_subiterations = subiterations; }
    if let Some(subsets) = args.subsets { params.num_subsets = subsets; }
    if let Some(prefix) = args.out_prefix { params.output_filename_prefix = prefix; }

    let objective = PoissonLogLikelihood::new(proj_data, projector, prior, params.num_subsets, geometry);

    let gaussian = |fwhm: Option<[f32; 3]>| -> Option<Box<dyn ImageFilter>> {
        fwhm.map(|f| Box::new(GaussianFilter::new(f)) as Box<dyn ImageFilter>)
    };
    let mut engine = Osmaposl::new(
        Box::new(objective),
        params.clone(),
        gaussian(config.reconstruction.inter_update_filter_fwhm),
        gaussian(config.reconstruction.inter_iteration_filter_fwhm),
    );

    let mut estimate = match &config.image.initial_image {
        Some(path) => raw::read_image(geometry, path)?,
        None => Image::ones(geometry),
    };

    progress.start(&format!("Setting up {} reconstruction", engine.method_info()));
    if let Err(e) = engine.set_up(&mut estimate) {
        eprintln!("Reconstruction set-up failed: {e}");
        exit(1);
    }
    progress.done();

    progress.startln(&format!(
        "Running {} subiterations with {} subsets",
        params.num_subiterations, params.num_subsets
    ));
    engine.reconstruct(&mut estimate);
    progress.done_with_message("Reconstruction");

    if !params.disable_output {
        let path = PathBuf::from(format!("{}_final.raw", params.output_filename_prefix));
        raw::write_image(&estimate, &path)?;
        println!("Wrote final image to {}", path.display());
    }
    Ok(())
}
