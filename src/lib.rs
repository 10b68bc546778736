pub use self::error::{Error, Result, Stage};
pub use self::segmenter::centroids::centroids;
pub use self::segmenter::grid::{TileGrid, partition};
pub use self::segmenter::mask::{IntensityImage, LabelImage, MaskRecord};
pub use self::segmenter::oracle::{
    CancelToken, RawMaskProposal, SegmentationOracle, segment_one, segment_tiled,
};
pub use self::segmenter::postprocess::{FilterBounds, postprocess};
pub use self::segmenter::raster::rasterize;
pub use self::segmenter::runner::{RunConfig, RunHandle, RunReport, run_segmentation, spawn_run};
pub use self::segmenter::stitch::stitch;
pub use self::segmenter::threshold_oracle::ThresholdOracle;
pub use self::segmenter::tiles::extract_tiles;

use std::path::PathBuf;

use clap::Parser;
use tracing::{Level, error};
use wild::ArgsOs;

use segmenter::FileSegmenter;

mod arg_validators;
mod error;
pub mod segmenter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input image files
    #[arg(required(true))]
    files: Vec<PathBuf>,
    /// Number of tiles (0 runs on the whole image, otherwise 4, 9, 16, 25 or 36)
    #[arg(short('n'), long, default_value_t = 0, value_parser = arg_validators::validate_cell_count)]
    cells: u32,
    /// Paint tile indices into the sector overlay
    #[arg(short('S'), long, default_value_t = false)]
    show_sectors: bool,
    /// Filter masks by size and intensity
    #[arg(short('p'), long, default_value_t = false)]
    postprocess: bool,
    /// Minimum mask area (pixels, exclusive)
    #[arg(short('m'), long, default_value_t = 100)]
    min_size: u32,
    /// Maximum mask area as a fraction of the image (exclusive)
    #[arg(short('M'), long, default_value_t = 0.0015, value_parser = arg_validators::validate_fraction)]
    max_size: f64,
    /// Minimum pixel intensity kept inside a mask
    #[arg(short('i'), long, default_value_t = 10)]
    min_intensity: u8,
    /// Gray level threshold of the built-in mask generator
    #[arg(short('t'), long, default_value_t = 128, value_parser = arg_validators::validate_threshold)]
    threshold: u8,
    /// Minimum region area proposed by the built-in mask generator (pixels)
    #[arg(short('r'), long, default_value_t = 0)]
    min_region_area: u32,
    /// Expected object count, enables error reporting
    #[arg(short('e'), long)]
    expected_count: Option<u32>,
    /// Progress polling interval (milliseconds)
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,
    /// Save label images, overlays and CSV files next to the input
    #[arg(short('s'), long, default_value_t = false)]
    save_outputs: bool,
    /// Verbose messages
    #[arg(short('v'), long, default_value_t = false)]
    verbose: bool,
}

pub fn run(args: ArgsOs) -> Result<()> {
    let args = Args::parse_from(args);
    init_logging(args.verbose);
    let mut failed = 0;
    for file in &args.files {
        let segmenter = FileSegmenter::new(file.to_owned(), &args);
        let report = segmenter.process()?;
        if let Some(failure) = &report.failure {
            error!("{}: {failure}", file.display());
            failed += 1;
        }
    }
    if failed > 0 {
        return Err(Error::RunsFailed {
            failed,
            total: args.files.len(),
        });
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    // Ignore repeated initialization, e.g. from tests
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
