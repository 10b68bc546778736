use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::{GrayImage, RgbImage};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::centroids::centroids;
use super::color_ops::{intensity_reference, to_gray_rgb};
use super::grid::partition;
use super::mask::{LabelImage, MaskRecord};
use super::oracle::{
    CancelToken, PROGRESS_CAP, PROGRESS_CAP_WITH_POSTPROCESSING, SegmentationOracle, segment_one,
    segment_tiled,
};
use super::postprocess::{FilterBounds, filter_records, max_size_from_fraction, postprocess};
use super::raster::rasterize;
use super::stitch::stitch;
use super::tiles::extract_tiles;
use crate::error::Stage;
use crate::{Error, Result};

/// Parameters of one segmentation run
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Number of tiles, 0 runs the oracle on the whole image
    pub cell_count: u32,
    pub show_sectors: bool,
    pub postprocess: bool,
    pub min_size: u32,
    /// Upper size bound as a fraction of the image pixel count
    pub max_size_fraction: f64,
    pub min_intensity: u8,
    /// Known number of objects, used to report the counting error
    pub expected_count: Option<u32>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cell_count: 0,
            show_sectors: false,
            postprocess: false,
            min_size: 100,
            max_size_fraction: 0.0015,
            min_intensity: 10,
            expected_count: None,
        }
    }
}

/// Outputs of one pipeline stage, raw or postprocessed
#[derive(Debug, Default)]
pub struct StageOutput {
    pub records: Vec<MaskRecord>,
    /// Records rasterized by descending area, absent when there were none or allocation failed
    pub labels: Option<LabelImage>,
    /// Opened masks painted by the postprocessing filter
    pub filtered_labels: Option<LabelImage>,
    pub points_image: Option<GrayImage>,
    pub points: Vec<(u32, u32)>,
}

/// Difference between an expected and a computed object count
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountError {
    pub absolute: u32,
    /// Percentage of the expected count, rounded to two decimals
    pub relative_percent: f64,
}

impl CountError {
    /// None when the expected count is zero
    pub fn between(expected: u32, computed: u32) -> Option<Self> {
        if expected == 0 {
            return None;
        }
        let absolute = expected.abs_diff(computed);
        let relative = absolute as f64 / expected as f64 * 100.0;
        Some(Self {
            absolute,
            relative_percent: (relative * 100.0).round() / 100.0,
        })
    }
}

/// Everything a run produced, including partial results of a failed run
#[derive(Debug, Default)]
pub struct RunReport {
    pub sectors: Option<LabelImage>,
    pub raw: Option<StageOutput>,
    pub processed: Option<StageOutput>,
    pub object_count: Option<usize>,
    pub count_error: Option<CountError>,
    /// Failures that cost one output but let the run go on
    pub warnings: Vec<Error>,
    /// Failure that ended the run early
    pub failure: Option<Error>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Centroids of the final stage: processed when postprocessing ran, raw otherwise
    pub fn final_points(&self) -> &[(u32, u32)] {
        self.processed
            .as_ref()
            .or(self.raw.as_ref())
            .map(|stage| stage.points.as_slice())
            .unwrap_or_default()
    }
}

/// Image waiting to be picked up by the display
#[derive(Debug, Clone)]
pub enum DisplayImage {
    Labels { title: &'static str, image: LabelImage },
    Points { title: &'static str, image: GrayImage },
}

/// What the display poller sees on one tick
#[derive(Debug)]
pub struct DisplayUpdate {
    pub progress: f32,
    pub image: Option<DisplayImage>,
    pub finished: bool,
}

#[derive(Debug, Default)]
struct RunState {
    progress: f32,
    /// Publication counter, orders the two pending slots
    published: u64,
    pending_labels: Option<(u64, DisplayImage)>,
    pending_points: Option<(u64, DisplayImage)>,
    report: Option<RunReport>,
    finished: bool,
}

/// Run state shared between the worker and the display poller
///
/// Each slot holds only the latest value; the poller may miss intermediate ones.
#[derive(Debug, Clone, Default)]
pub struct SharedRunState(Arc<Mutex<RunState>>);

impl SharedRunState {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_progress(&self, progress: f32) {
        self.0.lock().progress = progress;
    }

    fn publish_labels(&self, title: &'static str, image: &LabelImage) {
        let image = DisplayImage::Labels {
            title,
            image: image.clone(),
        };
        let mut state = self.0.lock();
        state.published += 1;
        state.pending_labels = Some((state.published, image));
    }

    fn publish_points(&self, title: &'static str, image: &GrayImage) {
        let image = DisplayImage::Points {
            title,
            image: image.clone(),
        };
        let mut state = self.0.lock();
        state.published += 1;
        state.pending_points = Some((state.published, image));
    }

    fn finish(&self, report: RunReport) {
        let mut state = self.0.lock();
        state.report = Some(report);
        state.finished = true;
    }

    pub fn progress(&self) -> f32 {
        self.0.lock().progress
    }

    /// Snapshot progress and take at most one pending image, oldest first
    pub fn poll(&self) -> DisplayUpdate {
        let mut state = self.0.lock();
        let labels_first = match (&state.pending_labels, &state.pending_points) {
            (Some((labels, _)), Some((points, _))) => labels < points,
            (Some(_), None) => true,
            _ => false,
        };
        let slot = if labels_first {
            state.pending_labels.take()
        } else {
            state.pending_points.take()
        };
        let image = slot.map(|(_, image)| image);
        DisplayUpdate {
            progress: state.progress,
            image,
            finished: state.finished,
        }
    }

    /// Take the report of a finished run
    pub fn take_report(&self) -> Option<RunReport> {
        self.0.lock().report.take()
    }
}

/// Run the whole pipeline on the calling thread
///
/// Never fails as a whole: the report carries every output produced and the
/// failure, if any, that stopped the run.
pub fn run_segmentation<O: SegmentationOracle + ?Sized>(
    image: &RgbImage,
    oracle: &mut O,
    config: &RunConfig,
    state: &SharedRunState,
    cancel: &CancelToken,
) -> RunReport {
    let mut report = RunReport::default();
    state.set_progress(0.0);
    info!("segmentation started, progress 0.00%");
    match execute(image, oracle, config, state, cancel, &mut report) {
        Ok(()) => info!("segmentation finished"),
        Err(e) => {
            error!("{e}");
            report.failure = Some(e);
        }
    }
    report
}

fn execute<O: SegmentationOracle + ?Sized>(
    image: &RgbImage,
    oracle: &mut O,
    config: &RunConfig,
    state: &SharedRunState,
    cancel: &CancelToken,
    report: &mut RunReport,
) -> Result<()> {
    let (width, height) = image.dimensions();
    let cap = if config.postprocess {
        PROGRESS_CAP_WITH_POSTPROCESSING
    } else {
        PROGRESS_CAP
    };
    let gray = to_gray_rgb(image);

    let records = if config.cell_count == 0 {
        let records = segment_one(oracle, &gray).map_err(|e| e.in_stage(Stage::Segmentation))?;
        state.set_progress(cap);
        info!("{} masks generated, progress {cap:.2}%", records.len());
        records
    } else {
        let (grid, sectors) = partition(height, width, config.cell_count, config.show_sectors)
            .map_err(|e| e.in_stage(Stage::Partition))?;
        report.sectors = Some(sectors);
        let tiles = extract_tiles(&gray, &grid).map_err(|e| e.in_stage(Stage::TileExtraction))?;
        let per_tile = segment_tiled(oracle, tiles, config.postprocess)
            .with_cancel_token(cancel.clone())
            .run_to_end(|step| state.set_progress(step.percent))
            .map_err(|e| e.in_stage(Stage::Segmentation))?;
        info!("masks generated for all {} tiles", grid.len());
        cancel.check()?;
        stitch(per_tile, height, width).map_err(|e| e.in_stage(Stage::Stitching))?
    };
    cancel.check()?;

    let raw = report.raw.insert(StageOutput {
        records,
        ..StageOutput::default()
    });
    match rasterize(&raw.records) {
        Ok(Some(labels)) => {
            state.publish_labels("masks", &labels);
            raw.labels = Some(labels);
        }
        Ok(None) => warn!("no masks were generated"),
        Err(e) => degrade(&mut report.warnings, e.in_stage(Stage::Rasterization)),
    }
    let raw_count = raw.records.len();
    if !config.postprocess {
        report.object_count = Some(raw_count);
        report.count_error = count_error(config, raw_count);
    }
    info!("computing centroids of the generated masks");
    match centroids(&raw.records) {
        Ok((points_image, points)) => {
            state.publish_points("mask centroids", &points_image);
            raw.points_image = Some(points_image);
            raw.points = points;
        }
        // Postprocessing may still drop the offending records
        Err(e) if config.postprocess => {
            degrade(&mut report.warnings, e.in_stage(Stage::Centroids))
        }
        Err(e) => return Err(e.in_stage(Stage::Centroids)),
    }
    let progress = if config.postprocess { 60.0 } else { 100.0 };
    state.set_progress(progress);
    info!("raw stage done, progress {progress:.2}%");
    if !config.postprocess {
        return Ok(());
    }
    cancel.check()?;

    info!("postprocessing started");
    let reference = intensity_reference(&gray);
    let bounds = FilterBounds {
        min_size: config.min_size,
        max_size: max_size_from_fraction(config.max_size_fraction, height, width),
        min_intensity: config.min_intensity,
    };
    let raw_records = report
        .raw
        .as_ref()
        .map(|raw| raw.records.as_slice())
        .unwrap_or_default();
    let (filtered_labels, kept) = match postprocess(raw_records, &reference, bounds) {
        Ok((labels, kept)) => (Some(labels), kept),
        Err(e) if e.is_recoverable() => {
            degrade(&mut report.warnings, e.in_stage(Stage::Postprocessing));
            let kept = filter_records(raw_records, &reference, bounds)
                .map_err(|e| e.in_stage(Stage::Postprocessing))?;
            (None, kept)
        }
        Err(e) => return Err(e.in_stage(Stage::Postprocessing)),
    };
    state.set_progress(90.0);
    info!("masks filtered, progress 90.00%");
    report.object_count = Some(kept.len());
    report.count_error = count_error(config, kept.len());

    let processed = report.processed.insert(StageOutput {
        records: kept,
        filtered_labels,
        ..StageOutput::default()
    });
    match rasterize(&processed.records) {
        Ok(Some(labels)) => {
            state.publish_labels("postprocessed masks", &labels);
            processed.labels = Some(labels);
        }
        Ok(None) => warn!("no masks survived postprocessing"),
        Err(e) if e.is_recoverable() => {
            warn!("not enough memory for the mask image, only centroids are produced");
            report.warnings.push(e.in_stage(Stage::Rasterization));
        }
        Err(e) => return Err(e.in_stage(Stage::Rasterization)),
    }
    cancel.check()?;

    info!("computing centroids of the postprocessed masks");
    let (points_image, points) =
        centroids(&processed.records).map_err(|e| e.in_stage(Stage::Centroids))?;
    state.publish_points("postprocessed mask centroids", &points_image);
    processed.points_image = Some(points_image);
    processed.points = points;
    state.set_progress(100.0);
    info!("centroids computed, progress 100.00%");
    Ok(())
}

/// Record a failure that only costs one output
fn degrade(warnings: &mut Vec<Error>, e: Error) {
    warn!("{e}");
    warnings.push(e);
}

fn count_error(config: &RunConfig, computed: usize) -> Option<CountError> {
    let expected = config.expected_count?;
    let error = CountError::between(expected, computed as u32)?;
    info!(
        "expected {expected} objects, found {computed}: absolute error {}, relative error {:.2}%",
        error.absolute, error.relative_percent
    );
    Some(error)
}

/// Handle to a run executing on its own worker thread
///
/// The worker is never joined; it runs until the pipeline finishes, fails or
/// notices cancellation.
pub struct RunHandle {
    state: SharedRunState,
    cancel: CancelToken,
}

impl RunHandle {
    /// Snapshot of the run, see `SharedRunState::poll`
    pub fn poll(&self) -> DisplayUpdate {
        self.state.poll()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Poll every `interval` until the run finished and every pending image was shown
    pub fn wait(self, interval: Duration, mut on_update: impl FnMut(&DisplayUpdate)) -> RunReport {
        loop {
            thread::sleep(interval);
            let update = self.state.poll();
            on_update(&update);
            if update.finished && update.image.is_none() {
                break;
            }
        }
        self.state.take_report().unwrap_or_default()
    }
}

/// Start a run on a dedicated worker thread
pub fn spawn_run<O>(image: RgbImage, mut oracle: O, config: RunConfig) -> Result<RunHandle>
where
    O: SegmentationOracle + Send + 'static,
{
    let state = SharedRunState::new();
    let cancel = CancelToken::new();
    let worker_state = state.clone();
    let worker_cancel = cancel.clone();
    thread::Builder::new()
        .name("segmentation".to_owned())
        .spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                run_segmentation(&image, &mut oracle, &config, &worker_state, &worker_cancel)
            }));
            let report = outcome.unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                error!("segmentation worker panicked: {message}");
                RunReport {
                    failure: Some(Error::WorkerPanic(message)),
                    ..RunReport::default()
                }
            });
            worker_state.finish(report);
        })?;
    Ok(RunHandle { state, cancel })
}
