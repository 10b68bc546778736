use std::path::PathBuf;
use std::time::Duration;

use image::Rgb;
use tracing::{debug, info, warn};

use crate::{Args, Result};

pub mod centroids;
pub mod color_ops;
pub mod drawing;
pub mod grid;
pub mod io;
pub mod mask;
pub mod oracle;
pub mod postprocess;
pub mod raster;
pub mod runner;
pub mod stitch;
pub mod threshold_oracle;
pub mod tiles;

use self::drawing::{OVERLAY_ALPHA, POINT_ALPHA};
use self::io::ImageSaver;
use self::runner::{DisplayImage, RunConfig, RunReport, StageOutput, spawn_run};
use self::threshold_oracle::ThresholdOracle;

/// Color of centroid markers in overlay exports
const POINT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Segments one input file with the configured oracle and exports the results
pub(crate) struct FileSegmenter {
    file: PathBuf,
    saver: ImageSaver,
    config: RunConfig,
    oracle: ThresholdOracle,
    poll_interval: Duration,
    save_outputs: bool,
}

impl FileSegmenter {
    pub(crate) fn new(file: PathBuf, args: &Args) -> Self {
        let saver = ImageSaver::for_input(&file);
        Self {
            file,
            saver,
            config: RunConfig {
                cell_count: args.cells,
                show_sectors: args.show_sectors,
                postprocess: args.postprocess,
                min_size: args.min_size,
                max_size_fraction: args.max_size,
                min_intensity: args.min_intensity,
                expected_count: args.expected_count,
            },
            oracle: ThresholdOracle::new(args.threshold, args.min_region_area),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            save_outputs: args.save_outputs,
        }
    }

    pub(crate) fn process(self) -> Result<RunReport> {
        let image = io::open_image(&self.file)?;
        info!(
            "{}: {}x{}, {} cells",
            self.file.display(),
            image.width(),
            image.height(),
            self.config.cell_count
        );

        let handle = spawn_run(image.clone(), self.oracle.clone(), self.config.clone())?;
        let file = self.file.display().to_string();
        let report = handle.wait(self.poll_interval, |update| {
            debug!("{file}: progress {:.2}%", update.progress);
            match &update.image {
                Some(DisplayImage::Labels { title, image }) => {
                    info!("{file}: {title} ready, {}x{}", image.width(), image.height())
                }
                Some(DisplayImage::Points { title, .. }) => info!("{file}: {title} ready"),
                None => {}
            }
        });

        for warning in &report.warnings {
            warn!("{file}: {warning}");
        }
        if let Some(count) = report.object_count {
            info!("{file}: {count} objects");
        }
        if let Some(error) = report.count_error {
            info!(
                "{file}: absolute error {}, relative error {:.2}%",
                error.absolute, error.relative_percent
            );
        }

        if self.save_outputs {
            self.export(&report, &image)?;
        }
        Ok(report)
    }

    fn export(&self, report: &RunReport, image: &image::RgbImage) -> Result<()> {
        if let Some(sectors) = &report.sectors {
            self.saver.save_label_image_as(sectors, "sectors")?;
        }
        if let Some(raw) = &report.raw {
            self.save_stage(raw, image, "masks")?;
        }
        if let Some(processed) = &report.processed {
            self.save_stage(processed, image, "postprocessed")?;
            if let Some(labels) = &processed.filtered_labels {
                self.saver.save_label_image_as(labels, "postprocessed-opened")?;
            }
        }
        Ok(())
    }

    fn save_stage(&self, stage: &StageOutput, image: &image::RgbImage, prefix: &str) -> Result<()> {
        self.saver
            .save_masks_csv(&stage.records, &format!("{prefix}-records"))?;
        if let Some(labels) = &stage.labels {
            self.saver
                .save_label_image_as(labels, &format!("{prefix}-labels"))?;
            let overlay = drawing::overlay_labels(labels, image, OVERLAY_ALPHA)?;
            self.saver
                .save_rgb_image_as(&overlay, &format!("{prefix}-overlay"))?;
        }
        if let Some(points_image) = &stage.points_image {
            self.saver
                .save_luma_image_as(points_image, &format!("{prefix}-centroids"))?;
            let overlay = drawing::overlay_points(points_image, image, POINT_COLOR, POINT_ALPHA)?;
            self.saver
                .save_rgb_image_as(&overlay, &format!("{prefix}-centroids-overlay"))?;
            self.saver
                .save_points_csv(&stage.points, &format!("{prefix}-points"))?;
        }
        Ok(())
    }
}
