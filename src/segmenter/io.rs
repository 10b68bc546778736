use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use image::GrayImage;
use image::RgbImage;
use imageproc::rect::Rect;
use itertools::Itertools; // for join()
use tracing::info;

use super::mask::{LabelImage, MaskRecord};
use crate::{Error, Result};

/// Open image file and convert it to 8-bit RGB
pub fn open_image(file: &Path) -> Result<RgbImage> {
    let reader = image::ImageReader::new(BufReader::new(File::open(file)?)).with_guessed_format()?;
    Ok(reader.decode()?.to_rgb8())
}

/// Helper to avoid having to specify the output location over and over again
pub struct ImageSaver {
    base_path: PathBuf,
}

impl ImageSaver {
    /// Construct a new ImageSaver writing next to `base_path`
    pub fn new(base_path: &Path) -> Self {
        Self {
            base_path: base_path.to_owned(),
        }
    }

    /// Construct an ImageSaver for outputs derived from an input file
    pub fn for_input(file: &Path) -> Self {
        let stem = file.file_stem().unwrap_or(file.as_os_str());
        let base_path = match file.parent() {
            Some(dir) => dir.join(stem),
            None => PathBuf::from(stem),
        };
        Self { base_path }
    }

    /// Save label image as a 16-bit grayscale PNG with suffix appended before extension
    pub fn save_label_image_as(&self, labels: &LabelImage, suffix: &str) -> Result<PathBuf> {
        let filename = self.compute_path(suffix, "png");
        let mut buffer = Vec::with_capacity(labels.len() * 2);
        for pixel in labels.pixels() {
            let value = u16::try_from(pixel[0]).map_err(|_| {
                Error::Config(format!(
                    "{}: label {} does not fit a 16-bit PNG",
                    filename.display(),
                    pixel[0]
                ))
            })?;
            buffer.extend_from_slice(&value.to_be_bytes());
        }

        let file = File::create(&filename)?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), labels.width(), labels.height());
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Sixteen);
        encoder.write_header()?.write_image_data(&buffer)?;

        info!("{}: saved", filename.display());
        Ok(filename)
    }

    /// Save grayscale image to file with suffix appended before extension
    pub fn save_luma_image_as(&self, img: &GrayImage, suffix: &str) -> Result<PathBuf> {
        let filename = self.compute_path(suffix, "png");
        img.save(&filename)?;
        info!("{}: saved", filename.display());
        Ok(filename)
    }

    /// Save RGB image to file with suffix appended before extension
    pub fn save_rgb_image_as(&self, img: &RgbImage, suffix: &str) -> Result<PathBuf> {
        let filename = self.compute_path(suffix, "png");
        img.save(&filename)?;
        info!("{}: saved", filename.display());
        Ok(filename)
    }

    /// Save centroid coordinates as CSV with an `x,y` header
    pub fn save_points_csv(&self, points: &[(u32, u32)], suffix: &str) -> Result<PathBuf> {
        let filename = self.compute_path(suffix, "csv");
        let mut writer = BufWriter::new(File::create(&filename)?);
        writeln!(writer, "x,y")?;
        for (x, y) in points {
            writeln!(writer, "{x},{y}")?;
        }
        writer.flush()?;
        info!("{}: saved {} points", filename.display(), points.len());
        Ok(filename)
    }

    /// Save the scalar fields of each record as CSV, masks are left out
    pub fn save_masks_csv(&self, records: &[MaskRecord], suffix: &str) -> Result<PathBuf> {
        let filename = self.compute_path(suffix, "csv");
        let mut writer = BufWriter::new(File::create(&filename)?);
        writeln!(
            writer,
            "area,bbox,predicted_iou,point_coords,stability_score,crop_box"
        )?;
        for record in records {
            let points = record
                .point_coords
                .iter()
                .map(|p| format!("[{}, {}]", p.x, p.y))
                .join(", ");
            writeln!(
                writer,
                "{},\"{}\",{},\"[{}]\",{},\"{}\"",
                record.area,
                format_rect(&record.bbox),
                record.predicted_iou,
                points,
                record.stability_score,
                format_rect(&record.crop_box),
            )?;
        }
        writer.flush()?;
        info!("{}: saved {} masks", filename.display(), records.len());
        Ok(filename)
    }

    /// Compute full file path from base path, suffix and extension
    pub fn compute_path(&self, suffix: &str, extension: &str) -> PathBuf {
        format!("{}-{suffix}.{extension}", self.base_path.display()).into()
    }
}

fn format_rect(rect: &Rect) -> String {
    format!(
        "[{}, {}, {}, {}]",
        rect.left(),
        rect.top(),
        rect.width(),
        rect.height()
    )
}
