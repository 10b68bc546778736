use image::{GrayImage, ImageBuffer, Luma};
use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::{Error, Result};

/// Dense label image, 0 is background and every positive value is one mask record
pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Single channel intensity image used to exclude dark pixels from masks
pub type IntensityImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Pixel value marking a pixel as part of a mask
pub const MASK_ON: u8 = 255;

/// One detected region, in either tile-local or global coordinates
#[derive(Debug, Clone)]
pub struct MaskRecord {
    /// Occupancy mask, `MASK_ON` inside the region and 0 outside
    pub segmentation: GrayImage,
    /// Number of set pixels in `segmentation`
    pub area: u32,
    pub bbox: Rect,
    pub predicted_iou: f32,
    pub point_coords: Vec<Point<f32>>,
    pub stability_score: f32,
    pub crop_box: Rect,
}

impl MaskRecord {
    /// Build a record from a mask, deriving area and bounding box from its pixels
    ///
    /// Seed point, IoU and stability default to the mask centroid and 1.0.
    pub fn from_mask(segmentation: GrayImage) -> Self {
        let area = count_pixels(&segmentation);
        let bbox = bounding_box(&segmentation)
            .unwrap_or_else(|| Rect::at(0, 0).of_size(1, 1));
        let crop_box = Rect::at(0, 0).of_size(
            segmentation.width().max(1),
            segmentation.height().max(1),
        );
        let point_coords = match mean_position(&segmentation) {
            Some((x, y)) => vec![Point::new(x as f32, y as f32)],
            None => Vec::new(),
        };
        Self {
            segmentation,
            area,
            bbox,
            predicted_iou: 1.0,
            point_coords,
            stability_score: 1.0,
            crop_box,
        }
    }

    /// Whether the mask covers pixel (x, y)
    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.segmentation.get_pixel(x, y)[0] != 0
    }

    /// Same record with a different occupancy mask, scalar and point fields untouched
    pub(crate) fn with_segmentation(&self, segmentation: GrayImage) -> Self {
        Self {
            segmentation,
            area: self.area,
            bbox: self.bbox,
            predicted_iou: self.predicted_iou,
            point_coords: self.point_coords.clone(),
            stability_score: self.stability_score,
            crop_box: self.crop_box,
        }
    }
}

/// Count the set pixels of a mask
pub fn count_pixels(mask: &GrayImage) -> u32 {
    mask.pixels().filter(|p| p[0] != 0).count() as u32
}

/// Mean (x, y) position of the set pixels, or None for an empty mask
pub fn mean_position(mask: &GrayImage) -> Option<(f64, f64)> {
    let mut sum_x = 0f64;
    let mut sum_y = 0f64;
    let mut count = 0u64;
    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel[0] == 0 {
            continue;
        }
        sum_x += x as f64;
        sum_y += y as f64;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some((sum_x / count as f64, sum_y / count as f64))
}

/// Tight bounding box of the set pixels, or None for an empty mask
pub fn bounding_box(mask: &GrayImage) -> Option<Rect> {
    let mut left = mask.width();
    let mut top = mask.height();
    let mut right = 0;
    let mut bottom = 0;
    let mut found = false;
    for (x, y, pixel) in mask.enumerate_pixels() {
        // Unset pixels are skipped
        if pixel[0] == 0 {
            continue;
        }
        found = true;
        left = left.min(x);
        right = right.max(x);
        top = top.min(y);
        bottom = bottom.max(y);
    }
    found.then(|| {
        Rect::at(left as i32, top as i32).of_size(right - left + 1, bottom - top + 1)
    })
}

/// Fail unless `mask` is exactly `width` x `height`
pub(crate) fn ensure_shape(mask: &GrayImage, width: u32, height: u32) -> Result<()> {
    ensure_shape_dims(mask.dimensions(), width, height)
}

/// Fail unless `dimensions` is exactly (`width`, `height`)
pub(crate) fn ensure_shape_dims(dimensions: (u32, u32), width: u32, height: u32) -> Result<()> {
    let (found_width, found_height) = dimensions;
    if (found_width, found_height) != (width, height) {
        return Err(Error::MaskShape {
            width,
            height,
            found_width,
            found_height,
        });
    }
    Ok(())
}

/// Allocate a zeroed label image, reporting allocation failure instead of aborting
pub(crate) fn try_new_label_image(width: u32, height: u32, records: usize) -> Result<LabelImage> {
    let exhausted = || Error::ResourceExhaustion {
        width,
        height,
        records,
    };
    let len = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(exhausted)?;
    let mut buffer: Vec<u32> = Vec::new();
    buffer.try_reserve_exact(len).map_err(|_| exhausted())?;
    buffer.resize(len, 0);
    LabelImage::from_raw(width, height, buffer).ok_or_else(exhausted)
}
