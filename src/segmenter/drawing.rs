use image::{GrayImage, Rgb, RgbImage};
use palette::{FromColor, Hsv, Srgb};

use super::mask::LabelImage;
use crate::{Error, Result};

/// Opacity of label colors painted over the source image
pub const OVERLAY_ALPHA: f32 = 0.2;

/// Opacity of centroid markers painted over the source image
pub const POINT_ALPHA: f32 = 0.4;

/// Golden angle in degrees, spreads consecutive labels around the hue circle
const HUE_STEP: f32 = 137.507_77;

/// Distinct, stable color for a positive label
pub(crate) fn label_color(label: u32) -> Rgb<u8> {
    let hue = (label as f32 * HUE_STEP) % 360.0;
    let hsv: Hsv = Hsv::new(hue, 0.85, 0.95);
    let rgb: Srgb = Srgb::from_color(hsv);
    let rgb: Srgb<u8> = rgb.into_format();
    Rgb([rgb.red, rgb.green, rgb.blue])
}

/// Blend a label image over the source image, background pixels are kept as they are
pub fn overlay_labels(labels: &LabelImage, image: &RgbImage, alpha: f32) -> Result<RgbImage> {
    if labels.dimensions() != image.dimensions() {
        return Err(Error::MaskShape {
            width: image.width(),
            height: image.height(),
            found_width: labels.width(),
            found_height: labels.height(),
        });
    }
    let mut blended = image.clone();
    for (pixel, label) in blended.pixels_mut().zip(labels.pixels()) {
        if label[0] == 0 {
            continue;
        }
        blend(pixel, label_color(label[0]), alpha);
    }
    Ok(blended)
}

fn blend(pixel: &mut Rgb<u8>, color: Rgb<u8>, alpha: f32) {
    for channel in 0..3 {
        let mixed = pixel[channel] as f32 * (1.0 - alpha) + color[channel] as f32 * alpha;
        pixel[channel] = mixed.round().clamp(0.0, 255.0) as u8;
    }
}

/// Blend a fixed color over the source image wherever the point image is set
pub fn overlay_points(
    points: &GrayImage,
    image: &RgbImage,
    color: Rgb<u8>,
    alpha: f32,
) -> Result<RgbImage> {
    if points.dimensions() != image.dimensions() {
        return Err(Error::MaskShape {
            width: image.width(),
            height: image.height(),
            found_width: points.width(),
            found_height: points.height(),
        });
    }
    let mut painted = image.clone();
    for (pixel, point) in painted.pixels_mut().zip(points.pixels()) {
        if point[0] != 0 {
            blend(pixel, color, alpha);
        }
    }
    Ok(painted)
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    #[test]
    fn neighbouring_labels_get_different_colors() {
        assert_ne!(label_color(1), label_color(2));
        assert_eq!(label_color(7), label_color(7));
    }

    #[test]
    fn background_is_untouched_and_labels_are_tinted() {
        let image = RgbImage::from_pixel(4, 4, Rgb([100, 100, 100]));
        let mut labels = LabelImage::new(4, 4);
        labels.put_pixel(2, 2, Luma([1]));
        let blended = overlay_labels(&labels, &image, OVERLAY_ALPHA).unwrap();
        assert_eq!(blended.get_pixel(0, 0), &Rgb([100, 100, 100]));
        assert_ne!(blended.get_pixel(2, 2), &Rgb([100, 100, 100]));
    }

    #[test]
    fn points_are_blended_like_labels() {
        let image = RgbImage::from_pixel(3, 3, Rgb([100, 100, 100]));
        let mut points = GrayImage::new(3, 3);
        points.put_pixel(1, 1, Luma([255]));
        let painted = overlay_points(&points, &image, Rgb([255, 0, 0]), POINT_ALPHA).unwrap();
        // 100 * 0.6 + 255 * 0.4 = 162, 100 * 0.6 = 60
        assert_eq!(painted.get_pixel(1, 1), &Rgb([162, 60, 60]));
        assert_eq!(painted.get_pixel(0, 0), &Rgb([100, 100, 100]));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let image = RgbImage::new(3, 3);
        let labels = LabelImage::new(4, 3);
        assert!(overlay_labels(&labels, &image, OVERLAY_ALPHA).is_err());
    }
}
