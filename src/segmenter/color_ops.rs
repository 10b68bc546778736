use image::{Luma, Rgb, RgbImage};

use super::mask::IntensityImage;

/// Convert a color image to grayscale, replicated over three channels
pub fn to_gray_rgb(image: &RgbImage) -> RgbImage {
    let gray = image::imageops::grayscale(image);
    let (width, height) = gray.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let value = gray.get_pixel(x, y)[0];
        Rgb([value, value, value])
    })
}

/// Average the channels of each pixel into an intensity reference image
pub fn intensity_reference(image: &RgbImage) -> IntensityImage {
    let (width, height) = image.dimensions();
    let mut reference = IntensityImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels() {
        let sum = pixel.0.iter().map(|&c| c as f32).sum::<f32>();
        reference.put_pixel(x, y, Luma([sum / 3.0]));
    }
    reference
}
