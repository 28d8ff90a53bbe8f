use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, RgbImage, imageops::FilterType};
use ndarray::Array3;

/// Load an image from disk into memory.
///
/// # Arguments
///
/// * `path` - The path to the image file.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path_ref = path.as_ref();
    image::open(path_ref).with_context(|| format!("failed to open image {}", path_ref.display()))
}

/// Convert an RGB image into an RGB CHW array with channels scaled to `[0, 1]`.
///
/// This rearranges the memory layout from HWC (height, width, channels) to
/// CHW (channels, height, width), the layout segmentation backends consume.
///
/// # Arguments
///
/// * `image` - The RGB image to convert.
pub fn rgb_to_chw_norm(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut array = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (xi, yi) = (x as usize, y as usize);
        array[(0, yi, xi)] = pixel[0] as f32 / 255.0;
        array[(1, yi, xi)] = pixel[1] as f32 / 255.0;
        array[(2, yi, xi)] = pixel[2] as f32 / 255.0;
    }
    array
}

/// Resample a binary mask to the requested resolution.
///
/// Nearest-neighbor sampling keeps the mask strictly two-valued; interpolating
/// filters would introduce gray pixels and break the 0/255 semantic.
pub fn resize_mask_nearest(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    image::imageops::resize(mask, width.max(1), height.max(1), FilterType::Nearest)
}

/// Weighted blend of two equally sized RGB images: `overlay * alpha + base * (1 - alpha)`.
///
/// The equivalent of OpenCV's `addWeighted`, used to composite translucent
/// annotation layers. `alpha` is clamped to `[0, 1]`.
pub fn blend_weighted(base: &RgbImage, overlay: &RgbImage, alpha: f32) -> RgbImage {
    debug_assert_eq!(base.dimensions(), overlay.dimensions());
    let alpha = alpha.clamp(0.0, 1.0);
    let mut out = base.clone();
    for (dst, src) in out.pixels_mut().zip(overlay.pixels()) {
        for c in 0..3 {
            let blended = src[c] as f32 * alpha + dst[c] as f32 * (1.0 - alpha);
            dst[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
