//! Preprocessing: rasterize the Cropped -> Inference letterbox and build the
//! network input tensor.
//!
//! The letterbox geometry itself is defined by the coordinate space manager;
//! this module only realizes it on pixels, so the transform used for the
//! resize is guaranteed to be the same one later used to project detections
//! back out of Inference space.

use anyhow::Result;
use image::{Rgb, RgbImage, imageops::FilterType};
use log::Level;
use tract_onnx::prelude::Tensor;

use crate::space::{Extent, Letterbox};
use otoseg_utils::{InferenceDimensions, rgb_to_chw_norm, timing_guard};

/// Border gray used to fill letterbox padding.
const PAD_COLOR: Rgb<u8> = Rgb([114, 114, 114]);

/// Output of preprocessing: the tensor plus the geometry needed to undo it.
#[derive(Debug)]
pub struct PreprocessOutput {
    /// `[1, 3, H, W]` RGB tensor with channels scaled to `[0, 1]`.
    pub tensor: Tensor,
    /// The letterbox geometry that was rasterized.
    pub letterbox: Letterbox,
    /// Extent of the content image that was letterboxed (the Cropped extent).
    pub content_extent: Extent,
}

/// Letterbox `image` into `target`: aspect-preserving resize plus centered
/// gray padding. Returns the padded raster and the geometry used.
pub fn letterbox_image(image: &RgbImage, target: Extent) -> (RgbImage, Letterbox) {
    let (width, height) = image.dimensions();
    let lb = Letterbox::fit(Extent::new(width, height), target);

    let resized = if (lb.inner_width, lb.inner_height) == (width, height) {
        image.clone()
    } else {
        image::imageops::resize(image, lb.inner_width, lb.inner_height, FilterType::Triangle)
    };

    let mut canvas = RgbImage::from_pixel(target.width, target.height, PAD_COLOR);
    image::imageops::replace(&mut canvas, &resized, lb.pad_left as i64, lb.pad_top as i64);
    (canvas, lb)
}

/// Prepare a (cropped) photograph for the segmentation backend.
pub fn preprocess_image(
    image: &RgbImage,
    inference: InferenceDimensions,
) -> Result<PreprocessOutput> {
    let _guard = timing_guard("otoseg_core::preprocess_image", Level::Trace);
    let (width, height) = image.dimensions();
    anyhow::ensure!(
        width > 0 && height > 0,
        "source image dimensions must be greater than zero"
    );
    anyhow::ensure!(
        inference.width > 0 && inference.height > 0,
        "inference dimensions must be greater than zero"
    );

    let target = Extent::new(inference.width, inference.height);
    let (padded, letterbox) = letterbox_image(image, target);
    let chw = rgb_to_chw_norm(&padded);

    let shape = [1usize, 3, inference.height as usize, inference.width as usize];
    let (data, offset) = chw.into_raw_vec_and_offset();
    debug_assert_eq!(offset, Some(0), "expected contiguous array");
    let tensor = Tensor::from_shape(&shape, &data)
        .map_err(|e| anyhow::anyhow!("failed to build tensor: {e}"))?;

    Ok(PreprocessOutput {
        tensor,
        letterbox,
        content_extent: Extent::new(width, height),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_pads_landscape_content_vertically() {
        let image = RgbImage::from_pixel(1600, 1080, Rgb([10, 20, 30]));
        let (padded, lb) = letterbox_image(&image, Extent::new(640, 640));

        assert_eq!(padded.dimensions(), (640, 640));
        assert_eq!(lb.inner_width, 640);
        assert_eq!(lb.inner_height, 432);
        assert_eq!(lb.pad_left, 0);
        assert_eq!(lb.pad_top, 104);

        assert_eq!(padded.get_pixel(320, 0), &PAD_COLOR);
        assert_eq!(padded.get_pixel(320, 639), &PAD_COLOR);
        assert_eq!(padded.get_pixel(320, 320), &Rgb([10, 20, 30]));
    }

    #[test]
    fn square_content_needs_no_padding() {
        let image = RgbImage::from_pixel(1080, 1080, Rgb([50, 50, 50]));
        let (padded, lb) = letterbox_image(&image, Extent::new(640, 640));
        assert_eq!(lb.pad_left, 0);
        assert_eq!(lb.pad_top, 0);
        assert_eq!(padded.get_pixel(0, 0), &Rgb([50, 50, 50]));
    }

    #[test]
    fn tensor_has_expected_shape_and_range() {
        let image = RgbImage::from_pixel(100, 80, Rgb([255, 128, 0]));
        let output = preprocess_image(&image, InferenceDimensions::default()).unwrap();

        assert_eq!(output.tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(output.content_extent, Extent::new(100, 80));
        let data = output.tensor.as_slice::<f32>().unwrap();
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn zero_sized_input_is_rejected() {
        let image = RgbImage::new(0, 10);
        assert!(preprocess_image(&image, InferenceDimensions::default()).is_err());
    }
}
