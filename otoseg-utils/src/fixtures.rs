//! Synthetic test fixtures shared by unit and integration tests.
//!
//! Real otoscope captures cannot ship with the repository, so tests build
//! images with the same gross structure: a dark frame with a bright circular
//! viewport. The helpers here keep that construction in one place.

use image::{GrayImage, Luma, Rgb, RgbImage};

/// Build a synthetic otoscope frame: dark background with a bright filled
/// disc representing the circular optical viewport.
pub fn scope_frame(width: u32, height: u32, center: (f32, f32), radius: f32) -> RgbImage {
    let mut image = RgbImage::from_pixel(width, height, Rgb([8, 6, 5]));
    stamp_disc(&mut image, center, radius, Rgb([205, 170, 140]));
    image
}

/// Build a binary mask (0/255) containing a single filled disc.
pub fn disc_mask(width: u32, height: u32, center: (f32, f32), radius: f32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    let r2 = radius * radius;
    for (x, y, pixel) in mask.enumerate_pixels_mut() {
        let dx = x as f32 - center.0;
        let dy = y as f32 - center.1;
        if dx * dx + dy * dy <= r2 {
            *pixel = Luma([255]);
        }
    }
    mask
}

/// Build a uniform single-color frame (all-black, all-white, ...).
pub fn flat_frame(width: u32, height: u32, value: u8) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([value, value, value]))
}

fn stamp_disc(image: &mut RgbImage, center: (f32, f32), radius: f32, color: Rgb<u8>) {
    let r2 = radius * radius;
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let dx = x as f32 - center.0;
        let dy = y as f32 - center.1;
        if dx * dx + dy * dy <= r2 {
            *pixel = color;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_frame_has_bright_center_and_dark_corner() {
        let frame = scope_frame(200, 200, (100.0, 100.0), 60.0);
        assert_eq!(frame.get_pixel(100, 100), &Rgb([205, 170, 140]));
        assert_eq!(frame.get_pixel(0, 0), &Rgb([8, 6, 5]));
    }

    #[test]
    fn disc_mask_is_binary_and_centered() {
        let mask = disc_mask(64, 64, (32.0, 32.0), 10.0);
        assert_eq!(mask.get_pixel(32, 32)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert!(mask.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }
}
